use crate::config::RetrySettings;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Retry parameters for one attempt sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 disables retrying entirely
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default)]
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay: default_max_delay(),
            jitter_enabled: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation once and lets failures propagate
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.max_attempts == 0
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn allows_another(&self, attempt: u32) -> bool {
        !self.is_disabled() && attempt < self.max_attempts
    }
}

/// Lookup key for a policy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolicyKey {
    Operation(String),
    Error(ErrorKind),
}

impl PolicyKey {
    pub fn operation(name: impl Into<String>) -> Self {
        PolicyKey::Operation(name.into())
    }

    fn tag(&self) -> &str {
        match self {
            PolicyKey::Operation(name) => name,
            PolicyKey::Error(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Resolves policies from built-in defaults overlaid with configured overrides
#[derive(Debug, Clone)]
pub struct RetryPolicyResolver {
    policies: HashMap<String, RetryPolicy>,
    fallback: RetryPolicy,
}

impl RetryPolicyResolver {
    pub fn new(settings: &RetrySettings) -> Self {
        let mut policies = builtin_policies();
        for (key, policy) in &settings.policies {
            policies.insert(key.clone(), policy.clone());
        }
        let fallback = policies
            .get(ErrorKind::Unknown.as_str())
            .cloned()
            .unwrap_or_default();

        Self { policies, fallback }
    }

    pub fn resolve(&self, key: &PolicyKey) -> RetryPolicy {
        if let PolicyKey::Error(ErrorKind::ValidationError) = key {
            return RetryPolicy::no_retry();
        }
        self.policies
            .get(key.tag())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn resolve_error(&self, kind: ErrorKind) -> RetryPolicy {
        self.resolve(&PolicyKey::Error(kind))
    }

    pub fn resolve_operation(&self, operation: &str) -> RetryPolicy {
        self.resolve(&PolicyKey::operation(operation))
    }
}

impl Default for RetryPolicyResolver {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

/// Built-in policy for an operation type or error type tag
pub fn builtin_policy(key: &str) -> Option<RetryPolicy> {
    builtin_policies().remove(key)
}

/// Tags that have a built-in policy
pub fn builtin_policy_names() -> Vec<String> {
    let mut names: Vec<String> = builtin_policies().into_keys().collect();
    names.sort();
    names
}

fn builtin_policies() -> HashMap<String, RetryPolicy> {
    let network = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(30),
        jitter_enabled: true,
    };
    let storage = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(200),
        backoff_factor: 2.0,
        max_delay: Duration::from_secs(5),
        jitter_enabled: false,
    };

    let mut policies = HashMap::new();
    policies.insert("api_error".to_string(), network.clone());
    policies.insert("api_request".to_string(), network.clone());
    policies.insert("timeout".to_string(), network);
    policies.insert(
        "memory_error".to_string(),
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(2),
            jitter_enabled: false,
        },
    );
    policies.insert("validation_error".to_string(), RetryPolicy::no_retry());
    policies.insert("transactional_error".to_string(), storage.clone());
    policies.insert("database_write".to_string(), storage.clone());
    policies.insert("checkpoint_save".to_string(), storage);
    policies.insert("unknown".to_string(), RetryPolicy::default());
    policies
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}
