//! Engine configuration
//!
//! Every tunable the engine uses lives in [`EngineConfig`]. Sections can be
//! loaded from a TOML/YAML/JSON file and individual settings overridden
//! through a [`ConfigProvider`] (environment variables, a host's settings
//! table, ...).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod loader;
pub mod provider;

pub use provider::{ConfigProvider, EnvConfigProvider, MapConfigProvider};

use crate::retry::{builtin_policy, builtin_policy_names, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What a resumed run does with items a previous run already handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Process the whole sequence again; only counters carry over
    #[default]
    Replay,
    /// Start after the last item the checkpoint recorded as consumed
    SkipCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub degradation: DegradationConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Batch size used when neither the caller nor `entity_batch_sizes` gives one
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Floor for every adaptive resize
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Per-entity default sizes
    #[serde(default)]
    pub entity_batch_sizes: HashMap<String, usize>,

    /// Wall-clock ceiling for a single batch
    #[serde(default = "default_batch_timeout", with = "humantime_serde")]
    pub batch_timeout: Duration,

    #[serde(default)]
    pub resume_mode: ResumeMode,

    #[serde(default = "default_true")]
    pub clear_checkpoint_on_completion: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            min_batch_size: default_min_batch_size(),
            entity_batch_sizes: HashMap::new(),
            batch_timeout: default_batch_timeout(),
            resume_mode: ResumeMode::default(),
            clear_checkpoint_on_completion: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold_percent: f64,

    #[serde(default = "default_critical_threshold")]
    pub critical_threshold_percent: f64,

    /// Memory budget for the process; total system memory when unset
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,

    /// How many times a batch re-samples memory while it runs
    #[serde(default = "default_samples_per_batch")]
    pub samples_per_batch: usize,

    /// Consecutive elevated batches before cleanup escalates
    #[serde(default = "default_sustained_pressure_batches")]
    pub sustained_pressure_batches: u32,

    /// Batch size multiplier when usage sits exactly at the warn threshold
    #[serde(default = "default_shrink_at_warn")]
    pub shrink_at_warn: f64,

    /// Batch size multiplier as usage reaches the critical threshold
    #[serde(default = "default_shrink_at_critical")]
    pub shrink_at_critical: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warn_threshold_percent: default_warn_threshold(),
            critical_threshold_percent: default_critical_threshold(),
            memory_limit_bytes: None,
            samples_per_batch: default_samples_per_batch(),
            sustained_pressure_batches: default_sustained_pressure_batches(),
            shrink_at_warn: default_shrink_at_warn(),
            shrink_at_critical: default_shrink_at_critical(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Pause after a batch that ended at the warn threshold
    #[serde(default = "default_warn_pause", with = "humantime_serde")]
    pub warn_pause: Duration,

    /// Pause after a batch that ended at the critical threshold
    #[serde(default = "default_max_pause", with = "humantime_serde")]
    pub max_pause: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            warn_pause: default_warn_pause(),
            max_pause: default_max_pause(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Hard ceiling applied on top of each policy's own max delay
    #[serde(default = "default_global_max_delay", with = "humantime_serde")]
    pub global_max_delay: Duration,

    /// Upper bound of the uniform jitter added to a delay
    #[serde(default = "default_jitter_max", with = "humantime_serde")]
    pub jitter_max: Duration,

    /// Policy overrides keyed by operation type or error type tag
    #[serde(default)]
    pub policies: HashMap<String, RetryPolicy>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            global_max_delay: default_global_max_delay(),
            jitter_max: default_jitter_max(),
            policies: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    #[serde(default = "default_light_multiplier")]
    pub light_multiplier: f64,
    #[serde(default = "default_moderate_multiplier")]
    pub moderate_multiplier: f64,
    #[serde(default = "default_heavy_multiplier")]
    pub heavy_multiplier: f64,

    /// Consecutive critical failures at which each level starts
    #[serde(default = "default_moderate_after")]
    pub moderate_after: u32,
    #[serde(default = "default_heavy_after")]
    pub heavy_after: u32,
    #[serde(default = "default_critical_after")]
    pub critical_after: u32,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            light_multiplier: default_light_multiplier(),
            moderate_multiplier: default_moderate_multiplier(),
            heavy_multiplier: default_heavy_multiplier(),
            moderate_after: default_moderate_after(),
            heavy_after: default_heavy_after(),
            critical_after: default_critical_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Aggregate cached bytes above which a maintenance eviction runs
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    #[serde(default = "default_stale_ratio_threshold")]
    pub stale_ratio_threshold: f64,

    /// Time-based cleanup runs at least this often
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Cache hit ratio below which a maintenance cleanup runs
    #[serde(default = "default_min_performance_score")]
    pub min_performance_score: f64,

    /// Share of cached bytes an emergency cleanup evicts
    #[serde(default = "default_emergency_evict_fraction")]
    pub emergency_evict_fraction: f64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: default_max_cache_bytes(),
            stale_ratio_threshold: default_stale_ratio_threshold(),
            cleanup_interval: default_cleanup_interval(),
            min_performance_score: default_min_performance_score(),
            emergency_evict_fraction: default_emergency_evict_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Route item failures through the recovery strategy engine
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Persist a checkpoint when a run stops early
    #[serde(default = "default_true")]
    pub checkpoint_on_stop: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            checkpoint_on_stop: true,
        }
    }
}

impl EngineConfig {
    /// Apply every setting the provider knows about on top of this config
    pub fn with_overrides(mut self, provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let p = provider;

        if let Some(v) = p.get_usize("batch.default_batch_size")? {
            self.batch.default_batch_size = v;
        }
        if let Some(v) = p.get_usize("batch.min_batch_size")? {
            self.batch.min_batch_size = v;
        }
        if let Some(v) = p.get_duration("batch.batch_timeout")? {
            self.batch.batch_timeout = v;
        }
        if let Some(v) = p.get_bool("batch.clear_checkpoint_on_completion")? {
            self.batch.clear_checkpoint_on_completion = v;
        }
        if let Some(v) = p.get("batch.resume_mode") {
            self.batch.resume_mode = match v.trim() {
                "replay" => ResumeMode::Replay,
                "skip_completed" => ResumeMode::SkipCompleted,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "batch.resume_mode".to_string(),
                        value: other.to_string(),
                    })
                }
            };
        }

        if let Some(v) = p.get_f64("memory.warn_threshold_percent")? {
            self.memory.warn_threshold_percent = v;
        }
        if let Some(v) = p.get_f64("memory.critical_threshold_percent")? {
            self.memory.critical_threshold_percent = v;
        }
        if let Some(v) = p.get_u64("memory.memory_limit_bytes")? {
            self.memory.memory_limit_bytes = Some(v);
        }
        if let Some(v) = p.get_usize("memory.samples_per_batch")? {
            self.memory.samples_per_batch = v;
        }
        if let Some(v) = get_u32(p, "memory.sustained_pressure_batches")? {
            self.memory.sustained_pressure_batches = v;
        }
        if let Some(v) = p.get_f64("memory.shrink_at_warn")? {
            self.memory.shrink_at_warn = v;
        }
        if let Some(v) = p.get_f64("memory.shrink_at_critical")? {
            self.memory.shrink_at_critical = v;
        }

        if let Some(v) = p.get_duration("pacing.warn_pause")? {
            self.pacing.warn_pause = v;
        }
        if let Some(v) = p.get_duration("pacing.max_pause")? {
            self.pacing.max_pause = v;
        }

        if let Some(v) = p.get_duration("retry.global_max_delay")? {
            self.retry.global_max_delay = v;
        }
        if let Some(v) = p.get_duration("retry.jitter_max")? {
            self.retry.jitter_max = v;
        }
        self.apply_retry_policy_overrides(p)?;

        if let Some(v) = p.get_f64("degradation.light_multiplier")? {
            self.degradation.light_multiplier = v;
        }
        if let Some(v) = p.get_f64("degradation.moderate_multiplier")? {
            self.degradation.moderate_multiplier = v;
        }
        if let Some(v) = p.get_f64("degradation.heavy_multiplier")? {
            self.degradation.heavy_multiplier = v;
        }
        if let Some(v) = get_u32(p, "degradation.moderate_after")? {
            self.degradation.moderate_after = v;
        }
        if let Some(v) = get_u32(p, "degradation.heavy_after")? {
            self.degradation.heavy_after = v;
        }
        if let Some(v) = get_u32(p, "degradation.critical_after")? {
            self.degradation.critical_after = v;
        }

        if let Some(v) = p.get_u64("cleanup.max_cache_bytes")? {
            self.cleanup.max_cache_bytes = v;
        }
        if let Some(v) = p.get_f64("cleanup.stale_ratio_threshold")? {
            self.cleanup.stale_ratio_threshold = v;
        }
        if let Some(v) = p.get_duration("cleanup.cleanup_interval")? {
            self.cleanup.cleanup_interval = v;
        }
        if let Some(v) = p.get_f64("cleanup.min_performance_score")? {
            self.cleanup.min_performance_score = v;
        }
        if let Some(v) = p.get_f64("cleanup.emergency_evict_fraction")? {
            self.cleanup.emergency_evict_fraction = v;
        }

        if let Some(v) = p.get_bool("recovery.enabled")? {
            self.recovery.enabled = v;
        }
        if let Some(v) = p.get_bool("recovery.checkpoint_on_stop")? {
            self.recovery.checkpoint_on_stop = v;
        }

        Ok(self)
    }

    /// Field overrides named `retry.policies.<tag>.<field>`.
    ///
    /// Tags are the built-in ones, those already configured, and any listed
    /// in the comma-separated `retry.policy_names` setting. A partial
    /// override keeps the remaining fields of the policy it replaces.
    fn apply_retry_policy_overrides(&mut self, p: &dyn ConfigProvider) -> Result<(), ConfigError> {
        let mut names = builtin_policy_names();
        names.extend(self.retry.policies.keys().cloned());
        if let Some(listed) = p.get("retry.policy_names") {
            names.extend(
                listed
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            );
        }
        names.sort();
        names.dedup();

        for name in names {
            let key = |field: &str| format!("retry.policies.{name}.{field}");
            let max_attempts = get_u32(p, &key("max_attempts"))?;
            let base_delay = p.get_duration(&key("base_delay"))?;
            let backoff_factor = p.get_f64(&key("backoff_factor"))?;
            let max_delay = p.get_duration(&key("max_delay"))?;
            let jitter_enabled = p.get_bool(&key("jitter_enabled"))?;

            if max_attempts.is_none()
                && base_delay.is_none()
                && backoff_factor.is_none()
                && max_delay.is_none()
                && jitter_enabled.is_none()
            {
                continue;
            }

            let mut policy = self
                .retry
                .policies
                .get(&name)
                .cloned()
                .or_else(|| builtin_policy(&name))
                .unwrap_or_default();
            if let Some(v) = max_attempts {
                policy.max_attempts = v;
            }
            if let Some(v) = base_delay {
                policy.base_delay = v;
            }
            if let Some(v) = backoff_factor {
                policy.backoff_factor = v;
            }
            if let Some(v) = max_delay {
                policy.max_delay = v;
            }
            if let Some(v) = jitter_enabled {
                policy.jitter_enabled = v;
            }
            self.retry.policies.insert(name, policy);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.memory;
        if !(m.warn_threshold_percent > 0.0
            && m.warn_threshold_percent < m.critical_threshold_percent
            && m.critical_threshold_percent <= 100.0)
        {
            return Err(ConfigError::Invalid(format!(
                "memory thresholds must satisfy 0 < warn ({}) < critical ({}) <= 100",
                m.warn_threshold_percent, m.critical_threshold_percent
            )));
        }
        if !(m.shrink_at_critical > 0.0
            && m.shrink_at_critical <= m.shrink_at_warn
            && m.shrink_at_warn <= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "memory shrink factors must satisfy 0 < critical ({}) <= warn ({}) <= 1",
                m.shrink_at_critical, m.shrink_at_warn
            )));
        }
        if m.samples_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "memory.samples_per_batch must be at least 1".to_string(),
            ));
        }
        if self.batch.min_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch.min_batch_size must be at least 1".to_string(),
            ));
        }
        if self.batch.default_batch_size < self.batch.min_batch_size {
            return Err(ConfigError::Invalid(format!(
                "batch.default_batch_size ({}) is below batch.min_batch_size ({})",
                self.batch.default_batch_size, self.batch.min_batch_size
            )));
        }
        if self.batch.batch_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "batch.batch_timeout must be greater than zero".to_string(),
            ));
        }
        let d = &self.degradation;
        for (name, value) in [
            ("light_multiplier", d.light_multiplier),
            ("moderate_multiplier", d.moderate_multiplier),
            ("heavy_multiplier", d.heavy_multiplier),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "degradation.{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if !(d.moderate_after >= 1
            && d.moderate_after <= d.heavy_after
            && d.heavy_after <= d.critical_after)
        {
            return Err(ConfigError::Invalid(format!(
                "degradation cut-offs must satisfy 1 <= moderate ({}) <= heavy ({}) <= critical ({})",
                d.moderate_after, d.heavy_after, d.critical_after
            )));
        }
        if !(0.0..=1.0).contains(&self.cleanup.emergency_evict_fraction) {
            return Err(ConfigError::Invalid(
                "cleanup.emergency_evict_fraction must be in [0, 1]".to_string(),
            ));
        }
        if self.pacing.max_pause < self.pacing.warn_pause {
            return Err(ConfigError::Invalid(
                "pacing.max_pause must not be shorter than pacing.warn_pause".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_u32(p: &dyn ConfigProvider, key: &str) -> Result<Option<u32>, ConfigError> {
    p.get_u64(key)?
        .map(|v| {
            u32::try_from(v).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

// Default functions for serde
fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_min_batch_size() -> usize {
    1
}

fn default_batch_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_warn_threshold() -> f64 {
    75.0
}

fn default_critical_threshold() -> f64 {
    90.0
}

fn default_samples_per_batch() -> usize {
    4
}

fn default_sustained_pressure_batches() -> u32 {
    3
}

fn default_shrink_at_warn() -> f64 {
    0.75
}

fn default_shrink_at_critical() -> f64 {
    0.25
}

fn default_warn_pause() -> Duration {
    Duration::from_millis(500)
}

fn default_max_pause() -> Duration {
    Duration::from_secs(5)
}

fn default_global_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter_max() -> Duration {
    Duration::from_millis(1000)
}

fn default_light_multiplier() -> f64 {
    0.75
}

fn default_moderate_multiplier() -> f64 {
    0.5
}

fn default_heavy_multiplier() -> f64 {
    0.25
}

fn default_moderate_after() -> u32 {
    2
}

fn default_heavy_after() -> u32 {
    3
}

fn default_critical_after() -> u32 {
    4
}

fn default_max_cache_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_stale_ratio_threshold() -> f64 {
    0.3
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_min_performance_score() -> f64 {
    0.5
}

fn default_emergency_evict_fraction() -> f64 {
    0.5
}
