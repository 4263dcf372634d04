//! Error classification and recovery strategies
//!
//! Failures are classified into a [`StrategyKind`] and dispatched through the
//! strategy table owned by [`ErrorRecoveryEngine`]:
//!
//! | error kind         | severity | strategy              |
//! |--------------------|----------|-----------------------|
//! | `api_error`        | critical | graceful degradation  |
//! | `api_error`        | other    | retry with backoff    |
//! | `memory_error`     | any      | resource cleanup      |
//! | `validation_error` | any      | none                  |
//! | anything else      | any      | retry with backoff    |

pub mod context;
pub mod engine;
pub mod strategies;

pub use context::{DegradationLevel, RecoveryContext, RecoveryDetails, RecoveryOutcome};
pub use engine::ErrorRecoveryEngine;
pub use strategies::{
    GracefulDegradationStrategy, RecoveryStrategy, ResourceCleanupStrategy,
    RetryWithBackoffStrategy, StateRecoveryStrategy,
};

use crate::error::{ErrorKind, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RetryWithBackoff,
    GracefulDegradation,
    StateRecovery,
    ResourceCleanup,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::RetryWithBackoff,
        StrategyKind::GracefulDegradation,
        StrategyKind::StateRecovery,
        StrategyKind::ResourceCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RetryWithBackoff => "retry_with_backoff",
            StrategyKind::GracefulDegradation => "graceful_degradation",
            StrategyKind::StateRecovery => "state_recovery",
            StrategyKind::ResourceCleanup => "resource_cleanup",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy for a failure, or `None` when it must not be recovered
pub fn classify(kind: ErrorKind, severity: Severity) -> Option<StrategyKind> {
    match (kind, severity) {
        (ErrorKind::ApiError, Severity::Critical) => Some(StrategyKind::GracefulDegradation),
        (ErrorKind::ApiError, _) => Some(StrategyKind::RetryWithBackoff),
        (ErrorKind::MemoryError, _) => Some(StrategyKind::ResourceCleanup),
        (ErrorKind::ValidationError, _) => None,
        _ => Some(StrategyKind::RetryWithBackoff),
    }
}

/// [`classify`] for a raw error type tag
pub fn classify_str(error_type: &str, severity: Severity) -> Option<StrategyKind> {
    classify(ErrorKind::parse(error_type), severity)
}
