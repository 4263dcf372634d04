use super::StrategyKind;
use crate::checkpoint::RecoveryState;
use crate::config::DegradationConfig;
use crate::error::{ErrorKind, ItemError, Severity};
use crate::resources::{CleanupTier, MemorySample, PressureLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How much to shrink work when an upstream is failing hard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Light,
    Moderate,
    Heavy,
    /// Item-by-item fallback
    Critical,
}

impl DegradationLevel {
    /// Level for a run of consecutive critical failures under the configured cut-offs
    pub fn from_consecutive_failures(failures: u32, cutoffs: &DegradationConfig) -> Self {
        if failures >= cutoffs.critical_after {
            DegradationLevel::Critical
        } else if failures >= cutoffs.heavy_after {
            DegradationLevel::Heavy
        } else if failures >= cutoffs.moderate_after {
            DegradationLevel::Moderate
        } else {
            DegradationLevel::Light
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DegradationLevel::Light => "light",
            DegradationLevel::Moderate => "moderate",
            DegradationLevel::Heavy => "heavy",
            DegradationLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Everything a strategy may need to know about the failure and the run
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub entity_name: String,
    pub error_kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    /// Attempt number that just failed, starting at 1
    pub attempt: u32,
    /// Named operation whose retry policy takes precedence over the error kind's
    pub operation: Option<String>,
    pub current_batch_size: usize,
    pub min_batch_size: usize,
    pub degradation_level: Option<DegradationLevel>,
    pub consecutive_critical_failures: u32,
    /// Progress of the run so far, for state recovery
    pub snapshot: Option<RecoveryState>,
    pub memory: Option<MemorySample>,
    pub sustained_pressure: bool,
}

impl RecoveryContext {
    pub fn new(entity_name: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self {
            entity_name: entity_name.into(),
            error_kind,
            severity: Severity::default(),
            message: String::new(),
            attempt: 1,
            operation: None,
            current_batch_size: 1,
            min_batch_size: 1,
            degradation_level: None,
            consecutive_critical_failures: 0,
            snapshot: None,
            memory: None,
            sustained_pressure: false,
        }
    }

    pub fn for_item_error(entity_name: impl Into<String>, error: &ItemError) -> Self {
        Self {
            severity: error.severity,
            message: error.message.clone(),
            ..Self::new(entity_name, error.kind)
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_batch_size(mut self, current: usize, min: usize) -> Self {
        self.current_batch_size = current;
        self.min_batch_size = min;
        self
    }

    pub fn with_degradation_level(mut self, level: DegradationLevel) -> Self {
        self.degradation_level = Some(level);
        self
    }

    pub fn with_consecutive_critical_failures(mut self, failures: u32) -> Self {
        self.consecutive_critical_failures = failures;
        self
    }

    pub fn with_snapshot(mut self, snapshot: RecoveryState) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_memory(mut self, sample: MemorySample, sustained: bool) -> Self {
        self.memory = Some(sample);
        self.sustained_pressure = sustained;
        self
    }
}

/// What a strategy did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryDetails {
    Backoff {
        attempt: u32,
        #[serde(with = "humantime_serde")]
        delay: Duration,
        attempts_remaining: u32,
    },
    RetriesExhausted {
        attempts: u32,
    },
    Degraded {
        level: DegradationLevel,
        previous_batch_size: usize,
        new_batch_size: usize,
    },
    CheckpointRestored {
        last_batch_index: u64,
    },
    CheckpointSynthesized {
        last_batch_index: u64,
    },
    CheckpointUnavailable {
        reason: String,
    },
    Cleanup {
        tier: Option<CleanupTier>,
        pressure: PressureLevel,
        entries_evicted: usize,
        bytes_freed: u64,
        failed_steps: usize,
    },
    NotRegistered,
}

impl fmt::Display for RecoveryDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryDetails::Backoff {
                attempt,
                delay,
                attempts_remaining,
            } => write!(
                f,
                "waited {:?} after attempt {} ({} attempts remaining)",
                delay, attempt, attempts_remaining
            ),
            RecoveryDetails::RetriesExhausted { attempts } => {
                write!(f, "no attempts left after {}", attempts)
            }
            RecoveryDetails::Degraded {
                level,
                previous_batch_size,
                new_batch_size,
            } => write!(
                f,
                "{} degradation: batch size {} -> {}",
                level, previous_batch_size, new_batch_size
            ),
            RecoveryDetails::CheckpointRestored { last_batch_index } => {
                write!(f, "existing checkpoint at batch #{} restored", last_batch_index)
            }
            RecoveryDetails::CheckpointSynthesized { last_batch_index } => {
                write!(f, "checkpoint synthesized at batch #{}", last_batch_index)
            }
            RecoveryDetails::CheckpointUnavailable { reason } => {
                write!(f, "checkpoint unavailable: {}", reason)
            }
            RecoveryDetails::Cleanup {
                tier,
                pressure,
                entries_evicted,
                bytes_freed,
                failed_steps,
            } => match tier {
                Some(tier) => write!(
                    f,
                    "{} cleanup at {} pressure freed {} entries / {} bytes ({} steps failed)",
                    tier, pressure, entries_evicted, bytes_freed, failed_steps
                ),
                None => write!(f, "no cleanup needed at {} pressure", pressure),
            },
            RecoveryDetails::NotRegistered => write!(f, "no strategy registered"),
        }
    }
}

/// Result of one strategy invocation. Reported, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub attempted: bool,
    pub successful: bool,
    pub strategy: StrategyKind,
    pub details: RecoveryDetails,
}

impl RecoveryOutcome {
    pub fn succeeded(strategy: StrategyKind, details: RecoveryDetails) -> Self {
        Self {
            attempted: true,
            successful: true,
            strategy,
            details,
        }
    }

    pub fn failed(strategy: StrategyKind, details: RecoveryDetails) -> Self {
        Self {
            attempted: true,
            successful: false,
            strategy,
            details,
        }
    }

    pub fn not_attempted(strategy: StrategyKind) -> Self {
        Self {
            attempted: false,
            successful: false,
            strategy,
            details: RecoveryDetails::NotRegistered,
        }
    }
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match (self.attempted, self.successful) {
            (false, _) => "skipped",
            (true, true) => "ok",
            (true, false) => "failed",
        };
        write!(f, "{} [{}]: {}", self.strategy, status, self.details)
    }
}
