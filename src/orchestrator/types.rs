//! Run inputs, per-item outcomes and run/batch results

use crate::checkpoint::Filters;
use crate::recovery::RecoveryOutcome;
use crate::resources::{MemorySample, PressureLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Per-run parameters
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub entity_name: String,
    pub filters: Filters,
    /// Requested batch size; the configured default for the entity when `None`
    pub batch_size: Option<usize>,
    /// Ignore and clear any checkpoint for the entity
    pub force_restart: bool,
}

impl RunOptions {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn force_restart(mut self) -> Self {
        self.force_restart = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Processed,
    Skipped,
}

/// What the item processor reports for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub success: bool,
    pub action: Option<ItemAction>,
    pub message: Option<String>,
}

impl ItemOutcome {
    pub fn processed() -> Self {
        Self {
            success: true,
            action: Some(ItemAction::Processed),
            message: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            action: Some(ItemAction::Skipped),
            message: Some(reason.into()),
        }
    }

    /// Failure reported without raising an error
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            action: None,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl RunCounters {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        match (outcome.success, outcome.action) {
            (_, Some(ItemAction::Skipped)) => self.skipped += 1,
            (true, _) => self.processed += 1,
            (false, _) => self.errors += 1,
        }
    }

    pub fn add(&mut self, other: &RunCounters) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Identity and live counters of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub entity_name: String,
    pub filters: Filters,
    pub filters_hash: String,
    /// Batch in flight, if any
    pub batch_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub counters: RunCounters,
}

impl RunContext {
    pub fn new(entity_name: impl Into<String>, filters: Filters) -> Self {
        let filters_hash = filters.hash();
        Self {
            run_id: Uuid::new_v4(),
            entity_name: entity_name.into(),
            filters,
            filters_hash,
            batch_id: None,
            started_at: Utc::now(),
            counters: RunCounters::default(),
        }
    }

    /// Deterministic id of batch `index`, stable across runs with the same filters
    pub fn batch_id_for(&self, index: u64) -> String {
        let prefix_len = self.filters_hash.len().min(12);
        format!(
            "{}-{}-{}",
            self.entity_name,
            &self.filters_hash[..prefix_len],
            index
        )
    }
}

/// How a run ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    Completed,
    StoppedMemory,
    StoppedTimeout,
    StoppedGraceful,
    Cancelled,
    /// A batch failed and was rolled back
    StoppedError,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Completed => "completed",
            TerminalState::StoppedMemory => "stopped-memory",
            TerminalState::StoppedTimeout => "stopped-timeout",
            TerminalState::StoppedGraceful => "stopped-graceful",
            TerminalState::Cancelled => "cancelled",
            TerminalState::StoppedError => "stopped-error",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalState::Completed)
    }

    /// Stops that leave work behind and warrant a resumable checkpoint
    pub fn needs_state_recovery(&self) -> bool {
        matches!(
            self,
            TerminalState::StoppedMemory | TerminalState::StoppedTimeout | TerminalState::StoppedError
        )
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// 1-based index, continuing from the resumed checkpoint
    pub batch_index: u64,
    pub batch_id: String,
    pub item_count: usize,
    pub processed_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub memory_before: MemorySample,
    pub memory_after: MemorySample,
    pub pressure_before: PressureLevel,
    pub committed: bool,
    pub recoveries: Vec<RecoveryOutcome>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub entity_name: String,
    pub filters_hash: String,
    pub terminal_state: TerminalState,
    /// Totals including counts carried over from a resumed checkpoint
    pub processed_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
    /// Batches committed by this run
    pub batches_processed: usize,
    pub total_items: usize,
    pub resumed_from_batch: Option<u64>,
    pub final_batch_size: usize,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub batches: Vec<BatchResult>,
    /// State recovery performed when the run stopped early
    pub stop_recovery: Option<RecoveryOutcome>,
    pub log: Vec<String>,
}

impl RunResult {
    /// Case-insensitive search of the run log
    pub fn log_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.log
            .iter()
            .any(|line| line.to_lowercase().contains(&needle))
    }

    pub fn recoveries(&self) -> impl Iterator<Item = &RecoveryOutcome> {
        self.batches
            .iter()
            .flat_map(|b| b.recoveries.iter())
            .chain(self.stop_recovery.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_follow_outcome() {
        let mut counters = RunCounters::default();
        counters.record(&ItemOutcome::processed());
        counters.record(&ItemOutcome::skipped("unchanged"));
        counters.record(&ItemOutcome::failed("bad row"));
        counters.record(&ItemOutcome {
            success: true,
            action: None,
            message: None,
        });
        assert_eq!(
            counters,
            RunCounters {
                processed: 2,
                skipped: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn test_batch_ids_are_deterministic() {
        let filters = Filters::new().with("status", "active");
        let a = RunContext::new("products", filters.clone());
        let b = RunContext::new("products", filters);
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.batch_id_for(3), b.batch_id_for(3));
        assert!(a.batch_id_for(3).starts_with("products-"));
        assert!(a.batch_id_for(3).ends_with("-3"));
    }

    #[test]
    fn test_terminal_state_tags() {
        assert_eq!(TerminalState::StoppedMemory.to_string(), "stopped-memory");
        assert_eq!(
            serde_json::to_string(&TerminalState::StoppedGraceful).unwrap(),
            "\"stopped-graceful\""
        );
        assert!(TerminalState::StoppedTimeout.needs_state_recovery());
        assert!(!TerminalState::Cancelled.needs_state_recovery());
    }
}
