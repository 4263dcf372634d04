//! Resuming runs from checkpoints left by earlier runs

mod common;

use anyhow::Result;
use async_trait::async_trait;
use batchwise::checkpoint::{
    CheckpointError, CheckpointStore, FileCheckpointStore, Filters, MemoryCheckpointStore,
    RecoveryState,
};
use batchwise::config::ResumeMode;
use batchwise::testing::{fast_config, items, ScriptedProcessor};
use batchwise::{RunOptions, TerminalState};
use common::Harness;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Store whose first few saves fail as if the backend were briefly down
struct FlakyStore {
    inner: MemoryCheckpointStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    fn failing(times: u32) -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn load(
        &self,
        entity_name: &str,
        filters_hash: &str,
    ) -> Result<Option<RecoveryState>, CheckpointError> {
        self.inner.load(entity_name, filters_hash).await
    }

    async fn save(
        &self,
        entity_name: &str,
        filters_hash: &str,
        state: &RecoveryState,
    ) -> Result<(), CheckpointError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(CheckpointError::Unavailable("connection refused".to_string()));
        }
        self.inner.save(entity_name, filters_hash, state).await
    }

    async fn clear(&self, entity_name: &str) -> Result<usize, CheckpointError> {
        self.inner.clear(entity_name).await
    }
}

fn active() -> Filters {
    Filters::new().with("status", "active")
}

fn state_after_two_batches(filters: Filters) -> RecoveryState {
    let mut state = RecoveryState::new(filters, 250);
    state.last_batch_index = 2;
    state.processed_count = 100;
    state.items_consumed = 100;
    state
}

#[tokio::test]
async fn test_replay_resume_carries_counts_and_batch_numbers() -> Result<()> {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    orchestrator
        .checkpoints()
        .save("products", &state_after_two_batches(active()))
        .await?;

    let processor = ScriptedProcessor::new();
    let result = orchestrator
        .run(
            &items(250),
            &processor,
            RunOptions::new("products")
                .with_filters(active())
                .with_batch_size(50),
        )
        .await?;

    assert_eq!(result.terminal_state, TerminalState::Completed);
    assert!(result.log_contains("resuming from batch #2"));
    assert_eq!(result.resumed_from_batch, Some(2));
    // replay re-presents every item; counts continue from the checkpoint
    assert_eq!(result.processed_count, 350);
    assert_eq!(processor.calls(1), 1);
    assert_eq!(
        result.batches.iter().map(|b| b.batch_index).collect::<Vec<_>>(),
        vec![3, 4, 5, 6, 7]
    );
    Ok(())
}

#[tokio::test]
async fn test_skip_completed_resume_processes_only_remaining_items() -> Result<()> {
    let h = Harness::new();
    let mut config = fast_config();
    config.batch.resume_mode = ResumeMode::SkipCompleted;
    let orchestrator = h.orchestrator_with(config);
    orchestrator
        .checkpoints()
        .save("products", &state_after_two_batches(active()))
        .await?;

    let processor = ScriptedProcessor::new();
    let result = orchestrator
        .run(
            &items(250),
            &processor,
            RunOptions::new("products")
                .with_filters(active())
                .with_batch_size(50),
        )
        .await?;

    assert_eq!(result.terminal_state, TerminalState::Completed);
    assert_eq!(result.processed_count, 250);
    assert_eq!(processor.calls(100), 0);
    assert_eq!(processor.calls(101), 1);
    assert_eq!(result.batches_processed, 3);
    Ok(())
}

#[tokio::test]
async fn test_checkpoint_for_other_filters_is_ignored() -> Result<()> {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    orchestrator
        .checkpoints()
        .save("products", &state_after_two_batches(active()))
        .await?;

    let result = orchestrator
        .run(
            &items(250),
            &ScriptedProcessor::new(),
            RunOptions::new("products")
                .with_filters(Filters::new().with("status", "archived"))
                .with_batch_size(50),
        )
        .await?;

    assert_eq!(result.resumed_from_batch, None);
    assert!(!result.log_contains("Resuming"));
    assert_eq!(result.processed_count, 250);
    assert_eq!(result.batches[0].batch_index, 1);
    Ok(())
}

#[tokio::test]
async fn test_force_restart_discards_checkpoint() -> Result<()> {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    orchestrator
        .checkpoints()
        .save("products", &state_after_two_batches(active()))
        .await?;

    let result = orchestrator
        .run(
            &items(250),
            &ScriptedProcessor::new(),
            RunOptions::new("products")
                .with_filters(active())
                .with_batch_size(50)
                .force_restart(),
        )
        .await?;

    assert!(result.log_contains("Force restart: cleared 1 checkpoint(s)"));
    assert_eq!(result.resumed_from_batch, None);
    assert_eq!(result.processed_count, 250);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_run_resumes_without_reprocessing() -> Result<()> {
    let h = Harness::new();
    let mut config = fast_config();
    config.batch.resume_mode = ResumeMode::SkipCompleted;
    let orchestrator = h.orchestrator_with(config);
    let cancel = h.cancel.clone();
    let processor = ScriptedProcessor::new().after_item(60, move || cancel.cancel());
    let options = || RunOptions::new("products").with_batch_size(50);

    let first = orchestrator.run(&items(250), &processor, options()).await?;
    assert_eq!(first.terminal_state, TerminalState::Cancelled);
    assert_eq!(first.processed_count, 100);

    h.cancel.reset();
    let second = orchestrator.run(&items(250), &processor, options()).await?;

    assert_eq!(second.terminal_state, TerminalState::Completed);
    assert_eq!(second.resumed_from_batch, Some(2));
    assert_eq!(second.processed_count, 250);
    assert_eq!(processor.total_calls(), 250);
    Ok(())
}

#[tokio::test]
async fn test_file_checkpoint_survives_orchestrator_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()));
    let mut config = fast_config();
    config.batch.resume_mode = ResumeMode::SkipCompleted;
    let options = || {
        RunOptions::new("products")
            .with_filters(active())
            .with_batch_size(50)
    };

    let first = Harness::with_store(store.clone());
    let probe = first.probe.clone();
    let processor = ScriptedProcessor::new().after_item(100, move || probe.set_percent(95.0));
    let stopped = first
        .orchestrator_with(config.clone())
        .run(&items(250), &processor, options())
        .await?;
    assert_eq!(stopped.terminal_state, TerminalState::StoppedMemory);

    let saved = store
        .load("products", &active().hash())
        .await?
        .expect("checkpoint on disk");
    assert_eq!(saved.last_batch_index, 2);
    assert_eq!(saved.items_consumed, 100);

    // fresh process: new orchestrator, same directory, memory back to normal
    let second = Harness::with_store(Arc::new(FileCheckpointStore::new(dir.path())));
    let orchestrator = second.orchestrator_with(config);
    let resumed = orchestrator
        .run(&items(250), &ScriptedProcessor::new(), options())
        .await?;

    assert_eq!(resumed.terminal_state, TerminalState::Completed);
    assert_eq!(resumed.resumed_from_batch, Some(2));
    assert_eq!(resumed.processed_count, 250);
    assert_eq!(resumed.batches[0].batch_index, 3);
    assert!(orchestrator
        .checkpoints()
        .can_resume("products", &active())
        .await
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_checkpoint_kept_when_clearing_disabled() -> Result<()> {
    let h = Harness::new();
    let mut config = fast_config();
    config.batch.clear_checkpoint_on_completion = false;
    let orchestrator = h.orchestrator_with(config);

    orchestrator
        .run(
            &items(100),
            &ScriptedProcessor::new(),
            RunOptions::new("products").with_batch_size(50),
        )
        .await?;

    let state = orchestrator
        .checkpoints()
        .can_resume("products", &Filters::new())
        .await
        .expect("checkpoint retained");
    assert_eq!(state.last_batch_index, 2);
    assert_eq!(state.processed_count, 100);
    assert_eq!(state.total_count, 100);
    Ok(())
}

#[tokio::test]
async fn test_transient_checkpoint_write_failures_are_retried() -> Result<()> {
    let store = Arc::new(FlakyStore::failing(2));
    let h = Harness::with_store(store.clone());
    let mut config = fast_config();
    config.batch.clear_checkpoint_on_completion = false;
    let orchestrator = h.orchestrator_with(config);

    let result = orchestrator
        .run(
            &items(100),
            &ScriptedProcessor::new(),
            RunOptions::new("products").with_batch_size(50),
        )
        .await?;

    assert_eq!(result.terminal_state, TerminalState::Completed);
    assert!(!result.batches[0].log.iter().any(|l| l.contains("Checkpoint not saved")));

    let metrics = orchestrator.checkpoint_retry_metrics().await;
    assert_eq!(metrics.successful_operations, 2);
    assert_eq!(metrics.retries.len(), 2);

    let saved = store.load("products", &Filters::new().hash()).await?;
    assert_eq!(saved.map(|s| s.last_batch_index), Some(2));
    Ok(())
}
