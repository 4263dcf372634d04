//! The batch loop

use super::cancellation::CancellationFlag;
use super::metrics::MetricsSink;
use super::processor::ItemProcessor;
use super::types::{
    BatchResult, RunContext, RunCounters, RunOptions, RunResult, TerminalState,
};
use crate::checkpoint::{CheckpointManager, RecoveryState};
use crate::config::{EngineConfig, ResumeMode};
use crate::error::{EngineError, ErrorKind, ItemError, Result, Severity};
use crate::recovery::{
    ErrorRecoveryEngine, RecoveryContext, RecoveryDetails, RecoveryOutcome, StrategyKind,
};
use crate::resources::{
    BatchSizingPolicy, CleanupCoordinator, MemorySample, PressureLevel, ResourceMonitor,
};
use crate::retry::{RetryExecutor, RetryMetrics, RetryPolicy};
use crate::transaction::{TransactionBoundary, TransactionError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives a run: partitions items, wraps each batch in a transaction,
/// adapts to memory pressure, checkpoints progress and routes item failures
/// through the recovery engine.
///
/// Built with [`BatchOrchestratorBuilder`](super::BatchOrchestratorBuilder).
/// Runs for the same entity and filters must not overlap.
pub struct BatchOrchestrator {
    pub(super) config: EngineConfig,
    pub(super) monitor: ResourceMonitor,
    pub(super) sizing: Arc<dyn BatchSizingPolicy>,
    pub(super) checkpoints: Arc<CheckpointManager>,
    pub(super) transactions: TransactionBoundary,
    pub(super) recovery: ErrorRecoveryEngine,
    pub(super) cleanup: Arc<CleanupCoordinator>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) cancellation: CancellationFlag,
    pub(super) checkpoint_retry: RetryExecutor,
    pub(super) checkpoint_policy: RetryPolicy,
}

/// Why a batch was rolled back
enum BatchAbort {
    Timeout,
    Escaped(ItemError),
    Transaction(TransactionError),
}

/// Result of running the items of one batch
struct BatchExecution {
    counters: RunCounters,
    recoveries: Vec<RecoveryOutcome>,
    log: Vec<String>,
    abort: Option<BatchAbort>,
    committed: bool,
    memory_critical: bool,
    memory_warn: bool,
    degraded_batch_size: Option<usize>,
}

impl BatchExecution {
    fn new() -> Self {
        Self {
            counters: RunCounters::default(),
            recoveries: Vec::new(),
            log: Vec::new(),
            abort: None,
            committed: false,
            memory_critical: false,
            memory_warn: false,
            degraded_batch_size: None,
        }
    }

    fn note(&mut self, line: String) {
        debug!("{}", line);
        self.log.push(line);
    }
}

/// Per-item result after recovery has had its say
enum ItemResult {
    Done(super::types::ItemOutcome),
    Failed(ItemError),
    Escaped(ItemError),
}

struct BatchPlan<'a, T> {
    index: u64,
    id: &'a str,
    items: &'a [T],
    processor: &'a dyn ItemProcessor<T>,
    batch_size: usize,
    memory: MemorySample,
}

fn note(log: &mut Vec<String>, line: String) {
    info!("{}", line);
    log.push(line);
}

impl BatchOrchestrator {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    /// Attempts and retries spent writing per-batch checkpoints
    pub async fn checkpoint_retry_metrics(&self) -> RetryMetrics {
        self.checkpoint_retry.metrics().await
    }

    /// Process `items` in batches until done or stopped.
    ///
    /// Returns `Err` only for invalid options or a rollback the store could
    /// not perform. Every other stop is reported through
    /// [`RunResult::terminal_state`].
    pub async fn run<T: Sync>(
        &self,
        items: &[T],
        processor: &dyn ItemProcessor<T>,
        options: RunOptions,
    ) -> Result<RunResult> {
        if options.entity_name.trim().is_empty() {
            return Err(EngineError::InvalidOptions(
                "entity name must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let mut ctx = RunContext::new(options.entity_name.clone(), options.filters.clone());
        let mut log = Vec::new();

        let min_batch_size = self.config.batch.min_batch_size.max(1);
        let mut batch_size = options
            .batch_size
            .unwrap_or_else(|| self.sizing.default_batch_size(&ctx.entity_name))
            .max(min_batch_size);

        note(
            &mut log,
            format!(
                "Starting run {} for {} with {} items (batch size {})",
                ctx.run_id,
                ctx.entity_name,
                items.len(),
                batch_size
            ),
        );

        let mut resume_base = 0u64;
        let mut resumed_from_batch = None;
        let mut cursor = 0usize;

        if options.force_restart {
            match self.checkpoints.clear(&ctx.entity_name).await {
                Ok(removed) => note(
                    &mut log,
                    format!("Force restart: cleared {} checkpoint(s)", removed),
                ),
                Err(e) => {
                    warn!("Could not clear checkpoints for {}: {}", ctx.entity_name, e);
                    log.push(format!("Force restart: clearing checkpoints failed: {}", e));
                }
            }
        } else if let Some(state) = self
            .checkpoints
            .can_resume(&ctx.entity_name, &ctx.filters)
            .await
        {
            ctx.counters = RunCounters {
                processed: state.processed_count,
                skipped: state.skipped_count,
                errors: state.error_count,
            };
            resume_base = state.last_batch_index;
            resumed_from_batch = Some(state.last_batch_index);
            note(
                &mut log,
                format!(
                    "Resuming from batch #{} ({} processed, {} errors carried over)",
                    state.last_batch_index, state.processed_count, state.error_count
                ),
            );

            if self.config.batch.resume_mode == ResumeMode::SkipCompleted {
                cursor = usize::try_from(state.items_consumed)
                    .unwrap_or(usize::MAX)
                    .min(items.len());
                note(
                    &mut log,
                    format!("Skipping {} items consumed by the previous run", cursor),
                );
            }
        }

        let mut batches = Vec::new();
        let mut local_index = 0u64;
        let mut last_committed_index = resume_base;
        let mut batches_processed = 0usize;
        let mut graceful_stop = false;
        let mut consecutive_critical = 0u32;
        let mut elevated_batches = 0u32;
        let mut terminal = None;

        while cursor < items.len() {
            if self.cancellation.is_cancelled() {
                note(
                    &mut log,
                    format!("Cancellation requested; stopping before item {}", cursor + 1),
                );
                terminal = Some(TerminalState::Cancelled);
                break;
            }

            let (memory_before, pressure_before) = self.monitor.check();
            match pressure_before {
                PressureLevel::Critical => {
                    note(
                        &mut log,
                        format!(
                            "Memory critical at {}; stopping before batch #{}",
                            memory_before,
                            resume_base + local_index + 1
                        ),
                    );
                    terminal = Some(TerminalState::StoppedMemory);
                    break;
                }
                PressureLevel::Warn if !graceful_stop => {
                    graceful_stop = true;
                    note(
                        &mut log,
                        format!(
                            "Memory elevated at {}; stopping after this batch",
                            memory_before
                        ),
                    );
                }
                _ => {}
            }

            local_index += 1;
            let batch_index = resume_base + local_index;
            let batch_id = ctx.batch_id_for(batch_index);
            ctx.batch_id = Some(batch_id.clone());

            let end = cursor.saturating_add(batch_size).min(items.len());
            let plan = BatchPlan {
                index: batch_index,
                id: &batch_id,
                items: &items[cursor..end],
                processor,
                batch_size,
                memory: memory_before,
            };

            let batch_started = Instant::now();
            let execution = self
                .run_batch(&ctx, plan, &mut consecutive_critical)
                .await?;
            let (memory_after, pressure_after) = self.monitor.check();

            let mut result = BatchResult {
                batch_index,
                batch_id: batch_id.clone(),
                item_count: end - cursor,
                processed_count: execution.counters.processed,
                skipped_count: execution.counters.skipped,
                error_count: execution.counters.errors,
                duration: batch_started.elapsed(),
                memory_before,
                memory_after,
                pressure_before,
                committed: execution.committed,
                recoveries: execution.recoveries,
                log: execution.log,
            };
            ctx.batch_id = None;

            if !execution.committed {
                let (state, reason) = match execution.abort {
                    Some(BatchAbort::Timeout) => (
                        TerminalState::StoppedTimeout,
                        format!(
                            "exceeded the {:?} batch timeout",
                            self.config.batch.batch_timeout
                        ),
                    ),
                    Some(BatchAbort::Escaped(err)) => {
                        (TerminalState::StoppedError, format!("item failure escaped: {}", err))
                    }
                    Some(BatchAbort::Transaction(err)) => {
                        (TerminalState::StoppedError, format!("transaction failed: {}", err))
                    }
                    None => (TerminalState::StoppedError, "not committed".to_string()),
                };
                note(
                    &mut log,
                    format!("Batch #{} rolled back: {}", batch_index, reason),
                );
                self.record_batch(&ctx.entity_name, &result).await;
                batches.push(result);
                terminal = Some(state);
                break;
            }

            ctx.counters.add(&execution.counters);
            cursor = end;
            last_committed_index = batch_index;
            batches_processed += 1;

            let state = RecoveryState {
                last_batch_index: batch_index,
                processed_count: ctx.counters.processed,
                skipped_count: ctx.counters.skipped,
                error_count: ctx.counters.errors,
                total_count: items.len() as u64,
                items_consumed: cursor as u64,
                filters: ctx.filters.clone(),
                timestamp_created: Utc::now(),
            };
            let (checkpoints, entity, snapshot) =
                (&self.checkpoints, ctx.entity_name.as_str(), &state);
            let saved = self
                .checkpoint_retry
                .execute_with_retry(
                    &self.checkpoint_policy,
                    move || checkpoints.save(entity, snapshot),
                    "checkpoint save",
                )
                .await;
            if let Err(e) = saved {
                warn!("Checkpoint after batch #{} not saved: {}", batch_index, e);
                result
                    .log
                    .push(format!("Checkpoint not saved: {}", e));
            }

            note(
                &mut log,
                format!(
                    "Batch #{} committed: {} processed, {} skipped, {} errors in {:?}",
                    batch_index,
                    result.processed_count,
                    result.skipped_count,
                    result.error_count,
                    result.duration
                ),
            );
            self.record_batch(&ctx.entity_name, &result).await;

            if pressure_after.is_elevated() {
                elevated_batches += 1;
            } else {
                elevated_batches = 0;
            }
            let sustained = elevated_batches >= self.config.memory.sustained_pressure_batches;
            let report = self
                .cleanup
                .after_batch(&memory_after, pressure_after, sustained)
                .await;
            if report.ran() {
                result.log.push(report.to_string());
            }

            let resized = self
                .monitor
                .adjust_batch_size(batch_size, min_batch_size, &memory_after);
            let next_size = execution
                .degraded_batch_size
                .map_or(resized, |degraded| degraded.min(resized));
            if next_size != batch_size {
                note(
                    &mut log,
                    format!(
                        "Batch size {} -> {} (memory {})",
                        batch_size, next_size, memory_after
                    ),
                );
                batch_size = next_size;
            }

            batches.push(result);

            if cursor >= items.len() {
                break;
            }

            if execution.memory_critical {
                note(
                    &mut log,
                    format!("Memory reached critical during batch #{}; stopping", batch_index),
                );
                terminal = Some(TerminalState::StoppedMemory);
                break;
            }
            if execution.memory_warn && !graceful_stop {
                graceful_stop = true;
                note(
                    &mut log,
                    format!("Memory elevated during batch #{}; stopping", batch_index),
                );
            }

            let pause = self.monitor.pacing_delay(&memory_after);
            if !pause.is_zero() {
                debug!("Pausing {:?} at {} memory pressure", pause, pressure_after);
                tokio::time::sleep(pause).await;
            }

            if graceful_stop {
                terminal = Some(TerminalState::StoppedGraceful);
                break;
            }
        }

        let terminal_state = terminal.unwrap_or(TerminalState::Completed);

        if terminal_state.is_completed() && self.config.batch.clear_checkpoint_on_completion {
            if let Err(e) = self.checkpoints.clear(&ctx.entity_name).await {
                warn!("Could not clear checkpoint for {}: {}", ctx.entity_name, e);
            }
        }

        let stop_recovery = if terminal_state.needs_state_recovery()
            && self.config.recovery.checkpoint_on_stop
        {
            let snapshot = RecoveryState {
                last_batch_index: last_committed_index,
                processed_count: ctx.counters.processed,
                skipped_count: ctx.counters.skipped,
                error_count: ctx.counters.errors,
                total_count: items.len() as u64,
                items_consumed: cursor as u64,
                filters: ctx.filters.clone(),
                timestamp_created: Utc::now(),
            };
            let rctx = RecoveryContext::new(ctx.entity_name.clone(), stop_kind(terminal_state))
                .with_snapshot(snapshot);
            let outcome = self.recovery.execute(StrategyKind::StateRecovery, &rctx).await;
            note(&mut log, format!("State recovery: {}", outcome));
            Some(outcome)
        } else {
            None
        };

        note(
            &mut log,
            format!(
                "Run {} finished as {}: {} processed, {} skipped, {} errors",
                ctx.run_id,
                terminal_state,
                ctx.counters.processed,
                ctx.counters.skipped,
                ctx.counters.errors
            ),
        );

        let result = RunResult {
            run_id: ctx.run_id,
            entity_name: ctx.entity_name.clone(),
            filters_hash: ctx.filters_hash.clone(),
            terminal_state,
            processed_count: ctx.counters.processed,
            skipped_count: ctx.counters.skipped,
            error_count: ctx.counters.errors,
            batches_processed,
            total_items: items.len(),
            resumed_from_batch,
            final_batch_size: batch_size,
            started_at: ctx.started_at,
            duration: started.elapsed(),
            batches,
            stop_recovery,
            log,
        };

        if let Err(e) = self.metrics.record_run(&result).await {
            warn!("Metrics sink rejected run {}: {}", result.run_id, e);
        }

        Ok(result)
    }

    async fn record_batch(&self, entity_name: &str, batch: &BatchResult) {
        if let Err(e) = self.metrics.record_batch(entity_name, batch).await {
            warn!("Metrics sink rejected batch {}: {}", batch.batch_id, e);
        }
    }

    /// Run one batch inside its own transaction. Errs only when rollback fails.
    async fn run_batch<T: Sync>(
        &self,
        ctx: &RunContext,
        plan: BatchPlan<'_, T>,
        consecutive_critical: &mut u32,
    ) -> Result<BatchExecution> {
        let mut exec = BatchExecution::new();

        let tx = match self.transactions.begin(plan.id).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Could not open transaction for batch {}: {}", plan.id, e);
                exec.abort = Some(BatchAbort::Transaction(e));
                return Ok(exec);
            }
        };

        let started = Instant::now();
        let timeout = self.config.batch.batch_timeout;
        let interval = self.monitor.check_interval(plan.items.len());
        let mut memory = plan.memory;

        for (offset, item) in plan.items.iter().enumerate() {
            if started.elapsed() > timeout {
                exec.note(format!(
                    "Batch #{} timed out after {} of {} items",
                    plan.index,
                    offset,
                    plan.items.len()
                ));
                exec.abort = Some(BatchAbort::Timeout);
                break;
            }

            if offset > 0 && offset % interval == 0 {
                let (sample, level) = self.monitor.check();
                memory = sample;
                match level {
                    PressureLevel::Critical if !exec.memory_critical => {
                        exec.memory_critical = true;
                        exec.note(format!(
                            "Memory critical at {} after item {}; finishing batch",
                            sample, offset
                        ));
                    }
                    PressureLevel::Warn => exec.memory_warn = true,
                    _ => {}
                }
            }

            let position = offset + 1;
            match self
                .process_item(ctx, &plan, item, memory, consecutive_critical, &mut exec)
                .await
            {
                ItemResult::Done(outcome) => {
                    exec.counters.record(&outcome);
                    if let Some(message) = outcome.message {
                        debug!("Item {} of batch #{}: {}", position, plan.index, message);
                    }
                }
                ItemResult::Failed(err) => {
                    exec.counters.errors += 1;
                    exec.note(format!("Item {} failed: {}", position, err));
                }
                ItemResult::Escaped(err) => {
                    exec.note(format!("Item {} aborted the batch: {}", position, err));
                    exec.abort = Some(BatchAbort::Escaped(err));
                    break;
                }
            }
        }

        if exec.abort.is_none() {
            match self.transactions.commit(&tx).await {
                Ok(()) => {
                    exec.committed = true;
                    return Ok(exec);
                }
                Err(e) => {
                    warn!("Commit of batch {} failed: {}", plan.id, e);
                    exec.abort = Some(BatchAbort::Transaction(e));
                }
            }
        }

        self.transactions
            .rollback(&tx)
            .await
            .map_err(|source| EngineError::RollbackFailed {
                batch_id: plan.id.to_string(),
                source,
            })?;
        Ok(exec)
    }

    /// Process one item, retrying while the recovery engine allows it
    async fn process_item<T: Sync>(
        &self,
        ctx: &RunContext,
        plan: &BatchPlan<'_, T>,
        item: &T,
        memory: MemorySample,
        consecutive_critical: &mut u32,
        exec: &mut BatchExecution,
    ) -> ItemResult {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match plan.processor.process(item).await {
                Ok(outcome) => {
                    *consecutive_critical = 0;
                    return ItemResult::Done(outcome);
                }
                Err(err) => err,
            };

            if err.escapes_batch() {
                return ItemResult::Escaped(err);
            }

            if err.kind == ErrorKind::ApiError && err.severity == Severity::Critical {
                *consecutive_critical += 1;
            }

            if !self.config.recovery.enabled {
                return ItemResult::Failed(err);
            }

            let Some(strategy) = self.recovery.classify(err.kind, err.severity) else {
                debug!("{} is not recoverable; counting as error", err.kind);
                return ItemResult::Failed(err);
            };

            let rctx = RecoveryContext::for_item_error(ctx.entity_name.clone(), &err)
                .with_attempt(attempt)
                .with_batch_size(plan.batch_size, self.config.batch.min_batch_size)
                .with_consecutive_critical_failures(*consecutive_critical)
                .with_memory(memory, false);
            let outcome = self.recovery.execute(strategy, &rctx).await;
            exec.note(format!("Recovery after attempt {}: {}", attempt, outcome));

            let retry = strategy == StrategyKind::RetryWithBackoff && outcome.successful;
            if let RecoveryDetails::Degraded { new_batch_size, .. } = outcome.details {
                exec.degraded_batch_size = Some(
                    exec.degraded_batch_size
                        .map_or(new_batch_size, |current| current.min(new_batch_size)),
                );
            }
            exec.recoveries.push(outcome);

            if !retry {
                return ItemResult::Failed(err);
            }
        }
    }
}

fn stop_kind(state: TerminalState) -> ErrorKind {
    match state {
        TerminalState::StoppedMemory => ErrorKind::MemoryError,
        TerminalState::StoppedTimeout => ErrorKind::Timeout,
        TerminalState::StoppedError => ErrorKind::TransactionalError,
        _ => ErrorKind::Unknown,
    }
}
