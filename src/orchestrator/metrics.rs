//! Fire-and-forget reporting of batch and run results

use super::types::{BatchResult, RunResult};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Receives results as they are produced. Failures are logged, never propagated.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_batch(&self, entity_name: &str, batch: &BatchResult) -> Result<()>;

    async fn record_run(&self, run: &RunResult) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    async fn record_batch(&self, _entity_name: &str, _batch: &BatchResult) -> Result<()> {
        Ok(())
    }

    async fn record_run(&self, _run: &RunResult) -> Result<()> {
        Ok(())
    }
}

/// Emits results as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record_batch(&self, entity_name: &str, batch: &BatchResult) -> Result<()> {
        info!(
            target: "batchwise::metrics",
            entity = entity_name,
            batch_id = %batch.batch_id,
            items = batch.item_count,
            processed = batch.processed_count,
            skipped = batch.skipped_count,
            errors = batch.error_count,
            duration_ms = batch.duration.as_millis() as u64,
            memory_percent = batch.memory_after.usage_percent,
            committed = batch.committed,
            "batch finished"
        );
        Ok(())
    }

    async fn record_run(&self, run: &RunResult) -> Result<()> {
        info!(
            target: "batchwise::metrics",
            run_id = %run.run_id,
            entity = %run.entity_name,
            state = %run.terminal_state,
            processed = run.processed_count,
            skipped = run.skipped_count,
            errors = run.error_count,
            batches = run.batches_processed,
            duration_ms = run.duration.as_millis() as u64,
            "run finished"
        );
        Ok(())
    }
}
