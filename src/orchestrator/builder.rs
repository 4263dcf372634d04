use super::cancellation::CancellationFlag;
use super::metrics::{MetricsSink, TracingMetricsSink};
use super::runner::BatchOrchestrator;
use crate::checkpoint::{CheckpointManager, CheckpointStore, MemoryCheckpointStore};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::recovery::{ErrorRecoveryEngine, RecoveryStrategy};
use crate::resources::{
    BatchSizingPolicy, CacheTier, CleanupCoordinator, ConfiguredBatchSizing, MemoryProbe,
    ResourceMonitor, SysinfoMemoryProbe,
};
use crate::retry::{BackoffCalculator, BackoffLimits, RetryExecutor, RetryPolicyResolver};
use crate::transaction::{NoopTransactionalStore, TransactionBoundary, TransactionalStore};
use std::sync::Arc;

/// Retry policy key for checkpoint writes after each batch
pub const CHECKPOINT_SAVE_OPERATION: &str = "checkpoint_save";

/// Wires collaborators into a [`BatchOrchestrator`].
///
/// Anything not supplied gets a process-local default: sysinfo memory
/// probe, in-memory checkpoints, no-op transactions and tracing metrics.
pub struct BatchOrchestratorBuilder {
    config: EngineConfig,
    probe: Option<Arc<dyn MemoryProbe>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    transactional_store: Option<Arc<dyn TransactionalStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    sizing: Option<Arc<dyn BatchSizingPolicy>>,
    caches: Vec<Arc<dyn CacheTier>>,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
    cancellation: CancellationFlag,
}

impl BatchOrchestratorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            probe: None,
            checkpoint_store: None,
            transactional_store: None,
            metrics: None,
            sizing: None,
            caches: Vec::new(),
            strategies: Vec::new(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn transactional_store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.transactional_store = Some(store);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn sizing_policy(mut self, sizing: Arc<dyn BatchSizingPolicy>) -> Self {
        self.sizing = Some(sizing);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.caches.push(cache);
        self
    }

    /// Replace the built-in strategy of the same kind
    pub fn recovery_strategy(mut self, strategy: Box<dyn RecoveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn build(self) -> Result<BatchOrchestrator> {
        self.config.validate()?;
        let config = self.config;

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoMemoryProbe::new(config.memory.memory_limit_bytes)));
        let monitor = ResourceMonitor::new(probe, config.memory.clone(), config.pacing.clone());

        let checkpoints = Arc::new(CheckpointManager::new(
            self.checkpoint_store
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
        ));

        let cleanup = Arc::new(
            self.caches.into_iter().fold(
                CleanupCoordinator::new(
                    config.cleanup.clone(),
                    config.memory.critical_threshold_percent,
                ),
                |coordinator, cache| coordinator.with_cache(cache),
            ),
        );

        let recovery = self.strategies.into_iter().fold(
            ErrorRecoveryEngine::new(&config, monitor.clone(), cleanup.clone(), checkpoints.clone()),
            |engine, strategy| engine.with_strategy(strategy),
        );

        let transactions = TransactionBoundary::new(
            self.transactional_store
                .unwrap_or_else(|| Arc::new(NoopTransactionalStore)),
        );

        let sizing = self
            .sizing
            .unwrap_or_else(|| Arc::new(ConfiguredBatchSizing::new(&config.batch)));

        let checkpoint_policy =
            RetryPolicyResolver::new(&config.retry).resolve_operation(CHECKPOINT_SAVE_OPERATION);
        let checkpoint_retry = RetryExecutor::new(BackoffCalculator::new(
            BackoffLimits::from_settings(&config.retry),
        ));

        Ok(BatchOrchestrator {
            monitor,
            sizing,
            checkpoints,
            transactions,
            recovery,
            cleanup,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(TracingMetricsSink)),
            cancellation: self.cancellation,
            checkpoint_retry,
            checkpoint_policy,
            config,
        })
    }
}
