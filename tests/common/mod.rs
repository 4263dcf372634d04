//! Shared harness for the orchestrator integration tests

#![allow(dead_code)]

use batchwise::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use batchwise::config::EngineConfig;
use batchwise::orchestrator::{BatchOrchestrator, BatchOrchestratorBuilder, CancellationFlag};
use batchwise::testing::{fast_config, ControlledMemoryProbe, RecordingMetricsSink};
use batchwise::transaction::JournalingTransactionalStore;
use std::sync::Arc;

/// Collaborators that tests inspect after a run
pub struct Harness {
    pub probe: ControlledMemoryProbe,
    pub store: Arc<dyn CheckpointStore>,
    pub journal: Arc<JournalingTransactionalStore>,
    pub metrics: Arc<RecordingMetricsSink>,
    pub cancel: CancellationFlag,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryCheckpointStore::new()))
    }

    pub fn with_store(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            probe: ControlledMemoryProbe::new(10.0),
            store,
            journal: Arc::new(JournalingTransactionalStore::new()),
            metrics: Arc::new(RecordingMetricsSink::new()),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        self.orchestrator_with(fast_config())
    }

    pub fn orchestrator_with(&self, config: EngineConfig) -> BatchOrchestrator {
        BatchOrchestratorBuilder::new(config)
            .memory_probe(Arc::new(self.probe.clone()))
            .checkpoint_store(self.store.clone())
            .transactional_store(self.journal.clone())
            .metrics_sink(self.metrics.clone())
            .cancellation(self.cancel.clone())
            .build()
            .expect("test config is valid")
    }
}
