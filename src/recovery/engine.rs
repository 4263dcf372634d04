use super::context::{RecoveryContext, RecoveryOutcome};
use super::strategies::{
    GracefulDegradationStrategy, RecoveryStrategy, ResourceCleanupStrategy,
    RetryWithBackoffStrategy, StateRecoveryStrategy,
};
use super::{classify, StrategyKind};
use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, ItemError, Severity};
use crate::resources::{CleanupCoordinator, ResourceMonitor};
use crate::retry::{BackoffCalculator, BackoffLimits, RetryPolicyResolver};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Classifies failures and runs the matching strategy
pub struct ErrorRecoveryEngine {
    strategies: HashMap<StrategyKind, Box<dyn RecoveryStrategy>>,
}

impl ErrorRecoveryEngine {
    /// Engine with no strategies registered
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Engine with the four built-in strategies
    pub fn new(
        config: &EngineConfig,
        monitor: ResourceMonitor,
        cleanup: Arc<CleanupCoordinator>,
        checkpoints: Arc<CheckpointManager>,
    ) -> Self {
        Self::empty()
            .with_strategy(Box::new(RetryWithBackoffStrategy::new(
                RetryPolicyResolver::new(&config.retry),
                BackoffCalculator::new(BackoffLimits::from_settings(&config.retry)),
            )))
            .with_strategy(Box::new(GracefulDegradationStrategy::new(
                config.degradation.clone(),
            )))
            .with_strategy(Box::new(StateRecoveryStrategy::new(checkpoints)))
            .with_strategy(Box::new(ResourceCleanupStrategy::new(cleanup, monitor)))
    }

    /// Register `strategy`, replacing any strategy of the same kind
    pub fn with_strategy(mut self, strategy: Box<dyn RecoveryStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn has_strategy(&self, kind: StrategyKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    pub fn classify(&self, kind: ErrorKind, severity: Severity) -> Option<StrategyKind> {
        classify(kind, severity)
    }

    pub async fn execute(&self, kind: StrategyKind, ctx: &RecoveryContext) -> RecoveryOutcome {
        match self.strategies.get(&kind) {
            Some(strategy) => {
                let outcome = strategy.execute(ctx).await;
                debug!("Recovery for {}: {}", ctx.error_kind, outcome);
                outcome
            }
            None => {
                warn!("No {} strategy registered; failure left as is", kind);
                RecoveryOutcome::not_attempted(kind)
            }
        }
    }

    /// Classify `error` and run its strategy. `None` when the error is not recoverable.
    pub async fn recover(
        &self,
        error: &ItemError,
        ctx: &RecoveryContext,
    ) -> Option<RecoveryOutcome> {
        let kind = self.classify(error.kind, error.severity)?;
        Some(self.execute(kind, ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::recovery::RecoveryDetails;
    use crate::testing::ControlledMemoryProbe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> ErrorRecoveryEngine {
        let config = EngineConfig::default();
        let monitor = ResourceMonitor::new(
            Arc::new(ControlledMemoryProbe::new(10.0)),
            config.memory.clone(),
            config.pacing.clone(),
        );
        ErrorRecoveryEngine::new(
            &config,
            monitor,
            Arc::new(CleanupCoordinator::new(config.cleanup.clone(), 90.0)),
            Arc::new(CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()))),
        )
    }

    struct CountingStrategy(Arc<AtomicUsize>);

    #[async_trait]
    impl RecoveryStrategy for CountingStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::RetryWithBackoff
        }

        async fn execute(&self, _ctx: &RecoveryContext) -> RecoveryOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            RecoveryOutcome::succeeded(
                self.kind(),
                RecoveryDetails::RetriesExhausted { attempts: 0 },
            )
        }
    }

    #[test]
    fn test_all_strategies_registered() {
        let engine = engine();
        for kind in StrategyKind::ALL {
            assert!(engine.has_strategy(kind), "{kind} missing");
        }
    }

    #[tokio::test]
    async fn test_validation_errors_invoke_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = ErrorRecoveryEngine::empty().with_strategy(Box::new(CountingStrategy(calls.clone())));

        let err = ItemError::validation("missing sku");
        let ctx = RecoveryContext::for_item_error("products", &err);
        assert!(engine.recover(&err, &ctx).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = ItemError::unknown("connection reset");
        assert!(engine.recover(&err, &ctx).await.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_strategy_is_not_attempted() {
        let engine = ErrorRecoveryEngine::empty();
        let ctx = RecoveryContext::new("products", ErrorKind::MemoryError);
        let outcome = engine.execute(StrategyKind::ResourceCleanup, &ctx).await;
        assert!(!outcome.attempted);
        assert_eq!(outcome.details, RecoveryDetails::NotRegistered);
    }

    #[tokio::test]
    async fn test_critical_api_error_degrades() {
        let err = ItemError::api("rate limited").with_severity(Severity::Critical);
        let ctx = RecoveryContext::for_item_error("products", &err)
            .with_batch_size(100, 1)
            .with_consecutive_critical_failures(4);

        let outcome = engine().recover(&err, &ctx).await.unwrap();
        assert_eq!(outcome.strategy, StrategyKind::GracefulDegradation);
        assert!(matches!(
            outcome.details,
            RecoveryDetails::Degraded {
                new_batch_size: 1,
                ..
            }
        ));
    }
}
