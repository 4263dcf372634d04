//! The four recovery strategies

use super::context::{DegradationLevel, RecoveryContext, RecoveryDetails, RecoveryOutcome};
use super::StrategyKind;
use crate::checkpoint::CheckpointManager;
use crate::config::DegradationConfig;
use crate::resources::cleanup::CleanupCondition;
use crate::resources::{CleanupCoordinator, CleanupTier, ResourceMonitor};
use crate::retry::{BackoffCalculator, RetryPolicyResolver};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, ctx: &RecoveryContext) -> RecoveryOutcome;
}

/// Waits out the backoff for the failed attempt.
///
/// Never re-runs the operation; the caller owns the retry loop and uses
/// `successful` to decide whether to try again.
pub struct RetryWithBackoffStrategy {
    resolver: RetryPolicyResolver,
    calculator: BackoffCalculator,
}

impl RetryWithBackoffStrategy {
    pub fn new(resolver: RetryPolicyResolver, calculator: BackoffCalculator) -> Self {
        Self {
            resolver,
            calculator,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for RetryWithBackoffStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RetryWithBackoff
    }

    async fn execute(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let policy = match &ctx.operation {
            Some(operation) => self.resolver.resolve_operation(operation),
            None => self.resolver.resolve_error(ctx.error_kind),
        };
        let attempt = ctx.attempt.max(1);

        if !policy.allows_another(attempt) {
            debug!(
                "No retry left for {} after attempt {}",
                ctx.error_kind, attempt
            );
            return RecoveryOutcome::failed(
                self.kind(),
                RecoveryDetails::RetriesExhausted { attempts: attempt },
            );
        }

        let delay = self.calculator.delay_for(attempt, &policy);
        debug!(
            "Backing off {:?} after {} on attempt {}",
            delay, ctx.error_kind, attempt
        );
        tokio::time::sleep(delay).await;

        RecoveryOutcome::succeeded(
            self.kind(),
            RecoveryDetails::Backoff {
                attempt,
                delay,
                attempts_remaining: policy.max_attempts.saturating_sub(attempt),
            },
        )
    }
}

/// Shrinks the batch size by a per-level multiplier
pub struct GracefulDegradationStrategy {
    config: DegradationConfig,
}

impl GracefulDegradationStrategy {
    pub fn new(config: DegradationConfig) -> Self {
        Self { config }
    }

    pub fn degraded_size(&self, level: DegradationLevel, current: usize, min: usize) -> usize {
        let floor = min.max(1);
        let degraded = match level {
            DegradationLevel::Light => scale(current, self.config.light_multiplier),
            DegradationLevel::Moderate => scale(current, self.config.moderate_multiplier),
            DegradationLevel::Heavy => scale(current, self.config.heavy_multiplier),
            DegradationLevel::Critical => 1,
        };
        degraded.max(floor)
    }
}

fn scale(size: usize, multiplier: f64) -> usize {
    (size as f64 * multiplier).floor() as usize
}

#[async_trait]
impl RecoveryStrategy for GracefulDegradationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GracefulDegradation
    }

    async fn execute(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let level = ctx.degradation_level.unwrap_or_else(|| {
            DegradationLevel::from_consecutive_failures(
                ctx.consecutive_critical_failures,
                &self.config,
            )
        });
        let new_batch_size =
            self.degraded_size(level, ctx.current_batch_size, ctx.min_batch_size);

        info!(
            "Degrading {} to {} level: batch size {} -> {}",
            ctx.entity_name, level, ctx.current_batch_size, new_batch_size
        );

        RecoveryOutcome::succeeded(
            self.kind(),
            RecoveryDetails::Degraded {
                level,
                previous_batch_size: ctx.current_batch_size,
                new_batch_size,
            },
        )
    }
}

/// Makes sure a resumable checkpoint exists. Safe to call repeatedly.
pub struct StateRecoveryStrategy {
    checkpoints: Arc<CheckpointManager>,
}

impl StateRecoveryStrategy {
    pub fn new(checkpoints: Arc<CheckpointManager>) -> Self {
        Self { checkpoints }
    }
}

#[async_trait]
impl RecoveryStrategy for StateRecoveryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StateRecovery
    }

    async fn execute(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let Some(snapshot) = &ctx.snapshot else {
            return RecoveryOutcome::failed(
                self.kind(),
                RecoveryDetails::CheckpointUnavailable {
                    reason: "no run progress to persist".to_string(),
                },
            );
        };

        if let Some(existing) = self
            .checkpoints
            .can_resume(&ctx.entity_name, &snapshot.filters)
            .await
        {
            return RecoveryOutcome::succeeded(
                self.kind(),
                RecoveryDetails::CheckpointRestored {
                    last_batch_index: existing.last_batch_index,
                },
            );
        }

        match self.checkpoints.save(&ctx.entity_name, snapshot).await {
            Ok(()) => {
                info!(
                    "Synthesized checkpoint for {} at batch #{}",
                    ctx.entity_name, snapshot.last_batch_index
                );
                RecoveryOutcome::succeeded(
                    self.kind(),
                    RecoveryDetails::CheckpointSynthesized {
                        last_batch_index: snapshot.last_batch_index,
                    },
                )
            }
            Err(e) => {
                warn!("Could not persist checkpoint for {}: {}", ctx.entity_name, e);
                RecoveryOutcome::failed(
                    self.kind(),
                    RecoveryDetails::CheckpointUnavailable {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}

/// Frees memory through tiered cleanup. Always reports success.
pub struct ResourceCleanupStrategy {
    coordinator: Arc<CleanupCoordinator>,
    monitor: ResourceMonitor,
}

impl ResourceCleanupStrategy {
    pub fn new(coordinator: Arc<CleanupCoordinator>, monitor: ResourceMonitor) -> Self {
        Self {
            coordinator,
            monitor,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for ResourceCleanupStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ResourceCleanup
    }

    async fn execute(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let sample = ctx.memory.unwrap_or_else(|| self.monitor.sample());
        let pressure = self.monitor.classify(&sample);
        let tier =
            CleanupCoordinator::plan(pressure, ctx.sustained_pressure, CleanupCondition::None)
                .unwrap_or(CleanupTier::Light);

        let report = self.coordinator.run_tier(tier, &sample).await;
        if !report.failures.is_empty() {
            warn!(
                "Cleanup for {} finished with {} failed steps",
                ctx.entity_name,
                report.failures.len()
            );
        }

        RecoveryOutcome::succeeded(
            self.kind(),
            RecoveryDetails::Cleanup {
                tier: report.tier,
                pressure,
                entries_evicted: report.entries_evicted,
                bytes_freed: report.bytes_freed,
                failed_steps: report.failures.len(),
            },
        )
    }
}
