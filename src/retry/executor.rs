//! Retry loop for operations that want the engine to drive retries

use super::{BackoffCalculator, RetryPolicy};
use crate::error::ItemError;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors that can say whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ItemError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        match self.downcast_ref::<ItemError>() {
            Some(item) => item.is_retryable(),
            None => true,
        }
    }
}

/// Why a retry loop stopped without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTermination {
    /// Policy had `max_attempts == 0`; the operation ran once
    Disabled,
    /// The error was flagged as not worth retrying
    NonRetryable,
    /// All attempts were used
    Exhausted,
}

/// Retry metrics for observability
#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_attempts: u32,
    pub successful_operations: u32,
    pub failed_operations: u32,
    pub retries: Vec<(u32, Duration)>,
    pub last_termination: Option<RetryTermination>,
}

impl RetryMetrics {
    fn record_success(&mut self, attempts: u32) {
        self.total_attempts += attempts;
        self.successful_operations += 1;
    }

    fn record_failure(&mut self, attempts: u32, termination: RetryTermination) {
        self.total_attempts += attempts;
        self.failed_operations += 1;
        self.last_termination = Some(termination);
    }

    fn record_retry(&mut self, attempt: u32, delay: Duration) {
        self.retries.push((attempt, delay));
    }
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    calculator: BackoffCalculator,
    metrics: Arc<RwLock<RetryMetrics>>,
}

impl RetryExecutor {
    pub fn new(calculator: BackoffCalculator) -> Self {
        Self {
            calculator,
            metrics: Arc::new(RwLock::new(RetryMetrics::default())),
        }
    }

    /// Execute `operation`, retrying retryable failures with backoff
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        operation: F,
        context: &str,
    ) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", context, attempt);
                    }
                    self.metrics.write().await.record_success(attempt);
                    return Ok(value);
                }
                Err(err) => {
                    if policy.is_disabled() {
                        self.metrics
                            .write()
                            .await
                            .record_failure(attempt, RetryTermination::Disabled);
                        return Err(err);
                    }

                    if !err.is_retryable() {
                        warn!("Non-retryable failure in {}: {}", context, err);
                        self.metrics
                            .write()
                            .await
                            .record_failure(attempt, RetryTermination::NonRetryable);
                        return Err(err);
                    }

                    if !policy.allows_another(attempt) {
                        warn!(
                            "Retries exhausted for {} after {} attempts: {}",
                            context, attempt, err
                        );
                        self.metrics
                            .write()
                            .await
                            .record_failure(attempt, RetryTermination::Exhausted);
                        return Err(err);
                    }

                    let delay = self.calculator.delay_for(attempt, policy);
                    info!(
                        "Retrying {} (attempt {}/{}) after {:?}: {}",
                        context, attempt, policy.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    self.metrics.write().await.record_retry(attempt, delay);
                }
            }
        }
    }

    pub async fn metrics(&self) -> RetryMetrics {
        self.metrics.read().await.clone()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(BackoffCalculator::default())
    }
}
