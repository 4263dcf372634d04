//! Test doubles for the engine's collaborators
//!
//! Used by unit tests, the integration suite and benchmarks. Nothing here
//! touches real memory readings or real stores.

use crate::config::EngineConfig;
use crate::error::ItemError;
use crate::orchestrator::{BatchResult, ItemOutcome, ItemProcessor, MetricsSink, RunResult};
use crate::resources::{MemoryProbe, MemorySample};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Memory probe whose reading is set by the test. Clones share the reading.
#[derive(Debug, Clone)]
pub struct ControlledMemoryProbe {
    percent_bits: Arc<AtomicU64>,
}

impl ControlledMemoryProbe {
    pub fn new(usage_percent: f64) -> Self {
        Self {
            percent_bits: Arc::new(AtomicU64::new(usage_percent.to_bits())),
        }
    }

    pub fn set_percent(&self, usage_percent: f64) {
        self.percent_bits
            .store(usage_percent.to_bits(), Ordering::SeqCst);
    }

    pub fn percent(&self) -> f64 {
        f64::from_bits(self.percent_bits.load(Ordering::SeqCst))
    }
}

impl MemoryProbe for ControlledMemoryProbe {
    fn sample(&self) -> MemorySample {
        MemorySample::at_percent(self.percent())
    }
}

/// Keeps every batch and run result it receives
#[derive(Default)]
pub struct RecordingMetricsSink {
    batches: Mutex<Vec<(String, BatchResult)>>,
    runs: Mutex<Vec<RunResult>>,
    reject: AtomicBool,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that records and then reports failure for every call
    pub fn rejecting() -> Self {
        let sink = Self::default();
        sink.reject.store(true, Ordering::SeqCst);
        sink
    }

    pub fn batches(&self) -> Vec<BatchResult> {
        lock(&self.batches).iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn runs(&self) -> Vec<RunResult> {
        lock(&self.runs).clone()
    }

    fn outcome(&self) -> anyhow::Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            anyhow::bail!("metrics backend unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for RecordingMetricsSink {
    async fn record_batch(&self, entity_name: &str, batch: &BatchResult) -> anyhow::Result<()> {
        lock(&self.batches).push((entity_name.to_string(), batch.clone()));
        self.outcome()
    }

    async fn record_run(&self, run: &RunResult) -> anyhow::Result<()> {
        lock(&self.runs).push(run.clone());
        self.outcome()
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Processor over numbered items (see [`items`]) with per-item scripted behavior.
///
/// Unscripted items succeed as processed.
#[derive(Default)]
pub struct ScriptedProcessor {
    failures: Mutex<HashMap<usize, VecDeque<ItemError>>>,
    skips: HashSet<usize>,
    hooks: HashMap<usize, Hook>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<usize, u32>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `item` with each of `errors` in turn, then succeed
    pub fn fail(self, item: usize, errors: Vec<ItemError>) -> Self {
        lock(&self.failures)
            .entry(item)
            .or_default()
            .extend(errors);
        self
    }

    /// Fail `item` on every attempt
    pub fn fail_always(self, item: usize, error: ItemError) -> Self {
        self.fail(item, vec![error; 64])
    }

    pub fn skip(mut self, item: usize) -> Self {
        self.skips.insert(item);
        self
    }

    /// Run `hook` after `item` has been handled
    pub fn after_item(mut self, item: usize, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(item, Box::new(hook));
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, item: usize) -> u32 {
        lock(&self.calls).get(&item).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.calls).values().sum()
    }
}

#[async_trait]
impl ItemProcessor<usize> for ScriptedProcessor {
    async fn process(&self, item: &usize) -> Result<ItemOutcome, ItemError> {
        *lock(&self.calls).entry(*item).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.failures)
            .get_mut(item)
            .and_then(|queue| queue.pop_front());

        let result = match scripted {
            Some(err) => Err(err),
            None if self.skips.contains(item) => Ok(ItemOutcome::skipped("unchanged")),
            None => Ok(ItemOutcome::processed()),
        };

        if let Some(hook) = self.hooks.get(item) {
            hook();
        }
        result
    }
}

/// Items numbered `1..=count`
pub fn items(count: usize) -> Vec<usize> {
    (1..=count).collect()
}

/// Config with millisecond pacing and retry delays, for tests that must not sleep long
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pacing.warn_pause = Duration::from_millis(1);
    config.pacing.max_pause = Duration::from_millis(2);
    config.retry.jitter_max = Duration::ZERO;

    let quick = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        backoff_factor: 2.0,
        max_delay: Duration::from_millis(5),
        jitter_enabled: false,
    };
    for key in [
        "api_error",
        "api_request",
        "timeout",
        "memory_error",
        "transactional_error",
        "checkpoint_save",
        "unknown",
    ] {
        config.retry.policies.insert(key.to_string(), quick.clone());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controlled_probe_clones_share_reading() {
        let probe = ControlledMemoryProbe::new(10.0);
        let handle = probe.clone();
        handle.set_percent(91.5);
        assert_eq!(probe.sample().usage_percent, 91.5);
    }

    #[tokio::test]
    async fn test_scripted_processor_replays_failures_then_succeeds() {
        let processor = ScriptedProcessor::new()
            .fail(2, vec![ItemError::api("503"), ItemError::api("503")])
            .skip(3);

        assert!(processor.process(&1).await.is_ok());
        assert!(processor.process(&2).await.is_err());
        assert!(processor.process(&2).await.is_err());
        assert_eq!(processor.process(&2).await.unwrap(), ItemOutcome::processed());
        assert_eq!(processor.process(&3).await.unwrap(), ItemOutcome::skipped("unchanged"));
        assert_eq!(processor.calls(2), 3);
        assert_eq!(processor.total_calls(), 5);
    }
}
