//! Runs tiered cleanup across registered cache tiers

use super::cache::{CacheStats, CacheTier, EvictResult};
use super::condition::{evaluate_conditions, CleanupCondition, CleanupSignals, CleanupVariant};
use super::error::CleanupResult;
use crate::config::CleanupConfig;
use crate::resources::{MemorySample, PressureLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How hard a cleanup pass works
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTier {
    /// Purge expired entries
    Light,
    /// Purge, migrate cold data out, flush object caches
    Aggressive,
    /// Aggressive plus forced eviction
    Emergency,
}

impl fmt::Display for CleanupTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupTier::Light => "light",
            CleanupTier::Aggressive => "aggressive",
            CleanupTier::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub tier: Option<CleanupTier>,
    pub condition: CleanupCondition,
    /// Flavour the matched condition calls for; `None` when no condition matched
    pub variant: Option<CleanupVariant>,
    pub entries_evicted: usize,
    pub bytes_freed: u64,
    /// Steps that failed; cleanup carries on past them
    pub failures: Vec<String>,
}

impl CleanupReport {
    fn skipped(condition: CleanupCondition) -> Self {
        Self {
            tier: None,
            condition,
            variant: condition.variant(),
            entries_evicted: 0,
            bytes_freed: 0,
            failures: Vec::new(),
        }
    }

    pub fn ran(&self) -> bool {
        self.tier.is_some()
    }

    fn absorb(&mut self, tier: &str, step: &str, result: CleanupResult<EvictResult>) {
        match result {
            Ok(freed) => {
                self.entries_evicted += freed.entries_evicted;
                self.bytes_freed += freed.bytes_freed;
            }
            Err(e) => {
                warn!("Cleanup step {} failed for {}: {}", step, tier, e);
                self.failures.push(format!("{tier}/{step}: {e}"));
            }
        }
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tier {
            Some(tier) => write!(
                f,
                "{} cleanup ({}, {}): freed {} entries / {} bytes, {} failed steps",
                tier,
                self.condition,
                self.variant
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "pressure".to_string()),
                self.entries_evicted,
                self.bytes_freed,
                self.failures.len()
            ),
            None => write!(f, "no cleanup needed"),
        }
    }
}

/// Coordinates cleanup of every registered cache tier
pub struct CleanupCoordinator {
    caches: Vec<Arc<dyn CacheTier>>,
    config: CleanupConfig,
    critical_threshold_percent: f64,
    last_cleanup: Mutex<Instant>,
}

impl CleanupCoordinator {
    pub fn new(config: CleanupConfig, critical_threshold_percent: f64) -> Self {
        Self {
            caches: Vec::new(),
            config,
            critical_threshold_percent,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.caches.push(cache);
        self
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    async fn aggregate_stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for cache in &self.caches {
            match cache.stats().await {
                Ok(stats) => total = total.merge(stats),
                Err(e) => warn!("Could not read stats for cache {}: {}", cache.name(), e),
            }
        }
        total
    }

    pub async fn signals(&self, sample: &MemorySample) -> CleanupSignals {
        let stats = self.aggregate_stats().await;
        CleanupSignals {
            memory_usage_percent: sample.usage_percent,
            cache_bytes: stats.bytes,
            cache_entries: stats.entries,
            stale_entries: stats.stale_entries,
            since_last_cleanup: self.last_cleanup.lock().await.elapsed(),
            performance_score: stats.hit_ratio(),
        }
    }

    pub async fn evaluate(&self, sample: &MemorySample) -> (CleanupCondition, CleanupSignals) {
        let signals = self.signals(sample).await;
        let condition =
            evaluate_conditions(&signals, &self.config, self.critical_threshold_percent);
        (condition, signals)
    }

    /// Tier for the observed pressure and condition. `None` means no cleanup.
    pub fn plan(
        level: PressureLevel,
        sustained: bool,
        condition: CleanupCondition,
    ) -> Option<CleanupTier> {
        let by_pressure = match level {
            PressureLevel::Critical => Some(CleanupTier::Emergency),
            PressureLevel::Warn if sustained => Some(CleanupTier::Aggressive),
            PressureLevel::Warn => Some(CleanupTier::Light),
            PressureLevel::Normal => None,
        };
        let by_condition = match condition {
            CleanupCondition::MemoryCritical => Some(CleanupTier::Emergency),
            CleanupCondition::None => None,
            _ => Some(CleanupTier::Light),
        };
        by_pressure.max(by_condition)
    }

    /// Post-batch cleanup scaled by pressure. Never fails.
    pub async fn after_batch(
        &self,
        sample: &MemorySample,
        level: PressureLevel,
        sustained: bool,
    ) -> CleanupReport {
        let (condition, signals) = self.evaluate(sample).await;
        match Self::plan(level, sustained, condition) {
            Some(tier) => self.execute(tier, condition, &signals).await,
            None => CleanupReport::skipped(condition),
        }
    }

    /// Run a specific tier now, regardless of the current condition
    pub async fn run_tier(&self, tier: CleanupTier, sample: &MemorySample) -> CleanupReport {
        let (condition, signals) = self.evaluate(sample).await;
        self.execute(tier, condition, &signals).await
    }

    async fn execute(
        &self,
        tier: CleanupTier,
        condition: CleanupCondition,
        signals: &CleanupSignals,
    ) -> CleanupReport {
        let mut report = CleanupReport {
            tier: Some(tier),
            ..CleanupReport::skipped(condition)
        };

        let excess = signals.cache_bytes.saturating_sub(self.config.max_cache_bytes);
        let emergency_target =
            (signals.cache_bytes as f64 * self.config.emergency_evict_fraction) as u64;

        for cache in &self.caches {
            let name = cache.name().to_string();

            report.absorb(&name, "purge_expired", cache.purge_expired().await);

            if report.variant == Some(CleanupVariant::Maintenance) && excess > 0 {
                report.absorb(&name, "force_evict", cache.force_evict(excess).await);
            }

            if tier >= CleanupTier::Aggressive {
                report.absorb(&name, "migrate_cold", cache.migrate_cold().await);
            }
            if tier == CleanupTier::Emergency && emergency_target > 0 {
                report.absorb(
                    &name,
                    "force_evict",
                    cache.force_evict(emergency_target).await,
                );
            }
            if tier >= CleanupTier::Aggressive {
                report.absorb(&name, "flush", cache.flush().await);
            }
        }

        *self.last_cleanup.lock().await = Instant::now();

        if report.failures.is_empty() {
            debug!("{}", report);
        } else {
            info!("{}", report);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::cache::LruObjectCache;
    use super::super::error::CleanupError;
    use super::*;
    use async_trait::async_trait;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    struct BrokenCache;

    #[async_trait]
    impl CacheTier for BrokenCache {
        fn name(&self) -> &str {
            "broken"
        }
        async fn stats(&self) -> CleanupResult<CacheStats> {
            Err(CleanupError::TierUnavailable {
                tier: "broken".into(),
                reason: "offline".into(),
            })
        }
        async fn purge_expired(&self) -> CleanupResult<EvictResult> {
            Err(CleanupError::EvictionFailed {
                tier: "broken".into(),
                reason: "offline".into(),
            })
        }
        async fn flush(&self) -> CleanupResult<EvictResult> {
            Err(CleanupError::Other(anyhow::anyhow!("offline")))
        }
        async fn force_evict(&self, _target_bytes: u64) -> CleanupResult<EvictResult> {
            Ok(EvictResult::default())
        }
    }

    fn filled_cache() -> Arc<LruObjectCache<String, Vec<u8>>> {
        let cache = Arc::new(LruObjectCache::new(
            "objects",
            NonZeroUsize::new(100).unwrap(),
            Duration::from_secs(600),
        ));
        for i in 0..10 {
            cache.insert(format!("k{i}"), vec![0u8; 8], 1000);
        }
        cache
    }

    #[test]
    fn test_plan_by_pressure() {
        use CleanupCondition as C;
        assert_eq!(CleanupCoordinator::plan(PressureLevel::Normal, false, C::None), None);
        assert_eq!(
            CleanupCoordinator::plan(PressureLevel::Warn, false, C::None),
            Some(CleanupTier::Light)
        );
        assert_eq!(
            CleanupCoordinator::plan(PressureLevel::Warn, true, C::None),
            Some(CleanupTier::Aggressive)
        );
        assert_eq!(
            CleanupCoordinator::plan(PressureLevel::Critical, false, C::None),
            Some(CleanupTier::Emergency)
        );
        assert_eq!(
            CleanupCoordinator::plan(PressureLevel::Normal, false, C::Scheduled),
            Some(CleanupTier::Light)
        );
    }

    #[tokio::test]
    async fn test_normal_pressure_skips_cleanup() {
        let cache = filled_cache();
        let coordinator =
            CleanupCoordinator::new(CleanupConfig::default(), 90.0).with_cache(cache.clone());

        let report = coordinator
            .after_batch(&MemorySample::at_percent(10.0), PressureLevel::Normal, false)
            .await;

        assert!(!report.ran());
        assert_eq!(cache.len(), 10);
    }

    #[tokio::test]
    async fn test_sustained_warn_flushes() {
        let cache = filled_cache();
        let coordinator =
            CleanupCoordinator::new(CleanupConfig::default(), 90.0).with_cache(cache.clone());

        let report = coordinator
            .after_batch(&MemorySample::at_percent(80.0), PressureLevel::Warn, true)
            .await;

        assert_eq!(report.tier, Some(CleanupTier::Aggressive));
        assert_eq!(report.entries_evicted, 10);
        assert_eq!(report.bytes_freed, 10_000);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_size_excessive_evicts_down_to_budget() {
        let cache = filled_cache();
        let config = CleanupConfig {
            max_cache_bytes: 7_500,
            ..Default::default()
        };
        let coordinator = CleanupCoordinator::new(config, 90.0).with_cache(cache.clone());

        let report = coordinator
            .after_batch(&MemorySample::at_percent(10.0), PressureLevel::Normal, false)
            .await;

        assert_eq!(report.condition, CleanupCondition::SizeExcessive);
        assert_eq!(report.variant, Some(CleanupVariant::Maintenance));
        assert_eq!(report.tier, Some(CleanupTier::Light));
        assert_eq!(report.entries_evicted, 3);
        assert!(cache.bytes() <= 7_500);
    }

    #[tokio::test]
    async fn test_report_names_variant_of_matched_condition() {
        let coordinator =
            CleanupCoordinator::new(CleanupConfig::default(), 90.0).with_cache(filled_cache());

        let report = coordinator
            .after_batch(&MemorySample::at_percent(95.0), PressureLevel::Critical, false)
            .await;
        assert_eq!(report.variant, Some(CleanupVariant::Emergency));
        assert!(report.to_string().starts_with("emergency cleanup (memory_critical, emergency)"));

        let report = coordinator
            .after_batch(&MemorySample::at_percent(80.0), PressureLevel::Warn, false)
            .await;
        assert_eq!(report.variant, None);
        assert!(report.to_string().starts_with("light cleanup (none, pressure)"));
    }

    #[tokio::test]
    async fn test_failures_are_collected_not_raised() {
        let cache = filled_cache();
        let coordinator = CleanupCoordinator::new(CleanupConfig::default(), 90.0)
            .with_cache(Arc::new(BrokenCache))
            .with_cache(cache.clone());

        let report = coordinator
            .run_tier(CleanupTier::Aggressive, &MemorySample::at_percent(50.0))
            .await;

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.entries_evicted, 10);
        assert!(cache.is_empty());
    }
}
