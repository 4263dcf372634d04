//! Picks which cleanup variant, if any, the current state calls for

use crate::config::CleanupConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Inputs to condition evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanupSignals {
    pub memory_usage_percent: f64,
    pub cache_bytes: u64,
    pub cache_entries: usize,
    pub stale_entries: usize,
    pub since_last_cleanup: Duration,
    /// Cache hit ratio; `None` when there is no lookup history yet
    pub performance_score: Option<f64>,
}

impl CleanupSignals {
    pub fn stale_ratio(&self) -> f64 {
        if self.cache_entries == 0 {
            0.0
        } else {
            self.stale_entries as f64 / self.cache_entries as f64
        }
    }
}

/// Matching condition, listed from highest to lowest priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupCondition {
    MemoryCritical,
    SizeExcessive,
    StaleRatioHigh,
    Scheduled,
    PerformanceLow,
    None,
}

/// Cleanup flavour a condition maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupVariant {
    Emergency,
    Maintenance,
    TimeBased,
}

impl CleanupCondition {
    pub fn variant(&self) -> Option<CleanupVariant> {
        match self {
            CleanupCondition::MemoryCritical => Some(CleanupVariant::Emergency),
            CleanupCondition::SizeExcessive
            | CleanupCondition::StaleRatioHigh
            | CleanupCondition::PerformanceLow => Some(CleanupVariant::Maintenance),
            CleanupCondition::Scheduled => Some(CleanupVariant::TimeBased),
            CleanupCondition::None => None,
        }
    }
}

impl fmt::Display for CleanupVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupVariant::Emergency => "emergency",
            CleanupVariant::Maintenance => "maintenance",
            CleanupVariant::TimeBased => "time_based",
        };
        f.write_str(s)
    }
}

impl fmt::Display for CleanupCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanupCondition::MemoryCritical => "memory_critical",
            CleanupCondition::SizeExcessive => "size_excessive",
            CleanupCondition::StaleRatioHigh => "stale_ratio_high",
            CleanupCondition::Scheduled => "scheduled",
            CleanupCondition::PerformanceLow => "performance_low",
            CleanupCondition::None => "none",
        };
        f.write_str(s)
    }
}

/// Highest-priority condition matched by `signals`
pub fn evaluate_conditions(
    signals: &CleanupSignals,
    config: &CleanupConfig,
    critical_threshold_percent: f64,
) -> CleanupCondition {
    if signals.memory_usage_percent >= critical_threshold_percent {
        return CleanupCondition::MemoryCritical;
    }
    if signals.cache_bytes > config.max_cache_bytes {
        return CleanupCondition::SizeExcessive;
    }
    if signals.cache_entries > 0 && signals.stale_ratio() >= config.stale_ratio_threshold {
        return CleanupCondition::StaleRatioHigh;
    }
    if signals.since_last_cleanup >= config.cleanup_interval {
        return CleanupCondition::Scheduled;
    }
    if let Some(score) = signals.performance_score {
        if score < config.min_performance_score {
            return CleanupCondition::PerformanceLow;
        }
    }
    CleanupCondition::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> CleanupSignals {
        CleanupSignals {
            memory_usage_percent: 20.0,
            cache_bytes: 1024,
            cache_entries: 10,
            stale_entries: 0,
            since_last_cleanup: Duration::from_secs(1),
            performance_score: Some(0.9),
        }
    }

    fn eval(signals: &CleanupSignals) -> CleanupCondition {
        evaluate_conditions(signals, &CleanupConfig::default(), 90.0)
    }

    #[test]
    fn test_calm_state_needs_nothing() {
        assert_eq!(eval(&calm()), CleanupCondition::None);
        assert_eq!(CleanupCondition::None.variant(), None);
    }

    #[test]
    fn test_each_condition_in_isolation() {
        let mut s = calm();
        s.performance_score = Some(0.1);
        assert_eq!(eval(&s), CleanupCondition::PerformanceLow);

        let mut s = calm();
        s.since_last_cleanup = Duration::from_secs(3600);
        assert_eq!(eval(&s), CleanupCondition::Scheduled);

        let mut s = calm();
        s.stale_entries = 5;
        assert_eq!(eval(&s), CleanupCondition::StaleRatioHigh);

        let mut s = calm();
        s.cache_bytes = u64::MAX;
        assert_eq!(eval(&s), CleanupCondition::SizeExcessive);

        let mut s = calm();
        s.memory_usage_percent = 93.0;
        assert_eq!(eval(&s), CleanupCondition::MemoryCritical);
    }

    #[test]
    fn test_priority_order_when_everything_matches() {
        let mut s = CleanupSignals {
            memory_usage_percent: 99.0,
            cache_bytes: u64::MAX,
            cache_entries: 10,
            stale_entries: 10,
            since_last_cleanup: Duration::from_secs(86_400),
            performance_score: Some(0.0),
        };
        assert_eq!(eval(&s), CleanupCondition::MemoryCritical);
        s.memory_usage_percent = 10.0;
        assert_eq!(eval(&s), CleanupCondition::SizeExcessive);
        s.cache_bytes = 0;
        assert_eq!(eval(&s), CleanupCondition::StaleRatioHigh);
        s.stale_entries = 0;
        assert_eq!(eval(&s), CleanupCondition::Scheduled);
        s.since_last_cleanup = Duration::ZERO;
        assert_eq!(eval(&s), CleanupCondition::PerformanceLow);
    }

    #[test]
    fn test_variants() {
        assert_eq!(
            CleanupCondition::MemoryCritical.variant(),
            Some(CleanupVariant::Emergency)
        );
        assert_eq!(
            CleanupCondition::Scheduled.variant(),
            Some(CleanupVariant::TimeBased)
        );
        assert_eq!(
            CleanupCondition::StaleRatioHigh.variant(),
            Some(CleanupVariant::Maintenance)
        );
    }
}
