use super::RetryPolicy;
use crate::config::RetrySettings;
use rand::Rng;
use std::time::Duration;

/// Engine-wide bounds applied to every policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffLimits {
    pub global_max_delay: Duration,
    pub jitter_max: Duration,
}

impl BackoffLimits {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            global_max_delay: settings.global_max_delay,
            jitter_max: settings.jitter_max,
        }
    }
}

impl Default for BackoffLimits {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Delay before retry `attempt` (1-based):
/// `min(max_delay, global_max_delay, base_delay * factor^(attempt-1) + jitter)`.
///
/// `jitter` is supplied by the caller so the result depends only on the
/// arguments. Factors below 1.0 are treated as 1.0, so delays never shrink
/// as attempts grow.
pub fn compute_delay(
    attempt: u32,
    policy: &RetryPolicy,
    limits: &BackoffLimits,
    jitter: Duration,
) -> Duration {
    let cap = policy.max_delay.min(limits.global_max_delay);
    let exponent = attempt.saturating_sub(1).min(1023) as i32;
    let factor = if policy.backoff_factor.is_finite() {
        policy.backoff_factor.max(1.0)
    } else {
        1.0
    };

    let raw_secs = policy.base_delay.as_secs_f64() * factor.powi(exponent);
    if !raw_secs.is_finite() || raw_secs >= cap.as_secs_f64() {
        return cap;
    }

    let effective_jitter = if policy.jitter_enabled {
        jitter.min(limits.jitter_max)
    } else {
        Duration::ZERO
    };

    match Duration::try_from_secs_f64(raw_secs) {
        Ok(raw) => raw.saturating_add(effective_jitter).min(cap),
        Err(_) => cap,
    }
}

/// Draws jitter and delegates to [`compute_delay`]
#[derive(Debug, Clone, Default)]
pub struct BackoffCalculator {
    limits: BackoffLimits,
}

impl BackoffCalculator {
    pub fn new(limits: BackoffLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &BackoffLimits {
        &self.limits
    }

    pub fn delay_for(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        let jitter = if policy.jitter_enabled {
            self.sample_jitter()
        } else {
            Duration::ZERO
        };
        compute_delay(attempt, policy, &self.limits, jitter)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.limits.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=max_ms))
    }
}
