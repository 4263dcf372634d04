//! Adaptive batch sizing and pacing

use super::monitor::{MemorySample, PressureLevel, ResourceMonitor};
use crate::config::BatchConfig;
use std::collections::HashMap;
use std::time::Duration;

impl ResourceMonitor {
    /// Next batch size for the observed memory usage.
    ///
    /// Below the warn threshold the size is unchanged. From warn upward the
    /// size is multiplied by a factor falling linearly from
    /// `memory.shrink_at_warn` to `memory.shrink_at_critical`. The result
    /// never exceeds `current` and never drops below `min` (itself at least
    /// 1), so repeated calls under steady pressure settle on the floor
    /// instead of oscillating.
    pub fn adjust_batch_size(&self, current: usize, min: usize, sample: &MemorySample) -> usize {
        let floor = min.max(1);
        if current <= floor {
            return floor;
        }
        if self.classify(sample) == PressureLevel::Normal {
            return current;
        }

        let progress = self.pressure_progress(sample);
        let at_warn = self.memory.shrink_at_warn;
        let at_critical = self.memory.shrink_at_critical;
        let factor = at_warn - (at_warn - at_critical) * progress;
        let shrunk = (current as f64 * factor).floor() as usize;
        shrunk.clamp(floor, current)
    }

    /// Items between memory re-samples inside a batch of `batch_len` items.
    ///
    /// Always between 1 and `batch_len`, so every batch samples at least once.
    pub fn check_interval(&self, batch_len: usize) -> usize {
        if batch_len == 0 {
            return 1;
        }
        let samples = self.memory.samples_per_batch.max(1);
        (batch_len / samples).clamp(1, batch_len)
    }

    /// Pause to take after a batch, scaled by how far usage sits above warn
    pub fn pacing_delay(&self, sample: &MemorySample) -> Duration {
        match self.classify(sample) {
            PressureLevel::Normal => Duration::ZERO,
            PressureLevel::Critical => self.pacing.max_pause,
            PressureLevel::Warn => {
                let progress = self.pressure_progress(sample);
                let warn = self.pacing.warn_pause.as_secs_f64();
                let max = self.pacing.max_pause.as_secs_f64().max(warn);
                Duration::from_secs_f64(warn + (max - warn) * progress)
            }
        }
    }
}

/// Supplies a batch size when the caller does not pass one
pub trait BatchSizingPolicy: Send + Sync {
    fn default_batch_size(&self, entity_name: &str) -> usize;
}

/// Per-entity sizes from configuration, falling back to the global default
#[derive(Debug, Clone)]
pub struct ConfiguredBatchSizing {
    per_entity: HashMap<String, usize>,
    fallback: usize,
}

impl ConfiguredBatchSizing {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            per_entity: config.entity_batch_sizes.clone(),
            fallback: config.default_batch_size,
        }
    }
}

impl BatchSizingPolicy for ConfiguredBatchSizing {
    fn default_batch_size(&self, entity_name: &str) -> usize {
        self.per_entity
            .get(entity_name)
            .copied()
            .unwrap_or(self.fallback)
    }
}
