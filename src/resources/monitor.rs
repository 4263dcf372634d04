//! Process memory sampling and pressure classification

use crate::config::{MemoryConfig, PacingConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Point-in-time memory reading. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub limit_bytes: u64,
    pub usage_percent: f64,
}

impl MemorySample {
    pub fn new(current_bytes: u64, peak_bytes: u64, limit_bytes: u64) -> Self {
        let usage_percent = if limit_bytes == 0 {
            0.0
        } else {
            current_bytes as f64 / limit_bytes as f64 * 100.0
        };
        Self {
            current_bytes,
            peak_bytes: peak_bytes.max(current_bytes),
            limit_bytes,
            usage_percent,
        }
    }

    /// Sample with a given usage percentage against a nominal 1 GiB limit
    pub fn at_percent(usage_percent: f64) -> Self {
        let limit: u64 = 1024 * 1024 * 1024;
        let current = (limit as f64 * usage_percent / 100.0) as u64;
        Self {
            current_bytes: current,
            peak_bytes: current,
            limit_bytes: limit,
            usage_percent,
        }
    }
}

impl fmt::Display for MemorySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% ({} MiB of {} MiB, peak {} MiB)",
            self.usage_percent,
            self.current_bytes / (1024 * 1024),
            self.limit_bytes / (1024 * 1024),
            self.peak_bytes / (1024 * 1024)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warn,
    Critical,
}

impl PressureLevel {
    pub fn is_elevated(&self) -> bool {
        !matches!(self, PressureLevel::Normal)
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warn => "warn",
            PressureLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Reads this process's resident memory through `sysinfo`
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    limit_override: Option<u64>,
    peak: AtomicU64,
}

impl SysinfoMemoryProbe {
    pub fn new(limit_override: Option<u64>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid for memory sampling: {}", e);
                None
            }
        };

        let mut system = System::new();
        system.refresh_memory();

        Self {
            system: Mutex::new(system),
            pid,
            limit_override,
            peak: AtomicU64::new(0),
        }
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn sample(&self) -> MemorySample {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());

        let current = match self.pid {
            Some(pid) => {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            None => 0,
        };

        let limit = match self.limit_override {
            Some(limit) => limit,
            None => {
                system.refresh_memory();
                system.total_memory()
            }
        };

        let peak = self.peak.fetch_max(current, Ordering::Relaxed).max(current);
        MemorySample::new(current, peak, limit)
    }
}

/// Samples memory and turns readings into pressure levels
#[derive(Clone)]
pub struct ResourceMonitor {
    probe: Arc<dyn MemoryProbe>,
    pub(super) memory: MemoryConfig,
    pub(super) pacing: PacingConfig,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, memory: MemoryConfig, pacing: PacingConfig) -> Self {
        Self {
            probe,
            memory,
            pacing,
        }
    }

    /// Monitor backed by the process memory of the running program
    pub fn for_current_process(memory: MemoryConfig, pacing: PacingConfig) -> Self {
        let probe = Arc::new(SysinfoMemoryProbe::new(memory.memory_limit_bytes));
        Self::new(probe, memory, pacing)
    }

    pub fn sample(&self) -> MemorySample {
        self.probe.sample()
    }

    pub fn classify(&self, sample: &MemorySample) -> PressureLevel {
        if sample.usage_percent >= self.memory.critical_threshold_percent {
            PressureLevel::Critical
        } else if sample.usage_percent >= self.memory.warn_threshold_percent {
            PressureLevel::Warn
        } else {
            PressureLevel::Normal
        }
    }

    pub fn check(&self) -> (MemorySample, PressureLevel) {
        let sample = self.sample();
        let level = self.classify(&sample);
        debug!("Memory check: {} ({})", sample, level);
        (sample, level)
    }

    /// Position of `sample` between the warn (0.0) and critical (1.0) thresholds
    pub fn pressure_progress(&self, sample: &MemorySample) -> f64 {
        let warn = self.memory.warn_threshold_percent;
        let critical = self.memory.critical_threshold_percent;
        let span = (critical - warn).max(f64::EPSILON);
        ((sample.usage_percent - warn) / span).clamp(0.0, 1.0)
    }

    pub fn memory_config(&self) -> &MemoryConfig {
        &self.memory
    }
}
