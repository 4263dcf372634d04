//! Memory monitoring, adaptive batch sizing and cleanup

pub mod cleanup;
pub mod monitor;
pub mod sizing;

pub use cleanup::{CacheTier, CleanupCoordinator, CleanupReport, CleanupTier, LruObjectCache};
pub use monitor::{MemoryProbe, MemorySample, PressureLevel, ResourceMonitor, SysinfoMemoryProbe};
pub use sizing::{BatchSizingPolicy, ConfiguredBatchSizing};
