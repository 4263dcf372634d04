//! Tiered cache cleanup driven by memory pressure
//!
//! Cleanup runs after each batch. The tier is chosen from the observed
//! pressure level and the highest-priority [`CleanupCondition`]:
//!
//! - `Light` purges expired entries
//! - `Aggressive` also migrates cold data and flushes object caches
//! - `Emergency` also force-evicts a configured share of cached bytes
//!
//! Individual step failures are collected in the [`CleanupReport`] and never
//! propagated to the caller.

pub mod cache;
pub mod condition;
pub mod coordinator;
pub mod error;

pub use cache::{CacheStats, CacheTier, EvictResult, LruObjectCache};
pub use condition::{evaluate_conditions, CleanupCondition, CleanupSignals, CleanupVariant};
pub use coordinator::{CleanupCoordinator, CleanupReport, CleanupTier};
pub use error::{CleanupError, CleanupResult};
