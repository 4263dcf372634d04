//! Run checkpoints for resuming interrupted runs
//!
//! Checkpoints are keyed by `(entity_name, filters hash)` so runs over the
//! same entity with different filters never see each other's progress.

pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::CheckpointError;
pub use manager::CheckpointManager;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use types::{Filters, RecoveryState};
