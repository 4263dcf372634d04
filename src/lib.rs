//! # batchwise
//!
//! Adaptive batch processing engine: applies large record sets to a target
//! store batch by batch while surviving partial failures, memory pressure and
//! process interruption.
//!
//! ## Modules
//!
//! - `orchestrator` - Batch loop, run options and results
//! - `resources` - Memory sampling, adaptive batch sizing, tiered cleanup
//! - `checkpoint` - Resumable run checkpoints and their stores
//! - `transaction` - Nested transaction boundary with savepoints
//! - `recovery` - Failure classification and recovery strategies
//! - `retry` - Retry policies, backoff and a retry executor
//! - `config` - Engine configuration, file loading and overrides
//! - `logging` - Tracing subscriber setup
//! - `testing` - Test doubles for engine collaborators
//!
//! ## Example
//!
//! ```no_run
//! use batchwise::config::EngineConfig;
//! use batchwise::orchestrator::{BatchOrchestratorBuilder, FnProcessor, ItemOutcome, RunOptions};
//!
//! # async fn example() -> batchwise::error::Result<()> {
//! let orchestrator = BatchOrchestratorBuilder::new(EngineConfig::default()).build()?;
//! let records: Vec<u64> = (0..1_000).collect();
//! let processor = FnProcessor::new(|_record: &u64| Ok(ItemOutcome::processed()));
//!
//! let result = orchestrator
//!     .run(&records, &processor, RunOptions::new("products").with_batch_size(100))
//!     .await?;
//! println!("{}: {} processed", result.terminal_state, result.processed_count);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod resources;
pub mod retry;
pub mod testing;
pub mod transaction;

pub use error::{EngineError, ErrorKind, ItemError, Severity};
pub use orchestrator::{BatchOrchestrator, BatchOrchestratorBuilder, RunOptions, RunResult, TerminalState};
