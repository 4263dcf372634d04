//! Batch orchestration
//!
//! [`BatchOrchestrator::run`] splits the item sequence into batches and, for
//! each batch:
//!
//! 1. polls the [`CancellationFlag`] and samples memory
//! 2. opens a transaction and feeds items to the [`ItemProcessor`]
//! 3. commits, or rolls back on timeout or an escaping failure
//! 4. saves a checkpoint and reports the [`BatchResult`] to the [`MetricsSink`]
//! 5. runs cleanup, resizes the next batch and paces itself under pressure

pub mod builder;
pub mod cancellation;
pub mod metrics;
pub mod processor;
pub mod runner;
pub mod types;

pub use builder::BatchOrchestratorBuilder;
pub use cancellation::CancellationFlag;
pub use metrics::{MetricsSink, NoopMetricsSink, TracingMetricsSink};
pub use processor::{FnProcessor, ItemProcessor};
pub use runner::BatchOrchestrator;
pub use types::{
    BatchResult, ItemAction, ItemOutcome, RunContext, RunCounters, RunOptions, RunResult,
    TerminalState,
};
