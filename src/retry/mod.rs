//! Retry policies, backoff calculation and the retry loop wrapper
//!
//! Policies are resolved per operation type or per error type, delays are
//! computed by a pure function, and [`RetryExecutor`] runs an operation under
//! a policy for callers that want the loop handled for them.

pub mod backoff;
pub mod executor;
pub mod policy;

pub use backoff::{compute_delay, BackoffCalculator, BackoffLimits};
pub use executor::{RetryExecutor, RetryMetrics, RetryTermination, Retryable};
pub use policy::{builtin_policy, builtin_policy_names, PolicyKey, RetryPolicy, RetryPolicyResolver};
