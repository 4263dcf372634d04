use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::transaction::TransactionError;

/// Failure taxonomy used to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ApiError,
    MemoryError,
    ValidationError,
    Timeout,
    TransactionalError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ApiError => "api_error",
            ErrorKind::MemoryError => "memory_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransactionalError => "transactional_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Parse a wire-level error type tag. Unrecognized tags map to `Unknown`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "api_error" | "api" => ErrorKind::ApiError,
            "memory_error" | "memory" => ErrorKind::MemoryError,
            "validation_error" | "validation" => ErrorKind::ValidationError,
            "timeout" => ErrorKind::Timeout,
            "transactional_error" | "transaction" => ErrorKind::TransactionalError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Validation failures never succeed on a second attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::ValidationError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Failure reported by an item processor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} ({severity}): {message}")]
pub struct ItemError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::default(),
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MemoryError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transactional(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransactionalError, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Errors of this kind cannot be contained inside the batch
    pub fn escapes_batch(&self) -> bool {
        matches!(self.kind, ErrorKind::TransactionalError)
    }
}

/// Errors surfaced by the engine itself
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// The batch could not be reverted; store consistency is unknown
    #[error("Rollback of batch {batch_id} failed: {source}")]
    RollbackFailed {
        batch_id: String,
        #[source]
        source: TransactionError,
    },

    #[error("Invalid run options: {0}")]
    InvalidOptions(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
