use crate::retry::Retryable;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {location} is corrupt: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not serialize checkpoint for {entity}: {source}")]
    Serialize {
        entity: String,
        #[source]
        source: serde_json::Error,
    },

    /// Saving would move the checkpoint backwards
    #[error(
        "Checkpoint for {entity} would regress from batch #{saved} to batch #{attempted}"
    )]
    Regression {
        entity: String,
        saved: u64,
        attempted: u64,
    },

    #[error("Checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for CheckpointError {
    fn is_retryable(&self) -> bool {
        matches!(self, CheckpointError::Io { .. } | CheckpointError::Unavailable(_))
    }
}
