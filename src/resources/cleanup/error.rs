//! Error types for cache cleanup operations

/// Error type for cleanup operations
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Cache tier {tier} is unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("Eviction failed in {tier}: {reason}")]
    EvictionFailed { tier: String, reason: String },

    #[error("Migration to external tier failed: {0}")]
    MigrationFailed(String),

    #[error("Cleanup error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CleanupError {
    /// Whether a later cleanup pass might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CleanupError::TierUnavailable { .. } | CleanupError::MigrationFailed(_)
        )
    }
}

/// Result type for cleanup operations
pub type CleanupResult<T> = Result<T, CleanupError>;
