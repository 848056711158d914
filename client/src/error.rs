//! Unified error handling for the sync client.

use thiserror::Error;

/// All possible errors from the sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store not initialized")]
    NotInitialized,

    #[error("network failure: {message}")]
    Network {
        /// HTTP status, when the remote answered at all.
        status: Option<u16>,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] tether_engine::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conflict requires manual resolution for entity {entity_id}")]
    ConflictUnresolved { entity_id: String },

    #[error("entity not found: {table}/{id}")]
    EntityNotFound { table: String, id: String },

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("status channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Maps an HTTP status to the error kind the transport signals.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => SyncError::Auth(message),
            403 => SyncError::Permission(message),
            408 => SyncError::Timeout(message),
            429 => SyncError::RateLimited(message),
            _ => SyncError::Network {
                status: Some(status),
                message,
            },
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network { .. } | SyncError::Timeout(_) | SyncError::RateLimited(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else {
            SyncError::Network {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
