//! Error types for the Tether engine.

use thiserror::Error;

/// All possible errors from the pure engine core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("unknown {what}: {value}")]
    UnknownVariant {
        what: &'static str,
        value: String,
    },

    #[error("entity construction failed: {0}")]
    EntityConstruction(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
