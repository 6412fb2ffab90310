//! Error handling - engine error hierarchy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Velotrade error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: empty ids, non-positive sizes, malformed pairs or enum strings
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation on a missing entity (cancel of unknown id, fill for unknown id)
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Pre-trade risk rejection
    #[error("risk limit violated: {0}")]
    Risk(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed JSON in a snapshot or wire payload
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("invalid state: {0}")]
    InvalidState(String),
}
