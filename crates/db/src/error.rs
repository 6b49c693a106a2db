//! Error types for engine and codec operations.

use thiserror::Error;

/// Errors raised by [`crate::MemoryEngine`].
#[derive(Debug, Error)]
pub enum DbError {
    #[error("table '{table}' not found")]
    ResourceNotFound { table: String },

    #[error("table '{table}' already exists")]
    ResourceInUse { table: String },

    #[error("table '{table}' is {status}, not ACTIVE")]
    TableNotActive { table: String, status: String },

    #[error("table '{table}' did not become ACTIVE after {attempts} attempts")]
    WaitTimeout { table: String, attempts: u32 },

    #[error("the conditional request failed")]
    ConditionalCheckFailed,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("snapshot i/o failed: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

impl DbError {
    /// Whether the error means the engine could not be reached or persisted to,
    /// as opposed to a request the engine understood and refused.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Snapshot(_) | Self::TableNotActive { .. } | Self::WaitTimeout { .. }
        )
    }
}

/// Errors raised while converting between JSON values and attribute values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("number '{0}' cannot be represented as an exact decimal")]
    UnrepresentableNumber(String),

    #[error("decimal '{0}' cannot be represented as a JSON number")]
    NonFiniteNumber(String),

    #[error("expected a JSON object at the top level")]
    NotAnObject,
}

pub type Result<T> = std::result::Result<T, DbError>;
