//! Storage error types.

use thiserror::Error;

/// Errors from the durable log.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into its domain type
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// Optimistic-lock conflict on a versioned config write
    #[error("Version conflict on '{key}': expected {expected}, current {current}")]
    Conflict { key: String, expected: i64, current: i64 },

    /// Write to a read-only config key from a non-system actor
    #[error("Config key '{key}' is read-only for '{updated_by}'")]
    ReadOnlyKey { key: String, updated_by: String },

    /// Unique-constraint breach outside of a dedup path (treated as a bug)
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Illegal command status transition
    #[error("Invalid status transition for {command_id}: {from} -> {to}")]
    InvalidTransition { command_id: String, from: String, to: String },
}

impl From<aegis_domain::DomainError> for StoreError {
    fn from(err: aegis_domain::DomainError) -> Self {
        StoreError::Decode(err.to_string())
    }
}
