//! Execution error types.

use thiserror::Error;

/// Errors from the command pipeline.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] aegis_store::StoreError),

    /// Exchange adapter error
    #[error("Exchange error: {0}")]
    Connector(#[from] aegis_connectors::ConnectorError),

    /// A command payload was missing a required field
    #[error("Invalid payload for {command_type}: {reason}")]
    InvalidPayload { command_type: String, reason: String },

    /// A risk rule failed to evaluate
    #[error("Risk rule '{rule}' errored: {reason}")]
    RuleError { rule: &'static str, reason: String },
}
