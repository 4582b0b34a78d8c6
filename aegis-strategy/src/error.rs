//! Strategy runtime error types.

use thiserror::Error;

/// Errors from the strategy runtime.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] aegis_store::StoreError),

    /// Command pipeline error
    #[error("Execution error: {0}")]
    Exec(#[from] aegis_exec::ExecError),

    /// No factory registered under the configured name
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// A lifecycle call arrived before a strategy was loaded
    #[error("No strategy loaded")]
    NotLoaded,

    /// Error raised by the strategy plug-in itself
    #[error("Strategy error: {0}")]
    Plugin(#[from] anyhow::Error),
}
