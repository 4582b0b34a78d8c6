//! Daemon error types.

use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] aegis_store::StoreError),

    /// Command pipeline error
    #[error("Execution error: {0}")]
    Exec(#[from] aegis_exec::ExecError),

    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingest(#[from] aegis_ingest::IngestError),

    /// Strategy runtime error
    #[error("Strategy error: {0}")]
    Strategy(#[from] aegis_strategy::StrategyError),

    /// Exchange adapter error
    #[error("Exchange error: {0}")]
    Connector(#[from] aegis_connectors::ConnectorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
