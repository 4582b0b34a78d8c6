//! Ingestion error types.

use thiserror::Error;

/// Errors from the ingestion plane.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] aegis_store::StoreError),

    /// Exchange adapter error
    #[error("Exchange error: {0}")]
    Connector(#[from] aegis_connectors::ConnectorError),

    /// A record could not be interpreted
    #[error("Malformed record: {0}")]
    Malformed(String),
}
