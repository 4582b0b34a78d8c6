//! Connector error types.

use thiserror::Error;

/// Errors from the exchange adapters.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Exchange reported request weight exceeded; back off for the given time
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Typed exchange error (invalid symbol, insufficient balance, ...)
    #[error("Exchange API error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Response body did not match the expected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Could not build the request signature
    #[error("Failed to build signature: {0}")]
    Signature(String),

    /// WebSocket failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Stream closed by the peer
    #[error("Connection closed")]
    Closed,
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Parse(err.to_string())
    }
}
