//! User-data-stream WebSocket connector.
//!
//! Wraps one tokio-tungstenite connection to `{ws_base}/ws/{listen_key}`.
//! Protocol pings are answered inline; unknown frame types are skipped so
//! `next()` only yields the four semantic frame kinds.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::models::UserDataFrame;
use crate::{ConnectorError, Result};

/// A connected user-data stream.
pub struct UserDataStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl UserDataStream {
    /// Connect to the user-data stream for a listen key.
    pub async fn connect(ws_base: &str, listen_key: &str) -> Result<Self> {
        let url = format!("{ws_base}/ws/{listen_key}");
        let (inner, _) = connect_async(&url)
            .await
            .map_err(|e| ConnectorError::WebSocket(e.to_string()))?;

        debug!(%ws_base, "User-data stream connected");
        Ok(Self { inner, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next semantic frame. `None` means the stream is closed.
    pub async fn next(&mut self) -> Option<Result<UserDataFrame>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => match UserDataFrame::parse(&text) {
                    Ok(Some(frame)) => return Some(Ok(frame)),
                    Ok(None) => {
                        debug!("Skipping unknown stream frame");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Unparseable stream frame");
                        return Some(Err(e));
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.inner.send(Message::Pong(payload)).await {
                        return Some(Err(ConnectorError::WebSocket(e.to_string())));
                    }
                }
                Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ConnectorError::WebSocket(e.to_string()))),
                None => return None,
            }
        }
    }

    /// Close the stream gracefully.
    pub async fn close(&mut self) -> Result<()> {
        self.inner
            .close(None)
            .await
            .map_err(|e| ConnectorError::WebSocket(e.to_string()))
    }
}
