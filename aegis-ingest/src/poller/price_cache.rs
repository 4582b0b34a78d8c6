//! Price-cache poller: upserts current prices into the config store for the
//! observer process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use aegis_connectors::ExchangeRest;
use aegis_store::{config_key, ConfigStore};

use crate::poller::Poller;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// USDT pairs cached by default.
pub const DEFAULT_CACHE_SYMBOLS: &[&str] =
    &["BNBUSDT", "BTCUSDT", "ETHUSDT", "XRPUSDT", "USDCUSDT"];

/// Fetches current prices for a configured symbol set every minute.
pub struct PriceCachePoller {
    rest: Arc<dyn ExchangeRest>,
    config: ConfigStore,
    symbols: Vec<String>,
    interval: Duration,
}

impl PriceCachePoller {
    pub fn new(rest: Arc<dyn ExchangeRest>, config: ConfigStore, symbols: Option<Vec<String>>) -> Self {
        Self {
            rest,
            config,
            symbols: symbols.unwrap_or_else(|| {
                DEFAULT_CACHE_SYMBOLS.iter().map(|s| s.to_string()).collect()
            }),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Poller for PriceCachePoller {
    fn name(&self) -> &'static str {
        "price_cache"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, _since: DateTime<Utc>) -> Result<u64> {
        let mut prices = serde_json::Map::new();

        for symbol in &self.symbols {
            match self.rest.ticker_price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), json!(price.to_string()));
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "Price fetch failed");
                }
            }
        }

        if prices.is_empty() {
            return Ok(0);
        }

        let updated = prices.len() as u64;
        prices.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
        self.config
            .set(config_key::PRICES, &serde_json::Value::Object(prices), "bot:poller")
            .await?;

        Ok(updated)
    }
}

// =============================================================================
// Tests
// =============================================================================
