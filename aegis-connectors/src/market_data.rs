//! Market-data provider.
//!
//! Fronts the exchange kline endpoint with an in-memory TTL cache keyed by
//! `(symbol, timeframe)`. Strategies read through this; errors come back as
//! empty frames so a flaky data path never kills a tick.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::models::Kline;
use crate::ports::ExchangeRest;

/// Default kline timeframe.
pub const DEFAULT_TIMEFRAME: &str = "5m";

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

const DEFAULT_LIMIT: u32 = 100;

/// Tabular OHLCV frame indexed by open time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OhlcvFrame {
    pub time: Vec<DateTime<Utc>>,
    pub open: Vec<Decimal>,
    pub high: Vec<Decimal>,
    pub low: Vec<Decimal>,
    pub close: Vec<Decimal>,
    pub volume: Vec<Decimal>,
}

impl OhlcvFrame {
    pub fn from_klines(klines: &[Kline]) -> Self {
        let mut frame = Self::default();
        for kline in klines {
            frame
                .time
                .push(Utc.timestamp_millis_opt(kline.open_time).single().unwrap_or_default());
            frame.open.push(kline.open);
            frame.high.push(kline.high);
            frame.low.push(kline.low);
            frame.close.push(kline.close);
            frame.volume.push(kline.volume);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Latest close, if any rows exist.
    pub fn last_close(&self) -> Option<Decimal> {
        self.close.last().copied()
    }

    /// Keep only the trailing `limit` rows.
    pub fn tail(&self, limit: usize) -> Self {
        if self.len() <= limit {
            return self.clone();
        }
        let skip = self.len() - limit;
        Self {
            time: self.time[skip..].to_vec(),
            open: self.open[skip..].to_vec(),
            high: self.high[skip..].to_vec(),
            low: self.low[skip..].to_vec(),
            close: self.close[skip..].to_vec(),
            volume: self.volume[skip..].to_vec(),
        }
    }
}

struct CacheEntry {
    fetched_at: Instant,
    klines: Arc<Vec<Kline>>,
}

/// TTL-cached kline provider.
pub struct MarketDataProvider {
    rest: Arc<dyn ExchangeRest>,
    default_timeframe: String,
    default_limit: u32,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
    valid_timeframes: HashSet<&'static str>,
}

impl MarketDataProvider {
    pub fn new(rest: Arc<dyn ExchangeRest>) -> Self {
        Self::with_settings(rest, DEFAULT_TIMEFRAME, DEFAULT_LIMIT, Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn with_settings(
        rest: Arc<dyn ExchangeRest>,
        default_timeframe: &str,
        default_limit: u32,
        cache_ttl: Duration,
    ) -> Self {
        let valid_timeframes: HashSet<&'static str> = [
            "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d",
            "1w", "1M",
        ]
        .into_iter()
        .collect();

        Self {
            rest,
            default_timeframe: default_timeframe.to_string(),
            default_limit,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
            valid_timeframes,
        }
    }

    fn resolve_timeframe(&self, timeframe: Option<&str>) -> String {
        let requested = timeframe.unwrap_or(&self.default_timeframe);
        if self.valid_timeframes.contains(requested) {
            requested.to_string()
        } else {
            warn!(timeframe = requested, fallback = %self.default_timeframe, "Invalid timeframe");
            self.default_timeframe.clone()
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<Vec<Kline>>> {
        let cache = self.cache.read().expect("market-data cache poisoned");
        cache.get(key).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.cache_ttl).then(|| entry.klines.clone())
        })
    }

    fn store(&self, key: String, klines: Arc<Vec<Kline>>) {
        self.cache
            .write()
            .expect("market-data cache poisoned")
            .insert(
                key,
                CacheEntry {
                    fetched_at: Instant::now(),
                    klines,
                },
            );
    }

    /// Raw bars, oldest first. Errors log and return empty.
    pub async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Option<&str>,
        limit: Option<u32>,
    ) -> Vec<Kline> {
        let timeframe = self.resolve_timeframe(timeframe);
        let limit = limit.unwrap_or(self.default_limit);
        let key = format!("{symbol}:{timeframe}");

        if let Some(hit) = self.cached(&key) {
            debug!(%key, "Kline cache hit");
            let rows = hit.as_slice();
            let skip = rows.len().saturating_sub(limit as usize);
            return rows[skip..].to_vec();
        }

        match self.rest.klines(symbol, &timeframe, limit.max(self.default_limit)).await {
            Ok(klines) => {
                self.store(key, Arc::new(klines.clone()));
                let skip = klines.len().saturating_sub(limit as usize);
                klines[skip..].to_vec()
            }
            Err(e) => {
                warn!(symbol, %timeframe, error = %e, "Kline fetch failed");
                Vec::new()
            }
        }
    }

    /// Tabular OHLCV frame. Errors return an empty frame.
    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Option<&str>,
        limit: Option<u32>,
    ) -> OhlcvFrame {
        let bars = self.get_bars(symbol, timeframe, limit).await;
        OhlcvFrame::from_klines(&bars)
    }

    /// Latest traded price (no caching; ticker calls are cheap).
    pub async fn get_current_price(&self, symbol: &str) -> Option<Decimal> {
        match self.rest.ticker_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol, error = %e, "Ticker fetch failed");
                None
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .expect("market-data cache poisoned")
            .clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubExchange;
    use rust_decimal_macros::dec;

    fn kline(open_time: i64, close: Decimal) -> Kline {
        Kline {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(100),
            close_time: open_time + 299_999,
        }
    }

    fn provider_with(klines: Vec<Kline>) -> (Arc<StubExchange>, MarketDataProvider) {
        let stub = Arc::new(StubExchange::new(dec!(0.5)));
        stub.set_klines("XRPUSDT", "5m", klines);
        let provider = MarketDataProvider::new(stub.clone());
        (stub, provider)
    }

    #[tokio::test]
    async fn returns_frame_with_latest_close() {
        let (_stub, provider) = provider_with(vec![
            kline(0, dec!(0.51)),
            kline(300_000, dec!(0.52)),
        ]);

        let frame = provider.get_ohlcv("XRPUSDT", None, None).await;
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.last_close(), Some(dec!(0.52)));
    }

    #[tokio::test]
    async fn cache_serves_second_read() {
        let (stub, provider) = provider_with(vec![kline(0, dec!(0.51))]);

        let first = provider.get_bars("XRPUSDT", None, None).await;
        // Changing the stub data must not show through the warm cache
        stub.set_klines("XRPUSDT", "5m", vec![kline(0, dec!(9.99))]);
        let second = provider.get_bars("XRPUSDT", None, None).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_timeframe_falls_back_to_default() {
        let (_stub, provider) = provider_with(vec![kline(0, dec!(0.51))]);

        let frame = provider.get_ohlcv("XRPUSDT", Some("7m"), None).await;
        assert_eq!(frame.len(), 1);
    }

    #[tokio::test]
    async fn errors_return_empty_frame() {
        let stub = Arc::new(StubExchange::new(dec!(0.5)));
        stub.fail_next("boom");
        let provider = MarketDataProvider::new(stub);

        let frame = provider.get_ohlcv("XRPUSDT", None, None).await;
        assert!(frame.is_empty());
    }

    #[test]
    fn tail_keeps_trailing_rows() {
        let frame = OhlcvFrame::from_klines(&[
            kline(0, dec!(1)),
            kline(1, dec!(2)),
            kline(2, dec!(3)),
        ]);

        let tail = frame.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.close, vec![dec!(2), dec!(3)]);
    }
}
