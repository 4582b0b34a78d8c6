//! Daily realised-PnL calculation.
//!
//! Sums `realized_pnl` across `TradeExecuted` events since today's UTC
//! midnight, filtered by scope. A short TTL cache keeps the guard from
//! rescanning the log on every emission.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use aegis_domain::{event_type, Scope};
use aegis_store::EventStore;

use crate::Result;

const CACHE_TTL: Duration = Duration::from_secs(5);

struct CachedPnl {
    computed_at: Instant,
    key: String,
    value: Decimal,
}

/// Daily PnL over the event log.
pub struct PnlCalculator {
    events: EventStore,
    cache: Mutex<Option<CachedPnl>>,
}

impl PnlCalculator {
    pub fn new(events: EventStore) -> Self {
        Self {
            events,
            cache: Mutex::new(None),
        }
    }

    /// Today's realised PnL for a scope (symbol filter only when the scope
    /// carries one).
    pub async fn daily_pnl(&self, scope: &Scope) -> Result<Decimal> {
        let cache_key = format!(
            "{}:{}:{}:{}:{}",
            scope.exchange,
            scope.venue,
            scope.account_id,
            scope.mode,
            scope.symbol.as_deref().unwrap_or("*"),
        );

        if let Some(cached) = self.cache.lock().expect("pnl cache poisoned").as_ref() {
            if cached.key == cache_key && cached.computed_at.elapsed() < CACHE_TTL {
                return Ok(cached.value);
            }
        }

        let now = Utc::now();
        let midnight = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);

        let trades = self
            .events
            .get_by_type_since(event_type::TRADE_EXECUTED, midnight, 10_000)
            .await?;

        let mut total = Decimal::ZERO;
        for trade in &trades {
            if trade.scope.exchange != scope.exchange
                || trade.scope.venue != scope.venue
                || trade.scope.account_id != scope.account_id
                || trade.scope.mode != scope.mode
            {
                continue;
            }
            if let Some(symbol) = &scope.symbol {
                if trade.scope.symbol.as_deref() != Some(symbol) {
                    continue;
                }
            }

            if let Some(pnl) = trade
                .payload
                .get("realized_pnl")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Decimal>().ok())
            {
                total += pnl;
            }
        }

        debug!(pnl = %total, trades = trades.len(), "Daily PnL computed");

        *self.cache.lock().expect("pnl cache poisoned") = Some(CachedPnl {
            computed_at: Instant::now(),
            key: cache_key,
            value: total,
        });

        Ok(total)
    }

    pub fn invalidate(&self) {
        *self.cache.lock().expect("pnl cache poisoned") = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{dedup, EntityKind, Event, EventSource, TradingMode, Venue};
    use aegis_store::sqlite;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    fn trade(trade_id: &str, pnl: &str, ts: chrono::DateTime<Utc>) -> Event {
        Event::new(
            event_type::TRADE_EXECUTED,
            EventSource::Websocket,
            EntityKind::Trade,
            trade_id,
            scope(),
            dedup::trade_key("BINANCE", Venue::Futures, "XRPUSDT", trade_id),
            json!({"realized_pnl": pnl}),
        )
        .at(ts)
    }

    #[tokio::test]
    async fn sums_only_todays_trades() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);

        events.append(&trade("1", "2.50", Utc::now())).await.unwrap();
        events.append(&trade("2", "-1.00", Utc::now())).await.unwrap();
        events
            .append(&trade("3", "100", Utc::now() - chrono::Duration::days(2)))
            .await
            .unwrap();

        let calc = PnlCalculator::new(events);
        assert_eq!(calc.daily_pnl(&scope()).await.unwrap(), dec!(1.50));
    }

    #[tokio::test]
    async fn cache_serves_repeat_reads() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);
        events.append(&trade("1", "1.00", Utc::now())).await.unwrap();

        let calc = PnlCalculator::new(events.clone());
        assert_eq!(calc.daily_pnl(&scope()).await.unwrap(), dec!(1.00));

        // New trade lands; the warm cache still answers until invalidated
        events.append(&trade("2", "1.00", Utc::now())).await.unwrap();
        assert_eq!(calc.daily_pnl(&scope()).await.unwrap(), dec!(1.00));

        calc.invalidate();
        assert_eq!(calc.daily_pnl(&scope()).await.unwrap(), dec!(2.00));
    }

    #[tokio::test]
    async fn other_symbols_are_excluded_when_scope_has_symbol() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);

        let mut other = trade("9", "50", Utc::now());
        other.scope.symbol = Some("BTCUSDT".into());
        other.dedup_key = dedup::trade_key("BINANCE", Venue::Futures, "BTCUSDT", "9");
        events.append(&other).await.unwrap();
        events.append(&trade("1", "0.25", Utc::now())).await.unwrap();

        let calc = PnlCalculator::new(events);
        assert_eq!(calc.daily_pnl(&scope()).await.unwrap(), dec!(0.25));
    }
}
