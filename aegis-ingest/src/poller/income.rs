//! Income poller: funding fees and commission rebates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tracing::debug;

use aegis_connectors::models::IncomeRecord;
use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::EventStore;

use crate::poller::Poller;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const FETCH_LIMIT: u32 = 1000;

/// Polls the futures income endpoint every five minutes.
pub struct IncomePoller {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
    interval: Duration,
}

impl IncomePoller {
    pub fn new(rest: Arc<dyn ExchangeRest>, events: EventStore, scope: Scope) -> Self {
        Self {
            rest,
            events,
            scope,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn record_income(&self, income: &IncomeRecord) -> Result<bool> {
        let event = match income.income_type.as_str() {
            "FUNDING_FEE" => self.funding_event(income),
            "COMMISSION_REBATE" => self.rebate_event(income),
            other => {
                debug!(income_type = other, "Income type not ingested");
                return Ok(false);
            }
        };

        Ok(self.events.append(&event).await?.is_stored())
    }

    fn funding_event(&self, income: &IncomeRecord) -> Event {
        Event::new(
            event_type::FUNDING_APPLIED,
            EventSource::Bot,
            EntityKind::Funding,
            income.tran_id.to_string(),
            self.scope.clone(),
            dedup::funding_key(&self.scope.exchange, &income.symbol, income.time),
            json!({
                "symbol": income.symbol,
                "funding_fee": income.income.to_string(),
                "asset": income.asset,
                "tran_id": income.tran_id.to_string(),
                "time": income.time,
                "source": "poller",
            }),
        )
        .at(ms_to_utc(income.time))
    }

    fn rebate_event(&self, income: &IncomeRecord) -> Event {
        Event::new(
            event_type::COMMISSION_REBATE_RECEIVED,
            EventSource::Bot,
            EntityKind::Rebate,
            income.tran_id.to_string(),
            self.scope.clone(),
            dedup::rebate_key(&self.scope.exchange, &income.tran_id.to_string()),
            json!({
                "symbol": income.symbol,
                "rebate_amount": income.income.to_string(),
                "asset": income.asset,
                "tran_id": income.tran_id.to_string(),
                "time": income.time,
                "source": "poller",
            }),
        )
        .at(ms_to_utc(income.time))
    }
}

fn ms_to_utc(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl Poller for IncomePoller {
    fn name(&self) -> &'static str {
        "income"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, since: DateTime<Utc>) -> Result<u64> {
        let start = since.timestamp_millis();
        let end = Utc::now().timestamp_millis();

        let records = self.rest.income_history(start, end, FETCH_LIMIT).await?;

        let mut created = 0;
        for record in &records {
            if self.record_income(record).await? {
                created += 1;
            }
        }
        Ok(created)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_connectors::StubExchange;
    use aegis_domain::{TradingMode, Venue};
    use aegis_store::sqlite;
    use rust_decimal_macros::dec;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", None, TradingMode::Testnet)
    }

    fn funding(tran_id: i64, time: i64) -> IncomeRecord {
        IncomeRecord {
            symbol: "XRPUSDT".into(),
            income_type: "FUNDING_FEE".into(),
            income: dec!(-0.12),
            asset: "USDT".into(),
            time,
            tran_id,
        }
    }

    #[tokio::test]
    async fn funding_and_rebates_become_events() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);

        let stub = Arc::new(StubExchange::default());
        stub.set_income(vec![
            funding(1, Utc::now().timestamp_millis()),
            IncomeRecord {
                symbol: String::new(),
                income_type: "COMMISSION_REBATE".into(),
                income: dec!(0.01),
                asset: "USDT".into(),
                time: Utc::now().timestamp_millis(),
                tran_id: 2,
            },
            IncomeRecord {
                symbol: "XRPUSDT".into(),
                income_type: "REALIZED_PNL".into(),
                income: dec!(5),
                asset: "USDT".into(),
                time: Utc::now().timestamp_millis(),
                tran_id: 3,
            },
        ]);

        let poller = IncomePoller::new(stub, events.clone(), scope());
        let created = poller.poll_once(Utc::now() - chrono::Duration::hours(1)).await.unwrap();

        // Realized PnL flows in via the stream, not the income poller
        assert_eq!(created, 2);
        assert_eq!(events.get_by_type(event_type::FUNDING_APPLIED, 10).await.unwrap().len(), 1);
        assert_eq!(
            events.get_by_type(event_type::COMMISSION_REBATE_RECEIVED, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn overlapping_windows_dedup() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);

        let stub = Arc::new(StubExchange::default());
        stub.set_income(vec![funding(1, Utc::now().timestamp_millis())]);

        let poller = IncomePoller::new(stub, events.clone(), scope());
        let since = Utc::now() - chrono::Duration::hours(1);

        assert_eq!(poller.poll_once(since).await.unwrap(), 1);
        assert_eq!(poller.poll_once(since).await.unwrap(), 0);
        assert_eq!(events.count().await.unwrap(), 1);
    }
}
