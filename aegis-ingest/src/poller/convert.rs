//! Convert poller: asset conversion history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use aegis_connectors::models::ConvertRecord;
use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::EventStore;

use crate::poller::Poller;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Polls conversion history hourly.
pub struct ConvertPoller {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
    interval: Duration,
}

impl ConvertPoller {
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

    async fn record_convert(&self, convert: &ConvertRecord) -> Result<bool> {
        let event = Event::new(
            event_type::CONVERT_EXECUTED,
            EventSource::Bot,
            EntityKind::Convert,
            convert.order_id.to_string(),
            self.scope.clone(),
            dedup::convert_key(&self.scope.exchange, &convert.order_id.to_string()),
            json!({
                "order_id": convert.order_id.to_string(),
                "from_asset": convert.from_asset,
                "from_amount": convert.from_amount.to_string(),
                "to_asset": convert.to_asset,
                "to_amount": convert.to_amount.to_string(),
                "create_time": convert.create_time,
                "source": "poller",
            }),
        )
        .at(Utc
            .timestamp_millis_opt(convert.create_time)
            .single()
            .unwrap_or_else(Utc::now));

        Ok(self.events.append(&event).await?.is_stored())
    }
}

#[async_trait]
impl Poller for ConvertPoller {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, since: DateTime<Utc>) -> Result<u64> {
        let start = since.timestamp_millis();
        let end = Utc::now().timestamp_millis();

        let records = self.rest.convert_history(start, end).await?;

        let mut created = 0;
        for record in &records {
            if self.record_convert(record).await? {
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

    #[tokio::test]
    async fn conversions_are_ingested_once() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);

        let stub = Arc::new(StubExchange::default());
        stub.set_converts(vec![ConvertRecord {
            order_id: 940708407462087195,
            from_asset: "USDT".into(),
            from_amount: dec!(20),
            to_asset: "BNB".into(),
            to_amount: dec!(0.05),
            create_time: Utc::now().timestamp_millis(),
            order_status: "SUCCESS".into(),
        }]);

        let scope = Scope::new("BINANCE", Venue::Spot, "main", None, TradingMode::Testnet);
        let poller = ConvertPoller::new(stub, events.clone(), scope);

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(poller.poll_once(since).await.unwrap(), 1);
        assert_eq!(poller.poll_once(since).await.unwrap(), 0);

        let converts = events.get_by_type(event_type::CONVERT_EXECUTED, 10).await.unwrap();
        assert_eq!(converts[0].dedup_key, "BINANCE:convert:940708407462087195");
    }
}
