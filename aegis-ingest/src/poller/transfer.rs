//! Transfer poller: SPOT↔FUTURES internal transfers, both directions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use aegis_connectors::models::TransferRecord;
use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::EventStore;

use crate::poller::Poller;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
const PAGE_SIZE: u32 = 100;

/// Transfer directions of interest.
const DIRECTIONS: &[&str] = &["MAIN_UMFUTURE", "UMFUTURE_MAIN"];

/// Polls universal-transfer history every thirty minutes.
pub struct TransferPoller {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
    interval: Duration,
}

impl TransferPoller {
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

    async fn record_transfer(&self, transfer: &TransferRecord) -> Result<bool> {
        let event = Event::new(
            event_type::INTERNAL_TRANSFER_COMPLETED,
            EventSource::Bot,
            EntityKind::Transfer,
            transfer.tran_id.to_string(),
            self.scope.clone(),
            dedup::transfer_key(&self.scope.exchange, &transfer.tran_id.to_string()),
            json!({
                "tran_id": transfer.tran_id.to_string(),
                "asset": transfer.asset,
                "amount": transfer.amount.to_string(),
                "transfer_type": transfer.transfer_type,
                "status": transfer.status,
                "timestamp": transfer.timestamp,
                "source": "poller",
            }),
        )
        .at(Utc
            .timestamp_millis_opt(transfer.timestamp)
            .single()
            .unwrap_or_else(Utc::now));

        Ok(self.events.append(&event).await?.is_stored())
    }
}

#[async_trait]
impl Poller for TransferPoller {
    fn name(&self) -> &'static str {
        "transfer"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, since: DateTime<Utc>) -> Result<u64> {
        let start = since.timestamp_millis();
        let end = Utc::now().timestamp_millis();

        let mut created = 0;
        for direction in DIRECTIONS {
            let mut page = 1u32;
            loop {
                let result = self
                    .rest
                    .transfer_history(direction, start, end, page, PAGE_SIZE)
                    .await?;

                for transfer in &result.rows {
                    if self.record_transfer(transfer).await? {
                        created += 1;
                    }
                }

                let fetched = (page as u64) * (PAGE_SIZE as u64);
                if result.rows.is_empty() || fetched >= result.total {
                    break;
                }
                page += 1;
            }
        }

        Ok(created)
    }
}

// =============================================================================
// Tests
// =============================================================================
