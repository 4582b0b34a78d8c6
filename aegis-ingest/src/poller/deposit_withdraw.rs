//! Deposit/withdraw poller: completed external movements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::json;

use aegis_connectors::models::{DepositRecord, WithdrawRecord};
use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::EventStore;

use crate::poller::Poller;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Deposit status meaning credited.
const DEPOSIT_CONFIRMED: i32 = 1;
/// Withdraw status meaning completed.
const WITHDRAW_COMPLETED: i32 = 6;

/// Polls deposit and withdrawal history every six hours.
pub struct DepositWithdrawPoller {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
    interval: Duration,
}

impl DepositWithdrawPoller {
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

    async fn record_deposit(&self, deposit: &DepositRecord) -> Result<bool> {
        let event = Event::new(
            event_type::DEPOSIT_COMPLETED,
            EventSource::Bot,
            EntityKind::Deposit,
            deposit.id.clone(),
            self.scope.clone(),
            dedup::deposit_key(&self.scope.exchange, &deposit.id),
            json!({
                "deposit_id": deposit.id,
                "tx_id": deposit.tx_id,
                "asset": deposit.asset,
                "amount": deposit.amount.to_string(),
                "status": deposit.status,
                "insert_time": deposit.insert_time,
                "source": "poller",
            }),
        )
        .at(Utc
            .timestamp_millis_opt(deposit.insert_time)
            .single()
            .unwrap_or_else(Utc::now));

        Ok(self.events.append(&event).await?.is_stored())
    }

    async fn record_withdraw(&self, withdraw: &WithdrawRecord) -> Result<bool> {
        let event = Event::new(
            event_type::WITHDRAW_COMPLETED,
            EventSource::Bot,
            EntityKind::Withdraw,
            withdraw.id.clone(),
            self.scope.clone(),
            dedup::withdraw_key(&self.scope.exchange, &withdraw.id),
            json!({
                "withdraw_id": withdraw.id,
                "asset": withdraw.asset,
                "amount": withdraw.amount.to_string(),
                "fee": withdraw.transaction_fee.to_string(),
                "status": withdraw.status,
                "apply_time": withdraw.apply_time,
                "source": "poller",
            }),
        )
        .at(parse_apply_time(&withdraw.apply_time));

        Ok(self.events.append(&event).await?.is_stored())
    }
}

/// Withdraw timestamps arrive as `YYYY-MM-DD HH:MM:SS`.
fn parse_apply_time(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl Poller for DepositWithdrawPoller {
    fn name(&self) -> &'static str {
        "deposit_withdraw"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, since: DateTime<Utc>) -> Result<u64> {
        let start = since.timestamp_millis();
        let end = Utc::now().timestamp_millis();

        let mut created = 0;

        for deposit in self.rest.deposit_history(start, end).await? {
            if deposit.status != DEPOSIT_CONFIRMED {
                continue;
            }
            if self.record_deposit(&deposit).await? {
                created += 1;
            }
        }

        for withdraw in self.rest.withdraw_history(start, end).await? {
            if withdraw.status != WITHDRAW_COMPLETED {
                continue;
            }
            if self.record_withdraw(&withdraw).await? {
                created += 1;
            }
        }

        Ok(created)
    }
}

// =============================================================================
// Tests
// =============================================================================
