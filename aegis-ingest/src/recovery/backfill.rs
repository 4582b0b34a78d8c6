//! Historical backfill.
//!
//! Runs once, after initial capital is recorded. Walks income, transfers,
//! converts, deposits, withdrawals, and the dust log over a bounded window
//! (default 20 days, or from the capital snapshot's `epoch_date`). Each
//! record becomes an event with its canonical dedup key and its original
//! timestamp, so replays are no-ops and chronology is preserved.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tracing::{info, warn};

use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::EventStore;

use crate::Result;

/// Default lookback when no epoch date exists.
const DEFAULT_BACKFILL_DAYS: i64 = 20;

const PAGE_SIZE: u32 = 100;
const INCOME_LIMIT: u32 = 1000;

/// Per-family backfill counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub income: u64,
    pub transfers: u64,
    pub converts: u64,
    pub deposits: u64,
    pub withdrawals: u64,
    pub dust: u64,
}

impl BackfillReport {
    pub fn total(&self) -> u64 {
        self.income + self.transfers + self.converts + self.deposits + self.withdrawals + self.dust
    }
}

/// Bounded-window historical ingest.
pub struct HistoricalBackfill {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
    max_days: i64,
}

impl HistoricalBackfill {
    pub fn new(rest: Arc<dyn ExchangeRest>, events: EventStore, scope: Scope) -> Self {
        Self {
            rest,
            events,
            scope,
            max_days: DEFAULT_BACKFILL_DAYS,
        }
    }

    pub fn with_max_days(mut self, max_days: i64) -> Self {
        self.max_days = max_days;
        self
    }

    /// Backfill from `epoch_date` (UTC midnight) or the default window.
    pub async fn backfill(&self, epoch_date: Option<NaiveDate>) -> Result<BackfillReport> {
        let now = Utc::now();
        let start = match epoch_date {
            Some(date) => Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
                .single()
                .unwrap_or(now - Duration::days(self.max_days)),
            None => now - Duration::days(self.max_days),
        };

        info!(start = %start, "Historical backfill started");

        let start_ms = start.timestamp_millis();
        let end_ms = now.timestamp_millis();

        let income = self.backfill_income(start_ms, end_ms).await;
        let transfers = self.backfill_transfers(start_ms, end_ms).await;
        let converts = self.backfill_converts(start_ms, end_ms).await;
        let (deposits, withdrawals) = self.backfill_deposit_withdraw(start_ms, end_ms).await;
        let dust = self.backfill_dust(start_ms, end_ms).await;

        let report = BackfillReport {
            income,
            transfers,
            converts,
            deposits,
            withdrawals,
            dust,
        };

        info!(
            income = report.income,
            transfers = report.transfers,
            converts = report.converts,
            deposits = report.deposits,
            withdrawals = report.withdrawals,
            dust = report.dust,
            "Historical backfill complete"
        );
        Ok(report)
    }

    async fn append(&self, event: &Event) -> bool {
        match self.events.append(event).await {
            Ok(outcome) => outcome.is_stored(),
            Err(e) => {
                warn!(error = %e, dedup_key = %event.dedup_key, "Backfill append failed");
                false
            }
        }
    }

    fn original_ts(ts_ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
    }

    async fn backfill_income(&self, start_ms: i64, end_ms: i64) -> u64 {
        let records = match self.rest.income_history(start_ms, end_ms, INCOME_LIMIT).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Income backfill fetch failed");
                return 0;
            }
        };

        let mut created = 0;
        for record in &records {
            let event = match record.income_type.as_str() {
                "FUNDING_FEE" => Event::new(
                    event_type::FUNDING_APPLIED,
                    EventSource::Bot,
                    EntityKind::Funding,
                    record.tran_id.to_string(),
                    self.scope.clone(),
                    dedup::funding_key(&self.scope.exchange, &record.symbol, record.time),
                    json!({
                        "symbol": record.symbol,
                        "funding_fee": record.income.to_string(),
                        "asset": record.asset,
                        "tran_id": record.tran_id.to_string(),
                        "time": record.time,
                        "source": "backfill",
                    }),
                ),
                "COMMISSION_REBATE" => Event::new(
                    event_type::COMMISSION_REBATE_RECEIVED,
                    EventSource::Bot,
                    EntityKind::Rebate,
                    record.tran_id.to_string(),
                    self.scope.clone(),
                    dedup::rebate_key(&self.scope.exchange, &record.tran_id.to_string()),
                    json!({
                        "symbol": record.symbol,
                        "rebate_amount": record.income.to_string(),
                        "asset": record.asset,
                        "tran_id": record.tran_id.to_string(),
                        "time": record.time,
                        "source": "backfill",
                    }),
                ),
                _ => continue,
            };

            if self.append(&event.at(Self::original_ts(record.time))).await {
                created += 1;
            }
        }
        created
    }

    async fn backfill_transfers(&self, start_ms: i64, end_ms: i64) -> u64 {
        let mut created = 0;

        for direction in ["MAIN_UMFUTURE", "UMFUTURE_MAIN"] {
            let mut page = 1u32;
            loop {
                let result = match self
                    .rest
                    .transfer_history(direction, start_ms, end_ms, page, PAGE_SIZE)
                    .await
                {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, direction, "Transfer backfill fetch failed");
                        break;
                    }
                };

                for transfer in &result.rows {
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
                            "source": "backfill",
                        }),
                    )
                    .at(Self::original_ts(transfer.timestamp));

                    if self.append(&event).await {
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
        created
    }

    async fn backfill_converts(&self, start_ms: i64, end_ms: i64) -> u64 {
        let records = match self.rest.convert_history(start_ms, end_ms).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Convert backfill fetch failed");
                return 0;
            }
        };

        let mut created = 0;
        for convert in &records {
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
                    "source": "backfill",
                }),
            )
            .at(Self::original_ts(convert.create_time));

            if self.append(&event).await {
                created += 1;
            }
        }
        created
    }

    async fn backfill_deposit_withdraw(&self, start_ms: i64, end_ms: i64) -> (u64, u64) {
        let mut deposits = 0;
        let mut withdrawals = 0;

        match self.rest.deposit_history(start_ms, end_ms).await {
            Ok(records) => {
                for deposit in records.iter().filter(|d| d.status == 1) {
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
                            "source": "backfill",
                        }),
                    )
                    .at(Self::original_ts(deposit.insert_time));

                    if self.append(&event).await {
                        deposits += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Deposit backfill fetch failed"),
        }

        match self.rest.withdraw_history(start_ms, end_ms).await {
            Ok(records) => {
                for withdraw in records.iter().filter(|w| w.status == 6) {
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
                            "source": "backfill",
                        }),
                    );

                    if self.append(&event).await {
                        withdrawals += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Withdraw backfill fetch failed"),
        }

        (deposits, withdrawals)
    }

    async fn backfill_dust(&self, start_ms: i64, end_ms: i64) -> u64 {
        let records = match self.rest.dust_log(start_ms, end_ms).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Dust backfill fetch failed");
                return 0;
            }
        };

        let mut created = 0;
        for dust in &records {
            let event = Event::new(
                event_type::DUST_CONVERTED,
                EventSource::Bot,
                EntityKind::Dust,
                dust.trans_id.to_string(),
                self.scope.clone(),
                dedup::dust_key(&self.scope.exchange, &dust.trans_id.to_string()),
                json!({
                    "trans_id": dust.trans_id.to_string(),
                    "from_asset": dust.from_asset,
                    "amount": dust.amount.to_string(),
                    "transfered_amount": dust.transfered_amount.to_string(),
                    "service_charge_amount": dust.service_charge_amount.to_string(),
                    "operate_time": dust.operate_time,
                    "source": "backfill",
                }),
            )
            .at(Self::original_ts(dust.operate_time));

            if self.append(&event).await {
                created += 1;
            }
        }
        created
    }
}

// =============================================================================
// Tests
// =============================================================================
