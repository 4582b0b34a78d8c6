//! Initial capital recorder.
//!
//! First run only: fetches daily account snapshots for SPOT and FUTURES,
//! locates the USDT balances, and records one `InitialCapitalEstablished`
//! event dated at the snapshot's UTC midnight — anything backfilled later
//! sorts after it, so the ledger never goes negative. Guarded by the
//! `initial_capital.initialized` config flag and the event's dedup key.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_store::{config_key, ConfigStore, EventStore};

use crate::Result;

/// Summary written to the `initial_capital` config entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialCapitalSummary {
    #[serde(rename = "USDT")]
    pub total_usdt: String,
    #[serde(rename = "SPOT_USDT")]
    pub spot_usdt: String,
    #[serde(rename = "FUTURES_USDT")]
    pub futures_usdt: String,
    pub epoch_date: String,
    pub initialized: bool,
    pub recorded_at: String,
}

struct SnapshotTotals {
    spot_usdt: Decimal,
    futures_usdt: Decimal,
    snapshot_date: NaiveDate,
}

/// Records the starting capital once per mode.
pub struct InitialCapitalRecorder {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    config: ConfigStore,
    scope: Scope,
}

impl InitialCapitalRecorder {
    pub fn new(
        rest: Arc<dyn ExchangeRest>,
        events: EventStore,
        config: ConfigStore,
        scope: Scope,
    ) -> Self {
        Self {
            rest,
            events,
            config,
            scope,
        }
    }

    /// Whether capital was already recorded.
    pub async fn is_initialized(&self) -> Result<bool> {
        let entry = self.config.get(config_key::INITIAL_CAPITAL).await?;
        Ok(entry
            .get("initialized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Record initial capital. Re-running returns the existing summary.
    pub async fn record(&self, target_date: Option<DateTime<Utc>>) -> Result<InitialCapitalSummary> {
        if self.is_initialized().await? {
            info!("Initial capital already recorded, skipping");
            let entry = self.config.get(config_key::INITIAL_CAPITAL).await?;
            return Ok(serde_json::from_value(entry).map_err(aegis_store::StoreError::from)?);
        }

        info!("Recording initial capital");
        let target = target_date.unwrap_or_else(Utc::now);
        let totals = self.fetch_snapshots(target).await?;

        let summary = InitialCapitalSummary {
            total_usdt: (totals.spot_usdt + totals.futures_usdt).to_string(),
            spot_usdt: totals.spot_usdt.to_string(),
            futures_usdt: totals.futures_usdt.to_string(),
            epoch_date: totals.snapshot_date.to_string(),
            initialized: true,
            recorded_at: Utc::now().to_rfc3339(),
        };

        self.config
            .set_from(config_key::INITIAL_CAPITAL, &summary, "bot:recovery")
            .await?;

        self.append_event(&totals).await?;

        info!(
            total = %summary.total_usdt,
            spot = %summary.spot_usdt,
            futures = %summary.futures_usdt,
            snapshot_date = %summary.epoch_date,
            "Initial capital recorded"
        );

        Ok(summary)
    }

    async fn fetch_snapshots(&self, target: DateTime<Utc>) -> Result<SnapshotTotals> {
        let start = (target - Duration::days(3)).timestamp_millis();
        let end = (target + Duration::days(1)).timestamp_millis();

        let mut spot_usdt = Decimal::ZERO;
        let mut futures_usdt = Decimal::ZERO;
        let mut snapshot_date = target.date_naive();

        match self.rest.account_snapshot("SPOT", start, end, 7).await {
            Ok(snapshot) if snapshot.code == 200 => {
                if let Some(vo) = snapshot.snapshot_vos.first() {
                    for balance in &vo.data.balances {
                        if balance.asset == "USDT" {
                            spot_usdt = balance.free + balance.locked;
                            break;
                        }
                    }
                    if vo.update_time > 0 {
                        snapshot_date = Utc
                            .timestamp_millis_opt(vo.update_time)
                            .single()
                            .map(|dt| dt.date_naive())
                            .unwrap_or(snapshot_date);
                    }
                }
            }
            Ok(snapshot) => warn!(code = snapshot.code, msg = %snapshot.msg, "SPOT snapshot rejected"),
            Err(e) => warn!(error = %e, "SPOT snapshot fetch failed"),
        }

        match self.rest.account_snapshot("FUTURES", start, end, 7).await {
            Ok(snapshot) if snapshot.code == 200 => {
                if let Some(vo) = snapshot.snapshot_vos.first() {
                    for asset in &vo.data.assets {
                        if asset.asset == "USDT" {
                            futures_usdt = asset.wallet_balance;
                            break;
                        }
                    }
                }
            }
            Ok(snapshot) => warn!(code = snapshot.code, msg = %snapshot.msg, "FUTURES snapshot rejected"),
            Err(e) => warn!(error = %e, "FUTURES snapshot fetch failed"),
        }

        Ok(SnapshotTotals {
            spot_usdt,
            futures_usdt,
            snapshot_date,
        })
    }

    async fn append_event(&self, totals: &SnapshotTotals) -> Result<()> {
        let date = totals.snapshot_date;
        // Midnight timestamp keeps this fact chronologically ahead of every
        // backfilled transaction from the same day onward
        let midnight = Utc
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let event = Event::new(
            event_type::INITIAL_CAPITAL_ESTABLISHED,
            EventSource::Bot,
            EntityKind::Capital,
            format!("initial_{}", self.scope.mode),
            self.scope.clone(),
            dedup::initial_capital_key(self.scope.mode, &date.to_string()),
            json!({
                "spot_usdt": totals.spot_usdt.to_string(),
                "futures_usdt": totals.futures_usdt.to_string(),
                "total_usdt": (totals.spot_usdt + totals.futures_usdt).to_string(),
                "snapshot_date": date.to_string(),
                "method": "daily_snapshot",
                "confidence": "exact",
            }),
        )
        .at(midnight);

        if self.events.append(&event).await?.is_stored() {
            info!(event_id = %event.event_id, "InitialCapitalEstablished stored");
        } else {
            info!("InitialCapitalEstablished already present (duplicate)");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
