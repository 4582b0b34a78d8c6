//! Reconciliation poller.
//!
//! Hourly trigger with a 24 h cadence: each firing checks whether a day has
//! passed since the last reconcile, defers while any position is open (open
//! positions make ledger-vs-exchange comparison meaningless), and otherwise
//! runs the opening reconciler against the projected ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use aegis_projector::Projector;
use aegis_store::ConfigStore;

use crate::poller::Poller;
use crate::recovery::OpeningReconciler;
use crate::Result;

const TRIGGER_INTERVAL: Duration = Duration::from_secs(60 * 60);
const CADENCE_SECS: i64 = 24 * 60 * 60;

/// Config key tracking the last completed reconcile (distinct from the
/// harness's poll-time key, which tracks trigger firings).
const LAST_RECONCILE_KEY: &str = "poller_reconciliation_last_reconciliation";

/// Daily ledger-vs-exchange alignment behind an hourly gate.
pub struct ReconciliationPoller {
    reconciler: OpeningReconciler,
    projector: Arc<Projector>,
    config: ConfigStore,
}

impl ReconciliationPoller {
    pub fn new(reconciler: OpeningReconciler, projector: Arc<Projector>, config: ConfigStore) -> Self {
        Self {
            reconciler,
            projector,
            config,
        }
    }

    async fn last_reconcile(&self) -> Result<Option<DateTime<Utc>>> {
        let saved = self.config.get(LAST_RECONCILE_KEY).await?;
        Ok(saved
            .get("last_reconciliation")
            .and_then(|v| v.as_str())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc)))
    }

    async fn mark_reconciled(&self) -> Result<()> {
        self.config
            .set(
                LAST_RECONCILE_KEY,
                &json!({"last_reconciliation": Utc::now().to_rfc3339()}),
                "bot:poller",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Poller for ReconciliationPoller {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn interval(&self) -> Duration {
        TRIGGER_INTERVAL
    }

    async fn poll_once(&self, _since: DateTime<Utc>) -> Result<u64> {
        if let Some(last) = self.last_reconcile().await? {
            if (Utc::now() - last).num_seconds() < CADENCE_SECS {
                debug!("Reconcile cadence not reached, skipping");
                return Ok(0);
            }
        }

        if self.projector.any_position_open().await {
            info!("Position open, deferring reconcile");
            return Ok(0);
        }

        let ledger = self.projector.ledger_balances().await;
        let report = self.reconciler.reconcile(&ledger).await?;
        self.mark_reconciled().await?;

        Ok(report.adjusted_count as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_connectors::models::FuturesBalance;
    use aegis_connectors::StubExchange;
    use aegis_domain::{
        dedup, event_type, EntityKind, Event, EventSource, Scope, TradingMode, Venue,
    };
    use aegis_store::{sqlite, CheckpointStore, EventStore};
    use rust_decimal_macros::dec;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    async fn setup(stub: Arc<StubExchange>) -> (EventStore, Arc<Projector>, ReconciliationPoller) {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();

        let events = EventStore::new(pool.clone());
        let config = ConfigStore::new(pool.clone());
        let projector = Arc::new(Projector::new(
            events.clone(),
            CheckpointStore::new(pool.clone()),
            pool,
            scope(),
        ));
        let reconciler = OpeningReconciler::new(stub, events.clone(), scope());
        let poller = ReconciliationPoller::new(reconciler, projector.clone(), config);
        (events, projector, poller)
    }

    #[tokio::test]
    async fn reconciles_then_respects_cadence() {
        let stub = Arc::new(StubExchange::default());
        stub.set_futures_balances(vec![FuturesBalance {
            asset: "USDT".into(),
            wallet_balance: dec!(10),
            available_balance: dec!(10),
        }]);

        let (_events, _projector, poller) = setup(stub).await;

        assert_eq!(poller.poll_once(Utc::now()).await.unwrap(), 1);
        // Second trigger inside the 24 h cadence does nothing
        assert_eq!(poller.poll_once(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn defers_while_position_open() {
        let stub = Arc::new(StubExchange::default());
        stub.set_futures_balances(vec![FuturesBalance {
            asset: "USDT".into(),
            wallet_balance: dec!(10),
            available_balance: dec!(10),
        }]);

        let (events, projector, poller) = setup(stub).await;

        let open = Event::new(
            event_type::POSITION_CHANGED,
            EventSource::Websocket,
            EntityKind::Position,
            "XRPUSDT",
            scope(),
            dedup::position_key("BINANCE", Venue::Futures, "XRPUSDT", 1),
            serde_json::json!({"symbol": "XRPUSDT", "position_amount": "10", "entry_price": "0.5"}),
        );
        events.append(&open).await.unwrap();
        projector.apply_pending().await.unwrap();

        assert_eq!(poller.poll_once(Utc::now()).await.unwrap(), 0);

        // Flatten; next trigger reconciles
        let flat = Event::new(
            event_type::POSITION_CHANGED,
            EventSource::Websocket,
            EntityKind::Position,
            "XRPUSDT",
            scope(),
            dedup::position_key("BINANCE", Venue::Futures, "XRPUSDT", 2),
            serde_json::json!({"symbol": "XRPUSDT", "position_amount": "0"}),
        );
        events.append(&flat).await.unwrap();
        projector.apply_pending().await.unwrap();

        assert!(poller.poll_once(Utc::now()).await.unwrap() >= 1);
    }
}
