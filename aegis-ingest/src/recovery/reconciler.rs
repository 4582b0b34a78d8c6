//! Opening balance reconciler.
//!
//! Compares the ledger's projected balances against the exchange's live
//! balances per `(venue, asset)` and emits an `OpeningBalanceAdjusted` event
//! for every difference above the threshold. Sub-threshold drift is skipped
//! on purpose so dust never spams the log.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info};

use aegis_connectors::ExchangeRest;
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope, Venue};
use aegis_store::EventStore;

use crate::Result;

/// Differences at or below this are ignored.
const ADJUSTMENT_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 4); // 0.0001

/// One applied adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub venue: Venue,
    pub asset: String,
    pub ledger: Decimal,
    pub exchange: Decimal,
    pub diff: Decimal,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub adjusted_count: usize,
    pub skipped_count: usize,
    pub adjustments: Vec<Adjustment>,
}

/// Ledger-vs-exchange alignment.
pub struct OpeningReconciler {
    rest: Arc<dyn ExchangeRest>,
    events: EventStore,
    scope: Scope,
}

impl OpeningReconciler {
    pub fn new(rest: Arc<dyn ExchangeRest>, events: EventStore, scope: Scope) -> Self {
        Self {
            rest,
            events,
            scope,
        }
    }

    /// Compare `ledger` to live exchange balances and emit adjustments.
    pub async fn reconcile(
        &self,
        ledger: &HashMap<Venue, HashMap<String, Decimal>>,
    ) -> Result<ReconcileReport> {
        info!("Opening balance reconcile started");

        let exchange = self.fetch_exchange_balances().await;
        let mut report = ReconcileReport::default();

        // Union of every (venue, asset) either side knows about
        let mut keys: BTreeSet<(Venue, String)> = BTreeSet::new();
        for venue in [Venue::Futures, Venue::Spot] {
            for source in [ledger.get(&venue), exchange.get(&venue)].into_iter().flatten() {
                for asset in source.keys() {
                    keys.insert((venue, asset.clone()));
                }
            }
        }

        for (venue, asset) in keys {
            let ledger_amount = ledger
                .get(&venue)
                .and_then(|assets| assets.get(&asset))
                .copied()
                .unwrap_or(Decimal::ZERO);
            let exchange_amount = exchange
                .get(&venue)
                .and_then(|assets| assets.get(&asset))
                .copied()
                .unwrap_or(Decimal::ZERO);

            let diff = exchange_amount - ledger_amount;
            if diff.is_zero() {
                continue;
            }
            if diff.abs() < ADJUSTMENT_THRESHOLD {
                report.skipped_count += 1;
                continue;
            }

            let adjustment = Adjustment {
                venue,
                asset: asset.clone(),
                ledger: ledger_amount,
                exchange: exchange_amount,
                diff,
            };

            if self.append_adjustment(&adjustment).await? {
                report.adjusted_count += 1;
                report.adjustments.push(adjustment);
            }
        }

        info!(
            adjusted = report.adjusted_count,
            skipped = report.skipped_count,
            "Opening balance reconcile complete"
        );
        Ok(report)
    }

    async fn fetch_exchange_balances(&self) -> HashMap<Venue, HashMap<String, Decimal>> {
        let mut result: HashMap<Venue, HashMap<String, Decimal>> = HashMap::new();

        match self.rest.futures_balances().await {
            Ok(balances) => {
                let futures = result.entry(Venue::Futures).or_default();
                for balance in balances {
                    if balance.wallet_balance > Decimal::ZERO {
                        futures.insert(balance.asset, balance.wallet_balance);
                    }
                }
            }
            Err(e) => error!(error = %e, "FUTURES balance fetch failed"),
        }

        match self.rest.spot_balances().await {
            Ok(balances) => {
                let spot = result.entry(Venue::Spot).or_default();
                for balance in balances {
                    let total = balance.free + balance.locked;
                    if total > Decimal::ZERO {
                        spot.insert(balance.asset, total);
                    }
                }
            }
            Err(e) => error!(error = %e, "SPOT balance fetch failed"),
        }

        result
    }

    async fn append_adjustment(&self, adjustment: &Adjustment) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let adjustment_type = if adjustment.diff > Decimal::ZERO {
            "INCREASE"
        } else {
            "DECREASE"
        };

        let event = Event::new(
            event_type::OPENING_BALANCE_ADJUSTED,
            EventSource::Bot,
            EntityKind::Reconciliation,
            format!("opening_{}_{}", adjustment.venue, adjustment.asset),
            self.scope.for_venue(adjustment.venue),
            dedup::opening_adjustment_key(self.scope.mode, adjustment.venue, &adjustment.asset, now_ms),
            json!({
                "venue": adjustment.venue.as_str(),
                "asset": adjustment.asset,
                "ledger_balance": adjustment.ledger.to_string(),
                "exchange_balance": adjustment.exchange.to_string(),
                "adjustment_amount": adjustment.diff.to_string(),
                "adjustment_type": adjustment_type,
                "reason": "opening_balance_reconciliation",
            }),
        );

        let stored = self.events.append(&event).await?.is_stored();
        if stored {
            info!(
                venue = adjustment.venue.as_str(),
                asset = %adjustment.asset,
                diff = %adjustment.diff,
                "Opening balance adjusted"
            );
        }
        Ok(stored)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_connectors::models::{FuturesBalance, SpotBalance};
    use aegis_connectors::StubExchange;
    use aegis_domain::TradingMode;
    use aegis_store::sqlite;
    use rust_decimal_macros::dec;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", None, TradingMode::Production)
    }

    async fn reconciler(stub: Arc<StubExchange>) -> (EventStore, OpeningReconciler) {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool);
        let reconciler = OpeningReconciler::new(stub, events.clone(), scope());
        (events, reconciler)
    }

    #[tokio::test]
    async fn small_drift_is_skipped_and_large_drift_adjusted() {
        let stub = Arc::new(StubExchange::default());
        stub.set_futures_balances(vec![FuturesBalance {
            asset: "USDT".into(),
            wallet_balance: dec!(673.52),
            available_balance: dec!(673.52),
        }]);
        stub.set_spot_balances(vec![SpotBalance {
            asset: "USDT".into(),
            free: dec!(0.47003),
            locked: dec!(0),
        }]);

        let (events, reconciler) = reconciler(stub).await;

        let mut ledger: HashMap<Venue, HashMap<String, Decimal>> = HashMap::new();
        ledger.entry(Venue::Futures).or_default().insert("USDT".into(), dec!(670.00));
        ledger.entry(Venue::Spot).or_default().insert("USDT".into(), dec!(0.47));

        let report = reconciler.reconcile(&ledger).await.unwrap();

        assert_eq!(report.adjusted_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.adjustments[0].venue, Venue::Futures);
        assert_eq!(report.adjustments[0].diff, dec!(3.52));

        let adjusted = events
            .get_by_type(event_type::OPENING_BALANCE_ADJUSTED, 10)
            .await
            .unwrap();
        assert_eq!(adjusted.len(), 1);
        assert_eq!(adjusted[0].payload["adjustment_amount"], "3.52");
        assert_eq!(adjusted[0].payload["adjustment_type"], "INCREASE");
        assert_eq!(adjusted[0].payload["venue"], "FUTURES");
    }

    #[tokio::test]
    async fn matching_books_emit_nothing() {
        let stub = Arc::new(StubExchange::default());
        stub.set_futures_balances(vec![FuturesBalance {
            asset: "USDT".into(),
            wallet_balance: dec!(500),
            available_balance: dec!(500),
        }]);

        let (events, reconciler) = reconciler(stub).await;

        let mut ledger: HashMap<Venue, HashMap<String, Decimal>> = HashMap::new();
        ledger.entry(Venue::Futures).or_default().insert("USDT".into(), dec!(500));

        let report = reconciler.reconcile(&ledger).await.unwrap();
        assert_eq!(report.adjusted_count, 0);
        assert_eq!(report.skipped_count, 0);
        assert_eq!(events.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exchange_only_assets_are_adjusted_in() {
        let stub = Arc::new(StubExchange::default());
        stub.set_spot_balances(vec![SpotBalance {
            asset: "BNB".into(),
            free: dec!(0.5),
            locked: dec!(0),
        }]);

        let (_events, reconciler) = reconciler(stub).await;
        let report = reconciler.reconcile(&HashMap::new()).await.unwrap();

        assert_eq!(report.adjusted_count, 1);
        assert_eq!(report.adjustments[0].asset, "BNB");
        assert_eq!(report.adjustments[0].diff, dec!(0.5));
    }
}
