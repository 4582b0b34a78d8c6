//! Event fold: one event mutates the in-memory projection state.
//!
//! Replay-safe by construction: the caller only feeds events past the
//! checkpoint, and the store already deduplicates, so each fact is folded
//! exactly once.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use aegis_domain::{event_type, Event, Venue};

use crate::types::{BalanceView, OpenOrderView, PositionView};

#[derive(Debug, Default)]
pub(crate) struct ProjectionState {
    pub balances: HashMap<(Venue, String), BalanceView>,
    pub positions: HashMap<String, PositionView>,
    pub open_orders: HashMap<String, OpenOrderView>,
    pub last_seq: i64,
}

/// Read a decimal field out of a payload; absent or malformed reads as zero.
fn dec(payload: &serde_json::Value, key: &str) -> Decimal {
    match payload.get(key) {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(Decimal::ZERO),
        Some(serde_json::Value::Number(n)) => {
            n.to_string().parse().unwrap_or(Decimal::ZERO)
        }
        _ => Decimal::ZERO,
    }
}

fn text<'a>(payload: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}

fn opt_dec(payload: &serde_json::Value, key: &str) -> Option<Decimal> {
    match payload.get(key) {
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        Some(serde_json::Value::Number(n)) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn add_balance(state: &mut ProjectionState, venue: Venue, asset: &str, delta: Decimal) {
    if delta.is_zero() {
        return;
    }
    let entry = state
        .balances
        .entry((venue, asset.to_string()))
        .or_insert_with(|| BalanceView {
            venue,
            asset: asset.to_string(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        });
    entry.free += delta;
}

fn set_balance(state: &mut ProjectionState, venue: Venue, asset: &str, free: Decimal) {
    state.balances.insert(
        (venue, asset.to_string()),
        BalanceView {
            venue,
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        },
    );
}

/// Fold one event. Unknown or projection-irrelevant types are no-ops.
pub(crate) fn apply_event(state: &mut ProjectionState, event: &Event) {
    let payload = &event.payload;

    match event.event_type.as_str() {
        event_type::BALANCE_CHANGED => {
            let asset = text(payload, "asset").unwrap_or(&event.entity_id);
            add_balance(state, event.scope.venue, asset, dec(payload, "balance_change"));
        }

        event_type::POSITION_CHANGED => {
            let symbol = text(payload, "symbol").unwrap_or(&event.entity_id).to_string();
            let amount = dec(payload, "position_amount");

            if amount.is_zero() {
                state.positions.remove(&symbol);
                return;
            }

            let side = if amount > Decimal::ZERO { "LONG" } else { "SHORT" };
            state.positions.insert(
                symbol.clone(),
                PositionView {
                    symbol,
                    side: Some(side.to_string()),
                    qty: amount.abs(),
                    entry_price: dec(payload, "entry_price"),
                    unrealized_pnl: dec(payload, "unrealized_pnl"),
                    leverage: payload
                        .get("leverage")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(1) as u32,
                    margin_type: text(payload, "margin_type").unwrap_or("cross").to_string(),
                },
            );
        }

        event_type::ORDER_PLACED => {
            let order_id = text(payload, "exchange_order_id")
                .unwrap_or(&event.entity_id)
                .to_string();
            state.open_orders.insert(
                order_id.clone(),
                OpenOrderView {
                    exchange_order_id: order_id,
                    client_order_id: text(payload, "client_order_id").map(str::to_string),
                    symbol: text(payload, "symbol").unwrap_or_default().to_string(),
                    side: text(payload, "side").unwrap_or_default().to_string(),
                    order_type: text(payload, "order_type").unwrap_or_default().to_string(),
                    original_qty: dec(payload, "original_qty"),
                    executed_qty: Decimal::ZERO,
                    price: opt_dec(payload, "price"),
                    stop_price: opt_dec(payload, "stop_price"),
                    status: "NEW".to_string(),
                },
            );
        }

        event_type::ORDER_UPDATED => {
            let order_id = text(payload, "exchange_order_id").unwrap_or(&event.entity_id);
            let status = text(payload, "order_status").unwrap_or("").to_string();

            if status == "FILLED" {
                state.open_orders.remove(order_id);
            } else if let Some(order) = state.open_orders.get_mut(order_id) {
                order.executed_qty = dec(payload, "executed_qty");
                order.status = status;
            }
        }

        event_type::ORDER_CANCELLED | event_type::ORDER_REJECTED => {
            let order_id = text(payload, "exchange_order_id").unwrap_or(&event.entity_id);
            state.open_orders.remove(order_id);
        }

        event_type::TRADE_EXECUTED => {
            // Realized PnL settles into the futures quote balance; commission
            // only nets out when it was charged in the same asset.
            let pnl = dec(payload, "realized_pnl");
            add_balance(state, Venue::Futures, "USDT", pnl);

            if text(payload, "commission_asset") == Some("USDT") {
                add_balance(state, Venue::Futures, "USDT", -dec(payload, "commission"));
            }
        }

        event_type::FUNDING_APPLIED => {
            let asset = text(payload, "asset").unwrap_or("USDT");
            add_balance(state, Venue::Futures, asset, dec(payload, "funding_fee"));
        }

        event_type::COMMISSION_REBATE_RECEIVED => {
            let asset = text(payload, "asset").unwrap_or("USDT");
            add_balance(state, Venue::Futures, asset, dec(payload, "rebate_amount"));
        }

        event_type::INTERNAL_TRANSFER_COMPLETED => {
            let asset = text(payload, "asset").unwrap_or("USDT").to_string();
            let amount = dec(payload, "amount");
            // MAIN_UMFUTURE moves spot -> futures; the reverse moves back
            let (from, to) = match text(payload, "transfer_type") {
                Some("UMFUTURE_MAIN") => (Venue::Futures, Venue::Spot),
                _ => (Venue::Spot, Venue::Futures),
            };
            add_balance(state, from, &asset, -amount);
            add_balance(state, to, &asset, amount);
        }

        event_type::DEPOSIT_DETECTED | event_type::DEPOSIT_COMPLETED => {
            let asset = text(payload, "asset").unwrap_or(&event.entity_id);
            add_balance(state, Venue::Spot, asset, dec(payload, "amount"));
        }

        event_type::WITHDRAW_COMPLETED => {
            let asset = text(payload, "asset").unwrap_or(&event.entity_id);
            let total = dec(payload, "amount") + dec(payload, "fee");
            add_balance(state, Venue::Spot, asset, -total);
        }

        event_type::CONVERT_EXECUTED => {
            let from_asset = text(payload, "from_asset").unwrap_or_default().to_string();
            let to_asset = text(payload, "to_asset").unwrap_or_default().to_string();
            add_balance(state, Venue::Spot, &from_asset, -dec(payload, "from_amount"));
            add_balance(state, Venue::Spot, &to_asset, dec(payload, "to_amount"));
        }

        event_type::DUST_CONVERTED => {
            let from_asset = text(payload, "from_asset").unwrap_or_default().to_string();
            add_balance(state, Venue::Spot, &from_asset, -dec(payload, "amount"));
            add_balance(state, Venue::Spot, "BNB", dec(payload, "transfered_amount"));
        }

        event_type::INITIAL_CAPITAL_ESTABLISHED => {
            set_balance(state, Venue::Spot, "USDT", dec(payload, "spot_usdt"));
            set_balance(state, Venue::Futures, "USDT", dec(payload, "futures_usdt"));
        }

        event_type::OPENING_BALANCE_ADJUSTED => {
            let venue = text(payload, "venue")
                .and_then(|v| v.parse::<Venue>().ok())
                .unwrap_or(event.scope.venue);
            let asset = text(payload, "asset").unwrap_or("USDT");
            add_balance(state, venue, asset, dec(payload, "adjustment_amount"));
        }

        other => {
            debug!(event_type = other, "Event not projected");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{EntityKind, EventSource, Scope, TradingMode};
    use rust_decimal_macros::dec as d;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    fn event(event_type: &str, entity_kind: EntityKind, entity_id: &str, payload: serde_json::Value) -> Event {
        Event::new(
            event_type,
            EventSource::Websocket,
            entity_kind,
            entity_id,
            scope(),
            format!("test:{entity_id}:{event_type}"),
            payload,
        )
    }

    #[test]
    fn balance_changes_accumulate() {
        let mut state = ProjectionState::default();

        apply_event(&mut state, &event(
            event_type::BALANCE_CHANGED,
            EntityKind::Balance,
            "USDT",
            json!({"asset": "USDT", "balance_change": "10.5"}),
        ));
        apply_event(&mut state, &event(
            event_type::BALANCE_CHANGED,
            EntityKind::Balance,
            "USDT",
            json!({"asset": "USDT", "balance_change": "-0.5"}),
        ));

        let balance = &state.balances[&(Venue::Futures, "USDT".to_string())];
        assert_eq!(balance.free, d!(10));
    }

    #[test]
    fn position_snapshot_replaces_and_clears() {
        let mut state = ProjectionState::default();

        apply_event(&mut state, &event(
            event_type::POSITION_CHANGED,
            EntityKind::Position,
            "XRPUSDT",
            json!({"symbol": "XRPUSDT", "position_amount": "-25", "entry_price": "0.52",
                   "unrealized_pnl": "-0.1", "margin_type": "isolated"}),
        ));

        let position = &state.positions["XRPUSDT"];
        assert_eq!(position.side.as_deref(), Some("SHORT"));
        assert_eq!(position.qty, d!(25));

        apply_event(&mut state, &event(
            event_type::POSITION_CHANGED,
            EntityKind::Position,
            "XRPUSDT",
            json!({"symbol": "XRPUSDT", "position_amount": "0"}),
        ));
        assert!(state.positions.is_empty());
    }

    #[test]
    fn order_lifecycle_tracks_open_orders() {
        let mut state = ProjectionState::default();

        apply_event(&mut state, &event(
            event_type::ORDER_PLACED,
            EntityKind::Order,
            "123",
            json!({"exchange_order_id": "123", "symbol": "XRPUSDT", "side": "BUY",
                   "order_type": "LIMIT", "original_qty": "10", "price": "0.50"}),
        ));
        assert_eq!(state.open_orders.len(), 1);

        apply_event(&mut state, &event(
            event_type::ORDER_UPDATED,
            EntityKind::Order,
            "123",
            json!({"exchange_order_id": "123", "order_status": "PARTIALLY_FILLED",
                   "executed_qty": "4"}),
        ));
        assert_eq!(state.open_orders["123"].executed_qty, d!(4));

        apply_event(&mut state, &event(
            event_type::ORDER_UPDATED,
            EntityKind::Order,
            "123",
            json!({"exchange_order_id": "123", "order_status": "FILLED", "executed_qty": "10"}),
        ));
        assert!(state.open_orders.is_empty());
    }

    #[test]
    fn ledger_folds_transfers_and_capital() {
        let mut state = ProjectionState::default();

        apply_event(&mut state, &event(
            event_type::INITIAL_CAPITAL_ESTABLISHED,
            EntityKind::Capital,
            "initial",
            json!({"spot_usdt": "100", "futures_usdt": "400"}),
        ));
        apply_event(&mut state, &event(
            event_type::INTERNAL_TRANSFER_COMPLETED,
            EntityKind::Transfer,
            "t1",
            json!({"asset": "USDT", "amount": "50", "transfer_type": "MAIN_UMFUTURE"}),
        ));

        assert_eq!(state.balances[&(Venue::Spot, "USDT".into())].free, d!(50));
        assert_eq!(state.balances[&(Venue::Futures, "USDT".into())].free, d!(450));
    }

    #[test]
    fn trade_settles_pnl_and_usdt_commission() {
        let mut state = ProjectionState::default();

        apply_event(&mut state, &event(
            event_type::TRADE_EXECUTED,
            EntityKind::Trade,
            "777",
            json!({"realized_pnl": "2.00", "commission": "0.25", "commission_asset": "USDT"}),
        ));

        assert_eq!(state.balances[&(Venue::Futures, "USDT".into())].free, d!(1.75));
    }
}
