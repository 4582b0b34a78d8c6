//! User-data frame → domain event mapping.
//!
//! Every mapped event carries its canonical dedup key, which is what makes
//! replay-on-reconnect safe. Amount fields are copied through as strings;
//! the mapper never does arithmetic beyond zero checks.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use aegis_connectors::models::{
    AccountUpdateFrame, MarginCallFrame, OrderTradeUpdateFrame, WsBalance, WsOrderUpdate,
    WsPosition,
};
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, Scope};
use aegis_strategy::{OrderEvent, TradeEvent};

fn ms_to_utc(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
}

fn parse_dec(raw: &str) -> Decimal {
    raw.parse().unwrap_or(Decimal::ZERO)
}

fn opt_dec(raw: &str) -> Option<Decimal> {
    let value = parse_dec(raw);
    (!value.is_zero()).then_some(value)
}

/// Maps stream frames into events and strategy callback values.
pub struct EventMapper {
    scope: Scope,
}

impl EventMapper {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    // =========================================================================
    // ACCOUNT_UPDATE
    // =========================================================================

    /// Balance + position events from an account-update frame.
    pub fn map_account_update(&self, frame: &AccountUpdateFrame) -> Vec<Event> {
        let mut events = Vec::new();

        for balance in &frame.data.balances {
            if let Some(event) =
                self.balance_changed(balance, frame.tx_time, frame.event_time, &frame.data.reason)
            {
                events.push(event);
            }
        }

        for position in &frame.data.positions {
            events.push(self.position_changed(
                position,
                frame.tx_time,
                frame.event_time,
                &frame.data.reason,
            ));
        }

        events
    }

    fn balance_changed(
        &self,
        balance: &WsBalance,
        tx_time: i64,
        event_time: i64,
        reason: &str,
    ) -> Option<Event> {
        // No-op balance rows are noise
        if parse_dec(&balance.balance_change).is_zero() {
            return None;
        }

        Some(Event::new(
            event_type::BALANCE_CHANGED,
            EventSource::Websocket,
            EntityKind::Balance,
            balance.asset.clone(),
            self.scope.clone(),
            dedup::balance_key(&self.scope.exchange, self.scope.venue, &balance.asset, tx_time),
            json!({
                "asset": balance.asset,
                "wallet_balance": balance.wallet_balance,
                "cross_wallet_balance": balance.cross_wallet_balance,
                "balance_change": balance.balance_change,
                "reason": reason,
                "transaction_time": tx_time,
                "event_time": event_time,
            }),
        )
        .at(ms_to_utc(tx_time)))
    }

    fn position_changed(
        &self,
        position: &WsPosition,
        tx_time: i64,
        event_time: i64,
        reason: &str,
    ) -> Event {
        Event::new(
            event_type::POSITION_CHANGED,
            EventSource::Websocket,
            EntityKind::Position,
            position.symbol.clone(),
            self.scope.with_symbol(&position.symbol),
            dedup::position_key(&self.scope.exchange, self.scope.venue, &position.symbol, tx_time),
            json!({
                "symbol": position.symbol,
                "position_amount": position.position_amount,
                "entry_price": position.entry_price,
                "accumulated_realized": position.accumulated_realized,
                "unrealized_pnl": position.unrealized_pnl,
                "margin_type": position.margin_type,
                "isolated_wallet": position.isolated_wallet,
                "position_side": position.position_side,
                "reason": reason,
                "transaction_time": tx_time,
                "event_time": event_time,
            }),
        )
        .at(ms_to_utc(tx_time))
    }

    // =========================================================================
    // ORDER_TRADE_UPDATE
    // =========================================================================

    /// Trade + order events from an order-trade-update frame.
    pub fn map_order_trade_update(&self, frame: &OrderTradeUpdateFrame) -> Vec<Event> {
        let mut events = Vec::new();
        let order = &frame.order;

        if order.symbol.is_empty() {
            return events;
        }

        // A TRADE execution with filled quantity is a fill
        if order.execution_type == "TRADE" && parse_dec(&order.last_filled_qty) > Decimal::ZERO {
            if let Some(event) = self.trade_executed(order) {
                events.push(event);
            }
        }

        if let Some(event) = self.order_event(order, frame.event_time) {
            events.push(event);
        }

        events
    }

    fn trade_executed(&self, order: &WsOrderUpdate) -> Option<Event> {
        if order.trade_id == 0 {
            return None;
        }
        let trade_id = order.trade_id.to_string();

        Some(Event::new(
            event_type::TRADE_EXECUTED,
            EventSource::Websocket,
            EntityKind::Trade,
            trade_id.clone(),
            self.scope.with_symbol(&order.symbol),
            dedup::trade_key(&self.scope.exchange, self.scope.venue, &order.symbol, &trade_id),
            json!({
                "exchange_trade_id": trade_id,
                "exchange_order_id": order.order_id.to_string(),
                "client_order_id": order.client_order_id,
                "symbol": order.symbol,
                "side": order.side,
                "qty": order.last_filled_qty,
                "price": order.last_price,
                "commission": order.commission,
                "commission_asset": order.commission_asset,
                "realized_pnl": order.realized_pnl,
                "trade_time": order.trade_time,
                "is_maker": order.is_maker,
            }),
        )
        .at(ms_to_utc(order.trade_time)))
    }

    fn order_event(&self, order: &WsOrderUpdate, update_time: i64) -> Option<Event> {
        let event_type_name = order_event_type(&order.order_status, &order.execution_type)?;
        let exchange_order_id = order.order_id.to_string();

        // OrderPlaced keys on the order id alone; status changes add
        // status + update time so reconnect replays stay unique per change
        let dedup_key = if event_type_name == event_type::ORDER_PLACED {
            dedup::order_key(&self.scope.exchange, self.scope.venue, &order.symbol, &exchange_order_id)
        } else {
            dedup::order_status_key(
                &self.scope.exchange,
                self.scope.venue,
                &order.symbol,
                &exchange_order_id,
                &order.order_status,
                update_time,
            )
        };

        Some(Event::new(
            event_type_name,
            EventSource::Websocket,
            EntityKind::Order,
            exchange_order_id.clone(),
            self.scope.with_symbol(&order.symbol),
            dedup_key,
            json!({
                "exchange_order_id": exchange_order_id,
                "client_order_id": order.client_order_id,
                "symbol": order.symbol,
                "side": order.side,
                "order_type": order.order_type,
                "order_status": order.order_status,
                "execution_type": order.execution_type,
                "time_in_force": order.time_in_force,
                "original_qty": order.original_qty,
                "executed_qty": order.cumulative_filled_qty,
                "price": order.price,
                "avg_price": order.avg_price,
                "stop_price": order.stop_price,
                "cumulative_quote_qty": order.cumulative_quote_qty,
                "reduce_only": order.reduce_only,
                "position_side": order.position_side,
                "order_time": order.trade_time,
                "update_time": update_time,
            }),
        )
        .at(ms_to_utc(update_time)))
    }

    // =========================================================================
    // MARGIN_CALL
    // =========================================================================

    /// Margin-call positions become auditable risk events.
    pub fn map_margin_call(&self, frame: &MarginCallFrame) -> Vec<Event> {
        frame
            .positions
            .iter()
            .map(|position| {
                Event::new(
                    event_type::RISK_GUARD_REJECTED,
                    EventSource::Websocket,
                    EntityKind::Position,
                    position.symbol.clone(),
                    self.scope.with_symbol(&position.symbol),
                    dedup::margin_call_key(
                        &self.scope.exchange,
                        self.scope.venue,
                        &position.symbol,
                        frame.event_time,
                    ),
                    json!({
                        "reason": "MARGIN_CALL",
                        "symbol": position.symbol,
                        "position_side": position.position_side,
                        "position_amount": position.position_amount,
                        "margin_type": position.margin_type,
                        "unrealized_pnl": position.unrealized_pnl,
                        "maintenance_margin": position.maintenance_margin,
                        "cross_wallet_balance": frame.cross_wallet_balance,
                        "event_time": frame.event_time,
                    }),
                )
                .at(ms_to_utc(frame.event_time))
            })
            .collect()
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    pub fn ws_connected(&self) -> Event {
        self.ws_lifecycle(event_type::WS_CONNECTED, "connected", None)
    }

    pub fn ws_disconnected(&self, reason: &str) -> Event {
        self.ws_lifecycle(event_type::WS_DISCONNECTED, "disconnected", Some(reason))
    }

    pub fn ws_reconnected(&self) -> Event {
        self.ws_lifecycle(event_type::WS_RECONNECTED, "reconnected", None)
    }

    fn ws_lifecycle(&self, event_type_name: &str, state: &str, reason: Option<&str>) -> Event {
        let now = Utc::now();
        let mut payload = json!({ "at": now.to_rfc3339() });
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }

        Event::new(
            event_type_name,
            EventSource::Bot,
            EntityKind::Engine,
            "websocket",
            self.scope.clone(),
            dedup::ws_key(&self.scope.exchange, state, now.timestamp_millis()),
            payload,
        )
    }

    // =========================================================================
    // Strategy callback values
    // =========================================================================

    /// Typed fill view for `on_trade`, when the frame carries one.
    pub fn strategy_trade_event(&self, frame: &OrderTradeUpdateFrame) -> Option<TradeEvent> {
        let order = &frame.order;
        if order.execution_type != "TRADE" || order.trade_id == 0 {
            return None;
        }
        let quantity = parse_dec(&order.last_filled_qty);
        if quantity.is_zero() {
            return None;
        }

        Some(TradeEvent {
            trade_id: order.trade_id.to_string(),
            order_id: order.order_id.to_string(),
            client_order_id: (!order.client_order_id.is_empty())
                .then(|| order.client_order_id.clone()),
            symbol: order.symbol.clone(),
            side: order.side.clone(),
            price: parse_dec(&order.last_price),
            quantity,
            realized_pnl: parse_dec(&order.realized_pnl),
            commission: parse_dec(&order.commission),
            commission_asset: order.commission_asset.clone().unwrap_or_default(),
            timestamp: ms_to_utc(order.trade_time),
        })
    }

    /// Typed order view for `on_order_update`.
    pub fn strategy_order_event(&self, frame: &OrderTradeUpdateFrame) -> Option<OrderEvent> {
        let order = &frame.order;
        if order.symbol.is_empty() {
            return None;
        }

        Some(OrderEvent {
            order_id: order.order_id.to_string(),
            client_order_id: (!order.client_order_id.is_empty())
                .then(|| order.client_order_id.clone()),
            symbol: order.symbol.clone(),
            status: order.order_status.clone(),
            order_type: order.order_type.clone(),
            side: order.side.clone(),
            price: opt_dec(&order.price),
            stop_price: opt_dec(&order.stop_price),
            original_qty: parse_dec(&order.original_qty),
            executed_qty: parse_dec(&order.cumulative_filled_qty),
            avg_price: parse_dec(&order.avg_price),
            reduce_only: order.reduce_only,
            timestamp: ms_to_utc(frame.event_time),
        })
    }
}

/// Order event type from (status, execution type); `None` means not an
/// event we record.
fn order_event_type(order_status: &str, execution_type: &str) -> Option<&'static str> {
    match (order_status, execution_type) {
        ("NEW", "NEW") => Some(event_type::ORDER_PLACED),
        ("CANCELED", _) | ("EXPIRED", _) => Some(event_type::ORDER_CANCELLED),
        ("REJECTED", _) => Some(event_type::ORDER_REJECTED),
        ("PARTIALLY_FILLED", _) | ("FILLED", _) => Some(event_type::ORDER_UPDATED),
        (_, "TRADE") | (_, "AMENDMENT") => Some(event_type::ORDER_UPDATED),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
