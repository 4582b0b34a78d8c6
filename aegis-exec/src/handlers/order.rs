//! Order-side handlers: place, cancel, close, cancel-all, leverage.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info};

use aegis_connectors::models::PlaceOrderRequest;
use aegis_connectors::ExchangeRest;
use aegis_domain::{command_type, dedup, event_type, Command, EntityKind, Event, EventSource};
use aegis_projector::Projector;

use super::{bool_field, optional_str, required_str, CommandHandler, HandlerOutcome};

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, String> {
    raw.parse::<Decimal>()
        .map_err(|e| format!("payload field '{field}' not a decimal: {e}"))
}

/// Submits a new order with `client_order_id = "ae-" + command_id`. The
/// exchange enforces idempotency on that id, so a retried place-order
/// returns the original order.
pub struct PlaceOrderHandler {
    rest: Arc<dyn ExchangeRest>,
}

impl PlaceOrderHandler {
    pub fn new(rest: Arc<dyn ExchangeRest>) -> Self {
        Self { rest }
    }

    fn build_request(command: &Command) -> Result<PlaceOrderRequest, String> {
        let symbol = required_str(command, "symbol")?;
        let quantity = parse_decimal(required_str(command, "quantity")?, "quantity")?;
        let price = optional_str(command, "price")
            .map(|p| parse_decimal(p, "price"))
            .transpose()?;

        Ok(PlaceOrderRequest {
            symbol: symbol.to_string(),
            side: required_str(command, "side")?.to_string(),
            order_type: required_str(command, "order_type")?.to_string(),
            quantity,
            price,
            time_in_force: optional_str(command, "time_in_force").unwrap_or("GTC").to_string(),
            reduce_only: bool_field(command, "reduce_only"),
            position_side: optional_str(command, "position_side").unwrap_or("BOTH").to_string(),
            client_order_id: command.client_order_id(),
        })
    }

    fn rejection_event(command: &Command, error: &str) -> Event {
        Event::new(
            event_type::ORDER_REJECTED,
            EventSource::Bot,
            EntityKind::Order,
            command.command_id.clone(),
            command.scope.clone(),
            dedup::order_rejected_key(&command.command_id),
            json!({
                "command_id": command.command_id,
                "error": error,
                "payload": command.payload,
            }),
        )
        .caused_by(command.command_id.clone(), command.correlation_id.clone())
    }
}

#[async_trait]
impl CommandHandler for PlaceOrderHandler {
    fn command_type(&self) -> &'static str {
        command_type::PLACE_ORDER
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let request = match Self::build_request(command) {
            Ok(request) => request,
            Err(reason) => {
                return HandlerOutcome::failed(
                    reason.clone(),
                    vec![Self::rejection_event(command, &reason)],
                );
            }
        };

        match self.rest.place_order(&request).await {
            Ok(ack) => {
                let exchange_order_id = ack.order_id.to_string();
                let scope = command.scope.with_symbol(&request.symbol);

                let event = Event::new(
                    event_type::ORDER_PLACED,
                    EventSource::Bot,
                    EntityKind::Order,
                    exchange_order_id.clone(),
                    scope,
                    dedup::order_key(
                        &command.scope.exchange,
                        command.scope.venue,
                        &request.symbol,
                        &exchange_order_id,
                    ),
                    json!({
                        "exchange_order_id": exchange_order_id,
                        "client_order_id": request.client_order_id,
                        "symbol": request.symbol,
                        "side": request.side,
                        "order_type": request.order_type,
                        "original_qty": request.quantity.to_string(),
                        "price": request.price.map(|p| p.to_string()),
                        "time_in_force": request.time_in_force,
                        "reduce_only": request.reduce_only,
                        "position_side": request.position_side,
                        "order_status": ack.status,
                    }),
                )
                .caused_by(command.command_id.clone(), command.correlation_id.clone());

                info!(
                    exchange_order_id = %exchange_order_id,
                    command_id = %command.command_id,
                    side = %request.side,
                    quantity = %request.quantity,
                    symbol = %request.symbol,
                    "Order placed"
                );

                HandlerOutcome::ok(
                    json!({
                        "exchange_order_id": exchange_order_id,
                        "client_order_id": request.client_order_id,
                        "status": ack.status,
                    }),
                    vec![event],
                )
            }
            Err(e) => {
                let reason = e.to_string();
                error!(command_id = %command.command_id, error = %reason, "Order placement failed");
                HandlerOutcome::failed(reason.clone(), vec![Self::rejection_event(command, &reason)])
            }
        }
    }
}

/// Cancels by exchange or client id and records `OrderCancelled`.
pub struct CancelOrderHandler {
    rest: Arc<dyn ExchangeRest>,
}

impl CancelOrderHandler {
    pub fn new(rest: Arc<dyn ExchangeRest>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl CommandHandler for CancelOrderHandler {
    fn command_type(&self) -> &'static str {
        command_type::CANCEL_ORDER
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let symbol = match required_str(command, "symbol") {
            Ok(symbol) => symbol.to_string(),
            Err(reason) => return HandlerOutcome::failed(reason, Vec::new()),
        };

        let order_id = optional_str(command, "exchange_order_id").and_then(|s| s.parse::<i64>().ok());
        let client_order_id = optional_str(command, "client_order_id");

        if order_id.is_none() && client_order_id.is_none() {
            return HandlerOutcome::failed(
                "either exchange_order_id or client_order_id required",
                Vec::new(),
            );
        }

        match self.rest.cancel_order(&symbol, order_id, client_order_id).await {
            Ok(ack) => {
                let cancelled_id = ack.order_id.to_string();
                let scope = command.scope.with_symbol(&symbol);

                let event = Event::new(
                    event_type::ORDER_CANCELLED,
                    EventSource::Bot,
                    EntityKind::Order,
                    cancelled_id.clone(),
                    scope,
                    dedup::order_status_key(
                        &command.scope.exchange,
                        command.scope.venue,
                        &symbol,
                        &cancelled_id,
                        "CANCELED",
                        chrono::Utc::now().timestamp_millis(),
                    ),
                    json!({
                        "exchange_order_id": cancelled_id,
                        "client_order_id": ack.client_order_id,
                        "symbol": symbol,
                        "status": "CANCELED",
                    }),
                )
                .caused_by(command.command_id.clone(), command.correlation_id.clone());

                info!(exchange_order_id = %cancelled_id, command_id = %command.command_id, "Order cancelled");

                HandlerOutcome::ok(
                    json!({"exchange_order_id": cancelled_id, "status": "CANCELED"}),
                    vec![event],
                )
            }
            Err(e) => {
                error!(command_id = %command.command_id, error = %e, "Order cancellation failed");
                HandlerOutcome::failed(e.to_string(), Vec::new())
            }
        }
    }
}

/// Closes the current position with a reduce-only market order.
pub struct ClosePositionHandler {
    rest: Arc<dyn ExchangeRest>,
    projector: Arc<Projector>,
}

impl ClosePositionHandler {
    pub fn new(rest: Arc<dyn ExchangeRest>, projector: Arc<Projector>) -> Self {
        Self { rest, projector }
    }
}

#[async_trait]
impl CommandHandler for ClosePositionHandler {
    fn command_type(&self) -> &'static str {
        command_type::CLOSE_POSITION
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let symbol = match required_str(command, "symbol") {
            Ok(symbol) => symbol.to_string(),
            Err(reason) => return HandlerOutcome::failed(reason, Vec::new()),
        };

        let Some(position) = self.projector.position(&symbol).await else {
            return HandlerOutcome::failed(format!("no open position on {symbol}"), Vec::new());
        };

        // Flatten by trading the opposite side for the full quantity
        let side = if position.is_long() { "SELL" } else { "BUY" };
        let request = PlaceOrderRequest {
            symbol: symbol.clone(),
            side: side.to_string(),
            order_type: "MARKET".to_string(),
            quantity: position.qty,
            price: None,
            time_in_force: "GTC".to_string(),
            reduce_only: true,
            position_side: "BOTH".to_string(),
            client_order_id: command.client_order_id(),
        };

        match self.rest.place_order(&request).await {
            Ok(ack) => {
                let exchange_order_id = ack.order_id.to_string();
                let event = Event::new(
                    event_type::ORDER_PLACED,
                    EventSource::Bot,
                    EntityKind::Order,
                    exchange_order_id.clone(),
                    command.scope.with_symbol(&symbol),
                    dedup::order_key(
                        &command.scope.exchange,
                        command.scope.venue,
                        &symbol,
                        &exchange_order_id,
                    ),
                    json!({
                        "exchange_order_id": exchange_order_id,
                        "client_order_id": request.client_order_id,
                        "symbol": symbol,
                        "side": side,
                        "order_type": "MARKET",
                        "original_qty": position.qty.to_string(),
                        "reduce_only": true,
                        "order_status": ack.status,
                        "closing_position": true,
                    }),
                )
                .caused_by(command.command_id.clone(), command.correlation_id.clone());

                info!(
                    symbol = %symbol,
                    qty = %position.qty,
                    side,
                    command_id = %command.command_id,
                    "Position close submitted"
                );

                HandlerOutcome::ok(
                    json!({
                        "exchange_order_id": exchange_order_id,
                        "closed_qty": position.qty.to_string(),
                        "side": side,
                    }),
                    vec![event],
                )
            }
            Err(e) => {
                error!(command_id = %command.command_id, error = %e, "Position close failed");
                HandlerOutcome::failed(e.to_string(), Vec::new())
            }
        }
    }
}

/// Cancels every open order on the command's symbol.
pub struct CancelAllHandler {
    rest: Arc<dyn ExchangeRest>,
}

impl CancelAllHandler {
    pub fn new(rest: Arc<dyn ExchangeRest>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl CommandHandler for CancelAllHandler {
    fn command_type(&self) -> &'static str {
        command_type::CANCEL_ALL
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let symbol = optional_str(command, "symbol")
            .or(command.scope.symbol.as_deref())
            .map(str::to_string);

        let Some(symbol) = symbol else {
            return HandlerOutcome::failed("symbol required for CancelAll", Vec::new());
        };

        match self.rest.cancel_all_orders(&symbol).await {
            Ok(()) => {
                info!(%symbol, command_id = %command.command_id, "All open orders cancelled");
                HandlerOutcome::ok(json!({"symbol": symbol, "status": "done"}), Vec::new())
            }
            Err(e) => HandlerOutcome::failed(e.to_string(), Vec::new()),
        }
    }
}

/// Changes initial leverage for a symbol.
pub struct SetLeverageHandler {
    rest: Arc<dyn ExchangeRest>,
}

impl SetLeverageHandler {
    pub fn new(rest: Arc<dyn ExchangeRest>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl CommandHandler for SetLeverageHandler {
    fn command_type(&self) -> &'static str {
        command_type::SET_LEVERAGE
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let symbol = match required_str(command, "symbol") {
            Ok(symbol) => symbol.to_string(),
            Err(reason) => return HandlerOutcome::failed(reason, Vec::new()),
        };
        let leverage = match command.payload.get("leverage").and_then(|v| v.as_u64()) {
            Some(leverage) if leverage >= 1 => leverage as u32,
            _ => return HandlerOutcome::failed("payload field 'leverage' missing", Vec::new()),
        };

        match self.rest.set_leverage(&symbol, leverage).await {
            Ok(()) => {
                info!(%symbol, leverage, command_id = %command.command_id, "Leverage changed");
                HandlerOutcome::ok(json!({"symbol": symbol, "leverage": leverage}), Vec::new())
            }
            Err(e) => HandlerOutcome::failed(e.to_string(), Vec::new()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
