//! Command emitter: the strategy's only write path.
//!
//! Each method builds a command tagged `STRATEGY:<name>`, runs it through
//! the risk guard, and inserts it into the command store when accepted.
//! Rejected emissions return an empty string and insert nothing.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use aegis_domain::{command_type, priority, Actor, Command, CommandOptions, Scope};
use aegis_exec::{RiskDecision, RiskGuard};
use aegis_store::CommandStore;

use crate::Result;

/// An order a strategy wants placed.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub side: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: String,
    pub reduce_only: bool,
    pub position_side: String,
}

impl OrderIntent {
    pub fn market(side: &str, quantity: Decimal) -> Self {
        Self {
            side: side.to_uppercase(),
            order_type: "MARKET".to_string(),
            quantity,
            price: None,
            stop_price: None,
            time_in_force: "GTC".to_string(),
            reduce_only: false,
            position_side: "BOTH".to_string(),
        }
    }

    pub fn limit(side: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: "LIMIT".to_string(),
            ..Self::market(side, quantity)
        }
    }

    /// Stop-market trigger order (stop-loss leg).
    pub fn stop_market(side: &str, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            stop_price: Some(stop_price),
            order_type: "STOP_MARKET".to_string(),
            ..Self::market(side, quantity)
        }
    }

    /// Take-profit-market trigger order.
    pub fn take_profit_market(side: &str, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            stop_price: Some(stop_price),
            order_type: "TAKE_PROFIT_MARKET".to_string(),
            ..Self::market(side, quantity)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Restricted emission surface handed to strategies.
#[derive(Clone)]
pub struct CommandEmitter {
    commands: CommandStore,
    scope: Scope,
    strategy_name: String,
    risk_guard: Option<Arc<RiskGuard>>,
}

impl CommandEmitter {
    pub fn new(
        commands: CommandStore,
        scope: Scope,
        strategy_name: impl Into<String>,
        risk_guard: Option<Arc<RiskGuard>>,
    ) -> Self {
        Self {
            commands,
            scope,
            strategy_name: strategy_name.into(),
            risk_guard,
        }
    }

    fn actor(&self) -> Actor {
        Actor::strategy(&self.strategy_name)
    }

    /// Emit a PlaceOrder command. Returns the command id, or an empty string
    /// when the risk guard rejects it.
    pub async fn place_order(&self, intent: OrderIntent) -> Result<String> {
        let mut payload = json!({
            "symbol": self.scope.symbol,
            "side": intent.side,
            "order_type": intent.order_type,
            "quantity": intent.quantity.to_string(),
            "time_in_force": intent.time_in_force,
            "reduce_only": intent.reduce_only,
            "position_side": intent.position_side,
        });
        if let Some(price) = intent.price {
            payload["price"] = json!(price.to_string());
        }
        if let Some(stop_price) = intent.stop_price {
            payload["stop_price"] = json!(stop_price.to_string());
        }

        let command = Command::create(
            command_type::PLACE_ORDER,
            self.actor(),
            self.scope.clone(),
            payload,
            CommandOptions {
                priority: priority::STRATEGY,
                ..Default::default()
            },
        );

        if let Some(guard) = &self.risk_guard {
            if let RiskDecision::Rejected { reason, .. } = guard.check(&command).await? {
                warn!(
                    strategy = %self.strategy_name,
                    side = %intent.side,
                    quantity = %intent.quantity,
                    %reason,
                    "Strategy order rejected"
                );
                return Ok(String::new());
            }
        }

        self.commands.insert(&command).await?;

        info!(
            command_id = %command.command_id,
            strategy = %self.strategy_name,
            side = %intent.side,
            quantity = %intent.quantity,
            symbol = self.scope.symbol.as_deref().unwrap_or(""),
            "Strategy order submitted"
        );

        Ok(command.command_id)
    }

    /// Emit a CancelOrder command by exchange or client id.
    pub async fn cancel_order(
        &self,
        exchange_order_id: Option<&str>,
        client_order_id: Option<&str>,
    ) -> Result<String> {
        if exchange_order_id.is_none() && client_order_id.is_none() {
            warn!(strategy = %self.strategy_name, "cancel_order needs an order id");
            return Ok(String::new());
        }

        let mut payload = json!({"symbol": self.scope.symbol});
        if let Some(id) = exchange_order_id {
            payload["exchange_order_id"] = json!(id);
        }
        if let Some(id) = client_order_id {
            payload["client_order_id"] = json!(id);
        }

        let command = Command::create(
            command_type::CANCEL_ORDER,
            self.actor(),
            self.scope.clone(),
            payload,
            CommandOptions {
                priority: priority::STRATEGY,
                ..Default::default()
            },
        );

        self.commands.insert(&command).await?;
        info!(command_id = %command.command_id, strategy = %self.strategy_name, "Strategy cancel submitted");
        Ok(command.command_id)
    }

    /// Emit a ClosePosition command (market flatten).
    pub async fn close_position(&self) -> Result<String> {
        let command = Command::create(
            command_type::CLOSE_POSITION,
            self.actor(),
            self.scope.clone(),
            json!({"symbol": self.scope.symbol, "reduce_only": true}),
            CommandOptions {
                priority: priority::STRATEGY,
                ..Default::default()
            },
        );

        self.commands.insert(&command).await?;
        info!(command_id = %command.command_id, strategy = %self.strategy_name, "Strategy close submitted");
        Ok(command.command_id)
    }

    /// Emit a CancelAll command for this symbol.
    pub async fn cancel_all_orders(&self) -> Result<String> {
        let command = Command::create(
            command_type::CANCEL_ALL,
            self.actor(),
            self.scope.clone(),
            json!({"symbol": self.scope.symbol}),
            CommandOptions {
                priority: priority::STRATEGY,
                ..Default::default()
            },
        );

        self.commands.insert(&command).await?;
        info!(command_id = %command.command_id, strategy = %self.strategy_name, "Strategy cancel-all submitted");
        Ok(command.command_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{CommandStatus, EngineMode, TradingMode, Venue};
    use aegis_store::{sqlite, ConfigStore, EventStore};
    use rust_decimal_macros::dec;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    async fn emitter(with_guard: bool, paused: bool) -> (CommandStore, CommandEmitter) {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();

        let commands = CommandStore::new(pool.clone());
        let config = ConfigStore::new(pool.clone());
        if paused {
            config.set_engine_mode(EngineMode::Paused, "bot:test").await.unwrap();
        }

        let guard = with_guard.then(|| {
            Arc::new(RiskGuard::new(EventStore::new(pool), config, None))
        });

        let emitter = CommandEmitter::new(commands.clone(), scope(), "sma_cross", guard);
        (commands, emitter)
    }

    #[tokio::test]
    async fn accepted_order_lands_in_store_with_strategy_actor() {
        let (commands, emitter) = emitter(true, false).await;

        let id = emitter
            .place_order(OrderIntent::market("buy", dec!(10)))
            .await
            .unwrap();
        assert!(!id.is_empty());

        let stored = commands.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.actor.to_string(), "STRATEGY:sma_cross");
        assert_eq!(stored.priority, priority::STRATEGY);
        assert_eq!(stored.status, CommandStatus::New);
        assert_eq!(stored.payload["side"], "BUY");
    }

    #[tokio::test]
    async fn rejected_order_returns_empty_and_inserts_nothing() {
        let (commands, emitter) = emitter(true, true).await;

        let id = emitter
            .place_order(OrderIntent::market("buy", dec!(10)))
            .await
            .unwrap();
        assert!(id.is_empty());
        assert_eq!(commands.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_order_requires_an_id() {
        let (commands, emitter) = emitter(false, false).await;

        let id = emitter.cancel_order(None, None).await.unwrap();
        assert!(id.is_empty());
        assert_eq!(commands.pending_count().await.unwrap(), 0);

        let id = emitter.cancel_order(Some("123"), None).await.unwrap();
        assert!(!id.is_empty());
    }
}
