//! Strategy runner.
//!
//! Owns the loaded strategy and drives both entry points — the wall-clock
//! tick from the main loop and the stream-triggered trade/order callbacks —
//! against a fresh context each time. Persists the accounting state on
//! trade-count changes and on stop, restores it on start, and mirrors
//! lifecycle transitions into the `bot_status` config entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use aegis_connectors::MarketDataProvider;
use aegis_domain::{
    dedup, event_type, EngineMode, EntityKind, Event, EventSource, RiskSettings, Scope,
};
use aegis_exec::RiskGuard;
use aegis_projector::Projector;
use aegis_store::{CommandStore, ConfigStore, EventStore, StrategyStateRecord};

use crate::context::{ContextBuilder, TickContext};
use crate::emitter::CommandEmitter;
use crate::registry::StrategyRegistry;
use crate::strategy::Strategy;
use crate::types::{OrderEvent, StateHandle, StrategyState, TradeEvent};
use crate::{Result, StrategyError};

/// Lifecycle transition pushed to the status channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyStatus {
    pub strategy_name: Option<String>,
    pub is_running: bool,
    pub action: &'static str,
}

/// Runner counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerStats {
    pub tick_count: u64,
    pub error_count: u64,
    pub trade_event_count: u64,
    pub order_event_count: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Drives one strategy instance.
pub struct StrategyRunner {
    events: EventStore,
    commands: CommandStore,
    config: ConfigStore,
    projector: Arc<Projector>,
    risk_guard: Option<Arc<RiskGuard>>,
    market_data: Option<Arc<MarketDataProvider>>,
    scope: Scope,

    registry: StrategyRegistry,
    context_builder: ContextBuilder,

    strategy: Option<Box<dyn Strategy>>,
    emitter: Option<CommandEmitter>,
    params: serde_json::Value,
    state: StateHandle,

    is_running: bool,
    stats: RunnerStats,
    last_saved_trade_count: u64,
    started_at: Option<DateTime<Utc>>,
    status_tx: Option<mpsc::UnboundedSender<StrategyStatus>>,
}

impl StrategyRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: EventStore,
        commands: CommandStore,
        config: ConfigStore,
        projector: Arc<Projector>,
        risk_guard: Option<Arc<RiskGuard>>,
        market_data: Option<Arc<MarketDataProvider>>,
        scope: Scope,
        timeframe: &str,
        bar_limit: u32,
    ) -> Self {
        let context_builder = ContextBuilder::new(scope.clone(), timeframe, bar_limit);
        Self {
            events,
            commands,
            config,
            projector,
            risk_guard,
            market_data,
            scope,
            registry: StrategyRegistry::with_builtins(),
            context_builder,
            strategy: None,
            emitter: None,
            params: json!({}),
            state: Arc::new(RwLock::new(StrategyState::default())),
            is_running: false,
            stats: RunnerStats::default(),
            last_saved_trade_count: 0,
            started_at: None,
            status_tx: None,
        }
    }

    /// Subscribe a status-change channel (observer propagation).
    pub fn set_status_channel(&mut self, tx: mpsc::UnboundedSender<StrategyStatus>) {
        self.status_tx = Some(tx);
    }

    /// Replace the registry (custom strategy sets).
    pub fn set_registry(&mut self, registry: StrategyRegistry) {
        self.registry = registry;
    }

    /// Load a strategy by canonical name, merging `default_params ⊕ params`.
    pub async fn load(&mut self, name: &str, params: serde_json::Value) -> Result<()> {
        let strategy = self
            .registry
            .create(name)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))?;
        self.load_instance(strategy, params).await
    }

    /// Load an already-constructed strategy instance.
    pub async fn load_instance(
        &mut self,
        mut strategy: Box<dyn Strategy>,
        params: serde_json::Value,
    ) -> Result<()> {
        let merged = merge_params(strategy.default_params(), params);
        strategy.on_init(&merged).await?;

        let emitter = CommandEmitter::new(
            self.commands.clone(),
            self.scope.clone(),
            strategy.name().to_string(),
            self.risk_guard.clone(),
        );

        info!(
            strategy = strategy.name(),
            version = strategy.version(),
            "Strategy loaded"
        );

        self.record_loaded_event(strategy.name(), strategy.version(), &merged)
            .await?;

        self.params = merged;
        self.emitter = Some(emitter);
        self.strategy = Some(strategy);
        self.notify("loaded").await;
        Ok(())
    }

    /// Start driving ticks. Restores persisted accounting state first.
    pub async fn start(&mut self) -> Result<()> {
        if self.strategy.is_none() {
            return Err(StrategyError::NotLoaded);
        }
        if self.is_running {
            return Ok(());
        }

        self.is_running = true;
        self.started_at = Some(Utc::now());
        self.restore_state().await;

        let ctx = self.build_context().await;
        if let Some(strategy) = self.strategy.as_mut() {
            strategy.on_start(&ctx).await?;
            info!(strategy = strategy.name(), "Strategy started");
        }

        self.notify("started").await;
        Ok(())
    }

    /// Stop and persist state. Safe to call when already stopped.
    pub async fn stop(&mut self) -> Result<()> {
        if self.strategy.is_none() || !self.is_running {
            return Ok(());
        }

        self.is_running = false;

        let ctx = self.build_context().await;
        if let Some(strategy) = self.strategy.as_mut() {
            if let Err(e) = strategy.on_stop(&ctx).await {
                warn!(error = %e, "on_stop failed");
            }
            info!(strategy = strategy.name(), "Strategy stopped");
        }

        self.save_state().await;
        self.notify("stopped").await;
        Ok(())
    }

    /// Tick entry, called from the main loop.
    pub async fn tick(&mut self) -> bool {
        if !self.is_running || self.strategy.is_none() || self.emitter.is_none() {
            return false;
        }

        self.stats.tick_count += 1;
        self.stats.last_tick = Some(Utc::now());

        let ctx = self.build_context().await;
        let emitter = self.emitter.clone().expect("emitter present while running");

        let result = self
            .strategy
            .as_mut()
            .expect("strategy present while running")
            .on_tick(&ctx, &emitter)
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.handle_callback_error(e, "on_tick").await;
                false
            }
        }
    }

    /// Event entry: a fill on this strategy's symbol.
    pub async fn handle_trade_event(&mut self, trade: &TradeEvent) -> bool {
        if !self.is_running || self.strategy.is_none() || self.emitter.is_none() {
            return false;
        }
        if self.scope.symbol.as_deref() != Some(trade.symbol.as_str()) {
            return false;
        }

        self.stats.trade_event_count += 1;

        let ctx = self.build_context().await;
        let emitter = self.emitter.clone().expect("emitter present while running");

        let result = self
            .strategy
            .as_mut()
            .expect("strategy present while running")
            .on_trade(trade, &ctx, &emitter)
            .await;

        match result {
            Ok(()) => {
                self.maybe_save_state().await;
                debug!(trade_id = %trade.trade_id, "on_trade handled");
                true
            }
            Err(e) => {
                self.handle_callback_error(e, "on_trade").await;
                false
            }
        }
    }

    /// Event entry: an order status change on this strategy's symbol.
    pub async fn handle_order_event(&mut self, order: &OrderEvent) -> bool {
        if !self.is_running || self.strategy.is_none() || self.emitter.is_none() {
            return false;
        }
        if self.scope.symbol.as_deref() != Some(order.symbol.as_str()) {
            return false;
        }

        self.stats.order_event_count += 1;

        let ctx = self.build_context().await;
        let emitter = self.emitter.clone().expect("emitter present while running");

        let result = self
            .strategy
            .as_mut()
            .expect("strategy present while running")
            .on_order_update(order, &ctx, &emitter)
            .await;

        match result {
            Ok(()) => {
                self.maybe_save_state().await;
                debug!(order_id = %order.order_id, status = %order.status, "on_order_update handled");
                true
            }
            Err(e) => {
                self.handle_callback_error(e, "on_order_update").await;
                false
            }
        }
    }

    async fn handle_callback_error(&mut self, error: anyhow::Error, entry: &str) {
        self.stats.error_count += 1;
        let name = self
            .strategy
            .as_ref()
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        error!(strategy = %name, entry, error = %error, "Strategy callback error");

        let ctx = self.build_context().await;
        let should_continue = match self.strategy.as_mut() {
            Some(strategy) => strategy.on_error(&error, &ctx).await,
            None => false,
        };

        if !should_continue {
            warn!(strategy = %name, "Strategy stopped due to error");
            self.is_running = false;
            self.save_state().await;
            self.notify("stopped").await;
        }
    }

    async fn build_context(&self) -> TickContext {
        let engine_mode = self
            .config
            .engine_mode()
            .await
            .unwrap_or(EngineMode::Running);
        let risk = self
            .config
            .risk_settings()
            .await
            .unwrap_or_else(|_| RiskSettings::default());

        self.context_builder
            .build(
                &self.projector,
                self.market_data.clone(),
                engine_mode,
                self.state.clone(),
                risk,
            )
            .await
    }

    // =========================================================================
    // State persistence
    // =========================================================================

    async fn restore_state(&mut self) {
        match self.config.strategy_state().await {
            Ok(record) => {
                // "0" marks a never-initialized record; leave defaults alone
                let equity = record.account_equity.parse::<Decimal>().unwrap_or_default();
                if !equity.is_zero() {
                    let mut state = self.state.write().await;
                    state.account_equity = equity;
                    state.trade_count_since_reset = record.trade_count_since_reset;
                    state.total_trade_count = record.total_trade_count;
                    self.last_saved_trade_count = record.total_trade_count;

                    info!(
                        equity = %equity,
                        trades_since_reset = record.trade_count_since_reset,
                        total_trades = record.total_trade_count,
                        "Strategy state restored"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Strategy state restore failed"),
        }
    }

    async fn save_state(&mut self) {
        let snapshot = self.state.read().await.clone();
        let record = StrategyStateRecord {
            account_equity: snapshot.account_equity.to_string(),
            trade_count_since_reset: snapshot.trade_count_since_reset,
            total_trade_count: snapshot.total_trade_count,
        };

        match self.config.save_strategy_state(&record).await {
            Ok(()) => {
                self.last_saved_trade_count = snapshot.total_trade_count;
                debug!(
                    equity = %record.account_equity,
                    total_trades = record.total_trade_count,
                    "Strategy state saved"
                );
            }
            Err(e) => warn!(error = %e, "Strategy state save failed"),
        }
    }

    /// Persist only when the trade count moved since the last save.
    async fn maybe_save_state(&mut self) {
        let total = self.state.read().await.total_trade_count;
        if total != self.last_saved_trade_count {
            self.save_state().await;
        }
    }

    // =========================================================================
    // Status propagation
    // =========================================================================

    async fn notify(&self, action: &'static str) {
        let strategy_name = self.strategy.as_ref().map(|s| s.name().to_string());

        let status = StrategyStatus {
            strategy_name: strategy_name.clone(),
            is_running: self.is_running,
            action,
        };

        if let Some(tx) = &self.status_tx {
            let _ = tx.send(status);
        }

        let started_at = self.started_at.map(|ts| ts.to_rfc3339());
        if let Err(e) = self
            .config
            .update_bot_status(
                true,
                strategy_name.as_deref(),
                self.is_running,
                self.stats.tick_count,
                started_at.as_deref(),
            )
            .await
        {
            warn!(error = %e, "bot_status update failed");
        }
    }

    async fn record_loaded_event(
        &self,
        name: &str,
        version: &str,
        params: &serde_json::Value,
    ) -> Result<()> {
        let event = Event::new(
            event_type::STRATEGY_LOADED,
            EventSource::Bot,
            EntityKind::Strategy,
            name,
            self.scope.clone(),
            dedup::strategy_key(name, "loaded", Utc::now().timestamp_millis()),
            json!({
                "strategy_name": name,
                "strategy_version": version,
                "params": params,
            }),
        );
        self.events.append(&event).await?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn strategy_name(&self) -> Option<&str> {
        self.strategy.as_ref().map(|s| s.name())
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }
}

/// `defaults ⊕ overrides`, shallow-merged.
fn merge_params(defaults: serde_json::Value, overrides: serde_json::Value) -> serde_json::Value {
    match (defaults, overrides) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(over)) => {
            for (key, value) in over {
                base.insert(key, value);
            }
            serde_json::Value::Object(base)
        }
        (base, serde_json::Value::Null) => base,
        (_, over) => over,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_win_shallowly() {
        let merged = merge_params(
            json!({"fast": 10, "slow": 30}),
            json!({"slow": 50, "extra": true}),
        );
        assert_eq!(merged["fast"], 10);
        assert_eq!(merged["slow"], 50);
        assert_eq!(merged["extra"], true);
    }

    #[test]
    fn merge_with_null_keeps_defaults() {
        let merged = merge_params(json!({"fast": 10}), serde_json::Value::Null);
        assert_eq!(merged["fast"], 10);
    }
}
