//! The strategy plug-in trait.

use async_trait::async_trait;

use crate::context::TickContext;
use crate::emitter::CommandEmitter;
use crate::types::{OrderEvent, TradeEvent};

/// A trading strategy.
///
/// Rules of the house:
/// 1. never call the exchange adapter; emit commands
/// 2. the context is read-only; the shared accounting state and your own
///    fields are the only memory between callbacks
/// 3. an error propagating out of a callback routes through `on_error`, and
///    the default answer stops the strategy
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Defaults merged under the configured `params`.
    fn default_params(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Called once at load with the merged parameters.
    async fn on_init(&mut self, _params: &serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the runner starts driving ticks.
    async fn on_start(&mut self, _ctx: &TickContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Main decision loop, called on the engine's tick cadence.
    async fn on_tick(&mut self, ctx: &TickContext, emit: &CommandEmitter) -> anyhow::Result<()>;

    /// Called once when the runner stops.
    async fn on_stop(&mut self, _ctx: &TickContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// A callback failed. Return true to keep running.
    async fn on_error(&mut self, _error: &anyhow::Error, _ctx: &TickContext) -> bool {
        false
    }

    /// A fill arrived on the stream for this strategy's symbol.
    async fn on_trade(
        &mut self,
        _trade: &TradeEvent,
        _ctx: &TickContext,
        _emit: &CommandEmitter,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// An order status change arrived on the stream for this symbol.
    async fn on_order_update(
        &mut self,
        _order: &OrderEvent,
        _ctx: &TickContext,
        _emit: &CommandEmitter,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
