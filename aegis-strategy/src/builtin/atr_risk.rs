//! ATR-sized risk strategy.
//!
//! Position size is derived from the account equity base and the ATR stop
//! distance: `qty = equity * risk_per_trade / (atr * multiplier)`. Each entry
//! brackets itself with a stop-market and a take-profit leg; the equity base
//! re-anchors to the live balance every `equity_reset_trades` closing trades,
//! and the trade counters ride the persisted accounting state so the cadence
//! survives restarts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

use crate::context::TickContext;
use crate::emitter::{CommandEmitter, OrderIntent};
use crate::indicators::{atr, sma};
use crate::strategy::Strategy;
use crate::types::TradeEvent;

pub struct AtrRisk {
    atr_period: usize,
    atr_multiplier: Decimal,
    trend_period: usize,
    min_qty: Decimal,
}

impl Default for AtrRisk {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_multiplier: Decimal::TWO,
            trend_period: 50,
            min_qty: Decimal::ONE,
        }
    }
}

impl AtrRisk {
    fn position_qty(&self, equity: Decimal, risk_per_trade: Decimal, stop_distance: Decimal) -> Decimal {
        if stop_distance <= Decimal::ZERO || equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (equity * risk_per_trade / stop_distance).round_dp(0)
    }
}

#[async_trait]
impl Strategy for AtrRisk {
    fn name(&self) -> &str {
        "atr_risk"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn description(&self) -> &str {
        "Trend entries sized by ATR stop distance with bracket exits"
    }

    fn default_params(&self) -> serde_json::Value {
        json!({
            "atr_period": 14,
            "atr_multiplier": "2",
            "trend_period": 50,
            "min_qty": "1",
        })
    }

    async fn on_init(&mut self, params: &serde_json::Value) -> anyhow::Result<()> {
        if let Some(period) = params.get("atr_period").and_then(|v| v.as_u64()) {
            self.atr_period = period as usize;
        }
        if let Some(multiplier) = params.get("atr_multiplier").and_then(|v| v.as_str()) {
            self.atr_multiplier = multiplier.parse()?;
        }
        if let Some(period) = params.get("trend_period").and_then(|v| v.as_u64()) {
            self.trend_period = period as usize;
        }
        if let Some(min_qty) = params.get("min_qty").and_then(|v| v.as_str()) {
            self.min_qty = min_qty.parse()?;
        }

        anyhow::ensure!(self.atr_period >= 2, "atr_period must be at least 2");
        anyhow::ensure!(self.atr_multiplier > Decimal::ZERO, "atr_multiplier must be positive");
        Ok(())
    }

    async fn on_start(&mut self, ctx: &TickContext) -> anyhow::Result<()> {
        // First run only: anchor the equity base to the live balance. A
        // restored non-zero equity means the reset cadence is mid-flight.
        let mut state = ctx.state.write().await;
        if state.account_equity.is_zero() {
            if let Some(balance) = ctx.usdt_balance() {
                state.reset_equity(balance.free + balance.locked);
                info!(equity = %state.account_equity, "Equity base initialized");
            }
        } else {
            info!(
                equity = %state.account_equity,
                trades_since_reset = state.trade_count_since_reset,
                "Resuming with restored equity base"
            );
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &TickContext, emit: &CommandEmitter) -> anyhow::Result<()> {
        if !ctx.can_trade() || ctx.has_position() || ctx.has_open_orders() {
            return Ok(());
        }

        let closes = &ctx.ohlcv.close;
        let Some(trend) = sma(closes, self.trend_period) else {
            return Ok(());
        };
        let Some(atr_value) = atr(&ctx.bars, self.atr_period) else {
            return Ok(());
        };
        let Some(price) = ctx.current_price else {
            return Ok(());
        };

        // Long-only trend filter: price above the slow average
        if price <= trend {
            return Ok(());
        }

        let stop_distance = atr_value * self.atr_multiplier;
        let equity = ctx.state.read().await.account_equity;
        let qty = self.position_qty(equity, ctx.risk.risk_per_trade, stop_distance);

        if qty < self.min_qty {
            debug!(%qty, min = %self.min_qty, "Computed size below minimum, skipping");
            return Ok(());
        }

        let stop_price = price - stop_distance;
        let target_price = price + stop_distance * ctx.risk.reward_ratio;

        info!(
            %price,
            %qty,
            stop = %stop_price,
            target = %target_price,
            atr = %atr_value,
            "ATR entry"
        );

        let entry = emit.place_order(OrderIntent::market("BUY", qty)).await?;
        if entry.is_empty() {
            return Ok(()); // risk guard said no; try again another tick
        }

        emit.place_order(OrderIntent::stop_market("SELL", qty, stop_price).reduce_only())
            .await?;
        emit.place_order(OrderIntent::take_profit_market("SELL", qty, target_price).reduce_only())
            .await?;

        Ok(())
    }

    async fn on_trade(
        &mut self,
        trade: &TradeEvent,
        ctx: &TickContext,
        emit: &CommandEmitter,
    ) -> anyhow::Result<()> {
        if !trade.is_reduce() || !trade.is_engine_order() {
            return Ok(());
        }

        // A closing fill: count it, and leave no stray bracket legs behind
        let reset_due = {
            let mut state = ctx.state.write().await;
            state.record_trade();
            debug!(
                total = state.total_trade_count,
                since_reset = state.trade_count_since_reset,
                pnl = %trade.realized_pnl,
                "Closing trade recorded"
            );
            state.trade_count_since_reset >= ctx.risk.equity_reset_trades
        };

        if ctx.has_open_orders() {
            emit.cancel_all_orders().await?;
        }

        if reset_due {
            let mut state = ctx.state.write().await;
            if let Some(balance) = ctx.usdt_balance() {
                state.reset_equity(balance.free + balance.locked);
                info!(equity = %state.account_equity, "Equity base re-anchored");
            } else {
                state.trade_count_since_reset = 0;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sizing_scales_with_equity_and_stop() {
        let strategy = AtrRisk::default();

        // 2% of 1000 = 20 risked; stop distance 0.04 -> 500 units
        let qty = strategy.position_qty(dec!(1000), dec!(0.02), dec!(0.04));
        assert_eq!(qty, dec!(500));

        assert_eq!(strategy.position_qty(dec!(0), dec!(0.02), dec!(0.04)), dec!(0));
        assert_eq!(strategy.position_qty(dec!(1000), dec!(0.02), dec!(0)), dec!(0));
    }

    #[tokio::test]
    async fn init_rejects_degenerate_params() {
        let mut strategy = AtrRisk::default();
        assert!(strategy.on_init(&json!({"atr_period": 1})).await.is_err());
        assert!(strategy.on_init(&json!({"atr_multiplier": "0"})).await.is_err());
        assert!(strategy
            .on_init(&json!({"atr_period": 14, "atr_multiplier": "2.5"}))
            .await
            .is_ok());
        assert_eq!(strategy.atr_multiplier, dec!(2.5));
    }
}
