//! SMA crossover reference strategy.
//!
//! Golden cross (fast SMA crossing above slow) opens a long; death cross
//! closes it. Deliberately minimal — it exists to exercise the runtime
//! surface and as a template for real strategies.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

use crate::context::TickContext;
use crate::emitter::{CommandEmitter, OrderIntent};
use crate::indicators::sma;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq)]
enum CrossState {
    Unknown,
    FastAbove,
    FastBelow,
}

pub struct SmaCross {
    fast_period: usize,
    slow_period: usize,
    quantity: Decimal,
    last_state: CrossState,
}

impl Default for SmaCross {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
            quantity: Decimal::TEN,
            last_state: CrossState::Unknown,
        }
    }
}

#[async_trait]
impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "Long on golden cross, flat on death cross"
    }

    fn default_params(&self) -> serde_json::Value {
        json!({
            "fast_period": 10,
            "slow_period": 30,
            "quantity": "10",
        })
    }

    async fn on_init(&mut self, params: &serde_json::Value) -> anyhow::Result<()> {
        if let Some(fast) = params.get("fast_period").and_then(|v| v.as_u64()) {
            self.fast_period = fast as usize;
        }
        if let Some(slow) = params.get("slow_period").and_then(|v| v.as_u64()) {
            self.slow_period = slow as usize;
        }
        if let Some(quantity) = params.get("quantity").and_then(|v| v.as_str()) {
            self.quantity = quantity.parse()?;
        }

        anyhow::ensure!(
            self.fast_period < self.slow_period,
            "fast_period must be below slow_period"
        );
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &TickContext, emit: &CommandEmitter) -> anyhow::Result<()> {
        let closes = &ctx.ohlcv.close;
        let (Some(fast), Some(slow)) = (sma(closes, self.fast_period), sma(closes, self.slow_period))
        else {
            return Ok(()); // not enough history yet
        };

        let state = if fast > slow {
            CrossState::FastAbove
        } else {
            CrossState::FastBelow
        };
        let previous = std::mem::replace(&mut self.last_state, state);

        if previous == CrossState::Unknown || previous == state {
            return Ok(());
        }

        match state {
            CrossState::FastAbove if !ctx.has_position() && ctx.can_trade() => {
                info!(%fast, %slow, "Golden cross, entering long");
                emit.place_order(OrderIntent::market("BUY", self.quantity)).await?;
            }
            CrossState::FastBelow if ctx.has_position() => {
                info!(%fast, %slow, "Death cross, closing position");
                emit.close_position().await?;
            }
            _ => {}
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

    #[tokio::test]
    async fn init_validates_periods() {
        let mut strategy = SmaCross::default();
        let err = strategy
            .on_init(&json!({"fast_period": 30, "slow_period": 10}))
            .await;
        assert!(err.is_err());

        let ok = strategy
            .on_init(&json!({"fast_period": 5, "slow_period": 20, "quantity": "25"}))
            .await;
        assert!(ok.is_ok());
        assert_eq!(strategy.quantity, Decimal::from(25));
    }
}
