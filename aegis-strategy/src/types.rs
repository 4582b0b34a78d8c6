//! Read-only views handed to strategies.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use aegis_connectors::models::Kline;
use aegis_domain::is_engine_order;

/// One candlestick, decimal-typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn from_kline(kline: &Kline) -> Self {
        use chrono::TimeZone;
        Self {
            ts: Utc
                .timestamp_millis_opt(kline.open_time)
                .single()
                .unwrap_or_default(),
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
        }
    }
}

/// Accounting triple the runner persists across restarts. Anything else a
/// strategy wants to remember lives in its own struct and only survives
/// in-process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyState {
    pub account_equity: Decimal,
    pub trade_count_since_reset: u64,
    pub total_trade_count: u64,
}

impl StrategyState {
    /// Count one closing trade.
    pub fn record_trade(&mut self) {
        self.trade_count_since_reset += 1;
        self.total_trade_count += 1;
    }

    /// Re-anchor the equity base and restart the reset cadence.
    pub fn reset_equity(&mut self, equity: Decimal) {
        self.account_equity = equity;
        self.trade_count_since_reset = 0;
    }
}

/// Shared handle: both runner entry points mutate the same state.
pub type StateHandle = Arc<RwLock<StrategyState>>;

/// A fill observed on the stream, delivered to `on_trade`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub trade_id: String,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub realized_pnl: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn is_buy(&self) -> bool {
        self.side == "BUY"
    }

    /// A closing fill carries realised PnL.
    pub fn is_reduce(&self) -> bool {
        !self.realized_pnl.is_zero()
    }

    pub fn is_profitable(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    /// Whether this fill belongs to an order this engine placed.
    pub fn is_engine_order(&self) -> bool {
        self.client_order_id
            .as_deref()
            .is_some_and(is_engine_order)
    }
}

/// An order status change observed on the stream, delivered to
/// `on_order_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: String,
    pub order_type: String,
    pub side: String,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub original_qty: Decimal,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    pub fn is_canceled(&self) -> bool {
        self.status == "CANCELED"
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "NEW" | "PARTIALLY_FILLED")
    }

    /// Stop-loss or take-profit trigger order.
    pub fn is_stop_order(&self) -> bool {
        matches!(
            self.order_type.as_str(),
            "STOP" | "STOP_MARKET" | "TAKE_PROFIT" | "TAKE_PROFIT_MARKET"
        )
    }

    pub fn is_stop_loss(&self) -> bool {
        matches!(self.order_type.as_str(), "STOP" | "STOP_MARKET")
    }

    pub fn is_take_profit(&self) -> bool {
        matches!(self.order_type.as_str(), "TAKE_PROFIT" | "TAKE_PROFIT_MARKET")
    }

    pub fn remaining_qty(&self) -> Decimal {
        self.original_qty - self.executed_qty
    }

    pub fn is_engine_order(&self) -> bool {
        self.client_order_id
            .as_deref()
            .is_some_and(is_engine_order)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal, client_order_id: Option<&str>) -> TradeEvent {
        TradeEvent {
            trade_id: "777".into(),
            order_id: "123".into(),
            client_order_id: client_order_id.map(str::to_string),
            symbol: "XRPUSDT".into(),
            side: "SELL".into(),
            price: dec!(0.52),
            quantity: dec!(10),
            realized_pnl: pnl,
            commission: dec!(0.002),
            commission_asset: "USDT".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn reduce_detection_via_pnl() {
        assert!(trade(dec!(1.5), None).is_reduce());
        assert!(trade(dec!(-0.5), None).is_reduce());
        assert!(!trade(Decimal::ZERO, None).is_reduce());
    }

    #[test]
    fn engine_order_detection() {
        assert!(trade(Decimal::ZERO, Some("ae-abc")).is_engine_order());
        assert!(!trade(Decimal::ZERO, Some("manual-1")).is_engine_order());
        assert!(!trade(Decimal::ZERO, None).is_engine_order());
    }

    #[test]
    fn state_records_and_resets() {
        let mut state = StrategyState::default();
        state.record_trade();
        state.record_trade();
        assert_eq!(state.total_trade_count, 2);
        assert_eq!(state.trade_count_since_reset, 2);

        state.reset_equity(dec!(500));
        assert_eq!(state.account_equity, dec!(500));
        assert_eq!(state.trade_count_since_reset, 0);
        assert_eq!(state.total_trade_count, 2);
    }
}
