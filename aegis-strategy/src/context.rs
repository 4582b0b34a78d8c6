//! Tick context and its builder.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use aegis_connectors::{MarketDataProvider, OhlcvFrame};
use aegis_domain::{EngineMode, RiskSettings, Scope};
use aegis_projector::{BalanceView, OpenOrderView, PositionView, Projector};

use crate::types::{Bar, StateHandle};

/// Everything a strategy may look at on one tick.
///
/// Read-only by construction; the only mutation vectors are the shared
/// accounting state handle and the command emitter.
#[derive(Clone)]
pub struct TickContext {
    pub scope: Scope,
    pub now: DateTime<Utc>,
    pub position: Option<PositionView>,
    pub balances: HashMap<String, BalanceView>,
    pub open_orders: Vec<OpenOrderView>,
    pub bars: Vec<Bar>,
    pub ohlcv: OhlcvFrame,
    pub current_price: Option<Decimal>,
    pub state: StateHandle,
    pub engine_mode: EngineMode,
    pub market_data: Option<Arc<MarketDataProvider>>,
    pub risk: RiskSettings,
}

impl TickContext {
    pub fn symbol(&self) -> Option<&str> {
        self.scope.symbol.as_deref()
    }

    pub fn usdt_balance(&self) -> Option<&BalanceView> {
        self.balances.get("USDT")
    }

    pub fn has_position(&self) -> bool {
        self.position.as_ref().is_some_and(|p| !p.is_flat())
    }

    pub fn has_open_orders(&self) -> bool {
        !self.open_orders.is_empty()
    }

    /// RUNNING mode: new entries allowed.
    pub fn can_trade(&self) -> bool {
        self.engine_mode == EngineMode::Running
    }

    /// SAFE mode: only position reduction allowed.
    pub fn close_only(&self) -> bool {
        self.engine_mode == EngineMode::Safe
    }

    /// Pull another timeframe on demand. Missing provider or a fetch error
    /// both come back as an empty frame.
    pub async fn get_ohlcv(&self, timeframe: &str, limit: u32) -> OhlcvFrame {
        match (&self.market_data, self.symbol()) {
            (Some(provider), Some(symbol)) => {
                provider.get_ohlcv(symbol, Some(timeframe), Some(limit)).await
            }
            _ => OhlcvFrame::default(),
        }
    }
}

/// Builds a fresh context for each tick or stream callback.
pub struct ContextBuilder {
    scope: Scope,
    timeframe: String,
    bar_limit: u32,
}

impl ContextBuilder {
    pub fn new(scope: Scope, timeframe: impl Into<String>, bar_limit: u32) -> Self {
        Self {
            scope,
            timeframe: timeframe.into(),
            bar_limit,
        }
    }

    pub async fn build(
        &self,
        projector: &Projector,
        market_data: Option<Arc<MarketDataProvider>>,
        engine_mode: EngineMode,
        state: StateHandle,
        risk: RiskSettings,
    ) -> TickContext {
        let position = match self.scope.symbol.as_deref() {
            Some(symbol) => projector.position(symbol).await,
            None => None,
        };

        let balances: HashMap<String, BalanceView> = projector
            .balances()
            .await
            .into_iter()
            .filter(|b| b.venue == self.scope.venue)
            .map(|b| (b.asset.clone(), b))
            .collect();

        let open_orders = projector.open_orders(self.scope.symbol.as_deref()).await;

        let (bars, ohlcv) = match (&market_data, self.scope.symbol.as_deref()) {
            (Some(provider), Some(symbol)) => {
                let klines = provider
                    .get_bars(symbol, Some(&self.timeframe), Some(self.bar_limit))
                    .await;
                let ohlcv = OhlcvFrame::from_klines(&klines);
                (klines.iter().map(Bar::from_kline).collect(), ohlcv)
            }
            _ => {
                if market_data.is_none() {
                    warn!("No market-data provider; context carries empty bars");
                }
                (Vec::new(), OhlcvFrame::default())
            }
        };

        let current_price = ohlcv.last_close();

        TickContext {
            scope: self.scope.clone(),
            now: Utc::now(),
            position,
            balances,
            open_orders,
            bars,
            ohlcv,
            current_price,
            state,
            engine_mode,
            market_data,
            risk,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{TradingMode, Venue};
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock;

    use crate::types::StrategyState;

    fn context() -> TickContext {
        TickContext {
            scope: Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet),
            now: Utc::now(),
            position: None,
            balances: HashMap::new(),
            open_orders: Vec::new(),
            bars: Vec::new(),
            ohlcv: OhlcvFrame::default(),
            current_price: None,
            state: Arc::new(RwLock::new(StrategyState::default())),
            engine_mode: EngineMode::Running,
            market_data: None,
            risk: RiskSettings::default(),
        }
    }

    #[test]
    fn mode_helpers() {
        let mut ctx = context();
        assert!(ctx.can_trade());
        assert!(!ctx.close_only());

        ctx.engine_mode = EngineMode::Safe;
        assert!(!ctx.can_trade());
        assert!(ctx.close_only());
    }

    #[test]
    fn position_helpers() {
        let mut ctx = context();
        assert!(!ctx.has_position());

        ctx.position = Some(aegis_projector::PositionView {
            symbol: "XRPUSDT".into(),
            side: Some("LONG".into()),
            qty: dec!(10),
            entry_price: dec!(0.5),
            unrealized_pnl: Decimal::ZERO,
            leverage: 10,
            margin_type: "isolated".into(),
        });
        assert!(ctx.has_position());
    }

    #[tokio::test]
    async fn multi_timeframe_without_provider_is_empty() {
        let ctx = context();
        let frame = ctx.get_ohlcv("1h", 24).await;
        assert!(frame.is_empty());
    }
}
