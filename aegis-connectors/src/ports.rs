//! Exchange port.
//!
//! The engine consumes this trait only; `BinanceRest` implements it for the
//! real exchange and `StubExchange` for tests. All methods suspend.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{
    AccountSnapshot, ConvertRecord, DepositRecord, DustRecord, FuturesBalance, IncomeRecord,
    Kline, OpenOrderInfo, OrderAck, PlaceOrderRequest, PositionRisk, SpotBalance, TransferPage,
    WithdrawRecord,
};
use crate::Result;

/// REST surface of the exchange adapter.
#[async_trait]
pub trait ExchangeRest: Send + Sync {
    /// Submit a new futures order. Idempotent on `client_order_id`.
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<OrderAck>;

    /// Cancel by exchange id or client id (at least one required).
    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<i64>,
        client_order_id: Option<&str>,
    ) -> Result<OrderAck>;

    /// Cancel every open order on a symbol.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;

    /// Change initial leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Open orders, optionally filtered by symbol.
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrderInfo>>;

    /// Futures wallet balances.
    async fn futures_balances(&self) -> Result<Vec<FuturesBalance>>;

    /// Spot wallet balances (non-zero only).
    async fn spot_balances(&self) -> Result<Vec<SpotBalance>>;

    /// Current positions, optionally filtered by symbol.
    async fn position_risk(&self, symbol: Option<&str>) -> Result<Vec<PositionRisk>>;

    /// Candlesticks, oldest first.
    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>>;

    /// Latest traded price for a symbol.
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal>;

    /// Futures income records (funding fees, rebates, ...) in a time window.
    async fn income_history(
        &self,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> Result<Vec<IncomeRecord>>;

    /// One page of SPOT↔FUTURES transfer history for a direction.
    async fn transfer_history(
        &self,
        direction: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        page: u32,
        page_size: u32,
    ) -> Result<TransferPage>;

    /// Conversion history in a time window.
    async fn convert_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<ConvertRecord>>;

    /// External deposit history in a time window.
    async fn deposit_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DepositRecord>>;

    /// Withdrawal history in a time window.
    async fn withdraw_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<WithdrawRecord>>;

    /// Dust conversion log in a time window.
    async fn dust_log(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DustRecord>>;

    /// Daily account snapshots for `SPOT` or `FUTURES`.
    async fn account_snapshot(
        &self,
        account_type: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> Result<AccountSnapshot>;

    /// Create a user-data-stream listen key.
    async fn create_listen_key(&self) -> Result<String>;

    /// Keep a listen key alive (valid 60 min otherwise).
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()>;

    /// Most recent request weight reported by the exchange, if any.
    fn used_weight(&self) -> Option<u32>;
}
