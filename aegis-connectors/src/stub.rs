//! Stub exchange for tests.
//!
//! Simulates the REST surface without network: orders ack immediately with a
//! counter-assigned id, history endpoints serve canned records, and
//! `fail_next` injects a one-shot error.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::*;
use crate::ports::ExchangeRest;
use crate::{ConnectorError, Result};

/// In-memory exchange double.
pub struct StubExchange {
    prices: RwLock<HashMap<String, Decimal>>,
    default_price: Decimal,
    order_counter: RwLock<i64>,
    placed_orders: RwLock<Vec<PlaceOrderRequest>>,
    cancelled: RwLock<Vec<String>>,
    leverage: RwLock<HashMap<String, u32>>,
    fail_next: RwLock<Option<String>>,

    futures_balances: RwLock<Vec<FuturesBalance>>,
    spot_balances: RwLock<Vec<SpotBalance>>,
    positions: RwLock<Vec<PositionRisk>>,
    open_orders: RwLock<Vec<OpenOrderInfo>>,
    klines: RwLock<HashMap<String, Vec<Kline>>>,
    income: RwLock<Vec<IncomeRecord>>,
    transfers: RwLock<Vec<TransferRecord>>,
    converts: RwLock<Vec<ConvertRecord>>,
    deposits: RwLock<Vec<DepositRecord>>,
    withdrawals: RwLock<Vec<WithdrawRecord>>,
    dust: RwLock<Vec<DustRecord>>,
    snapshots: RwLock<HashMap<String, AccountSnapshot>>,
}

impl StubExchange {
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            default_price,
            order_counter: RwLock::new(0),
            placed_orders: RwLock::new(Vec::new()),
            cancelled: RwLock::new(Vec::new()),
            leverage: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(None),
            futures_balances: RwLock::new(Vec::new()),
            spot_balances: RwLock::new(Vec::new()),
            positions: RwLock::new(Vec::new()),
            open_orders: RwLock::new(Vec::new()),
            klines: RwLock::new(HashMap::new()),
            income: RwLock::new(Vec::new()),
            transfers: RwLock::new(Vec::new()),
            converts: RwLock::new(Vec::new()),
            deposits: RwLock::new(Vec::new()),
            withdrawals: RwLock::new(Vec::new()),
            dust: RwLock::new(Vec::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().unwrap().insert(symbol.to_string(), price);
    }

    /// The next placed order gets this exchange order id.
    pub fn set_next_order_id(&self, id: i64) {
        *self.order_counter.write().unwrap() = id - 1;
    }

    /// Fail the next call with this message, once.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.write().unwrap() = Some(message.to_string());
    }

    pub fn set_futures_balances(&self, balances: Vec<FuturesBalance>) {
        *self.futures_balances.write().unwrap() = balances;
    }

    pub fn set_spot_balances(&self, balances: Vec<SpotBalance>) {
        *self.spot_balances.write().unwrap() = balances;
    }

    pub fn set_positions(&self, positions: Vec<PositionRisk>) {
        *self.positions.write().unwrap() = positions;
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrderInfo>) {
        *self.open_orders.write().unwrap() = orders;
    }

    pub fn set_klines(&self, symbol: &str, interval: &str, klines: Vec<Kline>) {
        self.klines
            .write()
            .unwrap()
            .insert(format!("{symbol}:{interval}"), klines);
    }

    pub fn set_income(&self, records: Vec<IncomeRecord>) {
        *self.income.write().unwrap() = records;
    }

    pub fn set_transfers(&self, records: Vec<TransferRecord>) {
        *self.transfers.write().unwrap() = records;
    }

    pub fn set_converts(&self, records: Vec<ConvertRecord>) {
        *self.converts.write().unwrap() = records;
    }

    pub fn set_deposits(&self, records: Vec<DepositRecord>) {
        *self.deposits.write().unwrap() = records;
    }

    pub fn set_withdrawals(&self, records: Vec<WithdrawRecord>) {
        *self.withdrawals.write().unwrap() = records;
    }

    pub fn set_dust(&self, records: Vec<DustRecord>) {
        *self.dust.write().unwrap() = records;
    }

    pub fn set_snapshot(&self, account_type: &str, snapshot: AccountSnapshot) {
        self.snapshots
            .write()
            .unwrap()
            .insert(account_type.to_string(), snapshot);
    }

    /// Orders the stub has accepted, in order.
    pub fn placed_orders(&self) -> Vec<PlaceOrderRequest> {
        self.placed_orders.read().unwrap().clone()
    }

    /// Cancel targets seen so far (`symbol:id` strings).
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.read().unwrap().clone()
    }

    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.leverage.read().unwrap().get(symbol).copied()
    }

    fn price_for(&self, symbol: &str) -> Decimal {
        self.prices
            .read()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(self.default_price)
    }

    fn take_failure(&self) -> Option<ConnectorError> {
        self.fail_next
            .write()
            .unwrap()
            .take()
            .map(|msg| ConnectorError::Api { code: -2019, msg })
    }

    fn next_order_id(&self) -> i64 {
        let mut counter = self.order_counter.write().unwrap();
        *counter += 1;
        *counter
    }
}

impl Default for StubExchange {
    fn default() -> Self {
        Self::new(Decimal::ONE)
    }
}

#[async_trait]
impl ExchangeRest for StubExchange {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<OrderAck> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        self.placed_orders.write().unwrap().push(request.clone());
        let order_id = self.next_order_id();

        Ok(OrderAck {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            status: "NEW".to_string(),
            avg_price: Some(self.price_for(&request.symbol)),
            executed_qty: Some(Decimal::ZERO),
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<i64>,
        client_order_id: Option<&str>,
    ) -> Result<OrderAck> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let id = order_id.unwrap_or(0);
        let target = client_order_id
            .map(|c| format!("{symbol}:{c}"))
            .unwrap_or_else(|| format!("{symbol}:{id}"));
        self.cancelled.write().unwrap().push(target);

        Ok(OrderAck {
            order_id: id,
            client_order_id: client_order_id.unwrap_or_default().to_string(),
            symbol: symbol.to_string(),
            status: "CANCELED".to_string(),
            avg_price: None,
            executed_qty: None,
        })
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.cancelled
            .write()
            .unwrap()
            .push(format!("{symbol}:*"));
        self.open_orders
            .write()
            .unwrap()
            .retain(|o| o.symbol != symbol);
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.leverage
            .write()
            .unwrap()
            .insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrderInfo>> {
        let orders = self.open_orders.read().unwrap();
        Ok(orders
            .iter()
            .filter(|o| symbol.is_none_or(|s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn futures_balances(&self) -> Result<Vec<FuturesBalance>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.futures_balances.read().unwrap().clone())
    }

    async fn spot_balances(&self) -> Result<Vec<SpotBalance>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.spot_balances.read().unwrap().clone())
    }

    async fn position_risk(&self, symbol: Option<&str>) -> Result<Vec<PositionRisk>> {
        let positions = self.positions.read().unwrap();
        Ok(positions
            .iter()
            .filter(|p| symbol.is_none_or(|s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let klines = self.klines.read().unwrap();
        let mut rows = klines
            .get(&format!("{symbol}:{interval}"))
            .cloned()
            .unwrap_or_default();
        if rows.len() > limit as usize {
            rows = rows[rows.len() - limit as usize..].to_vec();
        }
        Ok(rows)
    }

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self.price_for(symbol))
    }

    async fn income_history(
        &self,
        start_time_ms: i64,
        end_time_ms: i64,
        _limit: u32,
    ) -> Result<Vec<IncomeRecord>> {
        Ok(self
            .income
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.time >= start_time_ms && r.time <= end_time_ms)
            .cloned()
            .collect())
    }

    async fn transfer_history(
        &self,
        direction: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        page: u32,
        page_size: u32,
    ) -> Result<TransferPage> {
        let matching: Vec<TransferRecord> = self
            .transfers
            .read()
            .unwrap()
            .iter()
            .filter(|r| {
                r.transfer_type == direction
                    && r.timestamp >= start_time_ms
                    && r.timestamp <= end_time_ms
            })
            .cloned()
            .collect();

        let total = matching.len() as u64;
        let start = ((page.saturating_sub(1)) * page_size) as usize;
        let rows = matching
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(TransferPage { total, rows })
    }

    async fn convert_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<ConvertRecord>> {
        Ok(self
            .converts
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.create_time >= start_time_ms && r.create_time <= end_time_ms)
            .cloned()
            .collect())
    }

    async fn deposit_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DepositRecord>> {
        Ok(self
            .deposits
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.insert_time >= start_time_ms && r.insert_time <= end_time_ms)
            .cloned()
            .collect())
    }

    async fn withdraw_history(&self, _start_time_ms: i64, _end_time_ms: i64) -> Result<Vec<WithdrawRecord>> {
        Ok(self.withdrawals.read().unwrap().clone())
    }

    async fn dust_log(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DustRecord>> {
        Ok(self
            .dust
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.operate_time >= start_time_ms && r.operate_time <= end_time_ms)
            .cloned()
            .collect())
    }

    async fn account_snapshot(
        &self,
        account_type: &str,
        _start_time_ms: i64,
        _end_time_ms: i64,
        _limit: u32,
    ) -> Result<AccountSnapshot> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        Ok(self
            .snapshots
            .read()
            .unwrap()
            .get(account_type)
            .cloned()
            .unwrap_or(AccountSnapshot {
                code: 200,
                msg: String::new(),
                snapshot_vos: Vec::new(),
            }))
    }

    async fn create_listen_key(&self) -> Result<String> {
        Ok("stub-listen-key".to_string())
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<()> {
        Ok(())
    }

    fn used_weight(&self) -> Option<u32> {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_order(client_order_id: &str) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "XRPUSDT".into(),
            side: "BUY".into(),
            order_type: "MARKET".into(),
            quantity: dec!(10),
            price: None,
            time_in_force: "GTC".into(),
            reduce_only: false,
            position_side: "BOTH".into(),
            client_order_id: client_order_id.into(),
        }
    }

    #[tokio::test]
    async fn orders_get_sequential_ids() {
        let stub = StubExchange::new(dec!(0.5));
        stub.set_next_order_id(123);

        let a = stub.place_order(&market_order("ae-1")).await.unwrap();
        let b = stub.place_order(&market_order("ae-2")).await.unwrap();

        assert_eq!(a.order_id, 123);
        assert_eq!(b.order_id, 124);
        assert_eq!(stub.placed_orders().len(), 2);
    }

    #[tokio::test]
    async fn fail_next_fails_exactly_once() {
        let stub = StubExchange::new(dec!(0.5));
        stub.fail_next("Margin is insufficient.");

        let err = stub.place_order(&market_order("ae-1")).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Api { code: -2019, .. }));

        stub.place_order(&market_order("ae-2")).await.unwrap();
    }

    #[tokio::test]
    async fn transfer_history_filters_direction_and_window() {
        let stub = StubExchange::default();
        stub.set_transfers(vec![
            TransferRecord {
                tran_id: 1,
                asset: "USDT".into(),
                amount: dec!(100),
                transfer_type: "MAIN_UMFUTURE".into(),
                status: "CONFIRMED".into(),
                timestamp: 1_000,
            },
            TransferRecord {
                tran_id: 2,
                asset: "USDT".into(),
                amount: dec!(50),
                transfer_type: "UMFUTURE_MAIN".into(),
                status: "CONFIRMED".into(),
                timestamp: 2_000,
            },
        ]);

        let page = stub
            .transfer_history("MAIN_UMFUTURE", 0, 10_000, 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].tran_id, 1);
    }
}
