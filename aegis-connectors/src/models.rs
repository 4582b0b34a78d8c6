//! Typed exchange payloads.
//!
//! REST responses use camelCase field names; user-data-stream frames use
//! Binance's single-letter keys, mapped with explicit renames. Decimal
//! amounts arrive as strings and stay strings in stream frames (the mapper
//! copies them into event payloads verbatim); REST models parse them into
//! `Decimal` where the engine does arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ConnectorError, Result};

// =============================================================================
// REST requests
// =============================================================================

/// New-order request. `client_order_id` is the idempotency boundary on the
/// exchange side.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: String,
    pub reduce_only: bool,
    pub position_side: String,
    pub client_order_id: String,
}

// =============================================================================
// REST responses
// =============================================================================

/// Acknowledgement for place/cancel order calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub executed_qty: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderInfo {
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub status: String,
    #[serde(default)]
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
    #[serde(default)]
    pub available_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    #[serde(alias = "unRealizedProfit", default)]
    pub unrealized_profit: Decimal,
    #[serde(default, deserialize_with = "leverage_from_string")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_type: String,
    #[serde(default)]
    pub position_side: String,
}

fn leverage_from_string<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Binance reports leverage as a numeric string
    let raw = serde_json::Value::deserialize(deserializer)?;
    match raw {
        serde_json::Value::String(s) => s.parse::<u32>().map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => Ok(n.as_u64().unwrap_or(1) as u32),
        _ => Ok(1),
    }
}

/// One candlestick. The wire format is a positional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Kline {
    /// Parse a raw kline row (`[openTime, "o", "h", "l", "c", "v", closeTime, ...]`).
    pub fn from_row(row: &serde_json::Value) -> Result<Self> {
        let arr = row
            .as_array()
            .ok_or_else(|| ConnectorError::Parse("kline row is not an array".into()))?;
        if arr.len() < 7 {
            return Err(ConnectorError::Parse(format!(
                "kline row too short: {} fields",
                arr.len()
            )));
        }

        let decimal_at = |i: usize| -> Result<Decimal> {
            arr[i]
                .as_str()
                .ok_or_else(|| ConnectorError::Parse(format!("kline field {i} not a string")))?
                .parse::<Decimal>()
                .map_err(|e| ConnectorError::Parse(format!("kline field {i}: {e}")))
        };

        Ok(Self {
            open_time: arr[0].as_i64().unwrap_or(0),
            open: decimal_at(1)?,
            high: decimal_at(2)?,
            low: decimal_at(3)?,
            close: decimal_at(4)?,
            volume: decimal_at(5)?,
            close_time: arr[6].as_i64().unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRecord {
    #[serde(default)]
    pub symbol: String,
    pub income_type: String,
    pub income: Decimal,
    pub asset: String,
    pub time: i64,
    pub tran_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub tran_id: i64,
    pub asset: String,
    pub amount: Decimal,
    /// Direction, e.g. `MAIN_UMFUTURE` / `UMFUTURE_MAIN`
    #[serde(rename = "type")]
    pub transfer_type: String,
    pub status: String,
    pub timestamp: i64,
}

/// Paginated transfer-history page.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub rows: Vec<TransferRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRecord {
    pub order_id: i64,
    pub from_asset: String,
    pub from_amount: Decimal,
    pub to_asset: String,
    pub to_amount: Decimal,
    pub create_time: i64,
    #[serde(default)]
    pub order_status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertPage {
    #[serde(default)]
    pub list: Vec<ConvertRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub id: String,
    #[serde(default)]
    pub tx_id: String,
    #[serde(rename = "coin")]
    pub asset: String,
    pub amount: Decimal,
    /// 1 = success/credited for deposits
    pub status: i32,
    pub insert_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRecord {
    pub id: String,
    #[serde(rename = "coin")]
    pub asset: String,
    pub amount: Decimal,
    #[serde(default)]
    pub transaction_fee: Decimal,
    /// 6 = completed for withdrawals
    pub status: i32,
    pub apply_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DustRecord {
    pub trans_id: i64,
    pub from_asset: String,
    pub amount: Decimal,
    pub transfered_amount: Decimal,
    pub service_charge_amount: Decimal,
    pub operate_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DustLog {
    #[serde(default)]
    pub user_asset_dribblets: Vec<DustDribblet>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DustDribblet {
    #[serde(default)]
    pub operate_time: i64,
    #[serde(default)]
    pub user_asset_dribblet_details: Vec<DustRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub snapshot_vos: Vec<SnapshotVo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVo {
    #[serde(rename = "type")]
    pub snapshot_type: String,
    pub update_time: i64,
    pub data: SnapshotData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    /// SPOT snapshots
    #[serde(default)]
    pub balances: Vec<SpotBalance>,
    /// FUTURES snapshots
    #[serde(default)]
    pub assets: Vec<SnapshotAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAsset {
    pub asset: String,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

// =============================================================================
// User-data-stream frames
// =============================================================================

/// One parsed user-data-stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum UserDataFrame {
    AccountUpdate(AccountUpdateFrame),
    OrderTradeUpdate(OrderTradeUpdateFrame),
    MarginCall(MarginCallFrame),
    ListenKeyExpired { event_time: i64 },
}

impl UserDataFrame {
    /// Parse a raw frame. Unknown event types return `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let Some(event) = value.get("e").and_then(|e| e.as_str()) else {
            return Ok(None);
        };

        let frame = match event {
            "ACCOUNT_UPDATE" => {
                UserDataFrame::AccountUpdate(serde_json::from_value(value)?)
            }
            "ORDER_TRADE_UPDATE" => {
                UserDataFrame::OrderTradeUpdate(serde_json::from_value(value)?)
            }
            "MARGIN_CALL" => UserDataFrame::MarginCall(serde_json::from_value(value)?),
            "listenKeyExpired" => UserDataFrame::ListenKeyExpired {
                event_time: value.get("E").and_then(|e| e.as_i64()).unwrap_or(0),
            },
            _ => return Ok(None),
        };

        Ok(Some(frame))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountUpdateFrame {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub tx_time: i64,
    #[serde(rename = "a")]
    pub data: AccountUpdateData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountUpdateData {
    /// Update reason (ORDER, FUNDING_FEE, DEPOSIT, ...)
    #[serde(rename = "m", default)]
    pub reason: String,
    #[serde(rename = "B", default)]
    pub balances: Vec<WsBalance>,
    #[serde(rename = "P", default)]
    pub positions: Vec<WsPosition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb")]
    pub wallet_balance: String,
    #[serde(rename = "cw", default)]
    pub cross_wallet_balance: String,
    #[serde(rename = "bc", default)]
    pub balance_change: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "pa")]
    pub position_amount: String,
    #[serde(rename = "ep", default)]
    pub entry_price: String,
    #[serde(rename = "cr", default)]
    pub accumulated_realized: String,
    #[serde(rename = "up", default)]
    pub unrealized_pnl: String,
    #[serde(rename = "mt", default)]
    pub margin_type: String,
    #[serde(rename = "iw", default)]
    pub isolated_wallet: String,
    #[serde(rename = "ps", default)]
    pub position_side: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderTradeUpdateFrame {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub tx_time: i64,
    #[serde(rename = "o")]
    pub order: WsOrderUpdate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsOrderUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "f", default)]
    pub time_in_force: String,
    #[serde(rename = "q", default)]
    pub original_qty: String,
    #[serde(rename = "p", default)]
    pub price: String,
    #[serde(rename = "ap", default)]
    pub avg_price: String,
    #[serde(rename = "sp", default)]
    pub stop_price: String,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "l", default)]
    pub last_filled_qty: String,
    #[serde(rename = "z", default)]
    pub cumulative_filled_qty: String,
    #[serde(rename = "L", default)]
    pub last_price: String,
    #[serde(rename = "n", default)]
    pub commission: String,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "T", default)]
    pub trade_time: i64,
    #[serde(rename = "t", default)]
    pub trade_id: i64,
    #[serde(rename = "m", default)]
    pub is_maker: bool,
    #[serde(rename = "R", default)]
    pub reduce_only: bool,
    #[serde(rename = "ps", default)]
    pub position_side: String,
    #[serde(rename = "rp", default)]
    pub realized_pnl: String,
    #[serde(rename = "Z", default)]
    pub cumulative_quote_qty: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarginCallFrame {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "cw", default)]
    pub cross_wallet_balance: String,
    #[serde(rename = "p", default)]
    pub positions: Vec<WsMarginCallPosition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsMarginCallPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "ps", default)]
    pub position_side: String,
    #[serde(rename = "pa", default)]
    pub position_amount: String,
    #[serde(rename = "mt", default)]
    pub margin_type: String,
    #[serde(rename = "up", default)]
    pub unrealized_pnl: String,
    #[serde(rename = "mm", default)]
    pub maintenance_margin: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn kline_from_positional_row() {
        let row = json!([
            1708408800000i64, "0.5123", "0.5200", "0.5100", "0.5150", "120345.1",
            1708409099999i64, "61999.2", 842, "60111.0", "30999.1", "0"
        ]);

        let kline = Kline::from_row(&row).unwrap();
        assert_eq!(kline.open_time, 1708408800000);
        assert_eq!(kline.close, dec!(0.5150));
        assert_eq!(kline.volume, dec!(120345.1));
    }

    #[test]
    fn parses_order_trade_update_frame() {
        let raw = r#"{
            "e": "ORDER_TRADE_UPDATE", "E": 1708408800123, "T": 1708408800100,
            "o": {
                "s": "XRPUSDT", "c": "ae-abc", "S": "BUY", "o": "MARKET", "f": "GTC",
                "q": "10", "p": "0", "ap": "0.5150", "sp": "0", "x": "TRADE", "X": "FILLED",
                "i": 123456, "l": "10", "z": "10", "L": "0.5150", "n": "0.002",
                "N": "USDT", "T": 1708408800100, "t": 777, "m": false, "R": false,
                "ps": "BOTH", "rp": "1.25", "Z": "5.15"
            }
        }"#;

        match UserDataFrame::parse(raw).unwrap().unwrap() {
            UserDataFrame::OrderTradeUpdate(frame) => {
                assert_eq!(frame.order.symbol, "XRPUSDT");
                assert_eq!(frame.order.trade_id, 777);
                assert_eq!(frame.order.execution_type, "TRADE");
                assert_eq!(frame.order.realized_pnl, "1.25");
                assert_eq!(frame.order.commission_asset.as_deref(), Some("USDT"));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn parses_account_update_frame() {
        let raw = r#"{
            "e": "ACCOUNT_UPDATE", "E": 1708408800123, "T": 1708408800100,
            "a": {
                "m": "ORDER",
                "B": [{"a": "USDT", "wb": "670.00", "cw": "670.00", "bc": "-1.5"}],
                "P": [{"s": "XRPUSDT", "pa": "10", "ep": "0.51", "cr": "0", "up": "0.05",
                       "mt": "isolated", "iw": "5.1", "ps": "BOTH"}]
            }
        }"#;

        match UserDataFrame::parse(raw).unwrap().unwrap() {
            UserDataFrame::AccountUpdate(frame) => {
                assert_eq!(frame.tx_time, 1708408800100);
                assert_eq!(frame.data.balances[0].balance_change, "-1.5");
                assert_eq!(frame.data.positions[0].symbol, "XRPUSDT");
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn listen_key_expired_and_unknown_frames() {
        let expired = UserDataFrame::parse(r#"{"e": "listenKeyExpired", "E": 1}"#).unwrap();
        assert_eq!(expired, Some(UserDataFrame::ListenKeyExpired { event_time: 1 }));

        let unknown = UserDataFrame::parse(r#"{"e": "TRADE_LITE", "E": 1}"#).unwrap();
        assert!(unknown.is_none());

        let untagged = UserDataFrame::parse(r#"{"result": null, "id": 1}"#).unwrap();
        assert!(untagged.is_none());
    }

    #[test]
    fn position_risk_parses_string_leverage() {
        let raw = json!({
            "symbol": "XRPUSDT", "positionAmt": "-25", "entryPrice": "0.52",
            "unRealizedProfit": "-0.10", "leverage": "10", "marginType": "isolated",
            "positionSide": "BOTH"
        });

        let risk: PositionRisk = serde_json::from_value(raw).unwrap();
        assert_eq!(risk.leverage, 10);
        assert_eq!(risk.position_amt, dec!(-25));
    }
}
