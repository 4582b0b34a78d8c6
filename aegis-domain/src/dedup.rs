//! Deterministic dedup keys.
//!
//! Every ingested fact gets a key synthesised from its natural identifiers so
//! that replays (reconnects, poller overlap, backfill re-runs) never insert
//! the same fact twice. Templates are part of the storage contract; changing
//! one silently re-ingests history.

use crate::scope::{TradingMode, Venue};

/// `{exchange}:{venue}:{symbol}:trade:{exchange_trade_id}`
pub fn trade_key(exchange: &str, venue: Venue, symbol: &str, exchange_trade_id: &str) -> String {
    format!("{exchange}:{venue}:{symbol}:trade:{exchange_trade_id}")
}

/// `{exchange}:{venue}:{symbol}:order:{exchange_order_id}`
pub fn order_key(exchange: &str, venue: Venue, symbol: &str, exchange_order_id: &str) -> String {
    format!("{exchange}:{venue}:{symbol}:order:{exchange_order_id}")
}

/// `{exchange}:{venue}:{symbol}:order:{exchange_order_id}:{status}:{update_time}`
pub fn order_status_key(
    exchange: &str,
    venue: Venue,
    symbol: &str,
    exchange_order_id: &str,
    status: &str,
    update_time_ms: i64,
) -> String {
    format!("{exchange}:{venue}:{symbol}:order:{exchange_order_id}:{status}:{update_time_ms}")
}

/// `{exchange}:{venue}:{symbol}:position:{tx_time}`
pub fn position_key(exchange: &str, venue: Venue, symbol: &str, tx_time_ms: i64) -> String {
    format!("{exchange}:{venue}:{symbol}:position:{tx_time_ms}")
}

/// `{exchange}:{venue}:{asset}:balance:{tx_time}`
pub fn balance_key(exchange: &str, venue: Venue, asset: &str, tx_time_ms: i64) -> String {
    format!("{exchange}:{venue}:{asset}:balance:{tx_time_ms}")
}

/// `{exchange}:{symbol}:funding:{funding_ts}`
pub fn funding_key(exchange: &str, symbol: &str, funding_ts_ms: i64) -> String {
    format!("{exchange}:{symbol}:funding:{funding_ts_ms}")
}

/// `{exchange}:rebate:{tran_id}`
pub fn rebate_key(exchange: &str, tran_id: &str) -> String {
    format!("{exchange}:rebate:{tran_id}")
}

/// `{exchange}:income:{income_type}:{tran_id}` — generic income families
pub fn income_key(exchange: &str, income_type: &str, tran_id: &str) -> String {
    format!("{exchange}:income:{income_type}:{tran_id}")
}

/// `{exchange}:transfer:{id}`
pub fn transfer_key(exchange: &str, transfer_id: &str) -> String {
    format!("{exchange}:transfer:{transfer_id}")
}

/// `{exchange}:deposit:{id}`
pub fn deposit_key(exchange: &str, deposit_id: &str) -> String {
    format!("{exchange}:deposit:{deposit_id}")
}

/// `{exchange}:withdraw:{id}`
pub fn withdraw_key(exchange: &str, withdraw_id: &str) -> String {
    format!("{exchange}:withdraw:{withdraw_id}")
}

/// `{exchange}:convert:{id}`
pub fn convert_key(exchange: &str, order_id: &str) -> String {
    format!("{exchange}:convert:{order_id}")
}

/// `{exchange}:dust:{id}`
pub fn dust_key(exchange: &str, trans_id: &str) -> String {
    format!("{exchange}:dust:{trans_id}")
}

/// `{exchange}:ws:{event}:{ts_ms}`
pub fn ws_key(exchange: &str, event: &str, ts_ms: i64) -> String {
    format!("{exchange}:ws:{event}:{ts_ms}")
}

/// `engine:{event}:{ts_ms}`
pub fn engine_key(event: &str, ts_ms: i64) -> String {
    format!("engine:{event}:{ts_ms}")
}

/// `{exchange}:{venue}:{symbol}:margin_call:{ts_ms}`
pub fn margin_call_key(exchange: &str, venue: Venue, symbol: &str, ts_ms: i64) -> String {
    format!("{exchange}:{venue}:{symbol}:margin_call:{ts_ms}")
}

/// `initial_capital:{mode}:{snapshot_date}` (date as `YYYY-MM-DD`)
pub fn initial_capital_key(mode: TradingMode, snapshot_date: &str) -> String {
    format!("initial_capital:{mode}:{snapshot_date}")
}

/// `opening_adjustment:{mode}:{venue}:{asset}:{ts_ms}`
pub fn opening_adjustment_key(mode: TradingMode, venue: Venue, asset: &str, ts_ms: i64) -> String {
    format!("opening_adjustment:{mode}:{venue}:{asset}:{ts_ms}")
}

/// `risk:rejected:{command_id}:{ts_ms}` — guard rejection records
pub fn risk_rejected_key(command_id: &str, ts_ms: i64) -> String {
    format!("risk:rejected:{command_id}:{ts_ms}")
}

/// `order:rejected:{command_id}` — handler-side order rejection
pub fn order_rejected_key(command_id: &str) -> String {
    format!("order:rejected:{command_id}")
}

/// `strategy:{name}:{action}:{ts_ms}` — strategy lifecycle records
pub fn strategy_key(name: &str, action: &str, ts_ms: i64) -> String {
    format!("strategy:{name}:{action}:{ts_ms}")
}

// =============================================================================
// Tests
// =============================================================================
