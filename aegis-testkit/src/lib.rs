//! Test fixtures shared across crates.
//!
//! In-memory stores with the schema applied, canonical scopes, canned
//! events/commands, and stream frames matching the exchange's wire shapes.

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use sqlx::sqlite::SqlitePool;

use aegis_connectors::models::{
    AccountSnapshot, FuturesBalance, SnapshotAsset, SnapshotData, SnapshotVo, SpotBalance,
    UserDataFrame,
};
use aegis_connectors::StubExchange;
use aegis_domain::{
    command_type, dedup, event_type, Actor, Command, CommandOptions, EntityKind, Event,
    EventSource, Scope, TradingMode, Venue,
};

/// In-memory database with the full schema.
pub async fn test_pool() -> SqlitePool {
    let pool = aegis_store::sqlite::connect_memory()
        .await
        .expect("memory pool");
    aegis_store::sqlite::init_schema(&pool)
        .await
        .expect("schema");
    pool
}

/// The canonical testnet scope on XRPUSDT futures.
pub fn test_scope() -> Scope {
    Scope::new(
        "BINANCE",
        Venue::Futures,
        "main",
        Some("XRPUSDT".to_string()),
        TradingMode::Testnet,
    )
}

/// A market-buy PlaceOrder command with optional idempotency key.
pub fn place_order_command(idempotency_key: Option<&str>, priority: i64) -> Command {
    Command::create(
        command_type::PLACE_ORDER,
        Actor::user("admin"),
        test_scope(),
        json!({
            "symbol": "XRPUSDT",
            "side": "BUY",
            "order_type": "MARKET",
            "quantity": "10",
        }),
        CommandOptions {
            priority,
            idempotency_key: idempotency_key.map(str::to_string),
            ..Default::default()
        },
    )
}

/// A TradeExecuted event for the given exchange trade id.
pub fn trade_executed_event(trade_id: &str, realized_pnl: &str) -> Event {
    Event::new(
        event_type::TRADE_EXECUTED,
        EventSource::Websocket,
        EntityKind::Trade,
        trade_id,
        test_scope(),
        dedup::trade_key("BINANCE", Venue::Futures, "XRPUSDT", trade_id),
        json!({
            "exchange_trade_id": trade_id,
            "symbol": "XRPUSDT",
            "side": "SELL",
            "qty": "10",
            "price": "0.515",
            "commission": "0.002",
            "commission_asset": "USDT",
            "realized_pnl": realized_pnl,
        }),
    )
}

/// A filled-order stream frame for trade id 777 / order id 123456.
pub fn fill_frame(symbol: &str) -> UserDataFrame {
    let raw = format!(
        r#"{{
            "e": "ORDER_TRADE_UPDATE", "E": 1708408800123, "T": 1708408800100,
            "o": {{"s": "{symbol}", "c": "ae-abc", "S": "SELL", "o": "MARKET", "f": "GTC",
                  "q": "10", "p": "0", "ap": "0.515", "sp": "0", "x": "TRADE", "X": "FILLED",
                  "i": 123456, "l": "10", "z": "10", "L": "0.515", "n": "0.002",
                  "N": "USDT", "T": 1708408800100, "t": 777, "m": false, "R": true,
                  "ps": "BOTH", "rp": "1.25", "Z": "5.15"}}
        }}"#
    );
    UserDataFrame::parse(&raw)
        .expect("frame parses")
        .expect("frame is known")
}

/// A stub exchange with USDT balances on both venues and valid snapshots
/// dated `snapshot_date` (YYYY-MM-DD midnight assumed).
pub fn funded_stub(spot_usdt: rust_decimal::Decimal, futures_usdt: rust_decimal::Decimal) -> StubExchange {
    let stub = StubExchange::new(dec!(0.5));
    let now = Utc::now().timestamp_millis();

    stub.set_futures_balances(vec![FuturesBalance {
        asset: "USDT".into(),
        wallet_balance: futures_usdt,
        available_balance: futures_usdt,
    }]);
    stub.set_spot_balances(vec![SpotBalance {
        asset: "USDT".into(),
        free: spot_usdt,
        locked: dec!(0),
    }]);
    stub.set_snapshot(
        "SPOT",
        AccountSnapshot {
            code: 200,
            msg: String::new(),
            snapshot_vos: vec![SnapshotVo {
                snapshot_type: "spot".into(),
                update_time: now,
                data: SnapshotData {
                    balances: vec![SpotBalance {
                        asset: "USDT".into(),
                        free: spot_usdt,
                        locked: dec!(0),
                    }],
                    assets: Vec::new(),
                },
            }],
        },
    );
    stub.set_snapshot(
        "FUTURES",
        AccountSnapshot {
            code: 200,
            msg: String::new(),
            snapshot_vos: vec![SnapshotVo {
                snapshot_type: "futures".into(),
                update_time: now,
                data: SnapshotData {
                    balances: Vec::new(),
                    assets: vec![SnapshotAsset {
                        asset: "USDT".into(),
                        wallet_balance: futures_usdt,
                    }],
                },
            }],
        },
    );

    stub
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixtures_are_coherent() {
        let pool = test_pool().await;
        let events = aegis_store::EventStore::new(pool);

        let event = trade_executed_event("777", "1.25");
        assert!(events.append(&event).await.unwrap().is_stored());

        let command = place_order_command(Some("K1"), 0);
        assert_eq!(command.idempotency_key, "K1");

        match fill_frame("XRPUSDT") {
            UserDataFrame::OrderTradeUpdate(frame) => {
                assert_eq!(frame.order.trade_id, 777);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
