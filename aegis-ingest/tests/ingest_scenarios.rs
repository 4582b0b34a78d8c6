//! Ingestion scenarios: dedup on reconnect with exactly-once strategy
//! callbacks, and initial-capital + backfill chronology.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::sync::RwLock;

use aegis_connectors::models::{
    AccountSnapshot, IncomeRecord, SnapshotAsset, SnapshotData, SnapshotVo, SpotBalance,
    UserDataFrame,
};
use aegis_connectors::StubExchange;
use aegis_domain::{event_type, Scope, TradingMode, Venue};
use aegis_ingest::{HistoricalBackfill, InitialCapitalRecorder, StreamHandler};
use aegis_projector::Projector;
use aegis_store::{sqlite, CheckpointStore, CommandStore, ConfigStore, EventStore};
use aegis_strategy::{CommandEmitter, Strategy, StrategyRunner, TickContext, TradeEvent};

fn scope() -> Scope {
    Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Production)
}

struct TradeCounter {
    fills: Arc<AtomicU64>,
}

#[async_trait]
impl Strategy for TradeCounter {
    fn name(&self) -> &str {
        "trade_counter"
    }

    async fn on_tick(&mut self, _ctx: &TickContext, _emit: &CommandEmitter) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_trade(
        &mut self,
        _trade: &TradeEvent,
        _ctx: &TickContext,
        _emit: &CommandEmitter,
    ) -> anyhow::Result<()> {
        self.fills.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn trade_frame() -> UserDataFrame {
    let raw = r#"{
        "e": "ORDER_TRADE_UPDATE", "E": 1708408800123, "T": 1708408800100,
        "o": {"s": "XRPUSDT", "c": "ae-abc", "S": "SELL", "o": "MARKET", "f": "GTC",
              "q": "10", "p": "0", "ap": "0.515", "sp": "0", "x": "TRADE", "X": "FILLED",
              "i": 123456, "l": "10", "z": "10", "L": "0.515", "n": "0.002",
              "N": "USDT", "T": 1708408800100, "t": 777, "m": false, "R": true,
              "ps": "BOTH", "rp": "1.25", "Z": "5.15"}
    }"#;
    UserDataFrame::parse(raw).unwrap().unwrap()
}

#[tokio::test]
async fn dedup_on_reconnect_fires_callback_exactly_once() {
    let pool = sqlite::connect_memory().await.unwrap();
    sqlite::init_schema(&pool).await.unwrap();

    let events = EventStore::new(pool.clone());
    let commands = CommandStore::new(pool.clone());
    let config = ConfigStore::new(pool.clone());
    config.ensure_defaults().await.unwrap();

    let projector = Arc::new(Projector::new(
        events.clone(),
        CheckpointStore::new(pool.clone()),
        pool,
        scope(),
    ));

    let fills = Arc::new(AtomicU64::new(0));
    let mut runner = StrategyRunner::new(
        events.clone(),
        commands,
        config,
        projector,
        None,
        None,
        scope(),
        "5m",
        100,
    );
    runner
        .load_instance(Box::new(TradeCounter { fills: fills.clone() }), json!({}))
        .await
        .unwrap();
    runner.start().await.unwrap();
    let runner = Arc::new(RwLock::new(runner));

    let handler = StreamHandler::new(events.clone(), scope(), Some("XRPUSDT".into()), Some(runner));

    // First delivery: events persist, callback fires
    let stored = handler.handle(&trade_frame()).await.unwrap();
    assert_eq!(stored, 2);
    assert_eq!(fills.load(Ordering::Relaxed), 1);

    let before = events.count().await.unwrap();

    // The replay buffer re-delivers the same frame after reconnect
    let replay = handler.handle(&trade_frame()).await.unwrap();
    assert_eq!(replay, 0);
    assert_eq!(events.count().await.unwrap(), before);
    assert_eq!(fills.load(Ordering::Relaxed), 1, "callback must not re-fire");

    let trades = events.get_by_type(event_type::TRADE_EXECUTED, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].dedup_key, "BINANCE:FUTURES:XRPUSDT:trade:777");
}

#[tokio::test]
async fn initial_capital_precedes_backfilled_income() {
    let pool = sqlite::connect_memory().await.unwrap();
    sqlite::init_schema(&pool).await.unwrap();
    let events = EventStore::new(pool.clone());
    let config = ConfigStore::new(pool);

    let snapshot_time = Utc
        .with_ymd_and_hms(2024, 1, 15, 23, 59, 59)
        .unwrap()
        .timestamp_millis();

    let stub = Arc::new(StubExchange::default());
    stub.set_snapshot(
        "SPOT",
        AccountSnapshot {
            code: 200,
            msg: String::new(),
            snapshot_vos: vec![SnapshotVo {
                snapshot_type: "spot".into(),
                update_time: snapshot_time,
                data: SnapshotData {
                    balances: vec![SpotBalance {
                        asset: "USDT".into(),
                        free: dec!(100),
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
                update_time: snapshot_time,
                data: SnapshotData {
                    balances: Vec::new(),
                    assets: vec![SnapshotAsset {
                        asset: "USDT".into(),
                        wallet_balance: dec!(400),
                    }],
                },
            }],
        },
    );
    // Income dated after the snapshot day
    stub.set_income(vec![IncomeRecord {
        symbol: "XRPUSDT".into(),
        income_type: "FUNDING_FEE".into(),
        income: dec!(-0.10),
        asset: "USDT".into(),
        time: Utc.with_ymd_and_hms(2024, 1, 16, 8, 0, 0).unwrap().timestamp_millis(),
        tran_id: 42,
    }]);

    let recorder = InitialCapitalRecorder::new(stub.clone(), events.clone(), config, scope());
    let summary = recorder
        .record(Some(Utc.with_ymd_and_hms(2024, 1, 16, 12, 0, 0).unwrap()))
        .await
        .unwrap();
    assert_eq!(summary.epoch_date, "2024-01-15");

    let backfill = HistoricalBackfill::new(stub, events.clone(), scope());
    let report = backfill
        .backfill(Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        .await
        .unwrap();
    assert_eq!(report.income, 1);

    // By timestamp, the capital record comes first
    let ordered = events.get_all_by_ts(100).await.unwrap();
    assert_eq!(ordered.len(), 2);
    assert_eq!(ordered[0].event_type, event_type::INITIAL_CAPITAL_ESTABLISHED);
    assert_eq!(ordered[1].event_type, event_type::FUNDING_APPLIED);

    // Re-running the recorder returns the existing record untouched
    let replay = recorder.record(None).await.unwrap();
    assert_eq!(replay.epoch_date, "2024-01-15");
    assert_eq!(
        events
            .get_by_type(event_type::INITIAL_CAPITAL_ESTABLISHED, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}
