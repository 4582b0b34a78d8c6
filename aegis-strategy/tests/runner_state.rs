//! Runner behavior: state persistence/restore, error fail-closed, and the
//! event entry points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;

use aegis_projector::Projector;
use aegis_store::{
    sqlite, CheckpointStore, CommandStore, ConfigStore, EventStore, StrategyStateRecord,
};
use aegis_strategy::{
    CommandEmitter, Strategy, StrategyRunner, TickContext, TradeEvent,
};
use aegis_domain::{Scope, TradingMode, Venue};

fn scope() -> Scope {
    Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
}

struct Harness {
    config: ConfigStore,
    runner: StrategyRunner,
}

async fn harness() -> Harness {
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

    let runner = StrategyRunner::new(
        events,
        commands,
        config.clone(),
        projector,
        None,
        None,
        scope(),
        "5m",
        100,
    );

    Harness { config, runner }
}

/// Counts callbacks; optionally fails every tick.
#[derive(Default)]
struct Probe {
    ticks: Arc<AtomicU64>,
    trades: Arc<AtomicU64>,
    fail_ticks: bool,
    survive_errors: bool,
}

#[async_trait]
impl Strategy for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn on_tick(&mut self, _ctx: &TickContext, _emit: &CommandEmitter) -> anyhow::Result<()> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if self.fail_ticks {
            anyhow::bail!("tick exploded");
        }
        Ok(())
    }

    async fn on_trade(
        &mut self,
        trade: &TradeEvent,
        ctx: &TickContext,
        _emit: &CommandEmitter,
    ) -> anyhow::Result<()> {
        self.trades.fetch_add(1, Ordering::Relaxed);
        if trade.is_reduce() {
            ctx.state.write().await.record_trade();
        }
        Ok(())
    }

    async fn on_error(&mut self, _error: &anyhow::Error, _ctx: &TickContext) -> bool {
        self.survive_errors
    }
}

fn closing_trade(trade_id: &str) -> TradeEvent {
    TradeEvent {
        trade_id: trade_id.into(),
        order_id: "1".into(),
        client_order_id: Some("ae-cmd".into()),
        symbol: "XRPUSDT".into(),
        side: "SELL".into(),
        price: dec!(0.52),
        quantity: dec!(10),
        realized_pnl: dec!(1.5),
        commission: dec!(0.002),
        commission_asset: "USDT".into(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn persisted_state_is_visible_after_restart() {
    let mut h = harness().await;

    // A previous process left its accounting state behind
    h.config
        .save_strategy_state(&StrategyStateRecord {
            account_equity: "512.75".into(),
            trade_count_since_reset: 12,
            total_trade_count: 62,
        })
        .await
        .unwrap();

    h.runner
        .load_instance(Box::new(Probe::default()), json!({}))
        .await
        .unwrap();
    h.runner.start().await.unwrap();

    let state = h.runner.state_handle();
    let state = state.read().await;
    assert_eq!(state.account_equity, dec!(512.75));
    assert_eq!(state.trade_count_since_reset, 12);
    assert_eq!(state.total_trade_count, 62);
}

#[tokio::test]
async fn zeroed_record_is_not_restored() {
    let mut h = harness().await;

    h.runner
        .load_instance(Box::new(Probe::default()), json!({}))
        .await
        .unwrap();
    h.runner.start().await.unwrap();

    let state = h.runner.state_handle();
    assert_eq!(state.read().await.total_trade_count, 0);
}

#[tokio::test]
async fn trade_count_change_persists_immediately() {
    let mut h = harness().await;

    h.runner
        .load_instance(Box::new(Probe::default()), json!({}))
        .await
        .unwrap();
    h.runner.start().await.unwrap();

    assert!(h.runner.handle_trade_event(&closing_trade("t1")).await);
    assert!(h.runner.handle_trade_event(&closing_trade("t2")).await);

    let record = h.config.strategy_state().await.unwrap();
    assert_eq!(record.total_trade_count, 2);
    assert_eq!(record.trade_count_since_reset, 2);
}

#[tokio::test]
async fn stop_persists_state_and_flags_status() {
    let mut h = harness().await;

    h.runner
        .load_instance(Box::new(Probe::default()), json!({}))
        .await
        .unwrap();
    h.runner.start().await.unwrap();

    {
        let handle = h.runner.state_handle();
        let mut state = handle.write().await;
        state.account_equity = dec!(640);
        state.record_trade();
    }
    h.runner.stop().await.unwrap();

    let record = h.config.strategy_state().await.unwrap();
    assert_eq!(record.account_equity, "640");
    assert_eq!(record.total_trade_count, 1);

    let status = h.config.get("bot_status").await.unwrap();
    assert_eq!(status["strategy_running"], false);
    assert_eq!(status["strategy_name"], "probe");
}

#[tokio::test]
async fn tick_error_stops_strategy_by_default() {
    let mut h = harness().await;

    let probe = Probe {
        fail_ticks: true,
        ..Default::default()
    };
    h.runner.load_instance(Box::new(probe), json!({})).await.unwrap();
    h.runner.start().await.unwrap();

    assert!(!h.runner.tick().await);
    assert!(!h.runner.is_running());

    // Subsequent ticks are no-ops
    assert!(!h.runner.tick().await);
    assert_eq!(h.runner.stats().error_count, 1);
}

#[tokio::test]
async fn on_error_true_keeps_strategy_alive() {
    let mut h = harness().await;

    let probe = Probe {
        fail_ticks: true,
        survive_errors: true,
        ..Default::default()
    };
    h.runner.load_instance(Box::new(probe), json!({})).await.unwrap();
    h.runner.start().await.unwrap();

    assert!(!h.runner.tick().await);
    assert!(h.runner.is_running());
}

#[tokio::test]
async fn foreign_symbol_events_are_filtered() {
    let mut h = harness().await;

    let trades = Arc::new(AtomicU64::new(0));
    let probe = Probe {
        trades: trades.clone(),
        ..Default::default()
    };
    h.runner.load_instance(Box::new(probe), json!({})).await.unwrap();
    h.runner.start().await.unwrap();

    let mut foreign = closing_trade("t9");
    foreign.symbol = "BTCUSDT".into();
    assert!(!h.runner.handle_trade_event(&foreign).await);
    assert_eq!(trades.load(Ordering::Relaxed), 0);
}
