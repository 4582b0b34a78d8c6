//! End-to-end pipeline scenarios: happy-path place-order, priority
//! preemption, and the risk rejection chain.

use std::sync::Arc;

use serde_json::json;

use aegis_connectors::StubExchange;
use aegis_domain::{
    command_type, event_type, priority, Actor, Command, CommandOptions, CommandStatus, EngineMode,
    Scope, TradingMode, Venue,
};
use aegis_exec::handlers::{PauseEngineHandler, PlaceOrderHandler};
use aegis_exec::{CommandExecutor, CommandProcessor, RiskGuard};
use aegis_store::{sqlite, CommandStore, ConfigStore, EventStore, InsertOutcome};
use rust_decimal_macros::dec;

fn scope() -> Scope {
    Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
}

struct Pipeline {
    events: EventStore,
    commands: CommandStore,
    config: ConfigStore,
    stub: Arc<StubExchange>,
    processor: CommandProcessor,
}

async fn pipeline() -> Pipeline {
    let pool = sqlite::connect_memory().await.unwrap();
    sqlite::init_schema(&pool).await.unwrap();

    let events = EventStore::new(pool.clone());
    let commands = CommandStore::new(pool.clone());
    let config = ConfigStore::new(pool);
    config.ensure_defaults().await.unwrap();

    let stub = Arc::new(StubExchange::new(dec!(0.5)));
    stub.set_next_order_id(123);

    let mut executor = CommandExecutor::new(events.clone());
    executor.register(Box::new(PlaceOrderHandler::new(stub.clone())));
    executor.register(Box::new(PauseEngineHandler::new(config.clone())));

    let guard = Arc::new(RiskGuard::new(events.clone(), config.clone(), None));
    let processor = CommandProcessor::new(commands.clone(), executor, Some(guard));

    Pipeline {
        events,
        commands,
        config,
        stub,
        processor,
    }
}

fn market_buy(idempotency_key: Option<&str>, priority: i64) -> Command {
    Command::create(
        command_type::PLACE_ORDER,
        Actor::user("admin"),
        scope(),
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

#[tokio::test]
async fn happy_path_place_order() {
    let p = pipeline().await;

    // Insert with idempotency key K1, claim and execute
    let command = market_buy(Some("K1"), 0);
    assert_eq!(p.commands.insert(&command).await.unwrap(), InsertOutcome::Stored);

    assert!(p.processor.process_one().await.unwrap());

    // One OrderPlaced event with the canonical dedup key and ae- client id
    let placed = p.events.get_by_type(event_type::ORDER_PLACED, 10).await.unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].dedup_key, "BINANCE:FUTURES:XRPUSDT:order:123");
    assert_eq!(
        placed[0].payload["client_order_id"],
        format!("ae-{}", command.command_id)
    );

    // Command went NEW -> SENT -> ACK and carries the exchange order id
    let done = p.commands.get_by_id(&command.command_id).await.unwrap().unwrap();
    assert_eq!(done.status, CommandStatus::Ack);
    assert!(done.claimed_at.is_some());
    assert!(done.completed_at.is_some());
    assert_eq!(done.result.unwrap()["exchange_order_id"], "123");

    // Re-inserting the same idempotency key is a duplicate; original remains
    let replay = market_buy(Some("K1"), 0);
    assert_eq!(p.commands.insert(&replay).await.unwrap(), InsertOutcome::Duplicate);
    let original = p.commands.get_by_idempotency_key("K1").await.unwrap().unwrap();
    assert_eq!(original.command_id, command.command_id);
    assert_eq!(original.status, CommandStatus::Ack);
}

#[tokio::test]
async fn priority_preemption() {
    let p = pipeline().await;

    let low = market_buy(None, priority::STRATEGY);
    let mid = market_buy(None, priority::SYSTEM);
    let high = market_buy(None, priority::USER_URGENT);

    // Insert in ascending priority; claims must come back descending
    p.commands.insert(&low).await.unwrap();
    p.commands.insert(&mid).await.unwrap();
    p.commands.insert(&high).await.unwrap();

    let c1 = p.commands.claim_one().await.unwrap().unwrap();
    let c2 = p.commands.claim_one().await.unwrap().unwrap();
    let c3 = p.commands.claim_one().await.unwrap().unwrap();

    assert_eq!(c1.priority, 100);
    assert_eq!(c2.priority, 10);
    assert_eq!(c3.priority, 0);
}

#[tokio::test]
async fn risk_rejection_chain_in_paused_mode() {
    let p = pipeline().await;
    p.config.set_engine_mode(EngineMode::Paused, "bot:test").await.unwrap();

    let command = market_buy(None, 0);
    p.commands.insert(&command).await.unwrap();

    assert!(p.processor.process_one().await.unwrap());

    // NEW -> FAILED with a RiskGuard-prefixed error
    let failed = p.commands.get_by_id(&command.command_id).await.unwrap().unwrap();
    assert_eq!(failed.status, CommandStatus::Failed);
    assert!(failed.last_error.unwrap().starts_with("RiskGuard rejected"));

    // One RiskGuardRejected event naming the EngineMode rule
    let rejections = p.events.get_by_type(event_type::RISK_GUARD_REJECTED, 10).await.unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].payload["rule_name"], "EngineMode");
    assert_eq!(
        rejections[0].command_id.as_deref(),
        Some(command.command_id.as_str())
    );

    // Nothing reached the exchange
    assert!(p.stub.placed_orders().is_empty());
}

#[tokio::test]
async fn engine_control_passes_while_paused() {
    let p = pipeline().await;
    p.config.set_engine_mode(EngineMode::Paused, "bot:test").await.unwrap();

    let command = Command::create(
        command_type::PAUSE_ENGINE,
        Actor::user("admin"),
        scope(),
        json!({"reason": "still paused"}),
        CommandOptions {
            priority: priority::USER_NORMAL,
            ..Default::default()
        },
    );
    p.commands.insert(&command).await.unwrap();

    p.processor.process_one().await.unwrap();

    let done = p.commands.get_by_id(&command.command_id).await.unwrap().unwrap();
    assert_eq!(done.status, CommandStatus::Ack);

    let paused = p.events.get_by_type(event_type::ENGINE_PAUSED, 10).await.unwrap();
    assert_eq!(paused.len(), 1);
}
