//! The bot engine: component wiring, recovery, main loop, shutdown.
//!
//! # Lifecycle
//!
//! 1. `build` — construct stores, projector, guard, executor, runner, pollers
//! 2. `bootstrap` — config defaults, `EngineStarted`, first-run recovery
//!    (initial capital → backfill → project → opening reconcile), strategy
//!    auto-start
//! 3. `run` — listener task + 100 ms main loop until the shutdown signal
//! 4. graceful stop — listener drains, strategy state persists,
//!    `EngineStopped`, bot status cleared

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use aegis_connectors::{endpoints, ExchangeRest, MarketDataProvider};
use aegis_domain::{dedup, event_type, EntityKind, Event, EventSource, TradingMode};
use aegis_exec::handlers::{
    CancelAllHandler, CancelOrderHandler, ClosePositionHandler, PauseEngineHandler,
    PlaceOrderHandler, ResumeEngineHandler, SetEngineModeHandler, SetLeverageHandler,
};
use aegis_exec::{CommandExecutor, CommandProcessor, RiskGuard};
use aegis_ingest::poller::{
    ConvertPoller, DepositWithdrawPoller, IncomePoller, PollerHarness, PollerSet,
    PriceCachePoller, ReconciliationPoller, TransferPoller,
};
use aegis_ingest::{
    HistoricalBackfill, InitialCapitalRecorder, OpeningReconciler, StreamHandler, WsListener,
};
use aegis_projector::Projector;
use aegis_store::{
    config_key, CheckpointStore, CommandStore, ConfigStore, EventStore,
};
use aegis_strategy::StrategyRunner;

use crate::config::Config;
use crate::error::DaemonResult;

/// Heartbeat cadence in loop ticks (~10 s at the default interval).
const HEARTBEAT_TICKS: u64 = 100;
/// Poller check cadence in loop ticks (~1 s at the default interval).
const POLLER_TICKS: u64 = 10;

/// The assembled engine.
pub struct BotEngine {
    config: Config,
    events: EventStore,
    config_store: ConfigStore,
    rest: Arc<dyn ExchangeRest>,
    projector: Arc<Projector>,
    processor: CommandProcessor,
    runner: Arc<RwLock<StrategyRunner>>,
    pollers: PollerSet,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tick_count: u64,
    started_at: chrono::DateTime<Utc>,
}

impl BotEngine {
    /// Wire every component over an opened database and exchange adapter.
    pub fn build(config: Config, pool: SqlitePool, rest: Arc<dyn ExchangeRest>) -> Self {
        let events = EventStore::new(pool.clone());
        let commands = CommandStore::new(pool.clone());
        let config_store = ConfigStore::new(pool.clone());
        let checkpoints = CheckpointStore::new(pool.clone());

        let trading_scope = config.trading_scope();
        let engine_scope = config.engine_scope();

        let projector = Arc::new(Projector::new(
            events.clone(),
            checkpoints,
            pool,
            engine_scope.clone(),
        ));

        let risk_guard = Arc::new(RiskGuard::new(
            events.clone(),
            config_store.clone(),
            Some(projector.clone()),
        ));

        let mut executor = CommandExecutor::new(events.clone());
        executor.register(Box::new(PlaceOrderHandler::new(rest.clone())));
        executor.register(Box::new(CancelOrderHandler::new(rest.clone())));
        executor.register(Box::new(ClosePositionHandler::new(rest.clone(), projector.clone())));
        executor.register(Box::new(CancelAllHandler::new(rest.clone())));
        executor.register(Box::new(SetLeverageHandler::new(rest.clone())));
        executor.register(Box::new(PauseEngineHandler::new(config_store.clone())));
        executor.register(Box::new(ResumeEngineHandler::new(config_store.clone())));
        executor.register(Box::new(SetEngineModeHandler::new(config_store.clone())));

        let processor = CommandProcessor::new(commands.clone(), executor, Some(risk_guard.clone()));

        let market_data = Arc::new(MarketDataProvider::new(rest.clone()));

        let runner = Arc::new(RwLock::new(StrategyRunner::new(
            events.clone(),
            commands,
            config_store.clone(),
            projector.clone(),
            Some(risk_guard),
            Some(market_data),
            trading_scope.clone(),
            &config.timeframe,
            config.bar_limit,
        )));

        let reconciler = OpeningReconciler::new(rest.clone(), events.clone(), engine_scope.clone());
        let pollers = PollerSet::new(vec![
            PollerHarness::new(
                Box::new(IncomePoller::new(rest.clone(), events.clone(), engine_scope.clone())),
                config_store.clone(),
            ),
            PollerHarness::new(
                Box::new(TransferPoller::new(rest.clone(), events.clone(), engine_scope.clone())),
                config_store.clone(),
            ),
            PollerHarness::new(
                Box::new(ConvertPoller::new(rest.clone(), events.clone(), engine_scope.clone())),
                config_store.clone(),
            ),
            PollerHarness::new(
                Box::new(DepositWithdrawPoller::new(
                    rest.clone(),
                    events.clone(),
                    engine_scope.clone(),
                )),
                config_store.clone(),
            ),
            PollerHarness::new(
                Box::new(PriceCachePoller::new(rest.clone(), config_store.clone(), None)),
                config_store.clone(),
            ),
            PollerHarness::new(
                Box::new(ReconciliationPoller::new(
                    reconciler,
                    projector.clone(),
                    config_store.clone(),
                )),
                config_store.clone(),
            ),
        ]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            events,
            config_store,
            rest,
            projector,
            processor,
            runner,
            pollers,
            shutdown_tx,
            shutdown_rx,
            tick_count: 0,
            started_at: Utc::now(),
        }
    }

    /// Signal sender for external shutdown control.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub fn projector(&self) -> Arc<Projector> {
        self.projector.clone()
    }

    pub fn runner(&self) -> Arc<RwLock<StrategyRunner>> {
        self.runner.clone()
    }

    /// Defaults, lifecycle event, first-run recovery, strategy auto-start.
    pub async fn bootstrap(&mut self) -> DaemonResult<()> {
        self.config_store.ensure_defaults().await?;
        self.pollers.initialize().await?;

        let started = Event::new(
            event_type::ENGINE_STARTED,
            EventSource::Bot,
            EntityKind::Engine,
            "main",
            self.config.engine_scope(),
            dedup::engine_key("started", Utc::now().timestamp_millis()),
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "mode": self.config.mode.as_str(),
                "symbol": self.config.symbol,
                "started_at": Utc::now().to_rfc3339(),
            }),
        );
        self.events.append(&started).await?;
        info!(mode = self.config.mode.as_str(), "EngineStarted recorded");

        self.run_recovery().await?;
        self.projector.apply_pending().await?;
        self.auto_start_strategy().await?;

        Ok(())
    }

    /// First-run historical ingest: capital → backfill → project → reconcile.
    async fn run_recovery(&mut self) -> DaemonResult<()> {
        let recorder = InitialCapitalRecorder::new(
            self.rest.clone(),
            self.events.clone(),
            self.config_store.clone(),
            self.config.engine_scope(),
        );

        if recorder.is_initialized().await? {
            return Ok(());
        }

        info!("First run: recovery sequence starting");
        let summary = recorder.record(None).await?;

        let epoch_date = summary.epoch_date.parse::<NaiveDate>().ok();
        let backfill = HistoricalBackfill::new(
            self.rest.clone(),
            self.events.clone(),
            self.config.engine_scope(),
        );
        let report = backfill.backfill(epoch_date).await?;
        info!(backfilled = report.total(), "Backfill finished");

        // Fold everything ingested so far, then align against the exchange
        self.projector.apply_pending().await?;

        let reconciler = OpeningReconciler::new(
            self.rest.clone(),
            self.events.clone(),
            self.config.engine_scope(),
        );
        let ledger = self.projector.ledger_balances().await;
        let reconcile = reconciler.reconcile(&ledger).await?;
        info!(
            adjusted = reconcile.adjusted_count,
            skipped = reconcile.skipped_count,
            "Opening reconcile finished"
        );

        Ok(())
    }

    async fn auto_start_strategy(&self) -> DaemonResult<()> {
        let strategy_config = self.config_store.get(config_key::STRATEGY).await?;
        let auto_start = strategy_config
            .get("auto_start")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let Some(name) = strategy_config.get("name").and_then(|v| v.as_str()) else {
            return Ok(());
        };

        if !auto_start {
            return Ok(());
        }

        let params = strategy_config
            .get("params")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let mut runner = self.runner.write().await;
        runner.load(name, params).await?;
        runner.start().await?;
        info!(strategy = name, "Strategy auto-started");
        Ok(())
    }

    /// One main-loop iteration: project, process commands, tick strategy,
    /// tick pollers, heartbeat.
    pub async fn tick_once(&mut self) -> DaemonResult<()> {
        self.tick_count += 1;

        if let Err(e) = self.projector.apply_pending().await {
            error!(error = %e, "Projection fold failed");
        }

        if let Err(e) = self.processor.process_batch(self.config.command_batch).await {
            error!(error = %e, "Command batch failed");
        }

        // Strategy ticks ride the same loop; the runner gates on is_running
        {
            let mut runner = self.runner.write().await;
            if runner.is_running() {
                runner.tick().await;
            }
        }

        if self.tick_count % POLLER_TICKS == 0 {
            self.pollers.tick().await;
        }

        if self.tick_count % HEARTBEAT_TICKS == 0 {
            self.heartbeat().await;
        }

        Ok(())
    }

    async fn heartbeat(&self) {
        let runner = self.runner.read().await;
        let strategy_name = runner.strategy_name().map(str::to_string);
        let strategy_running = runner.is_running();
        drop(runner);

        if let Err(e) = self
            .config_store
            .update_bot_status(
                true,
                strategy_name.as_deref(),
                strategy_running,
                self.tick_count,
                Some(&self.started_at.to_rfc3339()),
            )
            .await
        {
            warn!(error = %e, "Heartbeat failed");
        }
    }

    /// Run until a shutdown signal (ctrl-c or the shutdown handle).
    pub async fn run(mut self) -> DaemonResult<()> {
        let listener_task = self.spawn_listener();

        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Entering main loop"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once().await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }
        }

        self.shutdown(listener_task).await
    }

    fn spawn_listener(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.listener_enabled {
            return None;
        }

        let ws_base = match self.config.mode {
            TradingMode::Production => endpoints::PROD_FUTURES_WS,
            TradingMode::Testnet => endpoints::TEST_FUTURES_WS,
        };

        let handler = Arc::new(StreamHandler::new(
            self.events.clone(),
            self.config.trading_scope(),
            Some(self.config.symbol.clone()),
            Some(self.runner.clone()),
        ));

        let mut listener = WsListener::new(
            self.rest.clone(),
            ws_base,
            handler,
            self.shutdown_rx.clone(),
        );

        Some(tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!(error = %e, "Listener exited with error");
            }
        }))
    }

    /// Graceful shutdown: stop workers, persist state, record the stop.
    async fn shutdown(self, listener_task: Option<tokio::task::JoinHandle<()>>) -> DaemonResult<()> {
        info!("Graceful shutdown starting");

        let _ = self.shutdown_tx.send(true);

        if let Some(task) = listener_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task join failed");
            }
        }

        {
            let mut runner = self.runner.write().await;
            if let Err(e) = runner.stop().await {
                warn!(error = %e, "Strategy stop failed");
            }
        }

        self.pollers.stop_all().await;

        let stopped = Event::new(
            event_type::ENGINE_STOPPED,
            EventSource::Bot,
            EntityKind::Engine,
            "main",
            self.config.engine_scope(),
            dedup::engine_key("stopped", Utc::now().timestamp_millis()),
            json!({
                "reason": "graceful",
                "stopped_at": Utc::now().to_rfc3339(),
                "tick_count": self.tick_count,
            }),
        );
        self.events.append(&stopped).await?;

        if let Err(e) = self.config_store.clear_bot_status().await {
            warn!(error = %e, "bot_status clear failed");
        }

        info!(ticks = self.tick_count, "Shutdown complete");
        Ok(())
    }
}
