//! WebSocket listener: connection state machine + frame handler.
//!
//! The handler is the testable half — it maps frames to events, appends
//! them, and fans out strategy callbacks. The listener wraps it with the
//! reconnect-managed connection loop and listen-key keepalive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use aegis_connectors::models::UserDataFrame;
use aegis_connectors::{ExchangeRest, UserDataStream};
use aegis_domain::Scope;
use aegis_store::EventStore;
use aegis_strategy::StrategyRunner;

use crate::mapper::EventMapper;
use crate::Result;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Maps, persists, and fans out one frame at a time.
pub struct StreamHandler {
    events: EventStore,
    mapper: EventMapper,
    target_symbol: Option<String>,
    runner: Option<Arc<RwLock<StrategyRunner>>>,

    message_count: AtomicU64,
    event_count: AtomicU64,
    error_count: AtomicU64,
    callback_count: AtomicU64,
}

impl StreamHandler {
    pub fn new(
        events: EventStore,
        scope: Scope,
        target_symbol: Option<String>,
        runner: Option<Arc<RwLock<StrategyRunner>>>,
    ) -> Self {
        Self {
            events,
            mapper: EventMapper::new(scope),
            target_symbol,
            runner,
            message_count: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            callback_count: AtomicU64::new(0),
        }
    }

    /// Handle one frame; returns how many events were newly stored.
    pub async fn handle(&self, frame: &UserDataFrame) -> Result<usize> {
        self.message_count.fetch_add(1, Ordering::Relaxed);

        match frame {
            UserDataFrame::AccountUpdate(update) => {
                let events = self.mapper.map_account_update(update);
                self.persist(events).await
            }
            UserDataFrame::OrderTradeUpdate(update) => {
                // Target-symbol filter applies before persistence and fan-out
                if let Some(target) = &self.target_symbol {
                    if update.order.symbol != *target {
                        return Ok(0);
                    }
                }

                let events = self.mapper.map_order_trade_update(update);
                let stored = self.persist(events).await?;

                // Fan out only for fresh facts, so a reconnect replay never
                // re-fires strategy callbacks
                if stored > 0 {
                    self.dispatch_callbacks(update).await;
                }
                Ok(stored)
            }
            UserDataFrame::MarginCall(call) => {
                let events = self
                    .mapper
                    .map_margin_call(call)
                    .into_iter()
                    .filter(|event| match (&self.target_symbol, &event.scope.symbol) {
                        (Some(target), Some(symbol)) => symbol == target,
                        _ => true,
                    })
                    .collect();
                self.persist(events).await
            }
            UserDataFrame::ListenKeyExpired { .. } => {
                warn!("Listen key expired, reconnection needed");
                Ok(0)
            }
        }
    }

    async fn persist(&self, events: Vec<aegis_domain::Event>) -> Result<usize> {
        let mut stored = 0;
        for event in &events {
            match self.events.append(event).await {
                Ok(outcome) if outcome.is_stored() => {
                    stored += 1;
                    self.event_count.fetch_add(1, Ordering::Relaxed);
                    debug!(event_type = %event.event_type, entity_id = %event.entity_id, "Event saved");
                }
                Ok(_) => {
                    debug!(dedup_key = %event.dedup_key, "Replayed event ignored");
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    return Err(e.into());
                }
            }
        }
        Ok(stored)
    }

    async fn dispatch_callbacks(&self, update: &aegis_connectors::models::OrderTradeUpdateFrame) {
        let Some(runner) = &self.runner else {
            return;
        };

        // Callback failures are contained in the runner; the event is already
        // persisted either way
        if let Some(trade) = self.mapper.strategy_trade_event(update) {
            self.callback_count.fetch_add(1, Ordering::Relaxed);
            runner.write().await.handle_trade_event(&trade).await;
        }

        if let Some(order) = self.mapper.strategy_order_event(update) {
            self.callback_count.fetch_add(1, Ordering::Relaxed);
            runner.write().await.handle_order_event(&order).await;
        }
    }

    /// Persist a lifecycle event for a connection state change.
    pub async fn on_state_change(&self, state: WsState) -> Result<()> {
        let event = match state {
            WsState::Connected => self.mapper.ws_connected(),
            WsState::Disconnected => self.mapper.ws_disconnected(""),
            WsState::Reconnecting => self.mapper.ws_disconnected("reconnecting"),
            WsState::Connecting | WsState::Stopped => return Ok(()),
        };

        self.events.append(&event).await?;
        info!(state = ?state, "Connection state change recorded");
        Ok(())
    }

    /// Persist the reconnected marker after a successful reconnect.
    pub async fn on_reconnected(&self) -> Result<()> {
        self.events.append(&self.mapper.ws_reconnected()).await?;
        Ok(())
    }

    /// (messages, events stored, errors, callbacks).
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.message_count.load(Ordering::Relaxed),
            self.event_count.load(Ordering::Relaxed),
            self.error_count.load(Ordering::Relaxed),
            self.callback_count.load(Ordering::Relaxed),
        )
    }
}

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Reconnect-managed user-data-stream listener.
pub struct WsListener {
    rest: Arc<dyn ExchangeRest>,
    ws_base: String,
    handler: Arc<StreamHandler>,
    shutdown: watch::Receiver<bool>,
    state: WsState,
}

impl WsListener {
    pub fn new(
        rest: Arc<dyn ExchangeRest>,
        ws_base: impl Into<String>,
        handler: Arc<StreamHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rest,
            ws_base: ws_base.into(),
            handler,
            shutdown,
            state: WsState::Disconnected,
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    async fn set_state(&mut self, state: WsState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Err(e) = self.handler.on_state_change(state).await {
            warn!(error = %e, "Lifecycle event append failed");
        }
    }

    /// Run until shutdown. Reconnects with capped exponential backoff; a
    /// reconnect replay is safe because every event dedups.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut backoff = RECONNECT_BASE_DELAY;
        let mut had_session = false;

        while !*shutdown.borrow() {
            self.set_state(if had_session {
                WsState::Reconnecting
            } else {
                WsState::Connecting
            })
            .await;

            let listen_key = match self.rest.create_listen_key().await {
                Ok(key) => key,
                Err(e) => {
                    error!(error = %e, "Listen key creation failed");
                    self.wait_backoff(&mut backoff).await;
                    continue;
                }
            };

            let mut stream = match UserDataStream::connect(&self.ws_base, &listen_key).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "Stream connect failed");
                    self.wait_backoff(&mut backoff).await;
                    continue;
                }
            };

            if had_session {
                let _ = self.handler.on_reconnected().await;
            }
            self.set_state(WsState::Connected).await;
            had_session = true;
            backoff = RECONNECT_BASE_DELAY;
            info!("User-data stream attached");

            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.tick().await; // immediate first tick is a no-op

            let mut stop_requested = false;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            stop_requested = true;
                            break;
                        }
                    }

                    _ = keepalive.tick() => {
                        if let Err(e) = self.rest.keepalive_listen_key(&listen_key).await {
                            warn!(error = %e, "Listen-key keepalive failed");
                        }
                    }

                    frame = stream.next() => {
                        match frame {
                            Some(Ok(frame)) => {
                                let expired = matches!(frame, UserDataFrame::ListenKeyExpired { .. });
                                if let Err(e) = self.handler.handle(&frame).await {
                                    error!(error = %e, "Frame handling failed");
                                }
                                if expired {
                                    break; // reconnect with a fresh key
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Stream error");
                                break;
                            }
                            None => {
                                warn!("Stream closed by peer");
                                break;
                            }
                        }
                    }
                }
            }

            if stop_requested {
                let _ = stream.close().await;
                self.set_state(WsState::Stopped).await;
                info!("Listener stopped");
                return Ok(());
            }

            self.set_state(WsState::Disconnected).await;
            self.wait_backoff(&mut backoff).await;
        }

        self.set_state(WsState::Stopped).await;
        Ok(())
    }

    async fn wait_backoff(&self, backoff: &mut Duration) {
        tokio::time::sleep(*backoff).await;
        *backoff = (*backoff * 2).min(RECONNECT_MAX_DELAY);
    }
}

// =============================================================================
// Tests
// =============================================================================
