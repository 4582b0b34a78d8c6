//! Engine-control handlers: pause, resume, explicit mode change.
//!
//! The mode lives in the `engine` config entry; both the risk guard and the
//! observer process read it from there, so the config write is the state
//! change and the event is its audit record.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use aegis_domain::{command_type, dedup, event_type, Command, EngineMode, EntityKind, Event, EventSource};
use aegis_store::ConfigStore;

use super::{optional_str, CommandHandler, HandlerOutcome};

fn engine_event(command: &Command, event_type_name: &str, action: &str, payload: serde_json::Value) -> Event {
    Event::new(
        event_type_name,
        EventSource::Bot,
        EntityKind::Engine,
        "main",
        command.scope.clone(),
        dedup::engine_key(action, Utc::now().timestamp_millis()),
        payload,
    )
    .caused_by(command.command_id.clone(), command.correlation_id.clone())
}

/// Moves the engine to `PAUSED`; existing orders stay on the book.
pub struct PauseEngineHandler {
    config: ConfigStore,
}

impl PauseEngineHandler {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandHandler for PauseEngineHandler {
    fn command_type(&self) -> &'static str {
        command_type::PAUSE_ENGINE
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let reason = optional_str(command, "reason").unwrap_or("Manual pause").to_string();

        if let Err(e) = self.config.set_engine_mode(EngineMode::Paused, "bot:executor").await {
            error!(error = %e, "PauseEngine failed");
            return HandlerOutcome::failed(e.to_string(), Vec::new());
        }

        let event = engine_event(
            command,
            event_type::ENGINE_PAUSED,
            "paused",
            json!({
                "reason": reason,
                "actor": command.actor.to_string(),
                "paused_at": Utc::now().to_rfc3339(),
            }),
        );

        info!(%reason, actor = %command.actor, "Engine paused");
        HandlerOutcome::ok(json!({"status": "PAUSED"}), vec![event])
    }
}

/// Returns the engine to `RUNNING`.
pub struct ResumeEngineHandler {
    config: ConfigStore,
}

impl ResumeEngineHandler {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandHandler for ResumeEngineHandler {
    fn command_type(&self) -> &'static str {
        command_type::RESUME_ENGINE
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let reason = optional_str(command, "reason").unwrap_or("Manual resume").to_string();

        if let Err(e) = self.config.set_engine_mode(EngineMode::Running, "bot:executor").await {
            error!(error = %e, "ResumeEngine failed");
            return HandlerOutcome::failed(e.to_string(), Vec::new());
        }

        let event = engine_event(
            command,
            event_type::ENGINE_RESUMED,
            "resumed",
            json!({
                "reason": reason,
                "actor": command.actor.to_string(),
                "resumed_at": Utc::now().to_rfc3339(),
            }),
        );

        info!(%reason, actor = %command.actor, "Engine resumed");
        HandlerOutcome::ok(json!({"status": "RUNNING"}), vec![event])
    }
}

/// Moves the engine to an explicit mode (`RUNNING`/`PAUSED`/`SAFE`).
pub struct SetEngineModeHandler {
    config: ConfigStore,
}

impl SetEngineModeHandler {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandHandler for SetEngineModeHandler {
    fn command_type(&self) -> &'static str {
        command_type::SET_ENGINE_MODE
    }

    async fn execute(&self, command: &Command) -> HandlerOutcome {
        let mode = match optional_str(command, "mode").map(str::parse::<EngineMode>) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => return HandlerOutcome::failed(e.to_string(), Vec::new()),
            None => return HandlerOutcome::failed("payload field 'mode' missing", Vec::new()),
        };

        let previous = self.config.engine_mode().await.unwrap_or(EngineMode::Running);

        if let Err(e) = self.config.set_engine_mode(mode, "bot:executor").await {
            error!(error = %e, "SetEngineMode failed");
            return HandlerOutcome::failed(e.to_string(), Vec::new());
        }

        let event = engine_event(
            command,
            event_type::ENGINE_MODE_CHANGED,
            "mode_changed",
            json!({
                "previous_mode": previous.as_str(),
                "mode": mode.as_str(),
                "actor": command.actor.to_string(),
                "changed_at": Utc::now().to_rfc3339(),
            }),
        );

        info!(mode = mode.as_str(), previous = previous.as_str(), "Engine mode changed");
        HandlerOutcome::ok(json!({"mode": mode.as_str()}), vec![event])
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{Actor, CommandOptions, Scope, TradingMode, Venue};
    use aegis_store::sqlite;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", None, TradingMode::Testnet)
    }

    async fn config() -> ConfigStore {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_mode() {
        let config = config().await;

        let pause = PauseEngineHandler::new(config.clone());
        let command = Command::create(
            command_type::PAUSE_ENGINE,
            Actor::user("admin"),
            scope(),
            serde_json::json!({"reason": "maintenance"}),
            CommandOptions::default(),
        );

        let outcome = pause.execute(&command).await;
        assert!(outcome.success);
        assert_eq!(outcome.events[0].event_type, event_type::ENGINE_PAUSED);
        assert_eq!(config.engine_mode().await.unwrap(), EngineMode::Paused);

        let resume = ResumeEngineHandler::new(config.clone());
        let command = Command::create(
            command_type::RESUME_ENGINE,
            Actor::user("admin"),
            scope(),
            serde_json::json!({}),
            CommandOptions::default(),
        );
        let outcome = resume.execute(&command).await;
        assert!(outcome.success);
        assert_eq!(config.engine_mode().await.unwrap(), EngineMode::Running);
    }

    #[tokio::test]
    async fn set_mode_records_previous_mode() {
        let config = config().await;
        let handler = SetEngineModeHandler::new(config.clone());

        let command = Command::create(
            command_type::SET_ENGINE_MODE,
            Actor::user("admin"),
            scope(),
            serde_json::json!({"mode": "SAFE"}),
            CommandOptions::default(),
        );

        let outcome = handler.execute(&command).await;
        assert!(outcome.success);
        assert_eq!(outcome.events[0].payload["previous_mode"], "RUNNING");
        assert_eq!(outcome.events[0].payload["mode"], "SAFE");
        assert_eq!(config.engine_mode().await.unwrap(), EngineMode::Safe);
    }

    #[tokio::test]
    async fn set_mode_rejects_unknown_modes() {
        let config = config().await;
        let handler = SetEngineModeHandler::new(config);

        let command = Command::create(
            command_type::SET_ENGINE_MODE,
            Actor::user("admin"),
            scope(),
            serde_json::json!({"mode": "TURBO"}),
            CommandOptions::default(),
        );

        let outcome = handler.execute(&command).await;
        assert!(!outcome.success);
    }
}
