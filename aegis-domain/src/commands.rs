//! Command records.
//!
//! A `Command` is a request to act. Idempotency is keyed on
//! `idempotency_key` (caller-chosen, defaults to `command_id`); status moves
//! strictly `NEW → SENT → (ACK | FAILED)` and every mutation is mirrored by a
//! result event so history is reconstructible from the event log alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::scope::{Actor, Scope};
use crate::DomainError;

/// Command type vocabulary.
pub mod command_type {
    // Engine / control
    pub const PAUSE_ENGINE: &str = "PauseEngine";
    pub const RESUME_ENGINE: &str = "ResumeEngine";
    pub const SET_ENGINE_MODE: &str = "SetEngineMode";
    pub const CANCEL_ALL: &str = "CancelAll";
    pub const RUN_RECONCILE: &str = "RunReconcile";
    pub const REBUILD_PROJECTION: &str = "RebuildProjection";
    pub const UPDATE_CONFIG: &str = "UpdateConfig";

    // Trading
    pub const PLACE_ORDER: &str = "PlaceOrder";
    pub const CANCEL_ORDER: &str = "CancelOrder";
    pub const CLOSE_POSITION: &str = "ClosePosition";
    pub const SET_LEVERAGE: &str = "SetLeverage";

    // Transfers
    pub const INTERNAL_TRANSFER: &str = "InternalTransfer";
    pub const WITHDRAW: &str = "Withdraw";
}

/// Trading-class command types (blocked while the engine is paused).
pub const TRADING_COMMAND_TYPES: &[&str] = &[
    command_type::PLACE_ORDER,
    command_type::CANCEL_ORDER,
    command_type::CLOSE_POSITION,
    command_type::SET_LEVERAGE,
];

/// Engine-control command types (always pass the engine-mode rule).
pub const ENGINE_COMMAND_TYPES: &[&str] = &[
    command_type::PAUSE_ENGINE,
    command_type::RESUME_ENGINE,
    command_type::SET_ENGINE_MODE,
    command_type::CANCEL_ALL,
    command_type::RUN_RECONCILE,
    command_type::REBUILD_PROJECTION,
    command_type::UPDATE_CONFIG,
];

pub fn is_trading_command(command_type: &str) -> bool {
    TRADING_COMMAND_TYPES.contains(&command_type)
}

pub fn is_engine_command(command_type: &str) -> bool {
    ENGINE_COMMAND_TYPES.contains(&command_type)
}

/// Advisory priority tiers. Higher claims earlier; ties break by `ts`.
pub mod priority {
    /// Emergency cancel / close from the operator
    pub const USER_URGENT: i64 = 100;
    /// Ordinary operator commands
    pub const USER_NORMAL: i64 = 50;
    /// System automation (reconciliation etc.)
    pub const SYSTEM: i64 = 10;
    /// Strategy emissions
    pub const STRATEGY: i64 = 0;
}

/// Command lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    New,
    Sent,
    Ack,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::New => "NEW",
            CommandStatus::Sent => "SENT",
            CommandStatus::Ack => "ACK",
            CommandStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Ack | CommandStatus::Failed)
    }

    /// Legal forward transitions: NEW → SENT → (ACK | FAILED).
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::New, CommandStatus::Sent)
                | (CommandStatus::Sent, CommandStatus::Ack)
                | (CommandStatus::Sent, CommandStatus::Failed)
        )
    }
}

impl FromStr for CommandStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Ok(CommandStatus::New),
            "SENT" => Ok(CommandStatus::Sent),
            "ACK" => Ok(CommandStatus::Ack),
            "FAILED" => Ok(CommandStatus::Failed),
            other => Err(DomainError::InvalidEnum {
                kind: "command status",
                value: other.to_string(),
            }),
        }
    }
}

/// A request to act against the exchange or the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub command_type: String,
    pub ts: DateTime<Utc>,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub actor: Actor,
    pub scope: Scope,
    /// Replay-safe insertion boundary; defaults to `command_id`
    pub idempotency_key: String,
    pub status: CommandStatus,
    pub priority: i64,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Builder options for [`Command::create`].
#[derive(Debug, Default, Clone)]
pub struct CommandOptions {
    pub priority: i64,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Command {
    /// Create a fresh command in `NEW` status.
    pub fn create(
        command_type: impl Into<String>,
        actor: Actor,
        scope: Scope,
        payload: serde_json::Value,
        options: CommandOptions,
    ) -> Self {
        let command_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            correlation_id: options
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            idempotency_key: options
                .idempotency_key
                .unwrap_or_else(|| command_id.clone()),
            command_id,
            command_type: command_type.into(),
            ts: now,
            causation_id: options.causation_id,
            actor,
            scope,
            status: CommandStatus::New,
            priority: options.priority,
            payload,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            completed_at: None,
        }
    }

    /// Deterministic client order id sent to the exchange (`ae-{command_id}`).
    pub fn client_order_id(&self) -> String {
        crate::idempotency::client_order_id(&self.command_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{TradingMode, Venue};
    use serde_json::json;

    fn sample() -> Command {
        Command::create(
            command_type::PLACE_ORDER,
            Actor::strategy("sma_cross"),
            Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet),
            json!({"side": "BUY", "quantity": "10"}),
            CommandOptions::default(),
        )
    }

    #[test]
    fn idempotency_key_defaults_to_command_id() {
        let cmd = sample();
        assert_eq!(cmd.idempotency_key, cmd.command_id);
        assert_eq!(cmd.status, CommandStatus::New);
    }

    #[test]
    fn explicit_idempotency_key_is_kept() {
        let cmd = Command::create(
            command_type::CANCEL_ALL,
            Actor::user("admin"),
            sample().scope,
            json!({}),
            CommandOptions {
                priority: priority::USER_URGENT,
                idempotency_key: Some("user:admin:cancel_all:2024-02-20".into()),
                ..Default::default()
            },
        );

        assert_eq!(cmd.idempotency_key, "user:admin:cancel_all:2024-02-20");
        assert_eq!(cmd.priority, 100);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(CommandStatus::New.can_transition_to(CommandStatus::Sent));
        assert!(CommandStatus::Sent.can_transition_to(CommandStatus::Ack));
        assert!(CommandStatus::Sent.can_transition_to(CommandStatus::Failed));

        assert!(!CommandStatus::Sent.can_transition_to(CommandStatus::New));
        assert!(!CommandStatus::Ack.can_transition_to(CommandStatus::Failed));
        assert!(!CommandStatus::Failed.can_transition_to(CommandStatus::Sent));
        assert!(!CommandStatus::New.can_transition_to(CommandStatus::Ack));
    }

    #[test]
    fn client_order_id_uses_ae_prefix() {
        let cmd = sample();
        assert_eq!(cmd.client_order_id(), format!("ae-{}", cmd.command_id));
    }

    #[test]
    fn command_classes() {
        assert!(is_trading_command(command_type::PLACE_ORDER));
        assert!(is_trading_command(command_type::SET_LEVERAGE));
        assert!(!is_trading_command(command_type::PAUSE_ENGINE));
        assert!(is_engine_command(command_type::UPDATE_CONFIG));
        assert!(!is_engine_command(command_type::PLACE_ORDER));
    }
}
