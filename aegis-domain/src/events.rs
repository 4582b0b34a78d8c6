//! Event records.
//!
//! An `Event` is an immutable fact. The store assigns `seq` at append time;
//! `dedup_key` makes replayed ingestion a no-op. Payloads stay unstructured
//! JSON, typed by `event_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::scope::Scope;
use crate::DomainError;

/// Event type vocabulary.
///
/// Stored as plain strings so the log can carry types this build does not
/// know about yet.
pub mod event_type {
    pub const ENGINE_STARTED: &str = "EngineStarted";
    pub const ENGINE_STOPPED: &str = "EngineStopped";
    pub const ENGINE_PAUSED: &str = "EnginePaused";
    pub const ENGINE_RESUMED: &str = "EngineResumed";
    pub const ENGINE_MODE_CHANGED: &str = "EngineModeChanged";

    pub const ORDER_PLACED: &str = "OrderPlaced";
    pub const ORDER_UPDATED: &str = "OrderUpdated";
    pub const ORDER_CANCELLED: &str = "OrderCancelled";
    pub const ORDER_REJECTED: &str = "OrderRejected";

    pub const TRADE_EXECUTED: &str = "TradeExecuted";
    pub const POSITION_CHANGED: &str = "PositionChanged";
    pub const BALANCE_CHANGED: &str = "BalanceChanged";
    pub const FUNDING_APPLIED: &str = "FundingApplied";
    pub const COMMISSION_REBATE_RECEIVED: &str = "CommissionRebateReceived";

    pub const INTERNAL_TRANSFER_COMPLETED: &str = "InternalTransferCompleted";
    pub const DEPOSIT_DETECTED: &str = "DepositDetected";
    pub const DEPOSIT_COMPLETED: &str = "DepositCompleted";
    pub const WITHDRAW_COMPLETED: &str = "WithdrawCompleted";
    pub const CONVERT_EXECUTED: &str = "ConvertExecuted";
    pub const DUST_CONVERTED: &str = "DustConverted";

    pub const INITIAL_CAPITAL_ESTABLISHED: &str = "InitialCapitalEstablished";
    pub const OPENING_BALANCE_ADJUSTED: &str = "OpeningBalanceAdjusted";

    pub const STRATEGY_LOADED: &str = "StrategyLoaded";

    pub const WS_CONNECTED: &str = "WsConnected";
    pub const WS_DISCONNECTED: &str = "WsDisconnected";
    pub const WS_RECONNECTED: &str = "WsReconnected";

    pub const RISK_GUARD_REJECTED: &str = "RiskGuardRejected";
}

/// Where an event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    Bot,
    Websocket,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Bot => "BOT",
            EventSource::Websocket => "WEBSOCKET",
        }
    }
}

impl FromStr for EventSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BOT" => Ok(EventSource::Bot),
            "WEBSOCKET" => Ok(EventSource::Websocket),
            other => Err(DomainError::InvalidEnum {
                kind: "event source",
                value: other.to_string(),
            }),
        }
    }
}

/// What kind of entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Order,
    Trade,
    Position,
    Balance,
    Engine,
    Funding,
    Rebate,
    Transfer,
    Convert,
    Deposit,
    Withdraw,
    Dust,
    Capital,
    Strategy,
    Command,
    Reconciliation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "ORDER",
            EntityKind::Trade => "TRADE",
            EntityKind::Position => "POSITION",
            EntityKind::Balance => "BALANCE",
            EntityKind::Engine => "ENGINE",
            EntityKind::Funding => "FUNDING",
            EntityKind::Rebate => "REBATE",
            EntityKind::Transfer => "TRANSFER",
            EntityKind::Convert => "CONVERT",
            EntityKind::Deposit => "DEPOSIT",
            EntityKind::Withdraw => "WITHDRAW",
            EntityKind::Dust => "DUST",
            EntityKind::Capital => "CAPITAL",
            EntityKind::Strategy => "STRATEGY",
            EntityKind::Command => "COMMAND",
            EntityKind::Reconciliation => "RECONCILIATION",
        }
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ORDER" => Ok(EntityKind::Order),
            "TRADE" => Ok(EntityKind::Trade),
            "POSITION" => Ok(EntityKind::Position),
            "BALANCE" => Ok(EntityKind::Balance),
            "ENGINE" => Ok(EntityKind::Engine),
            "FUNDING" => Ok(EntityKind::Funding),
            "REBATE" => Ok(EntityKind::Rebate),
            "TRANSFER" => Ok(EntityKind::Transfer),
            "CONVERT" => Ok(EntityKind::Convert),
            "DEPOSIT" => Ok(EntityKind::Deposit),
            "WITHDRAW" => Ok(EntityKind::Withdraw),
            "DUST" => Ok(EntityKind::Dust),
            "CAPITAL" => Ok(EntityKind::Capital),
            "STRATEGY" => Ok(EntityKind::Strategy),
            "COMMAND" => Ok(EntityKind::Command),
            "RECONCILIATION" => Ok(EntityKind::Reconciliation),
            other => Err(DomainError::InvalidEnum {
                kind: "entity kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store sequence, assigned at append (None before persistence)
    pub seq: Option<i64>,
    pub event_id: String,
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub command_id: Option<String>,
    pub source: EventSource,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub scope: Scope,
    /// Unique natural key; a re-append with the same key is a no-op
    pub dedup_key: String,
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event stamped `now`, with a fresh event/correlation id.
    pub fn new(
        event_type: impl Into<String>,
        source: EventSource,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        scope: Scope,
        dedup_key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let event_id = Uuid::new_v4().to_string();
        Self {
            seq: None,
            correlation_id: event_id.clone(),
            event_id,
            event_type: event_type.into(),
            ts: Utc::now(),
            causation_id: None,
            command_id: None,
            source,
            entity_kind,
            entity_id: entity_id.into(),
            scope,
            dedup_key: dedup_key.into(),
            payload,
        }
    }

    /// Attach the originating command's trace fields.
    pub fn caused_by(mut self, command_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self.correlation_id = correlation_id.into();
        self
    }

    /// Override the event timestamp (backfilled facts keep their original ts).
    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
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

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    #[test]
    fn new_event_sets_correlation_to_event_id() {
        let event = Event::new(
            event_type::TRADE_EXECUTED,
            EventSource::Websocket,
            EntityKind::Trade,
            "777",
            scope(),
            "BINANCE:FUTURES:XRPUSDT:trade:777",
            json!({"qty": "10"}),
        );

        assert_eq!(event.correlation_id, event.event_id);
        assert!(event.seq.is_none());
        assert!(event.command_id.is_none());
    }

    #[test]
    fn caused_by_overrides_trace_fields() {
        let event = Event::new(
            event_type::ORDER_PLACED,
            EventSource::Bot,
            EntityKind::Order,
            "123",
            scope(),
            "BINANCE:FUTURES:XRPUSDT:order:123",
            json!({}),
        )
        .caused_by("cmd-1", "corr-1");

        assert_eq!(event.command_id.as_deref(), Some("cmd-1"));
        assert_eq!(event.correlation_id, "corr-1");
    }

    #[test]
    fn event_serde_round_trip() {
        let event = Event::new(
            event_type::BALANCE_CHANGED,
            EventSource::Websocket,
            EntityKind::Balance,
            "USDT",
            scope(),
            "BINANCE:FUTURES:USDT:balance:1708408800000",
            json!({"balance_change": "1.5"}),
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
