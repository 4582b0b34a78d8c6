//! Aegis Domain Layer
//!
//! Pure data model shared by every other crate:
//! - `Scope`, `Actor` coordinates tagging events and commands
//! - `Event` / `Command` records and their type vocabularies
//! - Deterministic dedup-key and client-order-id policies
//!
//! No I/O lives here; stores and connectors depend on this crate, never the
//! other way around.

#![warn(clippy::all)]

pub mod commands;
pub mod dedup;
pub mod events;
pub mod idempotency;
pub mod risk;
pub mod scope;

pub use commands::{
    command_type, is_engine_command, is_trading_command, priority, Command, CommandOptions,
    CommandStatus, ENGINE_COMMAND_TYPES, TRADING_COMMAND_TYPES,
};
pub use events::{event_type, EntityKind, Event, EventSource};
pub use idempotency::{client_order_id, is_engine_order, parse_client_order_id};
pub use risk::RiskSettings;
pub use scope::{Actor, ActorKind, EngineMode, Scope, TradingMode, Venue};

/// Domain-level errors (enum/string parsing).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// A stored string did not match any known enum variant
    #[error("Invalid {kind}: {value}")]
    InvalidEnum { kind: &'static str, value: String },
}
