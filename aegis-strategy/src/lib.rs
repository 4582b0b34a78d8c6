//! Aegis Strategy Runtime
//!
//! Hosts trading strategies behind a narrow, read-only surface:
//! - `Strategy` trait with tick/event/lifecycle callbacks
//! - `TickContext` built fresh for every entry point
//! - `CommandEmitter`, the only mutation vector (risk-guard-gated)
//! - `StrategyRunner`, which drives callbacks and persists the accounting
//!   state across restarts
//!
//! Strategies never touch the exchange adapter; everything they do flows
//! through commands.

#![warn(clippy::all)]

pub mod builtin;
mod context;
mod emitter;
mod error;
pub mod indicators;
mod registry;
mod runner;
mod strategy;
mod types;

pub use context::{ContextBuilder, TickContext};
pub use emitter::{CommandEmitter, OrderIntent};
pub use error::StrategyError;
pub use registry::{StrategyFactory, StrategyRegistry};
pub use runner::{RunnerStats, StrategyRunner, StrategyStatus};
pub use strategy::Strategy;
pub use types::{Bar, OrderEvent, StateHandle, StrategyState, TradeEvent};

pub type Result<T> = std::result::Result<T, StrategyError>;
