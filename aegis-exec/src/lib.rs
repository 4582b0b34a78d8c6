//! Aegis Command Pipeline
//!
//! Claim → risk-check → dispatch → status transition:
//! - `CommandClaimer` pulls NEW commands by priority
//! - `RiskGuard` runs the rule pipeline over the current projection
//! - `CommandExecutor` dispatches to a handler by `command_type`, appends the
//!   result events, and the `CommandProcessor` transitions status afterwards
//!
//! The result event is always appended before the status transition, so any
//! observer reacting to status can assume the event is visible.

#![warn(clippy::all)]

mod claimer;
mod error;
mod executor;
pub mod handlers;
mod processor;
pub mod risk;

pub use claimer::CommandClaimer;
pub use error::ExecError;
pub use executor::{CommandExecutor, ExecOutcome};
pub use handlers::{CommandHandler, HandlerOutcome};
pub use processor::CommandProcessor;
pub use risk::{PnlCalculator, RiskContext, RiskDecision, RiskGuard, RiskRule};

pub type Result<T> = std::result::Result<T, ExecError>;
