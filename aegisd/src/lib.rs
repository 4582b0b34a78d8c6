//! Aegis Daemon
//!
//! Runtime orchestrator: wires the stores, projector, risk guard, executor,
//! strategy runner, pollers, and WebSocket listener, runs the first-run
//! recovery sequence, and drives the 100 ms main loop until shutdown.

#![warn(clippy::all)]

mod config;
mod engine;
mod error;

pub use config::Config;
pub use engine::BotEngine;
pub use error::{DaemonError, DaemonResult};
