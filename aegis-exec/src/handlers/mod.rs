//! Command handlers.
//!
//! One handler per `command_type`. A handler calls the exchange adapter,
//! synthesises its result events, and reports the outcome; the executor owns
//! appending events and the processor owns the status transition.

mod engine;
mod order;

pub use engine::{PauseEngineHandler, ResumeEngineHandler, SetEngineModeHandler};
pub use order::{
    CancelAllHandler, CancelOrderHandler, ClosePositionHandler, PlaceOrderHandler,
    SetLeverageHandler,
};

use async_trait::async_trait;

use aegis_domain::{Command, Event};

/// What a handler produced.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub success: bool,
    pub result: serde_json::Value,
    pub error: Option<String>,
    pub events: Vec<Event>,
}

impl HandlerOutcome {
    pub fn ok(result: serde_json::Value, events: Vec<Event>) -> Self {
        Self {
            success: true,
            result,
            error: None,
            events,
        }
    }

    pub fn failed(error: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            success: false,
            result: serde_json::Value::Null,
            error: Some(error.into()),
            events,
        }
    }
}

/// Type-dispatched command execution.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The `command_type` this handler serves.
    fn command_type(&self) -> &'static str;

    /// Execute a claimed command. Failures are encoded in the outcome, never
    /// panicked or silently dropped.
    async fn execute(&self, command: &Command) -> HandlerOutcome;
}

/// Pull a required string field out of a command payload.
pub(crate) fn required_str<'a>(
    command: &'a Command,
    key: &str,
) -> Result<&'a str, String> {
    command
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("payload field '{key}' missing"))
}

pub(crate) fn optional_str<'a>(command: &'a Command, key: &str) -> Option<&'a str> {
    command.payload.get(key).and_then(|v| v.as_str())
}

pub(crate) fn bool_field(command: &Command, key: &str) -> bool {
    command
        .payload
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}
