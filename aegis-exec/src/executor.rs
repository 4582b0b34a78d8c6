//! Executor: handler registry plus event persistence.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, warn};

use aegis_domain::Command;
use aegis_store::EventStore;

use crate::handlers::{CommandHandler, HandlerOutcome};
use crate::Result;

/// Result of executing one command.
#[derive(Debug)]
pub struct ExecOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Dispatch table from `command_type` to handler. Unknown types fail closed.
pub struct CommandExecutor {
    events: EventStore,
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandExecutor {
    pub fn new(events: EventStore) -> Self {
        Self {
            events,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. Later registrations replace earlier ones.
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        let command_type = handler.command_type();
        if self.handlers.insert(command_type, handler).is_some() {
            warn!(command_type, "Handler replaced");
        } else {
            debug!(command_type, "Handler registered");
        }
    }

    pub fn supported_commands(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Execute a claimed command: dispatch, then append every result event
    /// before returning, so status transitions happen strictly after the
    /// events are visible.
    pub async fn execute(&self, command: &Command) -> Result<ExecOutcome> {
        let Some(handler) = self.handlers.get(command.command_type.as_str()) else {
            let error = format!("No handler for command type: {}", command.command_type);
            error!(command_id = %command.command_id, command_type = %command.command_type, "{error}");
            return Ok(ExecOutcome {
                success: false,
                result: None,
                error: Some(error),
            });
        };

        let HandlerOutcome {
            success,
            result,
            error,
            events,
        } = handler.execute(command).await;

        for event in &events {
            self.events.append(event).await?;
        }

        if success {
            debug!(
                command_id = %command.command_id,
                command_type = %command.command_type,
                events = events.len(),
                "Command executed"
            );
        } else {
            warn!(
                command_id = %command.command_id,
                command_type = %command.command_type,
                error = error.as_deref().unwrap_or(""),
                "Command failed"
            );
        }

        Ok(ExecOutcome {
            success,
            result: (!result.is_null()).then_some(result),
            error,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
