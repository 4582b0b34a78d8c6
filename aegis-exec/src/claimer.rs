//! Command claimer: pulls NEW commands for the processor.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use aegis_domain::{Command, CommandStatus};
use aegis_store::CommandStore;

use crate::Result;

/// Thin wrapper over the store's claim protocol with counters.
pub struct CommandClaimer {
    store: CommandStore,
    claimed_count: AtomicU64,
}

impl CommandClaimer {
    pub fn new(store: CommandStore) -> Self {
        Self {
            store,
            claimed_count: AtomicU64::new(0),
        }
    }

    /// Claim the best NEW command, transitioning it to SENT.
    pub async fn claim_one(&self) -> Result<Option<Command>> {
        let command = self.store.claim_one().await?;

        if let Some(command) = &command {
            self.claimed_count.fetch_add(1, Ordering::Relaxed);
            info!(
                command_id = %command.command_id,
                command_type = %command.command_type,
                priority = command.priority,
                actor = %command.actor,
                "Command claimed"
            );
        }

        Ok(command)
    }

    /// Claim up to `max_count` commands.
    pub async fn claim_batch(&self, max_count: usize) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        for _ in 0..max_count {
            match self.claim_one().await? {
                Some(command) => commands.push(command),
                None => break,
            }
        }
        Ok(commands)
    }

    pub async fn pending_count(&self) -> Result<i64> {
        Ok(self.store.pending_count().await?)
    }

    pub async fn new_count(&self) -> Result<i64> {
        Ok(self.store.count_by_status(CommandStatus::New).await?)
    }

    pub fn claimed_count(&self) -> u64 {
        self.claimed_count.load(Ordering::Relaxed)
    }
}
