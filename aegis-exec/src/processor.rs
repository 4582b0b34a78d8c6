//! Command processor: claim → final risk check → execute → status.
//!
//! The guard runs again here, at execution time, on a freshly built context;
//! this is the re-check that bounds the emit-time race between strategies
//! and concurrent stream events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use aegis_domain::{Command, CommandStatus};
use aegis_store::CommandStore;

use crate::claimer::CommandClaimer;
use crate::executor::CommandExecutor;
use crate::risk::{RiskDecision, RiskGuard};
use crate::Result;

/// Drains the command queue through the executor.
pub struct CommandProcessor {
    commands: CommandStore,
    executor: CommandExecutor,
    risk_guard: Option<Arc<RiskGuard>>,
    claimer: CommandClaimer,

    processed_count: AtomicU64,
    success_count: AtomicU64,
    failed_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl CommandProcessor {
    pub fn new(
        commands: CommandStore,
        executor: CommandExecutor,
        risk_guard: Option<Arc<RiskGuard>>,
    ) -> Self {
        let claimer = CommandClaimer::new(commands.clone());
        Self {
            commands,
            executor,
            risk_guard,
            claimer,
            processed_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    /// Process one command. Returns false when the queue is empty.
    pub async fn process_one(&self) -> Result<bool> {
        let Some(command) = self.claimer.claim_one().await? else {
            return Ok(false);
        };

        self.processed_count.fetch_add(1, Ordering::Relaxed);

        if let Some(guard) = &self.risk_guard {
            match guard.check(&command).await? {
                RiskDecision::Allowed => {}
                RiskDecision::Rejected { reason, .. } => {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    self.handle_rejection(&command, &reason).await?;
                    return Ok(true);
                }
            }
        }

        let outcome = self.executor.execute(&command).await?;

        if outcome.success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
            self.commands
                .update_status(
                    &command.command_id,
                    CommandStatus::Ack,
                    outcome.result.as_ref(),
                    None,
                )
                .await?;
            info!(
                command_id = %command.command_id,
                command_type = %command.command_type,
                "Command acknowledged"
            );
        } else {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            self.commands
                .update_status(
                    &command.command_id,
                    CommandStatus::Failed,
                    None,
                    outcome.error.as_deref(),
                )
                .await?;
            warn!(
                command_id = %command.command_id,
                command_type = %command.command_type,
                error = outcome.error.as_deref().unwrap_or(""),
                "Command failed"
            );
        }

        Ok(true)
    }

    /// Process up to `max_count` commands; returns how many ran.
    pub async fn process_batch(&self, max_count: usize) -> Result<usize> {
        let mut count = 0;
        for _ in 0..max_count {
            match self.process_one().await {
                Ok(true) => count += 1,
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "Command processing error");
                    break;
                }
            }
        }
        Ok(count)
    }

    /// Drain everything currently queued.
    pub async fn process_all_pending(&self) -> Result<usize> {
        let mut total = 0;
        while self.process_one().await? {
            total += 1;
        }
        Ok(total)
    }

    async fn handle_rejection(&self, command: &Command, reason: &str) -> Result<()> {
        let error = format!("RiskGuard rejected: {reason}");

        self.commands
            .update_status(&command.command_id, CommandStatus::Failed, None, Some(&error))
            .await?;

        warn!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            %reason,
            "Command rejected by risk guard"
        );
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.claimer.pending_count().await
    }

    /// (processed, succeeded, failed, risk-rejected) counters.
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.processed_count.load(Ordering::Relaxed),
            self.success_count.load(Ordering::Relaxed),
            self.failed_count.load(Ordering::Relaxed),
            self.rejected_count.load(Ordering::Relaxed),
        )
    }
}
