//! Command log: insert, claim, status transitions.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info};

use aegis_domain::{
    Actor, ActorKind, Command, CommandStatus, Scope, TradingMode, Venue,
};

use crate::sqlite::{format_ts, parse_ts};
use crate::{Result, StoreError};

/// Outcome of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    /// A row with the same idempotency key already exists
    Duplicate,
}

const COMMAND_COLUMNS: &str = "command_id, command_type, ts, \
     correlation_id, causation_id, \
     actor_kind, actor_id, \
     scope_exchange, scope_venue, scope_account_id, scope_symbol, scope_mode, \
     idempotency_key, status, priority, \
     payload_json, result_json, last_error, \
     created_at, updated_at, claimed_at, completed_at";

/// Command store. A single claimer is the canonical deployment, but the
/// claim protocol is CAS-gated so parallel claimers never double-deliver.
#[derive(Clone)]
pub struct CommandStore {
    pool: SqlitePool,
}

impl CommandStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-ignore by `idempotency_key`.
    pub async fn insert(&self, command: &Command) -> Result<InsertOutcome> {
        let payload_json = serde_json::to_string(&command.payload)?;
        let result_json = command
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO command_store (
                command_id, command_type, ts,
                correlation_id, causation_id,
                actor_kind, actor_id,
                scope_exchange, scope_venue, scope_account_id, scope_symbol, scope_mode,
                idempotency_key, status, priority,
                payload_json, result_json, last_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&command.command_id)
        .bind(&command.command_type)
        .bind(format_ts(&command.ts))
        .bind(&command.correlation_id)
        .bind(&command.causation_id)
        .bind(command.actor.kind.as_str())
        .bind(&command.actor.id)
        .bind(&command.scope.exchange)
        .bind(command.scope.venue.as_str())
        .bind(&command.scope.account_id)
        .bind(&command.scope.symbol)
        .bind(command.scope.mode.as_str())
        .bind(&command.idempotency_key)
        .bind(command.status.as_str())
        .bind(command.priority)
        .bind(payload_json)
        .bind(result_json)
        .bind(&command.last_error)
        .bind(format_ts(&command.created_at))
        .bind(format_ts(&command.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(idempotency_key = %command.idempotency_key, "Command duplicate (ignored)");
            return Ok(InsertOutcome::Duplicate);
        }

        debug!(
            command_id = %command.command_id,
            command_type = %command.command_type,
            priority = command.priority,
            "Command inserted"
        );
        Ok(InsertOutcome::Stored)
    }

    pub async fn get_by_id(&self, command_id: &str) -> Result<Option<Command>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_store WHERE command_id = ?"
        ))
        .bind(command_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_command(&r)).transpose()
    }

    pub async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Command>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_store WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_command(&r)).transpose()
    }

    /// Commands in one status, highest priority first, then oldest.
    pub async fn find_by_status(&self, status: CommandStatus, limit: i64) -> Result<Vec<Command>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_store \
             WHERE status = ? ORDER BY priority DESC, ts ASC LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_command).collect()
    }

    /// Atomically claim the best NEW command: highest priority, oldest first.
    ///
    /// The NEW→SENT transition is conditional on the row still being NEW; a
    /// lost race selects the next candidate. Returns `None` when the queue
    /// is drained.
    pub async fn claim_one(&self) -> Result<Option<Command>> {
        loop {
            let candidate: Option<String> = sqlx::query_scalar(
                "SELECT command_id FROM command_store \
                 WHERE status = ? ORDER BY priority DESC, ts ASC LIMIT 1",
            )
            .bind(CommandStatus::New.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let Some(command_id) = candidate else {
                return Ok(None);
            };

            let now = format_ts(&Utc::now());
            let updated = sqlx::query(
                "UPDATE command_store \
                 SET status = ?, claimed_at = ?, updated_at = ? \
                 WHERE command_id = ? AND status = ?",
            )
            .bind(CommandStatus::Sent.as_str())
            .bind(&now)
            .bind(&now)
            .bind(&command_id)
            .bind(CommandStatus::New.as_str())
            .execute(&self.pool)
            .await?;

            // Another claimer got there first; try the next candidate.
            if updated.rows_affected() == 0 {
                continue;
            }

            return self.get_by_id(&command_id).await;
        }
    }

    /// Transition a command's status, optionally recording result/error.
    ///
    /// Terminal statuses stamp `completed_at`. Backward moves are rejected.
    pub async fn update_status(
        &self,
        command_id: &str,
        status: CommandStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool> {
        let current = self.get_by_id(command_id).await?;
        if let Some(current) = &current {
            if !current.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    command_id: command_id.to_string(),
                    from: current.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
        }

        let result_json = result.map(serde_json::to_string).transpose()?;
        let now = format_ts(&Utc::now());

        let updated = if status.is_terminal() {
            sqlx::query(
                "UPDATE command_store \
                 SET status = ?, updated_at = ?, completed_at = ?, \
                     result_json = COALESCE(?, result_json), \
                     last_error = COALESCE(?, last_error) \
                 WHERE command_id = ?",
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(&now)
            .bind(result_json)
            .bind(error)
            .bind(command_id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE command_store \
                 SET status = ?, updated_at = ?, \
                     result_json = COALESCE(?, result_json), \
                     last_error = COALESCE(?, last_error) \
                 WHERE command_id = ?",
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(result_json)
            .bind(error)
            .bind(command_id)
            .execute(&self.pool)
            .await?
        };

        let changed = updated.rows_affected() > 0;
        if changed {
            debug!(command_id, status = status.as_str(), "Command status updated");
        }
        Ok(changed)
    }

    pub async fn count_by_status(&self, status: CommandStatus) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM command_store WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Commands still in flight (NEW + SENT).
    pub async fn pending_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM command_store WHERE status IN (?, ?)",
        )
        .bind(CommandStatus::New.as_str())
        .bind(CommandStatus::Sent.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// Most recent commands, newest first (observer views).
    pub async fn recent(&self, limit: i64) -> Result<Vec<Command>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMMAND_COLUMNS} FROM command_store ORDER BY ts DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_command).collect()
    }

    /// Delete terminal commands older than the retention window.
    pub async fn purge_completed(&self, retention_days: i64) -> Result<u64> {
        let cutoff = format_ts(&(Utc::now() - chrono::Duration::days(retention_days)));
        let deleted = sqlx::query(
            "DELETE FROM command_store WHERE status IN (?, ?) AND completed_at < ?",
        )
        .bind(CommandStatus::Ack.as_str())
        .bind(CommandStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            info!(deleted, retention_days, "Purged completed commands");
        }
        Ok(deleted)
    }
}

fn row_to_command(row: &sqlx::sqlite::SqliteRow) -> Result<Command> {
    let ts: String = row.try_get("ts")?;
    let actor_kind: String = row.try_get("actor_kind")?;
    let venue: String = row.try_get("scope_venue")?;
    let mode: String = row.try_get("scope_mode")?;
    let status: String = row.try_get("status")?;
    let payload_json: String = row.try_get("payload_json")?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let claimed_at: Option<String> = row.try_get("claimed_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Command {
        command_id: row.try_get("command_id")?,
        command_type: row.try_get("command_type")?,
        ts: parse_ts(&ts)?,
        correlation_id: row.try_get("correlation_id")?,
        causation_id: row.try_get("causation_id")?,
        actor: Actor {
            kind: actor_kind.parse::<ActorKind>()?,
            id: row.try_get("actor_id")?,
        },
        scope: Scope {
            exchange: row.try_get("scope_exchange")?,
            venue: venue.parse::<Venue>()?,
            account_id: row.try_get("scope_account_id")?,
            symbol: row.try_get("scope_symbol")?,
            mode: mode.parse::<TradingMode>()?,
        },
        idempotency_key: row.try_get("idempotency_key")?,
        status: status.parse::<CommandStatus>()?,
        priority: row.try_get("priority")?,
        payload: serde_json::from_str(&payload_json)?,
        result: result_json.as_deref().map(serde_json::from_str).transpose()?,
        last_error: row.try_get("last_error")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        claimed_at: claimed_at.as_deref().map(parse_ts).transpose()?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite;
    use aegis_domain::{command_type, priority, CommandOptions};
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    fn place_order(priority: i64) -> Command {
        Command::create(
            command_type::PLACE_ORDER,
            Actor::strategy("test"),
            scope(),
            json!({"side": "BUY", "order_type": "MARKET", "quantity": "10"}),
            CommandOptions {
                priority,
                ..Default::default()
            },
        )
    }

    async fn store() -> CommandStore {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        CommandStore::new(pool)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = store().await;
        let cmd = place_order(0);

        assert_eq!(store.insert(&cmd).await.unwrap(), InsertOutcome::Stored);

        let loaded = store.get_by_id(&cmd.command_id).await.unwrap().unwrap();
        assert_eq!(loaded.command_type, cmd.command_type);
        assert_eq!(loaded.status, CommandStatus::New);
        assert_eq!(loaded.payload, cmd.payload);
        assert!(loaded.claimed_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_ignored() {
        let store = store().await;
        let mut first = place_order(0);
        first.idempotency_key = "K1".into();
        let mut second = place_order(0);
        second.idempotency_key = "K1".into();

        assert_eq!(store.insert(&first).await.unwrap(), InsertOutcome::Stored);
        assert_eq!(store.insert(&second).await.unwrap(), InsertOutcome::Duplicate);

        // Original row is untouched
        let loaded = store.get_by_idempotency_key("K1").await.unwrap().unwrap();
        assert_eq!(loaded.command_id, first.command_id);
    }

    #[tokio::test]
    async fn claim_follows_priority_then_age() {
        let store = store().await;
        let low = place_order(priority::STRATEGY);
        let mid = place_order(priority::SYSTEM);
        let high = place_order(priority::USER_URGENT);

        // Inserted low first; claim order must still be by priority
        store.insert(&low).await.unwrap();
        store.insert(&mid).await.unwrap();
        store.insert(&high).await.unwrap();

        let c1 = store.claim_one().await.unwrap().unwrap();
        let c2 = store.claim_one().await.unwrap().unwrap();
        let c3 = store.claim_one().await.unwrap().unwrap();

        assert_eq!(c1.command_id, high.command_id);
        assert_eq!(c2.command_id, mid.command_id);
        assert_eq!(c3.command_id, low.command_id);
        assert!(store.claim_one().await.unwrap().is_none());

        assert_eq!(c1.status, CommandStatus::Sent);
        assert!(c1.claimed_at.is_some());
    }

    #[tokio::test]
    async fn status_cannot_move_backward() {
        let store = store().await;
        let cmd = place_order(0);
        store.insert(&cmd).await.unwrap();

        store.claim_one().await.unwrap().unwrap();
        store
            .update_status(&cmd.command_id, CommandStatus::Ack, Some(&json!({"ok": true})), None)
            .await
            .unwrap();

        let err = store
            .update_status(&cmd.command_id, CommandStatus::Failed, None, Some("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let loaded = store.get_by_id(&cmd.command_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CommandStatus::Ack);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_commands_keep_last_error() {
        let store = store().await;
        let cmd = place_order(0);
        store.insert(&cmd).await.unwrap();
        store.claim_one().await.unwrap();

        store
            .update_status(&cmd.command_id, CommandStatus::Failed, None, Some("RiskGuard rejected: paused"))
            .await
            .unwrap();

        let loaded = store.get_by_id(&cmd.command_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CommandStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("RiskGuard rejected: paused"));
    }

    #[tokio::test]
    async fn pending_count_covers_new_and_sent() {
        let store = store().await;
        store.insert(&place_order(0)).await.unwrap();
        store.insert(&place_order(0)).await.unwrap();
        store.claim_one().await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 2);
        assert_eq!(store.count_by_status(CommandStatus::New).await.unwrap(), 1);
        assert_eq!(store.count_by_status(CommandStatus::Sent).await.unwrap(), 1);
    }
}
