//! SQLite connection management and schema.
//!
//! WAL mode so the observer process can read while the bot writes; a 30 s
//! busy timeout covers contending writers. The observer opens the same file
//! read-only via a URI flag.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::{Result, StoreError};

/// Canonical timestamp encoding for TEXT columns.
///
/// Fixed-width RFC 3339 with microseconds so lexicographic order equals
/// chronological order.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp '{raw}': {e}")))
}

/// Busy timeout for contending writers.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

fn base_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
}

/// Open (creating if missing) the database for the bot process.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| crate::StoreError::Decode(e.to_string()))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(base_options(path).create_if_missing(true))
        .await?;

    info!(path = %path.display(), "SQLite connected (WAL)");
    Ok(pool)
}

/// Open an existing database read-only (observer processes).
pub async fn connect_read_only(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(base_options(path).read_only(true))
        .await?;

    info!(path = %path.display(), "SQLite connected (read-only)");
    Ok(pool)
}

/// In-memory database for tests. A single connection keeps the database
/// alive for the pool's lifetime.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .journal_mode(SqliteJournalMode::Memory)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_store (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id         TEXT NOT NULL UNIQUE,
            event_type       TEXT NOT NULL,
            ts               TEXT NOT NULL,

            correlation_id   TEXT NOT NULL,
            causation_id     TEXT,
            command_id       TEXT,
            source           TEXT NOT NULL,

            entity_kind      TEXT NOT NULL,
            entity_id        TEXT NOT NULL,

            scope_exchange   TEXT NOT NULL,
            scope_venue      TEXT NOT NULL,
            scope_account_id TEXT NOT NULL,
            scope_symbol     TEXT,
            scope_mode       TEXT NOT NULL DEFAULT 'TESTNET',

            dedup_key        TEXT NOT NULL UNIQUE,
            payload_json     TEXT NOT NULL,

            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS command_store (
            seq              INTEGER PRIMARY KEY AUTOINCREMENT,
            command_id       TEXT NOT NULL UNIQUE,
            command_type     TEXT NOT NULL,
            ts               TEXT NOT NULL,

            correlation_id   TEXT NOT NULL,
            causation_id     TEXT,

            actor_kind       TEXT NOT NULL,
            actor_id         TEXT NOT NULL,

            scope_exchange   TEXT NOT NULL,
            scope_venue      TEXT NOT NULL,
            scope_account_id TEXT NOT NULL,
            scope_symbol     TEXT,
            scope_mode       TEXT NOT NULL DEFAULT 'TESTNET',

            idempotency_key  TEXT NOT NULL UNIQUE,
            status           TEXT NOT NULL DEFAULT 'NEW',
            priority         INTEGER NOT NULL DEFAULT 0,

            payload_json     TEXT NOT NULL,
            result_json      TEXT,
            last_error       TEXT,

            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at       TEXT NOT NULL DEFAULT (datetime('now')),
            claimed_at       TEXT,
            completed_at     TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS config_store (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            config_key   TEXT NOT NULL UNIQUE,
            value_json   TEXT NOT NULL,
            version      INTEGER NOT NULL DEFAULT 1,

            updated_by   TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoint_store (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            checkpoint_type  TEXT NOT NULL UNIQUE,
            last_seq         INTEGER NOT NULL DEFAULT 0,
            last_ts          TEXT,
            metadata_json    TEXT,
            updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projection_balance (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            scope_exchange   TEXT NOT NULL,
            scope_venue      TEXT NOT NULL,
            scope_account_id TEXT NOT NULL,
            scope_mode       TEXT NOT NULL DEFAULT 'TESTNET',

            asset            TEXT NOT NULL,
            free             TEXT NOT NULL DEFAULT '0',
            locked           TEXT NOT NULL DEFAULT '0',

            last_event_seq   INTEGER NOT NULL,
            updated_at       TEXT NOT NULL DEFAULT (datetime('now')),

            UNIQUE(scope_exchange, scope_venue, scope_account_id, asset, scope_mode)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfers (
            transfer_id      TEXT PRIMARY KEY,
            transfer_type    TEXT NOT NULL,
            status           TEXT NOT NULL,

            requested_amount TEXT NOT NULL,
            requested_at     TEXT NOT NULL,
            requested_by     TEXT NOT NULL,

            current_step     INTEGER DEFAULT 0,
            total_steps      INTEGER NOT NULL,

            actual_amount    TEXT,
            fee_amount       TEXT,

            completed_at     TEXT,
            error_message    TEXT,

            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS ix_event_store_ts ON event_store(ts)",
        "CREATE INDEX IF NOT EXISTS ix_event_store_entity ON event_store(entity_kind, entity_id)",
        "CREATE INDEX IF NOT EXISTS ix_event_store_type ON event_store(event_type)",
        "CREATE INDEX IF NOT EXISTS ix_command_store_status ON command_store(status, priority DESC, ts)",
        "CREATE INDEX IF NOT EXISTS ix_transfers_status ON transfers(status)",
        "CREATE INDEX IF NOT EXISTS ix_transfers_type ON transfers(transfer_type)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    info!("Schema initialized");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('event_store', 'command_store', 'config_store', 'checkpoint_store', \
              'projection_balance', 'transfers')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(count, 6);
    }
}
