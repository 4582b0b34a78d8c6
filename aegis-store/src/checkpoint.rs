//! Per-consumer cursors over the event log.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::sqlite::{format_ts, parse_ts};
use crate::Result;

/// A consumer's position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_type: String,
    pub last_seq: i64,
    pub last_ts: Option<DateTime<Utc>>,
}

/// Checkpoint persistence. One row per consumer kind.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a checkpoint; absent rows read as seq 0.
    pub async fn get(&self, checkpoint_type: &str) -> Result<Checkpoint> {
        let row = sqlx::query(
            "SELECT last_seq, last_ts FROM checkpoint_store WHERE checkpoint_type = ?",
        )
        .bind(checkpoint_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let last_ts: Option<String> = row.try_get("last_ts")?;
                Ok(Checkpoint {
                    checkpoint_type: checkpoint_type.to_string(),
                    last_seq: row.try_get("last_seq")?,
                    last_ts: last_ts.as_deref().map(parse_ts).transpose()?,
                })
            }
            None => Ok(Checkpoint {
                checkpoint_type: checkpoint_type.to_string(),
                last_seq: 0,
                last_ts: None,
            }),
        }
    }

    /// Advance a checkpoint (upsert).
    pub async fn set(&self, checkpoint_type: &str, last_seq: i64, last_ts: Option<DateTime<Utc>>) -> Result<()> {
        let now = format_ts(&Utc::now());
        sqlx::query(
            r#"
            INSERT INTO checkpoint_store (checkpoint_type, last_seq, last_ts, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(checkpoint_type) DO UPDATE SET
                last_seq = excluded.last_seq,
                last_ts = excluded.last_ts,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(checkpoint_type)
        .bind(last_seq)
        .bind(last_ts.as_ref().map(format_ts))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite;

    #[tokio::test]
    async fn absent_checkpoint_reads_as_zero() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let store = CheckpointStore::new(pool);

        let cp = store.get("projection").await.unwrap();
        assert_eq!(cp.last_seq, 0);
        assert!(cp.last_ts.is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let store = CheckpointStore::new(pool);

        let ts = Utc::now();
        store.set("projection", 42, Some(ts)).await.unwrap();
        store.set("projection", 43, Some(ts)).await.unwrap();

        let cp = store.get("projection").await.unwrap();
        assert_eq!(cp.last_seq, 43);
        assert!(cp.last_ts.is_some());
    }
}
