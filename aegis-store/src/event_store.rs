//! Append-only event log with dedup-gated inserts.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use aegis_domain::{EntityKind, Event, EventSource, Scope, TradingMode, Venue};

use crate::sqlite::{format_ts, parse_ts};
use crate::{Result, StoreError};

/// Outcome of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New row; carries the assigned sequence number
    Stored(i64),
    /// A row with the same dedup key already exists
    Duplicate,
}

impl AppendOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, AppendOutcome::Stored(_))
    }
}

const EVENT_COLUMNS: &str = "seq, event_id, event_type, ts, \
     correlation_id, causation_id, command_id, source, \
     entity_kind, entity_id, \
     scope_exchange, scope_venue, scope_account_id, scope_symbol, scope_mode, \
     dedup_key, payload_json";

/// Append-only event store. Append is the only mutation.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-ignore by `dedup_key`, reporting whether the row is new.
    pub async fn append(&self, event: &Event) -> Result<AppendOutcome> {
        let payload_json = serde_json::to_string(&event.payload)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO event_store (
                event_id, event_type, ts,
                correlation_id, causation_id, command_id, source,
                entity_kind, entity_id,
                scope_exchange, scope_venue, scope_account_id, scope_symbol, scope_mode,
                dedup_key, payload_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(format_ts(&event.ts))
        .bind(&event.correlation_id)
        .bind(&event.causation_id)
        .bind(&event.command_id)
        .bind(event.source.as_str())
        .bind(event.entity_kind.as_str())
        .bind(&event.entity_id)
        .bind(&event.scope.exchange)
        .bind(event.scope.venue.as_str())
        .bind(&event.scope.account_id)
        .bind(&event.scope.symbol)
        .bind(event.scope.mode.as_str())
        .bind(&event.dedup_key)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(dedup_key = %event.dedup_key, "Event duplicate (ignored)");
            return Ok(AppendOutcome::Duplicate);
        }

        let seq: i64 = sqlx::query_scalar("SELECT seq FROM event_store WHERE event_id = ?")
            .bind(&event.event_id)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            seq,
            "Event appended"
        );

        Ok(AppendOutcome::Stored(seq))
    }

    pub async fn get_by_id(&self, event_id: &str) -> Result<Option<Event>> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store WHERE event_id = ?"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_event(&r)).transpose()
    }

    /// Events for one entity, oldest first.
    pub async fn get_by_entity(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store \
             WHERE entity_kind = ? AND entity_id = ? \
             ORDER BY ts ASC LIMIT ?"
        ))
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Latest events of one type, newest first.
    pub async fn get_by_type(&self, event_type: &str, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store \
             WHERE event_type = ? ORDER BY ts DESC LIMIT ?"
        ))
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Events of one type at or after `after`, oldest first.
    pub async fn get_by_type_since(
        &self,
        event_type: &str,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store \
             WHERE event_type = ? AND ts >= ? ORDER BY ts ASC LIMIT ?"
        ))
        .bind(event_type)
        .bind(format_ts(&after))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Cursor read: events with `seq > last_seq`, in seq order.
    pub async fn get_since(&self, last_seq: i64, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store \
             WHERE seq > ? ORDER BY seq ASC LIMIT ?"
        ))
        .bind(last_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// All events ordered by timestamp ascending (audit views, tests).
    pub async fn get_all_by_ts(&self, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_store ORDER BY ts ASC, seq ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_store")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn last_seq(&self) -> Result<i64> {
        let n: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM event_store")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.unwrap_or(0))
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<Event> {
    let source: String = row.try_get("source")?;
    let entity_kind: String = row.try_get("entity_kind")?;
    let venue: String = row.try_get("scope_venue")?;
    let mode: String = row.try_get("scope_mode")?;
    let ts: String = row.try_get("ts")?;
    let payload_json: String = row.try_get("payload_json")?;

    Ok(Event {
        seq: Some(row.try_get("seq")?),
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        ts: parse_ts(&ts)?,
        correlation_id: row.try_get("correlation_id")?,
        causation_id: row.try_get("causation_id")?,
        command_id: row.try_get("command_id")?,
        source: source.parse::<EventSource>()?,
        entity_kind: entity_kind.parse::<EntityKind>()?,
        entity_id: row.try_get("entity_id")?,
        scope: Scope {
            exchange: row.try_get("scope_exchange")?,
            venue: venue.parse::<Venue>()?,
            account_id: row.try_get("scope_account_id")?,
            symbol: row.try_get("scope_symbol")?,
            mode: mode.parse::<TradingMode>()?,
        },
        dedup_key: row.try_get("dedup_key")?,
        payload: serde_json::from_str(&payload_json).map_err(StoreError::Serialization)?,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite;
    use aegis_domain::event_type;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    fn trade_event(trade_id: &str) -> Event {
        Event::new(
            event_type::TRADE_EXECUTED,
            EventSource::Websocket,
            EntityKind::Trade,
            trade_id,
            scope(),
            aegis_domain::dedup::trade_key("BINANCE", Venue::Futures, "XRPUSDT", trade_id),
            json!({"realized_pnl": "1.25", "qty": "10"}),
        )
    }

    async fn store() -> EventStore {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        EventStore::new(pool)
    }

    #[tokio::test]
    async fn append_assigns_monotone_seq() {
        let store = store().await;

        let a = store.append(&trade_event("1")).await.unwrap();
        let b = store.append(&trade_event("2")).await.unwrap();

        match (a, b) {
            (AppendOutcome::Stored(s1), AppendOutcome::Stored(s2)) => assert!(s2 > s1),
            other => panic!("expected two stores, got {other:?}"),
        }
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.last_seq().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_dedup_key_is_ignored() {
        let store = store().await;
        let event = trade_event("777");

        assert!(store.append(&event).await.unwrap().is_stored());

        // Replay with a different event_id but the same natural key
        let mut replay = trade_event("777");
        replay.event_id = uuid::Uuid::new_v4().to_string();
        assert_eq!(store.append(&replay).await.unwrap(), AppendOutcome::Duplicate);

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn round_trip_preserves_fields() {
        let store = store().await;
        let event = trade_event("42");
        store.append(&event).await.unwrap();

        let loaded = store.get_by_id(&event.event_id).await.unwrap().unwrap();
        assert_eq!(loaded.event_type, event.event_type);
        assert_eq!(loaded.dedup_key, event.dedup_key);
        assert_eq!(loaded.scope, event.scope);
        assert_eq!(loaded.payload, event.payload);
        assert_eq!(loaded.seq, Some(1));
    }

    #[tokio::test]
    async fn get_since_is_a_cursor_over_seq() {
        let store = store().await;
        for id in ["1", "2", "3"] {
            store.append(&trade_event(id)).await.unwrap();
        }

        let tail = store.get_since(1, 10).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, Some(2));
        assert_eq!(tail[1].seq, Some(3));
    }

    #[tokio::test]
    async fn get_by_type_since_filters_on_ts() {
        let store = store().await;
        let old = trade_event("old").at(chrono::Utc::now() - chrono::Duration::days(2));
        let fresh = trade_event("fresh");
        store.append(&old).await.unwrap();
        store.append(&fresh).await.unwrap();

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
        let events = store
            .get_by_type_since(event_type::TRADE_EXECUTED, cutoff, 100)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, "fresh");
    }
}
