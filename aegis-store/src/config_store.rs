//! Versioned runtime configuration shared by the bot and observer processes.
//!
//! Every write bumps the per-key version counter; writers that care about
//! lost updates use `set_if_version`. A small in-memory cache fronts reads
//! and is invalidated on every write. `bot_status` is read-only at the
//! service boundary: only `bot:*` actors may write it.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info, warn};

use aegis_domain::{EngineMode, RiskSettings};

use crate::sqlite::format_ts;
use crate::{Result, StoreError};

/// Well-known config keys.
pub mod config_key {
    pub const ENGINE: &str = "engine";
    pub const RISK: &str = "risk";
    pub const STRATEGY: &str = "strategy";
    pub const STRATEGY_STATE: &str = "strategy_state";
    pub const BOT_STATUS: &str = "bot_status";
    pub const INITIAL_CAPITAL: &str = "initial_capital";
    pub const PRICES: &str = "prices";
}

/// Writers with this prefix may touch read-only keys.
pub const CONFIG_UPDATED_BY_BOT_PREFIX: &str = "bot:";

/// Keys only the bot itself may write.
const READ_ONLY_KEYS: &[&str] = &[config_key::BOT_STATUS];

/// Accounting triple persisted for the strategy runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StrategyStateRecord {
    pub account_equity: String,
    pub trade_count_since_reset: u64,
    pub total_trade_count: u64,
}

impl Default for StrategyStateRecord {
    fn default() -> Self {
        Self {
            account_equity: "0".to_string(),
            trade_count_since_reset: 0,
            total_trade_count: 0,
        }
    }
}

fn default_value(key: &str) -> Option<Value> {
    match key {
        config_key::ENGINE => Some(json!({
            "mode": "RUNNING",
            "poll_interval_sec": 30,
        })),
        config_key::RISK => Some(json!({
            "max_position_size": "0",
            "daily_loss_limit": "0",
            "max_open_orders": 0,
            "min_balance": "0",
            "risk_per_trade": "0.02",
            "reward_ratio": "1.5",
            "partial_tp_ratio": "0.5",
            "equity_reset_trades": 50,
        })),
        config_key::STRATEGY => Some(json!({
            "name": null,
            "params": {},
            "auto_start": false,
        })),
        config_key::STRATEGY_STATE => Some(json!({
            "account_equity": "0",
            "trade_count_since_reset": 0,
            "total_trade_count": 0,
        })),
        config_key::BOT_STATUS => Some(json!({
            "is_running": false,
            "strategy_name": null,
            "strategy_running": false,
            "last_heartbeat": null,
            "tick_count": 0,
            "started_at": null,
        })),
        _ => None,
    }
}

const DEFAULT_KEYS: &[&str] = &[
    config_key::ENGINE,
    config_key::RISK,
    config_key::STRATEGY,
    config_key::STRATEGY_STATE,
    config_key::BOT_STATUS,
];

/// Versioned key-value config store.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    cache: std::sync::Arc<RwLock<HashMap<String, (Value, i64)>>>,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: std::sync::Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read a key, falling back to the built-in default when absent.
    pub async fn get(&self, key: &str) -> Result<Value> {
        Ok(self.get_with_version(key).await?.0)
    }

    /// Read a key together with its version (0 when only the default exists).
    pub async fn get_with_version(&self, key: &str) -> Result<(Value, i64)> {
        if let Some(hit) = self.cache.read().expect("config cache poisoned").get(key) {
            return Ok(hit.clone());
        }

        let row = sqlx::query("SELECT value_json, version FROM config_store WHERE config_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            let raw: String = row.try_get("value_json")?;
            let version: i64 = row.try_get("version")?;
            let value: Value = serde_json::from_str(&raw)?;

            self.cache
                .write()
                .expect("config cache poisoned")
                .insert(key.to_string(), (value.clone(), version));
            return Ok((value, version));
        }

        Ok((default_value(key).unwrap_or_else(|| json!({})), 0))
    }

    /// Typed read of a whole entry.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Read one field of an entry.
    pub async fn get_field(&self, key: &str, field: &str) -> Result<Option<Value>> {
        let value = self.get(key).await?;
        Ok(value.get(field).cloned())
    }

    /// Upsert a key, incrementing its version.
    pub async fn set(&self, key: &str, value: &Value, updated_by: &str) -> Result<()> {
        self.guard_read_only(key, updated_by)?;

        let now = format_ts(&Utc::now());
        let value_json = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO config_store (config_key, value_json, version, updated_by, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT(config_key) DO UPDATE SET
                value_json = excluded.value_json,
                version = config_store.version + 1,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value_json)
        .bind(updated_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.invalidate(key);

        // Heartbeat writes are too chatty to log at info
        if updated_by != "bot:heartbeat" {
            info!(key, updated_by, "Config updated");
        }
        Ok(())
    }

    /// Typed upsert.
    pub async fn set_from<T: Serialize>(&self, key: &str, value: &T, updated_by: &str) -> Result<()> {
        self.set(key, &serde_json::to_value(value)?, updated_by).await
    }

    /// Conditional upsert: fails with `Conflict` unless the stored version
    /// still equals `expected_version`.
    pub async fn set_if_version(
        &self,
        key: &str,
        value: &Value,
        expected_version: i64,
        updated_by: &str,
    ) -> Result<()> {
        self.guard_read_only(key, updated_by)?;

        let now = format_ts(&Utc::now());
        let value_json = serde_json::to_string(value)?;

        let updated = sqlx::query(
            "UPDATE config_store \
             SET value_json = ?, version = version + 1, updated_by = ?, updated_at = ? \
             WHERE config_key = ? AND version = ?",
        )
        .bind(value_json)
        .bind(updated_by)
        .bind(&now)
        .bind(key)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let (_, current) = {
                self.invalidate(key);
                self.get_with_version(key).await?
            };
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                current,
            });
        }

        self.invalidate(key);
        Ok(())
    }

    /// Update a single field, preserving the rest of the entry.
    pub async fn update_field(
        &self,
        key: &str,
        field: &str,
        value: Value,
        updated_by: &str,
    ) -> Result<()> {
        self.invalidate(key);
        let mut entry = self.get(key).await?;
        if let Some(map) = entry.as_object_mut() {
            map.insert(field.to_string(), value);
        } else {
            entry = json!({ field: value });
        }
        self.set(key, &entry, updated_by).await
    }

    /// Seed defaults for keys missing from the table. Called at bootstrap.
    pub async fn ensure_defaults(&self) -> Result<()> {
        for key in DEFAULT_KEYS {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM config_store WHERE config_key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;

            if exists.is_none() {
                let value = default_value(key).expect("default keys have defaults");
                self.set(key, &value, "bot:init").await?;
                debug!(key, "Created default config");
            }
        }
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("config cache poisoned").clear();
    }

    fn invalidate(&self, key: &str) {
        self.cache.write().expect("config cache poisoned").remove(key);
    }

    fn guard_read_only(&self, key: &str, updated_by: &str) -> Result<()> {
        if READ_ONLY_KEYS.contains(&key) && !updated_by.starts_with(CONFIG_UPDATED_BY_BOT_PREFIX) {
            return Err(StoreError::ReadOnlyKey {
                key: key.to_string(),
                updated_by: updated_by.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// Engine mode under the `engine` key; unreadable values fall back to RUNNING.
    pub async fn engine_mode(&self) -> Result<EngineMode> {
        let entry = self.get(config_key::ENGINE).await?;
        let mode = entry
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("RUNNING")
            .parse::<EngineMode>()
            .unwrap_or_else(|_| {
                warn!("Unparseable engine mode, falling back to RUNNING");
                EngineMode::Running
            });
        Ok(mode)
    }

    pub async fn set_engine_mode(&self, mode: EngineMode, updated_by: &str) -> Result<()> {
        self.update_field(config_key::ENGINE, "mode", json!(mode.as_str()), updated_by)
            .await
    }

    /// Risk-guard limits and sizing knobs under the `risk` key.
    pub async fn risk_settings(&self) -> Result<RiskSettings> {
        let entry = self.get(config_key::RISK).await?;
        Ok(serde_json::from_value(entry).unwrap_or_default())
    }

    // =========================================================================
    // Strategy state (survives restarts)
    // =========================================================================

    pub async fn strategy_state(&self) -> Result<StrategyStateRecord> {
        let entry = self.get(config_key::STRATEGY_STATE).await?;
        Ok(serde_json::from_value(entry).unwrap_or_default())
    }

    pub async fn save_strategy_state(&self, state: &StrategyStateRecord) -> Result<()> {
        self.set_from(config_key::STRATEGY_STATE, state, "bot:strategy").await
    }

    // =========================================================================
    // Bot status (read-only for non-bot writers)
    // =========================================================================

    pub async fn update_bot_status(
        &self,
        is_running: bool,
        strategy_name: Option<&str>,
        strategy_running: bool,
        tick_count: u64,
        started_at: Option<&str>,
    ) -> Result<()> {
        let status = json!({
            "is_running": is_running,
            "strategy_name": strategy_name,
            "strategy_running": strategy_running,
            "last_heartbeat": format_ts(&Utc::now()),
            "tick_count": tick_count,
            "started_at": started_at,
        });
        self.set(config_key::BOT_STATUS, &status, "bot:heartbeat").await
    }

    /// Mark the bot stopped without losing the last known fields.
    pub async fn clear_bot_status(&self) -> Result<()> {
        self.invalidate(config_key::BOT_STATUS);
        let mut status = self.get(config_key::BOT_STATUS).await?;
        if let Some(map) = status.as_object_mut() {
            map.insert("is_running".into(), json!(false));
            map.insert("strategy_running".into(), json!(false));
            map.insert("last_heartbeat".into(), json!(format_ts(&Utc::now())));
        }
        self.set(config_key::BOT_STATUS, &status, "bot:shutdown").await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite;

    async fn store() -> ConfigStore {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn missing_key_returns_default() {
        let store = store().await;
        let engine = store.get(config_key::ENGINE).await.unwrap();
        assert_eq!(engine["mode"], "RUNNING");
        assert_eq!(engine["poll_interval_sec"], 30);
    }

    #[tokio::test]
    async fn set_increments_version() {
        let store = store().await;

        store.set("engine", &json!({"mode": "PAUSED"}), "web:admin").await.unwrap();
        let (_, v1) = store.get_with_version("engine").await.unwrap();
        store.set("engine", &json!({"mode": "RUNNING"}), "web:admin").await.unwrap();
        let (value, v2) = store.get_with_version("engine").await.unwrap();

        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(value["mode"], "RUNNING");
    }

    #[tokio::test]
    async fn optimistic_lock_conflicts_on_stale_version() {
        let store = store().await;
        store.set("risk", &json!({"max_open_orders": 3}), "web:admin").await.unwrap();
        store.set("risk", &json!({"max_open_orders": 5}), "web:admin").await.unwrap();

        let err = store
            .set_if_version("risk", &json!({"max_open_orders": 9}), 1, "web:admin")
            .await
            .unwrap_err();

        match err {
            StoreError::Conflict { expected, current, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(current, 2);
            }
            other => panic!("expected conflict, got {other}"),
        }

        // Matching version succeeds
        store
            .set_if_version("risk", &json!({"max_open_orders": 9}), 2, "web:admin")
            .await
            .unwrap();
        let (value, version) = store.get_with_version("risk").await.unwrap();
        assert_eq!(value["max_open_orders"], 9);
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn bot_status_rejects_non_bot_writers() {
        let store = store().await;

        let err = store
            .set(config_key::BOT_STATUS, &json!({"is_running": true}), "web:admin")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyKey { .. }));

        store
            .update_bot_status(true, Some("sma_cross"), true, 42, None)
            .await
            .unwrap();
        let status = store.get(config_key::BOT_STATUS).await.unwrap();
        assert_eq!(status["is_running"], true);
        assert_eq!(status["tick_count"], 42);
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_write() {
        let store = store().await;
        store.set("prices", &json!({"BTCUSDT": "95000"}), "bot:poller").await.unwrap();
        let _ = store.get("prices").await.unwrap(); // warm cache
        store.set("prices", &json!({"BTCUSDT": "96000"}), "bot:poller").await.unwrap();

        let prices = store.get("prices").await.unwrap();
        assert_eq!(prices["BTCUSDT"], "96000");
    }

    #[tokio::test]
    async fn strategy_state_round_trip() {
        let store = store().await;
        let record = StrategyStateRecord {
            account_equity: "670.25".into(),
            trade_count_since_reset: 12,
            total_trade_count: 62,
        };

        store.save_strategy_state(&record).await.unwrap();
        assert_eq!(store.strategy_state().await.unwrap(), record);
    }

    #[tokio::test]
    async fn ensure_defaults_seeds_missing_keys_once() {
        let store = store().await;
        store.ensure_defaults().await.unwrap();
        let (_, v1) = store.get_with_version("risk").await.unwrap();
        store.ensure_defaults().await.unwrap();
        let (_, v2) = store.get_with_version("risk").await.unwrap();

        assert_eq!(v1, 1);
        assert_eq!(v2, 1);
    }

    #[tokio::test]
    async fn risk_settings_typed_read() {
        let store = store().await;
        store
            .set("risk", &json!({"max_position_size": "1000", "daily_loss_limit": "50"}), "web:admin")
            .await
            .unwrap();

        let settings = store.risk_settings().await.unwrap();
        assert_eq!(settings.max_position_size.to_string(), "1000");
        assert_eq!(settings.daily_loss_limit.to_string(), "50");
        assert_eq!(settings.equity_reset_trades, 50);
    }
}
