//! Daemon configuration from environment variables.

use std::env;
use std::time::Duration;

use aegis_domain::{Scope, TradingMode, Venue};

use crate::error::{DaemonError, DaemonResult};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Trading mode; picks endpoints and the database file
    pub mode: TradingMode,
    /// SQLite database path
    pub db_path: String,
    /// The bot's target symbol
    pub symbol: String,
    /// Account label used in scopes
    pub account_id: String,
    /// Exchange API credentials
    pub api_key: String,
    pub api_secret: String,
    /// Main loop tick interval
    pub tick_interval: Duration,
    /// Commands processed per loop iteration
    pub command_batch: usize,
    /// Primary strategy timeframe and bar window
    pub timeframe: String,
    pub bar_limit: u32,
    /// Whether to attach the user-data stream
    pub listener_enabled: bool,
}

impl Config {
    /// Load from `AEGIS_*` environment variables (reading `.env` first).
    pub fn from_env() -> DaemonResult<Self> {
        let _ = dotenvy::dotenv();

        let mode = env::var("AEGIS_MODE")
            .unwrap_or_else(|_| "TESTNET".to_string())
            .parse::<TradingMode>()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let db_path = env::var("AEGIS_DB_PATH").unwrap_or_else(|_| match mode {
            TradingMode::Production => "data/aegis_prod.db".to_string(),
            TradingMode::Testnet => "data/aegis_test.db".to_string(),
        });

        let tick_ms = env_parse("AEGIS_TICK_INTERVAL_MS", 100u64)?;

        Ok(Self {
            mode,
            db_path,
            symbol: env::var("AEGIS_SYMBOL").unwrap_or_else(|_| "XRPUSDT".to_string()),
            account_id: env::var("AEGIS_ACCOUNT_ID").unwrap_or_else(|_| "main".to_string()),
            api_key: env::var("AEGIS_API_KEY").unwrap_or_default(),
            api_secret: env::var("AEGIS_API_SECRET").unwrap_or_default(),
            tick_interval: Duration::from_millis(tick_ms),
            command_batch: env_parse("AEGIS_COMMAND_BATCH", 10usize)?,
            timeframe: env::var("AEGIS_TIMEFRAME").unwrap_or_else(|_| "5m".to_string()),
            bar_limit: env_parse("AEGIS_BAR_LIMIT", 100u32)?,
            listener_enabled: env::var("AEGIS_LISTENER")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
        })
    }

    /// Test configuration: in-memory-friendly, listener off.
    pub fn test() -> Self {
        Self {
            mode: TradingMode::Testnet,
            db_path: String::new(),
            symbol: "XRPUSDT".to_string(),
            account_id: "main".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            tick_interval: Duration::from_millis(10),
            command_batch: 10,
            timeframe: "5m".to_string(),
            bar_limit: 100,
            listener_enabled: false,
        }
    }

    /// The engine-wide scope (no symbol).
    pub fn engine_scope(&self) -> Scope {
        Scope::new("BINANCE", Venue::Futures, self.account_id.clone(), None, self.mode)
    }

    /// The trading scope, tagged with the target symbol.
    pub fn trading_scope(&self) -> Scope {
        Scope::new(
            "BINANCE",
            Venue::Futures,
            self.account_id.clone(),
            Some(self.symbol.clone()),
            self.mode,
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_listenerless() {
        let config = Config::test();
        assert_eq!(config.mode, TradingMode::Testnet);
        assert!(!config.listener_enabled);
        assert_eq!(config.command_batch, 10);
    }

    #[test]
    fn scopes_carry_the_mode_and_symbol() {
        let config = Config::test();

        let engine = config.engine_scope();
        assert!(engine.symbol.is_none());
        assert_eq!(engine.mode, TradingMode::Testnet);

        let trading = config.trading_scope();
        assert_eq!(trading.symbol.as_deref(), Some("XRPUSDT"));
    }
}
