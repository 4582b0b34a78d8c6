//! Aegis daemon entry point.
//!
//! # Usage
//!
//! ```bash
//! # Testnet run with defaults
//! aegisd
//!
//! # Production against a specific database
//! AEGIS_MODE=PRODUCTION AEGIS_DB_PATH=data/aegis_prod.db aegisd
//! ```
//!
//! # Environment Variables
//!
//! - `AEGIS_MODE`: TESTNET or PRODUCTION (default TESTNET)
//! - `AEGIS_DB_PATH`: SQLite file (default data/aegis_<mode>.db)
//! - `AEGIS_SYMBOL`: target symbol (default XRPUSDT)
//! - `AEGIS_API_KEY` / `AEGIS_API_SECRET`: exchange credentials
//! - `AEGIS_TICK_INTERVAL_MS`: main loop cadence (default 100)
//! - `AEGIS_LISTENER`: set 0/false to skip the user-data stream

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aegis_connectors::BinanceRest;
use aegis_domain::TradingMode;
use aegisd::{BotEngine, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("aegisd=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = config.mode.as_str(),
        symbol = %config.symbol,
        db = %config.db_path,
        "Aegis daemon"
    );

    let pool = aegis_store::sqlite::connect(&config.db_path).await?;
    aegis_store::sqlite::init_schema(&pool).await?;

    let rest = match config.mode {
        TradingMode::Production => {
            BinanceRest::new(config.api_key.clone(), config.api_secret.clone())
        }
        TradingMode::Testnet => {
            BinanceRest::testnet(config.api_key.clone(), config.api_secret.clone())
        }
    };

    let mut engine = BotEngine::build(config, pool, Arc::new(rest));
    engine.bootstrap().await?;
    engine.run().await?;

    Ok(())
}
