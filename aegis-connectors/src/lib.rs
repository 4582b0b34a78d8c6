//! Aegis Exchange Connectors
//!
//! Everything that talks to the exchange:
//! - `ExchangeRest` port and its two adapters (`BinanceRest`, `StubExchange`)
//! - user-data-stream WebSocket connector and frame models
//! - `MarketDataProvider`, a TTL-cached kline front for strategies
//!
//! The rest of the engine depends only on the port; the concrete Binance
//! client is wired in at the daemon boundary.

#![warn(clippy::all)]

pub mod binance_rest;
pub mod binance_ws;
mod error;
pub mod market_data;
pub mod models;
mod ports;
mod stub;

pub use binance_rest::BinanceRest;
pub use binance_ws::UserDataStream;
pub use error::ConnectorError;
pub use market_data::{MarketDataProvider, OhlcvFrame, DEFAULT_CACHE_TTL_SECS, DEFAULT_TIMEFRAME};
pub use ports::ExchangeRest;
pub use stub::StubExchange;

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Binance USDⓈ-M futures endpoints.
pub mod endpoints {
    pub const PROD_FUTURES_REST: &str = "https://fapi.binance.com";
    pub const PROD_FUTURES_WS: &str = "wss://fstream.binance.com";
    pub const PROD_SPOT_REST: &str = "https://api.binance.com";

    pub const TEST_FUTURES_REST: &str = "https://demo-fapi.binance.com";
    pub const TEST_FUTURES_WS: &str = "wss://fstream.binancefuture.com";
    pub const TEST_SPOT_REST: &str = "https://testnet.binance.vision";
}

/// Request-weight thresholds the core throttles against.
pub mod rate_limit {
    pub const WEIGHT_WARN: u32 = 1500;
    pub const WEIGHT_SLOW: u32 = 2000;
    pub const WEIGHT_STOP: u32 = 2300;
}
