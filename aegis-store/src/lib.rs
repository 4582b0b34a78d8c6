//! Aegis Storage Layer
//!
//! The durable log: a single SQLite database in WAL mode shared by the bot
//! and observer processes. Provides:
//! - `EventStore` — append-only, dedup-gated event log
//! - `CommandStore` — insert / claim / status transitions with CAS
//! - `ConfigStore` — versioned key-value with optional optimistic lock
//! - `CheckpointStore` — per-consumer log cursors
//!
//! # Usage
//!
//! ```rust,no_run
//! use aegis_store::{sqlite, EventStore};
//!
//! # async fn example() -> Result<(), aegis_store::StoreError> {
//! let pool = sqlite::connect("data/aegis_test.db").await?;
//! sqlite::init_schema(&pool).await?;
//!
//! let events = EventStore::new(pool.clone());
//! let last = events.last_seq().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

mod command_store;
mod config_store;
mod checkpoint;
mod error;
mod event_store;
pub mod sqlite;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use command_store::{CommandStore, InsertOutcome};
pub use config_store::{config_key, ConfigStore, StrategyStateRecord, CONFIG_UPDATED_BY_BOT_PREFIX};
pub use error::StoreError;
pub use event_store::{AppendOutcome, EventStore};

pub type Result<T> = std::result::Result<T, StoreError>;
