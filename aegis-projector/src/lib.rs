//! Aegis Projection Layer
//!
//! Folds the event log into the current-state snapshot consumed read-only by
//! the risk guard, strategy context, and opening reconciler:
//! - balances per `(venue, asset)` (the ledger view)
//! - the position per symbol
//! - open orders
//!
//! The fold is checkpointed by `seq` and the balance rows are mirrored into
//! `projection_balance` for observer processes.

#![warn(clippy::all)]

mod apply;
mod projector;
mod types;

pub use projector::{Projector, PROJECTION_CHECKPOINT};
pub use types::{BalanceView, OpenOrderView, PositionView};
