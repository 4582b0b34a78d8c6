//! Aegis Ingestion Plane
//!
//! Everything that turns exchange state into events:
//! - the WebSocket listener (connection state machine, frame handler,
//!   strategy callback fan-out)
//! - the frame → event mapper with canonical dedup keys
//! - the poller framework and its six concrete pollers
//! - first-run recovery: initial capital, historical backfill, and the
//!   opening reconciler
//!
//! Replays are free: every produced event carries a deterministic dedup key,
//! so reconnects, poll overlaps, and backfill re-runs are no-ops.

#![warn(clippy::all)]

mod error;
mod listener;
pub mod mapper;
pub mod poller;
pub mod recovery;

pub use error::IngestError;
pub use listener::{StreamHandler, WsListener, WsState};
pub use mapper::EventMapper;
pub use poller::{PollOutcome, Poller, PollerHarness, PollerSet};
pub use recovery::{
    BackfillReport, HistoricalBackfill, InitialCapitalRecorder, InitialCapitalSummary,
    OpeningReconciler, ReconcileReport,
};

pub type Result<T> = std::result::Result<T, IngestError>;
