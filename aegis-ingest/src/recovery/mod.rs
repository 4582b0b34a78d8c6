//! First-run recovery: initial capital, historical backfill, and the
//! opening reconciler.
//!
//! Order matters: capital is recorded at the snapshot date's UTC midnight so
//! backfilled transactions sort after it; the reconciler then closes any
//! remaining drift between the ledger and the exchange.

mod backfill;
mod initial_capital;
mod reconciler;

pub use backfill::{BackfillReport, HistoricalBackfill};
pub use initial_capital::{InitialCapitalRecorder, InitialCapitalSummary};
pub use reconciler::{Adjustment, OpeningReconciler, ReconcileReport};
