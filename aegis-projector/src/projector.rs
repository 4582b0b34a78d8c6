//! Checkpointed projection over the event log.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;
use tokio::sync::RwLock;
use tracing::{debug, info};

use aegis_domain::{Scope, Venue};
use aegis_store::{CheckpointStore, EventStore, Result};

use crate::apply::{apply_event, ProjectionState};
use crate::types::{BalanceView, OpenOrderView, PositionView};

/// Checkpoint row naming this consumer.
pub const PROJECTION_CHECKPOINT: &str = "projection";

const BATCH_SIZE: i64 = 500;

/// In-memory projection, rebuilt from the log at startup and advanced
/// incrementally afterwards. Concurrent readers share the state behind an
/// async RwLock; `apply_pending` is the only writer.
pub struct Projector {
    events: EventStore,
    checkpoints: CheckpointStore,
    pool: SqlitePool,
    scope: Scope,
    state: RwLock<ProjectionState>,
}

impl Projector {
    pub fn new(events: EventStore, checkpoints: CheckpointStore, pool: SqlitePool, scope: Scope) -> Self {
        Self {
            events,
            checkpoints,
            pool,
            scope,
            state: RwLock::new(ProjectionState::default()),
        }
    }

    /// Fold events appended since the last call. Returns how many were folded.
    pub async fn apply_pending(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut folded = 0u64;

        loop {
            let batch = self.events.get_since(state.last_seq, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }

            for event in &batch {
                apply_event(&mut state, event);
                if let Some(seq) = event.seq {
                    state.last_seq = seq;
                }
                folded += 1;
            }
        }

        if folded > 0 {
            let last_seq = state.last_seq;
            self.persist_balances(&state).await?;
            self.checkpoints
                .set(PROJECTION_CHECKPOINT, last_seq, Some(chrono::Utc::now()))
                .await?;
            debug!(folded, last_seq, "Projection advanced");
        }

        Ok(folded)
    }

    /// Drop state and refold the whole log.
    pub async fn rebuild(&self) -> Result<u64> {
        {
            let mut state = self.state.write().await;
            *state = ProjectionState::default();
        }
        info!("Projection rebuild started");
        let folded = self.apply_pending().await?;
        info!(folded, "Projection rebuild complete");
        Ok(folded)
    }

    /// Mirror current balances into `projection_balance` for observers.
    async fn persist_balances(&self, state: &ProjectionState) -> Result<()> {
        for balance in state.balances.values() {
            sqlx::query(
                r#"
                INSERT INTO projection_balance (
                    scope_exchange, scope_venue, scope_account_id, scope_mode,
                    asset, free, locked, last_event_seq, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
                ON CONFLICT(scope_exchange, scope_venue, scope_account_id, asset, scope_mode)
                DO UPDATE SET
                    free = excluded.free,
                    locked = excluded.locked,
                    last_event_seq = excluded.last_event_seq,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.scope.exchange)
            .bind(balance.venue.as_str())
            .bind(&self.scope.account_id)
            .bind(self.scope.mode.as_str())
            .bind(&balance.asset)
            .bind(balance.free.to_string())
            .bind(balance.locked.to_string())
            .bind(state.last_seq)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Position on a symbol; `None` when flat.
    pub async fn position(&self, symbol: &str) -> Option<PositionView> {
        let state = self.state.read().await;
        state
            .positions
            .get(symbol)
            .filter(|p| !p.is_flat())
            .cloned()
    }

    /// Whether any symbol currently has an open position.
    pub async fn any_position_open(&self) -> bool {
        let state = self.state.read().await;
        state.positions.values().any(|p| !p.is_flat())
    }

    pub async fn balance(&self, venue: Venue, asset: &str) -> Option<BalanceView> {
        let state = self.state.read().await;
        state.balances.get(&(venue, asset.to_string())).cloned()
    }

    pub async fn balances(&self) -> Vec<BalanceView> {
        let state = self.state.read().await;
        state.balances.values().cloned().collect()
    }

    /// Open orders, optionally filtered by symbol.
    pub async fn open_orders(&self, symbol: Option<&str>) -> Vec<OpenOrderView> {
        let state = self.state.read().await;
        state
            .open_orders
            .values()
            .filter(|o| symbol.is_none_or(|s| o.symbol == s))
            .cloned()
            .collect()
    }

    pub async fn open_order_count(&self, symbol: Option<&str>) -> usize {
        self.open_orders(symbol).await.len()
    }

    /// Ledger totals per venue/asset, the reconciler's input.
    pub async fn ledger_balances(&self) -> HashMap<Venue, HashMap<String, Decimal>> {
        let state = self.state.read().await;
        let mut ledger: HashMap<Venue, HashMap<String, Decimal>> = HashMap::new();
        for ((venue, asset), balance) in &state.balances {
            ledger
                .entry(*venue)
                .or_default()
                .insert(asset.clone(), balance.total());
        }
        ledger
    }

    pub async fn last_seq(&self) -> i64 {
        self.state.read().await.last_seq
    }
}

// =============================================================================
// Tests
// =============================================================================
