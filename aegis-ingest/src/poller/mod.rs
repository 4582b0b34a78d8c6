//! Poller framework.
//!
//! A poller scrapes one REST surface on a fixed interval. The harness owns
//! the shared machinery: restoring `last_poll_time` from the config store,
//! the `should_poll` gate, mutual exclusion against overlapping runs, and
//! persisting the poll time after each run. The first run looks back one
//! hour; subsequent runs overlap the previous window by one minute to
//! tolerate clock skew.

mod convert;
mod deposit_withdraw;
mod income;
mod price_cache;
mod reconciliation;
mod transfer;

pub use convert::ConvertPoller;
pub use deposit_withdraw::DepositWithdrawPoller;
pub use income::IncomePoller;
pub use price_cache::PriceCachePoller;
pub use reconciliation::ReconciliationPoller;
pub use transfer::TransferPoller;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info};

use aegis_store::ConfigStore;

use crate::Result;

/// First-run lookback, seconds.
const FIRST_RUN_LOOKBACK_SECS: i64 = 60 * 60;

/// Window overlap against clock skew, seconds.
const OVERLAP_SECS: i64 = 60;

/// One periodic REST scrape.
#[async_trait]
pub trait Poller: Send + Sync {
    /// Name used in logs and the `poller_<name>_last_poll` config key.
    fn name(&self) -> &'static str;

    /// Poll cadence.
    fn interval(&self) -> Duration;

    /// Fetch records since `since` and append their events. Returns how many
    /// events were newly created.
    async fn poll_once(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Result of one harness run.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub events_created: u64,
    pub skipped: bool,
    pub duration_ms: i64,
}

/// Shared polling machinery around one poller.
pub struct PollerHarness {
    poller: Box<dyn Poller>,
    config: ConfigStore,
    last_poll: Option<DateTime<Utc>>,
    running: bool,
}

impl PollerHarness {
    pub fn new(poller: Box<dyn Poller>, config: ConfigStore) -> Self {
        Self {
            poller,
            config,
            last_poll: None,
            running: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.poller.name()
    }

    fn config_key(&self) -> String {
        format!("poller_{}_last_poll", self.poller.name())
    }

    /// Restore `last_poll_time` from the config store.
    pub async fn initialize(&mut self) -> Result<()> {
        let saved = self.config.get(&self.config_key()).await?;
        if let Some(raw) = saved.get("last_poll_time").and_then(|v| v.as_str()) {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => {
                    self.last_poll = Some(ts.with_timezone(&Utc));
                    info!(poller = self.name(), last_poll = raw, "Poller resumed");
                }
                Err(e) => {
                    debug!(poller = self.name(), error = %e, "Unreadable last poll time");
                }
            }
        } else {
            info!(poller = self.name(), "Poller first run");
        }
        Ok(())
    }

    /// Whether the interval has elapsed (and no run is in flight).
    pub fn should_poll(&self) -> bool {
        if self.running {
            return false;
        }
        match self.last_poll {
            None => true,
            Some(last) => {
                let elapsed = Utc::now() - last;
                elapsed.num_seconds() >= self.poller.interval().as_secs() as i64
            }
        }
    }

    /// Run one poll. Errors are contained: they log, count zero, and the
    /// state machine continues.
    pub async fn poll(&mut self) -> PollOutcome {
        if self.running {
            return PollOutcome {
                events_created: 0,
                skipped: true,
                duration_ms: 0,
            };
        }

        self.running = true;
        let started = Utc::now();
        let since = self.window_start(started);

        let events_created = match self.poller.poll_once(since).await {
            Ok(count) => count,
            Err(e) => {
                error!(poller = self.name(), error = %e, "Poll failed");
                0
            }
        };

        self.last_poll = Some(started);
        if let Err(e) = self.save_last_poll().await {
            error!(poller = self.name(), error = %e, "Poll-time persist failed");
        }
        self.running = false;

        let duration_ms = (Utc::now() - started).num_milliseconds();
        if events_created > 0 {
            info!(poller = self.name(), events_created, duration_ms, "Poll complete");
        } else {
            debug!(poller = self.name(), duration_ms, "Poll complete, nothing new");
        }

        PollOutcome {
            events_created,
            skipped: false,
            duration_ms,
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_poll {
            Some(last) => last - chrono::Duration::seconds(OVERLAP_SECS),
            None => now - chrono::Duration::seconds(FIRST_RUN_LOOKBACK_SECS),
        }
    }

    async fn save_last_poll(&self) -> Result<()> {
        if let Some(last) = self.last_poll {
            self.config
                .set(
                    &self.config_key(),
                    &json!({"last_poll_time": last.to_rfc3339()}),
                    "bot:poller",
                )
                .await?;
        }
        Ok(())
    }

    /// Flush state on shutdown.
    pub async fn stop(&self) -> Result<()> {
        info!(poller = self.name(), "Poller stopping");
        self.save_last_poll().await
    }
}

/// All pollers of the engine, ticked cooperatively from the main loop.
pub struct PollerSet {
    harnesses: Vec<PollerHarness>,
}

impl PollerSet {
    pub fn new(harnesses: Vec<PollerHarness>) -> Self {
        Self { harnesses }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        for harness in &mut self.harnesses {
            harness.initialize().await?;
        }
        Ok(())
    }

    /// Run every poller whose interval has elapsed.
    pub async fn tick(&mut self) -> u64 {
        let mut total = 0;
        for harness in &mut self.harnesses {
            if harness.should_poll() {
                total += harness.poll().await.events_created;
            }
        }
        total
    }

    pub async fn stop_all(&self) {
        for harness in &self.harnesses {
            if let Err(e) = harness.stop().await {
                error!(poller = harness.name(), error = %e, "Poller stop failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_store::sqlite;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingPoller {
        calls: Arc<AtomicU64>,
        interval: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Poller for CountingPoller {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn poll_once(&self, _since: DateTime<Utc>) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(crate::IngestError::Malformed("boom".into()));
            }
            Ok(3)
        }
    }

    async fn config() -> ConfigStore {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn first_run_polls_then_interval_gates() {
        let calls = Arc::new(AtomicU64::new(0));
        let poller = CountingPoller {
            calls: calls.clone(),
            interval: Duration::from_secs(3600),
            fail: false,
        };
        let mut harness = PollerHarness::new(Box::new(poller), config().await);
        harness.initialize().await.unwrap();

        assert!(harness.should_poll());
        let outcome = harness.poll().await;
        assert_eq!(outcome.events_created, 3);
        assert!(!outcome.skipped);

        // Interval has not elapsed
        assert!(!harness.should_poll());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn poll_time_round_trips_through_config() {
        let config = config().await;
        let poller = CountingPoller {
            calls: Arc::new(AtomicU64::new(0)),
            interval: Duration::from_secs(3600),
            fail: false,
        };
        let mut harness = PollerHarness::new(Box::new(poller), config.clone());
        harness.initialize().await.unwrap();
        harness.poll().await;

        // A fresh harness restores the saved time and does not re-poll
        let poller = CountingPoller {
            calls: Arc::new(AtomicU64::new(0)),
            interval: Duration::from_secs(3600),
            fail: false,
        };
        let mut restored = PollerHarness::new(Box::new(poller), config);
        restored.initialize().await.unwrap();
        assert!(!restored.should_poll());
    }

    #[tokio::test]
    async fn failures_count_zero_and_continue() {
        let calls = Arc::new(AtomicU64::new(0));
        let poller = CountingPoller {
            calls: calls.clone(),
            interval: Duration::from_secs(0),
            fail: true,
        };
        let mut harness = PollerHarness::new(Box::new(poller), config().await);
        harness.initialize().await.unwrap();

        let outcome = harness.poll().await;
        assert_eq!(outcome.events_created, 0);
        assert!(!outcome.skipped);

        // Still schedulable afterwards
        assert!(harness.should_poll());
    }
}
