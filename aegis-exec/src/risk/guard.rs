//! Risk guard: builds the evaluation context and runs the rule pipeline.
//!
//! The first failing rule short-circuits; the rejection is recorded as a
//! `RiskGuardRejected` event before being returned. A rule that errors
//! rejects the command (fail-closed) without an event, matching the
//! recoverable-bug treatment of rule evaluation faults.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, warn};

use aegis_domain::{dedup, event_type, Command, EngineMode, EntityKind, Event, EventSource};
use aegis_projector::Projector;
use aegis_store::{ConfigStore, EventStore};

use super::pnl::PnlCalculator;
use super::rules::{
    DailyLossLimitRule, EngineModeRule, MaxOpenOrdersRule, MaxPositionSizeRule, MinBalanceRule,
    RiskCheckResult, RiskContext, RiskRule,
};
use crate::Result;

/// Guard verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allowed,
    Rejected { rule: String, reason: String },
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            RiskDecision::Allowed => None,
            RiskDecision::Rejected { reason, .. } => Some(reason),
        }
    }
}

/// Rule pipeline over the current projection, engine mode, and daily PnL.
pub struct RiskGuard {
    events: EventStore,
    config: ConfigStore,
    projector: Option<Arc<Projector>>,
    pnl: PnlCalculator,
    rules: Vec<Box<dyn RiskRule>>,

    check_count: AtomicU64,
    passed_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl RiskGuard {
    /// Guard with the default rule set.
    pub fn new(events: EventStore, config: ConfigStore, projector: Option<Arc<Projector>>) -> Self {
        let pnl = PnlCalculator::new(events.clone());
        let mut guard = Self {
            events,
            config,
            projector,
            pnl,
            rules: Vec::new(),
            check_count: AtomicU64::new(0),
            passed_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        };

        guard.add_rule(Box::new(EngineModeRule));
        guard.add_rule(Box::new(MaxPositionSizeRule));
        guard.add_rule(Box::new(DailyLossLimitRule));
        guard.add_rule(Box::new(MaxOpenOrdersRule));
        guard.add_rule(Box::new(MinBalanceRule));
        guard
    }

    pub fn add_rule(&mut self, rule: Box<dyn RiskRule>) {
        debug!(rule = rule.name(), "Risk rule added");
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every applicable rule against a fresh context.
    pub async fn check(&self, command: &Command) -> Result<RiskDecision> {
        self.check_count.fetch_add(1, Ordering::Relaxed);

        let ctx = self.build_context(command).await;

        for rule in &self.rules {
            if !rule.applies_to(&command.command_type) {
                continue;
            }

            let result = match rule.check(command, &ctx) {
                Ok(result) => result,
                Err(e) => {
                    // Fail closed: an unevaluable rule rejects the command
                    error!(rule = rule.name(), error = %e, "Risk rule error");
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(RiskDecision::Rejected {
                        rule: rule.name().to_string(),
                        reason: format!("Risk check error: {}", rule.name()),
                    });
                }
            };

            if !result.passed {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                self.record_rejection(command, &result).await?;

                let reason = result.reason.clone().unwrap_or_default();
                warn!(
                    rule = result.rule_name,
                    command_id = %command.command_id,
                    command_type = %command.command_type,
                    %reason,
                    "Command rejected"
                );

                return Ok(RiskDecision::Rejected {
                    rule: result.rule_name.to_string(),
                    reason,
                });
            }
        }

        self.passed_count.fetch_add(1, Ordering::Relaxed);
        Ok(RiskDecision::Allowed)
    }

    async fn build_context(&self, command: &Command) -> RiskContext {
        let engine_mode = self.config.engine_mode().await.unwrap_or(EngineMode::Running);
        let settings = self.config.risk_settings().await.unwrap_or_default();

        let (position, balance, open_orders_count) = match (&self.projector, &command.scope.symbol) {
            (Some(projector), Some(symbol)) => (
                projector.position(symbol).await,
                projector.balance(command.scope.venue, "USDT").await,
                projector.open_order_count(Some(symbol)).await,
            ),
            (Some(projector), None) => (
                None,
                projector.balance(command.scope.venue, "USDT").await,
                projector.open_order_count(None).await,
            ),
            (None, _) => (None, None, 0),
        };

        let daily_pnl = match self.pnl.daily_pnl(&command.scope).await {
            Ok(pnl) => pnl,
            Err(e) => {
                warn!(error = %e, "Daily PnL unavailable, assuming zero");
                Decimal::ZERO
            }
        };

        RiskContext {
            engine_mode,
            settings,
            position,
            balance,
            open_orders_count,
            daily_pnl,
        }
    }

    async fn record_rejection(&self, command: &Command, result: &RiskCheckResult) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();

        let event = Event::new(
            event_type::RISK_GUARD_REJECTED,
            EventSource::Bot,
            EntityKind::Command,
            command.command_id.clone(),
            command.scope.clone(),
            dedup::risk_rejected_key(&command.command_id, now_ms),
            json!({
                "command_type": command.command_type,
                "rule_name": result.rule_name,
                "reason": result.reason,
                "details": result.details,
                "rejected_at": Utc::now().to_rfc3339(),
            }),
        )
        .caused_by(command.command_id.clone(), command.correlation_id.clone());

        self.events.append(&event).await?;
        Ok(())
    }

    /// (checked, passed, rejected) counters.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.check_count.load(Ordering::Relaxed),
            self.passed_count.load(Ordering::Relaxed),
            self.rejected_count.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_domain::{command_type, Actor, CommandOptions, Scope, TradingMode, Venue};
    use aegis_store::sqlite;

    fn scope() -> Scope {
        Scope::new("BINANCE", Venue::Futures, "main", Some("XRPUSDT".into()), TradingMode::Testnet)
    }

    async fn guard() -> (ConfigStore, EventStore, RiskGuard) {
        let pool = sqlite::connect_memory().await.unwrap();
        sqlite::init_schema(&pool).await.unwrap();
        let events = EventStore::new(pool.clone());
        let config = ConfigStore::new(pool);
        let guard = RiskGuard::new(events.clone(), config.clone(), None);
        (config, events, guard)
    }

    fn place_order() -> Command {
        Command::create(
            command_type::PLACE_ORDER,
            Actor::strategy("test"),
            scope(),
            json!({"side": "BUY", "order_type": "MARKET", "quantity": "10"}),
            CommandOptions::default(),
        )
    }

    #[tokio::test]
    async fn running_engine_allows_order() {
        let (_config, _events, guard) = guard().await;
        let decision = guard.check(&place_order()).await.unwrap();
        assert!(decision.is_allowed());
        assert_eq!(guard.stats(), (1, 1, 0));
    }

    #[tokio::test]
    async fn paused_engine_rejects_and_records_event() {
        let (config, events, guard) = guard().await;
        config.set_engine_mode(EngineMode::Paused, "bot:test").await.unwrap();

        let decision = guard.check(&place_order()).await.unwrap();
        match &decision {
            RiskDecision::Rejected { rule, reason } => {
                assert_eq!(rule, "EngineMode");
                assert!(reason.contains("paused"));
            }
            RiskDecision::Allowed => panic!("expected rejection"),
        }

        let rejections = events.get_by_type(event_type::RISK_GUARD_REJECTED, 10).await.unwrap();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].payload["rule_name"], "EngineMode");
        assert_eq!(guard.stats().2, 1);
    }

    struct PanickyRule;

    impl RiskRule for PanickyRule {
        fn name(&self) -> &'static str {
            "Panicky"
        }

        fn check(&self, _command: &Command, _ctx: &RiskContext) -> crate::Result<RiskCheckResult> {
            Err(crate::ExecError::RuleError {
                rule: "Panicky",
                reason: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn erroring_rule_fails_closed() {
        let (_config, _events, mut guard) = {
            let pool = sqlite::connect_memory().await.unwrap();
            sqlite::init_schema(&pool).await.unwrap();
            let events = EventStore::new(pool.clone());
            let config = ConfigStore::new(pool);
            let guard = RiskGuard::new(events.clone(), config.clone(), None);
            (config, events, guard)
        };
        guard.add_rule(Box::new(PanickyRule));

        let decision = guard.check(&place_order()).await.unwrap();
        match decision {
            RiskDecision::Rejected { rule, reason } => {
                assert_eq!(rule, "Panicky");
                assert!(reason.contains("Risk check error"));
            }
            RiskDecision::Allowed => panic!("expected fail-closed rejection"),
        }
    }
}
