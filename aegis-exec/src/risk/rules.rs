//! Risk rules.
//!
//! Each rule declares which command types it applies to and checks one
//! constraint against the evaluation context. Limits configured as zero are
//! disabled. Reduce-only orders are exempt from the sizing rules because
//! they can only shrink exposure.

use rust_decimal::Decimal;
use serde_json::json;

use aegis_domain::{command_type, is_engine_command, is_trading_command, Command, EngineMode, RiskSettings};
use aegis_projector::{BalanceView, PositionView};

use crate::Result;

/// Snapshot the guard evaluates rules against.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub engine_mode: EngineMode,
    pub settings: RiskSettings,
    pub position: Option<PositionView>,
    pub balance: Option<BalanceView>,
    pub open_orders_count: usize,
    pub daily_pnl: Decimal,
}

/// One rule's verdict.
#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub rule_name: &'static str,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl RiskCheckResult {
    pub fn pass(rule_name: &'static str) -> Self {
        Self {
            passed: true,
            rule_name,
            reason: None,
            details: None,
        }
    }

    pub fn fail(rule_name: &'static str, reason: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            passed: false,
            rule_name,
            reason: Some(reason.into()),
            details,
        }
    }
}

/// A typed risk rule. An `Err` from `check` is treated as a rejection.
pub trait RiskRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, _command_type: &str) -> bool {
        true
    }

    fn check(&self, command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult>;
}

fn payload_decimal(command: &Command, key: &str) -> Decimal {
    command
        .payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(Decimal::ZERO)
}

fn is_reduce_only(command: &Command) -> bool {
    command
        .payload
        .get("reduce_only")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Engine mode gate.
///
/// PAUSED blocks trading-class commands; SAFE blocks new non-reduce-only
/// orders; engine-control commands always pass.
pub struct EngineModeRule;

impl RiskRule for EngineModeRule {
    fn name(&self) -> &'static str {
        "EngineMode"
    }

    fn check(&self, command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult> {
        if is_engine_command(&command.command_type) {
            return Ok(RiskCheckResult::pass(self.name()));
        }

        match ctx.engine_mode {
            EngineMode::Paused if is_trading_command(&command.command_type) => {
                Ok(RiskCheckResult::fail(
                    self.name(),
                    "Engine is paused, trading commands blocked",
                    None,
                ))
            }
            EngineMode::Safe if command.command_type == command_type::PLACE_ORDER => {
                if is_reduce_only(command) {
                    Ok(RiskCheckResult::pass(self.name()))
                } else {
                    Ok(RiskCheckResult::fail(
                        self.name(),
                        "New orders blocked in SAFE mode",
                        None,
                    ))
                }
            }
            _ => Ok(RiskCheckResult::pass(self.name())),
        }
    }
}

/// Rejects orders that would push the position past the configured size.
pub struct MaxPositionSizeRule;

impl RiskRule for MaxPositionSizeRule {
    fn name(&self) -> &'static str {
        "MaxPositionSize"
    }

    fn applies_to(&self, command_type_name: &str) -> bool {
        command_type_name == command_type::PLACE_ORDER
    }

    fn check(&self, command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult> {
        let max_size = ctx.settings.max_position_size;
        if max_size <= Decimal::ZERO {
            return Ok(RiskCheckResult::pass(self.name()));
        }
        if is_reduce_only(command) {
            return Ok(RiskCheckResult::pass(self.name()));
        }

        let current_qty = ctx.position.as_ref().map(|p| p.qty).unwrap_or(Decimal::ZERO);
        let current_side = ctx.position.as_ref().and_then(|p| p.side.clone());
        let order_qty = payload_decimal(command, "quantity");
        let order_side = command.payload.get("side").and_then(|v| v.as_str()).unwrap_or("");

        // Same-direction orders grow the book, opposite-direction shrink it
        let new_qty = match current_side.as_deref() {
            None => order_qty,
            Some("LONG") if order_side == "BUY" => current_qty + order_qty,
            Some("SHORT") if order_side == "SELL" => current_qty + order_qty,
            Some(_) => (current_qty - order_qty).abs(),
        };

        if new_qty > max_size {
            return Ok(RiskCheckResult::fail(
                self.name(),
                format!("Position size {new_qty} exceeds max {max_size}"),
                Some(json!({
                    "current_qty": current_qty.to_string(),
                    "order_qty": order_qty.to_string(),
                    "new_qty": new_qty.to_string(),
                    "max_size": max_size.to_string(),
                })),
            ));
        }

        Ok(RiskCheckResult::pass(self.name()))
    }
}

/// Rejects new orders once today's realised loss reaches the limit.
pub struct DailyLossLimitRule;

impl RiskRule for DailyLossLimitRule {
    fn name(&self) -> &'static str {
        "DailyLossLimit"
    }

    fn applies_to(&self, command_type_name: &str) -> bool {
        command_type_name == command_type::PLACE_ORDER
    }

    fn check(&self, command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult> {
        let limit = ctx.settings.daily_loss_limit;
        if limit <= Decimal::ZERO {
            return Ok(RiskCheckResult::pass(self.name()));
        }

        let pnl = ctx.daily_pnl;
        if pnl < Decimal::ZERO && pnl.abs() >= limit {
            if is_reduce_only(command) {
                return Ok(RiskCheckResult::pass(self.name()));
            }
            return Ok(RiskCheckResult::fail(
                self.name(),
                format!("Daily loss {} reached limit {limit}", pnl.abs()),
                Some(json!({
                    "daily_pnl": pnl.to_string(),
                    "daily_loss_limit": limit.to_string(),
                })),
            ));
        }

        Ok(RiskCheckResult::pass(self.name()))
    }
}

/// Caps the number of simultaneously open orders.
pub struct MaxOpenOrdersRule;

impl RiskRule for MaxOpenOrdersRule {
    fn name(&self) -> &'static str {
        "MaxOpenOrders"
    }

    fn applies_to(&self, command_type_name: &str) -> bool {
        command_type_name == command_type::PLACE_ORDER
    }

    fn check(&self, _command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult> {
        let max_orders = ctx.settings.max_open_orders;
        if max_orders <= 0 {
            return Ok(RiskCheckResult::pass(self.name()));
        }

        let current = ctx.open_orders_count as i64;
        if current >= max_orders {
            return Ok(RiskCheckResult::fail(
                self.name(),
                format!("Open orders {current} reached limit {max_orders}"),
                Some(json!({
                    "current_count": current,
                    "max_orders": max_orders,
                })),
            ));
        }

        Ok(RiskCheckResult::pass(self.name()))
    }
}

/// Rejects new orders when free balance is below the configured floor.
pub struct MinBalanceRule;

impl RiskRule for MinBalanceRule {
    fn name(&self) -> &'static str {
        "MinBalance"
    }

    fn applies_to(&self, command_type_name: &str) -> bool {
        command_type_name == command_type::PLACE_ORDER
    }

    fn check(&self, command: &Command, ctx: &RiskContext) -> Result<RiskCheckResult> {
        let min_balance = ctx.settings.min_balance;
        if min_balance <= Decimal::ZERO {
            return Ok(RiskCheckResult::pass(self.name()));
        }

        let free = ctx.balance.as_ref().map(|b| b.free).unwrap_or(Decimal::ZERO);
        if free < min_balance {
            if is_reduce_only(command) {
                return Ok(RiskCheckResult::pass(self.name()));
            }
            return Ok(RiskCheckResult::fail(
                self.name(),
                format!("Balance {free} below minimum {min_balance}"),
                Some(json!({
                    "free_balance": free.to_string(),
                    "min_balance": min_balance.to_string(),
                })),
            ));
        }

        Ok(RiskCheckResult::pass(self.name()))
    }
}

// =============================================================================
// Tests
// =============================================================================
