//! Risk guard: rule pipeline over the current projection.

mod guard;
mod pnl;
mod rules;

pub use guard::{RiskDecision, RiskGuard};
pub use pnl::PnlCalculator;
pub use rules::{
    DailyLossLimitRule, EngineModeRule, MaxOpenOrdersRule, MaxPositionSizeRule, MinBalanceRule,
    RiskCheckResult, RiskContext, RiskRule,
};
