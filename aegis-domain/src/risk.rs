//! Risk and sizing settings, persisted under the `risk` config key.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk-guard limits plus the sizing knobs strategies read.
///
/// Limits set to zero are treated as "not configured" by the guard rules.
/// Decimals serialize as canonical strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default)]
    pub max_position_size: Decimal,
    #[serde(default)]
    pub daily_loss_limit: Decimal,
    #[serde(default)]
    pub max_open_orders: i64,
    #[serde(default)]
    pub min_balance: Decimal,

    // Sizing knobs shared by strategies, independent of stop style
    #[serde(default = "defaults::risk_per_trade")]
    pub risk_per_trade: Decimal,
    #[serde(default = "defaults::reward_ratio")]
    pub reward_ratio: Decimal,
    #[serde(default = "defaults::partial_tp_ratio")]
    pub partial_tp_ratio: Decimal,
    #[serde(default = "defaults::equity_reset_trades")]
    pub equity_reset_trades: u64,
}

mod defaults {
    use rust_decimal::Decimal;

    pub fn risk_per_trade() -> Decimal {
        Decimal::new(2, 2) // 0.02
    }

    pub fn reward_ratio() -> Decimal {
        Decimal::new(15, 1) // 1.5
    }

    pub fn partial_tp_ratio() -> Decimal {
        Decimal::new(5, 1) // 0.5
    }

    pub fn equity_reset_trades() -> u64 {
        50
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::ZERO,
            daily_loss_limit: Decimal::ZERO,
            max_open_orders: 0,
            min_balance: Decimal::ZERO,
            risk_per_trade: defaults::risk_per_trade(),
            reward_ratio: defaults::reward_ratio(),
            partial_tp_ratio: defaults::partial_tp_ratio(),
            equity_reset_trades: defaults::equity_reset_trades(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_config_seed() {
        let settings = RiskSettings::default();
        assert_eq!(settings.risk_per_trade, dec!(0.02));
        assert_eq!(settings.reward_ratio, dec!(1.5));
        assert_eq!(settings.partial_tp_ratio, dec!(0.5));
        assert_eq!(settings.equity_reset_trades, 50);
        assert_eq!(settings.max_position_size, Decimal::ZERO);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: RiskSettings =
            serde_json::from_str(r#"{"max_position_size": "500", "max_open_orders": 5}"#).unwrap();

        assert_eq!(settings.max_position_size, dec!(500));
        assert_eq!(settings.max_open_orders, 5);
        assert_eq!(settings.reward_ratio, dec!(1.5));
    }
}
