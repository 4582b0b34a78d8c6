//! Read-only projection views.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use aegis_domain::Venue;

/// Current balance of one asset on one venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub venue: Venue,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl BalanceView {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Current position on one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    /// `LONG` / `SHORT`; `None` when flat
    pub side: Option<String>,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub margin_type: String,
}

impl PositionView {
    pub fn is_flat(&self) -> bool {
        self.qty.is_zero() || self.side.is_none()
    }

    pub fn is_long(&self) -> bool {
        self.side.as_deref() == Some("LONG") && self.qty > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.side.as_deref() == Some("SHORT") && self.qty > Decimal::ZERO
    }
}

/// An order resting on the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderView {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub original_qty: Decimal,
    pub executed_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: String,
}
