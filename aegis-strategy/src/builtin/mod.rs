//! Built-in strategies, registered by default.

mod atr_risk;
mod sma_cross;

pub use atr_risk::AtrRisk;
pub use sma_cross::SmaCross;
