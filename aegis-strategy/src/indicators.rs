//! Small decimal indicator kit for the built-in strategies.

use rust_decimal::Decimal;

use crate::types::Bar;

/// Simple moving average over the trailing `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Exponential moving average, seeded with an SMA of the first `period`.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = Decimal::TWO / Decimal::from(period as u64 + 1);
    let mut ema = sma(&values[..period], period)?;
    for value in &values[period..] {
        ema = (*value - ema) * k + ema;
    }
    Some(ema)
}

/// Average true range over the trailing `period` bars (SMA smoothing).
pub fn atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let (prev, bar) = (&pair[0], &pair[1]);
        let tr = (bar.high - bar.low)
            .max((bar.high - prev.close).abs())
            .max((bar.low - prev.close).abs());
        true_ranges.push(tr);
    }

    sma(&true_ranges, period)
}

/// Relative strength index over the trailing `period` closes.
pub fn rsi(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let window = &values[values.len() - period - 1..];
    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for pair in window.windows(2) {
        let change = pair[1] - pair[0];
        if change > Decimal::ZERO {
            gains += change;
        } else {
            losses -= change;
        }
    }

    if losses.is_zero() {
        return Some(Decimal::ONE_HUNDRED);
    }

    let rs = gains / losses;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

// =============================================================================
// Tests
// =============================================================================
