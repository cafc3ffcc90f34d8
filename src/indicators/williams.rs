// =============================================================================
// Williams %R
// =============================================================================
//
//   %R = (highest_high(N) - close) / (highest_high(N) - lowest_low(N)) * -100
//
// Range [-100, 0]: above -20 overbought, below -80 oversold. A zero range
// (flat window) yields the midpoint -50.

use crate::market_data::Candle;

/// Compute Williams %R over the trailing `period` candles.
pub fn williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let close = window.last()?.close;
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    let range = high - low;
    let value = if range == 0.0 {
        -50.0
    } else {
        (high - close) / range * -100.0
    };

    value.is_finite().then_some(value)
}
