// =============================================================================
// Keltner Channel
// =============================================================================
//
//   middle = EMA(N) of closes
//   upper / lower = middle ± k * ATR(N)
//
// The squeeze flag (Bollinger band fully inside the Keltner channel) is
// derived in the snapshot engine where both results are available.

use crate::indicators::atr::atr;
use crate::indicators::bollinger::BollingerBands;
use crate::indicators::ema::last_ema;
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy)]
pub struct KeltnerChannel {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Compute the Keltner channel over `candles` (oldest first).
pub fn keltner(candles: &[Candle], period: usize, k: f64) -> Option<KeltnerChannel> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = last_ema(&closes, period)?;
    let band = k * atr(candles, period)?;

    let upper = middle + band;
    let lower = middle - band;

    (upper.is_finite() && lower.is_finite()).then_some(KeltnerChannel {
        upper,
        middle,
        lower,
    })
}

/// Squeeze: the Bollinger band sits entirely within the Keltner channel.
/// Commonly precedes a volatility expansion.
pub fn is_squeeze(bb: &BollingerBands, kc: &KeltnerChannel) -> bool {
    bb.upper <= kc.upper && bb.lower >= kc.lower
}
