// =============================================================================
// Average True Range (ATR) — Wilder's smoothing
// =============================================================================
//
//   TR    = max(H - L, |H - prevClose|, |L - prevClose|)
//   ATR_0 = SMA of the first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The percentile helpers map an ATR value against its rolling history into
// the LOW / MEDIUM / HIGH / EXTREME volatility buckets (p25 / p75 / p90).

use crate::market_data::Candle;
use crate::types::VolatilityLevel;

/// Most recent ATR value over `candles` (oldest first).
///
/// Returns `None` when `period` is zero, fewer than `period + 1` candles are
/// available, or an intermediate value is non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let c = &pair[1];
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        tr_values.push(tr);
    }

    let period_f = period as f64;
    let mut value = tr_values[..period].iter().sum::<f64>() / period_f;
    if !value.is_finite() {
        return None;
    }

    for &tr in &tr_values[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            return None;
        }
    }

    Some(value)
}

/// ATR as a percentage of the latest close. `None` when the close is zero.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    let pct = value / last_close * 100.0;
    pct.is_finite().then_some(pct)
}

/// Percentile rank of `value` within `history`, in [0, 100].
///
/// An empty history ranks everything at 50 (no information).
pub fn percentile_rank(history: &[f64], value: f64) -> f64 {
    if history.is_empty() {
        return 50.0;
    }
    let below = history.iter().filter(|&&h| h <= value).count();
    below as f64 / history.len() as f64 * 100.0
}

/// Map an ATR percentile into a volatility bucket.
///
/// Boundaries: below p25 LOW, below p75 MEDIUM, below p90 HIGH, else EXTREME.
pub fn volatility_level(percentile: f64) -> VolatilityLevel {
    if percentile < 25.0 {
        VolatilityLevel::Low
    } else if percentile < 75.0 {
        VolatilityLevel::Medium
    } else if percentile < 90.0 {
        VolatilityLevel::High
    } else {
        VolatilityLevel::Extreme
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn atr_insufficient_data() {
        let candles = vec![candle(105.0, 95.0, 100.0); 10];
        assert!(atr(&candles, 14).is_none());
        assert!(atr(&candles, 0).is_none());
    }

    #[test]
    fn atr_constant_range_converges() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base + 5.0, base - 5.0, base)
            })
            .collect();
        let value = atr(&candles, 14).unwrap();
        assert!((value - 10.0).abs() < 1.0, "expected ATR near 10, got {value}");
    }

    #[test]
    fn atr_gap_uses_prev_close() {
        // Gap up: |H - prevClose| dominates H - L.
        let candles = vec![
            candle(105.0, 95.0, 95.0),
            candle(115.0, 108.0, 112.0),
            candle(118.0, 110.0, 115.0),
            candle(120.0, 113.0, 118.0),
        ];
        let value = atr(&candles, 3).unwrap();
        assert!(value > 7.0, "ATR should reflect the gap, got {value}");
    }

    #[test]
    fn atr_zero_for_constant_price() {
        let candles = vec![candle(100.0, 100.0, 100.0); 30];
        let value = atr(&candles, 14).unwrap();
        assert!(value.abs() < 1e-12);
    }

    #[test]
    fn atr_pct_scales_by_price() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 200.0 + i as f64;
                candle(base + 2.0, base - 2.0, base)
            })
            .collect();
        let pct = atr_pct(&candles, 14).unwrap();
        assert!(pct > 0.0 && pct < 100.0);
    }

    #[test]
    fn percentile_rank_basics() {
        let history = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile_rank(&history, 4.0) - 100.0).abs() < 1e-10);
        assert!((percentile_rank(&history, 2.0) - 50.0).abs() < 1e-10);
        assert!((percentile_rank(&history, 0.5) - 0.0).abs() < 1e-10);
        // Empty history is uninformative.
        assert!((percentile_rank(&[], 7.0) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn volatility_buckets() {
        assert_eq!(volatility_level(10.0), VolatilityLevel::Low);
        assert_eq!(volatility_level(25.0), VolatilityLevel::Medium);
        assert_eq!(volatility_level(74.9), VolatilityLevel::Medium);
        assert_eq!(volatility_level(80.0), VolatilityLevel::High);
        assert_eq!(volatility_level(95.0), VolatilityLevel::Extreme);
    }
}
