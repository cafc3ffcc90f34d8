// =============================================================================
// Average Directional Index (ADX) with +DI / -DI
// =============================================================================
//
//   1. +DM / -DM and True Range per bar.
//   2. Wilder-smooth all three over `period`.
//   3. +DI = smoothed(+DM) / smoothed(TR) * 100, -DI likewise.
//   4. DX  = |+DI - -DI| / (+DI + -DI) * 100
//   5. ADX = Wilder-smoothed average of DX.
//
// The trend label is the slope of ADX over the last three engine snapshots:
// above +2 STRENGTHENING, below -2 WEAKENING, else STABLE.

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Direction-strength readout at the latest candle.
#[derive(Debug, Clone, Copy)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Slope of ADX across recent snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdxTrend {
    Strengthening,
    Weakening,
    Stable,
}

impl std::fmt::Display for AdxTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strengthening => write!(f, "STRENGTHENING"),
            Self::Weakening => write!(f, "WEAKENING"),
            Self::Stable => write!(f, "STABLE"),
        }
    }
}

/// Compute the most recent ADX / +DI / -DI from OHLCV candles.
///
/// Needs at least `2 * period + 1` candles: `period` bars seed the Wilder
/// smoothing of +DM/-DM/TR, then another `period` DX values seed the ADX.
pub fn adx(candles: &[Candle], period: usize) -> Option<AdxResult> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let period_f = period as f64;
    let transitions = candles.len() - 1;

    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for pair in candles.windows(2) {
        let prev = &pair[0];
        let cur = &pair[1];

        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr_vals.push(tr);
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(transitions - period + 1);
    let (mut plus_di, mut minus_di);

    match dx_from_smoothed(smooth_plus, smooth_minus, smooth_tr) {
        Some((dx, p, m)) => {
            dx_values.push(dx);
            plus_di = p;
            minus_di = m;
        }
        None => return None,
    }

    for i in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];

        match dx_from_smoothed(smooth_plus, smooth_minus, smooth_tr) {
            Some((dx, p, m)) => {
                dx_values.push(dx);
                plus_di = p;
                minus_di = m;
            }
            None => return None,
        }
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx_value = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        adx_value = (adx_value * (period_f - 1.0) + dx) / period_f;
        if !adx_value.is_finite() {
            return None;
        }
    }

    adx_value.is_finite().then_some(AdxResult {
        adx: adx_value,
        plus_di,
        minus_di,
    })
}

/// Classify the ADX slope over a history of recent values (oldest first).
/// Uses the spread between the newest and the oldest of the last three.
pub fn adx_trend(history: &[f64]) -> AdxTrend {
    if history.len() < 3 {
        return AdxTrend::Stable;
    }
    let tail = &history[history.len() - 3..];
    let slope = tail[2] - tail[0];
    if slope > 2.0 {
        AdxTrend::Strengthening
    } else if slope < -2.0 {
        AdxTrend::Weakening
    } else {
        AdxTrend::Stable
    }
}

/// DX plus the DI pair from the smoothed components. A zero TR (or both DIs
/// zero) means no directional movement — DX is 0.
fn dx_from_smoothed(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<(f64, f64, f64)> {
    if smooth_tr == 0.0 {
        return Some((0.0, 0.0, 0.0));
    }

    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;
    let di_sum = plus_di + minus_di;

    let dx = if di_sum == 0.0 {
        0.0
    } else {
        (plus_di - minus_di).abs() / di_sum * 100.0
    };

    (dx.is_finite() && plus_di.is_finite() && minus_di.is_finite())
        .then_some((dx, plus_di, minus_di))
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
            volume: 1.0,
        }
    }

    #[test]
    fn adx_insufficient_data() {
        let candles = vec![candle(2.0, 0.5, 1.5); 10];
        assert!(adx(&candles, 14).is_none());
        assert!(adx(&candles, 0).is_none());
    }

    #[test]
    fn adx_strong_uptrend() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        let result = adx(&candles, 14).unwrap();
        assert!(result.adx > 25.0, "expected ADX > 25, got {}", result.adx);
        assert!(result.plus_di > result.minus_di, "uptrend means +DI leads");
    }

    #[test]
    fn adx_strong_downtrend_di_ordering() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 500.0 - i as f64 * 2.0;
                candle(base + 0.5, base - 1.5, base - 1.0)
            })
            .collect();
        let result = adx(&candles, 14).unwrap();
        assert!(result.minus_di > result.plus_di, "downtrend means -DI leads");
    }

    #[test]
    fn adx_flat_market_near_zero() {
        let candles = vec![candle(101.0, 99.0, 100.0); 60];
        let result = adx(&candles, 14).unwrap();
        assert!(result.adx < 1.0, "flat market ADX should be near 0");
    }

    #[test]
    fn adx_range() {
        let candles: Vec<Candle> = (0..100)
            .map(|i| {
                let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
                candle(base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        if let Some(result) = adx(&candles, 14) {
            assert!((0.0..=100.0).contains(&result.adx));
        }
    }

    #[test]
    fn trend_classification() {
        assert_eq!(adx_trend(&[20.0, 21.5, 23.0]), AdxTrend::Strengthening);
        assert_eq!(adx_trend(&[30.0, 28.0, 27.0]), AdxTrend::Weakening);
        assert_eq!(adx_trend(&[25.0, 26.0, 26.5]), AdxTrend::Stable);
        // Only the last three matter.
        assert_eq!(adx_trend(&[5.0, 20.0, 21.5, 23.0]), AdxTrend::Strengthening);
        // Too little history is stable by definition.
        assert_eq!(adx_trend(&[25.0, 30.0]), AdxTrend::Stable);
    }
}
