// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Running volume total that adds volume on up-closes and subtracts it on
// down-closes. The slope is a least-squares fit over the last `window` OBV
// points and is the signal actually consumed downstream.

use crate::market_data::Candle;

/// Full OBV series (one value per candle, first value 0).
pub fn obv_series(candles: &[Candle]) -> Vec<f64> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(candles.len());
    let mut total = 0.0;
    out.push(total);

    for pair in candles.windows(2) {
        let prev = &pair[0];
        let cur = &pair[1];
        if cur.close > prev.close {
            total += cur.volume;
        } else if cur.close < prev.close {
            total -= cur.volume;
        }
        out.push(total);
    }

    out
}

/// Least-squares slope of the OBV series over the trailing `window` points.
///
/// Returns `None` when fewer than two points are available or the slope is
/// non-finite.
pub fn obv_slope(candles: &[Candle], window: usize) -> Option<f64> {
    let series = obv_series(candles);
    if series.len() < 2 || window < 2 {
        return None;
    }

    let tail = &series[series.len().saturating_sub(window)..];
    linreg_slope(tail)
}

/// Slope of the least-squares line through `values` at x = 0, 1, 2, ...
fn linreg_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }

    if den == 0.0 {
        return Some(0.0);
    }
    let slope = num / den;
    slope.is_finite().then_some(slope)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    #[test]
    fn obv_empty() {
        assert!(obv_series(&[]).is_empty());
    }

    #[test]
    fn obv_accumulates_up_moves() {
        let candles = vec![candle(100.0, 10.0), candle(101.0, 20.0), candle(102.0, 30.0)];
        assert_eq!(obv_series(&candles), vec![0.0, 20.0, 50.0]);
    }

    #[test]
    fn obv_subtracts_down_moves() {
        let candles = vec![candle(100.0, 10.0), candle(99.0, 20.0), candle(98.0, 5.0)];
        assert_eq!(obv_series(&candles), vec![0.0, -20.0, -25.0]);
    }

    #[test]
    fn obv_ignores_flat_closes() {
        let candles = vec![candle(100.0, 10.0), candle(100.0, 50.0)];
        assert_eq!(obv_series(&candles), vec![0.0, 0.0]);
    }

    #[test]
    fn slope_positive_in_accumulation() {
        let candles: Vec<Candle> = (0..30).map(|i| candle(100.0 + i as f64, 100.0)).collect();
        let slope = obv_slope(&candles, 20).unwrap();
        assert!(slope > 0.0);
    }

    #[test]
    fn slope_zero_when_flat() {
        let candles: Vec<Candle> = (0..30).map(|_| candle(100.0, 100.0)).collect();
        let slope = obv_slope(&candles, 20).unwrap();
        assert!(slope.abs() < 1e-12);
    }

    #[test]
    fn linreg_known_line() {
        // y = 3x + 1 over 5 points.
        let values = vec![1.0, 4.0, 7.0, 10.0, 13.0];
        let slope = linreg_slope(&values).unwrap();
        assert!((slope - 3.0).abs() < 1e-12);
    }
}
