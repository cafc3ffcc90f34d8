// =============================================================================
// Moving Average Convergence / Divergence (MACD)
// =============================================================================
//
//   MACD line  = EMA(fast) - EMA(slow)
//   Signal     = EMA(signal_period) of the MACD line
//   Histogram  = MACD line - Signal
//
// Default (12, 26, 9).

use crate::indicators::ema::ema_series;

#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD values.
///
/// Returns `None` when there is not enough data for the slow EMA plus the
/// signal EMA of the MACD line, or when any value is non-finite.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal_period {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if fast_series.is_empty() || slow_series.is_empty() {
        return None;
    }

    // Align the two series on input indices: fast starts at `fast - 1`, slow
    // at `slow - 1`, so the fast series leads by `slow - fast` entries.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| fast_series.get(i + offset).map(|&f| f - s))
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd_now = *macd_line.last()?;
    let histogram = macd_now - signal;

    if macd_now.is_finite() && signal.is_finite() && histogram.is_finite() {
        Some(MacdResult {
            macd: macd_now,
            signal,
            histogram,
        })
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_none()); // need 35
    }

    #[test]
    fn macd_bad_periods() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        assert!(macd(&closes, 0, 26, 9).is_none());
        assert!(macd(&closes, 26, 12, 9).is_none()); // fast >= slow
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 2.0).collect();
        let result = macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd > 0.0, "MACD should be positive in an uptrend");
        assert!(result.histogram.is_finite());
    }

    #[test]
    fn macd_negative_in_downtrend() {
        let closes: Vec<f64> = (0..80).map(|i| 500.0 - i as f64 * 2.0).collect();
        let result = macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd < 0.0, "MACD should be negative in a downtrend");
    }

    #[test]
    fn macd_zero_when_flat() {
        let closes = vec![100.0; 80];
        let result = macd(&closes, 12, 26, 9).unwrap();
        assert!(result.macd.abs() < 1e-10);
        assert!(result.signal.abs() < 1e-10);
        assert!(result.histogram.abs() < 1e-10);
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let closes: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 8.0)
            .collect();
        let result = macd(&closes, 12, 26, 9).unwrap();
        assert!((result.histogram - (result.macd - result.signal)).abs() < 1e-12);
    }
}
