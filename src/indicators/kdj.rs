// =============================================================================
// KDJ (stochastic oscillator with J line)
// =============================================================================
//
//   RSV = (close - lowest_low(N)) / (highest_high(N) - lowest_low(N)) * 100
//   K   = 2/3 * prevK + 1/3 * RSV      (seeded at 50)
//   D   = 2/3 * prevD + 1/3 * K        (seeded at 50)
//   J   = 3K - 2D
//
// A flat window (zero range) yields RSV 50.

use crate::market_data::Candle;

#[derive(Debug, Clone, Copy)]
pub struct KdjResult {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Compute the latest KDJ values over `candles` (oldest first).
pub fn kdj(candles: &[Candle], period: usize) -> Option<KdjResult> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let mut k = 50.0;
    let mut d = 50.0;

    for end in period..=candles.len() {
        let window = &candles[end - period..end];
        let close = window.last()?.close;
        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let range = high - low;
        let rsv = if range == 0.0 {
            50.0
        } else {
            (close - low) / range * 100.0
        };

        k = 2.0 / 3.0 * k + rsv / 3.0;
        d = 2.0 / 3.0 * d + k / 3.0;
        if !k.is_finite() || !d.is_finite() {
            return None;
        }
    }

    let j = 3.0 * k - 2.0 * d;
    j.is_finite().then_some(KdjResult { k, d, j })
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
    fn kdj_insufficient_data() {
        let candles = vec![candle(101.0, 99.0, 100.0); 5];
        assert!(kdj(&candles, 9).is_none());
        assert!(kdj(&candles, 0).is_none());
    }

    #[test]
    fn kdj_flat_market_stays_neutral() {
        let candles = vec![candle(100.0, 100.0, 100.0); 30];
        let result = kdj(&candles, 9).unwrap();
        assert!((result.k - 50.0).abs() < 1e-9);
        assert!((result.d - 50.0).abs() < 1e-9);
        assert!((result.j - 50.0).abs() < 1e-9);
    }

    #[test]
    fn kdj_uptrend_pushes_k_high() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base + 1.0, base - 1.0, base + 0.9)
            })
            .collect();
        let result = kdj(&candles, 9).unwrap();
        assert!(result.k > 70.0, "K should be high in an uptrend, got {}", result.k);
        assert!(result.j >= result.k, "J amplifies K above D in a rising market");
    }

    #[test]
    fn kdj_downtrend_pushes_k_low() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 300.0 - i as f64 * 2.0;
                candle(base + 1.0, base - 1.0, base - 0.9)
            })
            .collect();
        let result = kdj(&candles, 9).unwrap();
        assert!(result.k < 30.0, "K should be low in a downtrend, got {}", result.k);
    }
}
