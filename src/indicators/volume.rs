// =============================================================================
// Volume ratio
// =============================================================================
//
// Current volume relative to its SMA. A zero average (for example a window of
// zero-volume candles) defaults the ratio to 1 — neutral, not an error.

use crate::indicators::ema::sma;

/// Ratio of the latest volume to SMA(volume, period). Defaults to 1.0 when
/// the average is zero or not computable.
pub fn volume_ratio(volumes: &[f64], period: usize) -> f64 {
    let Some(&last) = volumes.last() else {
        return 1.0;
    };

    match sma(volumes, period) {
        Some(avg) if avg > 0.0 => {
            let ratio = last / avg;
            if ratio.is_finite() {
                ratio
            } else {
                1.0
            }
        }
        _ => 1.0,
    }
}
