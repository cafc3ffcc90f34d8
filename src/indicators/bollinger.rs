// =============================================================================
// Bollinger Bands
// =============================================================================
//
//   middle = SMA(N)
//   upper / lower = middle ± k * σ(N)
//   position  = (price - lower) / (upper - lower), clamped to [0, 1]
//   bandwidth = (upper - lower) / middle
//
// A zero-width band (constant price) yields position 0.5 — the price sits in
// the middle of a degenerate band, not at an edge.

#[derive(Debug, Clone, Copy)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Where the latest close sits within the band, in [0, 1].
    pub position: f64,
    /// Band width normalized by the middle band.
    pub bandwidth: f64,
}

/// Compute Bollinger Bands over the trailing `period` closes.
///
/// Returns `None` on insufficient data, a zero middle band, or non-finite
/// output.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let sigma = variance.sqrt();

    let upper = middle + k * sigma;
    let lower = middle - k * sigma;
    let width = upper - lower;

    let price = *closes.last()?;
    let position = if width == 0.0 {
        0.5
    } else {
        ((price - lower) / width).clamp(0.0, 1.0)
    };
    let bandwidth = width / middle;

    [upper, lower, position, bandwidth]
        .iter()
        .all(|v| v.is_finite())
        .then_some(BollingerBands {
            upper,
            middle,
            lower,
            position,
            bandwidth,
        })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_envelope_the_mean() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.bandwidth > 0.0);
    }

    #[test]
    fn insufficient_data() {
        assert!(bollinger(&[1.0, 2.0], 20, 2.0).is_none());
        assert!(bollinger(&[1.0, 2.0], 0, 2.0).is_none());
    }

    #[test]
    fn constant_price_centers_position() {
        let closes = vec![100.0; 20];
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.position - 0.5).abs() < 1e-12);
        assert!(bb.bandwidth.abs() < 1e-12);
        assert!((bb.upper - bb.lower).abs() < 1e-12);
    }

    #[test]
    fn position_clamps_outside_band() {
        // A huge final spike pushes the close above the upper band.
        let mut closes = vec![100.0; 19];
        closes.push(500.0);
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.position - 1.0).abs() < 1e-12);

        let mut closes = vec![100.0; 19];
        closes.push(1.0);
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.position.abs() < 1e-12);
    }

    #[test]
    fn rising_series_sits_high_in_band() {
        let closes: Vec<f64> = (0..120).map(|i| 3_000.0 + 3.0 * i as f64).collect();
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.position > 0.8, "steady rise ends near the top of the band");
    }
}
