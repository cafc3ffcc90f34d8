// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
// Cumulative over candles since the start of the current UTC day:
//
//   vwap = Σ(typical_price * volume) / Σ(volume),  typical = (H + L + C) / 3
//
// Distance from VWAP is (price - vwap) / vwap; a zero denominator defaults
// the distance to 0.

use chrono::{TimeZone, Timelike, Utc};

use crate::market_data::Candle;

/// VWAP over candles whose open_time falls in the current UTC day of
/// `now_ms`. Returns `None` when no candle lies in the day or the cumulative
/// volume is zero.
pub fn vwap(candles: &[Candle], now_ms: i64) -> Option<f64> {
    let day_start = utc_day_start_ms(now_ms)?;

    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in candles.iter().filter(|c| c.open_time >= day_start) {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }

    if vol == 0.0 {
        return None;
    }
    let value = pv / vol;
    value.is_finite().then_some(value)
}

/// Relative distance of `price` from the session VWAP. Defaults to 0 when
/// the VWAP is unavailable or zero.
pub fn vwap_distance(candles: &[Candle], price: f64, now_ms: i64) -> f64 {
    match vwap(candles, now_ms) {
        Some(v) if v != 0.0 => {
            let d = (price - v) / v;
            if d.is_finite() {
                d
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Epoch milliseconds of 00:00:00 UTC on the day containing `now_ms`.
fn utc_day_start_ms(now_ms: i64) -> Option<i64> {
    let dt = Utc.timestamp_millis_opt(now_ms).single()?;
    let day = dt
        .with_hour(0)?
        .with_minute(0)?
        .with_second(0)?
        .with_nanosecond(0)?;
    Some(day.timestamp_millis())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn candle(open_time: i64, price: f64, volume: f64) -> Candle {
        Candle {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    #[test]
    fn vwap_weights_by_volume() {
        // Two candles today: 100 @ vol 10, 200 @ vol 30 -> vwap 175.
        let now = DAY_MS + 7_200_000;
        let candles = vec![
            candle(DAY_MS, 100.0, 10.0),
            candle(DAY_MS + 3_600_000, 200.0, 30.0),
        ];
        let v = vwap(&candles, now).unwrap();
        assert!((v - 175.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_excludes_previous_day() {
        let now = DAY_MS + 3_600_000;
        let candles = vec![
            candle(DAY_MS - 3_600_000, 999.0, 1_000.0), // yesterday
            candle(DAY_MS, 100.0, 10.0),
        ];
        let v = vwap(&candles, now).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_none_on_zero_volume() {
        let now = DAY_MS + 3_600_000;
        let candles = vec![candle(DAY_MS, 100.0, 0.0)];
        assert!(vwap(&candles, now).is_none());
    }

    #[test]
    fn distance_defaults_to_zero() {
        // No candles in the day — distance must be 0, not NaN.
        let d = vwap_distance(&[], 100.0, DAY_MS);
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn distance_sign_follows_price() {
        let now = DAY_MS + 3_600_000;
        let candles = vec![candle(DAY_MS, 100.0, 10.0)];
        assert!(vwap_distance(&candles, 110.0, now) > 0.0);
        assert!(vwap_distance(&candles, 90.0, now) < 0.0);
    }
}
