// =============================================================================
// Indicator Engine — one snapshot per tick from the rolling candle tail
// =============================================================================
//
// Owns the candle ring for the primary interval plus two small history rings:
// the last three ADX values (trend slope) and the rolling ATR window
// (percentile -> volatility bucket). Everything else recomputes from the
// retained candle tail on each call.
//
// `snapshot()` fails with `InsufficientData` when fewer than
// max(required period) + 1 closed candles exist or when any output is
// non-finite. Both cases are recoverable; the caller falls back to HOLD.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::indicators::adx::{adx, adx_trend, AdxTrend};
use crate::indicators::atr::{atr, percentile_rank, volatility_level};
use crate::indicators::bollinger::bollinger;
use crate::indicators::ema::last_ema;
use crate::indicators::kdj::kdj;
use crate::indicators::keltner::{is_squeeze, keltner};
use crate::indicators::macd::macd;
use crate::indicators::obv::{obv_series, obv_slope};
use crate::indicators::rsi::last_rsi;
use crate::indicators::volume::volume_ratio;
use crate::indicators::vwap::vwap_distance;
use crate::indicators::williams::williams_r;
use crate::market_data::{Candle, CandleSeries};
use crate::runtime_config::IndicatorConfig;
use crate::types::{Interval, VolatilityLevel};

/// All indicator values at the last closed candle. Lifetime: one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Close of the candle the snapshot was taken at.
    pub price: f64,
    /// Open time of that candle (epoch ms).
    pub candle_time: i64,

    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,

    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,

    pub boll_upper: f64,
    pub boll_middle: f64,
    pub boll_lower: f64,
    /// Price position within the band, [0, 1].
    pub boll_position: f64,
    pub boll_bandwidth: f64,

    pub keltner_upper: f64,
    pub keltner_lower: f64,
    /// Bollinger band entirely inside the Keltner channel.
    pub squeeze: bool,

    pub atr: f64,
    /// ATR as a percentage of price.
    pub atr_pct: f64,
    /// Percentile of the current ATR within its rolling window, [0, 100].
    pub atr_percentile: f64,
    pub volatility: VolatilityLevel,

    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub adx_trend: AdxTrend,

    pub kdj_k: f64,
    pub kdj_d: f64,
    pub kdj_j: f64,
    pub williams_r: f64,

    pub obv: f64,
    pub obv_slope: f64,

    /// (price - vwap) / vwap for the current UTC session.
    pub vwap_distance: f64,
    pub volume_ratio: f64,
}

/// Number of ADX snapshots kept for the trend slope.
const ADX_HISTORY_LEN: usize = 3;

/// Stateful per-interval indicator engine.
pub struct IndicatorEngine {
    config: IndicatorConfig,
    series: CandleSeries,
    adx_history: VecDeque<f64>,
    atr_history: VecDeque<f64>,
    /// Open time of the last candle folded into the history rings.
    last_tracked: i64,
}

impl IndicatorEngine {
    pub fn new(interval: Interval, capacity: usize, config: IndicatorConfig) -> Self {
        Self {
            config,
            series: CandleSeries::new(interval, capacity),
            adx_history: VecDeque::with_capacity(ADX_HISTORY_LEN + 1),
            atr_history: VecDeque::new(),
            last_tracked: i64::MIN,
        }
    }

    /// Append or merge one candle. O(1) amortized; `OutOfOrder` when older
    /// than the last stored candle.
    pub fn push(&mut self, candle: Candle) -> Result<(), EngineError> {
        self.series.push(candle)
    }

    /// Merge a retrieved batch; returns the number of accepted candles.
    pub fn merge_batch(&mut self, batch: Vec<Candle>) -> usize {
        self.series.merge_batch(batch)
    }

    pub fn interval(&self) -> Interval {
        self.series.interval()
    }

    pub fn candle_count(&self) -> usize {
        self.series.len()
    }

    /// Minimum candles required before a snapshot can be produced:
    /// max(required period) + 1 across the configured indicator bank.
    pub fn min_candles(&self) -> usize {
        let c = &self.config;
        let max_period = [
            c.ema_trend,
            c.ema_slow,
            c.macd_slow + c.macd_signal,
            c.bollinger_period,
            c.keltner_period,
            c.atr_period,
            2 * c.adx_period + 1,
            c.rsi_period,
            c.kdj_period,
            c.williams_period,
            c.volume_sma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1);
        max_period + 1
    }

    /// Compute the full snapshot at the latest consumable candle.
    pub fn snapshot(&mut self, now_ms: i64) -> Result<IndicatorSnapshot, EngineError> {
        let candles = if self.config.use_closed_only {
            self.series.closed(now_ms)
        } else {
            self.series.all()
        };

        let needed = self.min_candles();
        if candles.len() < needed {
            return Err(EngineError::insufficient(format!(
                "{} candles available, {} required",
                candles.len(),
                needed
            )));
        }

        let c = &self.config;
        let closes: Vec<f64> = candles.iter().map(|x| x.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|x| x.volume).collect();
        let Some(last) = candles.last() else {
            return Err(EngineError::insufficient("empty candle window"));
        };
        let price = last.close;

        let rsi = last_rsi(&closes, c.rsi_period)
            .ok_or_else(|| EngineError::insufficient("rsi"))?;
        let ema_fast = last_ema(&closes, c.ema_fast)
            .ok_or_else(|| EngineError::insufficient("ema_fast"))?;
        let ema_slow = last_ema(&closes, c.ema_slow)
            .ok_or_else(|| EngineError::insufficient("ema_slow"))?;
        let ema_trend_val = last_ema(&closes, c.ema_trend)
            .ok_or_else(|| EngineError::insufficient("ema_trend"))?;

        let macd_res = macd(&closes, c.macd_fast, c.macd_slow, c.macd_signal)
            .ok_or_else(|| EngineError::insufficient("macd"))?;

        let bb = bollinger(&closes, c.bollinger_period, c.bollinger_k)
            .ok_or_else(|| EngineError::insufficient("bollinger"))?;
        let kc = keltner(&candles, c.keltner_period, c.keltner_k)
            .ok_or_else(|| EngineError::insufficient("keltner"))?;
        let squeeze = is_squeeze(&bb, &kc);

        let atr_val = atr(&candles, c.atr_period)
            .ok_or_else(|| EngineError::insufficient("atr"))?;
        let atr_pct = if price != 0.0 {
            atr_val / price * 100.0
        } else {
            0.0
        };

        let adx_res = adx(&candles, c.adx_period)
            .ok_or_else(|| EngineError::insufficient("adx"))?;

        let kdj_res = kdj(&candles, c.kdj_period)
            .ok_or_else(|| EngineError::insufficient("kdj"))?;
        let williams = williams_r(&candles, c.williams_period)
            .ok_or_else(|| EngineError::insufficient("williams"))?;

        let obv_vals = obv_series(&candles);
        let obv_last = *obv_vals.last().unwrap_or(&0.0);
        let obv_slope_val = obv_slope(&candles, c.obv_slope_window).unwrap_or(0.0);

        let vwap_dist = vwap_distance(&candles, price, now_ms);
        let vol_ratio = volume_ratio(&volumes, c.volume_sma_period);

        // Fold the latest candle into the history rings exactly once.
        if last.open_time > self.last_tracked {
            self.adx_history.push_back(adx_res.adx);
            while self.adx_history.len() > ADX_HISTORY_LEN {
                self.adx_history.pop_front();
            }
            self.atr_history.push_back(atr_val);
            while self.atr_history.len() > c.atr_percentile_window {
                self.atr_history.pop_front();
            }
            self.last_tracked = last.open_time;
        }

        let adx_hist: Vec<f64> = self.adx_history.iter().copied().collect();
        let atr_hist: Vec<f64> = self.atr_history.iter().copied().collect();
        let atr_percentile = percentile_rank(&atr_hist, atr_val);

        let snapshot = IndicatorSnapshot {
            price,
            candle_time: last.open_time,
            rsi,
            ema_fast,
            ema_slow,
            ema_trend: ema_trend_val,
            macd: macd_res.macd,
            macd_signal: macd_res.signal,
            macd_histogram: macd_res.histogram,
            boll_upper: bb.upper,
            boll_middle: bb.middle,
            boll_lower: bb.lower,
            boll_position: bb.position,
            boll_bandwidth: bb.bandwidth,
            keltner_upper: kc.upper,
            keltner_lower: kc.lower,
            squeeze,
            atr: atr_val,
            atr_pct,
            atr_percentile,
            volatility: volatility_level(atr_percentile),
            adx: adx_res.adx,
            plus_di: adx_res.plus_di,
            minus_di: adx_res.minus_di,
            adx_trend: adx_trend(&adx_hist),
            kdj_k: kdj_res.k,
            kdj_d: kdj_res.d,
            kdj_j: kdj_res.j,
            williams_r: williams,
            obv: obv_last,
            obv_slope: obv_slope_val,
            vwap_distance: vwap_dist,
            volume_ratio: vol_ratio,
        };

        if !snapshot.all_finite() {
            return Err(EngineError::insufficient("non-finite indicator output"));
        }

        Ok(snapshot)
    }
}

impl IndicatorSnapshot {
    /// Every numeric output is finite. Non-finite values must never escape
    /// the indicator engine.
    pub fn all_finite(&self) -> bool {
        [
            self.price,
            self.rsi,
            self.ema_fast,
            self.ema_slow,
            self.ema_trend,
            self.macd,
            self.macd_signal,
            self.macd_histogram,
            self.boll_upper,
            self.boll_middle,
            self.boll_lower,
            self.boll_position,
            self.boll_bandwidth,
            self.keltner_upper,
            self.keltner_lower,
            self.atr,
            self.atr_pct,
            self.atr_percentile,
            self.adx,
            self.plus_di,
            self.minus_di,
            self.kdj_k,
            self.kdj_d,
            self.kdj_j,
            self.williams_r,
            self.obv,
            self.obv_slope,
            self.vwap_distance,
            self.volume_ratio,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    fn candle(i: i64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: i * HOUR_MS,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(Interval::H1, 500, IndicatorConfig::default())
    }

    /// now_ms that closes all candles with index < n.
    fn after(n: i64) -> i64 {
        n * HOUR_MS + HOUR_MS
    }

    #[test]
    fn snapshot_requires_min_candles() {
        let mut eng = engine();
        for i in 0..10 {
            eng.push(candle(i, 3_000.0 + i as f64, 1_000.0)).unwrap();
        }
        let err = eng.snapshot(after(9)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn min_candles_dominated_by_trend_ema() {
        let eng = engine();
        // Default config: ema_trend 55 dominates; +1.
        assert_eq!(eng.min_candles(), 56);
    }

    #[test]
    fn rising_trend_snapshot() {
        // 120 closed 1H candles with close = 3000 + 3i: a steady climb.
        let mut eng = engine();
        for i in 0..120 {
            eng.push(candle(i, 3_000.0 + 3.0 * i as f64, 1_000.0)).unwrap();
        }
        let snap = eng.snapshot(after(119)).unwrap();
        assert!(snap.rsi > 55.0, "rsi {}", snap.rsi);
        assert!(snap.macd_histogram > 0.0);
        assert!(snap.boll_position > 0.8, "boll_position {}", snap.boll_position);
        assert!(snap.ema_fast > snap.ema_trend);
        assert!(snap.all_finite());
    }

    #[test]
    fn constant_price_window() {
        // Volatility 0, squeeze true, Bollinger position 0.5. The bars are
        // completely flat (high == low == close) so ATR is exactly zero.
        let mut eng = engine();
        for i in 0..80 {
            eng.push(Candle {
                open_time: i * HOUR_MS,
                open: 3_000.0,
                high: 3_000.0,
                low: 3_000.0,
                close: 3_000.0,
                volume: 1_000.0,
            })
            .unwrap();
        }
        let snap = eng.snapshot(after(79)).unwrap();
        assert!(snap.atr.abs() < 1e-12);
        assert!(snap.squeeze);
        assert!((snap.boll_position - 0.5).abs() < 1e-12);
        assert!((snap.volume_ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_volume_candles_do_not_crash() {
        let mut eng = engine();
        for i in 0..80 {
            eng.push(candle(i, 3_000.0 + (i as f64 * 0.3).sin() * 5.0, 0.0)).unwrap();
        }
        let snap = eng.snapshot(after(79)).unwrap();
        assert!((snap.volume_ratio - 1.0).abs() < 1e-12);
        assert!(snap.all_finite());
    }

    #[test]
    fn unclosed_tail_is_excluded() {
        let mut eng = engine();
        for i in 0..80 {
            eng.push(candle(i, 3_000.0 + i as f64, 1_000.0)).unwrap();
        }
        // The candle at index 79 has not closed at this timestamp.
        let snap = eng.snapshot(after(78)).unwrap();
        assert_eq!(snap.candle_time, 78 * HOUR_MS);
    }

    #[test]
    fn replay_reproduces_identical_snapshot() {
        // Stop -> start with identical candle replay yields identical output.
        let build = || {
            let mut eng = engine();
            for i in 0..100 {
                eng.push(candle(i, 3_000.0 + (i as f64 * 0.2).sin() * 20.0, 500.0))
                    .unwrap();
            }
            eng.snapshot(after(99)).unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a.rsi, b.rsi);
        assert_eq!(a.macd_histogram, b.macd_histogram);
        assert_eq!(a.atr, b.atr);
        assert_eq!(a.adx, b.adx);
        assert_eq!(a.boll_position, b.boll_position);
    }

    #[test]
    fn adx_trend_needs_three_snapshots() {
        let mut eng = engine();
        for i in 0..100 {
            eng.push(candle(i, 3_000.0 + 3.0 * i as f64, 1_000.0)).unwrap();
        }
        // One snapshot -> only one ADX observation -> STABLE.
        let snap = eng.snapshot(after(99)).unwrap();
        assert_eq!(snap.adx_trend, AdxTrend::Stable);
    }
}
