// =============================================================================
// Technical score — additive rules over the indicator snapshot
// =============================================================================
//
// Starts at the neutral 50 and accumulates bounded contributions:
//
//   RSI       <= oversold +20 | >= overbought -20 | within mid±5 +5
//   MACD hist > 0 +10/+15 by magnitude | < 0 symmetric
//   Bollinger position < 0.2 +15 | > 0.8 -15
//   EMA fast  > trend EMA +10 | < -10
//   KDJ (optional, ±8) and Williams %R (optional, ±6) behind config flags
//
// Weak-context gates then dampen the deviation from 50: ADX below minimum
// x0.6, thin volume or falling OBV x0.7, low ATR or an active squeeze x0.6.
// The final score is clipped to [0, 100]. Every contribution is recorded so
// the dashboard and sample rows can explain the number.

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::runtime_config::{IndicatorConfig, ScoreConfig};

/// One named contribution to the technical score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub name: String,
    pub delta: f64,
}

/// Technical score with its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalScore {
    /// Final score in [0, 100].
    pub score: f64,
    pub contributions: Vec<ScoreContribution>,
    /// Combined dampening factor applied to the deviation from 50.
    pub dampening: f64,
}

/// Compute the technical score for one snapshot.
pub fn technical_score(
    snap: &IndicatorSnapshot,
    score_cfg: &ScoreConfig,
    ind_cfg: &IndicatorConfig,
) -> TechnicalScore {
    let mut contributions: Vec<ScoreContribution> = Vec::new();
    let mut add = |name: &str, delta: f64| {
        contributions.push(ScoreContribution {
            name: name.to_string(),
            delta,
        });
        delta
    };

    let mut raw = 50.0;
    let mid = (ind_cfg.rsi_oversold + ind_cfg.rsi_overbought) / 2.0;

    // RSI
    if snap.rsi <= ind_cfg.rsi_oversold {
        raw += add("rsi_oversold", 20.0);
    } else if snap.rsi >= ind_cfg.rsi_overbought {
        raw += add("rsi_overbought", -20.0);
    } else if (snap.rsi - mid).abs() <= 5.0 {
        raw += add("rsi_neutral_zone", 5.0);
    }

    // MACD histogram, magnitude measured relative to price.
    let hist_rel = if snap.price != 0.0 {
        snap.macd_histogram / snap.price
    } else {
        0.0
    };
    if snap.macd_histogram > 0.0 {
        let delta = if hist_rel > score_cfg.macd_magnitude_threshold {
            15.0
        } else {
            10.0
        };
        raw += add("macd_bullish", delta);
    } else if snap.macd_histogram < 0.0 {
        let delta = if -hist_rel > score_cfg.macd_magnitude_threshold {
            -15.0
        } else {
            -10.0
        };
        raw += add("macd_bearish", delta);
    }

    // Bollinger position
    if snap.boll_position < 0.2 {
        raw += add("bollinger_low", 15.0);
    } else if snap.boll_position > 0.8 {
        raw += add("bollinger_high", -15.0);
    }

    // EMA alignment against the trend EMA.
    if snap.ema_fast > snap.ema_trend {
        raw += add("ema_above_trend", 10.0);
    } else if snap.ema_fast < snap.ema_trend {
        raw += add("ema_below_trend", -10.0);
    }

    // Optional oscillators.
    if score_cfg.enable_kdj {
        if snap.kdj_j < 20.0 {
            raw += add("kdj_oversold", 8.0);
        } else if snap.kdj_j > 80.0 {
            raw += add("kdj_overbought", -8.0);
        }
    }
    if score_cfg.enable_williams {
        if snap.williams_r < -80.0 {
            raw += add("williams_oversold", 6.0);
        } else if snap.williams_r > -20.0 {
            raw += add("williams_overbought", -6.0);
        }
    }

    // Weak-context dampening of the deviation from neutral.
    let mut dampening = 1.0;
    if snap.adx < ind_cfg.adx_min {
        dampening *= 0.6;
    }
    if snap.obv_slope < score_cfg.min_obv_slope || snap.volume_ratio < score_cfg.min_volume_ratio {
        dampening *= 0.7;
    }
    if snap.atr_pct < score_cfg.min_atr_pct || snap.squeeze {
        dampening *= 0.6;
    }

    let score = (50.0 + (raw - 50.0) * dampening).clamp(0.0, 100.0);

    TechnicalScore {
        score,
        contributions,
        dampening,
    }
}
