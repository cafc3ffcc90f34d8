// =============================================================================
// Signal fusion — technical + external model + regime into one signal
// =============================================================================
//
// Pipeline:
//   1. Model score M: neutral 50 unless the external forecast passes both the
//      confidence and the direction thresholds, in which case
//        M' = M*(1-a) + (50 + 50*(long - short))*a,
//        a  = clamp(confidence, 0.2, 0.8) capped by alpha_max.
//   2. Regime score R: regime-dependent offset on a base of 50, pulled back
//      toward 50 in hot volatility buckets.
//   3. Combined C = (wT*T + wM*M' + wR*R) / (wT + wM + wR), minus a [6, 12]
//      disagreement penalty when a confident model opposes the technicals.
//   4. Discretize to the five classes; a model confidence above the override
//      threshold replaces the score-derived class with the model's own.
//
// Confidence is the max of the available confidences; MTF agreement adds the
// light size/strength multipliers (x0.8/x0.95 under 0.35, x1.1/x1.03 over
// 0.8).

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::market_state::{MarketStateResult, Regime};
use crate::runtime_config::{ModelConfig, ScoreConfig};
use crate::signal::technical::{ScoreContribution, TechnicalScore};
use crate::types::{Side, SignalClass, VolatilityLevel};

/// External model forecast. `score_long` / `score_short` are directional
/// probabilities in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelForecast {
    pub score_long: f64,
    pub score_short: f64,
    pub confidence: f64,
}

impl ModelForecast {
    /// The neutral output substituted when the model is absent or times out.
    pub fn neutral() -> Self {
        Self {
            score_long: 0.5,
            score_short: 0.5,
            confidence: 0.0,
        }
    }

    pub fn direction(&self) -> f64 {
        self.score_long - self.score_short
    }

    /// Whether this forecast clears the fusion thresholds.
    fn passes(&self, cfg: &ModelConfig) -> bool {
        if self.confidence < cfg.confidence_threshold {
            return false;
        }
        (self.score_long >= cfg.direction_threshold && self.direction() > 0.0)
            || (self.score_short >= cfg.direction_threshold && self.direction() < 0.0)
    }
}

/// Extra detail carried alongside the signal for auditing and sample rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub contributions: Vec<ScoreContribution>,
    pub dampening: f64,
    /// Whether the external forecast was fused into the model score.
    pub model_fused: bool,
    /// Blend factor used for the fusion, when applied.
    pub alpha: Option<f64>,
    /// Disagreement penalty subtracted from the combined score, if any.
    pub penalty: f64,
    /// Whether the model class override replaced the score-derived class.
    pub class_overridden: bool,
}

/// Fused signal for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub class: SignalClass,
    pub technical_score: f64,
    pub model_score: f64,
    pub regime_score: f64,
    pub combined_score: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Position-size multiplier from MTF agreement.
    pub size_multiplier: f64,
    /// Strength multiplier from MTF agreement.
    pub strength_multiplier: f64,
    pub metadata: SignalMetadata,
}

impl SignalResult {
    pub fn side(&self) -> Option<Side> {
        self.class.side()
    }
}

/// Fuse the technical score, the optional external forecast and the market
/// state into the final categorical signal.
pub fn synthesize(
    technical: &TechnicalScore,
    snap: &IndicatorSnapshot,
    state: &MarketStateResult,
    forecast: Option<&ModelForecast>,
    score_cfg: &ScoreConfig,
    model_cfg: &ModelConfig,
) -> SignalResult {
    let t = technical.score;

    // ── 1. Model score ──────────────────────────────────────────────────
    let mut model_score = 50.0;
    let mut model_fused = false;
    let mut alpha_used = None;

    if let Some(f) = forecast {
        if f.passes(model_cfg) {
            let alpha = f.confidence.clamp(0.2, 0.8).min(model_cfg.alpha_max);
            let target = (50.0 + 50.0 * f.direction()).clamp(0.0, 100.0);
            model_score = model_score * (1.0 - alpha) + target * alpha;
            model_fused = true;
            alpha_used = Some(alpha);
        }
    }

    // ── 2. Regime score ─────────────────────────────────────────────────
    let regime_score = regime_score(state, snap);

    // ── 3. Combined ─────────────────────────────────────────────────────
    let weight_sum = score_cfg.weight_technical + score_cfg.weight_model + score_cfg.weight_regime;
    let mut combined = (score_cfg.weight_technical * t
        + score_cfg.weight_model * model_score
        + score_cfg.weight_regime * regime_score)
        / weight_sum;

    let penalty = disagreement_penalty(t, model_score, forecast, model_cfg);
    combined = (combined - penalty).clamp(0.0, 100.0);

    // ── 4. Discretize + model override ──────────────────────────────────
    let mut class = SignalClass::from_score(combined);
    let mut class_overridden = false;
    if let Some(f) = forecast {
        if f.confidence > model_cfg.override_confidence {
            let model_class = if f.direction() > 0.0 {
                SignalClass::Buy
            } else if f.direction() < 0.0 {
                SignalClass::Sell
            } else {
                SignalClass::Hold
            };
            if model_class != class {
                class_overridden = true;
            }
            class = model_class;
        }
    }

    // ── Confidence & MTF multipliers ────────────────────────────────────
    let technical_confidence =
        (0.5 + (state.mtf_agreement - 0.5) * 0.4 + (combined - 50.0).abs() / 50.0 * 0.2)
            .clamp(0.0, 1.0);
    let confidence = forecast
        .map(|f| f.confidence)
        .unwrap_or(0.0)
        .max(technical_confidence);

    let (size_multiplier, strength_multiplier) = if state.mtf_agreement < 0.35 {
        (0.8, 0.95)
    } else if state.mtf_agreement > 0.8 {
        (1.1, 1.03)
    } else {
        (1.0, 1.0)
    };

    SignalResult {
        class,
        technical_score: t,
        model_score,
        regime_score,
        combined_score: combined,
        confidence,
        size_multiplier,
        strength_multiplier,
        metadata: SignalMetadata {
            contributions: technical.contributions.clone(),
            dampening: technical.dampening,
            model_fused,
            alpha: alpha_used,
            penalty,
            class_overridden,
        },
    }
}

/// Regime score: a directional offset on base 50, flattened toward neutral
/// in hot volatility buckets.
fn regime_score(state: &MarketStateResult, snap: &IndicatorSnapshot) -> f64 {
    let strength = state.trend_strength.clamp(0.0, 100.0);
    let offset = match state.regime {
        Regime::TrendingUp => strength * 0.3,
        Regime::TrendingDown => -strength * 0.3,
        Regime::Breakout => {
            if snap.macd_histogram >= 0.0 {
                12.0
            } else {
                -12.0
            }
        }
        Regime::Reversal => {
            // Lean against the exhausted side.
            if snap.rsi >= 70.0 {
                -10.0
            } else if snap.rsi <= 30.0 {
                10.0
            } else {
                0.0
            }
        }
        Regime::Sideways | Regime::HighVolatility | Regime::LowVolatility => 0.0,
    };

    let damp = match state.volatility {
        VolatilityLevel::High | VolatilityLevel::Extreme => 0.8,
        _ => 1.0,
    };

    (50.0 + offset * damp).clamp(0.0, 100.0)
}

/// Penalty in [6, 12] when a confident model points against the technical
/// direction, scaled by confidence-over-threshold and model magnitude.
fn disagreement_penalty(
    technical: f64,
    model_score: f64,
    forecast: Option<&ModelForecast>,
    cfg: &ModelConfig,
) -> f64 {
    let Some(f) = forecast else {
        return 0.0;
    };
    if f.confidence < cfg.confidence_threshold {
        return 0.0;
    }

    let tech_dir = technical - 50.0;
    let model_dir = model_score - 50.0;
    if tech_dir == 0.0 || model_dir == 0.0 || tech_dir.signum() == model_dir.signum() {
        return 0.0;
    }

    let conf_excess = ((f.confidence - cfg.confidence_threshold)
        / (1.0 - cfg.confidence_threshold).max(1e-9))
    .clamp(0.0, 1.0);
    let magnitude = (model_dir.abs() / 50.0).clamp(0.0, 1.0);

    (6.0 + 3.0 * conf_excess + 3.0 * magnitude).clamp(6.0, 12.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::adx::AdxTrend;
    use crate::market_state::transition_distribution;
    use crate::types::LiquidityLabel;

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            price: 3_000.0,
            candle_time: 0,
            rsi: 50.0,
            ema_fast: 3_000.0,
            ema_slow: 3_000.0,
            ema_trend: 3_000.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            boll_upper: 3_050.0,
            boll_middle: 3_000.0,
            boll_lower: 2_950.0,
            boll_position: 0.5,
            boll_bandwidth: 0.03,
            keltner_upper: 3_060.0,
            keltner_lower: 2_940.0,
            squeeze: false,
            atr: 20.0,
            atr_pct: 0.66,
            atr_percentile: 50.0,
            volatility: VolatilityLevel::Medium,
            adx: 28.0,
            plus_di: 25.0,
            minus_di: 15.0,
            adx_trend: AdxTrend::Stable,
            kdj_k: 50.0,
            kdj_d: 50.0,
            kdj_j: 50.0,
            williams_r: -50.0,
            obv: 0.0,
            obv_slope: 1.0,
            vwap_distance: 0.0,
            volume_ratio: 1.0,
        }
    }

    fn state(regime: Regime) -> MarketStateResult {
        MarketStateResult {
            regime,
            adx_trend: AdxTrend::Stable,
            trend_strength: 28.0,
            atr_percentile: 50.0,
            volatility: VolatilityLevel::Medium,
            liquidity: LiquidityLabel::Medium,
            mtf_agreement: 0.5,
            transition_probabilities: transition_distribution(regime, AdxTrend::Stable, 0.5),
        }
    }

    fn tech(score: f64) -> TechnicalScore {
        TechnicalScore {
            score,
            contributions: Vec::new(),
            dampening: 1.0,
        }
    }

    fn fuse(
        t: f64,
        regime: Regime,
        forecast: Option<&ModelForecast>,
    ) -> SignalResult {
        synthesize(
            &tech(t),
            &snapshot(),
            &state(regime),
            forecast,
            &ScoreConfig::default(),
            &ModelConfig::default(),
        )
    }

    #[test]
    fn neutral_everything_is_hold() {
        let s = fuse(50.0, Regime::Sideways, None);
        assert_eq!(s.class, SignalClass::Hold);
        assert!((s.model_score - 50.0).abs() < 1e-9);
        assert!((s.combined_score - 50.0).abs() < 1e-9);
        assert!(!s.metadata.model_fused);
    }

    #[test]
    fn strong_technicals_drive_buy() {
        // T=90, M=50, R for TRENDING_UP with strength 28 = 58.4.
        let s = fuse(90.0, Regime::TrendingUp, None);
        let expected = (0.5 * 90.0 + 0.3 * 50.0 + 0.2 * 58.4) / 1.0;
        assert!((s.combined_score - expected).abs() < 1e-9);
        assert_eq!(s.class, SignalClass::Buy);
    }

    #[test]
    fn forecast_below_threshold_is_not_fused() {
        let f = ModelForecast {
            score_long: 0.9,
            score_short: 0.05,
            confidence: 0.3, // below confidence_threshold 0.6
        };
        let s = fuse(55.0, Regime::Sideways, Some(&f));
        assert!(!s.metadata.model_fused);
        assert!((s.model_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_fusion_math() {
        // long=0.9, short=0.05 -> target = 50 + 50*0.85 = 92.5.
        // alpha = clamp(0.7, 0.2, 0.8) capped by alpha_max 0.6 -> 0.6.
        // M' = 50*0.4 + 92.5*0.6 = 75.5.
        let f = ModelForecast {
            score_long: 0.9,
            score_short: 0.05,
            confidence: 0.7,
        };
        let s = fuse(55.0, Regime::Sideways, Some(&f));
        assert!(s.metadata.model_fused);
        assert!((s.metadata.alpha.unwrap() - 0.6).abs() < 1e-12);
        assert!((s.model_score - 75.5).abs() < 1e-9);
    }

    #[test]
    fn confident_model_overrides_class() {
        // The combined score stays HOLD-ish, but confidence 0.85 exceeds the
        // override threshold and forces the model class BUY.
        let f = ModelForecast {
            score_long: 0.9,
            score_short: 0.05,
            confidence: 0.85,
        };
        let s = fuse(55.0, Regime::Sideways, Some(&f));
        assert_eq!(s.class, SignalClass::Buy);
        assert!(s.metadata.class_overridden);
        assert!(s.metadata.model_fused);
        // alpha capped by alpha_max.
        assert!((s.metadata.alpha.unwrap() - 0.6).abs() < 1e-12);
        assert!((s.confidence - 0.85).abs() < 1e-12);
    }

    #[test]
    fn override_caps_a_strong_score_at_the_model_class() {
        let f = ModelForecast {
            score_long: 0.95,
            score_short: 0.02,
            confidence: 0.9,
        };
        // Technicals argue STRONG_BUY on their own, but the override pins the
        // class to the model's plain BUY.
        let s = fuse(95.0, Regime::TrendingUp, Some(&f));
        assert_eq!(s.class, SignalClass::Buy);
    }

    #[test]
    fn disagreement_penalty_applies() {
        // Technicals bearish (T=30), model strongly bullish and confident.
        let f = ModelForecast {
            score_long: 0.9,
            score_short: 0.05,
            confidence: 0.7,
        };
        let with = fuse(30.0, Regime::Sideways, Some(&f));
        assert!(with.metadata.penalty >= 6.0);
        assert!(with.metadata.penalty <= 12.0);

        let without = fuse(30.0, Regime::Sideways, None);
        assert!((without.metadata.penalty - 0.0).abs() < 1e-12);
    }

    #[test]
    fn regime_score_trending_down_leans_bearish() {
        let s = fuse(50.0, Regime::TrendingDown, None);
        assert!(s.regime_score < 50.0);
    }

    #[test]
    fn hot_volatility_flattens_regime_score() {
        let mut st = state(Regime::TrendingUp);
        st.volatility = VolatilityLevel::Extreme;
        let s = synthesize(
            &tech(50.0),
            &snapshot(),
            &st,
            None,
            &ScoreConfig::default(),
            &ModelConfig::default(),
        );
        // 50 + 28*0.3*0.8 = 56.72 vs the undamped 58.4.
        assert!((s.regime_score - 56.72).abs() < 1e-9);
    }

    #[test]
    fn mtf_multipliers() {
        let mut st = state(Regime::Sideways);
        st.mtf_agreement = 0.2;
        let s = synthesize(
            &tech(50.0),
            &snapshot(),
            &st,
            None,
            &ScoreConfig::default(),
            &ModelConfig::default(),
        );
        assert!((s.size_multiplier - 0.8).abs() < 1e-12);
        assert!((s.strength_multiplier - 0.95).abs() < 1e-12);

        st.mtf_agreement = 0.9;
        let s = synthesize(
            &tech(50.0),
            &snapshot(),
            &st,
            None,
            &ScoreConfig::default(),
            &ModelConfig::default(),
        );
        assert!((s.size_multiplier - 1.1).abs() < 1e-12);
        assert!((s.strength_multiplier - 1.03).abs() < 1e-12);
    }

    #[test]
    fn neutral_forecast_never_fuses() {
        let f = ModelForecast::neutral();
        let s = fuse(60.0, Regime::Sideways, Some(&f));
        assert!(!s.metadata.model_fused);
        assert_eq!(s.metadata.alpha, None);
    }
}
