// =============================================================================
// Risk Plan — adaptive sizing, leverage and the layered TP ladder
// =============================================================================
//
// Sizing: base fraction x confidence, shaped by volatility (HIGH x0.7,
// LOW x1.2), trend strength (x1.1), extreme sentiment against the direction
// (x0.8), band approach (x0.85) and the MTF size multiplier, clamped to
// [0.01, max_position].
//
// Leverage: policy default, x0.8 on extreme sentiment, x0.9 in a squeeze,
// always clamped to [3, 20] — also when the configured value is out of range.
//
// Targets: the policy TP distance becomes TP2; TP1 sits at 0.6x the distance
// and TP3 at 1.2x, so TP1 < TP2 < TP3 away from entry by construction.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::market_state::MarketStateResult;
use crate::runtime_config::{normalize_pct, RiskConfig};
use crate::types::{Side, VolatilityLevel};

/// FGI below this counts as extreme fear, above (100 - this) extreme greed.
const FGI_EXTREME_BAND: f64 = 20.0;

/// Minimum position fraction after all multipliers.
const MIN_POSITION_FRACTION: f64 = 0.01;

/// Leverage bounds enforced regardless of configuration.
const LEVERAGE_FLOOR: u32 = 3;
const LEVERAGE_CEILING: u32 = 20;

/// A complete sizing and exit plan for a prospective entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPlan {
    /// Fraction of equity committed, in [0.01, max_position].
    pub position_fraction: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    /// Fractions of the original size taken at each target (sum 1).
    pub tp_weights: [f64; 3],
    pub risk_reward: f64,
    /// Worst-case loss at the stop for the committed notional.
    pub max_loss: f64,
}

/// Derive the full risk plan for an entry at `entry` on `side`.
pub fn build_risk_plan(
    side: Side,
    entry: f64,
    confidence: f64,
    size_multiplier: f64,
    snap: &IndicatorSnapshot,
    state: &MarketStateResult,
    fgi: Option<f64>,
    config: &RiskConfig,
    account_equity: f64,
) -> RiskPlan {
    // ── Sizing ──────────────────────────────────────────────────────────
    let mut fraction = config.base_position_fraction * confidence;

    match state.volatility {
        VolatilityLevel::High | VolatilityLevel::Extreme => fraction *= 0.7,
        VolatilityLevel::Low => fraction *= 1.2,
        VolatilityLevel::Medium => {}
    }
    if state.trend_strength >= 40.0 {
        fraction *= 1.1;
    }
    if fgi_against_direction(fgi, side) {
        fraction *= 0.8;
    }
    if band_approach(snap.boll_position, side) {
        fraction *= 0.85;
    }
    fraction *= size_multiplier;
    fraction = fraction.clamp(MIN_POSITION_FRACTION, config.max_position_fraction);

    // ── Leverage ────────────────────────────────────────────────────────
    let mut leverage = config.leverage as f64;
    if fgi_extreme(fgi) {
        leverage *= 0.8;
    }
    if snap.squeeze {
        leverage *= 0.9;
    }
    let leverage = (leverage.round() as i64)
        .clamp(LEVERAGE_FLOOR as i64, LEVERAGE_CEILING as i64) as u32;

    // ── Stops and targets ───────────────────────────────────────────────
    let sl_frac = normalize_pct(config.stop_loss_pct);
    let tp_frac = normalize_pct(config.take_profit_pct);
    let sign = side.sign();

    let stop_loss = entry * (1.0 - sign * sl_frac);
    let policy_tp = entry * (1.0 + sign * tp_frac);
    let d = (policy_tp - entry).abs();

    let take_profit_1 = entry + sign * 0.6 * d;
    let take_profit_2 = policy_tp;
    let take_profit_3 = entry + sign * 1.2 * d;

    let risk = (entry - stop_loss).abs();
    let risk_reward = if risk > 0.0 {
        (take_profit_2 - entry).abs() / risk
    } else {
        0.0
    };

    let max_loss = account_equity * fraction * sl_frac * leverage as f64;

    RiskPlan {
        position_fraction: fraction,
        leverage,
        stop_loss,
        take_profit_1,
        take_profit_2,
        take_profit_3,
        tp_weights: config.tp_weights,
        risk_reward,
        max_loss,
    }
}

/// Conservative fallback plan when indicators are unavailable: minimal size,
/// stops derived from the 24h range.
pub fn fallback_risk_plan(
    side: Side,
    entry: f64,
    high_24h: f64,
    low_24h: f64,
    config: &RiskConfig,
) -> RiskPlan {
    let range_frac = if entry > 0.0 && high_24h > low_24h {
        ((high_24h - low_24h) / entry / 4.0).clamp(0.005, 0.05)
    } else {
        normalize_pct(config.stop_loss_pct)
    };

    let sign = side.sign();
    let stop_loss = entry * (1.0 - sign * range_frac);
    let policy_tp = entry * (1.0 + sign * range_frac * 1.4);
    let d = (policy_tp - entry).abs();

    RiskPlan {
        position_fraction: MIN_POSITION_FRACTION,
        leverage: LEVERAGE_FLOOR,
        stop_loss,
        take_profit_1: entry + sign * 0.6 * d,
        take_profit_2: policy_tp,
        take_profit_3: entry + sign * 1.2 * d,
        tp_weights: config.tp_weights,
        risk_reward: 1.4,
        max_loss: 0.0,
    }
}

fn fgi_extreme(fgi: Option<f64>) -> bool {
    matches!(fgi, Some(v) if v <= FGI_EXTREME_BAND || v >= 100.0 - FGI_EXTREME_BAND)
}

/// Extreme sentiment leaning against the trade: euphoric greed under a long,
/// capitulating fear under a short.
fn fgi_against_direction(fgi: Option<f64>, side: Side) -> bool {
    match (fgi, side) {
        (Some(v), Side::Long) => v >= 100.0 - FGI_EXTREME_BAND,
        (Some(v), Side::Short) => v <= FGI_EXTREME_BAND,
        (None, _) => false,
    }
}

/// Entering while price already sits toward the adverse band edge.
fn band_approach(boll_position: f64, side: Side) -> bool {
    match side {
        Side::Long => boll_position >= 0.6,
        Side::Short => boll_position <= 0.4,
    }
}
