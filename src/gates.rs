// =============================================================================
// Entry Gates — ordered filters between a signal and a new position
// =============================================================================
//
// Every filter must pass for an opening recommendation; the first failure
// wins and its reason is reported (and ends up in the analysis metadata).
//
// Order: trend, strength, volatility, Bollinger, MTF, expected value,
// regime (FGI / funding). The EV gate subtracts the round-trip transaction
// cost inside the expected return; the configured threshold is cost-free.
// =============================================================================

use tracing::debug;

use crate::indicators::IndicatorSnapshot;
use crate::market_state::{MarketStateResult, Regime};
use crate::runtime_config::{normalize_pct, EngineConfig};
use crate::types::{MarketTick, Side, VolatilityLevel};

/// Outcome of the expected-value computation, kept for metadata and tests.
#[derive(Debug, Clone, Copy)]
pub struct EvBreakdown {
    pub p_win: f64,
    pub expected_return: f64,
    pub threshold: f64,
}

/// Win probability from the base rate shifted by confidence, clipped to
/// [0.3, 0.9].
pub fn win_probability(base: f64, confidence: f64) -> f64 {
    (base + (confidence - 0.5) * 0.2).clamp(0.3, 0.9)
}

/// Expected value of an entry: `RR * pWin - (1 - pWin) - cost`, against a
/// threshold of `ev_threshold + 0.5 * min(ATR/price, 0.2)`.
pub fn expected_value(
    confidence: f64,
    snap: &IndicatorSnapshot,
    state: &MarketStateResult,
    config: &EngineConfig,
) -> EvBreakdown {
    let sl = normalize_pct(config.risk.stop_loss_pct);
    let tp = normalize_pct(config.risk.take_profit_pct);
    let rr = if sl > 0.0 { tp / sl } else { 0.0 };

    let p_win = win_probability(config.gates.base_win_rate, confidence);
    let cost = config.round_trip_cost();
    let expected_return = rr * p_win - (1.0 - p_win) - cost;

    let atr_frac = if snap.price > 0.0 {
        (snap.atr / snap.price).min(0.2)
    } else {
        0.0
    };
    let threshold = ev_threshold(state, config) + 0.5 * atr_frac;

    EvBreakdown {
        p_win,
        expected_return,
        threshold,
    }
}

/// Regime- and volatility-dependent EV threshold. The base comes from
/// config; hostile contexts demand more edge.
fn ev_threshold(state: &MarketStateResult, config: &EngineConfig) -> f64 {
    let mut threshold = config.gates.ev_threshold;
    if state.regime == Regime::HighVolatility {
        threshold += 0.05;
    }
    if state.volatility == VolatilityLevel::Extreme {
        threshold += 0.05;
    }
    threshold
}

/// Run the entry filters for `side`. Returns `None` when the entry is
/// allowed, or `Some("Gate: reason")` for the first failing filter.
pub fn evaluate_entry(
    side: Side,
    combined: f64,
    confidence: f64,
    snap: &IndicatorSnapshot,
    state: &MarketStateResult,
    tick: &MarketTick,
    config: &EngineConfig,
) -> Option<String> {
    let g = &config.gates;

    // ── 1. Trend filter ─────────────────────────────────────────────────
    let against_trend = matches!(
        (side, state.regime),
        (Side::Long, Regime::TrendingDown) | (Side::Short, Regime::TrendingUp)
    );
    if against_trend {
        return block("Trend", format!("{side} against {} regime", state.regime));
    }
    if state.trend_strength < g.min_trend_strength {
        return block(
            "Trend",
            format!(
                "trend strength {:.1} below minimum {:.1}",
                state.trend_strength, g.min_trend_strength
            ),
        );
    }

    // ── 2. Strength filter ──────────────────────────────────────────────
    let min_strength = match side {
        Side::Long => g.min_combined_strength_long,
        Side::Short => g.min_combined_strength_short,
    };
    if combined < min_strength {
        return block(
            "Strength",
            format!("combined {combined:.1} below minimum {min_strength:.1}"),
        );
    }

    // ── 3. Volatility filter ────────────────────────────────────────────
    if state.regime == Regime::HighVolatility
        && !g.allow_high_volatility_entries
        && combined < min_strength + 10.0
    {
        return block(
            "Volatility",
            format!(
                "high-volatility regime requires combined >= {:.1}",
                min_strength + 10.0
            ),
        );
    }

    // ── 4. Bollinger filter ─────────────────────────────────────────────
    match side {
        Side::Long if snap.boll_position > g.bollinger_long_max => {
            return block(
                "Bollinger",
                format!(
                    "position {:.2} above long maximum {:.2}",
                    snap.boll_position, g.bollinger_long_max
                ),
            );
        }
        Side::Short if snap.boll_position < g.bollinger_short_min => {
            return block(
                "Bollinger",
                format!(
                    "position {:.2} below short minimum {:.2}",
                    snap.boll_position, g.bollinger_short_min
                ),
            );
        }
        _ => {}
    }
    if snap.squeeze && combined < min_strength + 10.0 {
        return block(
            "Bollinger",
            format!("squeeze requires combined >= {:.1}", min_strength + 10.0),
        );
    }

    // ── 5. MTF filter ───────────────────────────────────────────────────
    if g.enable_mtf_filter && state.mtf_agreement < g.min_mtf_agreement {
        return block(
            "MTF",
            format!(
                "agreement {:.2} below minimum {:.2}",
                state.mtf_agreement, g.min_mtf_agreement
            ),
        );
    }

    // ── 6. EV gate ──────────────────────────────────────────────────────
    let ev = expected_value(confidence, snap, state, config);
    if ev.expected_return < ev.threshold {
        return block(
            "ExpectedValue",
            format!(
                "expected return {:.3} below threshold {:.3} (pWin {:.2})",
                ev.expected_return, ev.threshold, ev.p_win
            ),
        );
    }

    // ── 7. Regime gate (sentiment / funding) ────────────────────────────
    if let Some(fgi) = tick.fgi {
        if fgi <= g.fgi_low || fgi >= g.fgi_high {
            return block("Regime", format!("FGI {fgi:.0} outside tradable band"));
        }
    }
    if let Some(funding) = tick.funding_rate {
        if funding.abs() > g.funding_rate_cap {
            return block(
                "Regime",
                format!(
                    "|funding| {:.4} above cap {:.4}",
                    funding.abs(),
                    g.funding_rate_cap
                ),
            );
        }
    }

    debug!(side = %side, combined, ev = ev.expected_return, "all entry gates passed");
    None
}

fn block(gate: &str, reason: String) -> Option<String> {
    let msg = format!("{gate}: {reason}");
    debug!(gate, %reason, "entry blocked");
    Some(msg)
}
