// =============================================================================
// Market-State Classifier
// =============================================================================
//
// Classifies each indicator snapshot into one of seven regimes, labels
// liquidity, measures multi-timeframe agreement, and maintains a transition
// probability distribution over the regimes.
//
// Classification rules (evaluated top-to-bottom; first match wins):
//
//   1. TRENDING_UP / TRENDING_DOWN — ADX >= strong threshold and the EMA
//      ordering plus MACD histogram sign agree on a direction.
//   2. BREAKOUT    — extreme/high volatility and (a squeeze just released or
//                    price breached a Bollinger band edge).
//   3. HIGH_VOLATILITY — extreme/high volatility otherwise.
//   4. LOW_VOLATILITY  — volatility bucket LOW.
//   5. REVERSAL    — RSI extreme combined with a MACD divergence or a
//                    multi-timeframe conflict.
//   6. SIDEWAYS    — everything else.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::adx::AdxTrend;
use crate::indicators::IndicatorSnapshot;
use crate::runtime_config::IndicatorConfig;
use crate::types::{LiquidityLabel, VolatilityLevel};

// =============================================================================
// Types
// =============================================================================

/// High-level market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Sideways,
    HighVolatility,
    LowVolatility,
    Breakout,
    Reversal,
}

impl Regime {
    pub const ALL: [Regime; 7] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Sideways,
        Regime::HighVolatility,
        Regime::LowVolatility,
        Regime::Breakout,
        Regime::Reversal,
    ];

    fn index(self) -> usize {
        match self {
            Self::TrendingUp => 0,
            Self::TrendingDown => 1,
            Self::Sideways => 2,
            Self::HighVolatility => 3,
            Self::LowVolatility => 4,
            Self::Breakout => 5,
            Self::Reversal => 6,
        }
    }

    pub fn is_trending(self) -> bool {
        matches!(self, Self::TrendingUp | Self::TrendingDown)
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "TRENDING_UP"),
            Self::TrendingDown => write!(f, "TRENDING_DOWN"),
            Self::Sideways => write!(f, "SIDEWAYS"),
            Self::HighVolatility => write!(f, "HIGH_VOLATILITY"),
            Self::LowVolatility => write!(f, "LOW_VOLATILITY"),
            Self::Breakout => write!(f, "BREAKOUT"),
            Self::Reversal => write!(f, "REVERSAL"),
        }
    }
}

/// Direction derived from a single timeframe, used for MTF agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Sideways,
}

/// Probability assigned to one regime in the transition distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeProbability {
    pub regime: Regime,
    pub probability: f64,
}

/// Complete classifier output for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStateResult {
    pub regime: Regime,
    pub adx_trend: AdxTrend,
    /// Trend strength (ADX) carried for gates and the regime score.
    pub trend_strength: f64,
    pub atr_percentile: f64,
    pub volatility: VolatilityLevel,
    pub liquidity: LiquidityLabel,
    /// Fraction of secondary timeframes agreeing with the modal direction.
    pub mtf_agreement: f64,
    pub transition_probabilities: Vec<RegimeProbability>,
}

// =============================================================================
// Classifier
// =============================================================================

/// Thread-safe classifier that remembers the previous squeeze flag (for
/// squeeze-release detection) and caches the latest result.
pub struct MarketStateClassifier {
    config: IndicatorConfig,
    prev_squeeze: RwLock<Option<bool>>,
    state: RwLock<Option<MarketStateResult>>,
}

impl MarketStateClassifier {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            prev_squeeze: RwLock::new(None),
            state: RwLock::new(None),
        }
    }

    /// Classify the current snapshot. `mtf_directions` holds the per-secondary-
    /// timeframe directions; `spread_bps` is the current quote spread in
    /// basis points (0 when unknown).
    pub fn classify(
        &self,
        snap: &IndicatorSnapshot,
        mtf_directions: &[Direction],
        spread_bps: f64,
    ) -> MarketStateResult {
        let mtf_agreement = mtf_agreement(mtf_directions);
        let squeeze_released =
            matches!(*self.prev_squeeze.read(), Some(true)) && !snap.squeeze;
        *self.prev_squeeze.write() = Some(snap.squeeze);

        let regime = self.classify_regime(snap, mtf_agreement, squeeze_released);
        let liquidity = liquidity_label(snap.volume_ratio, spread_bps);
        let transition_probabilities =
            transition_distribution(regime, snap.adx_trend, mtf_agreement);

        let result = MarketStateResult {
            regime,
            adx_trend: snap.adx_trend,
            trend_strength: snap.adx,
            atr_percentile: snap.atr_percentile,
            volatility: snap.volatility,
            liquidity,
            mtf_agreement,
            transition_probabilities,
        };

        debug!(
            regime = %regime,
            adx = format!("{:.1}", snap.adx),
            volatility = %snap.volatility,
            liquidity = %liquidity,
            agreement = format!("{:.2}", mtf_agreement),
            "market state classified"
        );

        *self.state.write() = Some(result.clone());
        result
    }

    /// The most recent classification without recomputing.
    pub fn current(&self) -> Option<MarketStateResult> {
        self.state.read().clone()
    }

    fn classify_regime(
        &self,
        snap: &IndicatorSnapshot,
        mtf_agreement: f64,
        squeeze_released: bool,
    ) -> Regime {
        let c = &self.config;

        // 1. Strong trend with an agreed direction.
        if snap.adx >= c.adx_strong {
            match price_trend(snap) {
                Direction::Up => return Regime::TrendingUp,
                Direction::Down => return Regime::TrendingDown,
                Direction::Sideways => {}
            }
        }

        let hot = matches!(
            snap.volatility,
            VolatilityLevel::High | VolatilityLevel::Extreme
        );

        // 2. Breakout: expansion out of compression or through a band edge.
        if hot {
            let band_breach = snap.price > snap.boll_upper || snap.price < snap.boll_lower;
            if squeeze_released || band_breach {
                return Regime::Breakout;
            }
            // 3. Hot but directionless.
            return Regime::HighVolatility;
        }

        // 4. Compression.
        if snap.volatility == VolatilityLevel::Low {
            return Regime::LowVolatility;
        }

        // 5. Exhaustion: RSI extreme plus divergence or timeframe conflict.
        let rsi_extreme = snap.rsi >= c.rsi_overbought || snap.rsi <= c.rsi_oversold;
        if rsi_extreme {
            let macd_divergence = (snap.rsi >= c.rsi_overbought && snap.macd_histogram < 0.0)
                || (snap.rsi <= c.rsi_oversold && snap.macd_histogram > 0.0);
            let mtf_conflict = mtf_agreement < 0.4;
            if macd_divergence || mtf_conflict {
                return Regime::Reversal;
            }
        }

        Regime::Sideways
    }
}

// =============================================================================
// Components
// =============================================================================

/// Direction from EMA ordering confirmed by the MACD histogram sign.
pub fn price_trend(snap: &IndicatorSnapshot) -> Direction {
    if snap.ema_fast > snap.ema_slow && snap.macd_histogram > 0.0 {
        Direction::Up
    } else if snap.ema_fast < snap.ema_slow && snap.macd_histogram < 0.0 {
        Direction::Down
    } else {
        Direction::Sideways
    }
}

/// Direction of a secondary timeframe from its closes: fast vs slow EMA with
/// MACD-histogram confirmation, the same recipe as the primary trend.
pub fn direction_from_closes(closes: &[f64], config: &IndicatorConfig) -> Direction {
    use crate::indicators::ema::last_ema;
    use crate::indicators::macd::macd;

    let (Some(fast), Some(slow)) = (
        last_ema(closes, config.ema_fast),
        last_ema(closes, config.ema_slow),
    ) else {
        return Direction::Sideways;
    };

    let hist = macd(closes, config.macd_fast, config.macd_slow, config.macd_signal)
        .map(|m| m.histogram)
        .unwrap_or(0.0);

    if fast > slow && hist > 0.0 {
        Direction::Up
    } else if fast < slow && hist < 0.0 {
        Direction::Down
    } else {
        Direction::Sideways
    }
}

/// Agreement = (count of the modal direction) / K. An empty set is fully
/// agreed by convention (no conflicting information).
pub fn mtf_agreement(directions: &[Direction]) -> f64 {
    if directions.is_empty() {
        return 1.0;
    }
    let count = |d: Direction| directions.iter().filter(|&&x| x == d).count();
    let modal = count(Direction::Up)
        .max(count(Direction::Down))
        .max(count(Direction::Sideways));
    modal as f64 / directions.len() as f64
}

/// Liquidity score from volume ratio and spread: a high relative volume with
/// a tight spread scores high. Cutoffs >= 4 HIGH, >= 2 MEDIUM, >= 1 LOW,
/// else ILLIQUID.
pub fn liquidity_label(volume_ratio: f64, spread_bps: f64) -> LiquidityLabel {
    let score = volume_ratio * 2.0 - (spread_bps / 10.0).max(0.0);
    if score >= 4.0 {
        LiquidityLabel::High
    } else if score >= 2.0 {
        LiquidityLabel::Medium
    } else if score >= 1.0 {
        LiquidityLabel::Low
    } else {
        LiquidityLabel::Illiquid
    }
}

/// Transition distribution over the seven regimes: uniform seed, trending
/// regimes boosted x1.5 while ADX is strengthening, the current regime
/// reinforced x2 when MTF agreement exceeds 0.8, then renormalized.
pub fn transition_distribution(
    current: Regime,
    adx_trend: AdxTrend,
    mtf_agreement: f64,
) -> Vec<RegimeProbability> {
    let mut probs = [1.0 / 7.0; 7];

    if adx_trend == AdxTrend::Strengthening {
        probs[Regime::TrendingUp.index()] *= 1.5;
        probs[Regime::TrendingDown.index()] *= 1.5;
    }
    if mtf_agreement > 0.8 {
        probs[current.index()] *= 2.0;
    }

    let total: f64 = probs.iter().sum();
    Regime::ALL
        .iter()
        .zip(probs.iter())
        .map(|(&regime, &p)| RegimeProbability {
            regime,
            probability: p / total,
        })
        .collect()
}
