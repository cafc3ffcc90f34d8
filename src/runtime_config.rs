// =============================================================================
// Engine Configuration — explicit record of every recognized option
// =============================================================================
//
// Central configuration hub for the Borealis engine. Every tunable parameter
// lives here; unknown options are rejected at load (`deny_unknown_fields` on
// every section) so that a typo in the config file surfaces at startup
// instead of silently falling back to a default.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// Validation failures are `ConfigInvalid` and fatal at startup only.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::EngineError;
use crate::types::Interval;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "ETHUSDT".to_string()
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_secondary_intervals() -> Vec<String> {
    vec!["5m".to_string(), "15m".to_string()]
}

fn default_kline_limit() -> usize {
    200
}

fn default_account_equity() -> f64 {
    10_000.0
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_ema_fast() -> usize {
    9
}

fn default_ema_slow() -> usize {
    21
}

fn default_ema_trend() -> usize {
    55
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_k() -> f64 {
    2.0
}

fn default_keltner_period() -> usize {
    20
}

fn default_keltner_k() -> f64 {
    1.5
}

fn default_atr_period() -> usize {
    14
}

fn default_adx_period() -> usize {
    14
}

fn default_adx_min() -> f64 {
    20.0
}

fn default_adx_strong() -> f64 {
    25.0
}

fn default_kdj_period() -> usize {
    9
}

fn default_williams_period() -> usize {
    14
}

fn default_volume_sma_period() -> usize {
    20
}

fn default_obv_slope_window() -> usize {
    20
}

fn default_atr_percentile_window() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_weight_technical() -> f64 {
    0.5
}

fn default_weight_model() -> f64 {
    0.3
}

fn default_weight_regime() -> f64 {
    0.2
}

fn default_macd_magnitude_threshold() -> f64 {
    0.001
}

fn default_min_volume_ratio() -> f64 {
    0.8
}

fn default_min_obv_slope() -> f64 {
    0.0
}

fn default_min_atr_pct() -> f64 {
    0.1
}

fn default_model_timeout_ms() -> u64 {
    1_200
}

fn default_model_confidence_threshold() -> f64 {
    0.6
}

fn default_model_direction_threshold() -> f64 {
    0.62
}

fn default_alpha_max() -> f64 {
    0.6
}

fn default_override_confidence() -> f64 {
    0.7
}

fn default_min_trend_strength() -> f64 {
    20.0
}

fn default_min_combined_long() -> f64 {
    62.0
}

fn default_min_combined_short() -> f64 {
    62.0
}

fn default_bollinger_long_max() -> f64 {
    0.35
}

fn default_bollinger_short_min() -> f64 {
    0.65
}

fn default_min_mtf_agreement() -> f64 {
    0.5
}

fn default_ev_threshold() -> f64 {
    0.0
}

fn default_commission() -> f64 {
    0.0004
}

fn default_slippage() -> f64 {
    0.0005
}

fn default_base_win_rate() -> f64 {
    0.5
}

fn default_fgi_low() -> f64 {
    10.0
}

fn default_fgi_high() -> f64 {
    90.0
}

fn default_funding_rate_cap() -> f64 {
    0.0075
}

fn default_base_position_fraction() -> f64 {
    0.10
}

fn default_max_position_fraction() -> f64 {
    0.30
}

fn default_stop_loss_pct() -> f64 {
    0.01
}

fn default_take_profit_pct() -> f64 {
    0.014
}

fn default_leverage() -> u32 {
    10
}

fn default_tp_weights() -> [f64; 3] {
    [0.5, 0.3, 0.2]
}

fn default_analysis_interval_secs() -> u64 {
    30
}

fn default_label_poll_secs() -> u64 {
    60
}

fn default_label_horizon_min() -> i64 {
    60
}

fn default_max_holding_hours() -> f64 {
    24.0
}

fn default_min_holding_minutes() -> f64 {
    30.0
}

fn default_daily_loss_limit() -> f64 {
    200.0
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_trailing_pct() -> f64 {
    0.5
}

// =============================================================================
// Sections
// =============================================================================

/// Indicator look-back periods and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_ema_trend")]
    pub ema_trend: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_k")]
    pub bollinger_k: f64,
    #[serde(default = "default_keltner_period")]
    pub keltner_period: usize,
    #[serde(default = "default_keltner_k")]
    pub keltner_k: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    /// ADX below this dampens trend contributions in the technical score.
    #[serde(default = "default_adx_min")]
    pub adx_min: f64,
    /// ADX at or above this counts as a strong trend for regime detection.
    #[serde(default = "default_adx_strong")]
    pub adx_strong: f64,
    #[serde(default = "default_kdj_period")]
    pub kdj_period: usize,
    #[serde(default = "default_williams_period")]
    pub williams_period: usize,
    #[serde(default = "default_volume_sma_period")]
    pub volume_sma_period: usize,
    #[serde(default = "default_obv_slope_window")]
    pub obv_slope_window: usize,
    /// Rolling window of ATR values over which the percentile is taken.
    #[serde(default = "default_atr_percentile_window")]
    pub atr_percentile_window: usize,
    /// When true (default) only closed candles feed the indicator engine.
    #[serde(default = "default_true")]
    pub use_closed_only: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            ema_trend: default_ema_trend(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            bollinger_period: default_bollinger_period(),
            bollinger_k: default_bollinger_k(),
            keltner_period: default_keltner_period(),
            keltner_k: default_keltner_k(),
            atr_period: default_atr_period(),
            adx_period: default_adx_period(),
            adx_min: default_adx_min(),
            adx_strong: default_adx_strong(),
            kdj_period: default_kdj_period(),
            williams_period: default_williams_period(),
            volume_sma_period: default_volume_sma_period(),
            obv_slope_window: default_obv_slope_window(),
            atr_percentile_window: default_atr_percentile_window(),
            use_closed_only: true,
        }
    }
}

/// Fusion weights and optional technical-score contributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreConfig {
    #[serde(default = "default_weight_technical")]
    pub weight_technical: f64,
    #[serde(default = "default_weight_model")]
    pub weight_model: f64,
    #[serde(default = "default_weight_regime")]
    pub weight_regime: f64,
    /// MACD histogram magnitude above which the larger contribution applies.
    #[serde(default = "default_macd_magnitude_threshold")]
    pub macd_magnitude_threshold: f64,
    /// Enable the KDJ contribution (±8).
    #[serde(default)]
    pub enable_kdj: bool,
    /// Enable the Williams %R contribution (±6).
    #[serde(default)]
    pub enable_williams: bool,
    /// Volume ratio below this dampens trend contributions.
    #[serde(default = "default_min_volume_ratio")]
    pub min_volume_ratio: f64,
    /// OBV slope below this dampens trend contributions.
    #[serde(default = "default_min_obv_slope")]
    pub min_obv_slope: f64,
    /// ATR as a percentage of price below this dampens trend contributions.
    #[serde(default = "default_min_atr_pct")]
    pub min_atr_pct: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            weight_technical: default_weight_technical(),
            weight_model: default_weight_model(),
            weight_regime: default_weight_regime(),
            macd_magnitude_threshold: default_macd_magnitude_threshold(),
            enable_kdj: false,
            enable_williams: false,
            min_volume_ratio: default_min_volume_ratio(),
            min_obv_slope: default_min_obv_slope(),
            min_atr_pct: default_min_atr_pct(),
        }
    }
}

/// External forecast model settings. The engine functions with `endpoint`
/// absent; all calls then resolve to the neutral forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
    /// Forecast confidence required before fusion applies.
    #[serde(default = "default_model_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Directional score (long or short) required before fusion applies.
    #[serde(default = "default_model_direction_threshold")]
    pub direction_threshold: f64,
    /// Upper cap on the fusion blend factor alpha.
    #[serde(default = "default_alpha_max")]
    pub alpha_max: f64,
    /// Model confidence above which the model class overrides the
    /// score-derived class.
    #[serde(default = "default_override_confidence")]
    pub override_confidence: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_model_timeout_ms(),
            confidence_threshold: default_model_confidence_threshold(),
            direction_threshold: default_model_direction_threshold(),
            alpha_max: default_alpha_max(),
            override_confidence: default_override_confidence(),
        }
    }
}

/// Entry filters and the EV / regime gates.
///
/// The transaction cost `2 * (commission + slippage)` is subtracted inside
/// the expected return; `ev_threshold` is therefore cost-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default = "default_min_trend_strength")]
    pub min_trend_strength: f64,
    #[serde(default = "default_min_combined_long")]
    pub min_combined_strength_long: f64,
    #[serde(default = "default_min_combined_short")]
    pub min_combined_strength_short: f64,
    #[serde(default)]
    pub allow_high_volatility_entries: bool,
    /// LONG entries require Bollinger position at or below this.
    #[serde(default = "default_bollinger_long_max")]
    pub bollinger_long_max: f64,
    /// SHORT entries require Bollinger position at or above this.
    #[serde(default = "default_bollinger_short_min")]
    pub bollinger_short_min: f64,
    #[serde(default = "default_true")]
    pub enable_mtf_filter: bool,
    #[serde(default = "default_min_mtf_agreement")]
    pub min_mtf_agreement: f64,
    #[serde(default = "default_ev_threshold")]
    pub ev_threshold: f64,
    /// Taker commission as a fraction of notional per side.
    #[serde(default = "default_commission")]
    pub commission: f64,
    /// Modeled slippage as a fraction of notional per side.
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    /// Baseline win probability before the confidence adjustment.
    #[serde(default = "default_base_win_rate")]
    pub base_win_rate: f64,
    /// FGI at or below this rejects new entries.
    #[serde(default = "default_fgi_low")]
    pub fgi_low: f64,
    /// FGI at or above this rejects new entries.
    #[serde(default = "default_fgi_high")]
    pub fgi_high: f64,
    /// |funding rate| above this rejects new entries.
    #[serde(default = "default_funding_rate_cap")]
    pub funding_rate_cap: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_trend_strength: default_min_trend_strength(),
            min_combined_strength_long: default_min_combined_long(),
            min_combined_strength_short: default_min_combined_short(),
            allow_high_volatility_entries: false,
            bollinger_long_max: default_bollinger_long_max(),
            bollinger_short_min: default_bollinger_short_min(),
            enable_mtf_filter: true,
            min_mtf_agreement: default_min_mtf_agreement(),
            ev_threshold: default_ev_threshold(),
            commission: default_commission(),
            slippage: default_slippage(),
            base_win_rate: default_base_win_rate(),
            fgi_low: default_fgi_low(),
            fgi_high: default_fgi_high(),
            funding_rate_cap: default_funding_rate_cap(),
        }
    }
}

/// Position sizing, leverage and stop/target placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    /// Base position size as a fraction of equity, before multipliers.
    #[serde(default = "default_base_position_fraction")]
    pub base_position_fraction: f64,
    /// Hard ceiling on the position fraction after all multipliers.
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,
    /// Stop-loss distance. Values > 1 are treated as percent (1.5 == 1.5%),
    /// values <= 1 as a fraction (0.01 == 1%), normalized at use.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Policy take-profit distance (becomes TP2). Same normalization as the
    /// stop loss.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Default leverage; derived leverage always clamps to [3, 20].
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Fractions of the original size taken at TP1/TP2/TP3. Must sum to 1.
    #[serde(default = "default_tp_weights")]
    pub tp_weights: [f64; 3],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_position_fraction: default_base_position_fraction(),
            max_position_fraction: default_max_position_fraction(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            leverage: default_leverage(),
            tp_weights: default_tp_weights(),
        }
    }
}

/// Loop periods, holding-time exits and the daily-loss circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Analysis loop period in seconds. Enforced minimum of 10.
    #[serde(default = "default_analysis_interval_secs")]
    pub analysis_interval_secs: u64,
    #[serde(default = "default_label_poll_secs")]
    pub label_poll_secs: u64,
    /// Labeling horizon in minutes.
    #[serde(default = "default_label_horizon_min")]
    pub label_horizon_min: i64,
    #[serde(default = "default_max_holding_hours")]
    pub max_holding_hours: f64,
    #[serde(default = "default_min_holding_minutes")]
    pub min_holding_minutes: f64,
    /// Cumulative realized loss for the local day at which new opens stop.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: default_analysis_interval_secs(),
            label_poll_secs: default_label_poll_secs(),
            label_horizon_min: default_label_horizon_min(),
            max_holding_hours: default_max_holding_hours(),
            min_holding_minutes: default_min_holding_minutes(),
            daily_loss_limit: default_daily_loss_limit(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

/// Optional trailing stop. Off by default; when enabled the trailing price
/// feeds the position's stop through the monotonic SL guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Trail distance as a percent of the peak price.
    #[serde(default = "default_trailing_pct")]
    pub pct: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pct: default_trailing_pct(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Borealis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Primary analysis interval ("1h" and "1H" are equivalent).
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Secondary intervals for multi-timeframe agreement.
    #[serde(default = "default_secondary_intervals")]
    pub secondary_intervals: Vec<String>,
    /// Candles requested per kline fetch.
    #[serde(default = "default_kline_limit")]
    pub kline_limit: usize,
    /// Simulated account equity used for notional sizing.
    #[serde(default = "default_account_equity")]
    pub account_equity: f64,

    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub trailing: TrailingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            secondary_intervals: default_secondary_intervals(),
            kline_limit: default_kline_limit(),
            account_equity: default_account_equity(),
            indicators: IndicatorConfig::default(),
            score: ScoreConfig::default(),
            model: ModelConfig::default(),
            gates: GateConfig::default(),
            risk: RiskConfig::default(),
            schedule: ScheduleConfig::default(),
            trailing: TrailingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`. Unknown fields anywhere
    /// in the document are a parse error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialize engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Validate the loaded configuration. Any failure here is fatal at
    /// startup.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.primary_interval()?;
        for iv in &self.secondary_intervals {
            Interval::parse(iv)?;
        }

        if self.symbol.trim().is_empty() {
            return Err(EngineError::ConfigInvalid("symbol must not be empty".into()));
        }
        if self.account_equity <= 0.0 {
            return Err(EngineError::ConfigInvalid(
                "account_equity must be positive".into(),
            ));
        }

        let ind = &self.indicators;
        for (name, period) in [
            ("rsi_period", ind.rsi_period),
            ("ema_fast", ind.ema_fast),
            ("ema_slow", ind.ema_slow),
            ("ema_trend", ind.ema_trend),
            ("macd_fast", ind.macd_fast),
            ("macd_slow", ind.macd_slow),
            ("macd_signal", ind.macd_signal),
            ("bollinger_period", ind.bollinger_period),
            ("keltner_period", ind.keltner_period),
            ("atr_period", ind.atr_period),
            ("adx_period", ind.adx_period),
            ("kdj_period", ind.kdj_period),
            ("williams_period", ind.williams_period),
            ("volume_sma_period", ind.volume_sma_period),
        ] {
            if period == 0 {
                return Err(EngineError::ConfigInvalid(format!("{name} must be >= 1")));
            }
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(EngineError::ConfigInvalid(
                "macd_fast must be smaller than macd_slow".into(),
            ));
        }
        if ind.rsi_oversold >= ind.rsi_overbought {
            return Err(EngineError::ConfigInvalid(
                "rsi_oversold must be below rsi_overbought".into(),
            ));
        }

        let w = &self.score;
        if w.weight_technical + w.weight_model + w.weight_regime <= 0.0 {
            return Err(EngineError::ConfigInvalid(
                "fusion weights must sum to a positive value".into(),
            ));
        }

        let g = &self.gates;
        if g.fgi_low >= g.fgi_high {
            return Err(EngineError::ConfigInvalid(
                "fgi_low must be below fgi_high".into(),
            ));
        }
        if g.commission < 0.0 || g.slippage < 0.0 {
            return Err(EngineError::ConfigInvalid(
                "commission and slippage must be non-negative".into(),
            ));
        }

        let r = &self.risk;
        if r.base_position_fraction <= 0.0 || r.max_position_fraction <= 0.0 {
            return Err(EngineError::ConfigInvalid(
                "position fractions must be positive".into(),
            ));
        }
        if r.stop_loss_pct <= 0.0 || r.take_profit_pct <= 0.0 {
            return Err(EngineError::ConfigInvalid(
                "stop_loss_pct and take_profit_pct must be positive".into(),
            ));
        }
        let tp_sum: f64 = r.tp_weights.iter().sum();
        if (tp_sum - 1.0).abs() > 1e-9 {
            return Err(EngineError::ConfigInvalid(format!(
                "tp_weights must sum to 1.0, got {tp_sum}"
            )));
        }

        if self.schedule.label_horizon_min <= 0 {
            return Err(EngineError::ConfigInvalid(
                "label_horizon_min must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Parsed primary interval.
    pub fn primary_interval(&self) -> Result<Interval, EngineError> {
        Interval::parse(&self.interval)
    }

    /// Parsed secondary intervals (invalid entries were rejected by
    /// `validate`).
    pub fn parsed_secondary_intervals(&self) -> Vec<Interval> {
        self.secondary_intervals
            .iter()
            .filter_map(|s| Interval::parse(s).ok())
            .collect()
    }

    /// Analysis loop period with the 10 s floor applied.
    pub fn analysis_period_secs(&self) -> u64 {
        self.schedule.analysis_interval_secs.max(10)
    }

    /// Round-trip transaction cost as a fraction of notional.
    pub fn round_trip_cost(&self) -> f64 {
        2.0 * (self.gates.commission + self.gates.slippage)
    }
}

/// Normalize a stop/target distance that may be expressed as percent (> 1)
/// or as a fraction (<= 1) into a fraction.
pub fn normalize_pct(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.primary_interval().unwrap(), Interval::H1);
        assert_eq!(cfg.risk.leverage, 10);
        assert!((cfg.risk.tp_weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(cfg.analysis_period_secs(), 30);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.indicators.rsi_period, 14);
        assert!((cfg.gates.ev_threshold - 0.0).abs() < f64::EPSILON);
        assert!(!cfg.trailing.enabled);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let json = r#"{ "symbol": "ETHUSDT", "turbo_mode": true }"#;
        assert!(serde_json::from_str::<EngineConfig>(json).is_err());

        let nested = r#"{ "risk": { "leverage": 10, "yolo": 1 } }"#;
        assert!(serde_json::from_str::<EngineConfig>(nested).is_err());
    }

    #[test]
    fn uppercase_interval_accepted() {
        let json = r#"{ "interval": "1H" }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.primary_interval().unwrap(), Interval::H1);
    }

    #[test]
    fn invalid_tp_weights_rejected() {
        let json = r#"{ "risk": { "tp_weights": [0.5, 0.4, 0.2] } }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_interval_rejected() {
        let json = r#"{ "interval": "3h" }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn analysis_period_floor() {
        let json = r#"{ "schedule": { "analysis_interval_secs": 3 } }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.analysis_period_secs(), 10);
    }

    #[test]
    fn normalize_pct_both_forms() {
        assert!((normalize_pct(1.0) - 1.0).abs() < f64::EPSILON); // fraction boundary
        assert!((normalize_pct(1.5) - 0.015).abs() < 1e-12); // percent
        assert!((normalize_pct(0.01) - 0.01).abs() < 1e-12); // fraction
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.risk.leverage, cfg2.risk.leverage);
        assert_eq!(cfg.schedule.label_horizon_min, cfg2.schedule.label_horizon_min);
    }

    #[test]
    fn round_trip_cost() {
        let cfg = EngineConfig::default();
        assert!((cfg.round_trip_cost() - 0.0018).abs() < 1e-12);
    }
}
