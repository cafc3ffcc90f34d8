// =============================================================================
// Analysis Loop — the periodic driver of the signal pipeline
// =============================================================================
//
// Single-owner loop. Each iteration runs the full pipeline to completion:
//
//   ticker -> candles -> indicators -> market state -> model forecast ->
//   fusion -> gates & risk -> position transitions -> publish & sample
//
// and reports eight progress milestones along the way. Network calls are the
// only suspension points. Errors within an iteration are caught by the loop,
// which continues after a back-off; a stop request is observed at the top of
// each pass and ends the loop after the current iteration.
//
// Degradation policy: `Unavailable` falls back to cached data within TTL or
// skips the iteration; `InsufficientData` publishes the neutral HOLD report
// (confidence 0.5, minimal size, stops from the 24h range) instead of
// failing. The latest analysis a caller sees is always well-formed.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::{ExchangeAdapter, ForecastRequest, ModelAdapter, SentimentAdapter};
use crate::app_state::AppState;
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::gates::evaluate_entry;
use crate::indicators::IndicatorSnapshot;
use crate::market_data::{Candle, CandleKey};
use crate::market_state::{direction_from_closes, Direction, MarketStateResult};
use crate::risk_plan::{build_risk_plan, fallback_risk_plan, RiskPlan};
use crate::runtime_config::EngineConfig;
use crate::samples::{build_sample, SampleDraft};
use crate::signal::{synthesize, technical_score, ModelForecast, SignalResult};
use crate::types::{Interval, MarketTick, Side, TradeAction};

/// The eight published milestones of one iteration.
const PROGRESS_STAGES: [&str; 8] = [
    "fetch-ticker",
    "fetch-klines",
    "indicators",
    "market-state",
    "model-forecast",
    "signal-fusion",
    "gates-risk",
    "publish",
];

/// Progress marker published to the 15 s cache and the event bus.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisProgress {
    pub stage: String,
    pub step: usize,
    pub total: usize,
    pub at_ms: i64,
}

/// The action the engine settled on this tick, with its reason.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub action: TradeAction,
    pub reason: String,
    pub confidence: f64,
}

/// Complete result of one analysis iteration.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub at_ms: i64,
    pub symbol: String,
    pub tick: MarketTick,
    pub snapshot: Option<IndicatorSnapshot>,
    pub market_state: Option<MarketStateResult>,
    pub signal: Option<SignalResult>,
    pub risk_plan: Option<RiskPlan>,
    pub recommendation: Recommendation,
    /// True when this is the neutral fallback produced on insufficient data.
    pub fallback: bool,
}

pub struct AnalysisEngine {
    state: Arc<AppState>,
    exchange: Arc<dyn ExchangeAdapter>,
    model: Option<Arc<dyn ModelAdapter>>,
    sentiment: Option<Arc<dyn SentimentAdapter>>,
}

impl AnalysisEngine {
    pub fn new(
        state: Arc<AppState>,
        exchange: Arc<dyn ExchangeAdapter>,
        model: Option<Arc<dyn ModelAdapter>>,
        sentiment: Option<Arc<dyn SentimentAdapter>>,
    ) -> Self {
        Self {
            state,
            exchange,
            model,
            sentiment,
        }
    }

    /// Request the loop to end after its current iteration. Idempotent.
    pub fn stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Run the analysis loop until stopped.
    pub async fn run(&self) {
        self.state.is_running.store(true, Ordering::SeqCst);
        info!("analysis loop started");

        loop {
            if self.state.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let now_ms = Utc::now().timestamp_millis();
            let (period_secs, backoff_secs) = {
                let config = self.state.config.read();
                (
                    config.analysis_period_secs(),
                    config.schedule.error_backoff_secs,
                )
            };

            match self.run_iteration(now_ms).await {
                Ok(report) => {
                    debug!(
                        action = %report.recommendation.action,
                        fallback = report.fallback,
                        "iteration complete"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "iteration failed — backing off");
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                }
            }

            tokio::time::sleep(Duration::from_secs(period_secs)).await;
        }

        self.state.is_running.store(false, Ordering::SeqCst);
        info!("analysis loop stopped");
    }

    /// One full pass of the pipeline.
    pub async fn run_iteration(&self, now_ms: i64) -> Result<AnalysisReport, EngineError> {
        let config = self.state.config.read().clone();
        let interval = config.primary_interval()?;
        let symbol = config.symbol.clone();

        // ── 1. Ticker (cached 30 s) ─────────────────────────────────────
        self.publish_progress(1, now_ms);
        let mut tick = match self.state.market_cache.get() {
            Some(cached) => cached,
            None => {
                let fresh = self.exchange.get_ticker(&symbol).await?;
                self.state.market_cache.put(fresh.clone());
                fresh
            }
        };
        self.enrich_tick(&mut tick, &symbol).await;

        // ── 2. Candles (cached 60 s per interval/limit) ─────────────────
        self.publish_progress(2, now_ms);
        let primary = self
            .fetch_klines(&symbol, interval, config.kline_limit)
            .await?;
        self.state
            .indicator_engine
            .write()
            .merge_batch(primary.clone());

        let mtf_directions = self.secondary_directions(&symbol, &config, now_ms).await;

        // ── 3. Indicators ───────────────────────────────────────────────
        self.publish_progress(3, now_ms);
        let snapshot_result = self.state.indicator_engine.write().snapshot(now_ms);
        let snapshot = match snapshot_result {
            Ok(s) => s,
            Err(EngineError::InsufficientData(why)) => {
                debug!(why = %why, "insufficient data — publishing neutral fallback");
                return Ok(self.publish_fallback(tick, &config, &why, now_ms).await);
            }
            Err(e) => return Err(e),
        };

        // ── 4. Market state ─────────────────────────────────────────────
        self.publish_progress(4, now_ms);
        let market_state = self.state.classifier.classify(&snapshot, &mtf_directions, 0.0);

        // ── 5. Model forecast (strict timeout, neutral on failure) ──────
        self.publish_progress(5, now_ms);
        let forecast = self.fetch_forecast(&symbol, interval, &primary, &config).await;

        // ── 6. Fusion ───────────────────────────────────────────────────
        self.publish_progress(6, now_ms);
        let technical = technical_score(&snapshot, &config.score, &config.indicators);
        let signal = synthesize(
            &technical,
            &snapshot,
            &market_state,
            forecast.as_ref(),
            &config.score,
            &config.model,
        );

        // ── 7. Gates, risk & position transitions ───────────────────────
        self.publish_progress(7, now_ms);
        let (recommendation, risk_plan) =
            self.act_on_signal(&signal, &snapshot, &market_state, &tick, &config, now_ms);

        // ── 8. Publish & sample ─────────────────────────────────────────
        self.publish_progress(8, now_ms);
        let report = AnalysisReport {
            at_ms: now_ms,
            symbol: symbol.clone(),
            tick,
            snapshot: Some(snapshot),
            market_state: Some(market_state),
            signal: Some(signal),
            risk_plan,
            recommendation,
            fallback: false,
        };

        self.persist_sample(&report, &config).await;
        self.state.latest_analysis.put(report.clone());
        self.state.increment_version();

        Ok(report)
    }

    // -------------------------------------------------------------------
    // Pipeline pieces
    // -------------------------------------------------------------------

    /// Best-effort enrichment: funding, open interest, sentiment. Failures
    /// leave the fields unset.
    async fn enrich_tick(&self, tick: &mut MarketTick, symbol: &str) {
        if tick.funding_rate.is_none() {
            match self.exchange.get_funding_rate(symbol).await {
                Ok(rate) => tick.funding_rate = Some(rate),
                Err(e) => debug!(error = %e, "funding rate unavailable"),
            }
        }
        if tick.open_interest.is_none() {
            match self.exchange.get_open_interest(symbol).await {
                Ok(oi) => tick.open_interest = Some(oi),
                Err(e) => debug!(error = %e, "open interest unavailable"),
            }
        }
        if tick.fgi.is_none() {
            if let Some(sentiment) = &self.sentiment {
                match sentiment.get_fgi().await {
                    Ok(v) => tick.fgi = Some(v),
                    Err(e) => debug!(error = %e, "sentiment unavailable"),
                }
            }
        }
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let key = (interval, limit);
        if let Some(cached) = self.state.kline_cache.get(&key) {
            return Ok(cached);
        }
        let fresh = self.exchange.get_klines(symbol, interval, limit).await?;
        self.state.kline_cache.put(key, fresh.clone());
        Ok(fresh)
    }

    /// Directions of the configured secondary timeframes. Retrieved batches
    /// are merged into the shared candle store (overlap merges at equal
    /// timestamps, strictly older rows are dropped) and the direction is
    /// derived from the merged closed history. A timeframe whose data cannot
    /// be fetched reads as SIDEWAYS rather than failing the tick.
    async fn secondary_directions(
        &self,
        symbol: &str,
        config: &EngineConfig,
        now_ms: i64,
    ) -> Vec<Direction> {
        let mut directions = Vec::new();
        for iv in config.parsed_secondary_intervals() {
            let key = CandleKey {
                symbol: symbol.to_string(),
                interval: iv,
            };
            match self.fetch_klines(symbol, iv, config.kline_limit).await {
                Ok(batch) => {
                    self.state.candle_store.merge_batch(key.clone(), batch);
                }
                Err(e) => {
                    debug!(interval = %iv, error = %e, "secondary timeframe unavailable");
                }
            }

            let closes: Vec<f64> = self
                .state
                .candle_store
                .closed_candles(&key, config.kline_limit, now_ms)
                .iter()
                .map(|c| c.close)
                .collect();
            directions.push(direction_from_closes(&closes, &config.indicators));
        }
        directions
    }

    async fn fetch_forecast(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
        config: &EngineConfig,
    ) -> Option<ModelForecast> {
        let model = self.model.as_ref()?;

        let tail = &candles[candles.len().saturating_sub(100)..];
        let request = ForecastRequest::from_candles(symbol, interval, tail);
        let timeout = Duration::from_millis(config.model.timeout_ms);

        match tokio::time::timeout(timeout, model.forecast(&request)).await {
            Ok(Ok(forecast)) => Some(forecast),
            Ok(Err(e)) => {
                warn!(error = %e, "model forecast failed — using neutral");
                Some(ModelForecast::neutral())
            }
            Err(_) => {
                warn!(timeout_ms = config.model.timeout_ms, "model forecast timed out — using neutral");
                Some(ModelForecast::neutral())
            }
        }
    }

    /// Drive the position state machine and derive the recommendation.
    fn act_on_signal(
        &self,
        signal: &SignalResult,
        snapshot: &IndicatorSnapshot,
        market_state: &MarketStateResult,
        tick: &MarketTick,
        config: &EngineConfig,
        now_ms: i64,
    ) -> (Recommendation, Option<RiskPlan>) {
        let book = &self.state.position_book;
        let price = tick.price;

        // Live position first: price-driven transitions and time exits.
        book.update_price(price, now_ms);
        book.check_time_exits(price, now_ms);

        if book.is_open() {
            let size_before = book.snapshot().map(|p| p.size).unwrap_or(0.0);
            book.apply_signal(signal.class, signal.confidence, price, now_ms);

            let recommendation = if !book.is_open() {
                Recommendation {
                    action: TradeAction::ClosePosition,
                    reason: format!("signal reversal: {}", signal.class),
                    confidence: signal.confidence,
                }
            } else {
                let size_after = book.snapshot().map(|p| p.size).unwrap_or(0.0);
                if size_after < size_before {
                    Recommendation {
                        action: TradeAction::ReducePosition,
                        reason: format!("reversal warning: {}", signal.class),
                        confidence: signal.confidence,
                    }
                } else {
                    Recommendation {
                        action: TradeAction::Hold,
                        reason: "position open; no transition".to_string(),
                        confidence: signal.confidence,
                    }
                }
            };
            return (recommendation, None);
        }

        let Some(side) = signal.side() else {
            return (
                Recommendation {
                    action: TradeAction::Hold,
                    reason: format!("neutral signal ({:.1})", signal.combined_score),
                    confidence: signal.confidence,
                },
                None,
            );
        };

        // Daily-loss circuit blocks new opens until local midnight.
        let (can_open, why) = self.state.daily_guard.can_open();
        if !can_open {
            return (
                Recommendation {
                    action: TradeAction::Hold,
                    reason: why.unwrap_or_else(|| "daily loss circuit".to_string()),
                    confidence: signal.confidence,
                },
                None,
            );
        }

        // MTF strength multiplier lightly shades the score the gates see.
        let effective = (signal.combined_score * signal.strength_multiplier).min(100.0);
        if let Some(block) = evaluate_entry(
            side,
            effective,
            signal.confidence,
            snapshot,
            market_state,
            tick,
            config,
        ) {
            return (
                Recommendation {
                    action: TradeAction::Hold,
                    reason: block,
                    confidence: signal.confidence,
                },
                None,
            );
        }

        let plan = build_risk_plan(
            side,
            price,
            signal.confidence,
            signal.size_multiplier,
            snapshot,
            market_state,
            tick.fgi,
            &config.risk,
            config.account_equity,
        );

        let size = if price > 0.0 {
            config.account_equity * plan.position_fraction / price
        } else {
            0.0
        };

        match book.open(&config.symbol, side, price, size, &plan, now_ms) {
            Ok(position) => {
                info!(
                    id = %position.id,
                    side = %side,
                    price,
                    size,
                    leverage = plan.leverage,
                    "entry executed (simulated)"
                );
                let action = match side {
                    Side::Long => TradeAction::OpenLong,
                    Side::Short => TradeAction::OpenShort,
                };
                (
                    Recommendation {
                        action,
                        reason: format!(
                            "all gates passed (combined {:.1}, rr {:.2})",
                            signal.combined_score, plan.risk_reward
                        ),
                        confidence: signal.confidence,
                    },
                    Some(plan),
                )
            }
            Err(e) => (
                Recommendation {
                    action: TradeAction::Hold,
                    reason: format!("open rejected: {e}"),
                    confidence: signal.confidence,
                },
                Some(plan),
            ),
        }
    }

    /// Neutral fallback report: HOLD with confidence 0.5, minimal sizing and
    /// stops derived from the 24h range. Also persisted as a sample.
    async fn publish_fallback(
        &self,
        tick: MarketTick,
        config: &EngineConfig,
        why: &str,
        now_ms: i64,
    ) -> AnalysisReport {
        self.publish_progress(PROGRESS_STAGES.len(), now_ms);
        let plan = fallback_risk_plan(
            Side::Long,
            tick.price,
            tick.high_24h,
            tick.low_24h,
            &config.risk,
        );

        let report = AnalysisReport {
            at_ms: now_ms,
            symbol: config.symbol.clone(),
            tick,
            snapshot: None,
            market_state: None,
            signal: None,
            risk_plan: Some(plan),
            recommendation: Recommendation {
                action: TradeAction::Hold,
                reason: format!("insufficient data: {why}"),
                confidence: 0.5,
            },
            fallback: true,
        };

        self.persist_sample(&report, config).await;
        self.state.latest_analysis.put(report.clone());
        self.state.increment_version();
        report
    }

    /// Write the MLSample for this emission. Failures are logged, never
    /// propagated.
    async fn persist_sample(&self, report: &AnalysisReport, config: &EngineConfig) {
        let interval = match config.primary_interval() {
            Ok(iv) => iv,
            Err(_) => return,
        };

        let features = serde_json::json!({
            "combined_score": report.signal.as_ref().map(|s| s.combined_score),
            "technical_score": report.signal.as_ref().map(|s| s.technical_score),
            "regime": report.market_state.as_ref().map(|m| m.regime.to_string()),
            "mtf_agreement": report.market_state.as_ref().map(|m| m.mtf_agreement),
            "volatility": report.market_state.as_ref().map(|m| m.volatility.to_string()),
            "change_24h": report.tick.change_24h,
            "funding_rate": report.tick.funding_rate,
            "fgi": report.tick.fgi,
        });
        let indicators = match &report.snapshot {
            Some(snap) => serde_json::to_value(snap).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        };

        let final_signal = report
            .signal
            .as_ref()
            .map(|s| s.class.to_string())
            .unwrap_or_else(|| "HOLD".to_string());

        let sample = build_sample(SampleDraft {
            symbol: &report.symbol,
            interval,
            timestamp_ms: report.at_ms,
            entry_price: Some(report.tick.price),
            features,
            indicators,
            model_prediction: report.signal.as_ref().map(|s| s.model_score),
            model_confidence: report.signal.as_ref().map(|s| s.confidence),
            technical_strength: report
                .signal
                .as_ref()
                .map(|s| s.technical_score)
                .unwrap_or(50.0),
            combined_strength: report
                .signal
                .as_ref()
                .map(|s| s.combined_score)
                .unwrap_or(50.0),
            final_signal,
            position_size: report.risk_plan.as_ref().map(|p| p.position_fraction),
            target_price: report.risk_plan.as_ref().map(|p| p.take_profit_2),
            stop_loss: report.risk_plan.as_ref().map(|p| p.stop_loss),
            take_profit: report.risk_plan.as_ref().map(|p| p.take_profit_2),
            risk_reward: report.risk_plan.as_ref().map(|p| p.risk_reward),
            reasoning_ml: None,
            reasoning_final: Some(report.recommendation.reason.clone()),
            horizon_min: config.schedule.label_horizon_min,
        });

        if let Err(e) = self.state.sample_store.save_sample(sample).await {
            warn!(error = %e, "failed to persist sample");
        }
    }

    fn publish_progress(&self, step: usize, now_ms: i64) {
        let stage = PROGRESS_STAGES[step - 1].to_string();
        let progress = AnalysisProgress {
            stage: stage.clone(),
            step,
            total: PROGRESS_STAGES.len(),
            at_ms: now_ms,
        };
        self.state.progress.put(progress);
        self.state.bus.emit(EngineEvent::AnalysisProgress {
            stage,
            step,
            total: PROGRESS_STAGES.len(),
            at_ms: now_ms,
        });
    }
}
