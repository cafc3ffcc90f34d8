// =============================================================================
// Sample Logger & Label Backfiller — the retraining feedback loop
// =============================================================================
//
// Every signal emission persists an `MLSample` with `label_ready = false`.
// The backfiller is an independent periodic task: it selects samples whose
// horizon has elapsed, computes the realized return and the max adverse
// excursion over the horizon window, and marks the row ready — exactly once.
//
// HOLD samples (and samples without an entry price) are labeled ready with
// null outcomes. A failure on one sample is logged and skipped; the
// scheduler itself never stops.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::ExchangeAdapter;
use crate::errors::EngineError;
use crate::types::Interval;

/// Max samples labeled per poll.
const BACKFILL_BATCH: usize = 50;

/// Interval used to reconstruct the horizon window.
const LABEL_WINDOW_INTERVAL: Interval = Interval::M1;

// ---------------------------------------------------------------------------
// Sample row
// ---------------------------------------------------------------------------

/// One persisted training sample. Label fields start unset and are written
/// exactly once by the backfiller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLSample {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    /// Emission time in epoch milliseconds; the label window starts here.
    pub timestamp_ms: i64,
    pub symbol: String,
    pub interval: String,
    pub entry_price: Option<f64>,
    pub features_json: serde_json::Value,
    pub indicators_json: serde_json::Value,
    pub ml_prediction: Option<f64>,
    pub ml_confidence: Option<f64>,
    pub ml_calibrated_confidence: Option<f64>,
    pub technical_strength: f64,
    pub combined_strength: f64,
    pub final_signal: String,
    pub position_size: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward: Option<f64>,
    pub reasoning_ml: Option<String>,
    pub reasoning_final: Option<String>,
    pub label_horizon_min: i64,
    pub label_return: Option<f64>,
    pub label_drawdown: Option<f64>,
    pub label_ready: bool,
}

impl MLSample {
    /// Milliseconds at which the label horizon elapses.
    pub fn due_at_ms(&self) -> i64 {
        self.timestamp_ms + self.label_horizon_min * 60_000
    }

    /// Whether the final signal argued for a short.
    pub fn is_short_signal(&self) -> bool {
        matches!(self.final_signal.as_str(), "SELL" | "STRONG_SELL")
    }
}

// ---------------------------------------------------------------------------
// Store contract + in-memory implementation
// ---------------------------------------------------------------------------

/// The persistent sample store. The engine inserts; the backfiller mutates
/// the label columns only.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn initialize(&self) -> Result<(), EngineError>;
    async fn save_sample(&self, sample: MLSample) -> Result<(), EngineError>;
    /// Samples whose horizon elapsed at `now_ms` and are not yet labeled.
    async fn pending_label_samples(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<MLSample>, EngineError>;
    /// Write the label columns and flip `label_ready` to true.
    async fn update_label(
        &self,
        id: &str,
        label_return: Option<f64>,
        label_drawdown: Option<f64>,
    ) -> Result<(), EngineError>;
    async fn count(&self) -> Result<usize, EngineError>;
}

/// In-memory store used by tests and demo mode.
#[derive(Default)]
pub struct MemorySampleStore {
    rows: RwLock<Vec<MLSample>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<MLSample> {
        self.rows.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn all(&self) -> Vec<MLSample> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn save_sample(&self, sample: MLSample) -> Result<(), EngineError> {
        self.rows.write().push(sample);
        Ok(())
    }

    async fn pending_label_samples(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<MLSample>, EngineError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|s| !s.label_ready && s.due_at_ms() <= now_ms)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_label(
        &self,
        id: &str,
        label_return: Option<f64>,
        label_drawdown: Option<f64>,
    ) -> Result<(), EngineError> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::unavailable(format!("sample {id} not found")))?;
        row.label_return = label_return;
        row.label_drawdown = label_drawdown;
        row.label_ready = true;
        row.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }

    async fn count(&self) -> Result<usize, EngineError> {
        Ok(self.rows.read().len())
    }
}

// ---------------------------------------------------------------------------
// Sample construction
// ---------------------------------------------------------------------------

/// Inputs captured from one analysis iteration.
pub struct SampleDraft<'a> {
    pub symbol: &'a str,
    pub interval: Interval,
    pub timestamp_ms: i64,
    pub entry_price: Option<f64>,
    pub features: serde_json::Value,
    pub indicators: serde_json::Value,
    pub model_prediction: Option<f64>,
    pub model_confidence: Option<f64>,
    pub technical_strength: f64,
    pub combined_strength: f64,
    pub final_signal: String,
    pub position_size: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward: Option<f64>,
    pub reasoning_ml: Option<String>,
    pub reasoning_final: Option<String>,
    pub horizon_min: i64,
}

pub fn build_sample(draft: SampleDraft<'_>) -> MLSample {
    let now = Utc::now().to_rfc3339();
    MLSample {
        id: Uuid::new_v4().to_string(),
        created_at: now.clone(),
        updated_at: now,
        timestamp_ms: draft.timestamp_ms,
        symbol: draft.symbol.to_string(),
        interval: draft.interval.as_str().to_string(),
        entry_price: draft.entry_price,
        features_json: draft.features,
        indicators_json: draft.indicators,
        ml_prediction: draft.model_prediction,
        ml_confidence: draft.model_confidence,
        ml_calibrated_confidence: draft.model_confidence,
        technical_strength: draft.technical_strength,
        combined_strength: draft.combined_strength,
        final_signal: draft.final_signal,
        position_size: draft.position_size,
        target_price: draft.target_price,
        stop_loss: draft.stop_loss,
        take_profit: draft.take_profit,
        risk_reward: draft.risk_reward,
        reasoning_ml: draft.reasoning_ml,
        reasoning_final: draft.reasoning_final,
        label_horizon_min: draft.horizon_min,
        label_return: None,
        label_drawdown: None,
        label_ready: false,
    }
}

// ---------------------------------------------------------------------------
// Label backfiller
// ---------------------------------------------------------------------------

pub struct LabelBackfiller {
    store: Arc<dyn SampleStore>,
    exchange: Arc<dyn ExchangeAdapter>,
    poll_secs: u64,
}

impl LabelBackfiller {
    pub fn new(
        store: Arc<dyn SampleStore>,
        exchange: Arc<dyn ExchangeAdapter>,
        poll_secs: u64,
    ) -> Self {
        Self {
            store,
            exchange,
            poll_secs,
        }
    }

    /// Run until `stop` is raised. Each pass is independent; errors are
    /// logged and the scheduler continues.
    pub async fn run(&self, stop: Arc<AtomicBool>) {
        info!(poll_secs = self.poll_secs, "label backfiller started");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.poll_secs));
        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                info!("label backfiller stopping");
                return;
            }
            let now_ms = Utc::now().timestamp_millis();
            match self.run_once(now_ms).await {
                Ok(0) => debug!("label backfiller: nothing due"),
                Ok(n) => info!(labeled = n, "label backfiller pass complete"),
                Err(e) => warn!(error = %e, "label backfiller pass failed"),
            }
        }
    }

    /// Label every due sample once. Returns the number labeled.
    pub async fn run_once(&self, now_ms: i64) -> Result<usize, EngineError> {
        let due = self
            .store
            .pending_label_samples(now_ms, BACKFILL_BATCH)
            .await?;

        let mut labeled = 0;
        for sample in due {
            match self.label_sample(&sample).await {
                Ok(()) => labeled += 1,
                Err(e) => {
                    warn!(id = %sample.id, error = %e, "failed to label sample — skipped");
                }
            }
        }
        Ok(labeled)
    }

    async fn label_sample(&self, sample: &MLSample) -> Result<(), EngineError> {
        // HOLD signals and rows without a usable entry have no outcome to
        // measure.
        let entry = match sample.entry_price {
            Some(e) if e > 0.0 && sample.final_signal != "HOLD" => e,
            _ => {
                self.store.update_label(&sample.id, None, None).await?;
                return Ok(());
            }
        };

        let window_start = sample.timestamp_ms;
        let window_end = sample.due_at_ms();

        // Reconstruct the horizon window at 1m resolution, with slack for
        // the time elapsed since the window closed.
        let ticker = self.exchange.get_ticker(&sample.symbol).await?;
        let limit = ((sample.label_horizon_min as usize) + 120).min(1_000);
        let candles = self
            .exchange
            .get_klines(&sample.symbol, LABEL_WINDOW_INTERVAL, limit)
            .await?;

        let window: Vec<_> = candles
            .iter()
            .filter(|c| c.open_time >= window_start && c.open_time <= window_end)
            .collect();

        let end_price = window.last().map(|c| c.close).unwrap_or(ticker.price);
        let short = sample.is_short_signal();

        let mut label_return = (end_price - entry) / entry * 100.0;
        if short {
            label_return = -label_return;
        }

        let label_drawdown = if short {
            // Adverse excursion for a short is the highest high (positive).
            let max_high = window
                .iter()
                .map(|c| c.high)
                .fold(f64::MIN, f64::max);
            if window.is_empty() {
                0.0
            } else {
                (max_high - entry) / entry * 100.0
            }
        } else {
            // Adverse excursion for a long is the lowest low (negative).
            let min_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            if window.is_empty() {
                0.0
            } else {
                (min_low - entry) / entry * 100.0
            }
        };

        if !label_return.is_finite() || !label_drawdown.is_finite() {
            return Err(EngineError::insufficient("non-finite label"));
        }

        debug!(
            id = %sample.id,
            label_return,
            label_drawdown,
            "sample labeled"
        );
        self.store
            .update_label(&sample.id, Some(label_return), Some(label_drawdown))
            .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedExchange;
    use crate::market_data::Candle;
    use crate::types::MarketTick;

    fn draft(signal: &str, entry: Option<f64>, t0: i64) -> MLSample {
        build_sample(SampleDraft {
            symbol: "ETHUSDT",
            interval: Interval::H1,
            timestamp_ms: t0,
            entry_price: entry,
            features: serde_json::json!({"combined": 66.0}),
            indicators: serde_json::json!({"rsi": 28.0}),
            model_prediction: None,
            model_confidence: None,
            technical_strength: 70.0,
            combined_strength: 66.0,
            final_signal: signal.to_string(),
            position_size: Some(0.066),
            target_price: Some(3_143.4),
            stop_loss: Some(3_069.0),
            take_profit: Some(3_143.4),
            risk_reward: Some(1.4),
            reasoning_ml: None,
            reasoning_final: Some("gates passed".to_string()),
            horizon_min: 60,
        })
    }

    fn minute_candle(t: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open_time: t,
            open: close,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    fn sim_with_window(t0: i64) -> Arc<SimulatedExchange> {
        let sim = Arc::new(SimulatedExchange::new());
        sim.set_ticker(MarketTick {
            symbol: "ETHUSDT".into(),
            price: 3_045.0,
            high_24h: 3_100.0,
            low_24h: 2_950.0,
            volume_24h: 1e6,
            change_24h: 1.0,
            funding_rate: None,
            open_interest: None,
            fgi: None,
        });
        // 60 one-minute candles across the window: min low 2970 early on,
        // closing the window at 3045.
        let mut candles = Vec::new();
        for i in 0..60 {
            let t = t0 + i * 60_000;
            let (low, high, close) = if i == 10 {
                (2_970.0, 3_010.0, 2_990.0)
            } else if i == 59 {
                (3_030.0, 3_050.0, 3_045.0)
            } else {
                (2_990.0, 3_020.0, 3_000.0 + i as f64 * 0.5)
            };
            candles.push(minute_candle(t, low, high, close));
        }
        sim.set_klines(Interval::M1, candles);
        sim
    }

    #[tokio::test]
    async fn new_samples_start_unlabeled() {
        let store = MemorySampleStore::new();
        let sample = draft("BUY", Some(3_000.0), 0);
        assert!(!sample.label_ready);
        assert!(sample.label_return.is_none());
        store.save_sample(sample).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_selection_respects_horizon() {
        let store = MemorySampleStore::new();
        store.save_sample(draft("BUY", Some(3_000.0), 0)).await.unwrap();

        // Not due yet at 30 minutes.
        let due = store.pending_label_samples(30 * 60_000, 10).await.unwrap();
        assert!(due.is_empty());

        // Due at exactly the horizon.
        let due = store.pending_label_samples(60 * 60_000, 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn long_label_math() {
        // Entry 3000, min low 2970, end price 3045 over a 60-minute window
        // -> return +1.50, drawdown -1.00.
        let t0 = 0;
        let store = Arc::new(MemorySampleStore::new());
        let sample = draft("BUY", Some(3_000.0), t0);
        let id = sample.id.clone();
        store.save_sample(sample).await.unwrap();

        let backfiller = LabelBackfiller::new(store.clone(), sim_with_window(t0), 60);
        let labeled = backfiller.run_once(61 * 60_000).await.unwrap();
        assert_eq!(labeled, 1);

        let row = store.get(&id).unwrap();
        assert!(row.label_ready);
        assert!((row.label_return.unwrap() - 1.5).abs() < 1e-9);
        assert!((row.label_drawdown.unwrap() + 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn short_label_math() {
        // Same window, SHORT signal: return is negated, drawdown is the max
        // high above entry (positive).
        let t0 = 0;
        let store = Arc::new(MemorySampleStore::new());
        let sample = draft("SELL", Some(3_000.0), t0);
        let id = sample.id.clone();
        store.save_sample(sample).await.unwrap();

        let backfiller = LabelBackfiller::new(store.clone(), sim_with_window(t0), 60);
        backfiller.run_once(61 * 60_000).await.unwrap();

        let row = store.get(&id).unwrap();
        assert!((row.label_return.unwrap() + 1.5).abs() < 1e-9);
        // Max high in the window is 3050 -> +1.6667%.
        assert!((row.label_drawdown.unwrap() - (3_050.0 - 3_000.0) / 3_000.0 * 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hold_samples_label_null() {
        let store = Arc::new(MemorySampleStore::new());
        let sample = draft("HOLD", Some(3_000.0), 0);
        let id = sample.id.clone();
        store.save_sample(sample).await.unwrap();

        // No exchange data needed for HOLD labeling.
        let backfiller = LabelBackfiller::new(
            store.clone(),
            Arc::new(SimulatedExchange::new()),
            60,
        );
        let labeled = backfiller.run_once(61 * 60_000).await.unwrap();
        assert_eq!(labeled, 1);

        let row = store.get(&id).unwrap();
        assert!(row.label_ready);
        assert!(row.label_return.is_none());
        assert!(row.label_drawdown.is_none());
    }

    #[tokio::test]
    async fn missing_entry_labels_null() {
        let store = Arc::new(MemorySampleStore::new());
        let sample = draft("BUY", None, 0);
        let id = sample.id.clone();
        store.save_sample(sample).await.unwrap();

        let backfiller = LabelBackfiller::new(
            store.clone(),
            Arc::new(SimulatedExchange::new()),
            60,
        );
        backfiller.run_once(61 * 60_000).await.unwrap();
        assert!(store.get(&id).unwrap().label_ready);
    }

    #[tokio::test]
    async fn failed_sample_is_skipped_not_fatal() {
        let store = Arc::new(MemorySampleStore::new());
        // One BUY (needs exchange data — which is absent) and one HOLD.
        let failing = draft("BUY", Some(3_000.0), 0);
        let passing = draft("HOLD", Some(3_000.0), 0);
        let failing_id = failing.id.clone();
        let passing_id = passing.id.clone();
        store.save_sample(failing).await.unwrap();
        store.save_sample(passing).await.unwrap();

        let backfiller = LabelBackfiller::new(
            store.clone(),
            Arc::new(SimulatedExchange::new()), // empty: ticker calls fail
            60,
        );
        let labeled = backfiller.run_once(61 * 60_000).await.unwrap();
        assert_eq!(labeled, 1, "the HOLD row still gets labeled");
        assert!(!store.get(&failing_id).unwrap().label_ready);
        assert!(store.get(&passing_id).unwrap().label_ready);
    }

    #[tokio::test]
    async fn labels_transition_exactly_once() {
        let t0 = 0;
        let store = Arc::new(MemorySampleStore::new());
        let sample = draft("BUY", Some(3_000.0), t0);
        let id = sample.id.clone();
        store.save_sample(sample).await.unwrap();

        let backfiller = LabelBackfiller::new(store.clone(), sim_with_window(t0), 60);
        assert_eq!(backfiller.run_once(61 * 60_000).await.unwrap(), 1);
        // A second pass finds nothing due.
        assert_eq!(backfiller.run_once(62 * 60_000).await.unwrap(), 0);

        let row = store.get(&id).unwrap();
        assert!(row.label_ready);
    }
}
