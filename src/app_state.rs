// =============================================================================
// Central Application State — Borealis Signal Engine
// =============================================================================
//
// The single source of truth shared across the async tasks. Subsystems keep
// their own interior mutability; AppState ties them together and builds the
// status snapshot served to the dashboard.
//
// Thread safety:
//   - Atomic counters for lock-free version and run-state tracking.
//   - parking_lot::RwLock for mutable shared state.
//   - Arc wrappers for subsystems with their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::{TtlCache, TtlMap};
use crate::daily_guard::{DailyLossGuard, DailyLossState};
use crate::engine::{AnalysisProgress, AnalysisReport};
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::indicators::IndicatorEngine;
use crate::market_data::{Candle, CandleStore};
use crate::market_state::MarketStateClassifier;
use crate::position::{PerformanceStats, Position, PositionBook};
use crate::runtime_config::EngineConfig;
use crate::samples::SampleStore;
use crate::types::{Interval, MarketTick};

/// Candles retained per interval ring.
const CANDLE_CAPACITY: usize = 500;

/// Cache TTLs, matching the published contract.
const LATEST_ANALYSIS_TTL: Duration = Duration::from_secs(300);
const MARKET_DATA_TTL: Duration = Duration::from_secs(30);
const KLINE_TTL: Duration = Duration::from_secs(60);
const PROGRESS_TTL: Duration = Duration::from_secs(15);

pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation so pollers and the WebSocket feed can detect changes.
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<EngineConfig>>,

    // ── Pipeline state ──────────────────────────────────────────────────
    pub indicator_engine: RwLock<IndicatorEngine>,
    /// Merged candle history for the secondary (MTF) intervals.
    pub candle_store: CandleStore,
    pub classifier: MarketStateClassifier,

    // ── Position & risk ─────────────────────────────────────────────────
    pub position_book: Arc<PositionBook>,
    pub daily_guard: Arc<DailyLossGuard>,

    // ── Events & samples ────────────────────────────────────────────────
    pub bus: EventBus,
    pub sample_store: Arc<dyn SampleStore>,

    // ── Caches ──────────────────────────────────────────────────────────
    pub latest_analysis: TtlCache<AnalysisReport>,
    pub market_cache: TtlCache<MarketTick>,
    pub kline_cache: TtlMap<(Interval, usize), Vec<Candle>>,
    pub progress: TtlCache<AnalysisProgress>,

    // ── Run state ───────────────────────────────────────────────────────
    pub is_running: AtomicBool,
    pub stop_requested: AtomicBool,
    pub start_time: std::time::Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.state_version)
            .field("is_running", &self.is_running)
            .field("stop_requested", &self.stop_requested)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Construct the shared state from a validated configuration.
    pub fn new(
        config: EngineConfig,
        sample_store: Arc<dyn SampleStore>,
    ) -> Result<Self, EngineError> {
        let interval = config.primary_interval()?;

        let bus = EventBus::new();
        let daily_guard = Arc::new(DailyLossGuard::new(config.schedule.daily_loss_limit));
        let position_book = Arc::new(PositionBook::new(
            bus.clone(),
            daily_guard.clone(),
            config.round_trip_cost(),
            config.trailing.clone(),
            config.schedule.clone(),
        ));

        let indicator_engine =
            IndicatorEngine::new(interval, CANDLE_CAPACITY, config.indicators.clone());
        let classifier = MarketStateClassifier::new(config.indicators.clone());

        Ok(Self {
            state_version: AtomicU64::new(1),
            config: Arc::new(RwLock::new(config)),
            indicator_engine: RwLock::new(indicator_engine),
            candle_store: CandleStore::new(CANDLE_CAPACITY),
            classifier,
            position_book,
            daily_guard,
            bus,
            sample_store,
            latest_analysis: TtlCache::new(LATEST_ANALYSIS_TTL),
            market_cache: TtlCache::new(MARKET_DATA_TTL),
            kline_cache: TtlMap::new(KLINE_TTL),
            progress: TtlCache::new(PROGRESS_TTL),
            is_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            start_time: std::time::Instant::now(),
        })
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Build the dashboard status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        let daily = self.daily_guard.state();
        StatusSnapshot {
            is_running: self.is_running.load(Ordering::SeqCst),
            symbol: self.config.read().symbol.clone(),
            position: self.position_book.snapshot(),
            performance: self.position_book.performance(),
            daily_loss: daily.daily_loss,
            daily_loss_limit: daily.daily_loss_limit,
            daily: daily.clone(),
            state_version: self.current_state_version(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

/// Dashboard status payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub symbol: String,
    pub position: Option<Position>,
    pub performance: PerformanceStats,
    pub daily_loss: f64,
    pub daily_loss_limit: f64,
    pub daily: DailyLossState,
    pub state_version: u64,
    pub uptime_secs: u64,
    pub server_time: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::MemorySampleStore;

    fn state() -> AppState {
        AppState::new(EngineConfig::default(), Arc::new(MemorySampleStore::new())).unwrap()
    }

    #[test]
    fn version_increments() {
        let s = state();
        let v0 = s.current_state_version();
        s.increment_version();
        assert_eq!(s.current_state_version(), v0 + 1);
    }

    #[test]
    fn status_starts_flat_and_stopped() {
        let s = state();
        let status = s.status();
        assert!(!status.is_running);
        assert!(status.position.is_none());
        assert_eq!(status.performance.total_trades, 0);
        assert!((status.daily_loss - 0.0).abs() < 1e-12);
        assert_eq!(status.symbol, "ETHUSDT");
    }

    #[test]
    fn invalid_interval_fails_construction() {
        let mut config = EngineConfig::default();
        config.interval = "9z".into();
        let err = AppState::new(config, Arc::new(MemorySampleStore::new())).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }
}
