// =============================================================================
// Candle series — fixed-capacity ring buffers per (symbol, interval)
// =============================================================================
//
// Ordering rules for `push`:
//   * timestamp == last  -> merge (the incoming candle replaces the stored
//     one; pushing an identical candle twice is a no-op)
//   * timestamp  > last  -> append, trim oldest beyond capacity
//   * timestamp  < last  -> reject with OutOfOrder; no state is mutated
//
// A candle is *closed* iff open_time + interval <= now. Consumers that only
// want closed candles filter through `closed()` / `closed_candles()`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;
use crate::types::Interval;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in epoch milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Structural sanity: high envelopes open/close/low, low sits below
    /// open/close/high, volume is non-negative, everything finite.
    pub fn is_well_formed(&self) -> bool {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return false;
        }
        self.volume >= 0.0
            && self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }

    /// Whether this candle's interval has fully elapsed at `now_ms`.
    pub fn is_closed(&self, interval: Interval, now_ms: i64) -> bool {
        self.open_time + interval.millis() <= now_ms
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// CandleSeries -- single (symbol, interval) ring
// ---------------------------------------------------------------------------

/// Ring buffer of candles for one interval, ordered by open_time ascending.
#[derive(Debug)]
pub struct CandleSeries {
    interval: Interval,
    ring: VecDeque<Candle>,
    capacity: usize,
}

impl CandleSeries {
    pub fn new(interval: Interval, capacity: usize) -> Self {
        Self {
            interval,
            ring: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Insert a candle.
    ///
    /// O(1) amortized. Equal timestamps merge (latest version wins); strictly
    /// older timestamps are rejected with `OutOfOrder` and leave the series
    /// untouched; malformed candles are rejected without mutating state.
    pub fn push(&mut self, candle: Candle) -> Result<(), EngineError> {
        if !candle.is_well_formed() {
            return Err(EngineError::insufficient(format!(
                "malformed candle at {}",
                candle.open_time
            )));
        }

        match self.ring.back() {
            Some(last) if candle.open_time < last.open_time => Err(EngineError::OutOfOrder {
                incoming: candle.open_time,
                last: last.open_time,
            }),
            Some(last) if candle.open_time == last.open_time => {
                // Merge: the incoming candle is the newer version of the same
                // bar. Replacing preserves idempotence for identical pushes.
                if let Some(back) = self.ring.back_mut() {
                    *back = candle;
                }
                Ok(())
            }
            _ => {
                self.ring.push_back(candle);
                while self.ring.len() > self.capacity {
                    self.ring.pop_front();
                }
                Ok(())
            }
        }
    }

    /// Merge a retrieved batch. Strictly-older candles are skipped (the batch
    /// overlaps known data); equal timestamps merge; newer ones append.
    /// Returns the number of accepted candles.
    pub fn merge_batch(&mut self, batch: Vec<Candle>) -> usize {
        let mut accepted = 0;
        for candle in batch {
            match self.push(candle) {
                Ok(()) => accepted += 1,
                Err(EngineError::OutOfOrder { .. }) => {}
                Err(_) => {}
            }
        }
        accepted
    }

    /// All candles whose interval has elapsed at `now_ms`, oldest first.
    pub fn closed(&self, now_ms: i64) -> Vec<Candle> {
        self.ring
            .iter()
            .filter(|c| c.is_closed(self.interval, now_ms))
            .cloned()
            .collect()
    }

    /// Close prices of closed candles, oldest first.
    pub fn closed_closes(&self, now_ms: i64) -> Vec<f64> {
        self.ring
            .iter()
            .filter(|c| c.is_closed(self.interval, now_ms))
            .map(|c| c.close)
            .collect()
    }

    /// Every stored candle, closed or not, oldest first.
    pub fn all(&self) -> Vec<Candle> {
        self.ring.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CandleStore -- thread-safe map of series
// ---------------------------------------------------------------------------

/// Thread-safe store of candle series keyed by `(symbol, interval)`.
pub struct CandleStore {
    series: RwLock<HashMap<CandleKey, CandleSeries>>,
    capacity: usize,
}

impl CandleStore {
    /// Create a store that retains at most `capacity` candles per key.
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn push(&self, key: CandleKey, candle: Candle) -> Result<(), EngineError> {
        let mut map = self.series.write();
        let interval = key.interval;
        let series = map
            .entry(key)
            .or_insert_with(|| CandleSeries::new(interval, self.capacity));
        series.push(candle)
    }

    /// Merge a retrieved kline batch into the series for `key`.
    pub fn merge_batch(&self, key: CandleKey, batch: Vec<Candle>) -> usize {
        let mut map = self.series.write();
        let interval = key.interval;
        let series = map
            .entry(key.clone())
            .or_insert_with(|| CandleSeries::new(interval, self.capacity));
        let accepted = series.merge_batch(batch);
        debug!(key = %key, accepted, total = series.len(), "candle batch merged");
        accepted
    }

    /// The most recent `count` closed candles for `key` (oldest-first order).
    pub fn closed_candles(&self, key: &CandleKey, count: usize, now_ms: i64) -> Vec<Candle> {
        let map = self.series.read();
        match map.get(key) {
            Some(series) => {
                let closed = series.closed(now_ms);
                let start = closed.len().saturating_sub(count);
                closed[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// The close price of the most recent closed candle, if any.
    pub fn last_closed_price(&self, key: &CandleKey, now_ms: i64) -> Option<f64> {
        let map = self.series.read();
        map.get(key)
            .and_then(|s| s.closed(now_ms).last().map(|c| c.close))
    }

    /// Total candles (closed or not) stored for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.series.read();
        map.get(key).map_or(0, CandleSeries::len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    fn key(sym: &str, iv: Interval) -> CandleKey {
        CandleKey {
            symbol: sym.into(),
            interval: iv,
        }
    }

    #[test]
    fn push_appends_in_order() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        s.push(sample(0, 100.0)).unwrap();
        s.push(sample(60_000, 101.0)).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.last().unwrap().close, 101.0);
    }

    #[test]
    fn push_rejects_out_of_order() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        s.push(sample(60_000, 100.0)).unwrap();
        let err = s.push(sample(0, 99.0)).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { incoming: 0, last: 60_000 }));
        // State untouched.
        assert_eq!(s.len(), 1);
        assert_eq!(s.last().unwrap().close, 100.0);
    }

    #[test]
    fn push_equal_timestamp_merges() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        s.push(sample(0, 100.0)).unwrap();
        s.push(sample(0, 102.0)).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.last().unwrap().close, 102.0);
    }

    #[test]
    fn push_twice_identical_is_noop() {
        let mut a = CandleSeries::new(Interval::M1, 10);
        let mut b = CandleSeries::new(Interval::M1, 10);
        let c = sample(0, 100.0);
        a.push(c.clone()).unwrap();
        b.push(c.clone()).unwrap();
        b.push(c.clone()).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(a.last(), b.last());
    }

    #[test]
    fn push_rejects_malformed() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        let mut bad = sample(0, 100.0);
        bad.high = bad.low - 5.0; // high below low
        assert!(s.push(bad).is_err());
        assert!(s.is_empty());

        let mut neg_vol = sample(0, 100.0);
        neg_vol.volume = -1.0;
        assert!(s.push(neg_vol).is_err());
    }

    #[test]
    fn ring_trims_to_capacity() {
        let mut s = CandleSeries::new(Interval::M1, 3);
        for i in 0..5 {
            s.push(sample(i * 60_000, 100.0 + i as f64)).unwrap();
        }
        assert_eq!(s.len(), 3);
        assert_eq!(s.closed(i64::MAX).first().unwrap().close, 102.0);
    }

    #[test]
    fn closed_filters_unclosed_tail() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        s.push(sample(0, 100.0)).unwrap();
        s.push(sample(60_000, 101.0)).unwrap();
        // At t=110_000 only the first candle has fully elapsed.
        let closed = s.closed(110_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close, 100.0);
        // At t=120_000 both are closed.
        assert_eq!(s.closed(120_000).len(), 2);
    }

    #[test]
    fn merge_batch_skips_older_merges_equal() {
        let mut s = CandleSeries::new(Interval::M1, 10);
        s.push(sample(60_000, 100.0)).unwrap();
        s.push(sample(120_000, 101.0)).unwrap();

        let batch = vec![
            sample(0, 90.0),        // strictly older — skipped
            sample(120_000, 105.0), // equal — merged
            sample(180_000, 106.0), // newer — appended
        ];
        let accepted = s.merge_batch(batch);
        assert_eq!(accepted, 2);
        assert_eq!(s.len(), 3);
        let closes = s.closed_closes(i64::MAX);
        assert_eq!(closes, vec![100.0, 105.0, 106.0]);
    }

    #[test]
    fn store_roundtrip() {
        let store = CandleStore::new(100);
        let k = key("ETHUSDT", Interval::H1);
        for i in 0..5 {
            store.push(k.clone(), sample(i * 3_600_000, 3_000.0 + i as f64)).unwrap();
        }
        assert_eq!(store.count(&k), 5);

        let closed = store.closed_candles(&k, 3, i64::MAX);
        assert_eq!(closed.len(), 3);
        assert_eq!(closed.last().unwrap().close, 3_004.0);
        assert_eq!(store.last_closed_price(&k, i64::MAX), Some(3_004.0));
    }

    #[test]
    fn store_empty_key() {
        let store = CandleStore::new(10);
        let k = key("XYZUSDT", Interval::M5);
        assert!(store.closed_candles(&k, 10, i64::MAX).is_empty());
        assert_eq!(store.last_closed_price(&k, i64::MAX), None);
        assert_eq!(store.count(&k), 0);
    }
}
