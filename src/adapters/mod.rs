// =============================================================================
// External collaborator contracts
// =============================================================================
//
// The engine core talks to the outside world through these traits only: the
// exchange (market data), the optional forecast model, the optional sentiment
// feed, and the sample store. Every method may fail; failures surface as
// `Unavailable` and are handled by the caller's cache/skip policies — they
// never crash the loop.
//
// `SimulatedExchange` is the in-memory implementation used by the engine
// tests and demo mode.

pub mod exchange;
pub mod model;
pub mod sentiment;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::market_data::Candle;
use crate::signal::ModelForecast;
use crate::types::{Interval, MarketTick};

/// Market-data side of the exchange. No order routing exists in this core;
/// trading is always simulated.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> Result<MarketTick, EngineError>;
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError>;
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn get_open_interest(&self, symbol: &str) -> Result<f64, EngineError>;
    async fn check_connection(&self) -> bool;
}

/// Request payload for the external forecast model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub symbol: String,
    pub interval: String,
    /// Rows of [timestamp, open, high, low, close, volume].
    pub ohlcv: Vec<[f64; 6]>,
}

impl ForecastRequest {
    pub fn from_candles(symbol: &str, interval: Interval, candles: &[Candle]) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.as_str().to_string(),
            ohlcv: candles
                .iter()
                .map(|c| {
                    [
                        c.open_time as f64,
                        c.open,
                        c.high,
                        c.low,
                        c.close,
                        c.volume,
                    ]
                })
                .collect(),
        }
    }
}

/// Optional external forecast capability. The engine functions without it;
/// a failed or slow call degrades to the neutral forecast.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ModelForecast, EngineError>;
}

/// Optional sentiment capability (Fear & Greed index, [0, 100]).
#[async_trait]
pub trait SentimentAdapter: Send + Sync {
    async fn get_fgi(&self) -> Result<f64, EngineError>;
}

// =============================================================================
// Simulated exchange (tests / demo mode)
// =============================================================================

/// In-memory exchange fed by the test or demo harness.
#[derive(Default)]
pub struct SimulatedExchange {
    ticker: RwLock<Option<MarketTick>>,
    klines: RwLock<HashMap<Interval, Vec<Candle>>>,
    funding_rate: RwLock<f64>,
    open_interest: RwLock<f64>,
}

impl SimulatedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ticker(&self, tick: MarketTick) {
        *self.ticker.write() = Some(tick);
    }

    pub fn set_klines(&self, interval: Interval, candles: Vec<Candle>) {
        self.klines.write().insert(interval, candles);
    }

    pub fn set_funding_rate(&self, rate: f64) {
        *self.funding_rate.write() = rate;
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedExchange {
    async fn get_ticker(&self, _symbol: &str) -> Result<MarketTick, EngineError> {
        self.ticker
            .read()
            .clone()
            .ok_or_else(|| EngineError::unavailable("no simulated ticker loaded"))
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let map = self.klines.read();
        let candles = map
            .get(&interval)
            .ok_or_else(|| EngineError::unavailable(format!("no simulated {interval} klines")))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn get_funding_rate(&self, _symbol: &str) -> Result<f64, EngineError> {
        Ok(*self.funding_rate.read())
    }

    async fn get_open_interest(&self, _symbol: &str) -> Result<f64, EngineError> {
        Ok(*self.open_interest.read())
    }

    async fn check_connection(&self) -> bool {
        self.ticker.read().is_some()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: i64) -> Candle {
        Candle {
            open_time: i * 3_600_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn simulated_exchange_roundtrip() {
        let sim = SimulatedExchange::new();
        assert!(!sim.check_connection().await);
        assert!(sim.get_ticker("ETHUSDT").await.is_err());

        sim.set_ticker(MarketTick {
            symbol: "ETHUSDT".into(),
            price: 3_000.0,
            high_24h: 3_100.0,
            low_24h: 2_900.0,
            volume_24h: 1e6,
            change_24h: 1.0,
            funding_rate: None,
            open_interest: None,
            fgi: None,
        });
        sim.set_klines(Interval::H1, (0..10).map(candle).collect());

        assert!(sim.check_connection().await);
        let tick = sim.get_ticker("ETHUSDT").await.unwrap();
        assert!((tick.price - 3_000.0).abs() < 1e-12);

        let klines = sim.get_klines("ETHUSDT", Interval::H1, 4).await.unwrap();
        assert_eq!(klines.len(), 4);
        assert_eq!(klines[0].open_time, 6 * 3_600_000);

        assert!(sim
            .get_klines("ETHUSDT", Interval::M5, 4)
            .await
            .is_err());
    }

    #[test]
    fn forecast_request_from_candles() {
        let candles: Vec<Candle> = (0..3).map(candle).collect();
        let req = ForecastRequest::from_candles("ETHUSDT", Interval::H1, &candles);
        assert_eq!(req.interval, "1h");
        assert_eq!(req.ohlcv.len(), 3);
        assert!((req.ohlcv[1][0] - 3_600_000.0).abs() < 1e-9);
        assert!((req.ohlcv[1][4] - 100.5).abs() < 1e-12);
    }
}
