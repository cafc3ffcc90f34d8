// =============================================================================
// External forecast model client
// =============================================================================
//
// Thin HTTP client for the optional forecast service. The per-call timeout is
// deliberately tight (default 1.2 s): a slow model must never stall the
// analysis loop, and the engine substitutes the neutral forecast on any
// failure.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::adapters::{ForecastRequest, ModelAdapter};
use crate::errors::EngineError;
use crate::signal::ModelForecast;

pub struct HttpModelClient {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    score_long: f64,
    score_short: f64,
    confidence: f64,
}

impl HttpModelClient {
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self {
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl ModelAdapter for HttpModelClient {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ModelForecast, EngineError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("model forecast: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::unavailable(format!(
                "model forecast returned {status}"
            )));
        }

        let body: ForecastResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("model forecast body: {e}")))?;

        let forecast = validate(body)?;
        debug!(
            long = forecast.score_long,
            short = forecast.score_short,
            confidence = forecast.confidence,
            "model forecast received"
        );
        Ok(forecast)
    }
}

/// Bounds-check the response; a model emitting out-of-range scores is treated
/// as unavailable rather than trusted.
fn validate(resp: ForecastResponse) -> Result<ModelForecast, EngineError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v) && v.is_finite();
    if !in_unit(resp.score_long) || !in_unit(resp.score_short) || !in_unit(resp.confidence) {
        return Err(EngineError::unavailable(format!(
            "model forecast out of range: long={} short={} conf={}",
            resp.score_long, resp.score_short, resp.confidence
        )));
    }
    Ok(ModelForecast {
        score_long: resp.score_long,
        score_short: resp.score_short,
        confidence: resp.confidence,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_in_range() {
        let f = validate(ForecastResponse {
            score_long: 0.9,
            score_short: 0.05,
            confidence: 0.85,
        })
        .unwrap();
        assert!((f.direction() - 0.85).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert!(validate(ForecastResponse {
            score_long: 1.5,
            score_short: 0.0,
            confidence: 0.5,
        })
        .is_err());
        assert!(validate(ForecastResponse {
            score_long: 0.5,
            score_short: 0.5,
            confidence: f64::NAN,
        })
        .is_err());
    }
}
