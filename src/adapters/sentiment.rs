// =============================================================================
// Fear & Greed index client (alternative.me)
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::adapters::SentimentAdapter;
use crate::errors::EngineError;

const FNG_URL: &str = "https://api.alternative.me/fng/";
const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct AlternativeMeClient {
    url: String,
    client: reqwest::Client,
}

impl AlternativeMeClient {
    pub fn new() -> Self {
        Self::with_url(FNG_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            url: url.into(),
            client,
        }
    }
}

impl Default for AlternativeMeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentAdapter for AlternativeMeClient {
    async fn get_fgi(&self) -> Result<f64, EngineError> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("fng request: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("fng body: {e}")))?;

        let value = parse_fgi(&body)?;
        debug!(fgi = value, "fear & greed index fetched");
        Ok(value)
    }
}

/// Expected shape: `{ "data": [ { "value": "45", ... } ] }`.
fn parse_fgi(body: &Value) -> Result<f64, EngineError> {
    let raw = body["data"][0]["value"]
        .as_str()
        .ok_or_else(|| EngineError::unavailable("fng payload missing data[0].value"))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| EngineError::unavailable(format!("fng value not numeric: {raw}")))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(EngineError::unavailable(format!(
            "fng value out of range: {value}"
        )));
    }
    Ok(value)
}
