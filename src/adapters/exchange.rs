// =============================================================================
// Binance USDⓈ-M futures REST adapter — public market-data endpoints only
// =============================================================================
//
// No signing: this core never touches account or order endpoints. Binance
// serializes numeric fields as JSON strings inside these payloads, hence the
// string-or-number parse helper. Every failure maps to `Unavailable` so the
// engine's cache/skip policy can take over.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::adapters::ExchangeAdapter;
use crate::errors::EngineError;
use crate::market_data::Candle;
use crate::types::{Interval, MarketTick};

/// Per-call timeout for exchange requests.
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct BinanceFuturesClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new() -> Self {
        Self::with_base_url("https://fapi.binance.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value, EngineError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "exchange request");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("GET {path_and_query}: {e}")))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("GET {path_and_query} body: {e}")))?;

        if !status.is_success() {
            return Err(EngineError::unavailable(format!(
                "GET {path_and_query} returned {status}: {body}"
            )));
        }
        Ok(body)
    }
}

impl Default for BinanceFuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesClient {
    async fn get_ticker(&self, symbol: &str) -> Result<MarketTick, EngineError> {
        let body = self
            .get_json(&format!("/fapi/v1/ticker/24hr?symbol={symbol}"))
            .await?;
        parse_ticker(symbol, &body)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let body = self
            .get_json(&format!(
                "/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}"
            ))
            .await?;
        parse_klines(&body)
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<f64, EngineError> {
        let body = self
            .get_json(&format!("/fapi/v1/premiumIndex?symbol={symbol}"))
            .await?;
        field_f64(&body, "lastFundingRate")
    }

    async fn get_open_interest(&self, symbol: &str) -> Result<f64, EngineError> {
        let body = self
            .get_json(&format!("/fapi/v1/openInterest?symbol={symbol}"))
            .await?;
        field_f64(&body, "openInterest")
    }

    async fn check_connection(&self) -> bool {
        self.get_json("/fapi/v1/ping").await.is_ok()
    }
}

// =============================================================================
// Payload parsing (pure, unit-testable)
// =============================================================================

fn parse_ticker(symbol: &str, body: &Value) -> Result<MarketTick, EngineError> {
    Ok(MarketTick {
        symbol: symbol.to_string(),
        price: field_f64(body, "lastPrice")?,
        high_24h: field_f64(body, "highPrice")?,
        low_24h: field_f64(body, "lowPrice")?,
        volume_24h: field_f64(body, "volume")?,
        change_24h: field_f64(body, "priceChangePercent")?,
        funding_rate: None,
        open_interest: None,
        fgi: None,
    })
}

fn parse_klines(body: &Value) -> Result<Vec<Candle>, EngineError> {
    let rows = body
        .as_array()
        .ok_or_else(|| EngineError::unavailable("klines payload is not an array"))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let cols = row
            .as_array()
            .ok_or_else(|| EngineError::unavailable("kline row is not an array"))?;
        if cols.len() < 6 {
            return Err(EngineError::unavailable("kline row too short"));
        }

        out.push(Candle {
            open_time: cols[0]
                .as_i64()
                .ok_or_else(|| EngineError::unavailable("kline open time not an integer"))?,
            open: value_f64(&cols[1], "open")?,
            high: value_f64(&cols[2], "high")?,
            low: value_f64(&cols[3], "low")?,
            close: value_f64(&cols[4], "close")?,
            volume: value_f64(&cols[5], "volume")?,
        });
    }
    Ok(out)
}

fn field_f64(body: &Value, name: &str) -> Result<f64, EngineError> {
    value_f64(&body[name], name)
}

/// Binance sends numbers as strings in most payloads; accept both forms.
fn value_f64(value: &Value, name: &str) -> Result<f64, EngineError> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| EngineError::unavailable(format!("field {name} not parseable: {s}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::unavailable(format!("field {name} not an f64"))),
        _ => Err(EngineError::unavailable(format!(
            "field {name} missing or wrong type"
        ))),
    }
}
