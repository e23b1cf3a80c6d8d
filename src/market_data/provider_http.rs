// =============================================================================
// HTTP Market Data Provider — generic OHLCV JSON adapter
// =============================================================================
//
// One provider implementation talking to a generic "candles" HTTPS JSON
// endpoint: `GET {base_url}/candles?symbol=EURUSD&interval=15m&limit=200`.
// Credentials are optional (many market-data providers only require an API
// key in a header); when present the header is attached but never logged.
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::error::GatewayError;
use crate::market_data::gateway::MarketDataProvider;
use crate::types::{Bar, Pair, Timeframe};

pub struct HttpProvider {
    pub name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***redacted***"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
}

#[async_trait]
impl MarketDataProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), name = "provider::fetch", fields(provider = %self.name))]
    async fn fetch(&self, pair: &Pair, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, GatewayError> {
        let url = format!("{}/candles", self.base_url);
        let symbol = pair.0.replace('/', "");

        let mut req = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", timeframe.as_str()),
                ("limit", &count.to_string()),
            ]);

        if let Some(key) = &self.api_key {
            req = req.header("X-Api-Key", key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    provider: self.name.clone(),
                }
            } else {
                GatewayError::ProviderUnavailable {
                    provider: self.name.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            return Err(GatewayError::RateLimited {
                provider: self.name.clone(),
                retry_after_secs,
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Err(GatewayError::BadSymbol(pair.0.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderUnavailable {
                provider: self.name.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let rows: Vec<CandleRow> = response.json().await.map_err(|e| GatewayError::ProviderUnavailable {
            provider: self.name.clone(),
            reason: format!("unparsable response body: {e}"),
        })?;

        Ok(rows
            .into_iter()
            .map(|r| Bar {
                open_time: r.open_time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect())
    }
}
