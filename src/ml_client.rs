// =============================================================================
// ML Predictor Client — reversal prediction with circuit breaker
// =============================================================================
//
// POSTs the current indicator bundle to the ML service's `/predict/reversal`
// endpoint and returns a confidence + direction prediction. Protected by a
// three-state circuit breaker (closed/open/half-open) in the same spirit as
// the risk engine's daily-counter state machine: state lives behind one
// `RwLock<Inner>`, and every public method re-checks whether the breaker
// should transition before doing its own work.
//
// Breaker policy: N consecutive failures within a rolling window opens the
// breaker for a fixed cool-down; the next call after cool-down is a
// half-open probe — one failure reopens it immediately, one success closes
// it.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::MlError;
use crate::types::{Action, Factors, IndicatorSet, MarketCondition, Pair, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    window_started_at: Instant,
    reopen_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
struct PredictRequest<'a> {
    pair: &'a str,
    timeframe: &'a str,
    indicators: &'a IndicatorSet,
    market_condition: MarketCondition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlPrediction {
    pub direction: Action,
    pub confidence: f64,
    pub model_version: String,
    pub factors: Factors,
}

/// A predictor backend. Implemented once over HTTP and by test doubles.
#[async_trait]
pub trait MlClient: Send + Sync {
    async fn predict(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        indicators: &IndicatorSet,
        market_condition: MarketCondition,
    ) -> Result<MlPrediction, MlError>;

    /// Coarse health label for `/health`. Default "healthy" suits test
    /// doubles with no breaker state of their own.
    fn health(&self) -> &'static str {
        "healthy"
    }
}

pub struct HttpMlClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
    failure_threshold: u32,
    failure_window: Duration,
    breaker_open_duration: Duration,
    breaker: RwLock<Inner>,
}

impl HttpMlClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        failure_threshold: u32,
        failure_window: Duration,
        breaker_open_duration: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout,
            max_retries,
            failure_threshold,
            failure_window,
            breaker_open_duration,
            breaker: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window_started_at: Instant::now(),
                reopen_at: None,
            }),
        }
    }

    /// Decide whether a call may proceed right now, transitioning
    /// Open -> HalfOpen when the cool-down has elapsed.
    fn gate(&self) -> Result<bool, MlError> {
        let mut inner = self.breaker.write();
        match inner.state {
            BreakerState::Closed => Ok(true),
            BreakerState::HalfOpen => Ok(true),
            BreakerState::Open => {
                let reopen_at = inner.reopen_at.unwrap_or_else(Instant::now);
                if Instant::now() >= reopen_at {
                    inner.state = BreakerState::HalfOpen;
                    debug!("ml circuit breaker: open -> half_open probe");
                    Ok(true)
                } else {
                    Err(MlError::Unavailable {
                        reopen_at: format!("{:?}", reopen_at),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.breaker.write();
        if inner.state != BreakerState::Closed {
            debug!(from = ?inner.state, "ml circuit breaker: closing after success");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.window_started_at = Instant::now();
        inner.reopen_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.breaker.write();

        if inner.window_started_at.elapsed() > self.failure_window {
            inner.consecutive_failures = 0;
            inner.window_started_at = Instant::now();
        }
        inner.consecutive_failures += 1;

        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
            inner.reopen_at = Some(Instant::now() + self.breaker_open_duration);
            warn!(
                consecutive_failures = inner.consecutive_failures,
                "ml circuit breaker: opening"
            );
        }
    }
}

#[async_trait]
impl MlClient for HttpMlClient {
    fn health(&self) -> &'static str {
        match self.breaker.read().state {
            BreakerState::Closed => "healthy",
            BreakerState::HalfOpen => "degraded",
            BreakerState::Open => "unavailable",
        }
    }

    #[instrument(skip(self, indicators), name = "ml_client::predict", fields(pair = %pair, timeframe = %timeframe))]
    async fn predict(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        indicators: &IndicatorSet,
        market_condition: MarketCondition,
    ) -> Result<MlPrediction, MlError> {
        if !self.gate()? {
            return Err(MlError::Unavailable {
                reopen_at: "unknown".to_string(),
            });
        }

        let url = format!("{}/predict/reversal", self.base_url);
        let body = PredictRequest {
            pair: &pair.0,
            timeframe: timeframe.as_str(),
            indicators,
            market_condition,
        };

        // Only a connection error is retried (once, regardless of
        // `max_retries` beyond the first): a bad response body, a non-2xx
        // status, or a timeout are semantic outcomes from a server that did
        // respond, and retrying those would just repeat the same failure.
        let mut connect_retries_left = self.max_retries;

        loop {
            let attempt = tokio::time::timeout(self.timeout, self.client.post(&url).json(&body).send()).await;

            let result = match attempt {
                Ok(Ok(response)) if response.status().is_success() => {
                    match response.json::<MlPrediction>().await {
                        Ok(prediction) => {
                            self.record_success();
                            return Ok(prediction);
                        }
                        Err(e) => Err(MlError::BadResponse(e.to_string())),
                    }
                }
                Ok(Ok(response)) => Err(MlError::RequestFailed(format!("HTTP {}", response.status()))),
                Ok(Err(e)) if e.is_connect() && connect_retries_left > 0 => {
                    connect_retries_left -= 1;
                    debug!("ml client connect error, retrying once");
                    continue;
                }
                Ok(Err(e)) => Err(MlError::RequestFailed(e.to_string())),
                Err(_) => Err(MlError::Timeout),
            };

            self.record_failure();
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_indicators() -> IndicatorSet {
        IndicatorSet {
            sma_20: 1.1,
            ema_12: 1.1,
            ema_26: 1.1,
            rsi_14: 50.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            bb_upper: 1.11,
            bb_middle: 1.1,
            bb_lower: 1.09,
            bb_width_pct: 1.0,
            atr_14: 0.001,
            atr_pct: 0.1,
        }
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let client = HttpMlClient::new(
            "http://127.0.0.1:1", // nothing listening here
            Duration::from_millis(50),
            0,
            2,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );

        let pair = Pair::new("EUR/USD");
        let indicators = sample_indicators();

        for _ in 0..2 {
            let result = client
                .predict(&pair, Timeframe::M15, &indicators, MarketCondition::Calm)
                .await;
            assert!(result.is_err());
        }

        let result = client
            .predict(&pair, Timeframe::M15, &indicators, MarketCondition::Calm)
            .await;
        assert!(matches!(result, Err(MlError::Unavailable { .. })));
    }
}
