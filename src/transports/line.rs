// =============================================================================
// LINE Transport — push message delivery, analogous to the Discord adapter
// =============================================================================

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::warn;

use crate::error::TransportError;
use crate::transports::{ChannelTransport, DeliveryOutcome};
use crate::types::{Signal, SignalChange};

const MAX_5XX_RETRIES: u32 = 3;
const LINE_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

pub struct LineTransport {
    channel_token: Option<String>,
    client: reqwest::Client,
}

impl LineTransport {
    pub fn new(channel_token: Option<String>) -> Self {
        Self {
            channel_token,
            client: reqwest::Client::new(),
        }
    }

    fn render(signal: &Signal) -> serde_json::Value {
        let mut text = format!(
            "{} {} {:?} confidence {:.0}% ({:?})\nentry {}",
            signal.pair.0, signal.timeframe, signal.action, signal.confidence * 100.0, signal.strength, signal.entry_price
        );
        if let Some(sl) = signal.stop_loss {
            text.push_str(&format!("\nSL {sl}"));
        }
        if let Some(tp) = signal.take_profit {
            text.push_str(&format!("\nTP {tp}"));
        }
        if let Some(rr) = signal.risk_reward_ratio {
            text.push_str(&format!("\nR:R {rr:.2}"));
        }
        text.push_str(&format!("\nsource {:?}", signal.source));
        if let Some(model_version) = &signal.model_version {
            text.push_str(&format!(" ({model_version})"));
        }
        serde_json::json!({
            "type": "text",
            "text": text,
        })
    }
}

#[async_trait]
impl ChannelTransport for LineTransport {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn send(
        &self,
        subscriber_id: &str,
        _change: &SignalChange,
        signal: &Signal,
    ) -> Result<DeliveryOutcome, TransportError> {
        let Some(token) = &self.channel_token else {
            return Err(TransportError::NotConfigured("line".to_string()));
        };

        let body = serde_json::json!({
            "to": subscriber_id,
            "messages": [Self::render(signal)],
        });

        let mut attempt = 0u32;
        let mut backoff_secs = 1u64;

        loop {
            let response = self
                .client
                .post(LINE_PUSH_URL)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| TransportError::RequestFailed {
                    transport: "line".to_string(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(DeliveryOutcome::Sent);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(1);
                return Ok(DeliveryOutcome::RetryAfter(retry_after));
            }

            if status.is_server_error() {
                attempt += 1;
                if attempt > MAX_5XX_RETRIES {
                    warn!(subscriber_id, status = %status, "line push failed after retries, dropping");
                    return Ok(DeliveryOutcome::Dropped(format!("server error {status}")));
                }
                tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                backoff_secs *= 2;
                continue;
            }

            warn!(subscriber_id, status = %status, "line push rejected, dropping");
            return Ok(DeliveryOutcome::Dropped(format!("client error {status}")));
        }
    }
}
