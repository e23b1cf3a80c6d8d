// =============================================================================
// Discord Transport — webhook delivery with vendor-specific retry policy
// =============================================================================
//
// `429` is the only status the Dispatcher itself requeues (once); `5xx`
// retries happen inside this adapter via a short exponential backoff since
// they're specific to Discord's own reliability, not a generic dispatcher
// concern. Any other `4xx` is a permanent rejection (bad webhook, revoked
// token) and is dropped immediately rather than retried.
// =============================================================================

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::warn;

use crate::error::TransportError;
use crate::transports::{ChannelTransport, DeliveryOutcome};
use crate::types::{Signal, SignalChange};

const MAX_5XX_RETRIES: u32 = 3;

pub struct DiscordTransport {
    webhook_base: Option<String>,
    client: reqwest::Client,
}

impl DiscordTransport {
    pub fn new(webhook_base: Option<String>) -> Self {
        Self {
            webhook_base,
            client: reqwest::Client::new(),
        }
    }

    fn webhook_url(&self, subscriber_id: &str) -> Option<String> {
        self.webhook_base
            .as_ref()
            .map(|base| format!("{base}/{subscriber_id}"))
    }

    fn render(change: &SignalChange, signal: &Signal) -> serde_json::Value {
        let mut fields = vec![
            serde_json::json!({"name": "action", "value": format!("{:?}", signal.action)}),
            serde_json::json!({"name": "confidence", "value": format!("{:.0}%", signal.confidence * 100.0)}),
            serde_json::json!({"name": "strength", "value": format!("{:?}", signal.strength)}),
            serde_json::json!({"name": "entry", "value": format!("{}", signal.entry_price)}),
        ];
        if let Some(sl) = signal.stop_loss {
            fields.push(serde_json::json!({"name": "stop loss", "value": format!("{sl}")}));
        }
        if let Some(tp) = signal.take_profit {
            fields.push(serde_json::json!({"name": "take profit", "value": format!("{tp}")}));
        }
        if let Some(rr) = signal.risk_reward_ratio {
            fields.push(serde_json::json!({"name": "risk:reward", "value": format!("{rr:.2}")}));
        }
        fields.push(serde_json::json!({"name": "source", "value": format!("{:?}", signal.source)}));
        if let Some(model_version) = &signal.model_version {
            fields.push(serde_json::json!({"name": "model", "value": model_version}));
        }

        serde_json::json!({
            "content": format!(
                "{} {} {:?} confidence {:.0}%",
                signal.pair.0, signal.timeframe, signal.action, signal.confidence * 100.0
            ),
            "embeds": [{
                "title": format!("{} {}", signal.pair.0, signal.timeframe),
                "fields": fields,
                "timestamp": change.detected_at.to_rfc3339(),
            }],
        })
    }
}

#[async_trait]
impl ChannelTransport for DiscordTransport {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(
        &self,
        subscriber_id: &str,
        change: &SignalChange,
        signal: &Signal,
    ) -> Result<DeliveryOutcome, TransportError> {
        let Some(url) = self.webhook_url(subscriber_id) else {
            return Err(TransportError::NotConfigured("discord".to_string()));
        };

        let body = Self::render(change, signal);
        let mut attempt = 0u32;
        let mut backoff_secs = 1u64;

        loop {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| TransportError::RequestFailed {
                    transport: "discord".to_string(),
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
                    warn!(subscriber_id, status = %status, "discord webhook failed after retries, dropping");
                    return Ok(DeliveryOutcome::Dropped(format!("server error {status}")));
                }
                tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                backoff_secs *= 2;
                continue;
            }

            // Any other 4xx: permanent rejection.
            warn!(subscriber_id, status = %status, "discord webhook rejected, dropping");
            return Ok(DeliveryOutcome::Dropped(format!("client error {status}")));
        }
    }
}
