// =============================================================================
// Email Transport — HTTP-fronted transactional email gateway
// =============================================================================
//
// Delivered through an HTTP email-sending gateway (the same `reqwest`-based
// client shape as the Discord/LINE adapters) rather than a raw SMTP socket,
// since no SMTP crate is already part of the dependency stack and nothing
// else in this codebase talks SMTP directly. Retries on connection failure
// only, matching the documented "retries on connect failure" contract — a
// non-2xx response from the gateway itself is a permanent rejection.
// =============================================================================

use async_trait::async_trait;
use tracing::warn;

use crate::error::TransportError;
use crate::transports::{ChannelTransport, DeliveryOutcome};
use crate::types::{Signal, SignalChange};

const MAX_CONNECT_RETRIES: u32 = 2;

pub struct EmailTransport {
    gateway_url: Option<String>,
    client: reqwest::Client,
}

impl EmailTransport {
    pub fn new(gateway_url: Option<String>) -> Self {
        Self {
            gateway_url,
            client: reqwest::Client::new(),
        }
    }

    fn render(signal: &Signal) -> serde_json::Value {
        serde_json::json!({
            "subject": format!("{} {} signal: {:?}", signal.pair.0, signal.timeframe, signal.action),
            "body": format!(
                "Confidence {:.2}, strength {:?}, entry {}",
                signal.confidence, signal.strength, signal.entry_price
            ),
        })
    }
}

#[async_trait]
impl ChannelTransport for EmailTransport {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(
        &self,
        subscriber_id: &str,
        _change: &SignalChange,
        signal: &Signal,
    ) -> Result<DeliveryOutcome, TransportError> {
        let Some(gateway_url) = &self.gateway_url else {
            return Err(TransportError::NotConfigured("email".to_string()));
        };

        let body = serde_json::json!({
            "to": subscriber_id,
            "message": Self::render(signal),
        });

        let mut attempt = 0u32;
        loop {
            match self.client.post(gateway_url).json(&body).send().await {
                Ok(response) if response.status().is_success() => return Ok(DeliveryOutcome::Sent),
                Ok(response) => {
                    warn!(subscriber_id, status = %response.status(), "email gateway rejected, dropping");
                    return Ok(DeliveryOutcome::Dropped(format!(
                        "gateway status {}",
                        response.status()
                    )));
                }
                Err(e) if e.is_connect() && attempt < MAX_CONNECT_RETRIES => {
                    attempt += 1;
                    warn!(subscriber_id, attempt, "email gateway connect failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(TransportError::RequestFailed {
                        transport: "email".to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
