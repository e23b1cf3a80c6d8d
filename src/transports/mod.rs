// =============================================================================
// Transports — per-channel delivery adapters
// =============================================================================
//
// One `Transport` async trait implemented per channel. Each adapter owns its
// own retry/backoff policy since the rules genuinely differ per vendor
// (Discord's 429 `Retry-After` vs. LINE's equivalent vs. WebSocket's
// fire-and-forget room broadcast); the Dispatcher only needs to know whether
// a send succeeded, should be retried, or was permanently dropped.
// =============================================================================

pub mod discord;
pub mod email;
pub mod line;
pub mod websocket;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Signal, SignalChange};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// Retry after the given number of seconds (vendor-specified or backoff).
    RetryAfter(u64),
    /// Permanently dropped — do not retry (e.g. a 4xx that isn't a rate limit).
    Dropped(String),
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        subscriber_id: &str,
        change: &SignalChange,
        signal: &Signal,
    ) -> Result<DeliveryOutcome, TransportError>;
}
