// =============================================================================
// WebSocket Transport — room-based broadcast
// =============================================================================
//
// Two room namespaces share one registry: `user:{subscriber_id}` for
// subscriber-targeted delivery (this transport) and `pair:{pair}` for the
// public live-price stream the API layer fans out on its own (see
// `api::ws`). A room with no connected sockets is a normal, frequent state —
// most subscribers are offline most of the time — so an empty room is not an
// error, just a dropped delivery.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transports::{ChannelTransport, DeliveryOutcome};
use crate::types::{Pair, Signal, SignalChange};

pub fn user_room(subscriber_id: &str) -> String {
    format!("user:{subscriber_id}")
}

pub fn pair_room(pair: &Pair) -> String {
    format!("pair:{}", pair.0)
}

/// Registry of live socket senders per room, shared between the WebSocket
/// transport (subscriber notifications) and the public price-stream
/// endpoint (pair rooms).
#[derive(Clone)]
pub struct WebSocketHub {
    rooms: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>>,
}

impl WebSocketHub {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn join(&self, room: &str, sender: mpsc::UnboundedSender<Message>) {
        self.rooms.write().entry(room.to_string()).or_default().push(sender);
    }

    /// Non-blocking broadcast to every live socket in `room`. Dead senders
    /// (socket closed without an explicit leave) are pruned opportunistically.
    /// Returns `true` if at least one socket received the message.
    pub fn broadcast(&self, room: &str, message: Message) -> bool {
        let mut rooms = self.rooms.write();
        let Some(senders) = rooms.get_mut(room) else {
            return false;
        };
        let mut delivered = false;
        senders.retain(|tx| {
            let ok = tx.send(message.clone()).is_ok();
            delivered |= ok;
            ok
        });
        if senders.is_empty() {
            rooms.remove(room);
        }
        delivered
    }

    pub fn room_is_empty(&self, room: &str) -> bool {
        self.rooms.read().get(room).map(|v| v.is_empty()).unwrap_or(true)
    }
}

impl Default for WebSocketHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WebSocketTransport {
    hub: WebSocketHub,
}

impl WebSocketTransport {
    pub fn new(hub: WebSocketHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn send(
        &self,
        subscriber_id: &str,
        change: &SignalChange,
        signal: &Signal,
    ) -> Result<DeliveryOutcome, TransportError> {
        let room = user_room(subscriber_id);
        let payload = serde_json::json!({
            "event": "trading:signal",
            "change": change,
            "signal": signal,
        });
        let message = Message::Text(payload.to_string());

        if self.hub.broadcast(&room, message) {
            Ok(DeliveryOutcome::Sent)
        } else {
            Ok(DeliveryOutcome::Dropped("no connected socket".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_to_empty_room_reports_no_delivery() {
        let hub = WebSocketHub::new();
        assert!(!hub.broadcast("user:alice", Message::Text("hi".into())));
    }

    #[test]
    fn broadcast_delivers_to_joined_socket() {
        let hub = WebSocketHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.join("user:alice", tx);
        assert!(hub.broadcast("user:alice", Message::Text("hi".into())));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn transport_drops_when_subscriber_offline() {
        let hub = WebSocketHub::new();
        let transport = WebSocketTransport::new(hub);
        let signal = crate::synthesizer::tests_support::sample_signal();
        let change = SignalChange {
            id: uuid::Uuid::new_v4(),
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
            old_action: None,
            new_action: signal.action,
            old_confidence: None,
            new_confidence: signal.confidence,
            strength: signal.strength,
            market_condition: signal.market_condition,
            detected_at: signal.generated_at,
            notified_at: None,
            notified_subscribers: vec![],
        };
        let outcome = transport.send("alice", &change, &signal).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Dropped("no connected socket".to_string()));
    }
}
