// =============================================================================
// Signal Store — append-only signal history + change log
// =============================================================================
//
// `InMemorySignalStore` is the default `SignalStore` implementation: one
// `parking_lot::Mutex` per (pair, timeframe) guards the `put` + `append_change`
// pair so the two writes are serializable with respect to concurrent writers
// for the *same* stream, while different (pair, timeframe) streams proceed
// fully independently — the same per-key-lock shape the original position
// manager used for its `RwLock<Vec<_>>` ownership of open positions, just
// narrowed to a per-key mutex instead of one lock over everything.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{Pair, Signal, SignalChange, SignalStatus, Timeframe};

type StreamKey = (String, Timeframe);

/// Per-stream history: signals oldest-first, change log oldest-first.
#[derive(Default)]
struct StreamHistory {
    signals: Vec<Signal>,
    changes: Vec<SignalChange>,
}

fn legal_transition(from: SignalStatus, to: SignalStatus) -> bool {
    matches!(
        (from, to),
        (
            SignalStatus::Active,
            SignalStatus::Triggered
                | SignalStatus::Stopped
                | SignalStatus::Expired
                | SignalStatus::Cancelled
        )
    )
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn get_latest(&self, pair: &Pair, timeframe: Timeframe) -> Option<Signal>;

    /// Atomically append `signal` and, if present, `change` under the same
    /// per-(pair, timeframe) lock — this is the "single transaction"
    /// requirement from the store's isolation contract.
    async fn put_with_change(
        &self,
        signal: Signal,
        change: Option<SignalChange>,
    ) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        signal_id: uuid::Uuid,
        new_status: SignalStatus,
        triggered_at: Option<chrono::DateTime<chrono::Utc>>,
        triggered_price: Option<f64>,
    ) -> Result<(), StoreError>;

    async fn last_change(&self, pair: &Pair, timeframe: Timeframe) -> Option<SignalChange>;

    /// Mark `subscriber_id` as notified for `change_id`, stamping `notified_at`
    /// if this is the first successful delivery for that change. Never called
    /// on a failed delivery.
    async fn mark_notified(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        change_id: uuid::Uuid,
        subscriber_id: &str,
        notified_at: chrono::DateTime<chrono::Utc>,
    );

    /// All changes recorded for `pair`/`timeframe` where `subscriber_id`
    /// appears in `notified_subscribers`, newest first. Used by the Delivery
    /// Planner's cooldown and daily-cap filters.
    async fn notified_changes_for(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        subscriber_id: &str,
    ) -> Vec<SignalChange>;
}

pub struct InMemorySignalStore {
    streams: Mutex<HashMap<StreamKey, Arc<Mutex<StreamHistory>>>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn stream_lock(&self, pair: &Pair, timeframe: Timeframe) -> Arc<Mutex<StreamHistory>> {
        let key = (pair.0.clone(), timeframe);
        let mut streams = self.streams.lock();
        streams
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(StreamHistory::default())))
            .clone()
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn get_latest(&self, pair: &Pair, timeframe: Timeframe) -> Option<Signal> {
        let lock = self.stream_lock(pair, timeframe);
        let history = lock.lock();
        history.signals.last().cloned()
    }

    async fn put_with_change(
        &self,
        signal: Signal,
        change: Option<SignalChange>,
    ) -> Result<(), StoreError> {
        let lock = self.stream_lock(&signal.pair, signal.timeframe);
        let mut history = lock.lock();
        history.signals.push(signal);
        if let Some(change) = change {
            history.changes.push(change);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        signal_id: uuid::Uuid,
        new_status: SignalStatus,
        triggered_at: Option<chrono::DateTime<chrono::Utc>>,
        triggered_price: Option<f64>,
    ) -> Result<(), StoreError> {
        let lock = self.stream_lock(pair, timeframe);
        let mut history = lock.lock();

        let signal = history
            .signals
            .iter_mut()
            .find(|s| s.id == signal_id)
            .ok_or_else(|| StoreError::NotFound {
                pair: pair.0.clone(),
                timeframe: timeframe.to_string(),
            })?;

        if signal.status == new_status {
            // Re-applying the same terminal status is a no-op success.
            return Ok(());
        }

        if !legal_transition(signal.status, new_status) {
            return Err(StoreError::InvalidTransition {
                pair: pair.0.clone(),
                timeframe: timeframe.to_string(),
                from: format!("{:?}", signal.status),
                to: format!("{:?}", new_status),
            });
        }

        signal.status = new_status;
        if triggered_at.is_some() {
            signal.triggered_at = triggered_at;
        }
        if triggered_price.is_some() {
            signal.triggered_price = triggered_price;
        }
        Ok(())
    }

    async fn last_change(&self, pair: &Pair, timeframe: Timeframe) -> Option<SignalChange> {
        let lock = self.stream_lock(pair, timeframe);
        let history = lock.lock();
        history.changes.last().cloned()
    }

    async fn mark_notified(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        change_id: uuid::Uuid,
        subscriber_id: &str,
        notified_at: chrono::DateTime<chrono::Utc>,
    ) {
        let lock = self.stream_lock(pair, timeframe);
        let mut history = lock.lock();
        if let Some(change) = history.changes.iter_mut().find(|c| c.id == change_id) {
            if change.notified_at.is_none() {
                change.notified_at = Some(notified_at);
            }
            if !change.notified_subscribers.iter().any(|s| s == subscriber_id) {
                change.notified_subscribers.push(subscriber_id.to_string());
            }
        }
    }

    async fn notified_changes_for(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        subscriber_id: &str,
    ) -> Vec<SignalChange> {
        let lock = self.stream_lock(pair, timeframe);
        let history = lock.lock();
        let mut changes: Vec<SignalChange> = history
            .changes
            .iter()
            .filter(|c| c.notified_subscribers.iter().any(|s| s == subscriber_id))
            .cloned()
            .collect();
        changes.sort_by_key(|c| std::cmp::Reverse(c.notified_at.unwrap_or(c.detected_at)));
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::tests_support::sample_signal;
    use crate::types::Action;

    #[tokio::test]
    async fn put_is_append_only() {
        let store = InMemorySignalStore::new();
        let s1 = sample_signal();
        let pair = s1.pair.clone();
        let tf = s1.timeframe;
        store.put_with_change(s1.clone(), None).await.unwrap();

        let mut s2 = sample_signal();
        s2.pair = pair.clone();
        s2.timeframe = tf;
        store.put_with_change(s2.clone(), None).await.unwrap();

        let latest = store.get_latest(&pair, tf).await.unwrap();
        assert_eq!(latest.id, s2.id);
    }

    #[tokio::test]
    async fn update_status_rejects_illegal_transition() {
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.status = SignalStatus::Triggered;
        let pair = signal.pair.clone();
        let tf = signal.timeframe;
        let id = signal.id;
        store.put_with_change(signal, None).await.unwrap();

        let result = store
            .update_status(&pair, tf, id, SignalStatus::Active, None, None)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn update_status_same_terminal_status_is_noop() {
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.status = SignalStatus::Stopped;
        let pair = signal.pair.clone();
        let tf = signal.timeframe;
        let id = signal.id;
        store.put_with_change(signal, None).await.unwrap();

        let result = store
            .update_status(&pair, tf, id, SignalStatus::Stopped, None, None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn update_status_legal_transition_succeeds() {
        let store = InMemorySignalStore::new();
        let signal = sample_signal(); // status Active by construction
        let pair = signal.pair.clone();
        let tf = signal.timeframe;
        let id = signal.id;
        store.put_with_change(signal, None).await.unwrap();

        let now = chrono::Utc::now();
        let result = store
            .update_status(&pair, tf, id, SignalStatus::Triggered, Some(now), Some(1.1005))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn mark_notified_stamps_once() {
        let store = InMemorySignalStore::new();
        let signal = sample_signal();
        let pair = signal.pair.clone();
        let tf = signal.timeframe;

        let change = SignalChange {
            id: uuid::Uuid::new_v4(),
            pair: pair.clone(),
            timeframe: tf,
            old_action: None,
            new_action: Action::Buy,
            old_confidence: None,
            new_confidence: 0.7,
            strength: crate::types::Strength::Strong,
            market_condition: crate::types::MarketCondition::Trending,
            detected_at: chrono::Utc::now(),
            notified_at: None,
            notified_subscribers: vec![],
        };
        let change_id = change.id;
        store.put_with_change(signal, Some(change)).await.unwrap();

        let t1 = chrono::Utc::now();
        store.mark_notified(&pair, tf, change_id, "sub-1", t1).await;
        let t2 = t1 + chrono::Duration::seconds(5);
        store.mark_notified(&pair, tf, change_id, "sub-1", t2).await;

        let last = store.last_change(&pair, tf).await.unwrap();
        assert_eq!(last.notified_at, Some(t1));
        assert_eq!(last.notified_subscribers, vec!["sub-1".to_string()]);
    }

    #[tokio::test]
    async fn different_streams_are_independent() {
        let store = InMemorySignalStore::new();
        let mut s1 = sample_signal();
        s1.pair = Pair::new("EUR/USD");
        let mut s2 = sample_signal();
        s2.pair = Pair::new("GBP/USD");

        store.put_with_change(s1.clone(), None).await.unwrap();
        store.put_with_change(s2.clone(), None).await.unwrap();

        assert_eq!(
            store.get_latest(&s1.pair, s1.timeframe).await.unwrap().id,
            s1.id
        );
        assert_eq!(
            store.get_latest(&s2.pair, s2.timeframe).await.unwrap().id,
            s2.id
        );
    }
}
