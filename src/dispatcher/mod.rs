// =============================================================================
// Dispatcher — bounded worker pool draining planned deliveries
// =============================================================================
//
// `W` workers (`AppConfig::dispatcher_workers`, default 32) pull jobs off a
// bounded `tokio::sync::mpsc` queue; a full queue rejects new submissions
// rather than blocking the planner, with a `warn!` standing in for the
// metric counter the real deployment would wire up. Per-subscriber
// serialization uses a `RwLock<HashMap<SubscriberId, Arc<tokio::sync::Mutex<()>>>>`
// lock table — the same per-key lock-table shape the signal store and
// scheduler use, just keyed by subscriber instead of (pair, timeframe) or
// nothing at all.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::signal_store::SignalStore;
use crate::transports::{ChannelTransport, DeliveryOutcome};
use crate::types::{Signal, SignalChange, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Queued,
    InFlight,
    Succeeded,
    Retrying,
    Failed,
}

pub struct DeliveryJob {
    pub subscriber_id: String,
    pub transport: Transport,
    pub change: SignalChange,
    pub signal: Signal,
}

pub struct Dispatcher {
    tx: mpsc::Sender<DeliveryJob>,
    locks: Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl Dispatcher {
    /// Spawns `workers` tasks draining a queue of capacity `queue_capacity`.
    /// `transports` maps each `Transport` variant to the adapter that serves it.
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        transports: HashMap<Transport, Arc<dyn ChannelTransport>>,
        store: Arc<dyn SignalStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let locks: Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>> = Arc::new(RwLock::new(HashMap::new()));
        let transports = Arc::new(transports);

        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let locks = locks.clone();
            let transports = transports.clone();
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        info!(worker_id, "dispatcher worker shutting down, channel closed");
                        return;
                    };
                    process_job(worker_id, job, &locks, &transports, store.as_ref()).await;
                }
            });
        }

        Self { tx, locks }
    }

    /// Enqueues `job`. Returns `false` (reject-new) if the bounded queue is full.
    pub fn submit(&self, job: DeliveryJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dispatcher queue full, rejecting delivery");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("dispatcher queue closed, rejecting delivery");
                false
            }
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

fn subscriber_lock(
    locks: &Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>>,
    subscriber_id: &str,
) -> Arc<AsyncMutex<()>> {
    if let Some(lock) = locks.read().get(subscriber_id) {
        return lock.clone();
    }
    locks
        .write()
        .entry(subscriber_id.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
}

async fn process_job(
    worker_id: usize,
    job: DeliveryJob,
    locks: &Arc<RwLock<HashMap<String, Arc<AsyncMutex<()>>>>>,
    transports: &Arc<HashMap<Transport, Arc<dyn ChannelTransport>>>,
    store: &dyn SignalStore,
) {
    let lock = subscriber_lock(locks, &job.subscriber_id);
    let _guard = lock.lock().await;

    let Some(transport) = transports.get(&job.transport) else {
        warn!(subscriber_id = %job.subscriber_id, transport = ?job.transport, "no adapter configured for transport, dropping");
        return;
    };

    let mut state = DeliveryState::InFlight;
    let mut outcome = transport.send(&job.subscriber_id, &job.change, &job.signal).await;

    if let Ok(DeliveryOutcome::RetryAfter(retry_after_secs)) = &outcome {
        state = DeliveryState::Retrying;
        info!(worker_id, subscriber_id = %job.subscriber_id, retry_after_secs, "requeueing delivery once after rate limit");
        tokio::time::sleep(std::time::Duration::from_secs(*retry_after_secs)).await;
        outcome = transport.send(&job.subscriber_id, &job.change, &job.signal).await;
    }

    match outcome {
        Ok(DeliveryOutcome::Sent) => {
            state = DeliveryState::Succeeded;
            store
                .mark_notified(
                    &job.change.pair,
                    job.change.timeframe,
                    job.change.id,
                    &job.subscriber_id,
                    Utc::now(),
                )
                .await;
            info!(worker_id, subscriber_id = %job.subscriber_id, transport = transport.name(), ?state, "delivery succeeded");
        }
        Ok(DeliveryOutcome::RetryAfter(_)) => {
            state = DeliveryState::Failed;
            warn!(worker_id, subscriber_id = %job.subscriber_id, transport = transport.name(), "delivery still rate limited after one requeue, dropping");
        }
        Ok(DeliveryOutcome::Dropped(reason)) => {
            state = DeliveryState::Failed;
            warn!(worker_id, subscriber_id = %job.subscriber_id, transport = transport.name(), reason, "delivery dropped");
        }
        Err(e) => {
            state = DeliveryState::Failed;
            warn!(worker_id, subscriber_id = %job.subscriber_id, transport = transport.name(), error = %e, "delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_store::InMemorySignalStore;
    use crate::synthesizer::tests_support::sample_signal;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    struct CountingTransport {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelTransport for CountingTransport {
        fn name(&self) -> &'static str {
            "test"
        }
        async fn send(
            &self,
            _subscriber_id: &str,
            _change: &SignalChange,
            _signal: &Signal,
        ) -> Result<DeliveryOutcome, crate::error::TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryOutcome::Sent)
        }
    }

    fn sample_change(signal: &Signal) -> SignalChange {
        SignalChange {
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
        }
    }

    #[tokio::test]
    async fn successful_delivery_marks_notified_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<Transport, Arc<dyn ChannelTransport>> = HashMap::new();
        transports.insert(Transport::WebSocket, Arc::new(CountingTransport { calls: calls.clone() }));

        let store = Arc::new(InMemorySignalStore::new());
        let dispatcher = Dispatcher::new(2, 8, transports, store.clone());

        let signal = sample_signal();
        let change = sample_change(&signal);
        store.put_with_change(signal.clone(), Some(change.clone())).await.unwrap();

        dispatcher.submit(DeliveryJob {
            subscriber_id: "alice".to_string(),
            transport: Transport::WebSocket,
            change: change.clone(),
            signal: signal.clone(),
        });

        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let last = store.last_change(&signal.pair, signal.timeframe).await.unwrap();
        assert_eq!(last.notified_subscribers, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn missing_transport_adapter_is_dropped_quietly() {
        let transports: HashMap<Transport, Arc<dyn ChannelTransport>> = HashMap::new();
        let store = Arc::new(InMemorySignalStore::new());
        let dispatcher = Dispatcher::new(1, 8, transports, store);

        let signal = sample_signal();
        let change = sample_change(&signal);
        let accepted = dispatcher.submit(DeliveryJob {
            subscriber_id: "alice".to_string(),
            transport: Transport::Discord,
            change,
            signal,
        });
        assert!(accepted);
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn full_queue_rejects_new_submissions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<Transport, Arc<dyn ChannelTransport>> = HashMap::new();
        transports.insert(Transport::WebSocket, Arc::new(CountingTransport { calls }));
        let store = Arc::new(InMemorySignalStore::new());
        // Zero workers would never drain; use a tiny capacity with workers
        // that haven't been scheduled yet to force a full queue deterministically
        // is racy, so instead assert the capacity floor behavior directly.
        let dispatcher = Dispatcher::new(1, 1, transports, store);
        let signal = sample_signal();
        let change = sample_change(&signal);
        let _ = dispatcher.submit(DeliveryJob {
            subscriber_id: "a".into(),
            transport: Transport::WebSocket,
            change: change.clone(),
            signal: signal.clone(),
        });
        // Not asserting rejection here (inherently racy against the worker
        // drain); this test exists to exercise the reject-new code path
        // without panicking.
        let _ = dispatcher.submit(DeliveryJob {
            subscriber_id: "b".into(),
            transport: Transport::WebSocket,
            change,
            signal,
        });
    }

    #[tokio::test]
    async fn distinct_subscribers_get_distinct_locks() {
        let transports: HashMap<Transport, Arc<dyn ChannelTransport>> = HashMap::new();
        let store = Arc::new(InMemorySignalStore::new());
        let dispatcher = Dispatcher::new(1, 8, transports, store);
        let signal = sample_signal();
        let change = sample_change(&signal);
        dispatcher.submit(DeliveryJob {
            subscriber_id: "a".into(),
            transport: Transport::WebSocket,
            change: change.clone(),
            signal: signal.clone(),
        });
        dispatcher.submit(DeliveryJob {
            subscriber_id: "b".into(),
            transport: Transport::WebSocket,
            change,
            signal,
        });
        sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.lock_count(), 2);
    }
}
