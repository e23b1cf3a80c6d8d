// =============================================================================
// Scheduler — fires a Tick for each active (pair, timeframe) on its own period
// =============================================================================
//
// One background task per (pair, timeframe), each sleeping for
// `period + jitter` before pushing a `Tick` onto a shared bounded queue. The
// queue is a `parking_lot::Mutex<VecDeque<_>>` guarded ring, the same shape
// the candle ring buffer used for its per-key history — here keyed by
// nothing (it's a single shared queue) but bounded the same way, with
// same-key coalescing replacing raw drop-oldest when the queue is full.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::types::{Pair, Timeframe};

#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub scheduled_at: DateTime<Utc>,
}

struct TickQueueInner {
    items: VecDeque<Tick>,
    capacity: usize,
}

/// Bounded FIFO queue with same-(pair, timeframe) coalescing on overflow:
/// the oldest tick sharing the incoming tick's key is dropped in its favor
/// rather than the queue simply refusing the push.
struct TickQueue {
    inner: Mutex<TickQueueInner>,
    notify: Notify,
}

impl TickQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TickQueueInner {
                items: VecDeque::new(),
                capacity: capacity.max(1),
            }),
            notify: Notify::new(),
        }
    }

    fn push(&self, tick: Tick) {
        {
            let mut inner = self.inner.lock();
            if inner.items.len() >= inner.capacity {
                if let Some(pos) = inner
                    .items
                    .iter()
                    .position(|t| t.pair == tick.pair && t.timeframe == tick.timeframe)
                {
                    inner.items.remove(pos);
                    debug!(pair = %tick.pair, timeframe = %tick.timeframe, "coalesced deferred tick for same stream");
                } else {
                    let dropped = inner.items.pop_front();
                    if let Some(dropped) = dropped {
                        warn!(pair = %dropped.pair, timeframe = %dropped.timeframe, "scheduler queue full, dropping oldest tick");
                    }
                }
            }
            inner.items.push_back(tick);
        }
        self.notify.notify_one();
    }

    async fn pop(&self) -> Tick {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(tick) = inner.items.pop_front() {
                    return tick;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Effective firing period for `timeframe`, applying the `1m` coalescing
/// floor so per-minute streams never fire more often than
/// `min_effective_period_secs`.
fn effective_period(timeframe: Timeframe, cfg: &SchedulerConfig) -> StdDuration {
    let nominal = timeframe.seconds();
    let floor = cfg.min_effective_period_secs;
    StdDuration::from_secs(nominal.max(floor))
}

fn jitter(period: StdDuration, jitter_fraction: f64) -> StdDuration {
    let max_jitter_secs = period.as_secs_f64() * jitter_fraction;
    if max_jitter_secs <= 0.0 {
        return StdDuration::ZERO;
    }
    let secs = rand::rng().random_range(0.0..max_jitter_secs);
    StdDuration::from_secs_f64(secs)
}

pub struct Scheduler {
    queue: Arc<TickQueue>,
    config: SchedulerConfig,
    shutdown: watch::Sender<bool>,
    streams: Mutex<Vec<(Pair, Timeframe)>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, active_stream_count: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue: Arc::new(TickQueue::new((active_stream_count * 2).max(2))),
            config,
            shutdown,
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Idempotent: registering the same (pair, timeframe) twice spawns only
    /// one ticking task for it.
    pub fn start_stream(self: &Arc<Self>, pair: Pair, timeframe: Timeframe) {
        {
            let mut streams = self.streams.lock();
            if streams.iter().any(|(p, t)| p == &pair && *t == timeframe) {
                return;
            }
            streams.push((pair.clone(), timeframe));
        }

        let queue = self.queue.clone();
        let period = effective_period(timeframe, &self.config);
        let jitter_fraction = self.config.jitter_fraction;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            info!(pair = %pair, timeframe = %timeframe, period_secs = period.as_secs(), "scheduler stream started");
            loop {
                let sleep_for = period + jitter(period, jitter_fraction);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!(pair = %pair, timeframe = %timeframe, "scheduler stream stopping");
                            return;
                        }
                    }
                }
                if *shutdown_rx.borrow() {
                    return;
                }
                queue.push(Tick {
                    pair: pair.clone(),
                    timeframe,
                    scheduled_at: Utc::now(),
                });
            }
        });
    }

    /// Pop the next tick, waiting if the queue is empty. Callers (the main
    /// evaluation loop) drive the gateway → synthesizer → store pipeline.
    pub async fn next_tick(&self) -> Tick {
        self.queue.pop().await
    }

    /// Begins firing (a no-op here: streams start firing the moment
    /// `start_stream` is called). Present for symmetry with the documented
    /// `start()`/`stop()` contract and to make intent explicit at the call
    /// site.
    pub fn start(&self) {
        info!("scheduler running");
    }

    /// Signals every stream task to stop; tasks finish their current sleep
    /// iteration (at most one period) before exiting, which is the grace
    /// window. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_same_key_on_overflow() {
        let queue = TickQueue::new(2);
        let pair = Pair::new("EUR/USD");
        queue.push(Tick { pair: pair.clone(), timeframe: Timeframe::M15, scheduled_at: Utc::now() });
        queue.push(Tick { pair: Pair::new("GBP/USD"), timeframe: Timeframe::M15, scheduled_at: Utc::now() });
        // Third push with a duplicate key for pair/M15 should coalesce, not
        // evict the unrelated GBP/USD tick.
        queue.push(Tick { pair: pair.clone(), timeframe: Timeframe::M15, scheduled_at: Utc::now() });

        let inner = queue.inner.lock();
        assert_eq!(inner.items.len(), 2);
        assert!(inner.items.iter().any(|t| t.pair.0 == "GBP/USD"));
    }

    #[test]
    fn effective_period_floors_one_minute_stream() {
        let cfg = SchedulerConfig {
            jitter_fraction: 0.1,
            min_effective_period_secs: 15,
        };
        // M1's nominal 60s bar length already exceeds the 15s floor, so it wins.
        assert_eq!(effective_period(Timeframe::M1, &cfg), StdDuration::from_secs(60));
        assert_eq!(effective_period(Timeframe::H1, &cfg), StdDuration::from_secs(3600));
    }

    #[tokio::test]
    async fn start_stream_is_idempotent_in_registration() {
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig {
                jitter_fraction: 0.0,
                min_effective_period_secs: 1,
            },
            4,
        ));
        scheduler.start_stream(Pair::new("EUR/USD"), Timeframe::M1);
        scheduler.start_stream(Pair::new("EUR/USD"), Timeframe::M1);
        assert_eq!(scheduler.streams.lock().len(), 1);
        scheduler.stop();
    }
}
