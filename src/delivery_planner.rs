// =============================================================================
// Delivery Planner — turns a SignalChange into planned (subscriber, transport)
// deliveries
// =============================================================================
//
// Runs the seven-step filter chain against every subscription returned by the
// Subscription Registry for the change's (pair, timeframe). `chrono-tz`
// resolves each subscriber's IANA timezone for both the mute-window check and
// the daily-cap's "since subscriber-local midnight" boundary; an
// unparseable timezone name falls back to `Etc/UTC` with a logged warning
// rather than panicking a background task.
// =============================================================================

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::signal_store::SignalStore;
use crate::subscription_registry::SubscriptionRegistry;
use crate::types::{Action, Signal, SignalChange, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDelivery {
    pub subscriber_id: String,
    pub transport: Transport,
    pub change_id: uuid::Uuid,
}

fn resolve_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!(timezone = name, "unrecognized IANA timezone, falling back to Etc/UTC");
        chrono_tz::Etc::UTC
    })
}

/// Subscriber-local midnight, expressed back in UTC, for the day containing `now`.
fn local_midnight_utc(tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let local_midnight = local_now.date_naive().and_hms_opt(0, 0, 0).unwrap();
    tz.from_local_datetime(&local_midnight)
        .single()
        .unwrap_or(local_now)
        .with_timezone(&Utc)
}

pub async fn plan_deliveries(
    change: &SignalChange,
    signal: &Signal,
    registry: &SubscriptionRegistry,
    store: &dyn SignalStore,
    now: DateTime<Utc>,
) -> Vec<PlannedDelivery> {
    let mut planned = Vec::new();

    for sub in registry.subscribers_for(&change.pair, change.timeframe) {
        let Some(policy) = registry.get_policy(&sub.subscriber_id) else {
            continue;
        };

        // 1. Timeframe filter.
        if !policy.enabled_timeframes.contains(&change.timeframe) {
            continue;
        }

        // 2. Transport filter.
        if !policy.transports_enabled.contains(&sub.transport) {
            continue;
        }

        // 3. Confidence filter.
        if signal.confidence < policy.min_confidence {
            continue;
        }

        // 4. Action filter.
        if signal.action == Action::Hold && !policy.notify_on_hold {
            continue;
        }
        if policy.strong_signals_only && !signal.strength.is_strong_or_above() {
            continue;
        }

        // 5. Mute window filter.
        let tz = resolve_timezone(&policy.timezone);
        let local_now = now.with_timezone(&tz);
        let (hour, minute) = (local_now.format("%H").to_string(), local_now.format("%M").to_string());
        let hour: u8 = hour.parse().unwrap_or(0);
        let minute: u8 = minute.parse().unwrap_or(0);
        if policy.mute_windows.iter().any(|w| w.contains(hour, minute)) {
            continue;
        }

        // 6. Cooldown filter. Must look at the subscriber's most recent *notified*
        // change, not `last_change` — by the time the planner runs, `last_change`
        // is already the change currently being planned, whose `notified_at` is
        // still unset.
        if let Some(last_notified) = store
            .notified_changes_for(&change.pair, change.timeframe, &sub.subscriber_id)
            .await
            .into_iter()
            .next()
        {
            if let Some(notified_at) = last_notified.notified_at {
                let elapsed = now - notified_at;
                if elapsed < Duration::minutes(policy.cooldown_minutes as i64) {
                    continue;
                }
            }
        }

        // 7. Daily cap filter.
        let midnight = local_midnight_utc(tz, now);
        let deliveries_today = store
            .notified_changes_for(&change.pair, change.timeframe, &sub.subscriber_id)
            .await
            .into_iter()
            .filter(|c| c.notified_at.map(|t| t >= midnight).unwrap_or(false))
            .count();
        if deliveries_today as u32 >= policy.daily_cap {
            continue;
        }

        planned.push(PlannedDelivery {
            subscriber_id: sub.subscriber_id.clone(),
            transport: sub.transport,
            change_id: change.id,
        });
    }

    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_store::InMemorySignalStore;
    use crate::synthesizer::tests_support::sample_signal;
    use crate::types::{MarketCondition, MuteWindow, Pair, Strength, SubscriberPolicy, Subscription, Timeframe};

    fn sample_change(pair: Pair, timeframe: Timeframe) -> SignalChange {
        SignalChange {
            id: uuid::Uuid::new_v4(),
            pair,
            timeframe,
            old_action: Some(Action::Hold),
            new_action: Action::Buy,
            old_confidence: Some(0.4),
            new_confidence: 0.75,
            strength: Strength::Strong,
            market_condition: MarketCondition::Trending,
            detected_at: Utc::now(),
            notified_at: None,
            notified_subscribers: vec![],
        }
    }

    fn permissive_policy(id: &str) -> SubscriberPolicy {
        SubscriberPolicy {
            subscriber_id: id.to_string(),
            min_confidence: 0.0,
            cooldown_minutes: 0,
            daily_cap: 100,
            mute_windows: vec![],
            timezone: "Etc/UTC".to_string(),
            enabled_timeframes: vec![Timeframe::H1],
            transports_enabled: vec![Transport::WebSocket],
            strong_signals_only: false,
            notify_on_hold: false,
        }
    }

    #[tokio::test]
    async fn eligible_subscriber_is_planned() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.confidence = 0.75;
        signal.action = Action::Buy;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        registry.set_policy(permissive_policy("alice"));

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, Utc::now()).await;
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].subscriber_id, "alice");
    }

    #[tokio::test]
    async fn confidence_below_threshold_is_skipped() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.confidence = 0.3;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        let mut policy = permissive_policy("alice");
        policy.min_confidence = 0.5;
        registry.set_policy(policy);

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, Utc::now()).await;
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn hold_without_notify_on_hold_is_skipped() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.action = Action::Hold;
        signal.confidence = 0.4;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        registry.set_policy(permissive_policy("alice"));

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, Utc::now()).await;
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn strong_signals_only_filters_weak_strength() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.strength = Strength::Moderate;
        signal.confidence = 0.55;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        let mut policy = permissive_policy("alice");
        policy.strong_signals_only = true;
        registry.set_policy(policy);

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, Utc::now()).await;
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn mute_window_blocks_delivery() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.confidence = 0.75;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        let mut policy = permissive_policy("alice");
        policy.mute_windows = vec![MuteWindow {
            start_hour: 0,
            start_minute: 0,
            end_hour: 23,
            end_minute: 59,
        }];
        registry.set_policy(policy);

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, Utc::now()).await;
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn cooldown_blocks_repeat_delivery_within_window() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.confidence = 0.75;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        let mut policy = permissive_policy("alice");
        policy.cooldown_minutes = 30;
        registry.set_policy(policy);

        let now = Utc::now();
        let mut prior_change = sample_change(signal.pair.clone(), signal.timeframe);
        prior_change.notified_at = Some(now - Duration::minutes(5));
        prior_change.notified_subscribers = vec!["alice".to_string()];
        store
            .put_with_change(signal.clone(), Some(prior_change))
            .await
            .unwrap();

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, now).await;
        assert!(planned.is_empty());
    }

    #[tokio::test]
    async fn daily_cap_blocks_after_limit_reached() {
        let registry = SubscriptionRegistry::new();
        let store = InMemorySignalStore::new();
        let mut signal = sample_signal();
        signal.pair = Pair::new("EUR/USD");
        signal.timeframe = Timeframe::H1;
        signal.confidence = 0.75;

        registry.subscribe(Subscription {
            subscriber_id: "alice".into(),
            transport: Transport::WebSocket,
            pair: signal.pair.clone(),
            timeframe: signal.timeframe,
        });
        let mut policy = permissive_policy("alice");
        policy.daily_cap = 1;
        policy.cooldown_minutes = 0;
        registry.set_policy(policy);

        let now = Utc::now();
        let midnight = local_midnight_utc(chrono_tz::Etc::UTC, now);
        let mut earlier_change = sample_change(signal.pair.clone(), signal.timeframe);
        earlier_change.notified_at = Some(midnight + Duration::minutes(1));
        earlier_change.notified_subscribers = vec!["alice".to_string()];
        store
            .put_with_change(signal.clone(), Some(earlier_change))
            .await
            .unwrap();

        let change = sample_change(signal.pair.clone(), signal.timeframe);
        let planned = plan_deliveries(&change, &signal, &registry, &store, now).await;
        assert!(planned.is_empty());
    }
}
