// =============================================================================
// Subscription Registry — who gets notified, and how they want it
// =============================================================================
//
// Two copy-on-write tables, each behind `RwLock<Arc<_>>`: the Delivery
// Planner reads both on every signal change, so reads must be lock-free once
// the `Arc` clone is taken, and writes (subscribe/unsubscribe/policy updates)
// are rare enough that cloning the whole backing collection on every write is
// the right tradeoff. This mirrors the read-mostly ownership the gateway
// cache uses for its own `RwLock`, just swapping whole collections instead of
// mutating entries in place.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{Pair, SubscriberPolicy, Subscription, Timeframe, Transport};

pub struct SubscriptionRegistry {
    subscriptions: RwLock<Arc<Vec<Subscription>>>,
    policies: RwLock<Arc<HashMap<String, SubscriberPolicy>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            policies: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Idempotent: re-subscribing to an identical
    /// (subscriber, transport, pair, timeframe) tuple is a no-op.
    pub fn subscribe(&self, sub: Subscription) {
        let mut guard = self.subscriptions.write();
        let exists = guard.iter().any(|s| {
            s.subscriber_id == sub.subscriber_id
                && s.transport == sub.transport
                && s.pair == sub.pair
                && s.timeframe == sub.timeframe
        });
        if exists {
            return;
        }
        let mut next = (**guard).clone();
        next.push(sub);
        *guard = Arc::new(next);
    }

    pub fn unsubscribe(
        &self,
        subscriber_id: &str,
        transport: Transport,
        pair: &Pair,
        timeframe: Timeframe,
    ) {
        let mut guard = self.subscriptions.write();
        let next: Vec<Subscription> = guard
            .iter()
            .filter(|s| {
                !(s.subscriber_id == subscriber_id
                    && s.transport == transport
                    && &s.pair == pair
                    && s.timeframe == timeframe)
            })
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// All subscribers interested in `pair`/`timeframe`, across transports.
    pub fn subscribers_for(&self, pair: &Pair, timeframe: Timeframe) -> Vec<Subscription> {
        let snapshot = self.subscriptions.read().clone();
        snapshot
            .iter()
            .filter(|s| &s.pair == pair && s.timeframe == timeframe)
            .cloned()
            .collect()
    }

    pub fn list_subscribers(&self) -> Vec<Subscription> {
        (*self.subscriptions.read().clone()).clone()
    }

    pub fn get_policy(&self, subscriber_id: &str) -> Option<SubscriberPolicy> {
        self.policies.read().get(subscriber_id).cloned()
    }

    /// Insert or fully replace a subscriber's policy.
    pub fn set_policy(&self, policy: SubscriberPolicy) {
        let mut guard = self.policies.write();
        let mut next = (**guard).clone();
        next.insert(policy.subscriber_id.clone(), policy);
        *guard = Arc::new(next);
    }

    /// Remove both the policy and every subscription for `subscriber_id`.
    pub fn remove_subscriber(&self, subscriber_id: &str) {
        {
            let mut guard = self.subscriptions.write();
            let next: Vec<Subscription> = guard
                .iter()
                .filter(|s| s.subscriber_id != subscriber_id)
                .cloned()
                .collect();
            *guard = Arc::new(next);
        }
        {
            let mut guard = self.policies.write();
            let mut next = (**guard).clone();
            next.remove(subscriber_id);
            *guard = Arc::new(next);
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MuteWindow;

    fn sample_sub(subscriber_id: &str) -> Subscription {
        Subscription {
            subscriber_id: subscriber_id.to_string(),
            transport: Transport::WebSocket,
            pair: Pair::new("EUR/USD"),
            timeframe: Timeframe::H1,
        }
    }

    fn sample_policy(subscriber_id: &str) -> SubscriberPolicy {
        SubscriberPolicy {
            subscriber_id: subscriber_id.to_string(),
            min_confidence: 0.6,
            cooldown_minutes: 30,
            daily_cap: 20,
            mute_windows: vec![MuteWindow {
                start_hour: 23,
                start_minute: 0,
                end_hour: 7,
                end_minute: 0,
            }],
            timezone: "Asia/Taipei".to_string(),
            enabled_timeframes: vec![Timeframe::H1],
            transports_enabled: vec![Transport::WebSocket],
            strong_signals_only: false,
            notify_on_hold: false,
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(sample_sub("alice"));
        registry.subscribe(sample_sub("alice"));
        assert_eq!(registry.list_subscribers().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_matching_tuple() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(sample_sub("alice"));
        let mut other = sample_sub("alice");
        other.timeframe = Timeframe::H4;
        registry.subscribe(other);

        registry.unsubscribe(
            "alice",
            Transport::WebSocket,
            &Pair::new("EUR/USD"),
            Timeframe::H1,
        );

        let remaining = registry.list_subscribers();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timeframe, Timeframe::H4);
    }

    #[test]
    fn subscribers_for_filters_by_pair_and_timeframe() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(sample_sub("alice"));
        registry.subscribe(sample_sub("bob"));
        let mut unrelated = sample_sub("carol");
        unrelated.pair = Pair::new("GBP/USD");
        registry.subscribe(unrelated);

        let subs = registry.subscribers_for(&Pair::new("EUR/USD"), Timeframe::H1);
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn policy_update_replaces_prior_value() {
        let registry = SubscriptionRegistry::new();
        registry.set_policy(sample_policy("alice"));
        let mut updated = sample_policy("alice");
        updated.daily_cap = 5;
        registry.set_policy(updated);

        assert_eq!(registry.get_policy("alice").unwrap().daily_cap, 5);
    }

    #[test]
    fn remove_subscriber_clears_both_tables() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(sample_sub("alice"));
        registry.set_policy(sample_policy("alice"));

        registry.remove_subscriber("alice");

        assert!(registry.get_policy("alice").is_none());
        assert!(registry.list_subscribers().is_empty());
    }
}
