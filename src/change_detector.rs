// =============================================================================
// Change Detector — pure (prior, new) -> notifiable? decision
// =============================================================================
//
// No logging, no interior state: purity is the contract under test. Cooldown,
// daily caps, and mute windows are downstream concerns owned by the Delivery
// Planner; this module only decides whether a transition is *semantically*
// interesting enough to ever be a candidate for notification.
// =============================================================================

use crate::types::{Signal, SignalChange, Strength};

/// Minimum confidence delta (same action) that counts as a notifiable change.
const CONFIDENCE_DELTA_THRESHOLD: f64 = 0.1;

/// Decide whether `new` constitutes a notifiable change relative to `prior`,
/// and if so, build the `SignalChange` record (without `notified_at` /
/// `notified_subscribers`, which the Dispatcher stamps on first delivery).
pub fn detect(prior: Option<&Signal>, new: &Signal) -> Option<SignalChange> {
    let notifiable = match prior {
        None => true,
        Some(prior) => {
            if new.action != prior.action {
                true
            } else if (new.confidence - prior.confidence).abs() >= CONFIDENCE_DELTA_THRESHOLD {
                true
            } else {
                crossed_to_higher_band(prior.strength, new.strength)
            }
        }
    };

    if !notifiable {
        return None;
    }

    Some(SignalChange {
        id: uuid::Uuid::new_v4(),
        pair: new.pair.clone(),
        timeframe: new.timeframe,
        old_action: prior.map(|p| p.action),
        new_action: new.action,
        old_confidence: prior.map(|p| p.confidence),
        new_confidence: new.confidence,
        strength: new.strength,
        market_condition: new.market_condition,
        detected_at: new.generated_at,
        notified_at: None,
        notified_subscribers: Vec::new(),
    })
}

/// `true` only when `new` is strictly above `prior` in band order — a drop
/// from a higher band to a lower one is not itself notifiable.
fn crossed_to_higher_band(prior: Strength, new: Strength) -> bool {
    new > prior
}
