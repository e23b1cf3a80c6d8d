// =============================================================================
// Position Monitoring Loop — periodic SL/TP evaluation for open positions
// =============================================================================
//
// Structurally the same collect-then-act shape as the original exit monitor:
// gather every open position under the store's lock, release it, evaluate
// each one against the current price, then apply closes and publish events
// in a second pass so the publish call never happens while a lock is held.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event_bus::{EventBus, PositionUpdateEvent};
use crate::market_data::MarketDataGateway;
use crate::position::store::PositionStore;
use crate::types::{Position, PositionMonitoringRecord, Recommendation, Timeframe, TrendDirection};

const MONITOR_INTERVAL_SECS: u64 = 60;
const LEVEL2_COOLDOWN_MINUTES: i64 = 5;
const LEVEL3_COOLDOWN_MINUTES: i64 = 30;
const DAILY_SUMMARY_HOUR_UTC: u32 = 8;

/// Tracks the last time each open position received a throttled (level 2/3)
/// notification, plus the UTC date it last received its level-4 daily
/// summary, so the throttle survives across monitor ticks.
#[derive(Default)]
pub struct NotificationThrottle {
    last_notified_at: std::collections::HashMap<Uuid, DateTime<Utc>>,
    last_daily_summary_date: std::collections::HashMap<Uuid, chrono::NaiveDate>,
}

impl NotificationThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    fn should_send(&mut self, position_id: Uuid, level: u8, now: DateTime<Utc>) -> bool {
        match level {
            1 => true,
            2 => self.cooldown_elapsed(position_id, now, LEVEL2_COOLDOWN_MINUTES),
            3 => self.cooldown_elapsed(position_id, now, LEVEL3_COOLDOWN_MINUTES),
            4 => self.daily_summary_due(position_id, now),
            _ => false,
        }
    }

    fn cooldown_elapsed(&mut self, position_id: Uuid, now: DateTime<Utc>, minutes: i64) -> bool {
        let due = match self.last_notified_at.get(&position_id) {
            Some(last) => now - *last >= chrono::Duration::minutes(minutes),
            None => true,
        };
        if due {
            self.last_notified_at.insert(position_id, now);
        }
        due
    }

    fn daily_summary_due(&mut self, position_id: Uuid, now: DateTime<Utc>) -> bool {
        if now.hour() < DAILY_SUMMARY_HOUR_UTC {
            return false;
        }
        let today = now.date_naive();
        let already_sent = self
            .last_daily_summary_date
            .get(&position_id)
            .map(|d| *d == today)
            .unwrap_or(false);
        if already_sent {
            return false;
        }
        self.last_daily_summary_date.insert(position_id, today);
        true
    }
}

fn trend_direction(position: &Position, current_price: f64) -> TrendDirection {
    let pips = position.pips(current_price);
    if pips > 1.0 {
        TrendDirection::Up
    } else if pips < -1.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    }
}

/// Heuristic probability of a reversal, proportional to how far price has
/// travelled toward the stop relative to the entry-to-stop distance.
fn reversal_probability(position: &Position, current_price: f64) -> f64 {
    let entry_to_stop_pips = position.pips(position.stop_loss).abs();
    if entry_to_stop_pips <= 0.0 {
        return 0.0;
    }
    let pips = position.pips(current_price);
    if pips >= 0.0 {
        0.0
    } else {
        (pips.abs() / entry_to_stop_pips).clamp(0.0, 1.0)
    }
}

fn recommendation_for(position: &Position, current_price: f64) -> Recommendation {
    let pips = position.pips(current_price);
    let target_pips = position.pips(position.take_profit);
    if target_pips > 0.0 && pips >= target_pips * 0.8 {
        Recommendation::TrailingStop
    } else if pips < 0.0 {
        Recommendation::AdjustSl
    } else {
        Recommendation::Hold
    }
}

fn hit_stop_or_target(position: &Position, current_price: f64) -> bool {
    use crate::types::Direction;
    match position.direction {
        Direction::Long => current_price <= position.stop_loss || current_price >= position.take_profit,
        Direction::Short => current_price >= position.stop_loss || current_price <= position.take_profit,
    }
}

enum Evaluation {
    Closed { exit_price: f64 },
    StillOpen { record: PositionMonitoringRecord },
}

fn evaluate(position: &Position, current_price: f64, now: DateTime<Utc>) -> Evaluation {
    if hit_stop_or_target(position, current_price) {
        // Close at the price observed on this tick, not the SL/TP level itself —
        // the tick can (and per spec scenario 6, does) gap past the level.
        return Evaluation::Closed { exit_price: current_price };
    }

    Evaluation::StillOpen {
        record: PositionMonitoringRecord {
            position_id: position.id,
            observed_at: now,
            current_price,
            unrealized_pnl_pips: position.pips(current_price),
            trend_direction: trend_direction(position, current_price),
            reversal_probability: reversal_probability(position, current_price),
            recommendation: recommendation_for(position, current_price),
            notification_level: 3,
            notification_sent: false,
        },
    }
}

pub async fn run_position_monitor(
    store: Arc<PositionStore>,
    gateway: Arc<MarketDataGateway>,
    event_bus: Arc<EventBus>,
    throttle: Arc<Mutex<NotificationThrottle>>,
) {
    let mut ticker = interval(Duration::from_secs(MONITOR_INTERVAL_SECS));
    loop {
        ticker.tick().await;

        let open_positions = store.list_open();
        if open_positions.is_empty() {
            continue;
        }

        let now = Utc::now();
        let mut to_publish = Vec::new();

        for position in &open_positions {
            let series = match gateway.fetch(&position.pair, Timeframe::M1, 1).await {
                Ok((series, _stale)) => series,
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "position monitor could not fetch current price");
                    continue;
                }
            };
            let Some(latest) = series.latest() else { continue };
            let current_price = latest.close;

            match evaluate(position, current_price, now) {
                Evaluation::Closed { exit_price } => {
                    to_publish.push((position.id, Some(exit_price), None));
                }
                Evaluation::StillOpen { mut record } => {
                    let level = record.notification_level;
                    let sent = throttle.lock().should_send(position.id, level, now);
                    record.notification_sent = sent;
                    to_publish.push((position.id, None, Some(record)));
                }
            }
        }

        for (position_id, exit_price, record) in to_publish {
            if let Some(exit_price) = exit_price {
                if let Some(closed) = store.close(position_id, exit_price, now) {
                    info!(position_id = %position_id, exit_price, pips = closed.realized_pnl_pips, "position closed on SL/TP hit");
                    event_bus
                        .publish_position_update(PositionUpdateEvent {
                            record: PositionMonitoringRecord {
                                position_id,
                                observed_at: now,
                                current_price: exit_price,
                                unrealized_pnl_pips: closed.realized_pnl_pips,
                                trend_direction: trend_direction(&closed, exit_price),
                                reversal_probability: 0.0,
                                recommendation: Recommendation::Exit,
                                notification_level: 1,
                                notification_sent: true,
                            },
                        })
                        .await;
                }
            } else if let Some(record) = record {
                if record.notification_sent {
                    event_bus.publish_position_update(PositionUpdateEvent { record }).await;
                }
            }
        }
    }
}
