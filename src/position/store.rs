// =============================================================================
// Position Store — open/closed position bookkeeping
// =============================================================================
//
// A single `RwLock<HashMap<Uuid, Position>>` is enough here: unlike the
// Signal Store, positions aren't written concurrently per-key at any
// meaningful rate (one open, occasional leg closes, one final close), so the
// extra per-key lock table the signal store needs for throughput would be
// pure overhead.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::{LegStatus, Position, PositionStatus};

pub struct PositionStore {
    positions: RwLock<HashMap<Uuid, Position>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn open(&self, position: Position) {
        self.positions.write().insert(position.id, position);
    }

    pub fn get(&self, id: Uuid) -> Option<Position> {
        self.positions.read().get(&id).cloned()
    }

    pub fn list_open(&self) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect()
    }

    /// Closes every open leg at `exit_price`, sums their realized pips into
    /// the position total, and transitions the position itself to `closed`.
    pub fn close(&self, id: Uuid, exit_price: f64, closed_at: DateTime<Utc>) -> Option<Position> {
        let mut positions = self.positions.write();
        let position = positions.get_mut(&id)?;
        if position.status == PositionStatus::Closed {
            return Some(position.clone());
        }

        let pips = position.pips(exit_price);
        for leg in position.legs.iter_mut().filter(|l| l.is_open()) {
            leg.status = LegStatus::ClosedManual;
            leg.closed_at = Some(closed_at);
            leg.exit_price = Some(exit_price);
            leg.realized_pnl_pips = Some(pips);
        }
        position.status = PositionStatus::Closed;
        position.closed_at = Some(closed_at);
        position.exit_price = Some(exit_price);
        position.realized_pnl_pips = pips;
        Some(position.clone())
    }

    /// Closes a fraction of a position's open size (take-partial), leaving
    /// the remainder open. `fraction` is clamped to `(0, 1]`.
    pub fn close_partial(&self, id: Uuid, fraction: f64, exit_price: f64, closed_at: DateTime<Utc>) -> Option<Position> {
        let fraction = fraction.clamp(0.0001, 1.0);
        let mut positions = self.positions.write();
        let position = positions.get_mut(&id)?;
        if position.status == PositionStatus::Closed {
            return Some(position.clone());
        }

        let pips = position.pips(exit_price);
        let mut remaining_to_close = position.open_size() * fraction;
        for leg in position.legs.iter_mut().filter(|l| l.is_open()) {
            if remaining_to_close <= 0.0 {
                break;
            }
            if leg.size <= remaining_to_close {
                remaining_to_close -= leg.size;
                leg.status = LegStatus::ClosedManual;
                leg.closed_at = Some(closed_at);
                leg.exit_price = Some(exit_price);
                leg.realized_pnl_pips = Some(pips);
            }
        }

        if position.open_size() <= 0.0 {
            position.status = PositionStatus::Closed;
            position.closed_at = Some(closed_at);
            position.exit_price = Some(exit_price);
            position.realized_pnl_pips = pips;
        }
        Some(position.clone())
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Pair, PositionLeg};

    fn sample_position() -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::new_v4(),
            subscriber_id: "alice".to_string(),
            pair: Pair::new("EUR/USD"),
            direction: Direction::Long,
            entry_price: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            position_size: 1.0,
            opened_at: now,
            status: PositionStatus::Open,
            closed_at: None,
            exit_price: None,
            realized_pnl_pips: 0.0,
            legs: vec![PositionLeg {
                id: Uuid::new_v4(),
                size: 1.0,
                status: LegStatus::Open,
                opened_at: now,
                closed_at: None,
                exit_price: None,
                realized_pnl_pips: None,
            }],
        }
    }

    #[test]
    fn close_transitions_status_and_records_pips() {
        let store = PositionStore::new();
        let position = sample_position();
        let id = position.id;
        store.open(position);

        let closed = store.close(id, 1.1050, Utc::now()).unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert!((closed.realized_pnl_pips - 50.0).abs() < 1e-6);
        assert!(store.list_open().is_empty());
    }

    #[test]
    fn close_partial_leaves_remainder_open_with_multiple_legs() {
        let store = PositionStore::new();
        let mut position = sample_position();
        let now = Utc::now();
        position.legs.push(PositionLeg {
            id: Uuid::new_v4(),
            size: 1.0,
            status: LegStatus::Open,
            opened_at: now,
            closed_at: None,
            exit_price: None,
            realized_pnl_pips: None,
        });
        position.position_size = 2.0;
        let id = position.id;
        store.open(position);

        let partial = store.close_partial(id, 0.5, 1.1050, now).unwrap();
        assert_eq!(partial.status, PositionStatus::Open);
        assert_eq!(partial.open_size(), 1.0);
    }

    #[test]
    fn close_is_idempotent() {
        let store = PositionStore::new();
        let position = sample_position();
        let id = position.id;
        store.open(position);
        let now = Utc::now();
        store.close(id, 1.1050, now).unwrap();
        let second = store.close(id, 1.2000, now).unwrap();
        // Second close is a no-op returning the already-closed state.
        assert!((second.realized_pnl_pips - 50.0).abs() < 1e-6);
    }
}
