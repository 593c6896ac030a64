// =============================================================================
// Position Ledger — the mutable record of one open position
// =============================================================================
//
// Life-cycle:
//   Open  ->  PartiallyClosed*  ->  Closed       (terminal)
//
// The ledger exclusively owns the chain plan it was opened with, accumulates
// realised PnL and fees, and keeps an append-only history of every close
// event. Two invariants are enforced here:
//
//   - Size conservation: 0 <= current_size <= initial_size; a computed close
//     that overshoots is clamped, never allowed to go negative.
//   - Stop ratchet: `current_stop_loss` only ever moves in the
//     profit-protecting direction once updated.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::plan::ChainPlan;
use crate::types::{CloseReason, Direction};

/// Tolerance below which a remaining size is treated as fully closed.
/// Protects against floating-point residue after a 100% close.
pub const SIZE_EPSILON: f64 = 1e-9;

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::PartiallyClosed => write!(f, "PARTIALLY_CLOSED"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What caused a close event: a take-profit node at some chain level, or a
/// final close with an explicit reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CloseTrigger {
    Node { level: u32 },
    Final { reason: CloseReason },
}

impl std::fmt::Display for CloseTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node { level } => write!(f, "TP@L{level}"),
            Self::Final { reason } => write!(f, "{reason}"),
        }
    }
}

/// One entry in the closing ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseEvent {
    pub trigger: CloseTrigger,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub closed_size: f64,
    /// Net realised PnL for this event (fee already subtracted).
    pub pnl: f64,
    pub fee: f64,
    pub remaining_size_after: f64,
}

/// The mutable state of one open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLedger {
    /// Monotonic integer, unique per opened position within a session.
    pub position_id: u64,
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_size: f64,
    /// Remaining open size (reduced on partial close).
    pub current_size: f64,
    pub margin_used: f64,
    pub leverage: f64,
    /// The active stop-loss price. Only ever tightens (see `ratchet_stop_loss`).
    pub current_stop_loss: f64,
    /// Structural level whose breach forces a full close regardless of the
    /// chain state.
    pub invalidation_price: f64,
    pub status: PositionStatus,
    pub total_realized_pnl: f64,
    pub total_fees_paid: f64,
    /// Append-only, chronological.
    pub close_history: Vec<CloseEvent>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    /// The close-out plan this ledger was opened with (1:1, exclusively owned).
    pub plan: ChainPlan,
}

impl PositionLedger {
    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Fraction of the original size still open, in percent.
    pub fn remaining_pct(&self) -> f64 {
        if self.initial_size > 0.0 {
            self.current_size / self.initial_size * 100.0
        } else {
            0.0
        }
    }

    /// Margin still locked against the remaining size.
    pub fn margin_used_remaining(&self) -> f64 {
        if self.initial_size > 0.0 {
            self.margin_used * self.current_size / self.initial_size
        } else {
            0.0
        }
    }

    /// Unrealised PnL of the remaining size at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) * self.current_size
    }

    /// Move the stop-loss to `candidate` if and only if that tightens it.
    /// Returns whether the stop actually moved.
    pub fn ratchet_stop_loss(&mut self, candidate: f64) -> bool {
        let improves = match self.direction {
            Direction::Long => candidate > self.current_stop_loss,
            Direction::Short => candidate < self.current_stop_loss,
        };
        if improves {
            debug!(
                id = self.position_id,
                from = self.current_stop_loss,
                to = candidate,
                "stop-loss ratcheted"
            );
            self.current_stop_loss = candidate;
        }
        improves
    }

    /// Apply one close event: reduce size (clamped to what is actually open),
    /// accumulate PnL and fees, append to the history, and advance the
    /// status machine. Returns the size actually closed.
    ///
    /// The caller computes PnL/fee from the *requested* size; when clamping
    /// kicks in the difference is sub-epsilon by construction, so the
    /// accounting stays within tolerance.
    pub fn apply_close(
        &mut self,
        trigger: CloseTrigger,
        time: DateTime<Utc>,
        price: f64,
        closed_size: f64,
        pnl: f64,
        fee: f64,
    ) -> f64 {
        debug_assert!(!self.is_closed(), "close applied to a closed ledger");

        let closed = closed_size.min(self.current_size);
        let mut remaining = self.current_size - closed;
        if remaining <= SIZE_EPSILON {
            remaining = 0.0;
        }

        self.current_size = remaining;
        self.total_realized_pnl += pnl;
        self.total_fees_paid += fee;

        self.close_history.push(CloseEvent {
            trigger,
            time,
            price,
            closed_size: closed,
            pnl,
            fee,
            remaining_size_after: remaining,
        });

        if remaining == 0.0 {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(time);
            if let CloseTrigger::Final { reason } = trigger {
                self.close_reason = Some(reason);
            }
        } else {
            self.status = PositionStatus::PartiallyClosed;
        }

        closed
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::plan::ChainPlanBuilder;

    fn ledger(direction: Direction) -> PositionLedger {
        let params = ChainParams::default();
        let (tp1, tp2, sl, inv) = match direction {
            Direction::Long => (102.0, 105.0, 98.0, 97.0),
            Direction::Short => (98.0, 95.0, 102.0, 103.0),
        };
        let plan = ChainPlanBuilder::new(&params)
            .build(direction, 100.0, tp1, tp2, sl, 1.0)
            .unwrap();
        PositionLedger {
            position_id: 1,
            direction,
            entry_price: 100.0,
            initial_size: 10.0,
            current_size: 10.0,
            margin_used: 20.0,
            leverage: 50.0,
            current_stop_loss: sl,
            invalidation_price: inv,
            status: PositionStatus::Open,
            total_realized_pnl: 0.0,
            total_fees_paid: 0.0,
            close_history: Vec::new(),
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
            plan,
        }
    }

    #[test]
    fn ratchet_never_loosens_long() {
        let mut l = ledger(Direction::Long);
        assert!(l.ratchet_stop_loss(99.0));
        assert!(!l.ratchet_stop_loss(98.5), "loosening must be refused");
        assert!((l.current_stop_loss - 99.0).abs() < f64::EPSILON);
        assert!(l.ratchet_stop_loss(100.5));
    }

    #[test]
    fn ratchet_never_loosens_short() {
        let mut l = ledger(Direction::Short);
        assert!(l.ratchet_stop_loss(101.0));
        assert!(!l.ratchet_stop_loss(101.5));
        assert!((l.current_stop_loss - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_close_transitions_status() {
        let mut l = ledger(Direction::Long);
        let closed = l.apply_close(
            CloseTrigger::Node { level: 0 },
            Utc::now(),
            102.0,
            5.0,
            10.0,
            0.1,
        );
        assert!((closed - 5.0).abs() < f64::EPSILON);
        assert_eq!(l.status, PositionStatus::PartiallyClosed);
        assert!((l.current_size - 5.0).abs() < f64::EPSILON);
        assert_eq!(l.close_history.len(), 1);
        assert!(l.closed_at.is_none());
    }

    #[test]
    fn overshoot_is_clamped_and_closes() {
        let mut l = ledger(Direction::Long);
        let closed = l.apply_close(
            CloseTrigger::Final {
                reason: CloseReason::StopLoss,
            },
            Utc::now(),
            98.0,
            10.0 + 1e-12, // sub-epsilon overshoot
            -20.0,
            0.2,
        );
        assert!((closed - 10.0).abs() < 1e-9);
        assert_eq!(l.status, PositionStatus::Closed);
        assert_eq!(l.current_size, 0.0);
        assert_eq!(l.close_reason, Some(CloseReason::StopLoss));
        assert!(l.closed_at.is_some());
    }

    #[test]
    fn residue_below_epsilon_snaps_to_zero() {
        let mut l = ledger(Direction::Long);
        l.apply_close(
            CloseTrigger::Node { level: 0 },
            Utc::now(),
            102.0,
            10.0 - 1e-12,
            10.0,
            0.1,
        );
        assert_eq!(l.current_size, 0.0);
        assert_eq!(l.status, PositionStatus::Closed);
    }

    #[test]
    fn size_conservation_over_event_sequence() {
        let mut l = ledger(Direction::Long);
        let now = Utc::now();
        l.apply_close(CloseTrigger::Node { level: 0 }, now, 102.0, 5.0, 10.0, 0.1);
        l.apply_close(CloseTrigger::Node { level: 1 }, now, 103.0, 2.5, 7.5, 0.05);
        l.apply_close(
            CloseTrigger::Final {
                reason: CloseReason::ForcedExit,
            },
            now,
            104.0,
            2.5,
            10.0,
            0.05,
        );

        let total_closed: f64 = l.close_history.iter().map(|e| e.closed_size).sum();
        assert!(
            (total_closed - (l.initial_size - l.current_size)).abs() < SIZE_EPSILON,
            "sum of closes {} must equal initial - current {}",
            total_closed,
            l.initial_size - l.current_size
        );
        assert_eq!(l.status, PositionStatus::Closed);
    }

    #[test]
    fn unrealized_pnl_signs() {
        let long = ledger(Direction::Long);
        assert!(long.unrealized_pnl(101.0) > 0.0);
        assert!(long.unrealized_pnl(99.0) < 0.0);

        let short = ledger(Direction::Short);
        assert!(short.unrealized_pnl(99.0) > 0.0);
        assert!(short.unrealized_pnl(101.0) < 0.0);
    }

    #[test]
    fn ledger_roundtrips_through_json() {
        let mut l = ledger(Direction::Long);
        l.apply_close(CloseTrigger::Node { level: 0 }, Utc::now(), 102.0, 5.0, 10.0, 0.1);

        let json = serde_json::to_string(&l).unwrap();
        let back: PositionLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, PositionStatus::PartiallyClosed);
        assert_eq!(back.close_history.len(), 1);
        assert_eq!(back.plan.node_count(), l.plan.node_count());
        assert!((back.current_size - 5.0).abs() < f64::EPSILON);
    }
}
