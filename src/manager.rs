// =============================================================================
// Chain Position Manager — one position, one plan, one action per tick
// =============================================================================
//
// Owns the single currently-open ledger (or none) and the append-only history
// of completed ones. Every price tick is evaluated in strict priority order:
//
//   1. Hard stops — active stop-loss, then invalidation. These monopolize the
//      tick: a take-profit can never outrank a stop breach.
//   2. The tp1 chain, walked depth-first along the triggered path. The first
//      untriggered node whose target is reached fires; a node is never
//      checked before its parent has fired, and never re-checked after.
//   3. The TP2 sibling, as a full-close alternative while the deeper chain
//      has not engaged. When both tp1 and tp2 conditions hold on the same
//      tick, tp1 wins deterministically.
//
// The manager is synchronous and deterministic: no clock reads, no sleeping,
// no I/O. Time comes in with the tick so tests can drive it with synthetic
// sequences.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::ledger::{CloseTrigger, PositionLedger, PositionStatus};
use crate::plan::{ChainPlan, TakeProfitNode};
use crate::types::CloseReason;

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// Sizing parameters supplied at open time.
#[derive(Debug, Clone, Copy)]
pub struct SizingInputs {
    /// Margin the session is willing to commit. Must be positive.
    pub available_margin: f64,
    pub leverage: f64,
    /// Flat fee rate on notional, charged at open and at every close.
    pub fee_rate: f64,
}

/// Accounting record of a single close action, returned to the caller so the
/// session can settle balance and statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub position_id: u64,
    pub trigger: CloseTrigger,
    pub price: f64,
    pub closed_size: f64,
    /// Net of the close fee.
    pub pnl: f64,
    pub fee: f64,
    /// Margin released back to the balance, proportional to the closed size.
    pub returned_margin: f64,
}

/// What a single tick did to the position.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    NoAction,
    PartialClose(Fill),
    FullClose(Fill),
}

impl TickOutcome {
    pub fn fill(&self) -> Option<&Fill> {
        match self {
            Self::NoAction => None,
            Self::PartialClose(f) | Self::FullClose(f) => Some(f),
        }
    }
}

/// Receipt returned by a successful `open`.
#[derive(Debug, Clone)]
pub struct OpenReceipt {
    pub position_id: u64,
    pub size: f64,
    pub margin_used: f64,
    pub open_fee: f64,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// State machine driving one chained position at a time.
pub struct ChainPositionManager {
    fee_rate: f64,
    trailing_sl_enabled: bool,
    current: Option<PositionLedger>,
    history: Vec<PositionLedger>,
    next_position_id: u64,
}

impl ChainPositionManager {
    pub fn new(fee_rate: f64, trailing_sl_enabled: bool) -> Self {
        Self {
            fee_rate,
            trailing_sl_enabled,
            current: None,
            history: Vec::new(),
            next_position_id: 1,
        }
    }

    /// The currently-open position, if any.
    pub fn position(&self) -> Option<&PositionLedger> {
        self.current.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.current.is_some()
    }

    /// Completed positions, oldest first. Append-only.
    pub fn history(&self) -> &[PositionLedger] {
        &self.history
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Open a new position against `plan`.
    ///
    /// Size is `available_margin * leverage / entry_price`; an opening fee on
    /// the full notional is reported in the receipt for the session to deduct.
    /// Fails without any state change when margin is non-positive or a
    /// position is already open.
    pub fn open(
        &mut self,
        plan: ChainPlan,
        invalidation_price: f64,
        sizing: &SizingInputs,
        now: DateTime<Utc>,
    ) -> Result<OpenReceipt, EngineError> {
        if self.current.is_some() {
            return Err(EngineError::InvalidPlan(
                "a position is already open; close it before opening another".to_string(),
            ));
        }
        if sizing.available_margin <= 0.0 {
            return Err(EngineError::InsufficientMargin {
                available: sizing.available_margin,
            });
        }

        let notional = sizing.available_margin * sizing.leverage;
        let size = notional / plan.entry_price;
        let open_fee = notional * sizing.fee_rate;

        let position_id = self.next_position_id;
        self.next_position_id += 1;

        let stop_loss = plan.tp1_root.stop_loss_price;
        let ledger = PositionLedger {
            position_id,
            direction: plan.direction,
            entry_price: plan.entry_price,
            initial_size: size,
            current_size: size,
            margin_used: sizing.available_margin,
            leverage: sizing.leverage,
            current_stop_loss: stop_loss,
            invalidation_price,
            status: PositionStatus::Open,
            total_realized_pnl: 0.0,
            total_fees_paid: open_fee,
            close_history: Vec::new(),
            opened_at: now,
            closed_at: None,
            close_reason: None,
            plan,
        };

        info!(
            id = position_id,
            direction = %ledger.direction,
            entry_price = ledger.entry_price,
            size,
            margin = sizing.available_margin,
            leverage = sizing.leverage,
            stop_loss,
            invalidation = invalidation_price,
            nodes = ledger.plan.node_count(),
            "position opened"
        );

        self.current = Some(ledger);

        Ok(OpenReceipt {
            position_id,
            size,
            margin_used: sizing.available_margin,
            open_fee,
        })
    }

    // -------------------------------------------------------------------------
    // Tick evaluation
    // -------------------------------------------------------------------------

    /// Evaluate one price tick against the open position.
    ///
    /// Returns `NoAction` when nothing is open or nothing fired. Any error
    /// leaves the ledger exactly as it was (validation happens before the
    /// first mutation).
    pub fn on_tick(
        &mut self,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, EngineError> {
        let Some(pos) = self.current.as_mut() else {
            return Ok(TickOutcome::NoAction);
        };
        if pos.is_closed() {
            return Ok(TickOutcome::NoAction);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::TickProcessing(format!(
                "unusable tick price {price} for position {}",
                pos.position_id
            )));
        }

        // ── 1. Hard stops (monopolizing priority) ───────────────────────
        let hard_stop = if pos.direction.stop_breached(price, pos.current_stop_loss) {
            Some(CloseReason::StopLoss)
        } else if pos.direction.stop_breached(price, pos.invalidation_price) {
            Some(CloseReason::Invalidation)
        } else {
            None
        };
        if let Some(reason) = hard_stop {
            let fill = Self::close_remaining(pos, self.fee_rate, price, now, reason);
            warn!(
                id = fill.position_id,
                reason = %reason,
                price,
                pnl = fill.pnl,
                "hard stop hit — position fully closed"
            );
            self.retire_closed();
            return Ok(TickOutcome::FullClose(fill));
        }

        // ── 2. Walk the tp1 chain along the triggered path ──────────────
        let chain_hit = Self::active_chain_node(&mut pos.plan.tp1_root)
            .filter(|node| pos.direction.target_reached(price, node.target_price))
            .map(|node| {
                (
                    node.level,
                    node.close_fraction,
                    node.children.first().map(|c| c.stop_loss_price),
                )
            });

        if let Some((level, close_fraction, child_stop)) = chain_hit {
            let close_size = (pos.current_size * close_fraction / 100.0).min(pos.current_size);
            let gross = pos.direction.sign() * (price - pos.entry_price) * close_size;
            let fee = close_size * price * self.fee_rate;
            let pnl = gross - fee;
            let returned_margin = if pos.initial_size > 0.0 {
                pos.margin_used * close_size / pos.initial_size
            } else {
                0.0
            };

            // Second traversal lands on the same node; the probe borrow had
            // to end before the ledger mutation below.
            if let Some(node) = Self::active_chain_node(&mut pos.plan.tp1_root) {
                node.mark_triggered(now, price, pnl);
            }

            let trigger = CloseTrigger::Node { level };
            pos.apply_close(trigger, now, price, close_size, pnl, fee);

            if self.trailing_sl_enabled {
                if let Some(stop) = child_stop {
                    pos.ratchet_stop_loss(stop);
                }
            }

            let fill = Fill {
                position_id: pos.position_id,
                trigger,
                price,
                closed_size: close_size,
                pnl,
                fee,
                returned_margin,
            };

            info!(
                id = fill.position_id,
                level,
                price,
                closed_size = close_size,
                pnl,
                remaining = pos.current_size,
                stop_loss = pos.current_stop_loss,
                "take-profit node triggered"
            );

            return Ok(if pos.is_closed() {
                self.retire_closed();
                TickOutcome::FullClose(fill)
            } else {
                TickOutcome::PartialClose(fill)
            });
        }

        // ── 3. TP2 sibling — full-close alternative ─────────────────────
        let tp2_ready = !pos.plan.tp2_node.triggered
            && !pos.plan.deep_chain_engaged()
            && pos
                .direction
                .target_reached(price, pos.plan.tp2_node.target_price);
        if tp2_ready {
            let fill =
                Self::close_remaining(pos, self.fee_rate, price, now, CloseReason::TakeProfit2);
            pos.plan.tp2_node.mark_triggered(now, price, fill.pnl);
            info!(
                id = fill.position_id,
                price,
                pnl = fill.pnl,
                "TP2 reached — position fully closed"
            );
            self.retire_closed();
            return Ok(TickOutcome::FullClose(fill));
        }

        Ok(TickOutcome::NoAction)
    }

    // -------------------------------------------------------------------------
    // Forced close
    // -------------------------------------------------------------------------

    /// Unconditionally close whatever remains at `price`, tagged with
    /// `reason`. No-op when nothing is open.
    pub fn force_close(
        &mut self,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<Fill> {
        let pos = self.current.as_mut()?;
        let fill = Self::close_remaining(pos, self.fee_rate, price, now, reason);
        info!(
            id = fill.position_id,
            reason = %reason,
            price,
            pnl = fill.pnl,
            "position force-closed"
        );
        self.retire_closed();
        Some(fill)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// First untriggered node along the currently-active chain path. A
    /// triggered node delegates to its children; an untriggered node is the
    /// frontier — its descendants are not eligible yet.
    fn active_chain_node(node: &mut TakeProfitNode) -> Option<&mut TakeProfitNode> {
        if !node.triggered {
            return Some(node);
        }
        node.children
            .iter_mut()
            .find_map(|child| Self::active_chain_node(child))
    }

    /// Close 100% of the remaining size with a final reason, returning the
    /// settlement fill.
    fn close_remaining(
        pos: &mut PositionLedger,
        fee_rate: f64,
        price: f64,
        now: DateTime<Utc>,
        reason: CloseReason,
    ) -> Fill {
        let close_size = pos.current_size;
        let gross = pos.direction.sign() * (price - pos.entry_price) * close_size;
        let fee = close_size * price * fee_rate;
        let pnl = gross - fee;
        let returned_margin = if pos.initial_size > 0.0 {
            pos.margin_used * close_size / pos.initial_size
        } else {
            0.0
        };

        let trigger = CloseTrigger::Final { reason };
        pos.apply_close(trigger, now, price, close_size, pnl, fee);

        Fill {
            position_id: pos.position_id,
            trigger,
            price,
            closed_size: close_size,
            pnl,
            fee,
            returned_margin,
        }
    }

    /// Move a fully-closed current position into the history.
    fn retire_closed(&mut self) {
        if self.current.as_ref().is_some_and(|p| p.is_closed()) {
            if let Some(done) = self.current.take() {
                self.history.push(done);
            }
        }
    }
}

impl std::fmt::Debug for ChainPositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainPositionManager")
            .field("open", &self.current.is_some())
            .field("history_len", &self.history.len())
            .finish()
    }
}
