// =============================================================================
// Chain Plan — recursive take-profit tree built at position open
// =============================================================================
//
// A plan has two top-level siblings:
//
//   tp1_root — the first take-profit checkpoint, carrying a recursive chain
//              of progressively tighter children. Each child closes half of
//              whatever remains and drags the stop-loss behind the level that
//              just filled.
//   tp2_node — a flat 100% close at the bigger target, for the case where
//              price runs straight there without stepping through the chain.
//
// The tree structure is immutable after construction; only the per-node
// trigger fields mutate as price walks the plan. Children are exclusively
// owned by their parent, so the structure is a strict tree by construction.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ChainParams;
use crate::error::EngineError;
use crate::types::Direction;

/// Fraction of the chain spacing used to trail the stop behind a parent's
/// target when its child is built.
const CHAIN_SL_PULLBACK: f64 = 0.3;

// =============================================================================
// TakeProfitNode
// =============================================================================

/// One checkpoint in the close-out plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitNode {
    /// Depth in the chain. 0 for the two top-level siblings.
    pub level: u32,
    /// Absolute price that triggers this node.
    pub target_price: f64,
    /// Stop-loss protecting the remaining position once this node's
    /// ancestors have triggered.
    pub stop_loss_price: f64,
    /// Percentage (0–100] of the size remaining at activation to close.
    pub close_fraction: f64,
    /// Percentage of the original position this node represents before
    /// closing (derived from the parent's remaining-after-close).
    pub remaining_fraction_of_original: f64,
    /// Set exactly once, never reset.
    #[serde(default)]
    pub triggered: bool,
    #[serde(default)]
    pub trigger_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl_at_trigger: Option<f64>,
    /// Owned child nodes, ordered.
    #[serde(default)]
    pub children: Vec<TakeProfitNode>,
}

impl TakeProfitNode {
    fn new(
        level: u32,
        target_price: f64,
        stop_loss_price: f64,
        close_fraction: f64,
        remaining_fraction_of_original: f64,
    ) -> Self {
        Self {
            level,
            target_price,
            stop_loss_price,
            close_fraction,
            remaining_fraction_of_original,
            triggered: false,
            trigger_time: None,
            trigger_price: None,
            realized_pnl_at_trigger: None,
            children: Vec::new(),
        }
    }

    /// Record this node as fired. Trigger fields are write-once.
    pub fn mark_triggered(&mut self, time: DateTime<Utc>, price: f64, pnl: f64) {
        debug_assert!(!self.triggered, "node at level {} fired twice", self.level);
        self.triggered = true;
        self.trigger_time = Some(time);
        self.trigger_price = Some(price);
        self.realized_pnl_at_trigger = Some(pnl);
    }

    /// Number of nodes in this subtree, self included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// An untriggered node must not have any triggered descendant.
    /// Walked by tests after every synthetic tick sequence.
    pub fn triggering_is_monotonic(&self) -> bool {
        if !self.triggered && self.any_descendant_triggered() {
            return false;
        }
        self.children.iter().all(|c| c.triggering_is_monotonic())
    }

    fn any_descendant_triggered(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.triggered || c.any_descendant_triggered())
    }
}

// =============================================================================
// ChainPlan
// =============================================================================

/// The complete close-out plan for one position. Created once per
/// position-open event; 1:1 ownership by the ledger it was built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPlan {
    pub direction: Direction,
    pub entry_price: f64,
    /// ATR at plan-construction time.
    pub volatility_unit: f64,
    /// Root of the recursive chain.
    pub tp1_root: TakeProfitNode,
    /// Flat full-close sibling; deliberately not a child of `tp1_root`.
    pub tp2_node: TakeProfitNode,
    pub max_chain_depth: u32,
    pub decay_ratio: f64,
}

impl ChainPlan {
    /// Total node count across the chain and the TP2 sibling.
    pub fn node_count(&self) -> usize {
        self.tp1_root.node_count() + self.tp2_node.node_count()
    }

    /// Whether any node *below* the tp1 root has fired. Once the deeper chain
    /// is engaged it owns the exit and the TP2 sibling is superseded; the
    /// root firing alone does not disqualify TP2, since the direct-run case
    /// is exactly what TP2 exists for.
    pub fn deep_chain_engaged(&self) -> bool {
        fn any_triggered(node: &TakeProfitNode) -> bool {
            node.triggered || node.children.iter().any(any_triggered)
        }
        self.tp1_root.children.iter().any(any_triggered)
    }
}

// =============================================================================
// ChainPlanBuilder
// =============================================================================

/// Builds a [`ChainPlan`] from an entry, the first two take-profit levels,
/// a protective stop, and the volatility unit.
pub struct ChainPlanBuilder<'a> {
    params: &'a ChainParams,
}

impl<'a> ChainPlanBuilder<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self { params }
    }

    /// Construct the full plan tree. Pure: no clock, no I/O, no node starts
    /// triggered.
    ///
    /// Fails with [`EngineError::InvalidPlan`] when `tp1 == entry` (no
    /// direction to chain along) or `volatility_unit <= 0` (spacing would be
    /// degenerate). Neutral signals must be filtered by the caller before
    /// this point.
    pub fn build(
        &self,
        direction: Direction,
        entry_price: f64,
        tp1_price: f64,
        tp2_price: f64,
        stop_loss_price: f64,
        volatility_unit: f64,
    ) -> Result<ChainPlan, EngineError> {
        if tp1_price == entry_price {
            return Err(EngineError::InvalidPlan(format!(
                "tp1 collapses onto entry at {entry_price}"
            )));
        }
        if volatility_unit <= 0.0 || !volatility_unit.is_finite() {
            return Err(EngineError::InvalidPlan(format!(
                "non-positive volatility unit {volatility_unit}"
            )));
        }

        let mut tp1_root = TakeProfitNode::new(
            0,
            tp1_price,
            stop_loss_price,
            self.params.tp1_close_pct,
            100.0,
        );

        let tp2_node = TakeProfitNode::new(0, tp2_price, stop_loss_price, 100.0, 100.0);

        if self.params.chain_enabled {
            self.attach_children(&mut tp1_root, direction, volatility_unit, 1);
        }

        let plan = ChainPlan {
            direction,
            entry_price,
            volatility_unit,
            tp1_root,
            tp2_node,
            max_chain_depth: self.params.max_chain_depth,
            decay_ratio: self.params.decay_ratio,
        };

        debug!(
            %direction,
            entry_price,
            tp1_price,
            tp2_price,
            stop_loss_price,
            volatility_unit,
            nodes = plan.node_count(),
            "chain plan built"
        );

        Ok(plan)
    }

    /// Recursively attach one child per node with decaying spacing. Depth `d`
    /// spacing is `atr * tp_mult * decay^d`; the child's stop sits a fraction
    /// of that spacing behind the parent's target, on the profit side.
    fn attach_children(
        &self,
        parent: &mut TakeProfitNode,
        direction: Direction,
        volatility_unit: f64,
        depth: u32,
    ) {
        if depth >= self.params.max_chain_depth {
            return;
        }

        let spacing = volatility_unit
            * self.params.tp_atr_multiplier
            * self.params.decay_ratio.powi(depth as i32);

        let sign = direction.sign();
        let target_price = parent.target_price + sign * spacing;
        let stop_loss_price = parent.target_price - sign * spacing * CHAIN_SL_PULLBACK;

        let remaining = parent.remaining_fraction_of_original * (100.0 - parent.close_fraction)
            / 100.0;

        let mut child = TakeProfitNode::new(
            depth,
            target_price,
            stop_loss_price,
            self.params.chain_close_pct,
            remaining,
        );

        self.attach_children(&mut child, direction, volatility_unit, depth + 1);
        parent.children.push(child);
    }
}
