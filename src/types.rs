// =============================================================================
// Shared types used across the Cascade trading simulator
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for longs, -1.0 for shorts. Multiplied into every PnL formula.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Whether `price` has reached `target` in the profit direction
    /// (boundary-inclusive).
    pub fn target_reached(&self, price: f64, target: f64) -> bool {
        match self {
            Self::Long => price >= target,
            Self::Short => price <= target,
        }
    }

    /// Whether `price` has crossed `stop` against the position
    /// (boundary-inclusive).
    pub fn stop_breached(&self, price: f64, stop: f64) -> bool {
        match self {
            Self::Long => price <= stop,
            Self::Short => price >= stop,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional bias produced by the decision oracle. Unlike [`Direction`]
/// this can be neutral, in which case no position is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    /// Convert to a tradeable direction. `None` for the neutral state, which
    /// keeps the plan builder out of reach of degenerate inputs.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Long => Some(Direction::Long),
            Self::Short => Some(Direction::Short),
            Self::Neutral => None,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// The reason a position (or what was left of it) was fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Active stop-loss breached.
    StopLoss,
    /// Structural invalidation level breached.
    Invalidation,
    /// The flat TP2 sibling reached before the chain engaged.
    TakeProfit2,
    /// Operator-requested close.
    ForcedExit,
    /// Session shutdown with a position still open.
    SystemStop,
    /// Repeated tick-processing failures exhausted the retry budget.
    ErrorEscalation,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::Invalidation => write!(f, "INVALIDATION"),
            Self::TakeProfit2 => write!(f, "TP2"),
            Self::ForcedExit => write!(f, "FORCED_EXIT"),
            Self::SystemStop => write!(f, "SYSTEM_STOP"),
            Self::ErrorEscalation => write!(f, "ERROR_ESCALATION"),
        }
    }
}
