// =============================================================================
// Error taxonomy for the Cascade engine
// =============================================================================
//
// Two fatality classes:
//   - Construction-time errors (InvalidPlan, InsufficientMargin) kill only the
//     attempt that raised them. No partial state is left behind: no ledger is
//     created and no fee is deducted.
//   - Per-tick errors (TickProcessing, MarketDataUnavailable) are transient.
//     The tick loop logs them, skips the tick, and retries on the next price.
//     A position that keeps failing beyond the retry budget is force-closed
//     rather than left unmonitored.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Plan construction was given degenerate inputs.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Open requested with non-positive available margin.
    #[error("insufficient margin: {available:.2} available")]
    InsufficientMargin { available: f64 },

    /// A tick could not be processed; ledger state is unchanged.
    #[error("tick processing failed: {0}")]
    TickProcessing(String),

    /// The external market data source is unreachable or returned garbage.
    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),
}

impl From<crate::market_data::MarketDataError> for EngineError {
    fn from(e: crate::market_data::MarketDataError) -> Self {
        Self::MarketDataUnavailable(e.to_string())
    }
}
