// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator functions over candle slices. Every public
// function returns `Option<T>` so callers are forced to handle
// insufficient-data and numerical-edge-case scenarios.

pub mod atr;
pub mod ema;
pub mod rsi;

pub use atr::calculate_atr;
pub use ema::calculate_ema;
pub use rsi::calculate_rsi;
