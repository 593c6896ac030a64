// =============================================================================
// Market data — candle types and the exchange-facing source trait
// =============================================================================

pub mod binance;

pub use binance::BinanceFutures;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Kline {
    /// True range against the previous close.
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
    #[error("exchange returned error status {status}: {body}")]
    Exchange { status: u16, body: String },
}

/// Everything the engine needs from an exchange, read-only.
///
/// Implementations must be safe to call concurrently; the tick loop and the
/// analysis cycle may overlap.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest traded price for `symbol`.
    async fn get_price(&self, symbol: &str) -> Result<f64, MarketDataError>;

    /// Most recent `limit` candles at `interval` (e.g. "15m", "4h"), oldest
    /// first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError>;

    /// Order-book imbalance in [-1, 1]: positive means bid-heavy.
    async fn get_order_book_imbalance(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<f64, MarketDataError>;

    /// Current volatility unit: mean true range over `period` 15m candles.
    async fn get_volatility_unit(
        &self,
        symbol: &str,
        period: usize,
    ) -> Result<f64, MarketDataError> {
        let klines = self.get_klines(symbol, "15m", period + 1).await?;
        crate::indicators::calculate_atr(&klines, period).ok_or_else(|| {
            MarketDataError::Malformed(format!(
                "cannot derive a volatility unit from {} candles",
                klines.len()
            ))
        })
    }
}
