// =============================================================================
// Average True Range (ATR) — simple-mean variant
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR here is the plain arithmetic mean of the last `period` TR values. The
// engine uses it as a volatility unit for target spacing, where the
// smoothing-method distinction does not matter and the plain mean is easier
// to reason about.
// =============================================================================

use crate::market_data::Kline;

/// Mean true range over the last `period` bars (oldest-first input).
///
/// Returns `None` when `period` is zero, when fewer than `period + 1` candles
/// are available (each TR needs a previous close), or when the result is
/// non-finite or non-positive.
pub fn calculate_atr(candles: &[Kline], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        sum += candles[i].true_range(candles[i - 1].close);
    }

    let atr = sum / period as f64;
    if atr.is_finite() && atr > 0.0 {
        Some(atr)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn atr_is_mean_of_true_ranges() {
        // Previous close always inside the next bar, so TR = high - low.
        let candles = vec![
            candle(100.0, 101.0, 99.0, 100.0),
            candle(100.0, 102.0, 100.0, 101.0), // TR 2
            candle(101.0, 102.0, 98.0, 99.0),   // TR 4
            candle(99.0, 100.0, 97.0, 98.0),    // TR 3
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!((atr - 3.0).abs() < 1e-12, "expected mean(2,4,3)=3, got {atr}");
    }

    #[test]
    fn atr_counts_gaps_via_previous_close() {
        let candles = vec![
            candle(100.0, 101.0, 99.0, 100.0),
            // Gap down: TR = |high - prev_close| = |96 - 100| = 4.
            candle(95.0, 96.0, 94.0, 95.0),
        ];
        let atr = calculate_atr(&candles, 1).unwrap();
        assert!((atr - 4.0).abs() < 1e-12);
    }

    #[test]
    fn atr_needs_period_plus_one_candles() {
        let candles = vec![
            candle(100.0, 101.0, 99.0, 100.0),
            candle(100.0, 102.0, 100.0, 101.0),
        ];
        assert!(calculate_atr(&candles, 2).is_none());
        assert!(calculate_atr(&candles, 0).is_none());
        assert!(calculate_atr(&[], 14).is_none());
    }

    #[test]
    fn flat_market_yields_none() {
        let candles: Vec<Kline> = (0..20).map(|_| candle(100.0, 100.0, 100.0, 100.0)).collect();
        assert!(calculate_atr(&candles, 14).is_none(), "zero range is unusable");
    }
}
