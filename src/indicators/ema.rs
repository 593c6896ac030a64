// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Standard recursive EMA seeded with the SMA of the first `period` closes:
//   k       = 2 / (period + 1)
//   EMA_0   = SMA(first `period` values)
//   EMA_t   = value_t * k + EMA_{t-1} * (1 - k)
// =============================================================================

/// Latest EMA of `values` (oldest first).
///
/// Returns `None` when `period` is zero or there are fewer than `period`
/// values.
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema: f64 = values[..period].iter().sum::<f64>() / period as f64;
    for &value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
    }

    ema.is_finite().then_some(ema)
}
