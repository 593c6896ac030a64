// =============================================================================
// Relative Strength Index (RSI) — simple-average variant
// =============================================================================
//
// Gains and losses over the last `period` deltas are averaged arithmetically:
//   RS  = avg_gain / avg_loss
//   RSI = 100 - 100 / (1 + RS)
//
// avg_loss of zero maps to RSI 100 (pure up-move window).
// =============================================================================

/// RSI over the last `period` price changes (oldest-first closes).
///
/// Returns `None` when `period` is zero or there are fewer than `period + 1`
/// closes.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let start = closes.len() - period;
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for i in start..closes.len() {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!((rsi - 100.0).abs() < 1e-9);
    }

    #[test]
    fn all_losses_is_0() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!(rsi.abs() < 1e-9);
    }

    #[test]
    fn balanced_moves_sit_at_50() {
        // Alternating +1 / -1: equal average gain and loss.
        let mut closes = vec![100.0];
        for i in 0..20 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!((rsi - 50.0).abs() < 1e-9, "got {rsi}");
    }

    #[test]
    fn flat_series_is_100_by_convention() {
        // No losses at all, so RS is unbounded and RSI pins at 100.
        let closes = vec![100.0; 20];
        let rsi = calculate_rsi(&closes, 14).unwrap();
        assert!((rsi - 100.0).abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_is_none() {
        assert!(calculate_rsi(&[100.0; 14], 14).is_none());
        assert!(calculate_rsi(&[], 14).is_none());
        assert!(calculate_rsi(&[1.0, 2.0], 0).is_none());
    }
}
