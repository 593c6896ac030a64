// =============================================================================
// Decision oracle — rule-based market scoring and plan proposal
// =============================================================================
//
// The oracle turns raw market data into a directional bias, a confidence
// figure, and a complete set of price levels (tp1, tp2, stop, invalidation).
// The scoring function is pure; everything I/O-bound lives behind the
// `MarketDataSource` trait so tests can script the inputs.
//
// Score components (roughly -8 .. +8):
//   order-book imbalance beyond ±0.3         ±1
//   RSI oversold (<30) / overbought (>70)    ±2
//   RSI leaning (<40 / >60)                  ±0.5
//   EMA9 above/below EMA21 by 0.2%           ±1
//   4h trend up/down                         ±2
//   within 0.5% of support / resistance      ±1
//
// Long probability is clamp(50 + 6*score, 5, 95); a bias is declared only
// when |score| >= 1.5.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::indicators::{calculate_ema, calculate_rsi};
use crate::market_data::MarketDataSource;
use crate::types::Bias;

const SCORE_BIAS_THRESHOLD: f64 = 1.5;
const OBI_THRESHOLD: f64 = 0.3;
const EMA_CROSS_BAND: f64 = 0.002;
const LEVEL_PROXIMITY_PCT: f64 = 0.5;
const INVALIDATION_BUFFER: f64 = 0.002;
const ENTRY_LIMIT_OFFSET: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// A fully-priced trade idea. `bias == Neutral` carries levels equal to the
/// current price and must not be acted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanProposal {
    pub bias: Bias,
    /// Probability of the long side, in percent, clamped to [5, 95].
    pub probability_pct: f64,
    pub score: f64,
    pub entry_price: f64,
    /// Limit price shaded inside the mark for a resting entry order.
    pub entry_limit_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub stop_loss_price: f64,
    pub invalidation_price: f64,
    /// ATR at proposal time, reused as the chain spacing unit.
    pub volatility_unit: f64,
    /// |tp2 - entry| / |entry - stop|; zero when the levels collapse.
    pub risk_reward: f64,
    /// Timeframe trends at proposal time. Only the 4h one scores; the
    /// shorter ones are kept for the plan history.
    pub trend_15m: Trend,
    pub trend_1h: Trend,
    pub trend_4h: Trend,
    /// Human-readable scoring factors, for the log and the plan history.
    pub reasons: Vec<String>,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn propose(&self, symbol: &str) -> Result<PlanProposal, EngineError>;
}

// ---------------------------------------------------------------------------
// Pure scoring
// ---------------------------------------------------------------------------

pub(crate) struct ScoreInputs {
    pub obi: f64,
    pub rsi: f64,
    pub ema9: f64,
    pub ema21: f64,
    pub trend_4h: Trend,
    pub price: f64,
    pub support: f64,
    pub resistance: f64,
}

pub(crate) fn score_market(inputs: &ScoreInputs) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if inputs.obi > OBI_THRESHOLD {
        score += 1.0;
        reasons.push(format!("bid-heavy book ({:+.2}) +1", inputs.obi));
    } else if inputs.obi < -OBI_THRESHOLD {
        score -= 1.0;
        reasons.push(format!("ask-heavy book ({:+.2}) -1", inputs.obi));
    }

    if inputs.rsi < 30.0 {
        score += 2.0;
        reasons.push(format!("RSI oversold ({:.0}) +2", inputs.rsi));
    } else if inputs.rsi > 70.0 {
        score -= 2.0;
        reasons.push(format!("RSI overbought ({:.0}) -2", inputs.rsi));
    } else if inputs.rsi < 40.0 {
        score += 0.5;
        reasons.push(format!("RSI leaning low ({:.0}) +0.5", inputs.rsi));
    } else if inputs.rsi > 60.0 {
        score -= 0.5;
        reasons.push(format!("RSI leaning high ({:.0}) -0.5", inputs.rsi));
    }

    if inputs.ema9 > inputs.ema21 * (1.0 + EMA_CROSS_BAND) {
        score += 1.0;
        reasons.push("EMA9 above EMA21 +1".to_string());
    } else if inputs.ema9 < inputs.ema21 * (1.0 - EMA_CROSS_BAND) {
        score -= 1.0;
        reasons.push("EMA9 below EMA21 -1".to_string());
    }

    match inputs.trend_4h {
        Trend::Up => {
            score += 2.0;
            reasons.push("4h uptrend +2".to_string());
        }
        Trend::Down => {
            score -= 2.0;
            reasons.push("4h downtrend -2".to_string());
        }
        Trend::Flat => {}
    }

    let dist_to_support = (inputs.price - inputs.support) / inputs.price * 100.0;
    let dist_to_resistance = (inputs.resistance - inputs.price) / inputs.price * 100.0;
    if dist_to_support < LEVEL_PROXIMITY_PCT {
        score += 1.0;
        reasons.push("near support +1".to_string());
    }
    if dist_to_resistance < LEVEL_PROXIMITY_PCT {
        score -= 1.0;
        reasons.push("near resistance -1".to_string());
    }

    (score, reasons)
}

fn long_probability(score: f64) -> f64 {
    (50.0 + score * 6.0).clamp(5.0, 95.0)
}

fn bias_from_score(score: f64) -> Bias {
    if score >= SCORE_BIAS_THRESHOLD {
        Bias::Long
    } else if score <= -SCORE_BIAS_THRESHOLD {
        Bias::Short
    } else {
        Bias::Neutral
    }
}

// ---------------------------------------------------------------------------
// Rule oracle over a live market source
// ---------------------------------------------------------------------------

pub struct RuleOracle<M: MarketDataSource> {
    source: M,
    atr_period: usize,
    sl_atr_multiplier: f64,
    tp_atr_multiplier: f64,
    tp2_atr_multiplier: f64,
}

impl<M: MarketDataSource> RuleOracle<M> {
    pub fn new(
        source: M,
        atr_period: usize,
        sl_atr_multiplier: f64,
        tp_atr_multiplier: f64,
        tp2_atr_multiplier: f64,
    ) -> Self {
        Self {
            source,
            atr_period,
            sl_atr_multiplier,
            tp_atr_multiplier,
            tp2_atr_multiplier,
        }
    }

    async fn trend(&self, symbol: &str, interval: &str) -> Result<Trend, EngineError> {
        let klines = self.source.get_klines(symbol, interval, 25).await?;
        let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
        let (Some(ema9), Some(ema21)) =
            (calculate_ema(&closes, 9), calculate_ema(&closes, 21))
        else {
            return Ok(Trend::Flat);
        };
        Ok(if ema9 > ema21 * (1.0 + EMA_CROSS_BAND) {
            Trend::Up
        } else if ema9 < ema21 * (1.0 - EMA_CROSS_BAND) {
            Trend::Down
        } else {
            Trend::Flat
        })
    }
}

#[async_trait]
impl<M: MarketDataSource> DecisionOracle for RuleOracle<M> {
    async fn propose(&self, symbol: &str) -> Result<PlanProposal, EngineError> {
        let price = self.source.get_price(symbol).await?;
        let atr = self
            .source
            .get_volatility_unit(symbol, self.atr_period)
            .await?;
        let klines = self.source.get_klines(symbol, "15m", 30).await?;
        let obi = self.source.get_order_book_imbalance(symbol, 20).await?;

        let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
        let rsi = calculate_rsi(&closes, 14).unwrap_or(50.0);
        let ema9 = calculate_ema(&closes, 9).unwrap_or(price);
        let ema21 = calculate_ema(&closes, 21).unwrap_or(price);
        let trend_15m = self.trend(symbol, "15m").await?;
        let trend_1h = self.trend(symbol, "1h").await?;
        let trend_4h = self.trend(symbol, "4h").await?;

        // Support and resistance from the last 20 candles.
        let window = &klines[klines.len().saturating_sub(20)..];
        let support = window.iter().map(|k| k.low).fold(f64::INFINITY, f64::min);
        let resistance = window
            .iter()
            .map(|k| k.high)
            .fold(f64::NEG_INFINITY, f64::max);

        let (score, reasons) = score_market(&ScoreInputs {
            obi,
            rsi,
            ema9,
            ema21,
            trend_4h,
            price,
            support,
            resistance,
        });
        let bias = bias_from_score(score);
        let probability_pct = long_probability(score);

        debug!(
            symbol,
            price, atr, obi, rsi, score, ?trend_15m, ?trend_1h, ?trend_4h,
            "market analysis complete"
        );

        let (entry_limit_price, tp1_price, tp2_price, stop_loss_price, invalidation_price) =
            match bias {
                Bias::Long => (
                    price * (1.0 - ENTRY_LIMIT_OFFSET),
                    price + atr * self.tp_atr_multiplier,
                    price + atr * self.tp2_atr_multiplier,
                    price - atr * self.sl_atr_multiplier,
                    support * (1.0 - INVALIDATION_BUFFER),
                ),
                Bias::Short => (
                    price * (1.0 + ENTRY_LIMIT_OFFSET),
                    price - atr * self.tp_atr_multiplier,
                    price - atr * self.tp2_atr_multiplier,
                    price + atr * self.sl_atr_multiplier,
                    resistance * (1.0 + INVALIDATION_BUFFER),
                ),
                // Collapsed levels: nothing here may be traded.
                Bias::Neutral => (price, price, price, price, price),
            };

        let risk = (price - stop_loss_price).abs();
        let risk_reward = if risk > 0.0 {
            (tp2_price - price).abs() / risk
        } else {
            0.0
        };

        let proposal = PlanProposal {
            bias,
            probability_pct,
            score,
            entry_price: price,
            entry_limit_price,
            tp1_price,
            tp2_price,
            stop_loss_price,
            invalidation_price,
            volatility_unit: atr,
            risk_reward,
            trend_15m,
            trend_1h,
            trend_4h,
            reasons,
        };

        info!(
            symbol,
            bias = %proposal.bias,
            score,
            probability = probability_pct,
            entry = proposal.entry_price,
            tp1 = proposal.tp1_price,
            tp2 = proposal.tp2_price,
            sl = proposal.stop_loss_price,
            risk_reward = proposal.risk_reward,
            "plan proposed"
        );

        Ok(proposal)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Kline, MarketDataError};
    use chrono::Utc;

    fn base_inputs() -> ScoreInputs {
        ScoreInputs {
            obi: 0.0,
            rsi: 50.0,
            ema9: 100.0,
            ema21: 100.0,
            trend_4h: Trend::Flat,
            price: 100.0,
            // Far enough that proximity bonuses stay off.
            support: 90.0,
            resistance: 110.0,
        }
    }

    #[test]
    fn neutral_market_scores_zero() {
        let (score, reasons) = score_market(&base_inputs());
        assert_eq!(score, 0.0);
        assert!(reasons.is_empty());
        assert_eq!(bias_from_score(score), Bias::Neutral);
        assert!((long_probability(score) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn stacked_bullish_signals_reach_long_bias() {
        let inputs = ScoreInputs {
            obi: 0.4,
            rsi: 25.0,
            ema9: 102.0,
            ema21: 100.0,
            trend_4h: Trend::Up,
            ..base_inputs()
        };
        let (score, reasons) = score_market(&inputs);
        // +1 book, +2 rsi, +1 ema, +2 trend.
        assert!((score - 6.0).abs() < 1e-9);
        assert_eq!(reasons.len(), 4);
        assert_eq!(bias_from_score(score), Bias::Long);
        // 50 + 36 clamps to 86, inside the [5, 95] band.
        assert!((long_probability(score) - 86.0).abs() < 1e-9);
    }

    #[test]
    fn probability_clamps_at_extremes() {
        assert!((long_probability(10.0) - 95.0).abs() < 1e-9);
        assert!((long_probability(-10.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn proximity_bonuses_cancel_in_a_tight_range() {
        let inputs = ScoreInputs {
            support: 99.8,
            resistance: 100.2,
            ..base_inputs()
        };
        let (score, reasons) = score_market(&inputs);
        assert_eq!(score, 0.0, "support +1 and resistance -1 must cancel");
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn rsi_leaning_band_is_half_weight() {
        let (low, _) = score_market(&ScoreInputs {
            rsi: 35.0,
            ..base_inputs()
        });
        assert!((low - 0.5).abs() < 1e-9);
        let (high, _) = score_market(&ScoreInputs {
            rsi: 65.0,
            ..base_inputs()
        });
        assert!((high + 0.5).abs() < 1e-9);
    }

    // ── RuleOracle over a scripted source ──────────────────────────────────

    struct ScriptedSource {
        price: f64,
        klines_15m: Vec<Kline>,
        klines_4h: Vec<Kline>,
        obi: f64,
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn get_price(&self, _symbol: &str) -> Result<f64, MarketDataError> {
            Ok(self.price)
        }

        async fn get_klines(
            &self,
            _symbol: &str,
            interval: &str,
            _limit: usize,
        ) -> Result<Vec<Kline>, MarketDataError> {
            Ok(match interval {
                "4h" => self.klines_4h.clone(),
                _ => self.klines_15m.clone(),
            })
        }

        async fn get_order_book_imbalance(
            &self,
            _symbol: &str,
            _depth: usize,
        ) -> Result<f64, MarketDataError> {
            Ok(self.obi)
        }
    }

    /// Steadily rising candles around `start`, step 1, range 2 per bar.
    fn rising_candles(start: f64, count: usize) -> Vec<Kline> {
        (0..count)
            .map(|i| {
                let close = start + i as f64;
                Kline {
                    open_time: Utc::now(),
                    open: close - 1.0,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    }

    /// Two steps forward, one step back: a grind that keeps RSI mid-band
    /// instead of pinning it overbought.
    fn grinding_candles(start: f64, count: usize) -> Vec<Kline> {
        let mut close = start;
        (0..count)
            .map(|i| {
                close += if i % 2 == 0 { 1.1 } else { -0.9 };
                Kline {
                    open_time: Utc::now(),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn bullish_script_produces_long_levels() {
        let klines_15m = grinding_candles(100.0, 30);
        // Mid-range price: no support or resistance proximity either way.
        let price = klines_15m.last().unwrap().close;
        let source = ScriptedSource {
            price,
            klines_15m,
            klines_4h: rising_candles(100.0, 25),
            obi: 0.5,
        };
        let oracle = RuleOracle::new(source, 14, 1.5, 1.0, 1.7);
        let plan = oracle.propose("BTCUSDT").await.unwrap();

        assert_eq!(plan.bias, Bias::Long);
        assert!(plan.score >= SCORE_BIAS_THRESHOLD);
        // The resting limit shades 0.2% below the mark for a long.
        assert!((plan.entry_limit_price - plan.entry_price * 0.998).abs() < 1e-9);
        assert_eq!(plan.trend_4h, Trend::Up);
        assert!(plan.tp1_price > plan.entry_price);
        assert!(plan.tp2_price > plan.tp1_price);
        assert!(plan.stop_loss_price < plan.entry_price);
        // Invalidation sits just below the window's support.
        assert!(plan.invalidation_price < plan.entry_price);
        assert!(plan.volatility_unit > 0.0);
        // TP2 at 1.7 ATR against a stop at 1.5 ATR.
        assert!((plan.risk_reward - 1.7 / 1.5).abs() < 1e-9);
        assert!(!plan.reasons.is_empty());
    }

    #[tokio::test]
    async fn flat_script_stays_neutral_with_collapsed_levels() {
        // Alternating closes, flat EMAs, mid-range price: nothing scores.
        let klines: Vec<Kline> = (0..30)
            .map(|i| {
                let close = if i % 2 == 0 { 100.5 } else { 99.5 };
                Kline {
                    open_time: Utc::now(),
                    open: 100.0,
                    high: 110.0,
                    low: 90.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect();
        let source = ScriptedSource {
            price: 100.0,
            klines_15m: klines.clone(),
            klines_4h: klines,
            obi: 0.0,
        };
        let oracle = RuleOracle::new(source, 14, 1.5, 1.0, 1.7);
        let plan = oracle.propose("BTCUSDT").await.unwrap();

        assert_eq!(plan.bias, Bias::Neutral);
        assert!((plan.entry_limit_price - plan.entry_price).abs() < 1e-9);
        assert!((plan.tp1_price - plan.entry_price).abs() < 1e-9);
        assert!((plan.stop_loss_price - plan.entry_price).abs() < 1e-9);
    }

    #[tokio::test]
    async fn too_few_candles_is_a_data_error() {
        let source = ScriptedSource {
            price: 100.0,
            klines_15m: rising_candles(100.0, 5),
            klines_4h: rising_candles(100.0, 5),
            obi: 0.0,
        };
        let oracle = RuleOracle::new(source, 14, 1.5, 1.0, 1.7);
        let err = oracle.propose("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, EngineError::MarketDataUnavailable(_)));
    }
}
