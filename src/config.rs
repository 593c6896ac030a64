// =============================================================================
// Simulator Configuration — JSON-backed settings with atomic save
// =============================================================================
//
// Every tunable parameter of the simulator lives here. Persistence uses a
// tmp + rename pattern to prevent corruption on crash. All fields carry
// `#[serde(default)]` so adding new fields never breaks loading an older
// config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_initial_balance() -> f64 {
    100.0
}

fn default_leverage() -> f64 {
    50.0
}

fn default_fee_rate() -> f64 {
    0.0002
}

fn default_position_size_pct() -> f64 {
    0.95
}

fn default_monitor_interval_secs() -> u64 {
    10
}

fn default_analysis_interval_mins() -> u64 {
    15
}

fn default_atr_period() -> usize {
    14
}

fn default_sl_atr_multiplier() -> f64 {
    1.5
}

fn default_tp_atr_multiplier() -> f64 {
    1.0
}

fn default_tp2_atr_multiplier() -> f64 {
    1.7
}

fn default_tp1_close_pct() -> f64 {
    50.0
}

fn default_chain_close_pct() -> f64 {
    50.0
}

fn default_decay_ratio() -> f64 {
    0.7
}

fn default_max_chain_depth() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> String {
    "logs/cascade".to_string()
}

pub(crate) fn default_max_history() -> usize {
    50
}

// =============================================================================
// ChainParams
// =============================================================================

/// Parameters governing chain-plan construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    /// ATR multiplier for the stop-loss distance.
    #[serde(default = "default_sl_atr_multiplier")]
    pub sl_atr_multiplier: f64,

    /// ATR multiplier for the TP1 distance; also the base unit for chain
    /// spacing at deeper levels.
    #[serde(default = "default_tp_atr_multiplier")]
    pub tp_atr_multiplier: f64,

    /// ATR multiplier for the flat TP2 sibling distance.
    #[serde(default = "default_tp2_atr_multiplier")]
    pub tp2_atr_multiplier: f64,

    /// Percentage of the remaining position closed when TP1 fires.
    #[serde(default = "default_tp1_close_pct")]
    pub tp1_close_pct: f64,

    /// Percentage of the remaining position closed at each deeper chain node.
    #[serde(default = "default_chain_close_pct")]
    pub chain_close_pct: f64,

    /// Shrink factor (<1) applied to chain spacing at each deeper level.
    #[serde(default = "default_decay_ratio")]
    pub decay_ratio: f64,

    /// Ceiling on chain recursion depth. Zero yields a flat TP1/TP2 plan.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,

    /// Whether TP1 carries a recursive chain at all.
    #[serde(default = "default_true")]
    pub chain_enabled: bool,

    /// Whether triggered chain nodes ratchet the stop-loss forward.
    #[serde(default = "default_true")]
    pub trailing_sl_enabled: bool,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            sl_atr_multiplier: default_sl_atr_multiplier(),
            tp_atr_multiplier: default_tp_atr_multiplier(),
            tp2_atr_multiplier: default_tp2_atr_multiplier(),
            tp1_close_pct: default_tp1_close_pct(),
            chain_close_pct: default_chain_close_pct(),
            decay_ratio: default_decay_ratio(),
            max_chain_depth: default_max_chain_depth(),
            chain_enabled: true,
            trailing_sl_enabled: true,
        }
    }
}

// =============================================================================
// SimulatorConfig
// =============================================================================

/// Top-level configuration for the Cascade simulator.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Futures symbol being simulated.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Paper-account starting balance (USDT).
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,

    /// Leverage applied to the margin when sizing a position.
    #[serde(default = "default_leverage")]
    pub leverage: f64,

    /// Flat fee rate charged on notional at open and on every close.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,

    /// Fraction of the balance committed as margin for each position.
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,

    /// Seconds between price ticks.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Minutes between oracle re-analyses.
    #[serde(default = "default_analysis_interval_mins")]
    pub analysis_interval_mins: u64,

    /// ATR look-back used as the volatility unit at plan construction.
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Chain-plan construction parameters.
    #[serde(default)]
    pub chain: ChainParams,

    /// Directory where session snapshots are written.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Bound on persisted trade / plan history length.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            initial_balance: default_initial_balance(),
            leverage: default_leverage(),
            fee_rate: default_fee_rate(),
            position_size_pct: default_position_size_pct(),
            monitor_interval_secs: default_monitor_interval_secs(),
            analysis_interval_mins: default_analysis_interval_mins(),
            atr_period: default_atr_period(),
            chain: ChainParams::default(),
            log_dir: default_log_dir(),
            max_history: default_max_history(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            leverage = config.leverage,
            "simulator config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "simulator config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = SimulatorConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert!((cfg.initial_balance - 100.0).abs() < f64::EPSILON);
        assert!((cfg.leverage - 50.0).abs() < f64::EPSILON);
        assert!((cfg.fee_rate - 0.0002).abs() < f64::EPSILON);
        assert_eq!(cfg.monitor_interval_secs, 10);
        assert_eq!(cfg.analysis_interval_mins, 15);
        assert_eq!(cfg.chain.max_chain_depth, 5);
        assert!((cfg.chain.decay_ratio - 0.7).abs() < f64::EPSILON);
        assert!(cfg.chain.chain_enabled);
        assert!(cfg.chain.trailing_sl_enabled);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: SimulatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.chain.max_chain_depth, 5);
        assert!((cfg.chain.tp1_close_pct - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "chain": { "max_chain_depth": 3 } }"#;
        let cfg: SimulatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.chain.max_chain_depth, 3);
        assert!((cfg.chain.decay_ratio - 0.7).abs() < f64::EPSILON);
        assert!((cfg.leverage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = SimulatorConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: SimulatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.chain.max_chain_depth, cfg2.chain.max_chain_depth);
        assert_eq!(cfg.max_history, cfg2.max_history);
    }
}
