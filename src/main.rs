// =============================================================================
// Cascade Bot — Main Entry Point
// =============================================================================
//
// Paper-trading simulator for chained take-profit management on BTC perpetual
// futures. All market data is live, all fills are simulated; no order ever
// leaves this process.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod config;
mod error;
mod indicators;
mod ledger;
mod manager;
mod market_data;
mod oracle;
mod plan;
mod session;
mod tick_loop;
mod types;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::SimulatorConfig;
use crate::market_data::BinanceFutures;
use crate::oracle::RuleOracle;
use crate::tick_loop::Engine;

const CONFIG_PATH: &str = "cascade_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Cascade Bot — Chained TP Simulator                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = SimulatorConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SimulatorConfig::default()
    });

    // Environment overrides for the common knobs.
    if let Ok(symbol) = std::env::var("CASCADE_SYMBOL") {
        config.symbol = symbol.trim().to_uppercase();
    }
    if let Ok(balance) = std::env::var("CASCADE_BALANCE") {
        match balance.parse::<f64>() {
            Ok(v) if v > 0.0 => config.initial_balance = v,
            _ => warn!(value = %balance, "Ignoring unusable CASCADE_BALANCE"),
        }
    }
    if let Ok(secs) = std::env::var("CASCADE_MONITOR_SECS") {
        match secs.parse::<u64>() {
            Ok(v) if v > 0 => config.monitor_interval_secs = v,
            _ => warn!(value = %secs, "Ignoring unusable CASCADE_MONITOR_SECS"),
        }
    }
    if let Ok(mins) = std::env::var("CASCADE_ANALYSIS_MINS") {
        match mins.parse::<u64>() {
            Ok(v) if v > 0 => config.analysis_interval_mins = v,
            _ => warn!(value = %mins, "Ignoring unusable CASCADE_ANALYSIS_MINS"),
        }
    }

    info!(
        symbol = %config.symbol,
        balance = config.initial_balance,
        leverage = config.leverage,
        monitor_secs = config.monitor_interval_secs,
        analysis_mins = config.analysis_interval_mins,
        chain_depth = config.chain.max_chain_depth,
        "Simulator configured (paper trading only)"
    );

    // ── 2. Build shared state and exchange adapters ──────────────────────
    let state = AppState::new(config.clone());

    let market = BinanceFutures::new()?;
    let oracle = RuleOracle::new(
        BinanceFutures::new()?,
        config.atr_period,
        config.chain.sl_atr_multiplier,
        config.chain.tp_atr_multiplier,
        config.chain.tp2_atr_multiplier,
    );

    // ── 3. Run the engine loop with a shutdown channel ───────────────────
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let engine = Engine::new(state.clone(), market, oracle)?;
    let loop_handle = tokio::spawn(engine.run(stop_rx));

    info!("Engine running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");
    let _ = stop_tx.send(true);

    match loop_handle.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "Engine task did not shut down cleanly"),
    }

    if let Err(e) = state.config.save(CONFIG_PATH) {
        warn!(error = %e, "Failed to save config on shutdown");
    }

    info!("Cascade Bot shut down complete.");
    Ok(())
}
