// =============================================================================
// Tick-driven engine loop
// =============================================================================
//
// Two cadences share one loop: a fast monitor tick (price fetch plus position
// evaluation plus snapshot) and a slower analysis cycle that asks the oracle
// for a plan and opens a position when flat. Everything stateful is funneled
// through `AppState`; guards are dropped before any await.
//
// Failure policy: a failed tick (price fetch or evaluation) is logged and
// counted. Three consecutive failures with a position open force the position
// closed at the last good price, since flying blind with leverage is worse
// than a bad exit. The counter resets on any successful tick.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::error::EngineError;
use crate::manager::{SizingInputs, TickOutcome};
use crate::market_data::MarketDataSource;
use crate::oracle::{DecisionOracle, PlanProposal};
use crate::plan::ChainPlanBuilder;
use crate::session::{SessionSnapshot, SnapshotWriter};
use crate::types::CloseReason;

/// Consecutive tick failures tolerated before the safety exit.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

pub struct Engine<M: MarketDataSource, O: DecisionOracle> {
    state: Arc<AppState>,
    market: M,
    oracle: O,
    snapshots: SnapshotWriter,
    consecutive_errors: u32,
    last_good_price: Option<f64>,
}

impl<M: MarketDataSource, O: DecisionOracle> Engine<M, O> {
    pub fn new(state: Arc<AppState>, market: M, oracle: O) -> Result<Self> {
        let snapshots = SnapshotWriter::new(std::path::Path::new(&state.config.log_dir))
            .context("failed to prepare snapshot directory")?;
        Ok(Self {
            state,
            market,
            oracle,
            snapshots,
            consecutive_errors: 0,
            last_good_price: None,
        })
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let mut monitor = interval(Duration::from_secs(self.state.config.monitor_interval_secs));
        let mut analysis =
            interval(Duration::from_secs(self.state.config.analysis_interval_mins * 60));

        info!(
            symbol = %self.state.config.symbol,
            monitor_secs = self.state.config.monitor_interval_secs,
            analysis_mins = self.state.config.analysis_interval_mins,
            balance = self.state.config.initial_balance,
            "engine loop starting"
        );

        loop {
            tokio::select! {
                _ = monitor.tick() => {
                    self.tick_once().await;
                }
                _ = analysis.tick() => {
                    self.analyze_once().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Monitor tick
    // -------------------------------------------------------------------------

    /// One monitoring pass: fetch the price, evaluate the open position,
    /// settle whatever fired, persist a snapshot.
    pub async fn tick_once(&mut self) {
        let price = match self.market.get_price(&self.state.config.symbol).await {
            Ok(p) => p,
            Err(e) => {
                self.note_tick_failure("price fetch", e.to_string());
                return;
            }
        };

        let outcome = {
            let mut manager = self.state.manager.write();
            manager.on_tick(price, Utc::now())
        };

        match outcome {
            Ok(outcome) => {
                self.consecutive_errors = 0;
                self.last_good_price = Some(price);
                self.settle(&outcome);

                let session = self.state.session.read();
                let manager = self.state.manager.read();
                info!("{}", session.status_line(manager.position(), price));
            }
            Err(e) => {
                self.note_tick_failure("tick evaluation", e.to_string());
            }
        }

        self.persist(price);
    }

    /// Book fills into the session and, on a full close, into the trade
    /// counters.
    fn settle(&self, outcome: &TickOutcome) {
        if let Some(fill) = outcome.fill() {
            self.state.session.write().settle_fill(fill);
        }
        if matches!(outcome, TickOutcome::FullClose(_)) {
            let manager = self.state.manager.read();
            if let Some(done) = manager.history().last() {
                self.state.session.write().record_completed(done);
            }
        }
    }

    fn note_tick_failure(&mut self, context: &str, message: String) {
        self.consecutive_errors += 1;
        warn!(
            context,
            %message,
            consecutive = self.consecutive_errors,
            "tick failed"
        );
        self.state.record_error(context, message);

        if self.consecutive_errors < MAX_CONSECUTIVE_ERRORS {
            return;
        }

        // Budget exhausted. With a position open, exit at the last usable
        // price rather than keep running blind.
        let has_position = self.state.manager.read().has_open_position();
        if has_position {
            if let Some(price) = self.last_good_price {
                error!(
                    price,
                    "error budget exhausted with open position, forcing exit"
                );
                let fill = self
                    .state
                    .manager
                    .write()
                    .force_close(price, CloseReason::ErrorEscalation, Utc::now());
                if let Some(fill) = fill {
                    self.settle(&TickOutcome::FullClose(fill));
                }
                self.persist(price);
            } else {
                error!("error budget exhausted before any usable price was seen");
            }
        }
        self.consecutive_errors = 0;
    }

    // -------------------------------------------------------------------------
    // Analysis cycle
    // -------------------------------------------------------------------------

    /// Ask the oracle for a plan and open a position when flat and the bias
    /// is directional. A conflicting bias against an open position is logged
    /// but never acted on.
    pub async fn analyze_once(&mut self) {
        let proposal = match self.oracle.propose(&self.state.config.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "market analysis failed, keeping previous stance");
                self.state.record_error("analysis", e.to_string());
                return;
            }
        };

        let open_direction = self.state.manager.read().position().map(|p| p.direction);
        match (open_direction, proposal.bias.direction()) {
            (None, Some(direction)) => {
                if let Err(e) = self.open_from_proposal(&proposal, direction) {
                    warn!(error = %e, "plan rejected at open");
                    self.state.record_error("open", e.to_string());
                    self.state.session.write().record_plan(
                        proposal,
                        false,
                        Some(e.to_string()),
                    );
                }
            }
            (None, None) => {
                debug!(score = proposal.score, "no directional edge, staying flat");
                self.state.session.write().record_plan(
                    proposal,
                    false,
                    Some("neutral bias".to_string()),
                );
            }
            (Some(held), Some(wanted)) if held != wanted => {
                warn!(
                    held = %held,
                    wanted = %wanted,
                    score = proposal.score,
                    "bias flipped against the open position, not reversing"
                );
                self.state.session.write().record_plan(
                    proposal,
                    false,
                    Some(format!("conflicts with open {held} position")),
                );
            }
            (Some(_), _) => {
                self.state.session.write().record_plan(
                    proposal,
                    false,
                    Some("position already open".to_string()),
                );
            }
        }
    }

    fn open_from_proposal(
        &self,
        proposal: &PlanProposal,
        direction: crate::types::Direction,
    ) -> Result<(), EngineError> {
        let cfg = &self.state.config;
        let plan = ChainPlanBuilder::new(&cfg.chain).build(
            direction,
            proposal.entry_price,
            proposal.tp1_price,
            proposal.tp2_price,
            proposal.stop_loss_price,
            proposal.volatility_unit,
        )?;

        let margin = self.state.session.read().balance * cfg.position_size_pct;
        let receipt = self.state.manager.write().open(
            plan,
            proposal.invalidation_price,
            &SizingInputs {
                available_margin: margin,
                leverage: cfg.leverage,
                fee_rate: cfg.fee_rate,
            },
            Utc::now(),
        )?;

        let mut session = self.state.session.write();
        session.commit_open(receipt.margin_used, receipt.open_fee);
        session.record_plan(proposal.clone(), true, None);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Persistence and shutdown
    // -------------------------------------------------------------------------

    fn persist(&self, last_price: f64) {
        let snapshot = {
            let session = self.state.session.read();
            let manager = self.state.manager.read();
            let history = manager.history();
            let keep = self.state.config.max_history.min(history.len());
            SessionSnapshot {
                timestamp: Utc::now(),
                config: self.state.config.clone(),
                session: session.clone(),
                open_position: manager.position().cloned(),
                trade_history: history[history.len() - keep..].to_vec(),
                last_price,
            }
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!(error = %e, "failed to persist session snapshot");
            self.state.record_error("snapshot", e.to_string());
        }
    }

    /// Flatten, persist, and report. Called exactly once on the way out.
    ///
    /// The exit price is the last good tick when one exists. If every tick
    /// failed while a position is open, the exchange gets one more chance,
    /// and failing that the entry price stands in so the book still closes.
    async fn shutdown(&mut self) {
        info!("engine loop stopping");

        let open_entry = self.state.manager.read().position().map(|p| p.entry_price);
        let mut exit_price = self.last_good_price;
        if exit_price.is_none() && open_entry.is_some() {
            exit_price = match self.market.get_price(&self.state.config.symbol).await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "no exit price from the exchange, using entry price");
                    open_entry
                }
            };
        }

        if let Some(price) = exit_price {
            let fill = self
                .state
                .manager
                .write()
                .force_close(price, CloseReason::SystemStop, Utc::now());
            if let Some(fill) = fill {
                self.settle(&TickOutcome::FullClose(fill));
            }
        }

        // Persist even when flat so the plan history survives the restart.
        self.persist(exit_price.unwrap_or(0.0));

        let report = self.state.session.read().final_report();
        for line in report.lines() {
            info!("{line}");
        }
    }
}
