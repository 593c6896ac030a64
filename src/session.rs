// =============================================================================
// Session accounting — simulated balance, statistics, snapshot persistence
// =============================================================================
//
// The session owns the simulated account. Margin is reserved when a position
// opens and flows back proportionally with every close; realized pnl (already
// net of close fees) settles into the balance at the same moment. The session
// also keeps the peak-balance / max-drawdown / win-loss counters and a bounded
// log of every plan the oracle proposed, taken or not.
// =============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ledger::PositionLedger;
use crate::manager::Fill;
use crate::oracle::PlanProposal;

/// One proposed plan, kept whether or not it became a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub time: DateTime<Utc>,
    pub proposal: PlanProposal,
    pub taken: bool,
    /// Why the plan was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Simulated account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub initial_balance: f64,
    /// Free balance. Reserved margin is excluded until it returns.
    pub balance: f64,
    pub peak_balance: f64,
    pub max_drawdown_pct: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Closes forced by the tick-failure escalation path, reported
    /// separately from ordinary stop/TP exits.
    pub escalation_closes: u32,
    pub total_realized_pnl: f64,
    pub total_fees_paid: f64,
    pub plan_history: Vec<PlanRecord>,
    /// Not persisted. A session coming back off disk gets the stock cap so
    /// the plan history stays bounded across restarts.
    #[serde(skip, default = "default_max_plan_history")]
    max_plan_history: usize,
}

fn default_max_plan_history() -> usize {
    crate::config::default_max_history()
}

impl Session {
    pub fn new(initial_balance: f64, max_plan_history: usize) -> Self {
        let started_at = Utc::now();
        Self {
            session_id: format!("session-{}", started_at.format("%Y%m%d-%H%M%S")),
            started_at,
            initial_balance,
            balance: initial_balance,
            peak_balance: initial_balance,
            max_drawdown_pct: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            escalation_closes: 0,
            total_realized_pnl: 0.0,
            total_fees_paid: 0.0,
            plan_history: Vec::new(),
            max_plan_history,
        }
    }

    /// Equity counting an open position's reserved margin and mark pnl.
    pub fn equity(&self, open: Option<&PositionLedger>, mark_price: f64) -> f64 {
        match open {
            Some(pos) => self.balance + pos.margin_used_remaining() + pos.unrealized_pnl(mark_price),
            None => self.balance,
        }
    }

    /// Reserve margin and pay the opening fee. The manager validated sizing
    /// already; this only moves the money.
    pub fn commit_open(&mut self, margin: f64, open_fee: f64) {
        self.balance -= margin + open_fee;
        self.total_fees_paid += open_fee;
        debug!(
            margin,
            open_fee,
            balance = self.balance,
            "margin reserved for new position"
        );
    }

    /// Settle one close fill: released margin plus net pnl flow back in.
    pub fn settle_fill(&mut self, fill: &Fill) {
        self.balance += fill.returned_margin + fill.pnl;
        self.total_realized_pnl += fill.pnl;
        self.total_fees_paid += fill.fee;
        self.refresh_peak_and_drawdown();
    }

    /// Book a fully-closed position into the win/loss counters.
    pub fn record_completed(&mut self, position: &PositionLedger) {
        self.total_trades += 1;
        if position.total_realized_pnl > 0.0 {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        if position.close_reason == Some(crate::types::CloseReason::ErrorEscalation) {
            self.escalation_closes += 1;
        }
        info!(
            id = position.position_id,
            pnl = position.total_realized_pnl,
            fees = position.total_fees_paid,
            balance = self.balance,
            trades = self.total_trades,
            "trade completed"
        );
    }

    /// Log a proposed plan, evicting the oldest record past the cap.
    pub fn record_plan(&mut self, proposal: PlanProposal, taken: bool, skip_reason: Option<String>) {
        self.plan_history.push(PlanRecord {
            time: Utc::now(),
            proposal,
            taken,
            skip_reason,
        });
        if self.max_plan_history > 0 && self.plan_history.len() > self.max_plan_history {
            let excess = self.plan_history.len() - self.max_plan_history;
            self.plan_history.drain(..excess);
        }
    }

    pub fn win_rate_pct(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        }
    }

    pub fn return_pct(&self) -> f64 {
        if self.initial_balance == 0.0 {
            0.0
        } else {
            (self.balance - self.initial_balance) / self.initial_balance * 100.0
        }
    }

    fn refresh_peak_and_drawdown(&mut self) {
        if self.balance > self.peak_balance {
            self.peak_balance = self.balance;
        }
        if self.peak_balance > 0.0 {
            let dd = (self.peak_balance - self.balance) / self.peak_balance * 100.0;
            if dd > self.max_drawdown_pct {
                self.max_drawdown_pct = dd;
            }
        }
    }

    /// One-line status for the periodic tick log.
    pub fn status_line(&self, open: Option<&PositionLedger>, price: f64) -> String {
        match open {
            Some(pos) => format!(
                "price {:.2} | balance {:.2} | {} {} @ {:.2} | remaining {:.1}% | uPnL {:+.4} | rPnL {:+.4} | sl {:.2}",
                price,
                self.balance,
                pos.direction,
                pos.status,
                pos.entry_price,
                pos.remaining_pct(),
                pos.unrealized_pnl(price),
                pos.total_realized_pnl,
                pos.current_stop_loss,
            ),
            None => format!(
                "price {:.2} | balance {:.2} | flat | trades {} | win rate {:.1}%",
                price,
                self.balance,
                self.total_trades,
                self.win_rate_pct(),
            ),
        }
    }

    /// Multi-line end-of-run summary.
    pub fn final_report(&self) -> String {
        format!(
            "session report\n\
             ─────────────────────────────\n\
             started:        {}\n\
             initial:        {:.2} USDT\n\
             final:          {:.2} USDT ({:+.2}%)\n\
             peak:           {:.2} USDT\n\
             max drawdown:   {:.2}%\n\
             trades:         {} ({} won / {} lost, {:.1}% win rate)\n\
             forced by errors: {}\n\
             realized pnl:   {:+.4} USDT\n\
             fees paid:      {:.4} USDT",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.initial_balance,
            self.balance,
            self.return_pct(),
            self.peak_balance,
            self.max_drawdown_pct,
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate_pct(),
            self.escalation_closes,
            self.total_realized_pnl,
            self.total_fees_paid,
        )
    }
}

// ---------------------------------------------------------------------------
// Snapshot persistence
// ---------------------------------------------------------------------------

/// Full state written to disk after every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Echo of the configuration the session was started with.
    pub config: crate::config::SimulatorConfig,
    pub session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_position: Option<PositionLedger>,
    /// Most recent closed positions, oldest first, bounded.
    pub trade_history: Vec<PositionLedger>,
    pub last_price: f64,
}

/// Writes snapshots atomically: serialize to `<path>.tmp`, then rename over
/// the target so a crash mid-write never leaves a torn file.
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join("session_state.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .context("failed to serialize session snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }

    pub fn load(&self) -> Result<SessionSnapshot> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}
