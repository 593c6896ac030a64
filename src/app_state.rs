// =============================================================================
// Shared application state
// =============================================================================
//
// One `Arc<AppState>` is handed to every task. Locks are parking_lot and must
// never be held across an await point; take what you need, drop the guard,
// then do the async work.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::SimulatorConfig;
use crate::manager::ChainPositionManager;
use crate::session::Session;

const MAX_RECENT_ERRORS: usize = 32;

/// One recorded runtime failure, kept for the snapshot and the final report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub time: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

pub struct AppState {
    /// Immutable after startup.
    pub config: SimulatorConfig,
    pub session: RwLock<Session>,
    pub manager: RwLock<ChainPositionManager>,
    /// Ring of the most recent runtime errors, newest last.
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
}

impl AppState {
    pub fn new(config: SimulatorConfig) -> Arc<Self> {
        let session = Session::new(config.initial_balance, config.max_history);
        let manager =
            ChainPositionManager::new(config.fee_rate, config.chain.trailing_sl_enabled);
        Arc::new(Self {
            config,
            session: RwLock::new(session),
            manager: RwLock::new(manager),
            recent_errors: RwLock::new(Vec::new()),
        })
    }

    pub fn record_error(&self, context: &str, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            time: Utc::now(),
            context: context.to_string(),
            message: message.into(),
        });
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(..excess);
        }
    }
}
