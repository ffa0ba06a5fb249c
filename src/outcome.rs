// =============================================================================
// Outcome Tracker — closed positions into the feedback loop and the log
// =============================================================================
//
// On every position close:
//   1. Append the full outcome (with the MarketContext captured at entry)
//      to outcomes.jsonl.
//   2. Record the closed position in trading.db.
//
// The feedback engine reads the accumulated outcomes on its own refresh
// schedule; this tracker only writes.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::enrich::MarketContext;
use crate::persist::{JsonlWriter, TradingDb};
use crate::trading::positions::ClosedPosition;

/// One line of outcomes.jsonl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub position_id: String,
    pub ticker: String,
    pub keyword_tag: Option<String>,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub return_pct: f64,
    pub exit_reason: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Market context captured when the position was opened.
    pub entry_context: Option<MarketContext>,
}

pub struct OutcomeTracker {
    writer: JsonlWriter,
    db: Arc<TradingDb>,
    /// Entry-time contexts keyed by position id, held until close.
    entry_contexts: RwLock<HashMap<String, MarketContext>>,
}

impl OutcomeTracker {
    pub fn new(writer: JsonlWriter, db: Arc<TradingDb>) -> Self {
        Self {
            writer,
            db,
            entry_contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Remember the context a position was opened under.
    pub fn capture_entry_context(&self, position_id: &str, ctx: MarketContext) {
        self.entry_contexts
            .write()
            .insert(position_id.to_string(), ctx);
    }

    /// Record a close. Persistence failures are logged, never fatal: losing
    /// one outcome row must not take down the monitor.
    pub fn record_close(&self, closed: &ClosedPosition) {
        let entry_context = self.entry_contexts.write().remove(&closed.position_id);

        let record = OutcomeRecord {
            position_id: closed.position_id.clone(),
            ticker: closed.ticker.clone(),
            keyword_tag: closed.keyword_tag.clone(),
            quantity: closed.quantity,
            entry_price: closed.entry_price,
            exit_price: closed.exit_price,
            realized_pnl: closed.realized_pnl,
            return_pct: closed.return_pct,
            exit_reason: closed.exit_reason.to_string(),
            opened_at: closed.opened_at,
            closed_at: closed.closed_at,
            entry_context,
        };

        if let Err(e) = self.writer.append(&record) {
            warn!(position_id = %closed.position_id, error = %e, "failed to append outcome");
        }
        if let Err(e) = self.db.record_closed_position(closed) {
            warn!(position_id = %closed.position_id, error = %e, "failed to persist closed position");
        }
    }
}
