// =============================================================================
// Position Book — open positions and the append-only closed record
// =============================================================================
//
// Invariants:
//   - An open position always has non-zero quantity and references the
//     filled entry order that created it.
//   - Closing moves the position into the closed list as an immutable
//     ClosedPosition; closed positions are never mutated or reopened.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`; state
// transitions for a given position happen under the single write lock, so
// they are serialized per position id.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::ExitReason;

// ---------------------------------------------------------------------------
// Position models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub ticker: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub opened_at: DateTime<Utc>,
    /// Entry order that created the position.
    pub entry_order_id: String,
    pub signal_id: Option<String>,
    /// Catalyst keyword for feedback attribution.
    pub keyword_tag: Option<String>,
}

/// Immutable record of a finished trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position_id: String,
    pub ticker: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub return_pct: f64,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub keyword_tag: Option<String>,
}

// ---------------------------------------------------------------------------
// Position Book
// ---------------------------------------------------------------------------

pub struct PositionBook {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<ClosedPosition>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    /// Open a position from a filled entry order. Returns the position id.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        ticker: &str,
        quantity: f64,
        entry_price: f64,
        stop_loss_price: f64,
        take_profit_price: f64,
        entry_order_id: &str,
        signal_id: Option<String>,
        keyword_tag: Option<String>,
        now: DateTime<Utc>,
    ) -> String {
        debug_assert!(quantity != 0.0, "open position requires non-zero quantity");

        let position_id = Uuid::new_v4().to_string();
        let position = Position {
            position_id: position_id.clone(),
            ticker: ticker.to_string(),
            quantity,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            stop_loss_price,
            take_profit_price,
            opened_at: now,
            entry_order_id: entry_order_id.to_string(),
            signal_id,
            keyword_tag,
        };

        info!(
            position_id = %position_id,
            ticker,
            quantity,
            entry_price,
            stop_loss_price,
            take_profit_price,
            "position opened"
        );

        self.open.write().push(position);
        position_id
    }

    /// Refresh `current_price` and unrealized P&L for every open position
    /// in `ticker`.
    pub fn update_price(&self, ticker: &str, price: f64) {
        if price <= 0.0 {
            return;
        }
        let mut open = self.open.write();
        for position in open.iter_mut().filter(|p| p.ticker == ticker) {
            position.current_price = price;
            position.unrealized_pnl = (price - position.entry_price) * position.quantity;
        }
    }

    /// Scan open positions for exit triggers. Returns `(position_id,
    /// exit_reason)` pairs; the caller executes the closes via the broker.
    pub fn check_exits(&self, now: DateTime<Utc>, max_hold: chrono::Duration) -> Vec<(String, ExitReason)> {
        let open = self.open.read();
        let mut exits = Vec::new();

        for position in open.iter() {
            let price = position.current_price;
            if price <= 0.0 {
                continue;
            }

            if price <= position.stop_loss_price {
                exits.push((position.position_id.clone(), ExitReason::Stop));
                continue;
            }
            if price >= position.take_profit_price {
                exits.push((position.position_id.clone(), ExitReason::Target));
                continue;
            }
            if now.signed_duration_since(position.opened_at) > max_hold {
                exits.push((position.position_id.clone(), ExitReason::Timeout));
            }
        }

        exits
    }

    /// Close a position, producing its immutable ClosedPosition record.
    /// Returns None if no matching open position exists.
    pub fn close_position(
        &self,
        position_id: &str,
        exit_reason: ExitReason,
        exit_price: f64,
        now: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.position_id == position_id)?;
        let position = open.remove(idx);
        drop(open);

        let realized_pnl = (exit_price - position.entry_price) * position.quantity;
        let return_pct = if position.entry_price > 0.0 {
            (exit_price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };

        let closed = ClosedPosition {
            position_id: position.position_id.clone(),
            ticker: position.ticker.clone(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            realized_pnl,
            return_pct,
            exit_reason,
            opened_at: position.opened_at,
            closed_at: now,
            keyword_tag: position.keyword_tag.clone(),
        };

        info!(
            position_id = %closed.position_id,
            ticker = %closed.ticker,
            exit_reason = %exit_reason,
            exit_price,
            realized_pnl,
            "position closed"
        );

        self.closed.write().push(closed.clone());
        Some(closed)
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Drop local positions the broker does not hold ("phantoms"): the
    /// broker is the source of truth. Phantoms close locally with
    /// `ExitReason::Reconciliation` at their last known price.
    pub fn reconcile_against(
        &self,
        broker_tickers: &std::collections::HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<ClosedPosition> {
        let phantom_ids: Vec<(String, f64)> = self
            .open
            .read()
            .iter()
            .filter(|p| !broker_tickers.contains(&p.ticker))
            .map(|p| (p.position_id.clone(), p.current_price))
            .collect();

        let mut closed = Vec::new();
        for (position_id, last_price) in phantom_ids {
            warn!(
                position_id = %position_id,
                "phantom position: broker has no matching holding"
            );
            if let Some(c) =
                self.close_position(&position_id, ExitReason::Reconciliation, last_price, now)
            {
                closed.push(c);
            }
        }
        closed
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get_open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn open_position_in(&self, ticker: &str) -> Option<Position> {
        self.open.read().iter().find(|p| p.ticker == ticker).cloned()
    }

    pub fn get_closed_positions(&self, count: usize) -> Vec<ClosedPosition> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Total market value of open positions.
    pub fn open_exposure(&self) -> f64 {
        self.open
            .read()
            .iter()
            .map(|p| p.quantity * p.current_price)
            .sum()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionBook")
            .field("open", &self.open.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}
