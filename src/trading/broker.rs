// =============================================================================
// Broker capability — the outbound trading seam
// =============================================================================
//
// The engine never speaks a broker's wire format. It talks to this trait;
// implementations are swappable between the paper/mock broker and a live
// adapter. The broker's view of positions is the source of truth; the local
// position book is a cache reconciled against it.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OrderSide, OrderStatus, OrderType};

/// Broker deadline for order placement calls.
pub const BROKER_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Wire-independent order and account types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub filled_avg_price: Option<f64>,
    /// Signal that produced this order, for the audit trail.
    pub signal_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticker: String,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub market_value: f64,
}

/// Atomic entry + stop + target triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketOrder {
    pub entry: Order,
    pub stop: Order,
    pub target: Order,
}

/// Parameters for a plain order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub signal_id: Option<String>,
}

/// Parameters for a bracket order.
#[derive(Debug, Clone)]
pub struct BracketRequest {
    pub ticker: String,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub signal_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<BrokerAccount>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn place_order(&self, request: OrderRequest) -> Result<Order>;

    /// Entry + stop + take-profit submitted atomically. Only called when
    /// `supports_bracket()` is true.
    async fn place_bracket_order(&self, request: BracketRequest) -> Result<BracketOrder>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Market-close the full position in `ticker`.
    async fn close_position(&self, ticker: &str) -> Result<Order>;

    /// Current state of a previously placed order, including fill price
    /// once filled.
    async fn get_order(&self, order_id: &str) -> Result<Order>;

    fn supports_bracket(&self) -> bool {
        true
    }
}
