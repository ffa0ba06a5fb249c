// =============================================================================
// Shared types used across the Meridian catalyst engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Coarse classification used to pick the visual border of a downstream alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    Negative,
    Neutral,
    Positive,
}

impl Default for AlertType {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negative => write!(f, "NEGATIVE"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Positive => write!(f, "POSITIVE"),
        }
    }
}

/// What the signal generator decided to do with a scored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Skip,
    Close,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Skip => write!(f, "SKIP"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Order side sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Broker order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
            Self::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

/// Order lifecycle state.
///
/// Terminal states (Filled, Cancelled, Rejected) are immutable: an order
/// never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Stop,
    Target,
    Manual,
    Timeout,
    Reconciliation,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "STOP"),
            Self::Target => write!(f, "TARGET"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Reconciliation => write!(f, "RECONCILIATION"),
        }
    }
}

/// Why an item never made it through the pipeline.
///
/// Serialized into `rejected_items.jsonl`, so the wire names are snake_case
/// and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    StaleArticle,
    OtcExchange,
    LowRelevance,
    Duplicate,
    Retrospective,
    PriceBand,
    ConfidenceBelowThreshold,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleArticle => write!(f, "stale_article"),
            Self::OtcExchange => write!(f, "otc_exchange"),
            Self::LowRelevance => write!(f, "low_relevance"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Retrospective => write!(f, "retrospective"),
            Self::PriceBand => write!(f, "price_band"),
            Self::ConfidenceBelowThreshold => write!(f, "confidence_below_threshold"),
        }
    }
}

/// Whether the engine trades against the paper broker or replays history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Paper,
    Simulation,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "Paper"),
            Self::Simulation => write!(f, "Simulation"),
        }
    }
}
