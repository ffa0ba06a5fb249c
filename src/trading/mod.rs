// =============================================================================
// Trading — broker seam, position book, execution engine, monitor
// =============================================================================

pub mod broker;
pub mod engine;
pub mod monitor;
pub mod positions;

pub use broker::{Broker, BrokerAccount, BrokerPosition, Order};
pub use engine::{ExecutionResult, TradingEngine};
pub use positions::{ClosedPosition, Position, PositionBook};
