// =============================================================================
// Trading Engine — signals to broker orders with sizing and liquidity caps
// =============================================================================
//
// Sizing for a BUY:
//   shares = position_size_pct/100 * equity / last_price
//   capped by max_position_size_pct of equity and by max_volume_pct of the
//   20-day average daily volume.
//
// Bracket orders are preferred; when the broker cannot do them the entry is
// placed alone and stop/target ride in the local position book for the
// monitor to enforce. Entry orders not filled within the timeout are
// cancelled and no position is opened.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::enrich::MarketContext;
use crate::runtime_config::RuntimeConfig;
use crate::signal::Signal;
use crate::trading::broker::{BracketRequest, Broker, OrderRequest, BROKER_TIMEOUT_SECS};
use crate::trading::positions::PositionBook;
use crate::types::{ExitReason, OrderSide, OrderStatus, OrderType, TradeAction};

/// Outcome of handling one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Entry filled and a position opened.
    Opened { position_id: String, order_id: String },
    /// CLOSE signal executed against an open position.
    Closed { position_id: String },
    /// SKIP or CLOSE with nothing to close; reason retained for the log.
    NoAction(String),
    /// Broker refused or errored; reason retained.
    Rejected(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened { position_id, order_id } => {
                write!(f, "Opened(position={position_id}, order={order_id})")
            }
            Self::Closed { position_id } => write!(f, "Closed(position={position_id})"),
            Self::NoAction(reason) => write!(f, "NoAction({reason})"),
            Self::Rejected(reason) => write!(f, "Rejected({reason})"),
        }
    }
}

pub struct TradingEngine {
    broker: Arc<dyn Broker>,
    book: Arc<PositionBook>,
}

impl TradingEngine {
    pub fn new(broker: Arc<dyn Broker>, book: Arc<PositionBook>) -> Self {
        Self { broker, book }
    }

    /// Execute one signal.
    pub async fn execute(
        &self,
        signal: &Signal,
        ctx: &MarketContext,
        cfg: &RuntimeConfig,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        match signal.action {
            TradeAction::Skip => {
                ExecutionResult::NoAction(format!(
                    "skip: {}",
                    signal.rationale_tags.join(",")
                ))
            }
            TradeAction::Close | TradeAction::Sell => self.execute_close(signal, now).await,
            TradeAction::Buy => self.execute_buy(signal, ctx, cfg, now).await,
        }
    }

    // -------------------------------------------------------------------------
    // BUY
    // -------------------------------------------------------------------------

    async fn execute_buy(
        &self,
        signal: &Signal,
        ctx: &MarketContext,
        cfg: &RuntimeConfig,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let account = match self.broker.get_account().await {
            Ok(a) => a,
            Err(e) => return ExecutionResult::Rejected(format!("account fetch failed: {e}")),
        };

        if ctx.last_price <= 0.0 {
            return ExecutionResult::Rejected("no price for sizing".to_string());
        }

        // One position per ticker.
        if self.book.open_position_in(&signal.ticker).is_some() {
            return ExecutionResult::NoAction(format!("already holding {}", signal.ticker));
        }

        let quantity = Self::position_size(signal, ctx, cfg, account.equity);
        if quantity < 1.0 {
            return ExecutionResult::NoAction("sized below one share".to_string());
        }

        let (stop, target) = match (signal.stop_loss_price, signal.take_profit_price) {
            (Some(s), Some(t)) => (s, t),
            _ => return ExecutionResult::Rejected("buy signal without stops".to_string()),
        };

        let timeout_secs = cfg.entry_order_timeout_secs;
        if self.broker.supports_bracket() {
            self.buy_bracket(signal, quantity, stop, target, timeout_secs, now).await
        } else {
            self.buy_with_monitored_stops(signal, quantity, stop, target, timeout_secs, now)
                .await
        }
    }

    /// Share count after both caps.
    fn position_size(signal: &Signal, ctx: &MarketContext, cfg: &RuntimeConfig, equity: f64) -> f64 {
        let target_notional = signal.position_size_pct / 100.0 * equity;
        let cap_notional = cfg.max_position_size_pct / 100.0 * equity;
        let notional = target_notional.min(cap_notional);

        let mut quantity = (notional / ctx.last_price).floor();

        // Liquidity cap: never more than max_volume_pct of the rolling
        // average daily volume.
        if ctx.avg_volume_20d > 0.0 {
            let liquidity_cap = (cfg.max_volume_pct / 100.0 * ctx.avg_volume_20d).floor();
            quantity = quantity.min(liquidity_cap);
        }

        quantity.max(0.0)
    }

    async fn buy_bracket(
        &self,
        signal: &Signal,
        quantity: f64,
        stop: f64,
        target: f64,
        timeout_secs: u64,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let request = BracketRequest {
            ticker: signal.ticker.clone(),
            quantity,
            stop_loss: stop,
            take_profit: target,
            signal_id: Some(signal.signal_id.clone()),
        };

        let deadline = Duration::from_secs(BROKER_TIMEOUT_SECS);
        let placed = match tokio::time::timeout(deadline, self.broker.place_bracket_order(request)).await {
            Ok(Ok(bracket)) => bracket,
            Ok(Err(e)) => {
                warn!(ticker = %signal.ticker, error = %e, "bracket order rejected");
                return ExecutionResult::Rejected(format!("bracket rejected: {e}"));
            }
            Err(_) => {
                return ExecutionResult::Rejected("bracket order timed out".to_string());
            }
        };

        let entry = &placed.entry;
        let fill_price = match self.await_entry_fill(&entry.order_id, timeout_secs).await {
            Some(price) => price,
            None => {
                // Timeout: cancel and walk away without a position.
                let _ = self.broker.cancel_order(&entry.order_id).await;
                return ExecutionResult::Rejected("entry fill timed out; cancelled".to_string());
            }
        };

        let position_id = self.book.open_position(
            &signal.ticker,
            quantity,
            fill_price,
            stop,
            target,
            &entry.order_id,
            Some(signal.signal_id.clone()),
            signal.keyword_config_id.clone(),
            now,
        );

        info!(
            ticker = %signal.ticker,
            position_id = %position_id,
            quantity,
            fill_price,
            "bracket entry filled, position opened"
        );

        ExecutionResult::Opened {
            position_id,
            order_id: entry.order_id.clone(),
        }
    }

    async fn buy_with_monitored_stops(
        &self,
        signal: &Signal,
        quantity: f64,
        stop: f64,
        target: f64,
        timeout_secs: u64,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let request = OrderRequest {
            ticker: signal.ticker.clone(),
            side: OrderSide::Buy,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            signal_id: Some(signal.signal_id.clone()),
        };

        let deadline = Duration::from_secs(BROKER_TIMEOUT_SECS);
        let order = match tokio::time::timeout(deadline, self.broker.place_order(request)).await {
            Ok(Ok(order)) => order,
            Ok(Err(e)) => return ExecutionResult::Rejected(format!("entry rejected: {e}")),
            Err(_) => return ExecutionResult::Rejected("entry order timed out".to_string()),
        };

        let fill_price = match self.await_entry_fill(&order.order_id, timeout_secs).await {
            Some(price) => price,
            None => {
                let _ = self.broker.cancel_order(&order.order_id).await;
                return ExecutionResult::Rejected("entry fill timed out; cancelled".to_string());
            }
        };

        // Stop and target live in the book; the position monitor enforces
        // them since this broker has no native brackets.
        let position_id = self.book.open_position(
            &signal.ticker,
            quantity,
            fill_price,
            stop,
            target,
            &order.order_id,
            Some(signal.signal_id.clone()),
            signal.keyword_config_id.clone(),
            now,
        );

        ExecutionResult::Opened {
            position_id,
            order_id: order.order_id,
        }
    }

    /// Poll the entry order until it fills or the entry timeout lapses.
    /// Returns the fill price, or None on timeout/terminal-without-fill.
    async fn await_entry_fill(&self, order_id: &str, timeout_secs: u64) -> Option<f64> {
        // Mock and paper brokers fill synchronously; the first poll usually
        // resolves. The loop exists for live adapters.
        let poll_interval = Duration::from_millis(250);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs.max(1));

        loop {
            match self.broker.get_order(order_id).await {
                Ok(order) => match order.status {
                    OrderStatus::Filled => return order.filled_avg_price,
                    OrderStatus::Rejected | OrderStatus::Cancelled => return None,
                    _ => {}
                },
                Err(e) => {
                    warn!(order_id, error = %e, "order status poll failed");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // -------------------------------------------------------------------------
    // CLOSE
    // -------------------------------------------------------------------------

    async fn execute_close(&self, signal: &Signal, now: DateTime<Utc>) -> ExecutionResult {
        let Some(position) = self.book.open_position_in(&signal.ticker) else {
            return ExecutionResult::NoAction(format!("no open position in {}", signal.ticker));
        };

        let deadline = Duration::from_secs(BROKER_TIMEOUT_SECS);
        let close_order =
            match tokio::time::timeout(deadline, self.broker.close_position(&signal.ticker)).await {
                Ok(Ok(order)) => order,
                Ok(Err(e)) => return ExecutionResult::Rejected(format!("close rejected: {e}")),
                Err(_) => return ExecutionResult::Rejected("close order timed out".to_string()),
            };

        let exit_price = close_order
            .filled_avg_price
            .unwrap_or(position.current_price);

        self.book
            .close_position(&position.position_id, ExitReason::Manual, exit_price, now);

        info!(
            ticker = %signal.ticker,
            position_id = %position.position_id,
            exit_price,
            "position closed on CLOSE signal"
        );

        ExecutionResult::Closed {
            position_id: position.position_id,
        }
    }
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("broker", &"<Broker>")
            .field("book", &self.book)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::regime::MarketRegime;
    use crate::enrich::rvol::RvolCategory;
    use crate::enrich::sector::SectorStrength;
    use crate::sim::mock_broker::MockBroker;
    use chrono::TimeZone;

    fn ctx(last_price: f64, avg_volume: f64) -> MarketContext {
        MarketContext {
            ticker: "ACME".into(),
            last_price,
            prev_close: last_price,
            change_pct: 0.0,
            rvol: 2.5,
            rvol_category: RvolCategory::High,
            float_shares: Some(20_000_000.0),
            short_interest_pct: None,
            sector: "Healthcare".into(),
            sector_return_1d: 0.0,
            sector_vs_spy: 0.0,
            sector_strength: SectorStrength::Neutral,
            market_regime: MarketRegime::Bull,
            vwap_break: false,
            atr: None,
            avg_volume_20d: avg_volume,
            captured_at: Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap(),
        }
    }

    fn buy_signal(ticker: &str, size_pct: f64) -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            action: TradeAction::Buy,
            ticker: ticker.into(),
            confidence: 0.9,
            stop_loss_price: Some(3.8),
            take_profit_price: Some(4.5),
            position_size_pct: size_pct,
            rationale_tags: vec!["kw:fda".into()],
            keyword_config_id: Some("fda".into()),
        }
    }

    #[test]
    fn sizing_respects_portfolio_cap() {
        let cfg = RuntimeConfig::default();
        // 8% of 100k at $4: 2000 shares, liquidity cap far away.
        let qty = TradingEngine::position_size(&buy_signal("ACME", 8.0), &ctx(4.0, 10_000_000.0), &cfg, 100_000.0);
        assert!((qty - 2000.0).abs() < 1e-9);

        // Requests beyond max_position_size_pct clip to 10%.
        let qty = TradingEngine::position_size(&buy_signal("ACME", 50.0), &ctx(4.0, 10_000_000.0), &cfg, 100_000.0);
        assert!((qty - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn sizing_respects_liquidity_cap() {
        let cfg = RuntimeConfig::default();
        // 5% of a 20k ADV name is 1000 shares, well under the notional size.
        let qty = TradingEngine::position_size(&buy_signal("THIN", 10.0), &ctx(1.0, 20_000.0), &cfg, 100_000.0);
        assert!((qty - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn buy_opens_position_and_close_signal_flattens_it() {
        let broker = Arc::new(MockBroker::new(100_000.0));
        broker.set_price("ACME", 4.0);
        broker.set_avg_volume("ACME", 1_000_000.0);

        let book = Arc::new(PositionBook::new());
        let engine = TradingEngine::new(broker.clone(), book.clone());
        let cfg = RuntimeConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();

        let result = engine.execute(&buy_signal("ACME", 8.0), &ctx(4.0, 1_000_000.0), &cfg, now).await;
        assert!(matches!(result, ExecutionResult::Opened { .. }));
        assert_eq!(book.get_open_positions().len(), 1);

        // Second buy in the same ticker is refused.
        let again = engine.execute(&buy_signal("ACME", 8.0), &ctx(4.0, 1_000_000.0), &cfg, now).await;
        assert!(matches!(again, ExecutionResult::NoAction(_)));

        // CLOSE flattens both broker and book.
        let close = Signal {
            action: TradeAction::Close,
            ..buy_signal("ACME", 0.0)
        };
        let result = engine.execute(&close, &ctx(4.0, 1_000_000.0), &cfg, now).await;
        assert!(matches!(result, ExecutionResult::Closed { .. }));
        assert!(book.get_open_positions().is_empty());
        assert!(broker.get_positions().await.unwrap().is_empty());
        assert_eq!(book.get_closed_positions(1)[0].exit_reason, ExitReason::Manual);
    }

    #[tokio::test]
    async fn skip_signal_is_no_action() {
        let broker = Arc::new(MockBroker::new(100_000.0));
        let book = Arc::new(PositionBook::new());
        let engine = TradingEngine::new(broker, book.clone());
        let cfg = RuntimeConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap();

        let skip = Signal {
            action: TradeAction::Skip,
            ..buy_signal("ACME", 0.0)
        };
        let result = engine.execute(&skip, &ctx(4.0, 1_000_000.0), &cfg, now).await;
        assert!(matches!(result, ExecutionResult::NoAction(_)));
        assert!(book.get_open_positions().is_empty());
    }
}
