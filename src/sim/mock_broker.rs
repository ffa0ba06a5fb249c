// =============================================================================
// Mock Broker — in-memory portfolio with adaptive slippage
// =============================================================================
//
// Fill model:
//   - Market orders fill immediately at the current price adjusted by
//     slippage.
//   - Limit buys rest until a price update crosses at or below the limit
//     (sells mirror); `check_limit_fills` runs on every price update.
//   - Orders violating buying power or the liquidity cap are REJECTED.
//
// Slippage: base percentage * (1 + penalty). The penalty grows with order
// size relative to average volume; prices under $5 double the base and
// under $1 triple it. Thin names gap, cheap names gap harder.
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::trading::broker::{
    BracketOrder, BracketRequest, Broker, BrokerAccount, BrokerPosition, Order, OrderRequest,
};
use crate::types::{OrderSide, OrderStatus, OrderType};

/// Base slippage, percent of price.
const BASE_SLIPPAGE_PCT: f64 = 0.1;
/// Order size (as a fraction of average daily volume) at which the size
/// penalty reaches 1.0.
const SIZE_PENALTY_SCALE: f64 = 0.05;
/// Liquidity rejection threshold: orders above this fraction of average
/// daily volume do not fill at any price.
const MAX_ORDER_ADV_FRACTION: f64 = 0.10;

struct Holding {
    quantity: f64,
    avg_entry_price: f64,
}

struct Inner {
    cash: f64,
    holdings: HashMap<String, Holding>,
    orders: HashMap<String, Order>,
    last_prices: HashMap<String, f64>,
    avg_volumes: HashMap<String, f64>,
}

pub struct MockBroker {
    inner: RwLock<Inner>,
    clock: Option<crate::clock::SharedClock>,
}

impl MockBroker {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                cash: starting_cash,
                holdings: HashMap::new(),
                orders: HashMap::new(),
                last_prices: HashMap::new(),
                avg_volumes: HashMap::new(),
            }),
            clock: None,
        }
    }

    /// Timestamp fills from the virtual clock so replays are reproducible.
    pub fn with_clock(starting_cash: f64, clock: crate::clock::SharedClock) -> Self {
        let mut broker = Self::new(starting_cash);
        broker.clock = Some(clock);
        broker
    }

    fn now(&self) -> chrono::DateTime<Utc> {
        match &self.clock {
            Some(clock) => clock.now(),
            None => Utc::now(),
        }
    }

    /// Push a price observation (a bar close in replay). Resting limit
    /// orders are checked against it.
    pub fn set_price(&self, ticker: &str, price: f64) {
        {
            let mut inner = self.inner.write();
            inner.last_prices.insert(ticker.to_string(), price);
        }
        self.check_limit_fills(ticker, price);
    }

    /// Last observed price, for simulation data providers.
    pub fn last_price(&self, ticker: &str) -> Option<f64> {
        self.inner.read().last_prices.get(ticker).copied()
    }

    /// Average daily volume used by the liquidity checks.
    pub fn set_avg_volume(&self, ticker: &str, avg_volume: f64) {
        self.inner
            .write()
            .avg_volumes
            .insert(ticker.to_string(), avg_volume);
    }

    /// Seed an existing holding (reconciliation tests, replay warm starts).
    pub fn seed_position(&self, ticker: &str, quantity: f64, avg_entry_price: f64) {
        self.inner.write().holdings.insert(
            ticker.to_string(),
            Holding {
                quantity,
                avg_entry_price,
            },
        );
    }

    /// Adaptive slippage percentage for an order.
    fn slippage_pct(price: f64, quantity: f64, avg_volume: f64) -> f64 {
        let mut base = BASE_SLIPPAGE_PCT;
        if price < 1.0 {
            base *= 3.0;
        } else if price < 5.0 {
            base *= 2.0;
        }

        let size_fraction = if avg_volume > 0.0 {
            quantity / avg_volume
        } else {
            0.0
        };
        let penalty = (size_fraction / SIZE_PENALTY_SCALE).min(1.0);

        base * (1.0 + penalty)
    }

    fn fill_order(
        inner: &mut Inner,
        order: &mut Order,
        raw_price: f64,
        filled_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let avg_volume = inner
            .avg_volumes
            .get(&order.ticker)
            .copied()
            .unwrap_or(1_000_000.0);

        // Liquidity: a fill this large would be fantasy.
        if avg_volume > 0.0 && order.quantity > avg_volume * MAX_ORDER_ADV_FRACTION {
            bail!(
                "order for {} of {} exceeds {}% of avg volume",
                order.quantity,
                order.ticker,
                MAX_ORDER_ADV_FRACTION * 100.0
            );
        }

        let slip = Self::slippage_pct(raw_price, order.quantity, avg_volume) / 100.0;
        let fill_price = match order.side {
            OrderSide::Buy => raw_price * (1.0 + slip),
            OrderSide::Sell => raw_price * (1.0 - slip),
        };

        match order.side {
            OrderSide::Buy => {
                let cost = fill_price * order.quantity;
                if cost > inner.cash {
                    bail!("insufficient buying power: need {cost:.2}, have {:.2}", inner.cash);
                }
                inner.cash -= cost;
                let holding = inner
                    .holdings
                    .entry(order.ticker.clone())
                    .or_insert(Holding {
                        quantity: 0.0,
                        avg_entry_price: 0.0,
                    });
                let total_cost =
                    holding.avg_entry_price * holding.quantity + fill_price * order.quantity;
                holding.quantity += order.quantity;
                holding.avg_entry_price = total_cost / holding.quantity;
            }
            OrderSide::Sell => {
                let held = inner
                    .holdings
                    .get(&order.ticker)
                    .map(|h| h.quantity)
                    .unwrap_or(0.0);
                if order.quantity > held + 1e-9 {
                    bail!("cannot sell {} of {}: holding {}", order.quantity, order.ticker, held);
                }
                inner.cash += fill_price * order.quantity;
                if let Some(holding) = inner.holdings.get_mut(&order.ticker) {
                    holding.quantity -= order.quantity;
                    if holding.quantity <= 1e-9 {
                        inner.holdings.remove(&order.ticker);
                    }
                }
            }
        }

        order.status = OrderStatus::Filled;
        order.filled_at = Some(filled_at);
        order.filled_avg_price = Some(fill_price);

        debug!(
            order_id = %order.order_id,
            ticker = %order.ticker,
            side = %order.side,
            fill_price,
            "mock fill"
        );
        Ok(())
    }

    /// Fill resting limit orders crossed by a new price.
    fn check_limit_fills(&self, ticker: &str, price: f64) {
        let now = self.now();
        let mut inner = self.inner.write();

        let pending: Vec<String> = inner
            .orders
            .values()
            .filter(|o| {
                o.ticker == ticker
                    && o.status == OrderStatus::Pending
                    && o.order_type == OrderType::Limit
            })
            .filter(|o| match (o.side, o.limit_price) {
                (OrderSide::Buy, Some(limit)) => price <= limit,
                (OrderSide::Sell, Some(limit)) => price >= limit,
                _ => false,
            })
            .map(|o| o.order_id.clone())
            .collect();

        for order_id in pending {
            let mut order = inner.orders.get(&order_id).cloned().expect("order exists");
            // Limit orders fill at their limit, favourable gaps at the bar
            // price.
            let fill_at = match order.side {
                OrderSide::Buy => price.min(order.limit_price.unwrap_or(price)),
                OrderSide::Sell => price.max(order.limit_price.unwrap_or(price)),
            };
            match Self::fill_order(&mut inner, &mut order, fill_at, now) {
                Ok(()) => {
                    info!(order_id = %order_id, ticker, fill_at, "limit order crossed");
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "limit fill rejected");
                    order.status = OrderStatus::Rejected;
                }
            }
            inner.orders.insert(order_id, order);
        }
    }

    fn make_order(request: &OrderRequest, submitted_at: chrono::DateTime<Utc>) -> Order {
        Order {
            order_id: Uuid::new_v4().to_string(),
            ticker: request.ticker.clone(),
            side: request.side,
            quantity: request.quantity,
            order_type: request.order_type,
            status: OrderStatus::Pending,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            submitted_at,
            filled_at: None,
            filled_avg_price: None,
            signal_id: request.signal_id.clone(),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_account(&self) -> Result<BrokerAccount> {
        let inner = self.inner.read();
        let holdings_value: f64 = inner
            .holdings
            .iter()
            .map(|(ticker, h)| {
                let price = inner
                    .last_prices
                    .get(ticker)
                    .copied()
                    .unwrap_or(h.avg_entry_price);
                h.quantity * price
            })
            .sum();

        Ok(BrokerAccount {
            cash: inner.cash,
            equity: inner.cash + holdings_value,
            buying_power: inner.cash,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let inner = self.inner.read();
        Ok(inner
            .holdings
            .iter()
            .map(|(ticker, h)| {
                let price = inner
                    .last_prices
                    .get(ticker)
                    .copied()
                    .unwrap_or(h.avg_entry_price);
                BrokerPosition {
                    ticker: ticker.clone(),
                    quantity: h.quantity,
                    avg_entry_price: h.avg_entry_price,
                    market_value: h.quantity * price,
                }
            })
            .collect())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let now = self.now();
        let mut order = Self::make_order(&request, now);
        let mut inner = self.inner.write();

        let price = inner.last_prices.get(&request.ticker).copied();

        match request.order_type {
            OrderType::Market => {
                let Some(price) = price else {
                    order.status = OrderStatus::Rejected;
                    inner.orders.insert(order.order_id.clone(), order.clone());
                    bail!("no market price for {}", request.ticker);
                };
                if let Err(e) = Self::fill_order(&mut inner, &mut order, price, now) {
                    order.status = OrderStatus::Rejected;
                    inner.orders.insert(order.order_id.clone(), order.clone());
                    return Err(e);
                }
            }
            OrderType::Limit => {
                // Rest until a bar crosses; an immediately-marketable limit
                // fills off the current price.
                if let Some(price) = price {
                    let crosses = match (request.side, request.limit_price) {
                        (OrderSide::Buy, Some(limit)) => price <= limit,
                        (OrderSide::Sell, Some(limit)) => price >= limit,
                        _ => false,
                    };
                    if crosses {
                        Self::fill_order(&mut inner, &mut order, price, now)?;
                    }
                }
            }
            OrderType::Stop | OrderType::StopLimit => {
                // Stops rest as pending; replay advances them via set_price.
            }
        }

        inner.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn place_bracket_order(&self, request: BracketRequest) -> Result<BracketOrder> {
        // Entry is a market order; the protective legs rest as pending
        // children.
        let entry = self
            .place_order(OrderRequest {
                ticker: request.ticker.clone(),
                side: OrderSide::Buy,
                quantity: request.quantity,
                order_type: OrderType::Market,
                limit_price: None,
                stop_price: None,
                signal_id: request.signal_id.clone(),
            })
            .await?;

        let now = self.now();
        let stop = Self::make_order(&OrderRequest {
            ticker: request.ticker.clone(),
            side: OrderSide::Sell,
            quantity: request.quantity,
            order_type: OrderType::Stop,
            limit_price: None,
            stop_price: Some(request.stop_loss),
            signal_id: request.signal_id.clone(),
        }, now);
        let target = Self::make_order(&OrderRequest {
            ticker: request.ticker.clone(),
            side: OrderSide::Sell,
            quantity: request.quantity,
            order_type: OrderType::Limit,
            limit_price: Some(request.take_profit),
            stop_price: None,
            signal_id: request.signal_id,
        }, now);

        {
            let mut inner = self.inner.write();
            inner.orders.insert(stop.order_id.clone(), stop.clone());
            inner.orders.insert(target.order_id.clone(), target.clone());
        }

        Ok(BracketOrder { entry, stop, target })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(order) = inner.orders.get_mut(order_id) else {
            bail!("unknown order {order_id}");
        };
        if order.status.is_terminal() {
            bail!("order {order_id} already {}", order.status);
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn close_position(&self, ticker: &str) -> Result<Order> {
        let quantity = {
            let inner = self.inner.read();
            inner
                .holdings
                .get(ticker)
                .map(|h| h.quantity)
                .unwrap_or(0.0)
        };
        if quantity <= 0.0 {
            bail!("no position in {ticker}");
        }

        self.place_order(OrderRequest {
            ticker: ticker.to_string(),
            side: OrderSide::Sell,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            signal_id: None,
        })
        .await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.inner
            .read()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown order {order_id}"))
    }
}
