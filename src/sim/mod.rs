// =============================================================================
// Simulation Harness — deterministic replay of a historical trading day
// =============================================================================
//
// The harness owns a virtual clock, a mock broker, and an event replayer.
// Replay loop: jump the clock to the next event timestamp, dispatch every
// due event (price updates into the mock broker, news into the queue-backed
// feed source), then run a normal scheduler pass and a monitor tick. The
// pipeline under test is the production pipeline; only the seams differ.
//
// All persistence goes to a simulation-scoped database tagged with the
// run id; live tables are never touched.
// =============================================================================

pub mod mock_broker;
pub mod replay;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::VirtualClock;
use crate::feeds::{FeedSource, NewsItem};
use crate::market_data::{DailyBar, IndexSnapshot, MarketDataProvider, Quote};
use crate::scheduler::{run_cycle, CycleDeps, CycleStats};
use crate::trading::broker::Broker;
use crate::trading::monitor::{monitor_tick, MonitorDeps};

use mock_broker::MockBroker;
use replay::{EventReplayer, SimEvent};

// ---------------------------------------------------------------------------
// Queue-backed feed source
// ---------------------------------------------------------------------------

/// The replayer pushes items in; the next cycle's fetch drains them.
pub struct QueueFeedSource {
    name: String,
    queue: Mutex<Vec<NewsItem>>,
}

impl QueueFeedSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, item: NewsItem) {
        self.queue.lock().push(item);
    }
}

#[async_trait]
impl FeedSource for Arc<QueueFeedSource> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>> {
        Ok(std::mem::take(&mut *self.queue.lock()))
    }
}

// ---------------------------------------------------------------------------
// Simulation market data provider
// ---------------------------------------------------------------------------

/// Static per-ticker metadata the replay fixture establishes up front.
#[derive(Debug, Clone)]
pub struct SimTickerMeta {
    pub avg_volume_20d: f64,
    pub exchange: String,
    pub sector: Option<String>,
    pub daily_bars: Vec<DailyBar>,
}

impl Default for SimTickerMeta {
    fn default() -> Self {
        Self {
            avg_volume_20d: 1_000_000.0,
            exchange: "NASDAQ".to_string(),
            sector: None,
            daily_bars: Vec::new(),
        }
    }
}

/// Quotes come from the mock broker's last observed prices; everything else
/// from fixture metadata. No network, ever.
pub struct SimMarketData {
    broker: Arc<MockBroker>,
    meta: Mutex<HashMap<String, SimTickerMeta>>,
    index: Mutex<IndexSnapshot>,
    session_volume: Mutex<HashMap<String, f64>>,
}

impl SimMarketData {
    pub fn new(broker: Arc<MockBroker>, index: IndexSnapshot) -> Self {
        Self {
            broker,
            meta: Mutex::new(HashMap::new()),
            index: Mutex::new(index),
            session_volume: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_meta(&self, ticker: &str, meta: SimTickerMeta) {
        self.broker.set_avg_volume(ticker, meta.avg_volume_20d);
        self.meta.lock().insert(ticker.to_string(), meta);
    }

    pub fn set_index(&self, index: IndexSnapshot) {
        *self.index.lock() = index;
    }

    /// Accumulate replayed volume so RVOL sees the session build up.
    pub fn add_session_volume(&self, ticker: &str, volume: f64) {
        *self
            .session_volume
            .lock()
            .entry(ticker.to_string())
            .or_insert(0.0) += volume;
    }
}

#[async_trait]
impl MarketDataProvider for SimMarketData {
    async fn batch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>> {
        let meta = self.meta.lock();
        let volumes = self.session_volume.lock();
        let mut quotes = HashMap::new();

        for ticker in tickers {
            let Some(last_price) = self.broker.last_price(ticker) else {
                continue;
            };
            let m = meta.get(ticker).cloned().unwrap_or_default();
            let prev_close = m
                .daily_bars
                .last()
                .map(|b| b.close)
                .unwrap_or(last_price);
            let change_pct = if prev_close > 0.0 {
                (last_price - prev_close) / prev_close * 100.0
            } else {
                0.0
            };
            quotes.insert(
                ticker.clone(),
                Quote {
                    ticker: ticker.clone(),
                    last_price,
                    prev_close,
                    change_pct,
                    volume: volumes.get(ticker).copied().unwrap_or(0.0),
                    avg_volume_20d: m.avg_volume_20d,
                    exchange: m.exchange,
                },
            );
        }
        Ok(quotes)
    }

    async fn daily_bars(&self, ticker: &str, _days: u32) -> Result<Vec<DailyBar>> {
        Ok(self
            .meta
            .lock()
            .get(ticker)
            .map(|m| m.daily_bars.clone())
            .unwrap_or_default())
    }

    async fn sector(&self, ticker: &str) -> Result<Option<String>> {
        Ok(self.meta.lock().get(ticker).and_then(|m| m.sector.clone()))
    }

    async fn index_snapshot(&self) -> Result<IndexSnapshot> {
        Ok(self.index.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub run_id: String,
    pub events_dispatched: usize,
    pub cycles_run: usize,
    pub total_accepted: usize,
    pub total_orders: usize,
    pub closed_positions: usize,
    pub final_equity: f64,
}

pub struct SimulationHarness {
    pub run_id: String,
    pub clock: Arc<VirtualClock>,
    pub broker: Arc<MockBroker>,
    pub market_data: Arc<SimMarketData>,
    pub news_queue: Arc<QueueFeedSource>,
    pub cycle_deps: Arc<CycleDeps>,
    pub monitor_deps: MonitorDeps,
    pub replayer: EventReplayer,
}

impl SimulationHarness {
    /// Replay every queued event through the production pipeline.
    pub async fn run(mut self) -> SimulationReport {
        info!(
            run_id = %self.run_id,
            events = self.replayer.len(),
            "simulation starting"
        );

        let mut report = SimulationReport {
            run_id: self.run_id.clone(),
            ..Default::default()
        };

        while let Some(next_at) = self.replayer.next_at() {
            self.clock.jump_to(next_at);
            let due = self.replayer.pop_due(next_at);

            let mut news_arrived = false;
            for event in due {
                report.events_dispatched += 1;
                match event {
                    SimEvent::News { item } | SimEvent::Filing { item } => {
                        self.news_queue.push(item);
                        news_arrived = true;
                    }
                    SimEvent::PriceUpdate {
                        ticker,
                        price,
                        volume,
                        ..
                    } => {
                        self.broker.set_price(&ticker, price);
                        self.market_data.add_session_volume(&ticker, volume);
                    }
                }
            }

            // News triggers a scheduler pass; prices always run the monitor
            // so stops and targets fire on the bar that crossed them.
            if news_arrived {
                let stats: CycleStats = run_cycle(&self.cycle_deps).await;
                report.cycles_run += 1;
                report.total_accepted += stats.accepted;
                report.total_orders += stats.orders_placed;
            }
            monitor_tick(&self.monitor_deps, false).await;

            debug!(at = %next_at, "simulation step complete");
        }

        report.closed_positions = self
            .monitor_deps
            .book
            .get_closed_positions(usize::MAX)
            .len();
        report.final_equity = self
            .broker
            .get_account()
            .await
            .map(|a| a.equity)
            .unwrap_or(0.0);

        info!(
            run_id = %report.run_id,
            events = report.events_dispatched,
            cycles = report.cycles_run,
            closed = report.closed_positions,
            final_equity = report.final_equity,
            "simulation complete"
        );

        report
    }
}
