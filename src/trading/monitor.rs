// =============================================================================
// Position Monitor — periodic stop/target/timeout enforcement
// =============================================================================
//
// Runs on its own tick, strictly separate from the cycle scheduler:
//   1. Batch-refresh quotes for every open ticker.
//   2. Recompute unrealized P&L.
//   3. Close positions whose stop, target, or max hold triggered.
//   4. Every N ticks, reconcile the local book against the broker: the
//      broker is the source of truth, phantom locals close with
//      exit_reason = RECONCILIATION.
//
// Designed to be spawned once at engine startup:
//
//   tokio::spawn(run_position_monitor(deps));
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::market_data::MarketDataProvider;
use crate::outcome::OutcomeTracker;
use crate::runtime_config::RuntimeConfig;
use crate::trading::broker::Broker;
use crate::trading::positions::PositionBook;

pub struct MonitorDeps {
    pub broker: Arc<dyn Broker>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub book: Arc<PositionBook>,
    pub outcomes: Arc<OutcomeTracker>,
    pub clock: SharedClock,
    pub config: Arc<parking_lot::RwLock<RuntimeConfig>>,
}

/// Run the monitor loop forever. Spawn as a background task.
pub async fn run_position_monitor(deps: MonitorDeps) {
    let interval_secs = deps.config.read().monitor_interval_sec;
    info!(interval_secs, "position monitor started");

    let mut tick: u32 = 0;
    loop {
        deps.clock.sleep(interval_secs as f64).await;
        tick = tick.wrapping_add(1);

        let reconcile_every = deps.config.read().reconcile_every_ticks;
        monitor_tick(&deps, tick % reconcile_every.max(1) == 0).await;
    }
}

/// One monitor pass. Public so the simulation harness can drive it from
/// the virtual clock.
pub async fn monitor_tick(deps: &MonitorDeps, reconcile: bool) {
    let open = deps.book.get_open_positions();
    if open.is_empty() && !reconcile {
        debug!("position monitor: no open positions");
        return;
    }

    let now = deps.clock.now();

    // ── 1. Batch quote refresh ──────────────────────────────────────────
    if !open.is_empty() {
        let tickers: Vec<String> = open.iter().map(|p| p.ticker.clone()).collect();
        match deps.provider.batch_quotes(&tickers).await {
            Ok(quotes) => {
                for (ticker, quote) in &quotes {
                    deps.book.update_price(ticker, quote.last_price);
                }
            }
            Err(e) => {
                warn!(error = %e, "monitor quote refresh failed; using stale prices");
            }
        }
    }

    // ── 2/3. Exit checks ────────────────────────────────────────────────
    let max_hold = chrono::Duration::hours(deps.config.read().max_hold_hours);
    let exits = deps.book.check_exits(now, max_hold);

    for (position_id, exit_reason) in exits {
        let Some(position) = deps
            .book
            .get_open_positions()
            .into_iter()
            .find(|p| p.position_id == position_id)
        else {
            continue;
        };

        // Broker first; the local book follows the confirmed close.
        let exit_price = match deps.broker.close_position(&position.ticker).await {
            Ok(order) => order.filled_avg_price.unwrap_or(position.current_price),
            Err(e) => {
                error!(
                    position_id = %position_id,
                    ticker = %position.ticker,
                    error = %e,
                    "broker close failed; will retry next tick"
                );
                continue;
            }
        };

        if let Some(closed) = deps
            .book
            .close_position(&position_id, exit_reason, exit_price, now)
        {
            info!(
                position_id = %position_id,
                ticker = %closed.ticker,
                exit_reason = %exit_reason,
                realized_pnl = closed.realized_pnl,
                "position exited by monitor"
            );
            deps.outcomes.record_close(&closed);
        }
    }

    // ── 4. Reconciliation ───────────────────────────────────────────────
    if reconcile {
        reconcile_once(deps, now).await;
    }
}

/// One reconciliation pass against the broker's position list.
pub async fn reconcile_once(deps: &MonitorDeps, now: chrono::DateTime<chrono::Utc>) {
    let broker_positions = match deps.broker.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!(error = %e, "reconciliation fetch failed");
            return;
        }
    };

    let broker_tickers: HashSet<String> =
        broker_positions.iter().map(|p| p.ticker.clone()).collect();

    let phantoms = deps.book.reconcile_against(&broker_tickers, now);
    for closed in &phantoms {
        deps.outcomes.record_close(closed);
    }

    if phantoms.is_empty() {
        debug!(
            broker_positions = broker_positions.len(),
            "reconciliation clean"
        );
    } else {
        warn!(
            phantoms = phantoms.len(),
            "reconciliation closed phantom positions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::persist::{JsonlWriter, TradingDb};
    use crate::sim::mock_broker::MockBroker;
    use crate::types::ExitReason;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct StaticQuotes {
        prices: HashMap<String, f64>,
    }

    #[async_trait]
    impl MarketDataProvider for StaticQuotes {
        async fn batch_quotes(
            &self,
            tickers: &[String],
        ) -> Result<HashMap<String, crate::market_data::Quote>> {
            Ok(tickers
                .iter()
                .filter_map(|t| {
                    self.prices.get(t).map(|p| {
                        (
                            t.clone(),
                            crate::market_data::Quote {
                                ticker: t.clone(),
                                last_price: *p,
                                prev_close: *p,
                                change_pct: 0.0,
                                volume: 1_000_000.0,
                                avg_volume_20d: 1_000_000.0,
                                exchange: "NASDAQ".into(),
                            },
                        )
                    })
                })
                .collect())
        }

        async fn daily_bars(
            &self,
            _ticker: &str,
            _days: u32,
        ) -> Result<Vec<crate::market_data::DailyBar>> {
            Ok(Vec::new())
        }

        async fn index_snapshot(&self) -> Result<crate::market_data::IndexSnapshot> {
            Ok(crate::market_data::IndexSnapshot {
                spy_last: 550.0,
                spy_sma_200: 500.0,
                spy_return_1d: 0.1,
                vix: 17.0,
                sector_returns_1d: HashMap::new(),
                sector_returns_5d: HashMap::new(),
            })
        }
    }

    fn deps_with(prices: HashMap<String, f64>, broker: Arc<MockBroker>) -> (MonitorDeps, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(TradingDb::open(dir.path().join("trading.db")).unwrap());
        let outcomes = Arc::new(OutcomeTracker::new(
            JsonlWriter::new(dir.path().join("outcomes.jsonl")),
            db,
        ));
        let clock: SharedClock = Arc::new(VirtualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap(),
            0.0,
        ));
        let deps = MonitorDeps {
            broker,
            provider: Arc::new(StaticQuotes { prices }),
            book: Arc::new(PositionBook::new()),
            outcomes,
            clock,
            config: Arc::new(parking_lot::RwLock::new(RuntimeConfig::default())),
        };
        (deps, dir)
    }

    #[tokio::test]
    async fn stop_hit_closes_position_via_broker() {
        let broker = Arc::new(MockBroker::new(100_000.0));
        broker.set_price("ACME", 3.5);
        broker.seed_position("ACME", 100.0, 4.0);

        let mut prices = HashMap::new();
        prices.insert("ACME".to_string(), 3.5);
        let (deps, _dir) = deps_with(prices, broker.clone());

        deps.book.open_position(
            "ACME",
            100.0,
            4.0,
            3.8,
            4.5,
            "order-1",
            None,
            Some("fda".into()),
            deps.clock.now(),
        );

        monitor_tick(&deps, false).await;

        assert!(deps.book.get_open_positions().is_empty());
        let closed = deps.book.get_closed_positions(1);
        assert_eq!(closed[0].exit_reason, ExitReason::Stop);
        assert!(closed[0].realized_pnl < 0.0);
    }

    #[tokio::test]
    async fn reconciliation_closes_phantom() {
        let broker = Arc::new(MockBroker::new(100_000.0));
        // Broker holds nothing.
        let (deps, _dir) = deps_with(HashMap::new(), broker);

        deps.book.open_position(
            "GHOST",
            50.0,
            2.0,
            1.8,
            2.4,
            "order-9",
            None,
            None,
            deps.clock.now(),
        );

        monitor_tick(&deps, true).await;

        assert!(deps.book.get_open_positions().is_empty());
        let closed = deps.book.get_closed_positions(1);
        assert_eq!(closed[0].exit_reason, ExitReason::Reconciliation);
    }
}
