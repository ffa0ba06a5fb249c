// =============================================================================
// Cycle Scheduler — one full Ingestion -> Signal -> Order pass per tick
// =============================================================================
//
// Single cooperative task. Ticks never overlap: the pass runs inline, and
// when a pass overruns the tick period the next tick is skipped with a
// warning. Within a pass:
//
//   - feed fetches fan out concurrently (bounded <= fetch_fanout)
//   - classification + enrichment run per-item on a small worker pool
//   - LLM calls are capped separately by the gateway's token bucket
//
// The per-cycle price cache lives inside the pass and is cleared before the
// pass returns; nothing leaks across cycles. A panicking pass is caught at
// the tick boundary and the next tick proceeds.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertPayload, AlertSink, CHANNEL_ALERTS, CHANNEL_OPS};
use crate::app_state::AppState;
use crate::classify::{Classifier, ScoredItem};
use crate::clock::SharedClock;
use crate::enrich::{apply_sector_adjustment, attach_context_extras, Enricher, MarketContext};
use crate::feeds::{fetch_all, FeedSource, NewsItem};
use crate::ingest;
use crate::market_data::{IndexSnapshot, MarketDataProvider, PriceCache};
use crate::outcome::OutcomeTracker;
use crate::persist::{JsonlWriter, SentimentDb};
use crate::signal::{feedback::FeedbackEngine, Signal, SignalGenerator};
use crate::trading::engine::{ExecutionResult, TradingEngine};
use crate::types::{RejectionReason, TradeAction};

// ---------------------------------------------------------------------------
// Dependencies and stats
// ---------------------------------------------------------------------------

pub struct CycleDeps {
    pub state: Arc<AppState>,
    pub sources: Vec<Box<dyn FeedSource>>,
    pub classifier: Arc<Classifier>,
    pub enricher: Arc<Enricher>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub feedback: Arc<FeedbackEngine>,
    pub engine: Arc<TradingEngine>,
    pub outcomes: Arc<OutcomeTracker>,
    pub alerts: Arc<dyn AlertSink>,
    pub accepted_log: Arc<JsonlWriter>,
    pub rejected_log: Arc<JsonlWriter>,
    pub sentiment_db: Arc<SentimentDb>,
    pub clock: SharedClock,
}

/// What one pass did, for logs and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub raw_fetched: usize,
    pub after_dedup: usize,
    pub rejected: usize,
    pub accepted: usize,
    pub signals_emitted: usize,
    pub orders_placed: usize,
    pub outage_alerted: bool,
    /// Always zero on return; the cache is cleared before the pass ends.
    pub price_cache_len_after: usize,
}

/// One line of rejected_items.jsonl.
#[derive(Debug, Clone, Serialize)]
struct RejectedRecord<'a> {
    rejection_reason: RejectionReason,
    at: DateTime<Utc>,
    item: &'a NewsItem,
}

// ---------------------------------------------------------------------------
// The pass
// ---------------------------------------------------------------------------

/// Owned-argument shim so `tokio::spawn` can be handed a plain future
/// without going through a closure (avoids an HRTB inference issue with
/// `async move { run_cycle(&deps).await }` closures).
async fn run_cycle_owned(deps: Arc<CycleDeps>) -> CycleStats {
    run_cycle(&deps).await
}

/// Execute one full cycle. Never propagates handled errors; every failure
/// class degrades to an empty contribution and the pass continues.
pub async fn run_cycle(deps: &CycleDeps) -> CycleStats {
    let mut stats = CycleStats::default();
    let now = deps.clock.now();
    let cfg = deps.state.runtime_config.read().clone();

    // ── 1. Fetch ────────────────────────────────────────────────────────
    let raw_items = fetch_all(&deps.sources, cfg.fetch_fanout).await;
    stats.raw_fetched = raw_items.len();

    // Outage detection counts genuinely empty cycles.
    if deps
        .state
        .track_cycle_emptiness(raw_items.is_empty(), cfg.alert_consecutive_empty_cycles)
    {
        stats.outage_alerted = true;
        let message = format!(
            "feed outage: {} consecutive empty cycles",
            cfg.alert_consecutive_empty_cycles
        );
        if let Err(e) = deps.alerts.post_operator(CHANNEL_OPS, &message).await {
            warn!(error = %e, "operator alert failed");
        }
    }

    // ── 2. Dedup ────────────────────────────────────────────────────────
    let outcome = {
        let mut dedup = deps.state.dedup.lock();
        ingest::dedupe(raw_items, &mut dedup)
    };
    stats.after_dedup = outcome.fresh.len();
    for dup in &outcome.duplicates {
        reject(deps, &mut stats, dup, RejectionReason::Duplicate, now);
    }

    // ── 3. Freshness ────────────────────────────────────────────────────
    let (fresh_items, stale) = ingest::filter_freshness(outcome.fresh, now, &cfg);
    for rejection in stale {
        reject(deps, &mut stats, &rejection.item, rejection.reason, now);
    }

    // ── 4. Batch price fetch: the one and only cache population ────────
    let mut tickers: Vec<String> = fresh_items
        .iter()
        .flat_map(|i| i.tickers.iter().cloned())
        .collect();
    tickers.sort();
    tickers.dedup();

    let mut price_cache = match deps.provider.batch_quotes(&tickers).await {
        Ok(quotes) => PriceCache::from_quotes(quotes),
        Err(e) => {
            warn!(error = %e, "batch quote fetch failed; cycle continues unpriced");
            PriceCache::default()
        }
    };

    // ── 5. Tradeable universe (reads the cache, no per-item fan-out) ───
    let (tradeable_items, untradeable) =
        ingest::filter_tradeable(fresh_items, &price_cache, now, &cfg);
    for rejection in untradeable {
        reject(deps, &mut stats, &rejection.item, rejection.reason, now);
    }

    // ── 6. Index snapshot for regime/sector context ─────────────────────
    let index = match deps.provider.index_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "index snapshot failed; regime degrades to TRANSITION");
            fallback_index_snapshot()
        }
    };

    // ── 7. Classify + enrich on the worker pool ─────────────────────────
    let worker_results: Vec<ItemOutcome> = stream::iter(tradeable_items.into_iter())
        .map(|item| {
            let classifier = deps.classifier.clone();
            let enricher = deps.enricher.clone();
            let cfg = cfg.clone();
            let index = index.clone();
            let prices = &price_cache;
            async move {
                match classifier.classify(&item, &cfg).await {
                    Err(reason) => ItemOutcome::Rejected(item, reason),
                    Ok(scored_items) => {
                        let mut enriched = Vec::new();
                        for mut scored in scored_items {
                            let ctx = enricher
                                .enrich(&scored.primary_ticker, prices, &index, now)
                                .await;
                            if let Some(ctx) = &ctx {
                                apply_sector_adjustment(&mut scored, ctx);
                                attach_context_extras(&mut scored, ctx);
                            }
                            enriched.push((scored, ctx));
                        }
                        ItemOutcome::Scored(enriched)
                    }
                }
            }
        })
        .buffer_unordered(cfg.classify_workers.max(1))
        .collect()
        .await;

    // ── 8. Accept, alert, signal, execute ───────────────────────────────
    for result in worker_results {
        match result {
            ItemOutcome::Rejected(item, reason) => {
                reject(deps, &mut stats, &item, reason, now);
            }
            ItemOutcome::Scored(enriched) => {
                for (scored, ctx) in enriched {
                    accept_and_trade(deps, &mut stats, scored, ctx, &cfg, now).await;
                }
            }
        }
    }

    // ── 9. Cache teardown: bounded memory, invariant checked in tests ──
    price_cache.clear();
    stats.price_cache_len_after = price_cache.len();

    info!(
        raw = stats.raw_fetched,
        deduped = stats.after_dedup,
        rejected = stats.rejected,
        accepted = stats.accepted,
        signals = stats.signals_emitted,
        orders = stats.orders_placed,
        "cycle complete"
    );
    deps.state.increment_version();

    stats
}

enum ItemOutcome {
    Rejected(NewsItem, RejectionReason),
    Scored(Vec<(ScoredItem, Option<MarketContext>)>),
}

/// Accept one scored item: persist, alert, generate and execute its signal.
async fn accept_and_trade(
    deps: &CycleDeps,
    stats: &mut CycleStats,
    scored: ScoredItem,
    ctx: Option<MarketContext>,
    cfg: &crate::runtime_config::RuntimeConfig,
    now: DateTime<Utc>,
) {
    stats.accepted += 1;

    if let Err(e) = deps.accepted_log.append(&scored) {
        warn!(error = %e, "failed to append accepted item");
    }
    if let Err(e) = deps.sentiment_db.record(
        &scored.primary_ticker,
        scored.sentiment,
        scored.sentiment_confidence,
        "ensemble",
        now,
    ) {
        warn!(error = %e, "failed to record sentiment history");
    }

    let payload = AlertPayload::from_scored(&scored);
    if let Err(e) = deps.alerts.post_alert(CHANNEL_ALERTS, &payload).await {
        warn!(error = %e, "alert post failed");
    }

    // No market context means no basis for a trade decision.
    let Some(ctx) = ctx else {
        debug!(ticker = %scored.primary_ticker, "no market context; alert only");
        return;
    };

    let signal = SignalGenerator::generate(&scored, &ctx, &deps.feedback, cfg);
    stats.signals_emitted += 1;

    // Confidence-gated skips land in the rejection log.
    if signal.action == TradeAction::Skip
        && signal
            .rationale_tags
            .iter()
            .any(|t| t.starts_with("confidence_below_threshold"))
    {
        reject(
            deps,
            stats,
            &scored.item,
            RejectionReason::ConfidenceBelowThreshold,
            now,
        );
        return;
    }

    let result = deps.engine.execute(&signal, &ctx, cfg, now).await;
    log_execution(deps, &signal, &result, &ctx, stats);
}

fn log_execution(
    deps: &CycleDeps,
    signal: &Signal,
    result: &ExecutionResult,
    ctx: &MarketContext,
    stats: &mut CycleStats,
) {
    match result {
        ExecutionResult::Opened { position_id, order_id } => {
            stats.orders_placed += 1;
            // Entry context feeds the outcome log at close time.
            deps.outcomes.capture_entry_context(position_id, ctx.clone());
            info!(
                ticker = %signal.ticker,
                position_id = %position_id,
                order_id = %order_id,
                "entry executed"
            );
        }
        ExecutionResult::Closed { position_id } => {
            stats.orders_placed += 1;
            info!(ticker = %signal.ticker, position_id = %position_id, "close executed");
        }
        ExecutionResult::NoAction(reason) => {
            debug!(ticker = %signal.ticker, reason, "no action");
        }
        ExecutionResult::Rejected(reason) => {
            warn!(ticker = %signal.ticker, reason, "execution rejected");
        }
    }
}

fn reject(
    deps: &CycleDeps,
    stats: &mut CycleStats,
    item: &NewsItem,
    reason: RejectionReason,
    at: DateTime<Utc>,
) {
    stats.rejected += 1;
    deps.state.push_rejection(&item.title, reason, at);
    let record = RejectedRecord {
        rejection_reason: reason,
        at,
        item,
    };
    if let Err(e) = deps.rejected_log.append(&record) {
        warn!(error = %e, "failed to append rejected item");
    }
    debug!(title = %item.title, reason = %reason, "item rejected");
}

/// Neutral stand-in when the index fetch fails: classifies as TRANSITION.
fn fallback_index_snapshot() -> IndexSnapshot {
    IndexSnapshot {
        spy_last: 100.0,
        spy_sma_200: 99.0,
        spy_return_1d: 0.0,
        vix: 25.0,
        sector_returns_1d: Default::default(),
        sector_returns_5d: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// The loop
// ---------------------------------------------------------------------------

/// Run the scheduler forever. Spawn once at startup. A stop request (task
/// abort) lands between ticks; mid-tick the pass always completes.
pub async fn run_scheduler(deps: Arc<CycleDeps>) {
    let period = deps.state.runtime_config.read().cycle_interval_sec;
    info!(period_secs = period, "cycle scheduler started");

    loop {
        deps.clock.sleep(period as f64).await;

        let started = std::time::Instant::now();

        // Panic isolation: an unexpected bug in one pass must not kill the
        // scheduler. Handled errors never reach here.
        let pass = tokio::spawn(run_cycle_owned(deps.clone()));
        match pass.await {
            Ok(_stats) => {}
            Err(e) if e.is_panic() => {
                error!(error = %e, "cycle panicked; next tick proceeds");
            }
            Err(e) => {
                error!(error = %e, "cycle task failed");
            }
        }

        let elapsed = started.elapsed().as_secs();
        if elapsed > period {
            warn!(
                elapsed_secs = elapsed,
                period_secs = period,
                "cycle overran its period; skipping next tick"
            );
            deps.clock.sleep(period as f64).await;
        }
    }
}
