// =============================================================================
// End-to-end pipeline scenarios — news item in, broker activity out
// =============================================================================
//
// Each scenario drives the production cycle (scheduler::run_cycle) through
// the deterministic seams: queue-backed feed source, mock broker, virtual
// clock, simulation market data, tempdir persistence.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use meridian_bot::alerts::{color_hint, AlertPayload, ColorHint, LogAlertSink};
use meridian_bot::app_state::AppState;
use meridian_bot::classify::sentiment::{
    DomainLexiconSource, HeadlineLexicalSource, ProviderSentimentSource, SentimentAggregator,
    SentimentSource,
};
use meridian_bot::classify::{Classifier, ScoredItem};
use meridian_bot::clock::{Clock, SharedClock, VirtualClock};
use meridian_bot::enrich::float_data::FloatProviderChain;
use meridian_bot::enrich::Enricher;
use meridian_bot::feeds::{FeedSource, NewsItem};
use meridian_bot::market_data::{IndexSnapshot, MarketDataProvider};
use meridian_bot::outcome::OutcomeTracker;
use meridian_bot::persist::{JsonlWriter, SentimentDb, TradingDb};
use meridian_bot::runtime_config::RuntimeConfig;
use meridian_bot::scheduler::{run_cycle, CycleDeps, CycleStats};
use meridian_bot::signal::feedback::{FeedbackConfig, FeedbackEngine};
use meridian_bot::sim::mock_broker::MockBroker;
use meridian_bot::sim::{QueueFeedSource, SimMarketData, SimTickerMeta};
use meridian_bot::trading::broker::Broker;
use meridian_bot::trading::engine::TradingEngine;
use meridian_bot::types::{AlertType, RejectionReason};

// ---------------------------------------------------------------------------
// Test rig
// ---------------------------------------------------------------------------

struct Rig {
    deps: Arc<CycleDeps>,
    state: Arc<AppState>,
    broker: Arc<MockBroker>,
    market_data: Arc<SimMarketData>,
    queue: Arc<QueueFeedSource>,
    clock: Arc<VirtualClock>,
    _dir: tempfile::TempDir,
}

/// 20:00 UTC: the intraday volume curve is complete, so RVOL needs no
/// time-of-day scaling and test arithmetic stays exact.
fn session_close() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap()
}

fn bull_index() -> IndexSnapshot {
    IndexSnapshot {
        spy_last: 540.0,
        spy_sma_200: 505.0,
        spy_return_1d: 0.3,
        vix: 17.0,
        sector_returns_1d: Default::default(),
        sector_returns_5d: Default::default(),
    }
}

fn build_rig(now: DateTime<Utc>, index: IndexSnapshot) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(VirtualClock::new(now, 0.0));
    let shared_clock: SharedClock = clock.clone();

    let broker = Arc::new(MockBroker::with_clock(100_000.0, shared_clock.clone()));
    let market_data = Arc::new(SimMarketData::new(broker.clone(), index));
    let provider: Arc<dyn MarketDataProvider> = market_data.clone();

    let state = Arc::new(AppState::new(RuntimeConfig::default()));
    let cfg = state.runtime_config.read().clone();

    let trading_db = Arc::new(TradingDb::open(dir.path().join("trading.db")).unwrap());
    let sentiment_db = Arc::new(SentimentDb::open(dir.path().join("sentiment.db")).unwrap());
    let accepted_log = Arc::new(JsonlWriter::new(dir.path().join("accepted_items.jsonl")));
    let rejected_log = Arc::new(JsonlWriter::new(dir.path().join("rejected_items.jsonl")));
    let outcome_log = JsonlWriter::new(dir.path().join("outcomes.jsonl"));

    let sentiment_sources: Vec<Arc<dyn SentimentSource>> = vec![
        Arc::new(HeadlineLexicalSource),
        Arc::new(DomainLexiconSource),
        Arc::new(ProviderSentimentSource),
    ];
    let classifier = Arc::new(Classifier::new(SentimentAggregator::new(sentiment_sources)));
    let enricher = Arc::new(Enricher::new(
        provider.clone(),
        FloatProviderChain::new(Vec::new()),
    ));

    let broker_dyn: Arc<dyn Broker> = broker.clone();
    let engine = Arc::new(TradingEngine::new(broker_dyn, state.position_book.clone()));
    let outcomes = Arc::new(OutcomeTracker::new(outcome_log, trading_db));
    let feedback = Arc::new(FeedbackEngine::new(FeedbackConfig {
        enabled: cfg.feature_feedback_signal_integration,
        ..FeedbackConfig::default()
    }));

    let queue = QueueFeedSource::new("testwire");
    let sources: Vec<Box<dyn FeedSource>> = vec![Box::new(queue.clone())];

    let deps = Arc::new(CycleDeps {
        state: state.clone(),
        sources,
        classifier,
        enricher,
        provider,
        feedback,
        engine,
        outcomes,
        alerts: Arc::new(LogAlertSink),
        accepted_log,
        rejected_log,
        sentiment_db,
        clock: shared_clock,
    });

    Rig {
        deps,
        state,
        broker,
        market_data,
        queue,
        clock,
        _dir: dir,
    }
}

impl Rig {
    /// Price a ticker on the mock broker and give it tradeable metadata.
    fn list_ticker(&self, ticker: &str, price: f64, session_volume: f64, avg_volume: f64) {
        self.broker.set_price(ticker, price);
        self.market_data.set_meta(
            ticker,
            SimTickerMeta {
                avg_volume_20d: avg_volume,
                exchange: "NASDAQ".to_string(),
                sector: None,
                daily_bars: Vec::new(),
            },
        );
        self.market_data.add_session_volume(ticker, session_volume);
    }

    fn push_news(&self, title: &str, summary: &str, tickers: &[&str]) {
        let item = NewsItem::new(
            "testwire",
            &format!("https://wire.test/{}", title.len()),
            title,
            summary,
            self.clock.now(),
            tickers.iter().map(|t| t.to_string()).collect(),
        );
        self.queue.push(item);
    }

    fn accepted_items(&self) -> Vec<ScoredItem> {
        let path = self.deps.accepted_log.path();
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    fn rejected_reasons(&self) -> Vec<RejectionReason> {
        self.state
            .recent_rejections
            .read()
            .iter()
            .map(|r| r.reason)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: offering closing (non-dilutive)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offering_closing_is_not_a_red_alert() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("POET", 4.2, 1_000_000.0, 1_000_000.0);
    rig.push_news(
        "POET Technologies Announces Closing of US$150 Million Oversubscribed Registered Direct Offering",
        "POET Technologies (NASDAQ: POET) closed its previously announced offering.",
        &["POET"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 1);

    let accepted = rig.accepted_items();
    let scored = &accepted[0];
    assert_eq!(scored.primary_ticker, "POET");
    assert!((scored.sentiment_original - 0.2).abs() < 1e-9);
    assert_ne!(scored.alert_type, AlertType::Negative);
    assert!(scored.tags.contains("offering_closing"));

    let payload = AlertPayload::from_scored(scored);
    assert!(matches!(payload.color_hint, ColorHint::Green | ColorHint::Blue));

    // An offering, even closing, is never bought.
    assert!(rig.broker.get_positions().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 2: debt offering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debt_offering_overrides_to_positive() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("PSEC", 5.1, 2_000_000.0, 2_500_000.0);
    rig.push_news(
        "Prospect Capital Corporation Announces Pricing of $167 Million Unsecured Notes Offering",
        "Prospect Capital (NASDAQ: PSEC) priced unsecured notes due 2029. PSEC expects the offering to close next week.",
        &["PSEC"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 1);

    let scored = &rig.accepted_items()[0];
    assert!((scored.sentiment_original - 0.3).abs() < 1e-9);
    assert_ne!(scored.alert_type, AlertType::Negative);
    assert!(scored.tags.contains("offering_debt"));
}

// ---------------------------------------------------------------------------
// Scenario 3: dilutive offering announcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dilutive_announcement_is_red_and_skipped() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("XYZ", 3.0, 500_000.0, 800_000.0);
    rig.push_news(
        "XYZ Corp Announces $100M Public Offering",
        "XYZ Corp (NASDAQ: XYZ) intends to offer shares of common stock.",
        &["XYZ"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.orders_placed, 0);

    let scored = &rig.accepted_items()[0];
    assert!((scored.sentiment_original - -0.6).abs() < 1e-9);
    assert_eq!(scored.alert_type, AlertType::Negative);
    assert_eq!(color_hint(scored.alert_type, 2.0), ColorHint::Red);

    assert!(rig.broker.get_positions().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 4: FDA catalyst in a bull tape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fda_catalyst_buys_with_bracket_stops() {
    let rig = build_rig(session_close(), bull_index());
    // Session volume 3.1x the 20-day average: HIGH RVOL.
    rig.list_ticker("XYZBIO", 4.0, 3_100_000.0, 1_000_000.0);
    rig.push_news(
        "XYZBIO Announces FDA Approval of Phase 3 Trial",
        "XYZBIO received FDA approval for its lead candidate.",
        &["XYZBIO"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.signals_emitted, 1);
    assert_eq!(stats.orders_placed, 1);

    // Position opened with the FDA config's stops off the $4 print.
    let positions = rig.state.position_book.get_open_positions();
    assert_eq!(positions.len(), 1);
    let pos = &positions[0];
    assert_eq!(pos.ticker, "XYZBIO");
    assert!((pos.stop_loss_price - 4.0 * 0.95).abs() < 1e-9);
    assert!((pos.take_profit_price - 4.0 * 1.12).abs() < 1e-9);
    assert_eq!(pos.keyword_tag.as_deref(), Some("fda"));

    // The broker really holds it.
    let holdings = rig.broker.get_positions().await.unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].ticker, "XYZBIO");

    // Enrichment recorded the HIGH RVOL that fed the confidence pipeline.
    let scored = &rig.accepted_items()[0];
    let rvol = scored.extra_f64("rvol").unwrap();
    assert!((rvol - 3.1).abs() < 0.01, "rvol = {rvol}");
}

// ---------------------------------------------------------------------------
// Scenario 5: multi-ticker partnership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn co_subject_partnership_emits_two_signals() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("AAPL", 6.0, 2_500_000.0, 1_000_000.0);
    rig.list_ticker("GOOGL", 5.0, 2_500_000.0, 1_000_000.0);
    rig.push_news(
        "AAPL and GOOGL Announce AI Partnership",
        "AAPL and GOOGL will jointly develop AI models.",
        &["AAPL", "GOOGL"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 2, "both co-subjects accepted");
    assert_eq!(stats.signals_emitted, 2);
    assert_eq!(stats.orders_placed, 2);

    let accepted = rig.accepted_items();
    assert!(accepted.iter().all(|s| s.relevance_score >= 40.0));

    let positions = rig.state.position_book.get_open_positions();
    let tickers: Vec<&str> = positions.iter().map(|p| p.ticker.as_str()).collect();
    assert!(tickers.contains(&"AAPL"));
    assert!(tickers.contains(&"GOOGL"));
}

// ---------------------------------------------------------------------------
// Scenario 6: retrospective article blocked
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrospective_article_never_reaches_scoring() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("AAPL", 6.0, 1_000_000.0, 1_000_000.0);
    rig.push_news(
        "Why Is Apple Trading Lower Today?",
        "Shares of Apple fell in morning trading.",
        &["AAPL"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 0);
    assert_eq!(stats.signals_emitted, 0);
    assert!(rig.rejected_reasons().contains(&RejectionReason::Retrospective));
}

// ---------------------------------------------------------------------------
// Universal invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn price_cache_is_empty_after_every_cycle() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("ACME", 4.0, 1_000_000.0, 1_000_000.0);
    rig.push_news("ACME wins record contract award", "ACME detail.", &["ACME"]);

    let stats: CycleStats = run_cycle(&rig.deps).await;
    assert_eq!(stats.price_cache_len_after, 0);
}

#[tokio::test]
async fn accepted_items_always_carry_bounded_scores() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("ACME", 4.0, 3_000_000.0, 1_000_000.0);
    rig.list_ticker("ZEN", 2.0, 500_000.0, 900_000.0);
    rig.push_news(
        "ACME Receives FDA Fast Track Designation",
        "ACME said the FDA granted fast track status.",
        &["ACME"],
    );
    rig.push_news(
        "ZEN Announces Upsized Public Offering",
        "ZEN upsized its offering.",
        &["ZEN"],
    );

    run_cycle(&rig.deps).await;

    for scored in rig.accepted_items() {
        assert!((-1.0..=1.0).contains(&scored.sentiment));
        assert!((-1.0..=1.0).contains(&scored.sentiment_original));
        assert!((0.0..=1.0).contains(&scored.sentiment_confidence));
        assert!(scored.relevance_score >= 40.0);
    }
}

#[tokio::test]
async fn reingesting_the_same_item_yields_no_new_scored_items() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("ACME", 4.0, 1_000_000.0, 1_000_000.0);

    rig.push_news("ACME wins record contract award", "ACME detail.", &["ACME"]);
    let first = run_cycle(&rig.deps).await;
    assert_eq!(first.accepted, 1);

    // Same item again next cycle: dedup eats it.
    rig.push_news("ACME wins record contract award", "ACME detail.", &["ACME"]);
    let second = run_cycle(&rig.deps).await;
    assert_eq!(second.accepted, 0);
    assert!(rig.rejected_reasons().contains(&RejectionReason::Duplicate));
}

#[tokio::test]
async fn stale_item_is_rejected_inclusive_boundary_accepted() {
    let rig = build_rig(session_close(), bull_index());
    rig.list_ticker("ACME", 4.0, 1_000_000.0, 1_000_000.0);

    let max_age = rig.state.runtime_config.read().max_article_age_minutes;

    // Exactly at the threshold: accepted.
    let at_boundary = NewsItem::new(
        "testwire",
        "https://wire.test/boundary",
        "ACME wins record contract award",
        "ACME detail.",
        rig.clock.now() - chrono::Duration::minutes(max_age),
        vec!["ACME".to_string()],
    );
    rig.queue.push(at_boundary);
    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 1);

    // One minute past: stale.
    let past = NewsItem::new(
        "testwire",
        "https://wire.test/past",
        "ZEN reports quarterly production results",
        "",
        rig.clock.now() - chrono::Duration::minutes(max_age + 1),
        vec!["ZEN".to_string()],
    );
    rig.queue.push(past);
    run_cycle(&rig.deps).await;
    assert!(rig.rejected_reasons().contains(&RejectionReason::StaleArticle));
}

#[tokio::test]
async fn otc_listing_is_rejected() {
    let rig = build_rig(session_close(), bull_index());
    rig.broker.set_price("PINK", 2.0);
    rig.market_data.set_meta(
        "PINK",
        SimTickerMeta {
            avg_volume_20d: 500_000.0,
            exchange: "OTC Markets".to_string(),
            sector: None,
            daily_bars: Vec::new(),
        },
    );
    rig.push_news(
        "PINK Announces FDA Approval of Phase 3 Trial",
        "PINK received approval.",
        &["PINK"],
    );

    let stats = run_cycle(&rig.deps).await;
    assert_eq!(stats.accepted, 0);
    assert!(rig.rejected_reasons().contains(&RejectionReason::OtcExchange));
}

#[tokio::test]
async fn feed_outage_alert_fires_after_threshold() {
    let rig = build_rig(session_close(), bull_index());
    let threshold = rig
        .state
        .runtime_config
        .read()
        .alert_consecutive_empty_cycles;

    let mut alerted = false;
    for _ in 0..threshold {
        let stats = run_cycle(&rig.deps).await;
        alerted = alerted || stats.outage_alerted;
    }
    assert!(alerted, "outage alert after {threshold} empty cycles");

    // Recovery resets the alarm.
    rig.list_ticker("ACME", 4.0, 1_000_000.0, 1_000_000.0);
    rig.push_news("ACME wins record contract award", "ACME detail.", &["ACME"]);
    let stats = run_cycle(&rig.deps).await;
    assert!(!stats.outage_alerted);
}
