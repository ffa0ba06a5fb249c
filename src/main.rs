// =============================================================================
// Meridian Catalyst Engine — Main Entry Point
// =============================================================================
//
// Catalyst-driven trading intelligence for low-priced equities: ingest news
// and filings, classify and enrich them, convert qualifying events into
// signals, and trade them against a paper broker. SIMULATION_MODE=true
// replays a historical preset deterministically instead.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_bot::alerts::LogAlertSink;
use meridian_bot::app_state::AppState;
use meridian_bot::classify::sentiment::{
    DomainLexiconSource, HeadlineLexicalSource, LlmSentimentSource, ProviderSentimentSource,
    SentimentAggregator, SentimentSource, SocialAggregateSource,
};
use meridian_bot::classify::Classifier;
use meridian_bot::clock::{Clock, SharedClock, SystemClock, VirtualClock};
use meridian_bot::enrich::float_data::{FloatProviderChain, FloatSource, RestFloatSource};
use meridian_bot::enrich::Enricher;
use meridian_bot::feeds::{edgar::EdgarSource, prwire::PrWireSource, rss::RssFeedSource, FeedSource};
use meridian_bot::llm::{HttpLlmClient, LlmGateway};
use meridian_bot::market_data::{MarketDataProvider, RestMarketData};
use meridian_bot::outcome::OutcomeTracker;
use meridian_bot::persist::{JsonlWriter, SentimentDb, TradingDb};
use meridian_bot::runtime_config::{FeedKind, RuntimeConfig};
use meridian_bot::scheduler::CycleDeps;
use meridian_bot::signal::feedback::{FeedbackConfig, FeedbackEngine};
use meridian_bot::sim::mock_broker::MockBroker;
use meridian_bot::sim::replay::EventReplayer;
use meridian_bot::sim::{QueueFeedSource, SimMarketData, SimulationHarness};
use meridian_bot::trading::broker::Broker;
use meridian_bot::trading::engine::TradingEngine;
use meridian_bot::trading::monitor::{run_position_monitor, MonitorDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "meridian catalyst engine booting"
    );

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "no usable settings file; starting from defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    std::fs::create_dir_all(&config.data_dir)?;

    info!(
        cycle_interval_sec = config.cycle_interval_sec,
        sources = config.feed_sources.len(),
        simulation = config.simulation_mode,
        data_dir = %config.data_dir,
        "configuration resolved"
    );

    if config.simulation_mode {
        return run_simulation(config).await;
    }
    run_paper(config).await
}

// =============================================================================
// Paper mode
// =============================================================================

async fn run_paper(config: RuntimeConfig) -> anyhow::Result<()> {
    let data_dir = std::path::PathBuf::from(&config.data_dir);
    let clock: SharedClock = Arc::new(SystemClock);

    // ── 2. Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));
    let cfg = state.runtime_config.read().clone();

    // ── 3. Persistence ───────────────────────────────────────────────────
    let trading_db = Arc::new(TradingDb::open(data_dir.join("trading.db"))?);
    let sentiment_db = Arc::new(SentimentDb::open(data_dir.join("sentiment_history.db"))?);
    let accepted_log = Arc::new(JsonlWriter::new(data_dir.join("accepted_items.jsonl")));
    let rejected_log = Arc::new(JsonlWriter::new(data_dir.join("rejected_items.jsonl")));
    let outcome_log = JsonlWriter::new(data_dir.join("outcomes.jsonl"));

    // ── 4. Market data & enrichment ──────────────────────────────────────
    let market_data_url = std::env::var("MARKET_DATA_URL")
        .unwrap_or_else(|_| "http://localhost:9300".to_string());
    let provider: Arc<dyn MarketDataProvider> = Arc::new(RestMarketData::new(market_data_url));

    let float_sources: Vec<Box<dyn FloatSource>> = std::env::var("FLOAT_PROVIDER_URLS")
        .unwrap_or_default()
        .split(',')
        .filter(|u| !u.trim().is_empty())
        .enumerate()
        .map(|(i, url)| {
            Box::new(RestFloatSource::new(format!("float_{i}"), url.trim())) as Box<dyn FloatSource>
        })
        .collect();
    let enricher = Arc::new(Enricher::new(
        provider.clone(),
        FloatProviderChain::new(float_sources),
    ));

    // ── 5. Sentiment ensemble ────────────────────────────────────────────
    let mut sentiment_sources: Vec<Arc<dyn SentimentSource>> = vec![
        Arc::new(HeadlineLexicalSource),
        Arc::new(DomainLexiconSource),
        Arc::new(ProviderSentimentSource),
    ];
    if let Ok(llm_url) = std::env::var("LLM_API_URL") {
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(HttpLlmClient::new(llm_url)),
            cfg.llm_max_concurrency,
        ));
        sentiment_sources.push(Arc::new(LlmSentimentSource::new(gateway)));
        info!("LLM sentiment source enabled");
    }
    if let Ok(url) = std::env::var("COMMUNITY_SENTIMENT_URL") {
        sentiment_sources.push(Arc::new(SocialAggregateSource::new("community", url, 0.6)));
    }
    if let Ok(url) = std::env::var("FORUM_SENTIMENT_URL") {
        sentiment_sources.push(Arc::new(SocialAggregateSource::new("forum", url, 0.5)));
    }
    let classifier = Arc::new(Classifier::new(SentimentAggregator::new(sentiment_sources)));

    // ── 6. Broker, engine, feedback ──────────────────────────────────────
    let broker: Arc<dyn Broker> = Arc::new(MockBroker::new(cfg.starting_cash));
    let engine = Arc::new(TradingEngine::new(broker.clone(), state.position_book.clone()));
    let outcomes = Arc::new(OutcomeTracker::new(outcome_log, trading_db.clone()));

    let feedback = Arc::new(FeedbackEngine::new(FeedbackConfig {
        window_days: cfg.feedback_window_days,
        min_sample_size: cfg.feedback_min_sample_size,
        smoothing: cfg.feedback_smoothing,
        multiplier_min: cfg.feedback_multiplier_min,
        multiplier_max: cfg.feedback_multiplier_max,
        cache_ttl: std::time::Duration::from_secs(cfg.feedback_cache_ttl_minutes * 60),
        enabled: cfg.feature_feedback_signal_integration,
    }));

    // ── 7. Feed sources ──────────────────────────────────────────────────
    let sources: Vec<Box<dyn FeedSource>> = cfg
        .feed_sources
        .iter()
        .map(|sc| match sc.kind {
            FeedKind::Rss => {
                Box::new(RssFeedSource::new(sc.name.clone(), sc.url.clone())) as Box<dyn FeedSource>
            }
            FeedKind::PrWire => Box::new(PrWireSource::new(sc.name.clone(), sc.url.clone())),
            FeedKind::Edgar => Box::new(EdgarSource::new(sc.url.clone())),
        })
        .collect();
    info!(count = sources.len(), "feed sources configured");

    // ── 8. Scheduler ─────────────────────────────────────────────────────
    let cycle_deps = Arc::new(CycleDeps {
        state: state.clone(),
        sources,
        classifier,
        enricher,
        provider: provider.clone(),
        feedback: feedback.clone(),
        engine,
        outcomes: outcomes.clone(),
        alerts: Arc::new(LogAlertSink),
        accepted_log,
        rejected_log,
        sentiment_db: sentiment_db.clone(),
        clock: clock.clone(),
    });
    tokio::spawn(meridian_bot::scheduler::run_scheduler(cycle_deps));

    // ── 9. Position monitor ──────────────────────────────────────────────
    let monitor_deps = MonitorDeps {
        broker,
        provider,
        book: state.position_book.clone(),
        outcomes,
        clock: clock.clone(),
        config: state.runtime_config.clone(),
    };
    tokio::spawn(run_position_monitor(monitor_deps));

    // ── 10. Feedback multiplier refresh loop ─────────────────────────────
    {
        let feedback = feedback.clone();
        let trading_db = trading_db.clone();
        let clock = clock.clone();
        let window_days = cfg.feedback_window_days;
        tokio::spawn(async move {
            loop {
                if feedback.is_stale() {
                    let now = clock.now();
                    match trading_db.outcomes_since(now - chrono::Duration::days(window_days)) {
                        Ok(rows) => {
                            feedback.refresh(&rows, now);
                            for perf in feedback.performance_table() {
                                if let Err(e) = trading_db.upsert_keyword_performance(&perf, now) {
                                    warn!(error = %e, "keyword perf upsert failed");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "outcome query failed"),
                    }
                }
                clock.sleep(60.0).await;
            }
        });
    }

    // ── 11. Sentiment history retention ──────────────────────────────────
    {
        let sentiment_db = sentiment_db.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            loop {
                clock.sleep(6.0 * 3600.0).await;
                if let Err(e) = sentiment_db.purge_expired(clock.now()) {
                    warn!(error = %e, "sentiment purge failed");
                }
            }
        });
    }

    info!("engine up; scheduler and monitor ticking (ctrl-c to exit)");

    // ── 12. Graceful shutdown (takes effect between ticks) ───────────────
    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received; letting the current tick finish and exiting");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "could not persist settings on exit");
    }

    info!("engine stopped");
    Ok(())
}

// =============================================================================
// Simulation mode
// =============================================================================

async fn run_simulation(config: RuntimeConfig) -> anyhow::Result<()> {
    let data_dir = std::path::PathBuf::from(&config.data_dir);
    let run_id = uuid::Uuid::new_v4().simple().to_string();

    // ── Load the preset fixture ──────────────────────────────────────────
    let preset = config
        .simulation_preset
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let preset_path = data_dir.join("presets").join(format!("{preset}.jsonl"));
    let fixture = std::fs::read_to_string(&preset_path).map_err(|e| {
        anyhow::anyhow!("cannot read simulation preset {}: {e}", preset_path.display())
    })?;

    let mut replayer = EventReplayer::new();
    let loaded = replayer.load_fixture(&fixture);
    let Some(start_at) = replayer.next_at() else {
        anyhow::bail!("simulation preset {} holds no events", preset);
    };
    info!(preset = %preset, events = loaded, start = %start_at, run_id = %run_id, "replay fixture loaded");

    // ── Deterministic seams: virtual clock, mock broker, sim data ────────
    let virtual_clock = Arc::new(VirtualClock::new(start_at, config.simulation_speed));
    let clock: SharedClock = virtual_clock.clone();

    let broker_impl = Arc::new(MockBroker::with_clock(config.starting_cash, clock.clone()));
    let broker: Arc<dyn Broker> = broker_impl.clone();

    let market_data = Arc::new(SimMarketData::new(
        broker_impl.clone(),
        meridian_bot::market_data::IndexSnapshot {
            spy_last: 540.0,
            spy_sma_200: 505.0,
            spy_return_1d: 0.3,
            vix: 18.0,
            sector_returns_1d: Default::default(),
            sector_returns_5d: Default::default(),
        },
    ));
    let provider: Arc<dyn MarketDataProvider> = market_data.clone();

    let state = Arc::new(AppState::new(config));
    let cfg = state.runtime_config.read().clone();

    // ── Simulation-scoped persistence only ───────────────────────────────
    let trading_db = Arc::new(TradingDb::open_simulation(&data_dir, &run_id)?);
    let sentiment_db = Arc::new(SentimentDb::open(
        data_dir.join(format!("sentiment_sim_{run_id}.db")),
    )?);
    let accepted_log = Arc::new(JsonlWriter::new(
        data_dir.join(format!("accepted_sim_{run_id}.jsonl")),
    ));
    let rejected_log = Arc::new(JsonlWriter::new(
        data_dir.join(format!("rejected_sim_{run_id}.jsonl")),
    ));
    let outcome_log = JsonlWriter::new(data_dir.join(format!("outcomes_sim_{run_id}.jsonl")));

    // ── Pipeline with local-only sentiment (deterministic) ───────────────
    let classifier = Arc::new(Classifier::new(SentimentAggregator::new(vec![
        Arc::new(HeadlineLexicalSource),
        Arc::new(DomainLexiconSource),
        Arc::new(ProviderSentimentSource),
    ])));
    let enricher = Arc::new(Enricher::new(
        provider.clone(),
        FloatProviderChain::new(Vec::new()),
    ));

    let engine = Arc::new(TradingEngine::new(broker.clone(), state.position_book.clone()));
    let outcomes = Arc::new(OutcomeTracker::new(outcome_log, trading_db.clone()));
    let feedback = Arc::new(FeedbackEngine::new(FeedbackConfig {
        window_days: cfg.feedback_window_days,
        min_sample_size: cfg.feedback_min_sample_size,
        smoothing: cfg.feedback_smoothing,
        multiplier_min: cfg.feedback_multiplier_min,
        multiplier_max: cfg.feedback_multiplier_max,
        cache_ttl: std::time::Duration::from_secs(cfg.feedback_cache_ttl_minutes * 60),
        enabled: cfg.feature_feedback_signal_integration,
    }));

    let news_queue = QueueFeedSource::new("replay");
    let sources: Vec<Box<dyn FeedSource>> = vec![Box::new(news_queue.clone())];

    let cycle_deps = Arc::new(CycleDeps {
        state: state.clone(),
        sources,
        classifier,
        enricher,
        provider: provider.clone(),
        feedback,
        engine,
        outcomes: outcomes.clone(),
        alerts: Arc::new(LogAlertSink),
        accepted_log,
        rejected_log,
        sentiment_db,
        clock: clock.clone(),
    });

    let monitor_deps = MonitorDeps {
        broker,
        provider,
        book: state.position_book.clone(),
        outcomes,
        clock: clock.clone(),
        config: state.runtime_config.clone(),
    };

    let harness = SimulationHarness {
        run_id,
        clock: virtual_clock,
        broker: broker_impl,
        market_data,
        news_queue,
        cycle_deps,
        monitor_deps,
        replayer,
    };

    let report = harness.run().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
