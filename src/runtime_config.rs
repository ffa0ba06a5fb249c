// =============================================================================
// Runtime Configuration — engine settings with env overrides and atomic save
// =============================================================================
//
// Central configuration hub for the Meridian engine. Every tunable parameter
// lives here. Values come from three layers, later layers winning:
//
//   1. Built-in defaults.
//   2. An optional JSON file (saved back through the staged-rename writer
//      in persist.rs).
//   3. Environment variables (the documented operator surface).
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_cycle_interval_sec() -> u64 {
    120
}

fn default_monitor_interval_sec() -> u64 {
    45
}

fn default_max_article_age_minutes() -> i64 {
    60
}

fn default_max_sec_filing_age_minutes() -> i64 {
    240
}

fn default_min_price() -> f64 {
    0.5
}

fn default_max_price() -> f64 {
    100.0
}

fn default_min_rvol() -> f64 {
    0.0
}

fn default_multi_ticker_min_relevance() -> f64 {
    40.0
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_base_position_size_pct() -> f64 {
    5.0
}

fn default_max_position_size_pct() -> f64 {
    10.0
}

fn default_max_volume_pct() -> f64 {
    5.0
}

fn default_max_hold_hours() -> i64 {
    24
}

fn default_entry_order_timeout_secs() -> u64 {
    60
}

fn default_feedback_multiplier_min() -> f64 {
    0.7
}

fn default_feedback_multiplier_max() -> f64 {
    1.3
}

fn default_feedback_cache_ttl_minutes() -> u64 {
    60
}

fn default_feedback_min_sample_size() -> usize {
    10
}

fn default_feedback_window_days() -> i64 {
    30
}

fn default_feedback_smoothing() -> f64 {
    0.3
}

fn default_alert_consecutive_empty_cycles() -> u32 {
    10
}

fn default_fetch_fanout() -> usize {
    8
}

fn default_classify_workers() -> usize {
    4
}

fn default_llm_max_concurrency() -> usize {
    5
}

fn default_dedup_title_window() -> usize {
    256
}

fn default_dedup_similarity() -> f64 {
    0.85
}

fn default_reconcile_every_ticks() -> u32 {
    10
}

fn default_starting_cash() -> f64 {
    100_000.0
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_feed_sources() -> Vec<FeedSourceConfig> {
    vec![
        FeedSourceConfig {
            kind: FeedKind::Rss,
            name: "globenewswire".to_string(),
            url: "https://www.globenewswire.com/RssFeed/subjectcode/9-Press%20Releases/feedTitle/GlobeNewswire".to_string(),
        },
        FeedSourceConfig {
            kind: FeedKind::Rss,
            name: "businesswire".to_string(),
            url: "https://www.businesswire.com/portal/site/home/news/".to_string(),
        },
        FeedSourceConfig {
            kind: FeedKind::Edgar,
            name: "sec_edgar".to_string(),
            url: "https://efts.sec.gov/LATEST/search-index?q=&dateRange=custom&forms=8-K".to_string(),
        },
    ]
}

// =============================================================================
// Feed source configuration
// =============================================================================

/// Which adapter a configured source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Rss,
    PrWire,
    Edgar,
}

/// A single configuration-enumerated feed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub kind: FeedKind,
    pub name: String,
    pub url: String,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Scheduling ----------------------------------------------------------

    /// Cycle scheduler tick period in seconds.
    #[serde(default = "default_cycle_interval_sec")]
    pub cycle_interval_sec: u64,

    /// Position monitor tick period in seconds.
    #[serde(default = "default_monitor_interval_sec")]
    pub monitor_interval_sec: u64,

    // --- Ingestion -----------------------------------------------------------

    /// Configured feed sources.
    #[serde(default = "default_feed_sources")]
    pub feed_sources: Vec<FeedSourceConfig>,

    /// Freshness threshold for news items, minutes. The check is inclusive:
    /// an item exactly this old is still accepted.
    #[serde(default = "default_max_article_age_minutes")]
    pub max_article_age_minutes: i64,

    /// Freshness threshold for SEC filings, minutes. Filings stay relevant
    /// longer than wire news.
    #[serde(default = "default_max_sec_filing_age_minutes")]
    pub max_sec_filing_age_minutes: i64,

    /// Drop OTC / pink-sheet tickers.
    #[serde(default = "default_true")]
    pub filter_otc_stocks: bool,

    /// Tradeable price band, inclusive.
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default = "default_max_price")]
    pub max_price: f64,

    /// Number of recent titles kept for fuzzy dedup.
    #[serde(default = "default_dedup_title_window")]
    pub dedup_title_window: usize,

    /// Similarity ratio at or above which two titles are duplicates.
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f64,

    /// Consecutive empty cycles before the feed-outage operator alert fires.
    #[serde(default = "default_alert_consecutive_empty_cycles")]
    pub alert_consecutive_empty_cycles: u32,

    // --- Classification & scoring -------------------------------------------

    /// Minimum RVOL required to score an item. 0 disables the gate.
    #[serde(default = "default_min_rvol")]
    pub min_rvol: f64,

    /// Per-ticker relevance scoring for multi-ticker items.
    #[serde(default = "default_true")]
    pub feature_multi_ticker_scoring: bool,

    /// Relevance score a ticker needs to be a primary.
    #[serde(default = "default_multi_ticker_min_relevance")]
    pub multi_ticker_min_relevance_score: f64,

    // --- Signals & feedback --------------------------------------------------

    /// Signals below this confidence are downgraded to SKIP.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Keyword performance multipliers feed into signal confidence.
    #[serde(default = "default_true")]
    pub feature_feedback_signal_integration: bool,

    #[serde(default = "default_feedback_multiplier_min")]
    pub feedback_multiplier_min: f64,
    #[serde(default = "default_feedback_multiplier_max")]
    pub feedback_multiplier_max: f64,

    /// Multiplier cache refresh period, minutes.
    #[serde(default = "default_feedback_cache_ttl_minutes")]
    pub feedback_cache_ttl_minutes: u64,

    /// Closed trades required per keyword before any adjustment applies.
    #[serde(default = "default_feedback_min_sample_size")]
    pub feedback_min_sample_size: usize,

    /// Rolling outcome window, days.
    #[serde(default = "default_feedback_window_days")]
    pub feedback_window_days: i64,

    /// Blend-to-baseline smoothing factor.
    #[serde(default = "default_feedback_smoothing")]
    pub feedback_smoothing: f64,

    // --- Trading -------------------------------------------------------------

    /// Base position size as a percentage of account equity.
    #[serde(default = "default_base_position_size_pct")]
    pub base_position_size_pct: f64,

    /// Hard cap on a single position as a percentage of portfolio equity.
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,

    /// Liquidity cap: order quantity must stay at or below this percentage
    /// of rolling average daily volume.
    #[serde(default = "default_max_volume_pct")]
    pub max_volume_pct: f64,

    /// Time-based exit: positions older than this are closed.
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: i64,

    /// Entry orders not filled within this window are cancelled.
    #[serde(default = "default_entry_order_timeout_secs")]
    pub entry_order_timeout_secs: u64,

    /// Reconcile the local position table against the broker every N monitor
    /// ticks.
    #[serde(default = "default_reconcile_every_ticks")]
    pub reconcile_every_ticks: u32,

    /// Paper broker starting cash.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: f64,

    // --- Concurrency ---------------------------------------------------------

    /// Bounded fan-out for concurrent feed fetches.
    #[serde(default = "default_fetch_fanout")]
    pub fetch_fanout: usize,

    /// Worker pool size for per-item classification and enrichment.
    #[serde(default = "default_classify_workers")]
    pub classify_workers: usize,

    /// Token bucket size for concurrent LLM calls.
    #[serde(default = "default_llm_max_concurrency")]
    pub llm_max_concurrency: usize,

    // --- Simulation ----------------------------------------------------------

    #[serde(default)]
    pub simulation_mode: bool,

    /// Virtual clock speed multiplier. 0 means instant replay.
    #[serde(default)]
    pub simulation_speed: f64,

    /// Named event fixture to replay.
    #[serde(default)]
    pub simulation_preset: Option<String>,

    // --- Persistence ---------------------------------------------------------

    /// Directory holding the JSONL logs and SQLite databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialise")
    }
}

impl RuntimeConfig {
    /// Read settings from the JSON file at `path`. A missing or malformed
    /// file is the caller's decision to handle; startup falls back to
    /// defaults, an admin action surfaces the error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("settings file {} is unreadable", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("settings file {} is not valid JSON", path.display()))?;

        info!(
            path = %path.display(),
            sources = config.feed_sources.len(),
            cycle_interval_sec = config.cycle_interval_sec,
            "settings loaded from disk"
        );
        Ok(config)
    }

    /// Write the current settings back to `path` via the staged-rename
    /// writer, so a crash mid-save can never truncate the file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let json =
            serde_json::to_string_pretty(self).context("settings do not serialise to JSON")?;
        crate::persist::write_atomic(path, json.as_bytes())?;

        info!(path = %path.display(), "settings written");
        Ok(())
    }

    /// Apply the documented environment variable surface on top of whatever
    /// was loaded. Unparseable values are logged and skipped, never fatal.
    pub fn apply_env_overrides(&mut self) {
        env_parse("CYCLE_INTERVAL_SEC", &mut self.cycle_interval_sec);
        env_parse("POSITION_MONITOR_INTERVAL_SEC", &mut self.monitor_interval_sec);
        env_parse("MAX_ARTICLE_AGE_MINUTES", &mut self.max_article_age_minutes);
        env_parse("MAX_SEC_FILING_AGE_MINUTES", &mut self.max_sec_filing_age_minutes);
        env_parse("FILTER_OTC_STOCKS", &mut self.filter_otc_stocks);
        env_parse("MIN_PRICE", &mut self.min_price);
        env_parse("MAX_PRICE", &mut self.max_price);
        env_parse("MIN_RVOL", &mut self.min_rvol);
        env_parse(
            "FEATURE_MULTI_TICKER_SCORING",
            &mut self.feature_multi_ticker_scoring,
        );
        env_parse(
            "MULTI_TICKER_MIN_RELEVANCE_SCORE",
            &mut self.multi_ticker_min_relevance_score,
        );
        env_parse("MIN_CONFIDENCE", &mut self.min_confidence);
        env_parse(
            "FEATURE_FEEDBACK_SIGNAL_INTEGRATION",
            &mut self.feature_feedback_signal_integration,
        );
        env_parse("FEEDBACK_MULTIPLIER_MIN", &mut self.feedback_multiplier_min);
        env_parse("FEEDBACK_MULTIPLIER_MAX", &mut self.feedback_multiplier_max);
        env_parse(
            "FEEDBACK_CACHE_TTL_MINUTES",
            &mut self.feedback_cache_ttl_minutes,
        );
        env_parse(
            "FEEDBACK_MIN_SAMPLE_SIZE",
            &mut self.feedback_min_sample_size,
        );
        env_parse("FEEDBACK_WINDOW_DAYS", &mut self.feedback_window_days);
        env_parse("SIMULATION_MODE", &mut self.simulation_mode);
        env_parse("SIMULATION_SPEED", &mut self.simulation_speed);
        if let Ok(preset) = std::env::var("SIMULATION_PRESET") {
            if !preset.trim().is_empty() {
                self.simulation_preset = Some(preset);
            }
        }
        env_parse(
            "ALERT_CONSECUTIVE_EMPTY_CYCLES",
            &mut self.alert_consecutive_empty_cycles,
        );
        if let Ok(dir) = std::env::var("MERIDIAN_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = dir;
            }
        }
    }
}

/// Parse an env var into `target` if present and valid.
fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, raw = %raw, "ignoring unparseable env override"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_knob() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.cycle_interval_sec, 120);
        assert_eq!(cfg.max_article_age_minutes, 60);
        assert_eq!(cfg.max_sec_filing_age_minutes, 240);
        assert!(cfg.filter_otc_stocks);
        assert!((cfg.multi_ticker_min_relevance_score - 40.0).abs() < f64::EPSILON);
        assert_eq!(cfg.feedback_min_sample_size, 10);
        assert!((cfg.feedback_multiplier_min - 0.7).abs() < f64::EPSILON);
        assert!((cfg.feedback_multiplier_max - 1.3).abs() < f64::EPSILON);
        assert!((cfg.feedback_smoothing - 0.3).abs() < f64::EPSILON);
        assert_eq!(cfg.fetch_fanout, 8);
        assert_eq!(cfg.classify_workers, 4);
        assert_eq!(cfg.llm_max_concurrency, 5);
        assert!(!cfg.simulation_mode);
    }

    #[test]
    fn empty_json_is_all_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.cycle_interval_sec, 120);
        assert_eq!(cfg.alert_consecutive_empty_cycles, 10);
        assert!(!cfg.feed_sources.is_empty());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let json = r#"{ "cycle_interval_sec": 60, "min_rvol": 1.5 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.cycle_interval_sec, 60);
        assert!((cfg.min_rvol - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.max_article_age_minutes, 60);
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cycle_interval_sec, cfg2.cycle_interval_sec);
        assert_eq!(cfg.feed_sources.len(), cfg2.feed_sources.len());
        assert_eq!(cfg.feedback_min_sample_size, cfg2.feedback_min_sample_size);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.cycle_interval_sec = 90;
        cfg.min_rvol = 1.25;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.cycle_interval_sec, 90);
        assert!((loaded.min_rvol - 1.25).abs() < f64::EPSILON);
        // No staging leftovers beside the real file.
        assert!(!dir.path().join("runtime_config.pending").exists());
    }

    #[test]
    fn load_of_missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/nonexistent/meridian/config.json").is_err());
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("MAX_ARTICLE_AGE_MINUTES", "90");
        std::env::set_var("FILTER_OTC_STOCKS", "false");
        let mut cfg = RuntimeConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.max_article_age_minutes, 90);
        assert!(!cfg.filter_otc_stocks);
        std::env::remove_var("MAX_ARTICLE_AGE_MINUTES");
        std::env::remove_var("FILTER_OTC_STOCKS");
    }
}
