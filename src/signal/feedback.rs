// =============================================================================
// Adaptive feedback — per-keyword performance multipliers
// =============================================================================
//
// This is not learning. It is moving-average performance attribution: each
// keyword's recent closed trades produce a raw score blending win rate and
// mean return against baseline, smoothed toward 1.0 and clamped to a
// conservative band. The signal generator multiplies its confidence by the
// result.
//
//   raw        = 0.5 * (win_rate / 0.5) + 0.5 * (1 + mean_return_pct / 5.0)
//   multiplier = 1.0 + smoothing * (raw - 1.0), clamped to [min, max]
//
// Below the minimum sample size the multiplier is exactly 1.0. The computed
// table is cached with a TTL; reads never block on recomputation.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Baseline win rate a keyword must beat to earn a boost.
const BASELINE_WIN_RATE: f64 = 0.5;
/// Return normalisation scale, percent.
const RETURN_SCALE_PCT: f64 = 5.0;
/// Returns inside this band count as neutral, not wins or losses.
const NEUTRAL_BAND_PCT: f64 = 0.1;

// ---------------------------------------------------------------------------
// Outcome rows
// ---------------------------------------------------------------------------

/// One closed trade attributed to a keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub keyword: String,
    pub ticker: String,
    pub return_pct: f64,
    pub realized_pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Rolling performance counters for one keyword.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordPerformance {
    pub keyword: String,
    pub wins: u32,
    pub losses: u32,
    pub neutrals: u32,
    pub avg_return_pct: f64,
    pub sample_size: usize,
    pub multiplier: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub window_days: i64,
    pub min_sample_size: usize,
    pub smoothing: f64,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
    pub cache_ttl: Duration,
    pub enabled: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_sample_size: 10,
            smoothing: 0.3,
            multiplier_min: 0.7,
            multiplier_max: 1.3,
            cache_ttl: Duration::from_secs(60 * 60),
            enabled: true,
        }
    }
}

pub struct FeedbackEngine {
    config: FeedbackConfig,
    table: RwLock<HashMap<String, KeywordPerformance>>,
    computed_at: RwLock<Option<Instant>>,
}

impl FeedbackEngine {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            table: RwLock::new(HashMap::new()),
            computed_at: RwLock::new(None),
        }
    }

    /// Multiplier for a keyword. 1.0 when feedback is disabled, unknown, or
    /// under-sampled. Reads are lock-free in the parking_lot sense: never
    /// blocked by a refresh in progress.
    pub fn multiplier(&self, keyword: &str) -> f64 {
        if !self.config.enabled {
            return 1.0;
        }
        self.table
            .read()
            .get(keyword)
            .map(|p| p.multiplier)
            .unwrap_or(1.0)
    }

    /// Whether the cached table is past its TTL.
    pub fn is_stale(&self) -> bool {
        match *self.computed_at.read() {
            Some(at) => at.elapsed() >= self.config.cache_ttl,
            None => true,
        }
    }

    /// Snapshot of the full table.
    pub fn performance_table(&self) -> Vec<KeywordPerformance> {
        self.table.read().values().cloned().collect()
    }

    /// Recompute every keyword's multiplier from the outcome log. Forced
    /// refresh; callers decide when (TTL expiry or on demand).
    pub fn refresh(&self, outcomes: &[TradeOutcome], now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(self.config.window_days);

        let mut grouped: HashMap<String, Vec<&TradeOutcome>> = HashMap::new();
        for outcome in outcomes.iter().filter(|o| o.closed_at >= cutoff) {
            grouped.entry(outcome.keyword.clone()).or_default().push(outcome);
        }

        let mut table = HashMap::new();
        for (keyword, rows) in grouped {
            let perf = self.compute_keyword(&keyword, &rows);
            debug!(
                keyword = %perf.keyword,
                sample = perf.sample_size,
                multiplier = format!("{:.3}", perf.multiplier),
                "keyword performance computed"
            );
            table.insert(keyword, perf);
        }

        info!(keywords = table.len(), "feedback multipliers refreshed");
        *self.table.write() = table;
        *self.computed_at.write() = Some(Instant::now());
    }

    fn compute_keyword(&self, keyword: &str, rows: &[&TradeOutcome]) -> KeywordPerformance {
        let sample_size = rows.len();
        let mut wins = 0u32;
        let mut losses = 0u32;
        let mut neutrals = 0u32;
        for row in rows {
            if row.return_pct > NEUTRAL_BAND_PCT {
                wins += 1;
            } else if row.return_pct < -NEUTRAL_BAND_PCT {
                losses += 1;
            } else {
                neutrals += 1;
            }
        }

        let avg_return_pct = if sample_size > 0 {
            rows.iter().map(|r| r.return_pct).sum::<f64>() / sample_size as f64
        } else {
            0.0
        };

        // Under-sampled keywords never adjust.
        let multiplier = if sample_size < self.config.min_sample_size {
            1.0
        } else {
            let decided = (wins + losses).max(1) as f64;
            let win_rate = wins as f64 / decided;
            let raw = 0.5 * (win_rate / BASELINE_WIN_RATE)
                + 0.5 * (1.0 + avg_return_pct / RETURN_SCALE_PCT);
            let smoothed = 1.0 + self.config.smoothing * (raw - 1.0);
            smoothed.clamp(self.config.multiplier_min, self.config.multiplier_max)
        };

        KeywordPerformance {
            keyword: keyword.to_string(),
            wins,
            losses,
            neutrals,
            avg_return_pct,
            sample_size,
            multiplier,
        }
    }
}
