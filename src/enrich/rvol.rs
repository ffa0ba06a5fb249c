// =============================================================================
// Relative Volume — time-of-day adjusted, cached five minutes
// =============================================================================
//
// Raw RVOL compares cumulative session volume against the 20-day average
// daily volume. Intraday that ratio is meaningless at 9:45 unless the
// denominator is scaled to how much volume a normal session has printed by
// the same minute, so the average is multiplied by the intraday volume
// fraction first.
//
// Categories: HIGH > 2.0, MODERATE 1.0-2.0, LOW < 1.0.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::market_data::default_intraday_volume_fraction;

/// RVOL values stay warm for this long.
const RVOL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Regular session open, minutes from UTC midnight (13:30 UTC).
const SESSION_OPEN_MINUTE: u32 = 13 * 60 + 30;
/// Session length in minutes.
const SESSION_MINUTES: u32 = 390;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RvolCategory {
    High,
    Moderate,
    Low,
}

impl RvolCategory {
    pub fn from_rvol(rvol: f64) -> Self {
        if rvol > 2.0 {
            Self::High
        } else if rvol >= 1.0 {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    /// Confidence multiplier applied by the signal generator.
    pub fn confidence_multiplier(self) -> f64 {
        match self {
            Self::High => 1.2,
            Self::Moderate => 1.0,
            Self::Low => 0.7,
        }
    }
}

impl std::fmt::Display for RvolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Minute offset into the regular session, clamped to [0, 390]. Outside
/// regular hours the session counts as complete.
pub fn minute_of_session(now: DateTime<Utc>) -> u32 {
    let minute_of_day = now.hour() * 60 + now.minute();
    if minute_of_day < SESSION_OPEN_MINUTE {
        return SESSION_MINUTES;
    }
    (minute_of_day - SESSION_OPEN_MINUTE).min(SESSION_MINUTES)
}

/// Time-of-day adjusted relative volume.
///
/// `cumulative_volume` is today's session volume so far; `avg_volume_20d`
/// the 20-day average full-session volume.
pub fn compute_rvol(cumulative_volume: f64, avg_volume_20d: f64, now: DateTime<Utc>) -> f64 {
    if avg_volume_20d <= 0.0 {
        return 0.0;
    }
    let fraction = default_intraday_volume_fraction(minute_of_session(now)).max(0.01);
    cumulative_volume / (avg_volume_20d * fraction)
}

/// Five-minute TTL cache of computed RVOL per ticker.
pub struct RvolCache {
    entries: RwLock<HashMap<String, (Instant, f64)>>,
    ttl: Duration,
}

impl RvolCache {
    pub fn new() -> Self {
        Self::with_ttl(RVOL_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get_or_compute(
        &self,
        ticker: &str,
        cumulative_volume: f64,
        avg_volume_20d: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        if let Some((at, rvol)) = self.entries.read().get(ticker) {
            if at.elapsed() < self.ttl {
                return *rvol;
            }
        }
        let rvol = compute_rvol(cumulative_volume, avg_volume_20d, now);
        self.entries
            .write()
            .insert(ticker.to_string(), (Instant::now(), rvol));
        rvol
    }
}

impl Default for RvolCache {
    fn default() -> Self {
        Self::new()
    }
}
