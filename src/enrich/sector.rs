// =============================================================================
// Sector context — ticker sector -> sector ETF -> strength vs SPY
// =============================================================================
//
// STRONG  when sector 1-day return beats SPY by more than +0.5%
// WEAK    when it trails by more than -0.5%
// NEUTRAL otherwise
//
// Sector strength nudges published sentiment by +/-15%; lookups cache for
// 15 minutes.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::IndexSnapshot;

/// Sector lookups stay warm for this long.
const SECTOR_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Strength classification band, percent vs SPY.
const STRENGTH_BAND_PCT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectorStrength {
    Strong,
    Neutral,
    Weak,
}

impl SectorStrength {
    /// Sentiment adjustment factor for this strength.
    pub fn sentiment_adjustment(self) -> f64 {
        match self {
            Self::Strong => 0.15,
            Self::Neutral => 0.0,
            Self::Weak => -0.15,
        }
    }

    pub fn classify(sector_vs_spy_pct: f64) -> Self {
        if sector_vs_spy_pct > STRENGTH_BAND_PCT {
            Self::Strong
        } else if sector_vs_spy_pct < -STRENGTH_BAND_PCT {
            Self::Weak
        } else {
            Self::Neutral
        }
    }
}

impl std::fmt::Display for SectorStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "STRONG"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Weak => write!(f, "WEAK"),
        }
    }
}

/// Map a primary sector name onto its tracking ETF.
pub fn sector_etf(sector: &str) -> Option<&'static str> {
    let key = sector.to_lowercase();
    let etf = if key.contains("tech") {
        "XLK"
    } else if key.contains("health") || key.contains("biotech") || key.contains("pharma") {
        "XLV"
    } else if key.contains("energy") {
        "XLE"
    } else if key.contains("financ") || key.contains("bank") {
        "XLF"
    } else if key.contains("consumer discretionary") || key.contains("retail") {
        "XLY"
    } else if key.contains("consumer staples") || key.contains("staples") {
        "XLP"
    } else if key.contains("industrial") {
        "XLI"
    } else if key.contains("utilit") {
        "XLU"
    } else if key.contains("material") || key.contains("mining") {
        "XLB"
    } else if key.contains("real estate") {
        "XLRE"
    } else if key.contains("communication") || key.contains("media") {
        "XLC"
    } else {
        return None;
    };
    Some(etf)
}

/// Snapshot of one sector's standing at event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorContext {
    pub sector: String,
    pub etf: String,
    pub sector_return_1d: f64,
    pub sector_vs_spy: f64,
    pub strength: SectorStrength,
}

/// TTL cache of sector contexts keyed by sector name.
pub struct SectorCache {
    entries: RwLock<HashMap<String, (Instant, SectorContext)>>,
    ttl: Duration,
}

impl SectorCache {
    pub fn new() -> Self {
        Self::with_ttl(SECTOR_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve a sector's context from the index snapshot, serving from
    /// cache when fresh.
    pub fn resolve(&self, sector: &str, snapshot: &IndexSnapshot) -> Option<SectorContext> {
        if let Some((at, ctx)) = self.entries.read().get(sector) {
            if at.elapsed() < self.ttl {
                return Some(ctx.clone());
            }
        }

        let etf = sector_etf(sector)?;
        let sector_return_1d = *snapshot.sector_returns_1d.get(etf)?;
        let sector_vs_spy = sector_return_1d - snapshot.spy_return_1d;
        let ctx = SectorContext {
            sector: sector.to_string(),
            etf: etf.to_string(),
            sector_return_1d,
            sector_vs_spy,
            strength: SectorStrength::classify(sector_vs_spy),
        };

        debug!(sector, etf, sector_vs_spy, strength = %ctx.strength, "sector context resolved");
        self.entries
            .write()
            .insert(sector.to_string(), (Instant::now(), ctx.clone()));
        Some(ctx)
    }
}

impl Default for SectorCache {
    fn default() -> Self {
        Self::new()
    }
}
