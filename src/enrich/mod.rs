// =============================================================================
// Market-Context Enrichment — microstructure snapshot at event time
// =============================================================================

pub mod float_data;
pub mod regime;
pub mod rvol;
pub mod sector;
pub mod vwap;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::ScoredItem;
use crate::market_data::{DailyBar, IndexSnapshot, MarketDataProvider, PriceCache};

use float_data::FloatProviderChain;
use regime::MarketRegime;
use rvol::{RvolCache, RvolCategory};
use sector::{SectorCache, SectorStrength};
use vwap::VwapBook;

/// ATR lookback period, daily bars.
const ATR_PERIOD: usize = 14;

// ---------------------------------------------------------------------------
// MarketContext
// ---------------------------------------------------------------------------

/// Snapshot of a ticker's market microstructure at event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub ticker: String,
    pub last_price: f64,
    pub prev_close: f64,
    pub change_pct: f64,
    pub rvol: f64,
    pub rvol_category: RvolCategory,
    pub float_shares: Option<f64>,
    pub short_interest_pct: Option<f64>,
    pub sector: String,
    pub sector_return_1d: f64,
    pub sector_vs_spy: f64,
    pub sector_strength: SectorStrength,
    pub market_regime: MarketRegime,
    pub vwap_break: bool,
    pub atr: Option<f64>,
    /// 20-day average daily volume, for liquidity caps downstream.
    pub avg_volume_20d: f64,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ATR
// ---------------------------------------------------------------------------

/// Average True Range over `period` daily bars. Returns None with fewer
/// than period + 1 bars.
pub fn compute_atr(bars: &[DailyBar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 || period == 0 {
        return None;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let prev_close = w[0].close;
        let bar = w[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        trs.push(tr);
    }

    let tail = &trs[trs.len().saturating_sub(period)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Attaches a MarketContext to each scored item. Holds every TTL cache so
/// repeat lookups inside and across cycles stay off the network.
pub struct Enricher {
    provider: Arc<dyn MarketDataProvider>,
    floats: FloatProviderChain,
    rvol_cache: RvolCache,
    sector_cache: SectorCache,
    pub vwap_book: VwapBook,
}

impl Enricher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, floats: FloatProviderChain) -> Self {
        Self {
            provider,
            floats,
            rvol_cache: RvolCache::new(),
            sector_cache: SectorCache::new(),
            vwap_book: VwapBook::new(),
        }
    }

    /// Build the context for one ticker. Quotes come from the per-cycle
    /// cache; only bars, float and index data can touch the network, each
    /// degrading to null on failure.
    pub async fn enrich(
        &self,
        ticker: &str,
        prices: &PriceCache,
        index: &IndexSnapshot,
        now: DateTime<Utc>,
    ) -> Option<MarketContext> {
        let quote = prices.get(ticker)?;

        // Feed the VWAP tracker with the freshest observation.
        self.vwap_book
            .update(ticker, quote.last_price, quote.volume.max(1.0));
        let vwap_break = self
            .vwap_book
            .state(ticker)
            .map(|s| s.vwap_break(true))
            .unwrap_or(false);

        let rvol = self
            .rvol_cache
            .get_or_compute(ticker, quote.volume, quote.avg_volume_20d, now);

        let float = self.floats.resolve(ticker).await;

        let sector_name = self.sector_for(ticker).await;
        let sector_ctx = self.sector_cache.resolve(&sector_name, index);
        let (sector_return_1d, sector_vs_spy, sector_strength) = match &sector_ctx {
            Some(ctx) => (ctx.sector_return_1d, ctx.sector_vs_spy, ctx.strength),
            None => (0.0, 0.0, SectorStrength::Neutral),
        };

        let market_regime = MarketRegime::classify(index);

        let atr = match self.provider.daily_bars(ticker, 30).await {
            Ok(bars) => compute_atr(&bars, ATR_PERIOD),
            Err(e) => {
                warn!(ticker, error = %e, "daily bars unavailable; atr left null");
                None
            }
        };

        debug!(
            ticker,
            rvol = format!("{rvol:.2}"),
            regime = %market_regime,
            sector_strength = %sector_strength,
            vwap_break,
            "context enriched"
        );

        Some(MarketContext {
            ticker: ticker.to_string(),
            last_price: quote.last_price,
            prev_close: quote.prev_close,
            change_pct: quote.change_pct,
            rvol,
            rvol_category: RvolCategory::from_rvol(rvol),
            float_shares: float.float_shares,
            short_interest_pct: float.short_interest_pct,
            sector: sector_name,
            sector_return_1d,
            sector_vs_spy,
            sector_strength,
            market_regime,
            vwap_break,
            atr,
            avg_volume_20d: quote.avg_volume_20d,
            captured_at: now,
        })
    }

    /// Primary sector for a ticker, from the data provider. Unknown sectors
    /// degrade to neutral context rather than failing enrichment.
    async fn sector_for(&self, ticker: &str) -> String {
        match self.provider.sector(ticker).await {
            Ok(Some(sector)) => sector,
            Ok(None) => "Unknown".to_string(),
            Err(e) => {
                warn!(ticker, error = %e, "sector lookup failed");
                "Unknown".to_string()
            }
        }
    }
}

/// Sector-adjusted sentiment:
/// `clamp(sentiment_original * (1 + adjustment), -1, 1)`, with the original
/// retained on the item for diagnostics.
pub fn apply_sector_adjustment(scored: &mut ScoredItem, ctx: &MarketContext) {
    let adjustment = ctx.sector_strength.sentiment_adjustment();
    scored.sentiment = (scored.sentiment_original * (1.0 + adjustment)).clamp(-1.0, 1.0);
    scored.extras.insert(
        "sector_adjustment".to_string(),
        serde_json::json!(adjustment),
    );
}

/// Record the enrichment results on the item's extras map so downstream
/// consumers tolerate missing fields with default-valued lookups.
pub fn attach_context_extras(scored: &mut ScoredItem, ctx: &MarketContext) {
    scored
        .extras
        .insert("rvol".to_string(), serde_json::json!(ctx.rvol));
    scored.extras.insert(
        "market_regime".to_string(),
        serde_json::json!(ctx.market_regime.to_string()),
    );
    scored.extras.insert(
        "sector_strength".to_string(),
        serde_json::json!(ctx.sector_strength.to_string()),
    );
    scored
        .extras
        .insert("last_price".to_string(), serde_json::json!(ctx.last_price));
    scored
        .extras
        .insert("change_pct".to_string(), serde_json::json!(ctx.change_pct));
    if let Some(float) = ctx.float_shares {
        scored
            .extras
            .insert("float_shares".to_string(), serde_json::json!(float));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_with_readings;
    use crate::feeds::NewsItem;
    use crate::runtime_config::RuntimeConfig;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn bars(n: usize) -> Vec<DailyBar> {
        (0..n)
            .map(|i| {
                let base = 10.0 + (i % 3) as f64 * 0.5;
                DailyBar {
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.2,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn atr_requires_enough_bars() {
        assert!(compute_atr(&bars(10), 14).is_none());
        let atr = compute_atr(&bars(30), 14).unwrap();
        assert!(atr > 0.0);
    }

    #[test]
    fn atr_of_flat_bars_is_range() {
        let flat: Vec<DailyBar> = (0..20)
            .map(|_| DailyBar {
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0,
                volume: 1.0,
            })
            .collect();
        let atr = compute_atr(&flat, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    fn scored_with_sentiment(sentiment: f64) -> ScoredItem {
        let item = NewsItem::new(
            "wire",
            "https://x/1",
            "ACME wins record contract award",
            "ACME announced a contract.",
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
            vec!["ACME".to_string()],
        );
        let readings = vec![crate::classify::sentiment::SourceReading {
            source: "test".into(),
            weight: 1.0,
            score: sentiment,
            confidence: 1.0,
        }];
        let mut scored = classify_with_readings(&item, &readings, &RuntimeConfig::default())
            .unwrap()
            .remove(0);
        scored.sentiment = sentiment;
        scored.sentiment_original = sentiment;
        scored
    }

    fn ctx_with_strength(strength: SectorStrength) -> MarketContext {
        MarketContext {
            ticker: "ACME".into(),
            last_price: 5.0,
            prev_close: 4.8,
            change_pct: 4.2,
            rvol: 1.5,
            rvol_category: RvolCategory::Moderate,
            float_shares: Some(20_000_000.0),
            short_interest_pct: None,
            sector: "Healthcare".into(),
            sector_return_1d: 1.0,
            sector_vs_spy: 0.8,
            sector_strength: strength,
            market_regime: MarketRegime::Bull,
            vwap_break: false,
            atr: Some(0.4),
            avg_volume_20d: 900_000.0,
            captured_at: Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap(),
        }
    }

    #[test]
    fn strong_sector_boosts_sentiment() {
        let mut scored = scored_with_sentiment(0.6);
        apply_sector_adjustment(&mut scored, &ctx_with_strength(SectorStrength::Strong));
        assert!((scored.sentiment - 0.69).abs() < 1e-9);
        assert!((scored.sentiment_original - 0.6).abs() < 1e-9);
    }

    #[test]
    fn weak_sector_trims_sentiment() {
        let mut scored = scored_with_sentiment(0.6);
        apply_sector_adjustment(&mut scored, &ctx_with_strength(SectorStrength::Weak));
        assert!((scored.sentiment - 0.51).abs() < 1e-9);
    }

    #[test]
    fn adjustment_clamps_at_one() {
        let mut scored = scored_with_sentiment(0.95);
        apply_sector_adjustment(&mut scored, &ctx_with_strength(SectorStrength::Strong));
        assert!(scored.sentiment <= 1.0);
    }

    #[test]
    fn extras_tolerate_missing_fields() {
        let scored = scored_with_sentiment(0.5);
        // No enrichment attached: lookups default rather than panic.
        assert_eq!(scored.extra_f64("rvol"), None);

        let mut scored = scored;
        let mut ctx = ctx_with_strength(SectorStrength::Neutral);
        ctx.float_shares = None;
        attach_context_extras(&mut scored, &ctx);
        assert_eq!(scored.extra_f64("rvol"), Some(1.5));
        assert_eq!(scored.extra_f64("float_shares"), None);
    }

    #[test]
    fn index_snapshot_helper() {
        let snap = IndexSnapshot {
            spy_last: 550.0,
            spy_sma_200: 500.0,
            spy_return_1d: 0.2,
            vix: 17.0,
            sector_returns_1d: HashMap::new(),
            sector_returns_5d: HashMap::new(),
        };
        assert_eq!(MarketRegime::classify(&snap), MarketRegime::Bull);
    }
}
