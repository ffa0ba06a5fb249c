// =============================================================================
// Ingestion filters — freshness and tradeable-universe gates
// =============================================================================
//
// Each filter returns `Ok(())` to pass or `Err(RejectionReason)` so the
// caller can log the rejection with its enumerated reason. No filter touches
// the network: the tradeable gate reads the per-cycle PriceCache that the
// batch fetch already populated.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::feeds::NewsItem;
use crate::market_data::PriceCache;
use crate::runtime_config::RuntimeConfig;
use crate::types::RejectionReason;

/// Freshness gate. The age check is inclusive: an item exactly at the
/// threshold is still fresh. Future-dated items have negative age and pass.
/// SEC filings get the longer window.
pub fn check_freshness(
    item: &NewsItem,
    now: DateTime<Utc>,
    cfg: &RuntimeConfig,
) -> Result<(), RejectionReason> {
    let max_age_minutes = if item.is_sec_filing() {
        cfg.max_sec_filing_age_minutes
    } else {
        cfg.max_article_age_minutes
    };

    let age = now.signed_duration_since(item.published_at);
    if age.num_seconds() <= max_age_minutes * 60 {
        Ok(())
    } else {
        Err(RejectionReason::StaleArticle)
    }
}

/// Tradeable-universe gate: exchange and price band.
///
/// An item passes if at least one of its tickers is tradeable. Items with no
/// tickers pass through; the classifier decides their fate on relevance.
pub fn check_tradeable(
    item: &NewsItem,
    prices: &PriceCache,
    cfg: &RuntimeConfig,
) -> Result<(), RejectionReason> {
    if item.tickers.is_empty() {
        return Ok(());
    }

    let mut saw_otc = false;
    let mut saw_out_of_band = false;

    for ticker in &item.tickers {
        let Some(quote) = prices.get(ticker) else {
            // Unpriced ticker: neither confirms nor rejects.
            continue;
        };

        if cfg.filter_otc_stocks && quote.is_otc() {
            saw_otc = true;
            continue;
        }
        if quote.last_price < cfg.min_price || quote.last_price > cfg.max_price {
            saw_out_of_band = true;
            continue;
        }
        // At least one tradeable ticker.
        return Ok(());
    }

    if saw_otc {
        Err(RejectionReason::OtcExchange)
    } else if saw_out_of_band {
        Err(RejectionReason::PriceBand)
    } else {
        // All tickers unpriced: let it through rather than guess.
        Ok(())
    }
}
