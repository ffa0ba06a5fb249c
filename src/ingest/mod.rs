// =============================================================================
// Ingestion pipeline — fresh, unique, tradeable items for the current cycle
// =============================================================================

pub mod dedup;
pub mod filters;

pub use dedup::DedupStore;
pub use filters::{check_freshness, check_tradeable};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::feeds::NewsItem;
use crate::types::RejectionReason;

/// Outcome of the dedup pass over one cycle's raw items.
pub struct DedupOutcome {
    pub fresh: Vec<NewsItem>,
    pub duplicates: Vec<NewsItem>,
}

/// Split `items` into first-seen and duplicates, recording the first-seen
/// ones in the store. Items inside the same batch dedup against each other
/// too (the same release often arrives on two wires in one cycle).
pub fn dedupe(items: Vec<NewsItem>, store: &mut DedupStore) -> DedupOutcome {
    let mut fresh = Vec::new();
    let mut duplicates = Vec::new();

    for item in items {
        if store.is_duplicate(&item) {
            duplicates.push(item);
        } else {
            store.record(&item);
            fresh.push(item);
        }
    }

    debug!(
        fresh = fresh.len(),
        duplicates = duplicates.len(),
        "dedup pass complete"
    );

    DedupOutcome { fresh, duplicates }
}

/// A rejected item paired with its enumerated reason, ready for the
/// rejection log.
pub struct Rejection {
    pub item: NewsItem,
    pub reason: RejectionReason,
    pub at: DateTime<Utc>,
}

/// Apply the freshness gate, splitting into kept and rejected.
pub fn filter_freshness(
    items: Vec<NewsItem>,
    now: DateTime<Utc>,
    cfg: &crate::runtime_config::RuntimeConfig,
) -> (Vec<NewsItem>, Vec<Rejection>) {
    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for item in items {
        match check_freshness(&item, now, cfg) {
            Ok(()) => kept.push(item),
            Err(reason) => rejected.push(Rejection { item, reason, at: now }),
        }
    }
    (kept, rejected)
}

/// Apply the tradeable-universe gate, splitting into kept and rejected.
/// Must run after the batch price fetch; it only reads the cycle cache.
pub fn filter_tradeable(
    items: Vec<NewsItem>,
    prices: &crate::market_data::PriceCache,
    now: DateTime<Utc>,
    cfg: &crate::runtime_config::RuntimeConfig,
) -> (Vec<NewsItem>, Vec<Rejection>) {
    let mut kept = Vec::new();
    let mut rejected = Vec::new();
    for item in items {
        match check_tradeable(&item, prices, cfg) {
            Ok(()) => kept.push(item),
            Err(reason) => rejected.push(Rejection { item, reason, at: now }),
        }
    }
    (kept, rejected)
}
