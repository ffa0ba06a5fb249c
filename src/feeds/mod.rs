// =============================================================================
// Feed layer — heterogeneous news and regulatory sources behind one trait
// =============================================================================
//
// Every source adapter exposes `fetch() -> Vec<NewsItem>`. The engine treats
// all sources uniformly; per-source failures are isolated so a broken wire
// never takes down the cycle.
// =============================================================================

pub mod edgar;
pub mod prwire;
pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Per-source fetch deadline.
pub const FEED_TIMEOUT_SECS: u64 = 10;

/// Source name used by the EDGAR adapter. Items from this source get the
/// longer SEC freshness window.
pub const EDGAR_SOURCE: &str = "sec_edgar";

// ---------------------------------------------------------------------------
// NewsItem
// ---------------------------------------------------------------------------

/// A single normalised feed item. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Stable identifier: sha256 of source + url + title.
    pub id: String,
    pub source: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub raw_payload: Option<serde_json::Value>,
}

impl NewsItem {
    /// Build an item, deriving the stable id from source + url + title.
    pub fn new(
        source: &str,
        url: &str,
        title: &str,
        summary: &str,
        published_at: DateTime<Utc>,
        tickers: Vec<String>,
    ) -> Self {
        Self {
            id: stable_id(source, url, title),
            source: source.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            published_at,
            tickers,
            raw_payload: None,
        }
    }

    /// SEC filings carry a longer freshness window than wire news.
    pub fn is_sec_filing(&self) -> bool {
        self.source == EDGAR_SOURCE
    }
}

/// Stable content hash for dedup: sha256 over source, url and title.
pub fn stable_id(source: &str, url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// FeedSource capability
// ---------------------------------------------------------------------------

/// One configured inbound source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    /// Pull the current batch of items. Errors are per-source; the caller
    /// isolates them.
    async fn fetch(&self) -> anyhow::Result<Vec<NewsItem>>;
}

/// Fetch from every source concurrently with bounded fan-out.
///
/// A failing or timed-out source contributes an empty list and a warning;
/// it never aborts the cycle.
async fn fetch_one(source: &Box<dyn FeedSource>) -> Vec<NewsItem> {
    let deadline = std::time::Duration::from_secs(FEED_TIMEOUT_SECS);
    match tokio::time::timeout(deadline, source.fetch()).await {
        Ok(Ok(items)) => {
            debug!(source = source.name(), count = items.len(), "feed fetched");
            items
        }
        Ok(Err(e)) => {
            warn!(source = source.name(), error = %e, "feed fetch failed");
            Vec::new()
        }
        Err(_) => {
            warn!(
                source = source.name(),
                timeout_secs = FEED_TIMEOUT_SECS,
                "feed fetch timed out"
            );
            Vec::new()
        }
    }
}

pub async fn fetch_all(sources: &[Box<dyn FeedSource>], fanout: usize) -> Vec<NewsItem> {
    let fanout = fanout.max(1);

    let futures: Vec<_> = sources.iter().map(fetch_one).collect();
    let results: Vec<Vec<NewsItem>> = stream::iter(futures)
        .buffer_unordered(fanout)
        .collect()
        .await;

    results.into_iter().flatten().collect()
}

// ---------------------------------------------------------------------------
// Ticker extraction
// ---------------------------------------------------------------------------

const EXCHANGE_PREFIXES: [&str; 6] = ["NASDAQ:", "NYSE:", "AMEX:", "NYSEAMERICAN:", "OTC:", "CBOE:"];

/// Pull ticker symbols out of headline/body text.
///
/// Recognises the two shapes PR wires actually use:
///   - exchange-qualified: "(NASDAQ: ABCD)" / "(NYSE:XYZ)"
///   - cashtags: "$ABCD"
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let upper = text.to_uppercase();

    for prefix in EXCHANGE_PREFIXES {
        let mut start = 0;
        while let Some(pos) = upper[start..].find(prefix) {
            let after = start + pos + prefix.len();
            if let Some(sym) = read_symbol(&upper[after..]) {
                if !found.contains(&sym) {
                    found.push(sym);
                }
            }
            start = after;
        }
    }

    // Cashtags.
    let bytes = upper.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'$' {
            if let Some(sym) = read_symbol(&upper[i + 1..]) {
                if !found.contains(&sym) {
                    found.push(sym);
                }
            }
        }
    }

    found
}

/// Read a 1-5 letter uppercase symbol from the start of `s`, skipping
/// leading whitespace. Returns None if the run is not a plausible symbol.
fn read_symbol(s: &str) -> Option<String> {
    let trimmed = s.trim_start();
    let sym: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_uppercase())
        .collect();
    if (1..=5).contains(&sym.len()) {
        // Must terminate at a non-letter boundary.
        let rest = &trimmed[sym.len()..];
        if rest.chars().next().map_or(true, |c| !c.is_ascii_alphanumeric()) {
            return Some(sym);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Timestamp parsing shared by adapters
// ---------------------------------------------------------------------------

/// Parse the publish timestamps feeds actually emit. Timezone-naive values
/// are treated as UTC.
pub fn parse_feed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive formats: assume UTC.
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stable_id_is_deterministic() {
        let a = stable_id("wire", "https://x/1", "Title");
        let b = stable_id("wire", "https://x/1", "Title");
        let c = stable_id("wire", "https://x/2", "Title");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn extracts_exchange_qualified_tickers() {
        let t = "POET Technologies (NASDAQ: POET) and Acme (NYSE:ACM) partner";
        assert_eq!(extract_tickers(t), vec!["POET".to_string(), "ACM".to_string()]);
    }

    #[test]
    fn extracts_cashtags() {
        assert_eq!(extract_tickers("Watch $XYZB today"), vec!["XYZB".to_string()]);
    }

    #[test]
    fn rejects_overlong_symbol_runs() {
        assert!(extract_tickers("SEE $TOOLONGG run").is_empty());
    }

    #[test]
    fn naive_timestamp_treated_as_utc_roundtrip() {
        let parsed = parse_feed_timestamp("2025-06-02 14:30:00").unwrap();
        let expect = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        assert_eq!(parsed, expect);

        // naive -> UTC -> format -> parse preserves the instant
        let formatted = parsed.format("%Y-%m-%d %H:%M:%S").to_string();
        let reparsed = parse_feed_timestamp(&formatted).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn rfc2822_parses() {
        let parsed = parse_feed_timestamp("Mon, 02 Jun 2025 14:30:00 GMT").unwrap();
        let expect = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        assert_eq!(parsed, expect);
    }

    struct StaticSource {
        name: String,
        items: Vec<NewsItem>,
        fail: bool,
    }

    #[async_trait]
    impl FeedSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }
        async fn fetch(&self) -> anyhow::Result<Vec<NewsItem>> {
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(self.items.clone())
        }
    }

    #[tokio::test]
    async fn fetch_all_isolates_source_failures() {
        let ok_item = NewsItem::new(
            "a",
            "https://x/1",
            "hello",
            "",
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
            vec![],
        );
        let sources: Vec<Box<dyn FeedSource>> = vec![
            Box::new(StaticSource {
                name: "ok".into(),
                items: vec![ok_item.clone()],
                fail: false,
            }),
            Box::new(StaticSource {
                name: "broken".into(),
                items: vec![],
                fail: true,
            }),
        ];
        let items = fetch_all(&sources, 8).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, ok_item.id);
    }
}
