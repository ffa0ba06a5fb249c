// =============================================================================
// PR wire REST adapter
// =============================================================================
//
// Generic JSON press-release endpoint. The expected shape is an array (or an
// object with an `items`/`results` array) of records carrying title, url,
// summary, a publish timestamp, and optionally tickers. Field-level parse
// problems drop the record, never the batch.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::feeds::{extract_tickers, parse_feed_timestamp, FeedSource, NewsItem};

pub struct PrWireSource {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl PrWireSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(super::FEED_TIMEOUT_SECS))
            .user_agent("meridian-bot/1.0")
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }

    fn parse_records(&self, body: &serde_json::Value) -> Vec<NewsItem> {
        let records = if let Some(arr) = body.as_array() {
            arr.as_slice()
        } else if let Some(arr) = body.get("items").and_then(|v| v.as_array()) {
            arr.as_slice()
        } else if let Some(arr) = body.get("results").and_then(|v| v.as_array()) {
            arr.as_slice()
        } else {
            warn!(source = %self.name, "pr wire response has no items array");
            return Vec::new();
        };

        let mut items = Vec::new();
        for rec in records {
            let Some(title) = str_field(rec, &["title", "headline"]) else {
                continue;
            };
            let url = str_field(rec, &["url", "link", "article_url"]).unwrap_or_default();
            let summary =
                str_field(rec, &["summary", "description", "teaser"]).unwrap_or_default();

            let raw_ts =
                str_field(rec, &["published_utc", "published_at", "date", "created"])
                    .unwrap_or_default();
            let Some(published_at) = parse_feed_timestamp(&raw_ts) else {
                warn!(source = %self.name, title = %title, "skipping record with unparseable timestamp");
                continue;
            };

            // Provider-supplied tickers win; fall back to extraction.
            let mut tickers: Vec<String> = rec
                .get("tickers")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|t| t.as_str())
                        .map(|t| t.to_uppercase())
                        .collect()
                })
                .unwrap_or_default();
            if tickers.is_empty() {
                tickers = extract_tickers(&title);
            }

            let mut item =
                NewsItem::new(&self.name, &url, &title, &summary, published_at, tickers);
            item.raw_payload = Some(rec.clone());
            items.push(item);
        }

        items
    }
}

#[async_trait]
impl FeedSource for PrWireSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>> {
        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .json()
            .await
            .context("failed to parse pr wire response")?;

        let items = self.parse_records(&body);
        debug!(source = %self.name, count = items.len(), "pr wire parsed");
        Ok(items)
    }
}

fn str_field(rec: &serde_json::Value, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(s) = rec.get(*name).and_then(|v| v.as_str()) {
            if !s.trim().is_empty() {
                return Some(s.trim().to_string());
            }
        }
    }
    None
}
