// =============================================================================
// SEC EDGAR adapter — poll of recent filings
// =============================================================================
//
// Polls the EDGAR recent-filings JSON endpoint. Each hit becomes a NewsItem
// with source "sec_edgar" so the freshness filter applies the longer filing
// window. The filing form type (8-K, S-3, 424B5, ...) is prefixed onto the
// title; the offering-stage detector keys off exactly these shapes.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::feeds::{parse_feed_timestamp, FeedSource, NewsItem, EDGAR_SOURCE};

pub struct EdgarSource {
    url: String,
    client: reqwest::Client,
}

impl EdgarSource {
    pub fn new(url: impl Into<String>) -> Self {
        // EDGAR requires a descriptive User-Agent and rejects anonymous ones.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(super::FEED_TIMEOUT_SECS))
            .user_agent("meridian-bot/1.0 ops@meridian.example")
            .build()
            .expect("failed to build reqwest client");

        Self {
            url: url.into(),
            client,
        }
    }

    fn parse_hits(&self, body: &serde_json::Value) -> Vec<NewsItem> {
        let hits = body
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default();

        let mut items = Vec::new();
        for hit in hits {
            let src = hit.get("_source").unwrap_or(hit);

            let form = src
                .get("form_type")
                .or_else(|| src.get("file_type"))
                .and_then(|v| v.as_str())
                .unwrap_or("FILING");
            let company = src
                .get("display_names")
                .and_then(|v| v.as_array())
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .or_else(|| src.get("company_name").and_then(|v| v.as_str()))
                .unwrap_or("Unknown Issuer");

            let raw_ts = src
                .get("file_date")
                .or_else(|| src.get("filed_at"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let Some(published_at) = parse_feed_timestamp(raw_ts)
                .or_else(|| parse_filing_date(raw_ts))
            else {
                warn!(company = %company, raw_ts = %raw_ts, "skipping filing with unparseable date");
                continue;
            };

            let accession = src
                .get("accession_no")
                .or_else(|| src.get("_id"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let url = format!("https://www.sec.gov/Archives/edgar/{accession}");

            let tickers: Vec<String> = src
                .get("tickers")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|t| t.as_str())
                        .map(|t| t.to_uppercase())
                        .collect()
                })
                .unwrap_or_default();

            let title = format!("{form}: {company}");
            let summary = src
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let mut item =
                NewsItem::new(EDGAR_SOURCE, &url, &title, &summary, published_at, tickers);
            item.raw_payload = Some(src.clone());
            items.push(item);
        }

        items
    }
}

/// EDGAR file_date is a bare date; treat it as midnight UTC.
fn parse_filing_date(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let date = chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(chrono::DateTime::from_naive_utc_and_offset(
        naive,
        chrono::Utc,
    ))
}

#[async_trait]
impl FeedSource for EdgarSource {
    fn name(&self) -> &str {
        EDGAR_SOURCE
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
            .context("failed to parse EDGAR response")?;

        let items = self.parse_hits(&body);
        debug!(count = items.len(), "edgar filings parsed");
        Ok(items)
    }
}
