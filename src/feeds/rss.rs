// =============================================================================
// RSS / Atom feed adapter
// =============================================================================
//
// Wire feeds are plain RSS 2.0 (<item>) or Atom (<entry>). We only need four
// fields per entry, so a small tag scanner over the body is enough; entries
// with missing or unparseable fields are skipped with a warning and never
// fail the batch.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::feeds::{extract_tickers, parse_feed_timestamp, FeedSource, NewsItem};

pub struct RssFeedSource {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl RssFeedSource {
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

    fn parse_body(&self, body: &str) -> Vec<NewsItem> {
        let mut items = Vec::new();

        // RSS 2.0 first, Atom as the fallback.
        let blocks: Vec<&str> = if body.contains("<item>") || body.contains("<item ") {
            extract_blocks(body, "item")
        } else {
            extract_blocks(body, "entry")
        };

        for block in blocks {
            let Some(title) = tag_text(block, "title") else {
                continue;
            };
            let url = tag_text(block, "link")
                .or_else(|| attr_of_tag(block, "link", "href"))
                .unwrap_or_default();
            let summary = tag_text(block, "description")
                .or_else(|| tag_text(block, "summary"))
                .unwrap_or_default();
            let raw_ts = tag_text(block, "pubDate")
                .or_else(|| tag_text(block, "updated"))
                .or_else(|| tag_text(block, "published"))
                .unwrap_or_default();

            let Some(published_at) = parse_feed_timestamp(&raw_ts) else {
                warn!(source = %self.name, title = %title, raw_ts = %raw_ts, "skipping entry with unparseable timestamp");
                continue;
            };

            let mut tickers = extract_tickers(&title);
            for t in extract_tickers(&summary) {
                if !tickers.contains(&t) {
                    tickers.push(t);
                }
            }

            items.push(NewsItem::new(
                &self.name,
                &url,
                &title,
                &summary,
                published_at,
                tickers,
            ));
        }

        items
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .text()
            .await
            .context("failed to read RSS body")?;

        let items = self.parse_body(&body);
        debug!(source = %self.name, count = items.len(), "rss feed parsed");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Tag scanning helpers
// ---------------------------------------------------------------------------

/// Collect the inner text of every `<tag>...</tag>` block.
fn extract_blocks<'a>(body: &'a str, tag: &str) -> Vec<&'a str> {
    let open_a = format!("<{tag}>");
    let open_b = format!("<{tag} ");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while cursor < body.len() {
        let rest = &body[cursor..];
        let start = match (rest.find(&open_a), rest.find(&open_b)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => break,
        };
        let content_start = match body[cursor + start..].find('>') {
            Some(gt) => cursor + start + gt + 1,
            None => break,
        };
        let Some(end) = body[content_start..].find(&close) else {
            break;
        };
        blocks.push(&body[content_start..content_start + end]);
        cursor = content_start + end + close.len();
    }

    blocks
}

/// Inner text of the first `<tag>` in `block`, CDATA unwrapped and entities
/// decoded.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open_a = format!("<{tag}>");
    let open_b = format!("<{tag} ");
    let close = format!("</{tag}>");

    let start = match (block.find(&open_a), block.find(&open_b)) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let content_start = block[start..].find('>')? + start + 1;
    let end = block[content_start..].find(&close)? + content_start;

    let mut text = block[content_start..end].trim().to_string();
    if let Some(inner) = text
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
    {
        text = inner.trim().to_string();
    }
    Some(decode_entities(&text))
}

/// Value of `attr` on the first `<tag ...>` element (Atom's `<link href=..>`).
fn attr_of_tag(block: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{tag} ");
    let start = block.find(&open)?;
    let elem_end = block[start..].find('>')? + start;
    let elem = &block[start..elem_end];
    let needle = format!("{attr}=\"");
    let v_start = elem.find(&needle)? + needle.len();
    let v_end = elem[v_start..].find('"')? + v_start;
    Some(elem[v_start..v_end].to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}
