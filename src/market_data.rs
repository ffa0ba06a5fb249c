// =============================================================================
// Market Data — quotes, bars, index snapshots behind one capability trait
// =============================================================================
//
// All unique tickers of a cycle are priced in ONE batch call; the resulting
// PriceCache serves every later lookup in that cycle and is cleared when the
// cycle ends. Per-item network fan-out is a bug, not a fallback.
//
// Transient network failures retry with exponential backoff (3 attempts,
// base 2 s) and then degrade to no-data so the cycle continues.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy for transient provider failures.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: u64 = 2;

// ---------------------------------------------------------------------------
// Quote types
// ---------------------------------------------------------------------------

/// Snapshot quote for one ticker, as returned by the batch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub last_price: f64,
    pub prev_close: f64,
    /// Day change in percent.
    pub change_pct: f64,
    /// Cumulative session volume.
    pub volume: f64,
    /// 20-day simple average daily volume.
    pub avg_volume_20d: f64,
    /// Primary listing exchange, e.g. "NASDAQ", "NYSE", "OTC".
    pub exchange: String,
}

impl Quote {
    /// OTC and pink-sheet listings are not tradeable here.
    pub fn is_otc(&self) -> bool {
        let ex = self.exchange.to_uppercase();
        ex.contains("OTC") || ex.contains("PINK") || ex.contains("GREY")
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Broad-market snapshot used by the regime classifier and sector context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub spy_last: f64,
    pub spy_sma_200: f64,
    pub spy_return_1d: f64,
    pub vix: f64,
    /// 1-day returns per sector ETF symbol (XLK, XLV, ...).
    pub sector_returns_1d: HashMap<String, f64>,
    /// 5-day returns per sector ETF symbol.
    pub sector_returns_5d: HashMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Per-cycle price cache
// ---------------------------------------------------------------------------

/// The only per-cycle price store. Populated once by the batch fetch, read
/// lock-free afterwards (callers hold a shared reference), cleared at cycle
/// end so memory stays bounded.
#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: HashMap<String, Quote>,
}

impl PriceCache {
    pub fn from_quotes(quotes: HashMap<String, Quote>) -> Self {
        Self { quotes }
    }

    pub fn get(&self, ticker: &str) -> Option<&Quote> {
        self.quotes.get(ticker)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Drop every cached quote. Called exactly once, at cycle end.
    pub fn clear(&mut self) {
        self.quotes.clear();
    }
}

// ---------------------------------------------------------------------------
// Provider capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Price every requested ticker in one call. Missing tickers are simply
    /// absent from the result.
    async fn batch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>>;

    /// Recent daily bars, oldest first.
    async fn daily_bars(&self, ticker: &str, days: u32) -> Result<Vec<DailyBar>>;

    /// Broad-market snapshot (SPY, VIX, sector ETF returns).
    async fn index_snapshot(&self) -> Result<IndexSnapshot>;

    /// Primary sector for a ticker, when the provider knows it.
    async fn sector(&self, _ticker: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Fraction of a full session's volume expected by `minute_of_session`
    /// (0 at the open, 1.0 at the close). Providers with per-minute history
    /// should override; the default is a U-shaped approximation.
    fn intraday_volume_fraction(&self, minute_of_session: u32) -> f64 {
        default_intraday_volume_fraction(minute_of_session)
    }
}

/// U-shaped intraday volume curve: heavy open, quiet lunch, heavy close.
/// Piecewise-linear over a 390-minute session.
pub fn default_intraday_volume_fraction(minute_of_session: u32) -> f64 {
    let m = minute_of_session.min(390) as f64;
    // Cumulative checkpoints: 30 min -> 22%, 120 min -> 45%, 270 min -> 65%,
    // 360 min -> 85%, close -> 100%.
    let points: [(f64, f64); 6] = [
        (0.0, 0.0),
        (30.0, 0.22),
        (120.0, 0.45),
        (270.0, 0.65),
        (360.0, 0.85),
        (390.0, 1.0),
    ];
    for w in points.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if m <= x1 {
            return y0 + (y1 - y0) * (m - x0) / (x1 - x0);
        }
    }
    1.0
}

// ---------------------------------------------------------------------------
// REST provider
// ---------------------------------------------------------------------------

/// Generic JSON quote provider.
///
/// Endpoints:
///   GET {base}/quotes?symbols=A,B,C
///   GET {base}/bars/{ticker}?days=N
///   GET {base}/indices
pub struct RestMarketData {
    base_url: String,
    client: reqwest::Client,
}

impl RestMarketData {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..RETRY_ATTEMPTS {
            if attempt > 0 {
                let backoff = RETRY_BASE_SECS * 2u64.pow(attempt - 1);
                warn!(url, attempt, backoff_secs = backoff, "retrying market data request");
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
            }

            match self.client.get(url).send().await {
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(body) => return Ok(body),
                    Err(e) => last_err = Some(e.into()),
                },
                Err(e) => last_err = Some(e.into()),
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow::anyhow!("request failed"));
        Err(err.context(format!("GET {url} exhausted retries")))
    }
}

#[async_trait]
impl MarketDataProvider for RestMarketData {
    async fn batch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/quotes?symbols={}", self.base_url, tickers.join(","));
        let body = self.get_json(&url).await?;

        let mut quotes = HashMap::new();
        let records = body
            .get("quotes")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default();

        for rec in records {
            let Some(ticker) = rec.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let last_price = num_field(rec, "last");
            let prev_close = num_field(rec, "prev_close");
            if last_price <= 0.0 {
                // Field-level parse problem: drop the quote, keep the batch.
                warn!(ticker, "dropping quote with invalid last price");
                continue;
            }
            let change_pct = if prev_close > 0.0 {
                (last_price - prev_close) / prev_close * 100.0
            } else {
                0.0
            };
            quotes.insert(
                ticker.to_uppercase(),
                Quote {
                    ticker: ticker.to_uppercase(),
                    last_price,
                    prev_close,
                    change_pct,
                    volume: num_field(rec, "volume"),
                    avg_volume_20d: num_field(rec, "avg_volume"),
                    exchange: rec
                        .get("exchange")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                },
            );
        }

        debug!(requested = tickers.len(), priced = quotes.len(), "batch quotes fetched");
        Ok(quotes)
    }

    async fn daily_bars(&self, ticker: &str, days: u32) -> Result<Vec<DailyBar>> {
        let url = format!("{}/bars/{}?days={}", self.base_url, ticker, days);
        let body = self.get_json(&url).await?;

        let bars = body
            .get("bars")
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|b| DailyBar {
                open: num_field(b, "o"),
                high: num_field(b, "h"),
                low: num_field(b, "l"),
                close: num_field(b, "c"),
                volume: num_field(b, "v"),
            })
            .collect();

        Ok(bars)
    }

    async fn sector(&self, ticker: &str) -> Result<Option<String>> {
        let url = format!("{}/profile/{}", self.base_url, ticker);
        let body = self.get_json(&url).await?;
        Ok(body
            .get("sector")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn index_snapshot(&self) -> Result<IndexSnapshot> {
        let url = format!("{}/indices", self.base_url);
        let body = self.get_json(&url).await?;

        let sector_map = |key: &str| -> HashMap<String, f64> {
            body.get(key)
                .and_then(|v| v.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(IndexSnapshot {
            spy_last: num_field(&body, "spy_last"),
            spy_sma_200: num_field(&body, "spy_sma_200"),
            spy_return_1d: num_field(&body, "spy_return_1d"),
            vix: num_field(&body, "vix"),
            sector_returns_1d: sector_map("sector_returns_1d"),
            sector_returns_5d: sector_map("sector_returns_5d"),
        })
    }
}

fn num_field(rec: &serde_json::Value, name: &str) -> f64 {
    rec.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0)
}
