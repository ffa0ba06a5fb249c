// =============================================================================
// Sentiment aggregation — confidence-weighted ensemble over many sources
// =============================================================================
//
// Contract per source: `(score in [-1, 1], confidence in [0, 1])`, or no
// data. The aggregate is a confidence-weighted average; absent sources are
// omitted and the remaining weights renormalise. Local sources run
// synchronously; external sources sit behind timeouts and the circuit
// breaker and degrade to no-data.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::feeds::NewsItem;
use crate::llm::LlmGateway;

// ---------------------------------------------------------------------------
// Source capability
// ---------------------------------------------------------------------------

/// One sentiment reading: score and the source's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceScore {
    pub score: f64,
    pub confidence: f64,
}

#[async_trait]
pub trait SentimentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Ensemble weight of this source before renormalisation.
    fn weight(&self) -> f64;

    /// Score the item, or None when the source has nothing to say.
    async fn score(&self, item: &NewsItem) -> Option<SourceScore>;
}

/// A collected reading, kept for diagnostics alongside the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub source: String,
    pub weight: f64,
    pub score: f64,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct SentimentAggregator {
    sources: Vec<Arc<dyn SentimentSource>>,
}

impl SentimentAggregator {
    pub fn new(sources: Vec<Arc<dyn SentimentSource>>) -> Self {
        Self { sources }
    }

    /// Collect a reading from every source that has one. This is the only
    /// I/O step of classification; the combine step below is pure.
    pub async fn collect(&self, item: &NewsItem) -> Vec<SourceReading> {
        let mut readings = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if let Some(s) = source.score(item).await {
                readings.push(SourceReading {
                    source: source.name().to_string(),
                    weight: source.weight(),
                    score: s.score.clamp(-1.0, 1.0),
                    confidence: s.confidence.clamp(0.0, 1.0),
                });
            }
        }
        debug!(
            item = %item.title,
            present = readings.len(),
            configured = self.sources.len(),
            "sentiment readings collected"
        );
        readings
    }
}

/// Combine readings into `(sentiment, confidence)`.
///
/// sentiment  = sum(w_i * c_i * s_i) / sum(w_i * c_i)
/// confidence = sum(w_i * c_i) / sum(w_i)        over present sources
///
/// No readings at all yields a neutral (0.0, 0.0).
pub fn aggregate(readings: &[SourceReading]) -> (f64, f64) {
    if readings.is_empty() {
        return (0.0, 0.0);
    }

    let weight_sum: f64 = readings.iter().map(|r| r.weight).sum();
    let conf_weight_sum: f64 = readings.iter().map(|r| r.weight * r.confidence).sum();

    if conf_weight_sum <= f64::EPSILON || weight_sum <= f64::EPSILON {
        return (0.0, 0.0);
    }

    let sentiment: f64 = readings
        .iter()
        .map(|r| r.weight * r.confidence * r.score)
        .sum::<f64>()
        / conf_weight_sum;

    let confidence = conf_weight_sum / weight_sum;

    (sentiment.clamp(-1.0, 1.0), confidence.clamp(0.0, 1.0))
}

// ---------------------------------------------------------------------------
// Headline lexical source
// ---------------------------------------------------------------------------

/// Lexicon scorer over general news wording. Fast, always available.
pub struct HeadlineLexicalSource;

static POSITIVE_WORDS: &[&str] = &[
    "approval", "approved", "wins", "awarded", "breakthrough", "record",
    "beats", "exceeds", "surges", "partnership", "milestone", "successful",
    "positive", "raises", "expands", "growth", "oversubscribed",
];

static NEGATIVE_WORDS: &[&str] = &[
    "bankruptcy", "fraud", "delisting", "investigation", "recall", "halts",
    "misses", "lawsuit", "downgrade", "warning", "deficiency", "default",
    "dilution", "offering", "layoffs", "resigns", "negative",
];

#[async_trait]
impl SentimentSource for HeadlineLexicalSource {
    fn name(&self) -> &str {
        "headline_lexical"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    async fn score(&self, item: &NewsItem) -> Option<SourceScore> {
        let text = format!("{} {}", item.title, item.summary).to_lowercase();
        let pos = POSITIVE_WORDS
            .iter()
            .filter(|w| super::keywords::contains_word(&text, w))
            .count();
        let neg = NEGATIVE_WORDS
            .iter()
            .filter(|w| super::keywords::contains_word(&text, w))
            .count();

        let total = pos + neg;
        if total == 0 {
            return None;
        }

        let score = (pos as f64 - neg as f64) / total as f64;
        let confidence = (0.3 + 0.1 * total as f64).min(0.8);
        Some(SourceScore { score, confidence })
    }
}

// ---------------------------------------------------------------------------
// Domain lexicon source
// ---------------------------------------------------------------------------

/// Finance-specific phrase scorer. Fewer hits, stronger conviction.
pub struct DomainLexiconSource;

static DOMAIN_PHRASES: &[(&str, f64)] = &[
    ("fda approval", 0.9),
    ("fda clearance", 0.85),
    ("breakthrough therapy", 0.8),
    ("definitive agreement", 0.7),
    ("merger", 0.6),
    ("acquisition", 0.55),
    ("record revenue", 0.7),
    ("raises guidance", 0.75),
    ("contract award", 0.6),
    ("public offering", -0.6),
    ("dilution", -0.7),
    ("going concern", -0.85),
    ("chapter 11", -0.95),
    ("sec investigation", -0.8),
    ("delisting", -0.85),
    ("clinical hold", -0.75),
    ("missed interest payment", -0.9),
];

#[async_trait]
impl SentimentSource for DomainLexiconSource {
    fn name(&self) -> &str {
        "domain_lexicon"
    }

    fn weight(&self) -> f64 {
        1.5
    }

    async fn score(&self, item: &NewsItem) -> Option<SourceScore> {
        let text = format!("{} {}", item.title, item.summary).to_lowercase();
        let matched: Vec<f64> = DOMAIN_PHRASES
            .iter()
            .filter(|(p, _)| super::keywords::contains_word(&text, p))
            .map(|(_, v)| *v)
            .collect();

        if matched.is_empty() {
            return None;
        }

        let score = matched.iter().sum::<f64>() / matched.len() as f64;
        let confidence = (0.5 + 0.1 * matched.len() as f64).min(0.9);
        Some(SourceScore { score, confidence })
    }
}

// ---------------------------------------------------------------------------
// Provider-supplied sentiment
// ---------------------------------------------------------------------------

/// Some wires attach their own sentiment to the raw payload; use it when
/// present.
pub struct ProviderSentimentSource;

#[async_trait]
impl SentimentSource for ProviderSentimentSource {
    fn name(&self) -> &str {
        "news_provider"
    }

    fn weight(&self) -> f64 {
        0.8
    }

    async fn score(&self, item: &NewsItem) -> Option<SourceScore> {
        let payload = item.raw_payload.as_ref()?;
        let raw = payload.get("sentiment")?;

        let score = if let Some(n) = raw.as_f64() {
            n.clamp(-1.0, 1.0)
        } else {
            match raw.as_str()? {
                "positive" | "bullish" => 0.6,
                "negative" | "bearish" => -0.6,
                "neutral" => 0.0,
                _ => return None,
            }
        };

        let confidence = payload
            .get("sentiment_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.6)
            .clamp(0.0, 1.0);

        Some(SourceScore { score, confidence })
    }
}

// ---------------------------------------------------------------------------
// LLM source
// ---------------------------------------------------------------------------

/// The model behind its gateway (token bucket, deadline, breaker). All of
/// its failure modes degrade to no-data.
pub struct LlmSentimentSource {
    gateway: Arc<LlmGateway>,
}

impl LlmSentimentSource {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    fn prompt_for(item: &NewsItem) -> String {
        format!(
            "Analyze this catalyst headline for a low-priced equity and reply with \
             a JSON object containing a `sentiment_analysis` object \
             (market_sentiment, confidence, urgency, risk_level, \
             institutional_interest, retail_hype_score, reasoning).\n\
             Headline: {}\nSummary: {}",
            item.title, item.summary
        )
    }
}

#[async_trait]
impl SentimentSource for LlmSentimentSource {
    fn name(&self) -> &str {
        "llm"
    }

    fn weight(&self) -> f64 {
        2.0
    }

    async fn score(&self, item: &NewsItem) -> Option<SourceScore> {
        let analysis = self.gateway.sentiment_for(&Self::prompt_for(item)).await?;
        Some(SourceScore {
            score: analysis.score(),
            confidence: analysis.confidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Social aggregate source (community platform / forum aggregator)
// ---------------------------------------------------------------------------

/// External social sentiment endpoint returning `{score, confidence}` for a
/// ticker. Two instances cover the community platform and the forum
/// aggregator. Failures trip a shared-nothing breaker per instance.
pub struct SocialAggregateSource {
    name: String,
    url: String,
    weight: f64,
    client: reqwest::Client,
    breaker: crate::llm::CircuitBreaker,
}

impl SocialAggregateSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, weight: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: name.into(),
            url: url.into(),
            weight,
            client,
            breaker: crate::llm::CircuitBreaker::new(),
        }
    }
}

#[async_trait]
impl SentimentSource for SocialAggregateSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn score(&self, item: &NewsItem) -> Option<SourceScore> {
        if self.breaker.is_open() {
            return None;
        }
        let ticker = item.tickers.first()?;
        let url = format!("{}?symbol={}", self.url, ticker);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(_) => {
                self.breaker.trip();
                return None;
            }
        };
        if resp.status().as_u16() == 429 {
            self.breaker.trip();
            return None;
        }

        let body: serde_json::Value = resp.json().await.ok()?;
        let score = body.get("score")?.as_f64()?.clamp(-1.0, 1.0);
        let confidence = body
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        Some(SourceScore { score, confidence })
    }
}
