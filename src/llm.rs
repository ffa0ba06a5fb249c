// =============================================================================
// LLM capability — rate-limited, circuit-broken, schema-validated
// =============================================================================
//
// The model is a black box: `query(prompt, max_tokens) -> {text, usage}`.
// Responses must contain a `sentiment_analysis` object matching the schema
// below; anything that does not validate is ignored, never an error.
//
// Concurrency is capped by a token bucket (default 5 permits). Rate-limit
// errors open a circuit breaker for 60 s during which callers receive
// no-data immediately.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Per-call deadline for LLM requests.
pub const LLM_TIMEOUT_SECS: u64 = 15;

/// How long the breaker stays open after a rate-limit error.
const BREAKER_OPEN_SECS: u64 = 60;

/// Responses below this confidence are ignored entirely.
pub const LLM_MIN_CONFIDENCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage_tokens: u32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Ask the model. Implementations surface rate-limit refusals via an
    /// error whose display contains "rate limit".
    async fn query(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<LlmResponse>;
}

// ---------------------------------------------------------------------------
// Validated sentiment payload
// ---------------------------------------------------------------------------

/// The `sentiment_analysis` object the model must return.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSentiment {
    pub market_sentiment: String,
    pub confidence: f64,
    pub urgency: String,
    pub risk_level: String,
    pub institutional_interest: bool,
    pub retail_hype_score: f64,
    pub reasoning: String,
}

impl LlmSentiment {
    /// Map the categorical sentiment onto [-1, 1].
    pub fn score(&self) -> f64 {
        match self.market_sentiment.as_str() {
            "bullish" => 0.8,
            "bearish" => -0.8,
            _ => 0.0,
        }
    }
}

/// Validate the model's text output against the schema.
///
/// Returns None on any violation (missing field, out-of-range value,
/// unknown enum member) and on confidence below the 0.5 floor. Violations
/// are logged at WARN and otherwise ignored.
pub fn parse_sentiment_analysis(text: &str) -> Option<LlmSentiment> {
    let value: serde_json::Value = match serde_json::from_str(text.trim()) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "llm response is not JSON; ignoring");
            return None;
        }
    };

    let sa = value.get("sentiment_analysis")?;

    let market_sentiment = sa.get("market_sentiment")?.as_str()?.to_string();
    if !["bullish", "neutral", "bearish"].contains(&market_sentiment.as_str()) {
        warn!(market_sentiment = %market_sentiment, "unknown market_sentiment; ignoring");
        return None;
    }

    let confidence = sa.get("confidence")?.as_f64()?;
    if !(0.0..=1.0).contains(&confidence) {
        warn!(confidence, "confidence out of range; ignoring");
        return None;
    }

    let urgency = sa.get("urgency")?.as_str()?.to_string();
    if !["low", "medium", "high", "critical"].contains(&urgency.as_str()) {
        warn!(urgency = %urgency, "unknown urgency; ignoring");
        return None;
    }

    let risk_level = sa.get("risk_level")?.as_str()?.to_string();
    if !["low", "medium", "high"].contains(&risk_level.as_str()) {
        warn!(risk_level = %risk_level, "unknown risk_level; ignoring");
        return None;
    }

    let institutional_interest = sa.get("institutional_interest")?.as_bool()?;

    let retail_hype_score = sa.get("retail_hype_score")?.as_f64()?;
    if !(0.0..=1.0).contains(&retail_hype_score) {
        warn!(retail_hype_score, "retail_hype_score out of range; ignoring");
        return None;
    }

    let reasoning = sa.get("reasoning")?.as_str()?.to_string();

    // Low-conviction responses are noise.
    if confidence < LLM_MIN_CONFIDENCE {
        debug!(confidence, "llm confidence below floor; ignoring");
        return None;
    }

    Some(LlmSentiment {
        market_sentiment,
        confidence,
        urgency,
        risk_level,
        institutional_interest,
        retail_hype_score,
        reasoning,
    })
}

// ---------------------------------------------------------------------------
// HTTP client adapter
// ---------------------------------------------------------------------------

/// Thin adapter for any completion endpoint speaking
/// `POST {url} {"prompt", "max_tokens"}` -> `{"text", "usage"}`. The model
/// behind it is a black box.
pub struct HttpLlmClient {
    url: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn query(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<LlmResponse> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "prompt": prompt, "max_tokens": max_tokens }))
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            anyhow::bail!("rate limit: {}", resp.status());
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(LlmResponse {
            text: body
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            usage_tokens: body
                .pointer("/usage/total_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Open/closed breaker guarding an external dependency. Opening lasts a
/// fixed window; readers never block.
pub struct CircuitBreaker {
    open_until: RwLock<Option<Instant>>,
    open_window: Duration,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(BREAKER_OPEN_SECS))
    }

    pub fn with_window(open_window: Duration) -> Self {
        Self {
            open_until: RwLock::new(None),
            open_window,
        }
    }

    pub fn is_open(&self) -> bool {
        match *self.open_until.read() {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub fn trip(&self) {
        let until = Instant::now() + self.open_window;
        *self.open_until.write() = Some(until);
        warn!(open_secs = self.open_window.as_secs(), "circuit breaker opened");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Guarded gateway
// ---------------------------------------------------------------------------

/// Wraps an LlmClient with the token bucket, the per-call deadline, and the
/// circuit breaker. This is the only path the engine uses to reach the
/// model.
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
    breaker: CircuitBreaker,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, max_concurrency: usize) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            breaker: CircuitBreaker::new(),
        }
    }

    /// Query and validate. Every failure mode (breaker open, timeout,
    /// rate-limit, schema violation) collapses to None so the cycle
    /// continues.
    pub async fn sentiment_for(&self, prompt: &str) -> Option<LlmSentiment> {
        if self.breaker.is_open() {
            debug!("llm breaker open; skipping call");
            return None;
        }

        let _permit = self.permits.acquire().await.ok()?;

        let deadline = Duration::from_secs(LLM_TIMEOUT_SECS);
        let result = tokio::time::timeout(deadline, self.client.query(prompt, 512)).await;

        match result {
            Ok(Ok(resp)) => parse_sentiment_analysis(&resp.text),
            Ok(Err(e)) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("rate limit") || msg.contains("429") {
                    self.breaker.trip();
                } else {
                    warn!(error = %e, "llm query failed");
                }
                None
            }
            Err(_) => {
                warn!(timeout_secs = LLM_TIMEOUT_SECS, "llm query timed out");
                None
            }
        }
    }
}
