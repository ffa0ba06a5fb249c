// =============================================================================
// Classification & Scoring Engine
// =============================================================================
//
// Pipeline per item:
//   retrospective gate -> keyword detection -> sentiment aggregation ->
//   offering-stage correction -> multi-ticker relevance -> ScoredItem(s)
//
// The combine step is pure: all I/O (LLM, social endpoints) happens in
// `SentimentAggregator::collect` beforehand. Classifying the same item with
// the same readings twice yields byte-identical results, which is why the
// set-typed fields are BTree containers.
// =============================================================================

pub mod keywords;
pub mod offering_stage;
pub mod relevance;
pub mod retrospective;
pub mod sentiment;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feeds::NewsItem;
use crate::runtime_config::RuntimeConfig;
use crate::types::{AlertType, RejectionReason};

use offering_stage::{StageDetection, STAGE_CONFIDENCE_THRESHOLD};
use sentiment::{SentimentAggregator, SourceReading};

/// Sentiment at or above this is a POSITIVE alert; the band between is
/// NEUTRAL.
const POSITIVE_ALERT_THRESHOLD: f64 = 0.15;

// ---------------------------------------------------------------------------
// ScoredItem
// ---------------------------------------------------------------------------

/// Classification result for one primary ticker of one news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: NewsItem,
    pub primary_ticker: String,
    pub secondary_tickers: Vec<String>,
    /// Relevance points for the primary ticker.
    pub relevance_score: f64,
    /// Published sentiment, bounded to [-1, 1] after every adjustment.
    pub sentiment: f64,
    /// Sentiment before the sector adjustment, kept for diagnostics.
    pub sentiment_original: f64,
    pub sentiment_confidence: f64,
    pub keyword_hits: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub alert_type: AlertType,
    /// Optional enrichment fields; consumers tolerate missing keys.
    #[serde(default)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl ScoredItem {
    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extras.get(key).and_then(|v| v.as_f64())
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct Classifier {
    aggregator: SentimentAggregator,
}

impl Classifier {
    pub fn new(aggregator: SentimentAggregator) -> Self {
        Self { aggregator }
    }

    /// Full classification: collect sentiment readings, then combine.
    pub async fn classify(
        &self,
        item: &NewsItem,
        cfg: &RuntimeConfig,
    ) -> Result<Vec<ScoredItem>, RejectionReason> {
        let readings = self.aggregator.collect(item).await;
        classify_with_readings(item, &readings, cfg)
    }
}

/// Pure combine step. Same item + same readings gives identical output.
pub fn classify_with_readings(
    item: &NewsItem,
    readings: &[SourceReading],
    cfg: &RuntimeConfig,
) -> Result<Vec<ScoredItem>, RejectionReason> {
    // 1. Retrospective coverage never reaches scoring.
    if retrospective::is_retrospective(&item.title) {
        return Err(RejectionReason::Retrospective);
    }

    // 2. Keywords.
    let kw = keywords::detect(&item.title, &item.summary);

    // 3. Aggregated sentiment.
    let (mut sentiment, sentiment_confidence) = sentiment::aggregate(readings);

    // 4. Offering-stage correction, before alert-type assignment.
    let stage = offering_stage::detect(&item.title, &item.summary)
        .filter(|d| d.confidence >= STAGE_CONFIDENCE_THRESHOLD);
    let mut negative = kw.has_negative();
    let mut tags: BTreeSet<String> = kw.categories.clone();

    if let Some(StageDetection { stage, .. }) = stage {
        sentiment = stage.sentiment();
        negative = stage.is_negative();
        tags.insert(stage.tag().to_string());
        if !stage.is_negative() {
            // Closing/debt are not dilution; drop the bearish offering tag.
            tags.remove("offerings");
        }
        debug!(
            title = %item.title,
            stage = %stage,
            sentiment,
            "offering-stage override applied"
        );
    }

    sentiment = sentiment.clamp(-1.0, 1.0);

    // 5. Alert type: negative keywords minus offering-stage corrections.
    let alert_type = if negative {
        AlertType::Negative
    } else if sentiment >= POSITIVE_ALERT_THRESHOLD {
        AlertType::Positive
    } else {
        AlertType::Neutral
    };

    // 6. Primary ticker selection.
    let (primaries, secondaries) = if cfg.feature_multi_ticker_scoring {
        relevance::select_primaries(item, cfg.multi_ticker_min_relevance_score)
    } else {
        match item.tickers.first() {
            Some(t) => (
                vec![(t.clone(), cfg.multi_ticker_min_relevance_score)],
                item.tickers.iter().skip(1).cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    };

    if primaries.is_empty() {
        return Err(RejectionReason::LowRelevance);
    }

    let scored = primaries
        .into_iter()
        .map(|(ticker, relevance_score)| ScoredItem {
            item: item.clone(),
            primary_ticker: ticker,
            secondary_tickers: secondaries.clone(),
            relevance_score,
            sentiment,
            sentiment_original: sentiment,
            sentiment_confidence,
            keyword_hits: kw.hits.clone(),
            tags: tags.clone(),
            alert_type,
            extras: BTreeMap::new(),
        })
        .collect();

    Ok(scored)
}
