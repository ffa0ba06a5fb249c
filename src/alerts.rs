// =============================================================================
// Alert sink — structured payloads for the downstream renderer
// =============================================================================
//
// The engine emits data; rendering (embeds, charts, gauges) lives on the
// other side of this seam. Color hint rule: NEGATIVE items are red,
// everything else is green or blue by price change.
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::ScoredItem;
use crate::types::AlertType;

/// Channel for catalyst alerts.
pub const CHANNEL_ALERTS: &str = "alerts";
/// Channel for operator/ops notifications (feed outages, reconciliation).
pub const CHANNEL_OPS: &str = "ops";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorHint {
    Green,
    Blue,
    Red,
}

/// Border color for an alert.
pub fn color_hint(alert_type: AlertType, change_pct: f64) -> ColorHint {
    match alert_type {
        AlertType::Negative => ColorHint::Red,
        _ => {
            if change_pct >= 0.0 {
                ColorHint::Green
            } else {
                ColorHint::Blue
            }
        }
    }
}

/// The structured alert payload. The renderer decides how many bubbles a
/// gauge gets; we ship the raw float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub ticker: String,
    pub title: String,
    pub url: String,
    pub sentiment: f64,
    pub sentiment_confidence: f64,
    /// Gauge value in [-1, 1], full precision.
    pub sentiment_gauge: f64,
    pub badges: Vec<String>,
    pub catalyst_tags: Vec<String>,
    pub color_hint: ColorHint,
    pub change_pct: f64,
}

impl AlertPayload {
    /// Build the payload for an accepted item.
    pub fn from_scored(scored: &ScoredItem) -> Self {
        let change_pct = scored.extra_f64("change_pct").unwrap_or(0.0);

        let mut badges = Vec::new();
        if let Some(rvol) = scored.extra_f64("rvol") {
            if rvol > 2.0 {
                badges.push(format!("RVOL {rvol:.1}x"));
            }
        }
        if let Some(float) = scored.extra_f64("float_shares") {
            if float < 20_000_000.0 {
                badges.push("LOW FLOAT".to_string());
            }
        }
        if scored
            .extras
            .get("market_regime")
            .and_then(|v| v.as_str())
            .map(|r| r == "HIGH_VOL")
            .unwrap_or(false)
        {
            badges.push("HIGH VOL TAPE".to_string());
        }

        Self {
            ticker: scored.primary_ticker.clone(),
            title: scored.item.title.clone(),
            url: scored.item.url.clone(),
            sentiment: scored.sentiment,
            sentiment_confidence: scored.sentiment_confidence,
            sentiment_gauge: scored.sentiment,
            badges,
            catalyst_tags: scored.tags.iter().cloned().collect(),
            color_hint: color_hint(scored.alert_type, change_pct),
            change_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn post_alert(&self, channel: &str, payload: &AlertPayload) -> anyhow::Result<()>;

    /// Plain-text operator notification.
    async fn post_operator(&self, channel: &str, message: &str) -> anyhow::Result<()>;
}

/// Default sink: structured log lines. A webhook sink slots in behind the
/// same trait in deployment.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn post_alert(&self, channel: &str, payload: &AlertPayload) -> anyhow::Result<()> {
        info!(
            channel,
            ticker = %payload.ticker,
            sentiment = format!("{:.2}", payload.sentiment),
            color = ?payload.color_hint,
            tags = ?payload.catalyst_tags,
            title = %payload.title,
            "ALERT"
        );
        Ok(())
    }

    async fn post_operator(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        warn!(channel, message, "OPERATOR ALERT");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_is_red_regardless_of_change() {
        assert_eq!(color_hint(AlertType::Negative, 5.0), ColorHint::Red);
        assert_eq!(color_hint(AlertType::Negative, -5.0), ColorHint::Red);
    }

    #[test]
    fn non_negative_follows_price() {
        assert_eq!(color_hint(AlertType::Positive, 3.0), ColorHint::Green);
        assert_eq!(color_hint(AlertType::Positive, -3.0), ColorHint::Blue);
        assert_eq!(color_hint(AlertType::Neutral, 0.0), ColorHint::Green);
    }

    #[test]
    fn gauge_keeps_full_precision() {
        use crate::classify::classify_with_readings;
        use crate::classify::sentiment::SourceReading;
        use crate::feeds::NewsItem;
        use chrono::TimeZone;

        let item = NewsItem::new(
            "wire",
            "https://x/1",
            "ACME wins record contract award",
            "ACME detail.",
            chrono::Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
            vec!["ACME".to_string()],
        );
        let readings = vec![SourceReading {
            source: "t".into(),
            weight: 1.0,
            score: 0.123456,
            confidence: 1.0,
        }];
        let scored = classify_with_readings(
            &item,
            &readings,
            &crate::runtime_config::RuntimeConfig::default(),
        )
        .unwrap()
        .remove(0);
        let payload = AlertPayload::from_scored(&scored);
        assert!((payload.sentiment_gauge - scored.sentiment).abs() < 1e-12);
    }
}
