// =============================================================================
// Offering-stage correction — deterministic sentiment override
// =============================================================================
//
// Generic sentiment models label every offering as dilutive. A closed
// offering is cash in the bank and a notes offering is debt, not dilution,
// so those stages get a positive override instead of a red border.
//
// Stage table:
//   debt         +0.3   not negative
//   closing      +0.2   not negative
//   pricing      -0.5   negative
//   announcement -0.6   negative
//   upsize       -0.7   negative
//
// The override applies only when stage detection confidence >= 0.7.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::classify::keywords::contains_word;

/// Minimum detection confidence for the override to apply.
pub const STAGE_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferingStage {
    Debt,
    Closing,
    Pricing,
    Announcement,
    Upsize,
}

impl OfferingStage {
    /// Sentiment the stage overrides to.
    pub fn sentiment(self) -> f64 {
        match self {
            Self::Debt => 0.3,
            Self::Closing => 0.2,
            Self::Pricing => -0.5,
            Self::Announcement => -0.6,
            Self::Upsize => -0.7,
        }
    }

    /// Whether this stage still counts toward a NEGATIVE alert.
    pub fn is_negative(self) -> bool {
        matches!(self, Self::Pricing | Self::Announcement | Self::Upsize)
    }

    /// Tag recorded on the scored item, e.g. "offering_closing".
    pub fn tag(self) -> &'static str {
        match self {
            Self::Debt => "offering_debt",
            Self::Closing => "offering_closing",
            Self::Pricing => "offering_pricing",
            Self::Announcement => "offering_announcement",
            Self::Upsize => "offering_upsize",
        }
    }
}

impl std::fmt::Display for OfferingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debt => write!(f, "debt"),
            Self::Closing => write!(f, "closing"),
            Self::Pricing => write!(f, "pricing"),
            Self::Announcement => write!(f, "announcement"),
            Self::Upsize => write!(f, "upsize"),
        }
    }
}

/// A detected stage with the detector's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageDetection {
    pub stage: OfferingStage,
    pub confidence: f64,
}

/// Detect the offering stage from title + summary.
///
/// Precedence mirrors how releases are actually worded: debt instruments
/// first (a "pricing of notes" release is a debt story, not an equity
/// pricing), then closing, upsize, pricing, and finally the bare
/// announcement.
pub fn detect(title: &str, summary: &str) -> Option<StageDetection> {
    let text = format!("{} {}", title, summary).to_lowercase();

    // Must be an offering context at all.
    let offering_context = ["offering", "notes", "bonds", "debentures"]
        .iter()
        .any(|w| contains_word(&text, w));
    if !offering_context {
        return None;
    }

    let debt_terms = [
        "notes offering",
        "unsecured notes",
        "convertible notes",
        "senior notes",
        "bonds",
        "debentures",
        "debt offering",
    ];
    if debt_terms.iter().any(|p| contains_word(&text, p)) {
        return Some(StageDetection {
            stage: OfferingStage::Debt,
            confidence: 0.9,
        });
    }

    if contains_word(&text, "closing of") || contains_word(&text, "closes") && contains_word(&text, "offering") {
        return Some(StageDetection {
            stage: OfferingStage::Closing,
            confidence: 0.9,
        });
    }

    if contains_word(&text, "upsize") || contains_word(&text, "upsized") {
        return Some(StageDetection {
            stage: OfferingStage::Upsize,
            confidence: 0.85,
        });
    }

    if contains_word(&text, "pricing of") || contains_word(&text, "prices") && contains_word(&text, "offering") {
        return Some(StageDetection {
            stage: OfferingStage::Pricing,
            confidence: 0.85,
        });
    }

    if contains_word(&text, "announces") || contains_word(&text, "proposed") {
        return Some(StageDetection {
            stage: OfferingStage::Announcement,
            confidence: 0.8,
        });
    }

    // Offering context but no recognisable stage wording.
    Some(StageDetection {
        stage: OfferingStage::Announcement,
        confidence: 0.5,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_of_registered_direct_offering() {
        let d = detect(
            "POET Technologies Announces Closing of US$150 Million Oversubscribed Registered Direct Offering",
            "",
        )
        .unwrap();
        assert_eq!(d.stage, OfferingStage::Closing);
        assert!(d.confidence >= STAGE_CONFIDENCE_THRESHOLD);
        assert!((d.stage.sentiment() - 0.2).abs() < 1e-9);
        assert!(!d.stage.is_negative());
    }

    #[test]
    fn pricing_of_notes_is_debt_not_equity_pricing() {
        let d = detect(
            "Prospect Capital Corporation Announces Pricing of $167 Million Unsecured Notes Offering",
            "",
        )
        .unwrap();
        assert_eq!(d.stage, OfferingStage::Debt);
        assert!((d.stage.sentiment() - 0.3).abs() < 1e-9);
        assert!(!d.stage.is_negative());
    }

    #[test]
    fn bare_announcement_is_negative() {
        let d = detect("XYZ Corp Announces $100M Public Offering", "").unwrap();
        assert_eq!(d.stage, OfferingStage::Announcement);
        assert!(d.confidence >= STAGE_CONFIDENCE_THRESHOLD);
        assert!((d.stage.sentiment() - -0.6).abs() < 1e-9);
        assert!(d.stage.is_negative());
    }

    #[test]
    fn equity_pricing_detected() {
        let d = detect("Acme Announces Pricing of Public Offering of Common Stock", "").unwrap();
        // "announces" also matches, but pricing takes precedence.
        assert_eq!(d.stage, OfferingStage::Pricing);
        assert!(d.stage.is_negative());
    }

    #[test]
    fn upsize_detected() {
        let d = detect("Acme Announces Upsized Public Offering", "").unwrap();
        assert_eq!(d.stage, OfferingStage::Upsize);
    }

    #[test]
    fn non_offering_text_yields_none() {
        assert!(detect("Acme wins $40M contract award", "").is_none());
    }
}
