// =============================================================================
// Keyword detection — curated catalyst lists with word-boundary matching
// =============================================================================
//
// Detection is deterministic: lowercase the text once, then scan each curated
// pattern with word boundaries on both sides. Every hit contributes the
// keyword's canonical id to `keyword_hits` and its category to `tags`.
// =============================================================================

use std::collections::BTreeSet;

/// One curated keyword: a canonical id, the phrases that trigger it, and
/// whether a hit is bearish on its own.
struct KeywordDef {
    id: &'static str,
    category: &'static str,
    patterns: &'static [&'static str],
    negative: bool,
}

/// Curated catalyst keywords grouped by category.
static KEYWORD_DEFS: &[KeywordDef] = &[
    // --- clinical / regulatory approvals ---------------------------------
    KeywordDef {
        id: "fda",
        category: "clinical",
        patterns: &["fda approval", "fda clearance", "fda fast track", "fda"],
        negative: false,
    },
    KeywordDef {
        id: "clinical",
        category: "clinical",
        patterns: &[
            "clinical trial",
            "phase 1",
            "phase 2",
            "phase 3",
            "topline results",
            "primary endpoint",
            "breakthrough therapy",
        ],
        negative: false,
    },
    // --- M&A --------------------------------------------------------------
    KeywordDef {
        id: "merger",
        category: "mna",
        patterns: &["merger", "merge with", "definitive agreement to merge"],
        negative: false,
    },
    KeywordDef {
        id: "acquisition",
        category: "mna",
        patterns: &["acquisition", "acquires", "to acquire", "buyout", "takeover"],
        negative: false,
    },
    KeywordDef {
        id: "partnership",
        category: "mna",
        patterns: &[
            "partnership",
            "strategic collaboration",
            "joint venture",
            "collaboration agreement",
        ],
        negative: false,
    },
    // --- offerings / dilution ---------------------------------------------
    KeywordDef {
        id: "offering",
        category: "offerings",
        patterns: &[
            "offering",
            "public offering",
            "direct offering",
            "registered direct",
            "at-the-market",
            "shelf registration",
        ],
        negative: true,
    },
    KeywordDef {
        id: "dilution",
        category: "offerings",
        patterns: &["dilution", "dilutive"],
        negative: true,
    },
    KeywordDef {
        id: "warrant_exercise",
        category: "offerings",
        patterns: &["warrant exercise", "exercise of warrants", "warrant"],
        negative: true,
    },
    // --- guidance / results -----------------------------------------------
    KeywordDef {
        id: "guidance",
        category: "guidance",
        patterns: &["raises guidance", "raised guidance", "guidance", "outlook"],
        negative: false,
    },
    KeywordDef {
        id: "earnings_beat",
        category: "guidance",
        patterns: &["record revenue", "beats estimates", "exceeds expectations"],
        negative: false,
    },
    KeywordDef {
        id: "contract",
        category: "guidance",
        patterns: &["contract award", "purchase order", "wins contract", "awarded contract"],
        negative: false,
    },
    // --- regulatory / distress --------------------------------------------
    KeywordDef {
        id: "bankruptcy",
        category: "regulatory",
        patterns: &["bankruptcy", "chapter 11", "chapter 7", "insolvency"],
        negative: true,
    },
    KeywordDef {
        id: "fraud",
        category: "regulatory",
        patterns: &["fraud", "sec investigation", "subpoena", "accounting irregularities"],
        negative: true,
    },
    KeywordDef {
        id: "delisting",
        category: "regulatory",
        patterns: &["delisting", "delisted", "listing deficiency", "non-compliance notice"],
        negative: true,
    },
];

/// Result of scanning one item's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordHits {
    /// Canonical keyword ids that matched.
    pub hits: BTreeSet<String>,
    /// Categories of the matched keywords.
    pub categories: BTreeSet<String>,
    /// The subset of hits that are bearish on their own.
    pub negative_hits: BTreeSet<String>,
}

impl KeywordHits {
    pub fn has_negative(&self) -> bool {
        !self.negative_hits.is_empty()
    }
}

/// Scan title + summary for curated keywords.
pub fn detect(title: &str, summary: &str) -> KeywordHits {
    let text = format!("{} {}", title, summary).to_lowercase();

    let mut result = KeywordHits::default();
    for def in KEYWORD_DEFS {
        if def.patterns.iter().any(|p| contains_word(&text, p)) {
            result.hits.insert(def.id.to_string());
            result.categories.insert(def.category.to_string());
            if def.negative {
                result.negative_hits.insert(def.id.to_string());
            }
        }
    }
    result
}

/// Category of a canonical keyword id, for regime multipliers.
pub fn category_of(keyword_id: &str) -> Option<&'static str> {
    KEYWORD_DEFS
        .iter()
        .find(|d| d.id == keyword_id)
        .map(|d| d.category)
}

/// Word-boundary substring search: the match must not be flanked by
/// alphanumeric characters.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .map_or(false, |c| c.is_alphanumeric());
        let after = abs + needle.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .map_or(false, |c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_boundary_respected() {
        assert!(contains_word("the fda approved it", "fda"));
        assert!(!contains_word("the fdax index rose", "fda"));
        assert!(contains_word("fda.", "fda"));
        assert!(contains_word("(fda)", "fda"));
    }

    #[test]
    fn fda_and_clinical_both_hit() {
        let hits = detect("XYZBIO Announces FDA Approval of Phase 3 Trial", "");
        assert!(hits.hits.contains("fda"));
        assert!(hits.hits.contains("clinical"));
        assert!(hits.categories.contains("clinical"));
        assert!(!hits.has_negative());
    }

    #[test]
    fn offering_is_negative_on_its_own() {
        let hits = detect("XYZ Corp Announces $100M Public Offering", "");
        assert!(hits.hits.contains("offering"));
        assert!(hits.negative_hits.contains("offering"));
        assert!(hits.has_negative());
    }

    #[test]
    fn partnership_detected() {
        let hits = detect("AAPL and GOOGL Announce AI Partnership", "");
        assert!(hits.hits.contains("partnership"));
        assert_eq!(category_of("partnership"), Some("mna"));
    }

    #[test]
    fn distress_keywords_negative() {
        let hits = detect("Acme Files for Chapter 11 Bankruptcy Protection", "");
        assert!(hits.negative_hits.contains("bankruptcy"));
    }

    #[test]
    fn detection_is_deterministic() {
        let a = detect("Merger of Acme and Zenith", "strategic collaboration too");
        let b = detect("Merger of Acme and Zenith", "strategic collaboration too");
        assert_eq!(a, b);
    }
}
