// =============================================================================
// Keyword configurations — catalyst class to trade parameters
// =============================================================================
//
// The static table maps each recognised catalyst keyword to its base
// confidence, stop/target distances and size multiplier. Two special
// classes sit outside the table:
//
//   AVOID keywords  -> the signal is SKIP, always.
//   CLOSE keywords  -> close any open position in the ticker.
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    pub id: &'static str,
    pub category: &'static str,
    pub base_confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub size_multiplier: f64,
}

/// Catalyst table. Order breaks base-confidence ties.
pub static KEYWORD_CONFIGS: &[KeywordConfig] = &[
    KeywordConfig {
        id: "fda",
        category: "clinical",
        base_confidence: 0.92,
        stop_loss_pct: 5.0,
        take_profit_pct: 12.0,
        size_multiplier: 1.6,
    },
    KeywordConfig {
        id: "merger",
        category: "mna",
        base_confidence: 0.95,
        stop_loss_pct: 4.0,
        take_profit_pct: 15.0,
        size_multiplier: 2.0,
    },
    KeywordConfig {
        id: "acquisition",
        category: "mna",
        base_confidence: 0.90,
        stop_loss_pct: 4.5,
        take_profit_pct: 14.0,
        size_multiplier: 1.7,
    },
    KeywordConfig {
        id: "partnership",
        category: "mna",
        base_confidence: 0.85,
        stop_loss_pct: 5.0,
        take_profit_pct: 10.0,
        size_multiplier: 1.4,
    },
    KeywordConfig {
        id: "clinical",
        category: "clinical",
        base_confidence: 0.85,
        stop_loss_pct: 5.5,
        take_profit_pct: 12.0,
        size_multiplier: 1.5,
    },
];

/// Never trade into these.
pub static AVOID_KEYWORDS: &[&str] = &["offering", "dilution", "warrant_exercise"];

/// Get out if these hit a ticker we hold.
pub static CLOSE_KEYWORDS: &[&str] = &["bankruptcy", "fraud", "delisting"];

/// Pick the config for a set of keyword hits: highest base confidence wins,
/// ties broken by table order.
pub fn match_config<'a, I>(hits: I) -> Option<&'static KeywordConfig>
where
    I: IntoIterator<Item = &'a str>,
{
    let hits: Vec<&str> = hits.into_iter().collect();
    let mut best: Option<&'static KeywordConfig> = None;
    for config in KEYWORD_CONFIGS {
        if hits.contains(&config.id) {
            let better = match best {
                // Strictly greater preserves table order on ties.
                Some(b) => config.base_confidence > b.base_confidence,
                None => true,
            };
            if better {
                best = Some(config);
            }
        }
    }
    best
}

pub fn has_avoid_keyword<'a, I>(hits: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    hits.into_iter().any(|h| AVOID_KEYWORDS.contains(&h))
}

pub fn has_close_keyword<'a, I>(hits: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    hits.into_iter().any(|h| CLOSE_KEYWORDS.contains(&h))
}
