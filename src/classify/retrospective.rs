// =============================================================================
// Retrospective-sentiment filter — drop post-event explainers before scoring
// =============================================================================
//
// "Why Is Apple Trading Lower Today?" describes a move that already happened;
// trading it is chasing. These shapes are dropped before classification with
// rejection_reason = retrospective.
// =============================================================================

use crate::classify::keywords::contains_word;

/// Phrases that only appear in after-the-fact coverage.
static RETRO_PHRASES: &[&str] = &[
    "trading lower",
    "trading higher",
    "trading down",
    "trading up",
    "stock drops",
    "stock falls",
    "stock slides",
    "stock plunges",
    "stock jumps",
    "stock soars",
    "shares fall",
    "shares drop",
    "shares slide",
    "shares plunge",
    "shares jump",
    "shares soar",
    "earnings snapshot",
    "what happened",
    "here's why",
    "heres why",
    "market recap",
    "midday movers",
    "after-hours movers",
    "biggest movers",
];

/// Leading words that mark an explainer rather than an announcement.
static RETRO_LEADS: &[&str] = &["why ", "what's behind", "whats behind", "explained:"];

/// True when a title reads as post-event coverage.
pub fn is_retrospective(title: &str) -> bool {
    let lower = title.to_lowercase();

    if RETRO_LEADS.iter().any(|lead| lower.starts_with(lead)) {
        return true;
    }
    RETRO_PHRASES.iter().any(|p| contains_word(&lower, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The filter must block at least 80% of retrospective shapes and
    // almost never block genuinely prospective releases. These fixtures
    // mirror the live feed mix.

    static RETROSPECTIVE_TITLES: &[&str] = &[
        "Why Is Apple Trading Lower Today?",
        "Why NVDA Stock Jumps After Earnings",
        "Acme stock drops on earnings miss",
        "Q3 Earnings Snapshot: Zenith Mining",
        "What Happened With Acme Corp This Week",
        "Here's Why Zenith Shares Fall Despite Record Revenue",
        "Midday Movers: ABCD, EFGH, IJKL",
        "Acme shares plunge after guidance cut",
        "Market Recap: Stocks End Mixed",
        "Biggest Movers in Biotech Today",
    ];

    static PROSPECTIVE_TITLES: &[&str] = &[
        "POET Technologies Announces Closing of US$150 Million Registered Direct Offering",
        "XYZBIO Announces FDA Approval of Phase 3 Trial",
        "AAPL and GOOGL Announce AI Partnership",
        "Acme Corp Raises Full-Year Guidance",
        "Zenith Mining Wins $40M Contract Award",
        "Prospect Capital Announces Pricing of $167 Million Unsecured Notes Offering",
        "Acme Enters Definitive Agreement to Merge With Zenith",
        "XYZ Corp Announces $100M Public Offering",
        "Acme Receives FDA Fast Track Designation",
        "Zenith Reports Record Revenue for Fiscal 2025",
    ];

    #[test]
    fn blocks_at_least_80pct_of_retrospective_shapes() {
        let blocked = RETROSPECTIVE_TITLES
            .iter()
            .filter(|t| is_retrospective(t))
            .count();
        assert!(
            blocked * 10 >= RETROSPECTIVE_TITLES.len() * 8,
            "blocked only {blocked}/{}",
            RETROSPECTIVE_TITLES.len()
        );
    }

    #[test]
    fn passes_every_prospective_fixture() {
        for title in PROSPECTIVE_TITLES {
            assert!(!is_retrospective(title), "false positive: {title}");
        }
    }

    #[test]
    fn scenario_why_trading_lower_is_blocked() {
        assert!(is_retrospective("Why Is Apple Trading Lower Today?"));
    }
}
