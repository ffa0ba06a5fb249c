// =============================================================================
// Multi-ticker relevance scoring — which ticker is the story actually about?
// =============================================================================
//
// Scoring per candidate ticker:
//   - Title presence: up to 50 points, decreasing linearly with character
//     offset from the start of the title.
//   - First-paragraph presence (first 300 chars of the summary): 30 points.
//   - Mention frequency across title + summary: min(count * 5, 20) points.
//
// Primary selection: keep tickers scoring at or above the threshold
// (default 40). If two or more qualify and the gap between the top two is
// more than 30 points, the story is clearly about the leader and only the
// leader is primary. Otherwise the top two are true co-subjects.
// =============================================================================

use tracing::debug;

use crate::classify::keywords::contains_word;
use crate::feeds::NewsItem;

/// Points a title mention is worth at offset zero.
const TITLE_MAX_POINTS: f64 = 50.0;
/// Points for appearing in the first paragraph.
const PARAGRAPH_POINTS: f64 = 30.0;
/// Per-mention frequency points and their cap.
const FREQ_POINTS_PER_MENTION: f64 = 5.0;
const FREQ_POINTS_CAP: f64 = 20.0;
/// First-paragraph window, characters.
const PARAGRAPH_WINDOW: usize = 300;
/// Score gap above which the leader is clearly the subject.
const CLEAR_LEADER_GAP: f64 = 30.0;

/// Relevance score for one ticker within one item.
pub fn score_ticker(item: &NewsItem, ticker: &str) -> f64 {
    let ticker_lower = ticker.to_lowercase();
    let title_lower = item.title.to_lowercase();
    let summary_lower = item.summary.to_lowercase();

    let mut score = 0.0;

    // Title presence with linear positional decay.
    if let Some(offset) = find_word(&title_lower, &ticker_lower) {
        let title_len = title_lower.chars().count().max(1) as f64;
        let decay = 1.0 - (offset as f64 / title_len);
        score += TITLE_MAX_POINTS * decay.max(0.0);
    }

    // First paragraph (first 300 chars of the summary).
    let paragraph: String = summary_lower.chars().take(PARAGRAPH_WINDOW).collect();
    if contains_word(&paragraph, &ticker_lower) {
        score += PARAGRAPH_POINTS;
    }

    // Mention frequency across title + summary.
    let count = count_word(&title_lower, &ticker_lower) + count_word(&summary_lower, &ticker_lower);
    score += (count as f64 * FREQ_POINTS_PER_MENTION).min(FREQ_POINTS_CAP);

    score
}

/// Split an item's candidate tickers into primaries and secondaries.
///
/// Returns `(primaries, secondaries)`. Secondaries are metadata only and
/// never generate an independent alert.
pub fn select_primaries(
    item: &NewsItem,
    min_relevance: f64,
) -> (Vec<(String, f64)>, Vec<String>) {
    let mut scored: Vec<(String, f64)> = item
        .tickers
        .iter()
        .map(|t| (t.clone(), score_ticker(item, t)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let qualified: Vec<(String, f64)> = scored
        .iter()
        .filter(|(_, s)| *s >= min_relevance)
        .cloned()
        .collect();

    let primaries: Vec<(String, f64)> = match qualified.len() {
        0 => Vec::new(),
        1 => qualified,
        _ => {
            let gap = qualified[0].1 - qualified[1].1;
            if gap > CLEAR_LEADER_GAP {
                vec![qualified[0].clone()]
            } else {
                qualified.into_iter().take(2).collect()
            }
        }
    };

    let secondaries: Vec<String> = scored
        .into_iter()
        .map(|(t, _)| t)
        .filter(|t| !primaries.iter().any(|(p, _)| p == t))
        .collect();

    debug!(
        title = %item.title,
        primaries = ?primaries,
        secondaries = ?secondaries,
        "relevance scoring complete"
    );

    (primaries, secondaries)
}

/// Offset of the first word-boundary occurrence, in characters.
fn find_word(haystack: &str, needle: &str) -> Option<usize> {
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
            return Some(haystack[..abs].chars().count());
        }
        start = abs + needle.len();
    }
    None
}

fn count_word(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
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
            count += 1;
        }
        start = abs + needle.len();
    }
    count
}
