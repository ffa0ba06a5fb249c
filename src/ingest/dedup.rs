// =============================================================================
// Deduplication store — exact id match plus fuzzy title matching
// =============================================================================
//
// Two layers:
//   1. Exact: the stable item id (hash of source + url + title).
//   2. Fuzzy: Ratcliff/Obershelp similarity against a ring buffer of the
//      last M normalised titles. Wires routinely re-publish the same release
//      with a tweaked slug, so the id alone is not enough.
// =============================================================================

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::feeds::NewsItem;

pub struct DedupStore {
    seen_ids: HashSet<String>,
    recent_titles: VecDeque<String>,
    title_window: usize,
    similarity_threshold: f64,
}

impl DedupStore {
    pub fn new(title_window: usize, similarity_threshold: f64) -> Self {
        Self {
            seen_ids: HashSet::new(),
            recent_titles: VecDeque::with_capacity(title_window),
            title_window: title_window.max(1),
            similarity_threshold,
        }
    }

    /// True if the item was seen before, either by id or by near-identical
    /// title. Does not record the item.
    pub fn is_duplicate(&self, item: &NewsItem) -> bool {
        if self.seen_ids.contains(&item.id) {
            return true;
        }

        let title = normalize_title(&item.title);
        for seen in &self.recent_titles {
            let ratio = similarity(&title, seen);
            if ratio >= self.similarity_threshold {
                debug!(
                    title = %item.title,
                    ratio = format!("{ratio:.3}"),
                    "fuzzy title duplicate"
                );
                return true;
            }
        }
        false
    }

    /// Record the item as seen.
    pub fn record(&mut self, item: &NewsItem) {
        self.seen_ids.insert(item.id.clone());
        self.recent_titles.push_back(normalize_title(&item.title));
        while self.recent_titles.len() > self.title_window {
            self.recent_titles.pop_front();
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Ratcliff/Obershelp sequence similarity
// ---------------------------------------------------------------------------

/// Similarity ratio in [0, 1]: 2·matches / (len_a + len_b), where matches is
/// the total length of recursively longest matching blocks.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (pos_a, pos_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..pos_a], &b[..pos_b])
        + matching_chars(&a[pos_a + len..], &b[pos_b + len..])
}

fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    if a.is_empty() || b.is_empty() {
        return (0, 0, 0);
    }
    // DP over block lengths ending at (i, j).
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut curr = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let len = prev[j] + 1;
                curr[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = curr;
    }
    best
}
