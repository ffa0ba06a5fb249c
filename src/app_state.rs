// =============================================================================
// Central Application State — Meridian catalyst engine
// =============================================================================
//
// Long-lived state shared across the scheduler and the position monitor via
// `Arc<AppState>`. Per-cycle state (the price cache) deliberately does NOT
// live here; it belongs to the cycle that created it.
//
// Thread safety:
//   - Atomic counters for version tracking and outage detection.
//   - parking_lot locks for mutable shared collections.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::ingest::DedupStore;
use crate::runtime_config::RuntimeConfig;
use crate::trading::positions::PositionBook;
use crate::types::RejectionReason;

/// Maximum number of recent rejections kept for inspection.
const MAX_RECENT_REJECTIONS: usize = 200;

/// A rejection entry for the in-memory ring (the full record goes to
/// rejected_items.jsonl).
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRecord {
    pub title: String,
    pub reason: RejectionReason,
    pub at: DateTime<Utc>,
}

pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    /// Cross-cycle dedup memory.
    pub dedup: Mutex<DedupStore>,

    /// Local position cache (broker remains the source of truth).
    pub position_book: Arc<PositionBook>,

    // ── Feed-outage detection (mutated only by the scheduler) ───────────
    pub consecutive_empty_cycles: AtomicU32,
    pub outage_alerted: AtomicBool,

    // ── Diagnostics ─────────────────────────────────────────────────────
    pub recent_rejections: RwLock<Vec<RejectionRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let dedup = DedupStore::new(config.dedup_title_window, config.dedup_similarity);
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            dedup: Mutex::new(dedup),
            position_book: Arc::new(PositionBook::new()),
            consecutive_empty_cycles: AtomicU32::new(0),
            outage_alerted: AtomicBool::new(false),
            recent_rejections: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Track one empty/non-empty cycle for outage detection. Returns true
    /// exactly once per outage, when the threshold is crossed.
    pub fn track_cycle_emptiness(&self, was_empty: bool, threshold: u32) -> bool {
        if !was_empty {
            self.consecutive_empty_cycles.store(0, Ordering::SeqCst);
            self.outage_alerted.store(false, Ordering::SeqCst);
            return false;
        }

        let count = self.consecutive_empty_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= threshold && !self.outage_alerted.swap(true, Ordering::SeqCst) {
            return true;
        }
        false
    }

    pub fn push_rejection(&self, title: &str, reason: RejectionReason, at: DateTime<Utc>) {
        let mut rejections = self.recent_rejections.write();
        rejections.push(RejectionRecord {
            title: title.to_string(),
            reason,
            at,
        });
        while rejections.len() > MAX_RECENT_REJECTIONS {
            rejections.remove(0);
        }
        self.increment_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outage_alert_fires_once_and_resets_on_recovery() {
        let state = AppState::new(RuntimeConfig::default());

        // Below threshold: no alert.
        for _ in 0..4 {
            assert!(!state.track_cycle_emptiness(true, 5));
        }
        // Crossing the threshold alerts exactly once.
        assert!(state.track_cycle_emptiness(true, 5));
        assert!(!state.track_cycle_emptiness(true, 5));
        assert!(!state.track_cycle_emptiness(true, 5));

        // A non-empty cycle resets the state machine.
        assert!(!state.track_cycle_emptiness(false, 5));
        for _ in 0..4 {
            assert!(!state.track_cycle_emptiness(true, 5));
        }
        assert!(state.track_cycle_emptiness(true, 5));
    }

    #[test]
    fn rejection_ring_is_bounded() {
        let state = AppState::new(RuntimeConfig::default());
        let at = Utc::now();
        for i in 0..(MAX_RECENT_REJECTIONS + 50) {
            state.push_rejection(&format!("t{i}"), RejectionReason::Duplicate, at);
        }
        assert_eq!(state.recent_rejections.read().len(), MAX_RECENT_REJECTIONS);
    }
}
