// =============================================================================
// Event Replayer — priority queue of typed historical events
// =============================================================================
//
// Feed items, price updates, and SEC filings are typed events ordered by
// timestamp in a min-heap. On each tick the replayer pops everything with
// `timestamp <= clock.now()` and the harness dispatches them into the
// normal pipeline.
// =============================================================================

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feeds::NewsItem;

/// One historical event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimEvent {
    News { item: NewsItem },
    Filing { item: NewsItem },
    PriceUpdate {
        ticker: String,
        price: f64,
        volume: f64,
        at: DateTime<Utc>,
    },
}

impl SimEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::News { item } | Self::Filing { item } => item.published_at,
            Self::PriceUpdate { at, .. } => *at,
        }
    }
}

// Heap ordering by timestamp; a monotonically increasing sequence number
// keeps same-instant events in insertion order.
#[derive(Debug, Clone)]
struct QueuedEvent {
    at: DateTime<Utc>,
    seq: u64,
    event: SimEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for QueuedEvent {}
impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
pub struct EventReplayer {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_seq: u64,
}

impl EventReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        let queued = QueuedEvent {
            at: event.timestamp(),
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(queued));
    }

    /// Load a JSONL fixture, one SimEvent per line.
    pub fn load_fixture(&mut self, content: &str) -> usize {
        let mut loaded = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<SimEvent>(line) {
                self.push(event);
                loaded += 1;
            }
        }
        loaded
    }

    /// Pop every event due at or before `now`, in timestamp order.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<SimEvent> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.at > now {
                break;
            }
            let Reverse(head) = self.heap.pop().expect("peeked");
            due.push(head.event);
        }
        due
    }

    /// Timestamp of the next queued event.
    pub fn next_at(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(q)| q.at)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, minute, 0).unwrap()
    }

    fn price_event(ticker: &str, minute: u32) -> SimEvent {
        SimEvent::PriceUpdate {
            ticker: ticker.to_string(),
            price: 5.0,
            volume: 1000.0,
            at: t(minute),
        }
    }

    #[test]
    fn pops_in_timestamp_order() {
        let mut replayer = EventReplayer::new();
        replayer.push(price_event("B", 20));
        replayer.push(price_event("A", 5));
        replayer.push(price_event("C", 10));

        let due = replayer.pop_due(t(30));
        let minutes: Vec<u32> = due
            .iter()
            .map(|e| e.timestamp().format("%M").to_string().parse().unwrap())
            .collect();
        assert_eq!(minutes, vec![5, 10, 20]);
    }

    #[test]
    fn only_due_events_pop() {
        let mut replayer = EventReplayer::new();
        replayer.push(price_event("A", 5));
        replayer.push(price_event("B", 20));

        let due = replayer.pop_due(t(10));
        assert_eq!(due.len(), 1);
        assert_eq!(replayer.len(), 1);
        assert_eq!(replayer.next_at(), Some(t(20)));
    }

    #[test]
    fn boundary_is_inclusive() {
        let mut replayer = EventReplayer::new();
        replayer.push(price_event("A", 10));
        let due = replayer.pop_due(t(10));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn same_instant_preserves_insertion_order() {
        let mut replayer = EventReplayer::new();
        replayer.push(price_event("FIRST", 10));
        replayer.push(price_event("SECOND", 10));
        let due = replayer.pop_due(t(10));
        match (&due[0], &due[1]) {
            (
                SimEvent::PriceUpdate { ticker: a, .. },
                SimEvent::PriceUpdate { ticker: b, .. },
            ) => {
                assert_eq!(a, "FIRST");
                assert_eq!(b, "SECOND");
            }
            _ => panic!("unexpected event kinds"),
        }
    }

    #[test]
    fn fixture_roundtrip() {
        let event = price_event("ACME", 7);
        let line = serde_json::to_string(&event).unwrap();
        let mut replayer = EventReplayer::new();
        let loaded = replayer.load_fixture(&format!("{line}\n\n{line}\n"));
        assert_eq!(loaded, 2);
        assert_eq!(replayer.len(), 2);
    }
}
