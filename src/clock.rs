// =============================================================================
// Clock provider — real time for live trading, virtual time for replay
// =============================================================================
//
// Every time read and every sleep in the engine goes through a SharedClock so
// that the simulation harness can replay a historical day deterministically.
//
// VirtualClock semantics:
//   - `now()` returns the virtual instant.
//   - `sleep(s)` advances virtual time by `s` seconds and blocks for `s / k`
//     real seconds, where `k` is the speed multiplier. `k = 0` means instant:
//     virtual time advances, no real blocking at all.
//   - `jump_to(ts)` moves virtual time forward (or backward) directly.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Clock capability shared by every subsystem.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant, UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `secs` seconds of engine time.
    async fn sleep(&self, secs: f64);
}

pub type SharedClock = Arc<dyn Clock>;

// ---------------------------------------------------------------------------
// System clock
// ---------------------------------------------------------------------------

/// Wall-clock implementation used in live/paper mode.
#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

/// Deterministic clock for the simulation harness.
pub struct VirtualClock {
    now: RwLock<DateTime<Utc>>,
    /// Speed multiplier `k`. `sleep(s)` blocks `s / k` real seconds; 0 means
    /// no real blocking.
    speed: f64,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>, speed: f64) -> Self {
        Self {
            now: RwLock::new(start),
            speed: speed.max(0.0),
        }
    }

    /// Move virtual time to `ts` directly.
    pub fn jump_to(&self, ts: DateTime<Utc>) {
        *self.now.write() = ts;
    }

    /// Advance virtual time by `secs` without blocking.
    pub fn advance_secs(&self, secs: f64) {
        let mut now = self.now.write();
        *now += chrono::Duration::milliseconds((secs * 1000.0) as i64);
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    async fn sleep(&self, secs: f64) {
        self.advance_secs(secs);
        if self.speed > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs / self.speed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 13, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn virtual_sleep_advances_without_blocking_at_speed_zero() {
        let clock = VirtualClock::new(t0(), 0.0);
        let started = std::time::Instant::now();
        clock.sleep(3600.0).await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(clock.now(), t0() + chrono::Duration::hours(1));
    }

    #[test]
    fn jump_to_moves_time() {
        let clock = VirtualClock::new(t0(), 0.0);
        let later = t0() + chrono::Duration::minutes(90);
        clock.jump_to(later);
        assert_eq!(clock.now(), later);
    }

    #[tokio::test]
    async fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
