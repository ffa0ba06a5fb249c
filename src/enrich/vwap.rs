// =============================================================================
// Session VWAP — rolling volume-weighted price with break detection
// =============================================================================
//
// `vwap_break` is true once the intraday price has crossed below VWAP after
// having been above it (the long-side failure signal), or the mirror image
// for the short side. Trackers are per ticker, per session.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VwapState {
    cumulative_pv: f64,
    cumulative_volume: f64,
    /// Whether the last observed price sat above VWAP.
    was_above: Option<bool>,
    /// Crossed above -> below at some point this session.
    pub broke_below: bool,
    /// Crossed below -> above at some point this session.
    pub broke_above: bool,
}

impl VwapState {
    pub fn vwap(&self) -> Option<f64> {
        if self.cumulative_volume > 0.0 {
            Some(self.cumulative_pv / self.cumulative_volume)
        } else {
            None
        }
    }

    /// Feed one trade/bar observation.
    pub fn update(&mut self, price: f64, volume: f64) {
        if price <= 0.0 || volume <= 0.0 {
            return;
        }
        self.cumulative_pv += price * volume;
        self.cumulative_volume += volume;

        let vwap = self.cumulative_pv / self.cumulative_volume;
        let above = price > vwap;

        if let Some(was_above) = self.was_above {
            if was_above && !above {
                self.broke_below = true;
            }
            if !was_above && above {
                self.broke_above = true;
            }
        }
        self.was_above = Some(above);
    }

    /// Break signal for the given trade direction.
    pub fn vwap_break(&self, long: bool) -> bool {
        if long {
            self.broke_below
        } else {
            self.broke_above
        }
    }
}

/// Per-ticker VWAP trackers. `reset_session` clears everything at the open.
#[derive(Default)]
pub struct VwapBook {
    states: RwLock<HashMap<String, VwapState>>,
}

impl VwapBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, ticker: &str, price: f64, volume: f64) {
        self.states
            .write()
            .entry(ticker.to_string())
            .or_default()
            .update(price, volume);
    }

    pub fn state(&self, ticker: &str) -> Option<VwapState> {
        self.states.read().get(ticker).copied()
    }

    pub fn reset_session(&self) {
        self.states.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vwap_accumulates() {
        let mut s = VwapState::default();
        s.update(10.0, 100.0);
        s.update(12.0, 100.0);
        assert!((s.vwap().unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn break_below_requires_prior_above() {
        let mut s = VwapState::default();
        // Price rises above VWAP first, then collapses through it.
        s.update(10.0, 100.0);
        s.update(11.0, 100.0); // above
        s.update(8.0, 400.0); // drags vwap up relative to price -> below
        assert!(s.vwap_break(true));
        assert!(s.broke_below);
    }

    #[test]
    fn no_break_when_always_below() {
        let mut s = VwapState::default();
        s.update(10.0, 100.0);
        s.update(9.0, 100.0);
        s.update(8.5, 100.0);
        assert!(!s.vwap_break(true));
    }

    #[test]
    fn book_tracks_per_ticker_and_resets() {
        let book = VwapBook::new();
        book.update("ACME", 10.0, 100.0);
        book.update("ZEN", 5.0, 50.0);
        assert!(book.state("ACME").is_some());
        assert!(book.state("ZEN").is_some());
        book.reset_session();
        assert!(book.state("ACME").is_none());
    }
}
