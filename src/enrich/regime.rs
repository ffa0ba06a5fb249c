// =============================================================================
// Market Regime — SPY trend vs 200-day SMA crossed with the VIX level
// =============================================================================
//
// Classification, first match wins:
//
//   1. HIGH_VOL    — VIX > 30
//   2. BEAR        — SPY below its 200-day SMA
//   3. LOW_VOL     — VIX < 15 and SPY above the MA
//   4. BULL        — VIX < 20 and SPY above the MA
//   5. TRANSITION  — everything else
//
// The regime acts as a multiplier on downstream signal confidence, between
// 0.5x and 1.2x depending on the catalyst category.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::IndexSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Bull,
    Bear,
    HighVol,
    LowVol,
    Transition,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
            Self::HighVol => write!(f, "HIGH_VOL"),
            Self::LowVol => write!(f, "LOW_VOL"),
            Self::Transition => write!(f, "TRANSITION"),
        }
    }
}

impl MarketRegime {
    /// Classify from the broad-market snapshot.
    pub fn classify(snapshot: &IndexSnapshot) -> Self {
        let above_ma = snapshot.spy_last > snapshot.spy_sma_200;

        if snapshot.vix > 30.0 {
            Self::HighVol
        } else if !above_ma {
            Self::Bear
        } else if snapshot.vix < 15.0 {
            Self::LowVol
        } else if snapshot.vix < 20.0 {
            Self::Bull
        } else {
            Self::Transition
        }
    }

    /// Confidence multiplier for a catalyst category under this regime.
    ///
    /// Hard catalysts (clinical, M&A) keep most of their edge in any tape;
    /// soft catalysts (guidance) get cut hardest when the tape is hostile.
    pub fn multiplier_for(self, category: &str) -> f64 {
        match self {
            Self::Bull => match category {
                "mna" => 1.2,
                "clinical" => 1.1,
                "guidance" => 1.1,
                _ => 1.0,
            },
            Self::LowVol => 1.0,
            Self::Transition => match category {
                "mna" => 1.0,
                "clinical" => 0.95,
                _ => 0.9,
            },
            Self::Bear => match category {
                "mna" => 0.9,
                "clinical" => 0.8,
                "guidance" => 0.6,
                _ => 0.7,
            },
            Self::HighVol => match category {
                "mna" => 0.8,
                "clinical" => 0.7,
                _ => 0.5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(spy_last: f64, spy_sma_200: f64, vix: f64) -> IndexSnapshot {
        IndexSnapshot {
            spy_last,
            spy_sma_200,
            spy_return_1d: 0.0,
            vix,
            sector_returns_1d: HashMap::new(),
            sector_returns_5d: HashMap::new(),
        }
    }

    #[test]
    fn bull_above_ma_with_calm_vix() {
        assert_eq!(MarketRegime::classify(&snapshot(550.0, 500.0, 17.0)), MarketRegime::Bull);
    }

    #[test]
    fn bear_below_ma() {
        assert_eq!(MarketRegime::classify(&snapshot(480.0, 500.0, 22.0)), MarketRegime::Bear);
    }

    #[test]
    fn high_vol_beats_trend() {
        assert_eq!(MarketRegime::classify(&snapshot(480.0, 500.0, 35.0)), MarketRegime::HighVol);
        assert_eq!(MarketRegime::classify(&snapshot(550.0, 500.0, 35.0)), MarketRegime::HighVol);
    }

    #[test]
    fn low_vol_above_ma_quiet_vix() {
        assert_eq!(MarketRegime::classify(&snapshot(550.0, 500.0, 12.0)), MarketRegime::LowVol);
    }

    #[test]
    fn transition_in_between() {
        assert_eq!(
            MarketRegime::classify(&snapshot(550.0, 500.0, 25.0)),
            MarketRegime::Transition
        );
    }

    #[test]
    fn multipliers_stay_in_designed_band() {
        for regime in [
            MarketRegime::Bull,
            MarketRegime::Bear,
            MarketRegime::HighVol,
            MarketRegime::LowVol,
            MarketRegime::Transition,
        ] {
            for cat in ["mna", "clinical", "guidance", "offerings", "regulatory"] {
                let m = regime.multiplier_for(cat);
                assert!((0.5..=1.2).contains(&m), "{regime} {cat} -> {m}");
            }
        }
    }

    #[test]
    fn bull_clinical_at_least_one() {
        assert!(MarketRegime::Bull.multiplier_for("clinical") >= 1.0);
    }
}
