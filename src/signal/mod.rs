// =============================================================================
// Signal Generator — ScoredItem + MarketContext -> actionable Signal
// =============================================================================
//
// Confidence pipeline, in order:
//   1. base_confidence of the matched keyword config
//   2. sentiment-alignment bonus: x1.2 when sentiment > 0.5
//   3. keyword performance multiplier (feedback engine)
//   4. market regime multiplier
//   5. RVOL multiplier (HIGH 1.2 / MODERATE 1.0 / LOW 0.7)
//   6. clamp to [0, 1]; below min_confidence the action downgrades to SKIP
// =============================================================================

pub mod feedback;
pub mod keyword_config;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::classify::ScoredItem;
use crate::enrich::MarketContext;
use crate::runtime_config::RuntimeConfig;
use crate::types::TradeAction;

use feedback::FeedbackEngine;
use keyword_config::{has_avoid_keyword, has_close_keyword, match_config};

/// Sentiment above this earns the alignment bonus.
const SENTIMENT_BONUS_THRESHOLD: f64 = 0.5;
const SENTIMENT_BONUS: f64 = 1.2;

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub action: TradeAction,
    pub ticker: String,
    pub confidence: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    /// Position size as a percentage of account equity, size multiplier
    /// already applied.
    pub position_size_pct: f64,
    pub rationale_tags: Vec<String>,
    /// Which keyword config produced this signal, for feedback attribution.
    pub keyword_config_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct SignalGenerator;

impl SignalGenerator {
    /// Turn one scored, enriched item into a signal.
    pub fn generate(
        scored: &ScoredItem,
        ctx: &MarketContext,
        feedback: &FeedbackEngine,
        cfg: &RuntimeConfig,
    ) -> Signal {
        let hits: Vec<&str> = scored.keyword_hits.iter().map(|s| s.as_str()).collect();
        let mut rationale: Vec<String> = Vec::new();

        // CLOSE class first: distress keywords trump everything.
        if has_close_keyword(hits.iter().copied()) {
            rationale.push("close_keyword".to_string());
            info!(ticker = %scored.primary_ticker, "distress keyword: CLOSE signal");
            return Signal {
                signal_id: Uuid::new_v4().to_string(),
                action: TradeAction::Close,
                ticker: scored.primary_ticker.clone(),
                confidence: 1.0,
                stop_loss_price: None,
                take_profit_price: None,
                position_size_pct: 0.0,
                rationale_tags: rationale,
                keyword_config_id: None,
            };
        }

        // AVOID class: dilution never gets bought.
        if has_avoid_keyword(hits.iter().copied()) {
            rationale.push("avoid_keyword".to_string());
            return Self::skip(scored, rationale);
        }

        // No recognised catalyst config: nothing to trade.
        let Some(config) = match_config(hits.iter().copied()) else {
            rationale.push("no_catalyst_config".to_string());
            return Self::skip(scored, rationale);
        };
        rationale.push(format!("kw:{}", config.id));

        // Negative items are not long candidates.
        if scored.sentiment < 0.0 {
            rationale.push("negative_sentiment".to_string());
            return Self::skip(scored, rationale);
        }

        // MIN_RVOL gate.
        if cfg.min_rvol > 0.0 && ctx.rvol < cfg.min_rvol {
            rationale.push(format!("rvol_below_min:{:.2}", ctx.rvol));
            return Self::skip(scored, rationale);
        }

        // --- Confidence pipeline -----------------------------------------
        let mut confidence = config.base_confidence;

        if scored.sentiment > SENTIMENT_BONUS_THRESHOLD {
            confidence *= SENTIMENT_BONUS;
            rationale.push("sentiment_bonus".to_string());
        }

        if cfg.feature_feedback_signal_integration {
            let multiplier = feedback.multiplier(config.id);
            confidence *= multiplier;
            if (multiplier - 1.0).abs() > f64::EPSILON {
                rationale.push(format!("feedback:{multiplier:.2}"));
            }
        }

        let regime_multiplier = ctx.market_regime.multiplier_for(config.category);
        confidence *= regime_multiplier;
        rationale.push(format!("regime:{}", ctx.market_regime));

        let rvol_multiplier = ctx.rvol_category.confidence_multiplier();
        confidence *= rvol_multiplier;
        rationale.push(format!("rvol:{}", ctx.rvol_category));

        confidence = confidence.clamp(0.0, 1.0);

        if confidence < cfg.min_confidence {
            rationale.push(format!("confidence_below_threshold:{confidence:.2}"));
            return Signal {
                signal_id: Uuid::new_v4().to_string(),
                action: TradeAction::Skip,
                ticker: scored.primary_ticker.clone(),
                confidence,
                stop_loss_price: None,
                take_profit_price: None,
                position_size_pct: 0.0,
                rationale_tags: rationale,
                keyword_config_id: Some(config.id.to_string()),
            };
        }

        // --- Stops and target --------------------------------------------
        let (stop_pct, target_pct) = Self::stop_target_pcts(config, ctx);
        let stop_loss_price = ctx.last_price * (1.0 - stop_pct / 100.0);
        let take_profit_price = ctx.last_price * (1.0 + target_pct / 100.0);

        let position_size_pct = (cfg.base_position_size_pct * config.size_multiplier)
            .min(cfg.max_position_size_pct);

        debug!(
            ticker = %scored.primary_ticker,
            keyword = config.id,
            confidence = format!("{confidence:.3}"),
            stop = format!("{stop_loss_price:.4}"),
            target = format!("{take_profit_price:.4}"),
            "BUY signal generated"
        );

        Signal {
            signal_id: Uuid::new_v4().to_string(),
            action: TradeAction::Buy,
            ticker: scored.primary_ticker.clone(),
            confidence,
            stop_loss_price: Some(stop_loss_price),
            take_profit_price: Some(take_profit_price),
            position_size_pct,
            rationale_tags: rationale,
            keyword_config_id: Some(config.id.to_string()),
        }
    }

    /// Fixed percentages from the table, widened by volatility when ATR
    /// data is present and implies a wider daily range than the fixed stop.
    fn stop_target_pcts(
        config: &keyword_config::KeywordConfig,
        ctx: &MarketContext,
    ) -> (f64, f64) {
        let mut stop_pct = config.stop_loss_pct;
        let mut target_pct = config.take_profit_pct;

        if let Some(atr) = ctx.atr {
            if ctx.last_price > 0.0 {
                let atr_pct = atr / ctx.last_price * 100.0;
                // A stop tighter than one ATR gets shaken out by noise.
                if atr_pct > stop_pct {
                    let widen = atr_pct / stop_pct;
                    stop_pct = atr_pct;
                    target_pct *= widen;
                }
            }
        }

        (stop_pct, target_pct)
    }

    fn skip(scored: &ScoredItem, rationale: Vec<String>) -> Signal {
        debug!(
            ticker = %scored.primary_ticker,
            rationale = ?rationale,
            "SKIP signal"
        );
        Signal {
            signal_id: Uuid::new_v4().to_string(),
            action: TradeAction::Skip,
            ticker: scored.primary_ticker.clone(),
            confidence: 0.0,
            stop_loss_price: None,
            take_profit_price: None,
            position_size_pct: 0.0,
            rationale_tags: rationale,
            keyword_config_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_with_readings;
    use crate::classify::sentiment::SourceReading;
    use crate::enrich::regime::MarketRegime;
    use crate::enrich::rvol::RvolCategory;
    use crate::enrich::sector::SectorStrength;
    use crate::feeds::NewsItem;
    use chrono::{TimeZone, Utc};

    fn scored(title: &str, summary: &str, ticker: &str, sentiment: f64) -> ScoredItem {
        let item = NewsItem::new(
            "wire",
            "https://x/1",
            title,
            summary,
            Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
            vec![ticker.to_string()],
        );
        let readings = vec![SourceReading {
            source: "llm".into(),
            weight: 2.0,
            score: sentiment,
            confidence: 0.95,
        }];
        classify_with_readings(&item, &readings, &RuntimeConfig::default())
            .unwrap()
            .remove(0)
    }

    fn ctx(last_price: f64, rvol: f64, regime: MarketRegime) -> MarketContext {
        MarketContext {
            ticker: "XYZBIO".into(),
            last_price,
            prev_close: last_price * 0.95,
            change_pct: 5.0,
            rvol,
            rvol_category: RvolCategory::from_rvol(rvol),
            float_shares: Some(20_000_000.0),
            short_interest_pct: None,
            sector: "Healthcare".into(),
            sector_return_1d: 0.5,
            sector_vs_spy: 0.3,
            sector_strength: SectorStrength::Neutral,
            market_regime: regime,
            vwap_break: false,
            atr: None,
            avg_volume_20d: 2_000_000.0,
            captured_at: Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap(),
        }
    }

    fn engine() -> FeedbackEngine {
        FeedbackEngine::new(feedback::FeedbackConfig::default())
    }

    #[test]
    fn fda_catalyst_in_bull_regime_maxes_out() {
        let s = scored(
            "XYZBIO Announces FDA Approval of Phase 3 Trial",
            "XYZBIO received approval.",
            "XYZBIO",
            0.9,
        );
        let c = ctx(4.0, 3.1, MarketRegime::Bull);
        let cfg = RuntimeConfig::default();
        let signal = SignalGenerator::generate(&s, &c, &engine(), &cfg);

        assert_eq!(signal.action, TradeAction::Buy);
        // 0.92 * 1.2 (sentiment) * 1.1 (bull/clinical) * 1.2 (rvol) clamps to 1.
        assert!((signal.confidence - 1.0).abs() < 1e-9);
        assert!((signal.stop_loss_price.unwrap() - 4.0 * 0.95).abs() < 1e-9);
        assert!((signal.take_profit_price.unwrap() - 4.0 * 1.12).abs() < 1e-9);
        assert_eq!(signal.keyword_config_id.as_deref(), Some("fda"));
    }

    #[test]
    fn offering_announcement_skips() {
        let s = scored(
            "XYZ Corp Announces $100M Public Offering",
            "",
            "XYZ",
            -0.5,
        );
        let c = ctx(3.0, 1.5, MarketRegime::Bull);
        let signal = SignalGenerator::generate(&s, &c, &engine(), &RuntimeConfig::default());
        assert_eq!(signal.action, TradeAction::Skip);
        assert!(signal.rationale_tags.contains(&"avoid_keyword".to_string()));
    }

    #[test]
    fn bankruptcy_emits_close() {
        let s = scored(
            "Acme Files for Chapter 11 Bankruptcy Protection",
            "",
            "ACME",
            -0.9,
        );
        let c = ctx(1.0, 1.0, MarketRegime::Bear);
        let signal = SignalGenerator::generate(&s, &c, &engine(), &RuntimeConfig::default());
        assert_eq!(signal.action, TradeAction::Close);
    }

    #[test]
    fn low_rvol_and_hostile_regime_downgrade_to_skip() {
        let s = scored(
            "XYZBIO Announces FDA Approval of Phase 3 Trial",
            "",
            "XYZBIO",
            0.3, // no sentiment bonus
        );
        let c = ctx(4.0, 0.5, MarketRegime::HighVol);
        let cfg = RuntimeConfig::default();
        let signal = SignalGenerator::generate(&s, &c, &engine(), &cfg);
        // 0.92 * 0.7 (high-vol/clinical) * 0.7 (low rvol) = 0.45 < 0.6
        assert_eq!(signal.action, TradeAction::Skip);
        assert!(signal
            .rationale_tags
            .iter()
            .any(|t| t.starts_with("confidence_below_threshold")));
        assert!(signal.confidence < cfg.min_confidence);
    }

    #[test]
    fn min_rvol_gate_skips() {
        let s = scored("XYZBIO Announces FDA Approval", "", "XYZBIO", 0.9);
        let c = ctx(4.0, 0.8, MarketRegime::Bull);
        let mut cfg = RuntimeConfig::default();
        cfg.min_rvol = 1.0;
        let signal = SignalGenerator::generate(&s, &c, &engine(), &cfg);
        assert_eq!(signal.action, TradeAction::Skip);
    }

    #[test]
    fn atr_widens_tight_stops() {
        let s = scored("XYZBIO Announces FDA Approval", "", "XYZBIO", 0.9);
        let mut c = ctx(4.0, 2.5, MarketRegime::Bull);
        // ATR of 0.4 on a $4 stock is a 10% daily range; the 5% FDA stop
        // would be noise.
        c.atr = Some(0.4);
        let signal = SignalGenerator::generate(&s, &c, &engine(), &RuntimeConfig::default());
        assert_eq!(signal.action, TradeAction::Buy);
        let stop = signal.stop_loss_price.unwrap();
        assert!((stop - 4.0 * 0.90).abs() < 1e-9, "stop = {stop}");
    }

    #[test]
    fn size_respects_portfolio_cap() {
        let s = scored("Acme Enters Definitive Agreement to Merge With Zenith", "", "ACME", 0.9);
        let c = ctx(4.0, 2.5, MarketRegime::Bull);
        let cfg = RuntimeConfig::default();
        let signal = SignalGenerator::generate(&s, &c, &engine(), &cfg);
        assert_eq!(signal.action, TradeAction::Buy);
        // 5% base * 2.0 merger multiplier caps at 10%.
        assert!((signal.position_size_pct - cfg.max_position_size_pct).abs() < 1e-9);
    }

    #[test]
    fn feedback_multiplier_flows_into_confidence() {
        let s = scored("XYZBIO Announces FDA Approval", "", "XYZBIO", 0.3);
        let c = ctx(4.0, 1.5, MarketRegime::LowVol);
        let cfg = RuntimeConfig::default();

        let fb = engine();
        let outcomes: Vec<_> = (0..20)
            .map(|_| feedback::TradeOutcome {
                keyword: "fda".into(),
                ticker: "XYZBIO".into(),
                return_pct: -8.0,
                realized_pnl: -80.0,
                closed_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            })
            .collect();
        fb.refresh(&outcomes, Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap());

        let with_fb = SignalGenerator::generate(&s, &c, &fb, &cfg);
        let without_fb = SignalGenerator::generate(&s, &c, &engine(), &cfg);
        assert!(with_fb.confidence < without_fb.confidence);
    }
}
