// =============================================================================
// Persistence — append-only JSONL logs and the SQLite stores
// =============================================================================
//
// Filesystem layout under `data_dir`:
//   accepted_items.jsonl    one record per accepted ScoredItem
//   rejected_items.jsonl    one record per rejection, with rejection_reason
//   outcomes.jsonl          one record per closed position
//   trading.db              orders, positions, closed positions, keyword perf
//   sentiment_history.db    per-ticker sentiment time series, 30-day retention
//
// Simulation runs write to `trading_sim_<run_id>.db` and never touch the
// live tables.
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::signal::feedback::{KeywordPerformance, TradeOutcome};
use crate::trading::broker::Order;
use crate::trading::positions::ClosedPosition;

// ---------------------------------------------------------------------------
// Atomic file replacement
// ---------------------------------------------------------------------------

/// Replace `path` with `bytes` without ever exposing a half-written file.
/// The content is staged into a `.pending` sibling and renamed over the
/// target only once fully written, so readers see either the old file or
/// the new one, never a truncated mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let staged = path.with_extension("pending");

    let mut file = std::fs::File::create(&staged)
        .with_context(|| format!("cannot stage {}", staged.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("short write to staged file {}", staged.display()))?;
    drop(file);

    std::fs::rename(&staged, path)
        .with_context(|| format!("cannot move staged file over {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSONL appender
// ---------------------------------------------------------------------------

/// Append-only JSONL file: one serialised record per line.
pub struct JsonlWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialise jsonl record")?;

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Trading database
// ---------------------------------------------------------------------------

pub struct TradingDb {
    conn: Mutex<Connection>,
}

impl TradingDb {
    /// Open (and migrate) the live trading database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open trading db at {}", path.as_ref().display()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open a simulation-scoped database. Live tables are never mutated by
    /// a simulation run.
    pub fn open_simulation(data_dir: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        let path = data_dir
            .as_ref()
            .join(format!("trading_sim_{run_id}.db"));
        info!(path = %path.display(), run_id, "simulation-scoped trading db");
        Self::open(path)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                order_type TEXT NOT NULL,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                filled_at TEXT,
                filled_avg_price REAL,
                signal_id TEXT
            );
            CREATE TABLE IF NOT EXISTS closed_positions (
                position_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                return_pct REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                keyword_tag TEXT
            );
            CREATE TABLE IF NOT EXISTS keyword_performance (
                keyword TEXT PRIMARY KEY,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                neutrals INTEGER NOT NULL,
                avg_return_pct REAL NOT NULL,
                sample_size INTEGER NOT NULL,
                multiplier REAL NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("trading db migration failed")?;
        Ok(())
    }

    pub fn record_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO orders
             (order_id, ticker, side, quantity, order_type, status, submitted_at,
              filled_at, filled_avg_price, signal_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                order.order_id,
                order.ticker,
                order.side.to_string(),
                order.quantity,
                order.order_type.to_string(),
                order.status.to_string(),
                order.submitted_at.to_rfc3339(),
                order.filled_at.map(|t| t.to_rfc3339()),
                order.filled_avg_price,
                order.signal_id,
            ],
        )
        .context("failed to record order")?;
        Ok(())
    }

    pub fn record_closed_position(&self, closed: &ClosedPosition) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO closed_positions
             (position_id, ticker, quantity, entry_price, exit_price, realized_pnl,
              return_pct, exit_reason, opened_at, closed_at, keyword_tag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                closed.position_id,
                closed.ticker,
                closed.quantity,
                closed.entry_price,
                closed.exit_price,
                closed.realized_pnl,
                closed.return_pct,
                closed.exit_reason.to_string(),
                closed.opened_at.to_rfc3339(),
                closed.closed_at.to_rfc3339(),
                closed.keyword_tag,
            ],
        )
        .context("failed to record closed position")?;
        Ok(())
    }

    /// Closed trades with keyword attribution inside the rolling window,
    /// for the feedback engine.
    pub fn outcomes_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<TradeOutcome>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT keyword_tag, ticker, return_pct, realized_pnl, closed_at
                 FROM closed_positions
                 WHERE keyword_tag IS NOT NULL AND closed_at >= ?1",
            )
            .context("failed to prepare outcomes query")?;

        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| {
                let closed_at: String = row.get(4)?;
                Ok(TradeOutcome {
                    keyword: row.get(0)?,
                    ticker: row.get(1)?,
                    return_pct: row.get(2)?,
                    realized_pnl: row.get(3)?,
                    closed_at: closed_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .context("failed to query outcomes")?;

        let mut outcomes = Vec::new();
        for row in rows {
            outcomes.push(row.context("bad outcome row")?);
        }
        Ok(outcomes)
    }

    pub fn upsert_keyword_performance(&self, perf: &KeywordPerformance, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO keyword_performance
             (keyword, wins, losses, neutrals, avg_return_pct, sample_size, multiplier, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                perf.keyword,
                perf.wins,
                perf.losses,
                perf.neutrals,
                perf.avg_return_pct,
                perf.sample_size as i64,
                perf.multiplier,
                now.to_rfc3339(),
            ],
        )
        .context("failed to upsert keyword performance")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sentiment history database
// ---------------------------------------------------------------------------

/// Sentiment readings older than this are purged.
const SENTIMENT_RETENTION_DAYS: i64 = 30;

pub struct SentimentDb {
    conn: Mutex<Connection>,
}

impl SentimentDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!("failed to open sentiment db at {}", path.as_ref().display())
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sentiment_history (
                ticker TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                sentiment REAL NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sentiment_ticker_time
                ON sentiment_history (ticker, recorded_at);",
        )
        .context("sentiment db migration failed")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record(
        &self,
        ticker: &str,
        sentiment: f64,
        confidence: f64,
        source: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sentiment_history (ticker, recorded_at, sentiment, confidence, source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ticker, at.to_rfc3339(), sentiment, confidence, source],
        )
        .context("failed to record sentiment")?;
        Ok(())
    }

    /// Recent readings for a ticker, newest first.
    pub fn history(&self, ticker: &str, limit: usize) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT recorded_at, sentiment FROM sentiment_history
                 WHERE ticker = ?1 ORDER BY recorded_at DESC LIMIT ?2",
            )
            .context("failed to prepare history query")?;
        let rows = stmt
            .query_map(params![ticker, limit as i64], |row| {
                let at: String = row.get(0)?;
                let sentiment: f64 = row.get(1)?;
                Ok((at, sentiment))
            })
            .context("failed to query history")?;

        let mut history = Vec::new();
        for row in rows {
            let (at, sentiment) = row.context("bad history row")?;
            if let Ok(parsed) = at.parse::<DateTime<Utc>>() {
                history.push((parsed, sentiment));
            }
        }
        Ok(history)
    }

    /// Drop readings past the retention window. Returns rows deleted.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(SENTIMENT_RETENTION_DAYS);
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM sentiment_history WHERE recorded_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .context("failed to purge sentiment history")?;
        if deleted > 0 {
            debug!(deleted, "sentiment history purged");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap()
    }

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("settings.json");

        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":1}");

        write_atomic(&target, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":2}");
        assert!(!dir.path().join("settings.pending").exists());
    }

    #[test]
    fn jsonl_appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonlWriter::new(dir.path().join("out.jsonl"));
        writer.append(&serde_json::json!({"a": 1})).unwrap();
        writer.append(&serde_json::json!({"b": 2})).unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"a":1}"#);
    }

    fn closed(keyword: &str, return_pct: f64, closed_at: DateTime<Utc>) -> ClosedPosition {
        ClosedPosition {
            position_id: uuid::Uuid::new_v4().to_string(),
            ticker: "ACME".into(),
            quantity: 100.0,
            entry_price: 4.0,
            exit_price: 4.0 * (1.0 + return_pct / 100.0),
            realized_pnl: 4.0 * return_pct,
            return_pct,
            exit_reason: ExitReason::Target,
            opened_at: closed_at - chrono::Duration::hours(2),
            closed_at,
            keyword_tag: Some(keyword.to_string()),
        }
    }

    #[test]
    fn trading_db_roundtrips_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let db = TradingDb::open(dir.path().join("trading.db")).unwrap();

        db.record_closed_position(&closed("fda", 8.0, now())).unwrap();
        db.record_closed_position(&closed("merger", -3.0, now())).unwrap();
        // Outside the window.
        db.record_closed_position(&closed("fda", 5.0, now() - chrono::Duration::days(60)))
            .unwrap();

        let outcomes = db.outcomes_since(now() - chrono::Duration::days(30)).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().any(|o| o.keyword == "fda"));
        assert!(outcomes.iter().any(|o| o.keyword == "merger"));
    }

    #[test]
    fn closed_positions_insert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = TradingDb::open(dir.path().join("trading.db")).unwrap();
        let record = closed("fda", 8.0, now());
        db.record_closed_position(&record).unwrap();
        db.record_closed_position(&record).unwrap();
        let outcomes = db.outcomes_since(now() - chrono::Duration::days(1)).unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[test]
    fn simulation_db_is_separate_file() {
        let dir = tempfile::tempdir().unwrap();
        let _live = TradingDb::open(dir.path().join("trading.db")).unwrap();
        let _sim = TradingDb::open_simulation(dir.path(), "run42").unwrap();
        assert!(dir.path().join("trading_sim_run42.db").exists());
        assert!(dir.path().join("trading.db").exists());
    }

    #[test]
    fn sentiment_history_records_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let db = SentimentDb::open(dir.path().join("sentiment_history.db")).unwrap();

        db.record("ACME", 0.6, 0.8, "ensemble", now()).unwrap();
        db.record("ACME", -0.2, 0.5, "ensemble", now() - chrono::Duration::days(45))
            .unwrap();

        let history = db.history("ACME", 10).unwrap();
        assert_eq!(history.len(), 2);

        let deleted = db.purge_expired(now()).unwrap();
        assert_eq!(deleted, 1);
        let history = db.history("ACME", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].1 - 0.6).abs() < 1e-9);
    }
}
