use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;

use crate::db::{migrate, open_db};
use crate::models::*;
use crate::retry::{is_busy, retry_if, RetryConfig};

/// Persistence operations the prediction pipeline relies on.
///
/// Implementations guarantee: at most one active cycle per variant, one
/// match record per (cycle, draw, session), and an atomic cycle advance.
pub trait ResultsStore {
    /// Returns true when the draw was not yet known.
    fn upsert_draw(&self, draw: &Draw) -> Result<bool>;
    /// Most recent first, ordered by date then session.
    fn recent_draws(&self, variant: Variant, limit: u32, session: Option<Session>) -> Result<Vec<Draw>>;
    /// Without a session, the latest session carrying that id is returned.
    fn draw_by_id(&self, variant: Variant, draw_id: &str, session: Option<Session>) -> Result<Option<Draw>>;
    fn count_draws(&self, variant: Variant) -> Result<u32>;

    fn active_cycle(&self, variant: Variant) -> Result<Option<PredictionCycle>>;
    fn cycle_by_id(&self, id: i64) -> Result<Option<PredictionCycle>>;
    fn cycle_by_number(&self, variant: Variant, cycle_number: u32) -> Result<Option<PredictionCycle>>;
    fn recent_cycles(&self, variant: Variant, limit: u32) -> Result<Vec<PredictionCycle>>;
    fn next_cycle_number(&self, variant: Variant) -> Result<u32>;
    /// Inserts the cycle unless the variant already has an active one, in
    /// which case nothing is written and `None` is returned.
    fn create_cycle(&self, cycle: &NewCycle, now: DateTime<Utc>) -> Result<Option<PredictionCycle>>;
    /// Increments `draws_tracked` and completes the cycle once it reaches
    /// `max_draws`. Fails for a cycle that is not active.
    fn advance_cycle(&self, cycle_id: i64, now: DateTime<Utc>) -> Result<PredictionCycle>;

    /// Returns the stored prediction; an existing one for the same cycle is
    /// kept as is.
    fn insert_prediction(&self, prediction: &NewPrediction, now: DateTime<Utc>) -> Result<Prediction>;
    fn prediction_for_cycle(&self, cycle_id: i64) -> Result<Option<Prediction>>;

    /// Returns true when the record was created, false when it replaced one.
    fn upsert_match_result(&self, result: &MatchResult) -> Result<bool>;
    fn match_results_for_cycle(&self, cycle_id: i64) -> Result<Vec<MatchResult>>;

    fn load_weights(&self, variant: Variant) -> Result<Option<EnsembleWeights>>;
    fn save_weights(&self, variant: Variant, weights: &EnsembleWeights, now: DateTime<Utc>) -> Result<()>;

    fn insert_training_log(&self, log: &TrainingLog) -> Result<i64>;
    fn training_logs(&self, variant: Variant, limit: u32) -> Result<Vec<TrainingLog>>;
    /// The first evaluation logged for a cycle, if it was ever evaluated.
    fn training_log_for_cycle(&self, cycle_id: i64) -> Result<Option<TrainingLog>>;
}

pub struct SqliteStore {
    conn: Connection,
}

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl SqliteStore {
    /// Opens and migrates the database, retrying while another process
    /// holds the lock.
    pub fn open(path: &Path, busy_timeout: Duration, retry: &RetryConfig) -> Result<Self> {
        let conn = retry_if(
            retry,
            "open results store",
            || {
                let conn = open_db(path, busy_timeout)?;
                migrate(&conn)?;
                Ok(conn)
            },
            is_busy,
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Cannot open in-memory database")?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Cannot begin transaction")
    }
}

// ── SQL conversions ──

impl ToSql for Variant {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.key()))
    }
}

impl FromSql for Variant {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl ToSql for PrizeTier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PrizeTier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl FromSql for CycleStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl FromSql for TrainingStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

/// Sessionless draws are stored with an empty session so that the unique
/// keys still apply to them.
fn session_key(session: Option<Session>) -> &'static str {
    session.map(|s| s.as_str()).unwrap_or("")
}

fn session_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Session>> {
    let raw: String = row.get(idx)?;
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Cannot encode JSON column")
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

const DRAW_COLUMNS: &str = "variant, draw_id, draw_date, session, numbers, special, jackpot_amount";

fn draw_from_row(row: &Row<'_>) -> rusqlite::Result<Draw> {
    Ok(Draw {
        variant: row.get(0)?,
        draw_id: row.get(1)?,
        draw_date: row.get(2)?,
        session: session_column(row, 3)?,
        numbers: json_column(row, 4)?,
        special: row.get(5)?,
        jackpot_amount: row.get(6)?,
    })
}

const CYCLE_COLUMNS: &str =
    "id, variant, cycle_number, status, draws_tracked, max_draws, model_version, created_at, completed_at";

fn cycle_from_row(row: &Row<'_>) -> rusqlite::Result<PredictionCycle> {
    Ok(PredictionCycle {
        id: row.get(0)?,
        variant: row.get(1)?,
        cycle_number: row.get(2)?,
        status: row.get(3)?,
        draws_tracked: row.get(4)?,
        max_draws: row.get(5)?,
        model_version: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

const PREDICTION_COLUMNS: &str = "id, cycle_id, variant, numbers, special, model_version, weights, created_at";

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        id: row.get(0)?,
        cycle_id: row.get(1)?,
        variant: row.get(2)?,
        numbers: json_column(row, 3)?,
        special: row.get(4)?,
        model_version: row.get(5)?,
        weights: json_column(row, 6)?,
        created_at: row.get(7)?,
    })
}

const MATCH_COLUMNS: &str = "cycle_id, variant, draw_id, session, draw_date, draw_number, predicted, actual, \
     predicted_special, actual_special, matched, matched_count, special_matched, prize_tier";

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<MatchResult> {
    Ok(MatchResult {
        cycle_id: row.get(0)?,
        variant: row.get(1)?,
        draw_id: row.get(2)?,
        session: session_column(row, 3)?,
        draw_date: row.get(4)?,
        draw_number: row.get(5)?,
        predicted: json_column(row, 6)?,
        actual: json_column(row, 7)?,
        predicted_special: row.get(8)?,
        actual_special: row.get(9)?,
        matched: json_column(row, 10)?,
        matched_count: row.get(11)?,
        special_matched: row.get(12)?,
        prize_tier: row.get(13)?,
    })
}

fn training_log_from_row(row: &Row<'_>) -> rusqlite::Result<TrainingLog> {
    let after: Option<String> = row.get(4)?;
    let weights_after = match after {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    Ok(TrainingLog {
        variant: row.get(0)?,
        cycle_id: row.get(1)?,
        reason: row.get(2)?,
        weights_before: json_column(row, 3)?,
        weights_after,
        hit_3plus: row.get(5)?,
        hit_4plus: row.get(6)?,
        max_match: row.get(7)?,
        status: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl ResultsStore for SqliteStore {
    fn upsert_draw(&self, draw: &Draw) -> Result<bool> {
        let numbers = json_text(&draw.numbers)?;
        let changed = self
            .conn
            .execute(
                &format!("INSERT OR IGNORE INTO draws ({DRAW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    draw.variant,
                    draw.draw_id,
                    draw.draw_date,
                    session_key(draw.session),
                    numbers,
                    draw.special,
                    draw.jackpot_amount,
                ],
            )
            .with_context(|| format!("Cannot insert draw {}", draw.draw_id))?;
        if changed == 0 && draw.jackpot_amount.is_some() {
            self.conn
                .execute(
                    "UPDATE draws SET jackpot_amount = ?4 WHERE variant = ?1 AND draw_id = ?2 AND session = ?3",
                    params![draw.variant, draw.draw_id, session_key(draw.session), draw.jackpot_amount],
                )
                .with_context(|| format!("Cannot update draw {}", draw.draw_id))?;
        }
        Ok(changed > 0)
    }

    fn recent_draws(&self, variant: Variant, limit: u32, session: Option<Session>) -> Result<Vec<Draw>> {
        let draws = match session {
            Some(s) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {DRAW_COLUMNS} FROM draws WHERE variant = ?1 AND session = ?2
                     ORDER BY draw_date DESC, session DESC, draw_id DESC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![variant, s.as_str(), limit], draw_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {DRAW_COLUMNS} FROM draws WHERE variant = ?1
                     ORDER BY draw_date DESC, session DESC, draw_id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![variant, limit], draw_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(draws)
    }

    fn draw_by_id(&self, variant: Variant, draw_id: &str, session: Option<Session>) -> Result<Option<Draw>> {
        let draw = match session {
            Some(s) => self
                .conn
                .query_row(
                    &format!("SELECT {DRAW_COLUMNS} FROM draws WHERE variant = ?1 AND draw_id = ?2 AND session = ?3"),
                    params![variant, draw_id, s.as_str()],
                    draw_from_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    &format!(
                        "SELECT {DRAW_COLUMNS} FROM draws WHERE variant = ?1 AND draw_id = ?2
                         ORDER BY session DESC LIMIT 1"
                    ),
                    params![variant, draw_id],
                    draw_from_row,
                )
                .optional()?,
        };
        Ok(draw)
    }

    fn count_draws(&self, variant: Variant) -> Result<u32> {
        let count: u32 = self
            .conn
            .query_row("SELECT COUNT(*) FROM draws WHERE variant = ?1", [variant], |row| row.get(0))?;
        Ok(count)
    }

    fn active_cycle(&self, variant: Variant) -> Result<Option<PredictionCycle>> {
        let cycle = self
            .conn
            .query_row(
                &format!("SELECT {CYCLE_COLUMNS} FROM prediction_cycles WHERE variant = ?1 AND status = 'active'"),
                [variant],
                cycle_from_row,
            )
            .optional()?;
        Ok(cycle)
    }

    fn cycle_by_id(&self, id: i64) -> Result<Option<PredictionCycle>> {
        let cycle = self
            .conn
            .query_row(
                &format!("SELECT {CYCLE_COLUMNS} FROM prediction_cycles WHERE id = ?1"),
                [id],
                cycle_from_row,
            )
            .optional()?;
        Ok(cycle)
    }

    fn cycle_by_number(&self, variant: Variant, cycle_number: u32) -> Result<Option<PredictionCycle>> {
        let cycle = self
            .conn
            .query_row(
                &format!("SELECT {CYCLE_COLUMNS} FROM prediction_cycles WHERE variant = ?1 AND cycle_number = ?2"),
                params![variant, cycle_number],
                cycle_from_row,
            )
            .optional()?;
        Ok(cycle)
    }

    fn recent_cycles(&self, variant: Variant, limit: u32) -> Result<Vec<PredictionCycle>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CYCLE_COLUMNS} FROM prediction_cycles WHERE variant = ?1
             ORDER BY cycle_number DESC LIMIT ?2"
        ))?;
        let cycles = stmt
            .query_map(params![variant, limit], cycle_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cycles)
    }

    fn next_cycle_number(&self, variant: Variant) -> Result<u32> {
        let max: u32 = self.conn.query_row(
            "SELECT COALESCE(MAX(cycle_number), 0) FROM prediction_cycles WHERE variant = ?1",
            [variant],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    fn create_cycle(&self, cycle: &NewCycle, now: DateTime<Utc>) -> Result<Option<PredictionCycle>> {
        let tx = self.immediate()?;
        let active: u32 = tx.query_row(
            "SELECT COUNT(*) FROM prediction_cycles WHERE variant = ?1 AND status = 'active'",
            [cycle.variant],
            |row| row.get(0),
        )?;
        if active > 0 {
            debug!("{}: active cycle already present, not creating", cycle.variant);
            return Ok(None);
        }
        let inserted = tx.execute(
            "INSERT INTO prediction_cycles (variant, cycle_number, status, draws_tracked, max_draws, model_version, created_at)
             VALUES (?1, ?2, 'active', 0, ?3, ?4, ?5)",
            params![cycle.variant, cycle.cycle_number, cycle.max_draws, cycle.model_version, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                debug!("{}: lost cycle creation race ({e})", cycle.variant);
                return Ok(None);
            }
            Err(e) => return Err(e).context("Cannot create cycle"),
        }
        let id = tx.last_insert_rowid();
        tx.commit().context("Cannot commit cycle creation")?;
        self.cycle_by_id(id)
    }

    fn advance_cycle(&self, cycle_id: i64, now: DateTime<Utc>) -> Result<PredictionCycle> {
        let tx = self.immediate()?;
        let changed = tx.execute(
            "UPDATE prediction_cycles SET draws_tracked = draws_tracked + 1
             WHERE id = ?1 AND status = 'active'",
            [cycle_id],
        )?;
        if changed == 0 {
            bail!("Cycle {cycle_id} does not exist or is already completed");
        }
        tx.execute(
            "UPDATE prediction_cycles SET status = 'completed', completed_at = ?2
             WHERE id = ?1 AND draws_tracked >= max_draws",
            params![cycle_id, now],
        )?;
        tx.commit().context("Cannot commit cycle advance")?;
        match self.cycle_by_id(cycle_id)? {
            Some(cycle) => Ok(cycle),
            None => bail!("Cycle {cycle_id} vanished during advance"),
        }
    }

    fn insert_prediction(&self, prediction: &NewPrediction, now: DateTime<Utc>) -> Result<Prediction> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO predictions (cycle_id, variant, numbers, special, model_version, weights, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    prediction.cycle_id,
                    prediction.variant,
                    json_text(&prediction.numbers)?,
                    prediction.special,
                    prediction.model_version,
                    json_text(&prediction.weights)?,
                    now,
                ],
            )
            .with_context(|| format!("Cannot insert prediction for cycle {}", prediction.cycle_id))?;
        match self.prediction_for_cycle(prediction.cycle_id)? {
            Some(p) => Ok(p),
            None => bail!("Prediction for cycle {} missing after insert", prediction.cycle_id),
        }
    }

    fn prediction_for_cycle(&self, cycle_id: i64) -> Result<Option<Prediction>> {
        let prediction = self
            .conn
            .query_row(
                &format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE cycle_id = ?1"),
                [cycle_id],
                prediction_from_row,
            )
            .optional()?;
        Ok(prediction)
    }

    fn upsert_match_result(&self, result: &MatchResult) -> Result<bool> {
        let session = session_key(result.session);
        let tx = self.immediate()?;
        let existing: u32 = tx.query_row(
            "SELECT COUNT(*) FROM match_results WHERE cycle_id = ?1 AND draw_id = ?2 AND session = ?3",
            params![result.cycle_id, result.draw_id, session],
            |row| row.get(0),
        )?;
        tx.execute(
            &format!(
                "INSERT INTO match_results ({MATCH_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT (cycle_id, draw_id, session) DO UPDATE SET
                     draw_date = excluded.draw_date,
                     predicted = excluded.predicted,
                     actual = excluded.actual,
                     predicted_special = excluded.predicted_special,
                     actual_special = excluded.actual_special,
                     matched = excluded.matched,
                     matched_count = excluded.matched_count,
                     special_matched = excluded.special_matched,
                     prize_tier = excluded.prize_tier"
            ),
            params![
                result.cycle_id,
                result.variant,
                result.draw_id,
                session,
                result.draw_date,
                result.draw_number,
                json_text(&result.predicted)?,
                json_text(&result.actual)?,
                result.predicted_special,
                result.actual_special,
                json_text(&result.matched)?,
                result.matched_count,
                result.special_matched,
                result.prize_tier,
            ],
        )
        .with_context(|| format!("Cannot record match for draw {}", result.draw_id))?;
        tx.commit().context("Cannot commit match result")?;
        Ok(existing == 0)
    }

    fn match_results_for_cycle(&self, cycle_id: i64) -> Result<Vec<MatchResult>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM match_results WHERE cycle_id = ?1 ORDER BY draw_number ASC"
        ))?;
        let results = stmt
            .query_map([cycle_id], match_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    fn load_weights(&self, variant: Variant) -> Result<Option<EnsembleWeights>> {
        let weights = self
            .conn
            .query_row(
                "SELECT sequence, secondary, statistical FROM ensemble_weights WHERE variant = ?1",
                [variant],
                |row| Ok(EnsembleWeights::new(row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(weights)
    }

    fn save_weights(&self, variant: Variant, weights: &EnsembleWeights, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO ensemble_weights (variant, sequence, secondary, statistical, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (variant) DO UPDATE SET
                     sequence = excluded.sequence,
                     secondary = excluded.secondary,
                     statistical = excluded.statistical,
                     updated_at = excluded.updated_at",
                params![variant, weights.sequence, weights.secondary, weights.statistical, now],
            )
            .with_context(|| format!("Cannot save weights for {variant}"))?;
        Ok(())
    }

    fn insert_training_log(&self, log: &TrainingLog) -> Result<i64> {
        let after = match &log.weights_after {
            Some(w) => Some(json_text(w)?),
            None => None,
        };
        self.conn
            .execute(
                "INSERT INTO training_logs (variant, cycle_id, reason, weights_before, weights_after,
                     hit_3plus, hit_4plus, max_match, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    log.variant,
                    log.cycle_id,
                    log.reason,
                    json_text(&log.weights_before)?,
                    after,
                    log.hit_3plus,
                    log.hit_4plus,
                    log.max_match,
                    log.status.as_str(),
                    log.created_at,
                ],
            )
            .context("Cannot insert training log")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn training_logs(&self, variant: Variant, limit: u32) -> Result<Vec<TrainingLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT variant, cycle_id, reason, weights_before, weights_after,
                    hit_3plus, hit_4plus, max_match, status, created_at
             FROM training_logs WHERE variant = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let logs = stmt
            .query_map(params![variant, limit], training_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    fn training_log_for_cycle(&self, cycle_id: i64) -> Result<Option<TrainingLog>> {
        let log = self
            .conn
            .query_row(
                "SELECT variant, cycle_id, reason, weights_before, weights_after,
                        hit_3plus, hit_4plus, max_match, status, created_at
                 FROM training_logs WHERE cycle_id = ?1 ORDER BY id ASC LIMIT 1",
                [cycle_id],
                training_log_from_row,
            )
            .optional()?;
        Ok(log)
    }
}
