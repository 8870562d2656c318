use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    variant         TEXT NOT NULL,
    draw_id         TEXT NOT NULL,
    draw_date       TEXT NOT NULL,
    session         TEXT NOT NULL DEFAULT '',
    numbers         TEXT NOT NULL,
    special         INTEGER,
    jackpot_amount  INTEGER,
    PRIMARY KEY (variant, draw_id, session)
);

CREATE INDEX IF NOT EXISTS idx_draws_recent
    ON draws (variant, draw_date DESC, session DESC);

CREATE TABLE IF NOT EXISTS prediction_cycles (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    variant        TEXT NOT NULL,
    cycle_number   INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'active',
    draws_tracked  INTEGER NOT NULL DEFAULT 0,
    max_draws      INTEGER NOT NULL,
    model_version  TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    completed_at   TEXT,
    UNIQUE (variant, cycle_number)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_cycle
    ON prediction_cycles (variant) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS predictions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle_id       INTEGER NOT NULL UNIQUE REFERENCES prediction_cycles(id),
    variant        TEXT NOT NULL,
    numbers        TEXT NOT NULL,
    special        INTEGER,
    model_version  TEXT NOT NULL,
    weights        TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS match_results (
    cycle_id           INTEGER NOT NULL REFERENCES prediction_cycles(id),
    variant            TEXT NOT NULL,
    draw_id            TEXT NOT NULL,
    session            TEXT NOT NULL DEFAULT '',
    draw_date          TEXT NOT NULL,
    draw_number        INTEGER NOT NULL,
    predicted          TEXT NOT NULL,
    actual             TEXT NOT NULL,
    predicted_special  INTEGER,
    actual_special     INTEGER,
    matched            TEXT NOT NULL,
    matched_count      INTEGER NOT NULL,
    special_matched    INTEGER NOT NULL DEFAULT 0,
    prize_tier         TEXT NOT NULL,
    PRIMARY KEY (cycle_id, draw_id, session)
);

CREATE TABLE IF NOT EXISTS ensemble_weights (
    variant      TEXT PRIMARY KEY,
    sequence     REAL NOT NULL,
    secondary    REAL NOT NULL,
    statistical  REAL NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS training_logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    variant         TEXT NOT NULL,
    cycle_id        INTEGER NOT NULL,
    reason          TEXT NOT NULL,
    weights_before  TEXT NOT NULL,
    weights_after   TEXT,
    hit_3plus       INTEGER NOT NULL,
    hit_4plus       INTEGER NOT NULL,
    max_match       INTEGER NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
";

pub fn db_path() -> std::path::PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("vietlott.db");
    path
}

/// Opens (creating parent directories if needed) and configures a connection.
/// Writers that find the database locked wait up to `busy_timeout`.
pub fn open_db(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory {:?}", parent))?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Cannot open database {:?}", path))?;
    conn.busy_timeout(busy_timeout)
        .context("Cannot set busy timeout")?;
    conn.pragma_update(None, "foreign_keys", true)
        .context("Cannot enable foreign keys")?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Migration failed")?;
    Ok(())
}
