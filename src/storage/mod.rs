//! Durable storage
//!
//! Two append-only tables, `observations` and `detections`, both tagged
//! with the traffic mode at write time. Reads always filter by mode, so
//! one mode's rows can never leak into the other's queries. Detection
//! inserts are exactly-once per (mode, source, window_id) via a unique
//! key; observation writes are best-effort.

pub mod writer;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection};

use crate::core::{Detection, Mode, Observation};

pub use writer::{BatchedWriter, BatchedWriterConfig, BatchedWriterHandle};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT NOT NULL,
    mode          TEXT NOT NULL,
    source        TEXT NOT NULL,
    route         TEXT NOT NULL,
    method        TEXT NOT NULL,
    status        INTEGER NOT NULL,
    latency_ms    REAL NOT NULL,
    payload_bytes INTEGER NOT NULL,
    user_agent    TEXT NOT NULL,
    param_count   INTEGER NOT NULL,
    injected_label TEXT
);
CREATE INDEX IF NOT EXISTS idx_observations_mode_ts ON observations(mode, timestamp);

CREATE TABLE IF NOT EXISTS detections (
    id            INTEGER NOT NULL,
    timestamp     TEXT NOT NULL,
    mode          TEXT NOT NULL,
    source        TEXT NOT NULL,
    window_id     INTEGER NOT NULL,
    risk_score    REAL NOT NULL,
    priority      TEXT NOT NULL,
    is_anomaly    INTEGER NOT NULL,
    root_cause    TEXT NOT NULL,
    payload       TEXT NOT NULL,
    UNIQUE(mode, source, window_id)
);
CREATE INDEX IF NOT EXISTS idx_detections_mode_ts ON detections(mode, timestamp);
";

/// Handle to the SQLite store. Cheap to clone; all access serializes on
/// one connection, which the batched writer keeps off the hot path.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open database {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    /// In-memory database for tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Insert one observation row. Raw parameter strings are not
    /// persisted, only their count.
    pub fn insert_observation(&self, obs: &Observation) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO observations (timestamp, mode, source, route, method, status, \
             latency_ms, payload_bytes, user_agent, param_count, injected_label) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.execute(params![
            obs.timestamp.to_rfc3339(),
            obs.mode.as_str(),
            obs.source,
            obs.route,
            obs.method.as_str(),
            obs.status,
            obs.latency_ms,
            obs.payload_bytes,
            obs.user_agent,
            obs.params.len() as i64,
            obs.injected_label,
        ])?;
        Ok(())
    }

    /// Insert one detection. Returns false when a row for the same
    /// (mode, source, window_id) already exists.
    pub fn insert_detection(&self, detection: &Detection) -> Result<bool> {
        let payload = serde_json::to_string(detection)?;
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO detections (id, timestamp, mode, source, window_id, \
             risk_score, priority, is_anomaly, root_cause, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        let inserted = stmt.execute(params![
            detection.id,
            detection.timestamp.to_rfc3339(),
            detection.mode.as_str(),
            detection.source,
            detection.window_id,
            detection.risk_score,
            detection.priority.as_str(),
            detection.is_anomaly as i64,
            detection.root_cause.as_str(),
            payload,
        ])?;
        Ok(inserted > 0)
    }

    /// Newest-first detections for one mode
    pub fn list_detections(&self, mode: Mode, limit: u32) -> Result<Vec<Detection>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM detections WHERE mode = ? \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![mode.as_str(), limit], |row| {
            row.get::<_, String>(0)
        })?;

        let mut detections = Vec::new();
        for payload in rows {
            detections.push(serde_json::from_str(&payload?)?);
        }
        Ok(detections)
    }

    pub fn count_detections(&self, mode: Mode) -> Result<u64> {
        let conn = self.lock();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM detections WHERE mode = ?",
            params![mode.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_observations(&self, mode: Mode) -> Result<u64> {
        let conn = self.lock();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE mode = ?",
            params![mode.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

}
