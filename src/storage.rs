//! SQLite metadata store for photos, detection events, and saved replays.
//! Files themselves live on the filesystem; rows only carry paths.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Local, TimeZone, Timelike};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::utils::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct PhotoRow {
    pub id: i64,
    pub timestamp: i64,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub timestamp: i64,
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayRow {
    pub id: i64,
    pub timestamp: i64,
    pub duration: i64,
    pub frame_count: i64,
    pub file_size: i64,
    pub path: String,
}

/// Weekday (Monday = 0) x hour-of-day event counts
pub type Heatmap = [[u32; 24]; 7];

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_conn(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS photos (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp INTEGER NOT NULL,
              path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp INTEGER NOT NULL,
              label TEXT,
              confidence REAL,
              snapshot_path TEXT
            );

            CREATE TABLE IF NOT EXISTS replays (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp INTEGER NOT NULL,
              duration INTEGER NOT NULL,
              frame_count INTEGER NOT NULL,
              file_size INTEGER NOT NULL,
              path TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_ts ON events(timestamp);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store lock poisoned")
    }

    // --- photos ---

    pub fn add_photo(&self, timestamp: i64, path: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO photos (timestamp, path) VALUES (?1, ?2)",
            params![timestamp, path],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_photos(&self, limit: usize) -> Result<Vec<PhotoRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, timestamp, path FROM photos ORDER BY timestamp DESC LIMIT ?1")?;
        let rows = stmt
            .query_map([limit], |r| {
                Ok(PhotoRow {
                    id: r.get(0)?,
                    timestamp: r.get(1)?,
                    path: r.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Delete one photo row, returning its path for file cleanup
    pub fn delete_photo(&self, id: i64) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let path: Option<String> = conn
            .query_row("SELECT path FROM photos WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        if path.is_some() {
            conn.execute("DELETE FROM photos WHERE id = ?1", [id])?;
        }
        Ok(path)
    }

    pub fn delete_all_photos(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let paths = collect_paths(&conn, "SELECT path FROM photos")?;
        conn.execute("DELETE FROM photos", [])?;
        Ok(paths)
    }

    // --- events ---

    pub fn add_event(
        &self,
        timestamp: i64,
        label: &str,
        confidence: f64,
        snapshot_path: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO events (timestamp, label, confidence, snapshot_path) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, label, confidence, snapshot_path],
        )?;
        Ok(())
    }

    pub fn list_events(&self, limit: usize) -> Result<Vec<EventRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, label, confidence, snapshot_path FROM events \
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], event_row)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn clear_events(&self) -> Result<usize, StoreError> {
        Ok(self.conn().execute("DELETE FROM events", [])?)
    }

    /// Drop events that never produced a snapshot (old false positives)
    pub fn clear_events_without_snapshots(&self) -> Result<usize, StoreError> {
        Ok(self
            .conn()
            .execute("DELETE FROM events WHERE snapshot_path IS NULL", [])?)
    }

    /// Event counts for the last `days`, bucketed by local weekday and hour
    pub fn heatmap(&self, days: u32) -> Result<Heatmap, StoreError> {
        let start = now_ts() - i64::from(days) * 86_400;
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT timestamp FROM events WHERE timestamp >= ?1")?;
        let timestamps = stmt
            .query_map([start], |r| r.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut buckets = [[0u32; 24]; 7];
        for ts in timestamps {
            if let Some(dt) = Local.timestamp_opt(ts, 0).single() {
                let wd = dt.weekday().num_days_from_monday() as usize;
                let hr = dt.hour() as usize;
                buckets[wd][hr] += 1;
            }
        }
        Ok(buckets)
    }

    /// Snapshot-bearing events falling in one heatmap cell, newest first
    pub fn heatmap_photos(
        &self,
        weekday: u32,
        hour: u32,
        days: u32,
        limit: usize,
        label: &str,
    ) -> Result<Vec<EventRow>, StoreError> {
        let start = now_ts() - i64::from(days) * 86_400;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, label, confidence, snapshot_path FROM events \
             WHERE timestamp >= ?1 AND label = ?2 AND snapshot_path IS NOT NULL \
             ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![start, label], event_row)?;

        let mut out = Vec::new();
        for row in rows {
            let row = row?;
            let Some(dt) = Local.timestamp_opt(row.timestamp, 0).single() else {
                continue;
            };
            if dt.weekday().num_days_from_monday() == weekday && dt.hour() == hour {
                out.push(row);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    // --- replays ---

    pub fn add_replay(
        &self,
        timestamp: i64,
        duration: i64,
        frame_count: i64,
        file_size: i64,
        path: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO replays (timestamp, duration, frame_count, file_size, path) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![timestamp, duration, frame_count, file_size, path],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_replays(&self, limit: usize) -> Result<Vec<ReplayRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, duration, frame_count, file_size, path FROM replays \
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |r| {
                Ok(ReplayRow {
                    id: r.get(0)?,
                    timestamp: r.get(1)?,
                    duration: r.get(2)?,
                    frame_count: r.get(3)?,
                    file_size: r.get(4)?,
                    path: r.get(5)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    pub fn delete_replay(&self, id: i64) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let path: Option<String> = conn
            .query_row("SELECT path FROM replays WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        if path.is_some() {
            conn.execute("DELETE FROM replays WHERE id = ?1", [id])?;
        }
        Ok(path)
    }

    pub fn delete_all_replays(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let paths = collect_paths(&conn, "SELECT path FROM replays")?;
        conn.execute("DELETE FROM replays", [])?;
        Ok(paths)
    }

    /// Keep the newest `keep` replays; returns the evicted paths
    pub fn prune_replays(&self, keep: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, path FROM replays ORDER BY timestamp DESC LIMIT -1 OFFSET ?1",
        )?;
        let rows = stmt
            .query_map([keep], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut paths = Vec::with_capacity(rows.len());
        for (id, path) in rows {
            conn.execute("DELETE FROM replays WHERE id = ?1", [id])?;
            paths.push(path);
        }
        Ok(paths)
    }
}

fn event_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: r.get(0)?,
        timestamp: r.get(1)?,
        label: r.get(2)?,
        confidence: r.get(3)?,
        snapshot_path: r.get(4)?,
    })
}

fn collect_paths(conn: &Connection, sql: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let paths = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    Ok(paths)
}
