//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Subsystems never execute SQL; the engine hands their exported state
//! to the store at snapshot time.

use crate::{error::SimResult, event::EventLogEntry, types::Tick};
mod component_state;
use rusqlite::{params, Connection, OptionalExtension};

pub struct SimStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SimStore {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> SimResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, seed: u64, version: &str) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, seed, version, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, seed as i64, version, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn run_seed(&self, run_id: &str) -> SimResult<Option<u64>> {
        let seed = self
            .conn
            .query_row(
                "SELECT seed FROM run WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(seed.map(|s| s as u64))
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, tick, subsystem, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.tick as i64,
                entry.subsystem,
                entry.event_type,
                entry.payload,
                entry.tick as i64,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_tick(&self, run_id: &str, tick: Tick) -> SimResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, tick, subsystem, event_type, payload
             FROM event_log WHERE run_id = ?1 AND tick = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, tick as i64], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    tick: row.get::<_, i64>(2)? as u64,
                    subsystem: row.get(3)?,
                    event_type: row.get(4)?,
                    payload: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> SimResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?)
    }

    // ── Snapshot ───────────────────────────────────────────────

    /// Write a snapshot header, replacing any earlier snapshot at the same
    /// tick together with its component rows.
    pub fn save_snapshot(&self, run_id: &str, tick: Tick, state_json: &str) -> SimResult<()> {
        self.conn.execute(
            "DELETE FROM component_state WHERE run_id = ?1 AND tick = ?2",
            params![run_id, tick as i64],
        )?;
        self.conn.execute(
            "DELETE FROM snapshot WHERE run_id = ?1 AND tick = ?2",
            params![run_id, tick as i64],
        )?;
        self.conn.execute(
            "INSERT INTO snapshot (run_id, tick, state_json, saved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, tick as i64, state_json, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn latest_snapshot_before(
        &self,
        run_id: &str,
        tick: Tick,
    ) -> SimResult<Option<(Tick, String)>> {
        let result = self
            .conn
            .query_row(
                "SELECT tick, state_json FROM snapshot
                 WHERE run_id = ?1 AND tick <= ?2
                 ORDER BY tick DESC LIMIT 1",
                params![run_id, tick as i64],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(result)
    }

    pub fn snapshot_ticks(&self, run_id: &str) -> SimResult<Vec<Tick>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tick FROM snapshot WHERE run_id = ?1 ORDER BY tick ASC")?;
        let ticks = stmt
            .query_map(params![run_id], |row| Ok(row.get::<_, i64>(0)? as u64))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ticks)
    }
}
