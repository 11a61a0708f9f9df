//! Snapshot store for state population generations
//!
//! Table written: `state_population_snapshots`
//! - `replace_all` - DELETE + INSERT inside one transaction (the only mutation path)
//! - reads: `list`, `get`, `count`, `probe`
//!
//! Readers share the connection mutex with the writer, so a reader sees either
//! the previous generation or the new one, never a mix.

use super::error::RefreshError;
use super::types::StatePopulationSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS state_population_snapshots (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    state_name          TEXT NOT NULL,
    population          INTEGER NOT NULL CHECK (population >= 0),
    retrieved_at_utc    INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_state_population_name
    ON state_population_snapshots(state_name COLLATE NOCASE);
"#;

/// Storage for the current snapshot generation
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomically replace the whole generation with `rows`
    ///
    /// On any failure (including cancellation before commit) the previous
    /// generation is left untouched. Returns the number of rows written.
    async fn replace_all(
        &self,
        rows: &[StatePopulationSnapshot],
        cancel: &CancellationToken,
    ) -> Result<usize, RefreshError>;

    /// All rows ordered by state name, optionally filtered by a
    /// case-insensitive substring of the state name
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<StatePopulationSnapshot>, RefreshError>;

    /// Row with exactly this state name
    async fn get(&self, state_name: &str) -> Result<Option<StatePopulationSnapshot>, RefreshError>;

    async fn count(&self) -> Result<usize, RefreshError>;

    /// Connectivity check; returns whether any rows exist
    async fn probe(&self) -> Result<bool, RefreshError>;
}

/// SQLite implementation of SnapshotStore
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, RefreshError> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RefreshError::Storage(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("📊 SQLite journal_mode={}", mode);

        Self::from_connection(conn)
    }

    /// Wrap an existing connection (e.g. in-memory) and apply the schema
    pub fn from_connection(conn: Connection) -> Result<Self, RefreshError> {
        conn.execute_batch(SCHEMA)?;
        log::info!("✅ Snapshot store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RefreshError> {
        self.conn
            .lock()
            .map_err(|_| RefreshError::Storage("snapshot store lock poisoned".to_string()))
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatePopulationSnapshot> {
        let millis: i64 = row.get(2)?;
        let retrieved_at_utc = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, millis))?;

        Ok(StatePopulationSnapshot {
            state_name: row.get(0)?,
            population: row.get(1)?,
            retrieved_at_utc,
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn replace_all(
        &self,
        rows: &[StatePopulationSnapshot],
        cancel: &CancellationToken,
    ) -> Result<usize, RefreshError> {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let removed = tx.execute("DELETE FROM state_population_snapshots", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO state_population_snapshots (state_name, population, retrieved_at_utc)
                 VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.state_name,
                    row.population,
                    row.retrieved_at_utc.timestamp_millis(),
                ])?;
            }
        }

        // Dropping `tx` without commit rolls back
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }
        tx.commit()?;

        log::debug!("✅ Replaced {} snapshot rows with {}", removed, rows.len());
        Ok(rows.len())
    }

    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<StatePopulationSnapshot>, RefreshError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT state_name, population, retrieved_at_utc
             FROM state_population_snapshots
             WHERE ?1 IS NULL OR instr(lower(state_name), lower(?1)) > 0
             ORDER BY state_name",
        )?;

        let rows = stmt
            .query_map([name_filter], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get(&self, state_name: &str) -> Result<Option<StatePopulationSnapshot>, RefreshError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT state_name, population, retrieved_at_utc
                 FROM state_population_snapshots
                 WHERE state_name = ?1
                 LIMIT 1",
                [state_name],
                Self::read_row,
            )
            .optional()?;
        Ok(row)
    }

    async fn count(&self) -> Result<usize, RefreshError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM state_population_snapshots", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    async fn probe(&self) -> Result<bool, RefreshError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        let has_rows: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM state_population_snapshots)",
            [],
            |row| row.get(0),
        )?;
        Ok(has_rows)
    }
}
