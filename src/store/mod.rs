//! SQLite record store: repositories, people, immutable commits and the
//! alert cache. One connection behind a mutex; every public operation is a
//! single short statement or transaction.

mod alerts;
mod commits;

use crate::error::{NexusError, Result};
use crate::model::SCHEMA_VERSION;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, Row};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

static OPENED: AtomicU64 = AtomicU64::new(0);

pub struct Store {
    conn: Mutex<Connection>,
    /// Marks alert generations started through this handle.
    owner: String,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "opened store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            owner: owner_token(),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.connection();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                reference TEXT
            );
            CREATE TABLE IF NOT EXISTS repository_links (
                repository_id TEXT NOT NULL,
                depends_on TEXT NOT NULL,
                PRIMARY KEY (repository_id, depends_on),
                FOREIGN KEY (repository_id) REFERENCES repositories(id),
                FOREIGN KEY (depends_on) REFERENCES repositories(id)
            );
            CREATE TABLE IF NOT EXISTS people (
                email TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                last_seen INTEGER NOT NULL,
                last_commit TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS commits (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                committer_name TEXT NOT NULL,
                committer_email TEXT NOT NULL,
                authored_at INTEGER NOT NULL,
                committed_at INTEGER NOT NULL,
                message TEXT NOT NULL,
                parent_ids TEXT NOT NULL,
                FOREIGN KEY (repository_id) REFERENCES repositories(id)
            );
            CREATE TABLE IF NOT EXISTS files (
                commit_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                path TEXT NOT NULL,
                status TEXT NOT NULL,
                additions INTEGER NOT NULL,
                deletions INTEGER NOT NULL,
                PRIMARY KEY (commit_id, position),
                FOREIGN KEY (commit_id) REFERENCES commits(id)
            );
            CREATE TABLE IF NOT EXISTS alert_cache (
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                reference TEXT,
                alerts TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                generated_at INTEGER NOT NULL,
                owner TEXT,
                started_at INTEGER,
                PRIMARY KEY (entity_kind, entity_id)
            );
            CREATE INDEX IF NOT EXISTS idx_commits_repository_window
                ON commits(repository_id, committed_at DESC, id);
            CREATE INDEX IF NOT EXISTS idx_commits_author_window
                ON commits(author_email, committed_at DESC, id);
            ",
        )?;
        Self::check_schema_version(&conn)?;
        Ok(())
    }

    fn check_schema_version(conn: &Connection) -> Result<()> {
        let user_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

        if user_version == 0 {
            let set_stmt = format!("PRAGMA user_version = {SCHEMA_VERSION};");
            conn.execute_batch(&set_stmt)?;
        } else if user_version != SCHEMA_VERSION as i64 {
            return Err(NexusError::Config(format!(
                "Schema version mismatch: expected {}, found {}",
                SCHEMA_VERSION, user_version
            )));
        }

        Ok(())
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owner_token() -> String {
    format!(
        "{}-{:x}-{}",
        std::process::id(),
        Utc::now().timestamp_micros(),
        OPENED.fetch_add(1, Ordering::Relaxed)
    )
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(idx, "timestamp".to_string(), rusqlite::types::Type::Integer)
    })
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
