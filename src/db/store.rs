//! SQLite database store implementation.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("target already exists: {0}")]
    Duplicate(String),
    #[error("invalid target: {0}")]
    Validation(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A durable key/value sink holding serialized records.
///
/// Implementations create whatever containing structure they need on demand.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, DbError>;

    /// Read the full record stored under `key`, `None` if absent.
    async fn read_all(&self, key: &str) -> Result<Option<Vec<u8>>, DbError>;

    /// Replace the record stored under `key`.
    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), DbError>;
}

/// Check the fields every stored target needs.
///
/// The target is handed to the probe binary as a single argument, so it
/// may not contain whitespace or look like an option.
pub fn validate_target(display_name: &str, target: &str) -> Result<(), DbError> {
    if display_name.trim().is_empty() || target.trim().is_empty() {
        return Err(DbError::Validation(
            "displayName and target are required".to_string(),
        ));
    }
    if target.chars().any(char::is_whitespace) || target.starts_with('-') {
        return Err(DbError::Validation(format!("malformed target: {:?}", target)));
    }
    Ok(())
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".to_string()))
    }

    // --- Target CRUD ---

    /// Add a new target. The target string must not already be configured.
    pub fn add_target(&self, target: &Target) -> Result<(), DbError> {
        validate_target(&target.display_name, &target.target)?;

        let conn = self.conn()?;
        if target_exists(&conn, &target.target)? {
            return Err(DbError::Duplicate(target.target.clone()));
        }

        conn.execute(
            "INSERT INTO targets (target, display_name, is_highlighted) VALUES (?1, ?2, ?3)",
            params![target.target, target.display_name, target.is_highlighted],
        )?;
        Ok(())
    }

    /// Replace the target identified by `id`, which may rename its host.
    pub fn update_target(&self, id: &str, target: &Target) -> Result<Target, DbError> {
        validate_target(&target.display_name, &target.target)?;

        let conn = self.conn()?;
        if target.target != id && target_exists(&conn, &target.target)? {
            return Err(DbError::Duplicate(target.target.clone()));
        }

        let changed = conn.execute(
            "UPDATE targets SET target=?1, display_name=?2, is_highlighted=?3 WHERE target=?4",
            params![target.target, target.display_name, target.is_highlighted, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(Target::new(&target.display_name, &target.target, target.is_highlighted))
    }

    /// Get all targets in creation order.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target, display_name, is_highlighted FROM targets ORDER BY rowid ASC",
        )?;

        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by its identity.
    pub fn get_target(&self, id: &str) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT target, display_name, is_highlighted FROM targets WHERE target = ?1",
            params![id],
            row_to_target,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a target. Its retained history ages out on its own.
    pub fn delete_target(&self, id: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM targets WHERE target = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

fn target_exists(conn: &Connection, target: &str) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM targets WHERE target = ?1",
        params![target],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_target(row: &rusqlite::Row<'_>) -> SqlResult<Target> {
    let target: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let is_highlighted: bool = row.get(2)?;
    Ok(Target::new(&display_name, &target, is_highlighted))
}

#[async_trait]
impl RecordSink for Store {
    async fn exists(&self, key: &str) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE key = ?1)",
            params![key],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    async fn read_all(&self, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        let conn = self.conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM records WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data)
    }

    async fn write_all(&self, key: &str, data: &[u8]) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (key, data) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
             data=excluded.data, updated_at=strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![key, data],
        )?;
        Ok(())
    }
}
