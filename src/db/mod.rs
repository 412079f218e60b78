// src/db/mod.rs

//! Database layer (C2): the embedded relational store.
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema migration
//! - Connection management (WAL, foreign keys, busy timeout)
//! - The busy-retry combinator used by every writer
//!
//! Entity CRUD lives in [`models`]; schema migrations live in [`schema`].

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before the single automatic retry on a busy/locked database.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Initialize a new database at the specified path.
///
/// Creates the database file and its parent directories if needed, then
/// migrates the schema up to [`schema::SCHEMA_VERSION`]. This is idempotent:
/// calling it on an already-migrated database is a no-op past the pragma
/// setup.
pub fn init(db_path: &str) -> Result<Connection> {
    debug!("initializing database at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("failed to create database directory: {e}")))?;
    }

    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn, true)?;
    schema::migrate(&conn)?;

    info!("database initialized at schema version {}", schema::SCHEMA_VERSION);
    Ok(conn)
}

/// Open an existing database, migrating it to the current schema version if
/// it lags behind.
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn, false)?;
    schema::migrate(&conn)?;

    Ok(conn)
}

fn apply_pragmas(conn: &Connection, fresh: bool) -> Result<()> {
    if fresh {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
    } else {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
    }
    Ok(())
}

/// Outcome of a retryable backend call.
pub enum Attempt<T> {
    Ok(T),
    Busy,
}

/// Run `f` once; if it reports SQLite busy/locked, sleep 250 ms and run it
/// exactly one more time. A second busy surfaces to the caller as
/// [`Error::Database`], per §7's `Busy` handling.
pub fn with_retry<T>(action: &str, mut f: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    match f() {
        Ok(v) => Ok(v),
        Err(e) if is_busy(&e) => {
            warn!("{action}: database busy, retrying after {BUSY_RETRY_DELAY:?}");
            thread::sleep(BUSY_RETRY_DELAY);
            match f() {
                Ok(v) => Ok(v),
                Err(e) => Err(Error::Database(e)),
            }
        }
        Err(e) => Err(Error::Database(e)),
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}
