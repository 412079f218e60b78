// src/error.rs

use thiserror::Error;

/// Core error types for the engine.
///
/// Each variant corresponds to one of the error kinds in the design: the
/// engine recovers exactly one class (`Busy`, via [`db::with_retry`]) and
/// propagates everything else unmodified.
///
/// [`db::with_retry`]: crate::db::with_retry
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors, including busy/locked after the retry budget
    /// is exhausted.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors from the blob store, package scratch directories, or
    /// config files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error.
    #[error("failed to initialize database: {0}")]
    InitError(String),

    /// Database not found at the given path.
    #[error("database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Entity or file referenced by an operation does not exist.
    ///
    /// Lookups return `Option::None` instead of this variant; this is only
    /// raised where absence is itself an error (e.g. a checksum target
    /// missing from an extracted package).
    #[error("not found: {0}")]
    NotFound(String),

    /// Checksum mismatch, corrupted JSON line, or missing manifest.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Invalid or missing required input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Socket read/write failure, timeout, or oversized header on the LAN
    /// endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or incorrect LAN shared key.
    #[error("unauthorized")]
    AuthFailure,

    /// Package (de)serialization failure.
    #[error("package error: {0}")]
    Package(String),

    /// Unrecoverable failure (out of space, permission denied on the data
    /// directory). The engine makes no attempt to recover from this.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Result type alias using the engine's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Package(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Integrity(format!("malformed JSON: {e}"))
    }
}
