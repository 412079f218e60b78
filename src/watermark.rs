// src/watermark.rs

//! Watermark Manager (C5): per `(local, remote)` export/import progress.
//!
//! The row storage lives in [`crate::db::models::SyncState`] and
//! [`crate::db::models::ExportState`]; this module is the narrow API the
//! package codec and LAN endpoint call against, keeping the watermark
//! semantics (which side advances when) in one place.

use crate::db::models::{ExportState, SyncState};
use crate::error::Result;
use rusqlite::Connection;

/// The export-side watermark for `(local, remote)`, or `None` before any
/// export has ever completed for that pair.
pub fn export_watermark(conn: &Connection, local: &str, remote: &str) -> Result<Option<String>> {
    Ok(ExportState::get(conn, local, remote)?.and_then(|s| s.last_exported_updated_at_utc))
}

/// Advance the export watermark after a package has been fully written to
/// disk. Best-effort: a crash between zip creation and this call repeats a
/// range on the next export, which is benign because re-apply is
/// idempotent under LWW (§9 open question).
pub fn advance_export(conn: &Connection, local: &str, remote: &str, max_updated_at_utc: &str, package_id: &str) -> Result<()> {
    ExportState::advance(conn, local, remote, max_updated_at_utc, package_id)
}

/// The import-side watermark for `(local, remote)`.
pub fn import_watermark(conn: &Connection, local: &str, remote: &str) -> Result<Option<String>> {
    Ok(SyncState::get(conn, local, remote)?.and_then(|s| s.last_imported_updated_at_utc))
}

/// Advance the import watermark. Called inside the same transaction as the
/// package apply, making it crash-safe (§5 Shared resources).
pub fn advance_import(conn: &Connection, local: &str, remote: &str, max_updated_at_utc: &str, package_id: &str) -> Result<()> {
    SyncState::advance(conn, local, remote, max_updated_at_utc, package_id)
}
