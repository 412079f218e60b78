// src/db/schema.rs

//! Database schema definitions and migrations.
//!
//! Mirrors the migration harness of the store this engine was modelled on:
//! a `schema_version` table tracks the applied version, and `migrate` walks
//! forward one version at a time, never skipping or re-ordering.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 4;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date.
///
/// Migrations apply strictly in order 1→2→3→4; reapplying on an
/// already-migrated database is a no-op.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("current schema version: {current_version}");

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("applying migration to version {version}");
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("schema migration complete, now at version {SCHEMA_VERSION}");
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        3 => migrate_v3(conn),
        4 => migrate_v4(conn),
        _ => panic!("unknown migration version: {version}"),
    }
}

/// Schema version 1: base entity tables plus the FTS index.
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE problem (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            symptom TEXT NOT NULL DEFAULT '',
            rootCause TEXT NOT NULL DEFAULT '',
            solution TEXT NOT NULL DEFAULT '',
            environmentJson TEXT NOT NULL DEFAULT '{}',
            severity INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 0,
            createdBy TEXT,
            sourceKind TEXT NOT NULL DEFAULT 'Personal' CHECK(sourceKind IN ('Personal', 'Corporate')),
            isDeleted INTEGER NOT NULL DEFAULT 0,
            deletedAtUtc TEXT,
            createdAtUtc TEXT NOT NULL,
            updatedAtUtc TEXT NOT NULL,
            updatedByInstanceId TEXT NOT NULL
        );

        CREATE INDEX idx_problem_updatedAtUtc ON problem(updatedAtUtc);
        CREATE INDEX idx_problem_isDeleted ON problem(isDeleted);

        CREATE VIRTUAL TABLE problem_fts USING fts5(
            problemId UNINDEXED,
            title,
            symptom,
            rootCause,
            solution,
            environmentJson,
            tokenize = 'unicode61'
        );

        CREATE TABLE tag (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            isDeleted INTEGER NOT NULL DEFAULT 0,
            createdAtUtc TEXT NOT NULL,
            updatedAtUtc TEXT NOT NULL,
            updatedByInstanceId TEXT NOT NULL
        );

        CREATE TABLE problemTag (
            id TEXT PRIMARY KEY,
            problemId TEXT NOT NULL,
            tagId TEXT NOT NULL,
            isDeleted INTEGER NOT NULL DEFAULT 0,
            createdAtUtc TEXT NOT NULL,
            updatedAtUtc TEXT NOT NULL,
            updatedByInstanceId TEXT NOT NULL,
            FOREIGN KEY (problemId) REFERENCES problem(id),
            FOREIGN KEY (tagId) REFERENCES tag(id)
        );

        CREATE INDEX idx_problemTag_problemId ON problemTag(problemId);
        CREATE INDEX idx_problemTag_tagId ON problemTag(tagId);

        CREATE TABLE attachment (
            id TEXT PRIMARY KEY,
            problemId TEXT NOT NULL,
            originalFileName TEXT NOT NULL,
            contentHash TEXT NOT NULL,
            sizeBytes INTEGER NOT NULL,
            mimeType TEXT,
            isDeleted INTEGER NOT NULL DEFAULT 0,
            createdAtUtc TEXT NOT NULL,
            updatedAtUtc TEXT NOT NULL,
            updatedByInstanceId TEXT NOT NULL,
            FOREIGN KEY (problemId) REFERENCES problem(id)
        );

        CREATE INDEX idx_attachment_problemId ON attachment(problemId);
        CREATE INDEX idx_attachment_contentHash ON attachment(contentHash);

        CREATE TABLE syncState (
            localInstanceId TEXT NOT NULL,
            remoteInstanceId TEXT NOT NULL,
            lastImportedUpdatedAtUtc TEXT,
            lastPackageId TEXT,
            PRIMARY KEY (localInstanceId, remoteInstanceId)
        );

        CREATE TABLE conflictRecord (
            id TEXT PRIMARY KEY,
            entityType TEXT NOT NULL CHECK(entityType IN ('Problem', 'Tag', 'ProblemTag', 'Attachment')),
            entityId TEXT NOT NULL,
            importedUpdatedAtUtc TEXT NOT NULL,
            localUpdatedAtUtc TEXT NOT NULL,
            localJson TEXT NOT NULL,
            importedJson TEXT NOT NULL,
            createdAtUtc TEXT NOT NULL
        );

        CREATE INDEX idx_conflictRecord_entity ON conflictRecord(entityType, entityId);
        CREATE INDEX idx_conflictRecord_createdAtUtc ON conflictRecord(createdAtUtc);
        ",
    )?;

    info!("schema version 1 created successfully");
    Ok(())
}

/// Schema version 2: `updatedAtUtc` indexes on tag/problemTag/attachment,
/// plus the `exportState` table (kept separate from `syncState` so export
/// and import watermarks advance independently, per §5).
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE INDEX idx_tag_updatedAtUtc ON tag(updatedAtUtc);
        CREATE INDEX idx_problemTag_updatedAtUtc ON problemTag(updatedAtUtc);
        CREATE INDEX idx_attachment_updatedAtUtc ON attachment(updatedAtUtc);

        CREATE TABLE exportState (
            localInstanceId TEXT NOT NULL,
            remoteInstanceId TEXT NOT NULL,
            lastExportedUpdatedAtUtc TEXT,
            lastPackageId TEXT,
            PRIMARY KEY (localInstanceId, remoteInstanceId)
        );
        ",
    )?;

    info!("schema version 2 applied successfully");
    Ok(())
}

/// Schema version 3: conflict resolution tracking.
fn migrate_v3(conn: &Connection) -> Result<()> {
    debug!("migrating to schema version 3");

    conn.execute_batch(
        "
        ALTER TABLE conflictRecord ADD COLUMN resolvedAtUtc TEXT;
        ALTER TABLE conflictRecord ADD COLUMN resolution TEXT CHECK(resolution IN ('KeepLocal', 'UseImported') OR resolution IS NULL);
        ALTER TABLE conflictRecord ADD COLUMN resolvedBy TEXT;

        CREATE INDEX idx_conflictRecord_resolvedAtUtc ON conflictRecord(resolvedAtUtc);
        ",
    )?;

    info!("schema version 3 applied successfully");
    Ok(())
}

/// Schema version 4: deduplicate tags by `lower(trim(name))` on active rows,
/// remap links from duplicates to the canonical id, and enforce name
/// uniqueness on active tags going forward.
fn migrate_v4(conn: &Connection) -> Result<()> {
    debug!("migrating to schema version 4");

    // Canonical id per case-folded name: the earliest (createdAtUtc, id).
    conn.execute_batch(
        "
        CREATE TEMP TABLE tag_canonical AS
        SELECT lower(trim(name)) AS norm_name, MIN(createdAtUtc || char(1) || id) AS winner_key
        FROM tag
        WHERE isDeleted = 0
        GROUP BY lower(trim(name))
        HAVING COUNT(*) > 0;

        CREATE TEMP TABLE tag_remap AS
        SELECT t.id AS loser_id, substr(c.winner_key, instr(c.winner_key, char(1)) + 1) AS winner_id
        FROM tag t
        JOIN tag_canonical c ON lower(trim(t.name)) = c.norm_name
        WHERE t.isDeleted = 0
          AND t.id != substr(c.winner_key, instr(c.winner_key, char(1)) + 1);
        ",
    )?;

    // Remap problemTag links from losing duplicates to the canonical tag.
    conn.execute(
        "UPDATE problemTag
         SET tagId = (SELECT winner_id FROM tag_remap WHERE loser_id = problemTag.tagId),
             updatedByInstanceId = 'migration'
         WHERE tagId IN (SELECT loser_id FROM tag_remap)",
        [],
    )?;

    // Soft-delete the losing duplicate tags.
    conn.execute(
        "UPDATE tag
         SET isDeleted = 1, updatedByInstanceId = 'migration'
         WHERE id IN (SELECT loser_id FROM tag_remap)",
        [],
    )?;

    // After remapping, duplicate active (problemId, tagId) links may exist;
    // keep the lowest id and soft-delete the rest.
    conn.execute(
        "UPDATE problemTag
         SET isDeleted = 1, updatedByInstanceId = 'migration'
         WHERE isDeleted = 0
           AND id NOT IN (
               SELECT MIN(id) FROM problemTag WHERE isDeleted = 0
               GROUP BY problemId, tagId
           )",
        [],
    )?;

    conn.execute_batch(
        "
        DROP TABLE tag_remap;
        DROP TABLE tag_canonical;

        CREATE UNIQUE INDEX idx_tag_active_name ON tag(lower(trim(name))) WHERE isDeleted = 0;
        ",
    )?;

    info!("schema version 4 applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_schema_version_tracking() {
        let (_temp, conn) = create_test_db();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);
        set_schema_version(&conn, 1).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "problem",
            "tag",
            "problemTag",
            "attachment",
            "syncState",
            "exportState",
            "conflictRecord",
            "schema_version",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let (_temp, conn) = create_test_db();

        migrate(&conn).unwrap();
        let version1 = get_schema_version(&conn).unwrap();

        migrate(&conn).unwrap();
        let version2 = get_schema_version(&conn).unwrap();

        assert_eq!(version1, version2);
        assert_eq!(version1, SCHEMA_VERSION);
    }

    #[test]
    fn test_v4_dedupes_tags_and_enforces_unique_active_name() {
        let (_temp, conn) = create_test_db();

        for version in 1..=3 {
            apply_migration(&conn, version).unwrap();
            set_schema_version(&conn, version).unwrap();
        }

        conn.execute(
            "INSERT INTO tag (id, name, isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
             VALUES ('tag-a', '  Timeout ', 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', 'i1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tag (id, name, isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
             VALUES ('tag-b', 'timeout', 0, '2024-01-02T00:00:00Z', '2024-01-02T00:00:00Z', 'i1')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let active: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tag WHERE isDeleted = 0 AND lower(trim(name)) = 'timeout'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(active, 1);

        // Re-inserting a second active tag with the same case-folded name
        // now violates the partial unique index.
        let result = conn.execute(
            "INSERT INTO tag (id, name, isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
             VALUES ('tag-c', 'TIMEOUT', 0, '2024-01-03T00:00:00Z', '2024-01-03T00:00:00Z', 'i1')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_foreign_key_constraints() {
        let (_temp, conn) = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO attachment (id, problemId, originalFileName, contentHash, sizeBytes, createdAtUtc, updatedAtUtc, updatedByInstanceId)
             VALUES ('a1', 'missing-problem', 'x.log', 'deadbeef', 10, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z', 'i1')",
            [],
        );
        assert!(result.is_err());
    }
}
