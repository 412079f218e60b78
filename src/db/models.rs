// src/db/models.rs

//! Entity types and their CRUD operations against the relational store.
//!
//! Every struct here is both the database row shape and the package wire
//! format (`#[serde(rename_all = "camelCase")]` matches the JSON field
//! names used in `.jsonl` change streams and the conflict ledger). All
//! operations here are synchronous; the engine handle runs them on the
//! blocking task pool (§5).

use crate::db::with_retry;
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hint carried by locally authored problems and export/import manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Personal,
    Corporate,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Personal => "Personal",
            SourceKind::Corporate => "Corporate",
        }
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Personal" => Ok(SourceKind::Personal),
            "Corporate" => Ok(SourceKind::Corporate),
            other => Err(Error::Validation(format!("invalid sourceKind: {other}"))),
        }
    }
}

/// Reserved `environmentJson` key carrying the authoring profession id.
pub const PROFESSION_META_KEY: &str = "__professionid";

/// A debugging case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub symptom: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub solution: String,
    /// Raw JSON object text. Kept as a string rather than a typed map so
    /// arbitrary caller-supplied fields round-trip untouched.
    #[serde(default = "empty_json_object")]
    pub environment_json: String,
    #[serde(default)]
    pub severity: i64,
    #[serde(default)]
    pub status: i64,
    pub created_by: Option<String>,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub is_deleted: bool,
    pub deleted_at_utc: Option<String>,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub updated_by_instance_id: String,
}

fn empty_json_object() -> String {
    "{}".to_string()
}

impl Problem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let source_kind_str: String = row.get("sourceKind")?;
        let source_kind = source_kind_str.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "sourceKind".into(), rusqlite::types::Type::Text)
        })?;

        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            symptom: row.get("symptom")?,
            root_cause: row.get("rootCause")?,
            solution: row.get("solution")?,
            environment_json: row.get("environmentJson")?,
            severity: row.get("severity")?,
            status: row.get("status")?,
            created_by: row.get("createdBy")?,
            source_kind,
            is_deleted: row.get::<_, i64>("isDeleted")? != 0,
            deleted_at_utc: row.get("deletedAtUtc")?,
            created_at_utc: row.get("createdAtUtc")?,
            updated_at_utc: row.get("updatedAtUtc")?,
            updated_by_instance_id: row.get("updatedByInstanceId")?,
        })
    }

    /// Write this row, creating it if absent or fully replacing mutable
    /// columns if present, and keep the FTS index in lockstep: deleted
    /// problems have no index row (invariant 9).
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        with_retry("problem::upsert", || {
            conn.execute(
                "INSERT INTO problem (id, title, symptom, rootCause, solution, environmentJson,
                                       severity, status, createdBy, sourceKind, isDeleted, deletedAtUtc,
                                       createdAtUtc, updatedAtUtc, updatedByInstanceId)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
                 ON CONFLICT(id) DO UPDATE SET
                    title=excluded.title, symptom=excluded.symptom, rootCause=excluded.rootCause,
                    solution=excluded.solution, environmentJson=excluded.environmentJson,
                    severity=excluded.severity, status=excluded.status, createdBy=excluded.createdBy,
                    sourceKind=excluded.sourceKind, isDeleted=excluded.isDeleted,
                    deletedAtUtc=excluded.deletedAtUtc, updatedAtUtc=excluded.updatedAtUtc,
                    updatedByInstanceId=excluded.updatedByInstanceId",
                params![
                    self.id,
                    self.title,
                    self.symptom,
                    self.root_cause,
                    self.solution,
                    self.environment_json,
                    self.severity,
                    self.status,
                    self.created_by,
                    self.source_kind.as_str(),
                    self.is_deleted as i64,
                    self.deleted_at_utc,
                    self.created_at_utc,
                    self.updated_at_utc,
                    self.updated_by_instance_id,
                ],
            )
        })?;

        with_retry("problem::upsert_fts_delete", || {
            conn.execute("DELETE FROM problem_fts WHERE problemId = ?1", [&self.id])
        })?;
        if !self.is_deleted {
            with_retry("problem::upsert_fts_insert", || {
                conn.execute(
                    "INSERT INTO problem_fts (problemId, title, symptom, rootCause, solution, environmentJson)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    params![
                        self.id,
                        self.title,
                        self.symptom,
                        self.root_cause,
                        self.solution,
                        self.environment_json
                    ],
                )
            })?;
        }

        Ok(())
    }

    /// Soft-delete: sets `isDeleted`, `deletedAtUtc`, `updatedAtUtc`,
    /// `updatedByInstanceId`, and removes the FTS row.
    pub fn soft_delete(conn: &Connection, id: &str, now_utc: &str, by_instance: &str) -> Result<()> {
        with_retry("problem::soft_delete", || {
            conn.execute(
                "UPDATE problem SET isDeleted=1, deletedAtUtc=?2, updatedAtUtc=?2, updatedByInstanceId=?3 WHERE id=?1",
                params![id, now_utc, by_instance],
            )
        })?;
        with_retry("problem::soft_delete_fts", || {
            conn.execute("DELETE FROM problem_fts WHERE problemId = ?1", [id])
        })?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        conn.query_row("SELECT * FROM problem WHERE id = ?1", [id], Self::from_row)
            .optional()
            .map_err(Error::from)
    }

    /// Problems whose `updatedAtUtc` strictly exceeds `since` (or all, when
    /// `since` is `None`), ordered ascending for package export streams.
    pub fn list_updated_after(conn: &Connection, since: Option<&str>, limit: Option<i64>) -> Result<Vec<Self>> {
        let sql = "SELECT * FROM problem WHERE (?1 IS NULL OR updatedAtUtc > ?1) ORDER BY updatedAtUtc ASC LIMIT ?2";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![since, limit.unwrap_or(i64::MAX)], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// A named label applied to problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub updated_by_instance_id: String,
}

impl Tag {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            is_deleted: row.get::<_, i64>("isDeleted")? != 0,
            created_at_utc: row.get("createdAtUtc")?,
            updated_at_utc: row.get("updatedAtUtc")?,
            updated_by_instance_id: row.get("updatedByInstanceId")?,
        })
    }

    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        with_retry("tag::upsert", || {
            conn.execute(
                "INSERT INTO tag (id, name, isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name, isDeleted=excluded.isDeleted,
                    updatedAtUtc=excluded.updatedAtUtc, updatedByInstanceId=excluded.updatedByInstanceId",
                params![
                    self.id,
                    self.name,
                    self.is_deleted as i64,
                    self.created_at_utc,
                    self.updated_at_utc,
                    self.updated_by_instance_id
                ],
            )
        })?;
        Ok(())
    }

    /// Idempotent create: returns the existing active tag with the same
    /// case-folded name if one exists, otherwise inserts a new one.
    pub fn create(conn: &Connection, id: &str, name: &str, now_utc: &str, by_instance: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("tag name must not be empty".into()));
        }

        if let Some(existing) = Self::find_active_by_name(conn, trimmed)? {
            return Ok(existing);
        }

        let tag = Tag {
            id: id.to_string(),
            name: trimmed.to_string(),
            is_deleted: false,
            created_at_utc: now_utc.to_string(),
            updated_at_utc: now_utc.to_string(),
            updated_by_instance_id: by_instance.to_string(),
        };
        tag.upsert(conn)?;
        Ok(tag)
    }

    pub fn find_active_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        conn.query_row(
            "SELECT * FROM tag WHERE isDeleted = 0 AND lower(trim(name)) = lower(trim(?1))",
            [name],
            Self::from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        conn.query_row("SELECT * FROM tag WHERE id = ?1", [id], Self::from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn list_all_active(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT * FROM tag WHERE isDeleted = 0 ORDER BY name")?;
        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_updated_after(conn: &Connection, since: Option<&str>, limit: Option<i64>) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM tag WHERE (?1 IS NULL OR updatedAtUtc > ?1) ORDER BY updatedAtUtc ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, limit.unwrap_or(i64::MAX)], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Cascades `isDeleted=1` to all active links referencing this tag.
    pub fn soft_delete(conn: &Connection, id: &str, now_utc: &str, by_instance: &str) -> Result<()> {
        with_retry("tag::soft_delete", || {
            conn.execute(
                "UPDATE tag SET isDeleted=1, updatedAtUtc=?2, updatedByInstanceId=?3 WHERE id=?1",
                params![id, now_utc, by_instance],
            )
        })?;
        with_retry("tag::soft_delete_cascade_links", || {
            conn.execute(
                "UPDATE problemTag SET isDeleted=1, updatedAtUtc=?2, updatedByInstanceId=?3
                 WHERE tagId=?1 AND isDeleted=0",
                params![id, now_utc, by_instance],
            )
        })?;
        Ok(())
    }
}

/// A many-to-many link between a problem and a tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemTag {
    pub id: String,
    pub problem_id: String,
    pub tag_id: String,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub updated_by_instance_id: String,
}

impl ProblemTag {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            problem_id: row.get("problemId")?,
            tag_id: row.get("tagId")?,
            is_deleted: row.get::<_, i64>("isDeleted")? != 0,
            created_at_utc: row.get("createdAtUtc")?,
            updated_at_utc: row.get("updatedAtUtc")?,
            updated_by_instance_id: row.get("updatedByInstanceId")?,
        })
    }

    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        with_retry("problem_tag::upsert", || {
            conn.execute(
                "INSERT INTO problemTag (id, problemId, tagId, isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(id) DO UPDATE SET
                    problemId=excluded.problemId, tagId=excluded.tagId, isDeleted=excluded.isDeleted,
                    updatedAtUtc=excluded.updatedAtUtc, updatedByInstanceId=excluded.updatedByInstanceId",
                params![
                    self.id,
                    self.problem_id,
                    self.tag_id,
                    self.is_deleted as i64,
                    self.created_at_utc,
                    self.updated_at_utc,
                    self.updated_by_instance_id
                ],
            )
        })?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        conn.query_row("SELECT * FROM problemTag WHERE id = ?1", [id], Self::from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn active_for_problem(conn: &Connection, problem_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM problemTag WHERE problemId = ?1 AND isDeleted = 0 ORDER BY createdAtUtc",
        )?;
        let rows = stmt
            .query_map([problem_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_updated_after(conn: &Connection, since: Option<&str>, limit: Option<i64>) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM problemTag WHERE (?1 IS NULL OR updatedAtUtc > ?1) ORDER BY updatedAtUtc ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, limit.unwrap_or(i64::MAX)], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Soft-deletes all currently active links for `problem_id`, then for
    /// each desired tag id either revives an existing link or inserts a new
    /// one. Caller is expected to run this inside a transaction.
    pub fn set_tags_for_problem(
        conn: &Connection,
        problem_id: &str,
        desired_tag_ids: &[String],
        now_utc: &str,
        by_instance: &str,
        new_id_for: impl Fn() -> String,
    ) -> Result<()> {
        with_retry("problem_tag::set_tags_for_problem_clear", || {
            conn.execute(
                "UPDATE problemTag SET isDeleted=1, updatedAtUtc=?2, updatedByInstanceId=?3
                 WHERE problemId=?1 AND isDeleted=0",
                params![problem_id, now_utc, by_instance],
            )
        })?;

        for tag_id in desired_tag_ids {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM problemTag WHERE problemId=?1 AND tagId=?2 ORDER BY createdAtUtc LIMIT 1",
                    params![problem_id, tag_id],
                    |r| r.get(0),
                )
                .optional()?;

            match existing {
                Some(link_id) => {
                    with_retry("problem_tag::set_tags_for_problem_revive", || {
                        conn.execute(
                            "UPDATE problemTag SET isDeleted=0, updatedAtUtc=?2, updatedByInstanceId=?3 WHERE id=?1",
                            params![link_id, now_utc, by_instance],
                        )
                    })?;
                }
                None => {
                    let link = ProblemTag {
                        id: new_id_for(),
                        problem_id: problem_id.to_string(),
                        tag_id: tag_id.clone(),
                        is_deleted: false,
                        created_at_utc: now_utc.to_string(),
                        updated_at_utc: now_utc.to_string(),
                        updated_by_instance_id: by_instance.to_string(),
                    };
                    link.upsert(conn)?;
                }
            }
        }

        Ok(())
    }
}

/// Metadata for an attachment; the bytes live in the content-addressed blob
/// store, keyed by `content_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub problem_id: String,
    pub original_file_name: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub updated_by_instance_id: String,
}

impl Attachment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            problem_id: row.get("problemId")?,
            original_file_name: row.get("originalFileName")?,
            content_hash: row.get("contentHash")?,
            size_bytes: row.get("sizeBytes")?,
            mime_type: row.get("mimeType")?,
            is_deleted: row.get::<_, i64>("isDeleted")? != 0,
            created_at_utc: row.get("createdAtUtc")?,
            updated_at_utc: row.get("updatedAtUtc")?,
            updated_by_instance_id: row.get("updatedByInstanceId")?,
        })
    }

    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        with_retry("attachment::upsert", || {
            conn.execute(
                "INSERT INTO attachment (id, problemId, originalFileName, contentHash, sizeBytes, mimeType,
                                          isDeleted, createdAtUtc, updatedAtUtc, updatedByInstanceId)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(id) DO UPDATE SET
                    problemId=excluded.problemId, originalFileName=excluded.originalFileName,
                    contentHash=excluded.contentHash, sizeBytes=excluded.sizeBytes, mimeType=excluded.mimeType,
                    isDeleted=excluded.isDeleted, updatedAtUtc=excluded.updatedAtUtc,
                    updatedByInstanceId=excluded.updatedByInstanceId",
                params![
                    self.id,
                    self.problem_id,
                    self.original_file_name,
                    self.content_hash,
                    self.size_bytes,
                    self.mime_type,
                    self.is_deleted as i64,
                    self.created_at_utc,
                    self.updated_at_utc,
                    self.updated_by_instance_id
                ],
            )
        })?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        conn.query_row("SELECT * FROM attachment WHERE id = ?1", [id], Self::from_row)
            .optional()
            .map_err(Error::from)
    }

    pub fn for_problem(conn: &Connection, problem_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM attachment WHERE problemId = ?1 AND isDeleted = 0 ORDER BY createdAtUtc",
        )?;
        let rows = stmt
            .query_map([problem_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Non-deleted attachments referencing `content_hash`, used to decide
    /// whether a blob is still reachable before purge.
    pub fn referencing_hash(conn: &Connection, content_hash: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT * FROM attachment WHERE contentHash = ?1 AND isDeleted = 0")?;
        let rows = stmt
            .query_map([content_hash], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_updated_after(conn: &Connection, since: Option<&str>, limit: Option<i64>) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM attachment WHERE (?1 IS NULL OR updatedAtUtc > ?1) ORDER BY updatedAtUtc ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, limit.unwrap_or(i64::MAX)], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Which side of a conflict an entity belongs to; also the discriminant
/// stored on the conflict ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Problem,
    Tag,
    ProblemTag,
    Attachment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Problem => "Problem",
            EntityType::Tag => "Tag",
            EntityType::ProblemTag => "ProblemTag",
            EntityType::Attachment => "Attachment",
        }
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Problem" => Ok(EntityType::Problem),
            "Tag" => Ok(EntityType::Tag),
            "ProblemTag" => Ok(EntityType::ProblemTag),
            "Attachment" => Ok(EntityType::Attachment),
            other => Err(Error::Validation(format!("invalid entityType: {other}"))),
        }
    }
}

/// The import-side watermark for a `(local, remote)` pair.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub local_instance_id: String,
    pub remote_instance_id: String,
    pub last_imported_updated_at_utc: Option<String>,
    pub last_package_id: Option<String>,
}

impl SyncState {
    pub fn get(conn: &Connection, local: &str, remote: &str) -> Result<Option<Self>> {
        conn.query_row(
            "SELECT localInstanceId, remoteInstanceId, lastImportedUpdatedAtUtc, lastPackageId
             FROM syncState WHERE localInstanceId=?1 AND remoteInstanceId=?2",
            params![local, remote],
            |row| {
                Ok(SyncState {
                    local_instance_id: row.get(0)?,
                    remote_instance_id: row.get(1)?,
                    last_imported_updated_at_utc: row.get(2)?,
                    last_package_id: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn advance(conn: &Connection, local: &str, remote: &str, max_updated_at_utc: &str, package_id: &str) -> Result<()> {
        with_retry("sync_state::advance", || {
            conn.execute(
                "INSERT INTO syncState (localInstanceId, remoteInstanceId, lastImportedUpdatedAtUtc, lastPackageId)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(localInstanceId, remoteInstanceId) DO UPDATE SET
                    lastImportedUpdatedAtUtc=excluded.lastImportedUpdatedAtUtc, lastPackageId=excluded.lastPackageId",
                params![local, remote, max_updated_at_utc, package_id],
            )
        })?;
        Ok(())
    }
}

/// The export-side watermark for a `(local, remote)` pair.
#[derive(Debug, Clone)]
pub struct ExportState {
    pub local_instance_id: String,
    pub remote_instance_id: String,
    pub last_exported_updated_at_utc: Option<String>,
    pub last_package_id: Option<String>,
}

impl ExportState {
    pub fn get(conn: &Connection, local: &str, remote: &str) -> Result<Option<Self>> {
        conn.query_row(
            "SELECT localInstanceId, remoteInstanceId, lastExportedUpdatedAtUtc, lastPackageId
             FROM exportState WHERE localInstanceId=?1 AND remoteInstanceId=?2",
            params![local, remote],
            |row| {
                Ok(ExportState {
                    local_instance_id: row.get(0)?,
                    remote_instance_id: row.get(1)?,
                    last_exported_updated_at_utc: row.get(2)?,
                    last_package_id: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn advance(conn: &Connection, local: &str, remote: &str, max_updated_at_utc: &str, package_id: &str) -> Result<()> {
        with_retry("export_state::advance", || {
            conn.execute(
                "INSERT INTO exportState (localInstanceId, remoteInstanceId, lastExportedUpdatedAtUtc, lastPackageId)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(localInstanceId, remoteInstanceId) DO UPDATE SET
                    lastExportedUpdatedAtUtc=excluded.lastExportedUpdatedAtUtc, lastPackageId=excluded.lastPackageId",
                params![local, remote, max_updated_at_utc, package_id],
            )
        })?;
        Ok(())
    }
}
