// src/conflict.rs

//! Conflict Ledger (C8): an append-only record of import changes that lost
//! their last-writer-wins arbitration, reviewable and resolvable by a human
//! operator.

use crate::db::models::{Attachment, EntityType, Problem, ProblemTag, Tag};
use crate::db::with_retry;
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    KeepLocal,
    UseImported,
}

impl Resolution {
    fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "KeepLocal",
            Resolution::UseImported => "UseImported",
        }
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "KeepLocal" => Ok(Resolution::KeepLocal),
            "UseImported" => Ok(Resolution::UseImported),
            other => Err(Error::Validation(format!("invalid resolution: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub imported_updated_at_utc: String,
    pub local_updated_at_utc: String,
    pub local_json: String,
    pub imported_json: String,
    pub created_at_utc: String,
    pub resolved_at_utc: Option<String>,
    pub resolution: Option<Resolution>,
    pub resolved_by: Option<String>,
}

impl ConflictRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entity_type_str: String = row.get("entityType")?;
        let entity_type = entity_type_str.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "entityType".into(), rusqlite::types::Type::Text)
        })?;
        let resolution = match row.get::<_, Option<String>>("resolution")? {
            Some(s) => Some(s.parse().map_err(|_| {
                rusqlite::Error::InvalidColumnType(0, "resolution".into(), rusqlite::types::Type::Text)
            })?),
            None => None,
        };

        Ok(Self {
            id: row.get("id")?,
            entity_type,
            entity_id: row.get("entityId")?,
            imported_updated_at_utc: row.get("importedUpdatedAtUtc")?,
            local_updated_at_utc: row.get("localUpdatedAtUtc")?,
            local_json: row.get("localJson")?,
            imported_json: row.get("importedJson")?,
            created_at_utc: row.get("createdAtUtc")?,
            resolved_at_utc: row.get("resolvedAtUtc")?,
            resolution,
            resolved_by: row.get("resolvedBy")?,
        })
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        with_retry("conflict_record::insert", || {
            conn.execute(
                "INSERT INTO conflictRecord (id, entityType, entityId, importedUpdatedAtUtc, localUpdatedAtUtc,
                                              localJson, importedJson, createdAtUtc, resolvedAtUtc, resolution, resolvedBy)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    self.id,
                    self.entity_type.as_str(),
                    self.entity_id,
                    self.imported_updated_at_utc,
                    self.local_updated_at_utc,
                    self.local_json,
                    self.imported_json,
                    self.created_at_utc,
                    self.resolved_at_utc,
                    self.resolution.map(|r| r.as_str()),
                    self.resolved_by,
                ],
            )
        })?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        conn.query_row("SELECT * FROM conflictRecord WHERE id = ?1", [id], Self::from_row)
            .optional()
            .map_err(Error::from)
    }
}

/// Most-recent `limit` unresolved conflicts, newest first.
pub fn list_unresolved(conn: &Connection, limit: i64) -> Result<Vec<ConflictRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM conflictRecord WHERE resolvedAtUtc IS NULL ORDER BY createdAtUtc DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], ConflictRecord::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A conflict detail re-serialises the *current* local entity, not the
/// snapshot taken at detection time (the snapshot is retained on the
/// record for audit, per §4.7).
#[derive(Debug, Clone)]
pub struct ConflictDetail {
    pub record: ConflictRecord,
    pub current_local_json: Option<String>,
}

pub fn get_detail(conn: &Connection, id: &str) -> Result<Option<ConflictDetail>> {
    let Some(record) = ConflictRecord::find_by_id(conn, id)? else {
        return Ok(None);
    };

    let current_local_json = match record.entity_type {
        EntityType::Problem => Problem::find_by_id(conn, &record.entity_id)?
            .map(|e| serde_json::to_string(&e))
            .transpose()?,
        EntityType::Tag => Tag::find_by_id(conn, &record.entity_id)?
            .map(|e| serde_json::to_string(&e))
            .transpose()?,
        EntityType::ProblemTag => ProblemTag::find_by_id(conn, &record.entity_id)?
            .map(|e| serde_json::to_string(&e))
            .transpose()?,
        EntityType::Attachment => Attachment::find_by_id(conn, &record.entity_id)?
            .map(|e| serde_json::to_string(&e))
            .transpose()?,
    };

    Ok(Some(ConflictDetail { record, current_local_json }))
}

/// Resolve a conflict. `KeepLocal` only marks the record; `UseImported`
/// deserialises `importedJson` and applies it through the same row-write
/// path as merge, unconditionally bypassing LWW. Caller runs this inside a
/// transaction.
pub fn resolve(
    conn: &Connection,
    id: &str,
    resolution: Resolution,
    now_utc: &str,
    resolved_by: &str,
) -> Result<()> {
    let Some(record) = ConflictRecord::find_by_id(conn, id)? else {
        return Err(Error::NotFound(format!("conflict record {id}")));
    };

    if resolution == Resolution::UseImported {
        match record.entity_type {
            EntityType::Problem => {
                let entity: Problem = serde_json::from_str(&record.imported_json)?;
                entity.upsert(conn)?;
            }
            EntityType::Tag => {
                let entity: Tag = serde_json::from_str(&record.imported_json)?;
                entity.upsert(conn)?;
            }
            EntityType::ProblemTag => {
                let entity: ProblemTag = serde_json::from_str(&record.imported_json)?;
                entity.upsert(conn)?;
            }
            EntityType::Attachment => {
                let entity: Attachment = serde_json::from_str(&record.imported_json)?;
                entity.upsert(conn)?;
            }
        }
    }

    with_retry("conflict_record::resolve", || {
        conn.execute(
            "UPDATE conflictRecord SET resolvedAtUtc=?2, resolution=?3, resolvedBy=?4 WHERE id=?1",
            params![id, now_utc, resolution.as_str(), resolved_by],
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, models::SourceKind};
    use tempfile::NamedTempFile;

    fn test_conn() -> Connection {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();
        drop(temp);
        db::init(&path).unwrap()
    }

    fn local_problem() -> Problem {
        Problem {
            id: "p1".into(),
            title: "local title".into(),
            symptom: String::new(),
            root_cause: String::new(),
            solution: String::new(),
            environment_json: "{}".into(),
            severity: 0,
            status: 0,
            created_by: None,
            source_kind: SourceKind::Personal,
            is_deleted: false,
            deleted_at_utc: None,
            created_at_utc: "2024-01-03T00:00:00Z".into(),
            updated_at_utc: "2024-01-03T00:00:00Z".into(),
            updated_by_instance_id: "local-instance".into(),
        }
    }

    fn make_conflict(conn: &Connection, imported_json: &str) -> ConflictRecord {
        let record = ConflictRecord {
            id: "c1".into(),
            entity_type: EntityType::Problem,
            entity_id: "p1".into(),
            imported_updated_at_utc: "2024-01-01T00:00:00Z".into(),
            local_updated_at_utc: "2024-01-03T00:00:00Z".into(),
            local_json: "{\"id\":\"p1\"}".into(),
            imported_json: imported_json.to_string(),
            created_at_utc: "2024-01-04T00:00:00Z".into(),
            resolved_at_utc: None,
            resolution: None,
            resolved_by: None,
        };
        record.insert(conn).unwrap();
        record
    }

    #[test]
    fn test_list_unresolved_excludes_resolved() {
        let conn = test_conn();
        local_problem().upsert(&conn).unwrap();
        let imported = serde_json::to_string(&local_problem()).unwrap();
        make_conflict(&conn, &imported);

        let unresolved = list_unresolved(&conn, 10).unwrap();
        assert_eq!(unresolved.len(), 1);

        resolve(&conn, "c1", Resolution::KeepLocal, "2024-01-05T00:00:00Z", "operator").unwrap();
        let unresolved = list_unresolved(&conn, 10).unwrap();
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_detail_reflects_live_local_state_not_snapshot() {
        let conn = test_conn();
        local_problem().upsert(&conn).unwrap();
        let imported = serde_json::to_string(&local_problem()).unwrap();
        make_conflict(&conn, &imported);

        let mut mutated = local_problem();
        mutated.title = "edited after conflict detection".into();
        mutated.upsert(&conn).unwrap();

        let detail = get_detail(&conn, "c1").unwrap().unwrap();
        assert!(detail.current_local_json.unwrap().contains("edited after conflict detection"));
    }

    #[test]
    fn test_resolve_use_imported_applies_entity_unconditionally() {
        let conn = test_conn();
        local_problem().upsert(&conn).unwrap();

        let mut imported_entity = local_problem();
        imported_entity.title = "older imported title".into();
        imported_entity.updated_at_utc = "2024-01-01T00:00:00Z".into();
        let imported_json = serde_json::to_string(&imported_entity).unwrap();
        make_conflict(&conn, &imported_json);

        resolve(&conn, "c1", Resolution::UseImported, "2024-01-05T00:00:00Z", "operator").unwrap();

        let current = Problem::find_by_id(&conn, "p1").unwrap().unwrap();
        assert_eq!(current.title, "older imported title");

        let record = ConflictRecord::find_by_id(&conn, "c1").unwrap().unwrap();
        assert_eq!(record.resolution, Some(Resolution::UseImported));
        assert!(record.resolved_at_utc.is_some());
    }

    #[test]
    fn test_resolve_keep_local_does_not_change_entity() {
        let conn = test_conn();
        local_problem().upsert(&conn).unwrap();
        let mut imported_entity = local_problem();
        imported_entity.title = "should not be applied".into();
        let imported_json = serde_json::to_string(&imported_entity).unwrap();
        make_conflict(&conn, &imported_json);

        resolve(&conn, "c1", Resolution::KeepLocal, "2024-01-05T00:00:00Z", "operator").unwrap();

        let current = Problem::find_by_id(&conn, "p1").unwrap().unwrap();
        assert_eq!(current.title, "local title");
    }
}
