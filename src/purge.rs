// src/purge.rs

//! The gated hard-delete path (§6 Purge). Unlike every other mutation in
//! the engine, this removes rows permanently: a problem, its tag links,
//! attachment metadata, FTS row, and any conflict records referencing it.
//! The operation-password gate that authorizes this in the GUI is out of
//! scope for the core (§1); the core only executes the filter once asked.

use crate::db::with_retry;
use crate::error::Result;
use crate::search::ProfessionFilter;
use rusqlite::Connection;

#[derive(Debug, Clone)]
pub struct HardDeleteFilter<'a> {
    pub tag_ids: &'a [String],
    pub profession: ProfessionFilter<'a>,
    pub updated_from_utc: Option<&'a str>,
    pub updated_to_utc: Option<&'a str>,
    pub include_soft_deleted: bool,
}

fn matching_problem_ids(conn: &Connection, filter: &HardDeleteFilter) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id, environmentJson, updatedAtUtc, isDeleted FROM problem")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)? != 0,
        ))
    })?;

    let mut matches = Vec::new();
    for row in rows {
        let (id, environment_json, updated_at_utc, is_deleted) = row?;

        if is_deleted && !filter.include_soft_deleted {
            continue;
        }
        if let Some(from) = filter.updated_from_utc {
            if updated_at_utc.as_str() < from {
                continue;
            }
        }
        if let Some(to) = filter.updated_to_utc {
            if updated_at_utc.as_str() > to {
                continue;
            }
        }
        match filter.profession {
            ProfessionFilter::All => {}
            ProfessionFilter::Unassigned => {
                if environment_json.contains("\"__professionid\":") {
                    continue;
                }
            }
            ProfessionFilter::Specific(pid) => {
                if !environment_json.contains(&format!("\"__professionid\":\"{pid}\"")) {
                    continue;
                }
            }
        }

        if !filter.tag_ids.is_empty() {
            let mut tag_stmt = conn.prepare(
                "SELECT tagId FROM problemTag WHERE problemId = ?1 AND isDeleted = 0
                 AND tagId IN (SELECT id FROM tag WHERE isDeleted = 0)",
            )?;
            let active: std::collections::HashSet<String> = tag_stmt
                .query_map([&id], |r| r.get::<_, String>(0))?
                .collect::<std::result::Result<_, _>>()?;
            if !filter.tag_ids.iter().all(|t| active.contains(t)) {
                continue;
            }
        }

        matches.push(id);
    }

    Ok(matches)
}

pub fn count_for_filter(conn: &Connection, filter: &HardDeleteFilter) -> Result<i64> {
    Ok(matching_problem_ids(conn, filter)?.len() as i64)
}

/// Permanently remove matching problems and everything that references
/// them. Runs inside a single transaction supplied by the caller (the
/// engine handle), so a failure partway through leaves the store
/// untouched.
pub fn hard_delete(conn: &Connection, filter: &HardDeleteFilter) -> Result<i64> {
    let ids = matching_problem_ids(conn, filter)?;

    for id in &ids {
        with_retry("purge::delete_fts", || {
            conn.execute("DELETE FROM problem_fts WHERE problemId = ?1", [id])
        })?;
        with_retry("purge::delete_conflict_records", || {
            conn.execute("DELETE FROM conflictRecord WHERE entityType = 'Problem' AND entityId = ?1", [id])
        })?;
        with_retry("purge::delete_attachments", || {
            conn.execute("DELETE FROM attachment WHERE problemId = ?1", [id])
        })?;
        with_retry("purge::delete_problem_tags", || {
            conn.execute("DELETE FROM problemTag WHERE problemId = ?1", [id])
        })?;
        with_retry("purge::delete_problem", || {
            conn.execute("DELETE FROM problem WHERE id = ?1", [id])
        })?;
    }

    Ok(ids.len() as i64)
}
