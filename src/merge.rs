// src/merge.rs

//! Merge Engine (C7): per-record last-writer-wins arbitration against the
//! local store, used by both package import and (indirectly, via
//! `conflict::resolve`'s `UseImported` path) conflict resolution.

use crate::conflict::ConflictRecord;
use crate::db::models::{Attachment, EntityType, Problem, ProblemTag, Tag};
use crate::error::Result;
use rusqlite::Connection;
use serde::Serialize;

/// Result of merging one incoming entity against local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Imported,
    Skipped,
    Conflict,
}

/// Minimal, uniform surface the merge engine needs from each of the four
/// wire entity types. Implemented for [`Problem`], [`Tag`], [`ProblemTag`],
/// and [`Attachment`]; each already knows how to look itself up and write
/// itself (including, for `Problem`, the FTS row refresh).
pub trait MergeableEntity: Sized + Serialize {
    fn entity_type() -> EntityType;
    fn id(&self) -> &str;
    fn updated_at_utc(&self) -> &str;
    fn updated_by_instance_id(&self) -> &str;
    fn find_local(conn: &Connection, id: &str) -> Result<Option<Self>>;
    fn write(&self, conn: &Connection) -> Result<()>;
    /// Minimal snapshot of `(id, updatedAtUtc, updatedByInstanceId)` for the
    /// conflict record's `localJson`, per §4.6.
    fn minimal_snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&serde_json::json!({
            "id": self.id(),
            "updatedAtUtc": self.updated_at_utc(),
            "updatedByInstanceId": self.updated_by_instance_id(),
        }))?)
    }
}

macro_rules! impl_mergeable {
    ($ty:ty, $kind:expr) => {
        impl MergeableEntity for $ty {
            fn entity_type() -> EntityType {
                $kind
            }
            fn id(&self) -> &str {
                &self.id
            }
            fn updated_at_utc(&self) -> &str {
                &self.updated_at_utc
            }
            fn updated_by_instance_id(&self) -> &str {
                &self.updated_by_instance_id
            }
            fn find_local(conn: &Connection, id: &str) -> Result<Option<Self>> {
                Self::find_by_id(conn, id)
            }
            fn write(&self, conn: &Connection) -> Result<()> {
                self.upsert(conn)
            }
        }
    };
}

impl_mergeable!(Problem, EntityType::Problem);
impl_mergeable!(Tag, EntityType::Tag);
impl_mergeable!(ProblemTag, EntityType::ProblemTag);
impl_mergeable!(Attachment, EntityType::Attachment);

/// Total order `(updatedAtUtc ASC, updatedByInstanceId ASC lexicographic)`.
fn remote_outranks_local(remote: (&str, &str), local: (&str, &str)) -> std::cmp::Ordering {
    remote.0.cmp(local.0).then_with(|| remote.1.cmp(local.1))
}

/// Merge one incoming entity against local state. Conflict records are
/// written with a caller-supplied id generator so the caller controls id
/// allocation (e.g. `Uuid::new_v4` in production, deterministic ids in
/// tests).
pub fn merge_entity<T: MergeableEntity>(
    conn: &Connection,
    incoming: &T,
    conflict_id: impl FnOnce() -> String,
    now_utc: &str,
) -> Result<MergeOutcome> {
    let Some(local) = T::find_local(conn, incoming.id())? else {
        incoming.write(conn)?;
        return Ok(MergeOutcome::Imported);
    };

    let remote_key = (incoming.updated_at_utc(), incoming.updated_by_instance_id());
    let local_key = (local.updated_at_utc(), local.updated_by_instance_id());

    match remote_outranks_local(remote_key, local_key) {
        std::cmp::Ordering::Greater => {
            incoming.write(conn)?;
            Ok(MergeOutcome::Imported)
        }
        std::cmp::Ordering::Less => {
            let record = ConflictRecord {
                id: conflict_id(),
                entity_type: T::entity_type(),
                entity_id: incoming.id().to_string(),
                imported_updated_at_utc: incoming.updated_at_utc().to_string(),
                local_updated_at_utc: local.updated_at_utc().to_string(),
                local_json: local.minimal_snapshot_json()?,
                imported_json: serde_json::to_string(incoming)?,
                created_at_utc: now_utc.to_string(),
                resolved_at_utc: None,
                resolution: None,
                resolved_by: None,
            };
            record.insert(conn)?;
            Ok(MergeOutcome::Conflict)
        }
        std::cmp::Ordering::Equal => Ok(MergeOutcome::Skipped),
    }
}
