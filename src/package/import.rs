// src/package/import.rs

//! Package import: extracts a package to a scratch directory, verifies
//! checksums, streams each change through the merge engine inside a single
//! transaction, then copies new attachment blobs and advances the import
//! watermark.

use super::manifest::{checksum_file, Manifest};
use super::{ImportReport, KindCounters, Operation, ATTACHMENTS_DIR, ATTACHMENTS_STREAM, PROBLEMS_STREAM, PROBLEM_TAGS_STREAM, TAGS_STREAM};
use crate::blobstore::BlobStore;
use crate::db::models::{Attachment, Problem, ProblemTag, Tag};
use crate::error::{Error, Result};
use crate::merge::{self, MergeOutcome};
use crate::watermark;
use rusqlite::Connection;
use std::io::{BufRead, Read};
use std::path::Path;

/// Verify every file named in `manifest.checksums` exists under `scratch`
/// and its SHA-256 matches. Aborts on the first mismatch or missing file,
/// per §4.5's "mismatch aborts the import with no partial state."
fn verify_checksums(scratch: &Path, manifest: &Manifest) -> Result<()> {
    for (relative, expected) in &manifest.checksums {
        let path = scratch.join(relative);
        if !path.is_file() {
            return Err(Error::Integrity(format!("checksum target missing from package: {relative}")));
        }
        let actual = checksum_file(&path)?;
        if &actual != expected {
            return Err(Error::Integrity(format!("checksum mismatch for {relative}")));
        }
    }
    Ok(())
}

fn extract_zip(package_path: &Path, scratch: &Path) -> Result<()> {
    let file = std::fs::File::open(package_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            continue;
        };
        let dest = scratch.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        std::fs::write(&dest, buf)?;
    }

    Ok(())
}

/// Apply one `.jsonl` stream line-by-line through the merge engine,
/// collecting per-line parse failures into `errors` instead of aborting the
/// whole batch (§9 open question: such lines count as Skipped, no
/// ConflictRecord).
fn apply_stream<T>(
    conn: &Connection,
    path: &Path,
    now_utc: &str,
    errors: &mut Vec<String>,
) -> Result<KindCounters>
where
    T: for<'de> serde::Deserialize<'de> + serde::Serialize + merge::MergeableEntity,
{
    let mut counters = KindCounters::default();

    if !path.is_file() {
        return Ok(counters);
    }

    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: std::result::Result<super::ChangeLine<T>, _> = serde_json::from_str(&line);
        let change = match parsed {
            Ok(c) => c,
            Err(e) => {
                errors.push(format!("{}:{}: {e}", path.display(), line_no + 1));
                counters.skipped += 1;
                continue;
            }
        };

        let Operation::Upsert = change.operation;
        let entity = change.entity;

        let outcome = merge::merge_entity(conn, &entity, || uuid::Uuid::new_v4().to_string(), now_utc)?;
        match outcome {
            MergeOutcome::Imported => counters.imported += 1,
            MergeOutcome::Skipped => counters.skipped += 1,
            MergeOutcome::Conflict => counters.conflicts += 1,
        }
    }

    Ok(counters)
}

pub struct ImportRequest<'a> {
    pub package_path: &'a Path,
    pub scratch_root: &'a Path,
    pub local_instance_id: &'a str,
}

pub fn import(conn: &mut Connection, blobs: &BlobStore, req: ImportRequest, now_utc: &str) -> Result<ImportReport> {
    let started_at_utc = now_utc.to_string();
    let scratch = req.scratch_root.join(format!("import-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&scratch)?;

    // Run the fallible core, always cleaning up the scratch directory
    // afterwards regardless of outcome (§5 Cancellation/scratch handling).
    let result = import_inner(conn, blobs, &scratch, req.package_path, req.local_instance_id, &started_at_utc);
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

fn import_inner(
    conn: &mut Connection,
    blobs: &BlobStore,
    scratch: &Path,
    package_path: &Path,
    local_instance_id: &str,
    started_at_utc: &str,
) -> Result<ImportReport> {
    extract_zip(package_path, scratch)?;

    let manifest_path = scratch.join("manifest.json");
    if !manifest_path.is_file() {
        return Err(Error::Integrity("package is missing manifest.json".into()));
    }
    let manifest_bytes = std::fs::read(&manifest_path)?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
    manifest.reject_if_unsupported()?;

    verify_checksums(scratch, &manifest)?;

    let mut errors = Vec::new();
    let mut per_kind = std::collections::BTreeMap::new();

    let tx = conn.transaction()?;
    let problems = apply_stream::<Problem>(&tx, &scratch.join(PROBLEMS_STREAM), started_at_utc, &mut errors)?;
    let tags = apply_stream::<Tag>(&tx, &scratch.join(TAGS_STREAM), started_at_utc, &mut errors)?;
    let problem_tags = apply_stream::<ProblemTag>(&tx, &scratch.join(PROBLEM_TAGS_STREAM), started_at_utc, &mut errors)?;
    let attachments = apply_stream::<Attachment>(&tx, &scratch.join(ATTACHMENTS_STREAM), started_at_utc, &mut errors)?;

    watermark::advance_import(&tx, local_instance_id, &manifest.exporter_instance_id, &manifest.max_updated_at_utc, &manifest.package_id)?;

    tx.commit()?;

    per_kind.insert("problems".to_string(), problems);
    per_kind.insert("tags".to_string(), tags);
    per_kind.insert("problemTags".to_string(), problem_tags);
    per_kind.insert("attachments".to_string(), attachments);

    // Blobs are copied only after commit: content-addressing makes this
    // idempotent and safe even if the process dies before this point.
    let attachments_src = scratch.join(ATTACHMENTS_DIR);
    if attachments_src.is_dir() {
        for entry in std::fs::read_dir(&attachments_src)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(hash) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            blobs.put_from_path(hash, &path)?;
        }
    }

    let imported = problems.imported + tags.imported + problem_tags.imported + attachments.imported;
    let skipped = problems.skipped + tags.skipped + problem_tags.skipped + attachments.skipped;
    let conflicts = problems.conflicts + tags.conflicts + problem_tags.conflicts + attachments.conflicts;

    Ok(ImportReport {
        package_id: manifest.package_id,
        exporter_instance_id: manifest.exporter_instance_id,
        started_at_utc: started_at_utc.to_string(),
        finished_at_utc: started_at_utc.to_string(),
        imported,
        skipped,
        conflicts,
        errors,
        per_kind_counters: per_kind,
    })
}
