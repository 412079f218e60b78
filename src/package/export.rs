// src/package/export.rs

//! Package export: reads changed entities out of C2, stages them in a
//! scratch tree alongside referenced attachment blobs, zips the result, and
//! advances the export watermark.

use super::manifest::{checksum_tree, ExportMode, Manifest, CURRENT_SCHEMA_VERSION};
use super::{write_jsonl_stream, ExportReport, ATTACHMENTS_DIR, ATTACHMENTS_STREAM, PROBLEMS_STREAM, PROBLEM_TAGS_STREAM, TAGS_STREAM};
use crate::blobstore::BlobStore;
use crate::db::models::{Attachment, Problem, ProblemTag, Tag};
use crate::error::Result;
use crate::watermark;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::ZipWriter;

pub struct ExportRequest<'a> {
    pub local_instance_id: &'a str,
    pub local_instance_kind: &'a str,
    pub remote_instance_id: &'a str,
    pub mode: ExportMode,
    /// Caller-supplied lower bound for `Incremental` exports; when absent,
    /// the stored `(local, remote)` export watermark is used.
    pub updated_after_utc: Option<&'a str>,
    pub limit: Option<i64>,
    pub output_dir: &'a Path,
}

fn max_of<'a>(current: &mut Option<String>, candidates: impl Iterator<Item = &'a str>) {
    for c in candidates {
        if current.as_deref().map_or(true, |m| c > m) {
            *current = Some(c.to_string());
        }
    }
}

pub fn export(conn: &Connection, blobs: &BlobStore, req: ExportRequest, package_id: &str, now_utc: &str) -> Result<ExportReport> {
    let base_watermark = match req.mode {
        ExportMode::Full => None,
        ExportMode::Incremental => match req.updated_after_utc {
            Some(v) => Some(v.to_string()),
            None => watermark::export_watermark(conn, req.local_instance_id, req.remote_instance_id)?,
        },
    };

    let scratch = req.output_dir.join(format!("export-{package_id}"));
    std::fs::create_dir_all(&scratch)?;

    let problems = Problem::list_updated_after(conn, base_watermark.as_deref(), req.limit)?;
    let tags = Tag::list_updated_after(conn, base_watermark.as_deref(), req.limit)?;
    let problem_tags = ProblemTag::list_updated_after(conn, base_watermark.as_deref(), req.limit)?;
    let attachments = Attachment::list_updated_after(conn, base_watermark.as_deref(), req.limit)?;

    write_jsonl_stream(&scratch.join(PROBLEMS_STREAM), &problems)?;
    write_jsonl_stream(&scratch.join(TAGS_STREAM), &tags)?;
    write_jsonl_stream(&scratch.join(PROBLEM_TAGS_STREAM), &problem_tags)?;
    write_jsonl_stream(&scratch.join(ATTACHMENTS_STREAM), &attachments)?;

    let mut max_updated_at: Option<String> = None;
    max_of(&mut max_updated_at, problems.iter().map(|p| p.updated_at_utc.as_str()));
    max_of(&mut max_updated_at, tags.iter().map(|t| t.updated_at_utc.as_str()));
    max_of(&mut max_updated_at, problem_tags.iter().map(|pt| pt.updated_at_utc.as_str()));
    max_of(&mut max_updated_at, attachments.iter().map(|a| a.updated_at_utc.as_str()));
    let max_updated_at_utc = max_updated_at.unwrap_or_else(|| now_utc.to_string());

    let attachments_out = scratch.join(ATTACHMENTS_DIR);
    std::fs::create_dir_all(&attachments_out)?;
    for attachment in attachments.iter().filter(|a| !a.is_deleted) {
        let source = blobs.path_for(&attachment.content_hash);
        if source.is_file() {
            let dest = attachments_out.join(&attachment.content_hash);
            if !dest.is_file() {
                std::fs::copy(&source, &dest)?;
            }
        }
    }

    let mut record_counts = BTreeMap::new();
    record_counts.insert("problems".to_string(), problems.len() as i64);
    record_counts.insert("tags".to_string(), tags.len() as i64);
    record_counts.insert("problemTags".to_string(), problem_tags.len() as i64);
    record_counts.insert("attachments".to_string(), attachments.len() as i64);

    let manifest_path = scratch.join("manifest.json");
    let write_manifest = |checksums: BTreeMap<String, String>| -> Result<Manifest> {
        let manifest = Manifest {
            package_id: package_id.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION,
            created_at_utc: now_utc.to_string(),
            exporter_instance_id: req.local_instance_id.to_string(),
            exporter_kind: req.local_instance_kind.to_string(),
            mode: req.mode,
            base_watermark_utc: base_watermark.clone(),
            max_updated_at_utc: max_updated_at_utc.clone(),
            record_counts: record_counts.clone(),
            checksums,
        };
        std::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;
        Ok(manifest)
    };

    // First pass: checksums over the data/attachment tree alone.
    write_manifest(checksum_tree(&scratch)?)?;
    // Second pass: recompute over the final tree (still excludes
    // manifest.json) and rewrite, per §4.5's export algorithm.
    write_manifest(checksum_tree(&scratch)?)?;

    let package_path = req.output_dir.join(format!("{package_id}.zip"));
    zip_directory(&scratch, &package_path)?;
    std::fs::remove_dir_all(&scratch)?;

    watermark::advance_export(conn, req.local_instance_id, req.remote_instance_id, &max_updated_at_utc, package_id)?;

    Ok(ExportReport {
        package_id: package_id.to_string(),
        package_path: package_path.to_string_lossy().to_string(),
        created_at_utc: now_utc.to_string(),
        base_watermark_utc: base_watermark,
        max_updated_at_utc,
    })
}

/// Zip `src_dir`'s contents without a leading directory component.
fn zip_directory(src_dir: &Path, dest_zip: &Path) -> Result<()> {
    let file = std::fs::File::create(dest_zip)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries = Vec::new();
    collect_files(src_dir, src_dir, &mut entries)?;

    for (relative, absolute) in entries {
        writer.start_file(relative, options)?;
        let bytes = std::fs::read(&absolute)?;
        writer.write_all(&bytes)?;
    }

    writer.finish()?;
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root).expect("child under root").to_string_lossy().replace('\\', "/");
            out.push((relative, path));
        }
    }
    Ok(())
}
