// src/package/mod.rs

//! Package Codec (C6): the self-contained exchange format.
//!
//! ```text
//! manifest.json
//! data/problems.jsonl
//! data/tags.jsonl
//! data/problemTags.jsonl
//! data/attachments.jsonl
//! attachments/<contentHash> ...
//! ```

pub mod export;
pub mod import;
pub mod manifest;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::Path;

pub const PROBLEMS_STREAM: &str = "data/problems.jsonl";
pub const TAGS_STREAM: &str = "data/tags.jsonl";
pub const PROBLEM_TAGS_STREAM: &str = "data/problemTags.jsonl";
pub const ATTACHMENTS_STREAM: &str = "data/attachments.jsonl";
pub const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Upsert,
}

/// One line of a `.jsonl` change stream: `{ "operation": "Upsert", "entity": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLine<T> {
    pub operation: Operation,
    pub entity: T,
}

/// Write `items` (already sorted ascending by `updatedAtUtc` by the caller)
/// as a `.jsonl` stream. An empty slice still creates the file, which is
/// legal per §4.5 (absent or empty files mean zero changes of that kind).
pub fn write_jsonl_stream<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    for item in items {
        let line = ChangeLine { operation: Operation::Upsert, entity: item };
        let json = serde_json::to_string(&line)?;
        writeln!(file, "{json}")?;
    }
    Ok(())
}

/// Read a `.jsonl` stream line by line. A missing file yields an empty
/// vector rather than an error.
pub fn read_jsonl_stream<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut items = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let change: ChangeLine<T> = serde_json::from_str(&line)?;
        items.push(change.entity);
    }

    Ok(items)
}

/// Outcome of a package import, per §6's `ImportReport`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub package_id: String,
    pub exporter_instance_id: String,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub imported: i64,
    pub skipped: i64,
    pub conflicts: i64,
    pub errors: Vec<String>,
    pub per_kind_counters: std::collections::BTreeMap<String, KindCounters>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindCounters {
    pub imported: i64,
    pub skipped: i64,
    pub conflicts: i64,
}

/// Outcome of a package export, per §6's external interface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub package_id: String,
    pub package_path: String,
    pub created_at_utc: String,
    pub base_watermark_utc: Option<String>,
    pub max_updated_at_utc: String,
}
