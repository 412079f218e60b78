// src/package/manifest.rs

//! The package manifest: `manifest.json` at the root of every package ZIP.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// `manifest.schemaVersion` is 0 in the current encoding; kept for forward
/// compatibility (§9 open question) rather than attempting structural
/// migration on unknown nonzero values.
pub const CURRENT_SCHEMA_VERSION: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub package_id: String,
    pub schema_version: i32,
    pub created_at_utc: String,
    pub exporter_instance_id: String,
    pub exporter_kind: String,
    pub mode: ExportMode,
    pub base_watermark_utc: Option<String>,
    pub max_updated_at_utc: String,
    pub record_counts: BTreeMap<String, i64>,
    /// SHA-256 hex of every package file except `manifest.json` itself.
    pub checksums: BTreeMap<String, String>,
}

impl Manifest {
    pub fn reject_if_unsupported(&self) -> Result<()> {
        if self.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(Error::Integrity(format!(
                "unsupported manifest schemaVersion {}",
                self.schema_version
            )));
        }
        Ok(())
    }
}

/// SHA-256 hex digest of a file's bytes.
pub fn checksum_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Walk `root` and compute checksums for every regular file, using
/// forward-slash relative paths as keys (matching the package's internal
/// ZIP paths regardless of host OS).
pub fn checksum_tree(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();
    walk(root, root, &mut checksums)?;
    Ok(checksums)
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
            continue;
        }

        let relative = path.strip_prefix(root).expect("child path under root");
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if rel_str == "manifest.json" {
            continue;
        }
        out.insert(rel_str, checksum_file(&path)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_tree_excludes_manifest_json() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.json"), b"{}").unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/problems.jsonl"), b"line1\n").unwrap();

        let checksums = checksum_tree(dir.path()).unwrap();
        assert!(!checksums.contains_key("manifest.json"));
        assert!(checksums.contains_key("data/problems.jsonl"));
    }

    #[test]
    fn test_reject_if_unsupported_schema_version() {
        let manifest = Manifest {
            package_id: "pkg-1".into(),
            schema_version: 1,
            created_at_utc: "2024-01-01T00:00:00Z".into(),
            exporter_instance_id: "i1".into(),
            exporter_kind: "Personal".into(),
            mode: ExportMode::Full,
            base_watermark_utc: None,
            max_updated_at_utc: "2024-01-01T00:00:00Z".into(),
            record_counts: BTreeMap::new(),
            checksums: BTreeMap::new(),
        };
        assert!(manifest.reject_if_unsupported().is_err());
    }
}
