// src/identity.rs

//! Paths & Identity (C1): resolves on-disk locations and the stable
//! per-installation identity record.

use crate::db::models::SourceKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// `kind` hint persisted alongside the instance id; used for export/import
/// labelling and as the default `sourceKind` of locally authored problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InstanceKind {
    Personal,
    Corporate,
}

impl Default for InstanceKind {
    fn default() -> Self {
        InstanceKind::Personal
    }
}

impl From<InstanceKind> for SourceKind {
    fn from(k: InstanceKind) -> Self {
        match k {
            InstanceKind::Personal => SourceKind::Personal,
            InstanceKind::Corporate => SourceKind::Corporate,
        }
    }
}

/// `<config-dir>/instance.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub kind: InstanceKind,
    pub created_at_utc: String,
}

/// Standard subpaths under a user-chosen data/config root.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn instance_file(&self) -> PathBuf {
        self.config_dir.join("instance.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("appsettings.json")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("kb.sqlite")
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Load the instance record, generating and persisting one on first use.
/// The record is read-mostly; callers are expected to cache the result for
/// the lifetime of the engine rather than calling this repeatedly.
pub fn load_or_create(paths: &Paths, now_utc: impl Fn() -> String) -> Result<InstanceRecord> {
    let path = paths.instance_file();

    if path.exists() {
        let bytes = std::fs::read(&path)?;
        let record: InstanceRecord = serde_json::from_slice(&bytes)?;
        return Ok(record);
    }

    let record = InstanceRecord {
        instance_id: Uuid::new_v4().to_string(),
        kind: InstanceKind::Personal,
        created_at_utc: now_utc(),
    };
    write_atomic(&path, &record)?;
    info!(instance_id = %record.instance_id, "generated new instance identity");
    Ok(record)
}

/// Persist the record, changing `kind` if desired.
pub fn save(paths: &Paths, record: &InstanceRecord) -> Result<()> {
    write_atomic(&paths.instance_file(), record)
}

fn write_atomic(path: &Path, record: &InstanceRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(record)?;
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        Error::Fatal(format!("failed to atomically install instance record: {e}"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixed_now() -> String {
        "2024-01-01T00:00:00Z".to_string()
    }

    #[test]
    fn test_load_or_create_generates_new_identity() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path(), dir.path());

        let record = load_or_create(&paths, fixed_now).unwrap();
        assert_eq!(record.kind, InstanceKind::Personal);
        assert!(paths.instance_file().exists());
        assert!(Uuid::parse_str(&record.instance_id).is_ok());
    }

    #[test]
    fn test_load_or_create_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path(), dir.path());

        let first = load_or_create(&paths, fixed_now).unwrap();
        let second = load_or_create(&paths, fixed_now).unwrap();
        assert_eq!(first.instance_id, second.instance_id);
    }

    #[test]
    fn test_save_persists_kind_change() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path(), dir.path());

        let mut record = load_or_create(&paths, fixed_now).unwrap();
        record.kind = InstanceKind::Corporate;
        save(&paths, &record).unwrap();

        let reloaded = load_or_create(&paths, fixed_now).unwrap();
        assert_eq!(reloaded.kind, InstanceKind::Corporate);
    }
}
