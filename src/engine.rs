// src/engine.rs

//! Engine Handle & CLI support (C12): a single `KbEngine` wiring identity
//! (C1), the relational store (C2), the blob store (C3), and settings
//! (C10) behind one owned handle, constructed once at startup. This
//! replaces the source's process-wide identity cache and singleton
//! watermark view (§9 design notes) — every component here receives the
//! engine by reference, no ambient singletons.
//!
//! Store access is synchronous under the hood (`rusqlite::Connection` is
//! not `Send` across await points held live); every public method runs its
//! blocking work on `spawn_blocking` and awaits the join handle, matching
//! §5's suspension-boundary model.

use crate::blobstore::BlobStore;
use crate::config::SettingsStore;
use crate::conflict::{self, ConflictDetail, ConflictRecord, Resolution};
use crate::db::{self, models::{Attachment, Problem, ProblemTag, Tag}};
use crate::error::{Error, Result};
use crate::identity::{self, InstanceRecord, Paths};
use crate::lan::{ExportMode as LanExportMode, ImportSummary, LanBackend};
use crate::package::export::{self as pkg_export, ExportRequest};
use crate::package::import::{self as pkg_import, ImportRequest};
use crate::package::manifest::ExportMode as PkgExportMode;
use crate::package::ExportReport;
use crate::package::ImportReport;
use crate::purge::HardDeleteFilter;
use crate::search::{self, ProfessionFilter, SearchHit};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// The engine handle. Cloneable: internally `Arc`-backed, so callers (the
/// CLI, the LAN server) can hold independent handles to the same store.
#[derive(Clone)]
pub struct KbEngine {
    conn: Arc<Mutex<Connection>>,
    blobs: Arc<BlobStore>,
    identity: Arc<InstanceRecord>,
    settings: Arc<Mutex<SettingsStore>>,
    paths: Arc<Paths>,
}

impl KbEngine {
    /// Open (creating on first use) every on-disk component at `paths`.
    pub fn open(paths: Paths) -> Result<Self> {
        std::fs::create_dir_all(&paths.data_dir)?;
        std::fs::create_dir_all(&paths.config_dir)?;

        let identity = identity::load_or_create(&paths, now_utc)?;
        let db_path = paths.database_file();
        let conn = if db_path.is_file() {
            db::open(db_path.to_str().expect("utf8 db path"))?
        } else {
            db::init(db_path.to_str().expect("utf8 db path"))?
        };

        let blobs = BlobStore::new(paths.attachments_dir());
        let settings = SettingsStore::load(paths.settings_file())?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            blobs: Arc::new(blobs),
            identity: Arc::new(identity),
            settings: Arc::new(Mutex::new(settings)),
            paths: Arc::new(paths),
        })
    }

    pub fn instance(&self) -> &InstanceRecord {
        &self.identity
    }

    async fn with_conn<T, F>(&self, action: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| Error::Fatal(format!("{action}: store lock poisoned")))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Fatal(format!("{action}: blocking task panicked: {e}")))?
    }

    async fn with_conn_mut<T, F>(&self, action: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| Error::Fatal(format!("{action}: store lock poisoned")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Fatal(format!("{action}: blocking task panicked: {e}")))?
    }

    // ---- Store API (§6) ----------------------------------------------

    pub async fn upsert_problem(&self, problem: Problem) -> Result<()> {
        self.with_conn("upsertProblem", move |conn| problem.upsert(conn)).await
    }

    pub async fn soft_delete_problem(&self, id: String, by_instance: String) -> Result<()> {
        self.with_conn("softDeleteProblem", move |conn| {
            Problem::soft_delete(conn, &id, &now_utc(), &by_instance)
        })
        .await
    }

    pub async fn get_problem_by_id(&self, id: String) -> Result<Option<Problem>> {
        self.with_conn("getProblemById", move |conn| Problem::find_by_id(conn, &id)).await
    }

    pub async fn search_problems(
        &self,
        q: String,
        tag_ids: Vec<String>,
        profession: OwnedProfessionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SearchHit>> {
        self.with_conn("searchProblems", move |conn| {
            search::search_problems(conn, &q, &tag_ids, profession.as_filter(), limit, offset)
        })
        .await
    }

    pub async fn count_problems(&self, q: String, tag_ids: Vec<String>, profession: OwnedProfessionFilter) -> Result<i64> {
        self.with_conn("countProblems", move |conn| search::count_problems(conn, &q, &tag_ids, profession.as_filter())).await
    }

    pub async fn get_all_tags(&self) -> Result<Vec<Tag>> {
        self.with_conn("getAllTags", |conn| Tag::list_all_active(conn)).await
    }

    pub async fn create_tag(&self, name: String, by_instance: String) -> Result<Tag> {
        self.with_conn("createTag", move |conn| {
            Tag::create(conn, &Uuid::new_v4().to_string(), &name, &now_utc(), &by_instance)
        })
        .await
    }

    pub async fn soft_delete_tag(&self, id: String, by_instance: String) -> Result<()> {
        self.with_conn("softDeleteTag", move |conn| Tag::soft_delete(conn, &id, &now_utc(), &by_instance)).await
    }

    pub async fn get_tags_for_problem(&self, problem_id: String) -> Result<Vec<ProblemTag>> {
        self.with_conn("getTagsForProblem", move |conn| ProblemTag::active_for_problem(conn, &problem_id)).await
    }

    pub async fn set_tags_for_problem(&self, problem_id: String, tag_ids: Vec<String>, by_instance: String) -> Result<()> {
        self.with_conn("setTagsForProblem", move |conn| {
            let tx = conn.unchecked_transaction()?;
            ProblemTag::set_tags_for_problem(&tx, &problem_id, &tag_ids, &now_utc(), &by_instance, || Uuid::new_v4().to_string())?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn add_attachment(&self, source_path: PathBuf, problem_id: String, by_instance: String) -> Result<Attachment> {
        let original_file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation(format!("attachment source path has no file name: {}", source_path.display())))?;

        let blobs = Arc::clone(&self.blobs);
        let (hash, size, _) = tokio::task::spawn_blocking(move || blobs.put_file(&source_path))
            .await
            .map_err(|e| Error::Fatal(format!("addAttachment: blocking task panicked: {e}")))??;

        self.with_conn("addAttachment", move |conn| {
            let attachment = Attachment {
                id: Uuid::new_v4().to_string(),
                problem_id,
                original_file_name,
                content_hash: hash,
                size_bytes: size as i64,
                mime_type: None,
                is_deleted: false,
                created_at_utc: now_utc(),
                updated_at_utc: now_utc(),
                updated_by_instance_id: by_instance,
            };
            attachment.upsert(conn)?;
            Ok(attachment)
        })
        .await
    }

    pub async fn get_attachments_for_problem(&self, problem_id: String) -> Result<Vec<Attachment>> {
        self.with_conn("getAttachmentsForProblem", move |conn| Attachment::for_problem(conn, &problem_id)).await
    }

    pub fn get_attachment_local_path(&self, content_hash: &str) -> PathBuf {
        self.blobs.path_for(content_hash)
    }

    // ---- Conflicts (§4.7) ---------------------------------------------

    pub async fn get_unresolved_conflicts(&self, limit: i64) -> Result<Vec<ConflictRecord>> {
        self.with_conn("getUnresolvedConflicts", move |conn| conflict::list_unresolved(conn, limit)).await
    }

    pub async fn get_conflict_detail(&self, id: String) -> Result<Option<ConflictDetail>> {
        self.with_conn("getConflictDetail", move |conn| conflict::get_detail(conn, &id)).await
    }

    pub async fn resolve_conflict(&self, id: String, resolution: Resolution, resolved_by: String) -> Result<()> {
        self.with_conn("resolveConflict", move |conn| {
            let tx = conn.unchecked_transaction()?;
            conflict::resolve(&tx, &id, resolution, &now_utc(), &resolved_by)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ---- Purge (gated, §6) ---------------------------------------------

    pub async fn count_problems_for_hard_delete_filter(&self, filter: OwnedHardDeleteFilter) -> Result<i64> {
        self.with_conn("countProblemsForHardDeleteFilter", move |conn| crate::purge::count_for_filter(conn, &filter.as_filter())).await
    }

    pub async fn hard_delete_problems(&self, filter: OwnedHardDeleteFilter) -> Result<i64> {
        self.with_conn("hardDeleteProblems", move |conn| {
            let tx = conn.unchecked_transaction()?;
            let n = crate::purge::hard_delete(&tx, &filter.as_filter())?;
            tx.commit()?;
            Ok(n)
        })
        .await
    }

    // ---- Package transfer (§6) ------------------------------------------

    pub async fn export(
        &self,
        remote_instance_id: String,
        mode: PkgExportMode,
        updated_after_utc: Option<String>,
        limit: Option<i64>,
        output_dir: PathBuf,
    ) -> Result<ExportReport> {
        let instance_id = self.identity.instance_id.clone();
        let instance_kind = serde_json::to_value(self.identity.kind)?
            .as_str()
            .unwrap_or("Personal")
            .to_string();
        let blobs = Arc::clone(&self.blobs);
        let package_id = Uuid::new_v4().to_string();
        let timestamp = now_utc();

        self.with_conn("export", move |conn| {
            pkg_export::export(
                conn,
                &blobs,
                ExportRequest {
                    local_instance_id: &instance_id,
                    local_instance_kind: &instance_kind,
                    remote_instance_id: &remote_instance_id,
                    mode,
                    updated_after_utc: updated_after_utc.as_deref(),
                    limit,
                    output_dir: &output_dir,
                },
                &package_id,
                &timestamp,
            )
        })
        .await
    }

    pub async fn import_package(&self, package_path: PathBuf, scratch_root: PathBuf) -> Result<ImportReport> {
        let instance_id = self.identity.instance_id.clone();
        let blobs = Arc::clone(&self.blobs);
        let timestamp = now_utc();

        self.with_conn_mut("import", move |conn| {
            pkg_import::import(
                conn,
                &blobs,
                ImportRequest { package_path: &package_path, scratch_root: &scratch_root, local_instance_id: &instance_id },
                &timestamp,
            )
        })
        .await
    }

    pub fn data_dir(&self) -> &Path {
        &self.paths.data_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.paths.config_dir
    }

    pub fn settings(&self) -> Arc<Mutex<SettingsStore>> {
        Arc::clone(&self.settings)
    }
}

/// `'static`-friendly wrapper for [`ProfessionFilter`], which borrows a
/// `&str` in the `Specific` case; async methods need owned data to cross
/// the `spawn_blocking` boundary.
#[derive(Debug, Clone)]
pub enum OwnedProfessionFilter {
    All,
    Unassigned,
    Specific(String),
}

impl OwnedProfessionFilter {
    fn as_filter(&self) -> ProfessionFilter<'_> {
        match self {
            OwnedProfessionFilter::All => ProfessionFilter::All,
            OwnedProfessionFilter::Unassigned => ProfessionFilter::Unassigned,
            OwnedProfessionFilter::Specific(id) => ProfessionFilter::Specific(id),
        }
    }
}

/// Owned counterpart to [`HardDeleteFilter`] for the same reason.
#[derive(Debug, Clone)]
pub struct OwnedHardDeleteFilter {
    pub tag_ids: Vec<String>,
    pub profession: OwnedProfessionFilter,
    pub updated_from_utc: Option<String>,
    pub updated_to_utc: Option<String>,
    pub include_soft_deleted: bool,
}

impl OwnedHardDeleteFilter {
    fn as_filter(&self) -> HardDeleteFilter<'_> {
        HardDeleteFilter {
            tag_ids: &self.tag_ids,
            profession: self.profession.as_filter(),
            updated_from_utc: self.updated_from_utc.as_deref(),
            updated_to_utc: self.updated_to_utc.as_deref(),
            include_soft_deleted: self.include_soft_deleted,
        }
    }
}

#[async_trait]
impl LanBackend for KbEngine {
    fn instance_id(&self) -> String {
        self.identity.instance_id.clone()
    }

    fn instance_kind(&self) -> String {
        serde_json::to_value(self.identity.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "Personal".to_string())
    }

    async fn export_package_bytes(&self, mode: LanExportMode, remote_instance_id: &str) -> Result<Vec<u8>> {
        let pkg_mode = match mode {
            LanExportMode::Full => PkgExportMode::Full,
            LanExportMode::Incremental => PkgExportMode::Incremental,
        };

        let scratch = std::env::temp_dir().join(format!("kbengine-lan-export-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&scratch)?;
        let report = self.export(remote_instance_id.to_string(), pkg_mode, None, None, scratch.clone()).await?;
        let bytes = std::fs::read(&report.package_path)?;
        std::fs::remove_file(&report.package_path).ok();
        std::fs::remove_dir_all(&scratch).ok();
        Ok(bytes)
    }

    async fn import_package_bytes(&self, bytes: &[u8]) -> Result<ImportSummary> {
        let scratch = std::env::temp_dir().join(format!("kbengine-lan-import-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&scratch)?;
        let package_path = scratch.join("incoming.zip");
        std::fs::write(&package_path, bytes)?;

        let report = self.import_package(package_path, scratch.clone()).await;
        std::fs::remove_dir_all(&scratch).ok();
        let report = report?;

        Ok(ImportSummary { imported: report.imported, skipped: report.skipped, conflicts: report.conflicts })
    }
}
