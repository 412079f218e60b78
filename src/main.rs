// src/main.rs

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use kbengine::conflict::Resolution;
use kbengine::db::models::{Problem, SourceKind};
use kbengine::engine::{KbEngine, OwnedHardDeleteFilter, OwnedProfessionFilter};
use kbengine::identity::Paths;
use kbengine::lan::{LanBackend, LanServer};
use kbengine::package::manifest::ExportMode as PkgExportMode;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kbengine")]
#[command(author, version, about = "Offline knowledge-base engine for engineering-debugging records", long_about = None)]
struct Cli {
    /// Directory holding instance.json and appsettings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Directory holding the SQLite database and attachments
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the on-disk store if it doesn't exist yet and print its identity
    Init,
    /// Record a new problem
    Add {
        title: String,
        #[arg(long, default_value = "")]
        symptom: String,
        #[arg(long, default_value = "")]
        root_cause: String,
        #[arg(long, default_value = "")]
        solution: String,
        #[arg(long, default_value = "{}")]
        environment_json: String,
        #[arg(long, default_value_t = 0)]
        severity: i64,
        #[arg(long, default_value_t = 0)]
        status: i64,
        #[arg(long)]
        created_by: Option<String>,
        #[arg(long, value_enum, default_value = "personal")]
        source: SourceKindArg,
    },
    /// Full-text search over titles, symptoms, root causes, and solutions
    Search {
        query: String,
        #[arg(long = "tag")]
        tag_ids: Vec<String>,
        /// Filter to a specific authoring profession id, or "unassigned"
        #[arg(long)]
        profession: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    #[command(subcommand)]
    Tag(TagCommands),
    /// Attach a file to a problem, storing it content-addressed
    Attach {
        problem_id: String,
        file_path: PathBuf,
    },
    /// Produce a package for a remote peer
    Export {
        remote_instance_id: String,
        #[arg(long, value_enum, default_value = "full")]
        mode: ExportModeArg,
        #[arg(long)]
        updated_after: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Apply a package produced by `export`
    Import {
        package_path: PathBuf,
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },
    #[command(subcommand)]
    Conflicts(ConflictCommands),
    /// Permanently remove problems matching a filter (gated operation)
    Purge {
        #[arg(long = "tag")]
        tag_ids: Vec<String>,
        #[arg(long)]
        profession: Option<String>,
        #[arg(long)]
        updated_from: Option<String>,
        #[arg(long)]
        updated_to: Option<String>,
        #[arg(long)]
        include_soft_deleted: bool,
        /// Only report how many problems would be removed
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the LAN exchange endpoint in the foreground until Ctrl-C
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List all active tags
    List,
    /// Create a tag (idempotent by case-folded name)
    Create { name: String },
    /// Replace the tag set on a problem
    Set {
        problem_id: String,
        #[arg(long = "tag")]
        tag_ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List unresolved conflicts
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a conflict's stored snapshots alongside the current local row
    Show { id: String },
    /// Resolve a conflict by keeping the local row or applying the imported one
    Resolve {
        id: String,
        #[arg(value_enum)]
        resolution: ResolutionArg,
        #[arg(long)]
        resolved_by: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SourceKindArg {
    Personal,
    Corporate,
}

impl From<SourceKindArg> for SourceKind {
    fn from(v: SourceKindArg) -> Self {
        match v {
            SourceKindArg::Personal => SourceKind::Personal,
            SourceKindArg::Corporate => SourceKind::Corporate,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ExportModeArg {
    Full,
    Incremental,
}

impl From<ExportModeArg> for PkgExportMode {
    fn from(v: ExportModeArg) -> Self {
        match v {
            ExportModeArg::Full => PkgExportMode::Full,
            ExportModeArg::Incremental => PkgExportMode::Incremental,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ResolutionArg {
    KeepLocal,
    UseImported,
}

impl From<ResolutionArg> for Resolution {
    fn from(v: ResolutionArg) -> Self {
        match v {
            ResolutionArg::KeepLocal => Resolution::KeepLocal,
            ResolutionArg::UseImported => Resolution::UseImported,
        }
    }
}

fn profession_filter(arg: Option<String>) -> OwnedProfessionFilter {
    match arg {
        None => OwnedProfessionFilter::All,
        Some(s) if s.eq_ignore_ascii_case("unassigned") => OwnedProfessionFilter::Unassigned,
        Some(id) => OwnedProfessionFilter::Specific(id),
    }
}

fn home_relative(tail: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    home.join(".kbengine").join(tail)
}

fn init_logging(data_dir: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tracing_subscriber::fmt::layer();

    let Some(data_dir) = data_dir else {
        tracing_subscriber::registry().with(filter).with(stdout_layer).init();
        return;
    };

    let logs_dir = data_dir.join("logs");
    if std::fs::create_dir_all(&logs_dir).is_err() {
        tracing_subscriber::registry().with(filter).with(stdout_layer).init();
        return;
    }

    let log_path = logs_dir.join(format!("{}.log", now_for_log_name()));
    match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(log_file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(move || log_file.try_clone().expect("clone session log handle"));
            tracing_subscriber::registry().with(filter).with(stdout_layer).with(file_layer).init();
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(stdout_layer).init();
        }
    }
}

fn now_for_log_name() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

async fn open_engine(cli: &Cli) -> Result<KbEngine> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(|| home_relative("config"));
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| home_relative("data"));
    let paths = Paths::new(config_dir, data_dir);
    Ok(KbEngine::open(paths)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.data_dir.as_ref());

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "kbengine", &mut io::stdout());
        return Ok(());
    }

    let engine = open_engine(&cli).await?;

    match cli.command {
        Commands::Init => {
            println!("instance id: {}", engine.instance().instance_id);
            println!("kind: {:?}", engine.instance().kind);
            println!("config dir: {}", engine.config_dir().display());
            println!("data dir: {}", engine.data_dir().display());
        }
        Commands::Add { title, symptom, root_cause, solution, environment_json, severity, status, created_by, source } => {
            let by_instance = engine.instance().instance_id.clone();
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            let problem = Problem {
                id: Uuid::new_v4().to_string(),
                title,
                symptom,
                root_cause,
                solution,
                environment_json,
                severity,
                status,
                created_by,
                source_kind: source.into(),
                is_deleted: false,
                deleted_at_utc: None,
                created_at_utc: now.clone(),
                updated_at_utc: now,
                updated_by_instance_id: by_instance,
            };
            let id = problem.id.clone();
            engine.upsert_problem(problem).await?;
            println!("created problem {id}");
        }
        Commands::Search { query, tag_ids, profession, limit, offset } => {
            let filter = profession_filter(profession);
            let hits = engine.search_problems(query, tag_ids, filter, limit, offset).await?;
            if hits.is_empty() {
                println!("no matches");
            } else {
                for hit in &hits {
                    println!(
                        "{}  score={}  {}",
                        hit.problem_id,
                        hit.score,
                        hit.snippet.as_deref().unwrap_or("")
                    );
                }
                println!("{} result(s)", hits.len());
            }
        }
        Commands::Tag(TagCommands::List) => {
            let tags = engine.get_all_tags().await?;
            for tag in &tags {
                println!("{}  {}", tag.id, tag.name);
            }
            println!("{} tag(s)", tags.len());
        }
        Commands::Tag(TagCommands::Create { name }) => {
            let by_instance = engine.instance().instance_id.clone();
            let tag = engine.create_tag(name, by_instance).await?;
            println!("tag {} -> {}", tag.name, tag.id);
        }
        Commands::Tag(TagCommands::Set { problem_id, tag_ids }) => {
            let by_instance = engine.instance().instance_id.clone();
            engine.set_tags_for_problem(problem_id.clone(), tag_ids, by_instance).await?;
            println!("updated tags for problem {problem_id}");
        }
        Commands::Attach { problem_id, file_path } => {
            let by_instance = engine.instance().instance_id.clone();
            let attachment = engine.add_attachment(file_path, problem_id, by_instance).await?;
            println!("attachment {} ({} bytes, hash {})", attachment.id, attachment.size_bytes, attachment.content_hash);
        }
        Commands::Export { remote_instance_id, mode, updated_after, limit, output_dir } => {
            std::fs::create_dir_all(&output_dir)?;
            let report = engine.export(remote_instance_id, mode.into(), updated_after, limit, output_dir).await?;
            println!("wrote package {}", report.package_path);
            println!("package id: {}", report.package_id);
            println!("max updatedAtUtc in package: {}", report.max_updated_at_utc);
        }
        Commands::Import { package_path, scratch_dir } => {
            let scratch = scratch_dir.unwrap_or_else(std::env::temp_dir);
            std::fs::create_dir_all(&scratch)?;
            let report = engine.import_package(package_path, scratch).await?;
            println!(
                "imported {}, skipped {}, conflicts {}",
                report.imported, report.skipped, report.conflicts
            );
            for err in &report.errors {
                println!("  error: {err}");
            }
        }
        Commands::Conflicts(ConflictCommands::List { limit }) => {
            let conflicts = engine.get_unresolved_conflicts(limit).await?;
            for c in &conflicts {
                println!("{}  {:?}/{}  local={}  imported={}", c.id, c.entity_type, c.entity_id, c.local_updated_at_utc, c.imported_updated_at_utc);
            }
            println!("{} unresolved", conflicts.len());
        }
        Commands::Conflicts(ConflictCommands::Show { id }) => {
            let detail = engine.get_conflict_detail(id.clone()).await?.ok_or_else(|| anyhow!("conflict '{id}' not found"))?;
            println!("local (at detection):    {}", detail.record.local_json);
            println!("local (current):         {}", detail.current_local_json.unwrap_or_else(|| "<deleted>".into()));
            println!("imported:                {}", detail.record.imported_json);
        }
        Commands::Conflicts(ConflictCommands::Resolve { id, resolution, resolved_by }) => {
            let resolved_by = resolved_by.unwrap_or_else(|| engine.instance().instance_id.clone());
            engine.resolve_conflict(id.clone(), resolution.into(), resolved_by).await?;
            println!("resolved conflict {id}");
        }
        Commands::Purge { tag_ids, profession, updated_from, updated_to, include_soft_deleted, dry_run } => {
            let filter = OwnedHardDeleteFilter {
                tag_ids,
                profession: profession_filter(profession),
                updated_from_utc: updated_from,
                updated_to_utc: updated_to,
                include_soft_deleted,
            };
            if dry_run {
                let count = engine.count_problems_for_hard_delete_filter(filter).await?;
                println!("{count} problem(s) would be permanently removed");
            } else {
                let count = engine.hard_delete_problems(filter).await?;
                println!("permanently removed {count} problem(s)");
            }
        }
        Commands::Serve { port } => {
            let settings = engine.settings();
            let (configured_port, shared_key) = {
                let guard = settings.lock().map_err(|_| anyhow!("settings lock poisoned"))?;
                let lan = &guard.current().lan;
                (lan.port, lan.shared_key.clone())
            };
            let port = port.unwrap_or(configured_port);

            let backend: Arc<dyn LanBackend> = Arc::new(engine.clone());
            let server = LanServer::new(backend, shared_key);
            let (tx, rx) = tokio::sync::oneshot::channel();

            info!(port, "starting LAN exchange endpoint");
            let serve_handle = tokio::spawn(server.serve(port, rx));

            tokio::signal::ctrl_c().await?;
            info!("received Ctrl-C, shutting down LAN endpoint");
            tx.send(()).ok();
            serve_handle.await??;
        }
        Commands::Completions { .. } => unreachable!("handled before engine construction"),
    }

    Ok(())
}
