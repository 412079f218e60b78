// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("kbengine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Offline knowledge-base engine for engineering-debugging records")
        .subcommand_required(false)
        .arg(
            Arg::new("config_dir")
                .long("config-dir")
                .value_name("PATH")
                .help("Directory holding instance.json and appsettings.json"),
        )
        .arg(
            Arg::new("data_dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Directory holding the SQLite database and attachments"),
        )
        .subcommand(
            Command::new("init").about("Create the on-disk store if it doesn't exist yet and print its identity"),
        )
        .subcommand(
            Command::new("add")
                .about("Record a new problem")
                .arg(Arg::new("title").required(true))
                .arg(Arg::new("symptom").long("symptom").default_value(""))
                .arg(Arg::new("root_cause").long("root-cause").default_value(""))
                .arg(Arg::new("solution").long("solution").default_value(""))
                .arg(Arg::new("environment_json").long("environment-json").default_value("{}"))
                .arg(Arg::new("severity").long("severity").default_value("0"))
                .arg(Arg::new("status").long("status").default_value("0"))
                .arg(Arg::new("created_by").long("created-by"))
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_parser(["personal", "corporate"])
                        .default_value("personal"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Full-text search over titles, symptoms, root causes, and solutions")
                .arg(Arg::new("query").required(true))
                .arg(Arg::new("tag").long("tag").action(clap::ArgAction::Append))
                .arg(Arg::new("profession").long("profession"))
                .arg(Arg::new("limit").long("limit").default_value("20"))
                .arg(Arg::new("offset").long("offset").default_value("0")),
        )
        .subcommand(
            Command::new("tag")
                .about("Manage tags")
                .subcommand(Command::new("list").about("List all active tags"))
                .subcommand(
                    Command::new("create")
                        .about("Create a tag (idempotent by case-folded name)")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(
                    Command::new("set")
                        .about("Replace the tag set on a problem")
                        .arg(Arg::new("problem_id").required(true))
                        .arg(Arg::new("tag").long("tag").action(clap::ArgAction::Append)),
                ),
        )
        .subcommand(
            Command::new("attach")
                .about("Attach a file to a problem, storing it content-addressed")
                .arg(Arg::new("problem_id").required(true))
                .arg(Arg::new("file_path").required(true)),
        )
        .subcommand(
            Command::new("export")
                .about("Produce a package for a remote peer")
                .arg(Arg::new("remote_instance_id").required(true))
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["full", "incremental"])
                        .default_value("full"),
                )
                .arg(Arg::new("updated_after").long("updated-after"))
                .arg(Arg::new("limit").long("limit"))
                .arg(Arg::new("output_dir").long("output-dir").default_value(".")),
        )
        .subcommand(
            Command::new("import")
                .about("Apply a package produced by `export`")
                .arg(Arg::new("package_path").required(true))
                .arg(Arg::new("scratch_dir").long("scratch-dir")),
        )
        .subcommand(
            Command::new("conflicts")
                .about("Inspect and resolve merge conflicts")
                .subcommand(
                    Command::new("list")
                        .about("List unresolved conflicts")
                        .arg(Arg::new("limit").long("limit").default_value("50")),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show a conflict's stored snapshots alongside the current local row")
                        .arg(Arg::new("id").required(true)),
                )
                .subcommand(
                    Command::new("resolve")
                        .about("Resolve a conflict by keeping the local row or applying the imported one")
                        .arg(Arg::new("id").required(true))
                        .arg(
                            Arg::new("resolution")
                                .value_parser(["keep-local", "use-imported"])
                                .required(true),
                        )
                        .arg(Arg::new("resolved_by").long("resolved-by")),
                ),
        )
        .subcommand(
            Command::new("purge")
                .about("Permanently remove problems matching a filter (gated operation)")
                .arg(Arg::new("tag").long("tag").action(clap::ArgAction::Append))
                .arg(Arg::new("profession").long("profession"))
                .arg(Arg::new("updated_from").long("updated-from"))
                .arg(Arg::new("updated_to").long("updated-to"))
                .arg(
                    Arg::new("include_soft_deleted")
                        .long("include-soft-deleted")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Only report how many problems would be removed"),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the LAN exchange endpoint in the foreground until Ctrl-C")
                .arg(Arg::new("port").long("port")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("kbengine.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
