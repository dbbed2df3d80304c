use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use ci_artifacts::config::DEFAULT_CONFIG_PATH;
use ci_artifacts::lock::ProjectLock;
use ci_artifacts::{
    ArchiveOutcome, Archiver, Build, BuildHistory, BuildNumber, DirWorkspace, DiskArtifactStore,
    Outcome, Project, ProjectConfig, ReconcileReport, RetentionConfig, RetentionEngine,
};

const HISTORY_FILE: &str = "history.json";
const LOCK_TIMEOUT: Duration = Duration::from_secs(300);

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[derive(Parser)]
#[command(name = "ci-artifacts")]
#[command(about = "Archive CI build artifacts and reclaim those of older builds")]
#[command(version)]
struct Cli {
    /// Write logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a finished build's workspace files
    Archive {
        /// Project root holding builds and history
        #[arg(long)]
        root: PathBuf,

        /// Workspace directory to select files from
        #[arg(long)]
        workspace: PathBuf,

        /// Build number
        #[arg(long)]
        build: BuildNumber,

        /// Build outcome as reported by the scheduler
        #[arg(long)]
        outcome: Outcome,

        /// Config file (default: <workspace>/.ci/artifacts.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Reclaim artifacts of builds older than the given one
    Reconcile {
        #[arg(long)]
        root: PathBuf,

        /// Build the pass runs for
        #[arg(long)]
        build: BuildNumber,

        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        json: bool,
    },

    /// List the archived paths of a build
    List {
        #[arg(long)]
        root: PathBuf,

        #[arg(long)]
        build: BuildNumber,
    },

    /// Print one archived file to stdout
    Cat {
        #[arg(long)]
        root: PathBuf,

        #[arg(long)]
        build: BuildNumber,

        /// Relative path inside the build's archive
        path: String,
    },

    /// Show recorded builds and whether they still hold artifacts
    Status {
        #[arg(long)]
        root: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Archive {
            root,
            workspace,
            build,
            outcome,
            config,
            json,
        } => run_archive(&root, &workspace, build, outcome, config, json),
        Commands::Reconcile {
            root,
            build,
            dry_run,
            json,
        } => run_reconcile(&root, build, dry_run, json),
        Commands::List { root, build } => run_list(&root, build),
        Commands::Cat { root, build, path } => run_cat(&root, build, &path),
        Commands::Status { root, json } => run_status(&root, json),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env("CI_ARTIFACTS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn fail(code: i32, message: impl std::fmt::Display) -> ! {
    error!("{}", message);
    process::exit(code);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(EXIT_FAILURE, format!("Error serializing output: {}", e)),
    }
}

fn lock_root(root: &Path) -> ProjectLock {
    ProjectLock::acquire(root, LOCK_TIMEOUT)
        .unwrap_or_else(|e| fail(EXIT_FAILURE, format!("Error locking {}: {}", root.display(), e)))
}

fn open_project(root: &Path) -> Project {
    let history = BuildHistory::load(&root.join(HISTORY_FILE))
        .unwrap_or_else(|e| fail(EXIT_FAILURE, format!("Error loading build history: {}", e)));
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    Project::with_history(name, Arc::new(DiskArtifactStore::new(root)), history)
}

fn run_archive(
    root: &Path,
    workspace: &Path,
    number: BuildNumber,
    outcome: Outcome,
    config_path: Option<PathBuf>,
    json_output: bool,
) {
    let config_path = config_path.unwrap_or_else(|| workspace.join(DEFAULT_CONFIG_PATH));
    let config = ProjectConfig::load(&config_path)
        .unwrap_or_else(|e| fail(EXIT_USAGE, format!("Configuration error: {}", e)));
    let retention = config.retention;
    // Reconciliation runs later, under the project lock
    let archiver = Archiver::new(config.archive)
        .unwrap_or_else(|e| fail(EXIT_USAGE, format!("Configuration error: {}", e)))
        .with_retention(RetentionConfig {
            latest_only: false,
            dry_run: retention.dry_run,
        });

    // The copy does not need the lock: the store rejects a second writer
    let project = open_project(root);
    if project.is_recorded(number) {
        fail(EXIT_FAILURE, format!("Build #{} is already recorded", number));
    }
    let mut build = Build::new(number, outcome);
    let mut result = archiver.archive(&project, &mut build, &DirWorkspace::new(workspace));

    // Exit only after the lock is released
    let reconcile = retention.latest_only && result.is_succeeded();
    let report = {
        let lock = lock_root(root);
        match record_locked(root, &build, reconcile, retention.dry_run) {
            Ok(report) => report,
            Err(e) => {
                drop(lock);
                fail(EXIT_FAILURE, e);
            }
        }
    };
    if let ArchiveOutcome::Succeeded(summary) = &mut result {
        summary.retention = report;
    }

    match result {
        ArchiveOutcome::Succeeded(summary) => {
            if json_output {
                print_json(&summary);
            } else {
                println!(
                    "Archived build #{}: {} files, {} symlinks, {} bytes",
                    summary.build, summary.files, summary.symlinks, summary.bytes
                );
                if let Some(report) = &summary.retention {
                    if !report.deleted.is_empty() {
                        println!("  Deleted old artifacts: {:?}", report.deleted);
                    }
                }
            }
        }
        ArchiveOutcome::Skipped(reason) => {
            if json_output {
                print_json(&serde_json::json!({ "build": number, "skipped": reason }));
            } else {
                println!("Skipped build #{}: {:?}", number, reason);
            }
        }
        ArchiveOutcome::Failed(e) => {
            if json_output {
                print_json(&serde_json::json!({
                    "build": number,
                    "outcome": build.outcome(),
                    "error": e.to_string(),
                }));
            }
            fail(EXIT_FAILURE, e);
        }
    }
}

/// Record the build's final outcome and reclaim older stores. Caller holds the
/// project lock.
fn record_locked(
    root: &Path,
    build: &Build,
    reconcile: bool,
    dry_run: bool,
) -> Result<Option<ReconcileReport>, String> {
    // Reload: other builds may have completed while this one was copying
    let project = open_project(root);
    project
        .complete(build)
        .map_err(|e| format!("Error recording build #{}: {}", build.number(), e))?;
    project
        .history()
        .save(&root.join(HISTORY_FILE))
        .map_err(|e| format!("Error saving build history: {}", e))?;

    if !reconcile {
        return Ok(None);
    }
    match RetentionEngine::new()
        .with_dry_run(dry_run)
        .reconcile(&project, build.number())
    {
        Ok(report) => Ok(Some(report)),
        Err(e) => {
            warn!(build = build.number(), error = %e, "failed to reclaim old artifacts");
            Ok(None)
        }
    }
}

fn run_reconcile(root: &Path, number: BuildNumber, dry_run: bool, json_output: bool) {
    let report = {
        let _lock = lock_root(root);
        let project = open_project(root);
        RetentionEngine::new()
            .with_dry_run(dry_run)
            .reconcile(&project, number)
    };
    let report =
        report.unwrap_or_else(|e| fail(EXIT_FAILURE, format!("Reconciliation failed: {}", e)));

    if json_output {
        print_json(&report);
        return;
    }

    let kept: Vec<_> = report.keep.iter().collect();
    println!("Reconciled after build #{}", report.build);
    println!("  Kept: {:?}", kept);
    if report.dry_run {
        println!("  Would delete: {:?}", report.deleted);
    } else {
        println!("  Deleted: {:?} ({} bytes)", report.deleted, report.bytes_reclaimed);
    }
    for (build, reason) in &report.failures {
        println!("  Failed #{}: {}", build, reason);
    }
}

fn run_list(root: &Path, number: BuildNumber) {
    let project = open_project(root);
    match project.list_artifacts(number) {
        Ok(paths) => {
            for path in paths {
                println!("{}", path);
            }
        }
        Err(e) => fail(EXIT_FAILURE, format!("Error reading build #{}: {}", number, e)),
    }
}

fn run_cat(root: &Path, number: BuildNumber, path: &str) {
    use std::io::Write;

    let project = open_project(root);
    let content = project
        .read_artifact(number, path)
        .unwrap_or_else(|e| fail(EXIT_FAILURE, format!("Error reading '{}': {}", path, e)));
    if let Err(e) = std::io::stdout().write_all(&content) {
        fail(EXIT_FAILURE, format!("Error writing output: {}", e));
    }
}

fn run_status(root: &Path, json_output: bool) {
    let project = open_project(root);
    let history = project.history();

    if json_output {
        let rows: Vec<serde_json::Value> = history
            .iter()
            .map(|record| {
                serde_json::json!({
                    "build": record.number,
                    "outcome": record.outcome,
                    "completed_at": record.completed_at,
                    "artifacts": project.has_artifacts(record.number),
                })
            })
            .collect();
        print_json(&rows);
        return;
    }

    if history.is_empty() {
        println!("No builds recorded in {}", root.display());
        return;
    }
    println!("{:<8} {:<10} {}", "BUILD", "OUTCOME", "ARTIFACTS");
    for record in history.iter() {
        let present = if project.has_artifacts(record.number) { "yes" } else { "-" };
        println!("{:<8} {:<10} {}", record.number, record.outcome.to_string(), present);
    }
}
