mod document;

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tasksync_core::config::{
    config_path, find_config_root, resolve_config, write_config, ResolvedConfig, StoreOverrides,
    TasksyncConfig,
};
use tasksync_core::reconcile::{PlannedAction, SyncPlan, SyncReport};
use tasksync_core::store::taskwarrior::DEFAULT_SCOPE_ATTRIBUTE;
use tasksync_core::store::TaskwarriorStore;
use tasksync_core::sync::{preview, Synchronizer};
use tasksync_core::{parse, Scope, SyncOutcome, TaskCandidate};

use crate::document::FileDocument;

#[derive(Parser)]
#[command(
    name = "tasksync",
    version,
    about = "Sync markdown task lines with Taskwarrior"
)]
struct Cli {
    /// Directory document scopes are relative to (default: nearest config root, else cwd)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync the task lines of a document with the store
    Sync {
        file: PathBuf,
        /// Override the document's scope
        #[arg(long)]
        scope: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// List the task lines found in a document
    Parse {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved store settings and where each came from
    Config {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        json: bool,
    },
    /// Write a project config file
    Init {
        #[command(flatten)]
        store: StoreArgs,
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Print version information
    Version,
}

#[derive(Args, Default)]
struct StoreArgs {
    /// Task command, e.g. `task` or `/opt/task/bin/task rc.gc=off`
    #[arg(long = "task")]
    task_command: Option<String>,
    #[arg(long)]
    taskrc: Option<PathBuf>,
    #[arg(long)]
    data_location: Option<PathBuf>,
    /// Attribute that stores a record's document path
    #[arg(long)]
    scope_attribute: Option<String>,
}

impl StoreArgs {
    fn overrides(&self) -> StoreOverrides {
        StoreOverrides {
            task_command: self.task_command.clone(),
            taskrc: self.taskrc.clone(),
            data_location: self.data_location.clone(),
            scope_attribute: self.scope_attribute.clone(),
        }
    }
}

/// `RUST_LOG` when set, else `warn`; `--verbose` forces `debug`.
fn log_filter(verbose: bool, env: Option<&str>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    env.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn setup_logging(verbose: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(log_filter(verbose, env.as_deref()))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Command::Sync {
            file,
            scope,
            store,
            dry_run,
            json,
        } => {
            let file = canonical_file(&file)?;
            let root = resolve_root(cli.root.as_deref(), file.parent())?;
            let scope = match scope {
                Some(scope) => Scope::new(scope),
                None => document_scope(&root, &file),
            };
            let resolved = resolve_config(&root, &store.overrides())
                .with_context(|| format!("Failed to load config for {}", root.display()))?;
            debug!(root = %root.display(), %scope, command = ?resolved.task_command.value, "resolved store");
            let store = TaskwarriorStore::new(resolved.store_options())?;

            if dry_run {
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let plan = preview(&text, &scope, &store)?;
                print_plan(&plan, json)?;
                return Ok(());
            }

            let mut document = FileDocument::new(file, scope);
            let mut syncer = Synchronizer::new(store);
            let outcome = syncer
                .sync_document(&mut document)
                .with_context(|| format!("Failed to sync {}", document.path().display()))?;
            print_outcome(&outcome, json)?;
        }
        Command::Parse { file, json } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let candidates: Vec<TaskCandidate> = parse(&text).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                for candidate in &candidates {
                    println!("{}", describe_candidate(candidate));
                }
            }
        }
        Command::Config { store, json } => {
            let root = resolve_root(cli.root.as_deref(), None)?;
            let resolved = resolve_config(&root, &store.overrides())?;
            print_config(&root, &resolved, json)?;
        }
        Command::Init { store, force } => {
            let root = match cli.root {
                Some(root) => root,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            let path = config_path(&root);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let config = TasksyncConfig {
                task_command: store.task_command,
                taskrc: store.taskrc.map(|p| p.to_string_lossy().to_string()),
                data_location: store.data_location.map(|p| p.to_string_lossy().to_string()),
                scope_attribute: Some(
                    store
                        .scope_attribute
                        .unwrap_or_else(|| DEFAULT_SCOPE_ATTRIBUTE.to_string()),
                ),
            };
            let path = write_config(&root, &config)?;
            println!("Wrote {}", path.display());
        }
        Command::Version => {
            println!("tasksync {}", tasksync_core::version());
        }
    }
    Ok(())
}

fn canonical_file(file: &Path) -> Result<PathBuf> {
    let file = file
        .canonicalize()
        .with_context(|| format!("Cannot open {}", file.display()))?;
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }
    Ok(file)
}

/// Explicit root, else the nearest config root above `start` (or cwd), else cwd.
fn resolve_root(explicit: Option<&Path>, start: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return root
            .canonicalize()
            .with_context(|| format!("Invalid --root {}", root.display()));
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let cwd = cwd.canonicalize().unwrap_or(cwd);
    let start = start.map(Path::to_path_buf).unwrap_or_else(|| cwd.clone());
    Ok(find_config_root(&start).unwrap_or(cwd))
}

/// Path of `file` relative to `root` with `/` separators; documents outside
/// the root keep their absolute path.
fn document_scope(root: &Path, file: &Path) -> Scope {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let joined = parts.join("/");
    if relative.has_root() {
        Scope::new(format!("/{}", joined))
    } else {
        Scope::new(joined)
    }
}

fn describe_candidate(candidate: &TaskCandidate) -> String {
    let id = candidate
        .external_id
        .as_ref()
        .map(|id| format!("#{} ", id))
        .unwrap_or_default();
    format!(
        "{}: [{}] {}{}",
        candidate.line_index + 1,
        if candidate.checked { "x" } else { " " },
        id,
        candidate.description
    )
}

#[derive(Serialize)]
struct SyncSummary<'a> {
    scope: &'a Scope,
    changed: bool,
    report: SyncReport,
    tasks: &'a [tasksync_core::reconcile::SyncedTask],
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> Result<()> {
    let report = outcome.report();
    if json {
        let summary = SyncSummary {
            scope: &outcome.result.scope,
            changed: outcome.changed,
            report,
            tasks: &outcome.result.tasks,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("{}: {}", outcome.result.scope, report);
    if !outcome.changed {
        println!("Document unchanged");
    }
    Ok(())
}

fn print_plan(plan: &SyncPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }
    for task in &plan.tasks {
        let action = match &task.action {
            PlannedAction::Keep { .. } => "keep".to_string(),
            PlannedAction::Update { record, status } => match status {
                Some(status) => format!("update #{} ({})", record.id, status.as_str()),
                None => format!("update #{}", record.id),
            },
            PlannedAction::Create {
                stale_id: Some(stale),
                ..
            } => format!("create (replaces #{})", stale),
            PlannedAction::Create { .. } => "create".to_string(),
        };
        println!("{} -> {}", describe_candidate(&task.candidate), action);
    }
    println!("{}: {} (dry run)", plan.scope, plan.report());
    Ok(())
}

fn print_config(root: &Path, resolved: &ResolvedConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(resolved)?);
        return Ok(());
    }
    println!("root = {}", root.display());
    println!(
        "task_command = {} ({})",
        resolved.task_command.value.join(" "),
        resolved.task_command.source
    );
    match &resolved.taskrc {
        Some(taskrc) => println!("taskrc = {} ({})", taskrc.value.display(), taskrc.source),
        None => println!("taskrc = (task default)"),
    }
    match &resolved.data_location {
        Some(data) => println!("data_location = {} ({})", data.value.display(), data.source),
        None => println!("data_location = (task default)"),
    }
    println!(
        "scope_attribute = {} ({})",
        resolved.scope_attribute.value, resolved.scope_attribute.source
    );
    Ok(())
}
