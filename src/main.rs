//! filevault - sandboxed file management with trash and background jobs.
//!
//! Usage:
//!   fvault copy SRC... --to DIR        Copy into a directory (as a job)
//!   fvault move SRC... --to DIR        Move into a directory (as a job)
//!   fvault delete PATH...              Move to trash (as a job)
//!   fvault restore PATH...             Restore from trash (as a job)
//!   fvault compress SRC... --to DIR    Zip sources (as a job)
//!   fvault decompress ZIP --to DIR     Extract an archive (as a job)
//!   fvault rename PATH NAME            Rename in place
//!   fvault trash list|purge|empty      Manage the trash
//!   fvault --help                      Show help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use filevault_core::{
    Actor, ConflictPolicy, ItemStatus, JobData, JobItemResult, JobOperation, JobStatus, JobUpdate,
    TrashRecord, VaultConfig,
};
use filevault_jobs::{JobOrchestrator, JobRequest, JsonJobRepository};
use filevault_ops::OperationsEngine;

#[derive(Parser)]
#[command(
    name = "filevault",
    version,
    about = "Sandboxed file management with trash and background jobs",
    long_about = "filevault manipulates files under a sandbox root using logical \
                  paths such as /docs/report.pdf.\n\n\
                  Batch commands run as background jobs and stream their progress; \
                  deleted items go to a trash area outside the sandbox."
)]
struct Cli {
    /// Sandbox root (overrides the config file)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for trash records and job history
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Trash directory (defaults to <state>/trash)
    #[arg(long, global = true)]
    trash: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// User name recorded in audit entries
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Job(JobCommand),

    /// Rename an item in place
    Rename {
        /// Logical path of the item
        path: String,

        /// New base name
        name: String,
    },

    /// Inspect and manage the trash
    #[command(subcommand)]
    Trash(TrashCommand),
}

/// Commands that run as background jobs.
#[derive(Subcommand)]
enum JobCommand {
    /// Copy items into a directory
    Copy(TransferArgs),

    /// Move items into a directory
    Move(TransferArgs),

    /// Move items to the trash
    Delete {
        /// Logical paths to delete
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Restore the latest trashed version of each path
    Restore {
        /// Original logical paths
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Pack items into a zip archive
    Compress {
        /// Logical paths to include
        #[arg(required = true)]
        sources: Vec<String>,

        /// Directory the archive is written to
        #[arg(short, long)]
        to: String,

        /// Archive name (".zip" is appended if missing)
        #[arg(short, long)]
        name: String,
    },

    /// Extract a zip archive
    Decompress {
        /// Logical path of the archive
        archive: String,

        /// Extraction directory
        #[arg(short, long)]
        to: String,

        /// Conflict policy (anything but overwrite refuses to clobber)
        #[arg(short, long, default_value = "rename")]
        policy: ConflictPolicy,
    },
}

impl JobCommand {
    fn into_request(self) -> JobRequest {
        match self {
            Self::Copy(args) => args.into_request(JobOperation::Copy),
            Self::Move(args) => args.into_request(JobOperation::Move),
            Self::Delete { paths } => JobRequest::new(JobOperation::Delete).paths(paths),
            Self::Restore { paths } => JobRequest::new(JobOperation::Restore).paths(paths),
            Self::Compress { sources, to, name } => JobRequest::new(JobOperation::Compress)
                .sources(sources)
                .destination(to)
                .name(name),
            Self::Decompress {
                archive,
                to,
                policy,
            } => JobRequest::new(JobOperation::Decompress)
                .sources([archive])
                .destination(to)
                .conflict_policy(policy.to_string()),
        }
    }
}

#[derive(Args)]
struct TransferArgs {
    /// Logical paths to transfer
    #[arg(required = true)]
    sources: Vec<String>,

    /// Destination directory
    #[arg(short, long)]
    to: String,

    /// What to do when the target exists
    #[arg(short, long, default_value = "rename")]
    policy: ConflictPolicy,
}

impl TransferArgs {
    fn into_request(self, operation: JobOperation) -> JobRequest {
        JobRequest::new(operation)
            .sources(self.sources)
            .destination(self.to)
            .conflict_policy(self.policy.to_string())
    }
}

#[derive(Subcommand)]
enum TrashCommand {
    /// List trashed items, newest first
    List {
        /// Include items that were restored
        #[arg(short, long)]
        all: bool,
    },

    /// Permanently delete one trashed item
    Purge {
        /// Trash record id
        id: Uuid,
    },

    /// Permanently delete everything in the trash
    Empty,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!(
        root = %config.storage_root.display(),
        state = %config.state_dir.display(),
        trash = %config.trash_dir().display(),
        "Configuration loaded"
    );
    let actor = cli
        .user
        .as_deref()
        .map(|user| Actor::new(user, user, "cli", "local"))
        .unwrap_or_else(Actor::system);

    let engine = Arc::new(
        OperationsEngine::from_config(&config).context("Failed to open storage")?,
    );

    match cli.command {
        Command::Rename { path, name } => {
            let renamed = engine.rename(&path, &name, &actor)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&renamed)?),
                OutputFormat::Text => println!("{} -> {}", renamed.old_path, renamed.new_path),
            }
        }
        Command::Trash(command) => run_trash(&engine, command, &actor, cli.format)?,
        Command::Job(job) => {
            run_job(engine, &config, job.into_request(), actor, cli.format).await?;
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Config file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<VaultConfig> {
    let mut config = match &cli.config {
        Some(path) => VaultConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => VaultConfig::new(cli.root.clone().unwrap_or_else(|| PathBuf::from("."))),
    };

    if let Some(root) = &cli.root {
        config.storage_root = root.clone();
    }
    if let Some(state) = &cli.state {
        config.state_dir = state.clone();
    }
    if let Some(trash) = &cli.trash {
        config.trash_root = Some(trash.clone());
    }
    Ok(config)
}

/// Submit a job, stream its progress and print the per-item results.
async fn run_job(
    engine: Arc<OperationsEngine>,
    config: &VaultConfig,
    request: JobRequest,
    actor: Actor,
    format: OutputFormat,
) -> Result<()> {
    let repository = JsonJobRepository::open(config.jobs_dir()).context("Failed to open job history")?;
    let orchestrator = JobOrchestrator::builder(engine)
        .config(config)
        .repository(Arc::new(repository))
        .start();

    let queued = orchestrator.submit(request, actor).await?;
    if format == OutputFormat::Text {
        eprintln!("Job {} queued ({} item(s))", queued.job_id, queued.total_items);
    }

    let mut subscription = orchestrator.subscribe(queued.job_id)?;
    while let Some(update) = subscription.recv().await {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&update)?),
            OutputFormat::Text => print_update(&update),
        }
    }

    let job = orchestrator.get(queued.job_id)?;
    let items = collect_items(&orchestrator, &job)?;
    orchestrator.shutdown().await;

    match format {
        OutputFormat::Json => {
            let report = JobData { items, ..job.clone() };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_job(&job, &items),
    }

    if job.status == JobStatus::Failed {
        bail!("Job {} failed", job.job_id);
    }
    Ok(())
}

fn collect_items(orchestrator: &JobOrchestrator, job: &JobData) -> Result<Vec<JobItemResult>> {
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let (chunk, meta) = orchestrator.items(job.job_id, page, 0)?;
        items.extend(chunk.items);
        if page >= meta.total_pages {
            break;
        }
        page += 1;
    }
    Ok(items)
}

fn print_update(update: &JobUpdate) {
    eprintln!(
        "[{:>9}] {:>3}%  {}/{} processed, {} ok, {} failed",
        update.status.to_string(),
        update.progress,
        update.processed_items,
        update.total_items,
        update.success_items,
        update.failed_items
    );
}

fn print_job(job: &JobData, items: &[JobItemResult]) {
    println!();
    println!("{}", "─".repeat(60));
    println!(" {} job {} - {}", job.operation, job.job_id, job.status);
    println!(
        " {} succeeded, {} failed of {}",
        job.success_items, job.failed_items, job.total_items
    );
    println!("{}", "─".repeat(60));

    for item in items {
        let tag = match item.status {
            ItemStatus::Success => "ok  ",
            ItemStatus::Failed => "FAIL",
            ItemStatus::Skipped => "SKIP",
        };
        let subject = match (&item.from, &item.to, &item.path) {
            (Some(from), Some(to), _) => format!("{from} -> {to}"),
            (Some(from), None, _) => from.clone(),
            (None, _, Some(path)) => path.clone(),
            _ => String::from("(job)"),
        };
        match &item.reason {
            Some(reason) => println!(" {tag} {subject}: {reason}"),
            None => println!(" {tag} {subject}"),
        }
    }
}

fn run_trash(
    engine: &OperationsEngine,
    command: TrashCommand,
    actor: &Actor,
    format: OutputFormat,
) -> Result<()> {
    match command {
        TrashCommand::List { all } => {
            let records = engine.list_trash(all)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
                OutputFormat::Text => print_trash(&records),
            }
        }
        TrashCommand::Purge { id } => {
            engine.permanent_delete_trash(id, actor)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "deleted": id })),
                OutputFormat::Text => println!("Purged {id}"),
            }
        }
        TrashCommand::Empty => {
            let count = engine.empty_trash(actor)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "deleted_count": count })),
                OutputFormat::Text => println!("Purged {count} item(s)"),
            }
        }
    }
    Ok(())
}

fn print_trash(records: &[TrashRecord]) {
    if records.is_empty() {
        println!("Trash is empty");
        return;
    }

    for record in records {
        let restored = if record.is_restored() { "  (restored)" } else { "" };
        println!(
            "{}  {}  {}{}",
            record.id,
            record.deleted_at.format("%Y-%m-%d %H:%M:%S"),
            record.original_path,
            restored
        );
    }
}
