use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use envelope_exchange::cli::{
    handle_audit_command, handle_cancel_command, handle_delete_command, handle_download_command,
    handle_export_command, handle_history_command, handle_import_command, handle_options_command,
    handle_status_command, handle_sweep_command, handle_validate_command, CliContext,
    DownloadArgs, ExportArgs, HistoryArgs, ImportArgs, Outcome, StatusArgs,
};
use envelope_exchange::error::ExchangeResult;
use envelope_exchange::config::{ExchangePaths, Settings};
use envelope_exchange::models::{OperationId, UserId};
use envelope_exchange::services::ExchangeService;

#[derive(Parser)]
#[command(
    name = "envelope-exchange",
    author = "Kaylee Beyene",
    version,
    about = "Tracked, cancellable export and import jobs for budgeting data",
    long_about = "envelope-exchange moves transactions, budgets, goals and categories \
                  in and out as CSV, JSON, Excel or PDF. Every export and import runs \
                  as a tracked job with progress, history and cancellation."
)]
struct Cli {
    /// User whose data and operations to act on
    #[arg(short, long, global = true, env = "ENVELOPE_EXCHANGE_USER", default_value = "local")]
    user: String,

    /// Base directory for data, artifacts and settings
    #[arg(long, global = true, env = "ENVELOPE_EXCHANGE_DIR")]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export records to a file
    Export(ExportArgs),

    /// Import records from a file
    Import(ImportArgs),

    /// Check an import file without committing anything
    Validate(ImportArgs),

    /// List past and running operations, newest first
    #[command(alias = "ls")]
    History(HistoryArgs),

    /// Show one operation
    Status(StatusArgs),

    /// Save the artifact of a completed export
    Download(DownloadArgs),

    /// Request cancellation of a running operation
    Cancel {
        /// Operation ID
        id: OperationId,
    },

    /// Remove a finished operation and its artifact
    #[command(alias = "rm")]
    Delete {
        /// Operation ID
        id: OperationId,
    },

    /// List supported formats and data types
    Options,

    /// Remove expired artifacts and old operations now
    Sweep,

    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let paths = match &cli.data_dir {
        Some(dir) => ExchangePaths::with_base_dir(dir.clone()),
        None => ExchangePaths::new()?,
    };
    let settings = Settings::load_or_create(&paths)?;
    envelope_exchange::logging::init(&settings.logging, cli.verbose)?;
    debug!(base_dir = %paths.base_dir().display(), "starting");

    if let Commands::Config = cli.command {
        print_config(&paths, &settings);
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let outcome = runtime.block_on(async {
        let service = ExchangeService::open(&paths, &settings)?;
        let shutdown = CancellationToken::new();
        let retention = service.spawn_retention(shutdown.clone());

        let ctx = CliContext {
            service,
            user: UserId::new(cli.user),
            json: cli.json,
        };
        let outcome = run(&ctx, cli.command).await;

        shutdown.cancel();
        let _ = retention.await;
        outcome
    })?;

    Ok(match outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Unsuccessful => ExitCode::FAILURE,
    })
}

async fn run(ctx: &CliContext, command: Commands) -> ExchangeResult<Outcome> {
    match command {
        Commands::Export(args) => handle_export_command(ctx, args).await,
        Commands::Import(args) => handle_import_command(ctx, args).await,
        Commands::Validate(args) => handle_validate_command(ctx, args),
        Commands::History(args) => handle_history_command(ctx, args),
        Commands::Status(args) => handle_status_command(ctx, args).await,
        Commands::Download(args) => handle_download_command(ctx, args),
        Commands::Cancel { id } => handle_cancel_command(ctx, id),
        Commands::Delete { id } => handle_delete_command(ctx, id),
        Commands::Options => handle_options_command(ctx),
        Commands::Sweep => handle_sweep_command(ctx),
        Commands::Audit { limit } => handle_audit_command(ctx, limit),
        Commands::Config => Ok(Outcome::Success),
    }
}

fn print_config(paths: &ExchangePaths, settings: &Settings) {
    println!("envelope-exchange configuration");
    println!("===============================");
    println!("Base directory:      {}", paths.base_dir().display());
    println!("Data directory:      {}", paths.data_dir().display());
    println!("Artifact directory:  {}", paths.artifacts_dir().display());
    println!("Settings file:       {}", paths.settings_file().display());
    println!();
    println!("Jobs:");
    println!("  Batch size:              {}", settings.jobs.effective_batch_size());
    println!("  Max concurrent exports:  {}", settings.jobs.max_concurrent_exports);
    println!("  Max concurrent imports:  {}", settings.jobs.max_concurrent_imports);
    println!("Retention:");
    println!("  Artifact TTL:    {} hours", settings.retention.artifact_ttl_hours);
    println!("  Operation TTL:   {} days", settings.retention.operation_ttl_days);
    println!("  Sweep interval:  {} seconds", settings.retention.sweep_interval_secs);
}
