//! Operation CLI commands
//!
//! Everything that acts on existing operations, plus options and housekeeping.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::Args;

use crate::display::{
    format_operation_details, format_operation_page, format_options, format_sweep_report,
};
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{OperationId, OperationKind};
use crate::storage::{ArtifactDownload, ListQuery, MAX_PAGE_SIZE};

use super::{CliContext, Outcome};

/// History arguments
#[derive(Args)]
pub struct HistoryArgs {
    /// Only show exports or imports
    #[arg(short, long)]
    pub kind: Option<OperationKind>,
    /// Page number, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,
    /// Operations per page
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
    /// Snapshot cursor printed with an earlier page
    #[arg(long)]
    pub cursor: Option<u64>,
}

/// Status arguments
#[derive(Args)]
pub struct StatusArgs {
    /// Operation ID
    pub id: OperationId,
    /// Block until the operation finishes
    #[arg(short, long)]
    pub wait: bool,
    /// Give up waiting after this many seconds
    #[arg(long, requires = "wait")]
    pub timeout: Option<u64>,
}

/// Download arguments
#[derive(Args)]
pub struct DownloadArgs {
    /// Export operation ID
    pub id: OperationId,
    /// Destination path; defaults to the artifact's file name, `-` for stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Handle the history command
pub fn handle_history_command(ctx: &CliContext, args: HistoryArgs) -> ExchangeResult<Outcome> {
    if args.page == 0 {
        return Err(ExchangeError::Validation("Pages start at 1".to_string()));
    }
    if args.limit == 0 || args.limit > MAX_PAGE_SIZE {
        return Err(ExchangeError::Validation(format!(
            "Limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let mut query = ListQuery::new(args.page, args.limit);
    if let Some(kind) = args.kind {
        query = query.kind(kind);
    }
    if let Some(cursor) = args.cursor {
        query = query.cursor(cursor);
    }

    let page = ctx.service.history(&ctx.user, &query)?;
    ctx.emit(&page, format_operation_page)?;
    Ok(Outcome::Success)
}

/// Handle the status command
pub async fn handle_status_command(ctx: &CliContext, args: StatusArgs) -> ExchangeResult<Outcome> {
    let mut op = ctx.status(args.id)?;
    if args.wait && !op.is_terminal() {
        op = ctx.wait_for(&op, args.timeout.map(Duration::from_secs)).await?;
    }
    ctx.emit(&op, format_operation_details)?;
    Ok(Outcome::Success)
}

/// Handle the download command
pub fn handle_download_command(ctx: &CliContext, args: DownloadArgs) -> ExchangeResult<Outcome> {
    let mut download = ctx.service.download(args.id, &ctx.user)?;

    match args.output {
        Some(path) if path.as_os_str() == "-" => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut download, &mut stdout)?;
            stdout.flush()?;
        }
        output => {
            let path = output.unwrap_or_else(|| PathBuf::from(download.artifact.download_name()));
            let written = write_download(&mut download, &path)?;
            eprintln!("Saved {} bytes to {}", written, path.display());
        }
    }
    Ok(Outcome::Success)
}

/// Copy a completed export's artifact to `path`
pub(crate) fn save_artifact(ctx: &CliContext, id: OperationId, path: &Path) -> ExchangeResult<u64> {
    let mut download = ctx.service.download(id, &ctx.user)?;
    write_download(&mut download, path)
}

fn write_download(download: &mut ArtifactDownload, path: &Path) -> ExchangeResult<u64> {
    let mut file = File::create(path)
        .map_err(|e| ExchangeError::Io(format!("Failed to create {}: {}", path.display(), e)))?;
    let written = io::copy(download, &mut file)?;
    file.sync_all()?;
    Ok(written)
}

/// Handle the cancel command
pub fn handle_cancel_command(ctx: &CliContext, id: OperationId) -> ExchangeResult<Outcome> {
    let op = ctx.status(id)?;
    let op = ctx.service.cancel(op.kind, id, &ctx.user)?;
    ctx.emit(&op, |op| format!("Cancellation requested for {} ({})\n", op.id, op.status))?;
    Ok(Outcome::Success)
}

/// Handle the delete command
pub fn handle_delete_command(ctx: &CliContext, id: OperationId) -> ExchangeResult<Outcome> {
    let op = ctx.service.delete_operation(id, &ctx.user)?;
    ctx.emit(&op, |op| format!("Deleted operation {}\n", op.id))?;
    Ok(Outcome::Success)
}

/// Handle the options command
pub fn handle_options_command(ctx: &CliContext) -> ExchangeResult<Outcome> {
    ctx.emit(&ctx.service.options(), format_options)?;
    Ok(Outcome::Success)
}

/// Handle the audit command
pub fn handle_audit_command(ctx: &CliContext, limit: usize) -> ExchangeResult<Outcome> {
    let entries = ctx.service.audit_trail(&ctx.user, limit)?;
    ctx.emit(&entries, |entries| {
        if entries.is_empty() {
            return "No audit entries found.\n".to_string();
        }
        entries
            .iter()
            .map(|entry| format!("{}\n", entry.format_human_readable()))
            .collect()
    })?;
    Ok(Outcome::Success)
}

/// Handle the sweep command
pub fn handle_sweep_command(ctx: &CliContext) -> ExchangeResult<Outcome> {
    let report = ctx.service.sweep(Utc::now())?;
    ctx.emit(&report, format_sweep_report)?;
    Ok(Outcome::Success)
}
