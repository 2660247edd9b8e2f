//! Export CLI command
//!
//! Submits an export job, waits for it and optionally saves the artifact.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Args;

use crate::display::format_operation_details;
use crate::error::ExchangeResult;
use crate::models::{DataType, DateRange, ExchangeFormat, OperationStatus};
use crate::services::ExportRequest;

use super::operations::save_artifact;
use super::{CliContext, Outcome};

/// Export arguments
#[derive(Args)]
pub struct ExportArgs {
    /// Data to export (transactions, budgets, goals, categories, all)
    #[arg(short = 't', long = "type", default_value = "all")]
    pub data_type: DataType,
    /// Output format (csv, json, excel, pdf)
    #[arg(short, long, default_value = "csv")]
    pub format: ExchangeFormat,
    /// Only records dated on or after this day (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Only records dated on or before this day (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,
    /// Keep transaction attachment references
    #[arg(long)]
    pub include_attachments: bool,
    /// Save the finished artifact here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Give up waiting after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Handle the export command
pub async fn handle_export_command(ctx: &CliContext, args: ExportArgs) -> ExchangeResult<Outcome> {
    let mut request = ExportRequest::new(args.data_type, args.format)
        .include_attachments(args.include_attachments);
    if args.from.is_some() || args.to.is_some() {
        request = request.date_range(DateRange::new(args.from, args.to));
    }

    let id = ctx.service.submit_export(&ctx.user, request)?;
    let submitted = ctx.status(id)?;
    if !ctx.json {
        eprintln!("Submitted export {}", id);
    }

    let op = ctx.wait_for(&submitted, args.timeout.map(Duration::from_secs)).await?;
    ctx.emit(&op, format_operation_details)?;

    if let (OperationStatus::Completed, Some(path)) = (op.status, args.output) {
        let written = save_artifact(ctx, id, &path)?;
        if !ctx.json {
            println!("Saved {} bytes to {}", written, path.display());
        }
    }

    Ok(Outcome::for_status(op.status))
}
