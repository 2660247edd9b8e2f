//! Import and validate CLI commands

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde_json::Value;

use crate::display::{format_operation_details, format_validation_summary};
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{DataType, ExchangeFormat};
use crate::services::ImportRequest;

use super::{CliContext, Outcome};

/// Import (and validate) arguments
#[derive(Args)]
pub struct ImportArgs {
    /// File to read
    pub file: PathBuf,
    /// Kind of records in the file (transactions, budgets, goals, categories)
    #[arg(short = 't', long = "type")]
    pub data_type: DataType,
    /// Input format; inferred from the file extension when omitted
    #[arg(short, long)]
    pub format: Option<ExchangeFormat>,
    /// Import options as a JSON object, e.g. '{"skip_duplicates":false}'
    #[arg(long)]
    pub options: Option<String>,
    /// Give up waiting after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl ImportArgs {
    fn into_request(self) -> ExchangeResult<(ImportRequest, Option<u64>)> {
        let format = match self.format {
            Some(format) => format,
            None => infer_format(&self.file)?,
        };
        let options = match &self.options {
            Some(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|e| ExchangeError::Validation(format!("Invalid --options JSON: {}", e)))?,
            None => Value::Null,
        };
        let payload = std::fs::read(&self.file).map_err(|e| {
            ExchangeError::Io(format!("Failed to read {}: {}", self.file.display(), e))
        })?;

        let request = ImportRequest::new(self.data_type, format, payload).options(options);
        Ok((request, self.timeout))
    }
}

fn infer_format(path: &Path) -> ExchangeResult<ExchangeFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            ExchangeError::Validation(format!(
                "Cannot infer a format for {}; pass --format",
                path.display()
            ))
        })?
        .to_ascii_lowercase()
        .parse()
        .map_err(ExchangeError::Validation)
}

/// Handle the import command
pub async fn handle_import_command(ctx: &CliContext, args: ImportArgs) -> ExchangeResult<Outcome> {
    let (request, timeout) = args.into_request()?;

    let id = ctx.service.submit_import(&ctx.user, request)?;
    let submitted = ctx.status(id)?;
    if !ctx.json {
        eprintln!("Submitted import {}", id);
    }

    let op = ctx.wait_for(&submitted, timeout.map(Duration::from_secs)).await?;
    ctx.emit(&op, format_operation_details)?;

    Ok(Outcome::for_status(op.status))
}

/// Handle the validate command
pub fn handle_validate_command(ctx: &CliContext, args: ImportArgs) -> ExchangeResult<Outcome> {
    let (request, _) = args.into_request()?;
    let summary = ctx.service.validate_only(request)?;
    ctx.emit(&summary, format_validation_summary)?;

    Ok(if summary.is_clean() {
        Outcome::Success
    } else {
        Outcome::Unsuccessful
    })
}
