//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the exchange service.

pub mod export;
pub mod import;
pub mod operations;

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{Operation, OperationId, OperationStatus, UserId};
use crate::services::ExchangeService;

pub use export::{handle_export_command, ExportArgs};
pub use import::{handle_import_command, handle_validate_command, ImportArgs};
pub use operations::{
    handle_audit_command, handle_cancel_command, handle_delete_command, handle_download_command,
    handle_history_command, handle_options_command, handle_status_command, handle_sweep_command,
    DownloadArgs, HistoryArgs, StatusArgs,
};

/// Everything a command handler needs
pub struct CliContext {
    pub service: ExchangeService,
    pub user: UserId,
    /// Print machine-readable JSON instead of tables
    pub json: bool,
}

/// How a command ended, for the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The command ran but the job it waited on did not complete
    Unsuccessful,
}

impl Outcome {
    pub fn for_status(status: OperationStatus) -> Self {
        if status == OperationStatus::Completed {
            Self::Success
        } else {
            Self::Unsuccessful
        }
    }
}

impl CliContext {
    /// Print `value` as JSON or via the text formatter
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> ExchangeResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text(value));
        }
        Ok(())
    }

    /// Wait for an operation to finish. Ctrl-C requests cancellation and
    /// keeps waiting until the worker has stopped.
    pub async fn wait_for(&self, op: &Operation, timeout: Option<Duration>) -> ExchangeResult<Operation> {
        let wait = self.service.wait(op.id, &self.user, timeout);
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result,
            _ = tokio::signal::ctrl_c() => {
                warn!(operation_id = %op.id, "interrupted, requesting cancellation");
                eprintln!("Cancelling {}...", op.id.short());
                match self.service.cancel(op.kind, op.id, &self.user) {
                    Ok(_) | Err(ExchangeError::AlreadyTerminal(_)) => {}
                    Err(e) => return Err(e),
                }
                self.service.wait(op.id, &self.user, None).await
            }
        }
    }

    pub fn status(&self, id: OperationId) -> ExchangeResult<Operation> {
        self.service.status(id, &self.user)
    }
}
