//! Operation display formatting
//!
//! Formats operation history pages, single operations and import reports
//! for terminal output.

use crate::models::{ImportReport, Operation, OperationResult, Progress, RecordError};
use crate::storage::OperationPage;
use crate::validation::ValidationSummary;

/// Rows of per-record errors shown before truncating
const MAX_ERRORS_SHOWN: usize = 20;

/// Format a history page as a table
pub fn format_operation_page(page: &OperationPage) -> String {
    if page.items.is_empty() {
        return if page.total == 0 {
            "No operations found.".to_string()
        } else {
            format!("No operations on page {} of {}.", page.page, page.total_pages())
        };
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<11}  {:<6}  {:<12}  {:<5}  {:<10}  {:>12}  {}\n",
        "ID", "Kind", "Data", "Format", "Status", "Progress", "Created"
    ));
    output.push_str(&format!(
        "{:-<11}  {:-<6}  {:-<12}  {:-<5}  {:-<10}  {:->12}  {:-<16}\n",
        "", "", "", "", "", "", ""
    ));

    for op in &page.items {
        output.push_str(&format!(
            "{:<11}  {:<6}  {:<12}  {:<5}  {:<10}  {:>12}  {}\n",
            op.id.short(),
            op.kind.to_string(),
            op.data_type.to_string(),
            op.format.to_string(),
            op.status.to_string(),
            format_progress(&op.progress),
            op.created_at.format("%Y-%m-%d %H:%M"),
        ));
    }

    output.push_str(&format!(
        "\nPage {} of {} ({} total)",
        page.page,
        page.total_pages(),
        page.total
    ));
    output.push_str(&format!("  cursor: {}\n", page.cursor));
    output
}

/// `processed/total`, or just `processed` while the total is unknown
pub fn format_progress(progress: &Progress) -> String {
    match progress.total {
        Some(total) => format!("{}/{}", progress.processed, total),
        None => progress.processed.to_string(),
    }
}

/// Format the details of one operation
pub fn format_operation_details(op: &Operation) -> String {
    let mut output = String::new();

    output.push_str(&format!("Operation: {}\n", op.id));
    output.push_str(&format!("  Kind:      {}\n", op.kind));
    output.push_str(&format!("  Data:      {}\n", op.data_type));
    output.push_str(&format!("  Format:    {}\n", op.format));
    output.push_str(&format!("  Status:    {}\n", op.status));
    output.push_str(&format!("  Progress:  {}\n", format_progress(&op.progress)));
    output.push_str(&format!("  Created:   {}\n", op.created_at.to_rfc3339()));
    if let Some(started) = op.started_at {
        output.push_str(&format!("  Started:   {}\n", started.to_rfc3339()));
    }
    if let Some(finished) = op.finished_at {
        output.push_str(&format!("  Finished:  {}\n", finished.to_rfc3339()));
    }
    if op.cancel_requested && !op.is_terminal() {
        output.push_str("  Cancellation requested\n");
    }

    match &op.result {
        Some(OperationResult::Export(summary)) => {
            output.push_str(&format!("  Artifact:  {}\n", summary.artifact_id));
            output.push_str(&format!("  Size:      {} bytes\n", summary.size_bytes));
            output.push_str(&format!("  Records:   {}\n", summary.records));
            for failure in &summary.entity_errors {
                output.push_str(&format!("  Skipped {}: {}\n", failure.data_type, failure.error));
            }
        }
        Some(OperationResult::Import(report)) => {
            output.push_str(&format_import_report(report));
        }
        Some(OperationResult::Failed { error, report }) => {
            output.push_str(&format!("  Error:     {}\n", error));
            if let Some(report) = report {
                output.push_str(&format_import_report(report));
            }
        }
        Some(OperationResult::Cancelled { processed, report }) => {
            output.push_str(&format!("  Cancelled after {} records\n", processed));
            if let Some(report) = report {
                output.push_str(&format_import_report(report));
            }
        }
        None => {}
    }

    output
}

/// Format the counts and per-record errors of an import
pub fn format_import_report(report: &ImportReport) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "  Created:   {}\n  Updated:   {}\n  Skipped:   {}\n  Rejected:  {}\n",
        report.created,
        report.updated,
        report.skipped,
        report.rejected()
    ));
    output.push_str(&format_record_errors(&report.errors));
    output
}

/// Format a validate-only summary
pub fn format_validation_summary(summary: &ValidationSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Validated {} records: {} accepted, {} rejected\n",
        summary.total,
        summary.accepted,
        summary.rejected()
    ));
    output.push_str(&format_record_errors(&summary.errors));
    output
}

fn format_record_errors(errors: &[RecordError]) -> String {
    let mut output = String::new();
    for error in errors.iter().take(MAX_ERRORS_SHOWN) {
        output.push_str(&format!("    record {}: {}\n", error.index, error.reason));
    }
    if errors.len() > MAX_ERRORS_SHOWN {
        output.push_str(&format!("    ... and {} more\n", errors.len() - MAX_ERRORS_SHOWN));
    }
    output
}
