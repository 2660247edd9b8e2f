//! Options display formatting

use crate::models::DataType;
use crate::services::{ExchangeOptions, FormatOption, SweepReport};

/// Format the supported format x data type matrix
pub fn format_options(options: &ExchangeOptions) -> String {
    let mut output = String::new();
    output.push_str("Export formats:\n");
    output.push_str(&format_option_rows(&options.export));
    output.push_str("\nImport formats:\n");
    output.push_str(&format_option_rows(&options.import));
    output
}

fn format_option_rows(rows: &[FormatOption]) -> String {
    let mut output = String::new();
    for row in rows {
        let data_types = row
            .data_types
            .iter()
            .map(DataType::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        output.push_str(&format!(
            "  {:<6} .{:<5} {:<66}  {}\n",
            row.format.to_string(),
            row.extension,
            row.mime_type,
            data_types
        ));
    }
    output
}

pub fn format_sweep_report(report: &SweepReport) -> String {
    format!(
        "Removed {} artifact(s) and {} operation(s).\n",
        report.artifacts_removed, report.operations_removed
    )
}
