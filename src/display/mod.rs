//! Display formatting for terminal output
//!
//! Plain-text tables and detail views for operations, reports and options.

pub mod operation;
pub mod options;

pub use operation::{
    format_import_report, format_operation_details, format_operation_page, format_progress,
    format_validation_summary,
};
pub use options::{format_options, format_sweep_report};
