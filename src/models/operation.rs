//! Operation model
//!
//! An [`Operation`] is one tracked export or import job. Its status follows a
//! small state machine:
//!
//! ```text
//! pending ──> running ──> completed | failed | cancelled
//!    └──────────────────> failed | cancelled
//! ```
//!
//! Terminal states are final. The result is attached by the same transition
//! that makes the operation terminal, so `result.is_some()` always matches
//! `status.is_terminal()`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::format::ExchangeFormat;
use super::ids::{ArtifactId, OperationId, UserId};
use super::record::DataType;
use crate::error::{ExchangeError, ExchangeResult, OperationError};

/// Direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Export,
    Import,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "export" => Ok(Self::Export),
            "import" => Ok(Self::Import),
            other => Err(format!("unknown operation kind '{}'", other)),
        }
    }
}

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending or running
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Inclusive date range; either bound may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn is_valid(&self) -> bool {
        match (self.start, self.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        }
    }
}

/// Export selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExportFilter {
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub include_attachments: bool,
}

impl ExportFilter {
    /// Whether a record with this reference date passes the filter.
    ///
    /// Records without a reference date are never filtered out.
    pub fn accepts(&self, reference_date: Option<NaiveDate>) -> bool {
        match (self.date_range, reference_date) {
            (Some(range), Some(date)) => range.contains(date),
            _ => true,
        }
    }
}

/// Filter stored on the operation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationFilter {
    Export(ExportFilter),
    /// Raw options payload as submitted
    Import { options: Value },
}

/// Options understood by the import worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Skip id-less transactions that match an existing one
    #[serde(default = "default_skip_duplicates")]
    pub skip_duplicates: bool,

    /// Preferred strftime format for dates
    #[serde(default)]
    pub date_format: Option<String>,

    /// Category used when a record leaves it empty
    #[serde(default)]
    pub default_category: Option<String>,
}

fn default_skip_duplicates() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: default_skip_duplicates(),
            date_format: None,
            default_category: None,
        }
    }
}

impl ImportOptions {
    /// Interpret a raw options payload. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> ExchangeResult<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| ExchangeError::Validation(format!("Invalid import options: {}", e))),
            _ => Err(ExchangeError::Validation(
                "Import options must be a JSON object".to_string(),
            )),
        }
    }
}

/// Records processed so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub processed: u64,
    /// Unknown until an import has finished decoding
    pub total: Option<u64>,
}

/// A field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A single record that could not be decoded, validated or committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Zero-based position of the record in the input
    pub index: usize,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl RecordError {
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
            fields: Vec::new(),
        }
    }

    pub fn from_fields(index: usize, fields: Vec<FieldError>) -> Self {
        let reason = fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            index,
            reason,
            fields,
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.index, self.reason)
    }
}

/// Per-record outcome counts of an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImportReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<RecordError>,
}

impl ImportReport {
    /// Records that were written (created or updated)
    pub fn committed(&self) -> u64 {
        self.created + self.updated
    }

    pub fn rejected(&self) -> usize {
        self.errors.len()
    }
}

/// One entity of an `all` export that could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub data_type: DataType,
    pub error: OperationError,
}

/// Outcome of a completed export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub artifact_id: ArtifactId,
    pub size_bytes: u64,
    pub records: u64,
    pub data_types: Vec<DataType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_errors: Vec<EntityFailure>,
}

/// Result attached to a terminal operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationResult {
    Export(ExportSummary),
    Import(ImportReport),
    Failed {
        error: OperationError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<ImportReport>,
    },
    Cancelled {
        processed: u64,
        /// Import records committed before cancellation was observed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<ImportReport>,
    },
}

impl OperationResult {
    pub fn failed(error: OperationError) -> Self {
        Self::Failed {
            error,
            report: None,
        }
    }

    /// Terminal status implied by this result
    pub fn status(&self) -> OperationStatus {
        match self {
            Self::Export(_) | Self::Import(_) => OperationStatus::Completed,
            Self::Failed { .. } => OperationStatus::Failed,
            Self::Cancelled { .. } => OperationStatus::Cancelled,
        }
    }

    pub fn artifact_id(&self) -> Option<ArtifactId> {
        match self {
            Self::Export(summary) => Some(summary.artifact_id),
            _ => None,
        }
    }
}

/// Requested status change
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// pending -> running
    Start,
    /// Move to the terminal status implied by the result
    Finish(OperationResult),
}

impl Transition {
    pub fn target(&self) -> OperationStatus {
        match self {
            Self::Start => OperationStatus::Running,
            Self::Finish(result) => result.status(),
        }
    }
}

/// A tracked export or import job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub owner_id: UserId,
    pub kind: OperationKind,
    pub data_type: DataType,
    pub format: ExchangeFormat,
    pub status: OperationStatus,
    pub filter: OperationFilter,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub result: Option<OperationResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Insertion order assigned by the registry; breaks created_at ties
    #[serde(default)]
    pub sequence: u64,
}

impl Operation {
    /// Create a pending export operation
    pub fn export(
        owner_id: UserId,
        data_type: DataType,
        format: ExchangeFormat,
        filter: ExportFilter,
    ) -> Self {
        Self::new(
            owner_id,
            OperationKind::Export,
            data_type,
            format,
            OperationFilter::Export(filter),
        )
    }

    /// Create a pending import operation
    pub fn import(owner_id: UserId, data_type: DataType, format: ExchangeFormat, options: Value) -> Self {
        Self::new(
            owner_id,
            OperationKind::Import,
            data_type,
            format,
            OperationFilter::Import { options },
        )
    }

    fn new(
        owner_id: UserId,
        kind: OperationKind,
        data_type: DataType,
        format: ExchangeFormat,
        filter: OperationFilter,
    ) -> Self {
        Self {
            id: OperationId::new(),
            owner_id,
            kind,
            data_type,
            format,
            status: OperationStatus::Pending,
            filter,
            progress: Progress::default(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel_requested: false,
            sequence: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// An illegal transition leaves the operation untouched.
    pub fn apply(&mut self, transition: Transition) -> ExchangeResult<()> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(ExchangeError::IllegalTransition {
                from: self.status,
                to: target,
            });
        }

        let now = Utc::now();
        match transition {
            Transition::Start => {
                self.started_at = Some(now);
            }
            Transition::Finish(result) => {
                self.result = Some(result);
                self.finished_at = Some(now);
            }
        }
        self.status = target;
        Ok(())
    }

    /// Export filter, if this is an export
    pub fn export_filter(&self) -> Option<&ExportFilter> {
        match &self.filter {
            OperationFilter::Export(filter) => Some(filter),
            OperationFilter::Import { .. } => None,
        }
    }

    /// Parsed import options, if this is an import
    pub fn import_options(&self) -> Option<ExchangeResult<ImportOptions>> {
        match &self.filter {
            OperationFilter::Import { options } => Some(ImportOptions::from_value(options)),
            OperationFilter::Export(_) => None,
        }
    }
}
