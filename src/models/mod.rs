//! Core data models for envelope-exchange
//!
//! The four financial record types, their loosely typed decoded form, and the
//! bookkeeping types of the job engine: operations and artifacts.

pub mod artifact;
pub mod budget;
pub mod category;
pub mod format;
pub mod goal;
pub mod ids;
pub mod money;
pub mod operation;
pub mod record;
pub mod transaction;

pub use artifact::Artifact;
pub use budget::{BudgetPeriod, BudgetRecord};
pub use category::{CategoryKind, CategoryRecord, MAX_CATEGORY_NAME_LEN};
pub use format::ExchangeFormat;
pub use goal::{GoalRecord, GoalStatus};
pub use ids::{ArtifactId, BudgetId, CategoryId, GoalId, OperationId, TransactionId, UserId};
pub use money::{Money, MoneyParseError};
pub use operation::{
    DateRange, EntityFailure, ExportFilter, ExportSummary, FieldError, ImportOptions,
    ImportReport, Operation, OperationFilter, OperationKind, OperationResult, OperationStatus,
    Progress, RecordError, Transition,
};
pub use record::{normalize_field_name, Cell, DataType, RawRecord, Record};
pub use transaction::{TransactionRecord, TransactionType};
