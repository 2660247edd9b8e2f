//! Audit log of operation lifecycle events
//!
//! Every submit, status transition, cancel request and deletion is appended
//! to a line-delimited JSON file. The log is a side channel: a failed audit
//! write is reported through `tracing` and never fails the operation itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use envelope_exchange::audit::{AuditEntry, AuditLogger};
//!
//! let logger = AuditLogger::new(paths.audit_log());
//! logger.log(&AuditEntry::submitted(&operation))?;
//! ```

mod entry;
mod logger;

pub use entry::{AuditAction, AuditEntry, EntityType};
pub use logger::AuditLogger;
