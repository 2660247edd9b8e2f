//! Audit entry data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Artifact, Operation, OperationStatus};

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Operation accepted by the dispatcher
    Submitted,
    /// Operation status changed
    Transitioned,
    /// Owner asked for cancellation
    CancelRequested,
    /// Removed on request
    Deleted,
    /// Removed by the retention sweep
    Expired,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Submitted => write!(f, "SUBMIT"),
            AuditAction::Transitioned => write!(f, "TRANSITION"),
            AuditAction::CancelRequested => write!(f, "CANCEL"),
            AuditAction::Deleted => write!(f, "DELETE"),
            AuditAction::Expired => write!(f, "EXPIRE"),
        }
    }
}

/// Types of entities that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Operation,
    Artifact,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Operation => write!(f, "Operation"),
            EntityType::Artifact => write!(f, "Artifact"),
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    pub action: AuditAction,

    pub entity_type: EntityType,

    pub entity_id: String,

    pub owner_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<OperationStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_status: Option<OperationStatus>,

    /// Short free-form context, e.g. "export csv transactions"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    fn for_operation(action: AuditAction, op: &Operation) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entity_type: EntityType::Operation,
            entity_id: op.id.to_string(),
            owner_id: op.owner_id.to_string(),
            from_status: None,
            to_status: None,
            detail: None,
        }
    }

    /// A new operation was accepted
    pub fn submitted(op: &Operation) -> Self {
        Self {
            to_status: Some(op.status),
            detail: Some(format!("{} {} {}", op.kind, op.format, op.data_type)),
            ..Self::for_operation(AuditAction::Submitted, op)
        }
    }

    /// `op` has just moved out of `from`
    pub fn transitioned(op: &Operation, from: OperationStatus) -> Self {
        let detail = match &op.result {
            Some(crate::models::OperationResult::Failed { error, .. }) => Some(error.to_string()),
            _ => None,
        };
        Self {
            from_status: Some(from),
            to_status: Some(op.status),
            detail,
            ..Self::for_operation(AuditAction::Transitioned, op)
        }
    }

    pub fn cancel_requested(op: &Operation) -> Self {
        Self {
            from_status: Some(op.status),
            ..Self::for_operation(AuditAction::CancelRequested, op)
        }
    }

    pub fn operation_deleted(op: &Operation, action: AuditAction) -> Self {
        Self {
            from_status: Some(op.status),
            ..Self::for_operation(action, op)
        }
    }

    pub fn artifact_deleted(artifact: &Artifact, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entity_type: EntityType::Artifact,
            entity_id: artifact.id.to_string(),
            owner_id: artifact.owner_id.to_string(),
            from_status: None,
            to_status: None,
            detail: Some(format!("{} bytes", artifact.size_bytes)),
        }
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {} {} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.action,
            self.entity_type,
            self.entity_id,
            self.owner_id
        );

        match (self.from_status, self.to_status) {
            (Some(from), Some(to)) => output.push_str(&format!(" {} -> {}", from, to)),
            (None, Some(to)) => output.push_str(&format!(" -> {}", to)),
            (Some(from), None) => output.push_str(&format!(" [{}]", from)),
            (None, None) => {}
        }

        if let Some(detail) = &self.detail {
            output.push_str(&format!("\n  {}", detail));
        }

        output
    }
}
