//! Operation registry
//!
//! Single source of truth for job state. Every operation lives behind its own
//! mutex so writes to one operation are serialized while reads and writes to
//! different operations proceed in parallel. The map itself is only
//! write-locked to insert or remove entries.
//!
//! When opened with a path, the registry mirrors itself to `operations.json`
//! on every structural change (create, transition, cancel request, delete).
//! Progress counters are kept in memory only and reach disk with the next
//! transition.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::error::{ErrorCode, ExchangeError, ExchangeResult, OperationError};
use crate::models::{
    Operation, OperationId, OperationKind, OperationResult, Transition, UserId,
};

use super::file_io::{read_json, write_json_atomic};

/// Largest page size `list` will return
pub const MAX_PAGE_SIZE: usize = 100;

/// Serializable registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OperationData {
    operations: Vec<Operation>,
}

/// History query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub kind: Option<OperationKind>,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
    /// Snapshot marker returned by an earlier page
    pub cursor: Option<u64>,
}

impl ListQuery {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            kind: None,
            page,
            limit,
            cursor: None,
        }
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn cursor(mut self, cursor: u64) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// One page of history, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPage {
    pub items: Vec<Operation>,
    /// Matching operations in the snapshot
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    /// Pass back to get further pages of the same snapshot
    pub cursor: u64,
}

impl OperationPage {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.limit.max(1))
    }
}

type Slot = Arc<Mutex<Operation>>;

/// Registry of export and import operations
pub struct OperationRegistry {
    path: Option<PathBuf>,
    operations: RwLock<HashMap<OperationId, Slot>>,
    next_sequence: AtomicU64,
    persist_lock: Mutex<()>,
    audit: Option<Arc<AuditLogger>>,
}

impl OperationRegistry {
    /// A registry that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            operations: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
            persist_lock: Mutex::new(()),
            audit: None,
        }
    }

    /// Load a persisted registry.
    ///
    /// Operations left pending or running by a previous process are failed
    /// with code `interrupted`; no worker will ever pick them up again.
    pub fn open(path: PathBuf) -> ExchangeResult<Self> {
        let data: OperationData = read_json(&path)?;

        let mut max_sequence = 0;
        let mut map = HashMap::with_capacity(data.operations.len());
        let mut recovered = 0usize;
        for mut op in data.operations {
            if op.status.is_in_flight() {
                let error = OperationError::new(
                    ErrorCode::Interrupted,
                    "The operation was interrupted before it finished",
                );
                op.apply(Transition::Finish(OperationResult::failed(error)))?;
                recovered += 1;
            }
            max_sequence = max_sequence.max(op.sequence);
            map.insert(op.id, Arc::new(Mutex::new(op)));
        }

        let registry = Self {
            path: Some(path),
            operations: RwLock::new(map),
            next_sequence: AtomicU64::new(max_sequence + 1),
            persist_lock: Mutex::new(()),
            audit: None,
        };

        if recovered > 0 {
            warn!(count = recovered, "marked interrupted operations as failed");
            registry.persist()?;
        }
        Ok(registry)
    }

    /// Send lifecycle events to an audit log
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn slot(&self, id: OperationId) -> ExchangeResult<Slot> {
        let operations = self.operations.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        operations
            .get(&id)
            .cloned()
            .ok_or_else(|| ExchangeError::operation_not_found(id.to_string()))
    }

    fn lock_op(slot: &Slot) -> ExchangeResult<std::sync::MutexGuard<'_, Operation>> {
        slot.lock()
            .map_err(|e| ExchangeError::Storage(format!("Failed to acquire operation lock: {}", e)))
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            audit.record(entry);
        }
    }

    /// Insert a new operation
    pub fn create(&self, op: Operation) -> ExchangeResult<OperationId> {
        self.insert(op, None)
    }

    /// Insert a new operation unless its owner already has `limit` in-flight
    /// operations of the same kind.
    ///
    /// The check and the insert happen under one write lock, so concurrent
    /// submissions cannot both slip under the limit.
    pub fn create_if_below_limit(&self, op: Operation, limit: usize) -> ExchangeResult<OperationId> {
        self.insert(op, Some(limit))
    }

    fn insert(&self, mut op: Operation, limit: Option<usize>) -> ExchangeResult<OperationId> {
        let id = op.id;
        {
            let mut operations = self.operations.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;

            if operations.contains_key(&id) {
                return Err(ExchangeError::Internal(format!("duplicate operation id {}", id)));
            }

            if let Some(limit) = limit {
                let mut in_flight = 0;
                for slot in operations.values() {
                    let other = Self::lock_op(slot)?;
                    if other.owner_id == op.owner_id
                        && other.kind == op.kind
                        && other.status.is_in_flight()
                    {
                        in_flight += 1;
                    }
                }
                if in_flight >= limit {
                    debug!(owner_id = %op.owner_id, kind = %op.kind, in_flight, limit, "rejecting submission");
                    return Err(ExchangeError::TooManyConcurrentOperations {
                        kind: op.kind,
                        limit,
                    });
                }
            }

            op.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            operations.insert(id, Arc::new(Mutex::new(op.clone())));
        }

        // A submission that cannot be saved leaves no row behind
        if let Err(e) = self.persist() {
            if let Ok(mut operations) = self.operations.write() {
                operations.remove(&id);
            }
            return Err(e);
        }

        info!(
            operation_id = %id,
            owner_id = %op.owner_id,
            kind = %op.kind,
            data_type = %op.data_type,
            format = %op.format,
            "operation created"
        );
        self.audit(AuditEntry::submitted(&op));
        Ok(id)
    }

    /// Snapshot of one operation
    pub fn get(&self, id: OperationId) -> ExchangeResult<Operation> {
        let slot = self.slot(id)?;
        let op = Self::lock_op(&slot)?;
        Ok(op.clone())
    }

    /// Apply a status transition. An illegal transition changes nothing.
    pub fn update_status(&self, id: OperationId, transition: Transition) -> ExchangeResult<Operation> {
        let slot = self.slot(id)?;
        let (from, updated) = {
            let mut op = Self::lock_op(&slot)?;
            let from = op.status;
            op.apply(transition)?;
            (from, op.clone())
        };

        info!(
            operation_id = %id,
            from = %from,
            to = %updated.status,
            processed = updated.progress.processed,
            "operation status changed"
        );
        self.audit(AuditEntry::transitioned(&updated, from));
        self.persist_or_warn(id);
        Ok(updated)
    }

    /// Attach the final result; the terminal status follows from the result
    pub fn set_result(&self, id: OperationId, result: OperationResult) -> ExchangeResult<Operation> {
        self.update_status(id, Transition::Finish(result))
    }

    /// Attach a successful result unless cancellation was requested first.
    ///
    /// Returns `None`, leaving the operation untouched, when the cancel flag
    /// is set. The check and the transition share the operation's lock, so a
    /// concurrent cancel request either wins here or sees a terminal status.
    pub fn finish_unless_cancelled(
        &self,
        id: OperationId,
        result: OperationResult,
    ) -> ExchangeResult<Option<Operation>> {
        let slot = self.slot(id)?;
        let (from, updated) = {
            let mut op = Self::lock_op(&slot)?;
            if op.cancel_requested {
                return Ok(None);
            }
            let from = op.status;
            op.apply(Transition::Finish(result))?;
            (from, op.clone())
        };

        info!(
            operation_id = %id,
            from = %from,
            to = %updated.status,
            processed = updated.progress.processed,
            "operation status changed"
        );
        self.audit(AuditEntry::transitioned(&updated, from));
        self.persist_or_warn(id);
        Ok(Some(updated))
    }

    /// Count `delta` more records as processed
    pub fn append_progress(&self, id: OperationId, delta: u64) -> ExchangeResult<()> {
        let slot = self.slot(id)?;
        let mut op = Self::lock_op(&slot)?;
        if op.is_terminal() {
            return Err(ExchangeError::AlreadyTerminal(id.to_string()));
        }
        op.progress.processed = op.progress.processed.saturating_add(delta);
        Ok(())
    }

    /// Record the expected total once it is known
    pub fn set_total(&self, id: OperationId, total: u64) -> ExchangeResult<()> {
        let slot = self.slot(id)?;
        let mut op = Self::lock_op(&slot)?;
        if op.is_terminal() {
            return Err(ExchangeError::AlreadyTerminal(id.to_string()));
        }
        op.progress.total = Some(total.max(op.progress.processed));
        Ok(())
    }

    /// Flag the operation for cooperative cancellation
    pub fn request_cancel(&self, id: OperationId) -> ExchangeResult<Operation> {
        let slot = self.slot(id)?;
        let updated = {
            let mut op = Self::lock_op(&slot)?;
            if op.is_terminal() {
                return Err(ExchangeError::AlreadyTerminal(id.to_string()));
            }
            op.cancel_requested = true;
            op.clone()
        };

        info!(operation_id = %id, status = %updated.status, "cancellation requested");
        self.audit(AuditEntry::cancel_requested(&updated));
        self.persist_or_warn(id);
        Ok(updated)
    }

    pub fn is_cancel_requested(&self, id: OperationId) -> ExchangeResult<bool> {
        let slot = self.slot(id)?;
        let op = Self::lock_op(&slot)?;
        Ok(op.cancel_requested)
    }

    /// Page through an owner's operations, newest first
    pub fn list(&self, owner: &UserId, query: &ListQuery) -> ExchangeResult<OperationPage> {
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let page = query.page.max(1);

        let mut newest = 0;
        let mut matching = Vec::new();
        for op in self.snapshot()? {
            newest = newest.max(op.sequence);
            if &op.owner_id != owner || query.kind.map_or(false, |k| k != op.kind) {
                continue;
            }
            matching.push(op);
        }

        let cursor = query.cursor.unwrap_or(newest);
        matching.retain(|op| op.sequence <= cursor);
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(OperationPage {
            items,
            total,
            page,
            limit,
            cursor,
        })
    }

    /// Terminal operations that finished before `cutoff`
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> ExchangeResult<Vec<Operation>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|op| op.is_terminal() && op.finished_at.map_or(false, |t| t < cutoff))
            .collect())
    }

    /// Remove a terminal operation
    pub fn delete(&self, id: OperationId, action: AuditAction) -> ExchangeResult<Operation> {
        let removed = {
            let mut operations = self.operations.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            let slot = operations
                .get(&id)
                .cloned()
                .ok_or_else(|| ExchangeError::operation_not_found(id.to_string()))?;
            let op = Self::lock_op(&slot)?.clone();
            if !op.is_terminal() {
                return Err(ExchangeError::Validation(format!(
                    "Operation {} is still {}; cancel it first",
                    id, op.status
                )));
            }
            operations.remove(&id);
            op
        };

        info!(operation_id = %id, "operation deleted");
        self.audit(AuditEntry::operation_deleted(&removed, action));
        self.persist_or_warn(id);
        Ok(removed)
    }

    fn snapshot(&self) -> ExchangeResult<Vec<Operation>> {
        let slots: Vec<Slot> = {
            let operations = self.operations.read().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
            })?;
            operations.values().cloned().collect()
        };
        slots
            .iter()
            .map(|slot| Self::lock_op(slot).map(|op| op.clone()))
            .collect()
    }

    /// Persist after an in-memory change that has already taken effect.
    ///
    /// The change stands either way; the next successful write catches the
    /// file up.
    fn persist_or_warn(&self, id: OperationId) {
        if let Err(e) = self.persist() {
            warn!(operation_id = %id, error = %e, "failed to persist operation registry");
        }
    }

    /// Write the registry to disk, if it has a path
    fn persist(&self) -> ExchangeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|e| ExchangeError::Storage(format!("Failed to acquire persist lock: {}", e)))?;

        let mut operations = self.snapshot()?;
        operations.sort_by_key(|op| op.sequence);
        write_json_atomic(path, &OperationData { operations })
    }
}
