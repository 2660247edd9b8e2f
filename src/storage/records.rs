//! Record-access layer
//!
//! The job engine reads and writes user records only through the
//! [`RecordAccess`] trait. [`RecordStore`] is the bundled implementation: a
//! JSON file holding every owner's records, grouped by owner and kept in
//! insertion order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{DataType, ExportFilter, ImportOptions, Record, UserId};

use super::file_io::{read_json, write_json_atomic};

/// A validated record on its way into storage
#[derive(Debug, Clone, PartialEq)]
pub struct CommitCandidate {
    /// Position in the import input
    pub index: usize,
    pub record: Record,
    /// Whether the input carried the id, as opposed to one being generated
    pub explicit_id: bool,
}

/// What happened to one commit candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    Updated,
    Skipped,
    Rejected(String),
}

/// Source and sink of user records
#[async_trait]
pub trait RecordAccess: Send + Sync {
    /// Number of records an export with this filter will read
    async fn count(&self, owner: &UserId, data_type: DataType, filter: &ExportFilter) -> ExchangeResult<u64>;

    /// Up to `limit` matching records starting at `offset`, in a stable order
    async fn fetch_batch(
        &self,
        owner: &UserId,
        data_type: DataType,
        filter: &ExportFilter,
        offset: usize,
        limit: usize,
    ) -> ExchangeResult<Vec<Record>>;

    /// Write a batch; returns one outcome per candidate, in order
    async fn commit_batch(
        &self,
        owner: &UserId,
        batch: Vec<CommitCandidate>,
        options: &ImportOptions,
    ) -> ExchangeResult<Vec<CommitOutcome>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordData {
    #[serde(default)]
    owners: HashMap<UserId, Vec<Record>>,
}

/// File-backed record store
pub struct RecordStore {
    path: Option<PathBuf>,
    data: RwLock<RecordData>,
    save_lock: Mutex<()>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(RecordData::default()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn open(path: PathBuf) -> ExchangeResult<Self> {
        let data: RecordData = read_json(&path)?;
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
            save_lock: Mutex::new(()),
        })
    }

    /// Add records directly, bypassing import rules
    pub fn insert_all(&self, owner: &UserId, records: impl IntoIterator<Item = Record>) -> ExchangeResult<()> {
        {
            let mut data = self.data.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            data.owners.entry(owner.clone()).or_default().extend(records);
        }
        self.save()
    }

    /// All records of one type for an owner
    pub fn records(&self, owner: &UserId, data_type: DataType) -> ExchangeResult<Vec<Record>> {
        let data = self.data.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(data
            .owners
            .get(owner)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.data_type() == data_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save(&self) -> ExchangeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self
            .save_lock
            .lock()
            .map_err(|e| ExchangeError::Storage(format!("Failed to acquire save lock: {}", e)))?;
        let data = self.data.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        write_json_atomic(path, &*data)
    }

    fn matching<'a>(
        records: &'a [Record],
        data_type: DataType,
        filter: &'a ExportFilter,
    ) -> impl Iterator<Item = &'a Record> + 'a {
        records
            .iter()
            .filter(move |r| r.data_type() == data_type && filter.accepts(r.reference_date()))
    }
}

/// Decide what a candidate does to the owner's records, applying it in place
fn apply_candidate(records: &mut Vec<Record>, candidate: CommitCandidate, options: &ImportOptions) -> CommitOutcome {
    let CommitCandidate {
        record,
        explicit_id,
        ..
    } = candidate;
    let key = record.key();

    if let Some(existing) = records
        .iter_mut()
        .find(|r| r.data_type() == record.data_type() && r.key() == key)
    {
        if !explicit_id {
            return CommitOutcome::Rejected(format!("generated id {} collides with an existing record", key));
        }
        *existing = record;
        return CommitOutcome::Updated;
    }

    match &record {
        Record::Transaction(txn) if options.skip_duplicates && !explicit_id => {
            let fingerprint = txn.fingerprint();
            let duplicate = records.iter().any(|r| match r {
                Record::Transaction(other) => other.fingerprint() == fingerprint,
                _ => false,
            });
            if duplicate {
                return CommitOutcome::Skipped;
            }
        }
        Record::Category(category) => {
            let name = category.name.trim().to_lowercase();
            let taken = records.iter().any(|r| match r {
                Record::Category(other) => other.name.trim().to_lowercase() == name,
                _ => false,
            });
            if taken {
                return CommitOutcome::Rejected(format!("category '{}' already exists", category.name));
            }
        }
        _ => {}
    }

    records.push(record);
    CommitOutcome::Created
}

#[async_trait]
impl RecordAccess for RecordStore {
    async fn count(&self, owner: &UserId, data_type: DataType, filter: &ExportFilter) -> ExchangeResult<u64> {
        let data = self.data.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(data
            .owners
            .get(owner)
            .map(|records| Self::matching(records, data_type, filter).count() as u64)
            .unwrap_or(0))
    }

    async fn fetch_batch(
        &self,
        owner: &UserId,
        data_type: DataType,
        filter: &ExportFilter,
        offset: usize,
        limit: usize,
    ) -> ExchangeResult<Vec<Record>> {
        let data = self.data.read().map_err(|e| {
            ExchangeError::Storage(format!("Failed to acquire read lock: {}", e))
        })?;
        Ok(data
            .owners
            .get(owner)
            .map(|records| {
                Self::matching(records, data_type, filter)
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_batch(
        &self,
        owner: &UserId,
        batch: Vec<CommitCandidate>,
        options: &ImportOptions,
    ) -> ExchangeResult<Vec<CommitOutcome>> {
        let size = batch.len();
        let outcomes = {
            let mut data = self.data.write().map_err(|e| {
                ExchangeError::Storage(format!("Failed to acquire write lock: {}", e))
            })?;
            let records = data.owners.entry(owner.clone()).or_default();
            batch
                .into_iter()
                .map(|candidate| apply_candidate(records, candidate, options))
                .collect::<Vec<_>>()
        };
        // The batch is committed in memory; the next save catches the file up
        if let Err(e) = self.save() {
            warn!(owner_id = %owner, error = %e, "failed to save record store");
        }
        debug!(owner_id = %owner, size, "committed record batch");
        Ok(outcomes)
    }
}
