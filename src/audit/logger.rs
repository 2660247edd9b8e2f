//! Audit logger for the append-only audit log
//!
//! Each entry is written as a single JSON line and flushed immediately.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use crate::error::{ExchangeError, ExchangeResult};
use crate::storage::file_io::ensure_parent;

use super::entry::AuditEntry;

/// Handles writing audit entries to the audit log file
///
/// The log file uses a line-delimited JSON format (JSONL) where each line
/// is a complete JSON object representing one audit entry.
pub struct AuditLogger {
    log_path: PathBuf,
    /// Serializes appends from concurrent workers
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new AuditLogger that writes to the specified path
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one entry
    pub fn log(&self, entry: &AuditEntry) -> ExchangeResult<()> {
        self.log_batch(std::slice::from_ref(entry))
    }

    /// Append several entries with a single flush
    pub fn log_batch(&self, entries: &[AuditEntry]) -> ExchangeResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| ExchangeError::Storage(format!("Failed to acquire audit lock: {}", e)))?;

        ensure_parent(&self.log_path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| ExchangeError::Io(format!("Failed to open audit log: {}", e)))?;

        let mut buffer = String::new();
        for entry in entries {
            let json = serde_json::to_string(entry)
                .map_err(|e| ExchangeError::Json(format!("Failed to serialize audit entry: {}", e)))?;
            buffer.push_str(&json);
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .map_err(|e| ExchangeError::Io(format!("Failed to write audit entry: {}", e)))?;
        file.flush()
            .map_err(|e| ExchangeError::Io(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Append an entry, reporting failure through the log instead of the caller
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.log(&entry) {
            warn!(
                error = %e,
                action = %entry.action,
                entity_id = %entry.entity_id,
                "failed to write audit entry"
            );
        }
    }

    /// Read all audit entries, oldest first
    pub fn read_all(&self) -> ExchangeResult<Vec<AuditEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| ExchangeError::Io(format!("Failed to open audit log: {}", e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                ExchangeError::Io(format!("Failed to read audit log line {}: {}", line_num + 1, e))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
                ExchangeError::Json(format!(
                    "Failed to parse audit entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            entries.push(entry);
        }

        Ok(entries)
    }

    /// The most recent N entries about one owner's operations and artifacts
    pub fn read_recent_for(&self, owner_id: &str, count: usize) -> ExchangeResult<Vec<AuditEntry>> {
        let mut owned: Vec<AuditEntry> = self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.owner_id == owner_id)
            .collect();
        let start = owned.len().saturating_sub(count);
        Ok(owned.split_off(start))
    }

    /// Get the path to the audit log file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{AuditAction, EntityType};
    use crate::models::{DataType, ExchangeFormat, Operation, UserId};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_logger() -> (AuditLogger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("audit.log");
        let logger = AuditLogger::new(log_path);
        (logger, temp_dir)
    }

    fn create_test_entry() -> AuditEntry {
        let op = Operation::import(
            UserId::from("alice"),
            DataType::Goals,
            ExchangeFormat::Csv,
            serde_json::Value::Null,
        );
        AuditEntry::submitted(&op)
    }

    #[test]
    fn test_log_and_read() {
        let (logger, _temp) = create_test_logger();
        logger.log(&create_test_entry()).unwrap();

        let entries = logger.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Submitted);
        assert_eq!(entries[0].entity_type, EntityType::Operation);
    }

    #[test]
    fn test_log_batch_and_read_recent() {
        let (logger, _temp) = create_test_logger();
        let entries: Vec<AuditEntry> = (0..10).map(|_| create_test_entry()).collect();
        logger.log_batch(&entries).unwrap();

        let recent = logger.read_recent_for("alice", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].entity_id, entries[9].entity_id);
    }

    #[test]
    fn test_read_recent_for_owner() {
        let (logger, _temp) = create_test_logger();
        let bob_op = Operation::import(UserId::from("bob"), DataType::Goals, ExchangeFormat::Csv, serde_json::Value::Null);
        logger.log(&create_test_entry()).unwrap();
        logger.log(&AuditEntry::submitted(&bob_op)).unwrap();
        logger.log(&create_test_entry()).unwrap();

        let bob = logger.read_recent_for("bob", 10).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].entity_id, bob_op.id.to_string());
        assert_eq!(logger.read_recent_for("alice", 1).unwrap().len(), 1);
        assert!(logger.read_recent_for("carol", 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_log() {
        let (logger, _temp) = create_test_logger();
        assert!(logger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appends_stay_line_delimited() {
        let (logger, _temp) = create_test_logger();
        let logger = Arc::new(logger);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        logger.record(create_test_entry());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(logger.read_all().unwrap().len(), 200);
    }

    #[test]
    fn test_record_swallows_failures() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the file should be makes every append fail
        let logger = AuditLogger::new(temp_dir.path().to_path_buf());
        logger.record(create_test_entry());
        assert!(logger.read_all().is_err());
    }

    #[test]
    fn test_survives_restart() {
        let (logger, temp) = create_test_logger();
        logger.log(&create_test_entry()).unwrap();

        let reopened = AuditLogger::new(temp.path().join("audit.log"));
        assert_eq!(reopened.read_all().unwrap().len(), 1);
        assert_eq!(reopened.path(), logger.path());
    }
}
