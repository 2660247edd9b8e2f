//! Retention sweep
//!
//! Removes artifacts past their expiry and terminal operations older than
//! the configured age, together with any artifact they still own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuditAction;
use crate::error::ExchangeResult;
use crate::models::Operation;
use crate::storage::{ArtifactStore, OperationRegistry};

/// What one sweep removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub artifacts_removed: usize,
    pub operations_removed: usize,
}

pub struct RetentionSweeper {
    registry: Arc<OperationRegistry>,
    artifacts: Arc<ArtifactStore>,
    operation_ttl: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<OperationRegistry>,
        artifacts: Arc<ArtifactStore>,
        operation_ttl: chrono::Duration,
    ) -> Self {
        Self {
            registry,
            artifacts,
            operation_ttl,
        }
    }

    /// Run one sweep as of `now`
    #[instrument(skip(self))]
    pub fn run_once(&self, now: DateTime<Utc>) -> ExchangeResult<SweepReport> {
        let mut report = SweepReport {
            artifacts_removed: self.artifacts.sweep_expired(now)?.len(),
            operations_removed: 0,
        };

        let cutoff = now - self.operation_ttl;
        for op in self.registry.finished_before(cutoff)? {
            self.expire_operation(&op, &mut report)?;
        }

        if report != SweepReport::default() {
            info!(
                artifacts = report.artifacts_removed,
                operations = report.operations_removed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Remove one old operation and its artifact. Either may already be gone
    /// if the owner deleted it while the sweep was running.
    fn expire_operation(&self, op: &Operation, report: &mut SweepReport) -> ExchangeResult<()> {
        if let Some(artifact_id) = op.result.as_ref().and_then(|r| r.artifact_id()) {
            match self.artifacts.delete(artifact_id, AuditAction::Expired) {
                Ok(_) => report.artifacts_removed += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(artifact_id = %artifact_id, error = %e, "failed to remove artifact"),
            }
        }
        match self.registry.delete(op.id, AuditAction::Expired) {
            Ok(_) => report.operations_removed += 1,
            Err(e) if e.is_not_found() => debug!(operation_id = %op.id, "operation already deleted"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Sweep every `interval` until `token` is cancelled
    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.run_once(Utc::now()) {
                            error!(error = %e, "retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DataType, ExchangeFormat, ExportFilter, ExportSummary, Operation, OperationResult, Transition,
        UserId,
    };
    use tempfile::TempDir;

    fn setup() -> (RetentionSweeper, Arc<OperationRegistry>, Arc<ArtifactStore>, TempDir) {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(OperationRegistry::in_memory());
        let artifacts = Arc::new(
            ArtifactStore::open(temp.path().join("artifacts"), None, chrono::Duration::hours(1)).unwrap(),
        );
        let sweeper = RetentionSweeper::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            chrono::Duration::days(7),
        );
        (sweeper, registry, artifacts, temp)
    }

    fn completed_export(registry: &OperationRegistry, artifacts: &ArtifactStore) -> Operation {
        let alice = UserId::from("alice");
        let op = Operation::export(alice.clone(), DataType::Goals, ExchangeFormat::Csv, ExportFilter::default());
        let id = registry.create(op).unwrap();
        registry.update_status(id, Transition::Start).unwrap();
        let artifact = artifacts.store(&alice, ExchangeFormat::Csv, b"id\n").unwrap();
        registry
            .set_result(
                id,
                OperationResult::Export(ExportSummary {
                    artifact_id: artifact.id,
                    size_bytes: artifact.size_bytes,
                    records: 0,
                    data_types: vec![DataType::Goals],
                    entity_errors: Vec::new(),
                }),
            )
            .unwrap()
    }

    #[test]
    fn test_nothing_to_sweep() {
        let (sweeper, registry, artifacts, _temp) = setup();
        completed_export(&registry, &artifacts);
        assert_eq!(sweeper.run_once(Utc::now()).unwrap(), SweepReport::default());
    }

    #[test]
    fn test_expired_artifacts_removed_operations_kept() {
        let (sweeper, registry, artifacts, _temp) = setup();
        let op = completed_export(&registry, &artifacts);

        let report = sweeper.run_once(Utc::now() + chrono::Duration::hours(2)).unwrap();
        assert_eq!(report.artifacts_removed, 1);
        assert_eq!(report.operations_removed, 0);
        assert!(registry.get(op.id).is_ok());
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_old_operations_removed_with_artifacts() {
        let (sweeper, registry, artifacts, _temp) = setup();
        let op = completed_export(&registry, &artifacts);

        let report = sweeper.run_once(Utc::now() + chrono::Duration::days(8)).unwrap();
        assert_eq!(report.operations_removed, 1);
        assert!(registry.get(op.id).unwrap_err().is_not_found());
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_in_flight_operations_survive() {
        let (sweeper, registry, _artifacts, _temp) = setup();
        let op = Operation::export(UserId::from("alice"), DataType::Goals, ExchangeFormat::Csv, ExportFilter::default());
        let id = registry.create(op).unwrap();

        let report = sweeper.run_once(Utc::now() + chrono::Duration::days(365)).unwrap();
        assert_eq!(report.operations_removed, 0);
        assert!(registry.get(id).is_ok());
    }

    #[test]
    fn test_operation_deleted_during_sweep_is_skipped() {
        let (sweeper, registry, artifacts, _temp) = setup();
        let op = completed_export(&registry, &artifacts);
        let other = completed_export(&registry, &artifacts);

        // The owner removes it after the sweep took its snapshot
        registry.delete(op.id, AuditAction::Deleted).unwrap();
        let mut report = SweepReport::default();
        sweeper.expire_operation(&op, &mut report).unwrap();
        assert_eq!(report.operations_removed, 0);

        sweeper.expire_operation(&other, &mut report).unwrap();
        assert_eq!(report.operations_removed, 1);
        assert!(registry.get(other.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops_on_cancel() {
        let (sweeper, _registry, _artifacts, _temp) = setup();
        let token = CancellationToken::new();
        let handle = Arc::new(sweeper).spawn(Duration::from_millis(5), token.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
