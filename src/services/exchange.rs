//! Exchange service
//!
//! The operations surface: submit, history, status, download, validate-only,
//! cancel, options, delete and wait. Every per-operation call is scoped to
//! the requesting user; a missing id is `NotFound` and somebody else's id is
//! `Forbidden`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::audit::{AuditAction, AuditEntry, AuditLogger};
use crate::codec;
use crate::config::{ExchangePaths, Settings};
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{Operation, OperationId, OperationKind, OperationResult, OperationStatus, UserId};
use crate::storage::{
    ArtifactDownload, ArtifactStore, ListQuery, OperationPage, OperationRegistry, RecordAccess,
    RecordStore,
};
use crate::validation::{ValidationSummary, Validator};

use super::cancellation::CancellationCoordinator;
use super::dispatcher::{ExportRequest, ImportRequest, JobDispatcher, JobRequest};
use super::options::{exchange_options, ExchangeOptions};
use super::retention::{RetentionSweeper, SweepReport};

/// Interval between status polls in [`ExchangeService::wait`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Facade over the job engine
pub struct ExchangeService {
    registry: Arc<OperationRegistry>,
    artifacts: Arc<ArtifactStore>,
    dispatcher: JobDispatcher,
    cancellation: Arc<CancellationCoordinator>,
    retention: Arc<RetentionSweeper>,
    sweep_interval: Duration,
    audit: Option<Arc<AuditLogger>>,
}

impl ExchangeService {
    /// Wire the engine from its parts
    pub fn new(
        registry: Arc<OperationRegistry>,
        artifacts: Arc<ArtifactStore>,
        records: Arc<dyn RecordAccess>,
        settings: &Settings,
    ) -> Self {
        let cancellation = Arc::new(CancellationCoordinator::new(Arc::clone(&registry)));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            records,
            Arc::clone(&cancellation),
            settings.jobs.clone(),
        );
        let retention = Arc::new(RetentionSweeper::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            settings.retention.operation_ttl(),
        ));

        Self {
            registry,
            artifacts,
            dispatcher,
            cancellation,
            retention,
            sweep_interval: settings.retention.sweep_interval(),
            audit: None,
        }
    }

    /// Expose `audit` through [`ExchangeService::audit_trail`]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Open the file-backed engine under `paths`, using the bundled record store
    pub fn open(paths: &ExchangePaths, settings: &Settings) -> ExchangeResult<Self> {
        paths.ensure_directories()?;
        let audit = Arc::new(AuditLogger::new(paths.audit_log()));

        let registry = Arc::new(OperationRegistry::open(paths.operations_file())?.with_audit(Arc::clone(&audit)));
        let artifacts = Arc::new(
            ArtifactStore::open(
                paths.artifacts_dir(),
                Some(paths.artifacts_index()),
                settings.retention.artifact_ttl(),
            )?
            .with_audit(Arc::clone(&audit)),
        );
        let records = Arc::new(RecordStore::open(paths.records_file())?);

        Ok(Self::new(registry, artifacts, records, settings).with_audit(audit))
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn submit_export(&self, owner: &UserId, request: ExportRequest) -> ExchangeResult<OperationId> {
        self.dispatcher.submit(owner, JobRequest::Export(request))
    }

    pub fn submit_import(&self, owner: &UserId, request: ImportRequest) -> ExchangeResult<OperationId> {
        self.dispatcher.submit(owner, JobRequest::Import(request))
    }

    /// The owner's operations, newest first
    pub fn history(&self, owner: &UserId, query: &ListQuery) -> ExchangeResult<OperationPage> {
        self.registry.list(owner, query)
    }

    /// One operation, if `owner` may see it
    pub fn status(&self, id: OperationId, owner: &UserId) -> ExchangeResult<Operation> {
        let op = self.registry.get(id)?;
        if !op.is_owned_by(owner) {
            return Err(ExchangeError::operation_forbidden(id.to_string()));
        }
        Ok(op)
    }

    /// Stream the artifact of a completed export
    #[instrument(skip(self), fields(operation_id = %id, owner_id = %owner))]
    pub fn download(&self, id: OperationId, owner: &UserId) -> ExchangeResult<ArtifactDownload> {
        let op = self.status(id, owner)?;
        let artifact_id = match (&op.kind, &op.status, &op.result) {
            (OperationKind::Export, OperationStatus::Completed, Some(result)) => result.artifact_id(),
            _ => None,
        }
        .ok_or_else(|| ExchangeError::artifact_not_found(id.to_string()))?;

        self.artifacts.open_download(artifact_id, owner)
    }

    /// Decode and validate an import payload without committing anything
    pub fn validate_only(&self, request: ImportRequest) -> ExchangeResult<ValidationSummary> {
        let options = request.validate()?;
        let stream = codec::decoder_for(request.format, request.payload, request.data_type)?;
        let summary = Validator::new(options).validate_stream(request.data_type, stream);
        info!(
            data_type = %request.data_type,
            total = summary.total,
            rejected = summary.rejected(),
            "validated import payload"
        );
        Ok(summary)
    }

    /// Request cooperative cancellation of one of the owner's operations of `kind`
    pub fn cancel(&self, kind: OperationKind, id: OperationId, owner: &UserId) -> ExchangeResult<Operation> {
        let op = self.status(id, owner)?;
        if op.kind != kind {
            return Err(ExchangeError::operation_not_found(id.to_string()));
        }
        self.cancellation.request_cancel(id, owner)
    }

    pub fn options(&self) -> ExchangeOptions {
        exchange_options()
    }

    /// Remove a finished operation and its artifact
    #[instrument(skip(self), fields(operation_id = %id, owner_id = %owner))]
    pub fn delete_operation(&self, id: OperationId, owner: &UserId) -> ExchangeResult<Operation> {
        let op = self.status(id, owner)?;
        if !op.is_terminal() {
            return Err(ExchangeError::Validation(format!(
                "Operation {} is still {}; cancel it first",
                id, op.status
            )));
        }

        if let Some(artifact_id) = op.result.as_ref().and_then(OperationResult::artifact_id) {
            match self.artifacts.delete(artifact_id, AuditAction::Deleted) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        self.registry.delete(id, AuditAction::Deleted)
    }

    /// Poll until the operation is terminal or `timeout` passes.
    ///
    /// Returns the latest snapshot either way; check `is_terminal`.
    pub async fn wait(
        &self,
        id: OperationId,
        owner: &UserId,
        timeout: Option<Duration>,
    ) -> ExchangeResult<Operation> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let op = self.status(id, owner)?;
            if op.is_terminal() {
                return Ok(op);
            }
            if deadline.map_or(false, |d| tokio::time::Instant::now() >= d) {
                return Ok(op);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Latest audit entries concerning `owner`; empty when no audit log is attached
    pub fn audit_trail(&self, owner: &UserId, count: usize) -> ExchangeResult<Vec<AuditEntry>> {
        match &self.audit {
            Some(audit) => audit.read_recent_for(owner.as_str(), count),
            None => Ok(Vec::new()),
        }
    }

    /// Run one retention sweep now
    pub fn sweep(&self, now: DateTime<Utc>) -> ExchangeResult<SweepReport> {
        self.retention.run_once(now)
    }

    /// Start periodic retention sweeps until `token` is cancelled
    pub fn spawn_retention(&self, token: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.retention).spawn(self.sweep_interval, token)
    }
}
