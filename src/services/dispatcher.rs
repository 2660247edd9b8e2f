//! Job dispatcher and worker
//!
//! `submit` checks the request shape, creates the operation row (subject to
//! the per-user concurrency limit) and spawns one worker task for it. The
//! caller gets the id back as soon as the row exists.
//!
//! A worker drives its operation from `pending` to a terminal status. It
//! processes records in batches and checks for cancellation between batches.
//! Every exit path ends in exactly one terminal transition; a supervisor task
//! marks the operation failed if the worker itself panics.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::audit::AuditAction;
use crate::codec::{self, RecordEncoder};
use crate::config::JobSettings;
use crate::error::{ErrorCode, ExchangeError, ExchangeResult};
use crate::models::{
    DataType, DateRange, EntityFailure, ExchangeFormat, ExportFilter, ExportSummary, ImportOptions,
    ImportReport, Operation, OperationId, OperationKind, OperationResult, RecordError, Transition,
    UserId,
};
use crate::storage::{
    ArtifactStore, CommitCandidate, CommitOutcome, OperationRegistry, PendingArtifact, RecordAccess,
};
use crate::validation::{has_explicit_id, Validator};

use super::cancellation::CancellationCoordinator;

/// Check that kind, data type and format fit together
pub fn validate_shape(kind: OperationKind, data_type: DataType, format: ExchangeFormat) -> ExchangeResult<()> {
    if !format.supports(kind) {
        return Err(ExchangeError::Validation(format!(
            "{} is not supported for {}",
            format, kind
        )));
    }
    if kind == OperationKind::Import && !data_type.is_concrete() {
        return Err(ExchangeError::Validation(format!(
            "Import requires a single data type, not '{}'",
            data_type
        )));
    }
    Ok(())
}

/// Export submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub data_type: DataType,
    pub format: ExchangeFormat,
    pub filter: ExportFilter,
}

impl ExportRequest {
    pub fn new(data_type: DataType, format: ExchangeFormat) -> Self {
        Self {
            data_type,
            format,
            filter: ExportFilter::default(),
        }
    }

    pub fn date_range(mut self, range: DateRange) -> Self {
        self.filter.date_range = Some(range);
        self
    }

    pub fn include_attachments(mut self, include: bool) -> Self {
        self.filter.include_attachments = include;
        self
    }

    pub fn validate(&self) -> ExchangeResult<()> {
        validate_shape(OperationKind::Export, self.data_type, self.format)?;
        if let Some(range) = &self.filter.date_range {
            if !range.is_valid() {
                return Err(ExchangeError::Validation(
                    "Date range start must not be after its end".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Import submission: target type, source format, options and the file bytes
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRequest {
    pub data_type: DataType,
    pub format: ExchangeFormat,
    pub options: Value,
    pub payload: Vec<u8>,
}

impl ImportRequest {
    pub fn new(data_type: DataType, format: ExchangeFormat, payload: Vec<u8>) -> Self {
        Self {
            data_type,
            format,
            options: Value::Null,
            payload,
        }
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Check the request and parse its options
    pub fn validate(&self) -> ExchangeResult<ImportOptions> {
        validate_shape(OperationKind::Import, self.data_type, self.format)?;
        if self.payload.is_empty() {
            return Err(ExchangeError::Validation("Import payload is empty".to_string()));
        }
        ImportOptions::from_value(&self.options)
    }
}

/// Either kind of submission
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Export(ExportRequest),
    Import(ImportRequest),
}

impl JobRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Export(_) => OperationKind::Export,
            Self::Import(_) => OperationKind::Import,
        }
    }
}

/// Accepts job requests and runs one worker per operation
pub struct JobDispatcher {
    worker: Arc<Worker>,
    registry: Arc<OperationRegistry>,
    jobs: JobSettings,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        artifacts: Arc<ArtifactStore>,
        records: Arc<dyn RecordAccess>,
        cancellation: Arc<CancellationCoordinator>,
        jobs: JobSettings,
    ) -> Self {
        let worker = Worker {
            registry: Arc::clone(&registry),
            artifacts,
            records,
            cancellation,
            batch_size: jobs.effective_batch_size(),
        };
        Self {
            worker: Arc::new(worker),
            registry,
            jobs,
        }
    }

    /// Create an operation for `request` and start working on it.
    ///
    /// Must be called from within a Tokio runtime. Nothing is created when
    /// the request is malformed or the owner is at the concurrency limit.
    pub fn submit(&self, owner: &UserId, request: JobRequest) -> ExchangeResult<OperationId> {
        let runtime = Handle::try_current()
            .map_err(|_| ExchangeError::Internal("job dispatch requires a Tokio runtime".to_string()))?;

        let (op, job) = match request {
            JobRequest::Export(request) => {
                request.validate()?;
                let op = Operation::export(owner.clone(), request.data_type, request.format, request.filter);
                (op, Job::Export)
            }
            JobRequest::Import(request) => {
                request.validate()?;
                let op = Operation::import(owner.clone(), request.data_type, request.format, request.options);
                (op, Job::Import(request.payload))
            }
        };

        let limit = self.jobs.limit_for(op.kind);
        let id = self.registry.create_if_below_limit(op, limit)?;

        let worker = Arc::clone(&self.worker);
        runtime.spawn(worker.supervise(id, job));
        Ok(id)
    }
}

enum Job {
    Export,
    Import(Vec<u8>),
}

/// Operation-level failure, with whatever import progress was made
struct Failure {
    error: ExchangeError,
    report: Option<ImportReport>,
}

impl Failure {
    fn with_report(error: ExchangeError, report: &ImportReport) -> Self {
        Self {
            error,
            report: Some(report.clone()),
        }
    }
}

impl From<ExchangeError> for Failure {
    fn from(error: ExchangeError) -> Self {
        Self { error, report: None }
    }
}

enum Section {
    Written(u64),
    Cancelled,
}

struct Worker {
    registry: Arc<OperationRegistry>,
    artifacts: Arc<ArtifactStore>,
    records: Arc<dyn RecordAccess>,
    cancellation: Arc<CancellationCoordinator>,
    batch_size: usize,
}

impl Worker {
    /// Run the job in its own task and make sure a panic still ends the
    /// operation in a terminal status.
    async fn supervise(self: Arc<Self>, id: OperationId, job: Job) {
        let worker = Arc::clone(&self);
        let task = tokio::spawn(async move { worker.run(id, job).await });

        if let Err(e) = task.await {
            error!(operation_id = %id, error = %e, "worker aborted");
            let error = ExchangeError::Internal(format!("worker aborted: {}", e)).redacted();
            if let Err(e) = self.registry.set_result(id, OperationResult::failed(error)) {
                warn!(operation_id = %id, error = %e, "could not mark aborted operation as failed");
            }
        }
    }

    async fn run(&self, id: OperationId, job: Job) {
        let op = match self.registry.get(id) {
            Ok(op) => op,
            Err(e) => {
                error!(operation_id = %id, error = %e, "operation vanished before it started");
                return;
            }
        };

        let span = info_span!(
            "operation",
            operation_id = %id,
            owner_id = %op.owner_id,
            kind = %op.kind,
            data_type = %op.data_type,
            format = %op.format,
        );
        self.execute(op, job).instrument(span).await
    }

    async fn execute(&self, op: Operation, job: Job) {
        match self.cancellation.should_stop(op.id) {
            Ok(true) => {
                info!("cancelled before start");
                self.finish(op.id, OperationResult::Cancelled { processed: 0, report: None });
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.fail(op.id, Failure::from(e));
                return;
            }
        }

        let op = match self.registry.update_status(op.id, Transition::Start) {
            Ok(op) => op,
            Err(e) => {
                error!(error = %e, "could not start operation");
                self.fail(op.id, Failure::from(e));
                return;
            }
        };

        let outcome = match job {
            Job::Export => self.export(&op).await,
            Job::Import(payload) => self.import(&op, payload).await,
        };

        match outcome {
            Ok(result @ (OperationResult::Export(_) | OperationResult::Import(_))) => self.complete(op.id, result),
            Ok(result) => self.finish(op.id, result),
            Err(failure) => self.fail(op.id, failure),
        }
    }

    /// Finish successfully unless a cancel request arrived in the meantime
    fn complete(&self, id: OperationId, result: OperationResult) {
        match self.registry.finish_unless_cancelled(id, result.clone()) {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("cancel requested after the last batch; discarding result");
                if let Some(artifact_id) = result.artifact_id() {
                    if let Err(e) = self.artifacts.delete(artifact_id, AuditAction::Deleted) {
                        warn!(artifact_id = %artifact_id, error = %e, "failed to remove artifact of cancelled export");
                    }
                }
                let report = match result {
                    OperationResult::Import(report) => Some(report),
                    _ => None,
                };
                let processed = self.processed(id);
                self.finish(id, OperationResult::Cancelled { processed, report });
            }
            Err(e) => self.fail(id, Failure::from(e)),
        }
    }

    fn fail(&self, id: OperationId, failure: Failure) {
        let Failure { error, report } = failure;
        if error.code() == ErrorCode::Internal {
            error!(error = %error, "operation failed");
        } else {
            warn!(error = %error, "operation failed");
        }
        self.finish(
            id,
            OperationResult::Failed {
                error: error.redacted(),
                report,
            },
        );
    }

    fn finish(&self, id: OperationId, result: OperationResult) {
        if let Err(e) = self.registry.set_result(id, result) {
            error!(operation_id = %id, error = %e, "failed to record operation result");
        }
    }

    fn processed(&self, id: OperationId) -> u64 {
        self.registry
            .get(id)
            .map(|op| op.progress.processed)
            .unwrap_or_default()
    }

    async fn export(&self, op: &Operation) -> Result<OperationResult, Failure> {
        let filter = op.export_filter().cloned().unwrap_or_default();
        let data_types = op.data_type.expand();

        let mut total = 0;
        for data_type in &data_types {
            match self.records.count(&op.owner_id, *data_type, &filter).await {
                Ok(count) => total += count,
                Err(e) => debug!(data_type = %data_type, error = %e, "record count unavailable"),
            }
        }
        self.registry.set_total(op.id, total)?;

        let pending = self.artifacts.begin(&op.owner_id, op.format)?;
        let mut encoder = codec::encoder_for(op.format, pending, &data_types)?;

        let mut written = 0;
        let mut entity_errors = Vec::new();
        let mut first_error = None;
        for &data_type in &data_types {
            match self.export_section(op, data_type, &filter, encoder.as_mut()).await {
                Ok(Section::Written(count)) => written += count,
                Ok(Section::Cancelled) => {
                    // Dropping the encoder drops the pending file with it
                    drop(encoder);
                    info!(processed = self.processed(op.id), "export cancelled");
                    return Ok(OperationResult::Cancelled {
                        processed: self.processed(op.id),
                        report: None,
                    });
                }
                Err(e) if data_types.len() > 1 => {
                    warn!(data_type = %data_type, error = %e, "section failed; continuing with the rest");
                    entity_errors.push(EntityFailure {
                        data_type,
                        error: e.redacted(),
                    });
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if entity_errors.len() == data_types.len() {
            if let Some(error) = first_error {
                return Err(error.into());
            }
        }

        if self.cancellation.should_stop(op.id)? {
            drop(encoder);
            return Ok(OperationResult::Cancelled {
                processed: self.processed(op.id),
                report: None,
            });
        }

        let pending = encoder.finish()?;
        let artifact = self.artifacts.commit(pending)?;
        info!(
            artifact_id = %artifact.id,
            records = written,
            size_bytes = artifact.size_bytes,
            "export written"
        );

        Ok(OperationResult::Export(ExportSummary {
            artifact_id: artifact.id,
            size_bytes: artifact.size_bytes,
            records: written,
            data_types,
            entity_errors,
        }))
    }

    async fn export_section(
        &self,
        op: &Operation,
        data_type: DataType,
        filter: &ExportFilter,
        encoder: &mut dyn RecordEncoder<PendingArtifact>,
    ) -> ExchangeResult<Section> {
        encoder.begin_section(data_type)?;

        let mut offset = 0;
        let mut written = 0;
        loop {
            if self.cancellation.should_stop(op.id)? {
                return Ok(Section::Cancelled);
            }

            let batch = self
                .records
                .fetch_batch(&op.owner_id, data_type, filter, offset, self.batch_size)
                .await?;
            let count = batch.len();
            if count == 0 {
                break;
            }

            for mut record in batch {
                if !filter.include_attachments {
                    record.strip_attachments();
                }
                encoder.write_record(&record)?;
            }

            offset += count;
            written += count as u64;
            self.registry.append_progress(op.id, count as u64)?;
            debug!(data_type = %data_type, batch = count, section_total = written, "export batch written");

            if count < self.batch_size {
                break;
            }
        }
        Ok(Section::Written(written))
    }

    async fn import(&self, op: &Operation, payload: Vec<u8>) -> Result<OperationResult, Failure> {
        let options = match op.import_options() {
            Some(options) => options?,
            None => {
                return Err(ExchangeError::Internal("import operation without options".to_string()).into())
            }
        };
        let validator = Validator::new(options);
        let stream = codec::decoder_for(op.format, payload, op.data_type)?;

        let mut report = ImportReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut in_batch = 0usize;
        let mut seen = 0u64;

        for item in stream {
            seen += 1;
            in_batch += 1;

            let candidate = item.and_then(|raw| {
                let explicit_id = has_explicit_id(&raw);
                validator
                    .check(op.data_type, &raw)
                    .map(|record| CommitCandidate {
                        index: raw.index,
                        record,
                        explicit_id,
                    })
            });
            match candidate {
                Ok(candidate) => batch.push(candidate),
                Err(record_error) => report.errors.push(record_error),
            }

            if in_batch < self.batch_size {
                continue;
            }

            self.commit_batch(op, std::mem::take(&mut batch), validator.options(), &mut report)
                .await
                .map_err(|e| Failure::with_report(e, &report))?;
            self.registry
                .append_progress(op.id, in_batch as u64)
                .map_err(|e| Failure::with_report(e, &report))?;
            debug!(processed = seen, created = report.created, "import batch committed");
            in_batch = 0;

            if self
                .cancellation
                .should_stop(op.id)
                .map_err(|e| Failure::with_report(e, &report))?
            {
                report.errors.sort_by_key(|e| e.index);
                info!(processed = seen, committed = report.committed(), "import cancelled");
                return Ok(OperationResult::Cancelled {
                    processed: seen,
                    report: Some(report),
                });
            }
        }

        self.commit_batch(op, batch, validator.options(), &mut report)
            .await
            .map_err(|e| Failure::with_report(e, &report))?;
        if in_batch > 0 {
            self.registry
                .append_progress(op.id, in_batch as u64)
                .map_err(|e| Failure::with_report(e, &report))?;
        }
        self.registry
            .set_total(op.id, seen)
            .map_err(|e| Failure::with_report(e, &report))?;

        report.errors.sort_by_key(|e| e.index);
        if report.rejected() > 0 {
            warn!(
                rejected = report.rejected(),
                committed = report.committed(),
                "import finished with rejected records"
            );
        }
        Ok(OperationResult::Import(report))
    }

    async fn commit_batch(
        &self,
        op: &Operation,
        batch: Vec<CommitCandidate>,
        options: &ImportOptions,
        report: &mut ImportReport,
    ) -> ExchangeResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let indices: Vec<usize> = batch.iter().map(|c| c.index).collect();
        let outcomes = self.records.commit_batch(&op.owner_id, batch, options).await?;
        if outcomes.len() != indices.len() {
            return Err(ExchangeError::Internal(format!(
                "record store returned {} outcomes for {} records",
                outcomes.len(),
                indices.len()
            )));
        }

        for (index, outcome) in indices.into_iter().zip(outcomes) {
            match outcome {
                CommitOutcome::Created => report.created += 1,
                CommitOutcome::Updated => report.updated += 1,
                CommitOutcome::Skipped => report.skipped += 1,
                CommitOutcome::Rejected(reason) => report.errors.push(RecordError::new(index, reason)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, OperationStatus, Record, TransactionRecord, TransactionType};
    use crate::storage::RecordStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        dispatcher: JobDispatcher,
        registry: Arc<OperationRegistry>,
        artifacts: Arc<ArtifactStore>,
        _temp: TempDir,
    }

    fn harness(records: Arc<dyn RecordAccess>, batch_size: usize) -> Harness {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(OperationRegistry::in_memory());
        let artifacts = Arc::new(
            ArtifactStore::open(temp.path().join("artifacts"), None, chrono::Duration::hours(1)).unwrap(),
        );
        let cancellation = Arc::new(CancellationCoordinator::new(Arc::clone(&registry)));
        let jobs = JobSettings {
            batch_size,
            ..JobSettings::default()
        };
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            records,
            cancellation,
            jobs,
        );
        Harness {
            dispatcher,
            registry,
            artifacts,
            _temp: temp,
        }
    }

    async fn wait_terminal(registry: &OperationRegistry, id: OperationId) -> Operation {
        for _ in 0..500 {
            let op = registry.get(id).unwrap();
            if op.is_terminal() {
                return op;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operation {} did not finish", id);
    }

    fn seeded_store(owner: &UserId, count: usize) -> Arc<RecordStore> {
        let store = RecordStore::in_memory();
        let records = (0..count).map(|i| {
            Record::Transaction(TransactionRecord::new(
                format!("Purchase {}", i),
                Money::from_cents(100 + i as i64),
                TransactionType::Expense,
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            ))
        });
        store.insert_all(owner, records).unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_shape_rules() {
        assert!(validate_shape(OperationKind::Import, DataType::Goals, ExchangeFormat::Pdf)
            .unwrap_err()
            .is_validation());
        assert!(validate_shape(OperationKind::Import, DataType::All, ExchangeFormat::Csv)
            .unwrap_err()
            .is_validation());
        assert!(validate_shape(OperationKind::Export, DataType::All, ExchangeFormat::Pdf).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_request_creates_nothing() {
        let alice = UserId::from("alice");
        let h = harness(seeded_store(&alice, 0), 10);

        let bad_range = ExportRequest::new(DataType::Transactions, ExchangeFormat::Csv).date_range(
            DateRange::new(NaiveDate::from_ymd_opt(2025, 2, 1), NaiveDate::from_ymd_opt(2025, 1, 1)),
        );
        let err = h.dispatcher.submit(&alice, JobRequest::Export(bad_range)).unwrap_err();
        assert!(err.is_validation());

        let bad_options = ImportRequest::new(DataType::Goals, ExchangeFormat::Json, b"[]".to_vec())
            .options(serde_json::json!(["not", "an", "object"]));
        let err = h.dispatcher.submit(&alice, JobRequest::Import(bad_options)).unwrap_err();
        assert!(err.is_validation());

        let empty = ImportRequest::new(DataType::Goals, ExchangeFormat::Json, Vec::new());
        assert!(h.dispatcher.submit(&alice, JobRequest::Import(empty)).is_err());

        let page = h
            .registry
            .list(&alice, &crate::storage::ListQuery::new(1, 10))
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_submit_outside_runtime_fails_cleanly() {
        let alice = UserId::from("alice");
        let h = harness(seeded_store(&alice, 0), 10);
        let request = ExportRequest::new(DataType::Transactions, ExchangeFormat::Csv);
        let err = h.dispatcher.submit(&alice, JobRequest::Export(request)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_job_finishes_when_saves_start_failing() {
        let alice = UserId::from("alice");
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        let registry = Arc::new(OperationRegistry::open(data_dir.join("operations.json")).unwrap());
        let artifacts = Arc::new(
            ArtifactStore::open(
                temp.path().join("artifacts"),
                Some(data_dir.join("artifacts.json")),
                chrono::Duration::hours(1),
            )
            .unwrap(),
        );
        let cancellation = Arc::new(CancellationCoordinator::new(Arc::clone(&registry)));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            seeded_store(&alice, 5),
            cancellation,
            JobSettings::default(),
        );

        let request = ExportRequest::new(DataType::Transactions, ExchangeFormat::Csv);
        let id = dispatcher.submit(&alice, JobRequest::Export(request)).unwrap();

        // The worker has not been polled yet on this runtime
        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, "not a directory").unwrap();

        let op = wait_terminal(&registry, id).await;
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(artifacts.is_empty());
        assert_eq!(std::fs::read_dir(artifacts.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_export_runs_to_completion() {
        let alice = UserId::from("alice");
        let h = harness(seeded_store(&alice, 25), 10);

        let request = ExportRequest::new(DataType::Transactions, ExchangeFormat::Csv);
        let id = h.dispatcher.submit(&alice, JobRequest::Export(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress.processed, 25);
        assert_eq!(op.progress.total, Some(25));
        let Some(OperationResult::Export(summary)) = op.result else {
            panic!("expected export summary");
        };
        assert_eq!(summary.records, 25);
        assert!(h.artifacts.open_download(summary.artifact_id, &alice).is_ok());
    }

    #[tokio::test]
    async fn test_import_reports_rejections_and_completes() {
        let alice = UserId::from("alice");
        let store = seeded_store(&alice, 0);
        let h = harness(Arc::clone(&store) as Arc<dyn RecordAccess>, 2);

        let csv = "description,amount,type,date\n\
                   Coffee,3.50,expense,2025-01-02\n\
                   ,1.00,expense,2025-01-02\n\
                   Salary,2500,income,2025-01-01\n\
                   Bus,abc,expense,2025-01-03\n\
                   Lunch,12,expense,2025-01-04\n";
        let request = ImportRequest::new(DataType::Transactions, ExchangeFormat::Csv, csv.as_bytes().to_vec());
        let id = h.dispatcher.submit(&alice, JobRequest::Import(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress.processed, 5);
        assert_eq!(op.progress.total, Some(5));
        let Some(OperationResult::Import(report)) = op.result else {
            panic!("expected import report");
        };
        assert_eq!(report.created, 3);
        let indices: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(store.records(&alice, DataType::Transactions).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_structural_failure_commits_nothing() {
        let alice = UserId::from("alice");
        let store = seeded_store(&alice, 0);
        let h = harness(Arc::clone(&store) as Arc<dyn RecordAccess>, 10);

        let request = ImportRequest::new(
            DataType::Transactions,
            ExchangeFormat::Excel,
            b"PK\x03\x04 definitely not a workbook".to_vec(),
        );
        let id = h.dispatcher.submit(&alice, JobRequest::Import(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Failed);
        match op.result {
            Some(OperationResult::Failed { error, report }) => {
                assert_eq!(error.code, ErrorCode::StructuralDecode);
                assert!(report.is_none());
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(store.records(&alice, DataType::Transactions).unwrap().is_empty());
    }

    /// Fails every read of one data type
    struct FlakyRecords {
        inner: RecordStore,
        broken: DataType,
    }

    #[async_trait]
    impl RecordAccess for FlakyRecords {
        async fn count(&self, owner: &UserId, data_type: DataType, filter: &ExportFilter) -> ExchangeResult<u64> {
            self.inner.count(owner, data_type, filter).await
        }

        async fn fetch_batch(
            &self,
            owner: &UserId,
            data_type: DataType,
            filter: &ExportFilter,
            offset: usize,
            limit: usize,
        ) -> ExchangeResult<Vec<Record>> {
            if data_type == self.broken {
                return Err(ExchangeError::Storage("disk on fire".to_string()));
            }
            self.inner.fetch_batch(owner, data_type, filter, offset, limit).await
        }

        async fn commit_batch(
            &self,
            owner: &UserId,
            batch: Vec<CommitCandidate>,
            options: &ImportOptions,
        ) -> ExchangeResult<Vec<CommitOutcome>> {
            self.inner.commit_batch(owner, batch, options).await
        }
    }

    #[tokio::test]
    async fn test_all_export_survives_one_broken_entity() {
        let alice = UserId::from("alice");
        let inner = RecordStore::in_memory();
        inner
            .insert_all(
                &alice,
                vec![Record::Transaction(TransactionRecord::new(
                    "Rent",
                    Money::from_cents(100_000),
                    TransactionType::Expense,
                    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                ))],
            )
            .unwrap();
        let records = Arc::new(FlakyRecords {
            inner,
            broken: DataType::Goals,
        });
        let h = harness(records, 10);

        let request = ExportRequest::new(DataType::All, ExchangeFormat::Json);
        let id = h.dispatcher.submit(&alice, JobRequest::Export(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Completed);
        let Some(OperationResult::Export(summary)) = op.result else {
            panic!("expected export summary");
        };
        assert_eq!(summary.records, 1);
        assert_eq!(summary.entity_errors.len(), 1);
        assert_eq!(summary.entity_errors[0].data_type, DataType::Goals);
        assert_eq!(summary.entity_errors[0].error.code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_single_entity_failure_is_redacted() {
        let alice = UserId::from("alice");
        let records = Arc::new(FlakyRecords {
            inner: RecordStore::in_memory(),
            broken: DataType::Budgets,
        });
        let h = harness(records, 10);

        let request = ExportRequest::new(DataType::Budgets, ExchangeFormat::Csv);
        let id = h.dispatcher.submit(&alice, JobRequest::Export(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Failed);
        let Some(OperationResult::Failed { error, .. }) = op.result else {
            panic!("expected failure");
        };
        assert_eq!(error.code, ErrorCode::Internal);
        assert!(!error.message.contains("disk on fire"));
        assert!(h.artifacts.is_empty());
    }

    /// Panics on the first read
    struct PanickingRecords;

    #[async_trait]
    impl RecordAccess for PanickingRecords {
        async fn count(&self, _: &UserId, _: DataType, _: &ExportFilter) -> ExchangeResult<u64> {
            Ok(1)
        }

        async fn fetch_batch(
            &self,
            _: &UserId,
            _: DataType,
            _: &ExportFilter,
            _: usize,
            _: usize,
        ) -> ExchangeResult<Vec<Record>> {
            panic!("record source exploded");
        }

        async fn commit_batch(
            &self,
            _: &UserId,
            _: Vec<CommitCandidate>,
            _: &ImportOptions,
        ) -> ExchangeResult<Vec<CommitOutcome>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_worker_panic_still_fails_operation() {
        let alice = UserId::from("alice");
        let h = harness(Arc::new(PanickingRecords), 10);

        let request = ExportRequest::new(DataType::Categories, ExchangeFormat::Json);
        let id = h.dispatcher.submit(&alice, JobRequest::Export(request)).unwrap();
        let op = wait_terminal(&h.registry, id).await;

        assert_eq!(op.status, OperationStatus::Failed);
        assert!(h.artifacts.is_empty());
    }
}
