//! End-to-end tests of the exchange service
//!
//! Exercises the job engine through its public facade: round trips,
//! partial imports, structural failures, cancellation, history paging,
//! ownership isolation and back-pressure.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use envelope_exchange::error::ErrorCode;
use envelope_exchange::models::{
    BudgetPeriod, BudgetRecord, CategoryKind, CategoryRecord, DataType, ExchangeFormat, ExportFilter,
    GoalRecord, GoalStatus, ImportOptions, ImportReport, Money, Operation, OperationId, OperationKind,
    OperationResult, OperationStatus, Record, TransactionRecord, TransactionType, UserId,
};
use envelope_exchange::services::{ExchangeService, ExportRequest, ImportRequest};
use envelope_exchange::storage::{
    ArtifactStore, CommitCandidate, CommitOutcome, ListQuery, OperationRegistry, RecordAccess,
    RecordStore,
};
use envelope_exchange::{config::Settings, ExchangeResult};
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn alice() -> UserId {
    UserId::from("alice")
}

fn bob() -> UserId {
    UserId::from("bob")
}

struct Harness {
    service: ExchangeService,
    records: Arc<RecordStore>,
    _temp: TempDir,
}

fn harness_with(settings: Settings, access: impl FnOnce(Arc<RecordStore>) -> Arc<dyn RecordAccess>) -> Harness {
    let temp = TempDir::new().unwrap();
    let records = Arc::new(RecordStore::in_memory());
    let registry = Arc::new(OperationRegistry::in_memory());
    let artifacts = Arc::new(
        ArtifactStore::open(temp.path().join("artifacts"), None, settings.retention.artifact_ttl()).unwrap(),
    );
    let service = ExchangeService::new(registry, artifacts, access(Arc::clone(&records)), &settings);
    Harness {
        service,
        records,
        _temp: temp,
    }
}

fn harness() -> Harness {
    harness_with(Settings::default(), |records| records as Arc<dyn RecordAccess>)
}

fn seed_goals(records: &RecordStore, owner: &UserId, count: usize) {
    let goals = (0..count).map(|i| {
        Record::Goal(GoalRecord::new(
            format!("Goal {}", i),
            Money::from_cents(10_000 + i as i64),
        ))
    });
    records.insert_all(owner, goals).unwrap();
}

async fn finished(service: &ExchangeService, id: OperationId, owner: &UserId) -> Operation {
    let op = service.wait(id, owner, WAIT).await.unwrap();
    assert!(op.is_terminal(), "operation did not finish: {:?}", op.status);
    op
}

fn download_bytes(service: &ExchangeService, id: OperationId, owner: &UserId) -> Vec<u8> {
    let mut bytes = Vec::new();
    service.download(id, owner).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

/// Record access that holds a job at its first batch boundary until
/// released: reads past the first batch block, and so does the return of
/// the first commit (after its records are stored)
struct GatedRecords {
    inner: Arc<RecordStore>,
    gate: Semaphore,
    commits: AtomicUsize,
}

impl GatedRecords {
    fn new(inner: Arc<RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Semaphore::new(0),
            commits: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl RecordAccess for GatedRecords {
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
        if offset > 0 {
            self.gate.acquire().await.unwrap().forget();
        }
        self.inner.fetch_batch(owner, data_type, filter, offset, limit).await
    }

    async fn commit_batch(
        &self,
        owner: &UserId,
        batch: Vec<CommitCandidate>,
        options: &ImportOptions,
    ) -> ExchangeResult<Vec<CommitOutcome>> {
        let outcomes = self.inner.commit_batch(owner, batch, options).await?;
        if self.commits.fetch_add(1, Ordering::SeqCst) == 0 {
            self.gate.acquire().await.unwrap().forget();
        }
        Ok(outcomes)
    }
}

fn gated_harness(settings: Settings) -> (Harness, Arc<GatedRecords>) {
    let gated = std::cell::OnceCell::new();
    let h = harness_with(settings, |records| {
        let access = GatedRecords::new(records);
        let _ = gated.set(Arc::clone(&access));
        access as Arc<dyn RecordAccess>
    });
    let gated = Arc::clone(gated.get().unwrap());
    (h, gated)
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Export alice's records as JSON and import the file as bob
async fn json_round_trip(h: &Harness, request: ExportRequest) -> ImportReport {
    let data_type = request.data_type;
    let export = h.service.submit_export(&alice(), request).unwrap();
    let op = finished(&h.service, export, &alice()).await;
    assert_eq!(op.status, OperationStatus::Completed);
    let payload = download_bytes(&h.service, export, &alice());

    let import = h
        .service
        .submit_import(&bob(), ImportRequest::new(data_type, ExchangeFormat::Json, payload))
        .unwrap();
    match finished(&h.service, import, &bob()).await.result {
        Some(OperationResult::Import(report)) => report,
        other => panic!("unexpected result: {:?}", other),
    }
}

fn small_batches() -> Settings {
    let mut settings = Settings::default();
    settings.jobs.batch_size = 2;
    settings
}

async fn wait_for_progress(service: &ExchangeService, id: OperationId, owner: &UserId, at_least: u64) {
    for _ in 0..400 {
        if service.status(id, owner).unwrap().progress.processed >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("operation {} made no progress", id);
}

// ============================================================================
// Round trips and partial success
// ============================================================================

#[tokio::test]
async fn test_json_export_import_round_trip() {
    let h = harness();
    seed_goals(&h.records, &alice(), 5);

    let export = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Json))
        .unwrap();
    let op = finished(&h.service, export, &alice()).await;
    assert_eq!(op.status, OperationStatus::Completed);
    let payload = download_bytes(&h.service, export, &alice());

    let import = h
        .service
        .submit_import(&bob(), ImportRequest::new(DataType::Goals, ExchangeFormat::Json, payload))
        .unwrap();
    let op = finished(&h.service, import, &bob()).await;
    match op.result {
        Some(OperationResult::Import(report)) => {
            assert_eq!(report.created, 5);
            assert!(report.errors.is_empty());
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert_eq!(
        h.records.records(&bob(), DataType::Goals).unwrap(),
        h.records.records(&alice(), DataType::Goals).unwrap()
    );
}

#[tokio::test]
async fn test_transactions_round_trip_with_attachments() {
    let h = harness();
    let mut salary = TransactionRecord::new(
        "Salary",
        Money::from_cents(320_000),
        TransactionType::Income,
        date(2025, 3, 1),
    )
    .with_category("Work");
    salary.notes = "March payroll".to_string();
    let mut lunch = TransactionRecord::new("Lunch", Money::from_cents(1_250), TransactionType::Expense, date(2025, 3, 4));
    lunch.attachments = vec!["receipt.png".to_string(), "invoice.pdf".to_string()];
    h.records
        .insert_all(&alice(), [Record::Transaction(salary), Record::Transaction(lunch)])
        .unwrap();

    let request = ExportRequest::new(DataType::Transactions, ExchangeFormat::Json).include_attachments(true);
    let report = json_round_trip(&h, request).await;
    assert_eq!(report.created, 2);
    assert!(report.errors.is_empty());
    assert_eq!(
        h.records.records(&bob(), DataType::Transactions).unwrap(),
        h.records.records(&alice(), DataType::Transactions).unwrap()
    );
}

#[tokio::test]
async fn test_budgets_round_trip() {
    let h = harness();
    let mut rent = BudgetRecord::new(
        "Rent",
        "Housing",
        Money::from_cents(120_000),
        BudgetPeriod::Monthly,
        date(2025, 1, 1),
    );
    rent.end_date = Some(date(2025, 12, 31));
    let fuel = BudgetRecord::new("Fuel", "Transport", Money::from_cents(4_550), BudgetPeriod::Weekly, date(2025, 2, 3));
    h.records
        .insert_all(&alice(), [Record::Budget(rent), Record::Budget(fuel)])
        .unwrap();

    let report = json_round_trip(&h, ExportRequest::new(DataType::Budgets, ExchangeFormat::Json)).await;
    assert_eq!(report.created, 2);
    assert_eq!(
        h.records.records(&bob(), DataType::Budgets).unwrap(),
        h.records.records(&alice(), DataType::Budgets).unwrap()
    );
}

#[tokio::test]
async fn test_goals_with_deadlines_round_trip() {
    let h = harness();
    let mut trip = GoalRecord::new("Trip", Money::from_cents(250_000));
    trip.current_amount = Money::from_cents(80_025);
    trip.deadline = Some(date(2026, 6, 30));
    trip.status = GoalStatus::Paused;
    h.records
        .insert_all(&alice(), [Record::Goal(trip), Record::Goal(GoalRecord::new("Fund", Money::from_cents(1_000)))])
        .unwrap();

    let report = json_round_trip(&h, ExportRequest::new(DataType::Goals, ExchangeFormat::Json)).await;
    assert_eq!(report.created, 2);
    assert_eq!(
        h.records.records(&bob(), DataType::Goals).unwrap(),
        h.records.records(&alice(), DataType::Goals).unwrap()
    );
}

#[tokio::test]
async fn test_categories_round_trip() {
    let h = harness();
    let mut groceries = CategoryRecord::new("Groceries", CategoryKind::Expense);
    groceries.color = Some("#4caf50".to_string());
    groceries.icon = Some("cart".to_string());
    h.records
        .insert_all(
            &alice(),
            [
                Record::Category(groceries),
                Record::Category(CategoryRecord::new("Salary", CategoryKind::Income)),
            ],
        )
        .unwrap();

    let report = json_round_trip(&h, ExportRequest::new(DataType::Categories, ExchangeFormat::Json)).await;
    assert_eq!(report.created, 2);
    assert_eq!(
        h.records.records(&bob(), DataType::Categories).unwrap(),
        h.records.records(&alice(), DataType::Categories).unwrap()
    );
}

#[tokio::test]
async fn test_csv_import_partial_success() {
    let h = harness();
    let csv = "name,target_amount\n\
               Car,5000\n\
               ,100\n\
               Bike,250.50\n\
               Boat,not-money\n\
               House,90000\n";

    let id = h
        .service
        .submit_import(
            &alice(),
            ImportRequest::new(DataType::Goals, ExchangeFormat::Csv, csv.as_bytes().to_vec()),
        )
        .unwrap();
    let op = finished(&h.service, id, &alice()).await;

    assert_eq!(op.status, OperationStatus::Completed);
    let Some(OperationResult::Import(report)) = op.result else {
        panic!("expected an import report");
    };
    assert_eq!(report.created, 3);
    let indices: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![1, 3]);
    assert_eq!(h.records.records(&alice(), DataType::Goals).unwrap().len(), 3);
}

#[tokio::test]
async fn test_structural_failure_commits_nothing() {
    let h = harness();
    let id = h
        .service
        .submit_import(
            &alice(),
            ImportRequest::new(DataType::Categories, ExchangeFormat::Excel, b"definitely not a workbook".to_vec()),
        )
        .unwrap();
    let op = finished(&h.service, id, &alice()).await;

    assert_eq!(op.status, OperationStatus::Failed);
    match op.result {
        Some(OperationResult::Failed { error, report }) => {
            assert_eq!(error.code, ErrorCode::StructuralDecode);
            assert!(report.is_none());
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(h.records.records(&alice(), DataType::Categories).unwrap().is_empty());
}

#[tokio::test]
async fn test_all_export_contains_every_section() {
    let h = harness();
    seed_goals(&h.records, &alice(), 2);
    h.records
        .insert_all(
            &alice(),
            [Record::Category(CategoryRecord::new("Rent", CategoryKind::Expense))],
        )
        .unwrap();

    let id = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::All, ExchangeFormat::Json))
        .unwrap();
    finished(&h.service, id, &alice()).await;

    let body: serde_json::Value = serde_json::from_slice(&download_bytes(&h.service, id, &alice())).unwrap();
    assert_eq!(body["goals"].as_array().unwrap().len(), 2);
    assert_eq!(body["categories"].as_array().unwrap().len(), 1);
    assert!(body["transactions"].as_array().unwrap().is_empty());
    assert!(body["budgets"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pdf_import_is_rejected_up_front() {
    let h = harness();
    let err = h
        .service
        .submit_import(&alice(), ImportRequest::new(DataType::Goals, ExchangeFormat::Pdf, b"%PDF".to_vec()))
        .unwrap_err();
    assert!(err.is_validation());

    let page = h.service.history(&alice(), &ListQuery::new(1, 10)).unwrap();
    assert_eq!(page.total, 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_export_leaves_no_artifact() {
    let (h, gated) = gated_harness(small_batches());
    seed_goals(&h.records, &alice(), 10);

    let id = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
    wait_for_progress(&h.service, id, &alice(), 2).await;

    let requested = h.service.cancel(OperationKind::Export, id, &alice()).unwrap();
    assert!(requested.cancel_requested);
    gated.release();

    let op = finished(&h.service, id, &alice()).await;
    assert_eq!(op.status, OperationStatus::Cancelled);
    assert!(op.progress.processed < 10);
    assert!(h.service.artifacts().is_empty());
    assert!(h.service.download(id, &alice()).err().unwrap().is_not_found());

    let err = h.service.cancel(OperationKind::Export, id, &alice()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyTerminal);
}

#[tokio::test]
async fn test_cancelled_import_keeps_committed_batches() {
    let (h, gated) = gated_harness(small_batches());
    let rows: String = (0..10).map(|i| format!("Goal {},{}\n", i, i + 1)).collect();
    let csv = format!("name,target_amount\n{}", rows);

    let id = h
        .service
        .submit_import(&alice(), ImportRequest::new(DataType::Goals, ExchangeFormat::Csv, csv.into_bytes()))
        .unwrap();

    // The first batch is stored and the worker is parked at the boundary
    for _ in 0..400 {
        if h.records.records(&alice(), DataType::Goals).unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.service.status(id, &alice()).unwrap().status, OperationStatus::Running);

    let requested = h.service.cancel(OperationKind::Import, id, &alice()).unwrap();
    assert!(requested.cancel_requested);
    gated.release();

    let op = finished(&h.service, id, &alice()).await;
    assert_eq!(op.status, OperationStatus::Cancelled);
    let Some(OperationResult::Cancelled { processed, report: Some(report) }) = op.result else {
        panic!("expected a cancelled result with a report");
    };
    assert_eq!(processed, 2);
    assert_eq!(report.created, 2);
    assert!(report.errors.is_empty());

    let committed: Vec<String> = h
        .records
        .records(&alice(), DataType::Goals)
        .unwrap()
        .into_iter()
        .map(|record| match record {
            Record::Goal(goal) => goal.name,
            other => panic!("unexpected record {:?}", other),
        })
        .collect();
    assert_eq!(committed, vec!["Goal 0", "Goal 1"]);
}

// ============================================================================
// History, ownership and back-pressure
// ============================================================================

#[tokio::test]
async fn test_history_is_stable_and_newest_first() {
    let h = harness();
    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = h
            .service
            .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
            .unwrap();
        finished(&h.service, id, &alice()).await;
        ids.push(id);
    }

    let first = h.service.history(&alice(), &ListQuery::new(1, 2)).unwrap();
    let again = h.service.history(&alice(), &ListQuery::new(1, 2)).unwrap();
    assert_eq!(first, again);
    assert_eq!(first.total, 5);
    assert_eq!(first.items[0].id, ids[4]);
    assert_eq!(first.items[1].id, ids[3]);

    let newer = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
    finished(&h.service, newer, &alice()).await;

    let second = h
        .service
        .history(&alice(), &ListQuery::new(2, 2).cursor(first.cursor))
        .unwrap();
    assert_eq!(second.total, 5);
    assert_eq!(second.items[0].id, ids[2]);
    assert_eq!(second.items[1].id, ids[1]);

    let imports = h
        .service
        .history(&alice(), &ListQuery::new(1, 10).kind(OperationKind::Import))
        .unwrap();
    assert_eq!(imports.total, 0);
}

#[tokio::test]
async fn test_ownership_isolation() {
    let h = harness();
    seed_goals(&h.records, &alice(), 1);
    let id = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
    finished(&h.service, id, &alice()).await;

    assert!(h.service.status(id, &bob()).unwrap_err().is_forbidden());
    assert!(h.service.download(id, &bob()).err().unwrap().is_forbidden());
    assert!(h.service.cancel(OperationKind::Export, id, &bob()).unwrap_err().is_forbidden());
    assert!(h.service.delete_operation(id, &bob()).unwrap_err().is_forbidden());

    let missing = OperationId::new();
    assert!(h.service.status(missing, &bob()).unwrap_err().is_not_found());
    assert!(h.service.download(missing, &bob()).err().unwrap().is_not_found());

    assert_eq!(h.service.history(&bob(), &ListQuery::new(1, 10)).unwrap().total, 0);
    assert_eq!(h.service.history(&alice(), &ListQuery::new(1, 10)).unwrap().total, 1);
}

#[tokio::test]
async fn test_concurrency_limit_rejects_without_creating() {
    let gated = std::cell::OnceCell::new();
    let mut settings = small_batches();
    settings.jobs.max_concurrent_exports = 1;
    let h = harness_with(settings, |records| {
        let access = GatedRecords::new(records);
        let _ = gated.set(Arc::clone(&access));
        access as Arc<dyn RecordAccess>
    });
    let gated = gated.get().unwrap();
    seed_goals(&h.records, &alice(), 6);

    let running = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
    wait_for_progress(&h.service, running, &alice(), 2).await;

    let err = h
        .service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Json))
        .unwrap_err();
    assert!(err.is_too_many());
    assert_eq!(h.service.history(&alice(), &ListQuery::new(1, 10)).unwrap().total, 1);

    // other users and other kinds are unaffected
    let other = h
        .service
        .submit_export(&bob(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
    let import = h
        .service
        .submit_import(&alice(), ImportRequest::new(DataType::Goals, ExchangeFormat::Json, b"[]".to_vec()))
        .unwrap();

    gated.release();
    assert_eq!(finished(&h.service, running, &alice()).await.status, OperationStatus::Completed);
    assert_eq!(finished(&h.service, other, &bob()).await.status, OperationStatus::Completed);
    assert_eq!(finished(&h.service, import, &alice()).await.status, OperationStatus::Completed);

    h.service
        .submit_export(&alice(), ExportRequest::new(DataType::Goals, ExchangeFormat::Csv))
        .unwrap();
}
