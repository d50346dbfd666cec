use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use filevault_core::{
    Actor, ItemStatus, JobData, JobItemResult, JobOperation, JobStatus, VaultError, VaultResult,
};
use filevault_jobs::{
    JobOrchestrator, JobRepository, JobRequest, JsonJobRepository, MemoryJobRepository,
    MemoryJobStore,
};
use filevault_ops::{
    AuditEntry, AuditSink, Event, EventBus, EventEnvelope, LocalStorage, MemoryAuditSink,
    MemoryTrashRepository, OperationsEngine, SKIP_REASON, Storage, TrashStore,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

struct Fixture {
    dir: TempDir,
    storage: Arc<dyn Storage>,
    engine: Arc<OperationsEngine>,
    bus: Arc<EventBus>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_audit(Arc::new(MemoryAuditSink::new()))
    }

    fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::open(dir.path().join("root")).unwrap());
        let trash = TrashStore::new(
            Arc::clone(&storage),
            dir.path().join("trash"),
            Arc::new(MemoryTrashRepository::new()),
        )
        .unwrap();
        let bus = Arc::new(EventBus::with_capacity(256));
        let engine = OperationsEngine::new(Arc::clone(&storage), Arc::new(trash), audit)
            .with_events(bus.clone());

        Self {
            dir,
            storage,
            engine: Arc::new(engine),
            bus,
        }
    }

    fn orchestrator(&self) -> JobOrchestrator {
        JobOrchestrator::builder(Arc::clone(&self.engine))
            .events(self.bus.clone())
            .start()
    }

    fn write(&self, logical: &str, contents: &str) {
        let path = self.storage.resolve(logical).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn exists(&self, logical: &str) -> bool {
        self.storage.exists(logical).unwrap()
    }

    fn read(&self, logical: &str) -> String {
        fs::read_to_string(self.storage.resolve(logical).unwrap()).unwrap()
    }
}

/// Audit sink that holds every engine call until opened.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl AuditSink for Gate {
    fn log(&self, _entry: AuditEntry) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
    }
}

fn actor() -> Actor {
    Actor::new("42", "dana", "editor", "198.51.100.7")
}

/// Wait for the job to finish and return its final row.
async fn finished(orchestrator: &JobOrchestrator, job_id: Uuid) -> JobData {
    let mut subscription = orchestrator.subscribe(job_id).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while subscription.recv().await.is_some() {}
    })
    .await
    .expect("job did not finish in time");
    orchestrator.get(job_id).unwrap()
}

async fn run(orchestrator: &JobOrchestrator, request: JobRequest) -> JobData {
    let queued = orchestrator.submit(request, actor()).await.unwrap();
    finished(orchestrator, queued.job_id).await
}

fn all_items(orchestrator: &JobOrchestrator, job_id: Uuid) -> Vec<JobItemResult> {
    orchestrator.items(job_id, 1, 500).unwrap().0.items
}

fn job_events(receiver: &mut broadcast::Receiver<EventEnvelope>, job_id: Uuid) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(envelope) = receiver.try_recv() {
        let update = match &envelope.event {
            Event::JobStarted(u) | Event::JobProgress(u) | Event::JobCompleted(u) | Event::JobFailed(u) => u,
            _ => continue,
        };
        if update.job_id == job_id {
            events.push(envelope.event);
        }
    }
    events
}

#[tokio::test]
async fn test_submit_returns_queued_row() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let orchestrator = f.orchestrator();

    let queued = orchestrator
        .submit(
            JobRequest::new(JobOperation::Copy)
                .sources(["/a.txt"])
                .destination("/dest"),
            actor(),
        )
        .await
        .unwrap();

    assert_eq!(queued.status, JobStatus::Queued);
    assert_eq!(queued.operation, JobOperation::Copy);
    assert_eq!(queued.total_items, 1);
    assert_eq!(queued.progress, 0);
    assert!(queued.items.is_empty());
    assert!(queued.conflict_policy.is_some());

    finished(&orchestrator, queued.job_id).await;
}

#[tokio::test]
async fn test_bad_submission_is_rejected() {
    let f = Fixture::new();
    let orchestrator = f.orchestrator();

    let err = orchestrator
        .submit(JobRequest::new(JobOperation::Delete), actor())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::BadRequest { .. }));

    let err = orchestrator
        .submit(
            JobRequest {
                operation: "rename".into(),
                sources: vec!["/a".into()],
                ..JobRequest::default()
            },
            actor(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BAD_REQUEST");
}

#[tokio::test]
async fn test_copy_job_with_one_missing_source_is_partial() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let orchestrator = f.orchestrator();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Copy)
            .sources(["/a.txt", "/missing.txt"])
            .destination("/dest"),
    )
    .await;

    assert_eq!(job.status, JobStatus::Partial);
    assert_eq!(job.success_items, 1);
    assert_eq!(job.failed_items, 1);
    assert_eq!(job.processed_items, 2);
    assert_eq!(job.progress, 100);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert!(job.items.is_empty(), "get() never carries items");

    let items = all_items(&orchestrator, job.job_id);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].from.as_deref(), Some("/a.txt"));
    assert_eq!(items[0].to.as_deref(), Some("/dest/a.txt"));
    assert_eq!(items[1].status, ItemStatus::Failed);
    assert!(f.exists("/dest/a.txt"));
}

#[tokio::test]
async fn test_copy_job_where_everything_fails() {
    let f = Fixture::new();
    let orchestrator = f.orchestrator();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Copy)
            .sources(["/nope.txt", "/neither.txt"])
            .destination("/dest"),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.success_items, 0);
    assert_eq!(job.failed_items, 2);
}

#[tokio::test]
async fn test_skipped_items_count_as_failures() {
    let f = Fixture::new();
    f.write("/a.txt", "new");
    f.write("/dest/a.txt", "old");
    let orchestrator = f.orchestrator();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Move)
            .sources(["/a.txt"])
            .destination("/dest")
            .conflict_policy("skip"),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    let items = all_items(&orchestrator, job.job_id);
    assert_eq!(items[0].status, ItemStatus::Skipped);
    assert_eq!(items[0].reason.as_deref(), Some(SKIP_REASON));
    assert!(f.exists("/a.txt"));
}

#[tokio::test]
async fn test_root_path_fails_only_its_own_item() {
    let f = Fixture::new();
    f.write("/keep.txt", "k");
    let orchestrator = f.orchestrator();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/", "/keep.txt"]),
    )
    .await;

    assert_eq!(job.status, JobStatus::Partial);
    let items = all_items(&orchestrator, job.job_id);
    let failure = items.iter().find(|i| !i.is_success()).unwrap();
    assert_eq!(failure.path.as_deref(), Some("/"));
    assert!(failure.reason.as_deref().unwrap().contains("root path"));
    assert!(!f.exists("/keep.txt"));
}

#[tokio::test]
async fn test_delete_then_restore_jobs() {
    let f = Fixture::new();
    f.write("/notes.txt", "n");
    let orchestrator = f.orchestrator();

    let deleted = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/notes.txt"]),
    )
    .await;
    assert_eq!(deleted.status, JobStatus::Completed);
    assert!(!f.exists("/notes.txt"));

    let restored = run(
        &orchestrator,
        JobRequest::new(JobOperation::Restore).paths(["/notes.txt"]),
    )
    .await;
    assert_eq!(restored.status, JobStatus::Completed);
    assert!(f.exists("/notes.txt"));

    let again = run(
        &orchestrator,
        JobRequest::new(JobOperation::Restore).paths(["/notes.txt"]),
    )
    .await;
    assert_eq!(again.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let orchestrator = f.orchestrator();

    // The copy only succeeds if the move ran first.
    let first = orchestrator
        .submit(
            JobRequest::new(JobOperation::Move)
                .sources(["/a.txt"])
                .destination("/one"),
            actor(),
        )
        .await
        .unwrap();
    let second = orchestrator
        .submit(
            JobRequest::new(JobOperation::Copy)
                .sources(["/one/a.txt"])
                .destination("/two"),
            actor(),
        )
        .await
        .unwrap();

    let second = finished(&orchestrator, second.job_id).await;
    let first = finished(&orchestrator, first.job_id).await;

    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
    assert!(f.exists("/two/a.txt"));
}

#[tokio::test]
async fn test_subscription_streams_until_terminal() {
    let f = Fixture::new();
    for name in ["/a", "/b", "/c"] {
        f.write(name, "x");
    }
    let orchestrator = f.orchestrator();

    let queued = orchestrator
        .submit(
            JobRequest::new(JobOperation::Delete).paths(["/a", "/b", "/c"]),
            actor(),
        )
        .await
        .unwrap();
    let mut subscription = orchestrator.subscribe(queued.job_id).unwrap();
    assert_eq!(subscription.job_id(), queued.job_id);

    let mut updates = Vec::new();
    while let Some(update) = subscription.recv().await {
        updates.push(update);
    }

    let last = updates.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(last.success_items, 3);
    assert!(updates.windows(2).all(|w| w[0].progress <= w[1].progress));
    assert!(updates.iter().all(|u| u.progress >= 5));
    assert_eq!(subscription.missed_updates(), 0);
}

#[tokio::test]
async fn test_subscribing_to_a_finished_job_yields_its_final_state() {
    let f = Fixture::new();
    let orchestrator = f.orchestrator();
    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/missing"]),
    )
    .await;

    let mut subscription = orchestrator.subscribe(job.job_id).unwrap();
    let snapshot = subscription.recv().await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.progress, 100);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let f = Fixture::new();
    let orchestrator = f.orchestrator();
    let id = Uuid::new_v4();

    assert!(orchestrator.get(id).unwrap_err().is_not_found());
    assert!(orchestrator.items(id, 1, 10).unwrap_err().is_not_found());
    assert!(orchestrator.subscribe(id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_item_pagination_clamps_page_and_limit() {
    let f = Fixture::new();
    for name in ["/a", "/b", "/c"] {
        f.write(name, "x");
    }
    let orchestrator = f.orchestrator();
    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/a", "/b", "/c"]),
    )
    .await;

    let (page, meta) = orchestrator.items(job.job_id, 0, 2).unwrap();
    assert_eq!(page.job_id, job.job_id);
    assert_eq!(page.items.len(), 2);
    assert_eq!((meta.page, meta.limit, meta.total, meta.total_pages), (1, 2, 3, 2));

    let (page, _) = orchestrator.items(job.job_id, 2, 2).unwrap();
    assert_eq!(page.items.len(), 1);

    let (page, meta) = orchestrator.items(job.job_id, 9, 0).unwrap();
    assert!(page.items.is_empty());
    assert_eq!(meta.limit, 100);

    let (_, meta) = orchestrator.items(job.job_id, 1, 10_000).unwrap();
    assert_eq!(meta.limit, 500);
}

#[tokio::test]
async fn test_compress_and_decompress_jobs() {
    let f = Fixture::new();
    f.write("/project/a.txt", "a");
    f.write("/project/b.txt", "b");
    let orchestrator = f.orchestrator();

    let compressed = run(
        &orchestrator,
        JobRequest::new(JobOperation::Compress)
            .sources(["/project"])
            .destination("/archives")
            .name("bundle"),
    )
    .await;
    assert_eq!(compressed.status, JobStatus::Completed);
    let items = all_items(&orchestrator, compressed.job_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].path.as_deref(), Some("/archives/bundle.zip"));

    let extracted = run(
        &orchestrator,
        JobRequest::new(JobOperation::Decompress)
            .sources(["/archives/bundle.zip"])
            .destination("/out"),
    )
    .await;
    assert_eq!(extracted.status, JobStatus::Completed);
    let paths: Vec<String> = all_items(&orchestrator, extracted.job_id)
        .into_iter()
        .filter_map(|item| item.path)
        .collect();
    assert!(paths.contains(&"/out/project/a.txt".to_string()));
    assert!(paths.contains(&"/out/project/b.txt".to_string()));
    assert_eq!(extracted.success_items, paths.len());
    assert_eq!(extracted.total_items, paths.len());
    assert_eq!(extracted.processed_items, extracted.total_items);
    assert!(f.exists("/out/project/b.txt"));
}

#[tokio::test]
async fn test_decompress_conflict_fails_the_job() {
    let f = Fixture::new();
    f.write("/project/a.txt", "a");
    let orchestrator = f.orchestrator();
    run(
        &orchestrator,
        JobRequest::new(JobOperation::Compress)
            .sources(["/project/a.txt"])
            .destination("/")
            .name("a.zip"),
    )
    .await;
    f.write("/out/a.txt", "existing");

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Decompress)
            .sources(["/a.zip"])
            .destination("/out")
            .conflict_policy("rename"),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    let items = all_items(&orchestrator, job.job_id);
    assert_eq!(items.len(), 1);
    assert!(items[0].reason.as_deref().unwrap().contains("conflicting"));
}

#[tokio::test]
async fn test_job_lifecycle_events() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let mut receiver = f.bus.subscribe();
    let orchestrator = f.orchestrator();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Copy)
            .sources(["/a.txt"])
            .destination("/dest"),
    )
    .await;

    let events = job_events(&mut receiver, job.job_id);
    assert!(matches!(events.first(), Some(Event::JobStarted(u)) if u.progress == 5));
    assert!(matches!(events.last(), Some(Event::JobCompleted(u)) if u.progress == 100));

    let failed = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/missing"]),
    )
    .await;
    let events = job_events(&mut receiver, failed.job_id);
    assert!(matches!(events.last(), Some(Event::JobFailed(_))));
}

#[tokio::test]
async fn test_history_survives_restart() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let jobs_dir = f.dir.path().join("state/jobs");

    let orchestrator = JobOrchestrator::builder(Arc::clone(&f.engine))
        .repository(Arc::new(JsonJobRepository::open(&jobs_dir).unwrap()))
        .start();
    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/a.txt"]),
    )
    .await;
    orchestrator.shutdown().await;

    let restarted = JobOrchestrator::builder(Arc::clone(&f.engine))
        .repository(Arc::new(JsonJobRepository::open(&jobs_dir).unwrap()))
        .start();
    let loaded = restarted.get(job.job_id).unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert_eq!(loaded.finished_at, job.finished_at);
    assert_eq!(all_items(&restarted, job.job_id).len(), 1);

    let mut subscription = restarted.subscribe(job.job_id).unwrap();
    assert_eq!(subscription.recv().await.unwrap().status, JobStatus::Completed);
    assert!(subscription.recv().await.is_none());
}

#[derive(Default)]
struct BrokenRepository {
    attempts: AtomicUsize,
}

impl JobRepository for BrokenRepository {
    fn create(&self, _job: &JobData) -> VaultResult<()> {
        self.fail()
    }

    fn update(&self, _job: &JobData) -> VaultResult<()> {
        self.fail()
    }

    fn save_items(&self, _job_id: Uuid, _items: &[JobItemResult]) -> VaultResult<()> {
        self.fail()
    }

    fn find_by_id(&self, _job_id: Uuid) -> VaultResult<Option<JobData>> {
        Ok(None)
    }
}

impl BrokenRepository {
    fn fail(&self) -> VaultResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(VaultError::repository("disk on fire"))
    }
}

#[tokio::test]
async fn test_persistence_failures_do_not_affect_jobs() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let repository = Arc::new(BrokenRepository::default());
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::builder(Arc::clone(&f.engine))
        .repository(repository.clone())
        .store(store.clone())
        .start();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Copy)
            .sources(["/a.txt"])
            .destination("/dest"),
    )
    .await;
    orchestrator.flush().await;

    assert_eq!(job.status, JobStatus::Completed);
    // create, running, finished, items
    assert_eq!(repository.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(orchestrator.persistence_failures(), 4);

    // Nothing reached the repository, so the job has to stay live.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.len(), 1);
    assert_eq!(orchestrator.get(job.job_id).unwrap().status, JobStatus::Completed);
    assert_eq!(all_items(&orchestrator, job.job_id).len(), 1);
}

#[tokio::test]
async fn test_memory_repository_receives_final_rows() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let repository = Arc::new(MemoryJobRepository::new());
    let orchestrator = JobOrchestrator::builder(Arc::clone(&f.engine))
        .repository(repository.clone())
        .start();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Delete).paths(["/a.txt"]),
    )
    .await;
    orchestrator.shutdown().await;

    let stored = repository.find_by_id(job.job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.items, vec![JobItemResult::path_success("/a.txt")]);
    assert_eq!(stored.progress, 100);
}

#[tokio::test]
async fn test_finished_jobs_leave_the_live_table() {
    let f = Fixture::new();
    f.write("/a.txt", "a");
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::builder(Arc::clone(&f.engine))
        .store(store.clone())
        .start();

    let job = run(
        &orchestrator,
        JobRequest::new(JobOperation::Copy)
            .sources(["/a.txt"])
            .destination("/dest"),
    )
    .await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while !store.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("finished job was never evicted");

    let loaded = orchestrator.get(job.job_id).unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert_eq!(loaded.finished_at, job.finished_at);
    let items = all_items(&orchestrator, job.job_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].to.as_deref(), Some("/dest/a.txt"));

    let mut subscription = orchestrator.subscribe(job.job_id).unwrap();
    assert_eq!(subscription.recv().await.unwrap().status, JobStatus::Completed);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn test_submit_waits_while_the_queue_is_full() {
    let gate = Arc::new(Gate::default());
    let f = Fixture::with_audit(gate.clone());
    for name in ["/a", "/b", "/c"] {
        f.write(name, "x");
    }
    let orchestrator = JobOrchestrator::builder(Arc::clone(&f.engine))
        .queue_capacity(1)
        .start();
    let delete = |path: &str| JobRequest::new(JobOperation::Delete).paths([path]);

    // The worker takes the first job off the queue and blocks inside it.
    let first = orchestrator.submit(delete("/a"), actor()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while orchestrator.get(first.job_id).unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first job never started");

    // The second fills the only queue slot; the third has to wait.
    let second = orchestrator.submit(delete("/b"), actor()).await.unwrap();
    let mut third = Box::pin(orchestrator.submit(delete("/c"), actor()));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), &mut third)
            .await
            .is_err(),
        "submit returned while the queue was full"
    );
    assert_eq!(orchestrator.get(second.job_id).unwrap().status, JobStatus::Queued);

    gate.open();
    let third = tokio::time::timeout(Duration::from_secs(10), third)
        .await
        .expect("submit never resumed")
        .unwrap();

    for job_id in [first.job_id, second.job_id, third.job_id] {
        assert_eq!(finished(&orchestrator, job_id).await.status, JobStatus::Completed);
    }
    assert!(!f.exists("/a") && !f.exists("/b") && !f.exists("/c"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_on_disjoint_paths() {
    let f = Fixture::new();
    for n in 0..6 {
        f.write(&format!("/src{n}/file.txt"), &format!("payload {n}"));
    }
    let orchestrator = Arc::new(f.orchestrator());

    let submissions: Vec<_> = (0..6)
        .map(|n| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let request = JobRequest::new(JobOperation::Copy)
                    .sources([format!("/src{n}/file.txt")])
                    .destination(format!("/dst{n}"));
                orchestrator.submit(request, actor()).await.unwrap()
            })
        })
        .collect();

    for (n, submission) in submissions.into_iter().enumerate() {
        let queued = submission.await.unwrap();
        let job = finished(&orchestrator, queued.job_id).await;
        assert_eq!(job.status, JobStatus::Completed, "job {n}");
        assert_eq!(job.success_items, 1);

        let items = all_items(&orchestrator, job.job_id);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].from.as_deref(), Some(format!("/src{n}/file.txt").as_str()));
        assert_eq!(items[0].to.as_deref(), Some(format!("/dst{n}/file.txt").as_str()));
        assert_eq!(f.read(&format!("/dst{n}/file.txt")), format!("payload {n}"));
    }
}
