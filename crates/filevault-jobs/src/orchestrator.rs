//! The job queue and its worker.

use std::sync::Arc;

use chrono::Utc;
use filevault_core::path::join_logical;
use filevault_core::{
    Actor, JobData, JobItemResult, JobItemsPage, JobOperation, JobStatus, JobUpdate,
    MoveCopyFailure, MoveCopyResult, PageMeta, VaultConfig, VaultError, VaultResult,
};
use filevault_ops::{Event, EventSink, ItemTick, OperationsEngine};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{JobRepository, MemoryJobRepository, PersistenceWriter};
use crate::request::JobRequest;
use crate::store::{JobStore, MemoryJobStore, PendingRequest};
use crate::subscription::{JobSubscription, SubscriberTable};

/// Default number of queued jobs before `submit` waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default per-subscriber buffer of live updates.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Progress reported when a job starts running.
const STARTED_PROGRESS: u8 = 5;

/// Highest progress reported before a job is finalized.
const ITEM_PROGRESS_CEILING: u8 = 95;

const FINISHED_PROGRESS: u8 = 100;

/// Progress after `processed` of `total` items.
fn item_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return ITEM_PROGRESS_CEILING;
    }
    let span = usize::from(ITEM_PROGRESS_CEILING - STARTED_PROGRESS);
    let done = processed.min(total) * span / total;
    STARTED_PROGRESS + done as u8
}

/// Configures and starts a [`JobOrchestrator`].
pub struct JobOrchestratorBuilder {
    engine: Arc<OperationsEngine>,
    store: Option<Arc<dyn JobStore>>,
    repository: Option<Arc<dyn JobRepository>>,
    events: Option<Arc<dyn EventSink>>,
    queue_capacity: usize,
    subscriber_buffer: usize,
    default_page_limit: usize,
    max_page_limit: usize,
}

impl JobOrchestratorBuilder {
    fn new(engine: Arc<OperationsEngine>) -> Self {
        Self {
            engine,
            store: None,
            repository: None,
            events: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            default_page_limit: 100,
            max_page_limit: 500,
        }
    }

    /// Take queue, buffer and paging limits from `config`.
    pub fn config(mut self, config: &VaultConfig) -> Self {
        self.queue_capacity = config.queue_capacity;
        self.subscriber_buffer = config.subscriber_buffer;
        self.default_page_limit = config.default_page_limit;
        self.max_page_limit = config.max_page_limit;
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Publish job lifecycle events to `events`.
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// Spawn the worker and the persistence writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> JobOrchestrator {
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemoryJobRepository::new()));
        let shared = Arc::new(Shared {
            engine: self.engine,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryJobStore::new())),
            subscribers: Arc::new(SubscriberTable::new(self.subscriber_buffer)),
            writer: PersistenceWriter::spawn(Arc::clone(&repository)),
            repository,
            events: self.events,
            default_page_limit: self.default_page_limit,
            max_page_limit: self.max_page_limit,
        });

        let (queue, receiver) = mpsc::channel(self.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), receiver));

        JobOrchestrator {
            shared,
            queue,
            worker,
        }
    }
}

/// Runs batch operations in the background, one job at a time in
/// submission order, and streams their progress to subscribers.
pub struct JobOrchestrator {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Uuid>,
    worker: JoinHandle<()>,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("queue_capacity", &self.queue.max_capacity())
            .field("subscribers", &self.shared.subscribers)
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    pub fn builder(engine: Arc<OperationsEngine>) -> JobOrchestratorBuilder {
        JobOrchestratorBuilder::new(engine)
    }

    /// Start with in-memory job storage and default limits.
    pub fn start(engine: Arc<OperationsEngine>) -> Self {
        Self::builder(engine).start()
    }

    /// Validate and enqueue a job.
    ///
    /// Waits while the queue is full. Returns the queued row without items.
    pub async fn submit(&self, request: JobRequest, actor: Actor) -> VaultResult<JobData> {
        let plan = request.plan()?;
        let job = JobData::queued(plan.operation, plan.conflict_policy, plan.total_items);
        let job_id = job.job_id;

        self.shared
            .store
            .insert(job.clone(), PendingRequest { request, actor });
        self.shared.writer.create(job.clone());

        self.queue
            .send(job_id)
            .await
            .map_err(|_| VaultError::internal("job queue is closed"))?;

        info!(%job_id, operation = %job.operation, total = job.total_items, "Job queued");
        Ok(job)
    }

    /// The job row without its items.
    pub fn get(&self, job_id: Uuid) -> VaultResult<JobData> {
        self.load(job_id).map(|job| job.without_items())
    }

    /// One page of a job's item results.
    ///
    /// `page` is 1-indexed; `limit` 0 selects the default page size.
    pub fn items(
        &self,
        job_id: Uuid,
        page: usize,
        limit: usize,
    ) -> VaultResult<(JobItemsPage, PageMeta)> {
        let job = self.load(job_id)?;
        let (meta, range) = PageMeta::paginate(
            page,
            limit,
            self.shared.default_page_limit,
            self.shared.max_page_limit,
            job.items.len(),
        );

        let page = JobItemsPage {
            job_id,
            items: job.items[range].to_vec(),
        };
        Ok((page, meta))
    }

    /// Subscribe to live updates for a job.
    ///
    /// A job that has already finished yields its final state and then ends.
    pub fn subscribe(&self, job_id: Uuid) -> VaultResult<JobSubscription> {
        let store = &self.shared.store;
        if store.get(job_id).is_none() {
            let job = self.load(job_id)?;
            return Ok(self
                .shared
                .subscribers
                .subscribe(job_id, || Some(JobUpdate::from(&job))));
        }

        // A job retired after the check above is read back from the repository.
        Ok(self.shared.subscribers.subscribe(job_id, || match store.get(job_id) {
            Some(job) => job.status.is_terminal().then(|| JobUpdate::from(&job)),
            None => self.load(job_id).ok().map(|job| JobUpdate::from(&job)),
        }))
    }

    /// Repository writes that failed since startup.
    pub fn persistence_failures(&self) -> u64 {
        self.shared.writer.failures()
    }

    /// Wait until every repository write issued so far has been applied.
    pub async fn flush(&self) {
        self.shared.writer.flush().await;
    }

    /// Stop accepting jobs, finish the queued ones and flush persistence.
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            error!(error = %e, "Job worker ended abnormally");
        }
        self.shared.writer.flush().await;
        info!("Job orchestrator stopped");
    }

    /// Live job, falling back to persisted history.
    fn load(&self, job_id: Uuid) -> VaultResult<JobData> {
        if let Some(job) = self.shared.store.get(job_id) {
            return Ok(job);
        }
        self.shared
            .repository
            .find_by_id(job_id)?
            .ok_or_else(|| VaultError::not_found(format!("job {job_id}")))
    }
}

/// State shared between the orchestrator handle and its worker.
struct Shared {
    engine: Arc<OperationsEngine>,
    store: Arc<dyn JobStore>,
    subscribers: Arc<SubscriberTable>,
    writer: PersistenceWriter,
    repository: Arc<dyn JobRepository>,
    events: Option<Arc<dyn EventSink>>,
    default_page_limit: usize,
    max_page_limit: usize,
}

async fn run_worker(shared: Arc<Shared>, mut queue: mpsc::Receiver<Uuid>) {
    while let Some(job_id) = queue.recv().await {
        shared.run(job_id).await;
    }
    debug!("Job queue drained");
}

impl Shared {
    async fn run(self: &Arc<Self>, job_id: Uuid) {
        let Some(pending) = self.store.take_request(job_id) else {
            warn!(%job_id, "Queued job has no pending request");
            return;
        };
        let actor = pending.actor.clone();

        let Some(row) = self.store.update(job_id, &mut |job| {
            job.status = JobStatus::Running;
            job.progress = STARTED_PROGRESS;
            job.started_at = Some(Utc::now());
        }) else {
            return;
        };

        info!(%job_id, operation = %row.operation, "Job started");
        self.writer.update(row.clone());
        self.broadcast(&row, &actor);

        let shared = Arc::clone(self);
        let items = tokio::task::spawn_blocking(move || shared.execute(&row, &pending))
            .await
            .unwrap_or_else(|e| {
                error!(%job_id, error = %e, "Job execution aborted");
                vec![JobItemResult::failed(format!("job execution aborted: {e}"))]
            });

        self.finalize(job_id, items, &actor);
    }

    /// Run the engine call for a job. Blocking.
    fn execute(&self, row: &JobData, pending: &PendingRequest) -> Vec<JobItemResult> {
        let request = &pending.request;
        let actor = &pending.actor;
        let destination = request.destination_str();
        let policy = row
            .conflict_policy
            .map(|policy| policy.to_string())
            .unwrap_or_default();
        let mut on_item = |tick: ItemTick| self.tick(row.job_id, tick, actor);

        let result = match row.operation {
            JobOperation::Copy => self
                .engine
                .copy_observed(&request.sources, destination, &policy, actor, &mut on_item)
                .map(|response| transfer_items(response.copied, response.failed)),
            JobOperation::Move => self
                .engine
                .move_observed(&request.sources, destination, &policy, actor, &mut on_item)
                .map(|response| transfer_items(response.moved, response.failed)),
            JobOperation::Delete => self
                .engine
                .delete_observed(&request.paths, actor, &mut on_item)
                .map(|response| {
                    let failed = response.failed.into_iter().map(|f| (f.path, f.reason));
                    path_items(response.deleted, failed)
                }),
            JobOperation::Restore => self
                .engine
                .restore_observed(&request.paths, actor, &mut on_item)
                .map(|response| {
                    let failed = response.failed.into_iter().map(|f| (f.path, f.reason));
                    path_items(response.restored, failed)
                }),
            JobOperation::Compress => self
                .engine
                .compress(&request.sources, destination, request.name_str(), actor)
                .map(|response| vec![JobItemResult::path_success(response.path)]),
            JobOperation::Decompress => match request.sources.first() {
                Some(source) => self
                    .engine
                    .decompress(source, destination, &policy, actor)
                    .map(|response| {
                        response
                            .files
                            .iter()
                            .map(|file| {
                                JobItemResult::path_success(join_logical(&response.destination, file))
                            })
                            .collect()
                    }),
                None => Err(VaultError::bad_request("no source file provided")),
            },
        };

        result.unwrap_or_else(|e| vec![JobItemResult::failed(e.to_string())])
    }

    /// Count one processed item and push the new progress.
    fn tick(&self, job_id: Uuid, tick: ItemTick, actor: &Actor) {
        let Some(row) = self.store.update(job_id, &mut |job| {
            job.processed_items += 1;
            if tick.is_success() {
                job.success_items += 1;
            } else {
                job.failed_items += 1;
            }
            job.progress = item_progress(job.processed_items, job.total_items);
        }) else {
            return;
        };

        debug!(%job_id, processed = row.processed_items, progress = row.progress, "Job item done");
        self.broadcast(&row, actor);
    }

    fn finalize(self: &Arc<Self>, job_id: Uuid, items: Vec<JobItemResult>, actor: &Actor) {
        let success = items.iter().filter(|item| item.is_success()).count();
        let failed = items.len() - success;
        let status = JobStatus::from_counts(success, failed);

        let mut attach = Some(items.clone());
        let Some(row) = self.store.update(job_id, &mut |job| {
            job.items = attach.take().unwrap_or_default();
            job.status = status;
            job.processed_items = job.items.len();
            job.success_items = success;
            job.failed_items = failed;
            // Decompress only learns its file count from the archive.
            job.total_items = job.total_items.max(job.items.len());
            job.progress = FINISHED_PROGRESS;
            job.finished_at = Some(Utc::now());
        }) else {
            return;
        };

        info!(%job_id, %status, success, failed, "Job finished");
        self.writer.update(row.clone());
        self.writer.save_items(job_id, items);

        let update = JobUpdate::from(&row);
        self.publish(update, actor);
        self.subscribers.finish(job_id, update);
        self.retire(job_id, success + failed);
    }

    /// Drop a finished job from the live table once the repository holds its
    /// final row and all `item_count` items. Reads fall back to the repository.
    fn retire(self: &Arc<Self>, job_id: Uuid, item_count: usize) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.writer.flush().await;
            let repository = Arc::clone(&shared.repository);
            let persisted = tokio::task::spawn_blocking(move || repository.find_by_id(job_id)).await;

            match persisted {
                Ok(Ok(Some(job))) if job.status.is_terminal() && job.items.len() == item_count => {
                    shared.store.remove(job_id);
                    debug!(%job_id, "Finished job evicted from live table");
                }
                Ok(Err(e)) => {
                    warn!(%job_id, error = %e, "Checking persisted job failed, keeping it live");
                }
                Err(e) => {
                    warn!(%job_id, error = %e, "Checking persisted job aborted, keeping it live");
                }
                Ok(Ok(_)) => {
                    debug!(%job_id, "Job not fully persisted, keeping it live");
                }
            }
        });
    }

    fn broadcast(&self, row: &JobData, actor: &Actor) {
        let update = JobUpdate::from(row);
        self.subscribers.notify(row.job_id, update);
        self.publish(update, actor);
    }

    fn publish(&self, update: JobUpdate, actor: &Actor) {
        let Some(events) = &self.events else {
            return;
        };
        let event = match update.status {
            JobStatus::Running if update.progress <= STARTED_PROGRESS => Event::JobStarted(update),
            JobStatus::Completed => Event::JobCompleted(update),
            JobStatus::Failed => Event::JobFailed(update),
            _ => Event::JobProgress(update),
        };
        events.publish(event, actor);
    }
}

fn transfer_items(done: Vec<MoveCopyResult>, failed: Vec<MoveCopyFailure>) -> Vec<JobItemResult> {
    let mut items: Vec<JobItemResult> = done
        .into_iter()
        .map(|result| JobItemResult::transferred(result.from, result.to))
        .collect();
    items.extend(
        failed
            .into_iter()
            .map(|failure| JobItemResult::transfer_failed(failure.from, failure.reason, failure.skipped)),
    );
    items
}

fn path_items(
    done: Vec<String>,
    failed: impl IntoIterator<Item = (String, String)>,
) -> Vec<JobItemResult> {
    let mut items: Vec<JobItemResult> = done.into_iter().map(JobItemResult::path_success).collect();
    items.extend(
        failed
            .into_iter()
            .map(|(path, reason)| JobItemResult::path_failed(path, reason)),
    );
    items
}
