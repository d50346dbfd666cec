//! Durable job history and the background writer that feeds it.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filevault_core::{JobData, JobItemResult, VaultError, VaultResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Persistent storage for job rows and their items.
pub trait JobRepository: Send + Sync {
    fn create(&self, job: &JobData) -> VaultResult<()>;

    /// Replace the row's fields. Stored items are kept.
    fn update(&self, job: &JobData) -> VaultResult<()>;

    fn save_items(&self, job_id: Uuid, items: &[JobItemResult]) -> VaultResult<()>;

    fn find_by_id(&self, job_id: Uuid) -> VaultResult<Option<JobData>>;
}

fn job_not_found(job_id: Uuid) -> VaultError {
    VaultError::not_found(format!("job {job_id}"))
}

/// Copy `job` over `stored`, keeping the stored items.
fn merge_row(stored: &mut JobData, job: &JobData) {
    let items = std::mem::take(&mut stored.items);
    *stored = job.without_items();
    stored.items = items;
}

/// In-memory [`JobRepository`].
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, JobData>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, JobData>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobRepository for MemoryJobRepository {
    fn create(&self, job: &JobData) -> VaultResult<()> {
        self.jobs().insert(job.job_id, job.clone());
        Ok(())
    }

    fn update(&self, job: &JobData) -> VaultResult<()> {
        let mut jobs = self.jobs();
        let stored = jobs.get_mut(&job.job_id).ok_or_else(|| job_not_found(job.job_id))?;
        merge_row(stored, job);
        Ok(())
    }

    fn save_items(&self, job_id: Uuid, items: &[JobItemResult]) -> VaultResult<()> {
        let mut jobs = self.jobs();
        let stored = jobs.get_mut(&job_id).ok_or_else(|| job_not_found(job_id))?;
        stored.items = items.to_vec();
        Ok(())
    }

    fn find_by_id(&self, job_id: Uuid) -> VaultResult<Option<JobData>> {
        Ok(self.jobs().get(&job_id).cloned())
    }
}

/// [`JobRepository`] keeping one JSON document per job in a directory.
#[derive(Debug)]
pub struct JsonJobRepository {
    dir: PathBuf,
    // Serializes read-modify-write cycles on the job files.
    lock: Mutex<()>,
}

impl JsonJobRepository {
    /// Open the repository, creating `dir` if needed.
    pub fn open(dir: impl Into<PathBuf>) -> VaultResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| VaultError::io(&dir, e))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, job_id: Uuid) -> VaultResult<Option<JobData>> {
        let path = self.job_path(job_id);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
                VaultError::repository(format!("corrupt job record {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::io(&path, e)),
        }
    }

    fn write(&self, job: &JobData) -> VaultResult<()> {
        let path = self.job_path(job.job_id);
        let json = serde_json::to_vec_pretty(job)
            .map_err(|e| VaultError::repository(format!("encode job {}: {e}", job.job_id)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| VaultError::repository(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path).map_err(|e| VaultError::repository(format!("{}: {e}", path.display())))
    }
}

impl JobRepository for JsonJobRepository {
    fn create(&self, job: &JobData) -> VaultResult<()> {
        let _guard = self.guard();
        self.write(job)
    }

    fn update(&self, job: &JobData) -> VaultResult<()> {
        let _guard = self.guard();
        let mut stored = self.read(job.job_id)?.ok_or_else(|| job_not_found(job.job_id))?;
        merge_row(&mut stored, job);
        self.write(&stored)
    }

    fn save_items(&self, job_id: Uuid, items: &[JobItemResult]) -> VaultResult<()> {
        let _guard = self.guard();
        let mut stored = self.read(job_id)?.ok_or_else(|| job_not_found(job_id))?;
        stored.items = items.to_vec();
        self.write(&stored)
    }

    fn find_by_id(&self, job_id: Uuid) -> VaultResult<Option<JobData>> {
        let _guard = self.guard();
        self.read(job_id)
    }
}

enum PersistOp {
    Create(JobData),
    Update(JobData),
    SaveItems(Uuid, Vec<JobItemResult>),
    Flush(oneshot::Sender<()>),
}

impl PersistOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::SaveItems(..) => "save_items",
            Self::Flush(_) => "flush",
        }
    }

    fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::Create(job) | Self::Update(job) => Some(job.job_id),
            Self::SaveItems(job_id, _) => Some(*job_id),
            Self::Flush(_) => None,
        }
    }

    fn apply(self, repository: &dyn JobRepository) -> VaultResult<()> {
        match self {
            Self::Create(job) => repository.create(&job),
            Self::Update(job) => repository.update(&job),
            Self::SaveItems(job_id, items) => repository.save_items(job_id, &items),
            Self::Flush(_) => Ok(()),
        }
    }
}

/// Ordered, best-effort writer in front of a [`JobRepository`].
///
/// Writes are queued on an unbounded channel and applied one at a time on
/// the blocking pool by a dedicated task. Failures are logged and counted;
/// they never reach the caller.
#[derive(Debug, Clone)]
pub struct PersistenceWriter {
    sender: mpsc::UnboundedSender<PersistOp>,
    failures: Arc<AtomicU64>,
}

impl PersistenceWriter {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(repository: Arc<dyn JobRepository>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_writer(repository, receiver, Arc::clone(&failures)));
        Self { sender, failures }
    }

    pub fn create(&self, job: JobData) {
        self.enqueue(PersistOp::Create(job));
    }

    pub fn update(&self, job: JobData) {
        self.enqueue(PersistOp::Update(job));
    }

    pub fn save_items(&self, job_id: Uuid, items: Vec<JobItemResult>) {
        self.enqueue(PersistOp::SaveItems(job_id, items));
    }

    /// Wait until every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(PersistOp::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Number of writes that failed since the writer started.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn enqueue(&self, op: PersistOp) {
        if let Err(mpsc::error::SendError(op)) = self.sender.send(op) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(op = op.name(), job_id = ?op.job_id(), "Job writer stopped, dropping write");
        }
    }
}

async fn run_writer(
    repository: Arc<dyn JobRepository>,
    mut receiver: mpsc::UnboundedReceiver<PersistOp>,
    failures: Arc<AtomicU64>,
) {
    while let Some(op) = receiver.recv().await {
        if let PersistOp::Flush(ack) = op {
            let _ = ack.send(());
            continue;
        }

        let name = op.name();
        let job_id = op.job_id();
        let repo = Arc::clone(&repository);
        let result = tokio::task::spawn_blocking(move || op.apply(repo.as_ref())).await;

        match result {
            Ok(Ok(())) => debug!(op = name, job_id = ?job_id, "Persisted job"),
            Ok(Err(e)) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(op = name, job_id = ?job_id, error = %e, "Persisting job failed");
            }
            Err(e) => {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(op = name, job_id = ?job_id, error = %e, "Job writer task failed");
            }
        }
    }
}
