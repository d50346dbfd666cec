//! The live job table.

use dashmap::DashMap;
use filevault_core::{Actor, JobData};
use uuid::Uuid;

use crate::request::JobRequest;

/// A submitted request waiting for the worker.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: JobRequest,
    pub actor: Actor,
}

/// In-memory table of jobs known to this process.
///
/// Implementations must be safe to call from the worker, from blocking
/// engine callbacks and from request handlers at the same time.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: JobData, pending: PendingRequest);

    /// Full job row including its items.
    fn get(&self, job_id: Uuid) -> Option<JobData>;

    /// Hand the stored request to the worker. Returns `None` the second time.
    fn take_request(&self, job_id: Uuid) -> Option<PendingRequest>;

    /// Mutate a job in place and return the resulting row without items.
    fn update(&self, job_id: Uuid, apply: &mut dyn FnMut(&mut JobData)) -> Option<JobData>;

    /// Drop a job from the table, returning its last row.
    fn remove(&self, job_id: Uuid) -> Option<JobData>;
}

struct Entry {
    job: JobData,
    pending: Option<PendingRequest>,
}

/// [`JobStore`] backed by a concurrent hash map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, Entry>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for MemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobStore")
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: JobData, pending: PendingRequest) {
        self.jobs.insert(
            job.job_id,
            Entry {
                job,
                pending: Some(pending),
            },
        );
    }

    fn get(&self, job_id: Uuid) -> Option<JobData> {
        self.jobs.get(&job_id).map(|entry| entry.job.clone())
    }

    fn take_request(&self, job_id: Uuid) -> Option<PendingRequest> {
        self.jobs
            .get_mut(&job_id)
            .and_then(|mut entry| entry.pending.take())
    }

    fn update(&self, job_id: Uuid, apply: &mut dyn FnMut(&mut JobData)) -> Option<JobData> {
        let mut entry = self.jobs.get_mut(&job_id)?;
        apply(&mut entry.job);
        Some(entry.job.without_items())
    }

    fn remove(&self, job_id: Uuid) -> Option<JobData> {
        self.jobs.remove(&job_id).map(|(_, entry)| entry.job)
    }
}
