//! Background jobs for filevault.
//!
//! Batch operations submitted here are queued, run one at a time by a single
//! worker on the blocking pool, and report progress to per-job subscribers.
//! Job rows are kept in an injected [`JobStore`] and written through to a
//! [`JobRepository`] by an ordered background writer.

mod orchestrator;
mod repository;
mod request;
mod store;
mod subscription;

pub use orchestrator::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER, JobOrchestrator, JobOrchestratorBuilder,
};
pub use repository::{JobRepository, JsonJobRepository, MemoryJobRepository, PersistenceWriter};
pub use request::{JobPlan, JobRequest};
pub use store::{JobStore, MemoryJobStore, PendingRequest};
pub use subscription::JobSubscription;
