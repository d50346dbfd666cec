//! File operations engine for filevault.
//!
//! This crate provides the sandboxed storage layer, conflict resolution,
//! the trash store, zip archives and the [`OperationsEngine`] that ties them
//! together with auditing and domain events.

pub mod archive;
mod audit;
mod conflict;
mod engine;
mod events;
mod naming;
mod storage;
pub mod transfer;
mod trash;

pub use audit::{AuditEntry, AuditSink, AuditStatus, MemoryAuditSink, TracingAuditSink};
pub use conflict::{ConflictResolver, DEFAULT_RENAME_LIMIT, Resolution, SKIP_REASON};
pub use engine::{ItemTick, OperationsEngine};
pub use events::{DEFAULT_EVENT_CAPACITY, Event, EventBus, EventEnvelope, EventSink};
pub use naming::sanitize_filename;
pub use storage::{LocalStorage, Storage};
pub use transfer::{MoveOutcome, copy_tree, move_path};
pub use trash::{
    DerivedArtifacts, JsonTrashRepository, MemoryTrashRepository, NoDerivedArtifacts,
    TrashRepository, TrashStore,
};
