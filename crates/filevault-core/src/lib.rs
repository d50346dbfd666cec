//! Core types for filevault.
//!
//! This crate holds the pieces every other filevault crate agrees on: the
//! logical path sandbox, the error taxonomy, configuration and the data model
//! for trash records and jobs.

mod config;
mod error;
mod model;
pub mod path;

pub use config::{VaultConfig, VaultConfigBuilder};
pub use error::{ErrorKind, VaultError, VaultResult};
pub use model::{
    Actor, CompressResponse, ConflictPolicy, CopyResponse, DecompressResponse, DeleteFailure,
    DeleteResponse, ItemStatus, JobData, JobItemResult, JobItemsPage, JobOperation, JobStatus,
    JobUpdate, MoveCopyFailure, MoveCopyResult, MoveResponse, PageMeta, RenameResponse,
    RestoreFailure, RestoreResponse, TrashRecord,
};
pub use path::PathValidator;
