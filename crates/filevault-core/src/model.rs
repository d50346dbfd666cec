//! Data model shared by the operations engine and the job layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Who performed a mutating call, for audit purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
}

impl Actor {
    /// Create an actor for an authenticated user.
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        role: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role: role.into(),
            ip: ip.into(),
        }
    }

    /// The zero-valued actor used by internal callers such as the job worker.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn is_system(&self) -> bool {
        self.user_id.is_empty() && self.username.is_empty()
    }
}

/// How to handle a write target that already exists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConflictPolicy {
    /// Remove the existing target first.
    Overwrite,
    /// Write to `name (N).ext` instead.
    #[default]
    Rename,
    /// Leave the existing target alone and report the item as skipped.
    Skip,
}

impl ConflictPolicy {
    /// Parse a client-supplied policy. Empty input means the default.
    pub fn parse(raw: &str) -> VaultResult<Self> {
        let trimmed = raw.trim().to_lowercase();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        trimmed.parse().map_err(|_| {
            VaultError::bad_request(format!(
                "invalid conflict_policy {raw:?} (allowed: overwrite|rename|skip)"
            ))
        })
    }

    /// Parse an optional policy, treating `None` like an empty string.
    pub fn parse_optional(raw: Option<&str>) -> VaultResult<Self> {
        Self::parse(raw.unwrap_or_default())
    }
}

/// Metadata describing a soft-deleted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashRecord {
    pub id: Uuid,
    /// Logical path the item was deleted from.
    pub original_path: String,
    /// File name inside the trash area.
    pub trash_name: String,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_by: Option<Actor>,
}

impl TrashRecord {
    pub fn is_restored(&self) -> bool {
        self.restored_at.is_some()
    }
}

/// Operations that can run as a job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobOperation {
    Copy,
    Move,
    Delete,
    Restore,
    Compress,
    Decompress,
}

impl JobOperation {
    /// Parse an operation name from a submission request.
    pub fn parse(raw: &str) -> VaultResult<Self> {
        raw.trim().to_lowercase().parse().map_err(|_| {
            VaultError::bad_request(
                "operation must be one of: copy|move|delete|restore|compress|decompress",
            )
        })
    }

    /// Delete and restore take `paths`; everything else takes `sources`.
    pub fn uses_paths(self) -> bool {
        matches!(self, Self::Delete | Self::Restore)
    }

    pub fn requires_destination(self) -> bool {
        matches!(
            self,
            Self::Copy | Self::Move | Self::Compress | Self::Decompress
        )
    }

    pub fn uses_conflict_policy(self) -> bool {
        matches!(self, Self::Copy | Self::Move | Self::Decompress)
    }
}

/// Lifecycle of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Terminal status for a finished batch.
    pub fn from_counts(success: usize, failed: usize) -> Self {
        match (success, failed) {
            (0, f) if f > 0 => Self::Failed,
            (s, f) if s > 0 && f > 0 => Self::Partial,
            _ => Self::Completed,
        }
    }
}

/// Outcome of one item processed by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

/// Per-item record attached to a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItemResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobItemResult {
    pub fn transferred(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            path: None,
            status: ItemStatus::Success,
            reason: None,
        }
    }

    pub fn path_success(path: impl Into<String>) -> Self {
        Self {
            from: None,
            to: None,
            path: Some(path.into()),
            status: ItemStatus::Success,
            reason: None,
        }
    }

    pub fn transfer_failed(from: impl Into<String>, reason: impl Into<String>, skipped: bool) -> Self {
        Self {
            from: Some(from.into()),
            to: None,
            path: None,
            status: if skipped {
                ItemStatus::Skipped
            } else {
                ItemStatus::Failed
            },
            reason: Some(reason.into()),
        }
    }

    pub fn path_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            from: None,
            to: None,
            path: Some(path.into()),
            status: ItemStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    /// A failure not tied to any single source (whole-call errors).
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            from: None,
            to: None,
            path: None,
            status: ItemStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// A tracked asynchronous batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub job_id: Uuid,
    pub operation: JobOperation,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<ConflictPolicy>,
    pub total_items: usize,
    pub processed_items: usize,
    pub success_items: usize,
    pub failed_items: usize,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<JobItemResult>,
}

impl JobData {
    /// A freshly submitted job in the `queued` state.
    pub fn queued(
        operation: JobOperation,
        conflict_policy: Option<ConflictPolicy>,
        total_items: usize,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            operation,
            status: JobStatus::Queued,
            conflict_policy,
            total_items,
            processed_items: 0,
            success_items: 0,
            failed_items: 0,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            items: Vec::new(),
        }
    }

    /// Snapshot of the row without its item list.
    pub fn without_items(&self) -> Self {
        Self {
            items: Vec::new(),
            ..self.clone()
        }
    }
}

/// Live progress message pushed to job subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub processed_items: usize,
    pub total_items: usize,
    pub success_items: usize,
    pub failed_items: usize,
}

impl From<&JobData> for JobUpdate {
    fn from(job: &JobData) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            processed_items: job.processed_items,
            total_items: job.total_items,
            success_items: job.success_items,
            failed_items: job.failed_items,
        }
    }
}

/// Paginated item listing for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItemsPage {
    pub job_id: Uuid,
    pub items: Vec<JobItemResult>,
}

/// Pagination metadata, identical across list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl PageMeta {
    /// Clamp `page`/`limit` and compute the slice bounds for `total` items.
    pub fn paginate(
        page: usize,
        limit: usize,
        default_limit: usize,
        max_limit: usize,
        total: usize,
    ) -> (Self, std::ops::Range<usize>) {
        let page = page.max(1);
        let limit = if limit == 0 { default_limit } else { limit.min(max_limit) };
        let start = (page - 1).saturating_mul(limit).min(total);
        let end = start.saturating_add(limit).min(total);
        let total_pages = total.div_ceil(limit.max(1));

        (
            Self {
                page,
                limit,
                total,
                total_pages,
            },
            start..end,
        )
    }
}

/// Successful move or copy of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCopyResult {
    pub from: String,
    pub to: String,
}

/// Failed (or skipped) move or copy of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCopyFailure {
    pub from: String,
    pub reason: String,
    /// Set when the conflict policy was `skip` and the target existed.
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameResponse {
    pub old_path: String,
    pub new_path: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub moved: Vec<MoveCopyResult>,
    pub failed: Vec<MoveCopyFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResponse {
    pub copied: Vec<MoveCopyResult>,
    pub failed: Vec<MoveCopyFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressResponse {
    /// Logical path of the archive.
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompressResponse {
    pub destination: String,
    /// Archive entry names that were extracted.
    pub files: Vec<String>,
}
