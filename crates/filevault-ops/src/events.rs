//! Domain events and the in-process bus that fans them out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use filevault_core::{Actor, CompressResponse, DecompressResponse, JobUpdate, MoveCopyResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default broadcast capacity for [`EventBus`].
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something that happened to a file or a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "file.moved")]
    FileMoved(MoveCopyResult),
    #[serde(rename = "file.copied")]
    FileCopied(MoveCopyResult),
    #[serde(rename = "file.deleted")]
    FileDeleted { path: String, trash_id: Uuid },
    #[serde(rename = "file.restored")]
    FileRestored { path: String, trash_id: Uuid },
    #[serde(rename = "file.compressed")]
    FileCompressed(CompressResponse),
    #[serde(rename = "file.decompressed")]
    FileDecompressed(DecompressResponse),
    #[serde(rename = "job.started")]
    JobStarted(JobUpdate),
    #[serde(rename = "job.progress")]
    JobProgress(JobUpdate),
    #[serde(rename = "job.completed")]
    JobCompleted(JobUpdate),
    #[serde(rename = "job.failed")]
    JobFailed(JobUpdate),
}

impl Event {
    /// Dotted event name, e.g. `file.moved`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileMoved(_) => "file.moved",
            Self::FileCopied(_) => "file.copied",
            Self::FileDeleted { .. } => "file.deleted",
            Self::FileRestored { .. } => "file.restored",
            Self::FileCompressed(_) => "file.compressed",
            Self::FileDecompressed(_) => "file.decompressed",
            Self::JobStarted(_) => "job.started",
            Self::JobProgress(_) => "job.progress",
            Self::JobCompleted(_) => "job.completed",
            Self::JobFailed(_) => "job.failed",
        }
    }
}

/// Event plus delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

/// Fire-and-forget event destination.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event, actor: &Actor);
}

/// Broadcast bus assigning sequential ids to published events.
///
/// Publishing never blocks; receivers that fall behind observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a bus with the given broadcast capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish and return the assigned id.
    pub fn send(&self, event: Event, actor: &Actor) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let actor_id = (!actor.username.is_empty()).then(|| actor.username.clone());
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            actor_id,
            event,
        };

        // No receivers is not an error for a fire-and-forget bus.
        let _ = self.sender.send(envelope);
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: Event, actor: &Actor) {
        self.send(event, actor);
    }
}
