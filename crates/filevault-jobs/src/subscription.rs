//! Live progress subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use filevault_core::JobUpdate;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A stream of [`JobUpdate`]s for one job.
///
/// The stream ends once the job reaches a terminal state. Dropping the
/// subscription unsubscribes it; the job keeps running.
#[derive(Debug)]
pub struct JobSubscription {
    job_id: Uuid,
    slot_id: u64,
    receiver: mpsc::Receiver<JobUpdate>,
    missed: Arc<AtomicU64>,
    table: Weak<SubscriberTable>,
}

impl JobSubscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next update, or `None` once the job has finished.
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        self.receiver.recv().await
    }

    /// Updates dropped because this subscriber's buffer was full.
    pub fn missed_updates(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.unsubscribe(self.job_id, self.slot_id);
        }
    }
}

struct Slot {
    id: u64,
    sender: mpsc::Sender<JobUpdate>,
    missed: Arc<AtomicU64>,
}

impl Slot {
    /// Non-blocking send. Returns false once the subscriber is gone.
    fn offer(&self, job_id: Uuid, update: JobUpdate) -> bool {
        match self.sender.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let missed = self.missed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(%job_id, missed, "Subscriber buffer full, dropping update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Subscribers per job.
pub(crate) struct SubscriberTable {
    buffer: usize,
    next_slot: AtomicU64,
    slots: Mutex<HashMap<Uuid, Vec<Slot>>>,
}

impl SubscriberTable {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_slot: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber for `job_id`.
    ///
    /// `current` is consulted under the table lock. If it returns a terminal
    /// update, the subscription receives only that snapshot and is closed;
    /// otherwise it is registered for live updates. Holding the lock across
    /// both steps orders this against [`Self::finish`].
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        job_id: Uuid,
        current: impl FnOnce() -> Option<JobUpdate>,
    ) -> JobSubscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let missed = Arc::new(AtomicU64::new(0));
        let id = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let subscription = JobSubscription {
            job_id,
            slot_id: id,
            receiver,
            missed: Arc::clone(&missed),
            table: Arc::downgrade(self),
        };

        let mut slots = self.slots();
        match current() {
            Some(terminal) => {
                // The channel is fresh, so this cannot be full.
                let _ = sender.try_send(terminal);
            }
            None => slots.entry(job_id).or_default().push(Slot { id, sender, missed }),
        }
        subscription
    }

    /// Push an update to every live subscriber of `job_id`.
    pub(crate) fn notify(&self, job_id: Uuid, update: JobUpdate) {
        let mut slots = self.slots();
        if let Some(subscribers) = slots.get_mut(&job_id) {
            subscribers.retain(|slot| slot.offer(job_id, update));
            if subscribers.is_empty() {
                slots.remove(&job_id);
            }
        }
    }

    fn unsubscribe(&self, job_id: Uuid, slot_id: u64) {
        let mut slots = self.slots();
        if let Some(subscribers) = slots.get_mut(&job_id) {
            subscribers.retain(|slot| slot.id != slot_id);
            if subscribers.is_empty() {
                slots.remove(&job_id);
            }
        }
    }

    /// Push the final update and close every subscriber of `job_id`.
    pub(crate) fn finish(&self, job_id: Uuid, update: JobUpdate) {
        let subscribers = self.slots().remove(&job_id).unwrap_or_default();
        for slot in &subscribers {
            slot.offer(job_id, update);
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.slots().get(&job_id).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberTable")
            .field("buffer", &self.buffer)
            .field("jobs", &self.slots().len())
            .finish()
    }
}
