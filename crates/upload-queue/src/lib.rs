//! Per-path coalesced upload queue with exponential backoff (§4.6).

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use sync_core::{Clock, EventBus, SyncEvent, UploadQueueItem};

/// Consecutive failures after which an item is dropped and the engine is
/// told to stop retrying it (§4.6 invariant 3).
pub const MAX_ATTEMPTS: u32 = 5;

fn backoff_ms(attempts: u32) -> u64 {
    2u64.saturating_pow(attempts) * 1000
}

/// A per-path map of items awaiting upload. Safe to share behind an `Arc`;
/// callers add/remove items via message-style methods rather than holding
/// the lock across an await.
pub struct UploadQueue {
    items: Mutex<HashMap<PathBuf, UploadQueueItem>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    paused: Mutex<bool>,
}

impl UploadQueue {
    pub fn new(clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self { items: Mutex::new(HashMap::new()), clock, events, paused: Mutex::new(false) }
    }

    /// Adds or replaces the item for `event`'s path, resetting its retry
    /// clock to "ready now" (§4.6 invariant 1).
    pub fn enqueue(&self, event: sync_core::FileChangeEvent) {
        let path = event.path.clone();
        let item = UploadQueueItem::new(event, self.clock.now_ms());
        self.items.lock().expect("lock poisoned").insert(path, item);
        self.publish_count();
    }

    pub fn remove(&self, path: &Path) {
        self.items.lock().expect("lock poisoned").remove(path);
        self.publish_count();
    }

    /// Clears the retry state for a successful upload.
    pub fn mark_success(&self, path: &Path) {
        self.remove(path);
        self.events.publish(SyncEvent::UploadSuccess { path: path_string(path) });
    }

    /// Records a failed attempt, applying exponential backoff or removing
    /// the item permanently after [`MAX_ATTEMPTS`].
    pub fn mark_failure(&self, path: &Path, error: String) {
        let mut items = self.items.lock().expect("lock poisoned");
        let Some(item) = items.get_mut(path) else { return };
        item.attempts += 1;
        item.last_error = Some(error.clone());

        if item.attempts >= MAX_ATTEMPTS {
            warn!(path = %path.display(), attempts = item.attempts, "upload permanently failed");
            items.remove(path);
            drop(items);
            self.events.publish(SyncEvent::UploadPermanentFailure {
                path: path_string(path),
                last_error: error,
            });
        } else {
            item.next_retry_at_ms = self.clock.now_ms() + backoff_ms(item.attempts);
            drop(items);
            self.events.publish(SyncEvent::UploadRetry {
                path: path_string(path),
                attempt: item_attempts(self, path),
            });
        }
        self.publish_count();
    }

    pub fn pause(&self) {
        *self.paused.lock().expect("lock poisoned") = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().expect("lock poisoned") = false;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().expect("lock poisoned")
    }

    /// All items currently tracked, regardless of retry readiness.
    pub fn pending(&self) -> Vec<UploadQueueItem> {
        self.items.lock().expect("lock poisoned").values().cloned().collect()
    }

    /// Items whose `next_retry_at_ms` has arrived, as picked by the 2 s tick.
    pub fn ready_for_upload(&self) -> Vec<UploadQueueItem> {
        if self.is_paused() {
            return Vec::new();
        }
        let now = self.clock.now_ms();
        self.items
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|item| item.next_retry_at_ms <= now)
            .cloned()
            .collect()
    }

    fn publish_count(&self) {
        let pending = self.items.lock().expect("lock poisoned").len();
        info!(pending, "upload queue size changed");
        self.events.publish(SyncEvent::QueueChange { pending: pending as u32 });
    }
}

fn item_attempts(queue: &UploadQueue, path: &Path) -> u32 {
    queue.items.lock().expect("lock poisoned").get(path).map(|i| i.attempts).unwrap_or(0)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{ChangeKind, FileChangeEvent, VirtualClock};

    fn queue() -> (UploadQueue, Arc<VirtualClock>) {
        let clock = VirtualClock::new(0);
        let queue = UploadQueue::new(clock.clone(), EventBus::default());
        (queue, clock)
    }

    #[test]
    fn enqueue_replaces_existing_item_for_same_path() {
        let (queue, _clock) = queue();
        queue.enqueue(FileChangeEvent::upsert(ChangeKind::Create, "a.md".into(), "h1".into(), 0));
        queue.enqueue(FileChangeEvent::upsert(ChangeKind::Modify, "a.md".into(), "h2".into(), 1));
        assert_eq!(queue.pending().len(), 1);
        assert_eq!(queue.pending()[0].event.content_hash.as_deref(), Some("h2"));
    }

    #[test]
    fn success_removes_item() {
        let (queue, _clock) = queue();
        queue.enqueue(FileChangeEvent::delete("a.md".into(), 0));
        queue.mark_success(Path::new("a.md"));
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn failure_applies_exponential_backoff() {
        let (queue, clock) = queue();
        queue.enqueue(FileChangeEvent::delete("a.md".into(), 0));
        queue.mark_failure(Path::new("a.md"), "timeout".into());

        let item = &queue.pending()[0];
        assert_eq!(item.attempts, 1);
        assert_eq!(item.next_retry_at_ms, clock.now_ms() + 2_000);
    }

    #[test]
    fn item_is_dropped_after_max_attempts() {
        let (queue, _clock) = queue();
        queue.enqueue(FileChangeEvent::delete("a.md".into(), 0));
        for _ in 0..MAX_ATTEMPTS {
            queue.mark_failure(Path::new("a.md"), "timeout".into());
        }
        assert!(queue.pending().is_empty());
    }

    #[test]
    fn ready_for_upload_respects_retry_clock_and_pause() {
        let (queue, clock) = queue();
        queue.enqueue(FileChangeEvent::delete("a.md".into(), 0));
        queue.mark_failure(Path::new("a.md"), "timeout".into());

        assert!(queue.ready_for_upload().is_empty());
        clock.advance_ms(2_000);
        assert_eq!(queue.ready_for_upload().len(), 1);

        queue.pause();
        assert!(queue.ready_for_upload().is_empty());
        queue.resume();
        assert_eq!(queue.ready_for_upload().len(), 1);
    }
}
