//! Unified local + remote change feed (§4.5).

#![deny(unsafe_code)]

mod local;
mod remote;

pub use local::LocalWatcher;
pub use remote::RemoteSignal;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use ignore_filter::IgnoreFilter;
use remote_api::RemoteEvents;
use sync_core::FileChangeEvent;

/// One entry on the unified feed.
#[derive(Debug, Clone)]
pub enum ChangeSourceEvent {
    File(FileChangeEvent),
    Signal(RemoteSignal),
}

/// Guard returned by [`ChangeSource::pause_guard`]; resumes on drop so a
/// pause is never left dangling across an early return or a panic unwind.
pub struct PauseGuard {
    paused: Arc<AtomicBool>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// Owns the local watcher and the remote event pump, merging both into one
/// receiver. Reconciliation pauses delivery around its own programmatic
/// writes to avoid self-triggered loops.
pub struct ChangeSource {
    rx: mpsc::Receiver<ChangeSourceEvent>,
    paused: Arc<AtomicBool>,
    _local: Option<LocalWatcher>,
    _remote_task: tokio::task::JoinHandle<()>,
}

impl ChangeSource {
    /// Starts watching `root` locally and pumping `remote_events`, merging
    /// both into one channel gated by the pause flag.
    pub fn start(
        root: PathBuf,
        ignore: Arc<IgnoreFilter>,
        remote_events: Box<dyn RemoteEvents>,
    ) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel(256);
        let paused = Arc::new(AtomicBool::new(false));

        let (local_tx, mut local_rx) = mpsc::channel(256);
        let local = LocalWatcher::spawn(root, ignore, local_tx)?;

        let forward_tx = tx.clone();
        let forward_paused = paused.clone();
        tokio::spawn(async move {
            while let Some(event) = local_rx.recv().await {
                if forward_paused.load(Ordering::SeqCst) {
                    continue;
                }
                if forward_tx.send(ChangeSourceEvent::File(event)).await.is_err() {
                    return;
                }
            }
        });

        let remote_tx = tx.clone();
        let remote_paused = paused.clone();
        let remote_task = tokio::spawn(async move {
            remote::pump(remote_events, |signal| {
                if !remote_paused.load(Ordering::SeqCst) {
                    let _ = remote_tx.try_send(ChangeSourceEvent::Signal(signal));
                }
            })
            .await;
        });

        Ok(Self { rx, paused, _local: Some(local), _remote_task: remote_task })
    }

    pub async fn recv(&mut self) -> Option<ChangeSourceEvent> {
        self.rx.recv().await
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("change source paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("change source resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pauses now and returns a guard that resumes on drop, so callers
    /// performing a programmatic write can't forget to resume on an error
    /// path.
    pub fn pause_guard(&self) -> PauseGuard {
        self.paused.store(true, Ordering::SeqCst);
        PauseGuard { paused: self.paused.clone() }
    }

    /// A cheap, cloneable pause/resume handle that outlives a `&self`
    /// borrow, for callers that need to move the `ChangeSource` itself into
    /// a dedicated receive loop while still controlling its pause flag from
    /// elsewhere.
    pub fn pause_controller(&self) -> PauseController {
        PauseController { paused: self.paused.clone() }
    }
}

/// See [`ChangeSource::pause_controller`].
#[derive(Clone)]
pub struct PauseController {
    paused: Arc<AtomicBool>,
}

impl PauseController {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_api::FakeRemoteEvents;

    #[tokio::test]
    async fn paused_local_events_are_dropped_not_queued() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = Arc::new(IgnoreFilter::new(&[]).unwrap());
        let (_tx, fake_events) = FakeRemoteEvents::channel();

        let mut source =
            ChangeSource::start(dir.path().to_path_buf(), ignore, Box::new(fake_events)).unwrap();
        source.pause();
        assert!(source.is_paused());

        tokio::fs::write(dir.path().join("a.md"), b"hello").await.unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_millis(1200), source.recv()).await;
        assert!(result.is_err(), "paused source should not deliver the debounced event in time");
    }

    #[tokio::test]
    async fn pause_guard_resumes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = Arc::new(IgnoreFilter::new(&[]).unwrap());
        let (_tx, fake_events) = FakeRemoteEvents::channel();
        let source =
            ChangeSource::start(dir.path().to_path_buf(), ignore, Box::new(fake_events)).unwrap();

        {
            let _guard = source.pause_guard();
            assert!(source.is_paused());
        }
        assert!(!source.is_paused());
    }

    #[tokio::test]
    async fn remote_note_update_surfaces_as_a_signal() {
        let dir = tempfile::tempdir().unwrap();
        let ignore = Arc::new(IgnoreFilter::new(&[]).unwrap());
        let (tx, fake_events) = FakeRemoteEvents::channel();
        let mut source =
            ChangeSource::start(dir.path().to_path_buf(), ignore, Box::new(fake_events)).unwrap();

        let note = sync_core::Note {
            id: "n1".into(),
            workspace_id: "w1".into(),
            parent_id: None,
            kind: sync_core::NoteKind::File,
            encrypted_title: String::new(),
            encrypted_content: String::new(),
            nonce: None,
            encryption_algo: sync_core::EncryptionAlgo::Aes256GcmEmbedded,
            created_at: "t".into(),
            updated_at: "t".into(),
            version: 1,
            content_hash: "h1".into(),
            is_deleted: false,
            last_edit_device: None,
        };
        tx.send(Ok(remote_api::WsEvent::NoteUpdate { note })).await.unwrap();

        match source.recv().await {
            Some(ChangeSourceEvent::Signal(RemoteSignal::NoteUpdated { note_id })) => {
                assert_eq!(note_id, "n1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
