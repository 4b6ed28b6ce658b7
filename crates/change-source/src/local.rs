//! Local filesystem half of the change feed: a `notify` watcher with a
//! 1000 ms per-path debounce for create/modify (§4.5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use ignore_filter::IgnoreFilter;
use sync_core::{hashing::sha256_hex, ChangeKind, FileChangeEvent};

const DEBOUNCE: Duration = Duration::from_millis(1000);

/// Watches `root` and emits debounced [`FileChangeEvent`]s on `tx`.
///
/// Owns the underlying `notify` watcher and a per-path debounce table;
/// dropping the returned handle stops watching.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    _debounce_task: tokio::task::JoinHandle<()>,
}

struct PendingEdit {
    kind: ChangeKind,
    path: PathBuf,
    generation: u64,
}

impl LocalWatcher {
    pub fn spawn(
        root: PathBuf,
        ignore: Arc<IgnoreFilter>,
        tx: mpsc::Sender<FileChangeEvent>,
    ) -> notify::Result<Self> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let generations: Arc<Mutex<HashMap<PathBuf, u64>>> = Arc::new(Mutex::new(HashMap::new()));
        let root_for_task = root.clone();

        let debounce_task = tokio::spawn(async move {
            let mut inflight: HashMap<PathBuf, tokio::task::JoinHandle<()>> = HashMap::new();

            while let Some(event) = raw_rx.recv().await {
                for path in event.paths.iter().filter(|p| is_markdown(p)) {
                    if ignore.should_ignore(&relative_path(&root_for_task, path)) {
                        continue;
                    }

                    match classify(&event.kind) {
                        Some(ChangeKind::Delete) => {
                            if let Some(handle) = inflight.remove(path) {
                                handle.abort();
                            }
                            let _ = tx.send(FileChangeEvent::delete(path.clone(), now_ms())).await;
                        }
                        Some(kind @ (ChangeKind::Create | ChangeKind::Modify)) => {
                            if let Some(handle) = inflight.remove(path) {
                                handle.abort();
                            }
                            let generation = bump_generation(&generations, path);
                            let handle = spawn_debounced_upsert(
                                PendingEdit { kind, path: path.clone(), generation },
                                generations.clone(),
                                tx.clone(),
                            );
                            inflight.insert(path.clone(), handle);
                        }
                        Some(ChangeKind::Rename) | None => {}
                    }
                }

                if let Some((old, new)) = rename_pair(&event) {
                    let _ = tx.send(FileChangeEvent::rename(old, new, now_ms())).await;
                }
            }
        });

        Ok(Self { _watcher: watcher, _debounce_task: debounce_task })
    }
}

fn spawn_debounced_upsert(
    pending: PendingEdit,
    generations: Arc<Mutex<HashMap<PathBuf, u64>>>,
    tx: mpsc::Sender<FileChangeEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(DEBOUNCE).await;

        let still_current = generations
            .lock()
            .expect("lock poisoned")
            .get(&pending.path)
            .is_some_and(|g| *g == pending.generation);
        if !still_current {
            return;
        }

        let Ok(content) = tokio::fs::read_to_string(&pending.path).await else {
            return;
        };
        let hash = sha256_hex(content.as_bytes());
        let event = FileChangeEvent::upsert(pending.kind, pending.path, hash, now_ms());
        let _ = tx.send(event).await;
    })
}

fn bump_generation(generations: &Mutex<HashMap<PathBuf, u64>>, path: &Path) -> u64 {
    let mut map = generations.lock().expect("lock poisoned");
    let entry = map.entry(path.to_path_buf()).or_insert(0);
    *entry += 1;
    *entry
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Create),
        EventKind::Modify(notify::event::ModifyKind::Data(_)) => Some(ChangeKind::Modify),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => Some(ChangeKind::Rename),
        EventKind::Remove(_) => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn rename_pair(event: &Event) -> Option<(PathBuf, PathBuf)> {
    if matches!(event.kind, EventKind::Modify(notify::event::ModifyKind::Name(notify::event::RenameMode::Both)))
        && event.paths.len() == 2
    {
        Some((event.paths[0].clone(), event.paths[1].clone()))
    } else {
        None
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("md")).unwrap_or(false)
}

fn relative_path(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            warn!(error = %e, "system clock before unix epoch");
            0
        })
}
