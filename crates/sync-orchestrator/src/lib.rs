//! Owns the lifetime of every other component (§4.9).
//!
//! `Orchestrator::start` is the only place that decides whether the
//! pipeline is allowed to run at all: it requires a valid token and an
//! unlocked [`CryptoCore`], attempting a password-based unlock from a
//! cached (never persisted) password before giving up and surfacing
//! `encryption-required`/`auth-required` to the caller.

#![deny(unsafe_code)]

mod config;

pub use config::{default_config_dir, SyncConfig};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use change_source::{ChangeSource, ChangeSourceEvent, PauseController, RemoteSignal};
use crypto_core::CryptoCore;
use ignore_filter::IgnoreFilter;
use local_index::LocalIndex;
use reconciliation_engine::{PauseHandle, ReconciliationEngine};
use remote_api::{RemoteApi, RemoteEvents, WsRemoteEvents};
use sync_core::{Clock, EventBus, Filesystem, SyncEvent, SyncResult};
use telemetry::error_metrics;
use token_store::TokenStore;
use upload_queue::UploadQueue;

const COMPONENT: &str = "sync_orchestrator";

/// How often the drift scan rehashes locally-mapped files (§4.9).
pub const DRIFT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
/// How often the upload-queue drain loop wakes up to retry ready items.
pub const UPLOAD_DRAIN_INTERVAL: Duration = Duration::from_secs(2);

struct ChangeSourcePause(PauseController);

impl PauseHandle for ChangeSourcePause {
    fn pause(&self) {
        self.0.pause();
    }

    fn resume(&self) {
        self.0.resume();
    }
}

/// Everything `Orchestrator::new` needs to wire up one running sync engine.
pub struct OrchestratorDeps {
    pub config_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub token_store: Arc<TokenStore>,
    pub crypto: Arc<CryptoCore>,
    pub remote: Arc<dyn RemoteApi>,
    pub ws_url: String,
    pub local_index: LocalIndex,
    pub filesystem: Arc<dyn Filesystem>,
    pub ignore: Arc<IgnoreFilter>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    config_dir: PathBuf,
    config: Mutex<SyncConfig>,
    workspace_root: PathBuf,
    token_store: Arc<TokenStore>,
    crypto: Arc<CryptoCore>,
    cached_password: Mutex<Option<String>>,
    remote: Arc<dyn RemoteApi>,
    ws_url: String,
    local_index: LocalIndex,
    filesystem: Arc<dyn Filesystem>,
    ignore: Arc<IgnoreFilter>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    upload_queue: Arc<UploadQueue>,
    reconciliation: Mutex<Option<Arc<ReconciliationEngine>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    last_synced_at: Mutex<Option<String>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> SyncResult<Arc<Self>> {
        let config = config::load(&deps.config_dir)?;
        let events = EventBus::default();
        let upload_queue = Arc::new(UploadQueue::new(deps.clock.clone(), events.clone()));

        Ok(Arc::new(Self {
            config_dir: deps.config_dir,
            config: Mutex::new(config),
            workspace_root: deps.workspace_root,
            token_store: deps.token_store,
            crypto: deps.crypto,
            cached_password: Mutex::new(None),
            remote: deps.remote,
            ws_url: deps.ws_url,
            local_index: deps.local_index,
            filesystem: deps.filesystem,
            ignore: deps.ignore,
            events,
            clock: deps.clock,
            upload_queue,
            reconciliation: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            last_synced_at: Mutex::new(None),
        }))
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn config(&self) -> SyncConfig {
        self.config.lock().expect("lock poisoned").clone()
    }

    pub fn update_config(&self, f: impl FnOnce(&mut SyncConfig)) -> SyncResult<()> {
        let mut config = self.config.lock().expect("lock poisoned");
        f(&mut config);
        config::save(&self.config_dir, &config)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Caches a password in memory for a locked-encryption unlock attempt
    /// on the next `start()`. Never written to disk.
    pub fn cache_password(&self, password: String) {
        *self.cached_password.lock().expect("lock poisoned") = Some(password);
    }

    pub fn clear_cached_password(&self) {
        self.cached_password.lock().expect("lock poisoned").take();
    }

    /// First-time encryption setup (§4.1): generates a master key wrapped
    /// under `password`, mirrors the wrapped material to the server so
    /// other devices can fetch it, persists it locally, and caches the
    /// password so the next `start()` can unlock without prompting again.
    pub async fn setup_encryption(&self, password: &str) -> SyncResult<()> {
        let tokens = self.token_store.current().await.ok_or(sync_core::SyncError::NotAuthenticated)?;
        let material = self.crypto.setup(password);
        self.remote.setup_keys(&tokens.access_token, &material).await?;
        self.token_store.save_key_material(&material)?;
        self.cache_password(password.to_string());
        Ok(())
    }

    /// Starts the pipeline if a token and an unlocked key are available.
    /// Returns `Ok(())` even when it declines to start — the caller reads
    /// `encryption-required`/`auth-required` off the event bus to find out
    /// why.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(tokens) = self.token_store.current().await else {
            self.running.store(false, Ordering::SeqCst);
            self.events.publish(SyncEvent::AuthRequired);
            return Ok(());
        };

        if !self.crypto.is_unlocked() && !self.try_unlock(&tokens.access_token).await? {
            self.running.store(false, Ordering::SeqCst);
            self.events.publish(SyncEvent::EncryptionRequired);
            return Ok(());
        }

        let Some(workspace_id) = self.config().current_workspace_id else {
            self.running.store(false, Ordering::SeqCst);
            warn!("start requested with no linked workspace");
            return Ok(());
        };

        let remote_events: Box<dyn RemoteEvents> =
            Box::new(WsRemoteEvents::connect(self.ws_url.clone(), tokens.access_token.clone()));
        let change_source =
            ChangeSource::start(self.workspace_root.clone(), self.ignore.clone(), remote_events)
                .map_err(|e| sync_core::SyncError::SyncTransient(e.to_string()))?;
        let pause = change_source.pause_controller();

        let engine = Arc::new(ReconciliationEngine::new(
            self.local_index.clone(),
            self.crypto.clone(),
            self.filesystem.clone(),
            self.remote.clone(),
            self.upload_queue.clone(),
            self.ignore.clone(),
            self.events.clone(),
            self.workspace_root.clone(),
            Some(Arc::new(ChangeSourcePause(pause))),
        ));
        *self.reconciliation.lock().expect("lock poisoned") = Some(engine.clone());

        self.events.publish(SyncEvent::Connected);
        match engine.reconcile(&tokens.access_token, &workspace_id).await {
            Ok(summary) => self.record_sync_time(summary.sync_time),
            Err(e) => {
                warn!(error = %e, "initial reconciliation failed");
                error_metrics().record(COMPONENT, &e);
                self.events.publish(SyncEvent::SyncError { message: e.to_string() });
            }
        }

        let mut tasks = self.tasks.lock().expect("lock poisoned");
        tasks.push(tokio::spawn(self.clone().change_source_loop(change_source, workspace_id.clone())));
        tasks.push(tokio::spawn(self.clone().upload_drain_loop(workspace_id.clone())));
        tasks.push(tokio::spawn(self.clone().drift_scan_loop(workspace_id)));
        Ok(())
    }

    /// Stops all background tasks, drops the reconciliation engine, and
    /// flushes the last observed sync time so it survives the process
    /// restarting before another reconciliation completes. Safe to call
    /// when not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().expect("lock poisoned").drain(..) {
            task.abort();
        }
        *self.reconciliation.lock().expect("lock poisoned") = None;
        if let Some(sync_time) = self.last_synced_at.lock().expect("lock poisoned").clone() {
            if let Err(e) = self.local_index.put_meta("last_sync_time", &sync_time) {
                warn!(error = %e, "failed to flush last_sync_time on stop");
                error_metrics().record(COMPONENT, &e);
            }
        }
        self.events.publish(SyncEvent::Disconnected);
    }

    /// Attempts to unlock `crypto` from the cached password, trying locally
    /// cached wrapped key material first and falling back to fetching it
    /// from the server (e.g. first login on a new device) before giving up.
    async fn try_unlock(&self, access_token: &str) -> SyncResult<bool> {
        let Some(password) = self.cached_password.lock().expect("lock poisoned").clone() else {
            return Ok(false);
        };
        let material = match self.token_store.load_key_material()? {
            Some(material) => material,
            None => match self.remote.fetch_key_material(access_token).await? {
                Some(material) => {
                    self.token_store.save_key_material(&material)?;
                    material
                }
                None => return Ok(false),
            },
        };
        match self.crypto.restore_from_password(&password, &material) {
            Ok(()) => Ok(true),
            Err(crypto_core::Error::WrongPassword) => Ok(false),
            Err(e) => Err(sync_core::SyncError::Corruption(e.to_string())),
        }
    }

    async fn change_source_loop(self: Arc<Self>, mut source: ChangeSource, workspace_id: String) {
        while self.running.load(Ordering::SeqCst) {
            let Some(event) = source.recv().await else { break };
            match event {
                ChangeSourceEvent::File(change) => {
                    self.upload_queue.enqueue(change);
                }
                ChangeSourceEvent::Signal(RemoteSignal::NoteUpdated { .. })
                | ChangeSourceEvent::Signal(RemoteSignal::NoteDeleted { .. }) => {
                    self.run_reconcile(&workspace_id).await;
                }
                ChangeSourceEvent::Signal(RemoteSignal::Conflict { note_id, path }) => {
                    self.events.publish(SyncEvent::ConflictAdded { path: path.unwrap_or(note_id) });
                    self.run_reconcile(&workspace_id).await;
                }
                ChangeSourceEvent::Signal(RemoteSignal::ReconnectFailed) => {
                    self.events.publish(SyncEvent::ReconnectFailed);
                }
            }
        }
    }

    async fn upload_drain_loop(self: Arc<Self>, workspace_id: String) {
        let mut interval = tokio::time::interval(UPLOAD_DRAIN_INTERVAL);
        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let Some(engine) = self.reconciliation.lock().expect("lock poisoned").clone() else {
                continue;
            };
            let Some(tokens) = self.token_store.current().await else { continue };
            for item in self.upload_queue.ready_for_upload() {
                self.events.publish(SyncEvent::Upload { path: item.event.path.to_string_lossy().into_owned() });
                if let Err(e) = engine.process_upload(&tokens.access_token, &item).await {
                    warn!(path = ?item.event.path, error = %e, "upload attempt failed");
                    error_metrics().record(COMPONENT, &e);
                }
            }
            let _ = &workspace_id;
        }
    }

    async fn drift_scan_loop(self: Arc<Self>, workspace_id: String) {
        let mut interval = tokio::time::interval(DRIFT_SCAN_INTERVAL);
        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            self.scan_for_drift();
            let _ = &workspace_id;
        }
    }

    /// Rehashes every locally-mapped file and enqueues any whose content no
    /// longer matches what was last synced, catching edits the watcher
    /// missed (e.g. made while the process was not running).
    fn scan_for_drift(&self) {
        let mappings = match self.local_index.all_mappings() {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "drift scan could not list mappings");
                error_metrics().record(COMPONENT, &e);
                return;
            }
        };
        for mapping in mappings {
            if !self.filesystem.exists(&mapping.path) {
                continue;
            }
            let Ok(content) = self.filesystem.read(&mapping.path) else { continue };
            let hash = sync_core::hashing::sha256_hex(&content);
            if hash != mapping.content_hash_last_synced {
                info!(path = ?mapping.path, "drift scan found an unsynced edit");
                self.upload_queue.enqueue(sync_core::FileChangeEvent::upsert(
                    sync_core::ChangeKind::Modify,
                    mapping.path,
                    hash,
                    self.clock.now_ms(),
                ));
            }
        }
    }

    async fn run_reconcile(&self, workspace_id: &str) {
        let Some(engine) = self.reconciliation.lock().expect("lock poisoned").clone() else { return };
        let Some(tokens) = self.token_store.current().await else { return };
        match engine.reconcile(&tokens.access_token, workspace_id).await {
            Ok(summary) => self.record_sync_time(summary.sync_time),
            Err(e) => {
                warn!(error = %e, "remote-triggered reconciliation failed");
                error_metrics().record(COMPONENT, &e);
                self.events.publish(SyncEvent::SyncError { message: e.to_string() });
            }
        }
    }

    fn record_sync_time(&self, sync_time: String) {
        if sync_time.is_empty() {
            return;
        }
        *self.last_synced_at.lock().expect("lock poisoned") = Some(sync_time);
    }
}
