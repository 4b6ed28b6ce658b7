//! Transport boundary to the sync server: HTTP for request/response
//! operations, WebSocket for the server-pushed change feed (§6).
//!
//! Everything the rest of the engine touches goes through the
//! [`RemoteApi`] and [`RemoteEvents`] traits so that `reconciliation-engine`
//! and `change-source` can be exercised against [`FakeRemote`] without a
//! network. Account-level operations (login/register/device/workspace
//! management, §6) have no counterpart in the sync pipeline itself, so they
//! live on the separate [`AccountApi`] trait, implemented only by
//! [`HttpRemoteApi`].

#![deny(unsafe_code)]

mod http;
mod ws;

pub use http::{
    AccountApi, BatchDiffResult, ConflictInfo, DeviceInfo, HttpRemoteApi, LocalNoteSummary,
    LoginResult, ManifestResult, WorkspaceInfo,
};
pub use ws::{RemoteEvents, WsEvent, WsRemoteEvents};

use async_trait::async_trait;
use crypto_core::{EncryptedNote, WrappedKeyMaterial};
use sync_core::{Note, SyncResult};

/// Request/response surface of the sync server (§6 endpoint table) that the
/// sync pipeline itself drives: notes, manifests/diffs, and the wrapped
/// master key's server mirror.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_manifest(&self, token: &str, workspace_id: &str) -> SyncResult<ManifestResult>;

    async fn batch_diff(
        &self,
        token: &str,
        workspace_id: &str,
        local_notes: &[LocalNoteSummary],
    ) -> SyncResult<BatchDiffResult>;

    async fn get_note(&self, token: &str, note_id: &str) -> SyncResult<Note>;

    async fn create_note(
        &self,
        token: &str,
        workspace_id: &str,
        blob: &EncryptedNote,
    ) -> SyncResult<Note>;

    async fn update_note(
        &self,
        token: &str,
        note_id: &str,
        blob: &EncryptedNote,
        expected_version: u64,
    ) -> SyncResult<Note>;

    async fn delete_note(&self, token: &str, note_id: &str) -> SyncResult<()>;

    /// Mirrors freshly-generated key material to the server (`POST
    /// /security/keys/setup`), so other devices can fetch it after a
    /// password-only login.
    async fn setup_keys(&self, token: &str, material: &WrappedKeyMaterial) -> SyncResult<()>;

    /// Fetches the account's wrapped key material (`GET
    /// /security/keys/sync`). `None` if the account has never called
    /// `setup_keys`.
    async fn fetch_key_material(&self, token: &str) -> SyncResult<Option<WrappedKeyMaterial>>;
}

#[cfg(any(test, feature = "fake"))]
mod fake;
#[cfg(any(test, feature = "fake"))]
pub use fake::{FakeRemote, FakeRemoteEvents};
