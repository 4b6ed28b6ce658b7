//! Bearer token persistence and refresh for the sync client (§5).
//!
//! Tokens are opaque to this crate except for an optional JWT-shaped `exp`
//! claim, read without verifying any signature — the server is the only
//! party that needs to trust the token, this crate only needs to know when
//! to pre-emptively refresh it.

#![deny(unsafe_code)]

mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use sync_core::{Clock, SyncError, SyncResult};

pub use storage::default_data_dir;

/// Default lead time before expiry at which [`TokenRefresher`] proactively refreshes.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Persisted access/refresh token pair plus the account identity they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub user_email: String,
    pub device_id: String,
    pub obtained_at_ms: u64,
}

impl TokenSet {
    /// Decodes the `exp` claim (Unix seconds) from `access_token` without
    /// verifying its signature. Returns `None` for any non-JWT or
    /// malformed token — such tokens are treated as never pre-emptively
    /// expiring; only a `401` from the server forces a refresh.
    fn exp_ms(&self) -> Option<u64> {
        let payload = self.access_token.split('.').nth(1)?;
        let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
        claims.get("exp")?.as_u64().map(|secs| secs * 1000)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.exp_ms().is_some_and(|exp| now_ms >= exp)
    }

    pub fn is_expiring_soon(&self, now_ms: u64, buffer: Duration) -> bool {
        self.exp_ms().is_some_and(|exp| now_ms + buffer.as_millis() as u64 >= exp)
    }
}

/// Thread-safe holder of the current token set, backed by a JSON file.
pub struct TokenStore {
    data_dir: PathBuf,
    current: RwLock<Option<TokenSet>>,
}

impl TokenStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir, current: RwLock::new(None) }
    }

    pub fn at_default_location() -> SyncResult<Self> {
        Ok(Self::new(default_data_dir()?))
    }

    /// Loads whatever was last persisted into memory. Safe to call more
    /// than once; a missing file just leaves the in-memory state empty.
    pub async fn load_from_disk(&self) -> SyncResult<()> {
        let loaded = storage::load(&self.data_dir)?;
        *self.current.write().await = loaded;
        Ok(())
    }

    pub async fn current(&self) -> Option<TokenSet> {
        self.current.read().await.clone()
    }

    pub async fn set(&self, tokens: TokenSet) -> SyncResult<()> {
        storage::save(&self.data_dir, &tokens)?;
        *self.current.write().await = Some(tokens);
        Ok(())
    }

    pub async fn clear(&self) -> SyncResult<()> {
        storage::delete(&self.data_dir)?;
        *self.current.write().await = None;
        Ok(())
    }

    /// Reads the locally cached wrapped master key, if any was ever stored
    /// here by [`Self::save_key_material`]. Does not touch the server.
    pub fn load_key_material(&self) -> SyncResult<Option<crypto_core::WrappedKeyMaterial>> {
        storage::load_key_material(&self.data_dir)
    }

    /// Persists the wrapped master key fetched from `GET
    /// /security/keys/sync`, so future restarts can unlock without a
    /// network round trip.
    pub fn save_key_material(&self, material: &crypto_core::WrappedKeyMaterial) -> SyncResult<()> {
        storage::save_key_material(&self.data_dir, material)
    }

    pub fn clear_key_material(&self) -> SyncResult<bool> {
        storage::delete_key_material(&self.data_dir)
    }
}

/// What [`RefreshClient::refresh`] returns: a new access/refresh token pair.
#[derive(serde::Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// The network side of a refresh, implemented by `remote-api` so this crate
/// never depends on an HTTP client directly.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> SyncResult<RefreshedTokens>;
}

/// Coordinates access-token refresh so concurrent callers never trigger more
/// than one refresh request at a time.
pub struct TokenRefresher<C: RefreshClient> {
    store: Arc<TokenStore>,
    client: C,
    clock: Arc<dyn Clock>,
    refresh_lock: Mutex<()>,
}

impl<C: RefreshClient> TokenRefresher<C> {
    pub fn new(store: Arc<TokenStore>, client: C, clock: Arc<dyn Clock>) -> Self {
        Self { store, client, clock, refresh_lock: Mutex::new(()) }
    }

    /// Returns a usable access token, refreshing first if it is expired or
    /// about to be within [`DEFAULT_EXPIRY_BUFFER`].
    pub async fn ensure_valid_token(&self) -> SyncResult<String> {
        let tokens = self.store.current().await.ok_or(SyncError::NotAuthenticated)?;
        if !tokens.is_expiring_soon(self.clock.now_ms(), DEFAULT_EXPIRY_BUFFER) {
            return Ok(tokens.access_token);
        }
        self.refresh_single_flight().await
    }

    async fn refresh_single_flight(&self) -> SyncResult<String> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        let tokens = self.store.current().await.ok_or(SyncError::NotAuthenticated)?;
        if !tokens.is_expiring_soon(self.clock.now_ms(), DEFAULT_EXPIRY_BUFFER) {
            return Ok(tokens.access_token);
        }

        match self.client.refresh(&tokens.refresh_token).await {
            Ok(refreshed) => {
                let updated = TokenSet {
                    access_token: refreshed.access_token,
                    refresh_token: refreshed.refresh_token,
                    user_email: tokens.user_email,
                    device_id: tokens.device_id,
                    obtained_at_ms: self.clock.now_ms(),
                };
                self.store.set(updated.clone()).await?;
                Ok(updated.access_token)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing stored credentials");
                self.store.clear().await?;
                Err(SyncError::TokenRefreshFailed(e.to_string()))
            }
        }
    }

    /// Runs `f` with a valid access token. If `f` reports
    /// [`SyncError::NotAuthenticated`] (the server's 401), refreshes once
    /// and retries `f` exactly one more time.
    pub async fn with_auth<F, Fut, T>(&self, f: F) -> SyncResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = SyncResult<T>>,
    {
        let token = self.ensure_valid_token().await?;
        match f(token).await {
            Err(SyncError::NotAuthenticated) => {
                let token = self.refresh_single_flight().await?;
                f(token).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sync_core::VirtualClock;

    fn jwt_with_exp(exp_secs: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp_secs}}}"));
        format!("{header}.{payload}.signature")
    }

    fn tokens(access_token: String) -> TokenSet {
        TokenSet {
            access_token,
            refresh_token: "refresh".into(),
            user_email: "user@example.com".into(),
            device_id: "device-1".into(),
            obtained_at_ms: 0,
        }
    }

    #[test]
    fn opaque_token_is_never_considered_expiring() {
        let t = tokens("opaque-token".into());
        assert!(!t.is_expired(u64::MAX));
        assert!(!t.is_expiring_soon(u64::MAX, DEFAULT_EXPIRY_BUFFER));
    }

    #[test]
    fn jwt_exp_drives_expiry_checks() {
        let t = tokens(jwt_with_exp(100));
        assert!(!t.is_expired(50_000));
        assert!(t.is_expired(150_000));
        assert!(t.is_expiring_soon(40_000, Duration::from_secs(61)));
    }

    struct CountingRefreshClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshClient for CountingRefreshClient {
        async fn refresh(&self, _refresh_token: &str) -> SyncResult<RefreshedTokens> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshedTokens {
                access_token: jwt_with_exp(1_000_000),
                refresh_token: "new-refresh".into(),
            })
        }
    }

    #[tokio::test]
    async fn ensure_valid_token_refreshes_only_when_expiring() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path().to_path_buf()));
        store.set(tokens(jwt_with_exp(100))).await.unwrap();

        let clock = VirtualClock::new(50_000);
        let client = CountingRefreshClient { calls: AtomicUsize::new(0) };
        let refresher = TokenRefresher::new(store.clone(), client, clock);

        let token = refresher.ensure_valid_token().await.unwrap();
        assert!(token.starts_with("eyJ") || token.contains('.'));
        assert_eq!(refresher.client.calls.load(Ordering::SeqCst), 1);

        // Second call should not refresh again: the stored token is now far from expiry.
        refresher.ensure_valid_token().await.unwrap();
        assert_eq!(refresher.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_auth_retries_once_after_not_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path().to_path_buf()));
        store.set(tokens(jwt_with_exp(1_000_000))).await.unwrap();

        let clock = VirtualClock::new(0);
        let client = CountingRefreshClient { calls: AtomicUsize::new(0) };
        let refresher = TokenRefresher::new(store, client, clock);

        let attempt = AtomicUsize::new(0);
        let result = refresher
            .with_auth(|_token| {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SyncError::NotAuthenticated)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(refresher.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_clears_stored_tokens() {
        struct FailingClient;
        #[async_trait]
        impl RefreshClient for FailingClient {
            async fn refresh(&self, _refresh_token: &str) -> SyncResult<RefreshedTokens> {
                Err(SyncError::Remote("server unreachable".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path().to_path_buf()));
        store.set(tokens(jwt_with_exp(100))).await.unwrap();

        let clock = VirtualClock::new(50_000);
        let refresher = TokenRefresher::new(store.clone(), FailingClient, clock);

        let err = refresher.ensure_valid_token().await.unwrap_err();
        assert!(matches!(err, SyncError::TokenRefreshFailed(_)));
        assert!(store.current().await.is_none());
    }
}
