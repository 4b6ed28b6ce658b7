//! HTTP side of `RemoteApi` (§6 endpoint table).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crypto_core::{EncryptedNote, WrappedKeyMaterial};
use sync_core::{ManifestEntry, Note, SyncError, SyncResult};
use token_store::{RefreshClient, RefreshedTokens};

use crate::RemoteApi;

/// Server response envelope: either `{data: ...}` or the bare payload.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap(),
        other => other,
    }
}

async fn parse_envelope<T: DeserializeOwned>(response: reqwest::Response) -> SyncResult<T> {
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| SyncError::Remote(e.to_string()))?;
    if !status.is_success() {
        return Err(SyncError::Remote(format!("status {status}: {body}")));
    }
    serde_json::from_value(unwrap_envelope(body)).map_err(|e| SyncError::Remote(e.to_string()))
}

#[derive(Debug, serde::Deserialize)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub user_email: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct ManifestResult {
    pub notes: Vec<ManifestEntry>,
    pub sync_time: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct ConflictInfo {
    pub note_id: String,
    pub path: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct BatchDiffResult {
    pub to_download: Vec<Note>,
    pub to_upload: Vec<String>,
    pub to_delete: Vec<String>,
    pub conflicts: Vec<ConflictInfo>,
    pub sync_time: String,
}

#[derive(Debug, Serialize)]
pub struct LocalNoteSummary {
    pub id: String,
    pub content_hash: String,
    pub version: u64,
}

#[derive(Debug, Serialize)]
struct KdfParams {
    iterations: u32,
}

#[derive(Debug, Serialize)]
struct SetupKeysRequest<'a> {
    encrypted_key: &'a str,
    key_salt: &'a str,
    kdf_params: KdfParams,
    encryption_algo: &'static str,
}

#[derive(Debug, serde::Deserialize)]
struct SyncKeysResponse {
    encrypted_key: String,
    key_salt: String,
    kdf_params: KdfParamsResponse,
}

#[derive(Debug, serde::Deserialize)]
struct KdfParamsResponse {
    iterations: u32,
}

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub last_seen: String,
}

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
}

/// Account-level operations (§6): auth, device, and workspace management.
/// Unlike [`RemoteApi`], nothing in the sync pipeline drives these
/// directly, so only [`HttpRemoteApi`] implements them.
#[async_trait::async_trait]
pub trait AccountApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> SyncResult<LoginResult>;
    async fn register(&self, email: &str, password: &str) -> SyncResult<LoginResult>;
    async fn refresh_tokens(&self, refresh_token: &str) -> SyncResult<RefreshedTokens>;

    async fn register_device(&self, token: &str, name: &str) -> SyncResult<DeviceInfo>;
    async fn list_devices(&self, token: &str) -> SyncResult<Vec<DeviceInfo>>;
    async fn revoke_device(&self, token: &str, device_id: &str) -> SyncResult<()>;

    async fn list_workspaces(&self, token: &str) -> SyncResult<Vec<WorkspaceInfo>>;
    async fn create_workspace(&self, token: &str, name: &str) -> SyncResult<WorkspaceInfo>;
    async fn get_workspace(&self, token: &str, workspace_id: &str) -> SyncResult<WorkspaceInfo>;
    async fn update_workspace(&self, token: &str, workspace_id: &str, name: &str) -> SyncResult<WorkspaceInfo>;
    async fn delete_workspace(&self, token: &str, workspace_id: &str) -> SyncResult<()>;
}

/// Thin `reqwest`-backed implementation of [`RemoteApi`].
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Remote(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authed_post<B: Serialize, T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> SyncResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }
}

fn classify_transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() || e.is_connect() {
        SyncError::SyncTransient(e.to_string())
    } else {
        SyncError::Remote(e.to_string())
    }
}

#[async_trait::async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_manifest(&self, token: &str, workspace_id: &str) -> SyncResult<ManifestResult> {
        let response = self
            .client
            .get(self.url("/sync/manifest"))
            .bearer_auth(token)
            .query(&[("workspace_id", workspace_id)])
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn batch_diff(
        &self,
        token: &str,
        workspace_id: &str,
        local_notes: &[LocalNoteSummary],
    ) -> SyncResult<BatchDiffResult> {
        let body = serde_json::json!({ "workspace_id": workspace_id, "local_notes": local_notes });
        self.authed_post(token, "/sync/batch-diff", &body).await
    }

    async fn get_note(&self, token: &str, note_id: &str) -> SyncResult<Note> {
        let response = self
            .client
            .get(self.url(&format!("/notes/{note_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn create_note(
        &self,
        token: &str,
        workspace_id: &str,
        blob: &crypto_core::EncryptedNote,
    ) -> SyncResult<Note> {
        let body = serde_json::json!({
            "workspace_id": workspace_id,
            "type": "file",
            "encrypted_title": blob.encrypted_title,
            "encrypted_content": blob.encrypted_content,
            "encryption_algo": blob.encryption_algo,
            "nonce": "embedded",
            "content_hash": blob.content_hash,
        });
        self.authed_post(token, "/notes", &body).await
    }

    async fn update_note(
        &self,
        token: &str,
        note_id: &str,
        blob: &crypto_core::EncryptedNote,
        expected_version: u64,
    ) -> SyncResult<Note> {
        let body = serde_json::json!({
            "encrypted_title": blob.encrypted_title,
            "encrypted_content": blob.encrypted_content,
            "encryption_algo": blob.encryption_algo,
            "nonce": "embedded",
            "content_hash": blob.content_hash,
            "expected_version": expected_version,
        });
        let response = self
            .client
            .put(self.url(&format!("/notes/{note_id}")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if response.status() == StatusCode::CONFLICT {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(SyncError::VersionConflict {
                note_id: note_id.to_string(),
                expected: expected_version,
                actual: body.get("actual_version").and_then(Value::as_u64).unwrap_or(0),
            });
        }
        parse_envelope(response).await
    }

    async fn delete_note(&self, token: &str, note_id: &str) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/notes/{note_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("delete failed with status {}", response.status())));
        }
        Ok(())
    }

    async fn setup_keys(&self, token: &str, material: &WrappedKeyMaterial) -> SyncResult<()> {
        let body = SetupKeysRequest {
            encrypted_key: &material.wrapped_key,
            key_salt: &material.salt,
            kdf_params: KdfParams { iterations: material.kdf_iterations },
            encryption_algo: "aes-256-gcm",
        };
        let _: Value = self.authed_post(token, "/security/keys/setup", &body).await?;
        Ok(())
    }

    async fn fetch_key_material(&self, token: &str) -> SyncResult<Option<WrappedKeyMaterial>> {
        let response = self
            .client
            .get(self.url("/security/keys/sync"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: SyncKeysResponse = parse_envelope(response).await?;
        Ok(Some(WrappedKeyMaterial {
            salt: parsed.key_salt,
            kdf_iterations: parsed.kdf_params.iterations,
            wrapped_key: parsed.encrypted_key,
        }))
    }
}

#[async_trait::async_trait]
impl AccountApi for HttpRemoteApi {
    async fn login(&self, email: &str, password: &str) -> SyncResult<LoginResult> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn register(&self, email: &str, password: &str) -> SyncResult<LoginResult> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> SyncResult<RefreshedTokens> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn register_device(&self, token: &str, name: &str) -> SyncResult<DeviceInfo> {
        let body = serde_json::json!({ "name": name });
        self.authed_post(token, "/devices/register", &body).await
    }

    async fn list_devices(&self, token: &str) -> SyncResult<Vec<DeviceInfo>> {
        let response = self
            .client
            .get(self.url("/devices"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn revoke_device(&self, token: &str, device_id: &str) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/devices/{device_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("revoke device failed with status {}", response.status())));
        }
        Ok(())
    }

    async fn list_workspaces(&self, token: &str) -> SyncResult<Vec<WorkspaceInfo>> {
        let response = self
            .client
            .get(self.url("/workspaces"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn create_workspace(&self, token: &str, name: &str) -> SyncResult<WorkspaceInfo> {
        let body = serde_json::json!({ "name": name });
        self.authed_post(token, "/workspaces", &body).await
    }

    async fn get_workspace(&self, token: &str, workspace_id: &str) -> SyncResult<WorkspaceInfo> {
        let response = self
            .client
            .get(self.url(&format!("/workspaces/{workspace_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn update_workspace(&self, token: &str, workspace_id: &str, name: &str) -> SyncResult<WorkspaceInfo> {
        let body = serde_json::json!({ "name": name });
        let response = self
            .client
            .put(self.url(&format!("/workspaces/{workspace_id}")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        parse_envelope(response).await
    }

    async fn delete_workspace(&self, token: &str, workspace_id: &str) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/workspaces/{workspace_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("delete workspace failed with status {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RefreshClient for HttpRemoteApi {
    async fn refresh(&self, refresh_token: &str) -> SyncResult<RefreshedTokens> {
        AccountApi::refresh_tokens(self, refresh_token).await
    }
}
