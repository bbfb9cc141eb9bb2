//! vault_store
//!
//! Blob store adapter: an opaque key -> bytes store with head/get/put/delete
//! on a flat keyspace. Message envelopes live under `<uuid>.enc`, deduplicated
//! attachment payloads under `cas_<sha256>.enc`.
//!
//! The at-rest layer is `EncryptedBlobStore`: every byte that reaches the
//! backing store is wrapped with the process-wide master cipher. Callers only
//! ever see plaintext; there is no toggle and no plaintext fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;
use vault_crypto::{CryptoError, MasterCipher};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("at-rest decryption failed for {key}")]
    AtRest { key: String },
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

/// Flat keyspace object store contract.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    /// NotFound for absent keys.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn head(&self, key: &str) -> Result<bool, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ----------------------------
// In-memory store (tests, dev)
// ----------------------------

#[derive(Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes, bypassing any wrapping layers. Test hook for the
    /// at-rest opacity invariant.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().expect("store lock").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs.lock().expect("store lock").insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .expect("store lock")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.lock().expect("store lock").contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.lock().expect("store lock").remove(key);
        Ok(())
    }
}

// ----------------------------
// Filesystem store
// ----------------------------

/// One file per key under a root directory. Keys are flat (`<uuid>.enc`,
/// `cas_<hex>.enc`); path separators are rejected outright.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StoreError::Transport(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ----------------------------
// HTTP object store
// ----------------------------

/// REST adapter for a flat-keyspace object store:
/// `PUT|GET|HEAD|DELETE {endpoint}/{bucket}/{key}` with a bearer token.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(
        endpoint: String,
        bucket: String,
        token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint, bucket, token })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) if !t.is_empty() => req.bearer_auth(t),
            _ => req,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let resp = self.auth(self.client.put(self.url(key)).body(bytes.to_vec())).send().await?;
        if !resp.status().is_success() {
            return Err(StoreError::Transport(format!("put {key}: status {}", resp.status())));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self.auth(self.client.get(self.url(key))).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(StoreError::Transport(format!("get {key}: status {}", resp.status())));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        let resp = self.auth(self.client.head(self.url(key))).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(StoreError::Transport(format!("head {key}: status {}", resp.status())));
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let resp = self.auth(self.client.delete(self.url(key))).send().await?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::Transport(format!("delete {key}: status {}", resp.status())));
        }
        Ok(())
    }
}

// ----------------------------
// At-rest encryption wrapper
// ----------------------------

/// Wraps any `BlobStore` with the master cipher. Everything below this layer
/// is ciphertext; everything above it is plaintext.
pub struct EncryptedBlobStore<S> {
    inner: S,
    cipher: Arc<MasterCipher>,
}

impl<S: BlobStore> EncryptedBlobStore<S> {
    pub fn new(inner: S, cipher: Arc<MasterCipher>) -> Self {
        Self { inner, cipher }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for EncryptedBlobStore<S> {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner.put(key, &self.cipher.seal(bytes)).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let sealed = self.inner.get(key).await?;
        self.cipher.open(&sealed).map_err(|e: CryptoError| {
            tracing::error!(key, error = %e, "at-rest decryption failed");
            StoreError::AtRest { key: key.to_string() }
        })
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

/// Message envelope key in the store keyspace.
pub fn message_key(id: &str) -> String {
    format!("{id}.enc")
}

/// Content-addressed attachment key in the store keyspace.
pub fn cas_key(sha256_hex: &str) -> String {
    format!("cas_{sha256_hex}.enc")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypted_memory() -> (MemoryBlobStore, EncryptedBlobStore<MemoryBlobStore>) {
        let raw = MemoryBlobStore::new();
        let cipher = Arc::new(MasterCipher::derive("test-master-secret"));
        (raw.clone(), EncryptedBlobStore::new(raw, cipher))
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("a.enc", b"payload").await.unwrap();
        assert!(store.head("a.enc").await.unwrap());
        assert_eq!(store.get("a.enc").await.unwrap(), b"payload");
        store.delete("a.enc").await.unwrap();
        assert!(!store.head("a.enc").await.unwrap());
        assert!(matches!(store.get("a.enc").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn at_rest_bytes_are_opaque() {
        let (raw, store) = encrypted_memory();
        store.put("m.enc", b"plaintext body").await.unwrap();
        let stored = raw.raw("m.enc").unwrap();
        assert_ne!(stored, b"plaintext body".to_vec());
        assert_eq!(store.get("m.enc").await.unwrap(), b"plaintext body");
    }

    #[tokio::test]
    async fn corrupted_at_rest_bytes_are_an_error_not_plaintext() {
        let (raw, store) = encrypted_memory();
        store.put("m.enc", b"body").await.unwrap();
        raw.put("m.enc", b"garbage-overwrite").await.unwrap();
        assert!(matches!(store.get("m.enc").await, Err(StoreError::AtRest { .. })));
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_missing_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("cas_ab.enc", b"bytes").await.unwrap();
        assert!(store.head("cas_ab.enc").await.unwrap());
        assert_eq!(store.get("cas_ab.enc").await.unwrap(), b"bytes");
        assert!(matches!(store.get("missing.enc").await, Err(StoreError::NotFound(_))));
        assert!(store.put("../escape", b"x").await.is_err());
    }

    #[tokio::test]
    async fn http_store_maps_statuses() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/blobs/archive/x.enc");
                then.status(200).body("bytes");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::HEAD).path("/blobs/archive/gone.enc");
                then.status(404);
            })
            .await;

        let store = HttpBlobStore::new(
            format!("{}/blobs", server.base_url()),
            "archive".into(),
            None,
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(store.get("x.enc").await.unwrap(), b"bytes");
        assert!(!store.head("gone.enc").await.unwrap());
    }

    #[test]
    fn keyspace_layout() {
        assert_eq!(message_key("abc"), "abc.enc");
        assert_eq!(cas_key("deadbeef"), "cas_deadbeef.enc");
    }
}
