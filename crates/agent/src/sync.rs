//! Two-phase upload loop.
//!
//! Phase A drains pending CAS blobs: check which content addresses the core
//! already has, upload the missing ones, then mark the whole batch SYNCED
//! (existence is guaranteed either way). Phase B ships message batches.
//! Phases are strictly ordered per iteration so a message never arrives
//! before the CAS blobs it references.
//!
//! Transport failures back off exponentially up to ~10 s and retry the same
//! batch; nothing is marked on failure.

use crate::buffer::Buffer;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use vault_common::wire::{
    CasCheckRequest, CasUploadBatch, CasUploadItem, SyncBatch, SyncItem, API_KEY_HEADER,
};

pub const CAS_BATCH: usize = 20;
pub const MESSAGE_BATCH: usize = 50;
const IDLE_WAIT: Duration = Duration::from_secs(5);
const BACKOFF_CEILING: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("core rejected request: status {0}")]
    Status(u16),
    #[error("buffer error: {0}")]
    Buffer(#[from] crate::buffer::BufferError),
}

pub struct SyncClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SyncClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url, api_key })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub async fn cas_check(&self, hashes: Vec<String>) -> Result<HashMap<String, bool>, SyncError> {
        let resp = self
            .client
            .post(self.url("/api/v1/cas/check"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&CasCheckRequest { hashes })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    pub async fn cas_upload(&self, batch: Vec<CasUploadItem>) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(self.url("/api/v1/cas/upload"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&CasUploadBatch { batch })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    pub async fn sync(&self, batch: Vec<SyncItem>) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(self.url("/api/v1/sync"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&SyncBatch { batch })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Run phase A then phase B once. Returns whether any work was found.
pub async fn sync_iteration(buffer: &Buffer, client: &SyncClient) -> Result<bool, SyncError> {
    let mut worked = false;

    // --- Phase A: CAS blobs ---
    let pending_cas = buffer.pending_cas(CAS_BATCH)?;
    if !pending_cas.is_empty() {
        worked = true;
        let hashes: Vec<String> = pending_cas.iter().map(|c| c.hash.clone()).collect();
        let existence = client.cas_check(hashes).await?;

        let mut to_upload = Vec::new();
        for row in &pending_cas {
            if !existence.get(&row.hash).copied().unwrap_or(false) {
                let payload = buffer.read_payload(&row.storage_path)?;
                to_upload.push(CasUploadItem {
                    hash: row.hash.clone(),
                    blob_b64: BASE64.encode(payload),
                });
            }
        }
        if !to_upload.is_empty() {
            client.cas_upload(to_upload).await?;
        }
        // Existence is now guaranteed for the whole batch.
        for row in &pending_cas {
            buffer.mark_cas_synced(&row.hash)?;
        }
        tracing::info!(count = pending_cas.len(), "CAS batch synced");
    }

    // --- Phase B: messages ---
    let pending = buffer.pending_messages(MESSAGE_BATCH)?;
    if !pending.is_empty() {
        worked = true;
        let mut batch = Vec::with_capacity(pending.len());
        for row in &pending {
            let blob = buffer.read_payload(&row.storage_path)?;
            batch.push(SyncItem {
                id: row.id.clone(),
                key: row.key.clone(),
                metadata: row.metadata.clone(),
                blob_b64: BASE64.encode(blob),
            });
        }
        client.sync(batch).await?;
        for row in &pending {
            buffer.mark_message_synced(&row.id)?;
        }
        tracing::info!(count = pending.len(), "message batch synced");
    }

    Ok(worked)
}

/// Drain loop. Runs until shutdown; backs off on transport failure without
/// marking anything, so the same batch is retried.
pub async fn run_sync_loop(buffer: Buffer, client: SyncClient, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("sync loop started");
    let mut backoff = Duration::from_secs(1);
    loop {
        let wait = match sync_iteration(&buffer, &client).await {
            Ok(true) => {
                backoff = Duration::from_secs(1);
                Duration::ZERO
            }
            Ok(false) => {
                backoff = Duration::from_secs(1);
                IDLE_WAIT
            }
            Err(e) => {
                tracing::error!(error = %e, "sync iteration failed, backing off");
                backoff = (backoff * 2).min(BACKOFF_CEILING);
                backoff
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("sync loop stopping");
                    return;
                }
            }
        }
    }
}
