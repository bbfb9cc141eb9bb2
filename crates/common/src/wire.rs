//! Agent <-> core wire contract.
//!
//! JSON bodies for the sync and CAS endpoints. The agent serializes these;
//! the core deserializes them. Blob payloads travel base64-encoded.

use serde::{Deserialize, Serialize};

/// Header carrying the shared write credential.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Metadata captured at the edge and shipped with each message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub in_reply_to: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub envelope_from: String,
    #[serde(default)]
    pub envelope_rcpt: Vec<String>,
    /// Original (pre-strip) message size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub is_spam: bool,
    /// Content addresses of stripped attachment payloads.
    #[serde(default)]
    pub cas_refs: Vec<String>,
    /// Concatenated text extracted from attachments, best effort.
    #[serde(default)]
    pub attachment_content: String,
    /// Plain-text body for full-text indexing.
    #[serde(default)]
    pub body_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    /// Per-message encryption key, URL-safe base64.
    pub key: String,
    pub metadata: MessageMetadata,
    /// Encrypted message envelope, base64.
    pub blob_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    pub batch: Vec<SyncItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: String,
    pub processed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasCheckRequest {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasUploadItem {
    pub hash: String,
    pub blob_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasUploadBatch {
    pub batch: Vec<CasUploadItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasUploadResponse {
    pub status: String,
    pub saved: usize,
}
