//! vault_index
//!
//! Search index adapter: document upsert, filter + sort search, fetch by id.
//! One document set keyed by message id; `org_id` is an array so a single
//! document can belong to several tenants (value-in-array filter semantics).
//!
//! Filters are built as a typed AST and rendered to the host index's filter
//! expression syntax by the HTTP adapter; the in-memory index evaluates the
//! same AST structurally so both backends agree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_common::OrgId;

mod filter;
mod http;
mod memory;

pub use filter::{Filter, Scalar};
pub use http::HttpSearchIndex;
pub use memory::MemoryIndex;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("index rejected request: status {0}")]
    Status(u16),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        IndexError::Transport(e.to_string())
    }
}

// ----------------------------
// Document model
// ----------------------------

/// The message record as stored in the index. Every record corresponds to
/// exactly one ciphertext blob under `<id>.enc` and a non-empty owning-org
/// set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDoc {
    pub id: String,
    /// Per-message encryption key, URL-safe base64.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub in_reply_to: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub date: String,
    /// RFC 5322 Date parsed to epoch seconds; 0 is the "unparseable" sentinel.
    #[serde(default)]
    pub date_timestamp: i64,
    #[serde(default)]
    pub envelope_from: String,
    #[serde(default)]
    pub envelope_rcpt: Vec<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub recipient_emails: Vec<String>,
    #[serde(default)]
    pub sender_domain: Option<String>,
    #[serde(default)]
    pub recipient_domains: Vec<String>,
    /// Involved-domains union (headers + envelope), lowercase.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Owning organizations. A list: one document, multi-tenant membership.
    #[serde(default)]
    pub org_id: Vec<OrgId>,
    /// SHA-256 of the ciphertext blob as stored.
    #[serde(default)]
    pub sha256: String,
    /// HMAC-SHA256 of the ciphertext blob, hex.
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub is_spam: bool,
    #[serde(default)]
    pub size: u64,
    /// Text extracted from attachments at the edge (OCR et al).
    #[serde(default)]
    pub attachment_content: String,
    /// Plain-text body extracted at the edge for full-text search.
    #[serde(default)]
    pub body_text: String,
    /// Content-addressed attachment hashes referenced by this message.
    #[serde(default)]
    pub cas_refs: Vec<String>,
}

impl MessageDoc {
    pub fn owned_by(&self, org: OrgId) -> bool {
        self.org_id.contains(&org)
    }
}

/// Attributes the index must treat as filterable. The HTTP adapter pushes
/// these as settings; the memory index filters on anything.
pub const FILTERABLE_ATTRIBUTES: &[&str] = &[
    "id",
    "from",
    "to",
    "date",
    "date_timestamp",
    "org_id",
    "domains",
    "has_attachments",
    "is_spam",
    "sender_domain",
    "recipient_domains",
    "message_id",
    "in_reply_to",
    "references",
    "sha256",
    "signature",
    "envelope_from",
    "envelope_rcpt",
    "sender_email",
    "recipient_emails",
];

pub const SEARCHABLE_ATTRIBUTES: &[&str] =
    &["subject", "from", "to", "body_text", "attachment_content", "id", "sha256"];

pub const SORTABLE_ATTRIBUTES: &[&str] = &["date", "date_timestamp"];

// ----------------------------
// Queries
// ----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    NewestFirst,
    OldestFirst,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::NewestFirst
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Free-text terms; empty matches everything.
    pub text: String,
    pub filter: Option<Filter>,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortOrder,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), filter: None, limit: 20, offset: 0, sort: SortOrder::NewestFirst }
    }

    pub fn filtered(filter: Filter) -> Self {
        Self { text: String::new(), filter: Some(filter), limit: 20, offset: 0, sort: SortOrder::NewestFirst }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<MessageDoc>,
    pub estimated_total: u64,
}

// ----------------------------
// Adapter contract
// ----------------------------

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, docs: Vec<MessageDoc>) -> Result<(), IndexError>;
    async fn get(&self, id: &str) -> Result<Option<MessageDoc>, IndexError>;
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError>;
    async fn delete(&self, id: &str) -> Result<(), IndexError>;
}
