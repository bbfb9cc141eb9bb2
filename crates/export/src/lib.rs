//! vault_export
//!
//! Batched reconstruction of case messages into container formats:
//! - `native`: one re-hydrated `.eml` per message in a zip
//! - `mbox`: a single mailbox file accumulated into the zip
//! - `pdf`: rendered through the `MessageRenderer` seam
//!
//! Re-hydration runs in export mode (inline parts forced to `attachment`
//! disposition). Redacted exports mask PII in the decrypted source before
//! attachment payloads are inlined. Per-item failures become `<id>_error.txt`
//! entries; one bad message never aborts the job.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use vault_crypto::{CryptoError, MessageKey};
use vault_index::{Filter, IndexError, MessageDoc, SearchIndex, SearchQuery};
use vault_mime::{collect_cas_refs, extract_view, rehydrate};
use vault_store::{cas_key, message_key, BlobStore, StoreError};

/// Documents fetched per index round-trip.
const FETCH_CHUNK: usize = 100;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
    #[error("message record missing: {0}")]
    MissingRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Native,
    Pdf,
    Mbox,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(ExportFormat::Native),
            "pdf" => Ok(ExportFormat::Pdf),
            "mbox" => Ok(ExportFormat::Mbox),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Rendering seam for non-native formats. The production PDF renderer is an
/// external collaborator wired at deployment; `TextRenderer` is the built-in
/// fallback and the test double.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, doc: &MessageDoc, body_text: &str) -> Result<Vec<u8>, ExportError>;
}

/// Plain-text page per message: header block, separator, body.
pub struct TextRenderer;

impl MessageRenderer for TextRenderer {
    fn render(&self, doc: &MessageDoc, body_text: &str) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        writeln!(out, "Bates: {}", doc.id)?;
        writeln!(out, "From:    {}", doc.from)?;
        writeln!(out, "To:      {}", doc.to)?;
        writeln!(out, "Date:    {}", doc.date)?;
        writeln!(out, "Subject: {}", doc.subject)?;
        writeln!(out, "{}", "-".repeat(72))?;
        writeln!(out, "{body_text}")?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub exported: u64,
    pub failed: u64,
    pub degraded: u64,
}

pub struct ExportPipeline {
    index: Arc<dyn SearchIndex>,
    store: Arc<dyn BlobStore>,
    renderer: Arc<dyn MessageRenderer>,
}

impl ExportPipeline {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn BlobStore>,
        renderer: Arc<dyn MessageRenderer>,
    ) -> Self {
        Self { index, store, renderer }
    }

    /// Build the export archive for a message id list. Returns the zip bytes
    /// and a per-item outcome report.
    pub async fn export(
        &self,
        job_id: &str,
        message_ids: &[String],
        format: ExportFormat,
        redact: bool,
    ) -> Result<(Vec<u8>, ExportReport), ExportError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        let mut report = ExportReport::default();
        let mut mbox: Vec<u8> = Vec::new();

        for chunk in message_ids.chunks(FETCH_CHUNK) {
            let results = self
                .index
                .search(
                    &SearchQuery::filtered(Filter::id_in(chunk.iter().cloned()))
                        .with_limit(chunk.len()),
                )
                .await?;
            let docs: HashMap<&str, &MessageDoc> =
                results.hits.iter().map(|d| (d.id.as_str(), d)).collect();

            for id in chunk {
                match self.reconstruct(docs.get(id.as_str()).copied(), id, redact).await {
                    Ok((bytes, doc, degraded)) => {
                        if degraded {
                            report.degraded += 1;
                        }
                        match format {
                            ExportFormat::Native => {
                                zip.start_file(format!("{id}.eml"), options)?;
                                zip.write_all(&bytes)?;
                            }
                            ExportFormat::Pdf => {
                                let body =
                                    extract_view(&bytes).map(|v| v.text).unwrap_or_default();
                                let rendered = self.renderer.render(&doc, &body)?;
                                zip.start_file(format!("{id}.pdf"), options)?;
                                zip.write_all(&rendered)?;
                            }
                            ExportFormat::Mbox => {
                                mbox_append(&mut mbox, &doc.envelope_from, &bytes);
                            }
                        }
                        report.exported += 1;
                    }
                    Err(e) => {
                        tracing::error!(id = %id, error = %e, "export item failed");
                        report.failed += 1;
                        if format != ExportFormat::Mbox {
                            zip.start_file(format!("{id}_error.txt"), options)?;
                            zip.write_all(e.to_string().as_bytes())?;
                        }
                    }
                }
            }
        }

        if format == ExportFormat::Mbox {
            zip.start_file(format!("{job_id}.mbox"), options)?;
            zip.write_all(&mbox)?;
        }

        let cursor = zip.finish()?;
        Ok((cursor.into_inner(), report))
    }

    /// Decrypt, optionally redact, and re-hydrate one message.
    async fn reconstruct(
        &self,
        doc: Option<&MessageDoc>,
        id: &str,
        redact: bool,
    ) -> Result<(Vec<u8>, MessageDoc, bool), ExportError> {
        let doc = doc.ok_or_else(|| ExportError::MissingRecord(id.to_string()))?;
        let ciphertext = self.store.get(&message_key(id)).await?;
        let key = MessageKey::from_encoded(&doc.key)?;
        let mut plaintext = key.open(&ciphertext)?;

        let mut doc = doc.clone();
        if redact {
            let text = String::from_utf8_lossy(&plaintext).into_owned();
            plaintext = vault_redact::redact_text(&text).into_bytes();
            doc.subject = vault_redact::redact_text(&doc.subject);
            doc.from = vault_redact::redact_text(&doc.from);
            doc.to = vault_redact::redact_text(&doc.to);
        }

        let mut blobs = HashMap::new();
        for cas_ref in collect_cas_refs(&plaintext) {
            match self.store.get(&cas_key(&cas_ref)).await {
                Ok(payload) => {
                    blobs.insert(cas_ref, payload);
                }
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!(id, cas_ref = %cas_ref, "CAS blob missing for export");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let rehydrated = rehydrate(&plaintext, &blobs, true);
        let degraded = !rehydrated.missing.is_empty();
        Ok((rehydrated.bytes, doc, degraded))
    }
}

/// Classic mbox framing: `From ` separator line, `>From ` quoting inside
/// message bodies, one blank line between messages.
fn mbox_append(out: &mut Vec<u8>, envelope_from: &str, raw: &[u8]) {
    let sender = if envelope_from.is_empty() { "MAILER-DAEMON" } else { envelope_from };
    out.extend_from_slice(format!("From {sender} Thu Jan  1 00:00:00 1970\n").as_bytes());
    for line in raw.split_inclusive(|b| *b == b'\n') {
        if line.starts_with(b"From ") {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.push(b'\n');
}
