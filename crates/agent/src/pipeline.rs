//! Per-message capture pipeline.
//!
//! For every accepted envelope:
//! 1. mint a message id and a fresh per-message key
//! 2. strip attachment payloads into the local CAS buffer
//! 3. best-effort text extraction for indexing
//! 4. encrypt the stripped envelope and buffer it PENDING
//!
//! 250 is only reported once everything is durably on disk.

use crate::buffer::Buffer;
use crate::extract::TextExtractor;
use crate::smtp::{Disposition, EnvelopeHandler, SmtpEnvelope};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;
use vault_common::wire::MessageMetadata;
use vault_crypto::MessageKey;
use vault_mime::strip_attachments;

pub struct CapturePipeline {
    buffer: Buffer,
    extractor: Arc<dyn TextExtractor>,
}

impl CapturePipeline {
    pub fn new(buffer: Buffer, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { buffer, extractor }
    }

    fn capture(&self, envelope: &SmtpEnvelope) -> Result<String, crate::buffer::BufferError> {
        let message_id = Uuid::new_v4().to_string();
        let key = MessageKey::generate();

        let stripped = strip_attachments(&envelope.data);

        let mut attachment_texts: Vec<String> = Vec::new();
        for part in &stripped.cas_parts {
            self.buffer.save_cas_blob(&part.sha256, &part.payload)?;
            if let Some(text) = self.extractor.extract(&part.content_type, &part.payload) {
                attachment_texts.push(text);
            } else {
                tracing::debug!(
                    content_type = %part.content_type,
                    filename = part.filename.as_deref().unwrap_or(""),
                    "no text extracted from attachment"
                );
            }
        }

        let metadata = MessageMetadata {
            from: stripped.headers.from.clone(),
            to: stripped.headers.to.clone(),
            subject: stripped.headers.subject.clone(),
            date: stripped.headers.date.clone(),
            message_id: stripped.headers.message_id.clone(),
            in_reply_to: stripped.headers.in_reply_to.clone(),
            references: stripped.headers.references.clone(),
            envelope_from: envelope.mail_from.clone(),
            envelope_rcpt: envelope.rcpt_to.clone(),
            size: envelope.data.len() as u64,
            has_attachments: stripped.has_attachments,
            is_spam: stripped.is_spam,
            cas_refs: stripped.cas_parts.iter().map(|p| p.sha256.clone()).collect(),
            attachment_content: attachment_texts.join(" "),
            body_text: stripped.body_text.clone(),
        };

        let encrypted = key.seal(&stripped.bytes);
        self.buffer.save_message(&message_id, &key.encoded(), &metadata, &encrypted)?;

        tracing::info!(
            id = %message_id,
            subject = %metadata.subject,
            from = %metadata.from,
            size = metadata.size,
            attachments = metadata.cas_refs.len(),
            "message captured"
        );
        Ok(message_id)
    }
}

#[async_trait]
impl EnvelopeHandler for CapturePipeline {
    async fn handle(&self, envelope: SmtpEnvelope) -> Disposition {
        match self.capture(&envelope) {
            Ok(id) => Disposition::Queued(id),
            Err(e) => {
                tracing::error!(error = %e, "failed to buffer message");
                Disposition::TryAgain
            }
        }
    }
}
