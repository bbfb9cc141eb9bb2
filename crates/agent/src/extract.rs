//! Attachment text extraction seam.
//!
//! PDF and image OCR run through external tooling in production; the
//! built-in extractor handles text parts only. Extraction is best effort:
//! a failure is logged and never blocks archiving.

pub trait TextExtractor: Send + Sync {
    /// Extracted text, or None when this extractor cannot handle the type.
    fn extract(&self, content_type: &str, payload: &[u8]) -> Option<String>;
}

/// Decodes `text/*` payloads; defers everything else to external OCR.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, content_type: &str, payload: &[u8]) -> Option<String> {
        if !content_type.to_ascii_lowercase().starts_with("text/") {
            return None;
        }
        let text = String::from_utf8_lossy(payload).trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
