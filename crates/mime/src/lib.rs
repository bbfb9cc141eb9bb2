//! vault_mime
//!
//! MIME surgery for the archive pipeline:
//! - `strip_attachments`: replace heavy part payloads with `[CAS_REF:<hex>]`
//!   placeholders at the edge, keyed by SHA-256 of the decoded payload
//! - `rehydrate`: restore payloads in place at retrieval/export time
//! - `extract_view`: text/HTML bodies + attachment list for interactive reads
//!
//! Rewrites splice byte ranges using the parser's part offsets, so every byte
//! the surgery does not touch survives verbatim. That is what makes
//! re-hydrated output byte-faithful to the original payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mail_parser::{Header, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use vault_common::sha256_hex;

/// Placeholder body for a stripped part.
pub const CAS_REF_PREFIX: &str = "[CAS_REF:";
/// Header carrying the content address of a stripped part.
pub const CAS_REF_HEADER: &str = "X-OpenArchive-CAS-Ref";
/// Warning marker left on a part whose CAS blob could not be fetched.
pub const CAS_MISSING_HEADER: &str = "X-OpenArchive-CAS-Missing";

#[derive(Debug, Error)]
pub enum MimeError {
    #[error("message could not be parsed as MIME")]
    Unparseable,
}

// ----------------------------
// Header metadata
// ----------------------------

/// Raw header metadata captured at the edge. Values are the raw header text;
/// cleanup to addr-specs happens at ingress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeaderSummary {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub message_id: String,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
}

/// One attachment payload lifted out of the message.
#[derive(Debug, Clone)]
pub struct CasPart {
    /// SHA-256 (hex) of the decoded payload; the content address.
    pub sha256: String,
    pub payload: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: String,
}

/// Output of the edge-side strip pass.
#[derive(Debug, Clone)]
pub struct StrippedMessage {
    /// The serialized message with attachment payloads replaced by CAS refs.
    pub bytes: Vec<u8>,
    pub cas_parts: Vec<CasPart>,
    pub has_attachments: bool,
    pub headers: HeaderSummary,
    /// Concatenated plain-text body, for full-text indexing.
    pub body_text: String,
    pub is_spam: bool,
}

/// Output of re-hydration.
#[derive(Debug, Clone)]
pub struct RehydratedMessage {
    pub bytes: Vec<u8>,
    /// Content addresses that had no blob; the affected parts carry a
    /// warning marker instead of their payload.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentView {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub content_b64: String,
}

/// Interactive retrieval view of a re-hydrated message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageView {
    pub text: String,
    pub html: String,
    pub attachments: Vec<AttachmentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaderView {
    pub name: String,
    pub value: String,
}

// ----------------------------
// Strip (edge side)
// ----------------------------

/// Lift attachment payloads out of `raw` and replace them with CAS refs.
///
/// A part is an attachment when its disposition says so or it carries a
/// filename. Unparseable input degrades to a pass-through with no metadata;
/// the archive never drops a journaled message over a malformed body.
pub fn strip_attachments(raw: &[u8]) -> StrippedMessage {
    let Some(message) = MessageParser::default().parse(raw) else {
        tracing::warn!(size = raw.len(), "message failed MIME parse, archiving unstripped");
        return StrippedMessage {
            bytes: raw.to_vec(),
            cas_parts: Vec::new(),
            has_attachments: false,
            headers: HeaderSummary::default(),
            body_text: String::new(),
            is_spam: false,
        };
    };

    let headers = summarize_headers(&message, raw);
    let is_spam = spam_flagged(&message, raw);
    let body_text = collect_text_body(&message);

    let mut cas_parts: Vec<CasPart> = Vec::new();
    let mut splices: Vec<(usize, usize, Vec<u8>)> = Vec::new();

    for part in &message.parts {
        if !is_attachment_part(part) {
            continue;
        }
        let payload = part.contents();
        if payload.is_empty() {
            continue;
        }
        let sha256 = sha256_hex(payload);

        let mut replacement = Vec::new();
        for header in &part.headers {
            if header.name.as_str().eq_ignore_ascii_case("Content-Transfer-Encoding") {
                continue;
            }
            push_raw_header(&mut replacement, raw, header);
        }
        replacement.extend_from_slice(format!("{CAS_REF_HEADER}: {sha256}\r\n").as_bytes());
        replacement.extend_from_slice(b"\r\n");
        replacement.extend_from_slice(format!("{CAS_REF_PREFIX}{sha256}]\r\n").as_bytes());

        splices.push((part.offset_header as usize, part.offset_end as usize, replacement));

        if !cas_parts.iter().any(|p| p.sha256 == sha256) {
            cas_parts.push(CasPart {
                sha256,
                payload: payload.to_vec(),
                filename: part.attachment_name().map(|s| s.to_string()),
                content_type: content_type_string(part),
            });
        }
    }

    let has_attachments = !cas_parts.is_empty();
    let bytes = splice(raw, splices);
    StrippedMessage { bytes, cas_parts, has_attachments, headers, body_text, is_spam }
}

// ----------------------------
// Re-hydration (core side)
// ----------------------------

/// Content addresses referenced by a stripped message, via marker header or
/// body placeholder.
pub fn collect_cas_refs(raw: &[u8]) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    if let Some(message) = MessageParser::default().parse(raw) {
        for part in &message.parts {
            if let Some(r) = part_cas_ref(part, raw) {
                if !refs.contains(&r) {
                    refs.push(r);
                }
            }
        }
    }
    // Placeholder scan as a fallback for messages whose marker headers were
    // lost in transit.
    for r in scan_placeholders(raw) {
        if !refs.contains(&r) {
            refs.push(r);
        }
    }
    refs
}

/// Restore CAS payloads in place. `blobs` maps content address -> payload.
/// In export mode inline parts are forced to `attachment` disposition so
/// every restored payload is visible in the output.
pub fn rehydrate(
    raw: &[u8],
    blobs: &HashMap<String, Vec<u8>>,
    export_mode: bool,
) -> RehydratedMessage {
    let Some(message) = MessageParser::default().parse(raw) else {
        return RehydratedMessage { bytes: raw.to_vec(), missing: Vec::new() };
    };

    let mut missing: Vec<String> = Vec::new();
    let mut splices: Vec<(usize, usize, Vec<u8>)> = Vec::new();

    for part in &message.parts {
        let Some(cas_ref) = part_cas_ref(part, raw) else {
            continue;
        };

        match blobs.get(&cas_ref) {
            Some(payload) => {
                let filename = part
                    .attachment_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("attachment_{}", &cas_ref[..8.min(cas_ref.len())]));

                let mut replacement = Vec::new();
                let mut saw_disposition = false;
                for header in &part.headers {
                    let name = header.name.as_str();
                    if name.eq_ignore_ascii_case(CAS_REF_HEADER)
                        || name.eq_ignore_ascii_case("Content-Transfer-Encoding")
                    {
                        continue;
                    }
                    if name.eq_ignore_ascii_case("Content-Disposition") {
                        saw_disposition = true;
                        let inline = part
                            .content_disposition()
                            .map(|cd| cd.c_type.eq_ignore_ascii_case("inline"))
                            .unwrap_or(false);
                        if export_mode && inline {
                            replacement.extend_from_slice(
                                format!("Content-Disposition: attachment; filename=\"{filename}\"\r\n")
                                    .as_bytes(),
                            );
                            continue;
                        }
                    }
                    push_raw_header(&mut replacement, raw, header);
                }
                if !saw_disposition {
                    replacement.extend_from_slice(
                        format!("Content-Disposition: attachment; filename=\"{filename}\"\r\n")
                            .as_bytes(),
                    );
                }
                replacement.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n\r\n");
                replacement.extend_from_slice(wrap_base64(payload).as_bytes());

                splices.push((part.offset_header as usize, part.offset_end as usize, replacement));
            }
            None => {
                tracing::warn!(cas_ref = %cas_ref, "CAS blob missing during re-hydration");
                let mut replacement = Vec::new();
                for header in &part.headers {
                    push_raw_header(&mut replacement, raw, header);
                }
                replacement
                    .extend_from_slice(format!("{CAS_MISSING_HEADER}: {cas_ref}\r\n").as_bytes());
                replacement.extend_from_slice(b"\r\n");
                replacement.extend_from_slice(format!("{CAS_REF_PREFIX}{cas_ref}]\r\n").as_bytes());
                splices.push((part.offset_header as usize, part.offset_end as usize, replacement));
                if !missing.contains(&cas_ref) {
                    missing.push(cas_ref);
                }
            }
        }
    }

    RehydratedMessage { bytes: splice(raw, splices), missing }
}

// ----------------------------
// Views (interactive retrieval)
// ----------------------------

/// Extract bodies and attachments from a re-hydrated message. `cid:` inline
/// references in the HTML body are rewritten to `data:` URIs.
pub fn extract_view(raw: &[u8]) -> Result<MessageView, MimeError> {
    let message = MessageParser::default().parse(raw).ok_or(MimeError::Unparseable)?;

    let text = collect_text_body(&message);
    let mut html = String::new();
    for id in &message.html_body {
        if let Some(part) = message.parts.get(*id as usize) {
            if let Some(t) = part.text_contents() {
                html.push_str(t);
            }
        }
    }

    let mut attachments = Vec::new();
    let mut inline_images: Vec<(String, String)> = Vec::new();
    for (idx, part) in message.parts.iter().enumerate() {
        let is_attached = message.attachments.contains(&(idx as u32)) || is_attachment_part(part);
        let content_type = content_type_string(part);
        if let Some(cid) = part.content_id() {
            let data = BASE64.encode(part.contents());
            inline_images.push((cid.to_string(), format!("data:{content_type};base64,{data}")));
        }
        if !is_attached || matches!(part.body, PartType::Multipart(_)) {
            continue;
        }
        let payload = part.contents();
        attachments.push(AttachmentView {
            filename: part
                .attachment_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("attachment_{}", attachments.len() + 1)),
            content_type,
            size: payload.len(),
            content_b64: BASE64.encode(payload),
        });
    }

    for (cid, data_uri) in inline_images {
        html = html.replace(&format!("cid:{cid}"), &data_uri);
    }

    Ok(MessageView { text, html, attachments })
}

/// Parsed top-level header list for the headers endpoint.
pub fn list_headers(raw: &[u8]) -> Result<Vec<HeaderView>, MimeError> {
    let message = MessageParser::default().parse(raw).ok_or(MimeError::Unparseable)?;
    let root = message.parts.first().ok_or(MimeError::Unparseable)?;
    Ok(root
        .headers
        .iter()
        .map(|h| HeaderView {
            name: h.name.as_str().to_string(),
            value: raw_header_value(raw, h),
        })
        .collect())
}

// ----------------------------
// Internals
// ----------------------------

fn is_attachment_part(part: &MessagePart) -> bool {
    if matches!(part.body, PartType::Multipart(_)) {
        return false;
    }
    let disposed = part
        .content_disposition()
        .map(|cd| cd.c_type.eq_ignore_ascii_case("attachment"))
        .unwrap_or(false);
    disposed || part.attachment_name().is_some()
}

fn part_cas_ref(part: &MessagePart, raw: &[u8]) -> Option<String> {
    for header in &part.headers {
        if header.name.as_str().eq_ignore_ascii_case(CAS_REF_HEADER) {
            let value = raw_header_value(raw, header);
            let value = value.trim();
            if is_hex64(value) {
                return Some(value.to_lowercase());
            }
        }
    }
    if let Some(text) = part.text_contents() {
        if let Some(r) = parse_placeholder(text.trim()) {
            return Some(r);
        }
    }
    None
}

fn parse_placeholder(text: &str) -> Option<String> {
    let rest = text.strip_prefix(CAS_REF_PREFIX)?;
    let end = rest.find(']')?;
    let candidate = &rest[..end];
    if is_hex64(candidate) {
        Some(candidate.to_lowercase())
    } else {
        None
    }
}

fn scan_placeholders(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();
    let mut rest: &str = &text;
    while let Some(pos) = rest.find(CAS_REF_PREFIX) {
        rest = &rest[pos + CAS_REF_PREFIX.len()..];
        if let Some(end) = rest.find(']') {
            let candidate = &rest[..end];
            if is_hex64(candidate) {
                let r = candidate.to_lowercase();
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        }
    }
    out
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn push_raw_header(out: &mut Vec<u8>, raw: &[u8], header: &Header) {
    let start = header.offset_field as usize;
    let end = (header.offset_end as usize).min(raw.len());
    if start >= end {
        return;
    }
    out.extend_from_slice(&raw[start..end]);
    if !out.ends_with(b"\n") {
        out.extend_from_slice(b"\r\n");
    }
}

fn raw_header_value(raw: &[u8], header: &Header) -> String {
    let start = (header.offset_start as usize).min(raw.len());
    let end = (header.offset_end as usize).min(raw.len());
    if start >= end {
        return String::new();
    }
    String::from_utf8_lossy(&raw[start..end]).trim().to_string()
}

/// Apply replacements of `(start, end, bytes)` regions. Regions never overlap
/// because each belongs to a distinct leaf part.
fn splice(raw: &[u8], mut splices: Vec<(usize, usize, Vec<u8>)>) -> Vec<u8> {
    if splices.is_empty() {
        return raw.to_vec();
    }
    splices.sort_by_key(|(start, _, _)| *start);
    let mut out = Vec::with_capacity(raw.len());
    let mut cursor = 0usize;
    for (start, end, replacement) in splices {
        if start < cursor || end > raw.len() {
            continue;
        }
        out.extend_from_slice(&raw[cursor..start]);
        out.extend_from_slice(&replacement);
        cursor = end;
    }
    out.extend_from_slice(&raw[cursor..]);
    out
}

fn wrap_base64(payload: &[u8]) -> String {
    let encoded = BASE64.encode(payload);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(76) {
        wrapped.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        wrapped.push_str("\r\n");
    }
    wrapped
}

fn content_type_string(part: &MessagePart) -> String {
    match part.content_type() {
        Some(ct) => match &ct.c_subtype {
            Some(sub) => format!("{}/{}", ct.c_type, sub),
            None => ct.c_type.to_string(),
        },
        None => "application/octet-stream".to_string(),
    }
}

fn collect_text_body(message: &Message) -> String {
    let mut text = String::new();
    for id in &message.text_body {
        if let Some(part) = message.parts.get(*id as usize) {
            if let Some(t) = part.text_contents() {
                text.push_str(t);
            }
        }
    }
    text
}

fn spam_flagged(message: &Message, raw: &[u8]) -> bool {
    message
        .parts
        .first()
        .map(|root| {
            root.headers.iter().any(|h| {
                h.name.as_str().eq_ignore_ascii_case("X-Spam-Flag")
                    && raw_header_value(raw, h).eq_ignore_ascii_case("YES")
            })
        })
        .unwrap_or(false)
}

fn summarize_headers(message: &Message, raw: &[u8]) -> HeaderSummary {
    let mut summary = HeaderSummary::default();
    let Some(root) = message.parts.first() else {
        return summary;
    };
    for header in &root.headers {
        let value = raw_header_value(raw, header);
        match header.name.as_str() {
            n if n.eq_ignore_ascii_case("From") => summary.from = value,
            n if n.eq_ignore_ascii_case("To") => summary.to = value,
            n if n.eq_ignore_ascii_case("Subject") => summary.subject = value,
            n if n.eq_ignore_ascii_case("Date") => summary.date = value,
            n if n.eq_ignore_ascii_case("Message-ID") => summary.message_id = value,
            n if n.eq_ignore_ascii_case("In-Reply-To") => {
                summary.in_reply_to = split_ids(&value);
            }
            n if n.eq_ignore_ascii_case("References") => {
                summary.references = split_ids(&value);
            }
            _ => {}
        }
    }
    summary
}

fn split_ids(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_PAYLOAD: &[u8] = b"%PDF-1.4 not really a pdf but bytes we can compare\x00\x01\x02";

    fn sample_message() -> Vec<u8> {
        let encoded = BASE64.encode(PDF_PAYLOAD);
        format!(
            "From: Alice Example <alice@acme.com>\r\n\
             To: bob@acme.com\r\n\
             Subject: Quarterly report\r\n\
             Date: Tue, 01 Jul 2025 10:00:00 +0000\r\n\
             Message-ID: <m1@acme.com>\r\n\
             In-Reply-To: <m0@acme.com>\r\n\
             References: <root@acme.com> <m0@acme.com>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n\
             --XYZ\r\n\
             Content-Type: text/plain; charset=\"utf-8\"\r\n\
             \r\n\
             ping body\r\n\
             --XYZ\r\n\
             Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {encoded}\r\n\
             --XYZ--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn strip_replaces_payload_with_cas_ref() {
        let raw = sample_message();
        let stripped = strip_attachments(&raw);

        assert!(stripped.has_attachments);
        assert_eq!(stripped.cas_parts.len(), 1);
        let part = &stripped.cas_parts[0];
        assert_eq!(part.sha256, sha256_hex(PDF_PAYLOAD));
        assert_eq!(part.payload, PDF_PAYLOAD);
        assert_eq!(part.filename.as_deref(), Some("doc.pdf"));
        assert_eq!(part.content_type, "application/pdf");

        let text = String::from_utf8_lossy(&stripped.bytes);
        assert!(text.contains(&format!("{CAS_REF_PREFIX}{}]", part.sha256)));
        assert!(text.contains(&format!("{CAS_REF_HEADER}: {}", part.sha256)));
        assert!(!text.contains(&BASE64.encode(PDF_PAYLOAD)));
        // Untouched parts survive verbatim.
        assert!(text.contains("ping body"));
        assert!(text.contains("Subject: Quarterly report"));
    }

    #[test]
    fn strip_captures_header_summary_and_body_text() {
        let stripped = strip_attachments(&sample_message());
        assert_eq!(stripped.headers.from, "Alice Example <alice@acme.com>");
        assert_eq!(stripped.headers.subject, "Quarterly report");
        assert_eq!(stripped.headers.message_id, "<m1@acme.com>");
        assert_eq!(stripped.headers.in_reply_to, vec!["<m0@acme.com>"]);
        assert_eq!(stripped.headers.references, vec!["<root@acme.com>", "<m0@acme.com>"]);
        assert!(stripped.body_text.contains("ping body"));
        assert!(!stripped.is_spam);
    }

    #[test]
    fn rehydrated_attachment_is_byte_identical() {
        let stripped = strip_attachments(&sample_message());
        let sha = stripped.cas_parts[0].sha256.clone();

        assert_eq!(collect_cas_refs(&stripped.bytes), vec![sha.clone()]);

        let mut blobs = HashMap::new();
        blobs.insert(sha, PDF_PAYLOAD.to_vec());
        let rehydrated = rehydrate(&stripped.bytes, &blobs, false);
        assert!(rehydrated.missing.is_empty());

        let message = MessageParser::default().parse(&rehydrated.bytes).unwrap();
        let restored: Vec<&MessagePart> =
            message.parts.iter().filter(|p| is_attachment_part(p)).collect();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].contents(), PDF_PAYLOAD);
        assert_eq!(restored[0].attachment_name(), Some("doc.pdf"));

        let text = String::from_utf8_lossy(&rehydrated.bytes);
        assert!(!text.contains(CAS_REF_HEADER));
    }

    #[test]
    fn duplicate_attachments_share_one_cas_part() {
        let encoded = BASE64.encode(PDF_PAYLOAD);
        let raw = format!(
            "From: a@x.com\r\nTo: b@x.com\r\nSubject: dup\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
             --B\r\n\
             Content-Type: application/pdf; name=\"one.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"one.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{encoded}\r\n\
             --B\r\n\
             Content-Type: application/pdf; name=\"two.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"two.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{encoded}\r\n\
             --B--\r\n"
        )
        .into_bytes();

        let stripped = strip_attachments(&raw);
        assert_eq!(stripped.cas_parts.len(), 1);

        let sha = stripped.cas_parts[0].sha256.clone();
        let mut blobs = HashMap::new();
        blobs.insert(sha, PDF_PAYLOAD.to_vec());
        let rehydrated = rehydrate(&stripped.bytes, &blobs, false);

        let message = MessageParser::default().parse(&rehydrated.bytes).unwrap();
        let restored: Vec<&MessagePart> =
            message.parts.iter().filter(|p| is_attachment_part(p)).collect();
        assert_eq!(restored.len(), 2);
        for part in restored {
            assert_eq!(part.contents(), PDF_PAYLOAD);
        }
    }

    #[test]
    fn missing_blob_leaves_marked_placeholder() {
        let stripped = strip_attachments(&sample_message());
        let sha = stripped.cas_parts[0].sha256.clone();

        let rehydrated = rehydrate(&stripped.bytes, &HashMap::new(), false);
        assert_eq!(rehydrated.missing, vec![sha.clone()]);
        let text = String::from_utf8_lossy(&rehydrated.bytes);
        assert!(text.contains(&format!("{CAS_MISSING_HEADER}: {sha}")));
        assert!(text.contains(&format!("{CAS_REF_PREFIX}{sha}]")));
    }

    #[test]
    fn export_mode_forces_attachment_disposition() {
        let payload = b"image-bytes";
        let encoded = BASE64.encode(payload);
        let raw = format!(
            "From: a@x.com\r\nSubject: inline\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/related; boundary=\"B\"\r\n\r\n\
             --B\r\n\
             Content-Type: text/html\r\n\r\n<img src=\"cid:logo\">\r\n\
             --B\r\n\
             Content-Type: image/png; name=\"logo.png\"\r\n\
             Content-Disposition: inline; filename=\"logo.png\"\r\n\
             Content-ID: <logo>\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{encoded}\r\n\
             --B--\r\n"
        )
        .into_bytes();

        let stripped = strip_attachments(&raw);
        assert_eq!(stripped.cas_parts.len(), 1);
        let sha = stripped.cas_parts[0].sha256.clone();
        let mut blobs = HashMap::new();
        blobs.insert(sha, payload.to_vec());

        let exported = rehydrate(&stripped.bytes, &blobs, true);
        let text = String::from_utf8_lossy(&exported.bytes);
        assert!(text.contains("Content-Disposition: attachment; filename=\"logo.png\""));

        let interactive = rehydrate(&stripped.bytes, &blobs, false);
        let text = String::from_utf8_lossy(&interactive.bytes);
        assert!(text.contains("Content-Disposition: inline"));
    }

    #[test]
    fn view_rewrites_cid_references_and_lists_attachments() {
        let payload = b"png-bytes";
        let encoded = BASE64.encode(payload);
        let raw = format!(
            "From: a@x.com\r\nSubject: rich\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
             --B\r\n\
             Content-Type: text/plain\r\n\r\nplain body\r\n\
             --B\r\n\
             Content-Type: text/html\r\n\r\n<p>hi</p><img src=\"cid:logo\">\r\n\
             --B\r\n\
             Content-Type: image/png; name=\"logo.png\"\r\n\
             Content-Disposition: attachment; filename=\"logo.png\"\r\n\
             Content-ID: <logo>\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{encoded}\r\n\
             --B--\r\n"
        )
        .into_bytes();

        let view = extract_view(&raw).unwrap();
        assert!(view.text.contains("plain body"));
        assert!(view.html.contains("data:image/png;base64,"));
        assert!(!view.html.contains("cid:logo"));
        assert_eq!(view.attachments.len(), 1);
        assert_eq!(view.attachments[0].filename, "logo.png");
        assert_eq!(view.attachments[0].size, payload.len());
        assert_eq!(
            BASE64.decode(&view.attachments[0].content_b64).unwrap(),
            payload.to_vec()
        );
    }

    #[test]
    fn header_listing_preserves_raw_values() {
        let headers = list_headers(&sample_message()).unwrap();
        let subject = headers.iter().find(|h| h.name.eq_ignore_ascii_case("Subject")).unwrap();
        assert_eq!(subject.value, "Quarterly report");
    }

    #[test]
    fn unparseable_input_passes_through() {
        let raw = [0xff, 0xfe, 0x00, 0x01];
        let stripped = strip_attachments(&raw);
        assert_eq!(stripped.bytes, raw.to_vec());
        assert!(stripped.cas_parts.is_empty());
        assert!(collect_cas_refs(&raw).is_empty());
    }

    #[test]
    fn spam_flag_header_is_detected() {
        let raw = b"From: a@x.com\r\nX-Spam-Flag: YES\r\nSubject: buy\r\n\r\nbody\r\n";
        let stripped = strip_attachments(raw);
        assert!(stripped.is_spam);
    }
}
