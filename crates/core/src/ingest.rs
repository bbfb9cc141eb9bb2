//! Index document derivation for ingested messages.
//!
//! Agent metadata arrives as raw header values; everything the read paths
//! and lifecycle workers filter on is derived here: cleaned addr-specs
//! (envelope wins over headers for the sender), lowercase domain unions,
//! the parsed timestamp, and the ciphertext digest + signature.

use chrono::DateTime;
use vault_common::addr::{collect_domains, extract_domain, extract_email, extract_emails};
use vault_common::{sha256_hex, OrgId};
use vault_common::wire::SyncItem;
use vault_crypto::Signer;
use vault_index::MessageDoc;

/// RFC 5322 Date header -> epoch seconds; 0 is the "unparseable" sentinel.
pub fn parse_date_timestamp(date: &str) -> i64 {
    let date = date.trim();
    if date.is_empty() {
        return 0;
    }
    match DateTime::parse_from_rfc2822(date) {
        Ok(dt) => dt.timestamp(),
        Err(e) => {
            tracing::warn!(date, error = %e, "failed to parse Date header");
            0
        }
    }
}

pub fn build_document(item: &SyncItem, ciphertext: &[u8], orgs: Vec<OrgId>, signer: &Signer) -> MessageDoc {
    let meta = &item.metadata;

    let mut sender_email = extract_email(&meta.from);
    if let Some(env_from) = extract_email(&meta.envelope_from) {
        // Envelope sender is authoritative.
        sender_email = Some(env_from);
    }

    let mut recipient_emails = extract_emails(&meta.to);
    for rcpt in &meta.envelope_rcpt {
        if let Some(e) = extract_email(rcpt) {
            if !recipient_emails.contains(&e) {
                recipient_emails.push(e);
            }
        }
    }

    let mut sender_domain = extract_domain(&meta.from);
    if let Some(env_dom) = extract_domain(&meta.envelope_from) {
        sender_domain = Some(env_dom);
    }

    let mut recipient_domains: Vec<String> = Vec::new();
    for value in std::iter::once(meta.to.as_str()).chain(meta.envelope_rcpt.iter().map(|s| s.as_str())) {
        for d in collect_domains([value]) {
            if !recipient_domains.contains(&d) {
                recipient_domains.push(d);
            }
        }
    }

    let domains = collect_domains(
        [meta.from.as_str(), meta.to.as_str(), meta.envelope_from.as_str()]
            .into_iter()
            .chain(meta.envelope_rcpt.iter().map(|s| s.as_str())),
    );

    MessageDoc {
        id: item.id.clone(),
        key: item.key.clone(),
        message_id: meta.message_id.clone(),
        in_reply_to: meta.in_reply_to.clone(),
        references: meta.references.clone(),
        from: meta.from.clone(),
        to: meta.to.clone(),
        subject: meta.subject.clone(),
        date: meta.date.clone(),
        date_timestamp: parse_date_timestamp(&meta.date),
        envelope_from: meta.envelope_from.clone(),
        envelope_rcpt: meta.envelope_rcpt.clone(),
        sender_email,
        recipient_emails,
        sender_domain,
        recipient_domains,
        domains,
        org_id: orgs,
        sha256: sha256_hex(ciphertext),
        signature: signer.sign(ciphertext),
        has_attachments: meta.has_attachments,
        is_spam: meta.is_spam,
        size: meta.size,
        attachment_content: meta.attachment_content.clone(),
        body_text: meta.body_text.clone(),
        cas_refs: meta.cas_refs.clone(),
    }
}
