//! Tenant-scoped read API: search, retrieval with re-hydration, threads,
//! and per-message integrity verification.
//!
//! Every handler membership-tests the caller's org id against the record's
//! owning set before any content is returned.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vault_common::OrgId;
use vault_index::{Filter, MessageDoc, SearchQuery, SortOrder};
use vault_mime::{collect_cas_refs, extract_view, list_headers, rehydrate, AttachmentView, HeaderView};
use vault_store::{cas_key, message_key, StoreError};

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub org_id: i64,
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Comma-separated domain restriction, expanded by domain aliasing.
    pub user_domain: Option<String>,
    /// 'sent' | 'received' | 'internal', relative to the expanded domains.
    pub direction: Option<String>,
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub has_attachments: Option<bool>,
    pub is_spam: Option<bool>,
    /// Inclusive lower bound on date_timestamp (epoch seconds).
    pub date_start: Option<i64>,
    /// Exclusive upper bound on date_timestamp (epoch seconds).
    pub date_end: Option<i64>,
    pub attachment_keyword: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnnotatedHit {
    #[serde(flatten)]
    pub doc: MessageDoc,
    pub is_on_hold: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponseBody {
    pub hits: Vec<AnnotatedHit>,
    pub estimated_total: u64,
}

pub async fn search_messages(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let org = OrgId(params.org_id);
    let mut clauses = vec![Filter::eq("org_id", org.0)];

    let mut expanded_domains: Vec<String> = Vec::new();
    if let Some(user_domain) = &params.user_domain {
        let requested: Vec<String> = user_domain
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if !requested.is_empty() {
            expanded_domains = state.tenants.expand_domains(org, &requested)?;
            clauses.push(Filter::or(
                expanded_domains.iter().map(|d| Filter::eq("domains", d.as_str())).collect(),
            ));
        }
    }

    if let Some(direction) = params.direction.as_deref() {
        if expanded_domains.is_empty() {
            return Err(ApiError::Validation(
                "direction filters require user_domain".to_string(),
            ));
        }
        let sender: Vec<Filter> = expanded_domains
            .iter()
            .map(|d| Filter::eq("sender_domain", d.as_str()))
            .collect();
        let recipient: Vec<Filter> = expanded_domains
            .iter()
            .map(|d| Filter::eq("recipient_domains", d.as_str()))
            .collect();
        match direction {
            "sent" => clauses.push(Filter::or(sender)),
            "received" => clauses.push(Filter::or(recipient)),
            "internal" => {
                clauses.push(Filter::or(sender));
                clauses.push(Filter::or(recipient));
            }
            other => {
                return Err(ApiError::Validation(format!("unknown direction: {other}")));
            }
        }
    }

    if let Some(flag) = params.has_attachments {
        clauses.push(Filter::eq("has_attachments", flag));
    }
    if let Some(flag) = params.is_spam {
        clauses.push(Filter::eq("is_spam", flag));
    }
    if let Some(start) = params.date_start {
        clauses.push(Filter::ge("date_timestamp", start));
    }
    if let Some(end) = params.date_end {
        clauses.push(Filter::lt("date_timestamp", end));
    }

    // Address and attachment keywords ride on the free-text query.
    let mut text = params.q.clone();
    for extra in [&params.from_addr, &params.to_addr, &params.attachment_keyword] {
        if let Some(extra) = extra {
            if !extra.trim().is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(extra.trim());
            }
        }
    }

    let query = SearchQuery::new(text)
        .with_filter(Filter::and(clauses))
        .with_limit(params.limit.clamp(1, 200))
        .with_offset(params.offset);
    let results = state.index.search(&query).await?;

    let snapshot = state.holds.protection_snapshot(Some(org))?;
    let hits = results
        .hits
        .into_iter()
        .map(|doc| {
            let is_on_hold = snapshot.protects(&doc);
            AnnotatedHit { doc, is_on_hold }
        })
        .collect();

    Ok(Json(SearchResponseBody { hits, estimated_total: results.estimated_total }))
}

#[derive(Debug, Deserialize)]
pub struct OrgParam {
    pub org_id: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub id: String,
    /// Plain-text body (falls back to the raw source when no text part).
    pub content: String,
    pub content_html: String,
    pub attachments: Vec<AttachmentView>,
    /// Full reconstructed MIME source.
    pub raw: String,
    /// Content addresses whose blobs were missing (degraded read).
    pub warnings: Vec<String>,
}

/// Steps 1-3 of the retrieval contract: blob, record, membership.
async fn load_message(
    state: &AppState,
    id: &str,
    org: OrgId,
) -> Result<(MessageDoc, Vec<u8>), ApiError> {
    let ciphertext = state
        .store
        .get(&message_key(id))
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => ApiError::NotFound("message".to_string()),
            other => other.into(),
        })?;
    let doc = state
        .index
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("message".to_string()))?;
    if !doc.owned_by(org) {
        return Err(ApiError::TenantDenied);
    }
    Ok((doc, ciphertext))
}

fn decrypt(doc: &MessageDoc, ciphertext: &[u8]) -> Result<Vec<u8>, ApiError> {
    let key = vault_crypto::MessageKey::from_encoded(&doc.key)?;
    Ok(key.open(ciphertext)?)
}

async fn fetch_cas_blobs(
    state: &AppState,
    plaintext: &[u8],
) -> Result<HashMap<String, Vec<u8>>, ApiError> {
    let mut blobs = HashMap::new();
    for cas_ref in collect_cas_refs(plaintext) {
        match state.store.get(&cas_key(&cas_ref)).await {
            Ok(payload) => {
                blobs.insert(cas_ref, payload);
            }
            Err(StoreError::NotFound(_)) => {
                // Degraded read: the part stays, marked, and we still answer.
                tracing::warn!(cas_ref = %cas_ref, "CAS blob missing during retrieval");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(blobs)
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<MessageBody>, ApiError> {
    let org = OrgId(params.org_id);
    let (doc, ciphertext) = load_message(&state, &id, org).await?;
    let plaintext = decrypt(&doc, &ciphertext)?;

    let blobs = fetch_cas_blobs(&state, &plaintext).await?;
    let rehydrated = rehydrate(&plaintext, &blobs, false);

    let view = extract_view(&rehydrated.bytes).unwrap_or_default();
    let raw = String::from_utf8_lossy(&rehydrated.bytes).into_owned();
    let content = if !view.text.is_empty() {
        view.text.clone()
    } else if !view.html.is_empty() {
        view.html.clone()
    } else {
        raw.clone()
    };

    Ok(Json(MessageBody {
        id,
        content,
        content_html: view.html,
        attachments: view.attachments,
        raw,
        warnings: rehydrated.missing,
    }))
}

pub async fn get_message_headers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<Vec<HeaderView>>, ApiError> {
    let org = OrgId(params.org_id);
    let (doc, ciphertext) = load_message(&state, &id, org).await?;
    let plaintext = decrypt(&doc, &ciphertext)?;
    Ok(Json(list_headers(&plaintext).unwrap_or_default()))
}

pub async fn get_message_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let org = OrgId(params.org_id);
    let doc = state
        .index
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("message".to_string()))?;
    if !doc.owned_by(org) {
        return Err(ApiError::TenantDenied);
    }

    let mut thread_clauses: Vec<Filter> = Vec::new();
    if !doc.message_id.is_empty() {
        thread_clauses.push(Filter::eq("message_id", doc.message_id.as_str()));
        thread_clauses.push(Filter::eq("in_reply_to", doc.message_id.as_str()));
        thread_clauses.push(Filter::eq("references", doc.message_id.as_str()));
    }
    for reference in &doc.references {
        thread_clauses.push(Filter::eq("message_id", reference.as_str()));
        thread_clauses.push(Filter::eq("references", reference.as_str()));
    }
    for parent in &doc.in_reply_to {
        thread_clauses.push(Filter::eq("message_id", parent.as_str()));
    }

    if thread_clauses.is_empty() {
        let snapshot = state.holds.protection_snapshot(Some(org))?;
        let is_on_hold = snapshot.protects(&doc);
        return Ok(Json(SearchResponseBody {
            hits: vec![AnnotatedHit { doc, is_on_hold }],
            estimated_total: 1,
        }));
    }

    let filter = Filter::and(vec![Filter::eq("org_id", org.0), Filter::or(thread_clauses)]);
    let mut query = SearchQuery::filtered(filter).with_limit(100);
    query.sort = SortOrder::OldestFirst;
    let results = state.index.search(&query).await?;

    let snapshot = state.holds.protection_snapshot(Some(org))?;
    let hits = results
        .hits
        .into_iter()
        .map(|doc| {
            let is_on_hold = snapshot.protects(&doc);
            AnnotatedHit { doc, is_on_hold }
        })
        .collect();
    Ok(Json(SearchResponseBody { hits, estimated_total: results.estimated_total }))
}

#[derive(Debug, Serialize)]
pub struct VerifyBody {
    pub id: String,
    pub status: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn verify_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<VerifyBody>, ApiError> {
    let org = OrgId(params.org_id);

    let doc = state
        .index
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("message".to_string()))?;
    if !doc.owned_by(org) {
        return Err(ApiError::TenantDenied);
    }

    let ciphertext = match state.store.get(&message_key(&id)).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => {
            return Ok(Json(VerifyBody {
                id,
                status: "UNAVAILABLE".into(),
                verified: false,
                sha256: None,
                stored_signature: None,
                error: Some("ciphertext blob not found".into()),
            }));
        }
        Err(e) => return Err(e.into()),
    };

    if doc.signature.is_empty() {
        return Ok(Json(VerifyBody {
            id,
            status: "UNAVAILABLE".into(),
            verified: false,
            sha256: Some(vault_common::sha256_hex(&ciphertext)),
            stored_signature: None,
            error: Some("signature not found in metadata".into()),
        }));
    }

    let valid = state.signer.verify(&ciphertext, &doc.signature);
    if !valid {
        tracing::error!(id = %id, "HMAC verification failed: stored ciphertext does not match signature");
    }
    Ok(Json(VerifyBody {
        id,
        status: if valid { "VALID".into() } else { "TAMPERED".into() },
        verified: valid,
        sha256: Some(vault_common::sha256_hex(&ciphertext)),
        stored_signature: Some(doc.signature),
        error: None,
    }))
}

#[derive(Debug, Serialize)]
pub struct PiiScanBody {
    pub id: String,
    pub pii_detected: bool,
    pub entities: Vec<vault_redact::PiiEntity>,
}

pub async fn pii_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<PiiScanBody>, ApiError> {
    let org = OrgId(params.org_id);
    let (doc, ciphertext) = load_message(&state, &id, org).await?;
    let plaintext = decrypt(&doc, &ciphertext)?;
    let view = extract_view(&plaintext).unwrap_or_default();
    let text = if view.text.is_empty() {
        String::from_utf8_lossy(&plaintext).into_owned()
    } else {
        view.text
    };
    let entities = vault_redact::identify_pii(&text);
    Ok(Json(PiiScanBody { id, pii_detected: !entities.is_empty(), entities }))
}
