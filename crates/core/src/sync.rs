//! Trusted ingress: message sync batches and the stateless CAS endpoints.
//!
//! Per item the happy path is blob put, then index upsert (batched), with an
//! optional tenant-resolve lookup in between. Items fail independently;
//! the response reports how many were processed. Blob upload always precedes
//! indexing so a crash never leaves an index document without its blob.

use crate::error::ApiError;
use crate::ingest::build_document;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashMap;
use vault_common::wire::{
    CasCheckRequest, CasUploadBatch, CasUploadResponse, SyncBatch, SyncResponse, API_KEY_HEADER,
};
use vault_store::{cas_key, message_key};

pub(crate) fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
    if presented != state.api_key {
        tracing::warn!("rejected write with bad API key");
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

pub async fn post_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SyncBatch>,
) -> Result<Json<SyncResponse>, ApiError> {
    require_api_key(&state, &headers)?;

    let mut documents = Vec::new();
    for item in &payload.batch {
        let ciphertext = match BASE64.decode(&item.blob_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(id = %item.id, error = %e, "bad blob encoding, skipping item");
                continue;
            }
        };

        if let Err(e) = state.store.put(&message_key(&item.id), &ciphertext).await {
            tracing::error!(id = %item.id, error = %e, "blob upload failed, skipping item");
            continue;
        }

        let involved = vault_common::addr::collect_domains(
            [
                item.metadata.from.as_str(),
                item.metadata.to.as_str(),
                item.metadata.envelope_from.as_str(),
            ]
            .into_iter()
            .chain(item.metadata.envelope_rcpt.iter().map(|s| s.as_str())),
        );
        let orgs = match state.tenants.resolve_orgs(&involved) {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::error!(id = %item.id, error = %e, "tenant resolution failed, using default org");
                vec![state.tenants.default_org()]
            }
        };

        documents.push(build_document(item, &ciphertext, orgs, &state.signer));
    }

    let processed = documents.len();
    if !documents.is_empty() {
        state.index.upsert(documents).await?;
    }
    tracing::info!(received = payload.batch.len(), processed, "sync batch ingested");
    Ok(Json(SyncResponse { status: "ok".into(), processed }))
}

pub async fn post_cas_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CasCheckRequest>,
) -> Result<Json<HashMap<String, bool>>, ApiError> {
    require_api_key(&state, &headers)?;
    let mut result = HashMap::with_capacity(payload.hashes.len());
    for hash in payload.hashes {
        let exists = state.store.head(&cas_key(&hash)).await?;
        result.insert(hash, exists);
    }
    Ok(Json(result))
}

pub async fn post_cas_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CasUploadBatch>,
) -> Result<Json<CasUploadResponse>, ApiError> {
    require_api_key(&state, &headers)?;
    let mut saved = 0;
    for item in payload.batch {
        let payload_bytes = match BASE64.decode(&item.blob_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(hash = %item.hash, error = %e, "bad CAS blob encoding");
                continue;
            }
        };
        match state.store.put(&cas_key(&item.hash), &payload_bytes).await {
            Ok(()) => saved += 1,
            Err(e) => tracing::error!(hash = %item.hash, error = %e, "CAS upload failed"),
        }
    }
    Ok(Json(CasUploadResponse { status: "ok".into(), saved }))
}
