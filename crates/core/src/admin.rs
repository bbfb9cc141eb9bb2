//! Admin surface: audit chains, legal holds, retention policies, exports.
//!
//! Organization/user/case CRUD belongs to the external administration
//! service; what lives here is the compliance machinery itself.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use vault_audit::{AuditEntry, AuditError};
use vault_common::OrgId;
use vault_export::ExportFormat;
use vault_holds::{Hold, HoldCriteria, HoldItemDetail};
use vault_retention::RetentionPolicy;

#[derive(Debug, Deserialize)]
pub struct OrgParam {
    pub org_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct OptionalOrgParam {
    pub org_id: Option<i64>,
}

// ----------------------------
// Audit logs
// ----------------------------

#[derive(Debug, Deserialize)]
pub struct AuditListParams {
    pub org_id: i64,
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditListParams>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(state.audit.list(OrgId(params.org_id), params.limit)?))
}

#[derive(Debug, Deserialize)]
pub struct AuditAppendRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

fn default_actor() -> String {
    "admin".to_string()
}

#[derive(Debug, Serialize)]
pub struct AuditAppendResponse {
    pub status: String,
    pub hash: String,
}

pub async fn append_audit_log(
    State(state): State<AppState>,
    Query(params): Query<OrgParam>,
    Json(entry): Json<AuditAppendRequest>,
) -> Result<Json<AuditAppendResponse>, ApiError> {
    let appended = state
        .audit
        .append(OrgId(params.org_id), &entry.actor, &entry.action, &entry.details)
        .await?;
    Ok(Json(AuditAppendResponse { status: "logged".into(), hash: appended.current_hash }))
}

#[derive(Debug, Serialize)]
pub struct ChainVerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn verify_audit_chain(
    State(state): State<AppState>,
    Query(params): Query<OrgParam>,
) -> Result<Json<ChainVerifyResponse>, ApiError> {
    match state.audit.verify(OrgId(params.org_id)) {
        Ok(report) => Ok(Json(ChainVerifyResponse {
            valid: true,
            log_count: Some(report.entries),
            head_hash: Some(report.head_hash),
            error: None,
        })),
        Err(e @ (AuditError::LinkMismatch { .. } | AuditError::ContentMismatch { .. })) => {
            let id = match &e {
                AuditError::LinkMismatch { id, .. } | AuditError::ContentMismatch { id, .. } => *id,
                _ => unreachable!(),
            };
            Ok(Json(ChainVerifyResponse {
                valid: false,
                log_count: None,
                head_hash: None,
                error: Some(format!("{} at id={id}", e.kind())),
            }))
        }
        Err(e) => Err(e.into()),
    }
}

// ----------------------------
// Legal holds
// ----------------------------

pub async fn list_holds(
    State(state): State<AppState>,
    Query(params): Query<OrgParam>,
) -> Result<Json<Vec<Hold>>, ApiError> {
    Ok(Json(state.holds.list(OrgId(params.org_id))?))
}

#[derive(Debug, Deserialize)]
pub struct HoldCreateRequest {
    pub name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub filter_criteria: HoldCriteria,
}

#[derive(Debug, Serialize)]
pub struct HoldCreateResponse {
    pub status: String,
    pub id: String,
    pub auto_held_count: usize,
}

pub async fn create_hold(
    State(state): State<AppState>,
    Query(params): Query<OrgParam>,
    Json(req): Json<HoldCreateRequest>,
) -> Result<Json<HoldCreateResponse>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("hold name must not be empty".into()));
    }
    let org = OrgId(params.org_id);
    let (hold, auto_held) =
        state.holds.create(org, req.name.trim(), &req.reason, req.filter_criteria).await?;
    let details = serde_json::json!({
        "hold": hold.public_id,
        "name": hold.name,
        "auto_held": auto_held,
    });
    state.audit.append(org, "admin", "HOLD_CREATED", &details).await?;
    Ok(Json(HoldCreateResponse {
        status: "created".into(),
        id: hold.public_id,
        auto_held_count: auto_held,
    }))
}

#[derive(Debug, Serialize)]
pub struct HoldDetailResponse {
    pub hold: Hold,
    pub items: Vec<HoldItemDetail>,
}

pub async fn get_hold(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<HoldDetailResponse>, ApiError> {
    let (hold, items) = state.holds.get(&public_id, OrgId(params.org_id)).await?;
    Ok(Json(HoldDetailResponse { hold, items }))
}

pub async fn release_hold(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    Query(params): Query<OrgParam>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let org = OrgId(params.org_id);
    state.holds.release(&public_id, org)?;
    let details = serde_json::json!({"hold": public_id});
    state.audit.append(org, "admin", "HOLD_RELEASED", &details).await?;
    Ok(Json(serde_json::json!({"status": "released", "id": public_id})))
}

#[derive(Debug, Deserialize)]
pub struct HoldApplyRequest {
    pub hold_id: String,
    pub message_ids: Vec<String>,
}

pub async fn apply_hold(
    State(state): State<AppState>,
    Query(params): Query<OrgParam>,
    Json(req): Json<HoldApplyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let org = OrgId(params.org_id);
    let applied = state.holds.apply(&req.hold_id, org, &req.message_ids)?;
    let details = serde_json::json!({"hold": req.hold_id, "applied": applied});
    state.audit.append(org, "admin", "HOLD_APPLIED", &details).await?;
    Ok(Json(serde_json::json!({"status": "applied", "count": applied})))
}

// ----------------------------
// Retention
// ----------------------------

pub async fn list_retention(
    State(state): State<AppState>,
    Query(params): Query<OptionalOrgParam>,
) -> Result<Json<Vec<RetentionPolicy>>, ApiError> {
    Ok(Json(state.policies.list(params.org_id.map(OrgId))?))
}

#[derive(Debug, Deserialize)]
pub struct RetentionCreateRequest {
    pub name: String,
    pub domains: Vec<String>,
    pub retention_days: i64,
}

pub async fn create_retention(
    State(state): State<AppState>,
    Query(params): Query<OptionalOrgParam>,
    Json(req): Json<RetentionCreateRequest>,
) -> Result<Json<RetentionPolicy>, ApiError> {
    if req.retention_days <= 0 {
        return Err(ApiError::Validation("retention_days must be positive".into()));
    }
    if req.domains.is_empty() {
        return Err(ApiError::Validation("policy needs at least one domain".into()));
    }
    let policy = state.policies.create(
        params.org_id.map(OrgId),
        req.name.trim(),
        &req.domains,
        req.retention_days,
    )?;
    Ok(Json(policy))
}

pub async fn run_retention(
    State(state): State<AppState>,
) -> Result<Json<vault_retention::PurgeReport>, ApiError> {
    let report = state.retention.run_once(state.now_epoch()).await?;
    Ok(Json(report))
}

// ----------------------------
// Exports
// ----------------------------

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub case_id: i64,
    pub org_id: i64,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub redact: bool,
}

fn default_format() -> String {
    "native".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub status: String,
    pub job_id: String,
    pub download_url: String,
    pub exported: u64,
    pub failed: u64,
}

pub async fn create_export(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, ApiError> {
    let org = OrgId(req.org_id);
    let format = ExportFormat::from_str(&req.format)?;
    let message_ids = state.cases.message_ids(req.case_id, org)?;
    if message_ids.is_empty() {
        return Err(ApiError::Validation("case has no items to export".into()));
    }

    let job_id = Uuid::new_v4().to_string();
    let (zip_bytes, report) =
        state.exports.export(&job_id, &message_ids, format, req.redact).await?;

    tokio::fs::create_dir_all(&state.export_dir).await?;
    let filename = format!("{job_id}.zip");
    tokio::fs::write(state.export_dir.join(&filename), &zip_bytes).await?;

    let details = serde_json::json!({
        "case_id": req.case_id,
        "format": req.format,
        "redact": req.redact,
        "exported": report.exported,
        "failed": report.failed,
    });
    state.audit.append(org, "admin", "CASE_EXPORTED", &details).await?;

    tracing::info!(job = %job_id, exported = report.exported, failed = report.failed, "export complete");
    Ok(Json(ExportResponse {
        status: "complete".into(),
        download_url: format!("/api/v1/downloads/{filename}"),
        job_id,
        exported: report.exported,
        failed: report.failed,
    }))
}

pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::Validation("invalid filename".into()));
    }
    let path = state.export_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file".into()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    )
        .into_response())
}
