//! vault_core
//!
//! The archive core: trusted ingress for edge agents (sync + CAS), the
//! tenant-scoped read API (search, retrieval, threads, integrity checks),
//! the admin surface for holds/retention/audit, and the two background
//! lifecycle workers (retention purger, audit chain verifier).

pub mod admin;
pub mod error;
pub mod ingest;
pub mod messages;
pub mod state;
pub mod sync;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/sync", post(sync::post_sync))
        .route("/api/v1/cas/check", post(sync::post_cas_check))
        .route("/api/v1/cas/upload", post(sync::post_cas_upload))
        .route("/api/v1/messages", get(messages::search_messages))
        .route("/api/v1/messages/{id}", get(messages::get_message))
        .route("/api/v1/messages/{id}/headers", get(messages::get_message_headers))
        .route("/api/v1/messages/{id}/thread", get(messages::get_message_thread))
        .route("/api/v1/messages/{id}/verify", get(messages::verify_message))
        .route("/api/v1/messages/{id}/pii-scan", get(messages::pii_scan))
        .route("/api/v1/admin/audit-logs", get(admin::list_audit_logs).post(admin::append_audit_log))
        .route("/api/v1/admin/audit-logs/verify", get(admin::verify_audit_chain))
        .route("/api/v1/admin/holds", get(admin::list_holds).post(admin::create_hold))
        .route("/api/v1/admin/holds/apply", post(admin::apply_hold))
        .route("/api/v1/admin/holds/{public_id}", get(admin::get_hold))
        .route("/api/v1/admin/holds/{public_id}/release", post(admin::release_hold))
        .route("/api/v1/admin/retention", get(admin::list_retention).post(admin::create_retention))
        .route("/api/v1/admin/retention/run", post(admin::run_retention))
        .route("/api/v1/admin/exports", post(admin::create_export))
        .route("/api/v1/downloads/{filename}", get(admin::download))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "healthy"}))
}
