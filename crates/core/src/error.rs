//! API error mapping.
//!
//! Transport failures against the backing stores surface as 502 so callers
//! retry; integrity problems are reported in-band by the verify endpoints,
//! never auto-remediated.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API key")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied to this message")]
    TenantDenied,
    #[error("{0}")]
    Validation(String),
    #[error("upstream store unavailable")]
    Upstream,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TenantDenied => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({"detail": self.to_string()}));
        (self.status(), body).into_response()
    }
}

impl From<vault_store::StoreError> for ApiError {
    fn from(e: vault_store::StoreError) -> Self {
        match e {
            vault_store::StoreError::NotFound(key) => ApiError::NotFound(key),
            vault_store::StoreError::Transport(_) => ApiError::Upstream,
            other => {
                tracing::error!(error = %other, "store error");
                ApiError::Internal
            }
        }
    }
}

impl From<vault_index::IndexError> for ApiError {
    fn from(e: vault_index::IndexError) -> Self {
        tracing::error!(error = %e, "index error");
        match e {
            vault_index::IndexError::Transport(_) => ApiError::Upstream,
            _ => ApiError::Internal,
        }
    }
}

impl From<vault_crypto::CryptoError> for ApiError {
    fn from(e: vault_crypto::CryptoError) -> Self {
        tracing::error!(error = %e, "crypto error");
        ApiError::Internal
    }
}

impl From<vault_db::DbError> for ApiError {
    fn from(e: vault_db::DbError) -> Self {
        match e {
            vault_db::DbError::NotFound(what) => ApiError::NotFound(what),
            vault_db::DbError::Conflict(what) => ApiError::Validation(what),
            other => {
                tracing::error!(error = %other, "database error");
                ApiError::Internal
            }
        }
    }
}

impl From<vault_tenancy::TenancyError> for ApiError {
    fn from(e: vault_tenancy::TenancyError) -> Self {
        match e {
            vault_tenancy::TenancyError::NotFound(org) => ApiError::NotFound(format!("org {org}")),
            vault_tenancy::TenancyError::SlugTaken(slug) => {
                ApiError::Validation(format!("slug {slug} already exists"))
            }
            vault_tenancy::TenancyError::Db(e) => e.into(),
        }
    }
}

impl From<vault_holds::HoldError> for ApiError {
    fn from(e: vault_holds::HoldError) -> Self {
        match e {
            vault_holds::HoldError::NotFound(what) => ApiError::NotFound(what),
            vault_holds::HoldError::NameTaken(name) => {
                ApiError::Validation(format!("a hold named '{name}' already exists"))
            }
            vault_holds::HoldError::Db(e) => e.into(),
            vault_holds::HoldError::Index(e) => e.into(),
        }
    }
}

impl From<vault_audit::AuditError> for ApiError {
    fn from(e: vault_audit::AuditError) -> Self {
        tracing::error!(error = %e, "audit error");
        ApiError::Internal
    }
}

impl From<vault_retention::RetentionError> for ApiError {
    fn from(e: vault_retention::RetentionError) -> Self {
        tracing::error!(error = %e, "retention error");
        ApiError::Internal
    }
}

impl From<vault_export::ExportError> for ApiError {
    fn from(e: vault_export::ExportError) -> Self {
        match e {
            vault_export::ExportError::UnknownFormat(f) => {
                ApiError::Validation(format!("unknown export format: {f}"))
            }
            other => {
                tracing::error!(error = %other, "export error");
                ApiError::Internal
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        tracing::error!(error = %e, "io error");
        ApiError::Internal
    }
}
