//! Shared application state.
//!
//! The blob store, index, signer and relational handles are process-wide
//! singletons built once at startup; they hold no per-request state.

use std::path::PathBuf;
use std::sync::Arc;
use vault_audit::AuditLog;
use vault_crypto::Signer;
use vault_db::Database;
use vault_export::ExportPipeline;
use vault_holds::cases::CaseRegistry;
use vault_holds::HoldRegistry;
use vault_index::SearchIndex;
use vault_retention::{RetentionStore, RetentionWorker};
use vault_store::BlobStore;
use vault_tenancy::TenantDirectory;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub index: Arc<dyn SearchIndex>,
    pub db: Database,
    pub tenants: Arc<TenantDirectory>,
    pub audit: AuditLog,
    pub holds: HoldRegistry,
    pub cases: CaseRegistry,
    pub policies: RetentionStore,
    pub retention: RetentionWorker,
    pub exports: Arc<ExportPipeline>,
    pub signer: Arc<Signer>,
    pub api_key: String,
    pub export_dir: PathBuf,
}

impl AppState {
    /// Wire the full component graph over the given backends.
    pub fn build(
        store: Arc<dyn BlobStore>,
        index: Arc<dyn SearchIndex>,
        db: Database,
        signer: Arc<Signer>,
        api_key: String,
        default_org: vault_common::OrgId,
        export_dir: PathBuf,
        renderer: Arc<dyn vault_export::MessageRenderer>,
    ) -> Self {
        let tenants = Arc::new(TenantDirectory::new(db.clone(), default_org));
        let audit = AuditLog::new(db.clone());
        let holds = HoldRegistry::new(db.clone(), index.clone());
        let cases = CaseRegistry::new(db.clone());
        let policies = RetentionStore::new(db.clone());
        let retention = RetentionWorker::new(
            policies.clone(),
            holds.clone(),
            index.clone(),
            store.clone(),
            audit.clone(),
        );
        let exports = Arc::new(ExportPipeline::new(index.clone(), store.clone(), renderer));
        Self {
            store,
            index,
            db,
            tenants,
            audit,
            holds,
            cases,
            policies,
            retention,
            exports,
            signer,
            api_key,
            export_dir,
        }
    }

    pub fn now_epoch(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
