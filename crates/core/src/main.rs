//! mailvault-core
//!
//! Archive core service: trusted agent ingress, tenant-scoped read API,
//! compliance admin surface, and the retention + audit-verifier workers.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use vault_common::OrgId;
use vault_core::state::AppState;
use vault_crypto::{MasterCipher, Signer};
use vault_db::Database;
use vault_export::TextRenderer;
use vault_index::{HttpSearchIndex, MemoryIndex, SearchIndex};
use vault_store::{BlobStore, EncryptedBlobStore, FsBlobStore, HttpBlobStore};
use vault_tenancy::TenantDirectory;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "mailvault-core", version, about = "MailVault archive core")]
struct Args {
    /// Listen address.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Shared write credential for agent sync endpoints.
    #[arg(long, env = "CORE_API_KEY", default_value = "secret")]
    api_key: String,

    /// Master secret for the at-rest blob cipher. The process refuses to
    /// start without it.
    #[arg(long, env = "MAILVAULT_MASTER_SECRET")]
    master_secret: String,

    /// HMAC secret for ciphertext integrity signatures.
    #[arg(long, env = "MAILVAULT_SIGNING_SECRET")]
    signing_secret: String,

    /// Relational store path.
    #[arg(long, env = "DATABASE_PATH", default_value = "mailvault.db")]
    database_path: PathBuf,

    /// Object store endpoint; falls back to a local directory store when
    /// unset (single-node deployments).
    #[arg(long, env = "BLOB_STORE_URL")]
    blob_store_url: Option<String>,

    #[arg(long, env = "BLOB_STORE_BUCKET", default_value = "archive-blobs")]
    blob_store_bucket: String,

    #[arg(long, env = "BLOB_STORE_TOKEN")]
    blob_store_token: Option<String>,

    /// Local directory for the fallback blob store.
    #[arg(long, env = "BLOB_STORE_DIR", default_value = "blobs")]
    blob_store_dir: PathBuf,

    /// Search index endpoint; falls back to the in-memory index when unset
    /// (dev only: the in-memory index does not survive restarts).
    #[arg(long, env = "SEARCH_INDEX_URL")]
    search_index_url: Option<String>,

    #[arg(long, env = "SEARCH_INDEX_KEY")]
    search_index_key: Option<String>,

    #[arg(long, env = "SEARCH_INDEX_UID", default_value = "emails")]
    search_index_uid: String,

    /// Fallback organization for messages no tenant claims.
    #[arg(long, env = "DEFAULT_ORG_ID", default_value_t = 1)]
    default_org: i64,

    /// Directory for export archives.
    #[arg(long, env = "EXPORT_DIR", default_value = "exports")]
    export_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Process-wide singletons: master cipher, signer, backends.
    let cipher = Arc::new(MasterCipher::derive(&args.master_secret));
    let signer = Arc::new(Signer::new(&args.signing_secret));

    let store: Arc<dyn BlobStore> = match &args.blob_store_url {
        Some(url) => Arc::new(EncryptedBlobStore::new(
            HttpBlobStore::new(
                url.clone(),
                args.blob_store_bucket.clone(),
                args.blob_store_token.clone(),
                HTTP_TIMEOUT,
            )?,
            cipher,
        )),
        None => {
            tracing::info!(dir = %args.blob_store_dir.display(), "using local directory blob store");
            Arc::new(EncryptedBlobStore::new(FsBlobStore::new(&args.blob_store_dir), cipher))
        }
    };

    let index: Arc<dyn SearchIndex> = match &args.search_index_url {
        Some(url) => {
            let http = HttpSearchIndex::new(
                url.clone(),
                args.search_index_uid.clone(),
                args.search_index_key.clone(),
                HTTP_TIMEOUT,
            )?;
            if let Err(e) = http.ensure_settings().await {
                tracing::warn!(error = %e, "failed to push index settings, continuing");
            }
            Arc::new(http)
        }
        None => {
            tracing::warn!("no search index configured, using in-memory index (dev only)");
            Arc::new(MemoryIndex::new())
        }
    };

    let db = Database::open(&args.database_path)?;
    seed_default_org(&db, OrgId(args.default_org))?;

    let state = AppState::build(
        store,
        index,
        db,
        signer,
        args.api_key.clone(),
        OrgId(args.default_org),
        args.export_dir.clone(),
        Arc::new(TextRenderer),
    );

    // Background lifecycle workers.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_task = tokio::spawn(vault_retention::run_retention_loop(
        state.retention.clone(),
        vault_retention::RUN_INTERVAL,
        shutdown_rx.clone(),
    ));
    let verifier_tenants = state.tenants.clone();
    let verifier_task = tokio::spawn(vault_audit::run_verifier_loop(
        state.audit.clone(),
        move || verifier_tenants.org_ids().unwrap_or_default(),
        vault_audit::VERIFY_INTERVAL,
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(addr = %args.bind, "mailvault core listening");
    axum::serve(listener, vault_core::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = retention_task.await;
    let _ = verifier_task.await;
    Ok(())
}

/// Make sure the fallback organization exists so tenant resolution always
/// has somewhere to route unclaimed mail.
fn seed_default_org(db: &Database, default_org: OrgId) -> Result<(), vault_db::DbError> {
    let directory = TenantDirectory::new(db.clone(), default_org);
    match directory.list_orgs() {
        Ok(orgs) if orgs.iter().any(|o| o.id == default_org) => Ok(()),
        Ok(_) => {
            match directory.create_org("Default Organization", "default", &[]) {
                Ok(org) => tracing::info!(org = %org.id, "seeded default organization"),
                Err(e) => tracing::warn!(error = %e, "could not seed default organization"),
            }
            Ok(())
        }
        Err(vault_tenancy::TenancyError::Db(e)) => Err(e),
        Err(_) => Ok(()),
    }
}
