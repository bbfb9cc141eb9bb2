//! vault_retention
//!
//! Retention policies and the purge worker. A message is disposal-eligible
//! under a policy when any of its involved domains matches and its parsed
//! timestamp is older than `now - days`. `date_timestamp = 0` means
//! "unparseable" and is never eligible.
//!
//! Holds always win: the protection predicate is re-checked per candidate
//! immediately before deletion, so a hold created mid-pass still protects
//! every message whose deletion step starts after it.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use vault_audit::AuditLog;
use vault_common::OrgId;
use vault_db::{decode_string_list, encode_string_list, Database, DbError};
use vault_holds::{HoldError, HoldRegistry};
use vault_index::{Filter, IndexError, SearchIndex, SearchQuery, SortOrder};
use vault_store::{message_key, BlobStore, StoreError};

/// Candidates examined per (policy, domain) per pass.
pub const CANDIDATE_CAP: usize = 1_000;
pub const RUN_INTERVAL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("hold registry error: {0}")]
    Holds(#[from] HoldError),
}

// ----------------------------
// Policies
// ----------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RetentionPolicy {
    pub id: i64,
    /// None = global policy.
    pub org_id: Option<OrgId>,
    pub name: String,
    pub domains: Vec<String>,
    pub retention_days: i64,
    pub action: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct RetentionStore {
    db: Database,
}

impl RetentionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        org: Option<OrgId>,
        name: &str,
        domains: &[String],
        retention_days: i64,
    ) -> Result<RetentionPolicy, RetentionError> {
        let domains_json = encode_string_list(domains)?;
        let policy = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO retention_policies (org_id, name, domains, retention_days)
                 VALUES (?1, ?2, ?3, ?4)",
                (org.map(|o| o.0), name, &domains_json, retention_days),
            )?;
            let id = conn.last_insert_rowid();
            let created_at: String = conn.query_row(
                "SELECT created_at FROM retention_policies WHERE id = ?1",
                [id],
                |r| r.get(0),
            )?;
            Ok(RetentionPolicy {
                id,
                org_id: org,
                name: name.to_string(),
                domains: domains.to_vec(),
                retention_days,
                action: "PERMANENT_DELETE".to_string(),
                active: true,
                created_at,
            })
        })?;
        Ok(policy)
    }

    /// Policies for the admin listing: org-scoped for `Some`, global for `None`.
    pub fn list(&self, org: Option<OrgId>) -> Result<Vec<RetentionPolicy>, RetentionError> {
        self.query(match org {
            Some(o) => ListScope::Org(o),
            None => ListScope::Global,
        })
    }

    /// Everything active, org-scoped and global alike: the worker's view.
    pub fn list_active(&self) -> Result<Vec<RetentionPolicy>, RetentionError> {
        self.query(ListScope::AllActive)
    }

    fn query(&self, scope: ListScope) -> Result<Vec<RetentionPolicy>, RetentionError> {
        let policies = self.db.with_conn(|conn| {
            let sql_base = "SELECT id, org_id, name, domains, retention_days, action, active, created_at
                 FROM retention_policies";
            let sql = match scope {
                ListScope::Org(_) => format!("{sql_base} WHERE org_id = ?1 ORDER BY created_at DESC"),
                ListScope::Global => format!("{sql_base} WHERE org_id IS NULL ORDER BY created_at DESC"),
                ListScope::AllActive => format!("{sql_base} WHERE active = 1 ORDER BY id ASC"),
            };
            let mut stmt = conn.prepare(&sql)?;
            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(i64, Option<i64>, String, Option<String>, i64, String, i64, String)> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            };
            let rows: Vec<_> = match scope {
                ListScope::Org(o) => {
                    let rows = stmt.query_map([o.0], map_row)?;
                    rows.collect::<rusqlite::Result<_>>()?
                }
                _ => {
                    let rows = stmt.query_map([], map_row)?;
                    rows.collect::<rusqlite::Result<_>>()?
                }
            };
            let mut out = Vec::new();
            for (id, org_id, name, domains_raw, retention_days, action, active, created_at) in rows {
                out.push(RetentionPolicy {
                    id,
                    org_id: org_id.map(OrgId),
                    name,
                    domains: decode_string_list(domains_raw)?,
                    retention_days,
                    action,
                    active: active != 0,
                    created_at,
                });
            }
            Ok(out)
        })?;
        Ok(policies)
    }
}

#[derive(Clone, Copy)]
enum ListScope {
    Org(OrgId),
    Global,
    AllActive,
}

// ----------------------------
// Purge worker
// ----------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub examined: u64,
    pub purged: u64,
    pub skipped_held: u64,
    pub per_domain: Vec<DomainPurge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainPurge {
    pub domain: String,
    pub purged: u64,
}

#[derive(Clone)]
pub struct RetentionWorker {
    policies: RetentionStore,
    holds: HoldRegistry,
    index: Arc<dyn SearchIndex>,
    store: Arc<dyn BlobStore>,
    audit: AuditLog,
}

impl RetentionWorker {
    pub fn new(
        policies: RetentionStore,
        holds: HoldRegistry,
        index: Arc<dyn SearchIndex>,
        store: Arc<dyn BlobStore>,
        audit: AuditLog,
    ) -> Self {
        Self { policies, holds, index, store, audit }
    }

    /// One full pass over all active policies. `now` is epoch seconds.
    pub async fn run_once(&self, now: i64) -> Result<PurgeReport, RetentionError> {
        let policies = self.policies.list_active()?;
        if policies.is_empty() {
            tracing::info!("no retention policies defined, skipping purge");
            return Ok(PurgeReport::default());
        }

        // Pass-start snapshot: a cheap first filter. The authoritative check
        // happens again per candidate right before deletion.
        let pass_snapshot = self.holds.protection_snapshot(None)?;

        let mut report = PurgeReport::default();
        for policy in policies {
            let cutoff = now - policy.retention_days * 86_400;
            for domain in &policy.domains {
                let filter = Filter::and(vec![
                    Filter::eq("domains", domain.as_str()),
                    Filter::ge("date_timestamp", 1),
                    Filter::lt("date_timestamp", cutoff),
                ]);
                let mut query = SearchQuery::filtered(filter).with_limit(CANDIDATE_CAP);
                query.sort = SortOrder::OldestFirst;
                let candidates = self.index.search(&query).await?.hits;

                tracing::info!(
                    domain = %domain,
                    days = policy.retention_days,
                    cutoff,
                    candidates = candidates.len(),
                    "retention pass"
                );

                let mut purged_here = 0u64;
                for doc in candidates {
                    report.examined += 1;
                    if pass_snapshot.protects(&doc) {
                        report.skipped_held += 1;
                        continue;
                    }
                    // Deletion-step re-check against fresh hold state. A hold
                    // created after the pass started still protects this
                    // message.
                    let fresh = self.holds.protection_snapshot(None)?;
                    if fresh.protects(&doc) {
                        report.skipped_held += 1;
                        tracing::debug!(id = %doc.id, "protected since pass start, skipping");
                        continue;
                    }

                    if let Err(e) = self.purge_message(&doc.id).await {
                        tracing::error!(id = %doc.id, error = %e, "failed to purge message");
                        continue;
                    }
                    purged_here += 1;
                    report.purged += 1;
                }

                if purged_here > 0 {
                    report
                        .per_domain
                        .push(DomainPurge { domain: domain.clone(), purged: purged_here });
                    tracing::info!(domain = %domain, purged = purged_here, "purged expired messages");
                    if let Some(org) = policy.org_id {
                        let details = serde_json::json!({
                            "policy": policy.name,
                            "domain": domain,
                            "purged": purged_here,
                            "cutoff": cutoff,
                        });
                        if let Err(e) =
                            self.audit.append(org, "system", "RETENTION_PURGE", &details).await
                        {
                            tracing::error!(org = %org, error = %e, "failed to audit purge");
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    async fn purge_message(&self, id: &str) -> Result<(), RetentionError> {
        self.index.delete(id).await?;
        self.store.delete(&message_key(id)).await?;
        Ok(())
    }
}

/// Background loop: one pass every `interval`, observing shutdown at loop
/// boundaries. `now` is sampled from the system clock at each pass.
pub async fn run_retention_loop(
    worker: RetentionWorker,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "retention worker started");
    loop {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        match worker.run_once(now).await {
            Ok(report) => {
                tracing::info!(purged = report.purged, examined = report.examined, "retention pass done");
            }
            Err(e) => tracing::error!(error = %e, "retention pass failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("retention worker stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_holds::HoldCriteria;
    use vault_index::{MemoryIndex, MessageDoc};
    use vault_store::MemoryBlobStore;

    const NOW: i64 = 1_000_000_000;
    const DAY: i64 = 86_400;

    struct Fixture {
        worker: RetentionWorker,
        index: MemoryIndex,
        store: MemoryBlobStore,
        holds: HoldRegistry,
        policies: RetentionStore,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO organizations (name, slug) VALUES ('A', 'a')", [])?;
            Ok(())
        })
        .unwrap();
        let index = MemoryIndex::new();
        let store = MemoryBlobStore::new();
        let holds = HoldRegistry::new(db.clone(), Arc::new(index.clone()));
        let policies = RetentionStore::new(db.clone());
        let audit = AuditLog::new(db);
        let worker = RetentionWorker::new(
            policies.clone(),
            holds.clone(),
            Arc::new(index.clone()),
            Arc::new(store.clone()),
            audit,
        );
        Fixture { worker, index, store, holds, policies }
    }

    async fn seed_message(fx: &Fixture, id: &str, domain: &str, age_days: i64, sender: &str) {
        fx.index
            .upsert(vec![MessageDoc {
                id: id.into(),
                org_id: vec![OrgId(1)],
                domains: vec![domain.into()],
                date_timestamp: NOW - age_days * DAY,
                sender_email: Some(sender.into()),
                from: format!("<{sender}>"),
                ..Default::default()
            }])
            .await
            .unwrap();
        fx.store.put(&message_key(id), b"ciphertext").await.unwrap();
    }

    #[tokio::test]
    async fn expired_unheld_messages_are_purged() {
        let fx = fixture();
        seed_message(&fx, "old", "acme.com", 10, "x@acme.com").await;
        seed_message(&fx, "fresh", "acme.com", 0, "x@acme.com").await;
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();

        let report = fx.worker.run_once(NOW).await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(fx.index.get("old").await.unwrap().is_none());
        assert!(!fx.store.head(&message_key("old")).await.unwrap());
        assert!(fx.index.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn held_sender_blocks_purge() {
        let fx = fixture();
        seed_message(&fx, "m", "acme.com", 10, "alice@acme.com").await;
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();
        fx.holds
            .create(
                OrgId(1),
                "investigation",
                "",
                HoldCriteria { from: Some("alice@acme.com".into()), ..Default::default() },
            )
            .await
            .unwrap();

        let report = fx.worker.run_once(NOW).await.unwrap();
        assert_eq!(report.purged, 0);
        assert_eq!(report.skipped_held, 1);
        assert!(fx.index.get("m").await.unwrap().is_some());
        assert!(fx.store.head(&message_key("m")).await.unwrap());
    }

    #[tokio::test]
    async fn explicit_item_blocks_purge() {
        let fx = fixture();
        seed_message(&fx, "m", "acme.com", 10, "x@acme.com").await;
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();
        let (hold, _) =
            fx.holds.create(OrgId(1), "h", "", HoldCriteria::default()).await.unwrap();
        fx.holds.apply(&hold.public_id, OrgId(1), &["m".into()]).unwrap();

        let report = fx.worker.run_once(NOW).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(fx.index.get("m").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unparseable_dates_are_never_eligible() {
        let fx = fixture();
        fx.index
            .upsert(vec![MessageDoc {
                id: "undated".into(),
                org_id: vec![OrgId(1)],
                domains: vec!["acme.com".into()],
                date_timestamp: 0,
                ..Default::default()
            }])
            .await
            .unwrap();
        fx.store.put(&message_key("undated"), b"c").await.unwrap();
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();

        let report = fx.worker.run_once(NOW).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(fx.index.get("undated").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn domains_outside_policy_are_untouched() {
        let fx = fixture();
        seed_message(&fx, "other", "other.net", 100, "x@other.net").await;
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();

        let report = fx.worker.run_once(NOW).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(fx.index.get("other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_appends_audit_entry_for_org_policies() {
        let fx = fixture();
        seed_message(&fx, "old", "acme.com", 10, "x@acme.com").await;
        fx.policies.create(Some(OrgId(1)), "short", &["acme.com".into()], 1).unwrap();

        fx.worker.run_once(NOW).await.unwrap();
        let report = fx.worker.audit.verify(OrgId(1)).unwrap();
        assert_eq!(report.entries, 1);
    }

    #[test]
    fn listing_separates_org_and_global_policies() {
        let fx = fixture();
        fx.policies.create(Some(OrgId(1)), "org", &["a.com".into()], 30).unwrap();
        fx.policies.create(None, "global", &["b.com".into()], 365).unwrap();

        let org_policies = fx.policies.list(Some(OrgId(1))).unwrap();
        assert_eq!(org_policies.len(), 1);
        assert_eq!(org_policies[0].name, "org");

        let global = fx.policies.list(None).unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].name, "global");

        assert_eq!(fx.policies.list_active().unwrap().len(), 2);
    }
}
