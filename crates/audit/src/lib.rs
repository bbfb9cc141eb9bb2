//! vault_audit
//!
//! Append-only per-tenant audit chains with continuous re-verification.
//! - Each entry links to its predecessor: prev_hash + current_hash
//! - current_hash covers (prev_hash, actor, action, canonical details, org id)
//! - The verifier replays each chain and distinguishes link breaks from
//!   content rewrites
//!
//! The chain is tamper-evident, not tamper-proof: rewriting any entry
//! invalidates itself and every entry after it.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use vault_common::{canonical_json_string, sha256_hex, CanonError, OrgId};
use vault_db::{Database, DbError};

mod worker;

pub use worker::{run_verifier_loop, verify_all, VERIFY_INTERVAL};

/// previous_hash sentinel for the first entry of every tenant's chain.
pub const ROOT_HASH: &str = "ROOT_HASH";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
    #[error("link mismatch at id={id}: expected prev={expected}, got {got}")]
    LinkMismatch { id: i64, expected: String, got: String },
    #[error("content mismatch at id={id}: recomputed {recomputed}, stored {stored}")]
    ContentMismatch { id: i64, recomputed: String, stored: String },
}

impl AuditError {
    /// Failure kind label for alerts and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::LinkMismatch { .. } => "link mismatch",
            AuditError::ContentMismatch { .. } => "content mismatch",
            _ => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub org_id: OrgId,
    pub actor: String,
    pub action: String,
    /// Canonical JSON as stored (keys sorted, no whitespace).
    pub details: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: String,
}

/// Successful verification summary for one tenant chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub org_id: OrgId,
    pub entries: u64,
    pub head_hash: String,
}

/// Hash recipe shared by append and verify. `details` must already be in
/// canonical form; any disagreement here breaks every chain.
pub fn compute_entry_hash(
    previous: &str,
    actor: &str,
    action: &str,
    details_canonical: &str,
    org: OrgId,
) -> String {
    let payload = format!("{previous}{actor}{action}{details_canonical}{org}");
    sha256_hex(payload.as_bytes())
}

#[derive(Clone)]
pub struct AuditLog {
    db: Database,
    /// Per-tenant append locks: appends into the same chain are linearized,
    /// appends across tenants proceed in parallel.
    append_locks: Arc<std::sync::Mutex<HashMap<OrgId, Arc<Mutex<()>>>>>,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db, append_locks: Arc::new(std::sync::Mutex::new(HashMap::new())) }
    }

    fn lock_for(&self, org: OrgId) -> Arc<Mutex<()>> {
        let mut guard = self.append_locks.lock().expect("append lock map");
        guard.entry(org).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Append one entry to a tenant chain. The (read last hash, compute,
    /// insert) critical section holds that tenant's append lock.
    pub async fn append(
        &self,
        org: OrgId,
        actor: &str,
        action: &str,
        details: &serde_json::Value,
    ) -> Result<AuditEntry, AuditError> {
        let details_canonical = canonical_json_string(details)?;
        let lock = self.lock_for(org);
        let _guard = lock.lock().await;

        let previous = self.last_hash(org)?;
        let current = compute_entry_hash(&previous, actor, action, &details_canonical, org);

        let entry = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (org_id, actor, action, details, previous_hash, current_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (org.0, actor, action, &details_canonical, &previous, &current),
            )?;
            let id = conn.last_insert_rowid();
            let created_at: String = conn.query_row(
                "SELECT created_at FROM audit_logs WHERE id = ?1",
                [id],
                |r| r.get(0),
            )?;
            Ok(AuditEntry {
                id,
                org_id: org,
                actor: actor.to_string(),
                action: action.to_string(),
                details: details_canonical.clone(),
                previous_hash: previous.clone(),
                current_hash: current.clone(),
                created_at,
            })
        })?;
        Ok(entry)
    }

    fn last_hash(&self, org: OrgId) -> Result<String, AuditError> {
        let hash = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT current_hash FROM audit_logs WHERE org_id = ?1 ORDER BY id DESC LIMIT 1",
            )?;
            let mut rows = stmt.query([org.0])?;
            match rows.next()? {
                Some(row) => Ok(row.get::<_, String>(0)?),
                None => Ok(ROOT_HASH.to_string()),
            }
        })?;
        Ok(hash)
    }

    /// Newest-first listing for the admin surface.
    pub fn list(&self, org: OrgId, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, actor, action, details, previous_hash, current_hash, created_at
                 FROM audit_logs WHERE org_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map((org.0, limit as i64), |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    org_id: org,
                    actor: row.get(1)?,
                    action: row.get(2)?,
                    details: row.get(3)?,
                    previous_hash: row.get(4)?,
                    current_hash: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;
        Ok(entries)
    }

    /// Replay one tenant's chain in id order. Stops at the first failure and
    /// names the failing entry and failure kind.
    pub fn verify(&self, org: OrgId) -> Result<ChainReport, AuditError> {
        let entries = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, actor, action, details, previous_hash, current_hash
                 FROM audit_logs WHERE org_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([org.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        let mut expected_prev = ROOT_HASH.to_string();
        let mut count = 0u64;
        for (id, actor, action, details, previous_hash, current_hash) in entries {
            if previous_hash != expected_prev {
                return Err(AuditError::LinkMismatch {
                    id,
                    expected: expected_prev,
                    got: previous_hash,
                });
            }
            // Recanonicalize before hashing: a hand-edited row must not dodge
            // the content check via formatting alone.
            let details_value: serde_json::Value =
                serde_json::from_str(&details).unwrap_or(serde_json::Value::Null);
            let details_canonical = canonical_json_string(&details_value)?;
            let recomputed =
                compute_entry_hash(&previous_hash, &actor, &action, &details_canonical, org);
            if recomputed != current_hash {
                return Err(AuditError::ContentMismatch { id, recomputed, stored: current_hash });
            }
            expected_prev = current_hash;
            count += 1;
        }
        Ok(ChainReport { org_id: org, entries: count, head_hash: expected_prev })
    }
}
