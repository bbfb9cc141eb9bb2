//! Scheduled chain verifier.
//!
//! Re-verifies every tenant's chain on a fixed cadence. A failure raises a
//! high-severity alert naming the failing entry and failure kind; the chain
//! is never auto-remediated.

use crate::{AuditError, AuditLog};
use std::time::Duration;
use tokio::sync::watch;
use vault_common::OrgId;

pub const VERIFY_INTERVAL: Duration = Duration::from_secs(600);

/// One verification sweep over the given tenants. Returns the number of
/// chains that failed.
pub fn verify_all(audit: &AuditLog, orgs: &[OrgId]) -> usize {
    let mut failures = 0;
    for org in orgs {
        match audit.verify(*org) {
            Ok(report) => {
                tracing::debug!(
                    org = %report.org_id,
                    entries = report.entries,
                    head = %report.head_hash,
                    "audit chain verified"
                );
            }
            Err(e @ (AuditError::LinkMismatch { .. } | AuditError::ContentMismatch { .. })) => {
                failures += 1;
                tracing::error!(
                    org = %org,
                    kind = e.kind(),
                    detail = %e,
                    "TAMPERING DETECTED in audit chain"
                );
            }
            Err(e) => {
                failures += 1;
                tracing::error!(org = %org, error = %e, "audit chain verification errored");
            }
        }
    }
    failures
}

/// Background loop: sweep all tenants every `interval`, observing shutdown at
/// every loop boundary.
pub async fn run_verifier_loop<F>(
    audit: AuditLog,
    list_orgs: F,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn() -> Vec<OrgId> + Send + 'static,
{
    tracing::info!(interval_secs = interval.as_secs(), "audit chain verifier started");
    loop {
        let orgs = list_orgs();
        let failures = verify_all(&audit, &orgs);
        if failures == 0 {
            tracing::debug!(chains = orgs.len(), "verification sweep clean");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("audit chain verifier stopping");
                    return;
                }
            }
        }
    }
}
