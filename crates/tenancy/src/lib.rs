//! vault_tenancy
//!
//! Organization directory and tenant routing. A message belongs to every
//! organization whose owned-domain set intersects the message's involved
//! domains; with no intersection it falls back to the configured default
//! org. The org -> domains map is read-mostly, so lookups go through a
//! short-TTL cache behind a single lock.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use vault_common::OrgId;
use vault_db::{decode_string_list, encode_string_list, Database, DbError};

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("organization slug already exists: {0}")]
    SlugTaken(String),
    #[error("organization not found: {0}")]
    NotFound(OrgId),
}

#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub slug: String,
    pub domains: Vec<String>,
}

struct CachedOrgs {
    orgs: Vec<Organization>,
    loaded_at: Instant,
}

pub struct TenantDirectory {
    db: Database,
    default_org: OrgId,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedOrgs>>,
}

impl TenantDirectory {
    pub fn new(db: Database, default_org: OrgId) -> Self {
        Self { db, default_org, cache_ttl: Duration::from_secs(30), cache: Mutex::new(None) }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn default_org(&self) -> OrgId {
        self.default_org
    }

    /// Create an organization. Slugs are globally unique; a domain may be
    /// owned by several organizations (duplication, not ambiguity).
    pub fn create_org(
        &self,
        name: &str,
        slug: &str,
        domains: &[String],
    ) -> Result<Organization, TenancyError> {
        let domains_json = encode_string_list(domains)?;
        let id = self.db.with_conn(|conn| {
            let taken: i64 = conn.query_row(
                "SELECT COUNT(*) FROM organizations WHERE slug = ?1",
                [slug],
                |r| r.get(0),
            )?;
            if taken > 0 {
                return Err(DbError::Conflict(format!("slug {slug}")));
            }
            conn.execute(
                "INSERT INTO organizations (name, slug, domains) VALUES (?1, ?2, ?3)",
                (name, slug, &domains_json),
            )?;
            Ok(conn.last_insert_rowid())
        });
        let id = match id {
            Ok(id) => id,
            Err(DbError::Conflict(_)) => return Err(TenancyError::SlugTaken(slug.to_string())),
            Err(e) => return Err(e.into()),
        };
        self.invalidate();
        Ok(Organization {
            id: OrgId(id),
            name: name.to_string(),
            slug: slug.to_string(),
            domains: domains.to_vec(),
        })
    }

    pub fn list_orgs(&self) -> Result<Vec<Organization>, TenancyError> {
        Ok(self.cached_orgs()?)
    }

    pub fn org_domains(&self, org: OrgId) -> Result<Vec<String>, TenancyError> {
        self.cached_orgs()?
            .into_iter()
            .find(|o| o.id == org)
            .map(|o| o.domains)
            .ok_or(TenancyError::NotFound(org))
    }

    pub fn org_ids(&self) -> Result<Vec<OrgId>, TenancyError> {
        Ok(self.cached_orgs()?.into_iter().map(|o| o.id).collect())
    }

    /// Resolve the owning-org set for a message's involved domains.
    /// Always non-empty: an empty intersection routes to the default org.
    pub fn resolve_orgs(&self, domains: &[String]) -> Result<Vec<OrgId>, TenancyError> {
        let mut matched: Vec<OrgId> = Vec::new();
        for org in self.cached_orgs()? {
            if org.domains.iter().any(|d| domains.iter().any(|m| m.eq_ignore_ascii_case(d))) {
                matched.push(org.id);
            }
        }
        if matched.is_empty() {
            tracing::debug!(?domains, fallback = %self.default_org, "no tenant matched, using default org");
            matched.push(self.default_org);
        }
        Ok(matched)
    }

    /// Domain-aliasing expansion for search: if any requested domain is owned
    /// by the caller org, the caller sees across all of that org's domains.
    pub fn expand_domains(
        &self,
        org: OrgId,
        requested: &[String],
    ) -> Result<Vec<String>, TenancyError> {
        let own = self.org_domains(org).unwrap_or_default();
        let mut expanded: Vec<String> = requested.iter().map(|d| d.to_lowercase()).collect();
        if own.iter().any(|d| expanded.iter().any(|r| r.eq_ignore_ascii_case(d))) {
            for d in own {
                let d = d.to_lowercase();
                if !expanded.contains(&d) {
                    expanded.push(d);
                }
            }
        }
        Ok(expanded)
    }

    pub fn invalidate(&self) {
        *self.cache.lock().expect("tenant cache lock") = None;
    }

    fn cached_orgs(&self) -> Result<Vec<Organization>, TenancyError> {
        {
            let guard = self.cache.lock().expect("tenant cache lock");
            if let Some(cached) = guard.as_ref() {
                if cached.loaded_at.elapsed() < self.cache_ttl {
                    return Ok(cached.orgs.clone());
                }
            }
        }
        let orgs = self.load_orgs()?;
        *self.cache.lock().expect("tenant cache lock") =
            Some(CachedOrgs { orgs: orgs.clone(), loaded_at: Instant::now() });
        Ok(orgs)
    }

    fn load_orgs(&self) -> Result<Vec<Organization>, TenancyError> {
        let orgs = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, slug, domains FROM organizations ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, name, slug, domains_raw) = row?;
                out.push(Organization {
                    id: OrgId(id),
                    name,
                    slug,
                    domains: decode_string_list(domains_raw)?,
                });
            }
            Ok(out)
        })?;
        Ok(orgs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> TenantDirectory {
        let db = Database::open_in_memory().unwrap();
        TenantDirectory::new(db, OrgId(1)).with_cache_ttl(Duration::from_secs(3600))
    }

    #[test]
    fn resolves_all_matching_orgs() {
        let dir = directory();
        dir.create_org("Default", "default", &[]).unwrap();
        let a = dir.create_org("Acme", "acme", &["acme.com".into()]).unwrap();
        let b = dir.create_org("Shared A", "shared-a", &["shared.com".into()]).unwrap();
        let c = dir.create_org("Shared B", "shared-b", &["shared.com".into()]).unwrap();

        let orgs = dir.resolve_orgs(&["acme.com".into()]).unwrap();
        assert_eq!(orgs, vec![a.id]);

        let orgs = dir.resolve_orgs(&["shared.com".into()]).unwrap();
        assert_eq!(orgs, vec![b.id, c.id]);
    }

    #[test]
    fn unmatched_domains_fall_back_to_default_org() {
        let dir = directory();
        dir.create_org("Default", "default", &[]).unwrap();
        let orgs = dir.resolve_orgs(&["stranger.net".into()]).unwrap();
        assert_eq!(orgs, vec![OrgId(1)]);
    }

    #[test]
    fn duplicate_slug_is_rejected() {
        let dir = directory();
        dir.create_org("Acme", "acme", &[]).unwrap();
        assert!(matches!(
            dir.create_org("Acme 2", "acme", &[]),
            Err(TenancyError::SlugTaken(_))
        ));
    }

    #[test]
    fn domain_aliasing_expands_to_all_org_domains() {
        let dir = directory();
        let org = dir
            .create_org("Saga", "saga", &["saga.io".into(), "saga.xyz".into()])
            .unwrap();

        let expanded = dir.expand_domains(org.id, &["saga.io".into()]).unwrap();
        assert!(expanded.contains(&"saga.io".to_string()));
        assert!(expanded.contains(&"saga.xyz".to_string()));

        let unexpanded = dir.expand_domains(org.id, &["other.com".into()]).unwrap();
        assert_eq!(unexpanded, vec!["other.com".to_string()]);
    }

    #[test]
    fn cache_invalidation_surfaces_new_orgs() {
        let dir = directory();
        dir.create_org("A", "a", &["a.com".into()]).unwrap();
        let _ = dir.resolve_orgs(&["a.com".into()]).unwrap();
        dir.create_org("B", "b", &["b.com".into()]).unwrap();
        let orgs = dir.resolve_orgs(&["b.com".into()]).unwrap();
        assert_eq!(orgs.len(), 1);
    }
}
