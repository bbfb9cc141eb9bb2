//! vault_holds
//!
//! Legal hold registry and the protection predicate consulted by retention
//! and by search annotation. Holds protect messages two ways:
//! - explicit items: (hold, message) rows, at-most-once membership
//! - criteria: equality on from/to plus a keyword, matched against the
//!   cleaned addr-spec fields of each record
//!
//! Releasing a hold flips active=false but preserves its items for audit.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use vault_common::OrgId;
use vault_db::{Database, DbError};
use vault_index::{Filter, IndexError, MessageDoc, SearchIndex, SearchQuery};

pub mod cases;

/// Criteria-based backfill is capped; beyond this, items must be applied
/// explicitly in batches.
pub const BACKFILL_CAP: usize = 10_000;

#[derive(Debug, Error)]
pub enum HoldError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("hold not found: {0}")]
    NotFound(String),
    #[error("a hold named '{0}' already exists in this organization")]
    NameTaken(String),
}

// ----------------------------
// Criteria
// ----------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

impl HoldCriteria {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.q.is_none()
    }

    /// Conjunction of equality clauses for index backfill. The keyword is a
    /// search term, not a filter, so it is returned separately.
    fn backfill_query(&self, org: OrgId) -> SearchQuery {
        let mut clauses = vec![Filter::eq("org_id", org.0)];
        if let Some(from) = &self.from {
            clauses.push(Filter::eq("from", from.as_str()));
        }
        if let Some(to) = &self.to {
            clauses.push(Filter::eq("to", to.as_str()));
        }
        let text = self.q.clone().unwrap_or_default();
        SearchQuery::new(text).with_filter(Filter::and(clauses)).with_limit(BACKFILL_CAP)
    }
}

// ----------------------------
// Records
// ----------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Hold {
    /// Internal sequence id.
    #[serde(skip)]
    pub id: i64,
    /// Public identity used on the wire.
    pub public_id: String,
    pub org_id: OrgId,
    pub name: String,
    pub reason: String,
    pub filter_criteria: HoldCriteria,
    pub active: bool,
    pub created_at: String,
    pub item_count: u64,
}

/// Item enriched from the index for display.
#[derive(Debug, Clone, Serialize)]
pub struct HoldItemDetail {
    pub message_id: String,
    pub added_at: String,
    pub subject: String,
    pub from: String,
    pub date: String,
}

// ----------------------------
// Registry
// ----------------------------

#[derive(Clone)]
pub struct HoldRegistry {
    db: Database,
    index: Arc<dyn SearchIndex>,
}

impl HoldRegistry {
    pub fn new(db: Database, index: Arc<dyn SearchIndex>) -> Self {
        Self { db, index }
    }

    /// Create a hold; non-empty criteria auto-populate the item set from the
    /// index (capped, conflicts ignored). Returns the hold and how many items
    /// were backfilled.
    pub async fn create(
        &self,
        org: OrgId,
        name: &str,
        reason: &str,
        criteria: HoldCriteria,
    ) -> Result<(Hold, usize), HoldError> {
        let criteria_json = serde_json::to_string(&criteria).map_err(DbError::from)?;
        let public_id = Uuid::new_v4().to_string();

        let created = self.db.with_conn(|conn| {
            let taken: i64 = conn.query_row(
                "SELECT COUNT(*) FROM legal_holds WHERE org_id = ?1 AND name = ?2",
                (org.0, name),
                |r| r.get(0),
            )?;
            if taken > 0 {
                return Err(DbError::Conflict(name.to_string()));
            }
            conn.execute(
                "INSERT INTO legal_holds (org_id, name, reason, filter_criteria, public_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (org.0, name, reason, &criteria_json, &public_id),
            )?;
            let id = conn.last_insert_rowid();
            let created_at: String =
                conn.query_row("SELECT created_at FROM legal_holds WHERE id = ?1", [id], |r| {
                    r.get(0)
                })?;
            Ok((id, created_at))
        });
        let (id, created_at) = match created {
            Ok(v) => v,
            Err(DbError::Conflict(_)) => return Err(HoldError::NameTaken(name.to_string())),
            Err(e) => return Err(e.into()),
        };

        let mut auto_held = 0;
        if !criteria.is_empty() {
            let results = self.index.search(&criteria.backfill_query(org)).await?;
            let ids: Vec<String> = results.hits.into_iter().map(|h| h.id).collect();
            auto_held = self.insert_items(id, &ids)?;
            tracing::info!(hold = %public_id, org = %org, auto_held, "hold backfilled from criteria");
        }

        Ok((
            Hold {
                id,
                public_id,
                org_id: org,
                name: name.to_string(),
                reason: reason.to_string(),
                filter_criteria: criteria,
                active: true,
                created_at,
                item_count: auto_held as u64,
            },
            auto_held,
        ))
    }

    /// Idempotent explicit application of message ids to a hold.
    pub fn apply(&self, public_id: &str, org: OrgId, message_ids: &[String]) -> Result<usize, HoldError> {
        let hold_id = self.internal_id(public_id, org)?;
        Ok(self.insert_items(hold_id, message_ids)?)
    }

    /// Deactivate; items remain for audit.
    pub fn release(&self, public_id: &str, org: OrgId) -> Result<(), HoldError> {
        let _ = self.internal_id(public_id, org)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE legal_holds SET active = 0 WHERE public_id = ?1 AND org_id = ?2",
                (public_id, org.0),
            )?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn list(&self, org: OrgId) -> Result<Vec<Hold>, HoldError> {
        let holds = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.public_id, h.name, h.reason, h.filter_criteria, h.active,
                        h.created_at, COUNT(i.id)
                 FROM legal_holds h
                 LEFT JOIN legal_hold_items i ON h.id = i.hold_id
                 WHERE h.org_id = ?1
                 GROUP BY h.id
                 ORDER BY h.created_at DESC, h.id DESC",
            )?;
            let rows = stmt.query_map([org.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, public_id, name, reason, criteria_raw, active, created_at, items) = row?;
                out.push(Hold {
                    id,
                    public_id,
                    org_id: org,
                    name,
                    reason: reason.unwrap_or_default(),
                    filter_criteria: serde_json::from_str(&criteria_raw)?,
                    active: active != 0,
                    created_at,
                    item_count: items as u64,
                });
            }
            Ok(out)
        })?;
        Ok(holds)
    }

    /// Fetch one hold with its newest items enriched from the index.
    pub async fn get(
        &self,
        public_id: &str,
        org: OrgId,
    ) -> Result<(Hold, Vec<HoldItemDetail>), HoldError> {
        let hold = self
            .list(org)?
            .into_iter()
            .find(|h| h.public_id == public_id)
            .ok_or_else(|| HoldError::NotFound(public_id.to_string()))?;

        let items = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, created_at FROM legal_hold_items
                 WHERE hold_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 100",
            )?;
            let rows = stmt.query_map([hold.id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        let mut enriched = Vec::with_capacity(items.len());
        if !items.is_empty() {
            let ids: Vec<String> = items.iter().map(|(id, _)| id.clone()).collect();
            let results = self
                .index
                .search(&SearchQuery::filtered(Filter::id_in(ids)).with_limit(items.len()))
                .await?;
            for (message_id, added_at) in items {
                let doc = results.hits.iter().find(|h| h.id == message_id);
                enriched.push(HoldItemDetail {
                    message_id,
                    added_at,
                    subject: doc.map(|d| d.subject.clone()).unwrap_or_else(|| "Unknown".into()),
                    from: doc.map(|d| d.from.clone()).unwrap_or_else(|| "Unknown".into()),
                    date: doc.map(|d| d.date.clone()).unwrap_or_default(),
                });
            }
        }
        Ok((hold, enriched))
    }

    // ----------------------------
    // Protection state
    // ----------------------------

    /// Snapshot of protection state. `org = None` takes the union across all
    /// tenants (the retention worker's view); `Some` scopes to one tenant
    /// (search annotation).
    pub fn protection_snapshot(&self, org: Option<OrgId>) -> Result<ProtectionSnapshot, HoldError> {
        let snapshot = self.db.with_conn(|conn| {
            let mut explicit = HashSet::new();
            {
                let (sql, params): (&str, Vec<i64>) = match org {
                    Some(o) => (
                        "SELECT i.message_id FROM legal_hold_items i
                         JOIN legal_holds h ON i.hold_id = h.id WHERE h.org_id = ?1",
                        vec![o.0],
                    ),
                    None => ("SELECT message_id FROM legal_hold_items", vec![]),
                };
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    row.get::<_, String>(0)
                })?;
                for row in rows {
                    explicit.insert(row?);
                }
            }

            let mut held_from = HashSet::new();
            let mut held_to = HashSet::new();
            let mut keywords = Vec::new();
            {
                let (sql, params): (&str, Vec<i64>) = match org {
                    Some(o) => (
                        "SELECT filter_criteria FROM legal_holds WHERE active = 1 AND org_id = ?1",
                        vec![o.0],
                    ),
                    None => ("SELECT filter_criteria FROM legal_holds WHERE active = 1", vec![]),
                };
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                    row.get::<_, String>(0)
                })?;
                for row in rows {
                    let criteria: HoldCriteria = serde_json::from_str(&row?)?;
                    if let Some(from) = criteria.from {
                        held_from.insert(from.to_lowercase());
                    }
                    if let Some(to) = criteria.to {
                        held_to.insert(to.to_lowercase());
                    }
                    if let Some(q) = criteria.q {
                        let q = q.to_lowercase();
                        if !q.is_empty() && !keywords.contains(&q) {
                            keywords.push(q);
                        }
                    }
                }
            }
            Ok(ProtectionSnapshot { explicit, held_from, held_to, keywords })
        })?;
        Ok(snapshot)
    }

    /// Point query for the deletion-time re-check: is this message explicitly
    /// held under any tenant right now?
    pub fn is_explicitly_held(&self, message_id: &str) -> Result<bool, HoldError> {
        let held: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM legal_hold_items WHERE message_id = ?1",
                [message_id],
                |r| r.get(0),
            )?)
        })?;
        Ok(held > 0)
    }

    fn internal_id(&self, public_id: &str, org: OrgId) -> Result<i64, HoldError> {
        let id: Option<i64> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM legal_holds WHERE public_id = ?1 AND org_id = ?2")?;
            let mut rows = stmt.query((public_id, org.0))?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })?;
        id.ok_or_else(|| HoldError::NotFound(public_id.to_string()))
    }

    fn insert_items(&self, hold_id: i64, message_ids: &[String]) -> Result<usize, DbError> {
        self.db.with_conn(|conn| {
            let mut inserted = 0;
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO legal_hold_items (hold_id, message_id) VALUES (?1, ?2)",
            )?;
            for id in message_ids {
                inserted += stmt.execute((hold_id, id))?;
            }
            Ok(inserted)
        })
    }
}

// ----------------------------
// Protection predicate
// ----------------------------

/// A message is protected against disposal when any of:
/// - it is an explicit item of some hold
/// - its cleaned sender matches an active hold's `from`
/// - any cleaned recipient matches an active hold's `to`
/// - any active hold keyword occurs (case-insensitively) in subject|from|to
#[derive(Debug, Clone, Default)]
pub struct ProtectionSnapshot {
    pub explicit: HashSet<String>,
    pub held_from: HashSet<String>,
    pub held_to: HashSet<String>,
    pub keywords: Vec<String>,
}

impl ProtectionSnapshot {
    pub fn protects(&self, doc: &MessageDoc) -> bool {
        if self.explicit.contains(&doc.id) {
            return true;
        }
        if let Some(sender) = &doc.sender_email {
            if self.held_from.contains(&sender.to_lowercase()) {
                return true;
            }
        }
        if doc.recipient_emails.iter().any(|r| self.held_to.contains(&r.to_lowercase())) {
            return true;
        }
        if !self.keywords.is_empty() {
            let blob = format!("{} {} {}", doc.subject, doc.from, doc.to).to_lowercase();
            if self.keywords.iter().any(|kw| blob.contains(kw)) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_index::MemoryIndex;

    fn registry() -> (HoldRegistry, MemoryIndex) {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO organizations (name, slug) VALUES ('A', 'a')", [])?;
            Ok(())
        })
        .unwrap();
        let index = MemoryIndex::new();
        (HoldRegistry::new(db, Arc::new(index.clone())), index)
    }

    fn doc(id: &str, from: &str, subject: &str) -> MessageDoc {
        MessageDoc {
            id: id.into(),
            org_id: vec![OrgId(1)],
            from: format!("Somebody <{from}>"),
            sender_email: Some(from.to_string()),
            subject: subject.into(),
            date_timestamp: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn criteria_create_backfills_items() {
        let (registry, index) = registry();
        index
            .upsert(vec![
                doc("m1", "alice@acme.com", "one"),
                doc("m2", "alice@acme.com", "two"),
                doc("m3", "bob@acme.com", "three"),
            ])
            .await
            .unwrap();

        let criteria = HoldCriteria {
            from: Some("Somebody <alice@acme.com>".into()),
            ..Default::default()
        };
        let (hold, auto_held) =
            registry.create(OrgId(1), "investigation", "sec incident", criteria).await.unwrap();
        assert_eq!(auto_held, 2);
        assert!(hold.active);

        let (fetched, items) = registry.get(&hold.public_id, OrgId(1)).await.unwrap();
        assert_eq!(fetched.item_count, 2);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.subject == "one" || i.subject == "two"));
    }

    #[tokio::test]
    async fn duplicate_name_in_org_is_rejected() {
        let (registry, _) = registry();
        registry.create(OrgId(1), "h", "", HoldCriteria::default()).await.unwrap();
        assert!(matches!(
            registry.create(OrgId(1), "h", "", HoldCriteria::default()).await,
            Err(HoldError::NameTaken(_))
        ));
    }

    #[tokio::test]
    async fn apply_is_idempotent_and_release_keeps_items() {
        let (registry, _) = registry();
        let (hold, _) =
            registry.create(OrgId(1), "h", "", HoldCriteria::default()).await.unwrap();

        let n = registry
            .apply(&hold.public_id, OrgId(1), &["m1".into(), "m2".into()])
            .unwrap();
        assert_eq!(n, 2);
        let n = registry.apply(&hold.public_id, OrgId(1), &["m1".into()]).unwrap();
        assert_eq!(n, 0);

        registry.release(&hold.public_id, OrgId(1)).unwrap();
        let listed = registry.list(OrgId(1)).unwrap();
        assert!(!listed[0].active);
        assert_eq!(listed[0].item_count, 2);
        assert!(registry.is_explicitly_held("m1").unwrap());
    }

    #[tokio::test]
    async fn predicate_covers_all_protection_paths() {
        let (registry, _) = registry();
        let (hold, _) = registry
            .create(
                OrgId(1),
                "h",
                "",
                HoldCriteria {
                    from: Some("alice@acme.com".into()),
                    to: Some("bob@acme.com".into()),
                    q: Some("Project X".into()),
                },
            )
            .await
            .unwrap();
        registry.apply(&hold.public_id, OrgId(1), &["held-explicitly".into()]).unwrap();

        let snapshot = registry.protection_snapshot(None).unwrap();

        let explicit = MessageDoc { id: "held-explicitly".into(), ..Default::default() };
        assert!(snapshot.protects(&explicit));

        let by_sender = MessageDoc {
            id: "s".into(),
            sender_email: Some("ALICE@acme.com".to_lowercase()),
            ..Default::default()
        };
        assert!(snapshot.protects(&by_sender));

        let by_recipient = MessageDoc {
            id: "r".into(),
            recipient_emails: vec!["bob@acme.com".into()],
            ..Default::default()
        };
        assert!(snapshot.protects(&by_recipient));

        let by_keyword = MessageDoc {
            id: "k".into(),
            subject: "Re: project x kickoff".into(),
            ..Default::default()
        };
        assert!(snapshot.protects(&by_keyword));

        let unprotected = MessageDoc {
            id: "u".into(),
            sender_email: Some("carol@other.net".into()),
            subject: "lunch".into(),
            ..Default::default()
        };
        assert!(!snapshot.protects(&unprotected));
    }

    #[tokio::test]
    async fn released_holds_stop_criteria_protection() {
        let (registry, _) = registry();
        let (hold, _) = registry
            .create(
                OrgId(1),
                "h",
                "",
                HoldCriteria { from: Some("alice@acme.com".into()), ..Default::default() },
            )
            .await
            .unwrap();
        registry.release(&hold.public_id, OrgId(1)).unwrap();

        let snapshot = registry.protection_snapshot(None).unwrap();
        let doc = MessageDoc {
            id: "m".into(),
            sender_email: Some("alice@acme.com".into()),
            ..Default::default()
        };
        assert!(!snapshot.protects(&doc));
    }
}
