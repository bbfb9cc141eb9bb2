//! eDiscovery cases: organization-scoped folders of message ids with
//! per-item tags, review status and an optional assignee. Cases drive the
//! export pipeline.

use crate::HoldError;
use serde::Serialize;
use vault_common::OrgId;
use vault_db::{decode_string_list, encode_string_list, Database, DbError};

#[derive(Debug, Clone, Serialize)]
pub struct Case {
    pub id: i64,
    pub org_id: OrgId,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: String,
    pub item_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseItem {
    pub id: i64,
    pub message_id: String,
    pub tags: Vec<String>,
    pub review_status: String,
    pub assignee_id: Option<i64>,
    pub added_at: String,
}

#[derive(Clone)]
pub struct CaseRegistry {
    db: Database,
}

impl CaseRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, org: OrgId, name: &str, description: &str) -> Result<Case, HoldError> {
        let case = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cases (org_id, name, description) VALUES (?1, ?2, ?3)",
                (org.0, name, description),
            )?;
            let id = conn.last_insert_rowid();
            let created_at: String =
                conn.query_row("SELECT created_at FROM cases WHERE id = ?1", [id], |r| r.get(0))?;
            Ok(Case {
                id,
                org_id: org,
                name: name.to_string(),
                description: description.to_string(),
                status: "OPEN".to_string(),
                created_at,
                item_count: 0,
            })
        })?;
        Ok(case)
    }

    pub fn list(&self, org: OrgId) -> Result<Vec<Case>, HoldError> {
        let cases = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.description, c.status, c.created_at, COUNT(ci.id)
                 FROM cases c
                 LEFT JOIN case_items ci ON c.id = ci.case_id
                 WHERE c.org_id = ?1
                 GROUP BY c.id
                 ORDER BY c.created_at DESC, c.id DESC",
            )?;
            let rows = stmt.query_map([org.0], |row| {
                Ok(Case {
                    id: row.get(0)?,
                    org_id: org,
                    name: row.get(1)?,
                    description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                    item_count: row.get::<_, i64>(5)? as u64,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;
        Ok(cases)
    }

    /// Idempotent item insert; returns how many ids were new.
    pub fn add_items(
        &self,
        case_id: i64,
        org: OrgId,
        message_ids: &[String],
    ) -> Result<usize, HoldError> {
        self.require_case(case_id, org)?;
        let inserted = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO case_items (case_id, message_id) VALUES (?1, ?2)",
            )?;
            let mut inserted = 0;
            for id in message_ids {
                inserted += stmt.execute((case_id, id))?;
            }
            Ok(inserted)
        })?;
        Ok(inserted)
    }

    pub fn items(&self, case_id: i64, org: OrgId) -> Result<Vec<CaseItem>, HoldError> {
        self.require_case(case_id, org)?;
        let items = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, tags, review_status, assignee_id, added_at
                 FROM case_items WHERE case_id = ?1 ORDER BY added_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([case_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, message_id, tags_raw, review_status, assignee_id, added_at) = row?;
                out.push(CaseItem {
                    id,
                    message_id,
                    tags: decode_string_list(tags_raw)?,
                    review_status,
                    assignee_id,
                    added_at,
                });
            }
            Ok(out)
        })?;
        Ok(items)
    }

    /// Message ids for export, oldest first for stable archive ordering.
    pub fn message_ids(&self, case_id: i64, org: OrgId) -> Result<Vec<String>, HoldError> {
        self.require_case(case_id, org)?;
        let ids = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id FROM case_items WHERE case_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([case_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;
        Ok(ids)
    }

    pub fn set_item_tags(&self, item_id: i64, tags: &[String]) -> Result<(), HoldError> {
        let tags_json = encode_string_list(tags)?;
        self.db.with_conn(|conn| {
            let updated =
                conn.execute("UPDATE case_items SET tags = ?1 WHERE id = ?2", (&tags_json, item_id))?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("case item {item_id}")));
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn set_item_review_status(&self, item_id: i64, status: &str) -> Result<(), HoldError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE case_items SET review_status = ?1 WHERE id = ?2",
                (status, item_id),
            )?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("case item {item_id}")));
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn assign_items(&self, item_ids: &[i64], assignee_id: i64) -> Result<(), HoldError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("UPDATE case_items SET assignee_id = ?1 WHERE id = ?2")?;
            for id in item_ids {
                stmt.execute((assignee_id, id))?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn require_case(&self, case_id: i64, org: OrgId) -> Result<(), HoldError> {
        let exists: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM cases WHERE id = ?1 AND org_id = ?2",
                (case_id, org.0),
                |r| r.get(0),
            )?)
        })?;
        if exists == 0 {
            return Err(HoldError::NotFound(format!("case {case_id}")));
        }
        Ok(())
    }
}
