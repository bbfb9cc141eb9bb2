//! vault_db
//!
//! Embedded relational store for tenancy, lifecycle and compliance state:
//! organizations, users, audit chains, legal holds, cases, retention
//! policies. Message content never lives here; it belongs to the blob store
//! and the search index.
//!
//! Connections are shared behind a mutex with short critical sections and no
//! awaits while locked; callers run their SQL through `with_conn`.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.init_schema()?;
        Ok(db)
    }

    /// Run a closure against the connection. Keep the work short: the lock is
    /// process-wide and must never be held across an await point.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let guard = self.conn.lock().expect("db lock");
        f(&guard)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    slug TEXT UNIQUE NOT NULL,
    domains TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    role TEXT NOT NULL,
    org_id INTEGER REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL REFERENCES organizations(id),
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    previous_hash TEXT NOT NULL,
    current_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_org ON audit_logs(org_id, id);

CREATE TABLE IF NOT EXISTS legal_holds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL REFERENCES organizations(id),
    name TEXT NOT NULL,
    reason TEXT,
    filter_criteria TEXT NOT NULL DEFAULT '{}',
    active INTEGER NOT NULL DEFAULT 1,
    public_id TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS legal_hold_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hold_id INTEGER NOT NULL REFERENCES legal_holds(id) ON DELETE CASCADE,
    message_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(hold_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_hold_items_message ON legal_hold_items(message_id);

CREATE TABLE IF NOT EXISTS cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL REFERENCES organizations(id),
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'OPEN',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS case_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    message_id TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    review_status TEXT NOT NULL DEFAULT 'PENDING',
    assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    added_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(case_id, message_id)
);

CREATE TABLE IF NOT EXISTS retention_policies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER REFERENCES organizations(id),
    name TEXT NOT NULL,
    domains TEXT NOT NULL DEFAULT '[]',
    retention_days INTEGER NOT NULL,
    action TEXT NOT NULL DEFAULT 'PERMANENT_DELETE',
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Encode a string list for a JSON column.
pub fn encode_string_list(values: &[String]) -> Result<String, DbError> {
    Ok(serde_json::to_string(values)?)
}

/// Decode a JSON column holding a string list; NULL/empty decodes to empty.
pub fn decode_string_list(raw: Option<String>) -> Result<Vec<String>, DbError> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.trim().is_empty() => Ok(Vec::new()),
        Some(s) => Ok(serde_json::from_str(&s)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_and_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vault.db");
        {
            let db = Database::open(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO organizations (name, slug, domains) VALUES (?1, ?2, ?3)",
                    ("Acme", "acme", r#"["acme.com"]"#),
                )?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let slug: String = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT slug FROM organizations WHERE id = 1", [], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(slug, "acme");
    }

    #[test]
    fn hold_items_are_unique_per_hold_and_message() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO organizations (name, slug) VALUES ('A', 'a')",
                [],
            )?;
            conn.execute(
                "INSERT INTO legal_holds (org_id, name, public_id) VALUES (1, 'h', 'pub')",
                [],
            )?;
            let first = conn.execute(
                "INSERT OR IGNORE INTO legal_hold_items (hold_id, message_id) VALUES (1, 'm1')",
                [],
            )?;
            let second = conn.execute(
                "INSERT OR IGNORE INTO legal_hold_items (hold_id, message_id) VALUES (1, 'm1')",
                [],
            )?;
            assert_eq!(first, 1);
            assert_eq!(second, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn string_list_round_trip() {
        let encoded = encode_string_list(&["a.com".into(), "b.com".into()]).unwrap();
        assert_eq!(decode_string_list(Some(encoded)).unwrap(), vec!["a.com", "b.com"]);
        assert!(decode_string_list(None).unwrap().is_empty());
    }
}
