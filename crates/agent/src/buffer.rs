//! Durable local buffer.
//!
//! Two tables, `messages` and `cas_blobs`, each with a PENDING/SYNCED status
//! and a path to the payload on disk. Crash-safety contract: once the SMTP
//! handler has returned 250, the message row and all of its CAS rows are
//! durably PENDING; the sync loop drains them after restart.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use vault_common::wire::MessageMetadata;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: String,
    pub key: String,
    pub metadata: MessageMetadata,
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PendingCas {
    pub hash: String,
    pub storage_path: PathBuf,
}

#[derive(Clone)]
pub struct Buffer {
    conn: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

impl Buffer {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("buffer"))?;
        std::fs::create_dir_all(data_dir.join("cas"))?;
        let conn = Connection::open(data_dir.join("buffer.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                 id TEXT PRIMARY KEY,
                 key TEXT NOT NULL,
                 metadata TEXT NOT NULL,
                 storage_path TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'PENDING',
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE TABLE IF NOT EXISTS cas_blobs (
                 hash TEXT PRIMARY KEY,
                 storage_path TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'PENDING',
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), data_dir })
    }

    /// Persist the encrypted envelope and its metadata as PENDING. The blob
    /// hits disk before the row is visible.
    pub fn save_message(
        &self,
        id: &str,
        key: &str,
        metadata: &MessageMetadata,
        encrypted_blob: &[u8],
    ) -> Result<(), BufferError> {
        let path = self.data_dir.join("buffer").join(format!("{id}.enc"));
        std::fs::write(&path, encrypted_blob)?;
        let metadata_json = serde_json::to_string(metadata)?;
        let conn = self.conn.lock().expect("buffer lock");
        conn.execute(
            "INSERT INTO messages (id, key, metadata, storage_path) VALUES (?1, ?2, ?3, ?4)",
            (id, key, &metadata_json, path.to_string_lossy().as_ref()),
        )?;
        Ok(())
    }

    /// Persist a CAS payload if absent. Idempotent per content address.
    pub fn save_cas_blob(&self, hash: &str, payload: &[u8]) -> Result<(), BufferError> {
        let path = self.data_dir.join("cas").join(format!("{hash}.bin"));
        if !path.exists() {
            std::fs::write(&path, payload)?;
        }
        let conn = self.conn.lock().expect("buffer lock");
        conn.execute(
            "INSERT OR IGNORE INTO cas_blobs (hash, storage_path) VALUES (?1, ?2)",
            (hash, path.to_string_lossy().as_ref()),
        )?;
        Ok(())
    }

    pub fn pending_messages(&self, limit: usize) -> Result<Vec<PendingMessage>, BufferError> {
        let conn = self.conn.lock().expect("buffer lock");
        let mut stmt = conn.prepare(
            "SELECT id, key, metadata, storage_path FROM messages
             WHERE status = 'PENDING' ORDER BY created_at ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, key, metadata_raw, storage_path) = row?;
            out.push(PendingMessage {
                id,
                key,
                metadata: serde_json::from_str(&metadata_raw)?,
                storage_path: PathBuf::from(storage_path),
            });
        }
        Ok(out)
    }

    pub fn pending_cas(&self, limit: usize) -> Result<Vec<PendingCas>, BufferError> {
        let conn = self.conn.lock().expect("buffer lock");
        let mut stmt = conn.prepare(
            "SELECT hash, storage_path FROM cas_blobs
             WHERE status = 'PENDING' ORDER BY created_at ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (hash, storage_path) = row?;
            out.push(PendingCas { hash, storage_path: PathBuf::from(storage_path) });
        }
        Ok(out)
    }

    pub fn mark_message_synced(&self, id: &str) -> Result<(), BufferError> {
        let conn = self.conn.lock().expect("buffer lock");
        conn.execute("UPDATE messages SET status = 'SYNCED' WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn mark_cas_synced(&self, hash: &str) -> Result<(), BufferError> {
        let conn = self.conn.lock().expect("buffer lock");
        conn.execute("UPDATE cas_blobs SET status = 'SYNCED' WHERE hash = ?1", [hash])?;
        Ok(())
    }

    pub fn read_payload(&self, path: &Path) -> Result<Vec<u8>, BufferError> {
        Ok(std::fs::read(path)?)
    }
}
