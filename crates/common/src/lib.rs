//! vault_common
//!
//! Canonical JSON serialization + SHA-256 hashing utilities, plus the
//! address/domain extraction shared by the edge agent and the core ingress.
//! Determinism matters here for:
//! - audit entry hashing (per-tenant chains)
//! - content-addressed attachment keys
//! - HMAC signatures over stored ciphertext
//!
//! IMPORTANT: Do not "pretty print". Hashes must be computed over canonical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod addr;
pub mod wire;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Organization (tenant) id. SQLite sequence ids, serde-transparent.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct OrgId(pub i64);

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Serialize to canonical JSON bytes:
/// - stable key ordering (we enforce sorting via Value roundtrip)
/// - no whitespace
/// - UTF-8
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Canonical JSON as a string. Used where the canonical form itself is stored
/// (audit entry details) rather than just hashed.
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    // serde_json output is always valid UTF-8
    Ok(String::from_utf8(bytes).expect("canonical json is utf-8"))
}

/// Lowercase hex SHA-256 of raw bytes. CAS keys, audit hashes and integrity
/// digests all use this bare form on the wire.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}
