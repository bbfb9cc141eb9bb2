//! vault_crypto
//!
//! Cryptographic primitives for the archive:
//! - per-message AEAD keys (AES-256-GCM, nonce prepended, self-contained)
//! - process-wide master cipher for at-rest blob wrapping (PBKDF2-derived)
//! - HMAC-SHA256 integrity signatures over stored ciphertext
//!
//! Per-message keys travel with the message record; the master cipher and the
//! signer are constructed once at startup and hold no per-request state.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// KDF salt for the master cipher. Static so that recovery from a configured
/// secret alone is possible; uniqueness comes from per-encryption nonces.
const MASTER_SALT: &[u8] = b"mailvault_static_salt";
const MASTER_PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("ciphertext too short")]
    TruncatedCiphertext,
    #[error("decryption failed")]
    DecryptFailed,
}

// ----------------------------
// Per-message keys
// ----------------------------

/// A single message's symmetric key, stored URL-safe base64 alongside the
/// message record in the index.
#[derive(Clone)]
pub struct MessageKey([u8; KEY_BYTES]);

impl MessageKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey)?;
        let bytes: [u8; KEY_BYTES] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(bytes))
    }

    /// Encrypt; output is `nonce || ciphertext+tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        seal_with(&self.0, plaintext)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open_with(&self.0, sealed)
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

// ----------------------------
// Master cipher (at-rest layer)
// ----------------------------

/// Process-wide cipher wrapping everything the blob store persists.
/// Derived once from the configured secret; invisible to store callers.
pub struct MasterCipher {
    key: [u8; KEY_BYTES],
}

impl MasterCipher {
    pub fn derive(secret: &str) -> Self {
        let mut key = [0u8; KEY_BYTES];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), MASTER_SALT, MASTER_PBKDF2_ROUNDS, &mut key);
        Self { key }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        seal_with(&self.key, plaintext)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open_with(&self.key, sealed)
    }
}

impl std::fmt::Debug for MasterCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterCipher(..)")
    }
}

// ----------------------------
// Integrity signatures
// ----------------------------

/// HMAC-SHA256 signer over stored ciphertext bytes. Signatures are lowercase
/// hex and verified in constant time.
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, data: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}

// ----------------------------
// AEAD envelope
// ----------------------------

fn seal_with(key: &[u8; KEY_BYTES], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext).expect("aes-gcm encrypt");
    let mut out = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

fn open_with(key: &[u8; KEY_BYTES], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_BYTES {
        return Err(CryptoError::TruncatedCiphertext);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_BYTES);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}
