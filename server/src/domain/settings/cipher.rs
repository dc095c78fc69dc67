//! Payload codecs for the persisted settings document
//!
//! The store always goes through a [`PayloadCodec`]. Without an encryption key
//! that is [`JsonCodec`]; with one, [`EncryptedCodec`] wraps it.
//!
//! Encrypted layout:
//!
//! ```text
//! b"CVE1" | nonce (12 bytes) | ChaCha20-Poly1305 ciphertext + tag
//! ```
//!
//! The magic doubles as associated data, so a payload with a swapped header
//! fails authentication.

use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde_json::{Map, Value};
use thiserror::Error;

use super::schema::Configuration;
use crate::utils::crypto::{KEY_LEN, decode_key, random_bytes, sha256};

pub const ENCRYPTED_MAGIC: &[u8; 4] = b"CVE1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Stored document before it is reconciled with the schema
pub type StoredDocument = Map<String, Value>;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("payload is truncated")]
    Truncated,

    #[error("payload is not encrypted or uses an unknown format")]
    UnknownFormat,

    #[error("payload failed authentication")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    #[error("payload is not a settings document: {0}")]
    Malformed(String),
}

/// Serialises the configuration for a backend and reads it back
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, config: &Configuration) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<StoredDocument, CodecError>;

    fn name(&self) -> &'static str;
}

/// Plain JSON document
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, config: &Configuration) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(config).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<StoredDocument, CodecError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CodecError::Malformed("expected a JSON object".into())),
            Err(e) => Err(CodecError::Malformed(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Authenticated encryption around another codec
pub struct EncryptedCodec<C = JsonCodec> {
    inner: C,
    cipher: ChaCha20Poly1305,
}

impl<C: PayloadCodec> EncryptedCodec<C> {
    pub fn new(inner: C, key: &[u8; KEY_LEN]) -> Self {
        Self {
            inner,
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Accepts 64 hex characters or base64 of 32 bytes. Anything else is
    /// stretched with SHA-256, which is weaker than real key material.
    pub fn from_key_material(inner: C, material: &str) -> Self {
        let key = decode_key(material).unwrap_or_else(|| {
            tracing::warn!(
                "Encryption key is not 32 bytes of hex or base64, deriving one with SHA-256"
            );
            sha256(material.as_bytes())
        });
        Self::new(inner, &key)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce = random_bytes(NONCE_LEN);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: ENCRYPTED_MAGIC,
                },
            )
            .map_err(|_| CodecError::Encryption)?;

        let mut out = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(ENCRYPTED_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let header = ENCRYPTED_MAGIC.len();
        if bytes.len() < header {
            return Err(CodecError::Truncated);
        }
        if &bytes[..header] != ENCRYPTED_MAGIC {
            return Err(CodecError::UnknownFormat);
        }
        if bytes.len() < header + NONCE_LEN + TAG_LEN {
            return Err(CodecError::Truncated);
        }

        let (nonce, ciphertext) = bytes[header..].split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ENCRYPTED_MAGIC,
                },
            )
            .map_err(|_| CodecError::Authentication)
    }
}

impl<C: PayloadCodec> PayloadCodec for EncryptedCodec<C> {
    fn encode(&self, config: &Configuration) -> Result<Vec<u8>, CodecError> {
        let plaintext = self.inner.encode(config)?;
        self.seal(&plaintext)
    }

    fn decode(&self, bytes: &[u8]) -> Result<StoredDocument, CodecError> {
        let plaintext = self.open(bytes)?;
        self.inner.decode(&plaintext)
    }

    fn name(&self) -> &'static str {
        "chacha20poly1305"
    }
}

/// Pick the payload codec once at startup
pub fn build_codec(encryption_key: Option<&str>) -> Arc<dyn PayloadCodec> {
    match encryption_key {
        Some(material) => Arc::new(EncryptedCodec::from_key_material(JsonCodec, material)),
        None => Arc::new(JsonCodec),
    }
}
