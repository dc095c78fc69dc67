//! Cryptographic utility functions

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of a symmetric key in bytes
pub const KEY_LEN: usize = 32;

/// Fill a buffer of `len` bytes from the OS-seeded thread RNG
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// SHA-256 digest of arbitrary bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Calculate SHA256 hash and return as hex string
pub fn sha256_hex(data: &str) -> String {
    hex::encode(sha256(data.as_bytes()))
}

/// Compare two secrets without leaking where they differ.
///
/// Both sides are hashed first so the comparison length is fixed and the
/// expected secret's length is not observable either.
pub fn digest_eq(presented: &str, expected: &str) -> bool {
    let a = sha256(presented.as_bytes());
    let b = sha256(expected.as_bytes());
    a.ct_eq(&b).into()
}

/// Decode raw key material given as 64 hex characters or base64 of 32 bytes
pub fn decode_key(material: &str) -> Option<[u8; KEY_LEN]> {
    let material = material.trim();

    if material.len() == KEY_LEN * 2
        && let Ok(bytes) = hex::decode(material)
    {
        return bytes.try_into().ok();
    }

    STANDARD
        .decode(material)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
}
