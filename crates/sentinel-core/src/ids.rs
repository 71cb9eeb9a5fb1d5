//! Deterministic, language-independent physical key derivation.
//!
//! SHA-256 over the UTF-8 bytes of `original_id`, first 128 bits, formatted
//! as a canonical hyphenated identifier. Two equal `original_id`s always
//! collide on the same vector-store record regardless of which process or
//! language computed the key — this is what makes re-upserts idempotent.

use sha2::{Digest, Sha256};

/// Computes the physical storage key for a logical `original_id`.
pub fn physical_key(original_id: &str) -> String {
    let digest = Sha256::digest(original_id.as_bytes());
    let bytes: [u8; 16] = digest[..16].try_into().expect("sha256 digest is 32 bytes");
    uuid::Uuid::from_bytes(bytes).hyphenated().to_string()
}
