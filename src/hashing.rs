//! Content-addressable hashing primitives (single source of truth)
//!
//! Artifact ids, warrant ids, and the state-hash chain components are all
//! computed here: SHA-256 over canonical JSON bytes. The hex form is the
//! universal identity; the raw 32-byte form exists so chain concatenation
//! stays compact.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_bytes, CanonError};

/// Raw 32-byte SHA-256 digest of arbitrary bytes.
pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_raw(data))
}

/// SHA-256 hex digest of the canonical JSON bytes of `value`.
///
/// This is the artifact identity function used everywhere in the kernel.
pub fn content_hash(value: &Value) -> Result<String, CanonError> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// SHA-256 raw digest of the canonical JSON bytes of `value`.
pub fn content_hash_raw(value: &Value) -> Result<[u8; 32], CanonError> {
    Ok(sha256_raw(&canonical_bytes(value)?))
}

/// Compute an artifact id: SHA-256 of the canonical JSON of `value` with the
/// `id` field removed.
pub fn compute_id(value: &Value) -> Result<String, CanonError> {
    content_hash(&strip_fields(value, &["id"]))
}

/// Return a copy of an object value with the named top-level fields removed.
/// Non-object values pass through unchanged.
pub fn strip_fields(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if !fields.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
