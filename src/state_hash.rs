//! Per-cycle state hash chain
//!
//! ```text
//! state_hash[0] = SHA256(constitution_hash_bytes ‖ SHA256(UTF8(kernel_version_id)))
//! state_hash[n] = SHA256(state_hash[n-1] ‖ H_artifacts ‖ H_admission ‖ H_selector ‖ H_execution)
//! ```
//!
//! Each component hash is `SHA256(JCS(list_of_records))` with records in
//! append order, so an empty component contributes `SHA256("[]")`. All
//! concatenation is over raw 32-byte digests (160 input bytes per cycle).
//! Observations are deliberately excluded from the chain.

use serde_json::Value;
use thiserror::Error;

use crate::canonical::{canonical_bytes, CanonError};
use crate::hashing::sha256_raw;

/// Replay semantic protocol identifier for the base layer. Frozen once used
/// in production logs; changes only when hashing, warrant derivation, chain,
/// or log schema changes.
pub const KERNEL_VERSION_ID: &str = "rsa-replay-regime-x0e-v0.1";

/// Replay semantic protocol identifier for the succession layer.
pub const KERNEL_VERSION_ID_X3: &str = "rsa-replay-regime-x3-v0.1";

/// State-hash chain failure.
#[derive(Debug, Error)]
pub enum StateHashError {
    #[error("constitution hash is not 32 hex-encoded bytes")]
    BadConstitutionHash,
    #[error(transparent)]
    Canon(#[from] CanonError),
}

/// Hash one cycle's records for a single log component.
pub fn component_hash(records: &[Value]) -> Result<[u8; 32], CanonError> {
    Ok(sha256_raw(&canonical_bytes(&Value::Array(records.to_vec()))?))
}

/// `state_hash[0]` from the constitution hash and kernel version id.
pub fn initial_state_hash(
    constitution_hash_hex: &str,
    kernel_version_id: &str,
) -> Result<[u8; 32], StateHashError> {
    let constitution_bytes =
        hex::decode(constitution_hash_hex).map_err(|_| StateHashError::BadConstitutionHash)?;
    if constitution_bytes.len() != 32 {
        return Err(StateHashError::BadConstitutionHash);
    }
    let version_hash = sha256_raw(kernel_version_id.as_bytes());
    let mut input = constitution_bytes;
    input.extend_from_slice(&version_hash);
    Ok(sha256_raw(&input))
}

/// `state_hash[n]` for one cycle.
pub fn cycle_state_hash(
    prev_hash: &[u8; 32],
    artifacts_records: &[Value],
    admission_records: &[Value],
    selector_records: &[Value],
    execution_records: &[Value],
) -> Result<[u8; 32], CanonError> {
    let mut input = Vec::with_capacity(160);
    input.extend_from_slice(prev_hash);
    input.extend_from_slice(&component_hash(artifacts_records)?);
    input.extend_from_slice(&component_hash(admission_records)?);
    input.extend_from_slice(&component_hash(selector_records)?);
    input.extend_from_slice(&component_hash(execution_records)?);
    Ok(sha256_raw(&input))
}

/// Hex form of a raw state hash for logging.
pub fn state_hash_hex(raw: &[u8; 32]) -> String {
    hex::encode(raw)
}
