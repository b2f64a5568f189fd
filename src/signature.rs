//! Ed25519 signatures over canonical JSON and deterministic key derivation
//!
//! Key identifiers use the `ed25519:<64-hex>` form everywhere. Signatures
//! cover the canonical JSON bytes of a payload with the `signature` and `id`
//! fields already excluded by the caller.
//!
//! Sovereign-key checks add privilege-leak detection: a payload signed by
//! the *previous* sovereign key after activation is not merely invalid, it
//! is a distinct violation (`PRIOR_KEY_PRIVILEGE_LEAK`).
//!
//! HKDF-SHA256 derivation produces reproducible keypairs for replay and
//! tests: `IKM = seed`, `salt = "rsa-x3-genesis"`,
//! `info = "sovereign-key-" || ASCII(chain_position)`, 32-byte output used
//! as the Ed25519 private-key seed. No OS randomness enters this module.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::canonical::{canonical_bytes, CanonError};

const HKDF_SALT: &[u8] = b"rsa-x3-genesis";
const HKDF_INFO_PREFIX: &[u8] = b"sovereign-key-";

/// Signature-layer failure.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("unsupported identifier scheme: {0}")]
    UnsupportedScheme(String),
    #[error("identifier is not a valid ed25519 public key")]
    InvalidKey,
    #[error("signature is not valid hex")]
    InvalidSignatureHex,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error(transparent)]
    Canon(#[from] CanonError),
}

/// Extract the hex public key from an `ed25519:<hex64>` identifier.
pub fn pubkey_hex(identifier: &str) -> Result<&str, SignatureError> {
    identifier
        .strip_prefix("ed25519:")
        .ok_or_else(|| SignatureError::UnsupportedScheme(identifier.to_owned()))
}

/// Parse an `ed25519:<hex64>` identifier into a verifying key.
pub fn parse_identifier(identifier: &str) -> Result<VerifyingKey, SignatureError> {
    let hex_part = pubkey_hex(identifier)?;
    let raw = hex::decode(hex_part).map_err(|_| SignatureError::InvalidKey)?;
    let bytes: [u8; 32] = raw.try_into().map_err(|_| SignatureError::InvalidKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| SignatureError::InvalidKey)
}

/// Identifier string for a signing key.
pub fn identifier_for(key: &SigningKey) -> String {
    format!("ed25519:{}", hex::encode(key.verifying_key().to_bytes()))
}

/// Sign canonical JSON bytes of `payload`; returns the hex signature.
pub fn sign_payload(key: &SigningKey, payload: &Value) -> Result<String, SignatureError> {
    let bytes = canonical_bytes(payload)?;
    Ok(hex::encode(key.sign(&bytes).to_bytes()))
}

/// Verify a hex Ed25519 signature over the canonical JSON of `payload`.
pub fn verify_payload(
    identifier: &str,
    payload: &Value,
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let key = parse_identifier(identifier)?;
    let raw = hex::decode(signature_hex).map_err(|_| SignatureError::InvalidSignatureHex)?;
    let sig = Signature::from_slice(&raw).map_err(|_| SignatureError::InvalidSignatureHex)?;
    let bytes = canonical_bytes(payload)?;
    key.verify(&bytes, &sig)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// Outcome of a signature check that requires *active* sovereign authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SovereignVerdict {
    Valid,
    /// The prior sovereign key attempted a sovereign action post-activation.
    PriorKeyLeak,
    Invalid(String),
}

/// Verify a signature that must come from the active sovereign. A signer
/// equal to the prior sovereign key yields [`SovereignVerdict::PriorKeyLeak`]
/// before any cryptographic work happens.
pub fn verify_active_sovereign(
    payload: &Value,
    signature_hex: &str,
    signer_identifier: &str,
    active_sovereign_key: &str,
    prior_sovereign_key: Option<&str>,
) -> SovereignVerdict {
    if signer_identifier != active_sovereign_key {
        if prior_sovereign_key == Some(signer_identifier) {
            return SovereignVerdict::PriorKeyLeak;
        }
        return SovereignVerdict::Invalid(format!(
            "signer {signer_identifier} is not the active sovereign"
        ));
    }
    match verify_payload(signer_identifier, payload, signature_hex) {
        Ok(()) => SovereignVerdict::Valid,
        Err(e) => SovereignVerdict::Invalid(e.to_string()),
    }
}

/// Derive the deterministic keypair for a chain position.
pub fn derive_keypair(
    seed: &[u8],
    chain_position: u64,
) -> Result<(SigningKey, String), SignatureError> {
    let mut info = HKDF_INFO_PREFIX.to_vec();
    info.extend_from_slice(chain_position.to_string().as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), seed);
    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .map_err(|_| SignatureError::KeyDerivation)?;

    let key = SigningKey::from_bytes(&okm);
    let identifier = identifier_for(&key);
    Ok((key, identifier))
}

/// Genesis sovereign keypair (chain position 0).
pub fn derive_genesis_keypair(seed: &[u8]) -> Result<(SigningKey, String), SignatureError> {
    derive_keypair(seed, 0)
}

/// Precompute keypairs for a whole session, indexed by chain position
/// (0 = genesis).
pub fn precompute_keypairs(
    seed: &[u8],
    max_rotations: u64,
) -> Result<Vec<(SigningKey, String)>, SignatureError> {
    (0..=max_rotations).map(|i| derive_keypair(seed, i)).collect()
}
