//! Crate root: public surface and kernel-wide invariants
//!
//! `rsak` is a deterministic, purely functional policy kernel for an
//! autonomous agent. Each cycle it ingests observations, candidate
//! artifacts, and the active hash-identified constitution, and emits exactly
//! one decision — ACTION, REFUSE, EXIT, QUEUE_AMENDMENT, or ADOPT — plus a
//! complete trace of every gate it evaluated.
//!
//! ## Invariants
//!
//! - **No ambient effects.** The kernel performs no IO, reads no clock,
//!   draws no randomness, and never retries. Cycle time comes from the
//!   single TIMESTAMP observation; its absence refuses the cycle.
//! - **Canonical bytes everywhere.** Every hash and signature covers RFC
//!   8785 canonical JSON produced by [`canonical`]; artifact ids are SHA-256
//!   content hashes with the `id` field excluded.
//! - **Closed taxonomies.** Action types, reason codes, gates, and artifact
//!   shapes are closed sets. Unknown anything is rejected, never coerced.
//! - **Total surface.** Over well-typed inputs every failure is a value: a
//!   gate rejection, a refusal, an exit, or a boundary failure. The only
//!   library errors are genuinely fatal conditions (malformed constitution,
//!   broken hex, non-finite floats).
//! - **Deterministic ordering.** Candidates evaluate in input order, treaty
//!   grants in canonical-id order, warrants in (origin_rank, warrant_id)
//!   order. Identical inputs produce byte-identical outputs.
//!
//! The per-cycle composition lives in [`cycle`]; the simpler base and
//! amendment-aware cores live in [`policy`]. The harness-side boundary
//! contract (sovereign activation) is [`boundary`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// RFC 8785 canonical JSON encoding (single source of truth for bytes).
pub mod canonical;
/// SHA-256 content hashing over canonical bytes.
pub mod hashing;
/// Closed artifact taxonomy for the base layer.
pub mod artifacts;
/// Hash-verified constitution store and citation index.
pub mod constitution;
/// Succession overlay and the effective constitution frame.
pub mod overlay;
/// Five-gate candidate admission pipeline.
pub mod admission;
/// Lexicographic bundle-hash selector.
pub mod selector;
/// Base and amendment-aware policy cores.
pub mod policy;
/// Replayable internal state and typed deltas.
pub mod state;
/// Constitutional amendment machinery.
pub mod amendment;
/// Treaty artifacts, active set, and effective density.
pub mod treaty;
/// Treaty admission pipelines (grants and revocations).
pub mod treaty_admission;
/// Ed25519 signatures and HKDF key derivation.
pub mod signature;
/// Sovereign succession admission (S1–S7).
pub mod succession;
/// Treaty ratification after succession (R0–R4).
pub mod ratification;
/// Cycle-boundary verification and sovereign activation.
pub mod boundary;
/// Topological per-cycle policy core.
pub mod cycle;
/// Per-cycle state hash chain.
pub mod state_hash;
/// Telemetry derivation for the five log streams.
pub mod telemetry;
/// Dry-run cycle and plan simulation.
pub mod sim;

#[cfg(test)]
pub(crate) mod fixtures;

pub use canonical::{canonical_bytes, canonical_str, CanonError};
pub use constitution::{Constitution, ConstitutionError};
pub use hashing::{content_hash, sha256_hex};
pub use state_hash::{KERNEL_VERSION_ID, KERNEL_VERSION_ID_X3};
