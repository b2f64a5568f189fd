//! Cycle-boundary verification and sovereign activation
//!
//! Runs on the harness side before the cycle's pure policy core evaluates;
//! the kernel never signs boundary records. For cycle `c >= 2` the prior
//! cycle's CycleCommit signature is verified first, then the pending
//! successor state is cross-checked, then activation fires if a successor
//! is pending (key rotation, suspension of every active grant, lineage
//! advance), and finally the CycleStart signature and chain continuity are
//! verified against the post-activation state.
//!
//! A boundary failure is terminal for the cycle: policy evaluation must not
//! proceed.

use serde_json::{json, Value};

use crate::canonical::CanonError;
use crate::hashing::content_hash;
use crate::signature::verify_payload;
use crate::state::InternalState;

/// Boundary verification failure codes (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryCode {
    SignatureMismatch,
    StateMissingPendingSuccessor,
    StateSpuriousPendingSuccessor,
    StateChainMismatch,
}

impl BoundaryCode {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryCode::SignatureMismatch => "BOUNDARY_SIGNATURE_MISMATCH",
            BoundaryCode::StateMissingPendingSuccessor => {
                "BOUNDARY_STATE_MISSING_PENDING_SUCCESSOR"
            }
            BoundaryCode::StateSpuriousPendingSuccessor => {
                "BOUNDARY_STATE_SPURIOUS_PENDING_SUCCESSOR"
            }
            BoundaryCode::StateChainMismatch => "BOUNDARY_STATE_CHAIN_MISMATCH",
        }
    }
}

/// Payload signed by the active sovereign at end of cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleCommitPayload {
    pub cycle_id: u64,
    pub kernel_version_id: String,
    pub state_hash_end: String,
    pub state_hash_prev: String,
    pub constitution_hash_tip: String,
    pub pending_successor_key: Option<String>,
    pub identity_chain_length: u64,
    pub identity_chain_tip_hash: String,
    pub overlay_hash: String,
}

impl CycleCommitPayload {
    pub fn to_value(&self) -> Value {
        json!({
            "type": "CycleCommit",
            "cycle_id": self.cycle_id,
            "kernel_version_id": self.kernel_version_id,
            "state_hash_end": self.state_hash_end,
            "state_hash_prev": self.state_hash_prev,
            "constitution_hash_tip": self.constitution_hash_tip,
            "pending_successor_key": self.pending_successor_key,
            "identity_chain_length": self.identity_chain_length,
            "identity_chain_tip_hash": self.identity_chain_tip_hash,
            "overlay_hash": self.overlay_hash,
        })
    }
}

/// Payload signed by the (post-activation) active sovereign at cycle start.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleStartPayload {
    pub cycle_id: u64,
    pub kernel_version_id: String,
    pub state_hash_prev: String,
    pub sovereign_public_key_active: String,
    pub identity_chain_length: u64,
    pub identity_chain_tip_hash: String,
    pub overlay_hash: String,
}

impl CycleStartPayload {
    pub fn to_value(&self) -> Value {
        json!({
            "type": "CycleStart",
            "cycle_id": self.cycle_id,
            "kernel_version_id": self.kernel_version_id,
            "state_hash_prev": self.state_hash_prev,
            "sovereign_public_key_active": self.sovereign_public_key_active,
            "identity_chain_length": self.identity_chain_length,
            "identity_chain_tip_hash": self.identity_chain_tip_hash,
            "overlay_hash": self.overlay_hash,
        })
    }
}

/// Identity-chain tip after a rotation.
pub fn compute_identity_chain_tip_hash(
    chain_length: u64,
    active_key: &str,
    prior_tip_hash: &str,
    succession_proposal_hash: &str,
) -> Result<String, CanonError> {
    content_hash(&json!({
        "type": "identity_chain_tip",
        "chain_length": chain_length,
        "active_key": active_key,
        "prior_tip_hash": prior_tip_hash,
        "succession_proposal_hash": succession_proposal_hash,
    }))
}

/// Genesis tip hash over the genesis artifact.
pub fn compute_genesis_tip_hash(genesis_artifact: &Value) -> Result<String, CanonError> {
    content_hash(genesis_artifact)
}

/// Result of boundary verification and activation.
#[derive(Clone, Debug, Default)]
pub struct BoundaryVerificationResult {
    pub passed: bool,
    pub failure_code: String,
    pub failure_detail: String,
    pub activation_occurred: bool,
    pub prior_key: String,
    pub successor_key: String,
    pub suspended_grant_ids: Vec<String>,
}

impl BoundaryVerificationResult {
    fn fail(code: BoundaryCode, detail: String) -> Self {
        BoundaryVerificationResult {
            passed: false,
            failure_code: code.as_str().to_owned(),
            failure_detail: detail,
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        let mut v = json!({"passed": self.passed});
        if !self.passed {
            v["failure_code"] = json!(self.failure_code);
            v["failure_detail"] = json!(self.failure_detail);
        }
        if self.activation_occurred {
            v["activation_occurred"] = json!(true);
            v["prior_key"] = json!(self.prior_key);
            v["successor_key"] = json!(self.successor_key);
            v["suspended_grant_ids"] = json!(self.suspended_grant_ids);
        }
        v
    }
}

/// Inputs for one boundary verification.
pub struct BoundaryInputs<'a> {
    pub cycle_id: u64,
    /// CycleCommit of the prior cycle; `None` for the first cycle.
    pub cycle_commit_payload: Option<&'a CycleCommitPayload>,
    pub cycle_commit_signature: Option<&'a str>,
    pub cycle_start_payload: &'a CycleStartPayload,
    pub cycle_start_signature: &'a str,
    /// Whether the prior cycle admitted a non-self succession.
    pub succession_admitted_in_prior_cycle: bool,
    /// Hash of the admitted succession proposal (tip-hash input).
    pub succession_proposal_hash: &'a str,
}

/// Full boundary verification and activation for cycle `c`. Mutates the
/// state in place (rotation, suspension, lineage update) on the activation
/// path; a failed verification leaves the state untouched except for checks
/// that precede the failure.
pub fn verify_and_activate(
    state: &mut InternalState,
    inputs: &BoundaryInputs<'_>,
) -> Result<BoundaryVerificationResult, CanonError> {
    let mut activation_occurred = false;
    let mut prior_key = String::new();
    let mut successor_key = String::new();
    let mut suspended_ids = Vec::new();

    // Step 1: CycleCommit(c-1) signature, skipped for the first cycle.
    if inputs.cycle_id >= 2 {
        if let Some(commit) = inputs.cycle_commit_payload {
            let signature = inputs.cycle_commit_signature.unwrap_or("");
            if verify_payload(
                &state.sovereign_public_key_active,
                &commit.to_value(),
                signature,
            )
            .is_err()
            {
                return Ok(BoundaryVerificationResult::fail(
                    BoundaryCode::SignatureMismatch,
                    format!("CycleCommit({}) signature failed", inputs.cycle_id - 1),
                ));
            }

            // Step 2: pending-successor consistency.
            if inputs.succession_admitted_in_prior_cycle {
                if commit.pending_successor_key.is_none() {
                    return Ok(BoundaryVerificationResult::fail(
                        BoundaryCode::StateMissingPendingSuccessor,
                        "no pending_successor_key despite admitted succession".to_owned(),
                    ));
                }
            } else if commit.pending_successor_key.is_some() {
                return Ok(BoundaryVerificationResult::fail(
                    BoundaryCode::StateSpuriousPendingSuccessor,
                    "unexpected pending_successor_key without succession".to_owned(),
                ));
            }
        }
    }

    // Step 3: activation.
    if let Some(pending) = state.pending_successor_key.take() {
        prior_key = state.sovereign_public_key_active.clone();
        successor_key = pending.clone();

        state.prior_sovereign_public_key = Some(prior_key.clone());
        state.sovereign_public_key_active = pending;

        suspended_ids = state.treaty_set.suspend_all_active(state.cycle_index);

        state.identity_chain_length += 1;
        let prior_tip = state.identity_chain_tip_hash.clone();
        state.identity_chain_tip_hash = compute_identity_chain_tip_hash(
            state.identity_chain_length,
            &successor_key,
            &prior_tip,
            inputs.succession_proposal_hash,
        )?;

        state.historical_sovereign_keys.insert(prior_key.clone());
        activation_occurred = true;
        tracing::debug!(
            prior = %prior_key,
            active = %successor_key,
            suspended = suspended_ids.len(),
            "sovereign activation at cycle boundary"
        );
    }

    // Step 4: CycleStart(c) signature under the post-activation key.
    if verify_payload(
        &state.sovereign_public_key_active,
        &inputs.cycle_start_payload.to_value(),
        inputs.cycle_start_signature,
    )
    .is_err()
    {
        return Ok(BoundaryVerificationResult::fail(
            BoundaryCode::SignatureMismatch,
            format!("CycleStart({}) signature failed", inputs.cycle_id),
        ));
    }

    // Step 5: chain/frame continuity.
    let start = inputs.cycle_start_payload;
    if start.identity_chain_length != state.identity_chain_length {
        return Ok(BoundaryVerificationResult::fail(
            BoundaryCode::StateChainMismatch,
            format!(
                "CycleStart chain_length={} != state chain_length={}",
                start.identity_chain_length, state.identity_chain_length
            ),
        ));
    }
    if start.identity_chain_tip_hash != state.identity_chain_tip_hash {
        return Ok(BoundaryVerificationResult::fail(
            BoundaryCode::StateChainMismatch,
            "CycleStart identity_chain_tip_hash mismatch".to_owned(),
        ));
    }
    if start.overlay_hash != state.overlay_hash {
        return Ok(BoundaryVerificationResult::fail(
            BoundaryCode::StateChainMismatch,
            "CycleStart overlay_hash mismatch".to_owned(),
        ));
    }
    if start.sovereign_public_key_active != state.sovereign_public_key_active {
        return Ok(BoundaryVerificationResult::fail(
            BoundaryCode::StateChainMismatch,
            "CycleStart sovereign_public_key_active mismatch".to_owned(),
        ));
    }

    Ok(BoundaryVerificationResult {
        passed: true,
        failure_code: String::new(),
        failure_detail: String::new(),
        activation_occurred,
        prior_key,
        successor_key,
        suspended_grant_ids: suspended_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::signature::sign_payload;
    use crate::KERNEL_VERSION_ID_X3;

    fn start_payload(state: &InternalState, cycle_id: u64) -> CycleStartPayload {
        CycleStartPayload {
            cycle_id,
            kernel_version_id: KERNEL_VERSION_ID_X3.to_owned(),
            state_hash_prev: "00".repeat(32),
            sovereign_public_key_active: state.sovereign_public_key_active.clone(),
            identity_chain_length: state.identity_chain_length,
            identity_chain_tip_hash: state.identity_chain_tip_hash.clone(),
            overlay_hash: state.overlay_hash.clone(),
        }
    }

    #[test]
    fn activation_rotates_keys_suspends_grants_and_advances_lineage() {
        let c = fixtures::constitution();
        let (k1, k1_id) = fixtures::sovereign_keypair(1);
        let mut state = fixtures::sovereign_state(&c, 10);
        let mut grant = fixtures::notify_grant(&c, 3, 8);
        grant.grant_cycle = Some(5);
        state.treaty_set.add_grant(grant);
        state.pending_successor_key = Some(k1_id.clone());
        let k0_id = state.sovereign_public_key_active.clone();
        let genesis_tip = state.identity_chain_tip_hash.clone();

        // Build the post-activation start payload by precomputing the
        // expected lineage advance, then signing with the successor key.
        let expected_tip = compute_identity_chain_tip_hash(2, &k1_id, &genesis_tip, "prop-hash")
            .unwrap();
        let start = CycleStartPayload {
            cycle_id: 11,
            kernel_version_id: KERNEL_VERSION_ID_X3.to_owned(),
            state_hash_prev: "00".repeat(32),
            sovereign_public_key_active: k1_id.clone(),
            identity_chain_length: 2,
            identity_chain_tip_hash: expected_tip.clone(),
            overlay_hash: state.overlay_hash.clone(),
        };
        let start_sig = sign_payload(&k1, &start.to_value()).unwrap();

        let result = verify_and_activate(
            &mut state,
            &BoundaryInputs {
                cycle_id: 1,
                cycle_commit_payload: None,
                cycle_commit_signature: None,
                cycle_start_payload: &start,
                cycle_start_signature: &start_sig,
                succession_admitted_in_prior_cycle: true,
                succession_proposal_hash: "prop-hash",
            },
        )
        .unwrap();

        assert!(result.passed, "{result:?}");
        assert!(result.activation_occurred);
        assert_eq!(result.prior_key, k0_id);
        assert_eq!(result.successor_key, k1_id);
        assert_eq!(result.suspended_grant_ids.len(), 1);
        assert_eq!(state.sovereign_public_key_active, k1_id);
        assert_eq!(state.prior_sovereign_public_key.as_deref(), Some(k0_id.as_str()));
        assert!(state.pending_successor_key.is_none());
        assert_eq!(state.identity_chain_length, 2);
        assert_eq!(state.identity_chain_tip_hash, expected_tip);
        assert!(state.historical_sovereign_keys.contains(&k0_id));
        assert!(state.treaty_set.has_suspensions());
    }

    #[test]
    fn commit_signature_mismatch_is_terminal() {
        let c = fixtures::constitution();
        let mut state = fixtures::sovereign_state(&c, 2);
        let (wrong_key, _) = fixtures::sovereign_keypair(7);

        let commit = CycleCommitPayload {
            cycle_id: 1,
            kernel_version_id: KERNEL_VERSION_ID_X3.to_owned(),
            state_hash_end: "11".repeat(32),
            state_hash_prev: "00".repeat(32),
            constitution_hash_tip: c.hash().to_owned(),
            pending_successor_key: None,
            identity_chain_length: 1,
            identity_chain_tip_hash: state.identity_chain_tip_hash.clone(),
            overlay_hash: state.overlay_hash.clone(),
        };
        let bad_sig = sign_payload(&wrong_key, &commit.to_value()).unwrap();
        let start = start_payload(&state, 2);
        let (k0, _) = fixtures::sovereign_keypair(0);
        let start_sig = sign_payload(&k0, &start.to_value()).unwrap();

        let result = verify_and_activate(
            &mut state,
            &BoundaryInputs {
                cycle_id: 2,
                cycle_commit_payload: Some(&commit),
                cycle_commit_signature: Some(&bad_sig),
                cycle_start_payload: &start,
                cycle_start_signature: &start_sig,
                succession_admitted_in_prior_cycle: false,
                succession_proposal_hash: "",
            },
        )
        .unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure_code, "BOUNDARY_SIGNATURE_MISMATCH");
    }

    #[test]
    fn spurious_pending_successor_is_rejected() {
        let c = fixtures::constitution();
        let mut state = fixtures::sovereign_state(&c, 2);
        let (k0, k0_id) = fixtures::sovereign_keypair(0);

        let commit = CycleCommitPayload {
            cycle_id: 1,
            kernel_version_id: KERNEL_VERSION_ID_X3.to_owned(),
            state_hash_end: "11".repeat(32),
            state_hash_prev: "00".repeat(32),
            constitution_hash_tip: c.hash().to_owned(),
            pending_successor_key: Some(k0_id),
            identity_chain_length: 1,
            identity_chain_tip_hash: state.identity_chain_tip_hash.clone(),
            overlay_hash: state.overlay_hash.clone(),
        };
        let sig = sign_payload(&k0, &commit.to_value()).unwrap();
        let start = start_payload(&state, 2);
        let start_sig = sign_payload(&k0, &start.to_value()).unwrap();

        let result = verify_and_activate(
            &mut state,
            &BoundaryInputs {
                cycle_id: 2,
                cycle_commit_payload: Some(&commit),
                cycle_commit_signature: Some(&sig),
                cycle_start_payload: &start,
                cycle_start_signature: &start_sig,
                succession_admitted_in_prior_cycle: false,
                succession_proposal_hash: "",
            },
        )
        .unwrap();
        assert!(!result.passed);
        assert_eq!(
            result.failure_code,
            "BOUNDARY_STATE_SPURIOUS_PENDING_SUCCESSOR"
        );
    }

    #[test]
    fn chain_continuity_mismatch_is_rejected() {
        let c = fixtures::constitution();
        let mut state = fixtures::sovereign_state(&c, 2);
        let (k0, _) = fixtures::sovereign_keypair(0);
        let mut start = start_payload(&state, 2);
        start.identity_chain_length = 9;
        let start_sig = sign_payload(&k0, &start.to_value()).unwrap();

        let result = verify_and_activate(
            &mut state,
            &BoundaryInputs {
                cycle_id: 1,
                cycle_commit_payload: None,
                cycle_commit_signature: None,
                cycle_start_payload: &start,
                cycle_start_signature: &start_sig,
                succession_admitted_in_prior_cycle: false,
                succession_proposal_hash: "",
            },
        )
        .unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure_code, "BOUNDARY_STATE_CHAIN_MISMATCH");
    }
}
