//! Sovereign succession admission
//!
//! A succession proposal transfers sovereign identity from the active key to
//! a successor and must be signed by the active sovereign. Evaluation is a
//! seven-gate pipeline (S1–S7); at most one proposal is admitted per cycle,
//! and a non-self admission only sets `pending_successor_key` — the actual
//! rotation happens at the next cycle boundary.
//!
//! The prior sovereign key has zero authority here: a proposal whose signer
//! is the previous key fails S3 with `PRIOR_KEY_PRIVILEGE_LEAK`, not with a
//! generic signature failure.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::artifacts::Author;
use crate::canonical::CanonError;
use crate::hashing::{content_hash, strip_fields};
use crate::overlay::EffectiveFrame;
use crate::signature::verify_payload;
use crate::treaty::validate_grantee_identifier;

// ---------------------------------------------------------------------------
// Rejection codes and gates
// ---------------------------------------------------------------------------

/// Rejection codes for the succession pipeline (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuccessionRejectionCode {
    InvalidField,
    AuthorityCitationInvalid,
    SignatureInvalid,
    PriorSovereignMismatch,
    IdentityCycle,
    LineageFork,
    SuccessionDisabled,
    MultipleSuccessionsInCycle,
    PriorKeyPrivilegeLeak,
}

impl SuccessionRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            SuccessionRejectionCode::InvalidField => "INVALID_FIELD",
            SuccessionRejectionCode::AuthorityCitationInvalid => "AUTHORITY_CITATION_INVALID",
            SuccessionRejectionCode::SignatureInvalid => "SIGNATURE_INVALID",
            SuccessionRejectionCode::PriorSovereignMismatch => "PRIOR_SOVEREIGN_MISMATCH",
            SuccessionRejectionCode::IdentityCycle => "IDENTITY_CYCLE",
            SuccessionRejectionCode::LineageFork => "LINEAGE_FORK",
            SuccessionRejectionCode::SuccessionDisabled => "SUCCESSION_DISABLED",
            SuccessionRejectionCode::MultipleSuccessionsInCycle => {
                "MULTIPLE_SUCCESSIONS_IN_CYCLE"
            }
            SuccessionRejectionCode::PriorKeyPrivilegeLeak => "PRIOR_KEY_PRIVILEGE_LEAK",
        }
    }
}

/// Gate labels S1–S7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuccessionGate {
    S1Completeness,
    S2CitationSnapshot,
    S3Signature,
    S4SovereignMatch,
    S5LineageIntegrity,
    S6ConstitutionalCompliance,
    S7PerCycleUniqueness,
}

impl SuccessionGate {
    pub fn as_str(self) -> &'static str {
        match self {
            SuccessionGate::S1Completeness => "s1_completeness",
            SuccessionGate::S2CitationSnapshot => "s2_citation_snapshot",
            SuccessionGate::S3Signature => "s3_signature",
            SuccessionGate::S4SovereignMatch => "s4_sovereign_match",
            SuccessionGate::S5LineageIntegrity => "s5_lineage_integrity",
            SuccessionGate::S6ConstitutionalCompliance => "s6_constitutional_compliance",
            SuccessionGate::S7PerCycleUniqueness => "s7_per_cycle_uniqueness",
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// Proposal to transition sovereign identity to a successor key.
#[derive(Clone, Debug, PartialEq)]
pub struct SuccessionProposal {
    pub prior_sovereign_public_key: String,
    pub successor_public_key: String,
    pub authority_citations: Vec<String>,
    pub justification: String,
    pub signature: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl SuccessionProposal {
    pub fn new(
        prior_sovereign_public_key: &str,
        successor_public_key: &str,
        mut authority_citations: Vec<String>,
        justification: &str,
        signature: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        authority_citations.sort();
        let mut p = SuccessionProposal {
            prior_sovereign_public_key: prior_sovereign_public_key.to_owned(),
            successor_public_key: successor_public_key.to_owned(),
            authority_citations,
            justification: justification.to_owned(),
            signature: signature.to_owned(),
            author: Author::Reflection.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        p.id = content_hash(&strip_fields(&p.to_value_id(), &["id"]))?;
        Ok(p)
    }

    pub fn to_value_full(&self) -> Value {
        let mut v = self.to_value_id();
        v["signature"] = json!(self.signature);
        v
    }

    /// Identity excludes the signature (payload identity).
    pub fn to_value_id(&self) -> Value {
        json!({
            "type": "SuccessionProposal",
            "prior_sovereign_public_key": self.prior_sovereign_public_key,
            "successor_public_key": self.successor_public_key,
            "authority_citations": self.authority_citations,
            "justification": self.justification,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }

    /// Payload bytes the sovereign signs: signature and id excluded.
    pub fn signing_payload(&self) -> Value {
        strip_fields(&self.to_value_id(), &["id"])
    }

    /// Self-succession (successor equals prior) is a no-op rotation.
    pub fn is_self_succession(&self) -> bool {
        self.successor_public_key == self.prior_sovereign_public_key
    }
}

// ---------------------------------------------------------------------------
// Trace types
// ---------------------------------------------------------------------------

/// One gate decision for one succession proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct SuccessionAdmissionEvent {
    pub artifact_id: String,
    pub gate: String,
    pub result: String,
    pub reason_code: String,
    pub detail: String,
}

impl SuccessionAdmissionEvent {
    pub fn to_value(&self) -> Value {
        let mut v = json!({
            "event_type": "succession_admission_event",
            "artifact_id": self.artifact_id,
            "gate": self.gate,
            "result": self.result,
        });
        if !self.reason_code.is_empty() {
            v["reason_code"] = json!(self.reason_code);
        }
        if !self.detail.is_empty() {
            v["detail"] = json!(self.detail);
        }
        v
    }
}

/// Admission record for one succession proposal.
#[derive(Clone, Debug)]
pub struct SuccessionAdmissionRecord {
    pub proposal_id: String,
    pub admitted: bool,
    pub is_self_succession: bool,
    pub events: Vec<SuccessionAdmissionEvent>,
    pub failed_gate: String,
    pub rejection_code: String,
}

impl SuccessionAdmissionRecord {
    pub fn to_value(&self) -> Value {
        json!({
            "proposal_id": self.proposal_id,
            "admitted": self.admitted,
            "is_self_succession": self.is_self_succession,
            "events": self.events.iter().map(SuccessionAdmissionEvent::to_value).collect::<Vec<_>>(),
            "failed_gate": self.failed_gate,
            "rejection_code": self.rejection_code,
        })
    }
}

/// Compact record for a rejected proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct SuccessionRejectionRecord {
    pub proposal_id: String,
    pub rejection_code: String,
    pub failed_gate: String,
}

impl SuccessionRejectionRecord {
    pub fn to_value(&self) -> Value {
        json!({
            "proposal_id": self.proposal_id,
            "rejection_code": self.rejection_code,
            "failed_gate": self.failed_gate,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Evaluates succession proposals through gates S1–S7. Pure; never mutates
/// state. At most one admission per evaluation.
pub struct SuccessionAdmissionPipeline<'a> {
    pub sovereign_public_key_active: &'a str,
    pub prior_sovereign_public_key: Option<&'a str>,
    pub historical_sovereign_keys: &'a BTreeSet<String>,
    pub frame: &'a EffectiveFrame<'a>,
}

impl SuccessionAdmissionPipeline<'_> {
    /// Evaluate in input order. Once one proposal is admitted, the rest are
    /// rejected with `MULTIPLE_SUCCESSIONS_IN_CYCLE`.
    pub fn evaluate(
        &self,
        proposals: &[SuccessionProposal],
    ) -> (
        Option<SuccessionAdmissionRecord>,
        Vec<SuccessionRejectionRecord>,
        Vec<SuccessionAdmissionEvent>,
    ) {
        let mut admitted: Option<SuccessionAdmissionRecord> = None;
        let mut rejections = Vec::new();
        let mut events = Vec::new();

        for proposal in proposals {
            let record = self.evaluate_single(proposal, admitted.is_some());
            events.extend(record.events.iter().cloned());
            if record.admitted {
                admitted = Some(record);
            } else {
                rejections.push(SuccessionRejectionRecord {
                    proposal_id: record.proposal_id,
                    rejection_code: record.rejection_code,
                    failed_gate: record.failed_gate,
                });
            }
        }
        (admitted, rejections, events)
    }

    fn evaluate_single(
        &self,
        proposal: &SuccessionProposal,
        already_admitted: bool,
    ) -> SuccessionAdmissionRecord {
        let pid = proposal.id.clone();
        let mut events = Vec::new();

        let pass = |gate: SuccessionGate, events: &mut Vec<SuccessionAdmissionEvent>| {
            events.push(SuccessionAdmissionEvent {
                artifact_id: pid.clone(),
                gate: gate.as_str().to_owned(),
                result: "pass".to_owned(),
                reason_code: String::new(),
                detail: String::new(),
            });
        };
        let reject = |gate: SuccessionGate,
                      code: SuccessionRejectionCode,
                      detail: String,
                      mut events: Vec<SuccessionAdmissionEvent>| {
            events.push(SuccessionAdmissionEvent {
                artifact_id: pid.clone(),
                gate: gate.as_str().to_owned(),
                result: "fail".to_owned(),
                reason_code: code.as_str().to_owned(),
                detail,
            });
            SuccessionAdmissionRecord {
                proposal_id: pid.clone(),
                admitted: false,
                is_self_succession: false,
                events,
                failed_gate: gate.as_str().to_owned(),
                rejection_code: code.as_str().to_owned(),
            }
        };

        // --- S1: Completeness ---
        let mut missing = Vec::new();
        if proposal.prior_sovereign_public_key.is_empty() {
            missing.push("prior_sovereign_public_key".to_owned());
        }
        if proposal.successor_public_key.is_empty() {
            missing.push("successor_public_key".to_owned());
        }
        if proposal.authority_citations.is_empty() {
            missing.push("authority_citations".to_owned());
        }
        if proposal.justification.is_empty() {
            missing.push("justification".to_owned());
        }
        if proposal.signature.is_empty() {
            missing.push("signature".to_owned());
        }
        if !proposal.successor_public_key.is_empty()
            && !validate_grantee_identifier(&proposal.successor_public_key)
        {
            missing.push("successor_public_key (invalid format)".to_owned());
        }
        if !missing.is_empty() {
            return reject(
                SuccessionGate::S1Completeness,
                SuccessionRejectionCode::InvalidField,
                format!("Missing/invalid: {}", missing.join(", ")),
                events,
            );
        }
        pass(SuccessionGate::S1Completeness, &mut events);

        // --- S2: Authority Citation Snapshot ---
        use crate::constitution::AdmissionConstitution;
        for citation in &proposal.authority_citations {
            if self.frame.resolve_citation(citation).is_none() {
                return reject(
                    SuccessionGate::S2CitationSnapshot,
                    SuccessionRejectionCode::AuthorityCitationInvalid,
                    format!("Unresolvable citation: {citation}"),
                    events,
                );
            }
        }
        pass(SuccessionGate::S2CitationSnapshot, &mut events);

        // --- S3: Signature ---
        let signer = proposal.prior_sovereign_public_key.as_str();
        if signer != self.sovereign_public_key_active
            && self.prior_sovereign_public_key == Some(signer)
        {
            return reject(
                SuccessionGate::S3Signature,
                SuccessionRejectionCode::PriorKeyPrivilegeLeak,
                "Prior sovereign key attempted succession post-activation".to_owned(),
                events,
            );
        }
        if let Err(e) = verify_payload(signer, &proposal.signing_payload(), &proposal.signature)
        {
            return reject(
                SuccessionGate::S3Signature,
                SuccessionRejectionCode::SignatureInvalid,
                e.to_string(),
                events,
            );
        }
        pass(SuccessionGate::S3Signature, &mut events);

        // --- S4: Sovereign Match ---
        if proposal.prior_sovereign_public_key != self.sovereign_public_key_active {
            return reject(
                SuccessionGate::S4SovereignMatch,
                SuccessionRejectionCode::PriorSovereignMismatch,
                format!(
                    "Expected {}, got {}",
                    self.sovereign_public_key_active, proposal.prior_sovereign_public_key
                ),
                events,
            );
        }
        pass(SuccessionGate::S4SovereignMatch, &mut events);

        // --- S5: Lineage Integrity (self-succession is always safe) ---
        if !proposal.is_self_succession() {
            if self
                .historical_sovereign_keys
                .contains(&proposal.successor_public_key)
            {
                return reject(
                    SuccessionGate::S5LineageIntegrity,
                    SuccessionRejectionCode::IdentityCycle,
                    format!(
                        "Successor key {} already in lineage history",
                        proposal.successor_public_key
                    ),
                    events,
                );
            }
            if proposal.successor_public_key == self.sovereign_public_key_active {
                return reject(
                    SuccessionGate::S5LineageIntegrity,
                    SuccessionRejectionCode::IdentityCycle,
                    "Successor equals active sovereign (use self-succession)".to_owned(),
                    events,
                );
            }
        }
        pass(SuccessionGate::S5LineageIntegrity, &mut events);

        // --- S6: Constitutional Compliance ---
        if !self.frame.is_succession_enabled() {
            return reject(
                SuccessionGate::S6ConstitutionalCompliance,
                SuccessionRejectionCode::SuccessionDisabled,
                String::new(),
                events,
            );
        }
        pass(SuccessionGate::S6ConstitutionalCompliance, &mut events);

        // --- S7: Per-Cycle Uniqueness ---
        if already_admitted {
            return reject(
                SuccessionGate::S7PerCycleUniqueness,
                SuccessionRejectionCode::MultipleSuccessionsInCycle,
                String::new(),
                events,
            );
        }
        pass(SuccessionGate::S7PerCycleUniqueness, &mut events);

        SuccessionAdmissionRecord {
            proposal_id: pid,
            admitted: true,
            is_self_succession: proposal.is_self_succession(),
            events,
            failed_gate: String::new(),
            rejection_code: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::signature::sign_payload;

    fn pipeline_parts() -> (crate::constitution::Constitution, crate::overlay::Overlay) {
        (fixtures::constitution(), fixtures::overlay())
    }

    #[test]
    fn valid_succession_is_admitted_and_marks_non_self() {
        let (c, ov) = pipeline_parts();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let history = BTreeSet::new();
        let proposal = fixtures::succession_proposal(&c, &ov, 0, 1);
        let (k0_id, _) = fixtures::sovereign_ids();

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k0_id,
            prior_sovereign_public_key: None,
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, events) = pipeline.evaluate(&[proposal]);
        let record = admitted.expect("admitted");
        assert!(!record.is_self_succession);
        assert!(rejections.is_empty());
        assert_eq!(events.len(), 7);
        assert!(events.iter().all(|e| e.result == "pass"));
    }

    #[test]
    fn second_succession_in_cycle_is_rejected_at_s7() {
        let (c, ov) = pipeline_parts();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let history = BTreeSet::new();
        let first = fixtures::succession_proposal(&c, &ov, 0, 1);
        let second = fixtures::succession_proposal(&c, &ov, 0, 2);
        let (k0_id, _) = fixtures::sovereign_ids();

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k0_id,
            prior_sovereign_public_key: None,
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, _) = pipeline.evaluate(&[first, second]);
        assert!(admitted.is_some());
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].rejection_code, "MULTIPLE_SUCCESSIONS_IN_CYCLE");
        assert_eq!(rejections[0].failed_gate, "s7_per_cycle_uniqueness");
    }

    #[test]
    fn successor_already_in_history_is_an_identity_cycle() {
        let (c, ov) = pipeline_parts();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let (k0_id, k1_id) = fixtures::sovereign_ids();
        let mut history = BTreeSet::new();
        history.insert(k1_id);
        let proposal = fixtures::succession_proposal(&c, &ov, 0, 1);

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k0_id,
            prior_sovereign_public_key: None,
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, _) = pipeline.evaluate(&[proposal]);
        assert!(admitted.is_none());
        assert_eq!(rejections[0].rejection_code, "IDENTITY_CYCLE");
    }

    #[test]
    fn prior_key_succession_attempt_is_a_privilege_leak() {
        let (c, ov) = pipeline_parts();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let history = BTreeSet::new();
        let (k0_id, k1_id) = fixtures::sovereign_ids();
        // Signed by K0 claiming K0 as prior, after activation moved to K1.
        let proposal = fixtures::succession_proposal(&c, &ov, 0, 2);

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k1_id,
            prior_sovereign_public_key: Some(&k0_id),
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, _) = pipeline.evaluate(&[proposal]);
        assert!(admitted.is_none());
        assert_eq!(rejections[0].rejection_code, "PRIOR_KEY_PRIVILEGE_LEAK");
        assert_eq!(rejections[0].failed_gate, "s3_signature");
    }

    #[test]
    fn tampered_signature_fails_s3() {
        let (c, ov) = pipeline_parts();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let history = BTreeSet::new();
        let (k0_id, _) = fixtures::sovereign_ids();
        let mut proposal = fixtures::succession_proposal(&c, &ov, 0, 1);
        // Re-sign over a different payload.
        let (k0, _) = crate::signature::derive_keypair(fixtures::SOVEREIGN_SEED, 0).unwrap();
        proposal.signature =
            sign_payload(&k0, &serde_json::json!({"tampered": true})).unwrap();

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k0_id,
            prior_sovereign_public_key: None,
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, _) = pipeline.evaluate(&[proposal]);
        assert!(admitted.is_none());
        assert_eq!(rejections[0].rejection_code, "SIGNATURE_INVALID");
    }

    #[test]
    fn succession_disabled_by_overlay_clause() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay_with_succession_disabled();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let history = BTreeSet::new();
        let (k0_id, _) = fixtures::sovereign_ids();
        let proposal = fixtures::succession_proposal(&c, &ov, 0, 1);

        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &k0_id,
            prior_sovereign_public_key: None,
            historical_sovereign_keys: &history,
            frame: &frame,
        };
        let (admitted, rejections, _) = pipeline.evaluate(&[proposal]);
        assert!(admitted.is_none());
        assert_eq!(rejections[0].rejection_code, "SUCCESSION_DISABLED");
    }
}
