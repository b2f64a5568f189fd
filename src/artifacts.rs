//! Closed artifact taxonomy for the base policy layer
//!
//! All agent behavior is mediated through typed artifacts. Canonical
//! serialization uses sorted-keys JSON (see [`crate::canonical`]); artifact
//! ids are SHA-256 of the canonical JSON bytes with the `id` field excluded.
//!
//! ## Deterministic time
//!
//! No artifact ever reads the wall clock. Every `created_at` is set
//! explicitly by the caller; kernel-created artifacts carry the cycle time
//! extracted from the TIMESTAMP observation.
//!
//! The enums here are part of the wire format. Reordering variants is fine;
//! renaming the stringified values is a protocol break.

use serde_json::{json, Map, Value};

use crate::canonical::{canonical_bytes, CanonError};
use crate::hashing::{compute_id, sha256_raw};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Who authored an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Author {
    Kernel,
    Host,
    User,
    Reflection,
}

impl Author {
    pub fn as_str(self) -> &'static str {
        match self {
            Author::Kernel => "kernel",
            Author::Host => "host",
            Author::User => "user",
            Author::Reflection => "reflection",
        }
    }
}

/// The five possible cycle decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionType {
    Action,
    QueueAmendment,
    Adopt,
    Refuse,
    Exit,
}

impl DecisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::Action => "ACTION",
            DecisionType::QueueAmendment => "QUEUE_AMENDMENT",
            DecisionType::Adopt => "ADOPT",
            DecisionType::Refuse => "REFUSE",
            DecisionType::Exit => "EXIT",
        }
    }
}

/// Closed action set. The constitution's `action_space` must agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionType {
    Notify,
    ReadLocal,
    WriteLocal,
    Exit,
    LogAppend,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Notify => "Notify",
            ActionType::ReadLocal => "ReadLocal",
            ActionType::WriteLocal => "WriteLocal",
            ActionType::Exit => "Exit",
            ActionType::LogAppend => "LogAppend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Notify" => Some(ActionType::Notify),
            "ReadLocal" => Some(ActionType::ReadLocal),
            "WriteLocal" => Some(ActionType::WriteLocal),
            "Exit" => Some(ActionType::Exit),
            "LogAppend" => Some(ActionType::LogAppend),
            _ => None,
        }
    }
}

/// Observation kinds the host may feed into a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationKind {
    UserInput,
    Timestamp,
    Budget,
    System,
}

impl ObservationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObservationKind::UserInput => "user_input",
            ObservationKind::Timestamp => "timestamp",
            ObservationKind::Budget => "budget",
            ObservationKind::System => "system",
        }
    }
}

/// System events carried in SYSTEM observations. The four `*_fail` variants
/// are exit-mandatory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemEvent {
    StartupIntegrityOk,
    StartupIntegrityFail,
    CitationIndexOk,
    CitationIndexFail,
    ReplayOk,
    ReplayFail,
    ExecutorIntegrityFail,
}

impl SystemEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemEvent::StartupIntegrityOk => "startup_integrity_ok",
            SystemEvent::StartupIntegrityFail => "startup_integrity_fail",
            SystemEvent::CitationIndexOk => "citation_index_ok",
            SystemEvent::CitationIndexFail => "citation_index_fail",
            SystemEvent::ReplayOk => "replay_ok",
            SystemEvent::ReplayFail => "replay_fail",
            SystemEvent::ExecutorIntegrityFail => "executor_integrity_fail",
        }
    }

    /// True if observing this event mandates EXIT(INTEGRITY_RISK).
    pub fn is_integrity_risk(s: &str) -> bool {
        matches!(
            s,
            "startup_integrity_fail"
                | "citation_index_fail"
                | "executor_integrity_fail"
                | "replay_fail"
        )
    }
}

/// Exit reason codes (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReasonCode {
    NoAdmissibleAction,
    AuthorityConflict,
    BudgetExhausted,
    IntegrityRisk,
    UserRequested,
}

impl ExitReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReasonCode::NoAdmissibleAction => "NO_ADMISSIBLE_ACTION",
            ExitReasonCode::AuthorityConflict => "AUTHORITY_CONFLICT",
            ExitReasonCode::BudgetExhausted => "BUDGET_EXHAUSTED",
            ExitReasonCode::IntegrityRisk => "INTEGRITY_RISK",
            ExitReasonCode::UserRequested => "USER_REQUESTED",
        }
    }
}

/// Refusal reason codes (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefusalReasonCode {
    NoAdmissibleAction,
    MissingRequiredArtifact,
    AuthorityCitationInvalid,
    ScopeClaimInvalid,
    ConstitutionViolation,
    ExecutionWarrantUnavailable,
    BudgetExhausted,
    MissingRequiredObservation,
}

impl RefusalReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RefusalReasonCode::NoAdmissibleAction => "NO_ADMISSIBLE_ACTION",
            RefusalReasonCode::MissingRequiredArtifact => "MISSING_REQUIRED_ARTIFACT",
            RefusalReasonCode::AuthorityCitationInvalid => "AUTHORITY_CITATION_INVALID",
            RefusalReasonCode::ScopeClaimInvalid => "SCOPE_CLAIM_INVALID",
            RefusalReasonCode::ConstitutionViolation => "CONSTITUTION_VIOLATION",
            RefusalReasonCode::ExecutionWarrantUnavailable => "EXECUTION_WARRANT_UNAVAILABLE",
            RefusalReasonCode::BudgetExhausted => "BUDGET_EXHAUSTED",
            RefusalReasonCode::MissingRequiredObservation => "MISSING_REQUIRED_OBSERVATION",
        }
    }
}

/// Admission rejection codes (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionRejectionCode {
    CandidateParseFailed,
    InvalidUnicode,
    CandidateBudgetExceeded,
    KernelOnlyAction,
    MissingField,
    InvalidField,
    CitationUnresolvable,
    PathNotAllowlisted,
}

impl AdmissionRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionRejectionCode::CandidateParseFailed => "CANDIDATE_PARSE_FAILED",
            AdmissionRejectionCode::InvalidUnicode => "INVALID_UNICODE",
            AdmissionRejectionCode::CandidateBudgetExceeded => "CANDIDATE_BUDGET_EXCEEDED",
            AdmissionRejectionCode::KernelOnlyAction => "KERNEL_ONLY_ACTION",
            AdmissionRejectionCode::MissingField => "MISSING_FIELD",
            AdmissionRejectionCode::InvalidField => "INVALID_FIELD",
            AdmissionRejectionCode::CitationUnresolvable => "CITATION_UNRESOLVABLE",
            AdmissionRejectionCode::PathNotAllowlisted => "PATH_NOT_ALLOWLISTED",
        }
    }
}

/// The five sequential admission gates, in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionGate {
    Completeness,
    AuthorityCitation,
    ScopeClaim,
    ConstitutionCompliance,
    IoAllowlist,
}

impl AdmissionGate {
    pub const ORDER: [AdmissionGate; 5] = [
        AdmissionGate::Completeness,
        AdmissionGate::AuthorityCitation,
        AdmissionGate::ScopeClaim,
        AdmissionGate::ConstitutionCompliance,
        AdmissionGate::IoAllowlist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionGate::Completeness => "completeness",
            AdmissionGate::AuthorityCitation => "authority_citation",
            AdmissionGate::ScopeClaim => "scope_claim",
            AdmissionGate::ConstitutionCompliance => "constitution_compliance",
            AdmissionGate::IoAllowlist => "io_allowlist",
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact records
// ---------------------------------------------------------------------------

/// An observation fed into the cycle by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub kind: String,
    pub payload: Value,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl Observation {
    pub fn new(
        kind: ObservationKind,
        payload: Value,
        author: Author,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut obs = Observation {
            kind: kind.as_str().to_owned(),
            payload,
            author: author.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        obs.id = compute_id(&obs.to_value())?;
        Ok(obs)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "Observation",
            "kind": self.kind,
            "payload": self.payload,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

/// A request to perform one action, with per-action-type fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRequest {
    pub action_type: String,
    pub fields: Map<String, Value>,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl ActionRequest {
    pub fn new(
        action_type: &str,
        fields: Map<String, Value>,
        author: Author,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut ar = ActionRequest {
            action_type: action_type.to_owned(),
            fields,
            author: author.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        ar.id = compute_id(&ar.to_value())?;
        Ok(ar)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "ActionRequest",
            "action_type": self.action_type,
            "fields": Value::Object(self.fields.clone()),
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }

    /// Field accessor returning "" for absent or non-string fields.
    pub fn str_field(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or("")
    }
}

/// A claim tying an action to the observations that justify its scope.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeClaim {
    pub observation_ids: Vec<String>,
    pub claim: String,
    pub clause_ref: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl ScopeClaim {
    pub fn new(
        observation_ids: Vec<String>,
        claim: &str,
        clause_ref: &str,
        author: Author,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut sc = ScopeClaim {
            observation_ids,
            claim: claim.to_owned(),
            clause_ref: clause_ref.to_owned(),
            author: author.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        sc.id = compute_id(&sc.to_value())?;
        Ok(sc)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "ScopeClaim",
            "observation_ids": self.observation_ids,
            "claim": self.claim,
            "clause_ref": self.clause_ref,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

/// Free-text justification attached to a candidate bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct Justification {
    pub text: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl Justification {
    pub fn new(text: &str, author: Author, created_at: &str) -> Result<Self, CanonError> {
        let mut j = Justification {
            text: text.to_owned(),
            author: author.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        j.id = compute_id(&j.to_value())?;
        Ok(j)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "Justification",
            "text": self.text,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

/// A complete proposal: ActionRequest + optional ScopeClaim + optional
/// Justification + citation list.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateBundle {
    pub action_request: ActionRequest,
    pub scope_claim: Option<ScopeClaim>,
    pub justification: Option<Justification>,
    pub authority_citations: Vec<String>,
}

impl CandidateBundle {
    pub fn to_value(&self) -> Value {
        json!({
            "action_request": self.action_request.to_value(),
            "scope_claim": self.scope_claim.as_ref().map(ScopeClaim::to_value),
            "justification": self.justification.as_ref().map(Justification::to_value),
            "authority_citations": self.authority_citations,
        })
    }

    /// SHA-256 raw bytes of the canonical JSON of the composite bundle.
    /// The selector compares these byte-wise.
    pub fn bundle_hash(&self) -> Result<[u8; 32], CanonError> {
        Ok(sha256_raw(&canonical_bytes(&self.to_value())?))
    }

    pub fn bundle_hash_hex(&self) -> Result<String, CanonError> {
        Ok(hex::encode(self.bundle_hash()?))
    }
}

/// A single-use execution warrant. `warrant_id` is the SHA-256 of the
/// canonical payload with the `warrant_id` field excluded.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionWarrant {
    pub action_request_id: String,
    pub action_type: String,
    pub scope_constraints: Map<String, Value>,
    pub issued_in_cycle: u64,
    pub single_use: bool,
    pub warrant_id: String,
    pub created_at: String,
}

impl ExecutionWarrant {
    pub fn new(
        action_request_id: &str,
        action_type: &str,
        scope_constraints: Map<String, Value>,
        issued_in_cycle: u64,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut w = ExecutionWarrant {
            action_request_id: action_request_id.to_owned(),
            action_type: action_type.to_owned(),
            scope_constraints,
            issued_in_cycle,
            single_use: true,
            warrant_id: String::new(),
            created_at: created_at.to_owned(),
        };
        w.warrant_id = crate::hashing::content_hash(&crate::hashing::strip_fields(
            &w.to_value(),
            &["warrant_id"],
        ))?;
        Ok(w)
    }

    /// Origin of the warrant, defaulting to "rsa" when unset.
    pub fn origin(&self) -> &str {
        self.scope_constraints
            .get("origin")
            .and_then(Value::as_str)
            .unwrap_or("rsa")
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "ExecutionWarrant",
            "action_request_id": self.action_request_id,
            "action_type": self.action_type,
            "scope_constraints": Value::Object(self.scope_constraints.clone()),
            "issued_in_cycle": self.issued_in_cycle,
            "single_use": self.single_use,
            "warrant_id": self.warrant_id,
            "created_at": self.created_at,
        })
    }
}

/// Record of a cycle-level REFUSE decision.
#[derive(Clone, Debug, PartialEq)]
pub struct RefusalRecord {
    pub reason_code: String,
    /// Admission gate name, or "none" / "required_observations".
    pub failed_gate: String,
    pub missing_artifacts: Vec<String>,
    pub authority_ids_considered: Vec<String>,
    pub observation_ids_referenced: Vec<String>,
    /// Counts of rejected candidates keyed by the gate that rejected them.
    pub rejection_summary_by_gate: Map<String, Value>,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl RefusalRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reason_code: RefusalReasonCode,
        failed_gate: &str,
        missing_artifacts: Vec<String>,
        observation_ids_referenced: Vec<String>,
        rejection_summary_by_gate: Map<String, Value>,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut r = RefusalRecord {
            reason_code: reason_code.as_str().to_owned(),
            failed_gate: failed_gate.to_owned(),
            missing_artifacts,
            authority_ids_considered: Vec::new(),
            observation_ids_referenced,
            rejection_summary_by_gate,
            author: Author::Kernel.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        r.id = compute_id(&r.to_value())?;
        Ok(r)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "RefusalRecord",
            "reason_code": self.reason_code,
            "failed_gate": self.failed_gate,
            "missing_artifacts": self.missing_artifacts,
            "authority_ids_considered": self.authority_ids_considered,
            "observation_ids_referenced": self.observation_ids_referenced,
            "rejection_summary_by_gate": Value::Object(self.rejection_summary_by_gate.clone()),
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

/// Record of a cycle-level EXIT decision.
#[derive(Clone, Debug, PartialEq)]
pub struct ExitRecord {
    pub reason_code: String,
    pub authority_citations: Vec<String>,
    pub scope_claim: Value,
    pub justification: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl ExitRecord {
    pub fn new(
        reason_code: ExitReasonCode,
        authority_citations: Vec<String>,
        scope_claim: Value,
        justification: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut e = ExitRecord {
            reason_code: reason_code.as_str().to_owned(),
            authority_citations,
            scope_claim,
            justification: justification.to_owned(),
            author: Author::Kernel.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        e.id = compute_id(&e.to_value())?;
        Ok(e)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "ExitRecord",
            "reason_code": self.reason_code,
            "authority_citations": self.authority_citations,
            "scope_claim": self.scope_claim,
            "justification": self.justification,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{content_hash, strip_fields};

    #[test]
    fn observation_id_matches_recomputed_content_hash() {
        let obs = Observation::new(
            ObservationKind::Timestamp,
            json!({"iso8601_utc": "2024-01-01T00:00:00Z"}),
            Author::Host,
            "2024-01-01T00:00:00Z",
        )
        .unwrap();
        let recomputed = content_hash(&strip_fields(&obs.to_value(), &["id"])).unwrap();
        assert_eq!(obs.id, recomputed);
    }

    #[test]
    fn warrant_id_excludes_itself() {
        let w = ExecutionWarrant::new(
            "req-1",
            "Notify",
            Map::new(),
            3,
            "2024-01-01T00:00:00Z",
        )
        .unwrap();
        let recomputed =
            content_hash(&strip_fields(&w.to_value(), &["warrant_id"])).unwrap();
        assert_eq!(w.warrant_id, recomputed);
        assert!(w.single_use);
    }

    #[test]
    fn bundle_hashes_differ_for_different_payloads() {
        let mk = |msg: &str| {
            let mut fields = Map::new();
            fields.insert("target".into(), json!("stdout"));
            fields.insert("message".into(), json!(msg));
            CandidateBundle {
                action_request: ActionRequest::new(
                    "Notify",
                    fields,
                    Author::Host,
                    "2024-01-01T00:00:00Z",
                )
                .unwrap(),
                scope_claim: None,
                justification: None,
                authority_citations: vec![],
            }
        };
        assert_ne!(
            mk("a").bundle_hash().unwrap(),
            mk("b").bundle_hash().unwrap()
        );
    }
}
