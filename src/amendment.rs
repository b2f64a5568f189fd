//! Constitutional amendment machinery
//!
//! Amendments are full-document replacements: a proposal carries the prior
//! constitution hash, the proposed YAML, and the declared hash of that YAML.
//! Admission is a nine-step type-switched pipeline; a queued proposal must
//! then survive a cooling period before adoption, and adoption invalidates
//! every other pending proposal whose prior hash no longer matches.
//!
//! The proposal's identity hash excludes the YAML body, so identity is
//! whitespace-insensitive; the declared constitution hash pins the content.
//!
//! Ratchet (gate 8B.5): cooling and authorization threshold may never
//! decrease across amendments, the density upper bound may never increase,
//! and structured procedure fields may not be removed once present.

use serde_json::{json, Map, Value};

use crate::artifacts::Author;
use crate::canonical::CanonError;
use crate::constitution::{canonicalize_constitution_bytes, Constitution};
use crate::hashing::{content_hash, sha256_hex, strip_fields};
use crate::state::{InternalState, PendingAmendment, StateDelta};

/// Keys whose presence anywhere in a proposed constitution is an attempt to
/// smuggle executable or kernel-mutating content (gate 8A).
const FORBIDDEN_KEYS: [&str; 10] = [
    "script", "code", "eval", "template", "hook", "python", "js", "expr", "exec", "lambda",
];

// ---------------------------------------------------------------------------
// Rejection codes and gates
// ---------------------------------------------------------------------------

/// Rejection codes for the amendment admission pipeline (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmendmentRejectionCode {
    AmendmentsDisabled,
    PriorHashMismatch,
    EckMissing,
    SchemaInvalid,
    PhysicsClaimDetected,
    WildcardMapping,
    UniversalAuthorization,
    ScopeCollapse,
    EnvelopeDegraded,
    CoolingViolation,
    CitationUnresolvable,
}

impl AmendmentRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AmendmentRejectionCode::AmendmentsDisabled => "AMENDMENTS_DISABLED",
            AmendmentRejectionCode::PriorHashMismatch => "PRIOR_HASH_MISMATCH",
            AmendmentRejectionCode::EckMissing => "ECK_MISSING",
            AmendmentRejectionCode::SchemaInvalid => "SCHEMA_INVALID",
            AmendmentRejectionCode::PhysicsClaimDetected => "PHYSICS_CLAIM_DETECTED",
            AmendmentRejectionCode::WildcardMapping => "WILDCARD_MAPPING",
            AmendmentRejectionCode::UniversalAuthorization => "UNIVERSAL_AUTHORIZATION",
            AmendmentRejectionCode::ScopeCollapse => "SCOPE_COLLAPSE",
            AmendmentRejectionCode::EnvelopeDegraded => "ENVELOPE_DEGRADED",
            AmendmentRejectionCode::CoolingViolation => "COOLING_VIOLATION",
            AmendmentRejectionCode::CitationUnresolvable => "CITATION_UNRESOLVABLE",
        }
    }
}

/// Gate labels in pipeline order.
pub const AMENDMENT_GATE_ORDER: [&str; 7] = [
    "completeness",
    "constitution_compliance",
    "authority_citation",
    "amendment_authorization",
    "full_replacement_integrity",
    "physics_claim_rejection",
    "structural_preservation",
];

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A full-replacement amendment proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct AmendmentProposal {
    pub prior_constitution_hash: String,
    pub proposed_constitution_yaml: String,
    pub proposed_constitution_hash: String,
    pub justification: String,
    pub authority_citations: Vec<String>,
    pub diff_summary: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl AmendmentProposal {
    pub fn new(
        prior_constitution_hash: &str,
        proposed_constitution_yaml: &str,
        proposed_constitution_hash: &str,
        justification: &str,
        authority_citations: Vec<String>,
        diff_summary: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut p = AmendmentProposal {
            prior_constitution_hash: prior_constitution_hash.to_owned(),
            proposed_constitution_yaml: proposed_constitution_yaml.to_owned(),
            proposed_constitution_hash: proposed_constitution_hash.to_owned(),
            justification: justification.to_owned(),
            authority_citations,
            diff_summary: diff_summary.to_owned(),
            author: Author::Reflection.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        p.id = content_hash(&strip_fields(&p.to_value_id(), &["id"]))?;
        Ok(p)
    }

    /// Full serialization including the YAML body (logging / storage).
    pub fn to_value_full(&self) -> Value {
        let mut v = self.to_value_id();
        v["proposed_constitution_yaml"] = json!(self.proposed_constitution_yaml);
        v
    }

    /// Identity serialization: the YAML body is excluded so the id is
    /// whitespace-insensitive; the declared hash pins the content.
    pub fn to_value_id(&self) -> Value {
        json!({
            "type": "AmendmentProposal",
            "prior_constitution_hash": self.prior_constitution_hash,
            "proposed_constitution_hash": self.proposed_constitution_hash,
            "justification": self.justification,
            "authority_citations": self.authority_citations,
            "diff_summary": self.diff_summary,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

/// Kernel-issued record of an adoption.
#[derive(Clone, Debug, PartialEq)]
pub struct AmendmentAdoptionRecord {
    pub proposal_id: String,
    pub prior_constitution_hash: String,
    pub new_constitution_hash: String,
    pub effective_cycle: u64,
    pub authority_citations: Vec<String>,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl AmendmentAdoptionRecord {
    pub fn new(
        proposal_id: &str,
        prior_constitution_hash: &str,
        new_constitution_hash: &str,
        effective_cycle: u64,
        authority_citations: Vec<String>,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        let mut r = AmendmentAdoptionRecord {
            proposal_id: proposal_id.to_owned(),
            prior_constitution_hash: prior_constitution_hash.to_owned(),
            new_constitution_hash: new_constitution_hash.to_owned(),
            effective_cycle,
            authority_citations,
            author: Author::Kernel.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        r.id = content_hash(&strip_fields(&r.to_value(), &["id"]))?;
        Ok(r)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "AmendmentAdoptionRecord",
            "proposal_id": self.proposal_id,
            "prior_constitution_hash": self.prior_constitution_hash,
            "new_constitution_hash": self.new_constitution_hash,
            "effective_cycle": self.effective_cycle,
            "authority_citations": self.authority_citations,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

// ---------------------------------------------------------------------------
// Trace events
// ---------------------------------------------------------------------------

/// One gate decision for one amendment proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct AmendmentAdmissionEvent {
    pub proposal_id: String,
    pub gate: String,
    pub result: String,
    pub reason_code: String,
    pub detail: String,
}

impl AmendmentAdmissionEvent {
    pub fn to_value(&self) -> Value {
        let mut v = json!({
            "event_type": "amendment_admission_event",
            "proposal_id": self.proposal_id,
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

/// Result of running one proposal through the pipeline.
#[derive(Clone, Debug)]
pub struct AmendmentAdmissionResult {
    pub proposal: AmendmentProposal,
    pub admitted: bool,
    pub events: Vec<AmendmentAdmissionEvent>,
    pub failed_gate: String,
    pub rejection_code: String,
}

type GateVerdict = Result<(), (AmendmentRejectionCode, String)>;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Nine-step type-switched admission for amendment proposals.
///
/// The scope-claim and IO-allowlist gates of the candidate pipeline do not
/// apply to amendments; compliance is checked before citations so a disabled
/// amendment system short-circuits cheaply.
pub struct AmendmentAdmissionPipeline<'a> {
    constitution: &'a Constitution,
    schema: Option<&'a jsonschema::Validator>,
    pending_count: usize,
}

impl<'a> AmendmentAdmissionPipeline<'a> {
    pub fn new(
        constitution: &'a Constitution,
        schema: Option<&'a jsonschema::Validator>,
        pending: &[PendingAmendment],
    ) -> Self {
        AmendmentAdmissionPipeline {
            constitution,
            schema,
            pending_count: pending.len(),
        }
    }

    /// Run all proposals in input order.
    pub fn evaluate(
        &self,
        proposals: &[AmendmentProposal],
    ) -> (
        Vec<AmendmentAdmissionResult>,
        Vec<AmendmentAdmissionResult>,
        Vec<AmendmentAdmissionEvent>,
    ) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        let mut all_events = Vec::new();

        for proposal in proposals {
            let result = self.evaluate_proposal(proposal);
            all_events.extend(result.events.iter().cloned());
            if result.admitted {
                admitted.push(result);
            } else {
                rejected.push(result);
            }
        }
        (admitted, rejected, all_events)
    }

    fn evaluate_proposal(&self, proposal: &AmendmentProposal) -> AmendmentAdmissionResult {
        let pid = proposal.id.clone();
        let mut events = Vec::new();

        for gate in AMENDMENT_GATE_ORDER {
            let verdict = match gate {
                "completeness" => self.gate_completeness(proposal),
                "constitution_compliance" => self.gate_compliance(),
                "authority_citation" => self.gate_authority_citation(proposal),
                "amendment_authorization" => self.gate_authorization(proposal),
                "full_replacement_integrity" => self.gate_replacement_integrity(proposal),
                "physics_claim_rejection" => self.gate_physics_claim(proposal),
                "structural_preservation" => self.gate_structural_preservation(proposal),
                _ => Ok(()),
            };

            match verdict {
                Ok(()) => events.push(AmendmentAdmissionEvent {
                    proposal_id: pid.clone(),
                    gate: gate.to_owned(),
                    result: "pass".to_owned(),
                    reason_code: String::new(),
                    detail: String::new(),
                }),
                Err((code, detail)) => {
                    events.push(AmendmentAdmissionEvent {
                        proposal_id: pid.clone(),
                        gate: gate.to_owned(),
                        result: "fail".to_owned(),
                        reason_code: code.as_str().to_owned(),
                        detail: detail.clone(),
                    });
                    return AmendmentAdmissionResult {
                        proposal: proposal.clone(),
                        admitted: false,
                        events,
                        failed_gate: gate.to_owned(),
                        rejection_code: code.as_str().to_owned(),
                    };
                }
            }
        }

        AmendmentAdmissionResult {
            proposal: proposal.clone(),
            admitted: true,
            events,
            failed_gate: String::new(),
            rejection_code: String::new(),
        }
    }

    // --- Gate 1: Completeness ------------------------------------------------

    fn gate_completeness(&self, proposal: &AmendmentProposal) -> GateVerdict {
        let missing = |name: &str| {
            Err((
                AmendmentRejectionCode::SchemaInvalid,
                format!("missing {name}"),
            ))
        };
        if proposal.prior_constitution_hash.is_empty() {
            return missing("prior_constitution_hash");
        }
        if proposal.proposed_constitution_yaml.is_empty() {
            return missing("proposed_constitution_yaml");
        }
        if proposal.proposed_constitution_hash.is_empty() {
            return missing("proposed_constitution_hash");
        }
        if proposal.justification.is_empty() {
            return missing("justification");
        }
        if proposal.authority_citations.is_empty() {
            return missing("authority_citations");
        }
        Ok(())
    }

    // --- Gate 4: Compliance --------------------------------------------------

    fn gate_compliance(&self) -> GateVerdict {
        if !self.constitution.amendments_enabled() {
            return Err((
                AmendmentRejectionCode::AmendmentsDisabled,
                "amendments_enabled is false".to_owned(),
            ));
        }
        Ok(())
    }

    // --- Gate 2: Authority Citation (BOTH mode) ------------------------------

    fn gate_authority_citation(&self, proposal: &AmendmentProposal) -> GateVerdict {
        if self.constitution.authority_reference_mode() == "BOTH" {
            self.constitution
                .validate_citations_both(&proposal.authority_citations)
                .map_err(|msg| (AmendmentRejectionCode::CitationUnresolvable, msg))
        } else {
            for citation in &proposal.authority_citations {
                if self.constitution.resolve(citation).is_none() {
                    return Err((
                        AmendmentRejectionCode::CitationUnresolvable,
                        format!("unresolvable: {citation}"),
                    ));
                }
            }
            Ok(())
        }
    }

    // --- Gate 6: Authorization -----------------------------------------------

    fn gate_authorization(&self, proposal: &AmendmentProposal) -> GateVerdict {
        if proposal.prior_constitution_hash != self.constitution.hash() {
            return Err((
                AmendmentRejectionCode::PriorHashMismatch,
                format!(
                    "expected {}..., got {}...",
                    &self.constitution.hash()[..16.min(self.constitution.hash().len())],
                    &proposal.prior_constitution_hash
                        [..16.min(proposal.prior_constitution_hash.len())],
                ),
            ));
        }
        if !self.constitution.has_eck_sections() {
            return Err((
                AmendmentRejectionCode::EckMissing,
                "ECK sections missing from current constitution".to_owned(),
            ));
        }
        let max_pending = self.constitution.max_pending_amendments();
        if self.pending_count >= max_pending {
            return Err((
                AmendmentRejectionCode::CoolingViolation,
                format!("max_pending_amendments={max_pending} reached"),
            ));
        }
        Ok(())
    }

    // --- Gate 7: Full Replacement Integrity ----------------------------------

    fn gate_replacement_integrity(&self, proposal: &AmendmentProposal) -> GateVerdict {
        let proposed = parse_proposed(&proposal.proposed_constitution_yaml)?;

        let canonical =
            canonicalize_constitution_bytes(proposal.proposed_constitution_yaml.as_bytes())
                .map_err(|e| (AmendmentRejectionCode::SchemaInvalid, e.to_string()))?;
        let computed_hash = sha256_hex(&canonical);
        if computed_hash != proposal.proposed_constitution_hash {
            return Err((
                AmendmentRejectionCode::SchemaInvalid,
                format!(
                    "hash mismatch: computed {}..., declared {}...",
                    &computed_hash[..16],
                    &proposal.proposed_constitution_hash
                        [..16.min(proposal.proposed_constitution_hash.len())],
                ),
            ));
        }

        let max_bytes = self.constitution.max_constitution_bytes();
        if canonical.len() as u64 > max_bytes {
            return Err((
                AmendmentRejectionCode::SchemaInvalid,
                format!("constitution size {} exceeds max {max_bytes}", canonical.len()),
            ));
        }

        if let Some(validator) = self.schema {
            if let Err(error) = validator.validate(&proposed) {
                return Err((
                    AmendmentRejectionCode::SchemaInvalid,
                    format!("schema validation failed: {error}"),
                ));
            }
        }

        for section in ["AmendmentProcedure", "AuthorityModel", "WarrantDefinition", "ScopeSystem"]
        {
            if proposed.get(section).is_none() {
                return Err((
                    AmendmentRejectionCode::EckMissing,
                    format!("missing ECK section: {section}"),
                ));
            }
        }
        Ok(())
    }

    // --- Gate 8A: Physics Claim Rejection ------------------------------------

    fn gate_physics_claim(&self, proposal: &AmendmentProposal) -> GateVerdict {
        let proposed = parse_proposed(&proposal.proposed_constitution_yaml)?;
        let mut found = Vec::new();
        find_forbidden_keys(&proposed, &mut found);
        if !found.is_empty() {
            found.sort();
            found.dedup();
            return Err((
                AmendmentRejectionCode::PhysicsClaimDetected,
                format!("forbidden keys found: {found:?}"),
            ));
        }
        Ok(())
    }

    // --- Gate 8B: Structural Preservation ------------------------------------

    fn gate_structural_preservation(&self, proposal: &AmendmentProposal) -> GateVerdict {
        let proposed = parse_proposed(&proposal.proposed_constitution_yaml)?;

        // 8B.1 Cardinality.
        let action_perms: Vec<&Value> = proposed
            .pointer("/AuthorityModel/action_permissions")
            .and_then(Value::as_array)
            .map(|a| a.iter().collect())
            .unwrap_or_default();
        let authorities: std::collections::BTreeSet<&str> = action_perms
            .iter()
            .filter_map(|p| p.get("authority").and_then(Value::as_str))
            .collect();
        let a = authorities.len() as u64;
        let b = proposed
            .pointer("/action_space/action_types")
            .and_then(Value::as_array)
            .map_or(0, |v| v.len() as u64);
        if a < 1 {
            return Err((
                AmendmentRejectionCode::UniversalAuthorization,
                format!("A={a} < 1"),
            ));
        }
        if b < 1 {
            return Err((
                AmendmentRejectionCode::ScopeCollapse,
                format!("B={b} < 1"),
            ));
        }

        // 8B.2 Wildcards.
        for perm in &action_perms {
            if perm.get("authority").and_then(Value::as_str) == Some("*") {
                return Err((
                    AmendmentRejectionCode::WildcardMapping,
                    "wildcard authority: *".to_owned(),
                ));
            }
            if let Some(actions) = perm.get("actions").and_then(Value::as_array) {
                if actions.iter().any(|a| a.as_str() == Some("*")) {
                    return Err((
                        AmendmentRejectionCode::WildcardMapping,
                        "wildcard action: *".to_owned(),
                    ));
                }
            }
        }
        if let Some(amend_perms) = proposed
            .pointer("/AuthorityModel/amendment_permissions")
            .and_then(Value::as_array)
        {
            for perm in amend_perms {
                if perm.get("authority").and_then(Value::as_str) == Some("*") {
                    return Err((
                        AmendmentRejectionCode::WildcardMapping,
                        "wildcard authority in amendment_permissions".to_owned(),
                    ));
                }
                if let Some(kinds) = perm.get("amendments").and_then(Value::as_array) {
                    if kinds.iter().any(|k| k.as_str() == Some("*")) {
                        return Err((
                            AmendmentRejectionCode::WildcardMapping,
                            "wildcard amendment type".to_owned(),
                        ));
                    }
                }
            }
        }

        // 8B.3 Universal authorization / proposed density bound.
        let m: u64 = action_perms
            .iter()
            .map(|p| {
                p.get("actions")
                    .and_then(Value::as_array)
                    .map_or(0, |v| v.len() as u64)
            })
            .sum();
        if m == a * b {
            return Err((
                AmendmentRejectionCode::UniversalAuthorization,
                format!("density=1.0 (M={m}=A×B={a}×{b})"),
            ));
        }
        let density = m as f64 / (a * b) as f64;
        let proposed_bound = proposed
            .pointer("/AmendmentProcedure/density_upper_bound")
            .and_then(Value::as_f64);
        if let Some(bound) = proposed_bound {
            if density > bound {
                return Err((
                    AmendmentRejectionCode::UniversalAuthorization,
                    format!("density={density:.4} exceeds proposed bound={bound}"),
                ));
            }
        }

        // 8B.4 Scope collapse.
        let scope_system = proposed.get("ScopeSystem");
        let scope_empty = scope_system
            .and_then(Value::as_object)
            .is_none_or(Map::is_empty);
        if scope_empty {
            return Err((
                AmendmentRejectionCode::ScopeCollapse,
                "ScopeSystem empty".to_owned(),
            ));
        }
        let per_action_scope = proposed
            .pointer("/ScopeSystem/per_action_scope")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if per_action_scope.is_empty() {
            return Err((
                AmendmentRejectionCode::ScopeCollapse,
                "per_action_scope empty".to_owned(),
            ));
        }
        let has_scoped = per_action_scope.iter().any(|rule| {
            rule.get("scope_claim_required")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        });
        if !has_scoped {
            return Err((
                AmendmentRejectionCode::ScopeCollapse,
                "no action requires scoped warrant (all globally scoped)".to_owned(),
            ));
        }

        // 8B.5 Envelope ratchet.
        let old_proc = self.constitution.amendment_procedure();
        let new_proc = proposed
            .get("AmendmentProcedure")
            .cloned()
            .unwrap_or(Value::Null);
        if !new_proc.is_object() {
            return Err((
                AmendmentRejectionCode::EnvelopeDegraded,
                "AmendmentProcedure removed".to_owned(),
            ));
        }

        let old_cooling = old_proc
            .get("cooling_period_cycles")
            .and_then(Value::as_u64)
            .unwrap_or(2);
        let new_cooling = new_proc
            .get("cooling_period_cycles")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if new_cooling < old_cooling {
            return Err((
                AmendmentRejectionCode::EnvelopeDegraded,
                format!("cooling reduced: {old_cooling} → {new_cooling}"),
            ));
        }

        let old_threshold = old_proc
            .get("authorization_threshold")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        let new_threshold = new_proc
            .get("authorization_threshold")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if new_threshold < old_threshold {
            return Err((
                AmendmentRejectionCode::EnvelopeDegraded,
                format!("threshold reduced: {old_threshold} → {new_threshold}"),
            ));
        }

        let old_bound = old_proc.get("density_upper_bound").and_then(Value::as_f64);
        let new_bound = new_proc.get("density_upper_bound").and_then(Value::as_f64);
        if let Some(old_bound) = old_bound {
            match new_bound {
                None => {
                    return Err((
                        AmendmentRejectionCode::EnvelopeDegraded,
                        "density_upper_bound removed (was present in prior constitution)"
                            .to_owned(),
                    ));
                }
                Some(new_bound) if new_bound > old_bound => {
                    return Err((
                        AmendmentRejectionCode::EnvelopeDegraded,
                        format!("density_upper_bound increased: {old_bound} → {new_bound}"),
                    ));
                }
                _ => {}
            }
        }

        for field in ["cooling_period_cycles", "authorization_threshold", "authority_reference_mode"]
        {
            if old_proc.get(field).is_some() && new_proc.get(field).is_none() {
                return Err((
                    AmendmentRejectionCode::EnvelopeDegraded,
                    format!("structured field removed: {field}"),
                ));
            }
        }

        Ok(())
    }
}

fn parse_proposed(yaml: &str) -> Result<Value, (AmendmentRejectionCode, String)> {
    let parsed: Value = serde_yaml::from_str(yaml).map_err(|e| {
        (
            AmendmentRejectionCode::SchemaInvalid,
            format!("YAML parse error: {e}"),
        )
    })?;
    if !parsed.is_object() {
        return Err((
            AmendmentRejectionCode::SchemaInvalid,
            "proposed YAML root must be a mapping".to_owned(),
        ));
    }
    Ok(parsed)
}

fn find_forbidden_keys(node: &Value, found: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if FORBIDDEN_KEYS.contains(&key.to_lowercase().as_str()) {
                    found.push(key.clone());
                }
                find_forbidden_keys(value, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                find_forbidden_keys(item, found);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Cooling, staleness, adoption, queuing
// ---------------------------------------------------------------------------

/// A queued amendment may adopt once
/// `current_cycle >= proposal_cycle + cooling_period`.
pub fn cooling_satisfied(
    pending: &PendingAmendment,
    current_cycle: u64,
    cooling_period: u64,
) -> bool {
    current_cycle >= pending.proposal_cycle + cooling_period
}

/// Forward-looking stale invalidation at adoption time: drop every pending
/// proposal whose prior hash no longer matches the just-adopted hash.
/// Returns (remaining, invalidated).
pub fn invalidate_stale_proposals(
    pending: &[PendingAmendment],
    new_constitution_hash: &str,
) -> (Vec<PendingAmendment>, Vec<PendingAmendment>) {
    let mut remaining = Vec::new();
    let mut invalidated = Vec::new();
    for p in pending {
        if p.prior_constitution_hash == new_constitution_hash {
            remaining.push(p.clone());
        } else {
            invalidated.push(p.clone());
        }
    }
    (remaining, invalidated)
}

/// Outcome of a successful adoption step.
#[derive(Clone, Debug)]
pub struct AdoptionOutcome {
    pub adoption_record: AmendmentAdoptionRecord,
    pub state_delta: StateDelta,
}

/// Adoption step: find the first cooled, still-current pending amendment.
/// Stale entries are skipped here and invalidated by the resulting delta.
pub fn try_adopt(
    constitution: &Constitution,
    state: &InternalState,
    cycle_time: &str,
) -> Result<Option<AdoptionOutcome>, CanonError> {
    let cooling = constitution.cooling_period_cycles();

    for p in &state.pending_amendments {
        if !cooling_satisfied(p, state.cycle_index, cooling) {
            continue;
        }
        if p.prior_constitution_hash != constitution.hash() {
            continue;
        }

        let effective_cycle = state.cycle_index + 1;
        let adoption_record = AmendmentAdoptionRecord::new(
            &p.proposal_id,
            &p.prior_constitution_hash,
            &p.proposed_constitution_hash,
            effective_cycle,
            vec![
                constitution.authority_citation("AUTH_GOVERNANCE"),
                constitution.citation("CL-AMENDMENT-PROCEDURE"),
            ],
            cycle_time,
        )?;

        let others: Vec<PendingAmendment> = state
            .pending_amendments
            .iter()
            .filter(|pp| pp.proposal_id != p.proposal_id)
            .cloned()
            .collect();
        let (remaining, invalidated) =
            invalidate_stale_proposals(&others, &p.proposed_constitution_hash);

        let delta = StateDelta::AdoptAmendment {
            adoption_record: adoption_record.to_value(),
            new_constitution_hash: p.proposed_constitution_hash.clone(),
            effective_cycle,
            invalidated_proposals: invalidated.iter().map(|i| i.proposal_id.clone()).collect(),
            remaining_pending: remaining,
        };

        return Ok(Some(AdoptionOutcome {
            adoption_record,
            state_delta: delta,
        }));
    }
    Ok(None)
}

/// Outcome of the queuing step: admission results plus, when something was
/// admitted, the queued proposal and its delta.
#[derive(Clone, Debug)]
pub struct QueueEvaluation {
    pub queued: Option<(AmendmentProposal, StateDelta)>,
    pub admitted: Vec<AmendmentAdmissionResult>,
    pub rejected: Vec<AmendmentAdmissionResult>,
    pub events: Vec<AmendmentAdmissionEvent>,
}

/// Queuing step: admit new proposals (bounded per cycle), queue the one with
/// the smallest proposal id among those admitted.
pub fn try_queue(
    candidates: &[AmendmentProposal],
    constitution: &Constitution,
    state: &InternalState,
    schema: Option<&jsonschema::Validator>,
) -> QueueEvaluation {
    if candidates.is_empty() {
        return QueueEvaluation {
            queued: None,
            admitted: Vec::new(),
            rejected: Vec::new(),
            events: Vec::new(),
        };
    }

    let budget = constitution.max_amendment_candidates_per_cycle();
    let bounded = &candidates[..budget.min(candidates.len())];

    let pipeline =
        AmendmentAdmissionPipeline::new(constitution, schema, &state.pending_amendments);
    let (mut admitted, rejected, events) = pipeline.evaluate(bounded);

    if admitted.is_empty() {
        return QueueEvaluation {
            queued: None,
            admitted,
            rejected,
            events,
        };
    }

    admitted.sort_by(|x, y| x.proposal.id.cmp(&y.proposal.id));
    let selected = admitted[0].proposal.clone();

    let pending = PendingAmendment {
        proposal_id: selected.id.clone(),
        prior_constitution_hash: selected.prior_constitution_hash.clone(),
        proposed_constitution_hash: selected.proposed_constitution_hash.clone(),
        proposal_cycle: state.cycle_index,
    };
    let delta = StateDelta::QueueAmendment { pending };

    QueueEvaluation {
        queued: Some((selected, delta)),
        admitted,
        rejected,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn well_formed_proposal_is_admitted() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let proposal = fixtures::amendment_proposal(&c, &fixtures::amended_constitution());
        let eval = try_queue(&[proposal], &c, &state, None);
        assert!(eval.queued.is_some(), "events: {:?}", eval.events);
        assert!(eval.rejected.is_empty());
    }

    #[test]
    fn prior_hash_mismatch_rejected_at_authorization() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let mut proposal = fixtures::amendment_proposal(&c, &fixtures::amended_constitution());
        proposal.prior_constitution_hash = "f".repeat(64);
        let eval = try_queue(&[proposal], &c, &state, None);
        assert!(eval.queued.is_none());
        assert_eq!(eval.rejected[0].failed_gate, "amendment_authorization");
        assert_eq!(eval.rejected[0].rejection_code, "PRIOR_HASH_MISMATCH");
    }

    #[test]
    fn declared_hash_must_match_canonical_bytes() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let mut proposal = fixtures::amendment_proposal(&c, &fixtures::amended_constitution());
        proposal.proposed_constitution_hash = "0".repeat(64);
        let eval = try_queue(&[proposal], &c, &state, None);
        assert_eq!(eval.rejected[0].failed_gate, "full_replacement_integrity");
        assert_eq!(eval.rejected[0].rejection_code, "SCHEMA_INVALID");
    }

    #[test]
    fn forbidden_keys_trip_the_physics_gate() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let evil = fixtures::amended_constitution()
            .replace("meta:", "hooks:\n  exec: \"rm -rf\"\nmeta:");
        let proposal = fixtures::amendment_proposal(&c, &evil);
        let eval = try_queue(&[proposal], &c, &state, None);
        assert_eq!(eval.rejected[0].failed_gate, "physics_claim_rejection");
        assert_eq!(eval.rejected[0].rejection_code, "PHYSICS_CLAIM_DETECTED");
    }

    #[test]
    fn cooling_reduction_degrades_the_envelope() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let degraded = fixtures::amended_constitution()
            .replace("cooling_period_cycles: 3", "cooling_period_cycles: 2");
        let proposal = fixtures::amendment_proposal(&c, &degraded);
        let eval = try_queue(&[proposal], &c, &state, None);
        assert_eq!(eval.rejected[0].failed_gate, "structural_preservation");
        assert_eq!(eval.rejected[0].rejection_code, "ENVELOPE_DEGRADED");
        let fail = eval
            .events
            .iter()
            .find(|e| e.result == "fail")
            .expect("fail event");
        assert!(fail.detail.contains("cooling reduced: 3 → 2"), "{}", fail.detail);
    }

    #[test]
    fn wildcard_authority_rejected() {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let wild = fixtures::amended_constitution().replace(
            "- authority: AUTH_GOVERNANCE\n      actions: [Notify]",
            "- authority: \"*\"\n      actions: [Notify]",
        );
        let proposal = fixtures::amendment_proposal(&c, &wild);
        let eval = try_queue(&[proposal], &c, &state, None);
        assert_eq!(eval.rejected[0].rejection_code, "WILDCARD_MAPPING");
    }

    #[test]
    fn adoption_waits_for_cooling_then_fires() {
        let c = fixtures::constitution();
        let mut state = fixtures::state_for(&c, 0);
        state.pending_amendments.push(PendingAmendment {
            proposal_id: "p1".into(),
            prior_constitution_hash: c.hash().to_owned(),
            proposed_constitution_hash: "b".repeat(64),
            proposal_cycle: 0,
        });

        // Cooling period is 3: nothing adopts at cycle 2.
        state.cycle_index = 2;
        assert!(try_adopt(&c, &state, fixtures::CYCLE_TIME)
            .unwrap()
            .is_none());

        state.cycle_index = 3;
        let outcome = try_adopt(&c, &state, fixtures::CYCLE_TIME)
            .unwrap()
            .expect("adoption");
        assert_eq!(outcome.adoption_record.effective_cycle, 4);
        assert_eq!(
            outcome.adoption_record.new_constitution_hash,
            "b".repeat(64)
        );
    }

    #[test]
    fn adoption_invalidates_stale_pending_proposals() {
        let c = fixtures::constitution();
        let mut state = fixtures::state_for(&c, 5);
        let new_hash = "b".repeat(64);
        state.pending_amendments = vec![
            PendingAmendment {
                proposal_id: "p1".into(),
                prior_constitution_hash: c.hash().to_owned(),
                proposed_constitution_hash: new_hash.clone(),
                proposal_cycle: 0,
            },
            PendingAmendment {
                proposal_id: "p2".into(),
                prior_constitution_hash: c.hash().to_owned(),
                proposed_constitution_hash: "c".repeat(64),
                proposal_cycle: 1,
            },
        ];
        let outcome = try_adopt(&c, &state, fixtures::CYCLE_TIME)
            .unwrap()
            .expect("adoption");
        match &outcome.state_delta {
            StateDelta::AdoptAmendment {
                invalidated_proposals,
                remaining_pending,
                ..
            } => {
                // p2's prior hash no longer matches the new hash.
                assert_eq!(invalidated_proposals, &vec!["p2".to_owned()]);
                assert!(remaining_pending.is_empty());
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }
}
