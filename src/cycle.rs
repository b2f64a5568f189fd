//! Topological policy core
//!
//! The authoritative per-cycle ordering over all governance and action
//! surfaces:
//!
//! 1.  Amendment adoption (non-early-return; the delta is reported and the
//!     host swaps constitutions at the next cycle boundary)
//! 2.  Treaty revalidation against the post-adoption constitution
//! 3.  Succession proposal admission
//! 4.  Treaty revocation admission, each applied before the next
//! 5.  Treaty ratification admission, applied sequentially
//! 6.  Density checkpoint A (full repair)
//! 7.  Treaty grant admission (candidates sorted ascending by canonical id;
//!     blocked wholesale while suspensions are unresolved)
//! 8.  Density checkpoint B (full repair)
//! 9.  Amendment proposal queuing (early return on queue)
//! 10. Base action admission
//! 11. Delegated action admission
//! 12. Warrant issuance, sorted by (origin_rank, warrant_id) ascending
//!
//! Boundary verification (key activation, suspension) runs on the harness
//! side *before* this function; it always receives post-activation state.
//!
//! The state snapshot is consumed by value and the successor state returned
//! by value. Treaty-set changes (grants, revocations, ratifications, density
//! repair) land in the returned state; amendment adoption and queuing are
//! reported as typed deltas for the host to apply.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::admission::{AdmissionEvent, AdmissionResult};
use crate::amendment::{self, AmendmentAdmissionEvent, AmendmentAdoptionRecord, AmendmentProposal};
use crate::artifacts::{CandidateBundle, DecisionType, ExecutionWarrant, ExitRecord,
    Observation, RefusalReasonCode, RefusalRecord};
use crate::canonical::CanonError;
use crate::overlay::EffectiveFrame;
use crate::policy::{self, PreCheck};
use crate::ratification::{
    self, RatificationAdmissionRecord, RatificationRejectionRecord, TreatyRatification,
};
use crate::selector::SelectionEvent;
use crate::signature::verify_payload;
use crate::state::{InternalState, StateDelta};
use crate::succession::{
    SuccessionAdmissionPipeline, SuccessionAdmissionRecord, SuccessionProposal,
    SuccessionRejectionRecord,
};
use crate::treaty::{
    TreatyAdmissionEvent, TreatyAdmissionResult, TreatyGrant, TreatyRejectionCode,
    TreatyRevalidationEvent, TreatyRevocation, SUSPENSION_UNRESOLVED,
};
use crate::treaty_admission::TreatyAdmissionPipeline;

// ---------------------------------------------------------------------------
// Delegated action requests
// ---------------------------------------------------------------------------

/// An action request submitted by a treaty grantee, Ed25519-signed over its
/// canonical payload (signature excluded).
#[derive(Clone, Debug, PartialEq)]
pub struct DelegatedActionRequest {
    pub action_type: String,
    pub fields: Map<String, Value>,
    pub grantee_identifier: String,
    /// Must include a `treaty:` citation.
    pub authority_citations: Vec<String>,
    /// Hex Ed25519 signature.
    pub signature: String,
    pub scope_type: String,
    pub scope_zone: String,
    pub created_at: String,
    pub id: String,
}

impl DelegatedActionRequest {
    /// The payload covered by the signature: everything but the signature.
    pub fn signing_payload(&self) -> Value {
        let mut citations = self.authority_citations.clone();
        citations.sort();
        let mut v = json!({
            "type": "ActionRequest",
            "action_type": self.action_type,
            "fields": Value::Object(self.fields.clone()),
            "grantee_identifier": self.grantee_identifier,
            "authority_citations": citations,
            "scope_type": self.scope_type,
            "scope_zone": self.scope_zone,
            "created_at": self.created_at,
        });
        if !self.id.is_empty() {
            v["id"] = json!(self.id);
        }
        v
    }
}

/// Rejection of one delegated action request.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegatedRejection {
    pub action_request_id: String,
    pub rejection_code: String,
    pub detail: String,
}

impl DelegatedRejection {
    pub fn to_value(&self) -> Value {
        json!({
            "action_request_id": self.action_request_id,
            "rejection_code": self.rejection_code,
            "detail": self.detail,
        })
    }
}

/// Build a warrant carrying an `origin` scope constraint and a
/// deterministic warrant id.
pub fn make_warrant_with_origin(
    action_request_id: &str,
    action_type: &str,
    scope_constraints: Map<String, Value>,
    issued_in_cycle: u64,
    created_at: &str,
    origin: &str,
) -> Result<ExecutionWarrant, CanonError> {
    let mut constraints = scope_constraints;
    constraints.insert("origin".into(), json!(origin));
    ExecutionWarrant::new(
        action_request_id,
        action_type,
        constraints,
        issued_in_cycle,
        created_at,
    )
}

/// Evaluate a single delegated action request against the active grants.
pub fn evaluate_delegated_action(
    dar: &DelegatedActionRequest,
    frame: &EffectiveFrame<'_>,
    active_grants: &[&TreatyGrant],
    cycle_index: u64,
    cycle_time: &str,
) -> Result<Result<ExecutionWarrant, DelegatedRejection>, CanonError> {
    let reject = |code: TreatyRejectionCode, detail: String| {
        Ok(Err(DelegatedRejection {
            action_request_id: dar.id.clone(),
            rejection_code: code.as_str().to_owned(),
            detail,
        }))
    };

    // Signature verification precedes any authority resolution.
    if dar.signature.is_empty() {
        return reject(
            TreatyRejectionCode::SignatureMissing,
            "delegated action request has no signature".to_owned(),
        );
    }
    if let Err(e) = verify_payload(&dar.grantee_identifier, &dar.signing_payload(), &dar.signature)
    {
        return reject(
            TreatyRejectionCode::SignatureInvalid,
            format!("signature verification failed: {e}"),
        );
    }

    // Closed action set.
    let constitution = frame.constitution;
    if !constitution.action_types().contains(&dar.action_type) {
        return reject(
            TreatyRejectionCode::InvalidField,
            format!("action '{}' not in closed action set", dar.action_type),
        );
    }

    // Scope discipline when the action demands a scoped warrant.
    let scope_rule = constitution.action_scope_rule(&dar.action_type);
    let scope_required = scope_rule
        .as_ref()
        .map(|rule| {
            rule.get("scope_claim_required")
                .and_then(Value::as_bool)
                .unwrap_or(true)
        })
        .unwrap_or(false);
    if scope_required {
        if dar.scope_type.is_empty() {
            return reject(
                TreatyRejectionCode::InvalidField,
                "scope_type required but missing".to_owned(),
            );
        }
        if dar.scope_zone.is_empty() {
            return reject(
                TreatyRejectionCode::InvalidField,
                "scope_zone required but missing".to_owned(),
            );
        }
        let valid_types = constitution.valid_scope_types(&dar.action_type);
        if !valid_types.contains(&dar.scope_type) {
            return reject(
                TreatyRejectionCode::ScopeCollapse,
                format!(
                    "scope_type '{}' not valid for action '{}'",
                    dar.scope_type, dar.action_type
                ),
            );
        }
        let zones = constitution.zones_for_scope_type(&dar.scope_type);
        if !zones.contains(&dar.scope_zone) {
            return reject(
                TreatyRejectionCode::ScopeCollapse,
                format!(
                    "scope_zone '{}' not in scope enumerations for '{}'",
                    dar.scope_zone, dar.scope_type
                ),
            );
        }
        if let Some(permitted) = constitution.permitted_zones(&dar.action_type) {
            if !permitted.contains(&dar.scope_zone) {
                return reject(
                    TreatyRejectionCode::ScopeCollapse,
                    format!(
                        "scope_zone '{}' not in permitted_zones for '{}'",
                        dar.scope_zone, dar.action_type
                    ),
                );
            }
        }
    }

    // Covering grant: same grantee, action granted, zone inside the grant's
    // scope constraints for the claimed scope type.
    let matching = active_grants.iter().find(|g| {
        if g.grantee_identifier != dar.grantee_identifier {
            return false;
        }
        if !g.granted_actions.contains(&dar.action_type) {
            return false;
        }
        if !dar.scope_type.is_empty() && !dar.scope_zone.is_empty() {
            return g
                .scope_constraints
                .get(&dar.scope_type)
                .is_some_and(|zones| zones.contains(&dar.scope_zone));
        }
        true
    });
    let Some(grant) = matching else {
        return reject(
            TreatyRejectionCode::AuthorityCitationInvalid,
            format!(
                "no active grant covers action '{}' for grantee",
                dar.action_type
            ),
        );
    };

    // A treaty citation must be present on the request.
    if !dar.authority_citations.iter().any(|c| c.starts_with("treaty:")) {
        return reject(
            TreatyRejectionCode::AuthorityCitationInvalid,
            "delegated action request must include a treaty: citation".to_owned(),
        );
    }

    let action_request_id = if dar.id.is_empty() {
        let prefix: String = dar.grantee_identifier.chars().take(16).collect();
        format!("dar-{prefix}-{}", dar.action_type)
    } else {
        dar.id.clone()
    };
    let mut constraints = Map::new();
    constraints.insert("grantee_identifier".into(), json!(dar.grantee_identifier));
    constraints.insert("grant_id".into(), json!(grant.id));
    constraints.insert("scope_type".into(), json!(dar.scope_type));
    constraints.insert("scope_zone".into(), json!(dar.scope_zone));

    let warrant = make_warrant_with_origin(
        &action_request_id,
        &dar.action_type,
        constraints,
        cycle_index,
        cycle_time,
        "delegated",
    )?;
    Ok(Ok(warrant))
}

// ---------------------------------------------------------------------------
// Cycle inputs and output
// ---------------------------------------------------------------------------

/// All candidate surfaces for one cycle.
#[derive(Clone, Debug, Default)]
pub struct CycleInputs {
    pub observations: Vec<Observation>,
    pub action_candidates: Vec<CandidateBundle>,
    pub amendment_candidates: Vec<AmendmentProposal>,
    pub succession_candidates: Vec<SuccessionProposal>,
    pub treaty_grant_candidates: Vec<TreatyGrant>,
    pub treaty_revocation_candidates: Vec<TreatyRevocation>,
    pub treaty_ratification_candidates: Vec<TreatyRatification>,
    pub delegated_action_candidates: Vec<DelegatedActionRequest>,
}

/// Full output of a topological cycle evaluation.
#[derive(Clone, Debug, Default)]
pub struct CycleOutput {
    pub decision_type: Option<DecisionType>,
    pub bundles: Vec<CandidateBundle>,
    pub warrants: Vec<ExecutionWarrant>,
    pub refusal: Option<RefusalRecord>,
    pub exit_record: Option<ExitRecord>,

    pub adoption_record: Option<AmendmentAdoptionRecord>,
    pub queued_proposal: Option<AmendmentProposal>,
    pub state_delta: Option<StateDelta>,
    pub amendment_admission_events: Vec<AmendmentAdmissionEvent>,

    pub treaty_grants_admitted: Vec<TreatyAdmissionResult>,
    pub treaty_grants_rejected: Vec<TreatyAdmissionResult>,
    pub treaty_revocations_admitted: Vec<TreatyAdmissionResult>,
    pub treaty_revocations_rejected: Vec<TreatyAdmissionResult>,
    pub treaty_admission_events: Vec<TreatyAdmissionEvent>,
    pub revalidation_events: Vec<TreatyRevalidationEvent>,

    pub succession_admission: Option<SuccessionAdmissionRecord>,
    pub succession_rejections: Vec<SuccessionRejectionRecord>,
    pub ratification_admissions: Vec<RatificationAdmissionRecord>,
    pub ratification_rejections: Vec<RatificationRejectionRecord>,

    pub delegated_warrants: Vec<ExecutionWarrant>,
    pub delegated_rejections: Vec<DelegatedRejection>,

    pub admission_events: Vec<AdmissionEvent>,
    pub selection_event: Option<SelectionEvent>,
    pub admitted: Vec<AdmissionResult>,
    pub rejected: Vec<AdmissionResult>,
}

impl CycleOutput {
    /// The cycle decision; defaults to REFUSE until something else fires.
    pub fn decision(&self) -> DecisionType {
        self.decision_type.unwrap_or(DecisionType::Refuse)
    }

    pub fn to_value(&self) -> Value {
        let mut v = json!({"decision_type": self.decision().as_str()});
        if !self.warrants.is_empty() {
            v["warrants"] = json!(self
                .warrants
                .iter()
                .map(ExecutionWarrant::to_value)
                .collect::<Vec<_>>());
        }
        if !self.bundles.is_empty() {
            v["bundles"] = json!(self
                .bundles
                .iter()
                .map(CandidateBundle::to_value)
                .collect::<Vec<_>>());
        }
        if let Some(r) = &self.refusal {
            v["refusal"] = r.to_value();
        }
        if let Some(e) = &self.exit_record {
            v["exit_record"] = e.to_value();
        }
        if let Some(a) = &self.adoption_record {
            v["adoption_record"] = a.to_value();
        }
        if let Some(q) = &self.queued_proposal {
            v["queued_proposal"] = q.to_value_id();
        }
        if let Some(d) = &self.state_delta {
            v["state_delta"] = d.to_value();
        }
        if let Some(s) = &self.succession_admission {
            v["succession_admission"] = s.to_value();
        }
        if !self.succession_rejections.is_empty() {
            v["succession_rejections"] = json!(self
                .succession_rejections
                .iter()
                .map(SuccessionRejectionRecord::to_value)
                .collect::<Vec<_>>());
        }
        if !self.ratification_admissions.is_empty() {
            v["ratification_admissions"] = json!(self
                .ratification_admissions
                .iter()
                .map(RatificationAdmissionRecord::to_value)
                .collect::<Vec<_>>());
        }
        if !self.ratification_rejections.is_empty() {
            v["ratification_rejections"] = json!(self
                .ratification_rejections
                .iter()
                .map(RatificationRejectionRecord::to_value)
                .collect::<Vec<_>>());
        }
        if !self.delegated_rejections.is_empty() {
            v["delegated_rejections"] = json!(self
                .delegated_rejections
                .iter()
                .map(DelegatedRejection::to_value)
                .collect::<Vec<_>>());
        }
        v
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Run one topological cycle. Consumes the state snapshot and returns the
/// successor state (treaty mutations applied; amendment deltas reported for
/// the host) together with the full output.
pub fn evaluate(
    inputs: &CycleInputs,
    frame: &EffectiveFrame<'_>,
    mut state: InternalState,
    repo_root: &Path,
) -> Result<(InternalState, CycleOutput), CanonError> {
    let mut output = CycleOutput::default();

    let cycle_time = match policy::pre_admission_checks(&inputs.observations, frame)? {
        PreCheck::Proceed(t) => t,
        PreCheck::Refuse(refusal) => {
            output.decision_type = Some(DecisionType::Refuse);
            output.refusal = Some(refusal);
            return Ok((state, output));
        }
        PreCheck::Exit(exit_record) => {
            output.decision_type = Some(DecisionType::Exit);
            output.exit_record = Some(exit_record);
            return Ok((state, output));
        }
    };

    let cycle_index = state.cycle_index;
    let constitution = frame.constitution;

    // Step 1: amendment adoption (non-early-return).
    if let Some(outcome) = amendment::try_adopt(constitution, &state, &cycle_time)? {
        output.adoption_record = Some(outcome.adoption_record);
        output.state_delta = Some(outcome.state_delta);
    }

    // Step 2: treaty revalidation against the current constitution view.
    output.revalidation_events = state.treaty_set.revalidate(constitution, cycle_index);

    // Step 3: succession proposal admission.
    if !inputs.succession_candidates.is_empty() {
        let pipeline = SuccessionAdmissionPipeline {
            sovereign_public_key_active: &state.sovereign_public_key_active,
            prior_sovereign_public_key: state.prior_sovereign_public_key.as_deref(),
            historical_sovereign_keys: &state.historical_sovereign_keys,
            frame,
        };
        let (admitted, rejections, _events) = pipeline.evaluate(&inputs.succession_candidates);
        let pending = admitted.as_ref().filter(|r| r.admitted).and_then(|record| {
            inputs
                .succession_candidates
                .iter()
                .find(|p| p.id == record.proposal_id)
                .filter(|p| !p.is_self_succession())
                .map(|p| p.successor_public_key.clone())
        });
        output.succession_admission = admitted;
        output.succession_rejections = rejections;
        if let Some(successor) = pending {
            state.pending_successor_key = Some(successor);
        }
    }

    // Step 4: treaty revocations, each applied before the next.
    for revocation in &inputs.treaty_revocation_candidates {
        let pipeline = TreatyAdmissionPipeline::new(constitution, &state.treaty_set, cycle_index);
        let (admitted, rejected, events) =
            pipeline.evaluate_revocations(std::slice::from_ref(revocation));
        output.treaty_admission_events.extend(events);
        for result in admitted {
            state.treaty_set.revoke(&revocation.grant_id);
            output.treaty_revocations_admitted.push(result);
        }
        output.treaty_revocations_rejected.extend(rejected);
    }

    // Step 5: treaty ratifications, applied sequentially.
    if !inputs.treaty_ratification_candidates.is_empty() {
        let active_key = state.sovereign_public_key_active.clone();
        let prior_key = state.prior_sovereign_public_key.clone();
        let ctx = ratification::RatificationContext {
            sovereign_public_key_active: &active_key,
            prior_sovereign_public_key: prior_key.as_deref(),
            density_upper_bound: constitution.density_upper_bound(),
            action_permissions: constitution.action_permissions(),
            action_type_count: constitution.action_types().len() as u64,
            current_cycle: cycle_index,
        };
        let (admissions, rejections) = ratification::evaluate(
            &inputs.treaty_ratification_candidates,
            &ctx,
            &mut state.treaty_set,
        );
        output.ratification_admissions = admissions;
        output.ratification_rejections = rejections;
    }

    // Step 6: density checkpoint A.
    let density_bound = constitution.density_upper_bound();
    let action_perms = constitution.action_permissions();
    let action_type_count = constitution.action_types().len() as u64;
    output.revalidation_events.extend(state.treaty_set.apply_density_repair(
        density_bound,
        &action_perms,
        action_type_count,
        cycle_index,
    ));

    // Step 7: treaty grant admission.
    if !inputs.treaty_grant_candidates.is_empty() {
        if frame.is_suspension_blocks_grants() && state.treaty_set.has_suspensions() {
            for grant in &inputs.treaty_grant_candidates {
                let event = TreatyAdmissionEvent {
                    artifact_id: grant.id.clone(),
                    artifact_type: "TreatyGrant".to_owned(),
                    gate: "suspension_check".to_owned(),
                    result: "fail".to_owned(),
                    reason_code: SUSPENSION_UNRESOLVED.to_owned(),
                    detail: String::new(),
                };
                output.treaty_admission_events.push(event.clone());
                output.treaty_grants_rejected.push(TreatyAdmissionResult {
                    artifact_id: grant.id.clone(),
                    artifact_type: "TreatyGrant".to_owned(),
                    admitted: false,
                    events: vec![event],
                    failed_gate: "suspension_check".to_owned(),
                    rejection_code: SUSPENSION_UNRESOLVED.to_owned(),
                    density: None,
                });
            }
        } else {
            let mut sorted_grants = inputs.treaty_grant_candidates.clone();
            sorted_grants.sort_by(|a, b| a.id.cmp(&b.id));
            for grant in sorted_grants {
                let pipeline =
                    TreatyAdmissionPipeline::new(constitution, &state.treaty_set, cycle_index);
                let (admitted, rejected, events) =
                    pipeline.evaluate_grants(std::slice::from_ref(&grant));
                output.treaty_admission_events.extend(events);
                if let Some(result) = admitted.into_iter().next() {
                    let mut admitted_grant = grant;
                    admitted_grant.grant_cycle = Some(cycle_index);
                    state.treaty_set.add_grant(admitted_grant);
                    output.treaty_grants_admitted.push(result);
                } else {
                    output.treaty_grants_rejected.extend(rejected);
                }
            }
        }
    }

    // Step 8: density checkpoint B.
    output.revalidation_events.extend(state.treaty_set.apply_density_repair(
        density_bound,
        &action_perms,
        action_type_count,
        cycle_index,
    ));

    // Step 9: amendment proposal queuing.
    let queue_eval =
        amendment::try_queue(&inputs.amendment_candidates, constitution, &state, None);
    output.amendment_admission_events = queue_eval.events;
    if let Some((queued, delta)) = queue_eval.queued {
        output.decision_type = Some(DecisionType::QueueAmendment);
        output.queued_proposal = Some(queued);
        output.state_delta = Some(delta);
        return Ok((state, output));
    }

    // Step 10: base action admission.
    let action_result = policy::action_path(
        &inputs.observations,
        &inputs.action_candidates,
        frame,
        cycle_index,
        repo_root,
        &cycle_time,
    )?;

    // Step 11: delegated action admission.
    let active_grants = state.treaty_set.active_grants(cycle_index);
    let mut delegated_warrants = Vec::new();
    for dar in &inputs.delegated_action_candidates {
        match evaluate_delegated_action(dar, frame, &active_grants, cycle_index, &cycle_time)? {
            Ok(warrant) => delegated_warrants.push(warrant),
            Err(rejection) => output.delegated_rejections.push(rejection),
        }
    }
    drop(active_grants);

    // Step 12: warrant issuance and assembly.
    let mut all_warrants: Vec<ExecutionWarrant> = Vec::new();
    if action_result.decision_type == DecisionType::Action {
        if let Some(base) = &action_result.warrant {
            let rsa_warrant = make_warrant_with_origin(
                &base.action_request_id,
                &base.action_type,
                base.scope_constraints.clone(),
                base.issued_in_cycle,
                &base.created_at,
                "rsa",
            )?;
            all_warrants.push(rsa_warrant);
        }
        if let Some(bundle) = &action_result.bundle {
            output.bundles.push(bundle.clone());
        }
    }
    all_warrants.extend(delegated_warrants.iter().cloned());

    let origin_rank = constitution.origin_rank();
    all_warrants.sort_by(|a, b| {
        let rank = |w: &ExecutionWarrant| origin_rank.get(w.origin()).copied().unwrap_or(99);
        (rank(a), a.warrant_id.clone()).cmp(&(rank(b), b.warrant_id.clone()))
    });

    output.admission_events = action_result.admission_events;
    output.selection_event = action_result.selection_event;
    output.admitted = action_result.admitted;
    output.rejected = action_result.rejected;
    output.delegated_warrants = delegated_warrants;

    if !all_warrants.is_empty() {
        output.decision_type = Some(DecisionType::Action);
        output.warrants = all_warrants;
        return Ok((state, output));
    }

    if action_result.decision_type == DecisionType::Refuse {
        output.decision_type = Some(DecisionType::Refuse);
        output.refusal = action_result.refusal;
        return Ok((state, output));
    }

    // Nothing fired anywhere: refuse with no admissible action.
    let refusal = RefusalRecord::new(
        RefusalReasonCode::NoAdmissibleAction,
        "none",
        Vec::new(),
        inputs.observations.iter().map(|o| o.id.clone()).collect(),
        Map::new(),
        &cycle_time,
    )?;
    output.decision_type = Some(DecisionType::Refuse);
    output.refusal = Some(refusal);
    Ok((state, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::overlay::EffectiveFrame;

    fn base_inputs() -> CycleInputs {
        CycleInputs {
            observations: vec![fixtures::timestamp_observation()],
            ..CycleInputs::default()
        }
    }

    #[test]
    fn grant_then_delegated_action_yields_ordered_warrants() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);

        // Cycle 0: admit the grant.
        let mut inputs = base_inputs();
        inputs.treaty_grant_candidates = vec![fixtures::notify_grant(&c, 1, 5)];
        let (state, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert_eq!(out.treaty_grants_admitted.len(), 1);
        assert_eq!(state.treaty_set.active_grants(0).len(), 1);

        // Cycle 1: one base Notify plus one delegated Notify.
        let mut state = state.advance(out.decision());
        state.cycle_index = 1;
        let mut inputs = base_inputs();
        inputs.action_candidates = vec![fixtures::notify_bundle(&c, "hello")];
        let grant_id = state.treaty_set.grants[0].id.clone();
        inputs.delegated_action_candidates =
            vec![fixtures::delegated_notify(&c, 1, &grant_id)];
        let (_, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();

        assert_eq!(out.decision(), DecisionType::Action);
        assert_eq!(out.warrants.len(), 2, "rejections: {:?}", out.delegated_rejections);
        // origin_rank: rsa=0 before delegated=1.
        assert_eq!(out.warrants[0].origin(), "rsa");
        assert_eq!(out.warrants[1].origin(), "delegated");
        assert!(out.warrants.iter().all(|w| w.single_use));
    }

    #[test]
    fn delegated_request_without_signature_is_rejected() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let mut state = fixtures::sovereign_state(&c, 0);
        let mut grant = fixtures::notify_grant(&c, 1, 5);
        grant.grant_cycle = Some(0);
        let gid = grant.id.clone();
        state.treaty_set.add_grant(grant);

        let mut dar = fixtures::delegated_notify(&c, 1, &gid);
        dar.signature = String::new();
        let mut inputs = base_inputs();
        inputs.delegated_action_candidates = vec![dar];
        let (_, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert_eq!(out.delegated_rejections[0].rejection_code, "SIGNATURE_MISSING");
        assert_eq!(out.decision(), DecisionType::Refuse);
    }

    #[test]
    fn delegated_zone_outside_grant_finds_no_cover() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let mut state = fixtures::sovereign_state(&c, 0);
        // Grant covers stdout only.
        let mut grant = fixtures::notify_grant(&c, 1, 5);
        grant.grant_cycle = Some(0);
        let gid = grant.id.clone();
        state.treaty_set.add_grant(grant);

        let mut dar = fixtures::delegated_notify(&c, 1, &gid);
        dar.scope_zone = "local_log".to_owned();
        dar.signature = fixtures::sign_delegated(&dar, 1);
        let mut inputs = base_inputs();
        inputs.delegated_action_candidates = vec![dar];
        let (_, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert_eq!(
            out.delegated_rejections[0].rejection_code,
            "AUTHORITY_CITATION_INVALID"
        );
    }

    #[test]
    fn suspensions_block_new_grants() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let mut state = fixtures::sovereign_state(&c, 1);
        state.cycle_index = 1;
        let mut existing = fixtures::notify_grant(&c, 1, 8);
        existing.grant_cycle = Some(0);
        state.treaty_set.add_grant(existing);
        state.treaty_set.suspend_all_active(1);

        let mut inputs = base_inputs();
        inputs.treaty_grant_candidates = vec![fixtures::notify_grant(&c, 2, 5)];
        let (state, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert!(out.treaty_grants_admitted.is_empty());
        assert_eq!(out.treaty_grants_rejected.len(), 1);
        assert_eq!(
            out.treaty_grants_rejected[0].rejection_code,
            "SUSPENSION_UNRESOLVED"
        );
        assert_eq!(state.treaty_set.grants.len(), 1);
    }

    #[test]
    fn succession_admission_sets_pending_key_only() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 10);
        let active_before = state.sovereign_public_key_active.clone();

        let mut inputs = base_inputs();
        inputs.succession_candidates = vec![fixtures::succession_proposal(&c, &ov, 0, 1)];
        let (state, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert!(out.succession_admission.as_ref().is_some_and(|r| r.admitted));
        let (_, k1_id) = fixtures::sovereign_keypair(1);
        assert_eq!(state.pending_successor_key.as_deref(), Some(k1_id.as_str()));
        // Rotation itself waits for the boundary.
        assert_eq!(state.sovereign_public_key_active, active_before);
    }

    #[test]
    fn revocation_applies_before_grant_admission_sees_it() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let mut state = fixtures::sovereign_state(&c, 1);
        state.cycle_index = 1;
        let mut existing = fixtures::notify_grant(&c, 1, 8);
        existing.grant_cycle = Some(0);
        let gid = existing.id.clone();
        state.treaty_set.add_grant(existing);

        let mut inputs = base_inputs();
        inputs.treaty_revocation_candidates = vec![TreatyRevocation::new(
            &gid,
            vec![c.authority_citation("AUTH_GOVERNANCE")],
            "cleanup",
            fixtures::CYCLE_TIME,
        )
        .unwrap()];
        let (state, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert_eq!(out.treaty_revocations_admitted.len(), 1);
        assert!(state.treaty_set.revoked_grant_ids.contains(&gid));
        assert!(state.treaty_set.active_grants(1).is_empty());
    }

    #[test]
    fn queued_amendment_preempts_the_action_path() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);

        let mut inputs = base_inputs();
        inputs.amendment_candidates =
            vec![fixtures::amendment_proposal(&c, &fixtures::amended_constitution())];
        inputs.action_candidates = vec![fixtures::notify_bundle(&c, "hi")];
        let (_, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        assert_eq!(out.decision(), DecisionType::QueueAmendment);
        assert!(out.warrants.is_empty());
        assert!(out.queued_proposal.is_some());
    }

    #[test]
    fn grant_candidates_are_processed_in_canonical_id_order() {
        let c = fixtures::constitution();
        let ov = fixtures::overlay();
        let frame = EffectiveFrame::new(&c, Some(&ov));
        let state = fixtures::sovereign_state(&c, 0);

        let g1 = fixtures::notify_grant(&c, 1, 5);
        let g2 = fixtures::notify_grant(&c, 2, 5);
        let mut expected = vec![g1.id.clone(), g2.id.clone()];
        expected.sort();

        // Input order reversed relative to canonical id order.
        let mut inputs = base_inputs();
        inputs.treaty_grant_candidates = if expected[0] == g1.id {
            vec![g2, g1]
        } else {
            vec![g1, g2]
        };
        let (_, out) = evaluate(&inputs, &frame, state, Path::new("/repo")).unwrap();
        let admitted_ids: Vec<String> = out
            .treaty_grants_admitted
            .iter()
            .map(|r| r.artifact_id.clone())
            .collect();
        assert_eq!(admitted_ids, expected);
    }
}
