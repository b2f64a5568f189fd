//! Policy cores: base action path and the amendment-aware layering
//!
//! [`evaluate`] is the base pure decision function: given observations,
//! candidate bundles, a constitution view, and the internal-state snapshot,
//! it returns exactly one decision plus every trace event. No IO, no
//! network, no randomness, no retries, no heuristics.
//!
//! [`evaluate_governed`] layers amendment handling around the action path in
//! default (early-return) mode: adoption check, then amendment queuing, then
//! the base action path. The topological composition that instead threads
//! adoption through the whole cycle lives in [`crate::cycle`].
//!
//! Deterministic time: kernel-created artifacts carry the cycle time
//! extracted from the single TIMESTAMP observation. Zero or multiple
//! TIMESTAMP observations refuse the cycle outright.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::admission::{AdmissionEvent, AdmissionPipeline, AdmissionResult};
use crate::amendment::{self, AmendmentAdmissionEvent, AmendmentAdmissionResult, AmendmentProposal};
use crate::artifacts::{
    ActionType, AdmissionGate, CandidateBundle, DecisionType, ExecutionWarrant, ExitReasonCode,
    ExitRecord, Observation, ObservationKind, RefusalReasonCode, RefusalRecord, SystemEvent,
};
use crate::canonical::CanonError;
use crate::constitution::{Constitution, KernelConstitution};
use crate::selector::{select, SelectionEvent};
use crate::state::{InternalState, StateDelta};

/// Extract the deterministic cycle timestamp. `None` when the TIMESTAMP
/// observation count differs from one (missing or ambiguous).
pub fn extract_cycle_time(observations: &[Observation]) -> Option<String> {
    let mut timestamps = observations
        .iter()
        .filter(|o| o.kind == ObservationKind::Timestamp.as_str());
    let first = timestamps.next()?;
    if timestamps.next().is_some() {
        return None;
    }
    Some(
        first
            .payload
            .get("iso8601_utc")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned(),
    )
}

/// The decision produced by the base policy core.
#[derive(Clone, Debug)]
pub struct Decision {
    pub decision_type: DecisionType,
    pub bundle: Option<CandidateBundle>,
    pub warrant: Option<ExecutionWarrant>,
    pub refusal: Option<RefusalRecord>,
    pub exit_record: Option<ExitRecord>,
}

impl Decision {
    pub fn to_value(&self) -> Value {
        let mut v = json!({"decision_type": self.decision_type.as_str()});
        if let Some(bundle) = &self.bundle {
            v["bundle"] = bundle.to_value();
        }
        if let Some(warrant) = &self.warrant {
            v["warrant"] = warrant.to_value();
        }
        if let Some(refusal) = &self.refusal {
            v["refusal"] = refusal.to_value();
        }
        if let Some(exit_record) = &self.exit_record {
            v["exit_record"] = exit_record.to_value();
        }
        v
    }
}

/// Full output of a base policy evaluation.
#[derive(Clone, Debug)]
pub struct PolicyOutput {
    pub decision: Decision,
    pub admission_events: Vec<AdmissionEvent>,
    pub selection_event: Option<SelectionEvent>,
    pub admitted: Vec<AdmissionResult>,
    pub rejected: Vec<AdmissionResult>,
}

/// Base policy core. Pure; returns the decision plus all trace events.
pub fn evaluate<C: KernelConstitution>(
    observations: &[Observation],
    candidates: &[CandidateBundle],
    constitution: &C,
    state: &InternalState,
    repo_root: &Path,
) -> Result<PolicyOutput, CanonError> {
    let cycle_time = match pre_admission_checks(observations, constitution)? {
        PreCheck::Proceed(t) => t,
        PreCheck::Refuse(refusal) => {
            return Ok(PolicyOutput {
                decision: Decision {
                    decision_type: DecisionType::Refuse,
                    bundle: None,
                    warrant: None,
                    refusal: Some(refusal),
                    exit_record: None,
                },
                admission_events: Vec::new(),
                selection_event: None,
                admitted: Vec::new(),
                rejected: Vec::new(),
            });
        }
        PreCheck::Exit(exit_record) => {
            return Ok(PolicyOutput {
                decision: Decision {
                    decision_type: DecisionType::Exit,
                    bundle: None,
                    warrant: None,
                    refusal: None,
                    exit_record: Some(exit_record),
                },
                admission_events: Vec::new(),
                selection_event: None,
                admitted: Vec::new(),
                rejected: Vec::new(),
            });
        }
    };

    let path = action_path(
        observations,
        candidates,
        constitution,
        state.cycle_index,
        repo_root,
        &cycle_time,
    )?;
    Ok(PolicyOutput {
        decision: Decision {
            decision_type: path.decision_type,
            bundle: path.bundle,
            warrant: path.warrant,
            refusal: path.refusal,
            exit_record: None,
        },
        admission_events: path.admission_events,
        selection_event: path.selection_event,
        admitted: path.admitted,
        rejected: path.rejected,
    })
}

// ---------------------------------------------------------------------------
// Shared pre-admission checks
// ---------------------------------------------------------------------------

pub(crate) enum PreCheck {
    Proceed(String),
    Refuse(RefusalRecord),
    Exit(ExitRecord),
}

/// Timestamp extraction, integrity observations, budget ceiling.
pub(crate) fn pre_admission_checks<C: KernelConstitution>(
    observations: &[Observation],
    constitution: &C,
) -> Result<PreCheck, CanonError> {
    let Some(cycle_time) = extract_cycle_time(observations) else {
        let timestamp_count = observations
            .iter()
            .filter(|o| o.kind == ObservationKind::Timestamp.as_str())
            .count();
        let missing = if timestamp_count == 0 {
            "TIMESTAMP".to_owned()
        } else {
            format!("TIMESTAMP (ambiguous: count={timestamp_count})")
        };
        let refusal = RefusalRecord::new(
            RefusalReasonCode::MissingRequiredObservation,
            "required_observations",
            vec![missing],
            observations.iter().map(|o| o.id.clone()).collect(),
            Map::new(),
            "",
        )?;
        return Ok(PreCheck::Refuse(refusal));
    };

    // Integrity-risk system observations mandate EXIT.
    for obs in observations {
        if obs.kind != ObservationKind::System.as_str() {
            continue;
        }
        let event = obs.payload.get("event").and_then(Value::as_str).unwrap_or("");
        if SystemEvent::is_integrity_risk(event) {
            let detail = obs.payload.get("detail").and_then(Value::as_str).unwrap_or("");
            let exit_record = ExitRecord::new(
                ExitReasonCode::IntegrityRisk,
                vec![constitution.make_citation("CL-EXIT-POLICY")],
                json!({
                    "observation_ids": [obs.id],
                    "claim": format!("EXIT required: {event}"),
                }),
                &format!("Integrity risk: {event} — {detail}"),
                &cycle_time,
            )?;
            return Ok(PreCheck::Exit(exit_record));
        }
    }

    // Budget ceiling.
    for obs in observations {
        if obs.kind != ObservationKind::Budget.as_str() {
            continue;
        }
        let token_count = obs
            .payload
            .get("llm_output_token_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if token_count > constitution.max_total_tokens_per_cycle() {
            let refusal = RefusalRecord::new(
                RefusalReasonCode::BudgetExhausted,
                "none",
                Vec::new(),
                observations.iter().map(|o| o.id.clone()).collect(),
                Map::new(),
                &cycle_time,
            )?;
            return Ok(PreCheck::Refuse(refusal));
        }
    }

    Ok(PreCheck::Proceed(cycle_time))
}

// ---------------------------------------------------------------------------
// Action path: admission -> selection -> warrant
// ---------------------------------------------------------------------------

pub(crate) struct ActionPathResult {
    pub decision_type: DecisionType,
    pub bundle: Option<CandidateBundle>,
    pub warrant: Option<ExecutionWarrant>,
    pub refusal: Option<RefusalRecord>,
    pub admission_events: Vec<AdmissionEvent>,
    pub selection_event: Option<SelectionEvent>,
    pub admitted: Vec<AdmissionResult>,
    pub rejected: Vec<AdmissionResult>,
}

pub(crate) fn action_path<C: KernelConstitution>(
    observations: &[Observation],
    candidates: &[CandidateBundle],
    constitution: &C,
    cycle_index: u64,
    repo_root: &Path,
    cycle_time: &str,
) -> Result<ActionPathResult, CanonError> {
    let pipeline = AdmissionPipeline::new(constitution, repo_root);
    let (admitted, rejected, admission_events) = pipeline.evaluate(candidates, observations);

    if admitted.is_empty() {
        let refusal = no_action_refusal(&rejected, observations, cycle_time)?;
        return Ok(ActionPathResult {
            decision_type: DecisionType::Refuse,
            bundle: None,
            warrant: None,
            refusal: Some(refusal),
            admission_events,
            selection_event: None,
            admitted,
            rejected,
        });
    }

    let (selected_idx, selection_event) = match select(&admitted)? {
        Some(pair) => pair,
        // Unreachable with a non-empty admitted list; refuse defensively
        // rather than panic.
        None => {
            let refusal = no_action_refusal(&rejected, observations, cycle_time)?;
            return Ok(ActionPathResult {
                decision_type: DecisionType::Refuse,
                bundle: None,
                warrant: None,
                refusal: Some(refusal),
                admission_events,
                selection_event: None,
                admitted,
                rejected,
            });
        }
    };

    let selected_bundle = admitted[selected_idx].candidate.clone();
    let warrant = ExecutionWarrant::new(
        &selected_bundle.action_request.id,
        &selected_bundle.action_request.action_type,
        build_scope_constraints(&selected_bundle, constitution, repo_root),
        cycle_index,
        cycle_time,
    )?;

    Ok(ActionPathResult {
        decision_type: DecisionType::Action,
        bundle: Some(selected_bundle),
        warrant: Some(warrant),
        refusal: None,
        admission_events,
        selection_event: Some(selection_event),
        admitted,
        rejected,
    })
}

fn no_action_refusal(
    rejected: &[AdmissionResult],
    observations: &[Observation],
    cycle_time: &str,
) -> Result<RefusalRecord, CanonError> {
    let mut summary = Map::new();
    for r in rejected {
        let count = summary
            .get(&r.failed_gate)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        summary.insert(r.failed_gate.clone(), json!(count + 1));
    }

    // Earliest gate in canonical order with at least one failure.
    let mut failed_gate = "none";
    if !rejected.is_empty() {
        for gate in AdmissionGate::ORDER {
            if summary.contains_key(gate.as_str()) {
                failed_gate = gate.as_str();
                break;
            }
        }
    }

    RefusalRecord::new(
        RefusalReasonCode::NoAdmissibleAction,
        failed_gate,
        Vec::new(),
        observations.iter().map(|o| o.id.clone()).collect(),
        summary,
        cycle_time,
    )
}

/// Scope constraints for a warrant, derived from the action type.
pub(crate) fn build_scope_constraints<C: KernelConstitution>(
    bundle: &CandidateBundle,
    constitution: &C,
    repo_root: &Path,
) -> Map<String, Value> {
    let ar = &bundle.action_request;
    let mut constraints = Map::new();
    constraints.insert("action_type".into(), json!(ar.action_type));

    let roots = |paths: Vec<String>| -> Vec<String> {
        paths
            .iter()
            .map(|p| {
                repo_root
                    .join(p.trim_start_matches("./"))
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    };

    if ar.action_type == ActionType::ReadLocal.as_str() {
        constraints.insert("allowed_path".into(), json!(ar.str_field("path")));
        constraints.insert("read_roots".into(), json!(roots(constitution.read_paths())));
    } else if ar.action_type == ActionType::WriteLocal.as_str() {
        constraints.insert("allowed_path".into(), json!(ar.str_field("path")));
        constraints.insert("write_roots".into(), json!(roots(constitution.write_paths())));
    } else if ar.action_type == ActionType::Notify.as_str() {
        constraints.insert("target".into(), json!(ar.str_field("target")));
    } else if ar.action_type == ActionType::LogAppend.as_str() {
        constraints.insert("log_name".into(), json!(ar.str_field("log_name")));
        constraints.insert("write_roots".into(), json!(roots(constitution.write_paths())));
    }
    constraints
}

// ---------------------------------------------------------------------------
// Amendment-aware layering (default mode, early returns)
// ---------------------------------------------------------------------------

/// Output of the amendment-aware policy core.
#[derive(Clone, Debug)]
pub struct GovernedOutput {
    pub decision_type: DecisionType,
    pub bundle: Option<CandidateBundle>,
    pub warrant: Option<ExecutionWarrant>,
    pub refusal: Option<RefusalRecord>,
    pub exit_record: Option<ExitRecord>,
    pub queued_proposal: Option<AmendmentProposal>,
    pub adoption_record: Option<amendment::AmendmentAdoptionRecord>,
    pub state_delta: Option<StateDelta>,
    pub admission_events: Vec<AdmissionEvent>,
    pub amendment_admission_events: Vec<AmendmentAdmissionEvent>,
    pub selection_event: Option<SelectionEvent>,
    pub admitted: Vec<AdmissionResult>,
    pub rejected: Vec<AdmissionResult>,
    pub amendment_admitted: Vec<AmendmentAdmissionResult>,
    pub amendment_rejected: Vec<AmendmentAdmissionResult>,
}

impl GovernedOutput {
    fn empty(decision_type: DecisionType) -> Self {
        GovernedOutput {
            decision_type,
            bundle: None,
            warrant: None,
            refusal: None,
            exit_record: None,
            queued_proposal: None,
            adoption_record: None,
            state_delta: None,
            admission_events: Vec::new(),
            amendment_admission_events: Vec::new(),
            selection_event: None,
            admitted: Vec::new(),
            rejected: Vec::new(),
            amendment_admitted: Vec::new(),
            amendment_rejected: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut v = json!({"decision_type": self.decision_type.as_str()});
        if let Some(b) = &self.bundle {
            v["bundle"] = b.to_value();
        }
        if let Some(w) = &self.warrant {
            v["warrant"] = w.to_value();
        }
        if let Some(r) = &self.refusal {
            v["refusal"] = r.to_value();
        }
        if let Some(e) = &self.exit_record {
            v["exit_record"] = e.to_value();
        }
        if let Some(q) = &self.queued_proposal {
            v["queued_proposal"] = q.to_value_id();
        }
        if let Some(a) = &self.adoption_record {
            v["adoption_record"] = a.to_value();
        }
        if let Some(d) = &self.state_delta {
            v["state_delta"] = d.to_value();
        }
        v
    }
}

/// Amendment-aware policy core in default mode: adoption check, then
/// amendment queuing, then the base action path. Each governance step that
/// fires returns early; the post-adoption state is only observed from the
/// next cycle on.
pub fn evaluate_governed(
    observations: &[Observation],
    action_candidates: &[CandidateBundle],
    amendment_candidates: &[AmendmentProposal],
    constitution: &Constitution,
    state: &InternalState,
    repo_root: &Path,
    schema: Option<&jsonschema::Validator>,
) -> Result<GovernedOutput, CanonError> {
    let cycle_time = match pre_admission_checks(observations, constitution)? {
        PreCheck::Proceed(t) => t,
        PreCheck::Refuse(refusal) => {
            let mut out = GovernedOutput::empty(DecisionType::Refuse);
            out.refusal = Some(refusal);
            return Ok(out);
        }
        PreCheck::Exit(exit_record) => {
            let mut out = GovernedOutput::empty(DecisionType::Exit);
            out.exit_record = Some(exit_record);
            return Ok(out);
        }
    };

    // Step 1: adoption of a cooled pending amendment.
    if let Some(outcome) = amendment::try_adopt(constitution, state, &cycle_time)? {
        let mut out = GovernedOutput::empty(DecisionType::Adopt);
        out.adoption_record = Some(outcome.adoption_record);
        out.state_delta = Some(outcome.state_delta);
        return Ok(out);
    }

    // Step 2: queue a newly admitted amendment proposal.
    let queue_eval = amendment::try_queue(amendment_candidates, constitution, state, schema);
    if let Some((queued, delta)) = queue_eval.queued {
        let mut out = GovernedOutput::empty(DecisionType::QueueAmendment);
        out.queued_proposal = Some(queued);
        out.state_delta = Some(delta);
        out.amendment_admission_events = queue_eval.events;
        out.amendment_admitted = queue_eval.admitted;
        out.amendment_rejected = queue_eval.rejected;
        return Ok(out);
    }

    // Step 3: base action path.
    let path = action_path(
        observations,
        action_candidates,
        constitution,
        state.cycle_index,
        repo_root,
        &cycle_time,
    )?;
    let mut out = GovernedOutput::empty(path.decision_type);
    out.bundle = path.bundle;
    out.warrant = path.warrant;
    out.refusal = path.refusal;
    out.admission_events = path.admission_events;
    out.selection_event = path.selection_event;
    out.admitted = path.admitted;
    out.rejected = path.rejected;
    out.amendment_admission_events = queue_eval.events;
    out.amendment_rejected = queue_eval.rejected;
    Ok(out)
}


// ---------------------------------------------------------------------------
// Kernel-authoritative LogAppend warrant issuance
// ---------------------------------------------------------------------------

/// Result of admitting and warranting a single LogAppend bundle.
#[derive(Clone, Debug)]
pub struct LogAppendWarrantResult {
    pub bundle: CandidateBundle,
    pub warrant: Option<ExecutionWarrant>,
    pub admitted: bool,
    pub rejection_reason: String,
}

/// Admit kernel-authored LogAppend bundles and issue warrants for the ones
/// that pass. The host must call this instead of fabricating warrants.
pub fn issue_log_append_warrants<C: KernelConstitution>(
    log_bundles: &[CandidateBundle],
    observations: &[Observation],
    constitution: &C,
    cycle_index: u64,
    repo_root: &Path,
) -> Result<Vec<LogAppendWarrantResult>, CanonError> {
    let cycle_time = extract_cycle_time(observations).unwrap_or_default();

    let pipeline = AdmissionPipeline::new(constitution, repo_root);
    let (admitted, rejected, _) = pipeline.evaluate(log_bundles, observations);

    let mut results = Vec::with_capacity(log_bundles.len());
    for ar in admitted {
        let warrant = ExecutionWarrant::new(
            &ar.candidate.action_request.id,
            &ar.candidate.action_request.action_type,
            build_scope_constraints(&ar.candidate, constitution, repo_root),
            cycle_index,
            &cycle_time,
        )?;
        results.push(LogAppendWarrantResult {
            bundle: ar.candidate,
            warrant: Some(warrant),
            admitted: true,
            rejection_reason: String::new(),
        });
    }
    for rr in rejected {
        results.push(LogAppendWarrantResult {
            bundle: rr.candidate,
            warrant: None,
            admitted: false,
            rejection_reason: rr.rejection_code,
        });
    }
    Ok(results)
}
