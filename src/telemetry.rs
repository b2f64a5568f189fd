//! Telemetry derivation
//!
//! Pure derivation of the exact JSONL lines the host will write via
//! LogAppend warrants. Five streams: `observations`, `artifacts`,
//! `admission_trace`, `selector_trace`, `execution_trace`. Each line is
//! canonical JSON carrying `run_id`, `cycle_id`, and one of
//! {`observation`, `artifact`, `event`, `decision`}.
//!
//! The writer itself is external and downstream of the decision; nothing in
//! here touches the filesystem.

use serde_json::{json, Value};

use crate::artifacts::{ActionType, Author, CandidateBundle, Observation};
use crate::canonical::{canonical_str, CanonError};
use crate::constitution::KernelConstitution;
use crate::hashing::sha256_hex;
use crate::policy::PolicyOutput;

/// A batch of JSONL lines destined for one log stream.
#[derive(Clone, Debug, PartialEq)]
pub struct LogIntent {
    pub log_name: String,
    pub lines: Vec<String>,
}

impl LogIntent {
    /// SHA-256 of the newline-joined lines with a trailing newline.
    pub fn lines_sha256(&self) -> String {
        let mut content = self.lines.join("\n");
        content.push('\n');
        sha256_hex(content.as_bytes())
    }
}

/// Summary of log writes for a cycle, appended to `execution_trace`.
#[derive(Clone, Debug, PartialEq)]
pub struct LogCommitSummary {
    pub cycle_index: u64,
    pub streams_written: Vec<String>,
    pub warrant_ids: Vec<String>,
    pub total_lines_written: u64,
}

impl LogCommitSummary {
    pub fn to_value(&self) -> Value {
        json!({
            "event_type": "log_commit_summary",
            "cycle_index": self.cycle_index,
            "streams_written": self.streams_written,
            "warrants": self.warrant_ids,
            "total_lines_written": self.total_lines_written,
        })
    }
}

fn line(run_id: &str, cycle_id: u64, key: &str, payload: Value) -> Result<String, CanonError> {
    let mut map = serde_json::Map::new();
    map.insert("run_id".into(), json!(run_id));
    map.insert("cycle_id".into(), json!(cycle_id));
    map.insert(key.to_owned(), payload);
    canonical_str(&Value::Object(map))
}

/// Derive all log lines for one cycle. Returns one [`LogIntent`] per stream
/// that has content, in stream order.
pub fn derive_telemetry(
    run_id: &str,
    cycle_index: u64,
    observations: &[Observation],
    candidates: &[CandidateBundle],
    policy_output: &PolicyOutput,
) -> Result<Vec<LogIntent>, CanonError> {
    let mut intents = Vec::new();

    // 1. observations
    let mut obs_lines = Vec::new();
    for obs in observations {
        obs_lines.push(line(run_id, cycle_index, "observation", obs.to_value())?);
    }
    if !obs_lines.is_empty() {
        intents.push(LogIntent {
            log_name: "observations".to_owned(),
            lines: obs_lines,
        });
    }

    // 2. artifacts: every candidate component, then decision artifacts.
    let mut artifact_lines = Vec::new();
    for cand in candidates {
        artifact_lines.push(line(
            run_id,
            cycle_index,
            "artifact",
            cand.action_request.to_value(),
        )?);
        if let Some(sc) = &cand.scope_claim {
            artifact_lines.push(line(run_id, cycle_index, "artifact", sc.to_value())?);
        }
        if let Some(j) = &cand.justification {
            artifact_lines.push(line(run_id, cycle_index, "artifact", j.to_value())?);
        }
    }
    let decision = &policy_output.decision;
    if let Some(refusal) = &decision.refusal {
        artifact_lines.push(line(run_id, cycle_index, "artifact", refusal.to_value())?);
    }
    if let Some(exit_record) = &decision.exit_record {
        artifact_lines.push(line(run_id, cycle_index, "artifact", exit_record.to_value())?);
    }
    if let Some(warrant) = &decision.warrant {
        artifact_lines.push(line(run_id, cycle_index, "artifact", warrant.to_value())?);
    }
    if !artifact_lines.is_empty() {
        intents.push(LogIntent {
            log_name: "artifacts".to_owned(),
            lines: artifact_lines,
        });
    }

    // 3. admission_trace
    let mut admission_lines = Vec::new();
    for event in &policy_output.admission_events {
        admission_lines.push(line(run_id, cycle_index, "event", event.to_value())?);
    }
    if !admission_lines.is_empty() {
        intents.push(LogIntent {
            log_name: "admission_trace".to_owned(),
            lines: admission_lines,
        });
    }

    // 4. selector_trace
    if let Some(selection) = &policy_output.selection_event {
        intents.push(LogIntent {
            log_name: "selector_trace".to_owned(),
            lines: vec![line(run_id, cycle_index, "event", selection.to_value())?],
        });
    }

    // 5. execution_trace
    let decision_line = line(
        run_id,
        cycle_index,
        "decision",
        json!({
            "decision_type": decision.decision_type.as_str(),
            "warrant_id": decision.warrant.as_ref().map(|w| w.warrant_id.clone()),
            "action_type": decision
                .bundle
                .as_ref()
                .map(|b| b.action_request.action_type.clone()),
        }),
    )?;
    intents.push(LogIntent {
        log_name: "execution_trace".to_owned(),
        lines: vec![decision_line],
    });

    Ok(intents)
}

/// Convert log intents into kernel-authored LogAppend candidate bundles,
/// ready for admission.
pub fn build_log_append_bundles<C: KernelConstitution>(
    intents: &[LogIntent],
    constitution: &C,
    cycle_time: &str,
) -> Result<Vec<CandidateBundle>, CanonError> {
    let mut bundles = Vec::with_capacity(intents.len());
    for intent in intents {
        let mut fields = serde_json::Map::new();
        fields.insert("log_name".into(), json!(intent.log_name));
        fields.insert("jsonl_lines".into(), json!(intent.lines));
        let action_request = crate::artifacts::ActionRequest::new(
            ActionType::LogAppend.as_str(),
            fields,
            Author::Kernel,
            cycle_time,
        )?;
        bundles.push(CandidateBundle {
            action_request,
            scope_claim: None,
            justification: None,
            authority_citations: vec![
                constitution.make_citation("INV-NO-SIDE-EFFECTS-WITHOUT-WARRANT"),
                format!(
                    "constitution:{}@/telemetry_policy/required_logs",
                    constitution.sha256()
                ),
            ],
        });
    }
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::policy;
    use std::path::Path;

    fn run_cycle() -> (Vec<Observation>, Vec<CandidateBundle>, PolicyOutput) {
        let c = fixtures::constitution();
        let state = fixtures::state_for(&c, 0);
        let obs = vec![fixtures::timestamp_observation()];
        let candidates = vec![fixtures::notify_bundle(&c, "hi")];
        let out = policy::evaluate(&obs, &candidates, &c, &state, Path::new("/repo")).unwrap();
        (obs, candidates, out)
    }

    #[test]
    fn all_five_streams_have_content_on_an_action_cycle() {
        let (obs, candidates, out) = run_cycle();
        let intents = derive_telemetry("run-1", 0, &obs, &candidates, &out).unwrap();
        let names: Vec<&str> = intents.iter().map(|i| i.log_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "observations",
                "artifacts",
                "admission_trace",
                "selector_trace",
                "execution_trace"
            ]
        );
        // Warrant landed in the artifacts stream.
        let artifacts = &intents[1];
        assert!(artifacts.lines.iter().any(|l| l.contains("ExecutionWarrant")));
    }

    #[test]
    fn lines_are_canonical_json_with_run_and_cycle_keys() {
        let (obs, candidates, out) = run_cycle();
        let intents = derive_telemetry("run-1", 3, &obs, &candidates, &out).unwrap();
        for intent in &intents {
            for line in &intent.lines {
                let parsed: Value = serde_json::from_str(line).unwrap();
                assert_eq!(parsed["run_id"], json!("run-1"));
                assert_eq!(parsed["cycle_id"], json!(3));
                // Round-tripping through the canonicalizer is a fixpoint.
                assert_eq!(&crate::canonical::canonical_str(&parsed).unwrap(), line);
            }
        }
    }

    #[test]
    fn log_bundles_admit_through_the_pipeline() {
        let c = fixtures::constitution();
        let (obs, candidates, out) = run_cycle();
        let intents = derive_telemetry("run-1", 0, &obs, &candidates, &out).unwrap();
        let bundles =
            build_log_append_bundles(&intents, &c, fixtures::CYCLE_TIME).unwrap();
        assert_eq!(bundles.len(), intents.len());
        let results =
            policy::issue_log_append_warrants(&bundles, &obs, &c, 0, Path::new("/repo")).unwrap();
        assert!(results.iter().all(|r| r.admitted), "{results:?}");
    }

    #[test]
    fn intent_digest_is_stable() {
        let intent = LogIntent {
            log_name: "observations".to_owned(),
            lines: vec!["{\"a\":1}".to_owned(), "{\"b\":2}".to_owned()],
        };
        assert_eq!(intent.lines_sha256(), intent.lines_sha256());
        let other = LogIntent {
            log_name: "observations".to_owned(),
            lines: vec!["{\"a\":1}".to_owned()],
        };
        assert_ne!(intent.lines_sha256(), other.lines_sha256());
    }
}
