//! Shared test fixtures: a complete constitution, a succession overlay, and
//! deterministic keys. Compiled only for tests.

use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use serde_json::{json, Map};

use crate::amendment::AmendmentProposal;
use crate::artifacts::{
    ActionRequest, Author, CandidateBundle, Observation, ObservationKind, ScopeClaim,
};
use crate::boundary::compute_genesis_tip_hash;
use crate::constitution::{constitution_hash, Constitution};
use crate::cycle::DelegatedActionRequest;
use crate::overlay::Overlay;
use crate::ratification::TreatyRatification;
use crate::signature::{derive_keypair, sign_payload};
use crate::state::InternalState;
use crate::succession::SuccessionProposal;
use crate::treaty::TreatyGrant;

pub const CYCLE_TIME: &str = "2024-01-01T00:00:00Z";
pub const SOVEREIGN_SEED: &[u8] = b"rsak-test-sovereign";
const GRANTEE_SEED: &[u8] = b"rsak-test-grantee";

pub const TEST_CONSTITUTION: &str = r#"meta:
  version: "0.3.0"
  name: "test constitution"

observation_schema:
  kinds:
    - kind: user_input
    - kind: timestamp
    - kind: budget
    - kind: system

action_space:
  action_types:
    - type: Notify
      requires:
        authority_citations: true
      required_fields:
        - name: target
          type: enum
          allowed: [stdout, local_log]
        - name: message
          type: string
          max_len: 2000
    - type: ReadLocal
      requires:
        authority_citations: true
      required_fields:
        - name: path
          type: string
          max_len: 512
    - type: WriteLocal
      requires:
        authority_citations: true
        scope_claim: true
      required_fields:
        - name: path
          type: string
          max_len: 512
        - name: content
          type: string
          max_len: 65536
    - type: LogAppend
      kernel_only: true
      required_fields:
        - name: log_name
          type: string
          max_len: 64
        - name: jsonl_lines
          type: array<string>
          max_len_per_item: 10000
      limits:
        max_lines_per_warrant: 50
        max_chars_per_line: 10000
        max_bytes_per_warrant: 256000
    - type: Exit
      kernel_only: true
      required_fields:
        - name: reason_code
          type: enum
          allowed: [NO_ADMISSIBLE_ACTION, AUTHORITY_CONFLICT, BUDGET_EXHAUSTED, INTEGRITY_RISK, USER_REQUESTED]

io_policy:
  id: CL-IO-POLICY
  allowlist:
    read_paths: ["./workspace", "./logs"]
    write_paths: ["./workspace", "./logs"]
  network:
    enabled: false

reflection_policy:
  proposal_budgets:
    max_candidates_per_cycle: 5
    max_total_tokens_per_cycle: 6000

refusal_policy:
  refusal_reason_codes: [NO_ADMISSIBLE_ACTION, MISSING_REQUIRED_ARTIFACT, AUTHORITY_CITATION_INVALID, SCOPE_CLAIM_INVALID, CONSTITUTION_VIOLATION, EXECUTION_WARRANT_UNAVAILABLE, BUDGET_EXHAUSTED, MISSING_REQUIRED_OBSERVATION]
  admission_rejection_codes: [CANDIDATE_PARSE_FAILED, INVALID_UNICODE, CANDIDATE_BUDGET_EXCEEDED, KERNEL_ONLY_ACTION, MISSING_FIELD, INVALID_FIELD, CITATION_UNRESOLVABLE, PATH_NOT_ALLOWLISTED]

selection_policy:
  default_selector_rule: lexicographic_min_bundle_hash

exit_policy:
  id: CL-EXIT-POLICY
  exit_mandatory_conditions: [integrity_risk, user_requested]

telemetry_policy:
  required_logs: [observations, artifacts, admission_trace, selector_trace, execution_trace]

invariants:
  - id: INV-NO-SIDE-EFFECTS-WITHOUT-WARRANT
    text: "Every side effect requires a single-use warrant."
  - id: INV-CLOSED-ACTION-SET
    text: "Action types form a closed set."

amendment_policy:
  amendments_enabled: true
  max_constitution_bytes: 32768
  max_amendment_candidates_per_cycle: 3
  max_pending_amendments: 5

AmendmentProcedure:
  id: CL-AMENDMENT-PROCEDURE
  cooling_period_cycles: 3
  authorization_threshold: 1
  authority_reference_mode: BOTH
  density_upper_bound: 0.5

AuthorityModel:
  authorities: [AUTH_GOVERNANCE, AUTH_OPERATOR]
  action_permissions:
    - authority: AUTH_GOVERNANCE
      actions: [Notify]
    - authority: AUTH_OPERATOR
      actions: [Notify, ReadLocal, LogAppend]
  amendment_permissions:
    - authority: AUTH_GOVERNANCE
      amendments: [FullReplacement]
  treaty_permissions:
    - authority: AUTH_GOVERNANCE
      treaties: [TreatyGrant, TreatyRevocation]

WarrantDefinition:
  id: CL-WARRANT-DEFINITION
  single_use: true
  origin_rank:
    rsa: 0
    delegated: 1

ScopeSystem:
  id: CL-SCOPE-SYSTEM
  per_action_scope:
    - action: Notify
      scope_claim_required: true
      valid_scope_types: [NOTIFY_TARGET]
      permitted_zones: [stdout, local_log]
    - action: ReadLocal
      scope_claim_required: true
      valid_scope_types: [FILE_PATH]
    - action: WriteLocal
      scope_claim_required: true
      valid_scope_types: [FILE_PATH]
    - action: LogAppend
      scope_claim_required: true
      valid_scope_types: [LOG_STREAM]
  scope_enumerations:
    NOTIFY_TARGET: [stdout, local_log]
    FILE_PATH: [workspace, logs]
    LOG_STREAM: [observations, artifacts, admission_trace, selector_trace, execution_trace]

TreatySystem:
  id: CL-TREATY-SYSTEM
  max_treaty_duration_cycles: 10
  delegation_depth_limit: 1
  acyclicity_required: true
"#;

/// Two authorities over two action types with three constitutional pairs:
/// one more delegated pair saturates the 0.5 density bound.
pub const DENSE_CONSTITUTION: &str = r#"meta:
  version: "0.3.0"
action_space:
  action_types:
    - type: Notify
    - type: LogAppend
AmendmentProcedure:
  id: CL-AMENDMENT-PROCEDURE
  cooling_period_cycles: 3
  authorization_threshold: 1
  authority_reference_mode: BOTH
  density_upper_bound: 0.5
AuthorityModel:
  authorities: [AUTH_GOVERNANCE, AUTH_OPERATOR]
  action_permissions:
    - authority: AUTH_GOVERNANCE
      actions: [Notify, LogAppend]
    - authority: AUTH_OPERATOR
      actions: [Notify]
  treaty_permissions:
    - authority: AUTH_GOVERNANCE
      treaties: [TreatyGrant, TreatyRevocation]
WarrantDefinition:
  origin_rank:
    rsa: 0
    delegated: 1
ScopeSystem:
  per_action_scope:
    - action: Notify
      scope_claim_required: true
      valid_scope_types: [CHANNEL]
    - action: LogAppend
      scope_claim_required: true
      valid_scope_types: [CHANNEL]
  scope_enumerations:
    CHANNEL: [stdout, logs]
TreatySystem:
  max_treaty_duration_cycles: 10
  delegation_depth_limit: 1
"#;

/// Both authorities hold both actions and there is no density bound; a
/// grant of both actions realizes every pair (d_eff = 1.0).
pub const SATURATED_CONSTITUTION: &str = r#"meta:
  version: "0.3.0"
action_space:
  action_types:
    - type: Notify
    - type: LogAppend
AmendmentProcedure:
  id: CL-AMENDMENT-PROCEDURE
  cooling_period_cycles: 3
  authorization_threshold: 1
  authority_reference_mode: BOTH
AuthorityModel:
  authorities: [AUTH_GOVERNANCE, AUTH_OPERATOR]
  action_permissions:
    - authority: AUTH_GOVERNANCE
      actions: [Notify, LogAppend]
    - authority: AUTH_OPERATOR
      actions: [Notify, LogAppend]
  treaty_permissions:
    - authority: AUTH_GOVERNANCE
      treaties: [TreatyGrant, TreatyRevocation]
WarrantDefinition:
  origin_rank:
    rsa: 0
    delegated: 1
ScopeSystem:
  per_action_scope:
    - action: Notify
      scope_claim_required: true
      valid_scope_types: [CHANNEL]
    - action: LogAppend
      scope_claim_required: true
      valid_scope_types: [CHANNEL]
  scope_enumerations:
    CHANNEL: [stdout, logs]
TreatySystem:
  max_treaty_duration_cycles: 10
  delegation_depth_limit: 1
"#;

pub fn constitution() -> Constitution {
    Constitution::from_yaml_str(TEST_CONSTITUTION, None).unwrap()
}

pub fn dense_constitution() -> Constitution {
    Constitution::from_yaml_str(DENSE_CONSTITUTION, None).unwrap()
}

pub fn saturated_constitution() -> Constitution {
    Constitution::from_yaml_str(SATURATED_CONSTITUTION, None).unwrap()
}

/// The queued-amendment fixture: the base text with the version bumped, so
/// the ratchet holds while the canonical hash changes.
pub fn amended_constitution() -> String {
    TEST_CONSTITUTION.replace("version: \"0.3.0\"", "version: \"0.3.1\"")
}

pub fn overlay() -> Overlay {
    Overlay::new(json!({
        "clauses": {
            "CL-SUCCESSION-ENABLED": {"enabled": true},
            "CL-SUCCESSION-PER-CYCLE-LIMIT": {"max_per_cycle": 1},
            "CL-SUCCESSION-SELF-PERMITTED": {"permitted": true},
            "CL-BOUNDARY-SIGNATURE-REQUIRED": {"required": true},
            "CL-TREATY-SUSPENSION-ON-SUCCESSION": {"enabled": true},
            "CL-TREATY-RATIFICATION-REQUIRED": {"enabled": true},
            "CL-PRIOR-KEY-ZERO-AUTHORITY": {"enabled": true},
            "CL-LINEAGE-NO-FORK": {"enabled": true},
            "CL-SUSPENSION-BLOCKS-GRANTS": {
                "enabled": true,
                "rejection_code": "SUSPENSION_UNRESOLVED"
            },
        }
    }))
    .unwrap()
}

pub fn overlay_with_succession_disabled() -> Overlay {
    Overlay::new(json!({
        "clauses": {
            "CL-SUCCESSION-ENABLED": {"enabled": false},
            "CL-SUSPENSION-BLOCKS-GRANTS": {"enabled": true},
        }
    }))
    .unwrap()
}

// --- Observations ----------------------------------------------------------

pub fn timestamp_observation() -> Observation {
    timestamp_observation_at(CYCLE_TIME)
}

pub fn timestamp_observation_at(iso: &str) -> Observation {
    Observation::new(
        ObservationKind::Timestamp,
        json!({"iso8601_utc": iso}),
        Author::Host,
        iso,
    )
    .unwrap()
}

pub fn system_observation(event: &str, detail: &str) -> Observation {
    Observation::new(
        ObservationKind::System,
        json!({"event": event, "detail": detail}),
        Author::Host,
        CYCLE_TIME,
    )
    .unwrap()
}

pub fn budget_observation(tokens: u64) -> Observation {
    Observation::new(
        ObservationKind::Budget,
        json!({"llm_output_token_count": tokens}),
        Author::Host,
        CYCLE_TIME,
    )
    .unwrap()
}

// --- Candidate bundles ------------------------------------------------------

pub fn notify_bundle(c: &Constitution, message: &str) -> CandidateBundle {
    let mut fields = Map::new();
    fields.insert("target".into(), json!("stdout"));
    fields.insert("message".into(), json!(message));
    CandidateBundle {
        action_request: ActionRequest::new("Notify", fields, Author::Host, CYCLE_TIME).unwrap(),
        scope_claim: None,
        justification: None,
        authority_citations: vec![c.authority_citation("AUTH_OPERATOR")],
    }
}

pub fn write_local_bundle(c: &Constitution, path: &str, obs_id: &str) -> CandidateBundle {
    let mut fields = Map::new();
    fields.insert("path".into(), json!(path));
    fields.insert("content".into(), json!("payload"));
    CandidateBundle {
        action_request: ActionRequest::new("WriteLocal", fields, Author::Host, CYCLE_TIME)
            .unwrap(),
        scope_claim: Some(
            ScopeClaim::new(
                vec![obs_id.to_owned()],
                "write requested by the cycle's observations",
                &c.citation("CL-IO-POLICY"),
                Author::Host,
                CYCLE_TIME,
            )
            .unwrap(),
        ),
        justification: None,
        authority_citations: vec![c.authority_citation("AUTH_OPERATOR")],
    }
}

pub fn log_append_bundle(
    c: &Constitution,
    author: Author,
    log_name: &str,
    lines: &[&str],
) -> CandidateBundle {
    let mut fields = Map::new();
    fields.insert("log_name".into(), json!(log_name));
    fields.insert("jsonl_lines".into(), json!(lines));
    CandidateBundle {
        action_request: ActionRequest::new("LogAppend", fields, author, CYCLE_TIME).unwrap(),
        scope_claim: None,
        justification: None,
        authority_citations: vec![c.citation("INV-NO-SIDE-EFFECTS-WITHOUT-WARRANT")],
    }
}

// --- States -----------------------------------------------------------------

pub fn state_for(c: &Constitution, cycle_index: u64) -> InternalState {
    InternalState {
        cycle_index,
        active_constitution_hash: c.hash().to_owned(),
        ..InternalState::default()
    }
}

/// State with genesis sovereign identity and the standard overlay mounted.
pub fn sovereign_state(c: &Constitution, cycle_index: u64) -> InternalState {
    let (_, k0_id) = sovereign_keypair(0);
    let genesis_tip = compute_genesis_tip_hash(&json!({
        "type": "genesis",
        "active_key": k0_id,
    }))
    .unwrap();
    InternalState {
        cycle_index,
        active_constitution_hash: c.hash().to_owned(),
        sovereign_public_key_active: k0_id,
        identity_chain_length: 1,
        identity_chain_tip_hash: genesis_tip,
        overlay_hash: overlay().hash().to_owned(),
        ..InternalState::default()
    }
}

// --- Keys -------------------------------------------------------------------

pub fn sovereign_keypair(position: u64) -> (SigningKey, String) {
    derive_keypair(SOVEREIGN_SEED, position).unwrap()
}

pub fn sovereign_ids() -> (String, String) {
    (sovereign_keypair(0).1, sovereign_keypair(1).1)
}

pub fn grantee_keypair(n: u64) -> (SigningKey, String) {
    derive_keypair(GRANTEE_SEED, n).unwrap()
}

pub fn grantee_id(n: u64) -> String {
    grantee_keypair(n).1
}

// --- Treaty artifacts -------------------------------------------------------

/// A grant of Notify/stdout from AUTH_GOVERNANCE to grantee `n`.
pub fn notify_grant(c: &Constitution, n: u64, duration: u64) -> TreatyGrant {
    let mut scope = BTreeMap::new();
    scope.insert("NOTIFY_TARGET".to_owned(), vec!["stdout".to_owned()]);
    TreatyGrant::new(
        "AUTH_GOVERNANCE",
        grantee_id(n).as_str(),
        vec!["Notify".to_owned()],
        scope,
        duration,
        true,
        vec![
            c.authority_citation("AUTH_GOVERNANCE"),
            c.citation("CL-TREATY-SYSTEM"),
        ],
        "delegate stdout notifications",
        CYCLE_TIME,
    )
    .unwrap()
}

// --- Amendment artifacts ----------------------------------------------------

pub fn amendment_proposal(c: &Constitution, proposed_yaml: &str) -> AmendmentProposal {
    let declared = constitution_hash(proposed_yaml.as_bytes()).unwrap();
    AmendmentProposal::new(
        c.hash(),
        proposed_yaml,
        &declared,
        "tighten the envelope",
        vec![
            c.authority_citation("AUTH_GOVERNANCE"),
            c.citation("CL-AMENDMENT-PROCEDURE"),
        ],
        "version bump",
        CYCLE_TIME,
    )
    .unwrap()
}

// --- Succession / ratification ----------------------------------------------

/// Succession from sovereign position `from` to position `to`, signed by
/// the `from` key.
pub fn succession_proposal(
    _c: &Constitution,
    ov: &Overlay,
    from: u64,
    to: u64,
) -> SuccessionProposal {
    let (from_key, from_id) = sovereign_keypair(from);
    let (_, to_id) = sovereign_keypair(to);
    let citations = vec![ov.citation("CL-SUCCESSION-ENABLED")];
    let unsigned = SuccessionProposal::new(
        &from_id,
        &to_id,
        citations.clone(),
        "rotate sovereign identity",
        "",
        CYCLE_TIME,
    )
    .unwrap();
    let signature = sign_payload(&from_key, &unsigned.signing_payload()).unwrap();
    SuccessionProposal::new(
        &from_id,
        &to_id,
        citations,
        "rotate sovereign identity",
        &signature,
        CYCLE_TIME,
    )
    .unwrap()
}

pub fn signed_ratification(treaty_id: &str, ratify: bool, key: &SigningKey) -> TreatyRatification {
    let unsigned =
        TreatyRatification::new(treaty_id, ratify, "", vec![], "dispose of suspension", CYCLE_TIME)
            .unwrap();
    let signature = sign_payload(key, &unsigned.signing_payload()).unwrap();
    TreatyRatification::new(
        treaty_id,
        ratify,
        &signature,
        vec![],
        "dispose of suspension",
        CYCLE_TIME,
    )
    .unwrap()
}

// --- Delegated actions ------------------------------------------------------

/// A signed delegated Notify from grantee `n`, citing `treaty:<grant_id>`.
pub fn delegated_notify(_c: &Constitution, n: u64, grant_id: &str) -> DelegatedActionRequest {
    let mut fields = Map::new();
    fields.insert("target".into(), json!("stdout"));
    fields.insert("message".into(), json!("delegated hello"));
    let mut dar = DelegatedActionRequest {
        action_type: "Notify".to_owned(),
        fields,
        grantee_identifier: grantee_id(n),
        authority_citations: vec![format!("treaty:{grant_id}")],
        signature: String::new(),
        scope_type: "NOTIFY_TARGET".to_owned(),
        scope_zone: "stdout".to_owned(),
        created_at: CYCLE_TIME.to_owned(),
        id: String::new(),
    };
    dar.signature = sign_delegated(&dar, n);
    dar
}

/// Re-sign a delegated request after mutating it.
pub fn sign_delegated(dar: &DelegatedActionRequest, n: u64) -> String {
    let (key, _) = grantee_keypair(n);
    sign_payload(&key, &dar.signing_payload()).unwrap()
}
