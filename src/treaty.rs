//! Treaty delegation artifacts and the active treaty set
//!
//! A treaty grant is a scoped, time-bounded delegation from a constitutional
//! authority (the grantor) to an Ed25519-identified grantee. Grant ids are
//! canonical content hashes with all list fields sorted, so logically equal
//! grants hash identically; the runtime `grant_cycle` field is excluded from
//! identity.
//!
//! [`ActiveTreatySet`] tracks grants together with the revoked, invalidated,
//! and suspended id sets. The delegation graph is never stored; it is
//! recomputed from the active grants whenever acyclicity must be checked.
//!
//! ## Effective density
//!
//! Let `P` be the distinct (authority, action) pairs: constitutional pairs
//! from `action_permissions` unioned with (grantee, action) pairs from the
//! active grants. With `A_eff = |authorities ∪ grantees|` and `B` the number
//! of action types, `d_eff = |P| / (A_eff · B)` (0 when the denominator is
//! 0). The set can repair itself against a bound by greedy pruning in
//! (grant_cycle ASC, id ASC) order.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::artifacts::Author;
use crate::canonical::CanonError;
use crate::hashing::compute_id;

// ---------------------------------------------------------------------------
// Rejection codes and gates
// ---------------------------------------------------------------------------

/// Rejection codes for the treaty admission pipelines (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreatyRejectionCode {
    GrantorNotConstitutional,
    GrantorLacksPermission,
    TreatyPermissionMissing,
    ScopeCollapse,
    CoverageInflation,
    ExcessiveDepth,
    DelegationCycle,
    DensityMarginViolation,
    WildcardMapping,
    NonrevocableGrant,
    GrantNotFound,
    GrantInactive,
    SchemaInvalid,
    InvalidField,
    AuthorityCitationInvalid,
    SignatureInvalid,
    SignatureMissing,
}

impl TreatyRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TreatyRejectionCode::GrantorNotConstitutional => "GRANTOR_NOT_CONSTITUTIONAL",
            TreatyRejectionCode::GrantorLacksPermission => "GRANTOR_LACKS_PERMISSION",
            TreatyRejectionCode::TreatyPermissionMissing => "TREATY_PERMISSION_MISSING",
            TreatyRejectionCode::ScopeCollapse => "SCOPE_COLLAPSE",
            TreatyRejectionCode::CoverageInflation => "COVERAGE_INFLATION",
            TreatyRejectionCode::ExcessiveDepth => "EXCESSIVE_DEPTH",
            TreatyRejectionCode::DelegationCycle => "DELEGATION_CYCLE",
            TreatyRejectionCode::DensityMarginViolation => "DENSITY_MARGIN_VIOLATION",
            TreatyRejectionCode::WildcardMapping => "WILDCARD_MAPPING",
            TreatyRejectionCode::NonrevocableGrant => "NONREVOCABLE_GRANT",
            TreatyRejectionCode::GrantNotFound => "GRANT_NOT_FOUND",
            TreatyRejectionCode::GrantInactive => "GRANT_INACTIVE",
            TreatyRejectionCode::SchemaInvalid => "SCHEMA_INVALID",
            TreatyRejectionCode::InvalidField => "INVALID_FIELD",
            TreatyRejectionCode::AuthorityCitationInvalid => "AUTHORITY_CITATION_INVALID",
            TreatyRejectionCode::SignatureInvalid => "SIGNATURE_INVALID",
            TreatyRejectionCode::SignatureMissing => "SIGNATURE_MISSING",
        }
    }
}

/// Rejection code raised when suspensions block new grants.
pub const SUSPENSION_UNRESOLVED: &str = "SUSPENSION_UNRESOLVED";

/// Gates of the treaty admission pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreatyGate {
    Authorization,
    SchemaValidity,
    DelegationPreservation,
    RevocationValidity,
}

impl TreatyGate {
    pub fn as_str(self) -> &'static str {
        match self {
            TreatyGate::Authorization => "treaty_authorization",
            TreatyGate::SchemaValidity => "treaty_schema_validity",
            TreatyGate::DelegationPreservation => "delegation_preservation",
            TreatyGate::RevocationValidity => "revocation_validity",
        }
    }
}

/// `ed25519:<64-hex>` grantee identifier check.
pub fn validate_grantee_identifier(id: &str) -> bool {
    match id.strip_prefix("ed25519:") {
        Some(hex_part) => {
            hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Scoped, signed-for, time-bounded delegation grant.
#[derive(Clone, Debug, PartialEq)]
pub struct TreatyGrant {
    pub grantor_authority_id: String,
    pub grantee_identifier: String,
    /// Sorted at construction.
    pub granted_actions: Vec<String>,
    /// scope_type -> sorted zone labels.
    pub scope_constraints: BTreeMap<String, Vec<String>>,
    pub duration_cycles: u64,
    pub revocable: bool,
    /// Sorted at construction.
    pub authority_citations: Vec<String>,
    pub justification: String,
    pub author: String,
    pub created_at: String,
    /// Set by the kernel at admission time; excluded from identity.
    pub grant_cycle: Option<u64>,
    pub id: String,
}

impl TreatyGrant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grantor_authority_id: &str,
        grantee_identifier: &str,
        mut granted_actions: Vec<String>,
        mut scope_constraints: BTreeMap<String, Vec<String>>,
        duration_cycles: u64,
        revocable: bool,
        mut authority_citations: Vec<String>,
        justification: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        granted_actions.sort();
        authority_citations.sort();
        for zones in scope_constraints.values_mut() {
            zones.sort();
        }
        let mut grant = TreatyGrant {
            grantor_authority_id: grantor_authority_id.to_owned(),
            grantee_identifier: grantee_identifier.to_owned(),
            granted_actions,
            scope_constraints,
            duration_cycles,
            revocable,
            authority_citations,
            justification: justification.to_owned(),
            author: Author::Reflection.as_str().to_owned(),
            created_at: created_at.to_owned(),
            grant_cycle: None,
            id: String::new(),
        };
        grant.id = compute_id(&grant.to_value())?;
        Ok(grant)
    }

    /// Canonical wire form; `grant_cycle` is runtime state, not identity.
    pub fn to_value(&self) -> Value {
        json!({
            "type": "TreatyGrant",
            "grantor_authority_id": self.grantor_authority_id,
            "grantee_identifier": self.grantee_identifier,
            "granted_actions": self.granted_actions,
            "scope_constraints": self.scope_constraints,
            "duration_cycles": self.duration_cycles,
            "revocable": self.revocable,
            "authority_citations": self.authority_citations,
            "justification": self.justification,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }

    /// Wire form with runtime fields, for internal state snapshots.
    pub fn to_value_internal(&self) -> Value {
        let mut v = self.to_value();
        v["grant_cycle"] = match self.grant_cycle {
            Some(c) => json!(c),
            None => Value::Null,
        };
        v
    }

    /// Active in `current_cycle`? Unadmitted grants are never active.
    pub fn is_active(&self, current_cycle: u64) -> bool {
        match self.grant_cycle {
            Some(start) => {
                current_cycle >= start
                    && current_cycle <= start + self.duration_cycles.saturating_sub(1)
            }
            None => false,
        }
    }
}

/// Revocation of a previously admitted grant.
#[derive(Clone, Debug, PartialEq)]
pub struct TreatyRevocation {
    pub grant_id: String,
    pub authority_citations: Vec<String>,
    pub justification: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl TreatyRevocation {
    pub fn new(
        grant_id: &str,
        mut authority_citations: Vec<String>,
        justification: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        authority_citations.sort();
        let mut rev = TreatyRevocation {
            grant_id: grant_id.to_owned(),
            authority_citations,
            justification: justification.to_owned(),
            author: Author::Reflection.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        rev.id = compute_id(&rev.to_value())?;
        Ok(rev)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": "TreatyRevocation",
            "grant_id": self.grant_id,
            "authority_citations": self.authority_citations,
            "justification": self.justification,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }
}

// ---------------------------------------------------------------------------
// Trace events
// ---------------------------------------------------------------------------

/// One gate decision for one treaty artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct TreatyAdmissionEvent {
    pub artifact_id: String,
    pub artifact_type: String,
    pub gate: String,
    pub result: String,
    pub reason_code: String,
    pub detail: String,
}

impl TreatyAdmissionEvent {
    pub fn to_value(&self) -> Value {
        let mut v = json!({
            "event_type": "treaty_admission_event",
            "artifact_id": self.artifact_id,
            "artifact_type": self.artifact_type,
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

/// Result of treaty artifact admission.
#[derive(Clone, Debug)]
pub struct TreatyAdmissionResult {
    pub artifact_id: String,
    pub artifact_type: String,
    pub admitted: bool,
    pub events: Vec<TreatyAdmissionEvent>,
    pub failed_gate: String,
    pub rejection_code: String,
    /// Post-admission density metrics, populated for admitted grants.
    pub density: Option<DensityMetrics>,
}

/// Event emitted when revalidation or density repair removes a grant.
#[derive(Clone, Debug, PartialEq)]
pub struct TreatyRevalidationEvent {
    pub grant_id: String,
    /// "invalidated" (constitutional revalidation) or "pruned" (density).
    pub action: String,
    pub reason_code: String,
    pub detail: String,
}

impl TreatyRevalidationEvent {
    pub fn to_value(&self) -> Value {
        json!({
            "event_type": "treaty_revalidation_event",
            "grant_id": self.grant_id,
            "action": self.action,
            "reason_code": self.reason_code,
            "detail": self.detail,
        })
    }
}

// ---------------------------------------------------------------------------
// Effective density
// ---------------------------------------------------------------------------

/// Runtime density over constitutional plus delegated pairs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensityMetrics {
    pub a_eff: u64,
    pub b: u64,
    pub m_eff: u64,
    pub density: f64,
}

/// Compute effective density for a hypothetical or actual active-grant set.
pub fn effective_density(
    action_permissions: &[Value],
    active_grants: &[&TreatyGrant],
    action_type_count: u64,
) -> DensityMetrics {
    let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
    let mut principals: BTreeSet<String> = BTreeSet::new();

    for perm in action_permissions {
        let auth = perm
            .get("authority")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        principals.insert(auth.clone());
        if let Some(actions) = perm.get("actions").and_then(Value::as_array) {
            for action in actions.iter().filter_map(Value::as_str) {
                pairs.insert((auth.clone(), action.to_owned()));
            }
        }
    }

    for grant in active_grants {
        principals.insert(grant.grantee_identifier.clone());
        for action in &grant.granted_actions {
            pairs.insert((grant.grantee_identifier.clone(), action.clone()));
        }
    }

    let a_eff = principals.len() as u64;
    let b = action_type_count;
    let m_eff = pairs.len() as u64;
    let density = if a_eff == 0 || b == 0 {
        0.0
    } else {
        m_eff as f64 / (a_eff * b) as f64
    };
    DensityMetrics {
        a_eff,
        b,
        m_eff,
        density,
    }
}

// ---------------------------------------------------------------------------
// Active treaty set
// ---------------------------------------------------------------------------

/// Grants plus the revoked / invalidated / suspended id sets.
/// Reconstructible from the log stream; carries no hidden state.
#[derive(Clone, Debug, Default)]
pub struct ActiveTreatySet {
    pub grants: Vec<TreatyGrant>,
    pub revoked_grant_ids: BTreeSet<String>,
    pub invalidated_grant_ids: BTreeSet<String>,
    pub suspended_grant_ids: BTreeSet<String>,
}

impl ActiveTreatySet {
    /// Grants active in `current_cycle`: in their duration window and not
    /// revoked, invalidated, or suspended.
    pub fn active_grants(&self, current_cycle: u64) -> Vec<&TreatyGrant> {
        self.grants
            .iter()
            .filter(|g| g.is_active(current_cycle) && !self.is_withheld(&g.id))
            .collect()
    }

    fn is_withheld(&self, grant_id: &str) -> bool {
        self.revoked_grant_ids.contains(grant_id)
            || self.invalidated_grant_ids.contains(grant_id)
            || self.suspended_grant_ids.contains(grant_id)
    }

    /// Grants in their duration window but held in the suspended set.
    pub fn suspended_grants(&self, current_cycle: u64) -> Vec<&TreatyGrant> {
        self.grants
            .iter()
            .filter(|g| {
                g.is_active(current_cycle)
                    && !self.revoked_grant_ids.contains(&g.id)
                    && !self.invalidated_grant_ids.contains(&g.id)
                    && self.suspended_grant_ids.contains(&g.id)
            })
            .collect()
    }

    pub fn add_grant(&mut self, grant: TreatyGrant) {
        self.grants.push(grant);
    }

    /// Revoke a grant. Returns false when missing or non-revocable.
    pub fn revoke(&mut self, grant_id: &str) -> bool {
        match self.find_grant(grant_id) {
            Some(g) if g.revocable => {
                self.revoked_grant_ids.insert(grant_id.to_owned());
                true
            }
            _ => false,
        }
    }

    pub fn find_grant(&self, grant_id: &str) -> Option<&TreatyGrant> {
        self.grants.iter().find(|g| g.id == grant_id)
    }

    /// Does the identifier hold any active grant?
    pub fn is_grantee(&self, identifier: &str, current_cycle: u64) -> bool {
        self.active_grants(current_cycle)
            .iter()
            .any(|g| g.grantee_identifier == identifier)
    }

    pub fn grants_for_grantee(
        &self,
        identifier: &str,
        current_cycle: u64,
    ) -> Vec<&TreatyGrant> {
        self.active_grants(current_cycle)
            .into_iter()
            .filter(|g| g.grantee_identifier == identifier)
            .collect()
    }

    /// Would adding `new_grant` create a cycle in the (grantor → grantee)
    /// graph over the active grants? Iterative DFS with an explicit
    /// recursion stack; the graph is built on demand and discarded.
    pub fn would_create_cycle(&self, new_grant: &TreatyGrant, current_cycle: u64) -> bool {
        let mut edges: Vec<(String, String)> = self
            .active_grants(current_cycle)
            .iter()
            .map(|g| (g.grantor_authority_id.clone(), g.grantee_identifier.clone()))
            .collect();
        edges.push((
            new_grant.grantor_authority_id.clone(),
            new_grant.grantee_identifier.clone(),
        ));

        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (src, dst) in &edges {
            adjacency.entry(src.as_str()).or_default().push(dst.as_str());
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut in_stack: BTreeSet<&str> = BTreeSet::new();

        for start in adjacency.keys().copied().collect::<Vec<_>>() {
            if visited.contains(start) {
                continue;
            }
            // (node, next child index) frames replace recursion.
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            visited.insert(start);
            in_stack.insert(start);

            while let Some((node, child_idx)) = stack.pop() {
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if child_idx < children.len() {
                    stack.push((node, child_idx + 1));
                    let next = children[child_idx];
                    if in_stack.contains(next) {
                        return true;
                    }
                    if !visited.contains(next) {
                        visited.insert(next);
                        in_stack.insert(next);
                        stack.push((next, 0));
                    }
                } else {
                    in_stack.remove(node);
                }
            }
        }
        false
    }

    /// Greedy density repair: prune active grants in (grant_cycle ASC,
    /// id ASC) order until `d_eff < bound` and `d_eff != 1.0`. Pruned ids
    /// are moved to the invalidated set. Returns one event per pruned grant.
    pub fn apply_density_repair(
        &mut self,
        density_upper_bound: Option<f64>,
        action_permissions: &[Value],
        action_type_count: u64,
        current_cycle: u64,
    ) -> Vec<TreatyRevalidationEvent> {
        let mut victims: Vec<(Option<u64>, String)> = self
            .active_grants(current_cycle)
            .iter()
            .map(|g| (g.grant_cycle, g.id.clone()))
            .collect();
        victims.sort();

        let mut events = Vec::new();
        let mut cursor = 0usize;
        loop {
            let active = self.active_grants(current_cycle);
            let metrics =
                effective_density(action_permissions, &active, action_type_count);
            let within_bound = density_upper_bound.is_none_or(|b| metrics.density < b);
            if within_bound && metrics.density != 1.0 {
                break;
            }
            let Some((_, victim_id)) = victims.get(cursor) else {
                break;
            };
            cursor += 1;
            self.invalidated_grant_ids.insert(victim_id.clone());
            events.push(TreatyRevalidationEvent {
                grant_id: victim_id.clone(),
                action: "pruned".to_owned(),
                reason_code: TreatyRejectionCode::DensityMarginViolation
                    .as_str()
                    .to_owned(),
                detail: format!(
                    "density {:.4} outside margin after repair ordering",
                    metrics.density
                ),
            });
        }
        events
    }

    /// Re-run every active grant against a (possibly just-adopted)
    /// constitution. Grants whose grantor, actions, or scopes are no longer
    /// constitutionally covered move to the invalidated set.
    pub fn revalidate(
        &mut self,
        constitution: &crate::constitution::Constitution,
        current_cycle: u64,
    ) -> Vec<TreatyRevalidationEvent> {
        let mut events = Vec::new();
        let closed_set: BTreeSet<String> = constitution.action_types().into_iter().collect();
        let zone_labels = constitution.zone_labels();

        let active_ids: Vec<String> = self
            .active_grants(current_cycle)
            .iter()
            .map(|g| g.id.clone())
            .collect();

        for grant_id in active_ids {
            let Some(grant) = self.find_grant(&grant_id) else {
                continue;
            };
            let failure = check_grant_against_constitution(
                grant,
                constitution,
                &closed_set,
                &zone_labels,
            );
            if let Some((code, detail)) = failure {
                self.invalidated_grant_ids.insert(grant_id.clone());
                events.push(TreatyRevalidationEvent {
                    grant_id,
                    action: "invalidated".to_owned(),
                    reason_code: code.as_str().to_owned(),
                    detail,
                });
            }
        }
        events
    }

    /// Move every currently active grant to the suspended set.
    /// Returns the newly suspended ids.
    pub fn suspend_all_active(&mut self, current_cycle: u64) -> Vec<String> {
        let ids: Vec<String> = self
            .active_grants(current_cycle)
            .iter()
            .map(|g| g.id.clone())
            .collect();
        for id in &ids {
            self.suspended_grant_ids.insert(id.clone());
        }
        ids
    }

    /// Restore a suspended grant to active. Returns false when not suspended.
    pub fn ratify(&mut self, grant_id: &str) -> bool {
        self.suspended_grant_ids.remove(grant_id)
    }

    /// Revoke a suspended grant (ratify = false). Returns false when not
    /// suspended.
    pub fn reject_ratification(&mut self, grant_id: &str) -> bool {
        if self.suspended_grant_ids.remove(grant_id) {
            self.revoked_grant_ids.insert(grant_id.to_owned());
            true
        } else {
            false
        }
    }

    pub fn has_suspensions(&self) -> bool {
        !self.suspended_grant_ids.is_empty()
    }

    /// Drop expired grants from the suspended set. Returns removed ids.
    pub fn prune_expired_suspensions(&mut self, current_cycle: u64) -> Vec<String> {
        let expired: Vec<String> = self
            .suspended_grant_ids
            .iter()
            .filter(|gid| {
                self.find_grant(gid.as_str())
                    .is_none_or(|g| !g.is_active(current_cycle))
            })
            .cloned()
            .collect();
        for gid in &expired {
            self.suspended_grant_ids.remove(gid);
        }
        expired
    }

    pub fn to_value(&self) -> Value {
        json!({
            "grants": self.grants.iter().map(TreatyGrant::to_value_internal).collect::<Vec<_>>(),
            "revoked_grant_ids": self.revoked_grant_ids,
            "invalidated_grant_ids": self.invalidated_grant_ids,
            "suspended_grant_ids": self.suspended_grant_ids,
        })
    }
}

fn check_grant_against_constitution(
    grant: &TreatyGrant,
    constitution: &crate::constitution::Constitution,
    closed_set: &BTreeSet<String>,
    zone_labels: &BTreeMap<String, Vec<String>>,
) -> Option<(TreatyRejectionCode, String)> {
    if !constitution.is_constitutional_authority(&grant.grantor_authority_id) {
        return Some((
            TreatyRejectionCode::GrantorNotConstitutional,
            format!("grantor {} no longer constitutional", grant.grantor_authority_id),
        ));
    }
    if !constitution.authority_can_delegate_type(&grant.grantor_authority_id, "TreatyGrant") {
        return Some((
            TreatyRejectionCode::TreatyPermissionMissing,
            format!("grantor {} lost TreatyGrant permission", grant.grantor_authority_id),
        ));
    }
    for action in &grant.granted_actions {
        if !closed_set.contains(action) {
            return Some((
                TreatyRejectionCode::InvalidField,
                format!("action '{action}' left the closed action set"),
            ));
        }
        if !constitution.authority_holds_action(&grant.grantor_authority_id, action) {
            return Some((
                TreatyRejectionCode::GrantorLacksPermission,
                format!(
                    "grantor {} no longer holds action '{action}'",
                    grant.grantor_authority_id
                ),
            ));
        }
        let valid_scope_types = constitution.valid_scope_types(action);
        for scope_type in grant.scope_constraints.keys() {
            if !valid_scope_types.contains(scope_type) {
                return Some((
                    TreatyRejectionCode::CoverageInflation,
                    format!("scope_type '{scope_type}' no longer valid for '{action}'"),
                ));
            }
        }
    }
    for (scope_type, zones) in &grant.scope_constraints {
        let constitutional: &[String] =
            zone_labels.get(scope_type).map(Vec::as_slice).unwrap_or(&[]);
        for zone in zones {
            if !constitutional.contains(zone) {
                return Some((
                    TreatyRejectionCode::ScopeCollapse,
                    format!("zone '{zone}' left the enumeration for '{scope_type}'"),
                ));
            }
        }
    }
    None
}
