//! Treaty admission pipelines
//!
//! Grants run authorization → schema validity → delegation preservation
//! (ten sub-checks, strict order). Revocations run authorization → schema
//! validity → revocation validity. Every gate decision emits a trace event;
//! the first failing gate stops that artifact.
//!
//! Delegation preservation is where the structural invariants live: closed
//! action set, no wildcards, authority closure, scope closure, depth ≤ 1,
//! acyclicity, density margin, duration bounds, and a final citation
//! re-check.

use crate::constitution::Constitution;
use crate::treaty::{
    effective_density, validate_grantee_identifier, ActiveTreatySet, DensityMetrics, TreatyGate,
    TreatyAdmissionEvent, TreatyAdmissionResult, TreatyGrant, TreatyRejectionCode,
    TreatyRevocation,
};

type GateVerdict = Result<(), (TreatyRejectionCode, String)>;

/// Runs treaty artifacts through the admission gates.
pub struct TreatyAdmissionPipeline<'a> {
    constitution: &'a Constitution,
    treaty_set: &'a ActiveTreatySet,
    cycle_index: u64,
}

impl<'a> TreatyAdmissionPipeline<'a> {
    pub fn new(
        constitution: &'a Constitution,
        treaty_set: &'a ActiveTreatySet,
        cycle_index: u64,
    ) -> Self {
        TreatyAdmissionPipeline {
            constitution,
            treaty_set,
            cycle_index,
        }
    }

    /// Evaluate grant candidates in the given order.
    pub fn evaluate_grants(
        &self,
        grants: &[TreatyGrant],
    ) -> (
        Vec<TreatyAdmissionResult>,
        Vec<TreatyAdmissionResult>,
        Vec<TreatyAdmissionEvent>,
    ) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        let mut all_events = Vec::new();

        for grant in grants {
            let result = self.evaluate_grant(grant);
            all_events.extend(result.events.iter().cloned());
            if result.admitted {
                admitted.push(result);
            } else {
                rejected.push(result);
            }
        }
        (admitted, rejected, all_events)
    }

    /// Evaluate revocation candidates in the given order.
    pub fn evaluate_revocations(
        &self,
        revocations: &[TreatyRevocation],
    ) -> (
        Vec<TreatyAdmissionResult>,
        Vec<TreatyAdmissionResult>,
        Vec<TreatyAdmissionEvent>,
    ) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        let mut all_events = Vec::new();

        for rev in revocations {
            let result = self.evaluate_revocation(rev);
            all_events.extend(result.events.iter().cloned());
            if result.admitted {
                admitted.push(result);
            } else {
                rejected.push(result);
            }
        }
        (admitted, rejected, all_events)
    }

    fn evaluate_grant(&self, grant: &TreatyGrant) -> TreatyAdmissionResult {
        let gates: [(TreatyGate, fn(&Self, &TreatyGrant) -> GateVerdict); 3] = [
            (TreatyGate::Authorization, Self::gate_6t_grant),
            (TreatyGate::SchemaValidity, Self::gate_7t_grant),
            (TreatyGate::DelegationPreservation, Self::gate_8c),
        ];

        let mut events = Vec::new();
        for (gate, gate_fn) in gates {
            match gate_fn(self, grant) {
                Ok(()) => events.push(pass_event(grant.id.as_str(), "TreatyGrant", gate)),
                Err((code, detail)) => {
                    events.push(fail_event(
                        grant.id.as_str(),
                        "TreatyGrant",
                        gate,
                        code,
                        &detail,
                    ));
                    return TreatyAdmissionResult {
                        artifact_id: grant.id.clone(),
                        artifact_type: "TreatyGrant".to_owned(),
                        admitted: false,
                        events,
                        failed_gate: gate.as_str().to_owned(),
                        rejection_code: code.as_str().to_owned(),
                        density: None,
                    };
                }
            }
        }

        TreatyAdmissionResult {
            artifact_id: grant.id.clone(),
            artifact_type: "TreatyGrant".to_owned(),
            admitted: true,
            events,
            failed_gate: String::new(),
            rejection_code: String::new(),
            density: Some(self.density_with(grant)),
        }
    }

    fn evaluate_revocation(&self, rev: &TreatyRevocation) -> TreatyAdmissionResult {
        let gates: [(TreatyGate, fn(&Self, &TreatyRevocation) -> GateVerdict); 3] = [
            (TreatyGate::Authorization, Self::gate_6t_revocation),
            (TreatyGate::SchemaValidity, Self::gate_7t_revocation),
            (TreatyGate::RevocationValidity, Self::gate_8r),
        ];

        let mut events = Vec::new();
        for (gate, gate_fn) in gates {
            match gate_fn(self, rev) {
                Ok(()) => events.push(pass_event(rev.id.as_str(), "TreatyRevocation", gate)),
                Err((code, detail)) => {
                    events.push(fail_event(
                        rev.id.as_str(),
                        "TreatyRevocation",
                        gate,
                        code,
                        &detail,
                    ));
                    return TreatyAdmissionResult {
                        artifact_id: rev.id.clone(),
                        artifact_type: "TreatyRevocation".to_owned(),
                        admitted: false,
                        events,
                        failed_gate: gate.as_str().to_owned(),
                        rejection_code: code.as_str().to_owned(),
                        density: None,
                    };
                }
            }
        }

        TreatyAdmissionResult {
            artifact_id: rev.id.clone(),
            artifact_type: "TreatyRevocation".to_owned(),
            admitted: true,
            events,
            failed_gate: String::new(),
            rejection_code: String::new(),
            density: None,
        }
    }

    fn density_with(&self, extra: &TreatyGrant) -> DensityMetrics {
        let mut active = self.treaty_set.active_grants(self.cycle_index);
        active.push(extra);
        effective_density(
            &self.constitution.action_permissions(),
            &active,
            self.constitution.action_types().len() as u64,
        )
    }

    // --- Gate 6T: Treaty Authorization ---------------------------------------

    fn gate_6t_grant(&self, grant: &TreatyGrant) -> GateVerdict {
        if !self.constitution.has_treaty_sections() {
            return Err((
                TreatyRejectionCode::TreatyPermissionMissing,
                "constitution lacks treaty sections".to_owned(),
            ));
        }
        if !self
            .constitution
            .is_constitutional_authority(&grant.grantor_authority_id)
        {
            return Err((
                TreatyRejectionCode::GrantorNotConstitutional,
                format!(
                    "grantor {} not in constitutional authorities",
                    grant.grantor_authority_id
                ),
            ));
        }
        if !self
            .constitution
            .authority_can_delegate_type(&grant.grantor_authority_id, "TreatyGrant")
        {
            return Err((
                TreatyRejectionCode::TreatyPermissionMissing,
                format!(
                    "grantor {} lacks TreatyGrant permission",
                    grant.grantor_authority_id
                ),
            ));
        }
        for citation in &grant.authority_citations {
            if self.constitution.resolve(citation).is_none() {
                return Err((
                    TreatyRejectionCode::AuthorityCitationInvalid,
                    format!("unresolvable citation: {citation}"),
                ));
            }
        }
        Ok(())
    }

    fn gate_6t_revocation(&self, rev: &TreatyRevocation) -> GateVerdict {
        if !self.constitution.has_treaty_sections() {
            return Err((
                TreatyRejectionCode::TreatyPermissionMissing,
                "constitution lacks treaty sections".to_owned(),
            ));
        }
        if !self
            .constitution
            .any_authority_can_delegate_type("TreatyRevocation")
        {
            return Err((
                TreatyRejectionCode::TreatyPermissionMissing,
                "no treaty_permission authorizes TreatyRevocation".to_owned(),
            ));
        }
        for citation in &rev.authority_citations {
            if self.constitution.resolve(citation).is_none() {
                return Err((
                    TreatyRejectionCode::AuthorityCitationInvalid,
                    format!("unresolvable citation: {citation}"),
                ));
            }
        }
        Ok(())
    }

    // --- Gate 7T: Schema Validity --------------------------------------------

    fn gate_7t_grant(&self, grant: &TreatyGrant) -> GateVerdict {
        let schema = |detail: &str| {
            Err((TreatyRejectionCode::SchemaInvalid, detail.to_owned()))
        };
        if grant.grantor_authority_id.is_empty() {
            return schema("missing grantor_authority_id");
        }
        if grant.grantee_identifier.is_empty() {
            return schema("missing grantee_identifier");
        }
        if grant.justification.is_empty() {
            return schema("missing justification");
        }
        if grant.authority_citations.is_empty() {
            return schema("missing authority_citations");
        }
        if grant.granted_actions.is_empty() {
            return schema("missing granted_actions");
        }
        if grant.scope_constraints.is_empty() {
            return schema("missing scope_constraints");
        }

        if !validate_grantee_identifier(&grant.grantee_identifier) {
            return Err((
                TreatyRejectionCode::InvalidField,
                format!(
                    "grantee_identifier format invalid: {}",
                    grant.grantee_identifier
                ),
            ));
        }

        // scope_constraints: legal scope_types mapping to non-empty zone
        // lists. (String-typed zones are enforced by construction.)
        let valid_scope_types = self.constitution.zone_labels();
        for (scope_type, zones) in &grant.scope_constraints {
            if !valid_scope_types.contains_key(scope_type) {
                return Err((
                    TreatyRejectionCode::InvalidField,
                    format!("scope_constraints key '{scope_type}' not a valid scope_type"),
                ));
            }
            if zones.is_empty() {
                return Err((
                    TreatyRejectionCode::InvalidField,
                    format!("scope_constraints['{scope_type}'] must be non-empty"),
                ));
            }
        }
        Ok(())
    }

    fn gate_7t_revocation(&self, rev: &TreatyRevocation) -> GateVerdict {
        if rev.grant_id.is_empty() {
            return Err((
                TreatyRejectionCode::SchemaInvalid,
                "missing grant_id".to_owned(),
            ));
        }
        if rev.authority_citations.is_empty() {
            return Err((
                TreatyRejectionCode::SchemaInvalid,
                "missing authority_citations".to_owned(),
            ));
        }
        if rev.justification.is_empty() {
            return Err((
                TreatyRejectionCode::SchemaInvalid,
                "missing justification".to_owned(),
            ));
        }
        Ok(())
    }

    // --- Gate 8C: Delegation Preservation ------------------------------------

    fn gate_8c(&self, grant: &TreatyGrant) -> GateVerdict {
        self.c1_closed_action_set(grant)?;
        self.c2_wildcard_prohibition(grant)?;
        self.c3_grantor_holds_permission(grant)?;
        self.c4_scope_monotonicity(grant)?;
        self.c5_coverage_monotonicity(grant)?;
        self.c6_delegation_depth(grant)?;
        self.c7_acyclicity(grant)?;
        self.c8_density_margin(grant)?;
        self.c9_duration_validity(grant)?;
        self.c10_citation_validity(grant)?;
        Ok(())
    }

    /// 8C.1 granted_actions ⊆ closed action set.
    fn c1_closed_action_set(&self, grant: &TreatyGrant) -> GateVerdict {
        let closed = self.constitution.action_types();
        for action in &grant.granted_actions {
            if !closed.contains(action) {
                return Err((
                    TreatyRejectionCode::InvalidField,
                    format!("action '{action}' not in closed action set"),
                ));
            }
        }
        Ok(())
    }

    /// 8C.2 no wildcard characters anywhere.
    fn c2_wildcard_prohibition(&self, grant: &TreatyGrant) -> GateVerdict {
        let wild = |detail: String| Err((TreatyRejectionCode::WildcardMapping, detail));
        for action in &grant.granted_actions {
            if action.contains('*') {
                return wild(format!("wildcard in granted_actions: '{action}'"));
            }
        }
        for (scope_type, zones) in &grant.scope_constraints {
            if scope_type.contains('*') {
                return wild(format!("wildcard in scope_constraints key: '{scope_type}'"));
            }
            for zone in zones {
                if zone.contains('*') {
                    return wild(format!("wildcard in scope_constraints zone: '{zone}'"));
                }
            }
        }
        if grant.grantor_authority_id.contains('*') {
            return wild("wildcard grantor_authority_id".to_owned());
        }
        if grant.grantee_identifier.contains('*') {
            return wild("wildcard grantee_identifier".to_owned());
        }
        Ok(())
    }

    /// 8C.3 grantor constitutionally holds each granted action.
    fn c3_grantor_holds_permission(&self, grant: &TreatyGrant) -> GateVerdict {
        for action in &grant.granted_actions {
            if !self
                .constitution
                .authority_holds_action(&grant.grantor_authority_id, action)
            {
                return Err((
                    TreatyRejectionCode::GrantorLacksPermission,
                    format!(
                        "grantor {} lacks permission for action '{action}'",
                        grant.grantor_authority_id
                    ),
                ));
            }
        }
        Ok(())
    }

    /// 8C.4 per scope_type, zones ⊆ the constitutional zone enumeration.
    fn c4_scope_monotonicity(&self, grant: &TreatyGrant) -> GateVerdict {
        let zone_labels = self.constitution.zone_labels();
        for (scope_type, zones) in &grant.scope_constraints {
            let constitutional: &[String] = zone_labels
                .get(scope_type)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for zone in zones {
                if !constitutional.contains(zone) {
                    return Err((
                        TreatyRejectionCode::ScopeCollapse,
                        format!(
                            "zone '{zone}' not in scope enumerations for scope_type '{scope_type}'"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 8C.5 every grant scope_type is valid for every granted action.
    fn c5_coverage_monotonicity(&self, grant: &TreatyGrant) -> GateVerdict {
        for action in &grant.granted_actions {
            let valid = self.constitution.valid_scope_types(action);
            for scope_type in grant.scope_constraints.keys() {
                if !valid.contains(scope_type) {
                    return Err((
                        TreatyRejectionCode::CoverageInflation,
                        format!("scope_type '{scope_type}' not valid for action '{action}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 8C.6 a grantor that is itself a current grantee cannot delegate.
    fn c6_delegation_depth(&self, grant: &TreatyGrant) -> GateVerdict {
        if self
            .treaty_set
            .is_grantee(&grant.grantor_authority_id, self.cycle_index)
        {
            return Err((
                TreatyRejectionCode::ExcessiveDepth,
                format!(
                    "grantor {} is a treaty grantee (depth > {})",
                    grant.grantor_authority_id,
                    self.constitution.delegation_depth_limit()
                ),
            ));
        }
        Ok(())
    }

    /// 8C.7 adding the grant must not close a delegation cycle.
    fn c7_acyclicity(&self, grant: &TreatyGrant) -> GateVerdict {
        if self.treaty_set.would_create_cycle(grant, self.cycle_index) {
            return Err((
                TreatyRejectionCode::DelegationCycle,
                format!(
                    "cycle detected: {} → {}",
                    grant.grantor_authority_id, grant.grantee_identifier
                ),
            ));
        }
        Ok(())
    }

    /// 8C.8 effective density after addition: finite, not 1.0, within bound.
    fn c8_density_margin(&self, grant: &TreatyGrant) -> GateVerdict {
        let metrics = self.density_with(grant);
        if metrics.a_eff == 0 || metrics.b == 0 {
            return Err((
                TreatyRejectionCode::DensityMarginViolation,
                format!("A_eff*B == 0 (A_eff={}, B={})", metrics.a_eff, metrics.b),
            ));
        }
        if metrics.density == 1.0 {
            return Err((
                TreatyRejectionCode::DensityMarginViolation,
                "effective density == 1.0 (forbidden)".to_owned(),
            ));
        }
        if let Some(bound) = self.constitution.density_upper_bound() {
            if metrics.density > bound {
                return Err((
                    TreatyRejectionCode::DensityMarginViolation,
                    format!("effective density {:.4} exceeds bound {bound}", metrics.density),
                ));
            }
        }
        Ok(())
    }

    /// 8C.9 duration within [1, max_treaty_duration_cycles].
    fn c9_duration_validity(&self, grant: &TreatyGrant) -> GateVerdict {
        if grant.duration_cycles < 1 {
            return Err((
                TreatyRejectionCode::InvalidField,
                format!("duration_cycles={} < 1", grant.duration_cycles),
            ));
        }
        let max = self.constitution.max_treaty_duration_cycles();
        if grant.duration_cycles > max {
            return Err((
                TreatyRejectionCode::InvalidField,
                format!("duration_cycles={} exceeds max {max}", grant.duration_cycles),
            ));
        }
        Ok(())
    }

    /// 8C.10 explicit citation re-check (complements 6T).
    fn c10_citation_validity(&self, grant: &TreatyGrant) -> GateVerdict {
        for citation in &grant.authority_citations {
            if self.constitution.resolve(citation).is_none() {
                return Err((
                    TreatyRejectionCode::AuthorityCitationInvalid,
                    format!("unresolvable citation: {citation}"),
                ));
            }
        }
        Ok(())
    }

    // --- Gate 8R: Revocation Validity ----------------------------------------

    fn gate_8r(&self, rev: &TreatyRevocation) -> GateVerdict {
        let Some(grant) = self.treaty_set.find_grant(&rev.grant_id) else {
            return Err((
                TreatyRejectionCode::GrantNotFound,
                format!("grant_id {} not found in treaty set", rev.grant_id),
            ));
        };
        if !grant.revocable {
            return Err((
                TreatyRejectionCode::NonrevocableGrant,
                format!("grant {} is not revocable", rev.grant_id),
            ));
        }
        if self.treaty_set.revoked_grant_ids.contains(&rev.grant_id) {
            return Err((
                TreatyRejectionCode::GrantNotFound,
                format!("grant {} already revoked", rev.grant_id),
            ));
        }
        Ok(())
    }
}

fn pass_event(artifact_id: &str, artifact_type: &str, gate: TreatyGate) -> TreatyAdmissionEvent {
    TreatyAdmissionEvent {
        artifact_id: artifact_id.to_owned(),
        artifact_type: artifact_type.to_owned(),
        gate: gate.as_str().to_owned(),
        result: "pass".to_owned(),
        reason_code: String::new(),
        detail: String::new(),
    }
}

fn fail_event(
    artifact_id: &str,
    artifact_type: &str,
    gate: TreatyGate,
    code: TreatyRejectionCode,
    detail: &str,
) -> TreatyAdmissionEvent {
    TreatyAdmissionEvent {
        artifact_id: artifact_id.to_owned(),
        artifact_type: artifact_type.to_owned(),
        gate: gate.as_str().to_owned(),
        result: "fail".to_owned(),
        reason_code: code.as_str().to_owned(),
        detail: detail.to_owned(),
    }
}
