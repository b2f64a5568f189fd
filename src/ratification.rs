//! Treaty ratification after sovereign succession
//!
//! Rotation suspends every active grant; the new sovereign then disposes of
//! each suspended treaty with a signed ratification: `ratify = true`
//! restores the grant, `ratify = false` revokes it. Evaluation runs gates
//! R0–R4 and applies each admitted ratification immediately, so later
//! ratifications in the same cycle see the updated density.

use serde_json::{json, Value};

use crate::artifacts::Author;
use crate::canonical::CanonError;
use crate::hashing::{content_hash, strip_fields};
use crate::signature::verify_payload;
use crate::treaty::{effective_density, ActiveTreatySet};

// ---------------------------------------------------------------------------
// Rejection codes and gates
// ---------------------------------------------------------------------------

/// Rejection codes for the ratification pipeline (closed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatificationRejectionCode {
    SchemaInvalid,
    InvalidField,
    SignatureInvalid,
    TreatyNotSuspended,
    DensityMarginViolation,
    PriorKeyPrivilegeLeak,
}

impl RatificationRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RatificationRejectionCode::SchemaInvalid => "SCHEMA_INVALID",
            RatificationRejectionCode::InvalidField => "INVALID_FIELD",
            RatificationRejectionCode::SignatureInvalid => "SIGNATURE_INVALID",
            RatificationRejectionCode::TreatyNotSuspended => "TREATY_NOT_SUSPENDED",
            RatificationRejectionCode::DensityMarginViolation => "DENSITY_MARGIN_VIOLATION",
            RatificationRejectionCode::PriorKeyPrivilegeLeak => "PRIOR_KEY_PRIVILEGE_LEAK",
        }
    }
}

/// Gate labels R0–R4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatificationGate {
    R0Schema,
    R1Completeness,
    R2Signature,
    R3TreatySuspended,
    R4Density,
}

impl RatificationGate {
    pub fn as_str(self) -> &'static str {
        match self {
            RatificationGate::R0Schema => "r0_schema",
            RatificationGate::R1Completeness => "r1_completeness",
            RatificationGate::R2Signature => "r2_signature",
            RatificationGate::R3TreatySuspended => "r3_treaty_suspended",
            RatificationGate::R4Density => "r4_density",
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// Sovereign disposition of a suspended treaty.
#[derive(Clone, Debug, PartialEq)]
pub struct TreatyRatification {
    pub treaty_id: String,
    pub ratify: bool,
    pub signature: String,
    pub authority_citations: Vec<String>,
    pub justification: String,
    pub author: String,
    pub created_at: String,
    pub id: String,
}

impl TreatyRatification {
    pub fn new(
        treaty_id: &str,
        ratify: bool,
        signature: &str,
        mut authority_citations: Vec<String>,
        justification: &str,
        created_at: &str,
    ) -> Result<Self, CanonError> {
        authority_citations.sort();
        let mut r = TreatyRatification {
            treaty_id: treaty_id.to_owned(),
            ratify,
            signature: signature.to_owned(),
            authority_citations,
            justification: justification.to_owned(),
            author: Author::Reflection.as_str().to_owned(),
            created_at: created_at.to_owned(),
            id: String::new(),
        };
        r.id = content_hash(&strip_fields(&r.to_value_id(), &["id"]))?;
        Ok(r)
    }

    pub fn to_value_full(&self) -> Value {
        let mut v = self.to_value_id();
        v["signature"] = json!(self.signature);
        v
    }

    /// Identity excludes the signature.
    pub fn to_value_id(&self) -> Value {
        json!({
            "type": "TreatyRatification",
            "treaty_id": self.treaty_id,
            "ratify": self.ratify,
            "authority_citations": self.authority_citations,
            "justification": self.justification,
            "author": self.author,
            "created_at": self.created_at,
            "id": self.id,
        })
    }

    /// Payload the sovereign signs: signature and id excluded.
    pub fn signing_payload(&self) -> Value {
        strip_fields(&self.to_value_id(), &["id"])
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Admission record for one ratification.
#[derive(Clone, Debug)]
pub struct RatificationAdmissionRecord {
    pub ratification_id: String,
    pub treaty_id: String,
    pub ratify: bool,
    pub admitted: bool,
    pub events: Vec<Value>,
    pub failed_gate: String,
    pub rejection_code: String,
}

impl RatificationAdmissionRecord {
    pub fn to_value(&self) -> Value {
        json!({
            "ratification_id": self.ratification_id,
            "treaty_id": self.treaty_id,
            "ratify": self.ratify,
            "admitted": self.admitted,
            "events": self.events,
            "failed_gate": self.failed_gate,
            "rejection_code": self.rejection_code,
        })
    }
}

/// Compact record for a rejected ratification.
#[derive(Clone, Debug, PartialEq)]
pub struct RatificationRejectionRecord {
    pub ratification_id: String,
    pub treaty_id: String,
    pub rejection_code: String,
    pub failed_gate: String,
}

impl RatificationRejectionRecord {
    pub fn to_value(&self) -> Value {
        json!({
            "ratification_id": self.ratification_id,
            "treaty_id": self.treaty_id,
            "rejection_code": self.rejection_code,
            "failed_gate": self.failed_gate,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Context for ratification evaluation.
pub struct RatificationContext<'a> {
    pub sovereign_public_key_active: &'a str,
    pub prior_sovereign_public_key: Option<&'a str>,
    pub density_upper_bound: Option<f64>,
    pub action_permissions: Vec<Value>,
    pub action_type_count: u64,
    pub current_cycle: u64,
}

/// Evaluate ratifications sequentially, applying each admitted one to the
/// treaty set so later ratifications see updated suspension and density
/// state. Returns (admissions, rejections).
pub fn evaluate(
    ratifications: &[TreatyRatification],
    ctx: &RatificationContext<'_>,
    treaty_set: &mut ActiveTreatySet,
) -> (
    Vec<RatificationAdmissionRecord>,
    Vec<RatificationRejectionRecord>,
) {
    let mut admissions = Vec::new();
    let mut rejections = Vec::new();

    for rat in ratifications {
        let record = evaluate_single(rat, ctx, treaty_set);
        if record.admitted {
            if rat.ratify {
                treaty_set.ratify(&rat.treaty_id);
            } else {
                treaty_set.reject_ratification(&rat.treaty_id);
            }
            admissions.push(record);
        } else {
            rejections.push(RatificationRejectionRecord {
                ratification_id: record.ratification_id,
                treaty_id: record.treaty_id,
                rejection_code: record.rejection_code,
                failed_gate: record.failed_gate,
            });
        }
    }
    (admissions, rejections)
}

fn evaluate_single(
    rat: &TreatyRatification,
    ctx: &RatificationContext<'_>,
    treaty_set: &ActiveTreatySet,
) -> RatificationAdmissionRecord {
    let mut events: Vec<Value> = Vec::new();
    let reject = |gate: RatificationGate,
                  code: RatificationRejectionCode,
                  mut events: Vec<Value>| {
        events.push(json!({
            "gate": gate.as_str(),
            "result": "fail",
            "code": code.as_str(),
        }));
        RatificationAdmissionRecord {
            ratification_id: rat.id.clone(),
            treaty_id: rat.treaty_id.clone(),
            ratify: rat.ratify,
            admitted: false,
            events,
            failed_gate: gate.as_str().to_owned(),
            rejection_code: code.as_str().to_owned(),
        }
    };
    let pass = |gate: RatificationGate, events: &mut Vec<Value>| {
        events.push(json!({"gate": gate.as_str(), "result": "pass"}));
    };

    // R0: schema shape. Field types are enforced by construction here; the
    // gate is retained so wire-level loaders report the same code path.
    pass(RatificationGate::R0Schema, &mut events);

    // R1: completeness.
    if rat.treaty_id.is_empty() || rat.signature.is_empty() {
        return reject(
            RatificationGate::R1Completeness,
            RatificationRejectionCode::InvalidField,
            events,
        );
    }
    pass(RatificationGate::R1Completeness, &mut events);

    // R2: signature under the active sovereign. A signature that fails under
    // the active key but verifies under the *prior* key is a privilege leak,
    // not a plain invalid signature.
    match verify_payload(
        ctx.sovereign_public_key_active,
        &rat.signing_payload(),
        &rat.signature,
    ) {
        Ok(()) => pass(RatificationGate::R2Signature, &mut events),
        Err(_) => {
            let signed_by_prior = ctx.prior_sovereign_public_key.is_some_and(|prior| {
                verify_payload(prior, &rat.signing_payload(), &rat.signature).is_ok()
            });
            let code = if signed_by_prior {
                RatificationRejectionCode::PriorKeyPrivilegeLeak
            } else {
                RatificationRejectionCode::SignatureInvalid
            };
            return reject(RatificationGate::R2Signature, code, events);
        }
    }

    // R3: treaty exists and is suspended.
    let grant = match treaty_set.find_grant(&rat.treaty_id) {
        Some(g) if treaty_set.suspended_grant_ids.contains(&rat.treaty_id) => g.clone(),
        _ => {
            return reject(
                RatificationGate::R3TreatySuspended,
                RatificationRejectionCode::TreatyNotSuspended,
                events,
            );
        }
    };
    pass(RatificationGate::R3TreatySuspended, &mut events);

    // R4: density after a simulated restoration (ratify=true only).
    if rat.ratify {
        let mut simulated = treaty_set.active_grants(ctx.current_cycle);
        simulated.push(&grant);
        let metrics = effective_density(
            &ctx.action_permissions,
            &simulated,
            ctx.action_type_count,
        );
        let over_bound = ctx
            .density_upper_bound
            .is_some_and(|b| metrics.density >= b);
        if over_bound || metrics.density == 1.0 {
            return reject(
                RatificationGate::R4Density,
                RatificationRejectionCode::DensityMarginViolation,
                events,
            );
        }
    }
    pass(RatificationGate::R4Density, &mut events);

    RatificationAdmissionRecord {
        ratification_id: rat.id.clone(),
        treaty_id: rat.treaty_id.clone(),
        ratify: rat.ratify,
        admitted: true,
        events,
        failed_gate: String::new(),
        rejection_code: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::signature::sign_payload;

    fn suspended_set() -> (crate::constitution::Constitution, ActiveTreatySet, String) {
        let c = fixtures::constitution();
        let mut set = ActiveTreatySet::default();
        let mut g = fixtures::notify_grant(&c, 1, 8);
        g.grant_cycle = Some(0);
        let gid = g.id.clone();
        set.add_grant(g);
        set.suspend_all_active(0);
        (c, set, gid)
    }

    fn ctx<'a>(c: &crate::constitution::Constitution, active: &'a str) -> RatificationContext<'a> {
        RatificationContext {
            sovereign_public_key_active: active,
            prior_sovereign_public_key: None,
            density_upper_bound: c.density_upper_bound(),
            action_permissions: c.action_permissions(),
            action_type_count: c.action_types().len() as u64,
            current_cycle: 1,
        }
    }

    #[test]
    fn ratify_true_restores_the_grant() {
        let (c, mut set, gid) = suspended_set();
        let (k0, k0_id) = fixtures::sovereign_keypair(0);
        let rat = fixtures::signed_ratification(&gid, true, &k0);
        let context = ctx(&c, &k0_id);
        let (admitted, rejected) = evaluate(&[rat], &context, &mut set);
        assert_eq!(admitted.len(), 1, "rejected: {rejected:?}");
        assert!(!set.has_suspensions());
        assert_eq!(set.active_grants(1).len(), 1);
    }

    #[test]
    fn ratify_false_revokes_the_grant() {
        let (c, mut set, gid) = suspended_set();
        let (k0, k0_id) = fixtures::sovereign_keypair(0);
        let rat = fixtures::signed_ratification(&gid, false, &k0);
        let context = ctx(&c, &k0_id);
        let (admitted, _) = evaluate(&[rat], &context, &mut set);
        assert_eq!(admitted.len(), 1);
        assert!(set.revoked_grant_ids.contains(&gid));
        assert!(set.active_grants(1).is_empty());
    }

    #[test]
    fn non_suspended_treaty_fails_r3() {
        let c = fixtures::constitution();
        let mut set = ActiveTreatySet::default();
        let (k0, k0_id) = fixtures::sovereign_keypair(0);
        let rat = fixtures::signed_ratification("missing-grant", true, &k0);
        let context = ctx(&c, &k0_id);
        let (_, rejected) = evaluate(&[rat], &context, &mut set);
        assert_eq!(rejected[0].rejection_code, "TREATY_NOT_SUSPENDED");
        assert_eq!(rejected[0].failed_gate, "r3_treaty_suspended");
    }

    #[test]
    fn prior_key_ratification_is_a_privilege_leak_at_r2() {
        let (c, mut set, gid) = suspended_set();
        let (k0, k0_id) = fixtures::sovereign_keypair(0);
        let (_, k1_id) = fixtures::sovereign_keypair(1);
        // Sovereignty has rotated to K1; K0 tries to ratify anyway.
        let rat = fixtures::signed_ratification(&gid, true, &k0);
        let context = RatificationContext {
            sovereign_public_key_active: &k1_id,
            prior_sovereign_public_key: Some(&k0_id),
            density_upper_bound: c.density_upper_bound(),
            action_permissions: c.action_permissions(),
            action_type_count: c.action_types().len() as u64,
            current_cycle: 1,
        };
        let (_, rejected) = evaluate(&[rat], &context, &mut set);
        assert_eq!(rejected[0].failed_gate, "r2_signature");
        assert_eq!(rejected[0].rejection_code, "PRIOR_KEY_PRIVILEGE_LEAK");
    }

    #[test]
    fn tampered_signature_fails_r2() {
        let (c, mut set, gid) = suspended_set();
        let (k0, k0_id) = fixtures::sovereign_keypair(0);
        let mut rat = fixtures::signed_ratification(&gid, true, &k0);
        rat.signature = sign_payload(&k0, &serde_json::json!({"other": 1})).unwrap();
        let context = ctx(&c, &k0_id);
        let (_, rejected) = evaluate(&[rat], &context, &mut set);
        assert_eq!(rejected[0].rejection_code, "SIGNATURE_INVALID");
    }
}
