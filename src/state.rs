//! Replayable internal state and typed state deltas
//!
//! The host owns the state; the kernel receives an immutable snapshot (or
//! takes it by value in the topological core) and describes updates through
//! typed deltas. Every field here is replayable from the log stream.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::artifacts::DecisionType;
use crate::treaty::ActiveTreatySet;

/// A queued amendment awaiting its cooling period.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingAmendment {
    pub proposal_id: String,
    pub prior_constitution_hash: String,
    pub proposed_constitution_hash: String,
    pub proposal_cycle: u64,
}

impl PendingAmendment {
    pub fn to_value(&self) -> Value {
        json!({
            "proposal_id": self.proposal_id,
            "prior_constitution_hash": self.prior_constitution_hash,
            "proposed_constitution_hash": self.proposed_constitution_hash,
            "proposal_cycle": self.proposal_cycle,
        })
    }
}

/// Full internal state across all policy layers.
#[derive(Clone, Debug, Default)]
pub struct InternalState {
    pub cycle_index: u64,
    pub last_decision: Option<DecisionType>,
    pub decision_type_history: Vec<String>,
    pub active_constitution_hash: String,
    pub pending_amendments: Vec<PendingAmendment>,
    pub treaty_set: ActiveTreatySet,

    // Sovereign identity.
    pub sovereign_public_key_active: String,
    pub prior_sovereign_public_key: Option<String>,
    pub pending_successor_key: Option<String>,

    // Lineage chain.
    pub identity_chain_length: u64,
    pub identity_chain_tip_hash: String,
    pub historical_sovereign_keys: BTreeSet<String>,

    pub overlay_hash: String,
}

impl InternalState {
    /// Successor state for the next cycle (pure).
    pub fn advance(&self, decision_type: DecisionType) -> InternalState {
        let mut next = self.clone();
        next.cycle_index = self.cycle_index + 1;
        next.last_decision = Some(decision_type);
        next.decision_type_history
            .push(decision_type.as_str().to_owned());
        next
    }

    pub fn to_value(&self) -> Value {
        json!({
            "cycle_index": self.cycle_index,
            "last_decision": self.last_decision.map_or("NONE", DecisionType::as_str),
            "decision_type_history": self.decision_type_history,
            "active_constitution_hash": self.active_constitution_hash,
            "pending_amendments": self.pending_amendments.iter().map(PendingAmendment::to_value).collect::<Vec<_>>(),
            "active_treaty_set": self.treaty_set.to_value(),
            "sovereign_public_key_active": self.sovereign_public_key_active,
            "prior_sovereign_public_key": self.prior_sovereign_public_key,
            "pending_successor_key": self.pending_successor_key,
            "identity_chain_length": self.identity_chain_length,
            "identity_chain_tip_hash": self.identity_chain_tip_hash,
            "historical_sovereign_keys": self.historical_sovereign_keys,
            "overlay_hash": self.overlay_hash,
        })
    }
}

/// Typed descriptor for how the host must update internal state after a
/// governance decision.
#[derive(Clone, Debug, PartialEq)]
pub enum StateDelta {
    /// A new amendment entered the pending queue.
    QueueAmendment { pending: PendingAmendment },
    /// A cooled amendment was adopted; the constitution hash advances and
    /// stale pending proposals are invalidated.
    AdoptAmendment {
        adoption_record: Value,
        new_constitution_hash: String,
        effective_cycle: u64,
        invalidated_proposals: Vec<String>,
        remaining_pending: Vec<PendingAmendment>,
    },
}

impl StateDelta {
    pub fn to_value(&self) -> Value {
        match self {
            StateDelta::QueueAmendment { pending } => json!({
                "delta_type": "queue_amendment",
                "payload": { "pending_amendment": pending.to_value() },
            }),
            StateDelta::AdoptAmendment {
                adoption_record,
                new_constitution_hash,
                effective_cycle,
                invalidated_proposals,
                remaining_pending,
            } => json!({
                "delta_type": "adopt_amendment",
                "payload": {
                    "adoption_record": adoption_record,
                    "new_constitution_hash": new_constitution_hash,
                    "effective_cycle": effective_cycle,
                    "invalidated_proposals": invalidated_proposals,
                    "remaining_pending": remaining_pending.iter().map(PendingAmendment::to_value).collect::<Vec<_>>(),
                },
            }),
        }
    }

    /// Apply this delta to a state snapshot, producing the successor state.
    /// Idempotent: applying the same delta twice is a no-op the second time.
    pub fn apply(&self, state: &InternalState) -> InternalState {
        let mut next = state.clone();
        match self {
            StateDelta::QueueAmendment { pending } => {
                if !next
                    .pending_amendments
                    .iter()
                    .any(|p| p.proposal_id == pending.proposal_id)
                {
                    next.pending_amendments.push(pending.clone());
                }
            }
            StateDelta::AdoptAmendment {
                new_constitution_hash,
                remaining_pending,
                ..
            } => {
                next.active_constitution_hash = new_constitution_hash.clone();
                next.pending_amendments = remaining_pending.clone();
            }
        }
        next
    }
}
