//! Succession overlay and the effective constitution frame
//!
//! The overlay is an auxiliary frozen document carrying the succession,
//! ratification, and suspension clauses. It never modifies the base
//! constitution; clauses are citable as `overlay:<overlay_hash>#<clause_id>`.
//!
//! [`EffectiveFrame`] is the unified view the layered policy core works
//! against: base-constitution accessors plus overlay clause lookups. A frame
//! without an overlay behaves like the treaty-layer constitution alone
//! (succession disabled, no overlay citations).

use serde_json::Value;

use crate::canonical::CanonError;
use crate::constitution::{AdmissionConstitution, Constitution, KernelConstitution};
use crate::hashing::content_hash;

/// Frozen succession overlay document.
#[derive(Clone, Debug)]
pub struct Overlay {
    data: Value,
    hash: String,
}

impl Overlay {
    pub fn new(data: Value) -> Result<Self, CanonError> {
        let hash = content_hash(&data)?;
        Ok(Overlay { data, hash })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    fn clause(&self, clause_id: &str) -> Option<&Value> {
        self.data.pointer(&format!("/clauses/{clause_id}"))
    }

    fn clause_bool(&self, clause_id: &str, key: &str, default: bool) -> bool {
        self.clause(clause_id)
            .and_then(|c| c.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn citation(&self, clause_id: &str) -> String {
        format!("overlay:{}#{}", self.hash, clause_id)
    }

    /// Resolve `overlay:<hash>#<clause_id>`. A non-matching hash fails.
    pub fn resolve(&self, citation: &str) -> Option<Value> {
        let rest = citation.strip_prefix("overlay:")?;
        let (cite_hash, clause_id) = rest.split_once('#')?;
        if !cite_hash.is_empty() && cite_hash != self.hash {
            return None;
        }
        self.clause(clause_id).cloned()
    }
}

/// Unified constitution + overlay view for the layered policy core.
#[derive(Clone, Copy, Debug)]
pub struct EffectiveFrame<'a> {
    pub constitution: &'a Constitution,
    pub overlay: Option<&'a Overlay>,
}

impl<'a> EffectiveFrame<'a> {
    pub fn new(constitution: &'a Constitution, overlay: Option<&'a Overlay>) -> Self {
        EffectiveFrame {
            constitution,
            overlay,
        }
    }

    /// Overlay hash, empty when no overlay is mounted.
    pub fn overlay_hash(&self) -> &str {
        self.overlay.map_or("", |o| o.hash())
    }

    pub fn is_succession_enabled(&self) -> bool {
        self.overlay
            .map(|o| o.clause_bool("CL-SUCCESSION-ENABLED", "enabled", false))
            .unwrap_or(false)
    }

    pub fn is_treaty_suspension_on_succession(&self) -> bool {
        self.overlay
            .map(|o| o.clause_bool("CL-TREATY-SUSPENSION-ON-SUCCESSION", "enabled", true))
            .unwrap_or(true)
    }

    pub fn is_suspension_blocks_grants(&self) -> bool {
        self.overlay
            .map(|o| o.clause_bool("CL-SUSPENSION-BLOCKS-GRANTS", "enabled", true))
            .unwrap_or(true)
    }
}

impl AdmissionConstitution for EffectiveFrame<'_> {
    fn action_type_def(&self, action_type: &str) -> Option<Value> {
        self.constitution.get_action_type_def(action_type)
    }
    fn allowed_action_types(&self) -> Vec<String> {
        self.constitution.action_types()
    }
    fn read_paths(&self) -> Vec<String> {
        self.constitution.get_read_paths()
    }
    fn write_paths(&self) -> Vec<String> {
        self.constitution.get_write_paths()
    }
    fn network_enabled(&self) -> bool {
        self.constitution.is_network_enabled()
    }
    fn resolve_citation(&self, citation: &str) -> Option<Value> {
        if citation.starts_with("overlay:") {
            return self.overlay.and_then(|o| o.resolve(citation));
        }
        self.constitution.resolve(citation)
    }
}

impl KernelConstitution for EffectiveFrame<'_> {
    fn sha256(&self) -> &str {
        self.constitution.hash()
    }
    fn version(&self) -> &str {
        self.constitution.version_str()
    }
    fn max_total_tokens_per_cycle(&self) -> u64 {
        self.constitution.max_tokens_per_cycle()
    }
    fn make_citation(&self, node_id: &str) -> String {
        self.constitution.citation(node_id)
    }
    fn make_authority_citation(&self, auth_id: &str) -> String {
        self.constitution.authority_citation(auth_id)
    }
}
