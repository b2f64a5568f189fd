//! Hash-verified constitution store and citation index
//!
//! The constitution is a YAML document whose identity is the SHA-256 of its
//! canonicalized bytes: CRLF normalized to LF, trailing whitespace stripped
//! per line, tabs and invalid UTF-8 rejected outright. A `.sha256` sidecar,
//! when present, must agree with the computed hash.
//!
//! Three citation namespaces resolve against a loaded constitution:
//!
//! - `constitution:<hash>#<id>` — first object in pre-order carrying that
//!   `id` field (a global id index is built once at load);
//! - `constitution:<hash>@/json/pointer` — structural path walk, numeric
//!   segments index arrays;
//! - `authority:<hash>#AUTH_<name>` — the AuthorityModel table.
//!
//! Legacy `constitution:v<version>…` citations are accepted for backward
//! compatibility.
//!
//! The store is immutable once loaded. Accessors for the amendment, treaty,
//! and scope sections live here as well; the succession overlay is layered
//! on top by [`crate::overlay::EffectiveFrame`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::hashing::sha256_hex;

/// Failure to load or verify a constitution.
#[derive(Debug, Error)]
pub enum ConstitutionError {
    #[error("constitution is not valid UTF-8")]
    InvalidUtf8,
    #[error("constitution contains tab characters (forbidden)")]
    TabsForbidden,
    #[error("constitution hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("constitution YAML root must be a mapping")]
    RootNotMapping,
    #[error("constitution YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("constitution read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Canonical form of constitution bytes: CRLF → LF, trailing whitespace
/// stripped per line. Tabs and invalid UTF-8 are rejected, not normalized.
pub fn canonicalize_constitution_bytes(raw: &[u8]) -> Result<Vec<u8>, ConstitutionError> {
    let text = std::str::from_utf8(raw).map_err(|_| ConstitutionError::InvalidUtf8)?;
    if text.contains('\t') {
        return Err(ConstitutionError::TabsForbidden);
    }
    let text = text.replace("\r\n", "\n");
    let lines: Vec<&str> = text.split('\n').map(str::trim_end).collect();
    Ok(lines.join("\n").into_bytes())
}

/// SHA-256 hex of canonicalized constitution bytes.
pub fn constitution_hash(raw: &[u8]) -> Result<String, ConstitutionError> {
    Ok(sha256_hex(&canonicalize_constitution_bytes(raw)?))
}

// ---------------------------------------------------------------------------
// Capability trait for the admission pipeline
// ---------------------------------------------------------------------------

/// The narrow constitution surface the candidate admission pipeline needs.
///
/// Both [`Constitution`] and [`crate::overlay::EffectiveFrame`] implement
/// this, so the pipeline never cares which layer's view it was handed.
pub trait AdmissionConstitution {
    fn action_type_def(&self, action_type: &str) -> Option<Value>;
    fn allowed_action_types(&self) -> Vec<String>;
    fn read_paths(&self) -> Vec<String>;
    fn write_paths(&self) -> Vec<String>;
    fn network_enabled(&self) -> bool;
    fn resolve_citation(&self, citation: &str) -> Option<Value>;
}

/// The wider surface the policy cores need on top of admission checks.
pub trait KernelConstitution: AdmissionConstitution {
    fn sha256(&self) -> &str;
    fn version(&self) -> &str;
    fn max_total_tokens_per_cycle(&self) -> u64;
    /// Hash-based clause citation for a node id.
    fn make_citation(&self, node_id: &str) -> String;
    /// Hash-based authority citation.
    fn make_authority_citation(&self, auth_id: &str) -> String;
}

// ---------------------------------------------------------------------------
// Constitution
// ---------------------------------------------------------------------------

/// Immutable, hash-verified constitution view.
#[derive(Clone, Debug)]
pub struct Constitution {
    data: Value,
    canonical: Vec<u8>,
    sha256: String,
    version: String,
    /// id -> JSON pointer into `data`. First occurrence in pre-order wins.
    id_index: BTreeMap<String, String>,
    authorities: BTreeSet<String>,
}

impl Constitution {
    /// Load from a YAML string. `expected_hash`, when given, must match the
    /// canonical-bytes hash (used when validating proposed constitutions).
    pub fn from_yaml_str(
        yaml: &str,
        expected_hash: Option<&str>,
    ) -> Result<Self, ConstitutionError> {
        let canonical = canonicalize_constitution_bytes(yaml.as_bytes())?;
        let sha256 = sha256_hex(&canonical);
        if let Some(expected) = expected_hash {
            if expected != sha256 {
                return Err(ConstitutionError::HashMismatch {
                    expected: expected.to_owned(),
                    actual: sha256,
                });
            }
        }
        let data: Value = serde_yaml::from_slice(&canonical)?;
        if !data.is_object() {
            return Err(ConstitutionError::RootNotMapping);
        }
        let version = data
            .pointer("/meta/version")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();

        let mut id_index = BTreeMap::new();
        build_id_index(&data, String::new(), &mut id_index);

        let authorities = data
            .pointer("/AuthorityModel/authorities")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Constitution {
            data,
            canonical,
            sha256,
            version,
            id_index,
            authorities,
        })
    }

    /// Load from disk, verifying the `.sha256` sidecar when one exists.
    /// The sidecar's first whitespace-delimited token must equal the
    /// constitution's canonical hash.
    pub fn load(path: &Path) -> Result<Self, ConstitutionError> {
        let raw = std::fs::read(path)?;
        let text = String::from_utf8(raw).map_err(|_| ConstitutionError::InvalidUtf8)?;
        let constitution = Self::from_yaml_str(&text, None)?;

        let sidecar = path.with_extension("sha256");
        if sidecar.exists() {
            let stored = std::fs::read_to_string(&sidecar)?;
            let stored = stored.split_whitespace().next().unwrap_or("").to_owned();
            if stored != constitution.sha256 {
                return Err(ConstitutionError::HashMismatch {
                    expected: stored,
                    actual: constitution.sha256,
                });
            }
        }
        tracing::debug!(hash = %constitution.sha256, version = %constitution.version, "constitution loaded");
        Ok(constitution)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }

    pub fn hash(&self) -> &str {
        &self.sha256
    }

    pub fn version_str(&self) -> &str {
        &self.version
    }

    // --- Citation resolution -------------------------------------------------

    /// Resolve any supported citation form. Returns `None` when the citation
    /// is syntactically foreign or names a missing node.
    pub fn resolve(&self, citation: &str) -> Option<Value> {
        if let Some(rest) = citation.strip_prefix("authority:") {
            return self.resolve_authority(rest);
        }
        if let Some(rest) = citation.strip_prefix("constitution:") {
            return self.resolve_constitution(rest);
        }
        None
    }

    fn resolve_authority(&self, rest: &str) -> Option<Value> {
        let rest = rest.strip_prefix(self.sha256.as_str())?;
        let auth_id = rest.strip_prefix('#')?;
        if !self.authorities.contains(auth_id) {
            return None;
        }
        for table in ["action_permissions", "amendment_permissions", "treaty_permissions"] {
            if let Some(perms) = self
                .data
                .pointer(&format!("/AuthorityModel/{table}"))
                .and_then(Value::as_array)
            {
                for perm in perms {
                    if perm.get("authority").and_then(Value::as_str) == Some(auth_id) {
                        return Some(perm.clone());
                    }
                }
            }
        }
        // Authority exists but has no explicit permission mapping.
        Some(serde_json::json!({"authority": auth_id, "exists": true}))
    }

    fn resolve_constitution(&self, rest: &str) -> Option<Value> {
        let hash_prefix = self.sha256.as_str();
        let version_prefix = format!("v{}", self.version);
        let remainder = rest
            .strip_prefix(hash_prefix)
            .or_else(|| rest.strip_prefix(version_prefix.as_str()))?;

        if let Some(node_id) = remainder.strip_prefix('#') {
            let ptr = self.id_index.get(node_id)?;
            return self.data.pointer(ptr).cloned();
        }
        if let Some(pointer) = remainder.strip_prefix('@') {
            return resolve_pointer(&self.data, pointer).cloned();
        }
        None
    }

    pub fn has_id(&self, node_id: &str) -> bool {
        self.id_index.contains_key(node_id)
    }

    pub fn is_constitutional_authority(&self, auth_id: &str) -> bool {
        self.authorities.contains(auth_id)
    }

    pub fn constitutional_authorities(&self) -> Vec<String> {
        self.authorities.iter().cloned().collect()
    }

    /// Hash-based clause citation.
    pub fn citation(&self, node_id: &str) -> String {
        format!("constitution:{}#{}", self.sha256, node_id)
    }

    /// Hash-based authority citation.
    pub fn authority_citation(&self, auth_id: &str) -> String {
        format!("authority:{}#{}", self.sha256, auth_id)
    }

    /// Validate a citation list under `authority_reference_mode = BOTH`:
    /// at least one resolving `authority:` citation, at least one resolving
    /// clause/invariant citation (`CL-` / `INV-` id prefix), and every entry
    /// must resolve.
    pub fn validate_citations_both(&self, citations: &[String]) -> Result<(), String> {
        let mut has_authority = false;
        let mut has_clause_or_invariant = false;

        for citation in citations {
            if self.resolve(citation).is_none() {
                return Err(format!("unresolvable citation: {citation}"));
            }
            if citation.starts_with("authority:") {
                has_authority = true;
            } else if citation.starts_with("constitution:") {
                for prefix in [
                    format!("constitution:{}#", self.sha256),
                    format!("constitution:v{}#", self.version),
                ] {
                    if let Some(node_id) = citation.strip_prefix(prefix.as_str()) {
                        if node_id.starts_with("CL-") || node_id.starts_with("INV-") {
                            has_clause_or_invariant = true;
                        }
                    }
                }
            }
        }

        if !has_authority {
            return Err("BOTH mode requires at least one authority citation".to_owned());
        }
        if !has_clause_or_invariant {
            return Err("BOTH mode requires at least one clause or invariant citation".to_owned());
        }
        Ok(())
    }

    /// Startup self-test: resolve every invariant id and the pointer paths
    /// the kernel relies on. Returns the list of failures (empty = pass).
    pub fn self_test(&self) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(invariants) = self.data.get("invariants").and_then(Value::as_array) {
            for inv in invariants {
                let inv_id = inv.get("id").and_then(Value::as_str).unwrap_or("");
                let citation = self.citation(inv_id);
                if self.resolve(&citation).is_none() {
                    failures.push(format!("failed to resolve invariant: {citation}"));
                }
            }
        }

        for ptr in [
            "/telemetry_policy/required_logs",
            "/io_policy/allowlist",
            "/exit_policy/exit_mandatory_conditions",
            "/reflection_policy/proposal_budgets",
        ] {
            let citation = format!("constitution:{}@{}", self.sha256, ptr);
            if self.resolve(&citation).is_none() {
                failures.push(format!("failed to resolve pointer: {citation}"));
            }
        }
        failures
    }

    // --- Action space --------------------------------------------------------

    pub fn action_types(&self) -> Vec<String> {
        self.data
            .pointer("/action_space/action_types")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|at| at.get("type").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_action_type_def(&self, action_type: &str) -> Option<Value> {
        self.data
            .pointer("/action_space/action_types")
            .and_then(Value::as_array)?
            .iter()
            .find(|at| at.get("type").and_then(Value::as_str) == Some(action_type))
            .cloned()
    }

    // --- IO policy -----------------------------------------------------------

    pub fn get_read_paths(&self) -> Vec<String> {
        string_list(self.data.pointer("/io_policy/allowlist/read_paths"))
    }

    pub fn get_write_paths(&self) -> Vec<String> {
        string_list(self.data.pointer("/io_policy/allowlist/write_paths"))
    }

    pub fn is_network_enabled(&self) -> bool {
        self.data
            .pointer("/io_policy/network/enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    // --- Reflection / refusal / telemetry policy -----------------------------

    pub fn max_candidates_per_cycle(&self) -> u64 {
        self.data
            .pointer("/reflection_policy/proposal_budgets/max_candidates_per_cycle")
            .and_then(Value::as_u64)
            .unwrap_or(5)
    }

    pub fn max_tokens_per_cycle(&self) -> u64 {
        self.data
            .pointer("/reflection_policy/proposal_budgets/max_total_tokens_per_cycle")
            .and_then(Value::as_u64)
            .unwrap_or(6000)
    }

    pub fn refusal_reason_codes(&self) -> Vec<String> {
        string_list(self.data.pointer("/refusal_policy/refusal_reason_codes"))
    }

    pub fn admission_rejection_codes(&self) -> Vec<String> {
        string_list(self.data.pointer("/refusal_policy/admission_rejection_codes"))
    }

    pub fn observation_kinds(&self) -> Vec<String> {
        self.data
            .pointer("/observation_schema/kinds")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|k| k.get("kind").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn required_logs(&self) -> Vec<String> {
        string_list(self.data.pointer("/telemetry_policy/required_logs"))
    }

    // --- Amendment machinery (ECK) -------------------------------------------

    pub fn amendments_enabled(&self) -> bool {
        self.data
            .pointer("/amendment_policy/amendments_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn max_constitution_bytes(&self) -> u64 {
        self.data
            .pointer("/amendment_policy/max_constitution_bytes")
            .and_then(Value::as_u64)
            .unwrap_or(32_768)
    }

    pub fn max_amendment_candidates_per_cycle(&self) -> usize {
        self.data
            .pointer("/amendment_policy/max_amendment_candidates_per_cycle")
            .and_then(Value::as_u64)
            .unwrap_or(3) as usize
    }

    pub fn max_pending_amendments(&self) -> usize {
        self.data
            .pointer("/amendment_policy/max_pending_amendments")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize
    }

    pub fn amendment_procedure(&self) -> Value {
        self.data
            .get("AmendmentProcedure")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    pub fn cooling_period_cycles(&self) -> u64 {
        self.data
            .pointer("/AmendmentProcedure/cooling_period_cycles")
            .and_then(Value::as_u64)
            .unwrap_or(2)
    }

    pub fn authorization_threshold(&self) -> u64 {
        self.data
            .pointer("/AmendmentProcedure/authorization_threshold")
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    pub fn authority_reference_mode(&self) -> String {
        self.data
            .pointer("/AmendmentProcedure/authority_reference_mode")
            .and_then(Value::as_str)
            .unwrap_or("BOTH")
            .to_owned()
    }

    pub fn density_upper_bound(&self) -> Option<f64> {
        self.data
            .pointer("/AmendmentProcedure/density_upper_bound")
            .and_then(Value::as_f64)
    }

    /// All four ECK sections present.
    pub fn has_eck_sections(&self) -> bool {
        ["AmendmentProcedure", "AuthorityModel", "WarrantDefinition", "ScopeSystem"]
            .iter()
            .all(|s| self.data.get(*s).is_some())
    }

    // --- Authority model -----------------------------------------------------

    pub fn action_permissions(&self) -> Vec<Value> {
        value_list(self.data.pointer("/AuthorityModel/action_permissions"))
    }

    pub fn amendment_permissions(&self) -> Vec<Value> {
        value_list(self.data.pointer("/AuthorityModel/amendment_permissions"))
    }

    pub fn treaty_permissions(&self) -> Vec<Value> {
        value_list(self.data.pointer("/AuthorityModel/treaty_permissions"))
    }

    /// Does the authority constitutionally hold this action?
    pub fn authority_holds_action(&self, auth_id: &str, action_type: &str) -> bool {
        self.action_permissions().iter().any(|perm| {
            perm.get("authority").and_then(Value::as_str) == Some(auth_id)
                && perm
                    .get("actions")
                    .and_then(Value::as_array)
                    .is_some_and(|actions| {
                        actions.iter().any(|a| a.as_str() == Some(action_type))
                    })
        })
    }

    /// May the authority delegate the given treaty artifact type?
    pub fn authority_can_delegate_type(&self, auth_id: &str, treaty_type: &str) -> bool {
        self.treaty_permissions().iter().any(|perm| {
            perm.get("authority").and_then(Value::as_str) == Some(auth_id)
                && perm
                    .get("treaties")
                    .and_then(Value::as_array)
                    .is_some_and(|ts| ts.iter().any(|t| t.as_str() == Some(treaty_type)))
        })
    }

    /// Any treaty_permission entry authorizing the given treaty type.
    pub fn any_authority_can_delegate_type(&self, treaty_type: &str) -> bool {
        self.treaty_permissions().iter().any(|perm| {
            perm.get("treaties")
                .and_then(Value::as_array)
                .is_some_and(|ts| ts.iter().any(|t| t.as_str() == Some(treaty_type)))
        })
    }

    /// Static authority/action density from `action_permissions` alone.
    /// Returns (A, B, M, density); density is 0 when A·B = 0.
    pub fn compute_density(&self) -> (u64, u64, u64, f64) {
        let perms = self.action_permissions();
        let authorities: BTreeSet<&str> = perms
            .iter()
            .filter_map(|p| p.get("authority").and_then(Value::as_str))
            .collect();
        let a = authorities.len() as u64;
        let b = self.action_types().len() as u64;
        let m: u64 = perms
            .iter()
            .map(|p| {
                p.get("actions")
                    .and_then(Value::as_array)
                    .map_or(0, |v| v.len() as u64)
            })
            .sum();
        if a == 0 || b == 0 {
            return (a, b, m, 0.0);
        }
        (a, b, m, m as f64 / (a * b) as f64)
    }

    // --- Treaty system / scope system ----------------------------------------

    /// The constitution carries the X-2 machinery when the authority model
    /// declares treaty permissions and the scope system is present.
    pub fn has_treaty_sections(&self) -> bool {
        self.data.pointer("/AuthorityModel/treaty_permissions").is_some()
            && self.data.get("ScopeSystem").is_some()
    }

    pub fn max_treaty_duration_cycles(&self) -> u64 {
        self.data
            .pointer("/TreatySystem/max_treaty_duration_cycles")
            .and_then(Value::as_u64)
            .unwrap_or(10)
    }

    pub fn delegation_depth_limit(&self) -> u64 {
        self.data
            .pointer("/TreatySystem/delegation_depth_limit")
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    /// Zone enumerations: scope_type -> sorted zone labels.
    pub fn zone_labels(&self) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        if let Some(map) = self
            .data
            .pointer("/ScopeSystem/scope_enumerations")
            .and_then(Value::as_object)
        {
            for (scope_type, zones) in map {
                out.insert(scope_type.clone(), string_list(Some(zones)));
            }
        }
        out
    }

    pub fn zones_for_scope_type(&self, scope_type: &str) -> Vec<String> {
        string_list(
            self.data
                .pointer(&format!("/ScopeSystem/scope_enumerations/{scope_type}")),
        )
    }

    pub fn per_action_scope(&self) -> Vec<Value> {
        value_list(self.data.pointer("/ScopeSystem/per_action_scope"))
    }

    pub fn action_scope_rule(&self, action_type: &str) -> Option<Value> {
        self.per_action_scope()
            .into_iter()
            .find(|rule| rule.get("action").and_then(Value::as_str) == Some(action_type))
    }

    pub fn valid_scope_types(&self, action_type: &str) -> Vec<String> {
        self.action_scope_rule(action_type)
            .map(|rule| string_list(rule.get("valid_scope_types")))
            .unwrap_or_default()
    }

    /// Zone restriction for the action, or `None` when unrestricted.
    pub fn permitted_zones(&self, action_type: &str) -> Option<Vec<String>> {
        self.action_scope_rule(action_type)?
            .get("permitted_zones")
            .map(|z| string_list(Some(z)))
    }

    /// Warrant ordering ranks by origin, from the WarrantDefinition section.
    pub fn origin_rank(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        if let Some(map) = self
            .data
            .pointer("/WarrantDefinition/origin_rank")
            .and_then(Value::as_object)
        {
            for (origin, rank) in map {
                if let Some(rank) = rank.as_u64() {
                    out.insert(origin.clone(), rank);
                }
            }
        }
        out
    }
}

impl AdmissionConstitution for Constitution {
    fn action_type_def(&self, action_type: &str) -> Option<Value> {
        self.get_action_type_def(action_type)
    }
    fn allowed_action_types(&self) -> Vec<String> {
        self.action_types()
    }
    fn read_paths(&self) -> Vec<String> {
        self.get_read_paths()
    }
    fn write_paths(&self) -> Vec<String> {
        self.get_write_paths()
    }
    fn network_enabled(&self) -> bool {
        self.is_network_enabled()
    }
    fn resolve_citation(&self, citation: &str) -> Option<Value> {
        self.resolve(citation)
    }
}

impl KernelConstitution for Constitution {
    fn sha256(&self) -> &str {
        &self.sha256
    }
    fn version(&self) -> &str {
        &self.version
    }
    fn max_total_tokens_per_cycle(&self) -> u64 {
        self.max_tokens_per_cycle()
    }
    fn make_citation(&self, node_id: &str) -> String {
        self.citation(node_id)
    }
    fn make_authority_citation(&self, auth_id: &str) -> String {
        self.authority_citation(auth_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_id_index(node: &Value, path: String, index: &mut BTreeMap<String, String>) {
    match node {
        Value::Object(map) => {
            if let Some(id) = map.get("id").and_then(Value::as_str) {
                // First occurrence in pre-order wins.
                index.entry(id.to_owned()).or_insert_with(|| path.clone());
            }
            for (key, value) in map {
                build_id_index(value, format!("{path}/{}", escape_pointer(key)), index);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                build_id_index(item, format!("{path}/{i}"), index);
            }
        }
        _ => {}
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Walk a `/`-separated citation pointer. Unlike strict RFC 6901, leading
/// and trailing separators are tolerated and an empty pointer names the
/// whole document.
fn resolve_pointer<'a>(data: &'a Value, pointer: &str) -> Option<&'a Value> {
    let trimmed = pointer.trim_matches('/');
    if trimmed.is_empty() {
        return Some(data);
    }
    let mut current = data;
    for part in trimmed.split('/') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(items) => {
                let idx: usize = part.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn value_list(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn canonicalization_normalizes_crlf_and_trailing_whitespace() {
        let raw = b"meta:  \r\n  version: \"0.3.0\"\r\n";
        let canon = canonicalize_constitution_bytes(raw).unwrap();
        assert_eq!(canon, b"meta:\n  version: \"0.3.0\"\n");
    }

    #[test]
    fn tabs_are_rejected() {
        assert!(matches!(
            canonicalize_constitution_bytes(b"a:\tb\n"),
            Err(ConstitutionError::TabsForbidden)
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(matches!(
            canonicalize_constitution_bytes(&[0xff, 0xfe]),
            Err(ConstitutionError::InvalidUtf8)
        ));
    }

    #[test]
    fn id_and_pointer_citations_resolve() {
        let c = fixtures::constitution();
        let by_id = c.resolve(&c.citation("CL-AMENDMENT-PROCEDURE"));
        assert!(by_id.is_some());
        let by_ptr = c.resolve(&format!(
            "constitution:{}@/io_policy/allowlist/read_paths",
            c.hash()
        ));
        assert!(by_ptr.is_some());
        assert!(c.resolve("constitution:bogus#CL-AMENDMENT-PROCEDURE").is_none());
    }

    #[test]
    fn legacy_version_citations_resolve() {
        let c = fixtures::constitution();
        let cite = format!("constitution:v{}#CL-EXIT-POLICY", c.version_str());
        assert!(c.resolve(&cite).is_some());
    }

    #[test]
    fn authority_citations_resolve_against_authority_model() {
        let c = fixtures::constitution();
        assert!(c.resolve(&c.authority_citation("AUTH_GOVERNANCE")).is_some());
        assert!(c.resolve(&c.authority_citation("AUTH_NOBODY")).is_none());
    }

    #[test]
    fn both_mode_requires_authority_and_clause() {
        let c = fixtures::constitution();
        let only_authority = vec![c.authority_citation("AUTH_GOVERNANCE")];
        assert!(c.validate_citations_both(&only_authority).is_err());

        let both = vec![
            c.authority_citation("AUTH_GOVERNANCE"),
            c.citation("CL-AMENDMENT-PROCEDURE"),
        ];
        assert!(c.validate_citations_both(&both).is_ok());
    }

    #[test]
    fn static_density_over_action_permissions() {
        let c = fixtures::constitution();
        let (a, b, m, d) = c.compute_density();
        assert_eq!(a, 2);
        assert_eq!(b, 5);
        assert_eq!(m, 4);
        assert!((d - 0.4).abs() < 1e-12);
    }

    #[test]
    fn self_test_passes_on_fixture() {
        let c = fixtures::constitution();
        assert!(c.self_test().is_empty(), "{:?}", c.self_test());
    }
}
