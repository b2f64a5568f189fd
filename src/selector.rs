//! Procedural, non-semantic selector
//!
//! Among admitted candidate bundles, choose the one whose raw bundle-hash
//! bytes are lexicographically smallest. No ranking, no heuristics, no
//! natural-language scoring: determinism and auditability outrank "best"
//! selection, and SHA-256 makes ties impossible in practice.

use serde_json::{json, Value};

use crate::admission::AdmissionResult;
use crate::canonical::CanonError;

/// Trace record for one selection.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionEvent {
    pub admitted_bundle_hashes: Vec<String>,
    pub selected_bundle_hash: String,
}

impl SelectionEvent {
    pub fn to_value(&self) -> Value {
        json!({
            "event_type": "selection_event",
            "admitted_bundle_hashes": self.admitted_bundle_hashes,
            "selected_bundle_hash": self.selected_bundle_hash,
        })
    }
}

/// Select the admitted candidate with the lexicographically smallest bundle
/// hash (raw byte comparison). Returns `None` when nothing was admitted.
pub fn select(
    admitted: &[AdmissionResult],
) -> Result<Option<(usize, SelectionEvent)>, CanonError> {
    if admitted.is_empty() {
        return Ok(None);
    }

    let mut pairs: Vec<([u8; 32], usize)> = Vec::with_capacity(admitted.len());
    for (i, result) in admitted.iter().enumerate() {
        pairs.push((result.candidate.bundle_hash()?, i));
    }
    pairs.sort();
    let (selected_hash, selected_idx) = pairs[0];

    let mut admitted_hashes = Vec::with_capacity(admitted.len());
    for result in admitted {
        admitted_hashes.push(result.candidate.bundle_hash_hex()?);
    }

    Ok(Some((
        selected_idx,
        SelectionEvent {
            admitted_bundle_hashes: admitted_hashes,
            selected_bundle_hash: hex::encode(selected_hash),
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionResult;
    use crate::fixtures;

    fn result_for(msg: &str) -> AdmissionResult {
        let c = fixtures::constitution();
        AdmissionResult {
            candidate: fixtures::notify_bundle(&c, msg),
            admitted: true,
            events: vec![],
            failed_gate: String::new(),
            rejection_code: String::new(),
        }
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select(&[]).unwrap().is_none());
    }

    #[test]
    fn picks_lexicographically_smallest_hash() {
        let results = vec![result_for("alpha"), result_for("beta"), result_for("gamma")];
        let (idx, event) = select(&results).unwrap().unwrap();
        let mut hashes: Vec<String> = results
            .iter()
            .map(|r| r.candidate.bundle_hash_hex().unwrap())
            .collect();
        hashes.sort();
        assert_eq!(event.selected_bundle_hash, hashes[0]);
        assert_eq!(
            results[idx].candidate.bundle_hash_hex().unwrap(),
            hashes[0]
        );
        assert_eq!(event.admitted_bundle_hashes.len(), 3);
    }

    #[test]
    fn selection_is_input_order_independent() {
        let a = result_for("one");
        let b = result_for("two");
        let (_, e1) = select(&[a.clone(), b.clone()]).unwrap().unwrap();
        let (_, e2) = select(&[b, a]).unwrap().unwrap();
        assert_eq!(e1.selected_bundle_hash, e2.selected_bundle_hash);
    }
}
