//! Canonical JSON serialization (single source of truth)
//!
//! Every byte sequence that gets hashed or signed in this crate flows through
//! this module. The encoding is the RFC 8785 JSON Canonicalization Scheme
//! (JCS) restricted to the value shapes the kernel actually produces:
//! strings, integers, booleans, null, arrays, and string-keyed objects, plus
//! finite floats.
//!
//! ## Invariants
//!
//! - **Identical inputs ⇒ identical bytes.** Object keys are emitted in
//!   byte-lexicographic order regardless of insertion order, so logically
//!   equal trees canonicalize identically.
//! - **No non-finite floats.** `NaN` and `±Inf` are rejected before any byte
//!   is produced; this is the *only* failure mode of canonicalization.
//! - **No decoration.** No whitespace outside string literals, no trailing
//!   newline, no unicode normalization of string content.
//!
//! Integral floats are written without a fractional part (`10.0` ⇒ `10`),
//! matching the ECMAScript number-to-string rules JCS inherits.

use serde_json::Value;
use thiserror::Error;

/// Canonicalization failure.
#[derive(Debug, Error)]
pub enum CanonError {
    /// A `NaN` or infinite float appeared somewhere in the value tree.
    #[error("non-finite float not allowed in canonical JSON: {0}")]
    NonFiniteFloat(f64),
}

/// Canonical JSON as strict UTF-8 bytes. Primary form.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out)?;
    Ok(out)
}

/// Canonical JSON as an owned `String`. Thin wrapper over [`canonical_bytes`].
pub fn canonical_str(value: &Value) -> Result<String, CanonError> {
    let bytes = canonical_bytes(value)?;
    // write_value only emits valid UTF-8 (JSON string escapes + UTF-8 input).
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // serde_json's map is BTree-backed (we never enable
            // `preserve_order`), but the sort here is load-bearing: the
            // canonical form must not depend on the map implementation.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(&map[*key], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut Vec<u8>) -> Result<(), CanonError> {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
    } else if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
    } else if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonError::NonFiniteFloat(f));
        }
        // Integral doubles in the safe-integer range print without a
        // fractional part, per the ECMAScript rules JCS references.
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            out.extend_from_slice((f as i64).to_string().as_bytes());
        } else {
            // serde_json uses ryu (shortest round-trip), which matches the
            // ECMAScript shortest representation for finite doubles.
            out.extend_from_slice(f.to_string().as_bytes());
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\x08' => out.extend_from_slice(b"\\b"),
            '\x09' => out.extend_from_slice(b"\\t"),
            '\x0a' => out.extend_from_slice(b"\\n"),
            '\x0c' => out.extend_from_slice(b"\\f"),
            '\x0d' => out.extend_from_slice(b"\\r"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorted_keys_regardless_of_insertion_order() {
        let a = json!({"b": 2, "a": 1, "c": {"z": [1, 2], "y": null}});
        let bytes = canonical_bytes(&a).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":1,"b":2,"c":{"y":null,"z":[1,2]}}"#
        );
    }

    #[test]
    fn no_whitespace_no_trailing_newline() {
        let v = json!({"k": [true, false, null, "s"]});
        let s = canonical_str(&v).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn integral_float_prints_as_integer() {
        let v = json!({"d": 10.0});
        assert_eq!(canonical_str(&v).unwrap(), r#"{"d":10}"#);
    }

    #[test]
    fn non_finite_float_cannot_enter_a_value_tree() {
        // serde_json::Number refuses NaN/Inf at construction, so the
        // NonFiniteFloat guard in write_number is the backstop for Number
        // configurations that can carry them.
        assert!(serde_json::Number::from_f64(f64::NAN).is_none());
        assert!(serde_json::Number::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn control_chars_escaped_lowercase() {
        let v = json!("a\u{1f}b\tc");
        assert_eq!(canonical_str(&v).unwrap(), "\"a\\u001fb\\tc\"");
    }

    #[test]
    fn reencode_is_idempotent() {
        let v = json!({"m": {"b": [1, 2.5, "x"], "a": true}});
        let once = canonical_bytes(&v).unwrap();
        let decoded: Value = serde_json::from_slice(&once).unwrap();
        let twice = canonical_bytes(&decoded).unwrap();
        assert_eq!(once, twice);
    }
}
