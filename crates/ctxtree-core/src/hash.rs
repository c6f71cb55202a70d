//! Content hashing for context nodes.
//!
//! A node's hash is computed once, from the fields it was constructed with:
//! - the four content fields are assembled into one JSON object
//! - object keys are sorted (UTF-16 code unit order) and integer-valued
//!   floats are written as integers, so equal content always hashes equal
//! - the canonical text is digested with SHA-256 and cut to
//!   [`HASH_LEN`] hex characters
//!
//! The short form is for human-readable addressing inside one session, not
//! for collision resistance.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::node::Metadata;

/// Number of hex characters kept from the SHA-256 digest.
pub const HASH_LEN: usize = 8;

/// Short content identifier of a node.
///
/// Assigned at construction and never recomputed. Persisted hashes are
/// accepted verbatim, so a `ContentHash` may hold any non-empty string.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of a node's initial fields.
    pub fn compute(
        user_message: Option<&str>,
        agent_response: Option<&str>,
        system_response: Option<&str>,
        metadata: &Metadata,
    ) -> Self {
        let content = serde_json::json!({
            "user_message": user_message,
            "agent_response": agent_response,
            "system_response": system_response,
            "metadata": Value::Object(metadata.clone()),
        });
        let canonical = canonical_json(&content);
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        Self(digest[..HASH_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ContentHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContentHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ContentHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ContentHash {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Recursively sort JSON object keys using UTF-16 code unit ordering.
fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

/// Write integer-valued floats as integers.
fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_numbers(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(normalize_numbers).collect()),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Value::Number(Number::from(f as i64))
            }
            _ => Value::Number(n.clone()),
        },
        other => other.clone(),
    }
}

/// Convert a JSON value to canonical compact text: normalize numbers, sort keys.
pub fn canonical_json(value: &Value) -> String {
    sort_keys_utf16(&normalize_numbers(value)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => Metadata::new(),
        }
    }

    #[test]
    fn test_hash_is_short_hex() {
        let h = ContentHash::compute(Some("hi"), Some(""), None, &Metadata::new());
        assert_eq!(h.as_str().len(), HASH_LEN);
        assert!(h.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_deterministic() {
        let m = meta(json!({"k": "v", "n": 3}));
        let a = ContentHash::compute(Some("u"), Some("a"), Some("s"), &m);
        let b = ContentHash::compute(Some("u"), Some("a"), Some("s"), &m);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_metadata_order_invariant() {
        let m1 = meta(json!({"a": 1, "b": 2}));
        let m2 = meta(json!({"b": 2, "a": 1}));
        assert_eq!(
            ContentHash::compute(None, None, None, &m1),
            ContentHash::compute(None, None, None, &m2)
        );
    }

    #[test]
    fn test_hash_field_boundaries_matter() {
        // Concatenation-style hashing would make these collide.
        let a = ContentHash::compute(Some("ab"), Some("c"), None, &Metadata::new());
        let b = ContentHash::compute(Some("a"), Some("bc"), None, &Metadata::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_none_differs_from_empty() {
        let a = ContentHash::compute(None, None, None, &Metadata::new());
        let b = ContentHash::compute(Some(""), None, None, &Metadata::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonical_json_integer_float() {
        assert_eq!(canonical_json(&json!({ "value": 1.0 })), r#"{"value":1}"#);
        assert_eq!(canonical_json(&json!({ "value": 1.5 })), r#"{"value":1.5}"#);
    }

    #[test]
    fn test_canonical_json_nested_sorted_arrays_kept() {
        let canonical = canonical_json(&json!({"z": {"y": 1, "x": 2}, "a": [3, 1, 2]}));
        assert_eq!(canonical, r#"{"a":[3,1,2],"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn test_content_hash_compares_with_str() {
        let h = ContentHash::from("abc12345");
        assert_eq!(h, "abc12345");
        assert_eq!(h.to_string(), "abc12345");
        assert_eq!(format!("{h:?}"), "ContentHash(abc12345)");
    }

    #[test]
    fn test_content_hash_serde_transparent() {
        let h = ContentHash::from("rootL1");
        assert_eq!(serde_json::to_string(&h).unwrap(), r#""rootL1""#);
        let back: ContentHash = serde_json::from_str(r#""rootL1""#).unwrap();
        assert_eq!(back, h);
    }
}
