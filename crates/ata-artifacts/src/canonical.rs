//! Canonical encoding and content hashing for strategy artifacts.
//!
//! The hash input is a canonical JSON document: object keys sorted
//! lexicographically at every depth, compact emission, numbers in
//! serde_json's shortest round-trip form. Two artifacts whose canonical
//! encodings match produce the same hash; any attribute change changes it.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::RiskProfile;

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
pub fn canonical_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over the canonical encoding of (name, version, params,
/// risk_profile), hex-encoded.
pub fn artifact_hash(
    name: &str,
    version: &str,
    params: &Value,
    risk_profile: &RiskProfile,
) -> String {
    let doc = serde_json::json!({
        "name": name,
        "version": version,
        "params": params,
        "risk_profile": risk_profile,
    });

    let canonical = canonical_json(&doc);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
