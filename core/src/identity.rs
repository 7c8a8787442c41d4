//! Deterministic identities for lifelog entries.
//!
//! An identity is a name-based (v5) UUID, so the same upstream event always
//! maps to the same key no matter when, or in which order, it is fetched.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::{Category, Timestamp};

const NAMESPACE: Uuid = Uuid::from_u128(0x6a0f_3c1e_5b7d_4e2a_9c48_d1f0_a7b3_e925);

/// Identity for a record that carries a provider-native id.
#[must_use]
pub fn native_identity(source: &str, native_id: &str) -> String {
    let name = canonical_json(&Value::Array(vec![
        "native".into(),
        source.into(),
        native_id.trim().into(),
    ]));
    Uuid::new_v5(&NAMESPACE, name.as_bytes()).to_string()
}

/// Stable text describing a record that has no native id.
#[must_use]
pub fn fingerprint(
    source: &str,
    category: Category,
    timestamp: &Timestamp,
    payload: &Map<String, Value>,
) -> String {
    canonical_json(&Value::Array(vec![
        "derived".into(),
        source.into(),
        category.as_str().into(),
        timestamp.to_string().into(),
        Value::Object(payload.clone()),
    ]))
}

/// Identity for the `occurrence`-th (1-based) record with this fingerprint
/// in a single fetch. Identical repeats keep distinct identities.
#[must_use]
pub fn derived_identity(fingerprint: &str, occurrence: usize) -> String {
    let name = format!("{fingerprint}#{occurrence}");
    Uuid::new_v5(&NAMESPACE, name.as_bytes()).to_string()
}

/// Trim every string in the payload, recursively.
#[must_use]
pub fn normalize_payload(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k.trim().to_string(), normalize_value(v)))
        .collect()
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(normalize_payload(map)),
        other => other,
    }
}

/// JSON text with object keys sorted at every level.
///
/// `serde_json::Map` is ordered by key, so plain serialization is canonical.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Name-based UUID over the canonical form of `value`.
#[must_use]
pub fn content_digest(value: &Value) -> String {
    Uuid::new_v5(&NAMESPACE, canonical_json(value).as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_native_identity_is_stable() {
        let a = native_identity("cronometer", "1234");
        let b = native_identity("cronometer", " 1234 ");
        assert_eq!(a, b);
        assert_ne!(a, native_identity("fitbit", "1234"));
        assert_ne!(a, native_identity("cronometer", "1235"));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({ "b": 1, "a": { "d": [1, "x"], "c": null } });
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"d":[1,"x"]},"b":1}"#);
    }

    #[test]
    fn test_content_digest_follows_content() {
        let a = content_digest(&json!({ "x": 1, "y": [true] }));
        assert_eq!(a, content_digest(&json!({ "y": [true], "x": 1 })));
        assert_ne!(a, content_digest(&json!({ "x": 2, "y": [true] })));
    }

    #[test]
    fn test_fingerprint_ignores_key_order_and_padding() {
        let ts: Timestamp = "2024-01-15T08:00:00".parse().unwrap();
        let p1 = normalize_payload(payload(json!({ "food": " oats ", "quantity": 40.0 })));
        let p2 = normalize_payload(payload(json!({ "quantity": 40.0, "food": "oats" })));
        assert_eq!(
            fingerprint("log", Category::Food, &ts, &p1),
            fingerprint("log", Category::Food, &ts, &p2)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_content() {
        let ts: Timestamp = "2024-01-15".parse().unwrap();
        let p1 = payload(json!({ "minutes": 30 }));
        let p2 = payload(json!({ "minutes": 31 }));
        assert_ne!(
            fingerprint("log", Category::Exercise, &ts, &p1),
            fingerprint("log", Category::Exercise, &ts, &p2)
        );
        assert_ne!(
            fingerprint("log", Category::Exercise, &ts, &p1),
            fingerprint("log", Category::Sleep, &ts, &p1)
        );
    }

    #[test]
    fn test_derived_identity_distinguishes_occurrences() {
        let fp = "fingerprint";
        assert_eq!(derived_identity(fp, 1), derived_identity(fp, 1));
        assert_ne!(derived_identity(fp, 1), derived_identity(fp, 2));
    }
}
