//! Canonical JSON serialization.
//!
//! All consensus-relevant hashing operates on canonical JSON text: object
//! keys sorted lexicographically, no insignificant whitespace, UTF-8, and a
//! stable numeric rendering. `serde_json`'s default object representation is
//! a `BTreeMap`, so re-serializing a parsed `Value` already yields sorted
//! keys and compact output; this module centralizes that contract so every
//! caller hashes the exact same bytes.

use cortex_types::error::CryptoError;
use serde::Serialize;
use serde_json::Value;

/// Serializes a value to its canonical JSON form.
///
/// Equivalent values produce byte-identical output: the value is first
/// lowered to a `serde_json::Value` (whose object maps are ordered), then
/// rendered compactly.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let v = serde_json::to_value(value).map_err(|e| CryptoError::Canonical(e.to_string()))?;
    serde_json::to_string(&v).map_err(|e| CryptoError::Canonical(e.to_string()))
}

/// Re-canonicalizes a JSON text. Returns the input unchanged when it does
/// not parse; verification callers want the stored bytes in that case, not
/// a hard failure.
pub fn recanonicalize(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(v) => serde_json::to_string(&v).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let v = json!({"zebra": 1, "alpha": {"nested_z": true, "nested_a": null}});
        let c = canonical_json(&v).unwrap();
        assert_eq!(c, r#"{"alpha":{"nested_a":null,"nested_z":true},"zebra":1}"#);
    }

    #[test]
    fn equivalent_values_are_byte_identical() {
        let a = json!({"a": 1, "b": [1, 2, 3]});
        let b: Value = serde_json::from_str(r#"{ "b" : [1,2,3], "a" : 1 }"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::from),
            "[a-zA-Z0-9 _:-]{0,24}".prop_map(Value::from),
        ];
        leaf.prop_recursive(depth, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
                prop::collection::btree_map("[a-z_]{1,12}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        // canonical(x) == canonical(parse(canonical(x)))
        #[test]
        fn canonical_is_a_fixpoint(v in arb_json(3)) {
            let once = canonical_json(&v).unwrap();
            let parsed: Value = serde_json::from_str(&once).unwrap();
            let twice = canonical_json(&parsed).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
