//! # Delta Maps
//!
//! `update()` sends a partial object as a flat map of leaf path to value.
//!
//! ## Flatten / Inflate
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  { "name": "ada",                     { "name":          "ada",        │
//! │    "langs": { "first": "en",   ──►      "langs/first":   "en",         │
//! │               "second": "fr" },         "langs/second":  "fr",         │
//! │    "tags": ["x", "y"],                  "tags":          ["x","y"],    │
//! │    "meta": {} }                         "meta":          {} }          │
//! │                                 ◄──                                     │
//! │          inflate(flatten(v)) == v for every object v                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Arrays and empty objects are leaves. Keys are relative to the update
//! target and carry no leading separator.

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::validation::{validate_delta_key, SEPARATOR};

/// Flat map of relative leaf path to value.
pub type Deltas = Map<String, Value>;

/// Flattens a nested object into leaf deltas.
///
/// Fails with [`CoreError::InvalidDeltaKey`] if any key could not be read
/// back as a single path segment.
pub fn flatten(object: &Map<String, Value>) -> CoreResult<Deltas> {
    let mut deltas = Deltas::new();
    flatten_into(object, None, &mut deltas)?;
    Ok(deltas)
}

fn flatten_into(
    object: &Map<String, Value>,
    prefix: Option<&str>,
    deltas: &mut Deltas,
) -> CoreResult<()> {
    for (key, value) in object {
        validate_delta_key(key)?;

        let path = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, SEPARATOR, key),
            None => key.clone(),
        };

        match value {
            Value::Object(inner) if !inner.is_empty() => {
                flatten_into(inner, Some(&path), deltas)?;
            }
            leaf => {
                deltas.insert(path, leaf.clone());
            }
        }
    }
    Ok(())
}

/// Rebuilds the nested object described by `deltas`.
///
/// A key that is both a leaf and the prefix of another key is rejected.
pub fn inflate(deltas: &Deltas) -> CoreResult<Value> {
    let mut root = Map::new();

    for (key, value) in deltas {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        for segment in &segments {
            validate_delta_key(segment)?;
        }
        insert_at(&mut root, &segments, value.clone(), key)?;
    }

    Ok(Value::Object(root))
}

fn insert_at(
    root: &mut Map<String, Value>,
    segments: &[&str],
    value: Value,
    key: &str,
) -> CoreResult<()> {
    let overlap = || CoreError::InvalidDeltaKey {
        key: key.to_string(),
        reason: "overlaps another delta".to_string(),
    };

    let Some((last, parents)) = segments.split_last() else {
        return Err(overlap());
    };

    let mut cursor = root;
    for segment in parents {
        let entry = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        cursor = match entry {
            Value::Object(inner) => inner,
            _ => return Err(overlap()),
        };
    }

    if cursor.contains_key(*last) {
        return Err(overlap());
    }
    cursor.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_flatten_leaves() {
        let deltas = flatten(&object(json!({
            "name": "ada",
            "langs": { "first": "en", "second": { "code": "fr" } },
            "tags": ["x", { "y": 1 }],
            "meta": {},
            "gone": null
        })))
        .unwrap();

        assert_eq!(deltas.len(), 6);
        assert_eq!(deltas["name"], json!("ada"));
        assert_eq!(deltas["langs/first"], json!("en"));
        assert_eq!(deltas["langs/second/code"], json!("fr"));
        assert_eq!(deltas["tags"], json!(["x", { "y": 1 }]));
        assert_eq!(deltas["meta"], json!({}));
        assert_eq!(deltas["gone"], Value::Null);
    }

    #[test]
    fn test_round_trip() {
        let original = json!({
            "a": "hi",
            "b": "there",
            "nested": { "deep": { "deeper": 3, "list": [1, 2] }, "empty": {} }
        });
        let deltas = flatten(&object(original.clone())).unwrap();
        assert_eq!(inflate(&deltas).unwrap(), original);
    }

    #[test]
    fn test_flatten_rejects_bad_keys() {
        assert!(flatten(&object(json!({ "a/b": 1 }))).is_err());
        assert!(flatten(&object(json!({ "": 1 }))).is_err());
        assert!(flatten(&object(json!({ "ok": { "..": 1 } }))).is_err());
    }

    #[test]
    fn test_inflate_rejects_overlap() {
        let deltas = object(json!({ "a": 1, "a/b": 2 }));
        assert!(matches!(
            inflate(&deltas),
            Err(CoreError::InvalidDeltaKey { .. })
        ));

        let deltas = object(json!({ "a//b": 1 }));
        assert!(inflate(&deltas).is_err());
    }
}
