//! Dynamic configuration values.
//!
//! Values are [`serde_json::Value`]: a tagged variant over null, bool, number,
//! string, list and map. The helpers here convert between flat dotted-key maps and
//! nested trees, and give typed access that reports a type mismatch instead of
//! panicking.

use serde::de::DeserializeOwned;
use serde_json::Map;
use std::collections::HashMap;

use crate::error::{Result, StratumError};

pub use serde_json::Value;

/// Flatten a nested map into dotted keys (`{a: {b: 1}}` becomes `a.b = 1`).
///
/// Lists are kept whole as values. A non-object root has no keys and yields an
/// empty map.
pub fn flatten(value: &Value) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut HashMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(&key, v, out);
            }
        }
        other if !prefix.is_empty() => {
            out.insert(prefix.to_string(), other.clone());
        }
        _ => {}
    }
}

/// Build a nested tree from dotted keys (`a.b.c` becomes `{a: {b: {c: ..}}}`).
///
/// When a key is both a leaf and the parent of other keys (`a = 1` alongside
/// `a.b = 2`), the nested form wins.
pub fn expand(flat: &HashMap<String, Value>) -> Value {
    let mut keys: Vec<&String> = flat.keys().collect();
    keys.sort();

    let mut root = Map::new();
    for key in keys {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, flat[key].clone());
    }
    Value::Object(root)
}

fn insert_path(node: &mut Map<String, Value>, parts: &[&str], value: Value) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        match node.get(*head) {
            // keep an existing subtree
            Some(Value::Object(_)) => {}
            _ => {
                node.insert(head.to_string(), value);
            }
        }
        return;
    }

    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    if let Value::Object(map) = child {
        insert_path(map, rest, value);
    }
}

fn mismatch(key: &str, expected: &str) -> StratumError {
    StratumError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

/// Strings pass through; numbers and bools are rendered.
pub fn to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(mismatch(key, "string")),
    }
}

/// Integers, integral floats and numeric strings.
pub fn to_i64(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| mismatch(key, "integer")),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(key, "integer")),
        _ => Err(mismatch(key, "integer")),
    }
}

pub fn to_f64(key: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(key, "float")),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(key, "float")),
        _ => Err(mismatch(key, "float")),
    }
}

/// Bools, `0`/`1`, and the strings `true`/`false`/`1`/`0` (case-insensitive).
pub fn to_bool(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(mismatch(key, "bool")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(mismatch(key, "bool")),
        },
        _ => Err(mismatch(key, "bool")),
    }
}

/// Deserialize one value into any serde type.
pub fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| mismatch(key, &format!("{} ({e})", std::any::type_name::<T>())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested() {
        let flat = flatten(&json!({"a": {"b": {"c": 1}, "d": [1, 2]}, "e": "x"}));
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["a.b.c"], json!(1));
        assert_eq!(flat["a.d"], json!([1, 2]));
        assert_eq!(flat["e"], json!("x"));
    }

    #[test]
    fn test_flatten_scalar_root_is_dropped() {
        assert!(flatten(&json!(42)).is_empty());
    }

    #[test]
    fn test_expand_builds_tree() {
        let mut flat = HashMap::new();
        flat.insert("server.port".to_string(), json!(8080));
        flat.insert("server.host".to_string(), json!("localhost"));
        flat.insert("debug".to_string(), json!(true));
        assert_eq!(
            expand(&flat),
            json!({"server": {"port": 8080, "host": "localhost"}, "debug": true})
        );
    }

    #[test]
    fn test_expand_nested_wins_over_leaf() {
        let mut flat = HashMap::new();
        flat.insert("a".to_string(), json!(1));
        flat.insert("a.b".to_string(), json!(2));
        assert_eq!(expand(&flat), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_typed_conversions() {
        assert_eq!(to_i64("k", &json!("8080")).unwrap(), 8080);
        assert_eq!(to_i64("k", &json!(3.0)).unwrap(), 3);
        assert!(to_i64("k", &json!(3.5)).is_err());
        assert_eq!(to_f64("k", &json!("0.5")).unwrap(), 0.5);
        assert!(to_bool("k", &json!("TRUE")).unwrap());
        assert!(!to_bool("k", &json!(0)).unwrap());
        assert_eq!(to_string("k", &json!(12)).unwrap(), "12");
    }

    #[test]
    fn test_type_mismatch_reports_key() {
        let err = to_bool("feature.on", &json!([1])).unwrap_err();
        match err {
            StratumError::TypeMismatch { key, expected } => {
                assert_eq!(key, "feature.on");
                assert_eq!(expected, "bool");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_struct() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Limits {
            max: u32,
        }
        let limits: Limits = decode("limits", &json!({"max": 7})).unwrap();
        assert_eq!(limits, Limits { max: 7 });
        assert!(decode::<Limits>("limits", &json!("nope")).is_err());
    }
}
