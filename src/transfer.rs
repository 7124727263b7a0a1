//! Moves claims and query parameters into a SQL parameter bag, and flattens JSON-shaped row members.

use crate::db::Record;
use serde_json::Value;

/// Prefix for claim variables in every parameter bag (`claim_<key>`).
pub const CLAIM_PREFIX: &str = "claim_";

/// Copy every `source` entry into `target` under `prefix + key`.
/// Arrays of strings become one `|a|b|` string so SQL can filter with a plain substring match.
pub fn transfer_to_variables(target: &mut Record, source: &Record, prefix: &str) {
    for (key, value) in source {
        target.insert(format!("{}{}", prefix, key), delimited(value));
    }
}

fn delimited(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            Value::String(format!("|{}|", parts.join("|")))
        }
        other => other.clone(),
    }
}

/// Recursively turn JSON text members (objects/arrays serialized into string columns) into plain maps/lists.
pub fn normalize_json_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(&s) {
                    Ok(parsed) if parsed.is_object() || parsed.is_array() => normalize_json_value(parsed),
                    _ => Value::String(s),
                }
            } else {
                Value::String(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_json_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_json_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Normalize one named member of a record in place. Missing members are left alone.
pub fn normalize_json_member(record: &mut Record, key: &str) {
    if let Some(value) = record.get_mut(key) {
        *value = normalize_json_value(value.take());
    }
}

/// Strip every member whose value is a nested map or list, for scalar-only projections.
pub fn drop_complex_members(record: &mut Record) {
    record.retain(|_, v| !(v.is_object() || v.is_array()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn prefixes_keys_and_delimits_string_arrays() {
        let source = record(json!({
            "sub": "u1",
            "right": ["read", "write"],
            "none": [],
            "level": 3,
            "mixed": ["a", 1]
        }));
        let mut target = Record::new();
        transfer_to_variables(&mut target, &source, CLAIM_PREFIX);
        assert_eq!(target["claim_sub"], json!("u1"));
        assert_eq!(target["claim_right"], json!("|read|write|"));
        assert_eq!(target["claim_none"], json!("||"));
        assert_eq!(target["claim_level"], json!(3));
        assert_eq!(target["claim_mixed"], json!(["a", 1]));
    }

    #[test]
    fn keeps_insertion_order() {
        let source = record(json!({ "z": 1, "a": 2 }));
        let mut target = Record::new();
        transfer_to_variables(&mut target, &source, "");
        let keys: Vec<&String> = target.keys().collect();
        assert_eq!(keys, ["z", "a"]);
    }

    #[test]
    fn normalizes_json_text_recursively() {
        let value = json!({
            "payload": "{\"lines\":[\"[1,2]\"]}",
            "label": "[not json",
            "plain": "hello"
        });
        let normalized = normalize_json_value(value);
        assert_eq!(normalized["payload"], json!({ "lines": [[1, 2]] }));
        assert_eq!(normalized["label"], json!("[not json"));
        assert_eq!(normalized["plain"], json!("hello"));
    }

    #[test]
    fn normalizes_single_member() {
        let mut row = record(json!({ "a": "[1]", "b": "[2]" }));
        normalize_json_member(&mut row, "a");
        assert_eq!(row["a"], json!([1]));
        assert_eq!(row["b"], json!("[2]"));
    }

    #[test]
    fn drops_nested_members() {
        let mut row = record(json!({ "id": 1, "tags": ["x"], "meta": { "k": 1 }, "name": "n" }));
        drop_complex_members(&mut row);
        assert_eq!(Value::Object(row), json!({ "id": 1, "name": "n" }));
    }
}
