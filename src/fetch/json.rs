//! JSON → text for `dynamic_json` sources.
//!
//! Nested objects are flattened into `path > to > key: value` lines, one
//! paragraph each. Array items share their parent's path; nulls and blank
//! strings are skipped.

use serde_json::Value;

const PATH_SEP: &str = " > ";

pub fn flatten_json(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten_into(value, "", &mut lines);
    lines.join("\n\n")
}

fn flatten_into(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, PATH_SEP, key)
                };
                flatten_into(child, &path, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(item, prefix, out);
            }
        }
        Value::Null => {}
        Value::String(s) => push_leaf(prefix, s.trim(), out),
        Value::Bool(b) => push_leaf(prefix, &b.to_string(), out),
        Value::Number(n) => push_leaf(prefix, &n.to_string(), out),
    }
}

fn push_leaf(prefix: &str, value: &str, out: &mut Vec<String>) {
    if value.is_empty() {
        return;
    }
    if prefix.is_empty() {
        out.push(value.to_string());
    } else {
        out.push(format!("{}: {}", prefix, value));
    }
}
