// ABOUTME: JSONPath backend: @json:<path> or bare $.path over a parsed JSON document.
// ABOUTME: gjson-style `#` array segments are normalized to `[*]` before evaluation.

use std::str::FromStr;

use jsonpath_rust::JsonPath;
use serde_json::Value;
use tracing::debug;

/// Parse a JSONPath rule against raw JSON text.
pub fn parse_str(content: &str, path: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => parse_value(&value, path),
        Err(e) => {
            debug!(error = %e, "content is not valid JSON");
            vec![]
        }
    }
}

/// Parse a JSONPath rule against an already-parsed value.
pub fn parse_value(value: &Value, path: &str) -> Vec<String> {
    query(value, path)
        .into_iter()
        .map(|v| value_to_string(&v))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Matched values for element-context chaining.
pub fn elements_str(content: &str, path: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => query(&value, path),
        Err(e) => {
            debug!(error = %e, "content is not valid JSON");
            vec![]
        }
    }
}

fn query(value: &Value, path: &str) -> Vec<Value> {
    let normalized = normalize_path(path);
    let jsonpath = match JsonPath::from_str(&normalized) {
        Ok(p) => p,
        Err(e) => {
            debug!(path = %normalized, error = %e, "invalid JSONPath");
            return vec![];
        }
    };
    jsonpath
        .find_slice(value)
        .into_iter()
        .map(|r| r.to_data())
        .filter(|v| !v.is_null())
        .collect()
}

/// Normalize a rule path to the JSONPath dialect the query library speaks.
///
/// Rules use gjson-style array segments (`$.data.books.#.name`, trailing
/// `.#`); both become `[*]`. A missing `$` root is supplied.
fn normalize_path(path: &str) -> String {
    let mut p = path.trim().to_string();
    p = p.replace(".#.", "[*].");
    if let Some(stripped) = p.strip_suffix(".#") {
        p = format!("{}[*]", stripped);
    }
    if !p.starts_with('$') {
        if p.starts_with('.') || p.starts_with('[') {
            p = format!("${}", p);
        } else {
            p = format!("$.{}", p);
        }
    }
    p
}

/// Scalar mapping: null → "", booleans → "true"/"false", numbers → decimal
/// text; nested objects/arrays serialize to their raw JSON text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
