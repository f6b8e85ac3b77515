//! Request header and body helpers for analytics extraction.

use axum::http::HeaderMap;
use serde_json::Value;

/// Extracts a header value as a string.
///
/// # Returns
/// * `Some(String)` - The header is present, valid UTF-8 and non-empty
/// * `None` - Header missing, empty, or not valid UTF-8
pub(crate) fn extract_header_as_string(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Client address as reported by the first hop of `x-forwarded-for`, or loopback if absent.
pub(crate) fn client_address(headers: &HeaderMap) -> String {
    extract_header_as_string(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next().map(|first| first.trim().to_string()))
        .filter(|address| !address.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Truthiness of a JSON value: `null`, `false`, `0`, `NaN` and `""` are falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
