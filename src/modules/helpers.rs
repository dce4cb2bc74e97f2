// Shared utilities for modules
use crate::http::{HttpRequest, HttpResponse};
use std::collections::HashMap;
use std::time::Duration;

pub fn is_enabled(c: &HashMap<String, toml::Value>, m: &str) -> bool {
    config_bool(c, m, "enabled", true)
}

pub fn config_bool(c: &HashMap<String, toml::Value>, m: &str, k: &str, d: bool) -> bool {
    c.get(m).and_then(|v| v.get(k)).and_then(|v| v.as_bool()).unwrap_or(d)
}

pub fn config_u64(c: &HashMap<String, toml::Value>, m: &str, k: &str, d: u64) -> u64 {
    c.get(m).and_then(|v| v.get(k)).and_then(|v| v.as_integer()).map(|v| v.max(0) as u64).unwrap_or(d)
}

pub fn config_usize(c: &HashMap<String, toml::Value>, m: &str, k: &str, d: usize) -> usize {
    c.get(m).and_then(|v| v.get(k)).and_then(|v| v.as_integer()).map(|v| v.max(0) as usize).unwrap_or(d)
}

pub fn config_str(c: &HashMap<String, toml::Value>, m: &str, k: &str, d: &str) -> String {
    c.get(m).and_then(|v| v.get(k)).and_then(|v| v.as_str()).unwrap_or(d).to_string()
}

pub fn config_millis(c: &HashMap<String, toml::Value>, m: &str, k: &str, d: u64) -> Duration {
    Duration::from_millis(config_u64(c, m, k, d))
}

/// Parsed query parameter. `Ok(None)` when absent, `Err` carries the raw
/// value when present but unparsable.
pub fn query_num<T: std::str::FromStr>(r: &HttpRequest, name: &str) -> Result<Option<T>, String> {
    match r.query_param(name) {
        None => Ok(None),
        Some(v) => v.trim().parse::<T>().map(Some).map_err(|_| v),
    }
}

pub fn is_method(r: &HttpRequest, methods: &[&str]) -> bool {
    methods.iter().any(|m| r.method.eq_ignore_ascii_case(m))
}

/// Content types whose bodies are rendered as text.
pub fn is_textual(ct: &str) -> bool {
    let ct = ct.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("x-www-form-urlencoded")
}

/// Client input error with a descriptive message.
pub fn bad_request(msg: &str) -> HttpResponse {
    HttpResponse::json(400, &serde_json::json!({ "detail": msg }))
}
