//! Defensive readers over untyped provider payloads.
//!
//! Provider session files are heterogeneous and frequently malformed; every
//! reader here returns `Option` and leaves interpretation to the caller.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

pub fn as_record(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object()
}

pub fn as_array(value: &Value) -> Option<&[Value]> {
    value.as_array().map(|a| a.as_slice())
}

pub fn read_str<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record.get(key).and_then(|v| v.as_str())
}

pub fn read_string(record: &Map<String, Value>, key: &str) -> Option<String> {
    read_str(record, key).map(|s| s.to_string())
}

/// Lower-cased string read, for case-insensitive comparisons on type/role tags.
pub fn lower_string(record: &Map<String, Value>, key: &str) -> Option<String> {
    read_str(record, key).map(|s| s.to_ascii_lowercase())
}

pub fn read_record<'a>(
    record: &'a Map<String, Value>,
    key: &str,
) -> Option<&'a Map<String, Value>> {
    record.get(key).and_then(|v| v.as_object())
}

pub fn read_array<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a [Value]> {
    record.get(key).and_then(|v| v.as_array()).map(|a| a.as_slice())
}

/// Non-negative integer read. Accepts integers and integral floats.
pub fn read_u64(record: &Map<String, Value>, key: &str) -> Option<u64> {
    match record.get(key) {
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)
            }
        }
        _ => None,
    }
}

pub fn read_f64(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record.get(key).and_then(|v| v.as_f64())
}

/// Best-effort text out of a value: plain strings, `{text}`/`{content}`
/// wrappers, and arrays of text-bearing blocks (joined with newlines).
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            if let Some(s) = read_str(map, "text") {
                return Some(s.to_string());
            }
            map.get("content").and_then(extract_text)
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(extract_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "created_at", "createdAt", "ts"];

/// Read an event timestamp under any of the common keys, normalizing numeric
/// epoch values (seconds or milliseconds) to ISO-8601 UTC.
pub fn extract_timestamp(record: &Map<String, Value>) -> Option<String> {
    for key in TIMESTAMP_KEYS {
        match record.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => {
                if let Some(iso) = epoch_to_iso(n.as_f64()?) {
                    return Some(iso);
                }
            }
            _ => {}
        }
    }
    None
}

/// Epoch values above ~2001-09 in milliseconds are treated as millis,
/// everything else as seconds.
fn epoch_to_iso(epoch: f64) -> Option<String> {
    let millis = if epoch >= 1_000_000_000_000.0 {
        epoch as i64
    } else {
        (epoch * 1000.0) as i64
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Token usage out of an event record: `usage.{input,output}_tokens`,
/// `usage.{prompt,completion}_tokens`, or `tokens.{input,output}`.
pub fn extract_usage(record: &Map<String, Value>) -> (Option<u64>, Option<u64>) {
    if let Some(usage) = read_record(record, "usage") {
        let input = read_u64(usage, "input_tokens").or_else(|| read_u64(usage, "prompt_tokens"));
        let output =
            read_u64(usage, "output_tokens").or_else(|| read_u64(usage, "completion_tokens"));
        if input.is_some() || output.is_some() {
            return (input, output);
        }
    }
    if let Some(tokens) = read_record(record, "tokens") {
        return (read_u64(tokens, "input"), read_u64(tokens, "output"));
    }
    (None, None)
}

/// Milliseconds between two ISO-8601 timestamps, when both parse and the
/// interval is non-negative.
pub fn millis_between(start: &str, end: &str) -> Option<u64> {
    let start = chrono::DateTime::parse_from_rfc3339(start).ok()?;
    let end = chrono::DateTime::parse_from_rfc3339(end).ok()?;
    let delta = end.signed_duration_since(start).num_milliseconds();
    u64::try_from(delta).ok()
}
