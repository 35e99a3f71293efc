//! Best-effort decoding of doorbell event payloads.
//!
//! Button and motion datapoints carry opaque blobs whose format varies by
//! firmware: base64-wrapped JSON, bare JSON, almost-JSON with single quotes,
//! binary, or a plain scalar. [`decode`] tries each strategy in a fixed
//! order and always produces a structured payload plus the tag of the
//! strategy that won; it never fails.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::{Value, json};

use crate::value::DeviceValue;

/// Default OSS bucket used when a payload names a file but no bucket.
pub const DEFAULT_BUCKET: &str = "ty-us-storage30-pic";

/// Which decoding strategy produced the payload. Reported alongside every
/// decode result for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Value was already a structured map or list.
    Passthrough,
    /// Base64 (standard, padded or URL-safe) wrapping JSON.
    Base64Json,
    /// The string parsed directly as JSON.
    Json,
    /// JSON after repairing single quotes.
    RepairedJson,
    /// JSON object/array extracted from inside a larger string.
    EmbeddedJson,
    /// Binary payload that decoded as UTF-8 JSON.
    Utf8Json,
    /// Binary payload that decoded as UTF-8 text.
    Utf8Text,
    /// Binary payload wrapped as a hex dump.
    HexDump,
    /// Scalar wrapped into a single-key payload.
    Scalar,
    /// Nothing matched; the raw value is wrapped verbatim.
    Fallback,
}

impl DecodeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStrategy::Passthrough => "passthrough",
            DecodeStrategy::Base64Json => "base64_json",
            DecodeStrategy::Json => "json",
            DecodeStrategy::RepairedJson => "repaired_json",
            DecodeStrategy::EmbeddedJson => "embedded_json",
            DecodeStrategy::Utf8Json => "utf8_json",
            DecodeStrategy::Utf8Text => "utf8_text",
            DecodeStrategy::HexDump => "hex_dump",
            DecodeStrategy::Scalar => "scalar",
            DecodeStrategy::Fallback => "fallback",
        }
    }
}

/// Decode an opaque datapoint value into a structured payload.
///
/// Total: every branch has a defined fallback, so this never panics and
/// never returns an error.
pub fn decode(raw: &DeviceValue) -> (Value, DecodeStrategy) {
    match raw {
        DeviceValue::Map(m) => (Value::Object(m.clone()), DecodeStrategy::Passthrough),
        DeviceValue::List(l) => (Value::Array(l.clone()), DecodeStrategy::Passthrough),
        DeviceValue::Str(s) => decode_str(s),
        DeviceValue::Bytes(b) => decode_bytes(b),
        DeviceValue::Bool(b) => (json!({ "value": b }), DecodeStrategy::Scalar),
        DeviceValue::Int(i) => (json!({ "value": i }), DecodeStrategy::Scalar),
        DeviceValue::Float(f) => (json!({ "value": f }), DecodeStrategy::Scalar),
        DeviceValue::Null => (json!({ "value": Value::Null }), DecodeStrategy::Scalar),
    }
}

fn decode_str(s: &str) -> (Value, DecodeStrategy) {
    if let Some(v) = try_base64_json(s) {
        return (v, DecodeStrategy::Base64Json);
    }
    if let Some(v) = parse_structured(s) {
        return (v, DecodeStrategy::Json);
    }
    // Some firmware emits pseudo-JSON with single quotes.
    if s.contains('\'') {
        let repaired = s.replace('\'', "\"");
        if let Some(v) = parse_structured(&repaired) {
            return (v, DecodeStrategy::RepairedJson);
        }
    }
    if let Some(v) = extract_embedded_json(s) {
        return (v, DecodeStrategy::EmbeddedJson);
    }
    (json!({ "raw_value": s }), DecodeStrategy::Fallback)
}

fn decode_bytes(b: &[u8]) -> (Value, DecodeStrategy) {
    match std::str::from_utf8(b) {
        Ok(text) => {
            if let Some(v) = parse_structured(text) {
                (v, DecodeStrategy::Utf8Json)
            } else {
                (json!({ "text": text }), DecodeStrategy::Utf8Text)
            }
        }
        Err(_) => (
            json!({ "type": "binary", "hex": hex::encode(b), "length": b.len() }),
            DecodeStrategy::HexDump,
        ),
    }
}

/// Parse a string as JSON, accepting only structured results. Scalars are
/// rejected so coincidental parses ("123") do not shadow the scalar wrapper.
fn parse_structured(s: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}

fn try_base64_json(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if trimmed.len() < 4 {
        return None;
    }
    let mut padded = trimmed.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let candidates = [
        STANDARD.decode(trimmed),
        STANDARD.decode(&padded),
        URL_SAFE.decode(&padded),
        URL_SAFE_NO_PAD.decode(trimmed),
    ];
    for decoded in candidates.into_iter().flatten() {
        if let Ok(text) = std::str::from_utf8(&decoded)
            && let Some(v) = parse_structured(text)
        {
            return Some(v);
        }
    }
    None
}

/// Scan for a `{...}` or `[...]` region embedded in a larger string and try
/// to parse it.
fn extract_embedded_json(s: &str) -> Option<Value> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (s.find(open), s.rfind(close))
            && end > start
            && let Some(v) = parse_structured(&s[start..=end])
        {
            return Some(v);
        }
    }
    None
}

/// Heuristically extract an image URL from a decoded event payload.
///
/// Known shapes, first match wins:
/// - `{"bucket": b, "files": [[path, key], ...]}` cloud-storage reports
/// - direct `url` / `image_url` fields
/// - `fileId` + `timeStamp` pairs (reconstructed against the default bucket)
/// - any string field that already looks like a URL or image path
/// - the same rules applied recursively to nested maps and lists
pub fn extract_image_url(payload: &Value) -> Option<String> {
    match payload {
        Value::Object(map) => {
            if let (Some(bucket), Some(files)) = (
                map.get("bucket").and_then(Value::as_str),
                map.get("files").and_then(Value::as_array),
            ) && let Some(path) = first_file_path(files)
            {
                return Some(oss_url(bucket, &path));
            }
            for key in ["url", "image_url", "imageUrl"] {
                if let Some(url) = map.get(key).and_then(Value::as_str)
                    && !url.is_empty()
                {
                    return Some(url.to_string());
                }
            }
            if let (Some(file_id), Some(ts)) = (
                map.get("fileId").and_then(json_string),
                map.get("timeStamp").and_then(json_string),
            ) {
                return Some(oss_url(DEFAULT_BUCKET, &format!("/{}-{}.jpg", file_id, ts)));
            }
            for value in map.values() {
                if let Value::String(s) = value
                    && looks_like_image_ref(s)
                {
                    return Some(normalize_image_ref(s));
                }
            }
            map.values().find_map(extract_image_url)
        }
        Value::Array(list) => list.iter().find_map(extract_image_url),
        Value::String(s) if looks_like_image_ref(s) => Some(normalize_image_ref(s)),
        _ => None,
    }
}

/// First path-like entry of a cloud-storage `files` list. Entries are either
/// `[path, key]` pairs or bare path strings.
fn first_file_path(files: &[Value]) -> Option<String> {
    files.iter().find_map(|entry| match entry {
        Value::Array(pair) => pair.first().and_then(Value::as_str).map(str::to_string),
        Value::String(path) => Some(path.clone()),
        _ => None,
    })
}

fn json_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn oss_url(bucket: &str, path: &str) -> String {
    let sep = if path.starts_with('/') { "" } else { "/" };
    format!("https://{}.oss-us-west-1.aliyuncs.com{}{}", bucket, sep, path)
}

fn looks_like_image_ref(s: &str) -> bool {
    if s.starts_with("http://") || s.starts_with("https://") {
        return true;
    }
    s.starts_with('/')
        && [".jpg", ".jpeg", ".png", ".gif"]
            .iter()
            .any(|ext| s.to_ascii_lowercase().ends_with(ext))
}

fn normalize_image_ref(s: &str) -> String {
    if s.starts_with('/') {
        oss_url(DEFAULT_BUCKET, s)
    } else {
        s.to_string()
    }
}
