//! Best-effort parameter recovery from malformed or truncated argument text.
//!
//! Used when a tag body or a structured argument string fails to decode as
//! JSON. Fields are scanned as `"key": "value"` pairs left to right, skipping
//! over each string value so keys inside values are not mistaken for fields.
//! A final unterminated string (stream cut mid-value) is kept as-is.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::normalize::canonical_param_key;
use crate::core::types::ToolName;

static KEY_OPEN_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_][A-Za-z0-9_\- ]*)"\s*:\s*""#).expect("key regex should compile")
});

static KEY_SCALAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_][A-Za-z0-9_\- ]*)"\s*:\s*(true|false|-?\d+(?:\.\d+)?)"#)
        .expect("scalar regex should compile")
});

static KEY_OPEN_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z_][A-Za-z0-9_\- ]*)"\s*:\s*\["#).expect("array regex should compile")
});

/// Scan a quoted JSON string body starting just after its opening quote.
///
/// Returns the raw (still escaped) body, the index just past the closing quote
/// (or the end of input), and whether the string was terminated.
fn scan_string(raw: &str, start: usize) -> (&str, usize, bool) {
    let bytes = raw.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return (&raw[start..i], i + 1, true),
            _ => i += 1,
        }
    }
    let mut body = &raw[start..];
    // Drop a dangling escape introduced by the cut.
    if body.ends_with('\\') && !body.ends_with("\\\\") {
        body = &body[..body.len() - 1];
    }
    (body, raw.len(), false)
}

/// Decode JSON string escapes, falling back to the common ones by hand.
pub fn unescape_json(body: &str) -> String {
    if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{body}\"")) {
        return decoded;
    }
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {}
        }
    }
    out
}

/// Scan the string items of an array opened just before `start`.
fn scan_string_array(raw: &str, start: usize) -> Vec<String> {
    let bytes = raw.as_bytes();
    let mut items = Vec::new();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' | b',' => i += 1,
            b'"' => {
                let (body, end, terminated) = scan_string(raw, i + 1);
                items.push(unescape_json(body));
                if !terminated {
                    break;
                }
                i = end;
            }
            _ => break,
        }
    }
    items
}

/// Collect every recognisable field in `raw`, first occurrence winning.
pub fn scan_fields(raw: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut pos = 0;
    // Regions covered by string values; scalar and array matches inside them
    // are ignored.
    let mut value_spans: Vec<(usize, usize)> = Vec::new();

    while pos < raw.len() {
        let Some(caps) = KEY_OPEN_STRING.captures_at(raw, pos) else {
            break;
        };
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let (body, end, terminated) = scan_string(raw, whole.end());
        value_spans.push((whole.end(), end));
        fields
            .entry(key.as_str().to_string())
            .or_insert_with(|| Value::String(unescape_json(body)));
        if !terminated {
            break;
        }
        pos = end;
    }

    let inside_value = |at: usize| value_spans.iter().any(|(s, e)| at >= *s && at < *e);

    for caps in KEY_SCALAR.captures_iter(raw) {
        let (Some(whole), Some(key), Some(scalar)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if inside_value(whole.start()) || fields.contains_key(key.as_str()) {
            continue;
        }
        let value = match scalar.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            number => match serde_json::from_str::<Value>(number) {
                Ok(value) => value,
                Err(_) => continue,
            },
        };
        fields.insert(key.as_str().to_string(), value);
    }

    for caps in KEY_OPEN_ARRAY.captures_iter(raw) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if inside_value(whole.start()) || fields.contains_key(key.as_str()) {
            continue;
        }
        let items = scan_string_array(raw, whole.end());
        fields.insert(
            key.as_str().to_string(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
    }

    fields
}

/// Recover `(tool name, parameters)` from a malformed tagged object.
///
/// The name comes from a `"tool"` or `"name"` field; every other field is kept
/// as a candidate parameter.
pub fn scan_tool_object(raw: &str) -> Option<(String, Map<String, Value>)> {
    let mut fields = scan_fields(raw);
    let name = ["tool", "name"]
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name.clone()),
            _ => None,
        })?;
    fields.remove("tool");
    fields.remove("name");
    fields.remove("id");
    Some((name, fields))
}

/// Targeted recovery for a known tool whose argument text did not decode.
///
/// Only tools with a defined strategy are recovered; everything else yields
/// `None` so the call is dropped rather than guessed at.
pub fn recover_parameters(tool: ToolName, raw: &str) -> Option<Map<String, Value>> {
    let wanted: &[&str] = match tool {
        ToolName::ReadFile | ToolName::DeleteFile | ToolName::CreateDirectory => &["path"],
        ToolName::ListFiles => &["path", "recursive"],
        ToolName::WriteFile => &["path", "content"],
        ToolName::ExecuteCommand => &["command", "args"],
        ToolName::EditFile
        | ToolName::SearchFiles
        | ToolName::FindFiles
        | ToolName::FetchUrl => return None,
    };

    let mut params = Map::new();
    for (key, value) in scan_fields(raw) {
        let key = canonical_param_key(tool, &key);
        if wanted.contains(&key.as_str()) && !params.contains_key(&key) {
            params.insert(key, value);
        }
    }
    (!params.is_empty()).then_some(params)
}
