//! Turn raw model output into canonical [`ToolCall`]s.
//!
//! Text encodings are tried in order: XML-like tags, fenced code blocks, then
//! the first bare JSON object (only when nothing else matched). Structured
//! encodings (function-call lists and tool-use content blocks) are decoded
//! directly. Every strategy yields `Option`; nothing here returns an error, and
//! the worst case is an empty list.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::normalize::canonical_tool;
use crate::core::partial::{recover_parameters, scan_tool_object};
use crate::core::tools::{input_from_params, normalize_params};
use crate::core::types::{ContentBlock, FunctionCall, ModelResponse, ToolCall, ToolName};

/// Keys that may wrap the parameter object.
const PARAM_KEYS: [&str; 4] = ["parameters", "arguments", "params", "input"];

static TAG_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(tool_call|tool)\s*>").expect("tag regex should compile")
});

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_\-]*)[ \t]*\r?\n(.*?)```").expect("fence regex should compile")
});

/// Ordered call list with de-duplication by `(tool, parameters)`.
#[derive(Default)]
struct CallSet {
    calls: Vec<ToolCall>,
    seen: HashSet<(ToolName, String)>,
}

impl CallSet {
    fn push(&mut self, call: ToolCall) {
        if self.seen.insert(call.snapshot()) {
            self.calls.push(call);
        }
    }

    fn extend(&mut self, calls: impl IntoIterator<Item = ToolCall>) {
        for call in calls {
            self.push(call);
        }
    }
}

/// Parse every tool call embedded in free-form model text.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut set = CallSet::default();

    for body in tagged_bodies(text) {
        set.extend(calls_from_tag_body(body));
    }

    for (lang, body) in fenced_blocks(text) {
        let explicit = matches!(lang.to_ascii_lowercase().as_str(), "tool" | "tool_call");
        match parse_lenient(body) {
            Some(value) => set.extend(calls_from_value(&value, explicit)),
            None if explicit => set.extend(call_from_broken_object(body)),
            None => {}
        }
    }

    if set.calls.is_empty() {
        set.extend(first_bare_call(text));
    }

    set.calls
}

/// Decode a function-envelope call list.
///
/// Argument strings that fail to decode go through partial recovery; tools
/// without a recovery strategy are dropped.
pub fn parse_function_calls(calls: &[FunctionCall]) -> Vec<ToolCall> {
    let mut set = CallSet::default();
    for call in calls {
        if let Some(parsed) = call_from_encoded(&call.name, &call.arguments, call.id.clone()) {
            set.push(parsed);
        }
    }
    set.calls
}

/// Decode a flat tool-use content-block list.
pub fn parse_content_blocks(blocks: &[ContentBlock]) -> Vec<ToolCall> {
    let mut set = CallSet::default();
    for block in blocks {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };
        let parsed = match input {
            Value::Object(params) => build_call(name, params, id.clone()),
            Value::String(encoded) => call_from_encoded(name, encoded, id.clone()),
            _ => None,
        };
        if let Some(parsed) = parsed {
            set.push(parsed);
        }
    }
    set.calls
}

/// Extract calls from any model response shape.
///
/// Structured responses that carry no decodable calls fall back to scanning
/// their text.
pub fn parse_response(response: &ModelResponse) -> Vec<ToolCall> {
    let structured = match response {
        ModelResponse::Text(text) => return parse_tool_calls(text),
        ModelResponse::FunctionCalls { calls, .. } => parse_function_calls(calls),
        ModelResponse::ContentBlocks(blocks) => parse_content_blocks(blocks),
    };
    if structured.is_empty() {
        parse_tool_calls(&response.text())
    } else {
        structured
    }
}

/// Normalize, validate, and construct one call.
pub fn build_call(name: &str, raw: &Map<String, Value>, id: Option<String>) -> Option<ToolCall> {
    let Some(tool) = canonical_tool(name) else {
        debug!(name, "dropping call with unknown tool name");
        return None;
    };
    build_for_tool(tool, raw, id)
}

fn build_for_tool(tool: ToolName, raw: &Map<String, Value>, id: Option<String>) -> Option<ToolCall> {
    let params = normalize_params(tool, raw);
    match input_from_params(tool, &params) {
        Some(input) => Some(ToolCall { input, id }),
        None => {
            debug!(%tool, "dropping call with missing or invalid parameters");
            None
        }
    }
}

fn call_from_encoded(name: &str, encoded: &str, id: Option<String>) -> Option<ToolCall> {
    let tool = canonical_tool(name)?;
    if encoded.trim().is_empty() {
        return build_for_tool(tool, &Map::new(), id);
    }
    match parse_lenient(encoded) {
        Some(Value::Object(params)) => build_for_tool(tool, &params, id),
        _ => {
            let recovered = recover_parameters(tool, encoded)?;
            debug!(%tool, "recovered parameters from undecodable arguments");
            build_for_tool(tool, &recovered, id)
        }
    }
}

fn tagged_bodies(text: &str) -> Vec<&str> {
    let mut bodies = Vec::new();
    let mut pos = 0;
    while let Some(caps) = TAG_OPEN.captures_at(text, pos) {
        let (Some(open), Some(tag)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let close = format!("</{}>", tag.as_str());
        let start = open.end();
        match text[start..].find(&close) {
            Some(offset) => {
                bodies.push(&text[start..start + offset]);
                pos = start + offset + close.len();
            }
            None => {
                // Stream prefix: the body runs to the end of the text.
                bodies.push(&text[start..]);
                break;
            }
        }
    }
    bodies
}

fn fenced_blocks(text: &str) -> Vec<(&str, &str)> {
    FENCE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect()
}

fn calls_from_tag_body(body: &str) -> Vec<ToolCall> {
    let body = strip_fence(body);
    match parse_lenient(body) {
        Some(value) => {
            let calls = calls_from_value(&value, true);
            if calls.is_empty() {
                call_from_broken_object(body).into_iter().collect()
            } else {
                calls
            }
        }
        None => call_from_broken_object(body).into_iter().collect(),
    }
}

fn call_from_broken_object(body: &str) -> Option<ToolCall> {
    let (name, fields) = scan_tool_object(body)?;
    debug!(name, "using fallback extraction for malformed tool object");
    build_call(&name, &fields, None)
}

fn calls_from_value(value: &Value, accept_name: bool) -> Vec<ToolCall> {
    match value {
        Value::Object(object) => call_from_object(object, accept_name).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object())
            .filter_map(|object| call_from_object(object, accept_name))
            .collect(),
        _ => Vec::new(),
    }
}

fn call_from_object(object: &Map<String, Value>, accept_name: bool) -> Option<ToolCall> {
    let name = object
        .get("tool")
        .and_then(Value::as_str)
        .or_else(|| {
            accept_name
                .then(|| object.get("name").and_then(Value::as_str))
                .flatten()
        })?;
    let id = object.get("id").and_then(Value::as_str).map(str::to_string);

    let wrapped = PARAM_KEYS.iter().find_map(|key| object.get(*key));
    match wrapped {
        Some(Value::Object(params)) => build_call(name, params, id),
        Some(Value::String(encoded)) => call_from_encoded(name, encoded, id),
        _ => {
            let flat: Map<String, Value> = object
                .iter()
                .filter(|(key, _)| !matches!(key.as_str(), "tool" | "name" | "id"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            build_call(name, &flat, id)
        }
    }
}

/// First balanced JSON object in `text` that names a tool.
fn first_bare_call(text: &str) -> Option<ToolCall> {
    object_spans(text).into_iter().find_map(|(start, end)| {
        let value = parse_lenient(&text[start..end])?;
        let object = value.as_object()?;
        if !object.contains_key("tool") {
            return None;
        }
        call_from_object(object, false)
    })
}

/// Byte ranges of every balanced `{...}` in `text`, ordered by start.
///
/// One pass with a stack of open brackets, so unbalanced prose costs linear
/// time. Quotes only delimit strings inside an open bracket; at the top level
/// they are prose.
fn object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut open: Vec<(usize, char)> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' | '[' => open.push((i, c)),
            '}' | ']' => {
                if let Some((start, '{')) = open.pop() {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }
    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

/// Remove a surrounding code fence, if any.
fn strip_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse the first JSON value in `text`, tolerating trailing commas and
/// surrounding prose.
pub fn parse_lenient(text: &str) -> Option<Value> {
    let text = strip_fence(text);
    let start = text.find(['{', '['])?;
    let end = find_json_end(&text[start..])?;
    let candidate = &text[start..start + end];
    serde_json::from_str(candidate)
        .ok()
        .or_else(|| serde_json::from_str(&strip_trailing_commas(candidate)).ok())
}

/// Byte length of the balanced JSON object or array at the start of `text`.
pub fn find_json_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop commas that directly precede `}` or `]`, ignoring string contents.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolInput;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn read(path: &str) -> ToolInput {
        ToolInput::ReadFile {
            path: path.to_string(),
        }
    }

    #[test]
    fn plain_prose_yields_no_calls() {
        for text in ["", "All done!", "Use {braces} freely", "```rust\nfn main() {}\n```"] {
            assert!(parse_tool_calls(text).is_empty(), "{text}");
        }
    }

    #[test]
    fn three_encodings_of_one_payload_dedupe() {
        let payload = r#"{"tool": "read_file", "parameters": {"path": "a.txt"}}"#;
        let text = format!(
            "<tool_call>{payload}</tool_call>\n```tool\n{payload}\n```\nalso {payload}"
        );
        let calls = parse_tool_calls(&text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, read("a.txt"));
    }

    #[test]
    fn tag_tolerates_trailing_comma_and_synonyms() {
        let text = r#"<tool>{"name": "ReadFile", "arguments": {"file_path": "src/lib.rs",},}</tool>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, read("src/lib.rs"));
    }

    #[test]
    fn malformed_tag_uses_fallback_extractor() {
        let text = r#"<tool_call>{"tool": "write_file", "parameters": {"path": "out.txt", "content": "hello"</tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(
            calls[0].input,
            ToolInput::WriteFile {
                path: "out.txt".to_string(),
                content: "hello".to_string(),
            }
        );
    }

    #[test]
    fn unclosed_tag_runs_to_end_of_text() {
        let text = r#"Reading now <tool_call>{"tool": "read_file", "parameters": {"path": "x.md"}}"#;
        assert_eq!(parse_tool_calls(text)[0].input, read("x.md"));
    }

    #[test]
    fn bare_json_is_ignored_when_tags_matched() {
        let text = r#"<tool>{"tool": "read_file", "path": "a"}</tool> then {"tool": "read_file", "path": "b"}"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, read("a"));
    }

    #[test]
    fn fenced_json_without_tool_key_is_not_a_call() {
        let text = "```json\n{\"name\": \"read_file\", \"path\": \"a\"}\n```";
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn unknown_tool_names_are_dropped() {
        let text = r#"<tool_call>{"tool": "launch_rockets", "parameters": {}}</tool_call>"#;
        assert!(parse_tool_calls(text).is_empty());
    }

    #[test]
    fn function_calls_recover_truncated_arguments() {
        let calls = vec![
            FunctionCall {
                id: Some("c1".to_string()),
                name: "write_file".to_string(),
                arguments: r#"{"path": "notes.md", "content": "line one\nline tw"#.to_string(),
            },
            FunctionCall {
                id: Some("c2".to_string()),
                name: "edit_file".to_string(),
                arguments: r#"{"path": "notes.md", "old_text": "x"#.to_string(),
            },
        ];
        let parsed = parse_function_calls(&calls);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id.as_deref(), Some("c1"));
        assert_eq!(
            parsed[0].input,
            ToolInput::WriteFile {
                path: "notes.md".to_string(),
                content: "line one\nline tw".to_string(),
            }
        );
    }

    #[test]
    fn content_blocks_use_decoded_input() {
        let blocks = vec![
            ContentBlock::Text {
                text: "Let me look.".to_string(),
            },
            ContentBlock::ToolUse {
                id: Some("tu_1".to_string()),
                name: "list-files".to_string(),
                input: json!({"path": ".", "recursive": "true"}),
            },
        ];
        let parsed = parse_content_blocks(&blocks);
        assert_eq!(
            parsed[0].input,
            ToolInput::ListFiles {
                path: ".".to_string(),
                recursive: true,
            }
        );
    }

    #[test]
    fn structured_response_without_calls_falls_back_to_text() {
        let response = ModelResponse::FunctionCalls {
            text: r#"<tool>{"tool": "read_file", "path": "a"}</tool>"#.to_string(),
            calls: Vec::new(),
        };
        assert_eq!(parse_response(&response)[0].input, read("a"));
    }

    #[test]
    fn find_json_end_respects_strings() {
        let text = r#"{"a": "}{", "b": [1, 2]} trailing"#;
        assert_eq!(find_json_end(text), Some(text.len() - " trailing".len()));
        assert_eq!(find_json_end(r#"{"a": 1"#), None);
    }

    #[test]
    fn trailing_commas_inside_strings_survive() {
        assert_eq!(strip_trailing_commas(r#"{"a": ",}",}"#), r#"{"a": ",}"}"#);
    }

    #[test]
    fn bare_call_after_unbalanced_braces() {
        let noise = "{ ".repeat(20_000);
        let text = format!(
            r#"{noise} then {{"tool": "read_file", "parameters": {{"path": "a.rs"}}}}"#
        );
        let call = first_bare_call(&text).expect("call");
        assert_eq!(
            call.input,
            ToolInput::ReadFile {
                path: "a.rs".to_string()
            }
        );
    }

    #[test]
    fn object_spans_skip_non_objects_and_strings() {
        let text = r#"[1] {"a": "}{"} x {"b": {"c": 1}}"#;
        let spans: Vec<&str> = object_spans(text)
            .into_iter()
            .map(|(start, end)| &text[start..end])
            .collect();
        assert_eq!(spans, vec![r#"{"a": "}{"}"#, r#"{"b": {"c": 1}}"#, r#"{"c": 1}"#]);
    }
}
