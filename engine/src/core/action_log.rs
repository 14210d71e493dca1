//! Derivation of `ActionLog` entries from executed tool calls.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::core::types::{ActionLog, ActionResult, ActionType, ToolResult};

/// Detail limit for command output.
pub const COMMAND_DETAILS_LIMIT: usize = 1000;
/// Detail limit for every other action type.
pub const DETAILS_LIMIT: usize = 500;
/// Target recorded when no identifying parameter is present.
pub const UNKNOWN_TARGET: &str = "unknown";

const TARGET_KEYS: [&str; 4] = ["path", "command", "pattern", "url"];

/// Pick the action target from the first present parameter in priority order.
pub fn extract_target(parameters: &Map<String, Value>) -> String {
    TARGET_KEYS
        .iter()
        .filter_map(|key| parameters.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_TARGET.to_string())
}

/// Build the log entry for a tool result, stamped with the current time.
pub fn action_log_for(result: &ToolResult) -> ActionLog {
    action_log_at(result, Utc::now())
}

/// Build the log entry for a tool result with an explicit timestamp.
pub fn action_log_at(result: &ToolResult, timestamp: DateTime<Utc>) -> ActionLog {
    let action_type = result.tool.action_type();
    let limit = match action_type {
        ActionType::Command => COMMAND_DETAILS_LIMIT,
        _ => DETAILS_LIMIT,
    };
    let (outcome, raw_details) = if result.success {
        (ActionResult::Success, result.output.as_str())
    } else {
        (
            ActionResult::Error,
            result.error.as_deref().unwrap_or("unknown error"),
        )
    };
    let details = (!raw_details.is_empty()).then(|| truncate_chars(raw_details, limit));

    ActionLog {
        action_type,
        target: extract_target(&result.parameters),
        result: outcome,
        details,
        timestamp,
    }
}

/// Keep at most `limit` characters (never splits a UTF-8 sequence).
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ToolCall, ToolInput};
    use serde_json::json;

    fn command_call() -> ToolCall {
        ToolCall::new(ToolInput::ExecuteCommand {
            command: "cargo".to_string(),
            args: vec!["test".to_string()],
        })
    }

    #[test]
    fn target_prefers_path_over_other_keys() {
        let params = json!({"pattern": "foo", "path": "src"});
        let Value::Object(map) = params else {
            unreachable!()
        };
        assert_eq!(extract_target(&map), "src");
    }

    #[test]
    fn target_defaults_to_unknown() {
        assert_eq!(extract_target(&Map::new()), UNKNOWN_TARGET);
    }

    #[test]
    fn command_details_keep_a_thousand_chars() {
        let result = ToolResult::success(&command_call(), "x".repeat(5000));
        let log = action_log_for(&result);
        assert_eq!(log.action_type, ActionType::Command);
        assert_eq!(log.target, "cargo");
        assert_eq!(log.details.expect("details").chars().count(), 1000);
    }

    #[test]
    fn other_details_keep_five_hundred_chars() {
        let call = ToolCall::new(ToolInput::ReadFile {
            path: "big.txt".to_string(),
        });
        let result = ToolResult::success(&call, "é".repeat(900));
        let log = action_log_for(&result);
        assert_eq!(log.details.expect("details").chars().count(), 500);
    }

    #[test]
    fn failures_record_the_error_message() {
        let result = ToolResult::failure(&command_call(), "command timed out after 60s")
            .with_output("partial output");
        let log = action_log_for(&result);
        assert_eq!(log.result, ActionResult::Error);
        assert_eq!(log.details.as_deref(), Some("command timed out after 60s"));
    }
}
