//! Confirmation policy: which tool calls need explicit user approval.

use serde::{Deserialize, Serialize};

use crate::core::action_log::extract_target;
use crate::core::types::{ToolCall, ToolInput};

/// Substrings that make any call risky under the `dangerous` policy.
pub const RISK_KEYWORDS: [&str; 6] = ["delete", "drop", "reset", "overwrite", "force", "rm "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmPolicy {
    /// Execute everything immediately.
    Never,
    /// Ask only for mutating or risky-looking calls.
    #[default]
    Dangerous,
    /// Ask for every call.
    Always,
}

/// Decide whether `call` must be approved before it runs.
pub fn requires_confirmation(policy: ConfirmPolicy, dry_run: bool, call: &ToolCall) -> bool {
    if dry_run {
        return false;
    }
    match policy {
        ConfirmPolicy::Never => false,
        ConfirmPolicy::Always => true,
        ConfirmPolicy::Dangerous => call.tool().is_dangerous() || has_risk_keyword(call),
    }
}

fn has_risk_keyword(call: &ToolCall) -> bool {
    let mut text = extract_target(&call.parameters());
    if let ToolInput::ExecuteCommand { args, .. } = &call.input {
        for arg in args {
            text.push(' ');
            text.push_str(arg);
        }
        // Trailing space so a bare `rm` still matches "rm ".
        text.push(' ');
    }
    let lowered = text.to_lowercase();
    RISK_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &str) -> ToolCall {
        ToolCall::new(ToolInput::ReadFile {
            path: path.to_string(),
        })
    }

    fn command(cmd: &str, args: &[&str]) -> ToolCall {
        ToolCall::new(ToolInput::ExecuteCommand {
            command: cmd.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    #[test]
    fn dangerous_policy_skips_plain_reads() {
        assert!(!requires_confirmation(
            ConfirmPolicy::Dangerous,
            false,
            &read("src/lib.rs")
        ));
    }

    #[test]
    fn dangerous_policy_asks_for_commands_and_writes() {
        assert!(requires_confirmation(
            ConfirmPolicy::Dangerous,
            false,
            &command("ls", &[])
        ));
        let write = ToolCall::new(ToolInput::WriteFile {
            path: "a".to_string(),
            content: String::new(),
        });
        assert!(requires_confirmation(ConfirmPolicy::Dangerous, false, &write));
    }

    #[test]
    fn risk_keywords_flag_read_only_calls() {
        assert!(requires_confirmation(
            ConfirmPolicy::Dangerous,
            false,
            &read("scripts/drop_tables.sql")
        ));
    }

    #[test]
    fn never_and_dry_run_skip_confirmation() {
        assert!(!requires_confirmation(
            ConfirmPolicy::Never,
            false,
            &command("rm", &["-rf", "dist"])
        ));
        assert!(!requires_confirmation(
            ConfirmPolicy::Always,
            true,
            &read("a")
        ));
    }

    #[test]
    fn always_asks_for_everything() {
        assert!(requires_confirmation(ConfirmPolicy::Always, false, &read("a")));
    }
}
