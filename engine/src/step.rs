//! One agent iteration: a single model call and the tool calls it requests.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::action_log::{action_log_for, truncate_chars};
use crate::core::cancel::CancelToken;
use crate::core::confirm::{ConfirmPolicy, requires_confirmation};
use crate::core::parser::parse_response;
use crate::core::tools::SchemaDialect;
use crate::core::types::{ActionLog, Message, ToolCall, ToolResult};
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::tool_executor::ToolExecutor;
use crate::session::{AgentEvent, AgentState, Confirmation, Confirmer, Events};

pub const DENIED_BY_USER: &str = "denied by user";

const SKIPPED_AFTER_DENIAL: &str = "not run: an earlier call in this batch was denied by the user";

const NUDGE: &str = "Your last reply was empty. Continue the task with a tool call, \
or reply with a short summary if the task is finished.";

/// Everything one iteration needs from its session.
pub struct StepContext<'s> {
    pub model: &'s dyn ModelClient,
    pub confirmer: &'s dyn Confirmer,
    pub executor: &'s ToolExecutor<'s>,
    pub cancel: &'s CancelToken,
    pub policy: ConfirmPolicy,
    pub system_prompt: &'s str,
    pub dialect: SchemaDialect,
    pub tools: &'s [Value],
    pub max_tool_output_chars: usize,
}

/// How the iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEnd {
    /// No tool calls and non-empty text: the model's final answer.
    Finished(String),
    /// Tool calls ran (or were denied); ask the model again.
    Continue,
    /// Empty reply; a nudge was appended to the history.
    Nudged,
    /// Cancellation was observed.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub end: StepEnd,
    /// Entries produced by this iteration, in execution order.
    pub actions: Vec<ActionLog>,
    /// A write, edit, or delete was applied to disk.
    pub mutated: bool,
}

impl StepOutcome {
    fn new(end: StepEnd) -> Self {
        Self {
            end,
            actions: Vec::new(),
            mutated: false,
        }
    }
}

/// Run one iteration against `history`, appending the assistant turn and
/// one tool message per requested call.
///
/// Only a failed model call is an `Err`; tool failures and denials are
/// reported back to the model through the history.
#[instrument(skip_all, fields(history = history.len()))]
pub fn run_step(
    ctx: &StepContext<'_>,
    history: &mut Vec<Message>,
    events: &mut Events<'_>,
) -> Result<StepOutcome> {
    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::new(StepEnd::Cancelled));
    }
    events.transition(AgentState::Thinking);

    let request = ModelRequest {
        system_prompt: ctx.system_prompt,
        messages: history.as_slice(),
        dialect: ctx.dialect,
        tools: ctx.tools,
    };
    let mut on_chunk = |chunk: &str| events.emit(AgentEvent::Chunk(chunk));
    let response = match ctx.model.complete(&request, ctx.cancel, &mut on_chunk) {
        Ok(response) => response,
        Err(_) if ctx.cancel.is_cancelled() => return Ok(StepOutcome::new(StepEnd::Cancelled)),
        Err(err) => return Err(err.context("model call failed")),
    };
    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::new(StepEnd::Cancelled));
    }

    let text = response.text();
    let calls = parse_response(&response);
    debug!(calls = calls.len(), text_len = text.len(), "model replied");
    history.push(Message::assistant(assistant_content(&text, &calls)));

    if calls.is_empty() {
        if text.trim().is_empty() {
            history.push(Message::user(NUDGE));
            return Ok(StepOutcome::new(StepEnd::Nudged));
        }
        return Ok(StepOutcome::new(StepEnd::Finished(text.trim().to_string())));
    }

    let mut outcome = StepOutcome::new(StepEnd::Continue);
    let dry_run = ctx.executor.is_dry_run();
    for (index, call) in calls.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            outcome.end = StepEnd::Cancelled;
            return Ok(outcome);
        }

        let confirm = requires_confirmation(ctx.policy, dry_run, call);
        if confirm {
            let preview = ctx.executor.preview(call).ok().flatten();
            if let Some(diff) = &preview {
                events.emit(AgentEvent::Preview { call, diff });
            }
            events.transition(AgentState::AwaitingConfirmation);
            if ctx.confirmer.confirm(call, preview.as_ref()) == Confirmation::Deny {
                info!(tool = %call.tool(), "call denied");
                let result = ToolResult::failure(call, DENIED_BY_USER);
                let log = action_log_for(&result);
                events.emit(AgentEvent::Denied(call));
                events.emit(AgentEvent::Action(&log));
                outcome.actions.push(log);
                history.push(tool_message(call, &result, ctx.max_tool_output_chars));
                for skipped in &calls[index + 1..] {
                    history.push(Message::tool(SKIPPED_AFTER_DENIAL, skipped.id.clone()));
                }
                return Ok(outcome);
            }
        }

        events.transition(AgentState::Executing);
        let execution = ctx.executor.execute(call, ctx.cancel);
        if let Some(diff) = execution.diff.as_ref().filter(|_| !confirm) {
            events.emit(AgentEvent::Preview { call, diff });
        }
        events.emit(AgentEvent::Action(&execution.log));
        if execution.result.success && call.tool().mutates_files() && !dry_run {
            outcome.mutated = true;
        }
        if !execution.result.success {
            warn!(tool = %call.tool(), error = ?execution.result.error, "tool call failed");
        }
        history.push(tool_message(call, &execution.result, ctx.max_tool_output_chars));
        outcome.actions.push(execution.log);
    }

    if ctx.cancel.is_cancelled() {
        outcome.end = StepEnd::Cancelled;
    }
    Ok(outcome)
}

/// Assistant turn as recorded in the history. Calls that arrived without
/// any text are kept as their JSON form so the model sees what it asked for.
fn assistant_content(text: &str, calls: &[ToolCall]) -> String {
    if !text.trim().is_empty() || calls.is_empty() {
        return text.to_string();
    }
    serde_json::to_string(calls).unwrap_or_default()
}

fn tool_message(call: &ToolCall, result: &ToolResult, limit: usize) -> Message {
    Message::tool(render_tool_result(result, limit), call.id.clone())
}

/// Text fed back to the model for one tool result, capped at `limit` chars.
pub fn render_tool_result(result: &ToolResult, limit: usize) -> String {
    let status = if result.success { "ok" } else { "error" };
    let mut body = String::new();
    if let Some(error) = &result.error {
        body.push_str("Error: ");
        body.push_str(error);
    }
    if !result.output.is_empty() {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&result.output);
    }
    if body.is_empty() {
        body.push_str("(no output)");
    }
    let text = format!("{} [{status}]\n{body}", result.tool);
    let total = text.chars().count();
    if total <= limit {
        return text;
    }
    format!(
        "{}\n[... truncated {} chars]",
        truncate_chars(&text, limit),
        total - limit
    )
}
