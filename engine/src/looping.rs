//! Task loop: iterate steps until a terminal state, then verify and auto-fix.

use std::fmt;
use std::time::Duration;

use anyhow::Error;
use tracing::{info, instrument, warn};

use crate::core::budget::{Budget, BudgetStop};
use crate::core::diagnostics::format_errors_for_agent;
use crate::core::tools::export_schemas;
use crate::core::types::{ActionLog, Message, VerifyResult};
use crate::io::prompt::SystemPromptInputs;
use crate::io::tool_executor::{ExecutorSettings, ToolExecutor};
use crate::io::verifier::Verifier;
use crate::session::{AgentEvent, AgentSession, AgentState, Events};
use crate::step::{StepContext, StepEnd, run_step};

/// Why a task stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    IterationLimit { max: u32 },
    TimeLimit { max: Duration },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("cancelled"),
            AbortReason::IterationLimit { max } => write!(f, "iteration limit of {max} reached"),
            AbortReason::TimeLimit { max } => {
                write!(f, "time limit of {}s reached", max.as_secs())
            }
        }
    }
}

impl From<BudgetStop> for AbortReason {
    fn from(stop: BudgetStop) -> Self {
        match stop {
            BudgetStop::Iterations { max } => AbortReason::IterationLimit { max },
            BudgetStop::Duration { max } => AbortReason::TimeLimit { max },
        }
    }
}

#[derive(Debug)]
pub enum TaskStatus {
    Completed,
    Aborted(AbortReason),
    /// The model call failed; the loop cannot continue without it.
    Failed(Error),
}

/// Terminal result of one task. Every status carries the actions taken so far.
#[derive(Debug)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub actions: Vec<ActionLog>,
    /// Results of every verification pass, in order.
    pub verification: Vec<VerifyResult>,
    pub fix_attempts: u32,
    /// Model calls made.
    pub iterations: u32,
    /// The model's final answer, when it gave one.
    pub final_message: Option<String>,
    /// Set when the task completed with verification still failing, or when
    /// verification could not run.
    pub residual: Option<String>,
}

impl TaskOutcome {
    pub fn state(&self) -> AgentState {
        match self.status {
            TaskStatus::Completed => AgentState::Completed,
            TaskStatus::Aborted(_) => AgentState::Aborted,
            TaskStatus::Failed(_) => AgentState::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed)
    }
}

struct TaskRun {
    history: Vec<Message>,
    actions: Vec<ActionLog>,
    verification: Vec<VerifyResult>,
    fix_attempts: u32,
    iterations: u32,
    final_message: Option<String>,
    residual: Option<String>,
    /// Files changed since the last verification pass.
    dirty: bool,
    /// The last verification pass failed and a fix was requested.
    fixing: bool,
}

impl TaskRun {
    fn finish(self, status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            status,
            actions: self.actions,
            verification: self.verification,
            fix_attempts: self.fix_attempts,
            iterations: self.iterations,
            final_message: self.final_message,
            residual: self.residual,
        }
    }
}

/// Drive `task` to `Completed`, `Aborted`, or `Failed`.
#[instrument(skip_all, fields(task_len = task.len()))]
pub fn run_task(session: &AgentSession<'_>, task: &str, events: &mut Events<'_>) -> TaskOutcome {
    let config = session.config();
    let cancel = session.cancel_token();
    let budget = Budget::new(config.max_iterations, config.max_duration());
    let mut run = TaskRun {
        history: vec![Message::user(task)],
        actions: Vec::new(),
        verification: Vec::new(),
        fix_attempts: 0,
        iterations: 0,
        final_message: None,
        residual: None,
        dirty: false,
        fixing: false,
    };

    let root_display = session.root().display().to_string();
    let system_prompt = match session.prompts().render_system(&SystemPromptInputs {
        root: &root_display,
        confirm: config.confirm,
        dry_run: config.dry_run,
    }) {
        Ok(prompt) => prompt,
        Err(err) => return terminate(run, TaskStatus::Failed(err), events),
    };
    let tools = export_schemas(config.dialect);
    let safety = config.safety_policy(session.root());

    loop {
        if cancel.is_cancelled() {
            return terminate(run, TaskStatus::Aborted(AbortReason::Cancelled), events);
        }
        if let Some(stop) = budget.exhausted(run.iterations) {
            info!(?stop, "budget exhausted");
            return terminate(run, TaskStatus::Aborted(stop.into()), events);
        }
        let Ok(command_timeout) = budget.clamp(config.command_timeout()) else {
            let stop = AbortReason::TimeLimit {
                max: config.max_duration(),
            };
            return terminate(run, TaskStatus::Aborted(stop), events);
        };

        let settings = ExecutorSettings {
            command_timeout,
            ..ExecutorSettings::from_config(config)
        };
        let mut executor =
            ToolExecutor::new(session.root(), settings, safety.clone(), session.runner());
        if let Some(fetcher) = session.fetcher() {
            executor = executor.with_fetcher(fetcher);
        }
        let ctx = StepContext {
            model: session.model(),
            confirmer: session.confirmer(),
            executor: &executor,
            cancel,
            policy: config.confirm,
            system_prompt: &system_prompt,
            dialect: config.dialect,
            tools: &tools,
            max_tool_output_chars: config.max_tool_output_chars,
        };

        let step = run_step(&ctx, &mut run.history, events);
        run.iterations += 1;
        let step = match step {
            Ok(step) => step,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "model call failed");
                return terminate(run, TaskStatus::Failed(err), events);
            }
        };
        run.actions.extend(step.actions);
        run.dirty |= step.mutated;

        let message = match step.end {
            StepEnd::Cancelled => {
                return terminate(run, TaskStatus::Aborted(AbortReason::Cancelled), events);
            }
            StepEnd::Continue | StepEnd::Nudged => continue,
            StepEnd::Finished(message) => message,
        };
        run.final_message = Some(message);

        if !config.auto_verify || !(run.dirty || run.fixing) {
            return terminate(run, TaskStatus::Completed, events);
        }

        events.transition(AgentState::Verifying);
        let verifier = Verifier::new(session.root(), session.runner(), config)
            .with_table(session.detection().clone());
        let report = match verifier.run(cancel) {
            Ok(report) => report,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "verification could not run");
                run.residual = Some(format!("verification could not run: {err:#}"));
                return terminate(run, TaskStatus::Completed, events);
            }
        };
        if cancel.is_cancelled() {
            run.verification.extend(report.results);
            return terminate(run, TaskStatus::Aborted(AbortReason::Cancelled), events);
        }
        events.emit(AgentEvent::Verification(&report));
        run.dirty = false;
        let failures = report.failed().len();
        let error_count = report.error_count();
        let fix_body = format_errors_for_agent(&report.results);
        let passed = report.success();
        run.verification.extend(report.results);

        if passed {
            info!(fix_attempts = run.fix_attempts, "verification passed");
            run.fixing = false;
            run.residual = None;
            return terminate(run, TaskStatus::Completed, events);
        }
        if run.fix_attempts >= config.max_fix_attempts {
            run.residual = Some(format!(
                "verification still failing after {} fix attempt(s): {failures} failed command(s), {error_count} error(s)",
                run.fix_attempts
            ));
            return terminate(run, TaskStatus::Completed, events);
        }

        run.fix_attempts += 1;
        run.fixing = true;
        let instruction = match session.prompts().render_fix(
            &fix_body,
            run.fix_attempts,
            config.max_fix_attempts,
            Some(task),
        ) {
            Ok(instruction) => instruction,
            Err(err) => return terminate(run, TaskStatus::Failed(err), events),
        };
        info!(attempt = run.fix_attempts, failures, "requesting fix");
        run.history.push(Message::user(instruction));
    }
}

fn terminate(run: TaskRun, status: TaskStatus, events: &mut Events<'_>) -> TaskOutcome {
    let outcome = run.finish(status);
    events.transition(outcome.state());
    info!(
        state = ?outcome.state(),
        iterations = outcome.iterations,
        actions = outcome.actions.len(),
        "task finished"
    );
    outcome
}

/// One-line summary for CLIs and logs.
pub fn summarize(outcome: &TaskOutcome) -> String {
    let head = match &outcome.status {
        TaskStatus::Completed => "completed".to_string(),
        TaskStatus::Aborted(reason) => format!("aborted ({reason})"),
        TaskStatus::Failed(err) => format!("failed: {err:#}"),
    };
    let mut line = format!(
        "{head} after {} iteration(s), {} action(s), {} fix attempt(s)",
        outcome.iterations,
        outcome.actions.len(),
        outcome.fix_attempts
    );
    if let Some(residual) = &outcome.residual {
        line.push_str("; ");
        line.push_str(residual);
    }
    line
}
