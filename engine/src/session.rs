//! Agent session: collaborators, observable state, and the per-session
//! running flag.
//!
//! A session owns its cancellation token and state. Only one task runs per
//! session at a time; a second `run_task` while one is in flight is refused
//! with [`SessionBusy`]. Use a [`SessionHandle`] to cancel or inspect a
//! session from another thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::cancel::CancelToken;
use crate::core::diff::FileDiff;
use crate::core::types::{ActionLog, ToolCall};
use crate::io::config::EngineConfig;
use crate::io::fetch::Fetcher;
use crate::io::model::ModelClient;
use crate::io::process::CommandRunner;
use crate::io::prompt::PromptEngine;
use crate::io::verifier::{DetectionTable, VerifyReport};
use crate::looping::{TaskOutcome, run_task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Thinking,
    AwaitingConfirmation,
    Executing,
    Verifying,
    Completed,
    Aborted,
    Failed,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentState::Completed | AgentState::Aborted | AgentState::Failed
        )
    }
}

/// User decision for a call that needs approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approve,
    Deny,
}

/// Asks the user whether a tool call may run.
pub trait Confirmer {
    /// `preview` is the file change the call would make, when it has one.
    fn confirm(&self, call: &ToolCall, preview: Option<&FileDiff>) -> Confirmation;
}

/// Approves everything. Suitable for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Confirmer for AutoApprove {
    fn confirm(&self, _call: &ToolCall, _preview: Option<&FileDiff>) -> Confirmation {
        Confirmation::Approve
    }
}

static AUTO_APPROVE: AutoApprove = AutoApprove;

/// Progress notifications delivered while a task runs.
#[derive(Debug, Clone, Copy)]
pub enum AgentEvent<'a> {
    State(AgentState),
    /// Streamed model text.
    Chunk(&'a str),
    Preview {
        call: &'a ToolCall,
        diff: &'a FileDiff,
    },
    Action(&'a ActionLog),
    Denied(&'a ToolCall),
    Verification(&'a VerifyReport),
}

/// Event sink that ignores everything.
pub fn ignore_events(_event: AgentEvent<'_>) {}

#[derive(Debug, Error)]
#[error("a task is already running in this session")]
pub struct SessionBusy;

/// Cross-thread view of a session: cancel it or read its state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<AgentState>>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct AgentSession<'a> {
    root: PathBuf,
    config: EngineConfig,
    model: &'a dyn ModelClient,
    runner: &'a dyn CommandRunner,
    confirmer: &'a dyn Confirmer,
    fetcher: Option<&'a dyn Fetcher>,
    detection: DetectionTable,
    prompts: PromptEngine,
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<AgentState>>,
}

impl<'a> AgentSession<'a> {
    /// New idle session. Calls needing approval are auto-approved until
    /// [`with_confirmer`](Self::with_confirmer) installs a real confirmer.
    pub fn new(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        model: &'a dyn ModelClient,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            model,
            runner,
            confirmer: &AUTO_APPROVE,
            fetcher: None,
            detection: DetectionTable::builtin(),
            prompts: PromptEngine::new(),
            cancel: CancelToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(AgentState::Idle)),
        }
    }

    pub fn with_confirmer(mut self, confirmer: &'a dyn Confirmer) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_detection(mut self, detection: DetectionTable) -> Self {
        self.detection = detection;
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
            running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `task` to a terminal state.
    ///
    /// Returns `Err` only when the session is already running a task; every
    /// other outcome, including model failures, is reported in the
    /// [`TaskOutcome`].
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn run_task(
        &self,
        task: &str,
        on_event: &mut dyn FnMut(AgentEvent<'_>),
    ) -> Result<TaskOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionBusy.into());
        }
        let _running = RunningGuard(&self.running);
        self.cancel.reset();
        debug!("task started");

        let mut events = Events {
            state: &self.state,
            sink: on_event,
        };
        Ok(run_task(self, task, &mut events))
    }

    pub(crate) fn model(&self) -> &'a dyn ModelClient {
        self.model
    }

    pub(crate) fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    pub(crate) fn confirmer(&self) -> &'a dyn Confirmer {
        self.confirmer
    }

    pub(crate) fn fetcher(&self) -> Option<&'a dyn Fetcher> {
        self.fetcher
    }

    pub(crate) fn detection(&self) -> &DetectionTable {
        &self.detection
    }

    pub(crate) fn prompts(&self) -> &PromptEngine {
        &self.prompts
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

struct RunningGuard<'s>(&'s AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Records state transitions and forwards events to the caller's sink.
pub struct Events<'s> {
    state: &'s Mutex<AgentState>,
    sink: &'s mut dyn FnMut(AgentEvent<'_>),
}

impl<'s> Events<'s> {
    pub fn new(state: &'s Mutex<AgentState>, sink: &'s mut dyn FnMut(AgentEvent<'_>)) -> Self {
        Self { state, sink }
    }

    pub fn transition(&mut self, next: AgentState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == next {
            return;
        }
        debug!(from = ?*current, to = ?next, "state");
        *current = next;
        drop(current);
        (self.sink)(AgentEvent::State(next));
    }

    pub fn emit(&mut self, event: AgentEvent<'_>) {
        (self.sink)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ModelResponse;
    use crate::test_support::{ScriptedCommandRunner, ScriptedModel};

    #[test]
    fn new_session_is_idle() {
        let model = ScriptedModel::new(Vec::new());
        let runner = ScriptedCommandRunner::new(Vec::new());
        let session = AgentSession::new("/tmp", EngineConfig::default(), &model, &runner);
        assert_eq!(session.state(), AgentState::Idle);
        assert!(!session.is_running());
        assert!(!AgentState::Idle.is_terminal());
        assert!(AgentState::Aborted.is_terminal());
    }

    #[test]
    fn second_run_while_running_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new(vec![Ok(ModelResponse::Text("done".to_string()))]);
        let runner = ScriptedCommandRunner::new(Vec::new());
        let session = AgentSession::new(temp.path(), EngineConfig::default(), &model, &runner);

        let mut nested: Option<bool> = None;
        let outcome = session
            .run_task("say done", &mut |event: AgentEvent<'_>| {
                if nested.is_none() && matches!(event, AgentEvent::State(AgentState::Thinking)) {
                    let err = session
                        .run_task("again", &mut ignore_events)
                        .expect_err("busy");
                    nested = Some(err.downcast_ref::<SessionBusy>().is_some());
                }
            })
            .expect("run");

        assert_eq!(nested, Some(true));
        assert_eq!(outcome.state(), AgentState::Completed);
        assert!(!session.is_running());
        assert_eq!(session.handle().state(), AgentState::Completed);
    }

    #[test]
    fn transitions_are_reported_once() {
        let state = Mutex::new(AgentState::Idle);
        let mut seen = Vec::new();
        let mut sink = |event: AgentEvent<'_>| {
            if let AgentEvent::State(s) = event {
                seen.push(s);
            }
        };
        let mut events = Events::new(&state, &mut sink);
        events.transition(AgentState::Thinking);
        events.transition(AgentState::Thinking);
        events.transition(AgentState::Executing);
        drop(events);
        assert_eq!(seen, vec![AgentState::Thinking, AgentState::Executing]);
    }
}
