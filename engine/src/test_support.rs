//! Scripted collaborators and fixtures for tests.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

use crate::core::cancel::CancelToken;
use crate::core::diff::FileDiff;
use crate::core::types::{Message, ModelResponse, ToolCall};
use crate::io::fetch::{FetchedPage, Fetcher};
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::process::{CommandOutput, CommandRequest, CommandRunner, POLL_INTERVAL};
use crate::session::{Confirmation, Confirmer};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `<tool_call>` block as a model would write it.
pub fn text_call(tool: &str, parameters_json: &str) -> String {
    format!(r#"<tool_call>{{"tool": "{tool}", "parameters": {parameters_json}}}</tool_call>"#)
}

/// Model that replays queued responses; `Err` entries become call failures.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, String>>>,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ModelResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Number of completed requests.
    pub fn calls(&self) -> usize {
        lock(&self.histories).len()
    }

    /// History sent with each request, in order.
    pub fn histories(&self) -> Vec<Vec<Message>> {
        lock(&self.histories).clone()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(
        &self,
        request: &ModelRequest<'_>,
        _cancel: &CancelToken,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ModelResponse> {
        lock(&self.histories).push(request.messages.to_vec());
        let next = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted model response left"))?;
        let response = next.map_err(|msg| anyhow!(msg))?;
        let text = response.text();
        if !text.is_empty() {
            on_chunk(&text);
        }
        Ok(response)
    }
}

/// Confirmer that answers from a queue and approves once it runs dry.
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<Confirmation>>,
    asked: Mutex<Vec<ToolCall>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: Vec<Confirmation>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn approve_all() -> Self {
        Self::new(Vec::new())
    }

    pub fn asked(&self) -> usize {
        lock(&self.asked).len()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, call: &ToolCall, _preview: Option<&FileDiff>) -> Confirmation {
        lock(&self.asked).push(call.clone());
        lock(&self.answers)
            .pop_front()
            .unwrap_or(Confirmation::Approve)
    }
}

/// One scripted subprocess behaviour.
#[derive(Debug, Clone)]
pub enum ScriptedCommand {
    Output(CommandOutput),
    /// Block until the cancel token fires (or the request times out), like a
    /// long-running process that gets killed.
    UntilCancelled,
    /// The runner itself fails, e.g. the program cannot be spawned.
    SpawnError(String),
}

/// Command runner that records requests and replays scripted outputs.
/// Once the script runs dry every command exits 0 with no output.
pub struct ScriptedCommandRunner {
    script: Mutex<VecDeque<ScriptedCommand>>,
    requests: Mutex<Vec<CommandRequest>>,
}

impl ScriptedCommandRunner {
    pub fn new(script: Vec<ScriptedCommand>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn exit(code: i32, stdout: &str) -> ScriptedCommand {
        ScriptedCommand::Output(CommandOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            ..CommandOutput::default()
        })
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        lock(&self.requests).clone()
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, request: &CommandRequest, cancel: &CancelToken) -> Result<CommandOutput> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.script).pop_front();
        match next {
            None => Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            }),
            Some(ScriptedCommand::Output(output)) => Ok(output),
            Some(ScriptedCommand::SpawnError(msg)) => {
                Err(anyhow!(msg)).with_context(|| format!("spawn {}", request.display()))
            }
            Some(ScriptedCommand::UntilCancelled) => {
                let start = Instant::now();
                loop {
                    if cancel.is_cancelled() {
                        return Ok(CommandOutput {
                            cancelled: true,
                            duration: start.elapsed(),
                            ..CommandOutput::default()
                        });
                    }
                    if start.elapsed() >= request.timeout {
                        return Ok(CommandOutput {
                            timed_out: true,
                            duration: start.elapsed(),
                            ..CommandOutput::default()
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

/// Fetcher that returns the same body for every URL.
pub struct ScriptedFetcher {
    body: String,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, url: &str, max_bytes: usize) -> Result<FetchedPage> {
        lock(&self.urls).push(url.to_string());
        let truncated = self.body.len() > max_bytes;
        let body = if truncated {
            String::from_utf8_lossy(&self.body.as_bytes()[..max_bytes]).into_owned()
        } else {
            self.body.clone()
        };
        Ok(FetchedPage {
            status: 200,
            content_type: Some("text/html".to_string()),
            body,
            truncated,
        })
    }
}

/// Temporary project directory.
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp project")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
