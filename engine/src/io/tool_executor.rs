//! Dispatch canonical tool calls to filesystem, process, and network effects.
//!
//! Every call yields exactly one [`ToolResult`] and one [`ActionLog`] entry.
//! Failures are typed as [`ToolError`] internally and rendered into the
//! result's `error` field; nothing here aborts the agent loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::action_log::action_log_for;
use crate::core::cancel::CancelToken;
use crate::core::diff::{FileDiff, render_unified};
use crate::core::safety::{SafetyPolicy, Verdict, resolve_within};
use crate::core::types::{ActionLog, ToolCall, ToolInput, ToolResult};
use crate::io::config::EngineConfig;
use crate::io::fetch::{Fetcher, check_scheme};
use crate::io::files::{
    Glob, MAX_LIST_ENTRIES, MAX_SEARCH_RESULTS, list_dir, read_text_limited, search,
};
use crate::io::process::{CommandRequest, CommandRunner};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path `{0}` is outside the project root")]
    OutsideRoot(String),
    #[error("`{0}` does not exist")]
    NotFound(String),
    #[error("`{0}` is a directory")]
    IsDirectory(String),
    #[error("`{0}` is not valid UTF-8 text")]
    NotText(String),
    #[error("text to replace was not found in `{0}`")]
    EditTargetMissing(String),
    #[error("command denied by safety policy: {0}")]
    Denied(String),
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("{0}")]
    Unsupported(String),
    #[error("URL fetching is not available")]
    NoFetcher,
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Executor limits taken from [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_read_bytes: usize,
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
    pub dry_run: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_read_bytes: config.max_read_bytes,
            command_timeout: config.command_timeout(),
            output_limit_bytes: config.output_limit_bytes,
            dry_run: config.dry_run,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Outcome of one executed (or previewed) call.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ToolResult,
    pub log: ActionLog,
    /// Preview of the file change, for write/edit/delete.
    pub diff: Option<FileDiff>,
}

/// Replace the first occurrence of `old_text`; an empty `old_text` appends.
pub fn apply_edit(content: &str, old_text: &str, new_text: &str) -> Option<String> {
    if old_text.is_empty() {
        return Some(format!("{content}{new_text}"));
    }
    content
        .contains(old_text)
        .then(|| content.replacen(old_text, new_text, 1))
}

pub struct ToolExecutor<'a> {
    root: PathBuf,
    settings: ExecutorSettings,
    safety: SafetyPolicy,
    runner: &'a dyn CommandRunner,
    fetcher: Option<&'a dyn Fetcher>,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        settings: ExecutorSettings,
        safety: SafetyPolicy,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            root: root.into(),
            settings,
            safety,
            runner,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Compute the file change a mutating call would make, without applying it.
    pub fn preview(&self, call: &ToolCall) -> Result<Option<FileDiff>, ToolError> {
        match &call.input {
            ToolInput::WriteFile { path, content } => {
                let resolved = self.resolve(path)?;
                let diff = match self.existing_preview(&resolved, path)? {
                    Some(old) => FileDiff::modify(path.as_str(), &old, content),
                    None => FileDiff::create(path.as_str(), content),
                };
                Ok(Some(diff))
            }
            ToolInput::EditFile {
                path,
                old_text,
                new_text,
            } => {
                let resolved = self.resolve(path)?;
                let existing = self.existing_text(&resolved, path)?;
                let diff = match existing {
                    Some(old) => {
                        let new = apply_edit(&old, old_text, new_text)
                            .ok_or_else(|| ToolError::EditTargetMissing(path.clone()))?;
                        FileDiff::modify(path.as_str(), &old, &new)
                    }
                    None if old_text.is_empty() => FileDiff::create(path.as_str(), new_text),
                    None => return Err(ToolError::NotFound(path.clone())),
                };
                Ok(Some(diff))
            }
            ToolInput::DeleteFile { path } => {
                let resolved = self.resolve(path)?;
                let old = self
                    .existing_preview(&resolved, path)?
                    .ok_or_else(|| ToolError::NotFound(path.clone()))?;
                Ok(Some(FileDiff::delete(path.as_str(), &old)))
            }
            _ => Ok(None),
        }
    }

    /// Run `call` and record it. Never fails; errors become failed results.
    #[instrument(skip_all, fields(tool = %call.tool()))]
    pub fn execute(&self, call: &ToolCall, cancel: &CancelToken) -> Execution {
        let (result, diff) = match self.preview(call) {
            Err(err) => (self.failed(call, &err), None),
            Ok(diff) => {
                let outcome = if self.settings.dry_run {
                    self.dry_run(call, diff.as_ref())
                } else {
                    self.run(call, diff.as_ref(), cancel)
                };
                let result = outcome.unwrap_or_else(|err| self.failed(call, &err));
                (result, diff)
            }
        };
        let log = action_log_for(&result);
        debug!(success = result.success, "tool executed");
        Execution { result, log, diff }
    }

    fn failed(&self, call: &ToolCall, err: &ToolError) -> ToolResult {
        warn!(tool = %call.tool(), err = %err, "tool call failed");
        ToolResult::failure(call, err.to_string())
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        resolve_within(&self.root, raw).ok_or_else(|| ToolError::OutsideRoot(raw.to_string()))
    }

    fn resolve_dir(&self, raw: Option<&str>) -> Result<PathBuf, ToolError> {
        match raw {
            Some(path) => self.resolve(path),
            None => Ok(self.root.clone()),
        }
    }

    /// Raw bytes of an existing file, `None` when it does not exist.
    fn existing_bytes(&self, resolved: &Path, display: &str) -> Result<Option<Vec<u8>>, ToolError> {
        if !resolved.exists() {
            return Ok(None);
        }
        if resolved.is_dir() {
            return Err(ToolError::IsDirectory(display.to_string()));
        }
        let bytes = fs::read(resolved).with_context(|| format!("read {display}"))?;
        Ok(Some(bytes))
    }

    /// Existing content for a preview only; invalid UTF-8 is replaced.
    fn existing_preview(&self, resolved: &Path, display: &str) -> Result<Option<String>, ToolError> {
        Ok(self
            .existing_bytes(resolved, display)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Existing content that will be rewritten, so it must be valid UTF-8.
    fn existing_text(&self, resolved: &Path, display: &str) -> Result<Option<String>, ToolError> {
        self.existing_bytes(resolved, display)?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| ToolError::NotText(display.to_string()))
            })
            .transpose()
    }

    fn dry_run(&self, call: &ToolCall, diff: Option<&FileDiff>) -> Result<ToolResult, ToolError> {
        if let Some(diff) = diff {
            let output = format!(
                "[dry run] would {} {} (+{} -{})\n{}",
                call.tool().action_type().as_str(),
                diff.path,
                diff.additions(),
                diff.deletions(),
                render_unified(diff)
            );
            return Ok(ToolResult::success(call, output));
        }
        match &call.input {
            ToolInput::ExecuteCommand { command, args } => {
                if let Verdict::Deny(reason) = self.safety.validate(command, args) {
                    return Err(ToolError::Denied(reason));
                }
                let line = CommandRequest::new(command.as_str(), args.clone(), &self.root).display();
                Ok(ToolResult::success(call, format!("[dry run] would run `{line}`")))
            }
            ToolInput::CreateDirectory { path } => {
                self.resolve(path)?;
                Ok(ToolResult::success(
                    call,
                    format!("[dry run] would create directory {path}"),
                ))
            }
            _ => self.run(call, None, &CancelToken::new()),
        }
    }

    fn run(
        &self,
        call: &ToolCall,
        diff: Option<&FileDiff>,
        cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        let summary = |verb: &str, path: &str| match diff {
            Some(d) => format!("{verb} {path} (+{} -{})", d.additions(), d.deletions()),
            None => format!("{verb} {path}"),
        };

        let output = match &call.input {
            ToolInput::ReadFile { path } => {
                let resolved = self.resolve(path)?;
                if resolved.is_dir() {
                    return Err(ToolError::IsDirectory(path.clone()));
                }
                if !resolved.exists() {
                    return Err(ToolError::NotFound(path.clone()));
                }
                read_text_limited(&resolved, self.settings.max_read_bytes)?.render()
            }
            ToolInput::WriteFile { path, content } => {
                let resolved = self.resolve(path)?;
                write_creating_parents(&resolved, content)?;
                summary("Wrote", path)
            }
            ToolInput::EditFile { path, .. } => {
                let resolved = self.resolve(path)?;
                let new_content = diff
                    .and_then(|d| d.new_content.as_deref())
                    .ok_or_else(|| ToolError::EditTargetMissing(path.clone()))?;
                write_creating_parents(&resolved, new_content)?;
                summary("Edited", path)
            }
            ToolInput::DeleteFile { path } => {
                let resolved = self.resolve(path)?;
                fs::remove_file(&resolved).with_context(|| format!("delete {path}"))?;
                summary("Deleted", path)
            }
            ToolInput::ListFiles { path, recursive } => {
                let resolved = self.resolve(path)?;
                if !resolved.exists() {
                    return Err(ToolError::NotFound(path.clone()));
                }
                let (entries, truncated) =
                    list_dir(&self.root, &resolved, *recursive, MAX_LIST_ENTRIES)?;
                render_list(entries, truncated, "(empty directory)")
            }
            ToolInput::CreateDirectory { path } => {
                let resolved = self.resolve(path)?;
                fs::create_dir_all(&resolved).with_context(|| format!("create {path}"))?;
                format!("Created directory {path}")
            }
            ToolInput::SearchFiles {
                pattern,
                path,
                file_pattern,
            } => {
                let regex = Regex::new(pattern).map_err(|e| ToolError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                let filter = file_pattern.as_deref().map(Glob::new).transpose()?;
                let dir = self.resolve_dir(path.as_deref())?;
                let (hits, truncated) =
                    search(&self.root, &dir, &regex, filter.as_ref(), MAX_SEARCH_RESULTS)?;
                render_list(hits, truncated, "No matches found")
            }
            ToolInput::FindFiles { pattern, path } => {
                let glob = Glob::new(pattern)?;
                let dir = self.resolve_dir(path.as_deref())?;
                let (hits, truncated) =
                    crate::io::files::find(&self.root, &dir, &glob, MAX_SEARCH_RESULTS)?;
                render_list(hits, truncated, "No files found")
            }
            ToolInput::ExecuteCommand { command, args } => {
                return self.run_command(call, command, args, cancel);
            }
            ToolInput::FetchUrl { url } => {
                check_scheme(url).map_err(|e| ToolError::Unsupported(e.to_string()))?;
                let fetcher = self.fetcher.ok_or(ToolError::NoFetcher)?;
                let page = fetcher.fetch(url, self.settings.max_read_bytes)?;
                if page.truncated {
                    format!("{}\n[... truncated]", page.body)
                } else {
                    page.body
                }
            }
        };
        Ok(ToolResult::success(call, output))
    }

    fn run_command(
        &self,
        call: &ToolCall,
        command: &str,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        if let Verdict::Deny(reason) = self.safety.validate(command, args) {
            return Err(ToolError::Denied(reason));
        }
        let request = CommandRequest::new(command, args.to_vec(), &self.root)
            .with_timeout(self.settings.command_timeout)
            .with_output_limit(self.settings.output_limit_bytes);
        let output = self.runner.run(&request, cancel)?;
        let combined = output.combined();
        if output.success() {
            let text = if combined.trim().is_empty() {
                "(no output)".to_string()
            } else {
                combined
            };
            return Ok(ToolResult::success(call, text));
        }
        Ok(ToolResult::failure(
            call,
            format!("`{}` failed: {}", request.display(), output.failure_reason()),
        )
        .with_output(combined))
    }
}

fn write_creating_parents(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("write {}", path.display()))
}

fn render_list(lines: Vec<String>, truncated: bool, empty: &str) -> String {
    if lines.is_empty() {
        return empty.to_string();
    }
    let mut out = lines.join("\n");
    if truncated {
        out.push_str("\n[... more results omitted]");
    }
    out
}
