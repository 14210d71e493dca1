//! Optional persistence of a finished task as JSON records.
//!
//! The engine does not own a layout for run artifacts; callers pick `dir`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::looping::{TaskOutcome, TaskStatus};
use crate::session::AgentState;

/// Paths written by [`write_run_record`].
#[derive(Debug, Clone)]
pub struct RunRecordPaths {
    pub dir: PathBuf,
    pub actions_path: PathBuf,
    pub verification_path: PathBuf,
    pub outcome_path: PathBuf,
}

impl RunRecordPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            actions_path: dir.join("actions.json"),
            verification_path: dir.join("verification.json"),
            outcome_path: dir.join("outcome.json"),
        }
    }
}

/// Serializable summary of a [`TaskOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord<'a> {
    pub state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub fix_attempts: u32,
    pub actions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual: Option<&'a str>,
    pub recorded_at: DateTime<Utc>,
}

impl<'a> OutcomeRecord<'a> {
    pub fn new(outcome: &'a TaskOutcome, recorded_at: DateTime<Utc>) -> Self {
        let (reason, error) = match &outcome.status {
            TaskStatus::Completed => (None, None),
            TaskStatus::Aborted(reason) => (Some(reason.to_string()), None),
            TaskStatus::Failed(err) => (None, Some(format!("{err:#}"))),
        };
        Self {
            state: outcome.state(),
            reason,
            error,
            iterations: outcome.iterations,
            fix_attempts: outcome.fix_attempts,
            actions: outcome.actions.len(),
            final_message: outcome.final_message.as_deref(),
            residual: outcome.residual.as_deref(),
            recorded_at,
        }
    }
}

/// Write `actions.json`, `verification.json`, and `outcome.json` under `dir`.
pub fn write_run_record(dir: &Path, outcome: &TaskOutcome) -> Result<RunRecordPaths> {
    let paths = RunRecordPaths::new(dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create run record dir {}", paths.dir.display()))?;

    write_json(&paths.actions_path, &outcome.actions)?;
    write_json(&paths.verification_path, &outcome.verification)?;
    write_json(&paths.outcome_path, &OutcomeRecord::new(outcome, Utc::now()))?;
    debug!(dir = %paths.dir.display(), "run record written");
    Ok(paths)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action_log::action_log_for;
    use crate::core::types::{ToolCall, ToolInput, ToolResult};
    use crate::looping::AbortReason;
    use serde_json::Value;

    fn outcome(status: TaskStatus) -> TaskOutcome {
        let call = ToolCall::new(ToolInput::DeleteFile {
            path: "old.txt".to_string(),
        });
        TaskOutcome {
            status,
            actions: vec![action_log_for(&ToolResult::success(&call, "Deleted old.txt"))],
            verification: Vec::new(),
            fix_attempts: 0,
            iterations: 3,
            final_message: None,
            residual: None,
        }
    }

    fn read(path: &Path) -> Value {
        let raw = fs::read_to_string(path).expect("read");
        serde_json::from_str(&raw).expect("json")
    }

    #[test]
    fn writes_all_three_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("runs/1");
        let paths = write_run_record(
            &dir,
            &outcome(TaskStatus::Aborted(AbortReason::Cancelled)),
        )
        .expect("write");

        let actions = read(&paths.actions_path);
        assert_eq!(actions[0]["type"], "delete");
        assert_eq!(actions[0]["target"], "old.txt");
        assert_eq!(read(&paths.verification_path), Value::Array(Vec::new()));

        let record = read(&paths.outcome_path);
        assert_eq!(record["state"], "aborted");
        assert_eq!(record["reason"], "cancelled");
        assert_eq!(record["iterations"], 3);
        assert!(record.get("error").is_none());
    }

    #[test]
    fn failed_outcome_records_the_error_chain() {
        let err = anyhow::anyhow!("connection reset").context("model call failed");
        let failed = outcome(TaskStatus::Failed(err));
        let record = OutcomeRecord::new(&failed, Utc::now());
        assert_eq!(record.state, AgentState::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("model call failed: connection reset")
        );
    }
}
