//! Subprocess collaborator: bounded, cancellable command execution.
//!
//! Shared by the tool executor and the verifier. Programs are spawned
//! directly (no shell), stdout and stderr are drained concurrently into
//! bounded buffers, and the wait is polled in short slices so a timeout or a
//! cancellation kills the child promptly. On Unix the child leads its own
//! process group and the whole group is killed, so grandchildren holding the
//! output pipes (shell wrappers, npm scripts) do not keep the run alive.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::cancel::CancelToken;

/// How often a running child is checked for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
    pub output_limit_bytes: usize,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            timeout: Duration::from_secs(60),
            env: Vec::new(),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit_bytes = limit;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human-readable command line.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured child process output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }

    /// stdout followed by stderr, with truncation notices.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if self.stdout_truncated > 0 {
            out.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        if self.stderr_truncated > 0 {
            out.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        out
    }

    /// Short reason for a failed run.
    pub fn failure_reason(&self) -> String {
        if self.cancelled {
            "cancelled".to_string()
        } else if self.timed_out {
            format!("timed out after {}s", self.duration.as_secs())
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Run a command to completion, timeout, or cancellation.
pub trait CommandRunner: Send + Sync {
    fn run(&self, request: &CommandRequest, cancel: &CancelToken) -> Result<CommandOutput>;
}

/// Runs real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, request: &CommandRequest, cancel: &CancelToken) -> Result<CommandOutput> {
        run_command(request, cancel)
    }
}

/// Spawn `request` and capture its output without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs; bytes beyond
/// `output_limit_bytes` are discarded while still draining the pipe.
#[instrument(skip_all, fields(program = %request.program, timeout_secs = request.timeout.as_secs()))]
pub fn run_command(request: &CommandRequest, cancel: &CancelToken) -> Result<CommandOutput> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.cwd)
        .envs(request.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn `{}`", request.program));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = request.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            cancelled = true;
            kill_tree(&mut child).context("kill command")?;
            break child.wait().context("wait command after kill")?;
        }
        let elapsed = started.elapsed();
        if elapsed >= request.timeout {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child).context("kill command")?;
            break child.wait().context("wait command after kill")?;
        }
        let slice = (request.timeout - elapsed).min(POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
        duration: started.elapsed(),
    })
}

/// Kill the child's process group, then the child itself.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) with a negative pid only signals the group the child
        // leads; it touches no memory owned by this process.
        #[allow(unsafe_code)]
        let signalled = unsafe { libc::kill(-pid, libc::SIGKILL) } == 0;
        if !signalled {
            debug!(pid, "process group already gone");
        }
    }
    kill_child(child)
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    kill_child(child)
}

/// `Child::kill` fails with `InvalidInput` once the child has been reaped.
fn kill_child(child: &mut Child) -> std::io::Result<()> {
    match child.kill() {
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(program: &str, args: &[&str]) -> CommandRequest {
        let cwd = std::env::current_dir().expect("cwd");
        CommandRequest::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            cwd,
        )
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = run_command(&request("echo", &["hello"]), &CancelToken::new()).expect("run");
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn truncates_beyond_limit() {
        let req = request("echo", &["0123456789"]).with_output_limit(4);
        let out = run_command(&req, &CancelToken::new()).expect("run");
        assert_eq!(out.stdout, "0123");
        assert_eq!(out.stdout_truncated, 7);
        assert!(out.combined().contains("[stdout truncated 7 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let req = request("sleep", &["5"]).with_timeout(Duration::from_millis(200));
        let out = run_command(&req, &CancelToken::new()).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.duration < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let req = request("sh", &["-c", "sleep 5; true"]).with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let out = run_command(&req, &CancelToken::new()).expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn cancel_kills_grandchildren_holding_the_pipes() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let started = Instant::now();
        let out = run_command(&request("sh", &["-c", "sleep 5 & sleep 5; wait"]), &cancel)
            .expect("run");
        handle.join().expect("join");
        assert!(out.cancelled);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn kills_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let out = run_command(&request("sleep", &["5"]), &cancel).expect("run");
        handle.join().expect("join");
        assert!(out.cancelled);
        assert_eq!(out.failure_reason(), "cancelled");
        assert!(out.duration < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command(&request("definitely-not-a-program-xyz", &[]), &CancelToken::new())
            .expect_err("spawn should fail");
        assert!(err.to_string().contains("spawn"));
    }
}
