//! Post-task verification: detect and run build/test/lint/typecheck commands.
//!
//! Detection is a table of probes keyed by verification kind, so new
//! ecosystems are added by pushing rules rather than touching the loop.
//! Typecheck and lint run concurrently; build runs after both and test runs
//! last, only if the build passed.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::diagnostics::{extract_errors, synthetic_failure};
use crate::core::types::{ParsedError, VerifyKind, VerifyResult};
use crate::io::config::{EngineConfig, VerifyConfig};
use crate::io::process::{CommandRequest, CommandRunner};

/// A probe inspects a project root and returns the command to run, if any.
pub type Probe = fn(&Path) -> Option<Vec<String>>;

#[derive(Clone, Copy)]
pub struct DetectionRule {
    /// Ecosystem label, for logs.
    pub ecosystem: &'static str,
    pub kind: VerifyKind,
    pub probe: Probe,
}

impl std::fmt::Debug for DetectionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionRule")
            .field("ecosystem", &self.ecosystem)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered rules; the first rule that matches a kind wins.
#[derive(Debug, Clone, Default)]
pub struct DetectionTable {
    rules: Vec<DetectionRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCommand {
    pub kind: VerifyKind,
    pub argv: Vec<String>,
}

impl VerifyCommand {
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

fn argv(words: &[&str]) -> Option<Vec<String>> {
    Some(words.iter().map(|w| w.to_string()).collect())
}

fn has(root: &Path, file: &str) -> bool {
    root.join(file).is_file()
}

fn cargo(root: &Path, words: &[&str]) -> Option<Vec<String>> {
    has(root, "Cargo.toml").then(|| argv(words)).flatten()
}

fn package_scripts(root: &Path) -> Option<serde_json::Map<String, Value>> {
    let text = fs::read_to_string(root.join("package.json")).ok()?;
    let manifest: Value = serde_json::from_str(&text).ok()?;
    manifest.get("scripts")?.as_object().cloned()
}

fn npm_script(root: &Path, script: &str) -> Option<Vec<String>> {
    let scripts = package_scripts(root)?;
    let body = scripts.get(script)?.as_str()?;
    // `npm init` placeholder.
    if script == "test" && body.contains("no test specified") {
        return None;
    }
    if script == "test" {
        argv(&["npm", "test"])
    } else {
        argv(&["npm", "run", script])
    }
}

fn go(root: &Path, words: &[&str]) -> Option<Vec<String>> {
    has(root, "go.mod").then(|| argv(words)).flatten()
}

fn is_python(root: &Path) -> bool {
    has(root, "pyproject.toml") || has(root, "setup.py")
}

fn pyproject_has(root: &Path, table: &str) -> bool {
    fs::read_to_string(root.join("pyproject.toml"))
        .map(|text| text.contains(&format!("[tool.{table}")))
        .unwrap_or(false)
}

impl DetectionTable {
    pub fn new(rules: Vec<DetectionRule>) -> Self {
        Self { rules }
    }

    /// Cargo, Node, Go, and Python defaults.
    pub fn builtin() -> Self {
        use VerifyKind::{Build, Lint, Test, Typecheck};
        let rule = |ecosystem, kind, probe: Probe| DetectionRule {
            ecosystem,
            kind,
            probe,
        };
        Self::new(vec![
            rule("cargo", Build, |r| cargo(r, &["cargo", "build", "--all-targets"])),
            rule("cargo", Test, |r| cargo(r, &["cargo", "test"])),
            rule("cargo", Lint, |r| {
                cargo(r, &["cargo", "clippy", "--all-targets", "--", "-D", "warnings"])
            }),
            rule("cargo", Typecheck, |r| cargo(r, &["cargo", "check", "--all-targets"])),
            rule("node", Build, |r| npm_script(r, "build")),
            rule("node", Test, |r| npm_script(r, "test")),
            rule("node", Lint, |r| npm_script(r, "lint")),
            rule("node", Typecheck, |r| npm_script(r, "typecheck")),
            rule("node", Typecheck, |r| {
                has(r, "tsconfig.json")
                    .then(|| argv(&["npx", "tsc", "--noEmit"]))
                    .flatten()
            }),
            rule("go", Build, |r| go(r, &["go", "build", "./..."])),
            rule("go", Test, |r| go(r, &["go", "test", "./..."])),
            rule("go", Lint, |r| go(r, &["go", "vet", "./..."])),
            rule("python", Test, |r| {
                is_python(r)
                    .then(|| argv(&["python3", "-m", "pytest", "-q"]))
                    .flatten()
            }),
            rule("python", Typecheck, |r| {
                (has(r, "mypy.ini") || pyproject_has(r, "mypy"))
                    .then(|| argv(&["mypy", "."]))
                    .flatten()
            }),
            rule("python", Lint, |r| {
                (has(r, "ruff.toml") || pyproject_has(r, "ruff"))
                    .then(|| argv(&["ruff", "check", "."]))
                    .flatten()
            }),
        ])
    }

    pub fn push(&mut self, rule: DetectionRule) {
        self.rules.push(rule);
    }

    /// Commands per kind, overrides first, in `typecheck, lint, build, test`
    /// order.
    pub fn detect(&self, root: &Path, overrides: &VerifyConfig) -> Vec<VerifyCommand> {
        [
            VerifyKind::Typecheck,
            VerifyKind::Lint,
            VerifyKind::Build,
            VerifyKind::Test,
        ]
        .into_iter()
        .filter_map(|kind| {
            let argv = overrides
                .command_for(kind)
                .map(<[String]>::to_vec)
                .or_else(|| {
                    self.rules
                        .iter()
                        .filter(|rule| rule.kind == kind)
                        .find_map(|rule| {
                            let found = (rule.probe)(root);
                            if found.is_some() {
                                debug!(ecosystem = rule.ecosystem, %kind, "detected command");
                            }
                            found
                        })
                })?;
            Some(VerifyCommand { kind, argv })
        })
        .collect()
    }
}

/// All results of one verification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub results: Vec<VerifyResult>,
    /// Kinds not run because an earlier stage failed or the pass was cancelled.
    pub skipped: Vec<VerifyKind>,
}

impl VerifyReport {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failed(&self) -> Vec<&VerifyResult> {
        self.results.iter().filter(|r| !r.success).collect()
    }

    pub fn error_count(&self) -> usize {
        self.failed().iter().map(|r| r.errors.len()).sum()
    }
}

pub struct Verifier<'a> {
    root: PathBuf,
    runner: &'a dyn CommandRunner,
    table: DetectionTable,
    overrides: VerifyConfig,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(root: impl Into<PathBuf>, runner: &'a dyn CommandRunner, config: &EngineConfig) -> Self {
        Self {
            root: root.into(),
            runner,
            table: DetectionTable::builtin(),
            overrides: config.verify.clone(),
            timeout: config.verify_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn with_table(mut self, table: DetectionTable) -> Self {
        self.table = table;
        self
    }

    pub fn commands(&self) -> Vec<VerifyCommand> {
        self.table.detect(&self.root, &self.overrides)
    }

    /// Run every detected command.
    ///
    /// A command that cannot be started is recorded as a failed result and
    /// later stages still run. Errors only if a verification thread panics.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn run(&self, cancel: &CancelToken) -> Result<VerifyReport> {
        let commands = self.commands();
        let find = |kind: VerifyKind| commands.iter().find(|c| c.kind == kind);
        let mut report = VerifyReport::default();
        if commands.is_empty() {
            info!("no verification commands detected");
            return Ok(report);
        }

        let checks: Vec<&VerifyCommand> = [VerifyKind::Typecheck, VerifyKind::Lint]
            .into_iter()
            .filter_map(find)
            .collect();
        let check_results = thread::scope(|scope| {
            let handles: Vec<_> = checks
                .iter()
                .map(|command| scope.spawn(move || self.run_one(command, cancel)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| anyhow!("verification thread panicked"))
                })
                .collect::<Vec<_>>()
        });
        for result in check_results {
            report.results.push(result?);
        }

        let mut build_ok = true;
        if let Some(build) = find(VerifyKind::Build) {
            if cancel.is_cancelled() {
                report.skipped.push(VerifyKind::Build);
            } else {
                let result = self.run_one(build, cancel);
                build_ok = result.success;
                report.results.push(result);
            }
        }

        if let Some(test) = find(VerifyKind::Test) {
            if !build_ok || cancel.is_cancelled() {
                warn!("skipping tests");
                report.skipped.push(VerifyKind::Test);
            } else {
                report.results.push(self.run_one(test, cancel));
            }
        }

        info!(
            success = report.success(),
            errors = report.error_count(),
            "verification finished"
        );
        Ok(report)
    }

    fn run_one(&self, command: &VerifyCommand, cancel: &CancelToken) -> VerifyResult {
        let display = command.display();
        let Some((program, args)) = command.argv.split_first() else {
            return not_started(command, "empty command".to_string());
        };
        let request = CommandRequest::new(program.as_str(), args.to_vec(), &self.root)
            .with_timeout(self.timeout)
            .with_output_limit(self.output_limit_bytes)
            .with_env("CI", "1");
        debug!(kind = %command.kind, command = %request.display(), "running verification");
        let output = match self.runner.run(&request, cancel) {
            Ok(output) => output,
            Err(err) => {
                warn!(kind = %command.kind, err = %format!("{err:#}"), "verification command could not start");
                return not_started(command, format!("could not start: {err:#}"));
            }
        };

        let combined = output.combined();
        let success = output.success();
        let mut errors: Vec<ParsedError> = extract_errors(&combined);
        if !success && errors.is_empty() {
            errors.push(synthetic_failure(
                command.kind,
                &display,
                &output.failure_reason(),
            ));
        }
        VerifyResult {
            success,
            kind: command.kind,
            command: display,
            output: combined,
            errors,
            duration_ms: output.duration.as_millis() as u64,
        }
    }
}

fn not_started(command: &VerifyCommand, reason: String) -> VerifyResult {
    let display = command.display();
    VerifyResult {
        success: false,
        kind: command.kind,
        errors: vec![synthetic_failure(command.kind, &display, &reason)],
        output: reason,
        command: display,
        duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::test_support::{ScriptedCommand, ScriptedCommandRunner};
    use pretty_assertions::assert_eq;

    fn kinds(commands: &[VerifyCommand]) -> Vec<VerifyKind> {
        commands.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn detects_cargo_projects() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("Cargo.toml"), "[package]\n").expect("write");
        let commands = DetectionTable::builtin().detect(temp.path(), &VerifyConfig::default());
        assert_eq!(
            kinds(&commands),
            vec![
                VerifyKind::Typecheck,
                VerifyKind::Lint,
                VerifyKind::Build,
                VerifyKind::Test
            ]
        );
        assert_eq!(commands[3].display(), "cargo test");
    }

    #[test]
    fn node_scripts_and_tsconfig() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("package.json"),
            r#"{"scripts": {"test": "jest", "lint": "eslint ."}}"#,
        )
        .expect("write");
        fs::write(temp.path().join("tsconfig.json"), "{}").expect("write");
        let commands = DetectionTable::builtin().detect(temp.path(), &VerifyConfig::default());
        let shown: Vec<String> = commands.iter().map(VerifyCommand::display).collect();
        assert_eq!(shown, vec!["npx tsc --noEmit", "npm run lint", "npm test"]);
    }

    #[test]
    fn overrides_win_and_empty_projects_detect_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(DetectionTable::builtin()
            .detect(temp.path(), &VerifyConfig::default())
            .is_empty());

        let overrides = VerifyConfig {
            test: Some(vec!["just".to_string(), "test".to_string()]),
            ..VerifyConfig::default()
        };
        let commands = DetectionTable::builtin().detect(temp.path(), &overrides);
        assert_eq!(commands[0].display(), "just test");
    }

    #[test]
    fn failing_build_skips_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedCommandRunner::new(vec![ScriptedCommandRunner::exit(
            101,
            "error[E0308]: mismatched types\n --> src/lib.rs:3:5\n",
        )]);
        let config = EngineConfig {
            verify: VerifyConfig {
                build: Some(vec!["cargo".to_string(), "build".to_string()]),
                test: Some(vec!["cargo".to_string(), "test".to_string()]),
                ..VerifyConfig::default()
            },
            ..EngineConfig::default()
        };
        let verifier = Verifier::new(temp.path(), &runner, &config);
        let report = verifier.run(&CancelToken::new()).expect("run");
        assert!(!report.success());
        assert_eq!(report.skipped, vec![VerifyKind::Test]);
        assert_eq!(report.results[0].errors[0].location(), "src/lib.rs:3:5");
        assert_eq!(runner.requests().len(), 1);
    }

    #[test]
    fn silent_failure_gets_a_synthetic_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedCommandRunner::new(vec![ScriptedCommandRunner::exit(2, "")]);
        let config = EngineConfig {
            verify: VerifyConfig {
                lint: Some(vec!["make".to_string(), "lint".to_string()]),
                ..VerifyConfig::default()
            },
            ..EngineConfig::default()
        };
        let report = Verifier::new(temp.path(), &runner, &config)
            .run(&CancelToken::new())
            .expect("run");
        let error = &report.results[0].errors[0];
        assert_eq!(error.severity, Severity::Warning);
        assert_eq!(error.message, "lint command `make lint` failed: exit code 2");
    }

    #[test]
    fn typecheck_and_lint_both_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedCommandRunner::new(vec![
            ScriptedCommandRunner::exit(0, "ok"),
            ScriptedCommandRunner::exit(0, "ok"),
        ]);
        let config = EngineConfig {
            verify: VerifyConfig {
                lint: Some(vec!["ruff".to_string(), "check".to_string()]),
                typecheck: Some(vec!["mypy".to_string(), ".".to_string()]),
                ..VerifyConfig::default()
            },
            ..EngineConfig::default()
        };
        let report = Verifier::new(temp.path(), &runner, &config)
            .run(&CancelToken::new())
            .expect("run");
        assert!(report.success());
        let mut ran: Vec<VerifyKind> = report.results.iter().map(|r| r.kind).collect();
        ran.sort();
        assert_eq!(ran, vec![VerifyKind::Lint, VerifyKind::Typecheck]);
    }

    #[test]
    fn unstartable_command_fails_without_stopping_the_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedCommandRunner::new(vec![
            ScriptedCommand::SpawnError("No such file or directory".to_string()),
            ScriptedCommandRunner::exit(0, "test result: ok"),
        ]);
        let config = EngineConfig {
            verify: VerifyConfig {
                lint: Some(vec!["missing-linter".to_string()]),
                test: Some(vec!["cargo".to_string(), "test".to_string()]),
                ..VerifyConfig::default()
            },
            ..EngineConfig::default()
        };
        let report = Verifier::new(temp.path(), &runner, &config)
            .run(&CancelToken::new())
            .expect("run");

        let programs: Vec<String> = runner.requests().into_iter().map(|r| r.program).collect();
        assert_eq!(programs, vec!["missing-linter", "cargo"]);
        assert!(!report.success());
        assert_eq!(report.results.len(), 2);
        let lint = &report.results[0];
        assert_eq!(lint.kind, VerifyKind::Lint);
        assert!(!lint.success);
        assert!(lint.errors[0].message.contains("could not start"), "{}", lint.errors[0].message);
        assert!(report.results[1].success);
    }
}
