//! Engine configuration stored under `.engine/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::confirm::ConfirmPolicy;
use crate::core::safety::SafetyPolicy;
use crate::core::tools::SchemaDialect;
use crate::core::types::VerifyKind;

/// Config location relative to the project root.
pub const CONFIG_RELATIVE_PATH: &str = ".engine/config.toml";

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_RELATIVE_PATH)
}

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Model calls allowed per task, fix attempts included.
    pub max_iterations: u32,

    /// Wall-clock budget per task in seconds.
    pub max_duration_secs: u64,

    pub confirm: ConfirmPolicy,

    /// Preview mutations and commands without applying them.
    pub dry_run: bool,

    /// Run the verifier after a task that changed files.
    pub auto_verify: bool,

    pub max_fix_attempts: u32,

    pub command_timeout_secs: u64,

    pub verify_timeout_secs: u64,

    /// Files larger than this are truncated on read.
    pub max_read_bytes: usize,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,

    /// Tool output fed back to the model is cut to this many characters.
    pub max_tool_output_chars: usize,

    pub dialect: SchemaDialect,

    pub safety: SafetyConfig,

    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Commands allowed in addition to the built-in allow list.
    pub extra_allowed_commands: Vec<String>,
}

/// Per-kind command overrides, e.g. `test = ["just", "test"]`.
///
/// An override replaces whatever the detection table found for that kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<Vec<String>>,
}

impl VerifyConfig {
    pub fn command_for(&self, kind: VerifyKind) -> Option<&[String]> {
        let command = match kind {
            VerifyKind::Build => &self.build,
            VerifyKind::Test => &self.test,
            VerifyKind::Lint => &self.lint,
            VerifyKind::Typecheck => &self.typecheck,
        };
        command.as_deref()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_duration_secs: 20 * 60,
            confirm: ConfirmPolicy::Dangerous,
            dry_run: false,
            auto_verify: true,
            max_fix_attempts: 3,
            command_timeout_secs: 60,
            verify_timeout_secs: 120,
            max_read_bytes: 256 * 1024,
            output_limit_bytes: 100_000,
            max_tool_output_chars: 20_000,
            dialect: SchemaDialect::FunctionEnvelope,
            safety: SafetyConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_duration_secs == 0 {
            return Err(anyhow!("max_duration_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.verify_timeout_secs == 0 {
            return Err(anyhow!("verify_timeout_secs must be > 0"));
        }
        if self.max_read_bytes == 0 {
            return Err(anyhow!("max_read_bytes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_tool_output_chars == 0 {
            return Err(anyhow!("max_tool_output_chars must be > 0"));
        }
        for (kind, command) in [
            (VerifyKind::Build, &self.verify.build),
            (VerifyKind::Test, &self.verify.test),
            (VerifyKind::Lint, &self.verify.lint),
            (VerifyKind::Typecheck, &self.verify.typecheck),
        ] {
            if let Some(command) = command
                && command.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(anyhow!("verify.{kind} must be a non-empty array"));
            }
        }
        if self
            .safety
            .extra_allowed_commands
            .iter()
            .any(|c| c.trim().is_empty())
        {
            return Err(anyhow!("safety.extra_allowed_commands must not contain blanks"));
        }
        Ok(())
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Safety policy scoped to `project_root` with the configured extras.
    pub fn safety_policy(&self, project_root: &Path) -> SafetyPolicy {
        SafetyPolicy::new()
            .with_project_root(project_root)
            .with_extra_allowed(self.safety.extra_allowed_commands.iter().cloned())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let mut cfg = EngineConfig::default();
        cfg.confirm = ConfirmPolicy::Always;
        cfg.dialect = SchemaDialect::FlatToolUse;
        cfg.verify.test = Some(vec!["just".to_string(), "test".to_string()]);
        cfg.safety.extra_allowed_commands = vec!["just".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "confirm = \"never\"\n[verify]\nlint = [\"ruff\", \"check\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.confirm, ConfirmPolicy::Never);
        assert_eq!(cfg.max_iterations, 200);
        assert_eq!(
            cfg.verify.command_for(VerifyKind::Lint),
            Some(&["ruff".to_string(), "check".to_string()][..])
        );
    }

    #[test]
    fn rejects_empty_override() {
        let mut cfg = EngineConfig::default();
        cfg.verify.build = Some(Vec::new());
        let err = cfg.validate().expect_err("empty override");
        assert!(err.to_string().contains("verify.build"));
    }
}
