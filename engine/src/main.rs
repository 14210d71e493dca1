//! Command-line front end for the engine's standalone pieces.
//!
//! The agent loop needs a model client, which lives outside this crate; the
//! CLI exposes the parts that run on their own: schema export, tool-call
//! parsing, command safety checks, diffs, verification, and config setup.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use engine::core::cancel::CancelToken;
use engine::core::diagnostics::format_errors_for_agent;
use engine::core::diff::{FileDiff, generate_diff_with_context, render_unified};
use engine::core::parser::parse_tool_calls;
use engine::core::safety::Verdict;
use engine::core::tools::{SchemaDialect, export_schemas, split_words};
use engine::exit_codes;
use engine::io::config::{EngineConfig, config_path, load_config, write_config};
use engine::io::process::SystemCommandRunner;
use engine::io::verifier::Verifier;
use engine::logging;

#[derive(Parser)]
#[command(name = "engine", version, about = "Coding-agent engine tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DialectArg {
    /// `{"type": "function", "function": {...}}` envelopes.
    Function,
    /// Flat `{name, description, input_schema}` records.
    Flat,
}

impl From<DialectArg> for SchemaDialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Function => SchemaDialect::FunctionEnvelope,
            DialectArg::Flat => SchemaDialect::FlatToolUse,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the tool schemas as JSON.
    Schema {
        #[arg(long, value_enum, default_value = "function")]
        dialect: DialectArg,
    },
    /// Extract tool calls from model output (file or stdin) and print them as JSON.
    Parse {
        /// Input file; reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Check a command line against the safety policy.
    Check {
        /// Project root used for path scoping and config.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Program followed by its arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print a unified diff between two files.
    Diff {
        old: PathBuf,
        new: PathBuf,
        /// Context lines around each change.
        #[arg(long, default_value_t = engine::core::diff::DEFAULT_CONTEXT)]
        context: usize,
        /// Print hunks as JSON instead of unified text.
        #[arg(long)]
        json: bool,
    },
    /// Detect and run the project's verification commands.
    Verify {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write `.engine/config.toml` with default settings.
    InitConfig {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Schema { dialect } => cmd_schema(dialect.into()),
        Command::Parse { file } => cmd_parse(file.as_deref()),
        Command::Check { root, command } => cmd_check(&root, &command),
        Command::Diff {
            old,
            new,
            context,
            json,
        } => cmd_diff(&old, &new, context, json),
        Command::Verify { root, json } => cmd_verify(&root, json),
        Command::InitConfig { root, force } => cmd_init_config(&root, force),
    }
}

fn cmd_schema(dialect: SchemaDialect) -> Result<i32> {
    let schemas = export_schemas(dialect);
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(exit_codes::OK)
}

fn cmd_parse(file: Option<&Path>) -> Result<i32> {
    let text = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    let calls = parse_tool_calls(&text);
    println!("{}", serde_json::to_string_pretty(&calls)?);
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path, command: &[String]) -> Result<i32> {
    let (program, args) = split_command_line(command)?;
    let config = load_config(&config_path(root))?;
    match config.safety_policy(root).validate(&program, &args) {
        Verdict::Allow => {
            println!("allowed");
            Ok(exit_codes::OK)
        }
        Verdict::Deny(reason) => {
            println!("denied: {reason}");
            Ok(exit_codes::DENIED)
        }
    }
}

/// A single quoted argument such as `"git status"` is split into words.
fn split_command_line(command: &[String]) -> Result<(String, Vec<String>)> {
    let words = match command {
        [single] => split_words(single),
        _ => command.to_vec(),
    };
    let Some((program, args)) = words.split_first() else {
        bail!("no command given");
    };
    Ok((program.clone(), args.to_vec()))
}

fn cmd_diff(old: &Path, new: &Path, context: usize, json: bool) -> Result<i32> {
    let new_text =
        fs::read_to_string(new).with_context(|| format!("read {}", new.display()))?;
    let display = new.display().to_string();
    let mut diff = if old.exists() {
        let old_text =
            fs::read_to_string(old).with_context(|| format!("read {}", old.display()))?;
        FileDiff::modify(display, &old_text, &new_text)
    } else {
        FileDiff::create(display, &new_text)
    };
    diff.hunks = generate_diff_with_context(
        diff.old_content.as_deref().unwrap_or_default(),
        &new_text,
        context,
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&diff.hunks)?);
    } else if !diff.is_unchanged() {
        print!("{}", render_unified(&diff));
    }
    Ok(exit_codes::OK)
}

fn cmd_verify(root: &Path, json: bool) -> Result<i32> {
    let config = load_config(&config_path(root))?;
    let runner = SystemCommandRunner;
    let verifier = Verifier::new(root, &runner, &config);
    if verifier.commands().is_empty() {
        println!("no verification commands detected");
        return Ok(exit_codes::OK);
    }
    let report = verifier.run(&CancelToken::new())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.results)?);
    } else {
        for result in &report.results {
            let status = if result.success { "ok" } else { "failed" };
            println!(
                "{} `{}`: {status} ({} error(s), {}ms)",
                result.kind,
                result.command,
                result.errors.len(),
                result.duration_ms
            );
        }
        for kind in &report.skipped {
            println!("{kind}: skipped");
        }
        if !report.success() {
            println!();
            println!("{}", format_errors_for_agent(&report.results));
        }
    }

    Ok(if report.success() {
        exit_codes::OK
    } else {
        exit_codes::VERIFY_FAILED
    })
}

fn cmd_init_config(root: &Path, force: bool) -> Result<i32> {
    let path = config_path(root);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(&path, &EngineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check_keeps_hyphenated_args() {
        let cli = Cli::parse_from(["engine", "check", "rm", "-rf", "dist"]);
        match cli.command {
            Command::Check { root, command } => {
                assert_eq!(root, PathBuf::from("."));
                assert_eq!(command, vec!["rm", "-rf", "dist"]);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn parse_schema_dialect() {
        let cli = Cli::parse_from(["engine", "schema", "--dialect", "flat"]);
        assert!(matches!(
            cli.command,
            Command::Schema {
                dialect: DialectArg::Flat
            }
        ));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["engine", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true, .. }));
    }

    #[test]
    fn single_argument_command_lines_are_split() {
        let (program, args) =
            split_command_line(&["git status --short".to_string()]).expect("split");
        assert_eq!(program, "git");
        assert_eq!(args, vec!["status", "--short"]);
        assert!(split_command_line(&["  ".to_string()]).is_err());
    }
}
