//! Command and path safety policy.
//!
//! Every `(command, args)` pair passes a hard block list, then an allow list,
//! then a scan of the joined command line for dangerous textual patterns.
//! With a project root, path-looking arguments must resolve inside it. Path
//! resolution is purely lexical so the check is deterministic and needs no
//! filesystem access.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::tools::split_words;

/// Rejected regardless of arguments.
const BLOCKED: &[&str] = &[
    "sudo", "su", "doas", "pkexec", "chmod", "chown", "chgrp", "mkfs", "fdisk", "parted", "dd",
    "mount", "umount", "systemctl", "service", "launchctl", "shutdown", "reboot", "halt",
    "poweroff", "kill", "killall", "pkill", "useradd", "userdel", "passwd", "crontab",
];

/// Default allow list: package managers, build tools, VCS, text utilities,
/// and language toolchains.
const ALLOWED: &[&str] = &[
    // package managers and build tools
    "npm", "npx", "yarn", "pnpm", "bun", "pip", "pip3", "uv", "poetry", "make", "cmake", "gradle",
    "mvn", // toolchains
    "cargo", "rustc", "rustup", "rustfmt", "node", "deno", "tsc", "go", "gofmt", "python",
    "python3", "pytest", "mypy", "ruff", "black", "java", "javac", "eslint", "prettier", "jest",
    "vitest", // version control
    "git", // file and text utilities
    "ls", "cat", "head", "tail", "wc", "grep", "rg", "find", "echo", "pwd", "mkdir", "touch", "cp",
    "mv", "rm", "diff", "sort", "uniq", "which", "sed", "awk", "tree", "du", "date", "file", "stat",
    "basename", "dirname", "cut", "tr", "true", "false",
];

/// Redirection targets that are never writable.
const SYSTEM_DIRS: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr", "/boot", "/dev", "/sys", "/proc", "/lib", "/var", "/root",
];

struct DangerousPattern {
    regex: Regex,
    description: &'static str,
}

static DANGEROUS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    [
        (
            r"\brm\s+(?:-\S+\s+)*(?:/\*?|~/?|\$HOME/?)(?:\s|$)",
            "recursive delete of the filesystem root or home directory",
        ),
        (
            r"\b(?:curl|wget)\b.*\|\s*(?:sudo\s+)?(?:sh|bash|zsh|dash|python3?|perl)\b",
            "piping a downloaded script into a shell",
        ),
        (r"\$\(", "command substitution"),
        (r"`", "command substitution"),
        (r"\beval\b", "eval"),
        (r":\(\)\s*\{", "fork bomb"),
    ]
    .into_iter()
    .map(|(pattern, description)| DangerousPattern {
        regex: Regex::new(pattern).expect("dangerous pattern should compile"),
        description,
    })
    .collect()
});

static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d?>{1,2}\s*(\S+)").expect("redirect regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Deny(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetyPolicy {
    project_root: Option<PathBuf>,
    extra_allowed: Vec<String>,
}

impl SafetyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn with_extra_allowed<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_allowed.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self, command: &str, args: &[String]) -> Verdict {
        let (program, args) = split_command(command, args);
        let Some(program) = program else {
            return Verdict::Deny("empty command".to_string());
        };
        let base = basename(&program);

        if is_blocked(base) {
            return Verdict::Deny(format!("`{base}` is blocked by safety policy"));
        }
        if !ALLOWED.contains(&base) && !self.extra_allowed.iter().any(|c| c == base) {
            return Verdict::Deny(format!("`{base}` is not in the allowed command list"));
        }

        let line = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(pattern) = DANGEROUS.iter().find(|p| p.regex.is_match(&line)) {
            return Verdict::Deny(format!(
                "command matches dangerous pattern: {}",
                pattern.description
            ));
        }
        if let Some(target) = system_redirect(&line) {
            return Verdict::Deny(format!("redirection into system path `{target}`"));
        }
        if base == "rm" && is_unscoped_rm(&args) {
            return Verdict::Deny("`rm` with recursive and force flags needs a path".to_string());
        }

        if let Some(root) = &self.project_root {
            for arg in &args {
                if !looks_like_path(arg) || arg == "/dev/null" {
                    continue;
                }
                if resolve_within(root, arg).is_none() {
                    return Verdict::Deny(format!("path `{arg}` is outside the project root"));
                }
            }
        }

        Verdict::Allow
    }
}

/// Validate with the default allow list and an optional root scope.
pub fn validate_command(command: &str, args: &[String], project_root: Option<&Path>) -> Verdict {
    let mut policy = SafetyPolicy::new();
    if let Some(root) = project_root {
        policy = policy.with_project_root(root);
    }
    policy.validate(command, args)
}

fn split_command(command: &str, args: &[String]) -> (Option<String>, Vec<String>) {
    let command = command.trim();
    if args.is_empty() && command.contains(char::is_whitespace) {
        let mut words = split_words(command).into_iter();
        return (words.next(), words.collect());
    }
    let program = (!command.is_empty()).then(|| command.to_string());
    (program, args.to_vec())
}

fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

fn is_blocked(base: &str) -> bool {
    BLOCKED.contains(&base) || base.starts_with("mkfs.")
}

fn system_redirect(line: &str) -> Option<String> {
    REDIRECT.captures_iter(line).find_map(|caps| {
        let target = caps.get(1)?.as_str();
        if target == "/dev/null" {
            return None;
        }
        let normalized = normalize_lexically(Path::new(target));
        SYSTEM_DIRS
            .iter()
            .any(|dir| normalized.starts_with(dir))
            .then(|| target.to_string())
    })
}

fn is_unscoped_rm(args: &[String]) -> bool {
    let mut recursive = false;
    let mut force = false;
    let mut paths = 0;
    for arg in args {
        match arg.as_str() {
            "--recursive" => recursive = true,
            "--force" => force = true,
            "--" => {}
            flag if flag.starts_with("--") => {}
            flag if flag.starts_with('-') && flag.len() > 1 => {
                recursive |= flag.contains(['r', 'R']);
                force |= flag.contains('f');
            }
            _ => paths += 1,
        }
    }
    recursive && force && paths == 0
}

fn looks_like_path(arg: &str) -> bool {
    if arg.starts_with('-') || arg.contains("://") {
        return false;
    }
    arg.contains('/') || arg.starts_with('.') || arg.starts_with('~')
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Resolve `raw` against `root` and return it only if it stays inside.
///
/// `~` paths are always outside.
pub fn resolve_within(root: &Path, raw: &str) -> Option<PathBuf> {
    if raw.starts_with('~') {
        return None;
    }
    let root = normalize_lexically(root);
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize_lexically(&joined);
    resolved.starts_with(&root).then_some(resolved)
}
