//! Structured error extraction from build, test, lint, and typecheck output.
//!
//! Each line is offered to an ordered list of matchers and the first match
//! wins. Two shapes span lines: rustc diagnostics take their location from the
//! `-->` line that follows, and Python tracebacks report the last `File` frame
//! together with the final exception line.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::types::{ParsedError, Severity, VerifyKind, VerifyResult};

/// Errors listed per failed result in the fix instruction.
pub const MAX_ERRORS_PER_RESULT: usize = 20;
/// Output tail lines used when a failure has no structured errors.
pub const OUTPUT_TAIL_LINES: usize = 30;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("diagnostic regex should compile")
}

static RUSTC_HEAD: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(error|warning)(?:\[(E\d{4})\])?: (.+)$"));
static RUSTC_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| re(r"^\s*--> (.+?):(\d+):(\d+)\s*$"));
static TSC_PAREN: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(.+?)\((\d+),(\d+)\): (error|warning) (TS\d+): (.+)$"));
static TSC_PRETTY: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(.+?):(\d+):(\d+) - (error|warning) (TS\d+): (.+)$"));
static GENERIC: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^([^\s:][^:]*):(\d+):(\d+):\s*(fatal error|error|warning):\s*(.+)$")
});
static MYPY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(.+?\.pyi?):(\d+): (error|warning): (.+?)(?:\s+\[([\w-]+)\])?$")
});
static RUFF: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(.+?):(\d+):(\d+): ([A-Z]{1,4}\d{2,4}) (.+)$"));
static GO: LazyLock<Regex> = LazyLock::new(|| re(r"^(.+?\.go):(\d+):(\d+): (.+)$"));
static LINT_UNIX: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^([^\s:][^:]*):(\d+):(\d+): (.+?)(?: \[(Error|Warning)/([^\]]+)\])?$")
});
static PY_FRAME: LazyLock<Regex> = LazyLock::new(|| re(r#"^\s*File "(.+?)", line (\d+)"#));
static PY_EXCEPTION: LazyLock<Regex> =
    LazyLock::new(|| re(r"^([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt))(?:: (.*))?$"));
static PYTEST_FAILED: LazyLock<Regex> =
    LazyLock::new(|| re(r"^FAILED (\S+?)(?:::(\S+))?(?: - (.+))?$"));
static JEST_FAIL: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*FAIL (\S+)"));
static GO_TEST_FAIL: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*--- FAIL: (\S+)"));
static RUST_TEST_FAIL: LazyLock<Regex> =
    LazyLock::new(|| re(r"^test (\S+) \.\.\. FAILED$"));

/// Rustc summary lines that carry no actionable location.
const RUSTC_NOISE: [&str; 3] = ["could not compile", "aborting due to", "build failed"];

fn severity(raw: &str) -> Severity {
    if raw.eq_ignore_ascii_case("warning") {
        Severity::Warning
    } else {
        Severity::Error
    }
}

fn num(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index).and_then(|m| m.as_str().parse().ok())
}

fn text<'h>(caps: &Captures<'h>, index: usize) -> &'h str {
    caps.get(index).map_or("", |m| m.as_str())
}

/// Extract diagnostics from combined command output, de-duplicated in order.
pub fn extract_errors(output: &str) -> Vec<ParsedError> {
    let lines: Vec<&str> = output.lines().collect();
    let mut errors = Vec::new();
    let mut frame: Option<(String, u32)> = None;
    let mut in_traceback = false;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim_end();

        if line.starts_with("Traceback (most recent call last)") {
            in_traceback = true;
            frame = None;
            continue;
        }
        if in_traceback {
            if let Some(caps) = PY_FRAME.captures(line) {
                frame = num(&caps, 2).map(|n| (text(&caps, 1).to_string(), n));
                continue;
            }
            if let Some(caps) = PY_EXCEPTION.captures(line) {
                let message = match caps.get(2) {
                    Some(detail) => format!("{}: {}", text(&caps, 1), detail.as_str()),
                    None => text(&caps, 1).to_string(),
                };
                let mut error = ParsedError::new(message, Severity::Error);
                if let Some((file, line_no)) = frame.take() {
                    error = error.at(file, Some(line_no), None);
                }
                errors.push(error);
                in_traceback = false;
                continue;
            }
            if !line.starts_with(' ') && !line.is_empty() {
                in_traceback = false;
            } else {
                continue;
            }
        }

        if let Some(error) = match_line(line, &lines[i + 1..]) {
            errors.push(error);
        }
    }

    dedupe(errors)
}

fn match_line(line: &str, rest: &[&str]) -> Option<ParsedError> {
    if let Some(caps) = RUSTC_HEAD.captures(line) {
        let message = text(&caps, 3);
        if RUSTC_NOISE.iter().any(|noise| message.starts_with(noise))
            || message.contains("generated") && message.contains("warning")
        {
            return None;
        }
        let mut error = ParsedError::new(message, severity(text(&caps, 1)));
        if let Some(code) = caps.get(2) {
            error = error.with_code(code.as_str());
        }
        let location = rest
            .iter()
            .take(3)
            .find_map(|next| RUSTC_LOCATION.captures(next));
        if let Some(loc) = location {
            error = error.at(text(&loc, 1), num(&loc, 2), num(&loc, 3));
        }
        return Some(error);
    }

    for tsc in [&*TSC_PAREN, &*TSC_PRETTY] {
        if let Some(caps) = tsc.captures(line) {
            return Some(
                ParsedError::new(text(&caps, 6), severity(text(&caps, 4)))
                    .at(text(&caps, 1), num(&caps, 2), num(&caps, 3))
                    .with_code(text(&caps, 5)),
            );
        }
    }

    if let Some(caps) = GENERIC.captures(line) {
        return Some(
            ParsedError::new(text(&caps, 5), severity(text(&caps, 4)))
                .at(text(&caps, 1), num(&caps, 2), num(&caps, 3)),
        );
    }

    if let Some(caps) = MYPY.captures(line) {
        let mut error = ParsedError::new(text(&caps, 4), severity(text(&caps, 3)))
            .at(text(&caps, 1), num(&caps, 2), None);
        if let Some(code) = caps.get(5) {
            error = error.with_code(code.as_str());
        }
        return Some(error);
    }

    if let Some(caps) = RUFF.captures(line) {
        return Some(
            ParsedError::new(text(&caps, 5), Severity::Error)
                .at(text(&caps, 1), num(&caps, 2), num(&caps, 3))
                .with_code(text(&caps, 4)),
        );
    }

    if let Some(caps) = GO.captures(line) {
        return Some(
            ParsedError::new(text(&caps, 4), Severity::Error)
                .at(text(&caps, 1), num(&caps, 2), num(&caps, 3)),
        );
    }

    if let Some(caps) = LINT_UNIX.captures(line) {
        let mut error = ParsedError::new(text(&caps, 4), severity(text(&caps, 5)))
            .at(text(&caps, 1), num(&caps, 2), num(&caps, 3));
        if let Some(rule) = caps.get(6) {
            error = error.with_code(rule.as_str());
        }
        return Some(error);
    }

    if let Some(caps) = PYTEST_FAILED.captures(line) {
        let test = caps.get(2).map_or(text(&caps, 1), |m| m.as_str());
        let message = match caps.get(3) {
            Some(reason) => format!("test {test} failed: {}", reason.as_str()),
            None => format!("test {test} failed"),
        };
        return Some(ParsedError::new(message, Severity::Error).at(text(&caps, 1), None, None));
    }

    if let Some(caps) = JEST_FAIL.captures(line) {
        return Some(
            ParsedError::new("test suite failed", Severity::Error).at(text(&caps, 1), None, None),
        );
    }

    if let Some(caps) = GO_TEST_FAIL.captures(line) {
        return Some(ParsedError::new(
            format!("test {} failed", text(&caps, 1)),
            Severity::Error,
        ));
    }

    if let Some(caps) = RUST_TEST_FAIL.captures(line) {
        return Some(ParsedError::new(
            format!("test {} failed", text(&caps, 1)),
            Severity::Error,
        ));
    }

    None
}

fn dedupe(errors: Vec<ParsedError>) -> Vec<ParsedError> {
    let mut seen = HashSet::new();
    errors
        .into_iter()
        .filter(|e| seen.insert((e.file.clone(), e.line, e.column, e.message.clone())))
        .collect()
}

/// Warning-level error carrying the raw failure reason, for failures that
/// produced no recognisable diagnostics.
pub fn synthetic_failure(kind: VerifyKind, command: &str, reason: &str) -> ParsedError {
    ParsedError::new(
        format!("{kind} command `{command}` failed: {reason}"),
        Severity::Warning,
    )
}

/// Render failed verification results as the body of a fix instruction.
pub fn format_errors_for_agent(results: &[VerifyResult]) -> String {
    let mut out = String::new();
    for result in results.iter().filter(|r| !r.success) {
        out.push_str(&format!("## {} failed: `{}`\n", result.kind, result.command));
        if result.errors.is_empty() {
            let lines: Vec<&str> = result.output.lines().collect();
            let tail = &lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..];
            out.push_str("```\n");
            for line in tail {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("```\n");
        }
        for error in result.errors.iter().take(MAX_ERRORS_PER_RESULT) {
            let location = error.location();
            let code = error
                .code
                .as_deref()
                .map(|c| format!("[{c}] "))
                .unwrap_or_default();
            let severity = match error.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            if location.is_empty() {
                out.push_str(&format!("- {severity}: {code}{}\n", error.message));
            } else {
                out.push_str(&format!("- {location}: {severity}: {code}{}\n", error.message));
            }
        }
        let hidden = result.errors.len().saturating_sub(MAX_ERRORS_PER_RESULT);
        if hidden > 0 {
            out.push_str(&format!("- ... and {hidden} more\n"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}
