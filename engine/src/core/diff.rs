//! Line diffs for previewing file mutations.
//!
//! The edit script is Myers' O((N+M)D) shortest edit script. The common prefix
//! and suffix are trimmed first, and the trace keeps only the live diagonals of
//! each round, so typical small edits to large files stay cheap.
//!
//! Lines are compared with their terminator, so a file that gains or loses
//! its final newline differs in its last line. That line is flagged with
//! `no_newline` and rendered with git's `\ No newline at end of file` marker.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line_num: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line_num: Option<usize>,
    /// Last line of its file, without a trailing newline.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_newline: bool,
}

impl DiffLine {
    /// The line as it appears in the file, terminator included.
    fn raw(&self) -> String {
        if self.no_newline {
            self.content.clone()
        } else {
            format!("{}\n", self.content)
        }
    }
}

/// Contiguous, context-padded group of changes.
///
/// `old_lines` counts non-add lines and `new_lines` counts non-remove lines.
/// A start is 1-based, or the line before the hunk when its count is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    pub fn additions(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Add).count()
    }

    pub fn deletions(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Remove).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    pub fn create(path: impl Into<String>, content: &str) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Create,
            old_content: None,
            new_content: Some(content.to_string()),
            hunks: generate_diff("", content),
        }
    }

    pub fn modify(path: impl Into<String>, old: &str, new: &str) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Modify,
            old_content: Some(old.to_string()),
            new_content: Some(new.to_string()),
            hunks: generate_diff(old, new),
        }
    }

    pub fn delete(path: impl Into<String>, content: &str) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
            old_content: Some(content.to_string()),
            new_content: None,
            hunks: generate_diff(content, ""),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.kind == ChangeKind::Modify && self.hunks.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.hunks.iter().map(DiffHunk::additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.hunks.iter().map(DiffHunk::deletions).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files: usize,
    pub additions: usize,
    pub deletions: usize,
}

impl DiffStats {
    pub fn from_diffs(diffs: &[FileDiff]) -> Self {
        diffs.iter().fold(Self::default(), |acc, diff| Self {
            files: acc.files + 1,
            additions: acc.additions + diff.additions(),
            deletions: acc.deletions + diff.deletions(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Insert,
    Delete,
}

pub fn generate_diff(old: &str, new: &str) -> Vec<DiffHunk> {
    generate_diff_with_context(old, new, DEFAULT_CONTEXT)
}

pub fn generate_diff_with_context(old: &str, new: &str, context: usize) -> Vec<DiffHunk> {
    let a: Vec<&str> = old.split_inclusive('\n').collect();
    let b: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = edit_script(&a, &b);
    build_hunks(&a, &b, &ops, context)
}

fn edit_script(a: &[&str], b: &[&str]) -> Vec<Op> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut ops = vec![Op::Equal; prefix];
    ops.extend(myers(
        &a[prefix..a.len() - suffix],
        &b[prefix..b.len() - suffix],
    ));
    ops.extend(std::iter::repeat_n(Op::Equal, suffix));
    ops
}

fn myers(a: &[&str], b: &[&str]) -> Vec<Op> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    if n == 0 {
        return vec![Op::Insert; b.len()];
    }
    if m == 0 {
        return vec![Op::Delete; a.len()];
    }

    let max = n + m;
    let offset = max + 1;
    let idx = |k: isize| (k + offset) as usize;
    let mut v = vec![0isize; (2 * max + 3) as usize];
    // trace[d] holds diagonals -d..=d as they stood before round d.
    let mut trace: Vec<Vec<isize>> = Vec::new();
    let mut last_d = 0;

    'search: for d in 0..=max {
        trace.push(v[idx(-d)..=idx(d)].to_vec());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx(k)] = x;
            if x >= n && y >= m {
                last_d = d;
                break 'search;
            }
            k += 2;
        }
    }

    let mut ops = Vec::with_capacity((n + m) as usize);
    let (mut x, mut y) = (n, m);
    for d in (0..=last_d).rev() {
        if d == 0 {
            ops.extend(std::iter::repeat_n(Op::Equal, x as usize));
            break;
        }
        let row = &trace[d as usize];
        let at = |k: isize| row[(k + d) as usize];
        let k = x - y;
        let prev_k = if k == -d || (k != d && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = at(prev_k);
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            ops.push(Op::Equal);
            x -= 1;
            y -= 1;
        }
        ops.push(if x == prev_x { Op::Insert } else { Op::Delete });
        x = prev_x;
        y = prev_y;
    }
    ops.reverse();
    ops
}

/// A line of the full edit script with its 0-based source positions.
struct Step<'a> {
    op: Op,
    content: &'a str,
    old_index: usize,
    new_index: usize,
}

fn build_hunks(a: &[&str], b: &[&str], ops: &[Op], context: usize) -> Vec<DiffHunk> {
    let mut steps = Vec::with_capacity(ops.len());
    let (mut i, mut j) = (0, 0);
    for &op in ops {
        let content = match op {
            Op::Equal | Op::Delete => a[i],
            Op::Insert => b[j],
        };
        steps.push(Step {
            op,
            content,
            old_index: i,
            new_index: j,
        });
        match op {
            Op::Equal => {
                i += 1;
                j += 1;
            }
            Op::Delete => i += 1,
            Op::Insert => j += 1,
        }
    }

    // Group change positions whose gap fits inside both context windows.
    let changes: Vec<usize> = steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.op != Op::Equal)
        .map(|(pos, _)| pos)
        .collect();
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &pos in &changes {
        match groups.last_mut() {
            Some((_, last)) if pos - *last <= 2 * context + 1 => *last = pos,
            _ => groups.push((pos, pos)),
        }
    }

    groups
        .into_iter()
        .map(|(first, last)| {
            let start = first.saturating_sub(context);
            let end = (last + 1 + context).min(steps.len());
            hunk_from(&steps[start..end])
        })
        .collect()
}

fn hunk_from(steps: &[Step<'_>]) -> DiffHunk {
    let lines: Vec<DiffLine> = steps
        .iter()
        .map(|s| {
            let (old_line_num, new_line_num, kind) = match s.op {
                Op::Equal => (Some(s.old_index + 1), Some(s.new_index + 1), LineKind::Context),
                Op::Delete => (Some(s.old_index + 1), None, LineKind::Remove),
                Op::Insert => (None, Some(s.new_index + 1), LineKind::Add),
            };
            let (content, no_newline) = match s.content.strip_suffix('\n') {
                Some(line) => (line, false),
                None => (s.content, true),
            };
            DiffLine {
                kind,
                content: content.to_string(),
                old_line_num,
                new_line_num,
                no_newline,
            }
        })
        .collect();

    let old_lines = lines.iter().filter(|l| l.kind != LineKind::Add).count();
    let new_lines = lines.iter().filter(|l| l.kind != LineKind::Remove).count();
    let (old_before, new_before) = steps
        .first()
        .map(|s| (s.old_index, s.new_index))
        .unwrap_or_default();

    DiffHunk {
        old_start: if old_lines > 0 { old_before + 1 } else { old_before },
        old_lines,
        new_start: if new_lines > 0 { new_before + 1 } else { new_before },
        new_lines,
        lines,
    }
}

/// Render a unified-diff text block.
pub fn render_unified(diff: &FileDiff) -> String {
    let old_header = match diff.kind {
        ChangeKind::Create => "/dev/null".to_string(),
        _ => format!("a/{}", diff.path),
    };
    let new_header = match diff.kind {
        ChangeKind::Delete => "/dev/null".to_string(),
        _ => format!("b/{}", diff.path),
    };

    let mut out = format!("--- {old_header}\n+++ {new_header}\n");
    for hunk in &diff.hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
        ));
        for line in &hunk.lines {
            let marker = match line.kind {
                LineKind::Context => ' ',
                LineKind::Add => '+',
                LineKind::Remove => '-',
            };
            out.push(marker);
            out.push_str(&line.content);
            out.push('\n');
            if line.no_newline {
                out.push_str("\\ No newline at end of file\n");
            }
        }
    }
    out
}

/// Apply hunks produced from `old` and return the new text.
pub fn apply_hunks(old: &str, hunks: &[DiffHunk]) -> Result<String> {
    let source: Vec<&str> = old.split_inclusive('\n').collect();
    let mut out = String::with_capacity(old.len());
    let mut cursor = 0;

    for hunk in hunks {
        let start = if hunk.old_lines > 0 {
            hunk.old_start.saturating_sub(1)
        } else {
            hunk.old_start
        };
        if start < cursor || start > source.len() {
            bail!("hunk at old line {} is out of order", hunk.old_start);
        }
        out.extend(source[cursor..start].iter().copied());
        cursor = start;

        for line in &hunk.lines {
            let raw = line.raw();
            match line.kind {
                LineKind::Add => out.push_str(&raw),
                LineKind::Context | LineKind::Remove => {
                    if source.get(cursor) != Some(&raw.as_str()) {
                        bail!("hunk does not match old text at line {}", cursor + 1);
                    }
                    if line.kind == LineKind::Context {
                        out.push_str(&raw);
                    }
                    cursor += 1;
                }
            }
        }
    }
    out.extend(source[cursor..].iter().copied());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    fn assert_counts_consistent(hunks: &[DiffHunk]) {
        for hunk in hunks {
            let old = hunk.lines.iter().filter(|l| l.kind != LineKind::Add).count();
            let new = hunk.lines.iter().filter(|l| l.kind != LineKind::Remove).count();
            assert_eq!(hunk.old_lines, old);
            assert_eq!(hunk.new_lines, new);
        }
    }

    fn assert_reconstructs(old: &str, new: &str) {
        let hunks = generate_diff(old, new);
        assert_counts_consistent(&hunks);
        let rebuilt = apply_hunks(old, &hunks).expect("apply");
        assert_eq!(rebuilt, new);
    }

    #[test]
    fn identical_inputs_have_no_hunks() {
        for text in ["", "a", "a\nb\nc\n", &numbered(50)] {
            assert!(generate_diff(text, text).is_empty());
        }
    }

    #[test]
    fn reconstructs_new_text() {
        let cases = [
            ("", "a\nb\n"),
            ("a\nb\n", ""),
            ("a\nb\nc\n", "a\nc\n"),
            ("a\nb\nc\n", "x\na\nb\nc\ny\n"),
            ("a\nb\nc\nd\ne\n", "e\nd\nc\nb\na\n"),
            ("fn a() {}\nfn b() {}\n", "fn a() {}\n\nfn c() {}\nfn b() {}\n"),
            ("a\nb", "a\nb\n"),
            ("a\nb\n", "a\nb"),
            ("a\r\nb\r\n", "a\r\nc\r\n"),
        ];
        for (old, new) in cases {
            assert_reconstructs(old, new);
        }
        let old = numbered(40);
        let new = old
            .replace("line 5\n", "")
            .replace("line 20\n", "line twenty\n")
            .replace("line 33\n", "line 33\nextra\n");
        assert_reconstructs(&old, &new);
    }

    #[test]
    fn far_apart_changes_make_separate_hunks() {
        let old = numbered(10);
        let new = old
            .replace("line 1\n", "first\n")
            .replace("line 10\n", "last\n");
        let hunks = generate_diff(&old, &new);
        assert!(hunks.len() >= 2, "{hunks:?}");
        assert_counts_consistent(&hunks);
    }

    #[test]
    fn nearby_changes_share_a_hunk() {
        let old = numbered(10);
        let new = old
            .replace("line 4\n", "four\n")
            .replace("line 6\n", "six\n");
        let hunks = generate_diff(&old, &new);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(hunks[0].old_lines, 9);
    }

    #[test]
    fn edit_script_is_minimal() {
        let hunks = generate_diff("a\nb\nc\na\nb\nb\na\n", "c\nb\na\nb\na\nc\n");
        let edits: usize = hunks.iter().map(|h| h.additions() + h.deletions()).sum();
        assert_eq!(edits, 5);
    }

    #[test]
    fn renders_unified_headers() {
        let diff = FileDiff::modify("src/lib.rs", "a\nb\n", "a\nc\n");
        assert_eq!(
            render_unified(&diff),
            "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n"
        );
        let created = render_unified(&FileDiff::create("new.txt", "x\n"));
        assert!(created.starts_with("--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+x\n"));
    }

    #[test]
    fn final_newline_changes_are_rendered() {
        let added = FileDiff::modify("a.txt", "a\nb", "a\nb\n");
        assert_eq!(added.additions(), 1);
        assert_eq!(added.deletions(), 1);
        assert_eq!(
            render_unified(&added),
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n a\n-b\n\\ No newline at end of file\n+b\n"
        );

        let removed = render_unified(&FileDiff::modify("a.txt", "x\n", "x"));
        assert_eq!(
            removed,
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,1 +1,1 @@\n-x\n+x\n\\ No newline at end of file\n"
        );
    }

    #[test]
    fn stats_sum_across_files() {
        let diffs = [
            FileDiff::create("a", "1\n2\n"),
            FileDiff::modify("b", "x\ny\n", "x\nz\n"),
            FileDiff::delete("c", "gone\n"),
        ];
        assert_eq!(
            DiffStats::from_diffs(&diffs),
            DiffStats {
                files: 3,
                additions: 3,
                deletions: 2,
            }
        );
    }
}
