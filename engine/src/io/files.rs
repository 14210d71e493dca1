//! Filesystem collaborator: bounded reads, listings, content search, and
//! glob matching over a project tree.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
pub const SKIP_DIRS: [&str; 3] = [".git", "node_modules", "target"];
pub const MAX_LIST_ENTRIES: usize = 1_000;
pub const MAX_SEARCH_RESULTS: usize = 200;
/// Files larger than this are not content-searched.
pub const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;
const MAX_MATCH_LINE_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRead {
    pub content: String,
    pub truncated_bytes: u64,
}

impl TextRead {
    /// Content with a trailing marker when bytes were cut.
    pub fn render(&self) -> String {
        if self.truncated_bytes == 0 {
            return self.content.clone();
        }
        format!(
            "{}\n[... truncated {} bytes]",
            self.content, self.truncated_bytes
        )
    }
}

/// Read at most `max_bytes` of a UTF-8 text file.
pub fn read_text_limited(path: &Path, max_bytes: usize) -> Result<TextRead> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let mut buf = Vec::with_capacity(len.min(max_bytes as u64) as usize);
    file.take(max_bytes as u64)
        .read_to_end(&mut buf)
        .with_context(|| format!("read {}", path.display()))?;
    let truncated_bytes = len.saturating_sub(buf.len() as u64);

    let content = match String::from_utf8(buf) {
        Ok(text) => text,
        // A cut through a multi-byte character is expected; anything else is binary.
        Err(err) if truncated_bytes > 0 && err.utf8_error().error_len().is_none() => {
            let valid = err.utf8_error().valid_up_to();
            let mut bytes = err.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).context("decode truncated text")?
        }
        Err(_) => return Err(anyhow!("{} is not valid UTF-8 text", path.display())),
    };
    Ok(TextRead {
        content,
        truncated_bytes,
    })
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn walk(dir: &Path, recursive: bool) -> impl Iterator<Item = DirEntry> {
    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
}

/// Entries under `dir`, relative to `root`; directories end with `/`.
///
/// The second value is true when the listing hit `max_entries`.
#[instrument(skip_all, fields(dir = %dir.display(), recursive))]
pub fn list_dir(
    root: &Path,
    dir: &Path,
    recursive: bool,
    max_entries: usize,
) -> Result<(Vec<String>, bool)> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", relative(root, dir)));
    }
    let mut entries = Vec::new();
    for entry in walk(dir, recursive) {
        if entries.len() >= max_entries {
            return Ok((entries, true));
        }
        let mut name = relative(root, entry.path());
        if entry.file_type().is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    debug!(count = entries.len(), "listed directory");
    Ok((entries, false))
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

/// `path:line: text` for every line under `dir` matching `pattern`.
///
/// `file_filter` restricts which files are read.
#[instrument(skip_all, fields(dir = %dir.display(), pattern = %pattern.as_str()))]
pub fn search(
    root: &Path,
    dir: &Path,
    pattern: &Regex,
    file_filter: Option<&Glob>,
    max_results: usize,
) -> Result<(Vec<String>, bool)> {
    if !dir.exists() {
        return Err(anyhow!("{} does not exist", relative(root, dir)));
    }
    let mut results = Vec::new();
    let files: Box<dyn Iterator<Item = DirEntry>> = if dir.is_file() {
        Box::new(WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
    } else {
        Box::new(walk(dir, true))
    };

    for entry in files.filter(|e| e.file_type().is_file()) {
        let rel = relative(root, entry.path());
        if let Some(filter) = file_filter
            && !filter.is_match(&rel)
        {
            continue;
        }
        let too_big = entry
            .metadata()
            .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
            .unwrap_or(true);
        if too_big {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            continue;
        };
        if looks_binary(&bytes) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes);
        for (index, line) in text.lines().enumerate() {
            if !pattern.is_match(line) {
                continue;
            }
            if results.len() >= max_results {
                return Ok((results, true));
            }
            let shown: String = line.trim().chars().take(MAX_MATCH_LINE_CHARS).collect();
            results.push(format!("{rel}:{}: {shown}", index + 1));
        }
    }
    debug!(count = results.len(), "search finished");
    Ok((results, false))
}

/// Files under `dir` whose relative path matches `glob`.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn find(root: &Path, dir: &Path, glob: &Glob, max_results: usize) -> Result<(Vec<String>, bool)> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", relative(root, dir)));
    }
    let mut results = Vec::new();
    for entry in walk(dir, true).filter(|e| e.file_type().is_file()) {
        let rel_to_dir = relative(dir, entry.path());
        if !glob.is_match(&rel_to_dir) {
            continue;
        }
        if results.len() >= max_results {
            return Ok((results, true));
        }
        results.push(relative(root, entry.path()));
    }
    Ok((results, false))
}

/// Compiled glob pattern.
///
/// A glob without `/` is matched against the file name only; otherwise it is
/// matched against the whole `/`-separated relative path. `*` and `?` never
/// cross a separator; `**`, `[..]` classes and `{a,b}` alternation work as in
/// gitignore-style globs.
#[derive(Debug, Clone)]
pub struct Glob {
    matcher: GlobMatcher,
    match_path: bool,
}

impl Glob {
    pub fn new(glob: &str) -> Result<Self> {
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid glob `{glob}`"))?
            .compile_matcher();
        Ok(Self {
            matcher,
            match_path: glob.contains('/'),
        })
    }

    pub fn is_match(&self, rel_path: &str) -> bool {
        if self.match_path {
            return self.matcher.is_match(rel_path);
        }
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.matcher.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src/nested")).expect("mkdir");
        fs::create_dir_all(root.join("target/debug")).expect("mkdir");
        fs::create_dir_all(root.join(".git")).expect("mkdir");
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").expect("write");
        fs::write(root.join("src/lib.rs"), "pub fn add() {}\n// TODO: more\n").expect("write");
        fs::write(root.join("src/nested/mod.rs"), "fn todo_later() {}\n").expect("write");
        fs::write(root.join("target/debug/out.rs"), "pub fn add() {}\n").expect("write");
        fs::write(root.join("src/blob.bin"), [0u8, 1, 2, b'a']).expect("write");
        temp
    }

    #[test]
    fn read_truncates_with_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("big.txt");
        fs::write(&path, "abcdefghij").expect("write");
        let read = read_text_limited(&path, 4).expect("read");
        assert_eq!(read.content, "abcd");
        assert_eq!(read.truncated_bytes, 6);
        assert_eq!(read.render(), "abcd\n[... truncated 6 bytes]");
    }

    #[test]
    fn read_cut_inside_multibyte_char_is_trimmed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("utf8.txt");
        fs::write(&path, "aé").expect("write");
        let read = read_text_limited(&path, 2).expect("read");
        assert_eq!(read.content, "a");
        assert_eq!(read.truncated_bytes, 1);
    }

    #[test]
    fn listing_skips_vendor_dirs() {
        let temp = tree();
        let root = temp.path();
        let (top, truncated) = list_dir(root, root, false, 100).expect("list");
        assert!(!truncated);
        assert_eq!(top, vec!["Cargo.toml", "src/"]);

        let (all, _) = list_dir(root, &root.join("src"), true, 100).expect("list");
        assert_eq!(
            all,
            vec!["src/blob.bin", "src/lib.rs", "src/nested/", "src/nested/mod.rs"]
        );

        let (capped, truncated) = list_dir(root, &root.join("src"), true, 2).expect("list");
        assert_eq!(capped.len(), 2);
        assert!(truncated);
    }

    #[test]
    fn search_skips_binaries_and_vendor_dirs() {
        let temp = tree();
        let root = temp.path();
        let pattern = Regex::new("(?i)todo").expect("regex");
        let (hits, _) = search(root, root, &pattern, None, 100).expect("search");
        assert_eq!(
            hits,
            vec!["src/lib.rs:2: // TODO: more", "src/nested/mod.rs:1: fn todo_later() {}"]
        );

        let filter = Glob::new("lib.*").expect("glob");
        let (hits, _) = search(root, root, &pattern, Some(&filter), 100).expect("search");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn find_matches_globs() {
        let temp = tree();
        let root = temp.path();
        let (hits, _) = find(root, root, &Glob::new("*.rs").expect("glob"), 100).expect("find");
        assert_eq!(hits, vec!["src/lib.rs", "src/nested/mod.rs"]);

        let (hits, _) =
            find(root, root, &Glob::new("src/*.rs").expect("glob"), 100).expect("find");
        assert_eq!(hits, vec!["src/lib.rs"]);

        let (hits, _) =
            find(root, root, &Glob::new("**/mod.rs").expect("glob"), 100).expect("find");
        assert_eq!(hits, vec!["src/nested/mod.rs"]);
    }

    #[test]
    fn find_supports_alternation_and_classes() {
        let temp = tree();
        let root = temp.path();
        let (hits, _) = find(root, root, &Glob::new("src/{lib,main}.rs").expect("glob"), 100)
            .expect("find");
        assert_eq!(hits, vec!["src/lib.rs"]);

        let (hits, _) =
            find(root, root, &Glob::new("[a-m]*.rs").expect("glob"), 100).expect("find");
        assert_eq!(hits, vec!["src/lib.rs", "src/nested/mod.rs"]);

        assert!(Glob::new("src/[").is_err());
    }
}
