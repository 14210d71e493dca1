//! Tool name and parameter key normalization.
//!
//! Models spell tool names many ways (`ReadFile`, `read-file`, `cat`). Every
//! name is folded to lower case with separators stripped, then matched against
//! the canonical names and a synonym table. Unknown names normalize to the
//! empty string and the call is dropped.

use crate::core::types::ToolName;

/// Squashed synonym -> canonical tool.
const SYNONYMS: &[(&str, ToolName)] = &[
    ("read", ToolName::ReadFile),
    ("fileread", ToolName::ReadFile),
    ("cat", ToolName::ReadFile),
    ("viewfile", ToolName::ReadFile),
    ("openfile", ToolName::ReadFile),
    ("getfile", ToolName::ReadFile),
    ("write", ToolName::WriteFile),
    ("filewrite", ToolName::WriteFile),
    ("createfile", ToolName::WriteFile),
    ("savefile", ToolName::WriteFile),
    ("edit", ToolName::EditFile),
    ("fileedit", ToolName::EditFile),
    ("modifyfile", ToolName::EditFile),
    ("updatefile", ToolName::EditFile),
    ("replaceinfile", ToolName::EditFile),
    ("strreplace", ToolName::EditFile),
    ("delete", ToolName::DeleteFile),
    ("filedelete", ToolName::DeleteFile),
    ("removefile", ToolName::DeleteFile),
    ("rm", ToolName::DeleteFile),
    ("list", ToolName::ListFiles),
    ("listdir", ToolName::ListFiles),
    ("listdirectory", ToolName::ListFiles),
    ("filelist", ToolName::ListFiles),
    ("ls", ToolName::ListFiles),
    ("mkdir", ToolName::CreateDirectory),
    ("makedirectory", ToolName::CreateDirectory),
    ("createdir", ToolName::CreateDirectory),
    ("createfolder", ToolName::CreateDirectory),
    ("search", ToolName::SearchFiles),
    ("searchcode", ToolName::SearchFiles),
    ("codesearch", ToolName::SearchFiles),
    ("grep", ToolName::SearchFiles),
    ("find", ToolName::FindFiles),
    ("findfile", ToolName::FindFiles),
    ("glob", ToolName::FindFiles),
    ("executecommand", ToolName::ExecuteCommand),
    ("execute", ToolName::ExecuteCommand),
    ("exec", ToolName::ExecuteCommand),
    ("runcommand", ToolName::ExecuteCommand),
    ("run", ToolName::ExecuteCommand),
    ("command", ToolName::ExecuteCommand),
    ("shell", ToolName::ExecuteCommand),
    ("bash", ToolName::ExecuteCommand),
    ("fetch", ToolName::FetchUrl),
    ("webfetch", ToolName::FetchUrl),
    ("httpget", ToolName::FetchUrl),
    ("readurl", ToolName::FetchUrl),
    ("curl", ToolName::FetchUrl),
];

/// Lower-case and strip hyphens, underscores, and whitespace.
fn squash(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '_') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolve any spelling of a tool name to its canonical tool.
pub fn canonical_tool(raw: &str) -> Option<ToolName> {
    let key = squash(raw);
    if key.is_empty() {
        return None;
    }
    ToolName::ALL
        .iter()
        .copied()
        .find(|tool| squash(tool.as_str()) == key)
        .or_else(|| {
            SYNONYMS
                .iter()
                .find(|(synonym, _)| *synonym == key)
                .map(|(_, tool)| *tool)
        })
}

/// Normalize a tool name to its canonical spelling, or `""` when unknown.
pub fn normalize_tool_name(raw: &str) -> String {
    canonical_tool(raw)
        .map(|tool| tool.as_str().to_string())
        .unwrap_or_default()
}

/// Map a parameter key to the canonical key for `tool`.
///
/// Unknown keys are returned squashed so they never collide with canonical
/// keys and are ignored downstream.
pub fn canonical_param_key(tool: ToolName, raw: &str) -> String {
    let key = squash(raw);
    let canonical = match key.as_str() {
        "path" | "filepath" | "file" | "filename" | "dir" | "directory" | "dirpath"
        | "folder" => Some("path"),
        "content" | "contents" | "text" | "data" | "body" | "filecontent" => {
            Some("content")
        }
        "oldtext" | "oldstring" | "old" | "original" | "oldstr" => Some("old_text"),
        "newtext" | "newstring" | "new" | "replacement" | "newstr" => Some("new_text"),
        "command" | "cmd" => Some("command"),
        "args" | "arguments" | "argv" => Some("args"),
        "pattern" | "query" | "regex" => Some("pattern"),
        "filepattern" | "include" | "filter" => Some("file_pattern"),
        "url" | "uri" | "link" | "href" => Some("url"),
        "recursive" | "recurse" => Some("recursive"),
        _ => None,
    };
    // A few keys mean different things depending on the tool.
    let canonical = match (tool, key.as_str()) {
        (ToolName::EditFile, "search" | "find") => Some("old_text"),
        (ToolName::EditFile, "replace") => Some("new_text"),
        (ToolName::SearchFiles, "search") => Some("pattern"),
        (ToolName::SearchFiles, "glob") => Some("file_pattern"),
        (ToolName::FindFiles, "glob" | "name") => Some("pattern"),
        _ => canonical,
    };
    canonical.map(str::to_string).unwrap_or(key)
}
