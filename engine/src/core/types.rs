//! Shared data model for tool calls, tool results, and verification records.
//!
//! These types define the contract between the parser, the tool executor, the
//! verifier, and the agent loop. They carry no I/O and serialize to plain JSON
//! so callers can persist them in whatever layout they like.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Closed set of canonical tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    WriteFile,
    EditFile,
    DeleteFile,
    ListFiles,
    CreateDirectory,
    SearchFiles,
    FindFiles,
    ExecuteCommand,
    FetchUrl,
}

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::EditFile,
        ToolName::DeleteFile,
        ToolName::ListFiles,
        ToolName::CreateDirectory,
        ToolName::SearchFiles,
        ToolName::FindFiles,
        ToolName::ExecuteCommand,
        ToolName::FetchUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::EditFile => "edit_file",
            ToolName::DeleteFile => "delete_file",
            ToolName::ListFiles => "list_files",
            ToolName::CreateDirectory => "create_directory",
            ToolName::SearchFiles => "search_files",
            ToolName::FindFiles => "find_files",
            ToolName::ExecuteCommand => "execute_command",
            ToolName::FetchUrl => "fetch_url",
        }
    }

    /// Fixed tool -> action type table used for `ActionLog` entries.
    pub fn action_type(self) -> ActionType {
        match self {
            ToolName::ReadFile => ActionType::Read,
            ToolName::WriteFile => ActionType::Write,
            ToolName::EditFile => ActionType::Edit,
            ToolName::DeleteFile => ActionType::Delete,
            ToolName::ListFiles => ActionType::List,
            ToolName::CreateDirectory => ActionType::Mkdir,
            ToolName::SearchFiles | ToolName::FindFiles => ActionType::Search,
            ToolName::ExecuteCommand => ActionType::Command,
            ToolName::FetchUrl => ActionType::Fetch,
        }
    }

    /// Tools that change file contents on disk.
    pub fn mutates_files(self) -> bool {
        matches!(
            self,
            ToolName::WriteFile | ToolName::EditFile | ToolName::DeleteFile
        )
    }

    /// Write/edit/delete/command-shaped tools (candidates for confirmation).
    pub fn is_dangerous(self) -> bool {
        self.mutates_files() || self == ToolName::ExecuteCommand
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameter record, one variant per canonical tool.
///
/// Serializes (untagged) to the tool's parameter object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolInput {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        old_text: String,
        new_text: String,
    },
    DeleteFile {
        path: String,
    },
    ListFiles {
        path: String,
        recursive: bool,
    },
    CreateDirectory {
        path: String,
    },
    SearchFiles {
        pattern: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_pattern: Option<String>,
    },
    FindFiles {
        pattern: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    ExecuteCommand {
        command: String,
        args: Vec<String>,
    },
    FetchUrl {
        url: String,
    },
}

impl ToolInput {
    pub fn tool(&self) -> ToolName {
        match self {
            ToolInput::ReadFile { .. } => ToolName::ReadFile,
            ToolInput::WriteFile { .. } => ToolName::WriteFile,
            ToolInput::EditFile { .. } => ToolName::EditFile,
            ToolInput::DeleteFile { .. } => ToolName::DeleteFile,
            ToolInput::ListFiles { .. } => ToolName::ListFiles,
            ToolInput::CreateDirectory { .. } => ToolName::CreateDirectory,
            ToolInput::SearchFiles { .. } => ToolName::SearchFiles,
            ToolInput::FindFiles { .. } => ToolName::FindFiles,
            ToolInput::ExecuteCommand { .. } => ToolName::ExecuteCommand,
            ToolInput::FetchUrl { .. } => ToolName::FetchUrl,
        }
    }
}

/// A validated, canonical tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub input: ToolInput,
    /// Correlation token supplied by the model API, if any.
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(input: ToolInput) -> Self {
        Self { input, id: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn tool(&self) -> ToolName {
        self.input.tool()
    }

    /// Parameter map in stable (sorted) key order.
    pub fn parameters(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.input) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Snapshot used to de-duplicate calls parsed from different encodings.
    pub fn snapshot(&self) -> (ToolName, String) {
        let params = Value::Object(self.parameters()).to_string();
        (self.tool(), params)
    }
}

impl Serialize for ToolCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ToolCall", 3)?;
        state.serialize_field("tool", &self.tool())?;
        state.serialize_field("parameters", &self.input)?;
        match &self.id {
            Some(id) => state.serialize_field("id", id)?,
            None => state.skip_field("id")?,
        }
        state.end()
    }
}

/// Outcome of executing one `ToolCall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: ToolName,
    pub parameters: Map<String, Value>,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool: call.tool(),
            parameters: call.parameters(),
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool: call.tool(),
            parameters: call.parameters(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Attach output to a failed result (e.g. a command's stderr).
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Action category recorded in the `ActionLog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Read,
    Write,
    Edit,
    Delete,
    List,
    Search,
    Mkdir,
    Fetch,
    Command,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Read => "read",
            ActionType::Write => "write",
            ActionType::Edit => "edit",
            ActionType::Delete => "delete",
            ActionType::List => "list",
            ActionType::Search => "search",
            ActionType::Mkdir => "mkdir",
            ActionType::Fetch => "fetch",
            ActionType::Command => "command",
        }
    }

    /// Map any tool name (canonical or not) to its action type.
    ///
    /// Names that do not normalize to a known tool fall back to `Command`.
    pub fn for_tool_name(name: &str) -> Self {
        crate::core::normalize::canonical_tool(name)
            .map(ToolName::action_type)
            .unwrap_or(ActionType::Command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Error,
}

/// One user-visible record of a side effect the agent attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: String,
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionLog {
    pub fn is_success(&self) -> bool {
        self.result == ActionResult::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Structured diagnostic extracted from verification output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub severity: Severity,
}

impl ParsedError {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            file: None,
            line: None,
            column: None,
            message: message.into(),
            code: None,
            severity,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// `file:line:col` prefix, or empty when no location is known.
    pub fn location(&self) -> String {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => format!("{file}:{line}:{col}"),
            (Some(file), Some(line), None) => format!("{file}:{line}"),
            (Some(file), None, _) => file.clone(),
            (None, _, _) => String::new(),
        }
    }
}

/// Verification command category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyKind {
    Build,
    Test,
    Lint,
    Typecheck,
}

impl VerifyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VerifyKind::Build => "build",
            VerifyKind::Test => "test",
            VerifyKind::Lint => "lint",
            VerifyKind::Typecheck => "typecheck",
        }
    }
}

impl fmt::Display for VerifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one verification command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: VerifyKind,
    pub command: String,
    pub output: String,
    pub errors: Vec<ParsedError>,
    pub duration_ms: u64,
}

/// Conversation role for history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One conversation entry sent back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: Option<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id,
        }
    }
}

/// Function-envelope dialect tool call: the arguments arrive JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// Flat tool-use dialect content block: the input arrives already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        input: Value,
    },
}

/// What the model-call collaborator returns for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// Plain text; tool calls (if any) are embedded in the text.
    Text(String),
    /// Function-envelope dialect: optional text plus encoded calls.
    FunctionCalls {
        text: String,
        calls: Vec<FunctionCall>,
    },
    /// Flat tool-use dialect: interleaved text and tool-use blocks.
    ContentBlocks(Vec<ContentBlock>),
}

impl ModelResponse {
    /// All natural-language text carried by the response.
    pub fn text(&self) -> String {
        match self {
            ModelResponse::Text(text) => text.clone(),
            ModelResponse::FunctionCalls { text, .. } => text.clone(),
            ModelResponse::ContentBlocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::ToolUse { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
