//! Fixed tool registry, schema export, and parameter validation.
//!
//! The registry is the single source of truth for tool names, descriptions,
//! and parameters. Both schema dialects are rendered from it, so their
//! `required` arrays always agree, and parsed parameters are validated against
//! the same JSON Schema before a typed [`ToolInput`] is built.

use std::sync::LazyLock;

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::normalize::canonical_param_key;
use crate::core::types::{ToolInput, ToolName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    StringArray,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub tool: ToolName,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        description,
    }
}

const PATH: ParamSpec = param(
    "path",
    ParamKind::String,
    true,
    "File or directory path relative to the project root",
);

const READ_FILE: &[ParamSpec] = &[PATH];
const WRITE_FILE: &[ParamSpec] = &[
    PATH,
    param(
        "content",
        ParamKind::String,
        true,
        "Complete new file content",
    ),
];
const EDIT_FILE: &[ParamSpec] = &[
    PATH,
    param(
        "old_text",
        ParamKind::String,
        true,
        "Exact text to replace (first occurrence); empty appends",
    ),
    param("new_text", ParamKind::String, true, "Replacement text"),
];
const LIST_FILES: &[ParamSpec] = &[
    PATH,
    param(
        "recursive",
        ParamKind::Boolean,
        false,
        "List subdirectories recursively",
    ),
];
const SEARCH_FILES: &[ParamSpec] = &[
    param(
        "pattern",
        ParamKind::String,
        true,
        "Regular expression to search for",
    ),
    param(
        "path",
        ParamKind::String,
        false,
        "Directory to search (defaults to the project root)",
    ),
    param(
        "file_pattern",
        ParamKind::String,
        false,
        "Glob restricting which files are searched, e.g. *.rs",
    ),
];
const FIND_FILES: &[ParamSpec] = &[
    param(
        "pattern",
        ParamKind::String,
        true,
        "Glob pattern matched against file paths, e.g. **/*.toml",
    ),
    param(
        "path",
        ParamKind::String,
        false,
        "Directory to search (defaults to the project root)",
    ),
];
const EXECUTE_COMMAND: &[ParamSpec] = &[
    param(
        "command",
        ParamKind::String,
        true,
        "Program to run (no shell features)",
    ),
    param(
        "args",
        ParamKind::StringArray,
        false,
        "Arguments passed to the program",
    ),
];
const FETCH_URL: &[ParamSpec] = &[param(
    "url",
    ParamKind::String,
    true,
    "http or https URL to fetch",
)];

/// Ordered like `ToolName::ALL` so `tool as usize` indexes it.
static REGISTRY: [ToolSpec; 10] = [
    ToolSpec {
        tool: ToolName::ReadFile,
        description: "Read a text file from the project",
        params: READ_FILE,
    },
    ToolSpec {
        tool: ToolName::WriteFile,
        description: "Create or overwrite a file with the given content",
        params: WRITE_FILE,
    },
    ToolSpec {
        tool: ToolName::EditFile,
        description: "Replace an exact snippet of text inside an existing file",
        params: EDIT_FILE,
    },
    ToolSpec {
        tool: ToolName::DeleteFile,
        description: "Delete a file",
        params: READ_FILE,
    },
    ToolSpec {
        tool: ToolName::ListFiles,
        description: "List the entries of a directory",
        params: LIST_FILES,
    },
    ToolSpec {
        tool: ToolName::CreateDirectory,
        description: "Create a directory (and missing parents)",
        params: READ_FILE,
    },
    ToolSpec {
        tool: ToolName::SearchFiles,
        description: "Search file contents for a regular expression",
        params: SEARCH_FILES,
    },
    ToolSpec {
        tool: ToolName::FindFiles,
        description: "Find files whose path matches a glob pattern",
        params: FIND_FILES,
    },
    ToolSpec {
        tool: ToolName::ExecuteCommand,
        description: "Run an allow-listed command in the project root",
        params: EXECUTE_COMMAND,
    },
    ToolSpec {
        tool: ToolName::FetchUrl,
        description: "Fetch the body of a web page or API endpoint",
        params: FETCH_URL,
    },
];

static VALIDATORS: LazyLock<Vec<jsonschema::Validator>> = LazyLock::new(|| {
    REGISTRY
        .iter()
        .map(|spec| {
            jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&spec.input_schema())
                .expect("registry schema should compile")
        })
        .collect()
});

pub fn registry() -> &'static [ToolSpec] {
    &REGISTRY
}

pub fn spec(tool: ToolName) -> &'static ToolSpec {
    &REGISTRY[tool as usize]
}

impl ToolSpec {
    pub fn required(&self) -> Vec<&'static str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect()
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema for the tool's parameter object.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            let schema = match p.kind {
                ParamKind::String => json!({"type": "string", "description": p.description}),
                ParamKind::Boolean => json!({"type": "boolean", "description": p.description}),
                ParamKind::StringArray => json!({
                    "type": "array",
                    "items": {"type": "string"},
                    "description": p.description,
                }),
            };
            properties.insert(p.name.to_string(), schema);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required(),
        })
    }
}

/// External tool-schema encodings expected by different model APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDialect {
    /// `{"type":"function","function":{"name","description","parameters"}}`
    #[default]
    FunctionEnvelope,
    /// `{"name","description","input_schema"}`
    FlatToolUse,
}

/// Render one tool in the requested dialect.
pub fn tool_schema(spec: &ToolSpec, dialect: SchemaDialect) -> Value {
    match dialect {
        SchemaDialect::FunctionEnvelope => json!({
            "type": "function",
            "function": {
                "name": spec.tool.as_str(),
                "description": spec.description,
                "parameters": spec.input_schema(),
            }
        }),
        SchemaDialect::FlatToolUse => json!({
            "name": spec.tool.as_str(),
            "description": spec.description,
            "input_schema": spec.input_schema(),
        }),
    }
}

/// Render the whole registry in the requested dialect.
pub fn export_schemas(dialect: SchemaDialect) -> Vec<Value> {
    REGISTRY
        .iter()
        .map(|spec| tool_schema(spec, dialect))
        .collect()
}

/// Read back `(name, required)` from a schema of either dialect.
pub fn schema_name_and_required(schema: &Value) -> Option<(String, Vec<String>)> {
    let (name, params) = match schema.get("function") {
        Some(function) => (function.get("name")?, function.get("parameters")?),
        None => (schema.get("name")?, schema.get("input_schema")?),
    };
    let required = params
        .get("required")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Some((name.as_str()?.to_string(), required))
}

/// Canonicalize keys and coerce values to the registry's parameter kinds.
///
/// Unknown keys are dropped. A `command` containing whitespace with no `args`
/// is shell-split into program and arguments.
pub fn normalize_params(tool: ToolName, raw: &Map<String, Value>) -> Map<String, Value> {
    let spec = spec(tool);
    let mut params = Map::new();
    for (key, value) in raw {
        let key = canonical_param_key(tool, key);
        let Some(param) = spec.param(&key) else {
            continue;
        };
        if params.contains_key(&key) {
            continue;
        }
        if let Some(value) = coerce(param.kind, value) {
            params.insert(key, value);
        }
    }

    if tool == ToolName::ExecuteCommand {
        split_inline_command(&mut params);
    }
    params
}

fn coerce(kind: ParamKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => None,
        (ParamKind::String, Value::String(_)) => Some(value.clone()),
        (ParamKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        // Models sometimes send JSON file content as a nested object.
        (ParamKind::String, other) => serde_json::to_string_pretty(other).ok().map(Value::String),
        (ParamKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" | "" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamKind::Boolean, Value::Number(n)) => Some(Value::Bool(n.as_f64() != Some(0.0))),
        (ParamKind::Boolean, _) => None,
        (ParamKind::StringArray, Value::Array(items)) => Some(Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                })
                .collect(),
        )),
        (ParamKind::StringArray, Value::String(s)) => Some(Value::Array(
            split_words(s).into_iter().map(Value::String).collect(),
        )),
        (ParamKind::StringArray, _) => None,
    }
}

fn split_inline_command(params: &mut Map<String, Value>) {
    let has_args = params
        .get("args")
        .and_then(Value::as_array)
        .is_some_and(|args| !args.is_empty());
    if has_args {
        return;
    }
    let Some(command) = params.get("command").and_then(Value::as_str) else {
        return;
    };
    if !command.trim().contains(char::is_whitespace) {
        return;
    }
    let mut words = split_words(command).into_iter();
    let Some(program) = words.next() else {
        return;
    };
    let args: Vec<Value> = words.map(Value::String).collect();
    params.insert("command".to_string(), Value::String(program));
    params.insert("args".to_string(), Value::Array(args));
}

/// Shell-style word split, falling back to whitespace on unbalanced quotes.
pub fn split_words(text: &str) -> Vec<String> {
    shlex::split(text)
        .unwrap_or_else(|| text.split_whitespace().map(str::to_string).collect())
}

/// Validate normalized parameters and build the typed record.
///
/// Returns `None` when a required parameter is missing or mistyped, or when a
/// path/command/pattern/url is blank.
pub fn input_from_params(tool: ToolName, params: &Map<String, Value>) -> Option<ToolInput> {
    let instance = Value::Object(params.clone());
    if !VALIDATORS[tool as usize].is_valid(&instance) {
        return None;
    }

    let text = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);
    let non_blank = |key: &str| text(key).filter(|s| !s.trim().is_empty());
    let optional_path = || non_blank("path");

    let input = match tool {
        ToolName::ReadFile => ToolInput::ReadFile {
            path: non_blank("path")?,
        },
        ToolName::WriteFile => ToolInput::WriteFile {
            path: non_blank("path")?,
            content: text("content")?,
        },
        ToolName::EditFile => ToolInput::EditFile {
            path: non_blank("path")?,
            old_text: text("old_text")?,
            new_text: text("new_text")?,
        },
        ToolName::DeleteFile => ToolInput::DeleteFile {
            path: non_blank("path")?,
        },
        ToolName::ListFiles => ToolInput::ListFiles {
            path: non_blank("path")?,
            recursive: params
                .get("recursive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        ToolName::CreateDirectory => ToolInput::CreateDirectory {
            path: non_blank("path")?,
        },
        ToolName::SearchFiles => ToolInput::SearchFiles {
            pattern: non_blank("pattern")?,
            path: optional_path(),
            file_pattern: non_blank("file_pattern"),
        },
        ToolName::FindFiles => ToolInput::FindFiles {
            pattern: non_blank("pattern")?,
            path: optional_path(),
        },
        ToolName::ExecuteCommand => ToolInput::ExecuteCommand {
            command: non_blank("command")?.trim().to_string(),
            args: params
                .get("args")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        ToolName::FetchUrl => ToolInput::FetchUrl {
            url: non_blank("url")?.trim().to_string(),
        },
    };
    Some(input)
}
