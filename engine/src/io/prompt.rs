//! System prompt and auto-fix instruction rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::confirm::ConfirmPolicy;
use crate::core::tools::{ParamKind, registry};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");

#[derive(Debug, Clone, Serialize)]
struct ParamContext {
    name: &'static str,
    required: bool,
    description: String,
}

#[derive(Debug, Clone, Serialize)]
struct ToolContext {
    name: &'static str,
    description: &'static str,
    params: Vec<ParamContext>,
}

fn tool_contexts() -> Vec<ToolContext> {
    registry()
        .iter()
        .map(|spec| ToolContext {
            name: spec.tool.as_str(),
            description: spec.description,
            params: spec
                .params
                .iter()
                .map(|p| ParamContext {
                    name: p.name,
                    required: p.required,
                    description: match p.kind {
                        ParamKind::StringArray => format!("{} (list of strings)", p.description),
                        ParamKind::Boolean => format!("{} (true/false)", p.description),
                        ParamKind::String => p.description.to_string(),
                    },
                })
                .collect(),
        })
        .collect()
}

/// Inputs for the system prompt.
#[derive(Debug, Clone)]
pub struct SystemPromptInputs<'a> {
    pub root: &'a str,
    pub confirm: ConfirmPolicy,
    pub dry_run: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("fix", FIX_TEMPLATE)
            .expect("fix template should be valid");
        Self { env }
    }

    pub fn render_system(&self, input: &SystemPromptInputs<'_>) -> Result<String> {
        let confirm = match input.confirm {
            ConfirmPolicy::Never => "never",
            ConfirmPolicy::Dangerous => "dangerous",
            ConfirmPolicy::Always => "always",
        };
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            root => input.root,
            tools => tool_contexts(),
            dry_run => input.dry_run,
            confirm => confirm,
        })?;
        Ok(rendered.trim().to_string())
    }

    /// Instruction that re-enters the loop after failed verification.
    pub fn render_fix(
        &self,
        errors: &str,
        attempt: u32,
        max_attempts: u32,
        task: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("fix")?;
        let rendered = template.render(context! {
            errors => errors.trim(),
            attempt => attempt,
            max_attempts => max_attempts,
            task => task.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_every_tool() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_system(&SystemPromptInputs {
                root: "/work/demo",
                confirm: ConfirmPolicy::Dangerous,
                dry_run: true,
            })
            .expect("render");
        for spec in registry() {
            assert!(prompt.contains(&format!("`{}`", spec.tool)), "{}", spec.tool);
        }
        assert!(prompt.contains("`old_text` (required)"));
        assert!(prompt.contains("/work/demo"));
        assert!(prompt.contains("Dry run"));
        assert!(prompt.contains("confirmed by the user"));
    }

    #[test]
    fn never_policy_omits_confirmation_rule() {
        let prompt = PromptEngine::new()
            .render_system(&SystemPromptInputs {
                root: ".",
                confirm: ConfirmPolicy::Never,
                dry_run: false,
            })
            .expect("render");
        assert!(!prompt.contains("confirmed"));
        assert!(!prompt.contains("Dry run"));
    }

    #[test]
    fn fix_instruction_carries_errors_and_attempt() {
        let text = PromptEngine::new()
            .render_fix("## test failed: `cargo test`\n- error: boom", 2, 3, Some("add a flag"))
            .expect("render");
        assert!(text.starts_with("Verification failed after your changes (fix attempt 2 of 3)."));
        assert!(text.contains("- error: boom"));
        assert!(text.ends_with("The original task was:\nadd a flag"));
    }
}
