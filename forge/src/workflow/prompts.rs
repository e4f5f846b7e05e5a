//! Prompt rendering for workflow steps.
//!
//! Templates are embedded and rendered with minijinja. Wording is not part of
//! any contract; steps only depend on the JSON shapes the templates request.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::state::ChecklistItem;

/// System preamble sent with every completion.
pub const SYSTEM_PROMPT: &str = "You are a careful software engineer working \
inside an existing repository. Follow the task instructions exactly. When \
asked for JSON, respond with a single JSON object and nothing else.";

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const CHECKLIST_TEMPLATE: &str = include_str!("prompts/checklist.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("checklist", CHECKLIST_TEMPLATE)
            .expect("checklist template should be valid");
        env.add_template("execute", EXECUTE_TEMPLATE)
            .expect("execute template should be valid");
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        env.add_template("summary", SUMMARY_TEMPLATE)
            .expect("summary template should be valid");
        Self { env }
    }

    pub fn render_plan(&self, feature_request: &str, repo_context: &str) -> Result<String> {
        let rendered = self.env.get_template("plan")?.render(context! {
            feature_request => feature_request.trim(),
            repo_context => repo_context.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_checklist(&self, plan_markdown: &str) -> Result<String> {
        let rendered = self.env.get_template("checklist")?.render(context! {
            plan => plan_markdown.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_execute(
        &self,
        item: &ChecklistItem,
        file_content: &str,
        repo_context: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("execute")?.render(context! {
            item => item,
            file_content => file_content,
            repo_context => repo_context.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_repair(
        &self,
        item: &ChecklistItem,
        file_content: &str,
        validation_errors: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("repair")?.render(context! {
            item => item,
            file_content => file_content,
            validation_errors => validation_errors.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_summary(
        &self,
        feature_request: &str,
        changes: &str,
        test_results: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("summary")?.render(context! {
            feature_request => feature_request.trim(),
            changes => changes,
            test_results => test_results,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ActionKind;

    #[test]
    fn execute_template_includes_item_fields() {
        let engine = PromptEngine::new();
        let item = ChecklistItem {
            id: "step-1".to_string(),
            description: "add a retry limit".to_string(),
            file_path: Some("src/webhook.rs".to_string()),
            action: ActionKind::Modify,
            dependencies: Vec::new(),
            completed: false,
        };
        let rendered = engine
            .render_execute(&item, "fn main() {}", "## Key Files")
            .expect("render");
        assert!(rendered.contains("step-1"));
        assert!(rendered.contains("src/webhook.rs"));
        assert!(rendered.contains("fn main() {}"));
    }

    #[test]
    fn repair_template_includes_failures() {
        let engine = PromptEngine::new();
        let item = ChecklistItem {
            id: "step-1".to_string(),
            description: "fix lint".to_string(),
            file_path: None,
            action: ActionKind::Modify,
            dependencies: Vec::new(),
            completed: false,
        };
        let rendered = engine
            .render_repair(&item, "", "tests failed: assertion")
            .expect("render");
        assert!(rendered.contains("tests failed: assertion"));
    }
}
