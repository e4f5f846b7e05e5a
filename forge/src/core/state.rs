//! Run state and artifact types.
//!
//! These types define stable contracts between the workflow steps. They hold
//! no I/O handles; steps mutate one [`RunState`] under single-writer
//! discipline and every artifact list is append-only.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named stage of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Plan,
    Checklist,
    Execute,
    Validate,
    Summarize,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Plan => "plan",
            Step::Checklist => "checklist",
            Step::Execute => "execute",
            Step::Validate => "validate",
            Step::Summarize => "summarize",
        }
    }
}

/// Status of a run. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Planning,
    Checklist,
    Executing,
    Validating,
    Summarizing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Input that triggers a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRequest {
    /// Natural-language description of the feature to implement.
    pub description: String,
    /// Local path to the target repository.
    pub repo_path: PathBuf,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_model_profile")]
    pub model_profile: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_model_profile() -> String {
    "default".to_string()
}

/// Estimated complexity of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

/// High-level implementation proposal produced by the plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub problem_statement: String,
    pub proposed_approach: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub risks: Vec<String>,
}

impl Plan {
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n", self.title);
        md.push_str(&format!("## Problem Statement\n{}\n\n", self.problem_statement));
        md.push_str(&format!("## Proposed Approach\n{}\n\n", self.proposed_approach));
        md.push_str("## Affected Files\n");
        for file in &self.affected_files {
            md.push_str(&format!("- `{file}`\n"));
        }
        md.push_str(&format!(
            "\n## Estimated Complexity\n{}\n",
            self.estimated_complexity.as_str()
        ));
        if !self.risks.is_empty() {
            md.push_str("\n## Risks\n");
            for risk in &self.risks {
                md.push_str(&format!("- {risk}\n"));
            }
        }
        md
    }
}

/// Kind of change a checklist item calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Modify,
    Delete,
    Test,
    Refactor,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Modify => "modify",
            ActionKind::Delete => "delete",
            ActionKind::Test => "test",
            ActionKind::Refactor => "refactor",
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn default_test_strategy() -> String {
    "Run tests".to_string()
}

/// One atomic, file-scoped unit of work derived from a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    #[serde(default = "short_id")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub action: ActionKind,
    /// Declared prerequisite item ids. Carried but not enforced; execution is
    /// strict list order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub completed: bool,
}

/// Ordered task list produced by the checklist step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checklist {
    pub items: Vec<ChecklistItem>,
    #[serde(default = "default_test_strategy")]
    pub test_strategy: String,
}

impl Checklist {
    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# Implementation Checklist\n\n");
        for (idx, item) in self.items.iter().enumerate() {
            let checkbox = if item.completed { "[x]" } else { "[ ]" };
            let file = item
                .file_path
                .as_deref()
                .map(|f| format!(" (`{f}`)"))
                .unwrap_or_default();
            md.push_str(&format!(
                "{}. {checkbox} **{}**{file}: {}\n",
                idx + 1,
                item.action.as_str().to_uppercase(),
                item.description
            ));
        }
        md.push_str(&format!("\n## Test Strategy\n{}\n", self.test_strategy));
        md
    }
}

/// One materialized file change. Appended per successful write, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPatch {
    pub file_path: String,
    /// Content before the write; `None` for a new file.
    pub original_content: Option<String>,
    pub new_content: String,
    pub checklist_item_id: Option<String>,
}

/// Outcome of one validation pass. Appended per pass, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub checks: BTreeMap<String, bool>,
    pub errors: Vec<String>,
    pub test_output: Option<String>,
}

/// Final human-readable report produced by the summarize step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub changes_made: Vec<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub tests_passed: bool,
    #[serde(default)]
    pub verification_steps: Vec<String>,
    #[serde(default)]
    pub risk_notes: Vec<String>,
}

impl RunSummary {
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n{}\n\n", self.title, self.description);
        md.push_str("## Changes Made\n");
        for change in &self.changes_made {
            md.push_str(&format!("- {change}\n"));
        }
        md.push_str("\n## Files Changed\n");
        for file in &self.files_changed {
            md.push_str(&format!("- `{file}`\n"));
        }
        md.push_str(&format!(
            "\n## Tests\n{}\n",
            if self.tests_passed {
                "All tests passed"
            } else {
                "Tests failed"
            }
        ));
        md.push_str("\n## Verification Steps\n");
        for (idx, step) in self.verification_steps.iter().enumerate() {
            md.push_str(&format!("{}. {step}\n", idx + 1));
        }
        if !self.risk_notes.is_empty() {
            md.push_str("\n## Risk Notes\n");
            for note in &self.risk_notes {
                md.push_str(&format!("- {note}\n"));
            }
        }
        md
    }
}

/// Taxonomy of recorded run errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A tool gateway operation failed.
    Tool,
    /// A model call failed or produced unusable output.
    Model,
    /// A step was invoked without its declared prerequisite state.
    Workflow,
}

/// One entry in the run's error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn tool(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Tool,
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Model,
            message: message.into(),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Workflow,
            message: message.into(),
        }
    }
}

/// The single mutable record threading through one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub request: FeatureRequest,
    /// Summarized repository context assembled by the plan step.
    pub repo_context: String,
    pub current_step: Step,
    pub status: RunStatus,
    /// Bounded retry counter; reset to zero exactly when an execute attempt
    /// succeeds.
    pub retry_count: u32,
    pub errors: Vec<RunError>,
    pub plan: Option<Plan>,
    pub checklist: Option<Checklist>,
    /// Index of the next checklist item to execute. Monotonically
    /// non-decreasing, never past the checklist length.
    pub current_item_index: usize,
    pub patches: Vec<ExecutionPatch>,
    pub validations: Vec<ValidationResult>,
    pub summary: Option<RunSummary>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(request: FeatureRequest) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            request,
            repo_context: String::new(),
            current_step: Step::Plan,
            status: RunStatus::Queued,
            retry_count: 0,
            errors: Vec::new(),
            plan: None,
            checklist: None,
            current_item_index: 0,
            patches: Vec::new(),
            validations: Vec::new(),
            summary: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Enter a step: sets the current step and the matching in-flight status.
    pub fn begin_step(&mut self, step: Step) {
        self.current_step = step;
        self.status = match step {
            Step::Plan => RunStatus::Planning,
            Step::Checklist => RunStatus::Checklist,
            Step::Execute => RunStatus::Executing,
            Step::Validate => RunStatus::Validating,
            Step::Summarize => RunStatus::Summarizing,
        };
    }

    pub fn record_error(&mut self, error: RunError) {
        self.errors.push(error);
    }

    /// Guarded terminal transition: a run reaches a terminal status at most
    /// once; later attempts are ignored.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Conjunction over the validation history (vacuously true when no
    /// validation ran).
    pub fn validations_passed(&self) -> bool {
        self.validations.iter().all(|v| v.passed)
    }

    pub fn checklist_len(&self) -> usize {
        self.checklist.as_ref().map_or(0, |c| c.items.len())
    }

    /// Coarse progress estimate for pollers, 0.0 to 1.0.
    pub fn progress(&self) -> f32 {
        if self.status.is_terminal() {
            return 1.0;
        }
        match self.current_step {
            Step::Plan => 0.1,
            Step::Checklist => 0.25,
            Step::Execute => {
                let total = self.checklist_len();
                if total == 0 {
                    0.3
                } else {
                    0.3 + 0.4 * (self.current_item_index as f32 / total as f32)
                }
            }
            Step::Validate => 0.75,
            Step::Summarize => 0.9,
        }
    }

    pub fn plan_markdown(&self) -> Option<String> {
        self.plan.as_ref().map(Plan::to_markdown)
    }

    pub fn checklist_markdown(&self) -> Option<String> {
        self.checklist.as_ref().map(Checklist::to_markdown)
    }

    pub fn summary_markdown(&self) -> Option<String> {
        self.summary.as_ref().map(RunSummary::to_markdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::feature_request;

    #[test]
    fn finish_is_applied_at_most_once() {
        let mut state = RunState::new(feature_request("/tmp/repo"));
        state.finish(RunStatus::Cancelled);
        assert_eq!(state.status, RunStatus::Cancelled);
        let ended = state.ended_at;

        state.finish(RunStatus::Completed);
        assert_eq!(state.status, RunStatus::Cancelled);
        assert_eq!(state.ended_at, ended);
    }

    #[test]
    fn checklist_items_parse_with_defaults() {
        let checklist: Checklist = serde_json::from_value(serde_json::json!({
            "items": [
                {"description": "add helper", "file_path": "src/util.rs", "action": "create"}
            ]
        }))
        .expect("parse");
        assert_eq!(checklist.items.len(), 1);
        assert_eq!(checklist.items[0].id.len(), 8);
        assert!(!checklist.items[0].completed);
        assert!(checklist.items[0].dependencies.is_empty());
        assert_eq!(checklist.test_strategy, "Run tests");
    }

    #[test]
    fn validations_passed_is_vacuously_true() {
        let state = RunState::new(feature_request("/tmp/repo"));
        assert!(state.validations_passed());
    }

    #[test]
    fn plan_markdown_renders_sections() {
        let plan = Plan {
            title: "Add retries".to_string(),
            problem_statement: "Webhooks give up".to_string(),
            proposed_approach: "Bounded backoff".to_string(),
            affected_files: vec!["src/webhook.rs".to_string()],
            estimated_complexity: Complexity::Low,
            risks: vec!["thundering herd".to_string()],
        };
        let md = plan.to_markdown();
        assert!(md.starts_with("# Add retries"));
        assert!(md.contains("- `src/webhook.rs`"));
        assert!(md.contains("## Estimated Complexity\nlow"));
        assert!(md.contains("- thundering herd"));
    }

    #[test]
    fn checklist_markdown_marks_completed_items() {
        let checklist = Checklist {
            items: vec![
                ChecklistItem {
                    id: "a".to_string(),
                    description: "first".to_string(),
                    file_path: Some("a.rs".to_string()),
                    action: ActionKind::Create,
                    dependencies: Vec::new(),
                    completed: true,
                },
                ChecklistItem {
                    id: "b".to_string(),
                    description: "second".to_string(),
                    file_path: None,
                    action: ActionKind::Test,
                    dependencies: vec!["a".to_string()],
                    completed: false,
                },
            ],
            test_strategy: "cargo test".to_string(),
        };
        let md = checklist.to_markdown();
        assert!(md.contains("1. [x] **CREATE** (`a.rs`): first"));
        assert!(md.contains("2. [ ] **TEST**: second"));
        assert!(md.contains("## Test Strategy\ncargo test"));
    }

    #[test]
    fn progress_is_monotone_through_steps() {
        let mut state = RunState::new(feature_request("/tmp/repo"));
        let mut last = 0.0;
        for step in [
            Step::Plan,
            Step::Checklist,
            Step::Execute,
            Step::Validate,
            Step::Summarize,
        ] {
            state.begin_step(step);
            let progress = state.progress();
            assert!(progress >= last, "{step:?} regressed");
            last = progress;
        }
        state.finish(RunStatus::Completed);
        assert_eq!(state.progress(), 1.0);
    }
}
