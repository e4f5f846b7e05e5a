//! Workflow step functions.
//!
//! Each step is a transformation of [`RunState`] that may call the model
//! router and the tool gateway. Steps absorb failures into the run's error
//! log and bookkeeping; they never unwind the run. Routing to the next step
//! is the transition table's job, not theirs.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::core::state::{
    ActionKind, Checklist, ExecutionPatch, Plan, RunError, RunState, RunStatus, RunSummary, Step,
    ValidationResult,
};
use crate::io::git::Git;
use crate::io::repo::Repo;
use crate::io::sandbox::Sandbox;
use crate::llm::types::{ChatMessage, ResponseFormat};
use crate::llm::{CompleteOptions, ModelRouter};
use crate::workflow::prompts::{PromptEngine, SYSTEM_PROMPT};
use crate::workflow::structured::parse_structured;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const CHECKLIST_SCHEMA: &str = include_str!("../../schemas/checklist.schema.json");
const EXECUTION_SCHEMA: &str = include_str!("../../schemas/execution.schema.json");
const SUMMARY_SCHEMA: &str = include_str!("../../schemas/summary.schema.json");

/// Cap on key files listed in the planning context.
const CONTEXT_KEY_FILES: usize = 20;

/// Cap on signatures listed per key file.
const CONTEXT_SIGNATURES: usize = 5;

/// Cap on diff characters fed to the summary prompt.
const SUMMARY_DIFF_CHARS: usize = 5000;

/// Shared collaborators injected into every step.
pub struct StepContext {
    pub router: Arc<ModelRouter>,
    pub repo: Repo,
    pub git: Git,
    pub sandbox: Sandbox,
    pub prompts: PromptEngine,
    pub max_tokens: u32,
    pub repo_map_depth: usize,
}

fn messages_for(prompt: String) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}

/// Generate the implementation plan from the feature request.
#[instrument(skip_all, fields(run_id = %state.run_id))]
pub async fn plan(state: &mut RunState, ctx: &StepContext) {
    state.begin_step(Step::Plan);

    let repo_map = match ctx.repo.map(ctx.repo_map_depth).await.into_outcome() {
        Ok(repo_map) => repo_map,
        Err(err) => {
            state.record_error(RunError::tool(format!(
                "failed to map repository: {}",
                err.message
            )));
            return;
        }
    };

    let mut context_lines = vec!["## Key Files".to_string()];
    for key_file in repo_map.key_files.iter().take(CONTEXT_KEY_FILES) {
        match repo_map.signatures.get(&key_file.path) {
            Some(signatures) if !signatures.is_empty() => {
                let listed: Vec<&str> = signatures
                    .iter()
                    .take(CONTEXT_SIGNATURES)
                    .map(String::as_str)
                    .collect();
                context_lines.push(format!("- `{}`: {}", key_file.path, listed.join(", ")));
            }
            _ => context_lines.push(format!("- `{}`", key_file.path)),
        }
    }
    state.repo_context = context_lines.join("\n");

    let prompt = match ctx
        .prompts
        .render_plan(&state.request.description, &state.repo_context)
    {
        Ok(prompt) => prompt,
        Err(err) => {
            state.record_error(RunError::workflow(format!("render plan prompt: {err}")));
            return;
        }
    };

    let outcome = ctx
        .router
        .complete(
            messages_for(prompt),
            Step::Plan,
            CompleteOptions {
                temperature: 0.7,
                max_tokens: ctx.max_tokens,
                response_format: Some(ResponseFormat::json_object()),
                ..CompleteOptions::default()
            },
        )
        .await;

    let Some(content) = outcome.response.content.as_deref() else {
        state.record_error(RunError::model(format!(
            "failed to generate plan: {}",
            outcome.response.error.as_deref().unwrap_or("empty response")
        )));
        return;
    };

    match parse_structured::<Plan>(content, PLAN_SCHEMA) {
        Ok(plan) => {
            info!(provider = %outcome.provider, title = %plan.title, "generated plan");
            state.plan = Some(plan);
        }
        Err(err) => {
            state.record_error(RunError::model(format!("failed to parse plan: {err:#}")));
        }
    }
}

/// Derive the ordered checklist from the plan.
#[instrument(skip_all, fields(run_id = %state.run_id))]
pub async fn checklist(state: &mut RunState, ctx: &StepContext) {
    state.begin_step(Step::Checklist);

    let Some(plan) = &state.plan else {
        state.record_error(RunError::workflow(
            "no plan available for checklist generation",
        ));
        return;
    };

    let prompt = match ctx.prompts.render_checklist(&plan.to_markdown()) {
        Ok(prompt) => prompt,
        Err(err) => {
            state.record_error(RunError::workflow(format!("render checklist prompt: {err}")));
            return;
        }
    };

    let outcome = ctx
        .router
        .complete(
            messages_for(prompt),
            Step::Checklist,
            CompleteOptions {
                temperature: 0.5,
                max_tokens: ctx.max_tokens,
                response_format: Some(ResponseFormat::json_object()),
                ..CompleteOptions::default()
            },
        )
        .await;

    let Some(content) = outcome.response.content.as_deref() else {
        state.record_error(RunError::model(format!(
            "failed to generate checklist: {}",
            outcome.response.error.as_deref().unwrap_or("empty response")
        )));
        return;
    };

    match parse_structured::<Checklist>(content, CHECKLIST_SCHEMA) {
        Ok(checklist) => {
            info!(items = checklist.items.len(), "generated checklist");
            state.checklist = Some(checklist);
        }
        Err(err) => {
            state.record_error(RunError::model(format!("failed to parse checklist: {err:#}")));
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecutionOutput {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    new_content: String,
}

/// Execute the checklist item at `current_item_index`.
///
/// On success: append a patch, mark the item completed, advance the index,
/// reset `retry_count`. On failure: record the error and increment
/// `retry_count` without advancing, so a retried step reprocesses the same
/// item.
#[instrument(skip_all, fields(run_id = %state.run_id, item_index = state.current_item_index))]
pub async fn execute(state: &mut RunState, ctx: &StepContext) {
    state.begin_step(Step::Execute);

    let Some(checklist) = &state.checklist else {
        state.record_error(RunError::workflow("no checklist available for execution"));
        return;
    };
    let index = state.current_item_index;
    let Some(item) = checklist.items.get(index).cloned() else {
        info!("all checklist items executed");
        return;
    };
    info!(
        item = index + 1,
        total = checklist.items.len(),
        description = %item.description,
        "executing checklist item"
    );

    let mut file_content = String::new();
    if let (Some(file_path), ActionKind::Modify) = (&item.file_path, item.action) {
        let read = ctx.repo.read_file(file_path, None, None).await;
        if let Some(existing) = read.data {
            file_content = existing.content;
        }
    }

    let last_failed_validation = state
        .validations
        .last()
        .filter(|v| !v.passed && state.retry_count > 0);
    let display_content = if file_content.is_empty() {
        "(new file)"
    } else {
        file_content.as_str()
    };
    let prompt = match last_failed_validation {
        Some(validation) => {
            ctx.prompts
                .render_repair(&item, display_content, &validation.errors.join("\n"))
        }
        None => ctx
            .prompts
            .render_execute(&item, display_content, &state.repo_context),
    };
    let prompt = match prompt {
        Ok(prompt) => prompt,
        Err(err) => {
            state.record_error(RunError::workflow(format!("render execute prompt: {err}")));
            state.retry_count += 1;
            return;
        }
    };

    let outcome = ctx
        .router
        .complete(
            messages_for(prompt),
            Step::Execute,
            CompleteOptions {
                temperature: 0.3,
                max_tokens: ctx.max_tokens,
                response_format: Some(ResponseFormat::json_object()),
                ..CompleteOptions::default()
            },
        )
        .await;

    let Some(content) = outcome.response.content.as_deref() else {
        state.record_error(RunError::model(format!(
            "failed to execute item {}: {}",
            item.id,
            outcome.response.error.as_deref().unwrap_or("empty response")
        )));
        state.retry_count += 1;
        return;
    };

    let output = match parse_structured::<ExecutionOutput>(content, EXECUTION_SCHEMA) {
        Ok(output) => output,
        Err(err) => {
            state.record_error(RunError::model(format!(
                "failed to parse execution result: {err:#}"
            )));
            state.retry_count += 1;
            return;
        }
    };

    let target = output.file_path.or_else(|| item.file_path.clone());
    let (Some(file_path), false) = (target, output.new_content.is_empty()) else {
        // Nothing to write for this item; move on without charging a retry.
        warn!(item = %item.id, "execution output had no file change, skipping item");
        state.current_item_index = index + 1;
        return;
    };

    let written = ctx.repo.write_file(&file_path, &output.new_content).await;
    if written.ok {
        state.patches.push(ExecutionPatch {
            file_path: file_path.clone(),
            original_content: (!file_content.is_empty()).then_some(file_content),
            new_content: output.new_content,
            checklist_item_id: Some(item.id.clone()),
        });
        if let Some(checklist) = &mut state.checklist
            && let Some(item) = checklist.items.get_mut(index)
        {
            item.completed = true;
        }
        state.current_item_index = index + 1;
        state.retry_count = 0;
        info!(file = %file_path, "wrote file");
    } else {
        state.record_error(RunError::tool(format!(
            "failed to write file: {}",
            written.error_message().unwrap_or("unknown error")
        )));
        state.retry_count += 1;
    }
}

/// Run the lint and test checks and append a validation result.
#[instrument(skip_all, fields(run_id = %state.run_id))]
pub async fn validate(state: &mut RunState, ctx: &StepContext) {
    state.begin_step(Step::Validate);

    let mut checks = std::collections::BTreeMap::new();
    let mut errors = Vec::new();

    let lint = ctx.sandbox.run_lint(ctx.repo.root()).await;
    checks.insert("lint".to_string(), lint.ok);
    if !lint.ok {
        errors.push(format!(
            "lint failed: {}",
            lint.error_message().unwrap_or("unknown error")
        ));
    }

    let tests = ctx.sandbox.run_tests(ctx.repo.root()).await;
    checks.insert("tests".to_string(), tests.ok);
    if !tests.ok {
        errors.push(format!(
            "tests failed: {}",
            tests.error_message().unwrap_or("unknown error")
        ));
    }
    let test_output = tests.data.map(|result| result.stdout);

    let passed = checks.values().all(|&ok| ok);
    info!(passed, "validation finished");
    state.validations.push(ValidationResult {
        passed,
        checks,
        errors,
        test_output,
    });
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    title: String,
    description: String,
    #[serde(default)]
    changes_made: Vec<String>,
    #[serde(default)]
    verification_steps: Vec<String>,
    #[serde(default)]
    risk_notes: Vec<String>,
}

/// Produce the final report and mark the run completed.
///
/// Completion is unconditional; the summary states the true pass/fail outcome
/// rather than the run aborting on failure.
#[instrument(skip_all, fields(run_id = %state.run_id))]
pub async fn summarize(state: &mut RunState, ctx: &StepContext) {
    state.begin_step(Step::Summarize);

    let diff = ctx
        .git
        .diff(false, None)
        .await
        .into_data()
        .map(|d| d.diff)
        .unwrap_or_default();

    let mut changes: Vec<String> = state
        .patches
        .iter()
        .map(|patch| format!("- Modified `{}`", patch.file_path))
        .collect();
    let truncated: String = diff.chars().take(SUMMARY_DIFF_CHARS).collect();
    changes.push(format!("\n### Diff\n```diff\n{truncated}\n```"));

    let tests_passed = state.validations_passed();
    let test_results = if tests_passed {
        "All tests passed"
    } else {
        "Some tests failed"
    };

    let prompt = ctx.prompts.render_summary(
        &state.request.description,
        &changes.join("\n"),
        test_results,
    );
    match prompt {
        Ok(prompt) => {
            let outcome = ctx
                .router
                .complete(
                    messages_for(prompt),
                    Step::Summarize,
                    CompleteOptions {
                        temperature: 0.5,
                        max_tokens: ctx.max_tokens,
                        response_format: Some(ResponseFormat::json_object()),
                        ..CompleteOptions::default()
                    },
                )
                .await;
            if let Some(content) = outcome.response.content.as_deref() {
                match parse_structured::<SummaryOutput>(content, SUMMARY_SCHEMA) {
                    Ok(output) => {
                        state.summary = Some(RunSummary {
                            title: output.title,
                            description: output.description,
                            changes_made: output.changes_made,
                            files_changed: state
                                .patches
                                .iter()
                                .map(|patch| patch.file_path.clone())
                                .collect(),
                            tests_passed,
                            verification_steps: output.verification_steps,
                            risk_notes: output.risk_notes,
                        });
                    }
                    Err(err) => {
                        state.record_error(RunError::model(format!(
                            "failed to parse summary: {err:#}"
                        )));
                    }
                }
            } else {
                state.record_error(RunError::model(format!(
                    "failed to generate summary: {}",
                    outcome.response.error.as_deref().unwrap_or("empty response")
                )));
            }
        }
        Err(err) => {
            state.record_error(RunError::workflow(format!("render summary prompt: {err}")));
        }
    }

    state.finish(RunStatus::Completed);
}
