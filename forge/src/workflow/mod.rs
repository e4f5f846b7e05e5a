//! Workflow engine: drives one run through the plan → checklist → execute →
//! validate → summarize state machine.
//!
//! The engine executes exactly one step at a time per run, consults the pure
//! transition table between steps, and checks the cancellation flag at every
//! transition. Independent runs get independent [`Workflow`] instances and may
//! proceed concurrently; they share only the router's provider adapters.

pub mod prompts;
pub mod steps;
pub mod structured;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use crate::config::Settings;
use crate::core::state::{FeatureRequest, RunError, RunState, RunStatus, Step};
use crate::core::transition::next_step;
use crate::io::git::Git;
use crate::io::repo::Repo;
use crate::io::sandbox::Sandbox;
use crate::llm::ModelRouter;
use crate::workflow::prompts::PromptEngine;
use crate::workflow::steps::StepContext;

/// Shared cancellation signal, checked between step transitions.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One-run workflow engine over a target repository.
pub struct Workflow {
    ctx: StepContext,
    max_retries: u32,
}

impl Workflow {
    pub fn new(router: Arc<ModelRouter>, settings: &Settings, repo_root: &Path) -> Self {
        let ctx = StepContext {
            router,
            repo: Repo::new(repo_root),
            git: Git::new(repo_root),
            sandbox: Sandbox::new(&settings.sandbox, &settings.validation),
            prompts: PromptEngine::new(),
            max_tokens: settings.llm.max_tokens,
            repo_map_depth: settings.workflow.repo_map_depth,
        };
        Self {
            ctx,
            max_retries: settings.workflow.max_retries,
        }
    }

    /// Drive one run to a terminal status and return the final state.
    ///
    /// The run always terminates: failures degrade steps and are recorded in
    /// the error log, cancellation stops advancement while preserving
    /// accumulated artifacts, and summarize is the only normal exit.
    #[instrument(skip_all)]
    pub async fn run(&self, request: FeatureRequest, cancel: &CancelFlag) -> RunState {
        let mut state = RunState::new(request);
        info!(run_id = %state.run_id, "starting run");

        let branch = format!("forge/{}", &state.run_id[..8]);
        let created = self.ctx.git.create_branch(&branch, true).await;
        if !created.ok {
            state.record_error(RunError::tool(format!(
                "failed to create branch: {}",
                created.error_message().unwrap_or("unknown error")
            )));
        }

        let mut current = Some(Step::Plan);
        while let Some(step) = current {
            if cancel.is_cancelled() {
                warn!(run_id = %state.run_id, step = step.as_str(), "run cancelled");
                state.finish(RunStatus::Cancelled);
                break;
            }
            match step {
                Step::Plan => steps::plan(&mut state, &self.ctx).await,
                Step::Checklist => steps::checklist(&mut state, &self.ctx).await,
                Step::Execute => steps::execute(&mut state, &self.ctx).await,
                Step::Validate => steps::validate(&mut state, &self.ctx).await,
                Step::Summarize => steps::summarize(&mut state, &self.ctx).await,
            }
            let transition = next_step(step, &state, self.max_retries);
            if transition.counts_as_retry {
                state.retry_count += 1;
            }
            current = transition.next;
        }

        if !state.patches.is_empty() && state.status != RunStatus::Cancelled {
            let title = state
                .plan
                .as_ref()
                .map(|plan| plan.title.clone())
                .unwrap_or_else(|| "automated changes".to_string());
            let committed = self.ctx.git.commit(&format!("feat: {title}"), true).await;
            if !committed.ok {
                state.record_error(RunError::tool(format!(
                    "failed to commit changes: {}",
                    committed.error_message().unwrap_or("unknown error")
                )));
            }
        }

        info!(run_id = %state.run_id, status = ?state.status, errors = state.errors.len(), "run finished");
        state
    }
}
