//! Transition table for the workflow state machine.
//!
//! Pure functions over [`RunState`]: the engine consults them between steps
//! and applies the returned transition. Testable with synthetic states, no
//! network or process involved.

use crate::core::state::{RunState, Step};

/// Decision after an execute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteDecision {
    /// More checklist items remain; run execute again.
    NextItem,
    /// Checklist exhausted; validate the accumulated changes.
    Validate,
    /// No checklist exists; nothing to validate.
    Summarize,
}

/// Decision after a validate step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateDecision {
    /// Validation passed, or the retry budget is exhausted (best-effort
    /// escalation, not a hard abort).
    Summarize,
    /// Loop back to execute for another attempt.
    Retry,
}

/// A resolved transition. `counts_as_retry` tells the engine to charge the
/// retry budget before entering the next step; keeping the increment out of
/// this module keeps the table pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<Step>,
    pub counts_as_retry: bool,
}

impl Transition {
    fn to(step: Step) -> Self {
        Self {
            next: Some(step),
            counts_as_retry: false,
        }
    }

    fn retry() -> Self {
        Self {
            next: Some(Step::Execute),
            counts_as_retry: true,
        }
    }

    fn terminal() -> Self {
        Self {
            next: None,
            counts_as_retry: false,
        }
    }
}

pub fn after_execute(state: &RunState, max_retries: u32) -> ExecuteDecision {
    let Some(checklist) = &state.checklist else {
        return ExecuteDecision::Summarize;
    };
    // Exhausted retry budget stops reprocessing the failing item; whatever
    // was written still gets validated.
    if state.retry_count >= max_retries {
        return ExecuteDecision::Validate;
    }
    if state.current_item_index < checklist.items.len() {
        ExecuteDecision::NextItem
    } else {
        ExecuteDecision::Validate
    }
}

pub fn after_validate(state: &RunState, max_retries: u32) -> ValidateDecision {
    if state.validations.last().is_some_and(|v| v.passed) {
        return ValidateDecision::Summarize;
    }
    if state.retry_count >= max_retries {
        return ValidateDecision::Summarize;
    }
    ValidateDecision::Retry
}

/// Resolve the transition out of `current`.
///
/// Plan and checklist advance unconditionally (their failures are recorded in
/// the error log, not routed on); summarize is the only exit to terminal.
pub fn next_step(current: Step, state: &RunState, max_retries: u32) -> Transition {
    match current {
        Step::Plan => Transition::to(Step::Checklist),
        Step::Checklist => Transition::to(Step::Execute),
        Step::Execute => match after_execute(state, max_retries) {
            ExecuteDecision::NextItem => Transition::to(Step::Execute),
            ExecuteDecision::Validate => Transition::to(Step::Validate),
            ExecuteDecision::Summarize => Transition::to(Step::Summarize),
        },
        Step::Validate => match after_validate(state, max_retries) {
            ValidateDecision::Summarize => Transition::to(Step::Summarize),
            ValidateDecision::Retry => Transition::retry(),
        },
        Step::Summarize => Transition::terminal(),
    }
}
