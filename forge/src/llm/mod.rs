//! Model routing: tier selection per workflow step and one-shot provider
//! failover.
//!
//! The router never retries a provider on its own; repeated failure is
//! surfaced to the workflow step, which applies the engine's bounded retry
//! policy. At most one fallback attempt is made per call.

pub mod deepseek;
pub mod moonshot;
pub mod provider;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::core::state::Step;
use provider::ModelProvider;
use types::{ChatMessage, CompletionRequest, CompletionResponse, ResponseFormat};

/// Model capability tier used to pick a model for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Reasoning,
}

/// Static step-to-tier mapping: code generation gets the reasoning tier,
/// everything else the fast tier.
pub fn tier_for_step(step: Step) -> ModelTier {
    match step {
        Step::Execute => ModelTier::Reasoning,
        Step::Plan | Step::Checklist | Step::Validate | Step::Summarize => ModelTier::Fast,
    }
}

/// Model identifiers a provider serves per tier.
#[derive(Debug, Clone)]
pub struct TierModels {
    pub fast: String,
    pub reasoning: String,
}

/// Per-call options for [`ModelRouter::complete`].
#[derive(Debug, Clone)]
pub struct CompleteOptions {
    /// Override the step-derived tier.
    pub tier: Option<ModelTier>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Option<Vec<serde_json::Value>>,
    pub response_format: Option<ResponseFormat>,
    pub allow_fallback: bool,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self {
            tier: None,
            temperature: 0.7,
            max_tokens: 4096,
            tools: None,
            response_format: None,
            allow_fallback: true,
        }
    }
}

/// A completion plus the provider/model that actually produced it, for
/// observability and cost tracking.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub response: CompletionResponse,
    pub provider: String,
    pub model: String,
}

/// Routes completion requests to a primary provider with one-shot failover to
/// a configured fallback.
pub struct ModelRouter {
    primary: Arc<dyn ModelProvider>,
    fallback: Option<Arc<dyn ModelProvider>>,
    routes: BTreeMap<String, TierModels>,
}

impl ModelRouter {
    pub fn new(
        primary: Arc<dyn ModelProvider>,
        fallback: Option<Arc<dyn ModelProvider>>,
        routes: BTreeMap<String, TierModels>,
    ) -> Self {
        Self {
            primary,
            fallback,
            routes,
        }
    }

    pub fn providers(&self) -> Vec<&Arc<dyn ModelProvider>> {
        let mut providers = vec![&self.primary];
        if let Some(fallback) = &self.fallback {
            providers.push(fallback);
        }
        providers
    }

    fn model_for(&self, provider: &Arc<dyn ModelProvider>, tier: ModelTier) -> String {
        if let Some(models) = self.routes.get(provider.name()) {
            return match tier {
                ModelTier::Fast => models.fast.clone(),
                ModelTier::Reasoning => models.reasoning.clone(),
            };
        }
        provider
            .available_models()
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// Route one completion request.
    ///
    /// Resolves the tier from the override or the step mapping, invokes the
    /// primary provider, and on an error-sentinel response invokes the
    /// fallback exactly once. Returns whichever response resulted along with
    /// the provider/model actually used.
    #[instrument(skip_all, fields(step = step.as_str()))]
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        step: Step,
        opts: CompleteOptions,
    ) -> CompletionOutcome {
        let tier = opts.tier.unwrap_or_else(|| tier_for_step(step));
        let model = self.model_for(&self.primary, tier);
        info!(provider = self.primary.name(), model = %model, "routing completion");

        let request = CompletionRequest {
            model: model.clone(),
            messages,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            tools: opts.tools,
            response_format: opts.response_format,
        };
        let response = self.primary.complete(&request).await;

        if response.is_error()
            && opts.allow_fallback
            && let Some(fallback) = &self.fallback
        {
            warn!(
                primary = self.primary.name(),
                fallback = fallback.name(),
                "primary provider failed, trying fallback"
            );
            let fallback_model = self.model_for(fallback, tier);
            let fallback_request = CompletionRequest {
                model: fallback_model.clone(),
                ..request
            };
            let fallback_response = fallback.complete(&fallback_request).await;
            return CompletionOutcome {
                response: fallback_response,
                provider: fallback.name().to_string(),
                model: fallback_model,
            };
        }

        CompletionOutcome {
            response,
            provider: self.primary.name().to_string(),
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, json_content, routes_for};

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hi")]
    }

    #[test]
    fn execute_routes_to_reasoning_tier() {
        assert_eq!(tier_for_step(Step::Execute), ModelTier::Reasoning);
        for step in [Step::Plan, Step::Checklist, Step::Validate, Step::Summarize] {
            assert_eq!(tier_for_step(step), ModelTier::Fast);
        }
    }

    #[tokio::test]
    async fn primary_success_uses_primary_identifiers() {
        let primary = Arc::new(ScriptedProvider::new(
            "alpha",
            vec![json_content(&serde_json::json!({"ok": true}))],
        ));
        let router = ModelRouter::new(
            primary,
            None,
            routes_for(&[("alpha", "alpha-fast", "alpha-deep")]),
        );

        let outcome = router
            .complete(messages(), Step::Plan, CompleteOptions::default())
            .await;
        assert!(!outcome.response.is_error());
        assert_eq!(outcome.provider, "alpha");
        assert_eq!(outcome.model, "alpha-fast");
    }

    /// Primary transport failure with fallback enabled: the fallback's
    /// response and identifiers come back, not the primary's.
    #[tokio::test]
    async fn failover_reports_fallback_identifiers() {
        let primary = Arc::new(ScriptedProvider::failing("alpha"));
        let fallback = Arc::new(ScriptedProvider::new(
            "beta",
            vec![json_content(&serde_json::json!({"ok": true}))],
        ));
        let router = ModelRouter::new(
            primary,
            Some(fallback),
            routes_for(&[
                ("alpha", "alpha-fast", "alpha-deep"),
                ("beta", "beta-fast", "beta-deep"),
            ]),
        );

        let outcome = router
            .complete(messages(), Step::Execute, CompleteOptions::default())
            .await;
        assert!(!outcome.response.is_error());
        assert_eq!(outcome.provider, "beta");
        assert_eq!(outcome.model, "beta-deep");
    }

    /// No more than one fallback attempt: when both providers fail the failed
    /// response is returned, attributed to the fallback.
    #[tokio::test]
    async fn both_failing_returns_failed_response() {
        let primary = Arc::new(ScriptedProvider::failing("alpha"));
        let fallback = Arc::new(ScriptedProvider::failing("beta"));
        let router = ModelRouter::new(
            primary.clone(),
            Some(fallback.clone()),
            routes_for(&[
                ("alpha", "alpha-fast", "alpha-deep"),
                ("beta", "beta-fast", "beta-deep"),
            ]),
        );

        let outcome = router
            .complete(messages(), Step::Plan, CompleteOptions::default())
            .await;
        assert!(outcome.response.is_error());
        assert_eq!(outcome.provider, "beta");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_disabled_returns_primary_failure() {
        let primary = Arc::new(ScriptedProvider::failing("alpha"));
        let fallback = Arc::new(ScriptedProvider::new(
            "beta",
            vec![json_content(&serde_json::json!({"ok": true}))],
        ));
        let router = ModelRouter::new(
            primary,
            Some(fallback.clone()),
            routes_for(&[
                ("alpha", "alpha-fast", "alpha-deep"),
                ("beta", "beta-fast", "beta-deep"),
            ]),
        );

        let outcome = router
            .complete(
                messages(),
                Step::Plan,
                CompleteOptions {
                    allow_fallback: false,
                    ..CompleteOptions::default()
                },
            )
            .await;
        assert!(outcome.response.is_error());
        assert_eq!(outcome.provider, "alpha");
        assert_eq!(fallback.calls(), 0);
    }
}
