//! Provider capability trait and the shared OpenAI-compatible HTTP client.
//!
//! A completion request must not fail for ordinary request problems (HTTP
//! error, network error, timeout): those are captured into a response whose
//! finish reason is the `error` sentinel, keeping the router's control flow
//! uniform across provider transports.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::llm::types::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, Role, Usage,
};

/// Capability set every model backend implements.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider identifier (e.g. "deepseek").
    fn name(&self) -> &'static str;

    /// Model identifiers this provider can serve.
    fn available_models(&self) -> Vec<String>;

    /// Issue one completion. Never fails for request-level problems; transport
    /// and HTTP errors come back as the `error` finish-reason sentinel.
    async fn complete(&self, request: &CompletionRequest) -> CompletionResponse;

    /// Cheap reachability probe.
    async fn health_check(&self) -> bool;
}

/// Shared HTTP client for OpenAI-compatible chat-completions endpoints.
///
/// Holds only a connection pool; concurrent use across runs is safe.
#[derive(Debug, Clone)]
pub struct ChatHttpClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<serde_json::Value>>,
}

impl ChatHttpClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("invalid API key format")?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("build HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// POST a completion request and parse the wire response.
    #[instrument(skip_all, fields(provider, model = %request.model))]
    pub async fn complete(
        &self,
        provider: &'static str,
        request: &CompletionRequest,
    ) -> CompletionResponse {
        let response = match self
            .client
            .post(self.completions_url())
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(provider, err = %err, "completion request failed");
                return CompletionResponse::error(&request.model, err.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider, status = status.as_u16(), "completion returned HTTP error");
            return CompletionResponse::error(
                &request.model,
                format!("HTTP {status}: {}", truncate(&body, 500)),
            );
        }

        let data: ApiResponse = match response.json().await {
            Ok(data) => data,
            Err(err) => {
                warn!(provider, err = %err, "completion response was not valid JSON");
                return CompletionResponse::error(&request.model, err.to_string());
            }
        };

        let (message, finish_reason) = match data.choices.into_iter().next() {
            Some(choice) => (choice.message, choice.finish_reason),
            None => (ApiMessage::default(), None),
        };
        debug!(provider, finish_reason = ?finish_reason, "completion succeeded");
        CompletionResponse {
            content: message.content,
            tool_calls: message.tool_calls,
            model: data.model.unwrap_or_else(|| request.model.clone()),
            usage: data.usage,
            finish_reason: FinishReason::from_wire(finish_reason.as_deref()),
            error: None,
        }
    }

    /// 1-token probe against the completions endpoint.
    pub async fn health_check(&self, model: &str) -> bool {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "ping".to_string(),
            }],
            temperature: 0.0,
            max_tokens: 1,
            tools: None,
            response_format: None,
        };
        match self
            .client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
