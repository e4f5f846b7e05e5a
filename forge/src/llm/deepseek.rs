//! DeepSeek provider adapter.
//!
//! OpenAI-compatible API at `https://api.deepseek.com`:
//! - `deepseek-chat`: fast general-purpose model
//! - `deepseek-reasoner`: reasoning model for complex tasks

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::DeepseekConfig;
use crate::llm::provider::{ChatHttpClient, ModelProvider};
use crate::llm::types::{CompletionRequest, CompletionResponse};

pub struct DeepseekProvider {
    http: ChatHttpClient,
    chat_model: String,
}

impl DeepseekProvider {
    pub fn new(api_key: impl Into<String>, config: &DeepseekConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: ChatHttpClient::new(api_key, &config.base_url, timeout)?,
            chat_model: config.chat_model.clone(),
        })
    }

    /// Create from the `DEEPSEEK_API_KEY` environment variable.
    pub fn from_env(config: &DeepseekConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("DEEPSEEK_API_KEY").context("DEEPSEEK_API_KEY not set")?;
        Self::new(api_key, config, timeout)
    }
}

#[async_trait]
impl ModelProvider for DeepseekProvider {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["deepseek-chat".to_string(), "deepseek-reasoner".to_string()]
    }

    async fn complete(&self, request: &CompletionRequest) -> CompletionResponse {
        self.http.complete(self.name(), request).await
    }

    async fn health_check(&self) -> bool {
        self.http.health_check(&self.chat_model).await
    }
}
