//! Moonshot (Kimi) provider adapter.
//!
//! OpenAI-compatible API at `https://api.moonshot.cn/v1`; models trade context
//! window for cost (`moonshot-v1-8k` / `-32k` / `-128k`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::MoonshotConfig;
use crate::llm::provider::{ChatHttpClient, ModelProvider};
use crate::llm::types::{CompletionRequest, CompletionResponse};

pub struct MoonshotProvider {
    http: ChatHttpClient,
    default_model: String,
}

impl MoonshotProvider {
    pub fn new(api_key: impl Into<String>, config: &MoonshotConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: ChatHttpClient::new(api_key, &config.base_url, timeout)?,
            default_model: config.model.clone(),
        })
    }

    /// Create from the `MOONSHOT_API_KEY` environment variable.
    pub fn from_env(config: &MoonshotConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("MOONSHOT_API_KEY").context("MOONSHOT_API_KEY not set")?;
        Self::new(api_key, config, timeout)
    }
}

#[async_trait]
impl ModelProvider for MoonshotProvider {
    fn name(&self) -> &'static str {
        "moonshot"
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "moonshot-v1-8k".to_string(),
            "moonshot-v1-32k".to_string(),
            "moonshot-v1-128k".to_string(),
        ]
    }

    async fn complete(&self, request: &CompletionRequest) -> CompletionResponse {
        self.http.complete(self.name(), request).await
    }

    async fn health_check(&self) -> bool {
        self.http.health_check(&self.default_model).await
    }
}
