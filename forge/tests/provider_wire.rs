//! Provider adapter wire tests against a mock OpenAI-compatible endpoint.
//!
//! Exercises the non-throwing completion contract: HTTP and transport
//! failures come back as the `error` finish-reason sentinel, never as an Err.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forge::config::DeepseekConfig;
use forge::llm::deepseek::DeepseekProvider;
use forge::llm::provider::ModelProvider;
use forge::llm::types::{
    ChatMessage, CompletionRequest, FinishReason, ResponseFormat,
};

fn config_for(server: &MockServer) -> DeepseekConfig {
    DeepseekConfig {
        base_url: server.uri(),
        ..DeepseekConfig::default()
    }
}

fn request() -> CompletionRequest {
    CompletionRequest {
        model: "deepseek-chat".to_string(),
        messages: vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("say hi"),
        ],
        temperature: 0.7,
        max_tokens: 64,
        tools: None,
        response_format: Some(ResponseFormat::json_object()),
    }
}

#[tokio::test]
async fn completion_parses_openai_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "response_format": {"type": "json_object"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"greeting\":\"hi\"}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        DeepseekProvider::new("test-key", &config_for(&server), Duration::from_secs(5))
            .expect("provider");
    let response = provider.complete(&request()).await;

    assert!(!response.is_error());
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.content.as_deref(), Some("{\"greeting\":\"hi\"}"));
    assert_eq!(response.usage.total_tokens, 17);
    assert_eq!(response.model, "deepseek-chat");
}

#[tokio::test]
async fn http_error_becomes_error_sentinel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let provider =
        DeepseekProvider::new("test-key", &config_for(&server), Duration::from_secs(5))
            .expect("provider");
    let response = provider.complete(&request()).await;

    assert!(response.is_error());
    assert!(response.content.is_none());
    let detail = response.error.expect("error detail");
    assert!(detail.contains("500"), "detail: {detail}");
}

#[tokio::test]
async fn unreachable_endpoint_becomes_error_sentinel() {
    // Nothing listens on this port.
    let config = DeepseekConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        ..DeepseekConfig::default()
    };
    let provider =
        DeepseekProvider::new("test-key", &config, Duration::from_secs(1)).expect("provider");
    let response = provider.complete(&request()).await;

    assert!(response.is_error());
    assert!(response.error.is_some());
}

#[tokio::test]
async fn malformed_body_becomes_error_sentinel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider =
        DeepseekProvider::new("test-key", &config_for(&server), Duration::from_secs(5))
            .expect("provider");
    let response = provider.complete(&request()).await;

    assert!(response.is_error());
}

#[tokio::test]
async fn health_check_reflects_endpoint_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let provider =
        DeepseekProvider::new("test-key", &config_for(&server), Duration::from_secs(5))
            .expect("provider");
    assert!(provider.health_check().await);

    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&failing)
        .await;
    let provider =
        DeepseekProvider::new("bad-key", &config_for(&failing), Duration::from_secs(5))
            .expect("provider");
    assert!(!provider.health_check().await);
}
