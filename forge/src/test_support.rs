//! Test-only helpers: scripted providers, temp git repositories, and
//! deterministic state builders.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::core::state::{ActionKind, Checklist, ChecklistItem, FeatureRequest};
use crate::llm::TierModels;
use crate::llm::provider::ModelProvider;
use crate::llm::types::{CompletionRequest, CompletionResponse, FinishReason, Usage};

/// Provider returning a scripted sequence of responses without any network.
///
/// Once the script is exhausted, further calls return the error sentinel.
pub struct ScriptedProvider {
    name: &'static str,
    responses: Mutex<Vec<CompletionResponse>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, responses: Vec<CompletionResponse>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            name,
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    /// Provider whose every call fails at the transport level.
    pub fn failing(name: &'static str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn available_models(&self) -> Vec<String> {
        vec![format!("{}-default", self.name)]
    }

    async fn complete(&self, request: &CompletionRequest) -> CompletionResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("scripted responses lock");
        match responses.pop() {
            Some(mut response) => {
                if response.model.is_empty() {
                    response.model = request.model.clone();
                }
                response
            }
            None => CompletionResponse::error(&request.model, "scripted transport failure"),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// A successful completion whose content is the serialized JSON value.
pub fn json_content(value: &serde_json::Value) -> CompletionResponse {
    CompletionResponse {
        content: Some(value.to_string()),
        tool_calls: None,
        model: String::new(),
        usage: Usage::default(),
        finish_reason: FinishReason::Stop,
        error: None,
    }
}

/// A successful completion carrying non-JSON prose.
pub fn text_content(text: &str) -> CompletionResponse {
    CompletionResponse {
        content: Some(text.to_string()),
        tool_calls: None,
        model: String::new(),
        usage: Usage::default(),
        finish_reason: FinishReason::Stop,
        error: None,
    }
}

/// The error-sentinel response a provider returns on transport failure.
pub fn transport_error(detail: &str) -> CompletionResponse {
    CompletionResponse::error(String::new(), detail)
}

/// Route table mapping `(provider, fast, reasoning)` triples.
pub fn routes_for(entries: &[(&str, &str, &str)]) -> BTreeMap<String, TierModels> {
    entries
        .iter()
        .map(|(name, fast, reasoning)| {
            (
                name.to_string(),
                TierModels {
                    fast: fast.to_string(),
                    reasoning: reasoning.to_string(),
                },
            )
        })
        .collect()
}

/// Deterministic feature request pointing at `repo_path`.
pub fn feature_request(repo_path: impl Into<std::path::PathBuf>) -> FeatureRequest {
    FeatureRequest {
        description: "add a retry limit to the webhook processor".to_string(),
        repo_path: repo_path.into(),
        base_branch: "main".to_string(),
        model_profile: "default".to_string(),
    }
}

/// Checklist with `count` trivial create items.
pub fn checklist_with_items(count: usize) -> Checklist {
    Checklist {
        items: (0..count)
            .map(|idx| ChecklistItem {
                id: format!("item-{idx}"),
                description: format!("step {idx}"),
                file_path: Some(format!("file_{idx}.txt")),
                action: ActionKind::Create,
                dependencies: Vec::new(),
                completed: false,
            })
            .collect(),
        test_strategy: "Run tests".to_string(),
    }
}

/// Temp directory initialized as a git repository with one commit.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        git(root, &["init"]);
        git(root, &["config", "user.email", "test@example.com"]);
        git(root, &["config", "user.name", "test"]);
        std::fs::write(root.join("README.md"), "hi\n").expect("write README");
        git(root, &["add", "README.md"]);
        git(root, &["commit", "-m", "chore: init"]);
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .unwrap_or_else(|err| panic!("spawn git {args:?}: {err}"));
    assert!(status.success(), "git {args:?} failed");
}
