//! Engine configuration loaded from a TOML file.
//!
//! The file is intended to be edited by humans and must remain stable and
//! automatable. Missing fields default to sensible values; a missing file is
//! the full default. Provider API keys are read from the environment, never
//! from this file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Which model backend a role is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Deepseek,
    Moonshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub providers: ProvidersConfig,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub validation: ValidationConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider tried first for every completion.
    pub primary: ProviderKind,
    /// Provider used for the one-shot failover.
    pub fallback: ProviderKind,
    pub deepseek: DeepseekConfig,
    pub moonshot: MoonshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeepseekConfig {
    pub base_url: String,
    pub chat_model: String,
    pub reasoner_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MoonshotConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Maximum tokens requested per completion.
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Base command names permitted to run.
    pub allowed_commands: Vec<String>,
    /// Default per-command wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Command executed as the lint check (e.g. `["ruff","check","."]`).
    pub lint_command: Vec<String>,
    /// Command executed as the test check.
    pub test_command: Vec<String>,
    /// Wall-clock budget for the test check in seconds.
    pub test_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Bounded validate-retry loop-backs before escalating to summarize.
    pub max_retries: u32,
    /// Directory depth for the planning-stage repository map.
    pub repo_map_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            validation: ValidationConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderKind::Deepseek,
            fallback: ProviderKind::Moonshot,
            deepseek: DeepseekConfig::default(),
            moonshot: MoonshotConfig::default(),
        }
    }
}

impl Default for DeepseekConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            chat_model: "deepseek-chat".to_string(),
            reasoner_model: "deepseek-reasoner".to_string(),
        }
    }
}

impl Default for MoonshotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.moonshot.cn/v1".to_string(),
            model: "moonshot-v1-32k".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_commands: ["pytest", "ruff", "mypy", "uv", "pip", "python", "cargo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            lint_command: vec!["ruff".to_string(), "check".to_string(), ".".to_string()],
            test_command: vec!["pytest".to_string(), "-v".to_string()],
            test_timeout_secs: 120,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            repo_map_depth: 3,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.llm.max_tokens == 0 {
            return Err(anyhow!("llm.max_tokens must be > 0"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        for (name, command) in [
            ("validation.lint_command", &self.validation.lint_command),
            ("validation.test_command", &self.validation.test_command),
        ] {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("{name} must be a non-empty array"));
            }
            if !self.sandbox.allowed_commands.contains(&command[0]) {
                return Err(anyhow!(
                    "{name} base command '{}' is not in sandbox.allowed_commands",
                    command[0]
                ));
            }
        }
        Ok(())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("forge.toml");
        fs::write(&path, "[workflow]\nmax_retries = 5\n").expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.workflow.max_retries, 5);
        assert_eq!(settings.llm.max_tokens, 4096);
    }

    #[test]
    fn validation_command_must_be_allow_listed() {
        let mut settings = Settings::default();
        settings.validation.lint_command = vec!["shellcheck".to_string()];
        let err = settings.validate().expect_err("should fail");
        assert!(err.to_string().contains("allowed_commands"));
    }
}
