//! Model-driven feature implementation engine.
//!
//! Thin CLI trigger around the [`forge::workflow::Workflow`] engine: create a
//! run from a feature request, drive it to a terminal status, and print the
//! resulting artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use forge::config::{ProviderKind, Settings, load_settings};
use forge::core::state::FeatureRequest;
use forge::llm::deepseek::DeepseekProvider;
use forge::llm::moonshot::MoonshotProvider;
use forge::llm::provider::ModelProvider;
use forge::llm::{ModelRouter, TierModels};
use forge::workflow::{CancelFlag, Workflow};

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Model-driven feature implementation engine"
)]
struct Cli {
    /// Path to the settings file (missing file uses defaults).
    #[arg(long, default_value = "forge.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full workflow for one feature request.
    Run {
        /// Path to the target repository.
        #[arg(long)]
        repo: PathBuf,
        /// Natural-language feature request.
        #[arg(long)]
        request: String,
        /// Branch the changes are based on.
        #[arg(long, default_value = "main")]
        base_branch: String,
    },
    /// Probe each configured provider.
    Health,
    /// List the model identifiers of each configured provider.
    Models,
}

#[tokio::main]
async fn main() {
    forge::logging::init();
    if let Err(err) = run().await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config)
        .with_context(|| format!("load settings {}", cli.config.display()))?;
    match cli.command {
        Command::Run {
            repo,
            request,
            base_branch,
        } => cmd_run(&settings, repo, request, base_branch).await,
        Command::Health => cmd_health(&settings).await,
        Command::Models => cmd_models(&settings),
    }
}

async fn cmd_run(
    settings: &Settings,
    repo: PathBuf,
    request: String,
    base_branch: String,
) -> Result<()> {
    let router = build_router(settings)?;
    let workflow = Workflow::new(router, settings, &repo);

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let state = workflow
        .run(
            FeatureRequest {
                description: request,
                repo_path: repo,
                base_branch,
                model_profile: "default".to_string(),
            },
            &cancel,
        )
        .await;

    match state.summary_markdown() {
        Some(summary) => println!("{summary}"),
        None => println!("run {} finished with status {:?}", state.run_id, state.status),
    }
    if !state.errors.is_empty() {
        eprintln!("\nrecorded errors:");
        for error in &state.errors {
            eprintln!("- [{:?}] {}", error.kind, error.message);
        }
    }
    Ok(())
}

async fn cmd_health(settings: &Settings) -> Result<()> {
    let router = build_router(settings)?;
    for provider in router.providers() {
        let healthy = provider.health_check().await;
        println!("{}: {}", provider.name(), if healthy { "ok" } else { "unreachable" });
    }
    Ok(())
}

fn cmd_models(settings: &Settings) -> Result<()> {
    let router = build_router(settings)?;
    for provider in router.providers() {
        println!("{}: {}", provider.name(), provider.available_models().join(", "));
    }
    Ok(())
}

fn build_provider(settings: &Settings, kind: ProviderKind) -> Result<Arc<dyn ModelProvider>> {
    let timeout = Duration::from_secs(settings.llm.request_timeout_secs);
    let provider: Arc<dyn ModelProvider> = match kind {
        ProviderKind::Deepseek => {
            Arc::new(DeepseekProvider::from_env(&settings.providers.deepseek, timeout)?)
        }
        ProviderKind::Moonshot => {
            Arc::new(MoonshotProvider::from_env(&settings.providers.moonshot, timeout)?)
        }
    };
    Ok(provider)
}

fn build_router(settings: &Settings) -> Result<Arc<ModelRouter>> {
    let primary = build_provider(settings, settings.providers.primary)?;
    let fallback = build_provider(settings, settings.providers.fallback)?;

    let routes = [
        (
            "deepseek".to_string(),
            TierModels {
                fast: settings.providers.deepseek.chat_model.clone(),
                reasoning: settings.providers.deepseek.reasoner_model.clone(),
            },
        ),
        (
            "moonshot".to_string(),
            TierModels {
                fast: settings.providers.moonshot.model.clone(),
                reasoning: settings.providers.moonshot.model.clone(),
            },
        ),
    ]
    .into_iter()
    .collect();

    Ok(Arc::new(ModelRouter::new(primary, Some(fallback), routes)))
}
