//! Subcommand implementations. Each function constructs the matching
//! phase executor plus an artifact store rooted at the resolved workspace,
//! calls `execute`, and hands back the exit code — no rendering logic
//! beyond pretty-printing `PhaseResult` as JSON; the CLI surface stays
//! deliberately thin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;

use wayforge_agent::{
    CompletePhase, ExecutionMode, IteratorConfig, IteratorTaskRunner, OrchestratePhase, Phase, SchedulerConfig, TaskIterator, TaskScheduler,
};
use wayforge_artifact::ArtifactStore;
use wayforge_core::config::schema::{ConfirmConfig, ObservabilityConfig, OracleProviderConfig, PathsConfig};
use wayforge_core::paths::{project_data_root, user_data_root};
use wayforge_tools::confirm::ConfirmationGate;
use wayforge_tools::{ToolContext, ToolRegistry, TrustStore};

use crate::interaction::TerminalSink;
use crate::tools::WriteFileHandler;

fn workspace_dir(workspace: Option<String>) -> PathBuf {
    match workspace {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_phase_result(result: &wayforge_agent::PhaseResult) -> Result<i32> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(if result.success { 0 } else { 1 })
}

fn require_oracle() -> Result<wayforge_oracle::OracleFallback> {
    wayforge_oracle::fallback_from_env()
        .context("no oracle provider configured: set ANTHROPIC_API_KEY and/or OPENAI_API_KEY")
}

fn task_iterator(oracle: Arc<wayforge_oracle::OracleFallback>, workspace: &std::path::Path, skip_confirmation: bool) -> TaskIterator {
    let mut registry = ToolRegistry::new();
    registry.register("write_file", Arc::new(WriteFileHandler));
    let registry = Arc::new(registry);
    let tool_ctx = Arc::new(ToolContext { workspace: workspace.to_path_buf() });

    let iterator = TaskIterator::new(oracle, registry, tool_ctx, IteratorConfig::default());
    if skip_confirmation {
        return iterator;
    }

    let gate = ConfirmationGate::new(
        ConfirmConfig::from_env(),
        TrustStore::project(workspace),
        TrustStore::global(),
        Box::new(TerminalSink),
    );
    iterator.with_confirmation_gate(Arc::new(Mutex::new(gate)))
}

fn sprint_goal(store: &ArtifactStore, sprint_id: &str) -> Result<String> {
    let raw = store.read_text(&store.sprint_path(sprint_id))?;
    match raw {
        Some(text) => {
            let sprint: wayforge_agent::model::Sprint = serde_json::from_str(&text).context("stored sprint file is not valid JSON")?;
            Ok(sprint.goal)
        }
        None => Ok(String::new()),
    }
}

pub async fn init(workspace: Option<String>) -> Result<i32> {
    let workspace = workspace_dir(workspace);
    let store = ArtifactStore::new(project_data_root(&workspace));

    for dir in [
        store.backlog_path().parent().map(PathBuf::from),
        store.sprint_path("_").parent().map(PathBuf::from),
        Some(store.root().join("results")),
        Some(store.root().join("checkpoints")),
        Some(store.architecture_dir()),
        Some(store.spec_dir()),
    ]
    .into_iter()
    .flatten()
    {
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    println!("initialized wayforge artifact store at {}", store.root().display());
    Ok(0)
}

pub async fn plan(description: String, sprint: String, workspace: Option<String>) -> Result<i32> {
    let workspace = workspace_dir(workspace);
    let oracle = Arc::new(require_oracle()?);
    let store = Arc::new(ArtifactStore::new(project_data_root(&workspace)));

    let phase = OrchestratePhase::new(oracle, store, description, sprint);
    if !phase.can_start().await {
        bail!("project description must not be empty");
    }
    print_phase_result(&phase.execute().await)
}

pub async fn build(sprint: String, parallel: bool, max_parallel_tasks: usize, yes: bool, workspace: Option<String>) -> Result<i32> {
    let workspace = workspace_dir(workspace);
    let oracle = Arc::new(require_oracle()?);
    let store = Arc::new(ArtifactStore::new(project_data_root(&workspace)));

    let context_prompt = sprint_goal(&store, &sprint)?;
    let iterator = Arc::new(task_iterator(oracle, &workspace, yes));
    let runner = Arc::new(IteratorTaskRunner::new(iterator, context_prompt));

    let mode = if parallel { ExecutionMode::ParallelBatched } else { ExecutionMode::Sequential };
    let scheduler = Arc::new(TaskScheduler::new(store.clone(), runner, SchedulerConfig { mode, max_parallel_tasks }));

    let phase = CompletePhase::new(scheduler, store, sprint);
    if !phase.can_start().await {
        bail!("no backlog found for this sprint; run `wayforge plan` first");
    }
    print_phase_result(&phase.execute().await)
}

pub async fn resume(sprint: String, parallel: bool, yes: bool, workspace: Option<String>) -> Result<i32> {
    let workspace_path = workspace_dir(workspace.clone());
    let store = ArtifactStore::new(project_data_root(&workspace_path));
    if !store.checkpoint_path(&sprint).exists() {
        bail!("no checkpoint found for sprint {sprint}; use `wayforge build` to start a new run");
    }
    build(sprint, parallel, 3, yes, workspace).await
}

pub async fn status(sprint: String, workspace: Option<String>) -> Result<i32> {
    let workspace = workspace_dir(workspace);
    let store = ArtifactStore::new(project_data_root(&workspace));
    let checkpoint: wayforge_agent::model::CheckpointState = store.read_json(&store.checkpoint_path(&sprint))?;

    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    Ok(0)
}

pub fn config(workspace: Option<String>) -> Result<i32> {
    let workspace = workspace_dir(workspace);
    let providers = OracleProviderConfig::from_env();
    let paths = PathsConfig::from_env();
    let confirm = ConfirmConfig::from_env();
    let observability = ObservabilityConfig::from_env();

    let snapshot = serde_json::json!({
        "oracle_providers": providers.iter().map(|p| serde_json::json!({
            "backend": format!("{:?}", p.backend),
            "api_base": p.api_base,
            "model": p.model,
            "api_key_configured": !p.api_key.is_empty(),
        })).collect::<Vec<_>>(),
        "paths": {
            "workspace": paths.workspace,
            "output_dir": paths.output_dir,
            "project_data_root": project_data_root(&workspace),
            "user_data_root": user_data_root(),
        },
        "confirm": {
            "extra_confirm": confirm.extra_confirm,
        },
        "observability": {
            "log_level": observability.log_level,
            "json": observability.json,
            "quiet": observability.quiet,
        },
    });

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(0)
}

pub async fn chat(message: String) -> Result<i32> {
    let oracle = require_oracle()?;
    let response = oracle
        .chat(wayforge_oracle::OracleRequest::new(vec![wayforge_oracle::ChatMessage::user(message)]))
        .await
        .context("oracle request failed")?;

    println!("{}", response.content);
    tracing::info!(input_tokens = response.input_tokens, output_tokens = response.output_tokens, "chat turn complete");
    Ok(0)
}
