//! Phase executor framework (C9): the uniform `canStart -> execute ->
//! checkpoint/restore -> canComplete` lifecycle shared by the three
//! top-level phases (ORCHESTRATE, CONVERGE, COMPLETE), realising
//! phase polymorphism as a closed trait-object dispatch rather than
//! inheritance.
//!
//! Only `CompletePhase` carries substantive scheduling logic (it drives a
//! `TaskScheduler`); `OrchestratePhase` and `ConvergePhase` are thin glue
//! over the oracle client and the artifact store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use wayforge_artifact::ArtifactStore;
use wayforge_oracle::{ChatMessage, OracleFallback, OracleRequest};

use crate::iterator::TaskIterator;
use crate::json_extract::extract_json_block;
use crate::model::{CheckpointState, Sprint, SprintStatus, Task, TaskExecutionResult, TaskStatus};
use crate::scheduler::{TaskRunner, TaskScheduler};

/// A phase's timing and LLM-usage metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: u64,
    pub llm_calls: u32,
    pub tokens_used: u64,
}

/// What every phase returns, regardless of which one ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub success: bool,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
    pub metrics: PhaseMetrics,
}

/// Opaque checkpoint payload a phase can persist and later validate on
/// restore. Durable state for all three phases actually lives in the
/// artifact store (backlog/sprint/results/checkpoint files); this is a
/// thin wrapper so the uniform lifecycle has something concrete to pass
/// around.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    pub phase_name: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &str;
    async fn can_start(&self) -> bool;
    async fn execute(&self) -> PhaseResult;
    async fn can_complete(&self) -> bool;
    fn checkpoint(&self) -> PhaseCheckpoint;
    fn restore(&self, checkpoint: PhaseCheckpoint);
}

fn phase_failure(name: &str, start_time: String, t0: Instant, llm_calls: u32, tokens_used: u64, error: String) -> PhaseResult {
    PhaseResult {
        phase_name: name.to_string(),
        success: false,
        artifacts: Vec::new(),
        error: Some(error),
        metrics: PhaseMetrics { start_time, end_time: chrono::Utc::now().to_rfc3339(), duration_ms: t0.elapsed().as_millis() as u64, llm_calls, tokens_used },
    }
}

/// ORCHESTRATE: asks the oracle to break a project description into a
/// task backlog and a single initial sprint, then persists both through
/// the artifact store. No scheduling happens here — that's COMPLETE's job.
pub struct OrchestratePhase {
    oracle: Arc<OracleFallback>,
    store: Arc<ArtifactStore>,
    project_description: String,
    sprint_id: String,
}

impl OrchestratePhase {
    pub fn new(oracle: Arc<OracleFallback>, store: Arc<ArtifactStore>, project_description: impl Into<String>, sprint_id: impl Into<String>) -> Self {
        Self { oracle, store, project_description: project_description.into(), sprint_id: sprint_id.into() }
    }
}

#[derive(Debug, Deserialize, Default)]
struct BacklogWire {
    #[serde(default)]
    tasks: Vec<TaskWire>,
}

#[derive(Debug, Deserialize)]
struct TaskWire {
    id: String,
    story_id: String,
    title: String,
    description: String,
    #[serde(rename = "type")]
    task_type: crate::model::TaskType,
    #[serde(default)]
    dependencies: std::collections::BTreeSet<String>,
    estimated_complexity: crate::model::EstimatedComplexity,
}

const BACKLOG_PROMPT_SCHEMA: &str = r#"{"tasks": [{"id": string, "story_id": string, "title": string, "description": string, "type": "feature"|"test"|"refactor"|"docs"|"infra"|"config", "dependencies": [string], "estimated_complexity": "trivial"|"simple"|"moderate"|"complex"}]}"#;

#[async_trait]
impl Phase for OrchestratePhase {
    fn name(&self) -> &str {
        "ORCHESTRATE"
    }

    async fn can_start(&self) -> bool {
        !self.project_description.trim().is_empty()
    }

    async fn execute(&self) -> PhaseResult {
        let start = chrono::Utc::now().to_rfc3339();
        let t0 = Instant::now();

        let prompt = format!(
            "Break the following project description into a DAG-ordered backlog of implementation tasks. \
             Respond with a single JSON object shaped like:\n{BACKLOG_PROMPT_SCHEMA}\n\nProject description:\n{}",
            self.project_description
        );
        let response = match self.oracle.chat(OracleRequest::new(vec![ChatMessage::user(prompt)])).await {
            Ok(r) => r,
            Err(err) => return phase_failure(self.name(), start, t0, 1, 0, err.to_string()),
        };
        let tokens_used = (response.input_tokens + response.output_tokens) as u64;

        let json_str = extract_json_block(&response.content);
        let wire: BacklogWire = match serde_json::from_str(&json_str) {
            Ok(w) => w,
            Err(err) => return phase_failure(self.name(), start, t0, 1, tokens_used, format!("malformed backlog JSON: {err}")),
        };

        if wire.tasks.is_empty() {
            return phase_failure(self.name(), start, t0, 1, tokens_used, "oracle produced an empty backlog".to_string());
        }

        let tasks: Vec<Task> = wire
            .tasks
            .into_iter()
            .map(|t| Task {
                id: t.id,
                story_id: t.story_id,
                title: t.title,
                description: t.description,
                task_type: t.task_type,
                dependencies: t.dependencies,
                estimated_complexity: t.estimated_complexity,
                status: TaskStatus::Pending,
            })
            .collect();

        let backlog_path = self.store.backlog_path();
        if let Err(err) = self.store.write_json(&backlog_path, &tasks) {
            return phase_failure(self.name(), start, t0, 1, tokens_used, err.to_string());
        }

        let stories: std::collections::BTreeSet<String> = tasks.iter().map(|t| t.story_id.clone()).collect();
        let sprint = Sprint {
            id: self.sprint_id.clone(),
            name: format!("Sprint {}", self.sprint_id),
            goal: self.project_description.clone(),
            stories: stories.into_iter().collect(),
            start_date: chrono::Utc::now().to_rfc3339(),
            status: SprintStatus::Planning,
        };
        let sprint_path = self.store.sprint_path(&self.sprint_id);
        if let Err(err) = self.store.write_json(&sprint_path, &sprint) {
            return phase_failure(self.name(), start, t0, 1, tokens_used, err.to_string());
        }

        PhaseResult {
            phase_name: self.name().to_string(),
            success: true,
            artifacts: vec![backlog_path.display().to_string(), sprint_path.display().to_string()],
            error: None,
            metrics: PhaseMetrics { start_time: start, end_time: chrono::Utc::now().to_rfc3339(), duration_ms: t0.elapsed().as_millis() as u64, llm_calls: 1, tokens_used },
        }
    }

    async fn can_complete(&self) -> bool {
        let backlog: Vec<Task> = self.store.read_json(&self.store.backlog_path()).unwrap_or_default();
        !backlog.is_empty()
    }

    fn checkpoint(&self) -> PhaseCheckpoint {
        PhaseCheckpoint { phase_name: self.name().to_string(), data: serde_json::json!({"sprint_id": self.sprint_id}) }
    }

    fn restore(&self, _checkpoint: PhaseCheckpoint) {
        // Durable state is the backlog/sprint files already on disk; there
        // is nothing else in-memory to rehydrate.
    }
}

/// CONVERGE: runs a single task through the full generate/test/review/
/// improve cycle via `TaskIterator`, persisting the resulting version
/// history. Used for ad hoc single-task runs outside of a full sprint.
pub struct ConvergePhase {
    iterator: Arc<TaskIterator>,
    store: Arc<ArtifactStore>,
    task: Task,
    context_prompt: String,
}

impl ConvergePhase {
    pub fn new(iterator: Arc<TaskIterator>, store: Arc<ArtifactStore>, task: Task, context_prompt: impl Into<String>) -> Self {
        Self { iterator, store, task, context_prompt: context_prompt.into() }
    }

    fn versions_path(&self) -> PathBuf {
        self.store.root().join("results").join(format!("{}-versions.json", self.task.id))
    }
}

#[async_trait]
impl Phase for ConvergePhase {
    fn name(&self) -> &str {
        "CONVERGE"
    }

    async fn can_start(&self) -> bool {
        matches!(self.task.status, TaskStatus::Pending | TaskStatus::InProgress)
    }

    async fn execute(&self) -> PhaseResult {
        let start = chrono::Utc::now().to_rfc3339();
        let t0 = Instant::now();

        let outcome = self.iterator.run(&self.task, &self.context_prompt).await;

        let path = self.versions_path();
        if let Err(err) = self.store.write_json(&path, &outcome.versions) {
            tracing::warn!(task_id = %self.task.id, error = %err, "failed to persist task version history");
        }

        // One generate call plus a review+improve pair per completed
        // iteration (the final iteration has no trailing improve call).
        let llm_calls = 1 + outcome.iterations.saturating_sub(if outcome.converged { 1 } else { 0 }) * 2 + if outcome.converged { 1 } else { 0 };

        PhaseResult {
            phase_name: self.name().to_string(),
            success: outcome.success,
            artifacts: vec![path.display().to_string()],
            error: outcome.error,
            metrics: PhaseMetrics { start_time: start, end_time: chrono::Utc::now().to_rfc3339(), duration_ms: t0.elapsed().as_millis() as u64, llm_calls, tokens_used: 0 },
        }
    }

    async fn can_complete(&self) -> bool {
        self.store.read_text(&self.versions_path()).ok().flatten().is_some()
    }

    fn checkpoint(&self) -> PhaseCheckpoint {
        PhaseCheckpoint { phase_name: self.name().to_string(), data: serde_json::json!({"task_id": self.task.id}) }
    }

    fn restore(&self, _checkpoint: PhaseCheckpoint) {
        // Task versions are append-only and already durable; a rerun
        // simply starts the convergence loop again from iteration 1.
    }
}

/// Bridges the scheduler's `TaskRunner` seam to a single shared
/// `TaskIterator`, so `CompletePhase` can hand every ready task to the
/// same convergence loop under one prompt context.
pub struct IteratorTaskRunner {
    iterator: Arc<TaskIterator>,
    context_prompt: String,
}

impl IteratorTaskRunner {
    pub fn new(iterator: Arc<TaskIterator>, context_prompt: impl Into<String>) -> Self {
        Self { iterator, context_prompt: context_prompt.into() }
    }
}

#[async_trait]
impl TaskRunner for IteratorTaskRunner {
    async fn run_task(&self, task: &Task) -> TaskExecutionResult {
        let outcome = self.iterator.run(task, &self.context_prompt).await;
        TaskExecutionResult {
            task_id: task.id.clone(),
            success: outcome.success,
            converged: outcome.converged,
            final_score: outcome.final_score,
            iterations: outcome.iterations,
            error: outcome.error,
        }
    }
}

/// COMPLETE: the only phase with substantive scheduling logic. Loads a
/// sprint's backlog, drives it through the `TaskScheduler`, and persists
/// the results as both JSON and a Markdown summary.
pub struct CompletePhase {
    scheduler: Arc<TaskScheduler>,
    store: Arc<ArtifactStore>,
    sprint_id: String,
}

impl CompletePhase {
    pub fn new(scheduler: Arc<TaskScheduler>, store: Arc<ArtifactStore>, sprint_id: impl Into<String>) -> Self {
        Self { scheduler, store, sprint_id: sprint_id.into() }
    }
}

#[async_trait]
impl Phase for CompletePhase {
    fn name(&self) -> &str {
        "COMPLETE"
    }

    async fn can_start(&self) -> bool {
        let backlog: Vec<Task> = self.store.read_json(&self.store.backlog_path()).unwrap_or_default();
        !backlog.is_empty()
    }

    async fn execute(&self) -> PhaseResult {
        let start = chrono::Utc::now().to_rfc3339();
        let t0 = Instant::now();

        let tasks: Vec<Task> = self.store.read_json(&self.store.backlog_path()).unwrap_or_default();
        let checkpoint = match self.scheduler.run(&self.sprint_id, tasks).await {
            Ok(c) => c,
            Err(err) => return phase_failure(self.name(), start, t0, 0, 0, err.to_string()),
        };

        let results_path = self.store.results_json_path(&self.sprint_id);
        if let Err(err) = self.store.write_json(&results_path, &checkpoint.task_results) {
            tracing::warn!(sprint_id = %self.sprint_id, error = %err, "failed to persist sprint results JSON");
        }

        let md_path = self.store.results_md_path(&self.sprint_id);
        if let Err(err) = self.store.write_text(&md_path, &render_results_markdown(&checkpoint)) {
            tracing::warn!(sprint_id = %self.sprint_id, error = %err, "failed to persist sprint results markdown");
        }

        let all_succeeded = !checkpoint.task_results.is_empty() && checkpoint.task_results.iter().all(|r| r.success);

        PhaseResult {
            phase_name: self.name().to_string(),
            success: all_succeeded,
            artifacts: vec![results_path.display().to_string(), md_path.display().to_string()],
            error: if all_succeeded { None } else { Some("one or more tasks did not complete successfully".to_string()) },
            metrics: PhaseMetrics { start_time: start, end_time: chrono::Utc::now().to_rfc3339(), duration_ms: t0.elapsed().as_millis() as u64, llm_calls: 0, tokens_used: 0 },
        }
    }

    async fn can_complete(&self) -> bool {
        let checkpoint: CheckpointState = self.store.read_json(&self.store.checkpoint_path(&self.sprint_id)).unwrap_or_default();
        !checkpoint.task_results.is_empty() && checkpoint.invariant_holds()
    }

    fn checkpoint(&self) -> PhaseCheckpoint {
        let checkpoint: CheckpointState = self.store.read_json(&self.store.checkpoint_path(&self.sprint_id)).unwrap_or_default();
        PhaseCheckpoint { phase_name: self.name().to_string(), data: serde_json::to_value(checkpoint).unwrap_or_default() }
    }

    fn restore(&self, checkpoint: PhaseCheckpoint) {
        // A corrupted checkpoint silently starts from scratch, with an
        // info-level event emitted. The scheduler itself re-reads its
        // checkpoint from disk on `run()`; this just surfaces a
        // malformed on-disk checkpoint early, with the same fallback.
        if serde_json::from_value::<CheckpointState>(checkpoint.data).is_err() {
            tracing::info!(sprint_id = %self.sprint_id, "phase checkpoint could not be parsed, scheduler will start fresh");
        }
    }
}

fn render_results_markdown(checkpoint: &CheckpointState) -> String {
    let mut md = format!("# Sprint {} Results\n\n", checkpoint.sprint_id);
    md.push_str(&format!("- Completed: {}\n", checkpoint.completed_task_ids.len()));
    md.push_str(&format!("- Total recorded: {}\n\n", checkpoint.task_results.len()));
    md.push_str("| Task | Success | Converged | Score | Iterations | Error |\n");
    md.push_str("|------|---------|-----------|-------|------------|-------|\n");
    for r in &checkpoint.task_results {
        md.push_str(&format!(
            "| {} | {} | {} | {:.1} | {} | {} |\n",
            r.task_id,
            r.success,
            r.converged,
            r.final_score,
            r.iterations,
            r.error.clone().unwrap_or_default()
        ));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ExecutionMode, SchedulerConfig};
    use wayforge_oracle::{CircuitBreakerConfig, Oracle, OracleError, OracleResponse, OracleStream, RetryConfig};

    struct StubOracle {
        response: std::sync::Mutex<Vec<OracleResponse>>,
    }

    #[async_trait::async_trait]
    impl Oracle for StubOracle {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: OracleRequest) -> Result<OracleResponse, OracleError> {
            Ok(self.response.lock().unwrap().remove(0))
        }

        async fn stream(&self, _request: OracleRequest) -> Result<OracleStream, OracleError> {
            unimplemented!()
        }

        fn count_tokens(&self, text: &str) -> usize {
            text.len()
        }

        fn context_window(&self) -> usize {
            10_000
        }
    }

    fn oracle_with(content: &str) -> Arc<OracleFallback> {
        let stub = StubOracle { response: std::sync::Mutex::new(vec![OracleResponse { content: content.to_string(), ..Default::default() }]) };
        Arc::new(OracleFallback::new(vec![Arc::new(stub)], CircuitBreakerConfig::default(), RetryConfig { max_retries: 0, ..RetryConfig::default() }))
    }

    #[tokio::test]
    async fn orchestrate_persists_backlog_and_sprint_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        let backlog_json = r#"{"tasks": [{"id": "t1", "story_id": "s1", "title": "Add login", "description": "...", "type": "feature", "dependencies": [], "estimated_complexity": "simple"}]}"#;
        let phase = OrchestratePhase::new(oracle_with(backlog_json), store.clone(), "build a login page", "sprint-1");

        assert!(phase.can_start().await);
        let result = phase.execute().await;

        assert!(result.success, "{result:?}");
        assert_eq!(result.phase_name, "ORCHESTRATE");
        assert!(phase.can_complete().await);

        let tasks: Vec<Task> = store.read_json(&store.backlog_path()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
    }

    #[tokio::test]
    async fn orchestrate_fails_on_malformed_oracle_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        let phase = OrchestratePhase::new(oracle_with("not json at all"), store, "anything", "sprint-1");

        let result = phase.execute().await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn complete_phase_runs_scheduler_and_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));

        let tasks = vec![Task {
            id: "t1".to_string(),
            story_id: "s1".to_string(),
            title: "demo".to_string(),
            description: "demo".to_string(),
            task_type: crate::model::TaskType::Feature,
            dependencies: Default::default(),
            estimated_complexity: crate::model::EstimatedComplexity::Trivial,
            status: TaskStatus::Pending,
        }];
        store.write_json(&store.backlog_path(), &tasks).unwrap();

        let review_json = r#"{"overall": 90, "dimensions": {"correctness": 90}, "issues": [], "suggestions": []}"#;
        let gen_response = OracleResponse {
            tool_calls: vec![wayforge_oracle::ToolCall { id: "c1".into(), name: "write_file".into(), input: serde_json::json!({"path": "src/lib.rs", "content": "fn main() {}"}) }],
            ..Default::default()
        };
        struct TwoPhaseOracle {
            gen: std::sync::Mutex<Vec<OracleResponse>>,
            review: std::sync::Mutex<Vec<OracleResponse>>,
        }
        #[async_trait::async_trait]
        impl Oracle for TwoPhaseOracle {
            fn name(&self) -> &str {
                "two-phase"
            }
            async fn chat(&self, _request: OracleRequest) -> Result<OracleResponse, OracleError> {
                Ok(self.review.lock().unwrap().remove(0))
            }
            async fn chat_with_tools(&self, _request: OracleRequest) -> Result<OracleResponse, OracleError> {
                Ok(self.gen.lock().unwrap().remove(0))
            }
            async fn stream(&self, _request: OracleRequest) -> Result<OracleStream, OracleError> {
                unimplemented!()
            }
            fn count_tokens(&self, text: &str) -> usize {
                text.len()
            }
            fn context_window(&self) -> usize {
                10_000
            }
        }
        let oracle = Arc::new(OracleFallback::new(
            vec![Arc::new(TwoPhaseOracle {
                gen: std::sync::Mutex::new(vec![gen_response]),
                review: std::sync::Mutex::new(vec![OracleResponse { content: review_json.to_string(), ..Default::default() }]),
            })],
            CircuitBreakerConfig::default(),
            RetryConfig { max_retries: 0, ..RetryConfig::default() },
        ));

        let mut registry = wayforge_tools::ToolRegistry::new();
        struct EchoWrite;
        #[async_trait::async_trait]
        impl wayforge_tools::registry::ToolHandler for EchoWrite {
            async fn call(&self, input: serde_json::Value, _ctx: &wayforge_tools::ToolContext) -> Result<serde_json::Value, String> {
                Ok(input)
            }
        }
        registry.register("write_file", Arc::new(EchoWrite));
        let ctx = Arc::new(wayforge_tools::ToolContext { workspace: dir.path().to_path_buf() });

        let iterator = Arc::new(TaskIterator::new(
            oracle,
            Arc::new(registry),
            ctx,
            crate::iterator::IteratorConfig { min_score: 85.0, min_coverage: 0.0, max_iterations: 3, min_convergence_iterations: 1, convergence_threshold: 50.0 },
        ));
        let runner = Arc::new(IteratorTaskRunner::new(iterator, "demo sprint context"));
        let scheduler = Arc::new(TaskScheduler::new(store.clone(), runner, SchedulerConfig { mode: ExecutionMode::Sequential, max_parallel_tasks: 1 }));

        let phase = CompletePhase::new(scheduler, store.clone(), "sprint-1");
        assert!(phase.can_start().await);
        let result = phase.execute().await;

        assert!(result.success, "{result:?}");
        assert!(phase.can_complete().await);
        assert!(store.results_json_path("sprint-1").exists());
        assert!(store.results_md_path("sprint-1").exists());
    }
}
