//! Task scheduler (C8): Kahn's-algorithm DAG preprocessing feeding either
//! a sequential or parallel-batched execution loop, checkpointed through
//! the artifact store after every task (sequential) or batch (parallel).
//!
//! Checkpointing uses atomic write-temp-then-rename persistence with
//! directory creation on first write. The DAG/ready-set/batch shape
//! runs a wave loop over explicit structs, logging a warning on cycle
//! detection and persisting through `wayforge-artifact` checkpoints.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use wayforge_artifact::ArtifactStore;

use crate::error::PhaseError;
use crate::model::{CheckpointState, Task, TaskExecutionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    ParallelBatched,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: ExecutionMode,
    pub max_parallel_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { mode: ExecutionMode::Sequential, max_parallel_tasks: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Executing,
    Iterating,
    Blocked,
    Complete,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub sprint_id: String,
    pub task_id: Option<String>,
    pub iteration: Option<u32>,
    pub current_score: Option<f64>,
    pub tasks_completed: usize,
    pub tasks_total: usize,
    pub message: String,
}

/// Injected progress sink. Synchronous: emitting a progress event
/// never needs to suspend the scheduler.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Injected per-task execution: the scheduler feeds one task at a time
/// to the iterator. A concrete implementation wraps
/// a `crate::iterator::TaskIterator` plus whatever prompt context a given
/// sprint needs; the scheduler itself is agnostic to how a task runs.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &Task) -> TaskExecutionResult;
}

/// Kahn's topological sort over `dependencies` edges (`dep -> task`). On
/// a cycle (sorted length != input length) logs a warning and returns the
/// input order unchanged — scheduling must never block on a cycle.
pub fn topological_order(tasks: &[Task]) -> Vec<Task> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                continue;
            }
            *in_degree.get_mut(task.id.as_str()).expect("task present in in_degree map") += 1;
            dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut queue: VecDeque<&str> = tasks.iter().filter(|t| in_degree[t.id.as_str()] == 0).map(|t| t.id.as_str()).collect();
    let mut ordered = Vec::with_capacity(tasks.len());
    let mut degrees = in_degree.clone();

    while let Some(id) = queue.pop_front() {
        ordered.push(by_id[id].clone());
        if let Some(next) = dependents.get(id) {
            for &dependent in next {
                let entry = degrees.get_mut(dependent).expect("dependent present in degrees map");
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if ordered.len() != tasks.len() {
        tracing::warn!(task_count = tasks.len(), sorted_count = ordered.len(), "task dependency graph has a cycle, executing in input order");
        return tasks.to_vec();
    }

    ordered
}

pub struct TaskScheduler {
    store: Arc<ArtifactStore>,
    runner: Arc<dyn TaskRunner>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: Option<CancellationToken>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(store: Arc<ArtifactStore>, runner: Arc<dyn TaskRunner>, config: SchedulerConfig) -> Self {
        Self { store, runner, progress: None, cancel: None, config }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.emit(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Load an existing checkpoint for `sprint_id`, or start fresh if none
    /// matches: a stored checkpoint is reused only when its `sprint_id`
    /// matches the current sprint, otherwise a fresh state is initialized.
    fn load_or_init_checkpoint(&self, sprint_id: &str) -> CheckpointState {
        let path = self.store.checkpoint_path(sprint_id);
        let checkpoint: CheckpointState = self.store.read_json(&path).unwrap_or_default();
        if checkpoint.sprint_id == sprint_id {
            checkpoint
        } else {
            if !checkpoint.sprint_id.is_empty() {
                tracing::info!(sprint_id, stored_sprint_id = %checkpoint.sprint_id, "checkpoint does not match requested sprint, starting fresh");
            }
            CheckpointState { sprint_id: sprint_id.to_string(), start_time: chrono::Utc::now().to_rfc3339(), ..CheckpointState::default() }
        }
    }

    fn save_checkpoint(&self, checkpoint: &CheckpointState) -> Result<(), PhaseError> {
        let path = self.store.checkpoint_path(&checkpoint.sprint_id);
        self.store.write_json(&path, checkpoint).map_err(PhaseError::from)
    }

    /// Run a sprint's tasks to completion (or until cancelled/blocked),
    /// resuming from any on-disk checkpoint that matches `sprint_id`.
    pub async fn run(&self, sprint_id: &str, tasks: Vec<Task>) -> Result<CheckpointState, PhaseError> {
        let ordered = topological_order(&tasks);
        let mut checkpoint = self.load_or_init_checkpoint(sprint_id);

        let remaining: Vec<Task> = ordered.into_iter().filter(|t| !checkpoint.completed_task_ids.contains(&t.id)).collect();

        match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(sprint_id, remaining, &mut checkpoint).await?,
            ExecutionMode::ParallelBatched => self.run_parallel(sprint_id, remaining, &mut checkpoint).await?,
        }

        self.emit(ProgressEvent {
            phase: ProgressPhase::Complete,
            sprint_id: sprint_id.to_string(),
            task_id: None,
            iteration: None,
            current_score: None,
            tasks_completed: checkpoint.completed_task_ids.len(),
            tasks_total: checkpoint.task_results.len().max(checkpoint.completed_task_ids.len()),
            message: "sprint execution finished".to_string(),
        });

        Ok(checkpoint)
    }

    async fn run_sequential(&self, sprint_id: &str, tasks: Vec<Task>, checkpoint: &mut CheckpointState) -> Result<(), PhaseError> {
        let total = tasks.len() + checkpoint.completed_task_ids.len();

        for task in tasks {
            if self.is_cancelled() {
                break;
            }

            if !task.dependencies.iter().all(|d| checkpoint.completed_task_ids.contains(d)) {
                self.emit(ProgressEvent {
                    phase: ProgressPhase::Blocked,
                    sprint_id: sprint_id.to_string(),
                    task_id: Some(task.id.clone()),
                    iteration: None,
                    current_score: None,
                    tasks_completed: checkpoint.completed_task_ids.len(),
                    tasks_total: total,
                    message: format!("task {} blocked: unmet dependencies", task.id),
                });
                checkpoint.task_results.push(TaskExecutionResult {
                    task_id: task.id.clone(),
                    success: false,
                    converged: false,
                    final_score: 0.0,
                    iterations: 0,
                    error: Some("blocked: dependencies not completed".to_string()),
                });
                self.save_checkpoint(checkpoint)?;
                continue;
            }

            self.emit(ProgressEvent {
                phase: ProgressPhase::Executing,
                sprint_id: sprint_id.to_string(),
                task_id: Some(task.id.clone()),
                iteration: None,
                current_score: None,
                tasks_completed: checkpoint.completed_task_ids.len(),
                tasks_total: total,
                message: format!("running task {}", task.id),
            });

            let result = self.runner.run_task(&task).await;
            if result.success {
                checkpoint.completed_task_ids.insert(task.id.clone());
            }
            checkpoint.current_task_index += 1;
            checkpoint.task_results.push(result);
            self.save_checkpoint(checkpoint)?;
        }

        Ok(())
    }

    async fn run_parallel(&self, sprint_id: &str, mut tasks: Vec<Task>, checkpoint: &mut CheckpointState) -> Result<(), PhaseError> {
        let total = tasks.len() + checkpoint.completed_task_ids.len();
        let mut tried: BTreeSet<String> = BTreeSet::new();

        while !tasks.is_empty() {
            if self.is_cancelled() {
                break;
            }

            let (ready, rest): (Vec<Task>, Vec<Task>) = tasks
                .into_iter()
                .partition(|t| !tried.contains(&t.id) && t.dependencies.iter().all(|d| checkpoint.completed_task_ids.contains(d)));
            tasks = rest;

            if ready.is_empty() {
                for task in &tasks {
                    self.emit(ProgressEvent {
                        phase: ProgressPhase::Blocked,
                        sprint_id: sprint_id.to_string(),
                        task_id: Some(task.id.clone()),
                        iteration: None,
                        current_score: None,
                        tasks_completed: checkpoint.completed_task_ids.len(),
                        tasks_total: total,
                        message: format!("task {} blocked: unmet dependencies", task.id),
                    });
                    checkpoint.task_results.push(TaskExecutionResult {
                        task_id: task.id.clone(),
                        success: false,
                        converged: false,
                        final_score: 0.0,
                        iterations: 0,
                        error: Some("blocked: dependencies not completed".to_string()),
                    });
                }
                self.save_checkpoint(checkpoint)?;
                break;
            }

            let mut ready = ready;
            let overflow: Vec<Task> = if ready.len() > self.config.max_parallel_tasks { ready.split_off(self.config.max_parallel_tasks) } else { Vec::new() };
            let batch = ready;
            tasks.extend(overflow);
            for task in &batch {
                tried.insert(task.id.clone());
                self.emit(ProgressEvent {
                    phase: ProgressPhase::Executing,
                    sprint_id: sprint_id.to_string(),
                    task_id: Some(task.id.clone()),
                    iteration: None,
                    current_score: None,
                    tasks_completed: checkpoint.completed_task_ids.len(),
                    tasks_total: total,
                    message: format!("running task {} in parallel batch", task.id),
                });
            }

            let mut join_set: JoinSet<TaskExecutionResult> = JoinSet::new();
            for task in batch {
                let runner = self.runner.clone();
                join_set.spawn(async move { runner.run_task(&task).await });
            }

            let mut batch_results = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => batch_results.push(result),
                    Err(join_err) => tracing::warn!(error = %join_err, "scheduler task join failed unexpectedly"),
                }
            }

            for result in batch_results {
                if result.success {
                    checkpoint.completed_task_ids.insert(result.task_id.clone());
                }
                checkpoint.task_results.push(result);
            }
            checkpoint.current_task_index += 1;
            self.save_checkpoint(checkpoint)?;

            // tasks still pending (not ready this round) go back in for the next iteration.
            tasks.retain(|t| !checkpoint.completed_task_ids.contains(&t.id) && !tried.contains(&t.id));
        }

        Ok(())
    }
}
