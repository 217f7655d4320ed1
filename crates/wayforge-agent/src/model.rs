//! Data model: Task, Sprint, TaskVersion, QualityScores,
//! ConvergenceState, CheckpointState. All entities are
//! `serde::{Serialize, Deserialize}` and derive `Debug, Clone`; enums use
//! `#[serde(rename_all = "snake_case")]` to keep on-disk JSON stable.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Test,
    Refactor,
    Docs,
    Infra,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatedComplexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    RolledBack,
}

/// One unit of scheduled, convergence-driven code generation work.
/// Mutable only by the scheduler and task commands. `dependencies` must
/// form a DAG across the backlog (enforced by the scheduler's topological
/// sort, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub story_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub dependencies: BTreeSet<String>,
    pub estimated_complexity: EstimatedComplexity,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Planning,
    Active,
    Complete,
}

/// Created by the orchestrator; frozen once execution starts except for
/// `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub stories: Vec<String>,
    pub start_date: String,
    pub status: SprintStatus,
}

/// The fixed twelve-dimension quality record (weights enumerated in
/// `crate::quality`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityDimensions {
    pub correctness: f64,
    pub completeness: f64,
    pub robustness: f64,
    pub readability: f64,
    pub maintainability: f64,
    pub complexity: f64,
    pub duplication: f64,
    pub test_coverage: f64,
    pub test_quality: f64,
    pub security: f64,
    pub documentation: f64,
    pub style: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QualityScores {
    pub overall: f64,
    pub dimensions: QualityDimensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub category: String,
    pub message: String,
    pub severity: IssueSeverity,
}

/// An oracle review of the current files: scores plus the issues/
/// suggestions driving the next improvement pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Review {
    pub scores: QualityScores,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFailure {
    pub name: String,
    pub file: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

/// Injected test runner output. Zeroed out when no test runner is
/// configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failures: Vec<TestFailure>,
    pub duration_ms: u64,
}

/// Injected coverage percentages (0-100).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Coverage {
    pub lines: f64,
    pub branches: f64,
    pub functions: f64,
    pub statements: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementImpact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedImprovement {
    pub category: String,
    pub message: String,
    pub impact: ImprovementImpact,
}

/// Which paths changed in one iteration, split into three disjoint sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChanges {
    pub created: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionAnalysis {
    pub issues: Vec<Issue>,
    pub improvements: Vec<DetectedImprovement>,
    pub confidence: f64,
}

/// One iteration's append-only snapshot within a task's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskVersion {
    pub version: u32,
    pub timestamp: String,
    pub changes: FileChanges,
    pub scores: QualityScores,
    pub test_results: TestResults,
    pub analysis: VersionAnalysis,
}

/// Lives only for the duration of one task's execution; owned exclusively
/// by the iterator driving that task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergenceState {
    pub score_history: Vec<f64>,
    pub iteration: u32,
    pub last_review: Option<Review>,
    pub current_files: Vec<GeneratedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// The scheduler's durable cursor. `schema_version` is a one-field
/// forward-compat hook for future checkpoint-format migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub schema_version: u32,
    pub sprint_id: String,
    pub current_task_index: usize,
    pub completed_task_ids: BTreeSet<String>,
    pub task_results: Vec<TaskExecutionResult>,
    pub start_time: String,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            sprint_id: String::new(),
            current_task_index: 0,
            completed_task_ids: BTreeSet::new(),
            task_results: Vec::new(),
            start_time: String::new(),
        }
    }
}

impl CheckpointState {
    /// Invariant: `completed_task_ids == {r.task_id | r.success, r
    /// in task_results}`.
    pub fn invariant_holds(&self) -> bool {
        let derived: BTreeSet<String> = self.task_results.iter().filter(|r| r.success).map(|r| r.task_id.clone()).collect();
        derived == self.completed_task_ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub converged: bool,
    pub final_score: f64,
    pub iterations: u32,
    pub error: Option<String>,
}
