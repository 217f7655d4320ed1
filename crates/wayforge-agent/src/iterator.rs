//! Task iterator (C7): the generate -> test -> review -> decide ->
//! improve convergence loop driving a single task to completion.
//!
//! File generation goes through the oracle's tool-calling surface (a
//! `write_file` tool): the iterator calls the oracle fallback for
//! generation/review and dispatches tool calls via the tool executor,
//! with each destructive tool routed through the confirmation gate.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use wayforge_oracle::{ChatMessage, OracleFallback, OracleRequest, ToolDefinition};
use wayforge_tools::confirm::{ConfirmationDecision, ConfirmationGate};
use wayforge_tools::{execute_tool_calls, ExecuteOptions, ToolCall as ExecToolCall, ToolContext, ToolRegistry};

use crate::json_extract::extract_json_block;
use crate::model::{
    Coverage, DetectedImprovement, FileChanges, GeneratedFile, ImprovementImpact, Issue, IssueSeverity, QualityScores, Review,
    Task, TaskVersion, TestResults, VersionAnalysis,
};
use crate::quality::compute_overall;

/// Explicit options struct for the convergence loop's tunables.
#[derive(Debug, Clone)]
pub struct IteratorConfig {
    pub min_score: f64,
    pub min_coverage: f64,
    pub max_iterations: u32,
    pub min_convergence_iterations: u32,
    pub convergence_threshold: f64,
}

impl Default for IteratorConfig {
    fn default() -> Self {
        Self { min_score: 85.0, min_coverage: 80.0, max_iterations: 10, min_convergence_iterations: 2, convergence_threshold: 2.0 }
    }
}

/// Injected test runner. Either `run` or `coverage` may be absent at
/// the call site — model that by simply not configuring a runner at all;
/// the iterator then treats the task as having zero tests, zero coverage.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> TestResults;
    async fn coverage(&self) -> Option<Coverage>;
}

/// Injected quality evaluator: replaces the oracle's self-reported
/// dimensional scores with real-analyzer scores when configured.
#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(&self, file_paths: &[String]) -> Result<(QualityScores, Vec<Issue>), String>;
}

/// What the iterator returns once it stops, for any reason.
#[derive(Debug, Clone)]
pub struct IteratorOutcome {
    pub success: bool,
    pub converged: bool,
    pub final_score: f64,
    pub iterations: u32,
    pub error: Option<String>,
    pub versions: Vec<TaskVersion>,
}

#[derive(Debug, Deserialize, Default)]
struct ReviewWire {
    // `overall` is never read from the wire: the data model treats it as a
    // weighted sum over `dimensions` (see `crate::quality::compute_overall`),
    // recomputed unconditionally by every caller of `Review::from` below, so
    // the oracle's self-reported figure is discarded rather than trusted.
    #[serde(default)]
    dimensions: DimensionsWire,
    #[serde(default)]
    issues: Vec<IssueWire>,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DimensionsWire {
    #[serde(default)]
    correctness: f64,
    #[serde(default)]
    completeness: f64,
    #[serde(default)]
    robustness: f64,
    #[serde(default)]
    readability: f64,
    #[serde(default)]
    maintainability: f64,
    #[serde(default)]
    complexity: f64,
    #[serde(default)]
    duplication: f64,
    #[serde(default)]
    test_coverage: f64,
    #[serde(default)]
    test_quality: f64,
    #[serde(default)]
    security: f64,
    #[serde(default)]
    documentation: f64,
    #[serde(default)]
    style: f64,
}

#[derive(Debug, Deserialize)]
struct IssueWire {
    category: String,
    message: String,
    #[serde(default = "default_severity")]
    severity: IssueSeverity,
}

fn default_severity() -> IssueSeverity {
    IssueSeverity::Minor
}

impl From<ReviewWire> for Review {
    fn from(wire: ReviewWire) -> Self {
        let dimensions = crate::model::QualityDimensions {
            correctness: wire.dimensions.correctness,
            completeness: wire.dimensions.completeness,
            robustness: wire.dimensions.robustness,
            readability: wire.dimensions.readability,
            maintainability: wire.dimensions.maintainability,
            complexity: wire.dimensions.complexity,
            duplication: wire.dimensions.duplication,
            test_coverage: wire.dimensions.test_coverage,
            test_quality: wire.dimensions.test_quality,
            security: wire.dimensions.security,
            documentation: wire.dimensions.documentation,
            style: wire.dimensions.style,
        };
        Review {
            // Placeholder: every call site recomputes this from `dimensions`
            // via `compute_overall` immediately after conversion.
            scores: QualityScores { overall: 0.0, dimensions },
            issues: wire.issues.into_iter().map(|i| Issue { category: i.category, message: i.message, severity: i.severity }).collect(),
            suggestions: wire.suggestions,
        }
    }
}

pub struct TaskIterator {
    oracle: Arc<OracleFallback>,
    registry: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    gate: Option<Arc<Mutex<ConfirmationGate>>>,
    test_runner: Option<Arc<dyn TestRunner>>,
    evaluator: Option<Arc<dyn QualityEvaluator>>,
    config: IteratorConfig,
}

impl TaskIterator {
    pub fn new(oracle: Arc<OracleFallback>, registry: Arc<ToolRegistry>, tool_ctx: Arc<ToolContext>, config: IteratorConfig) -> Self {
        Self { oracle, registry, tool_ctx, gate: None, test_runner: None, evaluator: None, config }
    }

    pub fn with_confirmation_gate(mut self, gate: Arc<Mutex<ConfirmationGate>>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    fn write_file_tool() -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write the full contents of a file at a workspace-relative path".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    /// Run the full convergence loop for `task` given the oracle prompt
    /// context (task description, architecture notes, etc. composed by
    /// the caller).
    pub async fn run(&self, task: &Task, context_prompt: &str) -> IteratorOutcome {
        let mut score_history: Vec<f64> = Vec::new();
        let mut versions: Vec<TaskVersion> = Vec::new();
        let mut previous_issues: Vec<Issue> = Vec::new();
        let mut current_files: Vec<GeneratedFile> = Vec::new();
        let mut pending_changes = FileChanges::default();

        let generate_prompt = format!(
            "Generate the initial implementation for the following task. Use the write_file tool for every file you produce.\n\n{context_prompt}\n\nTask: {}\n{}",
            task.title, task.description
        );
        match self.generate_or_improve(&generate_prompt).await {
            Ok((files, changes)) => {
                current_files = files;
                pending_changes = changes;
            }
            Err(err) => {
                return IteratorOutcome { success: false, converged: false, final_score: 0.0, iterations: 0, error: Some(err), versions };
            }
        }

        let mut last_review: Option<Review> = None;

        for iteration in 1..=self.config.max_iterations {
            let test_results = self.run_tests().await;
            let coverage = self.run_coverage().await;

            let mut review = match self.review(task, context_prompt, &current_files, &test_results).await {
                Ok(r) => r,
                Err(err) => {
                    return IteratorOutcome { success: false, converged: false, final_score: *score_history.last().unwrap_or(&0.0), iterations: iteration, error: Some(err), versions };
                }
            };

            if let Some(evaluator) = &self.evaluator {
                let paths: Vec<String> = current_files.iter().map(|f| f.path.clone()).collect();
                if let Ok((scores, issues)) = evaluator.evaluate(&paths).await {
                    review.scores = scores;
                    review.scores.overall = compute_overall(&review.scores.dimensions);
                    review.issues = issues;
                }
            } else {
                review.scores.overall = compute_overall(&review.scores.dimensions);
            }

            score_history.push(review.scores.overall);

            let current_keys: BTreeSet<(String, String)> = review.issues.iter().map(|i| (i.category.clone(), i.message.clone())).collect();
            let improvements: Vec<DetectedImprovement> = previous_issues
                .iter()
                .filter(|prev| !current_keys.contains(&(prev.category.clone(), prev.message.clone())))
                .map(|resolved| DetectedImprovement {
                    category: resolved.category.clone(),
                    message: resolved.message.clone(),
                    impact: match resolved.severity {
                        IssueSeverity::Critical | IssueSeverity::Major => ImprovementImpact::High,
                        IssueSeverity::Minor => ImprovementImpact::Medium,
                        IssueSeverity::Info => ImprovementImpact::Low,
                    },
                })
                .collect();
            previous_issues = review.issues.clone();

            let has_critical_or_major = review.issues.iter().any(|i| matches!(i.severity, IssueSeverity::Critical | IssueSeverity::Major));
            let confidence = (review.scores.overall / 2.0
                + if iteration >= self.config.min_convergence_iterations { 25.0 } else { 0.0 }
                + if !has_critical_or_major { 25.0 } else { 0.0 })
            .clamp(0.0, 100.0);

            versions.push(TaskVersion {
                version: iteration,
                timestamp: chrono::Utc::now().to_rfc3339(),
                changes: std::mem::take(&mut pending_changes),
                scores: review.scores,
                test_results: test_results.clone(),
                analysis: VersionAnalysis { issues: review.issues.clone(), improvements, confidence },
            });

            let has_critical = review.issues.iter().any(|i| matches!(i.severity, IssueSeverity::Critical));

            // Stop conditions evaluated in order, first match wins.
            if iteration < self.config.min_convergence_iterations {
                last_review = Some(review);
            } else if review.scores.overall < self.config.min_score {
                last_review = Some(review);
            } else if has_critical {
                last_review = Some(review);
            } else if score_history.len() >= 2 && {
                let last = score_history[score_history.len() - 1];
                let prev = score_history[score_history.len() - 2];
                (last - prev).abs() < self.config.convergence_threshold
            } {
                let final_score = review.scores.overall;
                return IteratorOutcome { success: true, converged: true, final_score, iterations: iteration, error: None, versions };
            } else if score_history.len() >= 2 && (score_history[score_history.len() - 1] - score_history[score_history.len() - 2]) < -5.0 {
                last_review = Some(review);
            } else if review.scores.overall >= self.config.min_score && coverage.map(|c| c.lines).unwrap_or(0.0) >= self.config.min_coverage {
                let final_score = review.scores.overall;
                return IteratorOutcome { success: true, converged: true, final_score, iterations: iteration, error: None, versions };
            } else {
                last_review = Some(review);
            }

            if iteration == self.config.max_iterations {
                break;
            }

            let review_for_prompt = last_review.as_ref().expect("set on every loop path above");
            let improve_prompt = format!(
                "Improve the implementation given this review. Use the write_file tool to rewrite any file that needs changes.\n\n{context_prompt}\n\nReview issues:\n{}\n\nSuggestions:\n{}",
                review_for_prompt.issues.iter().map(|i| format!("- [{:?}] {}: {}", i.severity, i.category, i.message)).collect::<Vec<_>>().join("\n"),
                review_for_prompt.suggestions.join("\n"),
            );
            match self.generate_or_improve(&improve_prompt).await {
                Ok((files, changes)) => {
                    current_files = files;
                    pending_changes = changes;
                }
                Err(err) => {
                    return IteratorOutcome {
                        success: false,
                        converged: false,
                        final_score: *score_history.last().unwrap_or(&0.0),
                        iterations: iteration,
                        error: Some(err),
                        versions,
                    };
                }
            }
        }

        let last_score = *score_history.last().unwrap_or(&0.0);
        let last = last_review.as_ref();
        let passes = last.map(|r| r.scores.overall >= self.config.min_score).unwrap_or(false);
        IteratorOutcome {
            success: passes,
            converged: false,
            final_score: last_score,
            iterations: self.config.max_iterations,
            error: Some("Max iterations reached".to_string()),
            versions,
        }
    }

    async fn run_tests(&self) -> TestResults {
        match &self.test_runner {
            Some(runner) => runner.run().await,
            None => TestResults::default(),
        }
    }

    async fn run_coverage(&self) -> Option<Coverage> {
        match &self.test_runner {
            Some(runner) => runner.coverage().await,
            None => None,
        }
    }

    async fn review(&self, task: &Task, context_prompt: &str, files: &[GeneratedFile], tests: &TestResults) -> Result<Review, String> {
        let files_summary = files.iter().map(|f| format!("- {} ({} bytes)", f.path, f.content.len())).collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "Review the current implementation of this task and respond with a single JSON object shaped like:\n\
             {{\"dimensions\": {{\"correctness\": 0-100, \"completeness\": 0-100, \
             \"robustness\": 0-100, \"readability\": 0-100, \"maintainability\": 0-100, \"complexity\": 0-100, \
             \"duplication\": 0-100, \"test_coverage\": 0-100, \"test_quality\": 0-100, \"security\": 0-100, \
             \"documentation\": 0-100, \"style\": 0-100}}, \
             \"issues\": [{{\"category\": string, \"message\": string, \"severity\": \"critical\"|\"major\"|\"minor\"|\"info\"}}], \
             \"suggestions\": [string]}}. Rate every dimension independently — the overall score is computed \
             from these twelve values, not reported separately.\n\n{context_prompt}\n\nTask: {}\n{}\n\nFiles:\n{files_summary}\n\nTest results: {} passed, {} failed, {} skipped.",
            task.title, task.description, tests.passed, tests.failed, tests.skipped,
        );
        let request = OracleRequest::new(vec![ChatMessage::user(prompt)]);
        let response = self.oracle.chat(request).await.map_err(|e| e.to_string())?;
        let json_str = extract_json_block(&response.content);
        let wire: ReviewWire = serde_json::from_str(&json_str).map_err(|e| format!("malformed review JSON: {e}"))?;
        Ok(wire.into())
    }

    /// Generate or improve files via the oracle's tool-calling surface,
    /// resolving each `write_file` call through the confirmation gate (if
    /// configured) before dispatching it through the tool executor.
    async fn generate_or_improve(&self, prompt: &str) -> Result<(Vec<GeneratedFile>, FileChanges), String> {
        let request = OracleRequest::new(vec![ChatMessage::user(prompt)]).with_tools(vec![Self::write_file_tool()]);
        let response = self.oracle.chat_with_tools(request).await.map_err(|e| e.to_string())?;

        if response.tool_calls.is_empty() {
            return Err("oracle response contained no write_file tool calls".to_string());
        }

        let mut changes = FileChanges::default();
        let mut approved_calls = Vec::new();
        for call in &response.tool_calls {
            let path = call.input.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let exec_call = ExecToolCall { id: call.id.clone(), name: call.name.clone(), input: call.input.clone() };

            let decision = if let Some(gate) = &self.gate {
                gate.lock().await.confirm(&exec_call).await
            } else {
                ConfirmationDecision::Yes
            };

            match decision {
                ConfirmationDecision::Abort => return Err("tool batch aborted during confirmation".to_string()),
                ConfirmationDecision::No => continue,
                ConfirmationDecision::Yes | ConfirmationDecision::TrustProject | ConfirmationDecision::TrustGlobal => {
                    if self.tool_ctx.workspace.join(&path).exists() {
                        changes.modified.insert(path);
                    } else {
                        changes.created.insert(path);
                    }
                    approved_calls.push(exec_call);
                }
            }
        }

        if approved_calls.is_empty() {
            return Err("all write_file calls were denied by the confirmation gate".to_string());
        }

        let result = execute_tool_calls(approved_calls, &self.registry, self.tool_ctx.clone(), ExecuteOptions::default()).await;

        let mut files = Vec::new();
        for executed in &result.executed {
            if executed.result.success {
                let path = executed.call.input.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let content = executed.call.input.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                files.push(GeneratedFile { path, content });
            }
        }

        if files.is_empty() {
            return Err("no write_file calls succeeded".to_string());
        }

        Ok((files, changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EstimatedComplexity, TaskStatus, TaskType};
    use async_trait::async_trait as at;
    use std::collections::BTreeSet as BSet;
    use wayforge_oracle::{CircuitBreakerConfig, OracleResponse, RetryConfig};
    use wayforge_tools::registry::ToolHandler;

    struct EchoWriteHandler;

    #[at]
    impl ToolHandler for EchoWriteHandler {
        async fn call(&self, input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, String> {
            Ok(input)
        }
    }

    fn sample_task() -> Task {
        Task {
            id: "t1".to_string(),
            story_id: "s1".to_string(),
            title: "demo".to_string(),
            description: "demo task".to_string(),
            task_type: TaskType::Feature,
            dependencies: BSet::new(),
            estimated_complexity: EstimatedComplexity::Simple,
            status: TaskStatus::Pending,
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut r = ToolRegistry::new();
        r.register("write_file", Arc::new(EchoWriteHandler));
        Arc::new(r)
    }

    fn ctx() -> Arc<ToolContext> {
        Arc::new(ToolContext { workspace: std::env::temp_dir() })
    }

    struct StubOracle {
        generate_response: std::sync::Mutex<Vec<OracleResponse>>,
        review_response: std::sync::Mutex<Vec<OracleResponse>>,
    }

    #[async_trait::async_trait]
    impl wayforge_oracle::Oracle for StubOracle {
        fn name(&self) -> &str {
            "stub"
        }

        async fn chat(&self, _request: OracleRequest) -> Result<OracleResponse, wayforge_oracle::OracleError> {
            Ok(self.review_response.lock().unwrap().remove(0))
        }

        async fn chat_with_tools(&self, _request: OracleRequest) -> Result<OracleResponse, wayforge_oracle::OracleError> {
            Ok(self.generate_response.lock().unwrap().remove(0))
        }

        async fn stream(&self, _request: OracleRequest) -> Result<wayforge_oracle::OracleStream, wayforge_oracle::OracleError> {
            unimplemented!()
        }

        fn count_tokens(&self, text: &str) -> usize {
            text.len()
        }

        fn context_window(&self) -> usize {
            10_000
        }
    }

    fn write_call(path: &str, content: &str) -> wayforge_oracle::ToolCall {
        wayforge_oracle::ToolCall { id: "c1".into(), name: "write_file".into(), input: json!({"path": path, "content": content}) }
    }

    /// All twelve dimensions set to the same value, so the weighted-sum
    /// `overall` (weights sum to 1.0, see `crate::quality`) comes out equal
    /// to that value — keeps the fixture readable without hand-computing
    /// the weighted sum.
    fn uniform_dimensions_json(value: u32) -> String {
        format!(
            "{{\"correctness\": {value}, \"completeness\": {value}, \"robustness\": {value}, \
             \"readability\": {value}, \"maintainability\": {value}, \"complexity\": {value}, \
             \"duplication\": {value}, \"test_coverage\": {value}, \"test_quality\": {value}, \
             \"security\": {value}, \"documentation\": {value}, \"style\": {value}}}"
        )
    }

    #[tokio::test]
    async fn converges_when_two_consecutive_scores_are_within_threshold() {
        let gen_resp = OracleResponse { tool_calls: vec![write_call("src/lib.rs", "fn main() {}")], ..Default::default() };
        let review1 = OracleResponse {
            content: format!(r#"{{"dimensions": {}, "issues": [], "suggestions": []}}"#, uniform_dimensions_json(72)),
            ..Default::default()
        };
        let review2 = OracleResponse {
            content: format!(r#"{{"dimensions": {}, "issues": [], "suggestions": []}}"#, uniform_dimensions_json(90)),
            ..Default::default()
        };

        let stub = StubOracle {
            generate_response: std::sync::Mutex::new(vec![gen_resp.clone(), gen_resp]),
            review_response: std::sync::Mutex::new(vec![review1, review2]),
        };
        let oracle = Arc::new(OracleFallback::new(vec![Arc::new(stub)], CircuitBreakerConfig::default(), RetryConfig { max_retries: 0, ..RetryConfig::default() }));

        let iterator = TaskIterator::new(oracle, registry(), ctx(), IteratorConfig { min_score: 85.0, min_coverage: 80.0, max_iterations: 10, min_convergence_iterations: 2, convergence_threshold: 20.0 });

        let outcome = iterator.run(&sample_task(), "context").await;
        assert!(outcome.converged, "expected convergence, got {outcome:?}");
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn max_iterations_reached_without_convergence_reports_failure() {
        let gen_resp = OracleResponse { tool_calls: vec![write_call("src/lib.rs", "fn main() {}")], ..Default::default() };
        let low_review = OracleResponse {
            content: format!(r#"{{"dimensions": {}, "issues": [], "suggestions": []}}"#, uniform_dimensions_json(10)),
            ..Default::default()
        };

        let stub = StubOracle {
            generate_response: std::sync::Mutex::new((0..5).map(|_| gen_resp.clone()).collect()),
            review_response: std::sync::Mutex::new((0..5).map(|_| low_review.clone()).collect()),
        };
        let oracle = Arc::new(OracleFallback::new(vec![Arc::new(stub)], CircuitBreakerConfig::default(), RetryConfig { max_retries: 0, ..RetryConfig::default() }));

        let iterator = TaskIterator::new(oracle, registry(), ctx(), IteratorConfig { min_score: 85.0, min_coverage: 80.0, max_iterations: 4, min_convergence_iterations: 2, convergence_threshold: 2.0 });

        let outcome = iterator.run(&sample_task(), "context").await;
        assert!(!outcome.converged);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Max iterations reached"));
    }
}
