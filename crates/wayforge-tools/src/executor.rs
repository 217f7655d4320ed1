//! Bounded-parallel tool executor (C5): admits up to `max_concurrency`
//! handlers concurrently via a `tokio::sync::Semaphore`, with abort
//! signalled through a `tokio_util::sync::CancellationToken`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::registry::{ToolContext, ToolRegistry};
use crate::types::{ExecutedToolCall, ToolCall, ToolResult};

type StartCallback = Arc<dyn Fn(&ToolCall) + Send + Sync>;
type EndCallback = Arc<dyn Fn(&ExecutedToolCall) + Send + Sync>;
type SkippedCallback = Arc<dyn Fn(&ToolCall) + Send + Sync>;

/// Explicit options struct for the executor's tunables.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub max_concurrency: Option<usize>,
    pub signal: Option<CancellationToken>,
    pub on_tool_start: Option<StartCallback>,
    pub on_tool_end: Option<EndCallback>,
    pub on_tool_skipped: Option<SkippedCallback>,
}

const DEFAULT_MAX_CONCURRENCY: usize = 3;

pub struct ExecuteResult {
    /// Input order, not completion order.
    pub executed: Vec<ExecutedToolCall>,
    pub skipped: Vec<ToolCall>,
    pub aborted: bool,
}

/// Outcome of a single spawned handler task, tagged with its original
/// position so results can be reassembled in input order.
enum Outcome {
    Ran(ExecutedToolCall),
    Skipped(ToolCall),
}

pub async fn execute_tool_calls(
    tool_calls: Vec<ToolCall>,
    registry: &ToolRegistry,
    ctx: Arc<ToolContext>,
    options: ExecuteOptions,
) -> ExecuteResult {
    let already_aborted = options.signal.as_ref().is_some_and(CancellationToken::is_cancelled);
    if already_aborted {
        for call in &tool_calls {
            if let Some(cb) = &options.on_tool_skipped {
                cb(call);
            }
        }
        return ExecuteResult { executed: Vec::new(), skipped: tool_calls, aborted: true };
    }

    let max_concurrency = options.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY).max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let n = tool_calls.len();
    let mut slots: Vec<Option<Outcome>> = (0..n).map(|_| None).collect();
    let mut join_set: JoinSet<(usize, Outcome)> = JoinSet::new();

    for (idx, call) in tool_calls.into_iter().enumerate() {
        if options.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            if let Some(cb) = &options.on_tool_skipped {
                cb(&call);
            }
            slots[idx] = Some(Outcome::Skipped(call));
            continue;
        }

        let semaphore = semaphore.clone();
        let handler = registry.get(&call.name);
        let ctx = ctx.clone();
        let on_start = options.on_tool_start.clone();
        let on_end = options.on_tool_end.clone();
        let on_skipped = options.on_tool_skipped.clone();
        let signal = options.signal.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("tool executor semaphore closed");

            if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
                if let Some(cb) = &on_skipped {
                    cb(&call);
                }
                return (idx, Outcome::Skipped(call));
            }

            if let Some(cb) = &on_start {
                cb(&call);
            }

            let start = Instant::now();
            let result = match handler {
                Some(h) => {
                    let outcome = AssertUnwindSafe(h.call(call.input.clone(), &ctx)).catch_unwind().await;
                    match outcome {
                        Ok(Ok(data)) => ToolResult { success: true, data: Some(data), error: None, duration_ms: start.elapsed().as_millis() as u64 },
                        Ok(Err(message)) => ToolResult { success: false, data: None, error: Some(message), duration_ms: start.elapsed().as_millis() as u64 },
                        Err(panic) => {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "tool handler panicked".to_string());
                            ToolResult { success: false, data: None, error: Some(message), duration_ms: start.elapsed().as_millis() as u64 }
                        }
                    }
                }
                None => ToolResult {
                    success: false,
                    data: None,
                    error: Some(format!("unknown tool: {}", call.name)),
                    duration_ms: start.elapsed().as_millis() as u64,
                },
            };

            let executed = ExecutedToolCall { call, result };
            if let Some(cb) = &on_end {
                cb(&executed);
            }
            (idx, Outcome::Ran(executed))
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(join_err) => {
                tracing::warn!(error = %join_err, "tool executor task join failed unexpectedly");
            }
        }
    }

    let mut executed = Vec::new();
    let mut skipped = Vec::new();
    for slot in slots.into_iter().flatten() {
        match slot {
            Outcome::Ran(e) => executed.push(e),
            Outcome::Skipped(c) => skipped.push(c),
        }
    }

    ExecuteResult { executed, skipped, aborted: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    struct DelayHandler {
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl crate::registry::ToolHandler for DelayHandler {
        async fn call(&self, _input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, String> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(json!({"ok": true}))
        }
    }

    struct PanicHandler;

    #[async_trait::async_trait]
    impl crate::registry::ToolHandler for PanicHandler {
        async fn call(&self, _input: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, String> {
            panic!("boom");
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall { id: id.to_string(), name: name.to_string(), input: json!({}) }
    }

    fn ctx() -> Arc<ToolContext> {
        Arc::new(ToolContext { workspace: std::env::temp_dir() })
    }

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        let mut registry = ToolRegistry::new();
        registry.register("c1", Arc::new(DelayHandler { delay_ms: 50 }));
        registry.register("c2", Arc::new(DelayHandler { delay_ms: 10 }));
        registry.register("c3", Arc::new(DelayHandler { delay_ms: 30 }));

        let calls = vec![call("c1", "c1"), call("c2", "c2"), call("c3", "c3")];
        let result = execute_tool_calls(calls, &registry, ctx(), ExecuteOptions { max_concurrency: Some(5), ..Default::default() }).await;

        let ids: Vec<_> = result.executed.iter().map(|e| e.call.id.clone()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(result.executed.iter().all(|e| e.result.success));
        assert!(result.skipped.is_empty());
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn abort_before_start_skips_everything() {
        let mut registry = ToolRegistry::new();
        registry.register("c1", Arc::new(DelayHandler { delay_ms: 10 }));

        let signal = CancellationToken::new();
        signal.cancel();

        let calls = vec![call("c1", "c1"), call("c2", "c1"), call("c3", "c1")];
        let result = execute_tool_calls(calls, &registry, ctx(), ExecuteOptions { signal: Some(signal), ..Default::default() }).await;

        assert!(result.executed.is_empty());
        assert_eq!(result.skipped.len(), 3);
        assert!(result.aborted);
    }

    #[tokio::test]
    async fn abort_mid_batch_lets_in_flight_finish_but_skips_the_rest() {
        let mut registry = ToolRegistry::new();
        registry.register("slow", Arc::new(DelayHandler { delay_ms: 60 }));

        let signal = CancellationToken::new();
        let signal_for_cancel = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            signal_for_cancel.cancel();
        });

        let calls = vec![call("c1", "slow"), call("c2", "slow")];
        let result = execute_tool_calls(
            calls,
            &registry,
            ctx(),
            ExecuteOptions { max_concurrency: Some(1), signal: Some(signal), ..Default::default() },
        )
        .await;

        assert!(!result.aborted);
        assert_eq!(result.executed.len() + result.skipped.len(), 2);
        assert!(!result.executed.is_empty(), "the in-flight call should still complete");
    }

    #[tokio::test]
    async fn handler_panic_becomes_a_failed_result_not_a_propagated_error() {
        let mut registry = ToolRegistry::new();
        registry.register("boom", Arc::new(PanicHandler));

        let calls = vec![call("c1", "boom")];
        let result = execute_tool_calls(calls, &registry, ctx(), ExecuteOptions::default()).await;

        assert_eq!(result.executed.len(), 1);
        assert!(!result.executed[0].result.success);
        assert!(result.executed[0].result.error.is_some());
    }

    #[tokio::test]
    async fn unknown_tool_becomes_a_failed_result() {
        let registry = ToolRegistry::new();
        let calls = vec![call("c1", "does_not_exist")];
        let result = execute_tool_calls(calls, &registry, ctx(), ExecuteOptions::default()).await;

        assert_eq!(result.executed.len(), 1);
        assert!(!result.executed[0].result.success);
    }
}
