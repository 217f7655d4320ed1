//! Tool registry (C5): maps tool name to handler, a plain name-to-handler
//! map with no manifest or marketplace to resolve handlers from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Context passed to every tool handler invocation.
pub struct ToolContext {
    pub workspace: PathBuf,
}

/// A tool handler is a pure async function `(input, context) -> Result<data, message>`.
/// Handler-side panics are caught by the executor and converted to a failed
/// `ToolResult` rather than propagating.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
