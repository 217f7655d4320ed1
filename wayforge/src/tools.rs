//! Concrete tool handlers bound into the CLI's registry. The iterator
//! itself is handler-agnostic (tool handlers are injected); this is the
//! one concrete implementation the CLI needs to drive a real convergence
//! loop, with the sandbox boundary narrowed to "stay under the workspace
//! root."

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use wayforge_tools::registry::{ToolContext, ToolHandler};

pub struct WriteFileHandler;

#[async_trait]
impl ToolHandler for WriteFileHandler {
    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, String> {
        let path = input.get("path").and_then(Value::as_str).ok_or_else(|| "missing \"path\"".to_string())?;
        let content = input.get("content").and_then(Value::as_str).ok_or_else(|| "missing \"content\"".to_string())?;

        let target = ctx.workspace.join(path);
        if !target.starts_with(&ctx.workspace) {
            return Err(format!("path {path} escapes the workspace root"));
        }
        if let Some(parent) = Path::new(&target).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
        }
        tokio::fs::write(&target, content).await.map_err(|e| e.to_string())?;

        Ok(serde_json::json!({"path": path, "bytes_written": content.len()}))
    }
}
