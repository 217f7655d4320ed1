//! Confirmation gate (C6): per-tool-call risk classification plus the
//! interactive yes/no/trust/abort decision loop, with a five-way
//! decision set and project/global trust persistence.

use async_trait::async_trait;
use serde_json::Value;

use wayforge_core::config::schema::ConfirmConfig;

use crate::bash_safety::is_safe_bash_command;
use crate::trust::TrustStore;
use crate::types::ToolCall;

const WRITE_TOOLS: &[&str] = &["write_file", "edit_file", "delete_file"];
const READ_TOOLS: &[&str] = &["read_file", "glob", "list_files", "grep"];

/// The five-way decision set a confirmation prompt can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Yes,
    No,
    /// Suppress future prompts for this tool within the current project.
    TrustProject,
    /// Suppress future prompts for this tool across all projects.
    TrustGlobal,
    /// Cancel the entire in-flight tool batch.
    Abort,
}

impl ConfirmationDecision {
    /// Case-insensitive, whitespace-trimmed parse of a free-text response.
    /// Single-letter forms `y/n/t/!` map to `yes/no/trust_project/
    /// trust_global`. Anything unrecognized defaults to `No` (fail-closed
    /// for a confirmation prompt — an unparsed answer must never be
    /// treated as consent).
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Self::Yes,
            "n" | "no" => Self::No,
            "t" | "trust_project" | "trust-project" => Self::TrustProject,
            "!" | "trust_global" | "trust-global" => Self::TrustGlobal,
            "abort" => Self::Abort,
            _ => Self::No,
        }
    }
}

/// What the user is shown before answering.
#[derive(Debug, Clone)]
pub struct ConfirmationPreview {
    pub tool_name: String,
    /// "create" vs "modify" for file writes, a coloured-diff summary for
    /// edits, or a head-truncated command for shell execution.
    pub label: String,
    pub detail: String,
}

const COMMAND_PREVIEW_MAX: usize = 200;

impl ConfirmationPreview {
    fn for_call(call: &ToolCall) -> Self {
        match call.name.as_str() {
            "write_file" => {
                let path = call.input.get("path").and_then(Value::as_str).unwrap_or("<unknown>");
                let exists = call.input.get("path").and_then(Value::as_str).map(|p| std::path::Path::new(p).exists()).unwrap_or(false);
                let label = if exists { "modify" } else { "create" };
                Self { tool_name: call.name.clone(), label: label.to_string(), detail: path.to_string() }
            }
            "edit_file" => {
                let path = call.input.get("path").and_then(Value::as_str).unwrap_or("<unknown>");
                Self { tool_name: call.name.clone(), label: "modify".to_string(), detail: path.to_string() }
            }
            "delete_file" => {
                let path = call.input.get("path").and_then(Value::as_str).unwrap_or("<unknown>");
                Self { tool_name: call.name.clone(), label: "delete".to_string(), detail: path.to_string() }
            }
            "bash_exec" => {
                let command = call.input.get("command").and_then(Value::as_str).unwrap_or("");
                let truncated = if command.len() > COMMAND_PREVIEW_MAX {
                    format!("{}…", &command[..COMMAND_PREVIEW_MAX])
                } else {
                    command.to_string()
                };
                Self { tool_name: call.name.clone(), label: "run".to_string(), detail: truncated }
            }
            other => Self { tool_name: other.to_string(), label: "run".to_string(), detail: String::new() },
        }
    }
}

/// Injected user-interaction sink: a single-line prompt with free-text
/// response. Implementations must surface SIGINT / stream-close as
/// `ConfirmationDecision::Abort`.
#[async_trait]
pub trait UserInteractionSink: Send + Sync {
    async fn prompt(&self, preview: &ConfirmationPreview) -> ConfirmationDecision;
}

/// `requires_confirmation(tool_name, input) -> bool`. Free function
/// so callers can classify a call without constructing a gate.
pub fn requires_confirmation(tool_name: &str, input: &Value, extra_confirm: &[String]) -> bool {
    if extra_confirm.iter().any(|t| t == tool_name) {
        return true;
    }
    if WRITE_TOOLS.contains(&tool_name) {
        return true;
    }
    if READ_TOOLS.contains(&tool_name) {
        return false;
    }
    if tool_name == "bash_exec" {
        let command = input.get("command").and_then(Value::as_str).unwrap_or("");
        return !is_safe_bash_command(command);
    }
    // Unknown tool names never require confirmation: the executor
    // is otherwise responsible for safety.
    false
}

pub struct ConfirmationGate {
    config: ConfirmConfig,
    project_trust: TrustStore,
    global_trust: TrustStore,
    sink: Box<dyn UserInteractionSink>,
}

impl ConfirmationGate {
    pub fn new(config: ConfirmConfig, project_trust: TrustStore, global_trust: TrustStore, sink: Box<dyn UserInteractionSink>) -> Self {
        Self { config, project_trust, global_trust, sink }
    }

    pub fn requires_confirmation(&self, call: &ToolCall) -> bool {
        requires_confirmation(&call.name, &call.input, &self.config.extra_confirm)
    }

    /// Resolve a single tool call to a decision, consulting trust stores
    /// before prompting and persisting new trust decisions as they're made.
    pub async fn confirm(&mut self, call: &ToolCall) -> ConfirmationDecision {
        if !self.requires_confirmation(call) {
            return ConfirmationDecision::Yes;
        }
        if self.project_trust.is_trusted(&call.name) || self.global_trust.is_trusted(&call.name) {
            return ConfirmationDecision::Yes;
        }

        let preview = ConfirmationPreview::for_call(call);
        let decision = self.sink.prompt(&preview).await;

        match decision {
            ConfirmationDecision::TrustProject => {
                let _ = self.project_trust.trust(&call.name);
            }
            ConfirmationDecision::TrustGlobal => {
                let _ = self.global_trust.trust(&call.name);
            }
            _ => {}
        }
        decision
    }
}
