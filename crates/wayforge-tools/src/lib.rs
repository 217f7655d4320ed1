//! Tool registry, bounded-parallel executor, and confirmation gate (C5/C6).

pub mod bash_safety;
pub mod confirm;
pub mod executor;
pub mod registry;
pub mod trust;
pub mod types;

pub use confirm::{ConfirmationDecision, ConfirmationGate, ConfirmationPreview};
pub use executor::{execute_tool_calls, ExecuteOptions, ExecuteResult};
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
pub use trust::TrustStore;
pub use types::{ExecutedToolCall, ToolCall, ToolResult};
