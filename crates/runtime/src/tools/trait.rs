//! Tool host trait.

use crate::model::{ToolCall, ToolSpec};
use crate::tools::ToolError;
use std::future::Future;

/// Trait for tool execution hosts.
///
/// Implementations provide tool specifications and execute tool calls.
/// This is the boundary between the model loop and side effects. Guardrail
/// checks happen before `execute` is reached.
pub trait ToolHost: Send + Sync + 'static {
    /// Get available tool specifications. An unreachable host yields none.
    fn specs(&self) -> impl Future<Output = Vec<ToolSpec>> + Send;

    /// Execute a tool call, returning its textual output.
    fn execute(&self, call: &ToolCall) -> impl Future<Output = Result<String, ToolError>> + Send;
}
