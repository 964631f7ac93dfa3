//! MCP-backed tool host.

use crate::model::{ToolCall, ToolSpec};
use crate::tools::{ToolError, ToolHost};
use mcp::ToolServerConnector;

impl ToolHost for ToolServerConnector {
    async fn specs(&self) -> Vec<ToolSpec> {
        self.list_tools()
            .await
            .into_iter()
            .map(ToolSpec::from)
            .collect()
    }

    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        self.try_call_tool(&call.name, &call.input)
            .await
            .map_err(|e| match e {
                mcp::Error::Timeout(after) => ToolError::Timeout(after),
                other => ToolError::Execution(format!("Error calling tool '{}': {other}", call.name)),
            })
    }
}
