//! Empty tool host implementation.

use crate::model::{ToolCall, ToolSpec};
use crate::tools::{ToolError, ToolHost};

/// A tool host with no tool server behind it.
///
/// Offers no tools and refuses every call, so a model that invents a tool
/// call still gets an error result back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyToolHost;

impl ToolHost for EmptyToolHost {
    async fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn execute(&self, _call: &ToolCall) -> Result<String, ToolError> {
        Err(ToolError::NotConnected)
    }
}
