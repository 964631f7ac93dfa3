//! The record parked in the store while a turn awaits confirmation.

use crate::model::{Message, ModelConfig, ToolCall, ToolResult, ToolSpec};
use guardrail::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::ConfirmationToken;

/// Everything needed to continue a suspended turn in another invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingOperation {
    pub token: ConfirmationToken,
    pub turn_id: String,
    /// Transcript up to and including the assistant message that made the
    /// gated call.
    pub transcript: Vec<Message>,
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_arguments: Value,
    pub system_prompt: String,
    pub tool_catalog: Vec<ToolSpec>,
    pub model_config: ModelConfig,
    pub risk: RiskLevel,
    pub description: String,
    /// Results of calls earlier in the same batch.
    #[serde(default)]
    pub completed_results: Vec<ToolResult>,
    /// Calls later in the batch, never executed.
    #[serde(default)]
    pub skipped_calls: Vec<ToolCall>,
}

impl PendingOperation {
    pub fn call(&self) -> ToolCall {
        ToolCall {
            id: self.tool_use_id.clone(),
            name: self.tool_name.clone(),
            input: self.tool_arguments.clone(),
        }
    }

    /// The user message answering the suspended batch, in call order.
    pub fn answer(&self, confirmed: ToolResult) -> Message {
        let mut results = self.completed_results.clone();
        results.push(confirmed);
        results.extend(self.skipped_calls.iter().map(|call| {
            ToolResult::error(
                &call.id,
                format!(
                    "Skipped: '{}' was not run because an earlier call needed confirmation",
                    call.name
                ),
            )
        }));
        Message::tool_results(results)
    }
}
