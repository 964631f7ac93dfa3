//! LLM protocol types and backend trait.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{
    Backend, BlockKind, Message, ModelConfig, ModelEvent, ModelRequest, ModelStream, Part, Role,
    StopReason, ToolCall, ToolResult, ToolSpec, Usage,
};
