//! Coxswain runtime: the streaming tool loop and its model backend.
//!
//! # Overview
//!
//! - **Agent**: runs a turn as a stream of [`TurnEvent`]s, alternating model
//!   rounds and tool calls, and suspends calls that need approval.
//! - **Backend**: a trait abstracting streaming LLM providers
//!   ([`AnthropicBackend`]).
//! - **ToolHost**: a trait for listing and executing tools, implemented by
//!   [`mcp::ToolServerConnector`].
//!
//! # Example
//!
//! ```no_run
//! use runtime::{Agent, AnthropicBackend, Message, Turn, TurnEvent};
//! use storage::PendingStore;
//!
//! # async fn example() -> runtime::Result<()> {
//! let backend = AnthropicBackend::builder("sk-ant-api01-...").build();
//! let agent = Agent::new(backend, PendingStore::in_memory()?);
//!
//! let mut events = agent.run(Turn::new(vec![Message::user("Hello!")]));
//! while let Some(event) = events.next().await {
//!     if let TurnEvent::StreamChunk { delta } = event {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod credentials;
mod error;
mod event;
pub mod model;
pub mod prompt;
mod providers;
pub mod tools;

pub use agent::{Agent, CancelOutcome, MAX_ROUNDS, PREVIEW_CHARS, ResumeOutcome, Turn};
pub use credentials::{SecretStore, resolve_api_key};
pub use error::{Error, Result};
pub use event::{EventStream, TurnEvent};
pub use model::{
    Backend, BlockKind, Message, ModelConfig, ModelError, ModelEvent, ModelRequest, ModelStream,
    Part, Role, StopReason, ToolCall, ToolResult, ToolSpec, Usage,
};
pub use prompt::{DatasetContext, Skill, SystemPrompt};
pub use providers::{AnthropicBackend, AnthropicBackendBuilder, DEFAULT_BASE_URL};
pub use tools::{EmptyToolHost, ToolError, ToolHost};
