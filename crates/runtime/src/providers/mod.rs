//! LLM provider adapters.
//!
//! Each provider implements the [`Backend`](crate::model::Backend) trait for
//! its specific API.

mod anthropic;
mod sse;

pub use anthropic::{AnthropicBackend, AnthropicBackendBuilder, DEFAULT_BASE_URL};
