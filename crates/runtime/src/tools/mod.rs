//! Tool hosting.
//!
//! A [`ToolHost`] lists the tools offered to the model and executes the
//! calls the loop lets through. The MCP-backed host is the production one;
//! [`EmptyToolHost`] stands in when no tool server is configured.

mod empty;
pub mod errors;
mod mcp_host;
mod r#trait;

pub use empty::EmptyToolHost;
pub use errors::ToolError;
pub use r#trait::ToolHost;
