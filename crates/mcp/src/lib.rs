//! MCP (Model Context Protocol) client library.
//!
//! Talks newline-delimited JSON-RPC to a tool server over stdio. The
//! [`ToolServerConnector`] opens a fresh connection for every operation so a
//! crashed server only affects the call in flight.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ServerConfig, ToolServerConnector};
//!
//! # async fn example() {
//! let config = ServerConfig::new("mcp-datasets", vec!["--stdio".to_string()]);
//! let connector = ToolServerConnector::new(config);
//!
//! for tool in connector.list_tools().await {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let output = connector
//!     .call_tool("list_datasets", &serde_json::json!({}))
//!     .await;
//! println!("{output}");
//! # }
//! ```

mod connection;
mod connector;
mod error;
mod protocol;

pub use connection::{Connection, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, ServerConfig};
pub use connector::ToolServerConnector;
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, EmbeddedResource, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    NO_OUTPUT, PROTOCOL_VERSION, RequestId, ServerInfo, Tool, ToolContent, ToolDescriptor,
};
