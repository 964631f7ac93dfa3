//! Ephemeral, failure-isolated access to one tool server.
//!
//! Every operation launches the server, performs the handshake, does its
//! work and kills the process. The exchange runs on a dedicated worker
//! thread with its own single-threaded runtime, so it never shares
//! scheduling state with the caller, and it is bounded by the configured
//! timeout.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{OnceCell, oneshot};
use tokio::time::timeout;

use crate::connection::{Connection, ServerConfig};
use crate::error::{Error, Result};
use crate::protocol::ToolDescriptor;

/// Client for one external tool-providing process.
pub struct ToolServerConnector {
    config: ServerConfig,
    catalog: OnceCell<Vec<ToolDescriptor>>,
}

impl ToolServerConnector {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            catalog: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The server's tool catalog.
    ///
    /// Cached for the lifetime of this connector once a listing succeeds.
    /// Any failure is logged and yields an empty catalog.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        match self.catalog.get_or_try_init(|| self.fetch_catalog()).await {
            Ok(tools) => tools.clone(),
            Err(e) => {
                tracing::warn!(server = %self.config.name, error = %e, "failed to list tools");
                Vec::new()
            }
        }
    }

    /// Call a tool and return its text output.
    ///
    /// Never fails: errors come back as a textual message.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> String {
        match self.try_call_tool(name, arguments).await {
            Ok(text) => text,
            Err(e) => format!("Error calling tool '{name}': {e}"),
        }
    }

    /// Call a tool, surfacing failures as errors.
    pub async fn try_call_tool(&self, name: &str, arguments: &Value) -> Result<String> {
        let tool = name.to_string();
        let arguments = match arguments {
            Value::Null => None,
            other => Some(other.clone()),
        };

        tracing::debug!(server = %self.config.name, tool = %name, "calling tool");
        let result = self
            .exchange(move |conn| async move { conn.call_tool(&tool, arguments).await })
            .await;

        match result {
            Ok(output) => Ok(output.text()),
            Err(e) => {
                tracing::warn!(server = %self.config.name, tool = %name, error = %e, "tool call failed");
                Err(e)
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .exchange(|conn| async move { conn.list_tools().await })
            .await?;
        tracing::info!(server = %self.config.name, count = tools.len(), "loaded tool catalog");
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    /// Run `op` against a fresh connection on the worker thread.
    async fn exchange<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Connection>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config.clone();
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("mcp-{}", config.name))
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(bounded_exchange(&config, op)),
                    Err(e) => Err(Error::Worker(e.to_string())),
                };
                // The caller may have gone away; nothing to report to.
                let _ = tx.send(result);
            })
            .map_err(|e| Error::Worker(e.to_string()))?;

        rx.await
            .map_err(|_| Error::Worker("worker exited without a result".into()))?
    }
}

async fn bounded_exchange<T, F, Fut>(config: &ServerConfig, op: F) -> Result<T>
where
    F: FnOnce(Arc<Connection>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let exchange = async {
        let connection = Arc::new(Connection::open(config).await?);
        let result = op(Arc::clone(&connection)).await;
        connection.close().await;
        result
    };

    timeout(config.timeout, exchange)
        .await
        .map_err(|_| Error::Timeout(config.timeout))?
}
