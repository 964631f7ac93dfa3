//! A single stdio connection to an MCP server process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams,
    ListToolsResult, RequestId, Tool,
};

/// Default bound on one full exchange with a server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum size of a single response line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Upper bound on tools/list pages followed for one listing.
const MAX_LIST_PAGES: usize = 32;

/// How to launch an MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            args,
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A live, initialized connection. The child process is killed when the
/// connection is dropped.
pub struct Connection {
    name: String,
    process: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicI64,
    read_timeout: Duration,
    server_info: Option<InitializeResult>,
}

impl Connection {
    /// Spawn the server process and perform the initialize handshake.
    pub async fn open(config: &ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        let mut connection = Self {
            name: config.name.clone(),
            process: Mutex::new(process),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicI64::new(1),
            read_timeout: config.timeout,
            server_info: None,
        };

        connection.initialize().await?;
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server info from the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    async fn initialize(&mut self) -> Result<()> {
        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        self.notify("notifications/initialized").await?;

        tracing::debug!(
            server = %self.name,
            remote = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP handshake complete"
        );
        self.server_info = Some(result);
        Ok(())
    }

    /// Fetch the full tool catalog, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut params = ListToolsParams::default();

        for _ in 0..MAX_LIST_PAGES {
            let page: ListToolsResult = self.request("tools/list", Some(&params)).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(cursor) => params.cursor = Some(cursor),
                None => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool by name. A result flagged `isError` is returned as
    /// [`Error::ToolCallFailed`].
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }

        Ok(result)
    }

    /// Kill the server process.
    pub async fn close(&self) {
        let mut process = self.process.lock().await;
        if let Err(e) = process.kill().await {
            tracing::debug!(server = %self.name, error = %e, "MCP server already gone");
        }
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }

        self.write_line(&serde_json::to_string(&request)?).await?;

        let response = timeout(self.read_timeout, self.read_response(&id))
            .await
            .map_err(|_| Error::Timeout(self.read_timeout))??;

        let result_value = response.into_result()?;
        Ok(serde_json::from_value(result_value)?)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcNotification::new(method);
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn write_line(&self, json: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read lines until the response to `id` arrives. Notifications are
    /// skipped; requests from the server are refused as unsupported.
    async fn read_response(&self, id: &RequestId) -> Result<JsonRpcResponse> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(Error::ServerExited);
            }

            if line.len() > MAX_OUTPUT_SIZE {
                return Err(Error::OutputTooLarge {
                    size: line.len(),
                    max: MAX_OUTPUT_SIZE,
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = serde_json::from_str(trimmed)?;
            if let Some(method) = message.get("method").and_then(Value::as_str) {
                if let Some(request_id) = message
                    .get("id")
                    .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok())
                {
                    tracing::debug!(server = %self.name, method, "refusing server request");
                    let reply =
                        JsonRpcErrorReply::new(request_id, JsonRpcError::method_not_found(method));
                    self.write_line(&serde_json::to_string(&reply)?).await?;
                    continue;
                }
            }

            let is_response = message.get("id").is_some()
                && (message.get("result").is_some() || message.get("error").is_some());
            if !is_response {
                tracing::trace!(server = %self.name, "skipping server message: {trimmed}");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(message)?;
            if &response.id != id {
                return Err(Error::InvalidResponse(format!(
                    "response ID mismatch: expected {id:?}, got {:?}",
                    response.id
                )));
            }
            return Ok(response);
        }
    }
}
