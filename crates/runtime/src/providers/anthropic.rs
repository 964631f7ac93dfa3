//! Anthropic API backend.

use super::sse::SseDecoder;
use crate::model::{
    Backend, BlockKind, Message, ModelError, ModelEvent, ModelRequest, ModelStream, Part, Role,
    StopReason, ToolSpec, Usage,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const STREAM_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiStreamEvent {
    MessageStart {
        message: ApiMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ApiBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ApiDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: ApiMessageDelta,
        #[serde(default)]
        usage: ApiUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorBody,
    },
}

#[derive(Debug, Deserialize)]
struct ApiMessageStart {
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlockStart {
    Text {},
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    api_key: String,
    base_url: String,
}

impl AnthropicBackendBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the backend at a different host, e.g. a proxy.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            base_url: self.base_url,
        }
    }
}

/// Streaming backend for the Anthropic Messages API.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicBackend {
    pub fn builder(api_key: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(api_key)
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn message_to_api(msg: &Message) -> ApiMessage {
        let role = Self::role_to_api(msg.role);

        // Simple case: single text part
        if let [Part::Text { text }] = msg.parts.as_slice() {
            return ApiMessage {
                role,
                content: ApiContent::Text(text.clone()),
            };
        }

        let blocks = msg
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => ApiContentBlock::Text { text: text.clone() },
                Part::ToolUse(call) => ApiContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                },
                Part::ToolResult(result) => ApiContentBlock::ToolResult {
                    tool_use_id: result.tool_use_id.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                },
            })
            .collect();

        ApiMessage {
            role,
            content: ApiContent::Blocks(blocks),
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool<'_> {
        ApiTool {
            name: &spec.name,
            description: &spec.description,
            input_schema: &spec.input_schema,
        }
    }

    fn build_request<'a>(request: &ModelRequest<'a>) -> ApiRequest<'a> {
        ApiRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            messages: request.messages.iter().map(Self::message_to_api).collect(),
            system: request.system,
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
            stream: true,
        }
    }

    /// Translate one wire event. `Ok(None)` means the event carries nothing
    /// the loop needs.
    fn translate(event: ApiStreamEvent) -> Result<Option<ModelEvent>, ModelError> {
        let event = match event {
            ApiStreamEvent::MessageStart { message } => ModelEvent::MessageDelta {
                stop_reason: None,
                usage: message.usage.into(),
            },
            ApiStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = match content_block {
                    ApiBlockStart::Text {} => BlockKind::Text,
                    ApiBlockStart::ToolUse { id, name } => BlockKind::ToolUse { id, name },
                    ApiBlockStart::Unknown => return Ok(None),
                };
                ModelEvent::BlockStart { index, block }
            }
            ApiStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ApiDelta::TextDelta { text } => ModelEvent::TextDelta { index, text },
                ApiDelta::InputJsonDelta { partial_json } => {
                    ModelEvent::InputJsonDelta {
                        index,
                        partial_json,
                    }
                }
                ApiDelta::Unknown => return Ok(None),
            },
            ApiStreamEvent::ContentBlockStop { index } => ModelEvent::BlockStop { index },
            ApiStreamEvent::MessageDelta { delta, usage } => ModelEvent::MessageDelta {
                stop_reason: delta.stop_reason.as_deref().map(StopReason::parse),
                usage: usage.into(),
            },
            ApiStreamEvent::MessageStop => ModelEvent::MessageStop,
            ApiStreamEvent::Ping => return Ok(None),
            ApiStreamEvent::Error { error } => {
                return Err(ModelError::Api(format!("{}: {}", error.kind, error.message)));
            }
        };
        Ok(Some(event))
    }

    /// Pump the response body into `tx` until `message_stop`, an error, or
    /// the receiver going away.
    async fn pump(
        response: reqwest::Response,
        tx: mpsc::Sender<Result<ModelEvent, ModelError>>,
    ) {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx
                        .send(Err(ModelError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            for data in decoder.push(&chunk) {
                let result = serde_json::from_str::<ApiStreamEvent>(&data)
                    .map_err(|e| ModelError::InvalidResponse(format!("{e}: {data}")))
                    .and_then(Self::translate);

                let done = matches!(result, Ok(Some(ModelEvent::MessageStop)) | Err(_));
                match result {
                    Ok(None) => continue,
                    Ok(Some(event)) => {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                if done {
                    return;
                }
            }
        }

        let reason = if decoder.has_remainder() {
            "response ended mid-event"
        } else {
            "response ended before message_stop"
        };
        let _ = tx
            .send(Err(ModelError::StreamInterrupted(reason.to_string())))
            .await;
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.base_url)
    }
}

impl Backend for AnthropicBackend {
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ModelStream, ModelError> {
        let api_request = Self::build_request(&request);

        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending model request"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(Self::pump(response, tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolCall, ToolResult};
    use serde_json::json;

    fn parse(data: &str) -> Result<Option<ModelEvent>, ModelError> {
        AnthropicBackend::translate(serde_json::from_str(data).unwrap())
    }

    #[test]
    fn request_carries_history_tools_and_stream_flag() {
        let messages = vec![
            Message::user("close the app"),
            Message {
                role: Role::Assistant,
                parts: vec![
                    Part::text("Closing."),
                    Part::ToolUse(ToolCall {
                        id: "toolu_1".into(),
                        name: "close_app".into(),
                        input: json!({}),
                    }),
                ],
            },
            Message::tool_results(vec![ToolResult::error("toolu_1", "denied")]),
        ];
        let tools = vec![ToolSpec {
            name: "close_app".into(),
            description: "Close the app".into(),
            input_schema: json!({"type": "object"}),
        }];
        let request = ModelRequest {
            model: "claude-sonnet-4-20250514",
            max_tokens: 1024,
            system: "be brief",
            messages: &messages,
            tools: &tools,
        };

        let body = serde_json::to_value(AnthropicBackend::build_request(&request)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["content"], "close the app");
        assert_eq!(body["messages"][1]["content"][1]["type"], "tool_use");
        assert_eq!(body["messages"][2]["role"], "user");
        assert_eq!(body["messages"][2]["content"][0]["type"], "tool_result");
        assert_eq!(body["messages"][2]["content"][0]["is_error"], true);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn empty_system_and_tools_are_omitted() {
        let messages = vec![Message::user("hi")];
        let request = ModelRequest {
            model: "m",
            max_tokens: 16,
            system: "",
            messages: &messages,
            tools: &[],
        };
        let body = serde_json::to_value(AnthropicBackend::build_request(&request)).unwrap();
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn translates_tool_use_events() {
        let start = parse(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"count","input":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            start,
            Some(ModelEvent::BlockStart {
                index: 1,
                block: BlockKind::ToolUse {
                    id: "toolu_1".into(),
                    name: "count".into()
                }
            })
        );

        let delta = parse(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        )
        .unwrap();
        assert_eq!(
            delta,
            Some(ModelEvent::InputJsonDelta {
                index: 1,
                partial_json: "{\"a\":".into()
            })
        );
    }

    #[test]
    fn translates_message_delta_with_stop_reason() {
        let event = parse(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":42}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(ModelEvent::MessageDelta {
                stop_reason: Some(StopReason::ToolUse),
                usage: Usage {
                    input_tokens: 0,
                    output_tokens: 42
                }
            })
        );
    }

    #[test]
    fn ping_is_ignored_and_error_is_surfaced() {
        assert_eq!(parse(r#"{"type":"ping"}"#).unwrap(), None);

        let err = parse(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Api(msg) if msg.contains("Overloaded")));
    }

    #[test]
    fn display_names_host() {
        let backend = AnthropicBackend::builder("key")
            .base_url("http://localhost:8080/")
            .build();
        assert_eq!(backend.to_string(), "anthropic(http://localhost:8080)");
    }
}
