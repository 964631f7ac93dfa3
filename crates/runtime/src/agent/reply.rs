//! Assembly of one streamed model reply.

use crate::event::TurnEvent;
use crate::model::{
    BlockKind, Message, ModelError, ModelEvent, Part, Role, StopReason, ToolCall, Usage,
};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug)]
enum Block {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

/// A fully received model reply.
#[derive(Debug)]
pub(super) struct Reply {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Accumulates [`ModelEvent`]s into a [`Reply`], keyed by block index.
#[derive(Debug, Default)]
pub(super) struct ReplyBuilder {
    blocks: BTreeMap<usize, Block>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    stopped: bool,
}

impl ReplyBuilder {
    /// Apply one model event, returning the caller-facing event it maps to.
    pub fn apply(&mut self, event: ModelEvent) -> Option<TurnEvent> {
        match event {
            ModelEvent::BlockStart { index, block } => match block {
                BlockKind::Text => {
                    self.blocks.insert(index, Block::Text(String::new()));
                    None
                }
                BlockKind::ToolUse { id, name } => {
                    self.blocks.insert(
                        index,
                        Block::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            json: String::new(),
                        },
                    );
                    Some(TurnEvent::ToolCallStart { id, name })
                }
            },
            ModelEvent::TextDelta { index, text } => {
                match self
                    .blocks
                    .entry(index)
                    .or_insert_with(|| Block::Text(String::new()))
                {
                    Block::Text(buf) => buf.push_str(&text),
                    Block::ToolUse { .. } => {
                        tracing::debug!(index, "text delta for tool block ignored");
                        return None;
                    }
                }
                Some(TurnEvent::StreamChunk { delta: text })
            }
            ModelEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(Block::ToolUse { json, .. }) = self.blocks.get_mut(&index) {
                    json.push_str(&partial_json);
                }
                None
            }
            ModelEvent::BlockStop { .. } => None,
            ModelEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                // Figures are cumulative within one message.
                self.usage.input_tokens = self.usage.input_tokens.max(usage.input_tokens);
                self.usage.output_tokens = self.usage.output_tokens.max(usage.output_tokens);
                None
            }
            ModelEvent::MessageStop => {
                self.stopped = true;
                None
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Finish the reply. Tool inputs are parsed here; empty input means `{}`.
    pub fn finish(self) -> Result<Reply, ModelError> {
        if !self.stopped {
            return Err(ModelError::StreamInterrupted(
                "model stream closed before message_stop".into(),
            ));
        }

        let mut parts = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.into_values() {
            match block {
                Block::Text(text) if text.is_empty() => {}
                Block::Text(text) => parts.push(Part::Text { text }),
                Block::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&json).map_err(|e| {
                            ModelError::InvalidResponse(format!("tool '{name}' input: {e}"))
                        })?
                    };
                    parts.push(Part::ToolUse(ToolCall { id, name, input }));
                }
            }
        }

        Ok(Reply {
            message: Message {
                role: Role::Assistant,
                parts,
            },
            stop_reason: self.stop_reason.unwrap_or_default(),
            usage: self.usage,
        })
    }
}
