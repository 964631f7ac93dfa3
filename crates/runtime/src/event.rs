//! Turn events delivered to the caller.

use crate::model::Usage;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use storage::ConfirmationToken;
use tokio::sync::mpsc;

/// Events emitted while a turn runs, in order.
///
/// Every stream ends with exactly one terminal event: `StreamComplete`,
/// `StreamError` or `ConfirmationRequired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The turn has started producing output.
    StreamMessageStart,

    /// Partial text from the model.
    StreamChunk { delta: String },

    /// The model opened a tool call.
    ToolCallStart { id: String, name: String },

    /// A tool call finished. `preview` may be truncated; the model sees the
    /// full output.
    ToolResult {
        id: String,
        name: String,
        preview: String,
        is_error: bool,
        confirmed: bool,
    },

    /// A tool call was refused by the guardrail.
    ToolBlocked {
        id: String,
        name: String,
        reason: String,
    },

    /// A tool call needs human approval. The turn is suspended under `token`.
    ConfirmationRequired {
        token: ConfirmationToken,
        id: String,
        name: String,
        arguments: Value,
        risk: guardrail::RiskLevel,
        description: String,
    },

    /// The turn failed.
    StreamError { error: String },

    /// The round ceiling was hit. Followed by `StreamComplete`.
    RoundLimitReached { rounds: usize },

    /// The turn is done.
    StreamComplete { usage: Usage },
}

impl TurnEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StreamMessageStart => "stream_message_start",
            Self::StreamChunk { .. } => "stream_chunk",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolBlocked { .. } => "tool_blocked",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::StreamError { .. } => "stream_error",
            Self::RoundLimitReached { .. } => "round_limit_reached",
            Self::StreamComplete { .. } => "stream_complete",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamComplete { .. } | Self::StreamError { .. } | Self::ConfirmationRequired { .. }
        )
    }
}

/// Ordered events of one turn.
pub struct EventStream {
    turn_id: String,
    rx: mpsc::Receiver<TurnEvent>,
}

impl EventStream {
    pub(crate) fn new(turn_id: String, rx: mpsc::Receiver<TurnEvent>) -> Self {
        Self { turn_id, rx }
    }

    /// The turn these events belong to.
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// Wait for the next event. `None` once the turn has ended.
    pub async fn next(&mut self) -> Option<TurnEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to its end.
    pub async fn collect_events(mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("turn_id", &self.turn_id)
            .finish_non_exhaustive()
    }
}

/// The caller dropped its [`EventStream`].
#[derive(Debug)]
pub(crate) struct Detached;

/// Sending half used by the loop.
#[derive(Clone)]
pub(crate) struct Emitter {
    tx: mpsc::Sender<TurnEvent>,
}

impl Emitter {
    pub(crate) fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx }
    }

    pub(crate) async fn emit(&self, event: TurnEvent) -> Result<(), Detached> {
        self.tx.send(event).await.map_err(|_| Detached)
    }
}
