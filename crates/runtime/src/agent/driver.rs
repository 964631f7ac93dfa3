//! The round loop behind one event stream.

use super::pending::PendingOperation;
use super::reply::{Reply, ReplyBuilder};
use super::PREVIEW_CHARS;
use crate::event::{Detached, Emitter, TurnEvent};
use crate::model::{
    Backend, Message, ModelConfig, ModelError, ModelRequest, StopReason, ToolCall, ToolResult,
    ToolSpec, Usage,
};
use crate::tools::ToolHost;
use guardrail::{Decision, Guardrail};
use std::sync::Arc;
use storage::{ConfirmationToken, PendingStore};

/// Why a round ended without a reply.
enum RoundError {
    Model(ModelError),
    Detached,
}

impl From<Detached> for RoundError {
    fn from(_: Detached) -> Self {
        Self::Detached
    }
}

/// Outcome of executing one batch of tool calls.
enum Batch {
    Completed(Vec<ToolResult>),
    Suspended,
}

pub(super) struct Driver<B, T> {
    pub backend: Arc<B>,
    pub tools: Arc<T>,
    pub guardrail: Arc<Guardrail>,
    pub store: Arc<PendingStore>,
    pub max_rounds: usize,
    pub emitter: Emitter,
    pub turn_id: String,
    pub system_prompt: String,
    pub catalog: Vec<ToolSpec>,
    pub model: ModelConfig,
    pub transcript: Vec<Message>,
    pub usage: Usage,
}

impl<B, T> Driver<B, T>
where
    B: Backend + 'static,
    T: ToolHost,
{
    /// Run a fresh turn. `catalog` of `None` asks the tool host.
    pub async fn start(mut self, catalog: Option<Vec<ToolSpec>>) {
        self.catalog = match catalog {
            Some(catalog) => catalog,
            None => self.tools.specs().await,
        };
        if self.emitter.emit(TurnEvent::StreamMessageStart).await.is_err() {
            return;
        }
        let outcome = self.rounds().await;
        self.finish(outcome);
    }

    /// Continue a suspended turn with its confirmed call.
    pub async fn resume(mut self, op: PendingOperation) {
        let outcome = self.continue_with(op).await;
        self.finish(outcome);
    }

    /// The token is already consumed, so the confirmed call runs before
    /// anything is emitted; a dropped stream cannot skip it.
    async fn continue_with(&mut self, op: PendingOperation) -> Result<(), Detached> {
        let call = op.call();
        tracing::info!(turn_id = %self.turn_id, token = %op.token, tool = %call.name, "running confirmed tool call");
        let result = self.invoke(&call).await;

        self.emitter.emit(TurnEvent::StreamMessageStart).await?;
        self.report(&call, &result, true).await?;
        self.transcript.push(op.answer(result));

        self.rounds().await
    }

    fn finish(&self, outcome: Result<(), Detached>) {
        if outcome.is_err() {
            tracing::info!(turn_id = %self.turn_id, "event stream dropped, stopping turn");
        }
    }

    async fn rounds(&mut self) -> Result<(), Detached> {
        for round in 1..=self.max_rounds {
            tracing::debug!(turn_id = %self.turn_id, round, "starting round");

            let reply = match self.stream_round().await {
                Ok(reply) => reply,
                Err(RoundError::Detached) => return Err(Detached),
                Err(RoundError::Model(e)) => {
                    tracing::warn!(turn_id = %self.turn_id, round, error = %e, "model stream failed");
                    return self
                        .emitter
                        .emit(TurnEvent::StreamError {
                            error: e.to_string(),
                        })
                        .await;
                }
            };

            self.usage.add(reply.usage);
            let calls = reply.message.tool_calls();
            if reply.stop_reason != StopReason::ToolUse || calls.is_empty() {
                tracing::debug!(turn_id = %self.turn_id, round, stop_reason = ?reply.stop_reason, "turn complete");
                if !reply.message.parts.is_empty() {
                    self.transcript.push(reply.message);
                }
                return self.complete().await;
            }

            self.transcript.push(reply.message);
            match self.run_tools(calls).await? {
                Batch::Completed(results) => self.transcript.push(Message::tool_results(results)),
                Batch::Suspended => return Ok(()),
            }
        }

        tracing::warn!(turn_id = %self.turn_id, rounds = self.max_rounds, "round ceiling reached");
        self.emitter
            .emit(TurnEvent::RoundLimitReached {
                rounds: self.max_rounds,
            })
            .await?;
        self.complete().await
    }

    async fn complete(&self) -> Result<(), Detached> {
        self.emitter
            .emit(TurnEvent::StreamComplete { usage: self.usage })
            .await
    }

    async fn stream_round(&self) -> Result<Reply, RoundError> {
        let request = ModelRequest {
            model: &self.model.model,
            max_tokens: self.model.max_tokens,
            system: &self.system_prompt,
            messages: &self.transcript,
            tools: &self.catalog,
        };
        let mut stream = self.backend.stream(request).await.map_err(RoundError::Model)?;

        let mut builder = ReplyBuilder::default();
        while let Some(event) = stream.recv().await {
            let event = event.map_err(RoundError::Model)?;
            if let Some(turn_event) = builder.apply(event) {
                self.emitter.emit(turn_event).await?;
            }
            if builder.is_stopped() {
                break;
            }
        }
        builder.finish().map_err(RoundError::Model)
    }

    async fn run_tools(&mut self, calls: Vec<ToolCall>) -> Result<Batch, Detached> {
        let mut results = Vec::with_capacity(calls.len());
        let mut calls = calls.into_iter();

        while let Some(call) = calls.next() {
            match self.guardrail.classify(&call.name, &call.input) {
                Decision::Allow => results.push(self.execute(&call).await?),
                Decision::Block { reason } => {
                    tracing::warn!(turn_id = %self.turn_id, tool = %call.name, %reason, "tool call blocked");
                    self.emitter
                        .emit(TurnEvent::ToolBlocked {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            reason: reason.clone(),
                        })
                        .await?;
                    results.push(ToolResult::error(call.id, reason));
                }
                Decision::Confirm { risk, reason } => {
                    let op = PendingOperation {
                        token: ConfirmationToken::new(),
                        turn_id: self.turn_id.clone(),
                        transcript: std::mem::take(&mut self.transcript),
                        tool_use_id: call.id,
                        tool_name: call.name,
                        tool_arguments: call.input,
                        system_prompt: self.system_prompt.clone(),
                        tool_catalog: self.catalog.clone(),
                        model_config: self.model.clone(),
                        risk,
                        description: reason,
                        completed_results: results,
                        skipped_calls: calls.collect(),
                    };
                    self.suspend(op).await?;
                    return Ok(Batch::Suspended);
                }
            }
        }

        Ok(Batch::Completed(results))
    }

    /// Park the turn and ask the caller for approval. The record is stored
    /// before the event goes out, so the token is always redeemable.
    async fn suspend(&self, op: PendingOperation) -> Result<(), Detached> {
        if let Err(e) = self.store.insert(op.token, &op.tool_name, &op) {
            tracing::error!(turn_id = %self.turn_id, tool = %op.tool_name, error = %e, "failed to store pending operation");
            return self
                .emitter
                .emit(TurnEvent::StreamError {
                    error: format!("failed to store pending operation: {e}"),
                })
                .await;
        }

        tracing::info!(
            turn_id = %self.turn_id,
            token = %op.token,
            tool = %op.tool_name,
            risk = %op.risk,
            "tool call awaiting confirmation"
        );
        let PendingOperation {
            token,
            tool_use_id,
            tool_name,
            tool_arguments,
            risk,
            description,
            ..
        } = op;
        self.emitter
            .emit(TurnEvent::ConfirmationRequired {
                token,
                id: tool_use_id,
                name: tool_name,
                arguments: tool_arguments,
                risk,
                description,
            })
            .await
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, Detached> {
        let result = self.invoke(call).await;
        self.report(call, &result, false).await?;
        Ok(result)
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        match self.tools.execute(call).await {
            Ok(output) => ToolResult::success(&call.id, output),
            Err(e) => {
                tracing::warn!(turn_id = %self.turn_id, tool = %call.name, error = %e, "tool call failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }

    async fn report(
        &self,
        call: &ToolCall,
        result: &ToolResult,
        confirmed: bool,
    ) -> Result<(), Detached> {
        self.emitter
            .emit(TurnEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                preview: preview(&result.content),
                is_error: result.is_error,
                confirmed,
            })
            .await
    }
}

/// The first [`PREVIEW_CHARS`] characters of a tool output.
pub(super) fn preview(output: &str) -> String {
    match output.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => output[..cut].to_string(),
        None => output.to_string(),
    }
}
