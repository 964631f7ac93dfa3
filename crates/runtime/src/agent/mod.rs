//! The streaming tool loop.
//!
//! [`Agent::run`] drives one turn on a spawned task: it streams the model's
//! reply, checks each requested tool call against the [`Guardrail`], runs
//! the allowed ones and feeds the results back, for at most
//! [`MAX_ROUNDS`] rounds. A call that needs human approval suspends the turn
//! into the [`PendingStore`]; [`Agent::resume`] or [`Agent::cancel`] settles
//! it later, possibly from another process.

mod driver;
mod pending;
mod reply;

use crate::Result;
use crate::event::{Emitter, EventStream};
use crate::model::{Backend, Message, ModelConfig, ToolSpec, Usage};
use crate::tools::{EmptyToolHost, ToolHost};
use driver::Driver;
use guardrail::Guardrail;
use pending::PendingOperation;
use std::sync::Arc;
use storage::{ConfirmationToken, PendingStore};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Most model rounds one turn may take.
pub const MAX_ROUNDS: usize = 10;
/// Characters of tool output shown in `ToolResult` events.
pub const PREVIEW_CHARS: usize = 2000;
const EVENT_BUFFER: usize = 64;

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct Turn {
    turn_id: String,
    transcript: Vec<Message>,
    system_prompt: String,
    tools: Option<Vec<ToolSpec>>,
    model: ModelConfig,
}

impl Turn {
    /// A turn over `transcript`, with a fresh id and default model settings.
    pub fn new(transcript: Vec<Message>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            transcript,
            system_prompt: String::new(),
            tools: None,
            model: ModelConfig::default(),
        }
    }

    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = turn_id.into();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Offer exactly these tools. Without this the tool host's catalog is
    /// used.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }
}

/// Result of [`Agent::resume`].
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The confirmed call runs; the turn continues on this stream.
    Resumed(EventStream),
    /// Unknown, expired, or already settled token.
    NotFound,
}

/// Result of [`Agent::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { turn_id: String, tool_name: String },
    NotFound,
}

/// Runs turns against a model backend and a tool host.
pub struct Agent<B, T = EmptyToolHost> {
    backend: Arc<B>,
    tools: Arc<T>,
    guardrail: Arc<Guardrail>,
    store: Arc<PendingStore>,
    max_rounds: usize,
}

impl<B> Agent<B, EmptyToolHost>
where
    B: Backend + 'static,
{
    /// An agent with no tool server and the default guardrail rules.
    pub fn new(backend: B, store: PendingStore) -> Self {
        Self {
            backend: Arc::new(backend),
            tools: Arc::new(EmptyToolHost),
            guardrail: Arc::new(Guardrail::default()),
            store: Arc::new(store),
            max_rounds: MAX_ROUNDS,
        }
    }
}

impl<B, T> Agent<B, T>
where
    B: Backend + 'static,
    T: ToolHost,
{
    /// Use `tools` to list and execute tools.
    pub fn with_tools<U: ToolHost>(self, tools: Arc<U>) -> Agent<B, U> {
        Agent {
            backend: self.backend,
            tools,
            guardrail: self.guardrail,
            store: self.store,
            max_rounds: self.max_rounds,
        }
    }

    pub fn with_guardrail(mut self, guardrail: Guardrail) -> Self {
        self.guardrail = Arc::new(guardrail);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn guardrail(&self) -> &Guardrail {
        &self.guardrail
    }

    pub fn store(&self) -> &PendingStore {
        &self.store
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Start a turn. Must be called within a tokio runtime.
    ///
    /// Dropping the returned stream stops the turn at its next event.
    pub fn run(&self, turn: Turn) -> EventStream {
        let Turn {
            turn_id,
            transcript,
            system_prompt,
            tools,
            model,
        } = turn;

        let (driver, stream) = self.driver(turn_id, transcript, system_prompt, Vec::new(), model);
        let span = tracing::info_span!("turn", turn_id = %stream.turn_id());
        tokio::spawn(driver.start(tools).instrument(span));
        stream
    }

    /// Run a suspended call and continue its turn.
    ///
    /// The stored call is executed as approved, without being classified
    /// again. Each token resumes at most once; a token already resumed or
    /// cancelled yields [`ResumeOutcome::NotFound`].
    pub fn resume(&self, token: &ConfirmationToken) -> Result<ResumeOutcome> {
        let Some(mut op) = self.store.take::<PendingOperation>(token)? else {
            tracing::info!(%token, "no pending operation to resume");
            return Ok(ResumeOutcome::NotFound);
        };

        let transcript = std::mem::take(&mut op.transcript);
        let (driver, stream) = self.driver(
            op.turn_id.clone(),
            transcript,
            op.system_prompt.clone(),
            op.tool_catalog.clone(),
            op.model_config.clone(),
        );
        let span = tracing::info_span!("turn", turn_id = %stream.turn_id(), %token);
        tokio::spawn(driver.resume(op).instrument(span));
        Ok(ResumeOutcome::Resumed(stream))
    }

    /// Drop a suspended call without running it.
    pub fn cancel(&self, token: &ConfirmationToken) -> Result<CancelOutcome> {
        match self.store.take::<PendingOperation>(token)? {
            Some(op) => {
                tracing::info!(%token, turn_id = %op.turn_id, tool = %op.tool_name, "pending operation cancelled");
                Ok(CancelOutcome::Cancelled {
                    turn_id: op.turn_id,
                    tool_name: op.tool_name,
                })
            }
            None => {
                tracing::info!(%token, "no pending operation to cancel");
                Ok(CancelOutcome::NotFound)
            }
        }
    }

    fn driver(
        &self,
        turn_id: String,
        transcript: Vec<Message>,
        system_prompt: String,
        catalog: Vec<ToolSpec>,
        model: ModelConfig,
    ) -> (Driver<B, T>, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let driver = Driver {
            backend: Arc::clone(&self.backend),
            tools: Arc::clone(&self.tools),
            guardrail: Arc::clone(&self.guardrail),
            store: Arc::clone(&self.store),
            max_rounds: self.max_rounds,
            emitter: Emitter::new(tx),
            turn_id: turn_id.clone(),
            system_prompt,
            catalog,
            model,
            transcript,
            usage: Usage::default(),
        };
        (driver, EventStream::new(turn_id, rx))
    }
}

impl<B, T> Clone for Agent<B, T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            tools: Arc::clone(&self.tools),
            guardrail: Arc::clone(&self.guardrail),
            store: Arc::clone(&self.store),
            max_rounds: self.max_rounds,
        }
    }
}
