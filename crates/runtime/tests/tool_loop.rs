//! Tool loop scenarios against scripted backends and tool hosts.

use runtime::{
    Agent, Backend, BlockKind, CancelOutcome, Message, ModelError, ModelEvent, ModelRequest,
    ModelStream, Part, ResumeOutcome, Role, StopReason, ToolCall, ToolError, ToolHost, ToolSpec,
    Turn, TurnEvent, Usage,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use storage::{ConfirmationToken, PendingStore};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted model
// ─────────────────────────────────────────────────────────────────────────────

type Round = Vec<Result<ModelEvent, ModelError>>;

#[derive(Debug, Clone)]
struct Recorded {
    messages: Vec<Message>,
    tools: Vec<String>,
    system: String,
}

/// Plays back one scripted round per request and records what it was sent.
#[derive(Clone, Default)]
struct ScriptedBackend {
    rounds: Arc<Mutex<VecDeque<Round>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl ScriptedBackend {
    fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds.into())),
            requests: Arc::default(),
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn record(requests: &Mutex<Vec<Recorded>>, request: &ModelRequest<'_>) {
    requests.lock().unwrap().push(Recorded {
        messages: request.messages.to_vec(),
        tools: request.tools.iter().map(|t| t.name.clone()).collect(),
        system: request.system.to_string(),
    });
}

fn channel_of(round: Round) -> ModelStream {
    let (tx, rx) = mpsc::channel(round.len().max(1));
    for event in round {
        tx.try_send(event).unwrap();
    }
    rx
}

impl Backend for ScriptedBackend {
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ModelStream, ModelError> {
        record(&self.requests, &request);
        let round = self.rounds.lock().unwrap().pop_front();
        match round {
            Some(round) => Ok(channel_of(round)),
            None => Err(ModelError::Api("script exhausted".into())),
        }
    }
}

/// Asks for the same tool on every request.
#[derive(Clone, Default)]
struct LoopingBackend {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Backend for LoopingBackend {
    async fn stream(&self, request: ModelRequest<'_>) -> Result<ModelStream, ModelError> {
        record(&self.requests, &request);
        let id = format!("toolu_{}", self.requests.lock().unwrap().len());
        Ok(channel_of(tool_round(&[(id.as_str(), "list_datasets", json!({}))])))
    }
}

fn finish(stop: StopReason) -> Vec<Result<ModelEvent, ModelError>> {
    vec![
        Ok(ModelEvent::MessageDelta {
            stop_reason: Some(stop),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }),
        Ok(ModelEvent::MessageStop),
    ]
}

fn text_round(text: &str) -> Round {
    let mut round = vec![
        Ok(ModelEvent::BlockStart {
            index: 0,
            block: BlockKind::Text,
        }),
        Ok(ModelEvent::TextDelta {
            index: 0,
            text: text.to_string(),
        }),
        Ok(ModelEvent::BlockStop { index: 0 }),
    ];
    round.extend(finish(StopReason::EndTurn));
    round
}

fn tool_round(calls: &[(&str, &str, Value)]) -> Round {
    let mut round = Vec::new();
    for (index, (id, name, input)) in calls.iter().enumerate() {
        round.push(Ok(ModelEvent::BlockStart {
            index,
            block: BlockKind::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
            },
        }));
        round.push(Ok(ModelEvent::InputJsonDelta {
            index,
            partial_json: input.to_string(),
        }));
        round.push(Ok(ModelEvent::BlockStop { index }));
    }
    round.extend(finish(StopReason::ToolUse));
    round
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording tool host
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingHost {
    executed: Mutex<Vec<String>>,
    outputs: HashMap<String, Result<String, String>>,
}

impl RecordingHost {
    fn with_output(mut self, tool: &str, output: Result<String, String>) -> Self {
        self.outputs.insert(tool.to_string(), output);
        self
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl ToolHost for RecordingHost {
    async fn specs(&self) -> Vec<ToolSpec> {
        ["list_datasets", "count_samples", "close_app"]
            .iter()
            .map(|name| ToolSpec {
                name: name.to_string(),
                description: format!("{name} tool"),
                input_schema: json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        self.executed.lock().unwrap().push(call.name.clone());
        match self.outputs.get(&call.name) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(ToolError::Execution(message.clone())),
            None => Ok(format!("{} done", call.name)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn agent_with(
    backend: ScriptedBackend,
    host: RecordingHost,
) -> (Agent<ScriptedBackend, RecordingHost>, Arc<RecordingHost>) {
    let host = Arc::new(host);
    let agent = Agent::new(backend, PendingStore::in_memory().unwrap()).with_tools(Arc::clone(&host));
    (agent, host)
}

fn user_turn(text: &str) -> Turn {
    Turn::new(vec![Message::user(text)]).with_system_prompt("You help with datasets.")
}

fn confirmation_token(events: &[TurnEvent]) -> ConfirmationToken {
    match events.last() {
        Some(TurnEvent::ConfirmationRequired { token, .. }) => *token,
        other => panic!("expected a confirmation request, got {other:?}"),
    }
}

fn tool_results(events: &[TurnEvent]) -> Vec<(&str, bool, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResult {
                name,
                is_error,
                confirmed,
                ..
            } => Some((name.as_str(), *is_error, *confirmed)),
            _ => None,
        })
        .collect()
}

/// Every tool call is answered exactly once, by the next message.
fn assert_paired(transcript: &[Message]) {
    for (i, message) in transcript.iter().enumerate() {
        let calls = message.tool_calls();
        if message.role != Role::Assistant || calls.is_empty() {
            continue;
        }
        let next = transcript
            .get(i + 1)
            .unwrap_or_else(|| panic!("tool calls at message {i} are unanswered"));
        assert_eq!(next.role, Role::User);
        let answered: Vec<_> = next
            .tool_results_iter()
            .map(|r| r.tool_use_id.clone())
            .collect();
        let asked: Vec<_> = calls.into_iter().map(|c| c.id).collect();
        assert_eq!(answered, asked, "results at message {} do not pair", i + 1);
    }
}

fn last_results(request: &Recorded) -> Vec<(String, bool, String)> {
    request
        .messages
        .last()
        .unwrap()
        .tool_results_iter()
        .map(|r| (r.tool_use_id.clone(), r.is_error, r.content.clone()))
        .collect()
}

/// A turn whose middle call is confirm-gated.
async fn suspended() -> (
    Agent<ScriptedBackend, RecordingHost>,
    ScriptedBackend,
    Arc<RecordingHost>,
    ConfirmationToken,
) {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[
            ("toolu_1", "list_datasets", json!({})),
            ("toolu_2", "close_app", json!({})),
            ("toolu_3", "count_samples", json!({"dataset": "quickstart"})),
        ]),
        text_round("Closed the app."),
    ]);
    let (agent, host) = agent_with(backend.clone(), RecordingHost::default());
    let events = agent
        .run(user_turn("tidy up").with_turn_id("turn-42"))
        .collect_events()
        .await;
    let token = confirmation_token(&events);
    (agent, backend, host, token)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_answer_completes_in_one_round() {
    let backend = ScriptedBackend::new(vec![text_round("Hello!")]);
    let (agent, host) = agent_with(backend.clone(), RecordingHost::default());

    let events = agent.run(user_turn("hi")).collect_events().await;

    assert_eq!(
        events,
        vec![
            TurnEvent::StreamMessageStart,
            TurnEvent::StreamChunk {
                delta: "Hello!".into()
            },
            TurnEvent::StreamComplete {
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5
                }
            },
        ]
    );
    assert!(host.executed().is_empty());

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, "You help with datasets.");
    assert_eq!(
        requests[0].tools,
        vec!["list_datasets", "count_samples", "close_app"]
    );
}

#[tokio::test]
async fn tool_round_trip_feeds_results_back() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[("toolu_1", "count_samples", json!({"dataset": "quickstart"}))]),
        text_round("There are 200 samples."),
    ]);
    let host = RecordingHost::default().with_output("count_samples", Ok("200".into()));
    let (agent, host) = agent_with(backend.clone(), host);

    let stream = agent.run(user_turn("how many samples?").with_turn_id("turn-1"));
    assert_eq!(stream.turn_id(), "turn-1");
    let events = stream.collect_events().await;

    let kinds: Vec<_> = events.iter().map(TurnEvent::event_type).collect();
    assert_eq!(
        kinds,
        vec![
            "stream_message_start",
            "tool_call_start",
            "tool_result",
            "stream_chunk",
            "stream_complete"
        ]
    );
    assert_eq!(host.executed(), vec!["count_samples"]);
    assert_eq!(
        events.last(),
        Some(&TurnEvent::StreamComplete {
            usage: Usage {
                input_tokens: 20,
                output_tokens: 10
            }
        })
    );

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    let transcript = &requests[1].messages;
    assert_eq!(transcript.len(), 3);
    assert_paired(transcript);
    assert_eq!(
        last_results(&requests[1]),
        vec![("toolu_1".to_string(), false, "200".to_string())]
    );
}

#[tokio::test]
async fn blocked_call_is_never_executed() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[("toolu_1", "execute_shell", json!({"command": "ls"}))]),
        text_round("I can't do that."),
    ]);
    let (agent, host) = agent_with(backend.clone(), RecordingHost::default());

    let events = agent.run(user_turn("list files")).collect_events().await;

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ToolBlocked { id, name, .. } if id == "toolu_1" && name == "execute_shell"
    )));
    assert!(tool_results(&events).is_empty());
    assert!(host.executed().is_empty());
    assert!(matches!(
        events.last(),
        Some(TurnEvent::StreamComplete { .. })
    ));

    let requests = backend.requests();
    let results = last_results(&requests[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].1, "blocked result must be an error");
    assert_paired(&requests[1].messages);
}

#[tokio::test]
async fn dangerous_arguments_are_blocked_for_any_tool() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[(
            "toolu_1",
            "count_samples",
            json!({"filter": "x; DROP TABLE samples"}),
        )]),
        text_round("Refused."),
    ]);
    let (agent, host) = agent_with(backend, RecordingHost::default());

    let events = agent.run(user_turn("count")).collect_events().await;

    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::ToolBlocked { .. })));
    assert!(host.executed().is_empty());
}

#[tokio::test]
async fn confirm_gated_call_suspends_the_batch() {
    let (agent, backend, host, token) = suspended().await;

    // Only the call before the gated one ran.
    assert_eq!(host.executed(), vec!["list_datasets"]);
    assert_eq!(backend.requests().len(), 1);

    let pending = agent.store().list().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].token, token);
    assert_eq!(pending[0].label, "close_app");
}

#[tokio::test]
async fn confirmation_event_describes_the_call() {
    let backend = ScriptedBackend::new(vec![tool_round(&[(
        "toolu_9",
        "execute_operator",
        json!({"operator_uri": "@voxel51/utils/delete_samples"}),
    )])]);
    let (agent, host) = agent_with(backend, RecordingHost::default());

    let events = agent.run(user_turn("delete dupes")).collect_events().await;

    match events.last() {
        Some(TurnEvent::ConfirmationRequired {
            id,
            name,
            arguments,
            risk,
            description,
            ..
        }) => {
            assert_eq!(id, "toolu_9");
            assert_eq!(name, "execute_operator");
            assert_eq!(arguments["operator_uri"], "@voxel51/utils/delete_samples");
            assert_eq!(*risk, guardrail::RiskLevel::High);
            assert!(!description.is_empty());
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert!(host.executed().is_empty());
}

#[tokio::test]
async fn resume_runs_the_confirmed_call_and_continues() {
    let (agent, backend, host, token) = suspended().await;

    let ResumeOutcome::Resumed(stream) = agent.resume(&token).unwrap() else {
        panic!("token should resume");
    };
    assert_eq!(stream.turn_id(), "turn-42");
    let events = stream.collect_events().await;

    assert_eq!(events.first(), Some(&TurnEvent::StreamMessageStart));
    assert_eq!(tool_results(&events), vec![("close_app", false, true)]);
    assert!(matches!(
        events.last(),
        Some(TurnEvent::StreamComplete { .. })
    ));

    // The gated call ran without reclassification; the skipped one never ran.
    assert_eq!(host.executed(), vec!["list_datasets", "close_app"]);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_paired(&requests[1].messages);
    let results = last_results(&requests[1]);
    let summary: Vec<_> = results
        .iter()
        .map(|(id, is_error, _)| (id.as_str(), *is_error))
        .collect();
    assert_eq!(
        summary,
        vec![("toolu_1", false), ("toolu_2", false), ("toolu_3", true)]
    );
    assert_eq!(requests[1].system, "You help with datasets.");

    assert!(matches!(
        agent.resume(&token).unwrap(),
        ResumeOutcome::NotFound
    ));
    assert!(agent.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn resumed_call_runs_even_if_the_stream_is_dropped() {
    let (agent, _backend, host, token) = suspended().await;

    let ResumeOutcome::Resumed(stream) = agent.resume(&token).unwrap() else {
        panic!("token should resume");
    };
    drop(stream);

    let ran = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !host.executed().iter().any(|t| t == "close_app") {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ran.is_ok(), "confirmed call never ran: {:?}", host.executed());
    assert!(agent.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn store_failure_while_suspending_is_a_stream_error() {
    let path = std::env::temp_dir().join(format!("coxswain-broken-{}.db", uuid::Uuid::new_v4()));
    let store = PendingStore::open(&path).unwrap();
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE pending")
        .unwrap();

    let backend = ScriptedBackend::new(vec![tool_round(&[("toolu_1", "close_app", json!({}))])]);
    let host = Arc::new(RecordingHost::default());
    let agent = Agent::new(backend, store).with_tools(Arc::clone(&host));

    let events = agent.run(user_turn("close it")).collect_events().await;

    assert!(matches!(events.last(), Some(TurnEvent::StreamError { .. })));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TurnEvent::ConfirmationRequired { .. }))
    );
    assert!(host.executed().is_empty());

    drop(agent);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn cancel_drops_the_call_without_running_it() {
    let (agent, backend, host, token) = suspended().await;

    assert_eq!(
        agent.cancel(&token).unwrap(),
        CancelOutcome::Cancelled {
            turn_id: "turn-42".into(),
            tool_name: "close_app".into()
        }
    );
    assert_eq!(host.executed(), vec!["list_datasets"]);
    assert_eq!(backend.requests().len(), 1);

    assert!(matches!(
        agent.resume(&token).unwrap(),
        ResumeOutcome::NotFound
    ));
    assert_eq!(agent.cancel(&token).unwrap(), CancelOutcome::NotFound);
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let (agent, _) = agent_with(ScriptedBackend::default(), RecordingHost::default());
    let token = ConfirmationToken::new();
    assert!(matches!(
        agent.resume(&token).unwrap(),
        ResumeOutcome::NotFound
    ));
    assert_eq!(agent.cancel(&token).unwrap(), CancelOutcome::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resume_and_cancel_settle_once() {
    for _ in 0..20 {
        let (agent, _backend, host, token) = suspended().await;

        let resumer = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.resume(&token).unwrap() })
        };
        let canceller = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.cancel(&token).unwrap() })
        };

        let resumed = match resumer.await.unwrap() {
            ResumeOutcome::Resumed(stream) => {
                stream.collect_events().await;
                true
            }
            ResumeOutcome::NotFound => false,
        };
        let cancelled = matches!(canceller.await.unwrap(), CancelOutcome::Cancelled { .. });

        assert!(resumed ^ cancelled, "exactly one of resume/cancel must win");
        let ran_gated = host.executed().iter().any(|t| t == "close_app");
        assert_eq!(ran_gated, resumed);
    }
}

#[tokio::test]
async fn round_ceiling_ends_the_turn() {
    let backend = LoopingBackend::default();
    let host = Arc::new(RecordingHost::default());
    let agent = Agent::new(backend.clone(), PendingStore::in_memory().unwrap())
        .with_tools(Arc::clone(&host));

    let events = agent.run(user_turn("loop forever")).collect_events().await;

    assert_eq!(backend.requests.lock().unwrap().len(), runtime::MAX_ROUNDS);
    assert_eq!(host.executed().len(), runtime::MAX_ROUNDS);

    let tail: Vec<_> = events.iter().rev().take(2).collect();
    assert!(matches!(tail[0], TurnEvent::StreamComplete { .. }));
    assert_eq!(
        tail[1],
        &TurnEvent::RoundLimitReached {
            rounds: runtime::MAX_ROUNDS
        }
    );
}

#[tokio::test]
async fn long_output_is_previewed_but_sent_in_full() {
    let long = "x".repeat(5000);
    let backend = ScriptedBackend::new(vec![
        tool_round(&[("toolu_1", "list_datasets", json!({}))]),
        text_round("Many datasets."),
    ]);
    let host = RecordingHost::default().with_output("list_datasets", Ok(long.clone()));
    let (agent, _) = agent_with(backend.clone(), host);

    let events = agent.run(user_turn("list")).collect_events().await;

    let preview = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::ToolResult { preview, .. } => Some(preview.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(preview.len(), runtime::PREVIEW_CHARS);

    let results = last_results(&backend.requests()[1]);
    assert_eq!(results[0].2, long);
}

#[tokio::test]
async fn stream_failure_ends_the_turn_with_an_error() {
    let backend = ScriptedBackend::new(vec![vec![
        Ok(ModelEvent::TextDelta {
            index: 0,
            text: "Partial".into(),
        }),
        Err(ModelError::StreamInterrupted("connection reset".into())),
    ]]);
    let (agent, _) = agent_with(backend.clone(), RecordingHost::default());

    let events = agent.run(user_turn("hi")).collect_events().await;

    assert_eq!(events.len(), 3);
    assert!(matches!(
        events.last(),
        Some(TurnEvent::StreamError { error }) if error.contains("connection reset")
    ));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, TurnEvent::StreamComplete { .. }))
    );
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn request_failure_is_a_stream_error() {
    let (agent, _) = agent_with(ScriptedBackend::default(), RecordingHost::default());

    let events = agent.run(user_turn("hi")).collect_events().await;

    assert_eq!(events.first(), Some(&TurnEvent::StreamMessageStart));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::StreamError { error }) if error.contains("script exhausted")
    ));
}

#[tokio::test]
async fn without_a_tool_server_calls_fail_softly() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[("toolu_1", "list_datasets", json!({}))]),
        text_round("No tools available."),
    ]);
    let agent = Agent::new(backend.clone(), PendingStore::in_memory().unwrap());
    let catalog = vec![ToolSpec {
        name: "list_datasets".into(),
        description: "List datasets".into(),
        input_schema: json!({"type": "object"}),
    }];

    let events = agent
        .run(user_turn("list").with_tools(catalog))
        .collect_events()
        .await;

    assert_eq!(tool_results(&events), vec![("list_datasets", true, false)]);
    let results = last_results(&backend.requests()[1]);
    assert_eq!(results[0].2, "tool server not connected");
    assert!(matches!(
        events.last(),
        Some(TurnEvent::StreamComplete { .. })
    ));
}

#[tokio::test]
async fn tool_failure_becomes_an_error_result() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[("toolu_1", "count_samples", json!({"dataset": "missing"}))]),
        text_round("That dataset does not exist."),
    ]);
    let host = RecordingHost::default()
        .with_output("count_samples", Err("dataset 'missing' not found".into()));
    let (agent, _) = agent_with(backend.clone(), host);

    let events = agent.run(user_turn("count")).collect_events().await;

    assert_eq!(tool_results(&events), vec![("count_samples", true, false)]);
    let results = last_results(&backend.requests()[1]);
    assert_eq!(
        results[0],
        (
            "toolu_1".to_string(),
            true,
            "dataset 'missing' not found".to_string()
        )
    );
}

#[tokio::test]
async fn mixed_batch_stays_paired_across_rounds() {
    let backend = ScriptedBackend::new(vec![
        tool_round(&[
            ("toolu_1", "list_datasets", json!({})),
            ("toolu_2", "run_shell", json!({"command": "whoami"})),
        ]),
        tool_round(&[("toolu_3", "count_samples", json!({"dataset": "a"}))]),
        text_round("Done."),
    ]);
    let (agent, _) = agent_with(backend.clone(), RecordingHost::default());

    agent.run(user_turn("inventory")).collect_events().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    let transcript = &requests[2].messages;
    assert_eq!(transcript.len(), 5);
    assert_paired(transcript);
    assert!(matches!(
        transcript[1].parts.as_slice(),
        [Part::ToolUse(_), Part::ToolUse(_)]
    ));
}
