use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chatloop_ai::{
    ChatloopAiError, ConversationItem, StreamEvent, ToolDefinition, TurnByteStream, TurnRequest,
    TurnResponseClient,
};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    parse_partial_json, run_turn, AgentTool, ChatSession, CooperativeCancellationToken,
    DisplayRecord, EventProcessor, MessageRole, ToolCallStatus, ToolDispatcher,
    ToolExecutionResult, ToolRegistry, ToolType, TurnConfig, TurnContext, TurnError, TurnEvent,
    TurnState, GREETING,
};

mod turn_loop;

type ScriptedRound = Result<Vec<Result<Vec<u8>, ChatloopAiError>>, ChatloopAiError>;

/// Replays one scripted byte stream per upstream call and records every request.
#[derive(Default)]
struct ScriptedClient {
    rounds: AsyncMutex<VecDeque<ScriptedRound>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedClient {
    fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: AsyncMutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_bodies(bodies: Vec<Vec<u8>>) -> Self {
        Self::new(
            bodies
                .into_iter()
                .map(|body| Ok(vec![Ok(body)]))
                .collect(),
        )
    }

    fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl TurnResponseClient for ScriptedClient {
    async fn open_stream(&self, request: &TurnRequest) -> Result<TurnByteStream, ChatloopAiError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let chunks = self.rounds.lock().await.pop_front().ok_or_else(|| {
            ChatloopAiError::InvalidStream("scripted client has no more rounds".to_string())
        })??;
        let stream: TurnByteStream = Box::pin(futures_util::stream::iter(chunks));
        Ok(stream)
    }
}

struct JokeTool;

#[async_trait]
impl AgentTool for JokeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_joke".to_string(),
            description: "Tells a joke".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::ok(json!({ "joke": "Why did the crab never share? Shellfish." }))
    }
}

/// Records dispatches and answers every call with the same payload.
#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(String, Value)>>,
    delay: Option<Duration>,
}

#[async_trait]
impl ToolDispatcher for RecordingDispatcher {
    async fn dispatch(&self, name: &str, arguments: Value) -> ToolExecutionResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push((name.to_string(), arguments));
        ToolExecutionResult::ok(json!({ "ok": true }))
    }
}

fn joke_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(JokeTool);
    registry
}

fn event(value: Value) -> StreamEvent {
    StreamEvent::from_envelope(&value)
}

fn envelope(event_type: &str, data: Value) -> Value {
    json!({ "event": event_type, "data": data })
}

/// Renders envelopes as an SSE body terminated by `[DONE]`.
fn sse_body(envelopes: &[Value]) -> Vec<u8> {
    let mut body = String::new();
    for envelope in envelopes {
        body.push_str("data: ");
        body.push_str(&envelope.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn text_round(item_id: &str, deltas: &[&str]) -> Vec<Value> {
    let mut envelopes = vec![envelope(
        "response.output_item.added",
        json!({ "item": { "type": "message", "id": item_id, "content": [] } }),
    )];
    for delta in deltas {
        envelopes.push(envelope(
            "response.output_text.delta",
            json!({ "item_id": item_id, "delta": delta }),
        ));
    }
    envelopes.push(envelope(
        "response.output_item.done",
        json!({ "item": {
            "type": "message",
            "id": item_id,
            "content": [{ "type": "output_text", "text": deltas.concat() }]
        } }),
    ));
    envelopes.push(envelope(
        "response.completed",
        json!({ "response": { "output": [] } }),
    ));
    envelopes
}

fn function_call_round(item_id: &str, call_id: &str, name: &str, arguments: &str) -> Vec<Value> {
    vec![
        envelope(
            "response.output_item.added",
            json!({ "item": { "type": "function_call", "id": item_id, "name": name, "arguments": "" } }),
        ),
        envelope(
            "response.function_call_arguments.delta",
            json!({ "item_id": item_id, "delta": arguments }),
        ),
        envelope(
            "response.function_call_arguments.done",
            json!({ "item_id": item_id, "arguments": arguments }),
        ),
        envelope(
            "response.output_item.done",
            json!({ "item": {
                "type": "function_call",
                "id": item_id,
                "call_id": call_id,
                "name": name,
                "arguments": arguments
            } }),
        ),
        envelope(
            "response.completed",
            json!({ "response": { "output": [] } }),
        ),
    ]
}

/// A state as the session leaves it right after the user spoke.
fn state_after_user_message(text: &str) -> TurnState {
    let mut state = TurnState::new();
    state.push_record(DisplayRecord::user(text));
    state.push_item(ConversationItem::user(text));
    state
}

fn assistant_texts(state: &TurnState) -> Vec<String> {
    state
        .display_records
        .iter()
        .filter_map(|record| match record {
            DisplayRecord::Message {
                role: MessageRole::Assistant,
                text,
                ..
            } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn error_messages(state: &TurnState) -> Vec<String> {
    state
        .display_records
        .iter()
        .filter_map(|record| match record {
            DisplayRecord::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn tool_call<'a>(state: &'a TurnState, id: &str) -> &'a crate::ToolCallRecord {
    state
        .find_tool_call(id)
        .and_then(|index| state.display_records[index].as_tool_call())
        .expect("tool call record should exist")
}

async fn run_with(
    state: &mut TurnState,
    client: &ScriptedClient,
    dispatcher: &dyn ToolDispatcher,
    config: &TurnConfig,
    token: Option<&CooperativeCancellationToken>,
    events: &Mutex<Vec<TurnEvent>>,
) -> Result<crate::TurnSummary, TurnError> {
    let tools = json!([]);
    let observer = |event: &TurnEvent| {
        events.lock().expect("events lock").push(event.clone());
    };
    let context = TurnContext {
        client,
        dispatcher,
        tools_configuration: &tools,
        config,
        cancellation_token: token,
        observer: &observer,
    };
    run_turn(state, &context).await
}
