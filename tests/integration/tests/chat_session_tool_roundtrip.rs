use std::sync::{Arc, Mutex};

use chatloop_agent_core::{
    ChatSession, DisplayRecord, MessageRole, ToolCallStatus, TurnConfig, TurnError, TurnEvent,
};
use chatloop_ai::{ChatloopAiError, HttpTurnClient, RetryPolicy, TurnClientConfig};
use chatloop_tools::{
    build_tools_configuration, builtin_tool_registry, FunctionsApiConfig, ToolsState,
};
use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use serde_json::{json, Value};

fn envelope(event_type: &str, data: Value) -> Value {
    json!({ "event": event_type, "data": data })
}

fn sse_body(envelopes: &[Value]) -> String {
    let mut body = String::new();
    for envelope in envelopes {
        body.push_str(&format!("data: {envelope}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn weather_call_stream() -> String {
    let arguments = json!({ "location": "Paris", "unit": "celsius" }).to_string();
    sse_body(&[
        envelope(
            "response.output_item.added",
            json!({ "item": { "type": "function_call", "id": "fc_1", "name": "get_weather", "arguments": "" } }),
        ),
        envelope(
            "response.function_call_arguments.delta",
            json!({ "item_id": "fc_1", "delta": arguments }),
        ),
        envelope(
            "response.output_item.done",
            json!({ "item": {
                "type": "function_call",
                "id": "fc_1",
                "call_id": "call_1",
                "name": "get_weather",
                "arguments": arguments
            } }),
        ),
        envelope("response.completed", json!({ "response": { "output": [] } })),
    ])
}

fn answer_stream(text: &str) -> String {
    sse_body(&[
        envelope(
            "response.output_item.added",
            json!({ "item": { "type": "message", "id": "msg_1", "content": [] } }),
        ),
        envelope(
            "response.output_text.delta",
            json!({ "item_id": "msg_1", "delta": text }),
        ),
        envelope("response.completed", json!({ "response": { "output": [] } })),
    ])
}

fn session_for(server: &MockServer, events: Arc<Mutex<Vec<TurnEvent>>>) -> ChatSession {
    let client = HttpTurnClient::new(TurnClientConfig {
        api_base: server.base_url(),
        retry: RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        ..TurnClientConfig::default()
    })
    .expect("turn client");
    let registry = builtin_tool_registry(&FunctionsApiConfig {
        base_url: server.base_url(),
        ..FunctionsApiConfig::default()
    })
    .expect("tool registry");
    let tools = build_tools_configuration(&ToolsState::default(), &registry.definitions());

    let mut session = ChatSession::new(
        Arc::new(client),
        Arc::new(registry),
        tools,
        TurnConfig::default(),
    );
    session.subscribe(move |event| {
        events.lock().expect("events lock").push(event.clone());
    });
    session
}

#[tokio::test]
async fn integration_weather_call_is_dispatched_and_answered_over_http() {
    let server = MockServer::start_async().await;
    let first_round = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/turn_response")
                .body_includes("\"toolsConfiguration\"")
                .body_excludes("function_call_output");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(weather_call_stream());
        })
        .await;
    let second_round = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/turn_response")
                .body_includes("\"call_id\":\"call_1\"")
                .body_includes("function_call_output");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(answer_stream("It is 18 degrees in Paris."));
        })
        .await;
    let weather = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/functions/get_weather")
                .query_param("location", "Paris")
                .query_param("unit", "celsius");
            then.status(200)
                .json_body(json!({ "temperature": 18, "unit": "celsius" }));
        })
        .await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let session = session_for(&server, Arc::clone(&events));

    let summary = session
        .send_user_message("What's the weather in Paris?")
        .await
        .expect("turn should succeed");

    assert_eq!(summary.rounds, 2);
    first_round.assert_async().await;
    second_round.assert_async().await;
    weather.assert_async().await;

    let state = session.snapshot().await;
    assert!(!state.is_loading);
    assert!(!state.needs_continuation);
    assert!(state.unpaired_call_ids().is_empty());
    let call = state
        .display_records
        .iter()
        .find_map(DisplayRecord::as_tool_call)
        .expect("tool call record");
    assert_eq!(call.status(), ToolCallStatus::Completed);
    assert_eq!(call.call_id.as_deref(), Some("call_1"));
    assert_eq!(call.output, Some(json!({ "temperature": 18, "unit": "celsius" })));
    assert!(matches!(
        state.display_records.last(),
        Some(DisplayRecord::Message { role: MessageRole::Assistant, text, .. })
            if text == "It is 18 degrees in Paris."
    ));

    let events = events.lock().expect("events lock");
    assert!(matches!(
        events.first(),
        Some(TurnEvent::RecordUpdated { index: 1, .. })
    ));
    assert!(events.contains(&TurnEvent::TurnStart));
    assert!(events.contains(&TurnEvent::RoundStart { round: 2 }));
    assert_eq!(
        events.last(),
        Some(&TurnEvent::TurnEnd {
            rounds: 2,
            error: None
        })
    );
}

#[tokio::test]
async fn integration_functions_api_failure_is_returned_to_the_model() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/turn_response")
                .body_excludes("function_call_output");
            then.status(200).body(weather_call_stream());
        })
        .await;
    let second_round = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/turn_response")
                .body_includes("Function call failed: 503");
            then.status(200)
                .body(answer_stream("The weather service is down."));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/functions/get_weather");
            then.status(503).body("service unavailable");
        })
        .await;
    let session = session_for(&server, Arc::new(Mutex::new(Vec::new())));

    session
        .send_user_message("Weather in Paris?")
        .await
        .expect("turn should succeed");

    second_round.assert_async().await;
    let state = session.snapshot().await;
    let call = state
        .display_records
        .iter()
        .find_map(DisplayRecord::as_tool_call)
        .expect("tool call record");
    assert_eq!(
        call.output.as_ref().and_then(|output| output.get("details")),
        Some(&json!("service unavailable"))
    );
}

#[tokio::test]
async fn integration_rejected_turn_request_ends_turn_with_error_record() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/turn_response");
            then.status(400).body("bad request");
        })
        .await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let session = session_for(&server, Arc::clone(&events));

    let error = session
        .send_user_message("hello")
        .await
        .expect_err("turn should fail");

    assert!(matches!(
        error,
        TurnError::Ai(ChatloopAiError::HttpStatus { status: 400, .. })
    ));
    rejected.assert_calls_async(1).await;
    let state = session.snapshot().await;
    assert!(!state.is_loading);
    assert!(matches!(
        state.display_records.last(),
        Some(DisplayRecord::Error { message }) if message.contains("400")
    ));
    let events = events.lock().expect("events lock");
    assert!(matches!(
        events.last(),
        Some(TurnEvent::TurnEnd { error: Some(_), .. })
    ));
}
