use super::*;

#[tokio::test]
async fn integration_function_call_round_continues_with_tool_output() {
    let client = ScriptedClient::with_bodies(vec![
        sse_body(&function_call_round("i1", "c1", "get_joke", "{}")),
        sse_body(&text_round("m1", &["Here ", "it is"])),
    ]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("joke please");

    let summary = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("turn should succeed");

    assert_eq!(summary.rounds, 2);
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].conversation_items,
        vec![ConversationItem::user("joke please")]
    );
    let second = &requests[1].conversation_items;
    assert_eq!(second.len(), 3);
    assert!(second[1].is_function_call());
    assert!(second[2].is_function_call_output());
    assert_eq!(second[1].call_id(), Some("c1"));
    assert_eq!(second[2].call_id(), Some("c1"));

    assert_eq!(state.conversation_items[..3], second[..]);
    assert_eq!(
        state.conversation_items[3],
        ConversationItem::assistant("Here it is")
    );
    assert_eq!(state.conversation_items.len(), 4);
    assert!(!state.needs_continuation);
    assert!(!state.is_loading);
    assert!(state.unpaired_call_ids().is_empty());
}

#[tokio::test]
async fn functional_dangling_function_call_blocks_continuation() {
    let client = ScriptedClient::with_bodies(vec![sse_body(&text_round("m1", &["never"]))]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = TurnState::new();
    state.push_item(ConversationItem::FunctionCall {
        id: Some("i9".to_string()),
        call_id: "c9".to_string(),
        name: "get_joke".to_string(),
        arguments_json: "{}".to_string(),
    });
    state.push_item(ConversationItem::user("and then?"));
    state.needs_continuation = true;

    let error = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect_err("unpaired call must block the turn");

    match error {
        TurnError::UnpairedFunctionCalls { call_ids } => assert_eq!(call_ids, vec!["c9"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(client.requests().is_empty());
    assert!(!state.needs_continuation);
    assert!(!state.is_loading);
    let errors = error_messages(&state);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("c9"), "{}", errors[0]);
}

#[tokio::test]
async fn regression_malformed_frame_does_not_stop_following_frames() {
    let body = [
        "data: {\"event\":\"response.output_item.added\",\"data\":{\"item\":{\"type\":\"message\",\"id\":\"m1\"}}}\n\n",
        "data: {\"event\":\"response.output_text.delta\",\"data\":{\"item_id\":\"m1\",\"delta\":\"Hel\"}}\n\n",
        "data: {not json\n\n",
        "data: {\"event\":\"response.output_text.delta\",\"data\":{\"item_id\":\"m1\",\"delta\":\"lo\"}}\n\n",
        "data: [DONE]\n\n",
    ]
    .concat();
    let client = ScriptedClient::with_bodies(vec![body.into_bytes()]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("hi");

    run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("turn should succeed");

    assert_eq!(assistant_texts(&state).last().map(String::as_str), Some("Hello"));
    assert!(error_messages(&state).is_empty());
}

#[tokio::test]
async fn functional_frames_split_at_arbitrary_chunk_boundaries_decode_identically() {
    let body = sse_body(&text_round("m1", &["caf\u{e9} ", "au lait"]));
    let chunks = body
        .chunks(7)
        .map(|chunk| Ok(chunk.to_vec()))
        .collect::<Vec<_>>();
    let client = ScriptedClient::new(vec![Ok(chunks)]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("coffee");

    run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("turn should succeed");

    assert_eq!(
        assistant_texts(&state).last().map(String::as_str),
        Some("caf\u{e9} au lait")
    );
}

#[tokio::test]
async fn functional_transport_failure_before_streaming_adds_error_record() {
    let client = ScriptedClient::new(vec![Err(ChatloopAiError::HttpStatus {
        status: 502,
        body: "bad gateway".to_string(),
    })]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("hi");

    let error = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect_err("transport failure should abort");

    assert!(matches!(
        error,
        TurnError::Ai(ChatloopAiError::HttpStatus { status: 502, .. })
    ));
    assert!(!state.is_loading);
    let errors = error_messages(&state);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("502"));
}

#[tokio::test]
async fn regression_mid_stream_drop_preserves_partial_transcript() {
    let frame = |value: Value| format!("data: {value}\n\n").into_bytes();
    let client = ScriptedClient::new(vec![Ok(vec![
        Ok(frame(envelope(
            "response.output_item.added",
            json!({ "item": { "type": "message", "id": "m0" } }),
        ))),
        Ok(frame(envelope(
            "response.output_text.delta",
            json!({ "item_id": "m0", "delta": "so far" }),
        ))),
        Err(ChatloopAiError::InvalidStream("connection reset".to_string())),
        Ok(frame(envelope(
            "response.output_text.delta",
            json!({ "item_id": "m0", "delta": " never seen" }),
        ))),
    ])]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("hi");

    let error = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect_err("dropped stream should abort");

    assert!(matches!(error, TurnError::Ai(ChatloopAiError::InvalidStream(_))));
    assert_eq!(assistant_texts(&state).last().map(String::as_str), Some("so far"));
    assert_eq!(client.requests().len(), 1);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn regression_round_limit_stops_runaway_tool_loops() {
    let client = ScriptedClient::with_bodies(vec![
        sse_body(&function_call_round("i1", "c1", "get_joke", "{}")),
        sse_body(&function_call_round("i2", "c2", "get_joke", "{}")),
        sse_body(&function_call_round("i3", "c3", "get_joke", "{}")),
    ]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("jokes forever");

    let error = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig { max_rounds: 2 },
        None,
        &events,
    )
    .await
    .expect_err("round limit should trip");

    assert!(matches!(error, TurnError::MaxRoundsExceeded(2)));
    assert_eq!(client.requests().len(), 2);
    assert!(!state.needs_continuation);
    assert!(state.unpaired_call_ids().is_empty());
}

#[tokio::test]
async fn functional_cancelled_token_aborts_before_upstream_call() {
    let client = ScriptedClient::with_bodies(vec![sse_body(&text_round("m1", &["hi"]))]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let token = CooperativeCancellationToken::new();
    token.cancel();
    let mut state = state_after_user_message("hi");

    let error = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        Some(&token),
        &events,
    )
    .await
    .expect_err("cancelled turn should fail");

    assert!(matches!(error, TurnError::Cancelled));
    assert!(!state.is_loading);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn unit_turn_events_bracket_rounds_and_report_record_updates() {
    let client = ScriptedClient::with_bodies(vec![sse_body(&text_round("m1", &["A", "B"]))]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("hi");

    run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("turn should succeed");

    let events = events.into_inner().expect("events lock");
    assert_eq!(events.first(), Some(&TurnEvent::TurnStart));
    assert_eq!(events[1], TurnEvent::RoundStart { round: 1 });
    assert_eq!(
        events.last(),
        Some(&TurnEvent::TurnEnd {
            rounds: 1,
            error: None
        })
    );
    assert!(events.contains(&TurnEvent::RoundEnd {
        round: 1,
        needs_continuation: false,
        response_completed: true
    }));
    let last_update = events
        .iter()
        .rev()
        .find_map(|event| match event {
            TurnEvent::RecordUpdated { record, .. } => Some(record.clone()),
            _ => None,
        })
        .expect("record updates should be emitted");
    assert_eq!(last_update, DisplayRecord::assistant(Some("m1".to_string()), "AB"));
}

#[tokio::test]
async fn integration_unknown_tool_turn_still_pairs_and_continues() {
    let client = ScriptedClient::with_bodies(vec![
        sse_body(&function_call_round("i1", "c1", "get_stock_price", "{\"ticker\":\"X\"}")),
        sse_body(&text_round("m1", &["Sorry, no stock tool."])),
    ]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("price of X?");

    run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("turn should succeed");

    let output = client.requests()[1].conversation_items[2].to_wire();
    assert_eq!(output["call_id"], "c1");
    assert_eq!(
        output["output"],
        json!({ "error": "Unknown function: get_stock_price" }).to_string()
    );
}

#[tokio::test]
async fn regression_round_end_reports_stream_closed_before_completion() {
    let frame = |value: Value| format!("data: {value}\n\n").into_bytes();
    let client = ScriptedClient::new(vec![Ok(vec![
        Ok(frame(envelope(
            "response.output_item.added",
            json!({ "item": { "type": "message", "id": "m0" } }),
        ))),
        Ok(frame(envelope(
            "response.output_text.delta",
            json!({ "item_id": "m0", "delta": "cut short" }),
        ))),
    ])]);
    let registry = joke_registry();
    let events = Mutex::new(Vec::new());
    let mut state = state_after_user_message("hi");

    let summary = run_with(
        &mut state,
        &client,
        &registry,
        &TurnConfig::default(),
        None,
        &events,
    )
    .await
    .expect("eof without completion still ends the round");

    assert_eq!(summary.rounds, 1);
    let events = events.into_inner().expect("events lock");
    assert!(events.contains(&TurnEvent::RoundEnd {
        round: 1,
        needs_continuation: false,
        response_completed: false
    }));
    assert_eq!(assistant_texts(&state).last().map(String::as_str), Some("cut short"));
}
