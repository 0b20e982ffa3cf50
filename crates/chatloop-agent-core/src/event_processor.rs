use chatloop_ai::{ConversationItem, OutputItem, OutputItemKind, StreamEvent};

use crate::{
    dispatcher::ToolDispatcher,
    partial_json::parse_partial_json,
    transcript::{
        normalize_annotation, DisplayRecord, MessageRole, ToolCallRecord, ToolCallStatus, ToolType,
        TurnState,
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What one processed event changed.
pub struct EventOutcome {
    /// Display record indices created or mutated, in order of first touch.
    pub touched: Vec<usize>,
    /// Set by the `completed` event.
    pub response_completed: bool,
}

impl EventOutcome {
    fn touch(&mut self, index: usize) {
        if !self.touched.contains(&index) {
            self.touched.push(index);
        }
    }
}

/// Applies decoded stream events to a [`TurnState`], one at a time.
///
/// Completed function calls are dispatched in-line: `apply` does not return
/// until the tool output has been appended, so the next event always sees it.
pub struct EventProcessor<'a> {
    dispatcher: &'a dyn ToolDispatcher,
}

impl<'a> EventProcessor<'a> {
    pub fn new(dispatcher: &'a dyn ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn apply(&self, state: &mut TurnState, event: StreamEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        tracing::trace!(event_type = event.label(), "applying stream event");
        match event {
            StreamEvent::OutputTextDelta { item_id, delta } => {
                apply_text_delta(state, item_id, &delta, &mut outcome);
            }
            StreamEvent::OutputTextAnnotationAdded {
                item_id,
                annotation,
            } => match state.find_assistant_message(item_id.as_deref()) {
                Some(index) => {
                    if let Some(DisplayRecord::Message { annotations, .. }) =
                        state.display_records.get_mut(index)
                    {
                        annotations.push(normalize_annotation(annotation));
                        outcome.touch(index);
                    }
                }
                None => drop_unmatched("output_text.annotation.added", item_id.as_deref()),
            },
            StreamEvent::OutputItemAdded { item } => apply_item_added(state, item, &mut outcome),
            StreamEvent::OutputItemDone { item } => {
                self.apply_item_done(state, item, &mut outcome).await;
            }
            StreamEvent::FunctionCallArgumentsDelta { item_id, delta }
            | StreamEvent::McpCallArgumentsDelta { item_id, delta } => {
                with_tool_call(state, item_id.as_deref(), &mut outcome, |call| {
                    call.arguments_buffer.push_str(&delta);
                    call.parsed_arguments = parse_partial_json(&call.arguments_buffer);
                });
            }
            StreamEvent::FunctionCallArgumentsDone { item_id, arguments } => {
                with_tool_call(state, item_id.as_deref(), &mut outcome, |call| {
                    call.parsed_arguments = parse_partial_json(&arguments);
                    call.arguments_buffer = arguments;
                });
            }
            StreamEvent::McpCallArgumentsDone { item_id, arguments } => {
                with_tool_call(state, item_id.as_deref(), &mut outcome, |call| {
                    call.parsed_arguments = parse_partial_json(&arguments);
                    call.arguments_buffer = arguments;
                    call.mark_completed();
                });
            }
            StreamEvent::WebSearchCallCompleted { item_id, output }
            | StreamEvent::FileSearchCallCompleted { item_id, output } => {
                with_tool_call(state, item_id.as_deref(), &mut outcome, |call| {
                    call.mark_completed();
                    if output.is_some() {
                        call.output = output;
                    }
                });
            }
            StreamEvent::CodeInterpreterCodeDelta { item_id, delta } => {
                with_open_code_interpreter(state, item_id.as_deref(), &mut outcome, |call| {
                    call.code.push_str(&delta);
                });
            }
            StreamEvent::CodeInterpreterCodeDone { item_id, code } => {
                with_open_code_interpreter(state, item_id.as_deref(), &mut outcome, |call| {
                    call.code = code;
                    call.mark_completed();
                });
            }
            StreamEvent::CodeInterpreterCallCompleted { item_id } => {
                with_tool_call(state, item_id.as_deref(), &mut outcome, |call| {
                    call.mark_completed();
                });
            }
            StreamEvent::Completed { output } => {
                apply_completed(state, output, &mut outcome);
                outcome.response_completed = true;
            }
            StreamEvent::Lifecycle { .. } => {}
            StreamEvent::Error { message } => {
                tracing::warn!(message = message.as_str(), "upstream reported an error");
                outcome.touch(state.push_error(message));
            }
            StreamEvent::Unrecognized { event_type } => {
                tracing::warn!(event_type = event_type.as_str(), "unrecognized stream event");
                outcome.touch(state.push_error(format!("unrecognized stream event: {event_type}")));
            }
            StreamEvent::Malformed { event_type, reason } => {
                tracing::warn!(
                    event_type = event_type.as_str(),
                    reason = reason.as_str(),
                    "skipping malformed stream event"
                );
            }
        }
        outcome
    }

    async fn apply_item_done(
        &self,
        state: &mut TurnState,
        item: OutputItem,
        outcome: &mut EventOutcome,
    ) {
        match item.kind {
            OutputItemKind::FunctionCall => self.complete_function_call(state, item, outcome).await,
            OutputItemKind::McpCall => {
                if let Some(index) = item.id.as_deref().and_then(|id| state.find_tool_call(id)) {
                    if let Some(call) = state.tool_call_mut(index) {
                        call.mark_completed();
                        call.output = item.output.clone();
                        outcome.touch(index);
                    }
                }
                state.push_item(ConversationItem::Passthrough { item: item.raw });
            }
            OutputItemKind::Message => {
                let (mut text, _) = item.message_content();
                if text.is_empty() {
                    if let Some(DisplayRecord::Message { text: streamed, .. }) = state
                        .find_assistant_message(item.id.as_deref())
                        .and_then(|index| state.display_records.get(index))
                    {
                        text = streamed.clone();
                    }
                }
                state.complete_assistant_item(item.id.as_deref(), text);
            }
            _ => {
                if item.status.as_deref() == Some("completed") {
                    let found = item.id.as_deref().and_then(|id| state.find_tool_call(id));
                    if let Some(index) = found {
                        if let Some(call) = state.tool_call_mut(index) {
                            call.mark_completed();
                            outcome.touch(index);
                        }
                    }
                }
                state.push_item(ConversationItem::Passthrough { item: item.raw });
            }
        }
    }

    async fn complete_function_call(
        &self,
        state: &mut TurnState,
        item: OutputItem,
        outcome: &mut EventOutcome,
    ) {
        let Some(index) = item.id.as_deref().and_then(|id| state.find_tool_call(id)) else {
            tracing::warn!(
                item_id = item.id.as_deref().unwrap_or_default(),
                "finished function call has no matching tool call record; dropping"
            );
            return;
        };
        let Some(call_id) = item.call_id.clone() else {
            tracing::warn!(
                item_id = item.id.as_deref().unwrap_or_default(),
                "finished function call carries no call_id"
            );
            outcome.touch(state.push_error(format!(
                "function call {} finished without a call_id",
                item.id.as_deref().unwrap_or_default()
            )));
            return;
        };
        let already_resolved = state
            .display_records
            .get(index)
            .and_then(DisplayRecord::as_tool_call)
            .is_some_and(ToolCallRecord::is_completed)
            || state
                .conversation_items
                .iter()
                .any(|existing| existing.is_function_call() && existing.call_id() == Some(call_id.as_str()));
        if already_resolved {
            tracing::debug!(
                call_id = call_id.as_str(),
                "function call already resolved; ignoring repeated done event"
            );
            return;
        }
        let Some(call) = state.tool_call_mut(index) else {
            return;
        };

        let arguments = item
            .arguments
            .clone()
            .or_else(|| Some(call.arguments_buffer.clone()).filter(|buffer| !buffer.is_empty()))
            .unwrap_or_else(|| "{}".to_string());
        let name = item
            .name
            .clone()
            .or_else(|| call.name.clone())
            .unwrap_or_default();
        let parsed = parse_partial_json(&arguments);
        call.call_id = Some(call_id.clone());
        call.name = Some(name.clone());
        call.arguments_buffer = arguments.clone();
        call.parsed_arguments = parsed.clone();

        tracing::debug!(
            call_id = call_id.as_str(),
            tool = name.as_str(),
            "dispatching finished function call"
        );
        let result = self.dispatcher.dispatch(&name, parsed).await;
        if result.is_error {
            tracing::debug!(
                call_id = call_id.as_str(),
                tool = name.as_str(),
                "function call resolved to an error payload"
            );
        }

        state.push_item(ConversationItem::FunctionCall {
            id: item.id,
            call_id: call_id.clone(),
            name,
            arguments_json: arguments,
        });
        state.push_item(ConversationItem::function_call_output(
            call_id,
            result.to_output_json(),
        ));
        if let Some(call) = state.tool_call_mut(index) {
            call.output = Some(result.content);
            call.mark_completed();
        }
        state.needs_continuation = true;
        outcome.touch(index);
    }
}

fn apply_text_delta(
    state: &mut TurnState,
    item_id: Option<String>,
    delta: &str,
    outcome: &mut EventOutcome,
) {
    if delta.is_empty() {
        return;
    }
    let index = match state.find_assistant_message(item_id.as_deref()) {
        Some(index) => index,
        None => state.push_record(DisplayRecord::assistant(item_id, "")),
    };
    if let Some(DisplayRecord::Message { text, .. }) = state.display_records.get_mut(index) {
        text.push_str(delta);
        outcome.touch(index);
    }
}

fn apply_item_added(state: &mut TurnState, item: OutputItem, outcome: &mut EventOutcome) {
    if item.kind == OutputItemKind::Message {
        let (text, annotations) = item.message_content();
        let index = state.push_record(DisplayRecord::Message {
            role: MessageRole::Assistant,
            id: item.id.clone(),
            text: text.clone(),
            annotations: annotations.into_iter().map(normalize_annotation).collect(),
        });
        state.push_assistant_item(item.id, text);
        outcome.touch(index);
        return;
    }

    let Some(tool_type) = ToolType::from_item_kind(&item.kind) else {
        tracing::debug!(
            item_type = item.kind.as_str(),
            "output item added with no display effect"
        );
        return;
    };
    let status = match tool_type {
        ToolType::FunctionCall | ToolType::McpCall => ToolCallStatus::InProgress,
        _ => ToolCallStatus::from_item_status(item.status.as_deref()),
    };
    let mut record = ToolCallRecord::new(tool_type, item.id.clone().unwrap_or_default(), status);
    record.name = item.name;
    record.call_id = item.call_id;
    if let Some(arguments) = item.arguments {
        if tool_type == ToolType::McpCall && !arguments.is_empty() {
            record.parsed_arguments = parse_partial_json(&arguments);
        }
        record.arguments_buffer = arguments;
    }
    outcome.touch(state.push_record(DisplayRecord::ToolCall(record)));
}

fn apply_completed(state: &mut TurnState, output: Vec<OutputItem>, outcome: &mut EventOutcome) {
    for item in output {
        let record = match item.kind {
            OutputItemKind::McpListTools => DisplayRecord::McpToolsList {
                tools: item.tools(),
                id: item.id,
                server_label: item.server_label.unwrap_or_default(),
            },
            OutputItemKind::McpApprovalRequest => {
                let Some(id) = item.id else {
                    tracing::warn!("approval request without an id; skipping");
                    continue;
                };
                DisplayRecord::McpApprovalRequest {
                    id,
                    server_label: item.server_label.unwrap_or_default(),
                    name: item.name.unwrap_or_default(),
                    arguments: item.arguments.unwrap_or_default(),
                }
            }
            _ => continue,
        };
        outcome.touch(state.push_record(record));
    }
}

fn with_tool_call<F>(
    state: &mut TurnState,
    item_id: Option<&str>,
    outcome: &mut EventOutcome,
    update: F,
) where
    F: FnOnce(&mut ToolCallRecord),
{
    let Some(index) = item_id.and_then(|id| state.find_tool_call(id)) else {
        drop_unmatched("tool call update", item_id);
        return;
    };
    if let Some(call) = state.tool_call_mut(index) {
        update(call);
        outcome.touch(index);
    }
}

fn with_open_code_interpreter<F>(
    state: &mut TurnState,
    item_id: Option<&str>,
    outcome: &mut EventOutcome,
    update: F,
) where
    F: FnOnce(&mut ToolCallRecord),
{
    let Some(index) = state.find_open_code_interpreter(item_id) else {
        drop_unmatched("code interpreter update", item_id);
        return;
    };
    if let Some(call) = state.tool_call_mut(index) {
        update(call);
        outcome.touch(index);
    }
}

fn drop_unmatched(context: &str, item_id: Option<&str>) {
    tracing::debug!(
        context,
        item_id = item_id.unwrap_or_default(),
        "no matching record; dropping event"
    );
}
