//! Plain-text rendering of turn events for the terminal.

use std::{collections::BTreeMap, sync::Mutex};

use chatloop_agent_core::{DisplayRecord, MessageRole, ToolCallStatus, TurnEvent};
use serde_json::Value;

const TOOL_OUTPUT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Default)]
struct RenderState {
    /// Assistant record currently streaming to the terminal and the bytes already shown.
    streaming: Option<(usize, usize)>,
    /// Last line printed for each non-streaming record.
    printed: BTreeMap<usize, String>,
}

/// Turns [`TurnEvent`]s into incremental terminal output.
#[derive(Debug, Default)]
pub(crate) struct TranscriptRenderer {
    state: Mutex<RenderState>,
}

impl TranscriptRenderer {
    /// Forgets rendered records, e.g. after the conversation was reset.
    pub(crate) fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = RenderState::default();
        }
    }

    /// Text to write for `event`; empty when nothing changed visibly.
    pub(crate) fn render_event(&self, event: &TurnEvent) -> String {
        let Ok(mut state) = self.state.lock() else {
            return String::new();
        };
        match event {
            TurnEvent::RecordUpdated { index, record } => render_record(&mut state, *index, record),
            TurnEvent::TurnEnd { .. } => close_stream(&mut state),
            TurnEvent::TurnStart | TurnEvent::RoundStart { .. } | TurnEvent::RoundEnd { .. } => {
                String::new()
            }
        }
    }
}

fn render_record(state: &mut RenderState, index: usize, record: &DisplayRecord) -> String {
    match record {
        DisplayRecord::Message {
            role: MessageRole::Assistant,
            text,
            ..
        } => render_assistant_text(state, index, text),
        DisplayRecord::Message {
            role: MessageRole::User,
            ..
        } => String::new(),
        other => {
            let line = record_line(other);
            if state.printed.get(&index) == Some(&line) {
                return String::new();
            }
            let mut output = close_stream(state);
            output.push_str(&line);
            output.push('\n');
            state.printed.insert(index, line);
            output
        }
    }
}

fn render_assistant_text(state: &mut RenderState, index: usize, text: &str) -> String {
    match state.streaming {
        Some((current, shown)) if current == index => {
            if let Some(suffix) = text.get(shown..) {
                state.streaming = Some((index, text.len()));
                return suffix.to_string();
            }
            state.streaming = Some((index, text.len()));
            format!("\nassistant> {text}")
        }
        _ => {
            let mut output = close_stream(state);
            output.push_str("assistant> ");
            output.push_str(text);
            state.streaming = Some((index, text.len()));
            output
        }
    }
}

fn close_stream(state: &mut RenderState) -> String {
    match state.streaming.take() {
        Some(_) => "\n".to_string(),
        None => String::new(),
    }
}

fn record_line(record: &DisplayRecord) -> String {
    match record {
        DisplayRecord::ToolCall(call) => {
            let label = call
                .name
                .as_deref()
                .unwrap_or_else(|| call.tool_type.as_str());
            match call.status() {
                ToolCallStatus::InProgress => format!("[{label}] running"),
                ToolCallStatus::Completed => match &call.output {
                    Some(output) => format!("[{label}] done: {}", preview(output)),
                    None => format!("[{label}] done"),
                },
            }
        }
        DisplayRecord::McpToolsList {
            server_label,
            tools,
            ..
        } => format!("[mcp] {server_label}: {} tools available", tools.len()),
        DisplayRecord::McpApprovalRequest {
            id,
            server_label,
            name,
            arguments,
        } => format!(
            "[approval] {server_label}.{name} {arguments} (reply /approve {id} or /deny {id})"
        ),
        DisplayRecord::Error { message } => format!("error: {message}"),
        DisplayRecord::Message { text, .. } => text.clone(),
    }
}

fn preview(output: &Value) -> String {
    let text = match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match text.char_indices().nth(TOOL_OUTPUT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
