use serde_json::{Map, Value};

use crate::types::ChatloopAiError;

const RESPONSE_PREFIX: &str = "response.";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Output item types the engine treats specially.
pub enum OutputItemKind {
    Message,
    FunctionCall,
    McpCall,
    WebSearchCall,
    FileSearchCall,
    CodeInterpreterCall,
    McpListTools,
    McpApprovalRequest,
    Other(String),
}

impl OutputItemKind {
    fn from_type(item_type: &str) -> Self {
        match item_type {
            "message" => Self::Message,
            "function_call" => Self::FunctionCall,
            "mcp_call" => Self::McpCall,
            "web_search_call" => Self::WebSearchCall,
            "file_search_call" => Self::FileSearchCall,
            "code_interpreter_call" => Self::CodeInterpreterCall,
            "mcp_list_tools" => Self::McpListTools,
            "mcp_approval_request" => Self::McpApprovalRequest,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::FunctionCall => "function_call",
            Self::McpCall => "mcp_call",
            Self::WebSearchCall => "web_search_call",
            Self::FileSearchCall => "file_search_call",
            Self::CodeInterpreterCall => "code_interpreter_call",
            Self::McpListTools => "mcp_list_tools",
            Self::McpApprovalRequest => "mcp_approval_request",
            Self::Other(other) => other.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An output item normalized at the decode boundary.
pub struct OutputItem {
    pub kind: OutputItemKind,
    pub id: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    /// Arguments as a JSON string; object-valued arguments are re-serialized.
    pub arguments: Option<String>,
    pub status: Option<String>,
    pub output: Option<Value>,
    pub server_label: Option<String>,
    /// The object exactly as received, re-sent upstream for passthrough items.
    pub raw: Value,
}

impl OutputItem {
    /// Normalizes a raw item: a list yields its first element, and an item
    /// without a non-empty `type` is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = match value {
            Value::Array(items) => items.first()?.as_object()?,
            Value::Object(object) => object,
            _ => return None,
        };
        let item_type = string_field(object, "type").filter(|kind| !kind.is_empty())?;
        let arguments = match object.get("arguments") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        Some(Self {
            kind: OutputItemKind::from_type(&item_type),
            id: string_field(object, "id"),
            call_id: string_field(object, "call_id"),
            name: string_field(object, "name"),
            arguments,
            status: string_field(object, "status"),
            output: object.get("output").filter(|value| !value.is_null()).cloned(),
            server_label: string_field(object, "server_label"),
            raw: Value::Object(object.clone()),
        })
    }

    /// Text and annotations of a `message` item; content may be a list of
    /// parts, a single part object, or a bare string.
    pub fn message_content(&self) -> (String, Vec<Value>) {
        let mut text = String::new();
        let mut annotations = Vec::new();
        let mut absorb = |part: &Value| match part {
            Value::String(chunk) => text.push_str(chunk),
            Value::Object(part) => {
                if let Some(Value::String(chunk)) = part.get("text") {
                    text.push_str(chunk);
                }
                if let Some(Value::Array(items)) = part.get("annotations") {
                    annotations.extend(items.iter().cloned());
                }
            }
            _ => {}
        };
        match self.raw.get("content") {
            Some(Value::Array(parts)) => parts.iter().for_each(&mut absorb),
            Some(part) => absorb(part),
            None => {}
        }
        (text, annotations)
    }

    /// Item-level list payload for `mcp_list_tools` items.
    pub fn tools(&self) -> Vec<Value> {
        match self.raw.get("tools") {
            Some(Value::Array(tools)) => tools.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One decoded stream payload.
pub enum StreamEvent {
    OutputTextDelta {
        item_id: Option<String>,
        delta: String,
    },
    OutputTextAnnotationAdded {
        item_id: Option<String>,
        annotation: Value,
    },
    OutputItemAdded {
        item: OutputItem,
    },
    OutputItemDone {
        item: OutputItem,
    },
    FunctionCallArgumentsDelta {
        item_id: Option<String>,
        delta: String,
    },
    FunctionCallArgumentsDone {
        item_id: Option<String>,
        arguments: String,
    },
    McpCallArgumentsDelta {
        item_id: Option<String>,
        delta: String,
    },
    McpCallArgumentsDone {
        item_id: Option<String>,
        arguments: String,
    },
    WebSearchCallCompleted {
        item_id: Option<String>,
        output: Option<Value>,
    },
    FileSearchCallCompleted {
        item_id: Option<String>,
        output: Option<Value>,
    },
    CodeInterpreterCodeDelta {
        item_id: Option<String>,
        delta: String,
    },
    CodeInterpreterCodeDone {
        item_id: Option<String>,
        code: String,
    },
    CodeInterpreterCallCompleted {
        item_id: Option<String>,
    },
    Completed {
        output: Vec<OutputItem>,
    },
    /// Known event type with no transcript effect.
    Lifecycle {
        event_type: String,
    },
    /// Backend-reported failure, or a payload that carried no event type.
    Error {
        message: String,
    },
    Unrecognized {
        event_type: String,
    },
    /// Recognized event type whose payload could not be normalized.
    Malformed {
        event_type: String,
        reason: String,
    },
}

impl StreamEvent {
    pub fn label(&self) -> &str {
        match self {
            Self::OutputTextDelta { .. } => "output_text.delta",
            Self::OutputTextAnnotationAdded { .. } => "output_text.annotation.added",
            Self::OutputItemAdded { .. } => "output_item.added",
            Self::OutputItemDone { .. } => "output_item.done",
            Self::FunctionCallArgumentsDelta { .. } => "function_call_arguments.delta",
            Self::FunctionCallArgumentsDone { .. } => "function_call_arguments.done",
            Self::McpCallArgumentsDelta { .. } => "mcp_call_arguments.delta",
            Self::McpCallArgumentsDone { .. } => "mcp_call_arguments.done",
            Self::WebSearchCallCompleted { .. } => "web_search_call.completed",
            Self::FileSearchCallCompleted { .. } => "file_search_call.completed",
            Self::CodeInterpreterCodeDelta { .. } => "code_interpreter_call_code.delta",
            Self::CodeInterpreterCodeDone { .. } => "code_interpreter_call_code.done",
            Self::CodeInterpreterCallCompleted { .. } => "code_interpreter_call.completed",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Lifecycle { event_type }
            | Self::Unrecognized { event_type }
            | Self::Malformed { event_type, .. } => event_type.as_str(),
        }
    }

    /// Decodes one `{"event": .., "data": {..}}` envelope.
    pub fn from_envelope(envelope: &Value) -> Self {
        let Some(object) = envelope.as_object() else {
            return Self::Error {
                message: format!("stream payload is not an object: {}", snippet(envelope)),
            };
        };
        let Some(event_type) = string_field(object, "event").filter(|kind| !kind.is_empty())
        else {
            return match object.get("error") {
                Some(error) => Self::Error {
                    message: error_message(error),
                },
                None => Self::Error {
                    message: format!(
                        "stream payload carried no event type: {}",
                        snippet(envelope)
                    ),
                },
            };
        };
        let empty = Map::new();
        let data = object
            .get("data")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        decode_event(&event_type, data)
    }
}

/// JSON-decodes one SSE data payload into a [`StreamEvent`].
pub fn decode_stream_payload(raw: &str) -> Result<StreamEvent, ChatloopAiError> {
    let envelope: Value = serde_json::from_str(raw).map_err(|error| {
        ChatloopAiError::InvalidStream(format!("failed to parse stream payload: {error}"))
    })?;
    Ok(StreamEvent::from_envelope(&envelope))
}

fn decode_event(event_type: &str, data: &Map<String, Value>) -> StreamEvent {
    let name = event_type
        .strip_prefix(RESPONSE_PREFIX)
        .unwrap_or(event_type);
    let item_id = || string_field(data, "item_id");
    let text = |key: &str| string_field(data, key).unwrap_or_default();

    match name {
        "output_text.delta" => StreamEvent::OutputTextDelta {
            item_id: item_id(),
            delta: text("delta"),
        },
        "output_text.annotation.added" => match data.get("annotation") {
            Some(annotation) if annotation.is_object() => StreamEvent::OutputTextAnnotationAdded {
                item_id: item_id(),
                annotation: annotation.clone(),
            },
            _ => malformed(event_type, "annotation is missing or not an object"),
        },
        "output_item.added" | "output_item.done" => {
            let Some(item) = data.get("item").and_then(OutputItem::from_value) else {
                return malformed(event_type, "item is missing or has no type");
            };
            if name == "output_item.added" {
                StreamEvent::OutputItemAdded { item }
            } else {
                StreamEvent::OutputItemDone { item }
            }
        }
        "function_call_arguments.delta" => StreamEvent::FunctionCallArgumentsDelta {
            item_id: item_id(),
            delta: text("delta"),
        },
        "function_call_arguments.done" => StreamEvent::FunctionCallArgumentsDone {
            item_id: item_id(),
            arguments: arguments_field(data),
        },
        "mcp_call_arguments.delta" => StreamEvent::McpCallArgumentsDelta {
            item_id: item_id(),
            delta: text("delta"),
        },
        "mcp_call_arguments.done" => StreamEvent::McpCallArgumentsDone {
            item_id: item_id(),
            arguments: arguments_field(data),
        },
        "web_search_call.completed" => StreamEvent::WebSearchCallCompleted {
            item_id: item_id(),
            output: data.get("output").filter(|value| !value.is_null()).cloned(),
        },
        "file_search_call.completed" => StreamEvent::FileSearchCallCompleted {
            item_id: item_id(),
            output: data.get("output").filter(|value| !value.is_null()).cloned(),
        },
        "code_interpreter_call_code.delta" => StreamEvent::CodeInterpreterCodeDelta {
            item_id: item_id(),
            delta: text("delta"),
        },
        "code_interpreter_call_code.done" => StreamEvent::CodeInterpreterCodeDone {
            item_id: item_id(),
            code: text("code"),
        },
        "code_interpreter_call.completed" => StreamEvent::CodeInterpreterCallCompleted {
            item_id: item_id(),
        },
        "completed" => {
            let output = data
                .get("response")
                .and_then(|response| response.get("output"))
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(OutputItem::from_value).collect())
                .unwrap_or_default();
            StreamEvent::Completed { output }
        }
        _ if is_error_type(name) => StreamEvent::Error {
            message: data
                .get("error")
                .or_else(|| data.get("message"))
                .map(error_message)
                .unwrap_or_else(|| format!("upstream reported {event_type}")),
        },
        _ if is_lifecycle_type(name) => StreamEvent::Lifecycle {
            event_type: event_type.to_string(),
        },
        _ => StreamEvent::Unrecognized {
            event_type: event_type.to_string(),
        },
    }
}

/// Any type naming an error is surfaced, whatever namespace it sits in.
fn is_error_type(name: &str) -> bool {
    name == "failed"
        || name == "unknown"
        || name.ends_with(".failed")
        || name.to_ascii_lowercase().contains("error")
}

/// Known event types that carry no transcript effect.
pub fn is_lifecycle_type(name: &str) -> bool {
    const EXACT: &[&str] = &[
        "created",
        "in_progress",
        "queued",
        "incomplete",
        "output_text.done",
    ];
    const PREFIXES: &[&str] = &[
        "content_part.",
        "reasoning",
        "refusal.",
        "mcp_list_tools.",
        "mcp_call.",
        "image_generation_call.",
    ];
    const SUFFIXES: &[&str] = &[".in_progress", ".searching", ".interpreting", ".generating"];

    EXACT.contains(&name)
        || PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn malformed(event_type: &str, reason: &str) -> StreamEvent {
    StreamEvent::Malformed {
        event_type: event_type.to_string(),
        reason: reason.to_string(),
    }
}

fn arguments_field(data: &Map<String, Value>) -> String {
    match data.get("arguments") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

fn snippet(value: &Value) -> String {
    let rendered = value.to_string();
    match rendered.char_indices().nth(120) {
        Some((cut, _)) => format!("{}...", &rendered[..cut]),
        None => rendered,
    }
}
