use chatloop_ai::{ConversationItem, OutputItemKind};
use serde::Serialize;
use serde_json::{Map, Value};

/// Assistant greeting every new or reset conversation starts with.
pub const GREETING: &str = "Hi, how can I help you?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    FunctionCall,
    McpCall,
    WebSearchCall,
    FileSearchCall,
    CodeInterpreterCall,
}

impl ToolType {
    pub fn from_item_kind(kind: &OutputItemKind) -> Option<Self> {
        match kind {
            OutputItemKind::FunctionCall => Some(Self::FunctionCall),
            OutputItemKind::McpCall => Some(Self::McpCall),
            OutputItemKind::WebSearchCall => Some(Self::WebSearchCall),
            OutputItemKind::FileSearchCall => Some(Self::FileSearchCall),
            OutputItemKind::CodeInterpreterCall => Some(Self::CodeInterpreterCall),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FunctionCall => "function_call",
            Self::McpCall => "mcp_call",
            Self::WebSearchCall => "web_search_call",
            Self::FileSearchCall => "file_search_call",
            Self::CodeInterpreterCall => "code_interpreter_call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Completed,
}

impl ToolCallStatus {
    pub fn from_item_status(status: Option<&str>) -> Self {
        match status {
            Some("completed") => Self::Completed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Display state of one tool invocation.
pub struct ToolCallRecord {
    pub tool_type: ToolType,
    pub id: String,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments_buffer: String,
    pub parsed_arguments: Value,
    status: ToolCallStatus,
    pub output: Option<Value>,
    pub code: String,
    pub files: Vec<Value>,
}

impl ToolCallRecord {
    pub fn new(tool_type: ToolType, id: impl Into<String>, status: ToolCallStatus) -> Self {
        Self {
            tool_type,
            id: id.into(),
            call_id: None,
            name: None,
            arguments_buffer: String::new(),
            parsed_arguments: Value::Object(Map::new()),
            status,
            output: None,
            code: String::new(),
            files: Vec::new(),
        }
    }

    pub fn status(&self) -> ToolCallStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == ToolCallStatus::Completed
    }

    /// Status only ever moves forward to `completed`.
    pub fn mark_completed(&mut self) {
        self.status = ToolCallStatus::Completed;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// One entry of the rendered transcript.
pub enum DisplayRecord {
    Message {
        role: MessageRole,
        id: Option<String>,
        text: String,
        annotations: Vec<Value>,
    },
    ToolCall(ToolCallRecord),
    McpToolsList {
        id: Option<String>,
        server_label: String,
        tools: Vec<Value>,
    },
    McpApprovalRequest {
        id: String,
        server_label: String,
        name: String,
        arguments: String,
    },
    Error {
        message: String,
    },
}

impl DisplayRecord {
    pub fn assistant(id: Option<String>, text: impl Into<String>) -> Self {
        Self::Message {
            role: MessageRole::Assistant,
            id,
            text: text.into(),
            annotations: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: MessageRole::User,
            id: None,
            text: text.into(),
            annotations: Vec::new(),
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallRecord> {
        match self {
            Self::ToolCall(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Transcript and protocol state of one conversation.
pub struct TurnState {
    pub display_records: Vec<DisplayRecord>,
    pub conversation_items: Vec<ConversationItem>,
    pub needs_continuation: bool,
    pub is_loading: bool,
    /// Conversation item mirrored for each streamed assistant message, keyed by item id.
    assistant_items: Vec<(Option<String>, usize)>,
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnState {
    pub fn new() -> Self {
        Self {
            display_records: vec![DisplayRecord::assistant(None, GREETING)],
            conversation_items: Vec::new(),
            needs_continuation: false,
            is_loading: false,
            assistant_items: Vec::new(),
        }
    }

    /// Restores the greeting-only transcript and clears every flag.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn push_record(&mut self, record: DisplayRecord) -> usize {
        self.display_records.push(record);
        self.display_records.len() - 1
    }

    pub fn push_error(&mut self, message: impl Into<String>) -> usize {
        self.push_record(DisplayRecord::Error {
            message: message.into(),
        })
    }

    pub fn push_item(&mut self, item: ConversationItem) -> usize {
        self.conversation_items.push(item);
        self.conversation_items.len() - 1
    }

    /// Appends an assistant message item and remembers it for later completion.
    pub fn push_assistant_item(&mut self, item_id: Option<String>, text: String) -> usize {
        let index = self.push_item(ConversationItem::assistant(text));
        self.assistant_items.push((item_id, index));
        index
    }

    /// Overwrites the mirrored assistant item for `item_id`, or appends one.
    pub fn complete_assistant_item(&mut self, item_id: Option<&str>, text: String) {
        let mirrored = self
            .assistant_items
            .iter()
            .rev()
            .find(|(id, _)| id.as_deref() == item_id)
            .map(|(_, index)| *index);
        match mirrored.and_then(|index| self.conversation_items.get_mut(index)) {
            Some(ConversationItem::AssistantMessage { content }) => *content = text,
            _ => {
                self.push_assistant_item(item_id.map(str::to_string), text);
            }
        }
    }

    /// Newest-first lookup of the assistant message a text event belongs to.
    ///
    /// The search stops at the latest user message so earlier turns (and the
    /// greeting) are never extended.
    pub fn find_assistant_message(&self, item_id: Option<&str>) -> Option<usize> {
        for (index, record) in self.display_records.iter().enumerate().rev() {
            match record {
                DisplayRecord::Message {
                    role: MessageRole::User,
                    ..
                } => return None,
                DisplayRecord::Message {
                    role: MessageRole::Assistant,
                    id,
                    ..
                } if id.as_deref() == item_id => return Some(index),
                _ => {}
            }
        }
        None
    }

    pub fn find_tool_call(&self, id: &str) -> Option<usize> {
        self.display_records
            .iter()
            .rposition(|record| record.as_tool_call().is_some_and(|call| call.id == id))
    }

    /// Newest open code-interpreter call; any open one matches when `id` is absent.
    pub fn find_open_code_interpreter(&self, id: Option<&str>) -> Option<usize> {
        self.display_records.iter().rposition(|record| {
            record.as_tool_call().is_some_and(|call| {
                call.tool_type == ToolType::CodeInterpreterCall
                    && !call.is_completed()
                    && id.map_or(true, |id| call.id == id)
            })
        })
    }

    pub fn tool_call_mut(&mut self, index: usize) -> Option<&mut ToolCallRecord> {
        match self.display_records.get_mut(index) {
            Some(DisplayRecord::ToolCall(record)) => Some(record),
            _ => None,
        }
    }

    /// Call ids of `FunctionCall` items not followed immediately by exactly one output.
    pub fn unpaired_call_ids(&self) -> Vec<String> {
        let items = &self.conversation_items;
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match item {
                ConversationItem::FunctionCall { call_id, .. } => Some((index, call_id)),
                _ => None,
            })
            .filter(|(index, call_id)| {
                let next_is_output = matches!(
                    items.get(index + 1),
                    Some(ConversationItem::FunctionCallOutput { call_id: next, .. }) if next == *call_id
                );
                let outputs = items
                    .iter()
                    .filter(|item| {
                        item.is_function_call_output() && item.call_id() == Some(call_id.as_str())
                    })
                    .count();
                !(next_is_output && outputs == 1)
            })
            .map(|(_, call_id)| call_id.clone())
            .collect()
    }
}

/// Adds `fileId` / `containerId` aliases next to the snake-case annotation keys.
pub fn normalize_annotation(annotation: Value) -> Value {
    let Value::Object(mut fields) = annotation else {
        return annotation;
    };
    for (snake, camel) in [("file_id", "fileId"), ("container_id", "containerId")] {
        let alias = fields
            .get(snake)
            .filter(|value| !value.is_null())
            .or_else(|| fields.get(camel))
            .cloned()
            .unwrap_or(Value::Null);
        fields.insert(camel.to_string(), alias);
    }
    Value::Object(fields)
}
