use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

/// Status attached to every `function_call_output` item sent upstream.
pub const FUNCTION_CALL_OUTPUT_STATUS: &str = "completed";

#[derive(Debug, Clone, PartialEq)]
/// Protocol-level conversation item re-sent to the upstream model on every call.
pub enum ConversationItem {
    UserMessage {
        content: String,
    },
    AssistantMessage {
        content: String,
    },
    FunctionCall {
        id: Option<String>,
        call_id: String,
        name: String,
        arguments_json: String,
    },
    FunctionCallOutput {
        call_id: String,
        status: String,
        output_json: String,
    },
    ApprovalResponse {
        approve: bool,
        approval_request_id: String,
    },
    /// Hosted-tool output item re-sent verbatim so the upstream sees its own work.
    Passthrough {
        item: Value,
    },
}

impl ConversationItem {
    pub fn user(content: impl Into<String>) -> Self {
        Self::UserMessage {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::AssistantMessage {
            content: content.into(),
        }
    }

    pub fn function_call_output(call_id: impl Into<String>, output_json: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            status: FUNCTION_CALL_OUTPUT_STATUS.to_string(),
            output_json: output_json.into(),
        }
    }

    pub fn approval_response(approve: bool, approval_request_id: impl Into<String>) -> Self {
        Self::ApprovalResponse {
            approve,
            approval_request_id: approval_request_id.into(),
        }
    }

    /// Returns the call id for function calls and their outputs.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::FunctionCall { call_id, .. } | Self::FunctionCallOutput { call_id, .. } => {
                Some(call_id.as_str())
            }
            _ => None,
        }
    }

    pub fn is_function_call(&self) -> bool {
        matches!(self, Self::FunctionCall { .. })
    }

    pub fn is_function_call_output(&self) -> bool {
        matches!(self, Self::FunctionCallOutput { .. })
    }

    /// Renders the item in the upstream Responses-style input format.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::UserMessage { content } => json!({
                "role": "user",
                "content": content,
            }),
            Self::AssistantMessage { content } => json!({
                "role": "assistant",
                "content": [{ "type": "output_text", "text": content }],
            }),
            Self::FunctionCall {
                id,
                call_id,
                name,
                arguments_json,
            } => {
                let mut item = json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "arguments": arguments_json,
                });
                if let Some(id) = id {
                    item["id"] = Value::String(id.clone());
                }
                item
            }
            Self::FunctionCallOutput {
                call_id,
                status,
                output_json,
            } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "status": status,
                "output": output_json,
            }),
            Self::ApprovalResponse {
                approve,
                approval_request_id,
            } => json!({
                "type": "mcp_approval_response",
                "approve": approve,
                "approval_request_id": approval_request_id,
            }),
            Self::Passthrough { item } => item.clone(),
        }
    }
}

impl Serialize for ConversationItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Function tool signature exposed to the model.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Body of one upstream streaming call.
pub struct TurnRequest {
    pub conversation_items: Vec<ConversationItem>,
    /// Assembled by the tools collaborator; opaque to the engine.
    pub tools_configuration: Value,
}

#[derive(Debug, Error)]
/// Enumerates supported `ChatloopAiError` values.
pub enum ChatloopAiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid stream: {0}")]
    InvalidStream(String),
}

/// Raw upstream bytes, chunked however the transport delivered them.
pub type TurnByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChatloopAiError>> + Send>>;

#[async_trait]
/// Trait contract for opening one upstream streaming call.
pub trait TurnResponseClient: Send + Sync {
    async fn open_stream(&self, request: &TurnRequest) -> Result<TurnByteStream, ChatloopAiError>;
}
