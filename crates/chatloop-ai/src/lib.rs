//! Wire model, stream decoding and the upstream turn client for chatloop.

mod client;
mod events;
pub mod retry;
mod sse;
mod types;

pub use client::{
    HttpTurnClient, TurnClientConfig, REQUEST_ID_HEADER, RETRY_ATTEMPT_HEADER, TURN_RESPONSE_PATH,
};
pub use events::{
    decode_stream_payload, is_lifecycle_type, OutputItem, OutputItemKind, StreamEvent,
};
pub use retry::RetryPolicy;
pub use sse::{parse_frame_block, SseFrame, SseFrameDecoder, DONE_SENTINEL};
pub use types::{
    ChatloopAiError, ConversationItem, ToolDefinition, TurnByteStream, TurnRequest,
    TurnResponseClient, FUNCTION_CALL_OUTPUT_STATUS,
};
