//! Streaming tool-call orchestration for chatloop conversations.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chatloop_ai::{ChatloopAiError, ConversationItem, TurnResponseClient};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

mod dispatcher;
mod event_processor;
mod partial_json;
mod transcript;
mod turn_loop;

pub use dispatcher::{
    AgentTool, ToolDispatcher, ToolExecutionResult, ToolRegistry, DEFAULT_TOOL_TIMEOUT,
};
pub use event_processor::{EventOutcome, EventProcessor};
pub use partial_json::parse_partial_json;
pub use transcript::{
    normalize_annotation, DisplayRecord, MessageRole, ToolCallRecord, ToolCallStatus, ToolType,
    TurnState, GREETING,
};
pub use turn_loop::{run_turn, TurnContext, TurnSummary};

/// Limits applied to every turn.
///
/// # Examples
///
/// ```
/// use chatloop_agent_core::TurnConfig;
///
/// let config = TurnConfig { max_rounds: 3 };
/// assert_eq!(TurnConfig::default().max_rounds, 8);
/// assert_eq!(config.max_rounds, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    /// Upstream calls allowed per turn, counting tool-output continuations.
    pub max_rounds: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self { max_rounds: 8 }
    }
}

/// Cooperative cancellation token shared between a turn and its caller.
#[derive(Debug, Clone, Default)]
pub struct CooperativeCancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CooperativeCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes pending waiters.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Notifications delivered to session subscribers while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnStart,
    RoundStart {
        round: usize,
    },
    RecordUpdated {
        index: usize,
        record: DisplayRecord,
    },
    RoundEnd {
        round: usize,
        needs_continuation: bool,
        /// Whether upstream sent its `completed` event before the stream ended.
        response_completed: bool,
    },
    TurnEnd {
        rounds: usize,
        error: Option<String>,
    },
}

/// Enumerates supported `TurnError` values.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Ai(#[from] ChatloopAiError),
    #[error("turn cancelled")]
    Cancelled,
    #[error("turn exceeded max rounds ({0})")]
    MaxRoundsExceeded(usize),
    #[error("function calls without a paired output: {}", call_ids.join(", "))]
    UnpairedFunctionCalls { call_ids: Vec<String> },
    #[error("message is empty")]
    EmptyMessage,
    #[error("no pending approval request with id '{0}'")]
    UnknownApprovalRequest(String),
}

type TurnObserver = Arc<dyn Fn(&TurnEvent) + Send + Sync>;

/// One conversation: its transcript plus the collaborators a turn needs.
///
/// The transcript lock is held for a whole turn, so a second message waits
/// for the running turn instead of interleaving with it.
pub struct ChatSession {
    client: Arc<dyn TurnResponseClient>,
    dispatcher: Arc<dyn ToolDispatcher>,
    tools_configuration: Value,
    config: TurnConfig,
    state: AsyncMutex<TurnState>,
    observers: Vec<TurnObserver>,
    cancellation_token: Mutex<Option<CooperativeCancellationToken>>,
}

impl ChatSession {
    pub fn new(
        client: Arc<dyn TurnResponseClient>,
        dispatcher: Arc<dyn ToolDispatcher>,
        tools_configuration: Value,
        config: TurnConfig,
    ) -> Self {
        Self {
            client,
            dispatcher,
            tools_configuration,
            config,
            state: AsyncMutex::new(TurnState::new()),
            observers: Vec::new(),
            cancellation_token: Mutex::new(None),
        }
    }

    /// Adds a subscriber for [`TurnEvent`]s. Panicking subscribers are isolated.
    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&TurnEvent) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(handler));
    }

    /// Token consulted by subsequent turns; `None` disables cancellation.
    pub fn set_cancellation_token(&self, token: Option<CooperativeCancellationToken>) {
        if let Ok(mut slot) = self.cancellation_token.lock() {
            *slot = token;
        }
    }

    pub fn tools_configuration(&self) -> &Value {
        &self.tools_configuration
    }

    /// True while a turn holds the transcript.
    pub fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    pub async fn snapshot(&self) -> TurnState {
        self.state.lock().await.clone()
    }

    /// Appends the user's message and runs a turn to completion.
    pub async fn send_user_message(&self, text: &str) -> Result<TurnSummary, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        let mut state = self.state.lock().await;
        let index = state.push_record(DisplayRecord::user(text));
        state.push_item(ConversationItem::user(text));
        if let Some(record) = state.display_records.get(index) {
            self.emit(&TurnEvent::RecordUpdated {
                index,
                record: record.clone(),
            });
        }
        self.run_locked(&mut state).await
    }

    /// Answers a pending MCP approval request and runs a turn.
    pub async fn respond_to_approval(
        &self,
        approval_request_id: &str,
        approve: bool,
    ) -> Result<TurnSummary, TurnError> {
        let mut state = self.state.lock().await;
        let pending = state.display_records.iter().any(|record| {
            matches!(record, DisplayRecord::McpApprovalRequest { id, .. } if id == approval_request_id)
        });
        if !pending {
            return Err(TurnError::UnknownApprovalRequest(
                approval_request_id.to_string(),
            ));
        }
        state.push_item(ConversationItem::approval_response(
            approve,
            approval_request_id,
        ));
        self.run_locked(&mut state).await
    }

    /// Restores the greeting-only transcript once any running turn finishes.
    pub async fn reset(&self) {
        self.state.lock().await.reset();
        tracing::debug!("conversation reset");
    }

    async fn run_locked(&self, state: &mut TurnState) -> Result<TurnSummary, TurnError> {
        let token = self
            .cancellation_token
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        let observer = |event: &TurnEvent| self.emit(event);
        let context = TurnContext {
            client: self.client.as_ref(),
            dispatcher: self.dispatcher.as_ref(),
            tools_configuration: &self.tools_configuration,
            config: &self.config,
            cancellation_token: token.as_ref(),
            observer: &observer,
        };
        run_turn(state, &context).await
    }

    fn emit(&self, event: &TurnEvent) {
        for handler in &self.observers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
        }
    }
}

#[cfg(test)]
mod tests;
