use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chatloop_ai::ToolDefinition;
use jsonschema::validator_for;
use serde_json::{json, Value};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one tool dispatch.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use chatloop_agent_core::ToolExecutionResult;
///
/// let ok = ToolExecutionResult::ok(json!({ "temperature": 21 }));
/// assert!(!ok.is_error);
/// assert_eq!(ok.to_output_json(), r#"{"temperature":21}"#);
///
/// let err = ToolExecutionResult::error(json!({ "error": "boom" }));
/// assert!(err.is_error);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Shorthand for `{"error": message}` payloads.
    pub fn error_message(message: impl Into<String>) -> Self {
        Self::error(json!({ "error": message.into() }))
    }

    /// Compact JSON text sent upstream as the call output.
    pub fn to_output_json(&self) -> String {
        self.content.to_string()
    }
}

/// Trait contract for one locally executed function tool.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Per-call timeout; `None` falls back to the registry default.
    fn timeout(&self, _arguments: &Value) -> Option<Duration> {
        None
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult;
}

/// Resolves a function call by name. Every dispatch yields a payload.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, arguments: Value) -> ToolExecutionResult;
}

#[derive(Clone)]
/// Fixed name-to-handler table with per-dispatch timeouts.
///
/// Names and definitions are listed in first-registration order.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn AgentTool>>,
    registration_order: Vec<String>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.registration_order)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            registration_order: Vec::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Registers a tool under its definition name, replacing any previous handler.
    /// A replaced handler keeps its original position.
    pub fn register<T>(&mut self, tool: T)
    where
        T: AgentTool + 'static,
    {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), Arc::new(tool)).is_none() {
            self.registration_order.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registration_order.clone()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registration_order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, name: &str, arguments: Value) -> ToolExecutionResult {
        let Some(tool) = self.tools.get(name).cloned() else {
            tracing::warn!(tool = name, "dispatch requested for unknown function");
            return ToolExecutionResult::error_message(format!("Unknown function: {name}"));
        };

        let definition = tool.definition();
        if let Err(error) = validate_tool_arguments(&definition, &arguments) {
            return ToolExecutionResult::error_message(error);
        }

        let timeout = tool.timeout(&arguments).unwrap_or(self.default_timeout);
        tracing::debug!(
            tool = name,
            timeout_ms = timeout.as_millis() as u64,
            "dispatching function call"
        );
        match tokio::time::timeout(timeout, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => ToolExecutionResult::error_message(format!(
                "tool '{name}' timed out after {}ms",
                timeout.as_millis()
            )),
        }
    }
}

pub(crate) fn validate_tool_arguments(
    definition: &ToolDefinition,
    arguments: &Value,
) -> Result<(), String> {
    let validator = validator_for(&definition.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", definition.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!(
            "invalid arguments for '{}': {}",
            definition.name, first
        ));
    }
    Ok(())
}
