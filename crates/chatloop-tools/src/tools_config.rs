//! Assembles the `toolsConfiguration` array sent upstream with every turn.

use chatloop_ai::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLocation {
    #[serde(rename = "type")]
    pub kind: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

impl UserLocation {
    pub fn approximate() -> Self {
        Self {
            kind: "approximate".to_string(),
            ..Self::default()
        }
    }

    fn is_set(&self) -> bool {
        !(self.country.is_empty() && self.region.is_empty() && self.city.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub user_location: Option<UserLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStore {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub server_label: String,
    pub server_url: String,
    /// Comma-separated tool names; blank allows every tool.
    pub allowed_tools: String,
    pub skip_approval: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_label: String::new(),
            server_url: String::new(),
            allowed_tools: String::new(),
            skip_approval: true,
        }
    }
}

/// Which hosted and local tools are offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsState {
    pub web_search_enabled: bool,
    pub file_search_enabled: bool,
    pub functions_enabled: bool,
    pub code_interpreter_enabled: bool,
    pub vector_store: Option<VectorStore>,
    pub web_search_config: WebSearchConfig,
    pub mcp_enabled: bool,
    pub mcp_config: McpConfig,
}

impl Default for ToolsState {
    fn default() -> Self {
        Self {
            web_search_enabled: true,
            file_search_enabled: false,
            functions_enabled: true,
            code_interpreter_enabled: true,
            vector_store: None,
            web_search_config: WebSearchConfig {
                user_location: Some(UserLocation::approximate()),
            },
            mcp_enabled: false,
            mcp_config: McpConfig::default(),
        }
    }
}

/// Builds the upstream tools array.
///
/// `functions` supplies the local function tools; each becomes a strict
/// entry whose properties are all required.
pub fn build_tools_configuration(state: &ToolsState, functions: &[ToolDefinition]) -> Value {
    let mut tools = Vec::new();

    if state.web_search_enabled {
        let mut web_search = json!({ "type": "web_search" });
        if let Some(location) = state
            .web_search_config
            .user_location
            .as_ref()
            .filter(|location| location.is_set())
        {
            web_search["user_location"] = json!(location);
        }
        tools.push(web_search);
    }

    if state.file_search_enabled {
        let vector_store_ids = state
            .vector_store
            .iter()
            .map(|store| store.id.clone())
            .collect::<Vec<_>>();
        tools.push(json!({ "type": "file_search", "vector_store_ids": vector_store_ids }));
    }

    if state.code_interpreter_enabled {
        tools.push(json!({ "type": "code_interpreter", "container": { "type": "auto" } }));
    }

    if state.functions_enabled {
        tools.extend(functions.iter().map(strict_function_entry));
    }

    if state.mcp_enabled {
        if let Some(mcp) = mcp_entry(&state.mcp_config) {
            tools.push(mcp);
        }
    }

    Value::Array(tools)
}

fn strict_function_entry(definition: &ToolDefinition) -> Value {
    let properties = definition
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required = properties.keys().cloned().collect::<Vec<_>>();
    json!({
        "type": "function",
        "name": definition.name,
        "description": definition.description,
        "parameters": {
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
            "additionalProperties": false,
        },
        "strict": true,
    })
}

fn mcp_entry(config: &McpConfig) -> Option<Value> {
    if config.server_label.is_empty() || config.server_url.is_empty() {
        tracing::debug!("mcp enabled without server label and url; skipping");
        return None;
    }

    let mut entry = Map::new();
    entry.insert("type".to_string(), json!("mcp"));
    entry.insert("server_label".to_string(), json!(config.server_label));
    entry.insert("server_url".to_string(), json!(config.server_url));
    if config.skip_approval {
        entry.insert("require_approval".to_string(), json!("never"));
    }
    let allowed_tools = config
        .allowed_tools
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if !allowed_tools.is_empty() {
        entry.insert("allowed_tools".to_string(), json!(allowed_tools));
    }
    Some(Value::Object(entry))
}
