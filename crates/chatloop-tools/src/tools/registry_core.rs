//! Functions API configuration and built-in tool registration.

use super::*;

pub const DEFAULT_FUNCTIONS_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_FUNCTIONS_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Names of the function tools served by the functions API, in registration order.
pub const BUILTIN_FUNCTION_TOOL_NAMES: &[&str] = &["get_weather", "get_joke", "scrape_website"];

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the built-in function tools send their requests.
pub struct FunctionsApiConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
}

impl Default for FunctionsApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FUNCTIONS_API_BASE.to_string(),
            connect_timeout_ms: DEFAULT_FUNCTIONS_CONNECT_TIMEOUT_MS,
        }
    }
}

/// Registers every built-in function tool against `client`.
pub fn register_builtin_tools(registry: &mut ToolRegistry, client: Arc<FunctionsApiClient>) {
    registry.register(GetWeatherTool::new(Arc::clone(&client)));
    registry.register(GetJokeTool::new(Arc::clone(&client)));
    registry.register(ScrapeWebsiteTool::new(client));
}

/// Builds a registry holding the built-in function tools.
pub fn builtin_tool_registry(config: &FunctionsApiConfig) -> Result<ToolRegistry, reqwest::Error> {
    let client = Arc::new(FunctionsApiClient::new(config)?);
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, client);
    tracing::debug!(
        base_url = config.base_url.as_str(),
        tools = ?registry.tool_names(),
        "registered built-in function tools"
    );
    Ok(registry)
}
