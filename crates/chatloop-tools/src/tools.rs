use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chatloop_agent_core::{AgentTool, ToolExecutionResult, ToolRegistry};
use chatloop_ai::ToolDefinition;
use serde_json::{json, Value};

mod registry_core;

pub use registry_core::*;

const FUNCTIONS_PATH_PREFIX: &str = "/api/functions";
const FUNCTION_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const SCRAPE_DEFAULT_WAIT_SECS: u64 = 30;
const SCRAPE_TIMEOUT_MARGIN_SECS: u64 = 10;
const ERROR_DETAILS_MAX_CHARS: usize = 200;
const SCRAPE_ERROR_DETAILS_MAX_CHARS: usize = 500;
const NO_ERROR_DETAILS: &str = "No error details";

/// Shared HTTP handle for the functions API.
#[derive(Debug, Clone)]
pub struct FunctionsApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug)]
struct FunctionResponse {
    status: u16,
    success: bool,
    body: String,
}

impl FunctionsApiClient {
    pub fn new(config: &FunctionsApiConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn function_url(&self, function: &str) -> String {
        format!("{}{FUNCTIONS_PATH_PREFIX}/{function}", self.base_url)
    }

    async fn get(
        &self,
        function: &str,
        query: &[(&str, String)],
    ) -> Result<FunctionResponse, reqwest::Error> {
        let response = self
            .http
            .get(self.function_url(function))
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(FunctionResponse {
            status: status.as_u16(),
            success: status.is_success(),
            body,
        })
    }
}

/// Calls the weather function with `location` and `unit`.
pub struct GetWeatherTool {
    client: Arc<FunctionsApiClient>,
}

impl GetWeatherTool {
    pub fn new(client: Arc<FunctionsApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for GetWeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Get the weather for a given location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "Location to get weather for"
                    },
                    "unit": {
                        "type": "string",
                        "description": "Unit to get weather in",
                        "enum": ["celsius", "fahrenheit"]
                    }
                },
                "required": ["location"],
                "additionalProperties": false
            }),
        }
    }

    fn timeout(&self, _arguments: &Value) -> Option<Duration> {
        Some(FUNCTION_CALL_TIMEOUT)
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let location = string_argument(&arguments, "location").unwrap_or_default();
        let unit = string_argument(&arguments, "unit").unwrap_or_else(|| "celsius".to_string());
        let outcome = self
            .client
            .get("get_weather", &[("location", location), ("unit", unit)])
            .await;
        function_result("get_weather", outcome, ERROR_DETAILS_MAX_CHARS)
    }
}

/// Fetches a programming joke.
pub struct GetJokeTool {
    client: Arc<FunctionsApiClient>,
}

impl GetJokeTool {
    pub fn new(client: Arc<FunctionsApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for GetJokeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_joke".to_string(),
            description: "Get a programming joke".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    fn timeout(&self, _arguments: &Value) -> Option<Duration> {
        Some(FUNCTION_CALL_TIMEOUT)
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        let outcome = self.client.get("get_joke", &[]).await;
        function_result("get_joke", outcome, ERROR_DETAILS_MAX_CHARS)
    }
}

/// Renders a page through the scraping function, optionally waiting for scripts.
pub struct ScrapeWebsiteTool {
    client: Arc<FunctionsApiClient>,
}

impl ScrapeWebsiteTool {
    pub fn new(client: Arc<FunctionsApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTool for ScrapeWebsiteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "scrape_website".to_string(),
            description: "Scrape a website with full JavaScript rendering support. Use this when \
                you need to access content that requires JavaScript to load, such as dynamic web \
                pages, single-page applications (SPAs), or sites with client-side rendering. This \
                is more powerful than the basic web_search tool."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The full URL of the website to scrape (e.g., https://example.com)"
                    },
                    "wait_for_js": {
                        "type": "boolean",
                        "description": "Whether to wait for JavaScript to execute and render content. Set to true for JavaScript-heavy sites. Defaults to false if not specified."
                    },
                    "wait_timeout": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Timeout in seconds for page load. Defaults to 30 seconds if not specified."
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    fn timeout(&self, arguments: &Value) -> Option<Duration> {
        Some(scrape_timeout(arguments))
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let url = string_argument(&arguments, "url").unwrap_or_default();
        let mut query = vec![("url", url.clone())];
        if let Some(wait_for_js) = arguments.get("wait_for_js").and_then(Value::as_bool) {
            query.push(("wait_for_js", wait_for_js.to_string()));
        }
        if let Some(wait_timeout) = arguments.get("wait_timeout").and_then(Value::as_u64) {
            query.push(("wait_timeout", wait_timeout.to_string()));
        }
        tracing::debug!(
            url = url.as_str(),
            timeout_secs = scrape_timeout(&arguments).as_secs(),
            "calling scrape_website"
        );

        let outcome = self.client.get("scrape_website", &query).await;
        let mut result = function_result("scrape_website", outcome, SCRAPE_ERROR_DETAILS_MAX_CHARS);
        if let Some(payload) = result.content.as_object_mut() {
            if payload.get("details").and_then(Value::as_str) == Some("") {
                payload.insert("details".to_string(), json!(NO_ERROR_DETAILS));
            }
            if payload.contains_key("details") {
                payload.insert("url".to_string(), json!(url));
            }
        }
        result
    }
}

/// Page-load wait plus a fixed margin for the round trip.
pub fn scrape_timeout(arguments: &Value) -> Duration {
    let wait = arguments
        .get("wait_timeout")
        .and_then(Value::as_u64)
        .unwrap_or(SCRAPE_DEFAULT_WAIT_SECS);
    Duration::from_secs(wait.saturating_add(SCRAPE_TIMEOUT_MARGIN_SECS))
}

fn string_argument(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn function_result(
    function: &str,
    outcome: Result<FunctionResponse, reqwest::Error>,
    details_max_chars: usize,
) -> ToolExecutionResult {
    let response = match outcome {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(function, error = %error, "function request failed");
            return ToolExecutionResult::error_message(error.to_string());
        }
    };

    if !response.success {
        tracing::warn!(function, status = response.status, "function call failed");
        return ToolExecutionResult::error(json!({
            "error": format!("Function call failed: {}", response.status),
            "details": truncate_chars(&response.body, details_max_chars),
        }));
    }

    match serde_json::from_str::<Value>(&response.body) {
        Ok(content) => ToolExecutionResult::ok(content),
        Err(error) => ToolExecutionResult::error_message(format!(
            "invalid JSON returned by {function}: {error}"
        )),
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
