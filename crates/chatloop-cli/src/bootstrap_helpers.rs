use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chatloop_agent_core::{ChatSession, TurnConfig};
use chatloop_ai::{HttpTurnClient, RetryPolicy, TurnClientConfig};
use chatloop_tools::{
    build_tools_configuration, builtin_tool_registry, FunctionsApiConfig, McpConfig, ToolsState,
    UserLocation, VectorStore, WebSearchConfig,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn turn_client_config(cli: &Cli) -> TurnClientConfig {
    TurnClientConfig {
        api_base: cli.api_base.clone(),
        api_key: cli.api_key.clone(),
        connect_timeout_ms: cli.connect_timeout_ms,
        retry: RetryPolicy {
            max_retries: cli.max_retries,
            budget_ms: cli.retry_budget_ms,
            jitter: cli.retry_jitter,
        },
    }
}

pub(crate) fn functions_api_config(cli: &Cli) -> FunctionsApiConfig {
    FunctionsApiConfig {
        base_url: cli
            .functions_api_base
            .clone()
            .unwrap_or_else(|| cli.api_base.clone()),
        connect_timeout_ms: cli.connect_timeout_ms,
    }
}

pub(crate) fn tools_state(cli: &Cli) -> ToolsState {
    ToolsState {
        web_search_enabled: cli.web_search,
        file_search_enabled: cli.file_search,
        functions_enabled: cli.functions,
        code_interpreter_enabled: cli.code_interpreter,
        vector_store: cli.vector_store_id.as_ref().map(|id| VectorStore {
            id: id.clone(),
            name: String::new(),
        }),
        web_search_config: WebSearchConfig {
            user_location: Some(UserLocation {
                country: cli.web_search_country.clone(),
                region: cli.web_search_region.clone(),
                city: cli.web_search_city.clone(),
                ..UserLocation::approximate()
            }),
        },
        mcp_enabled: cli.mcp,
        mcp_config: McpConfig {
            server_label: cli.mcp_server_label.clone(),
            server_url: cli.mcp_server_url.clone(),
            allowed_tools: cli.mcp_allowed_tools.clone(),
            skip_approval: cli.mcp_skip_approval,
        },
    }
}

/// Wires the HTTP turn client, built-in tools and tools configuration into a session.
pub(crate) fn build_session(cli: &Cli) -> Result<ChatSession> {
    let client = HttpTurnClient::new(turn_client_config(cli))
        .with_context(|| format!("failed to create turn client for {}", cli.api_base))?;
    let registry = builtin_tool_registry(&functions_api_config(cli))
        .context("failed to create functions API client")?
        .with_default_timeout(Duration::from_millis(cli.tool_timeout_ms.max(1)));
    let tools_configuration = build_tools_configuration(&tools_state(cli), &registry.definitions());
    if cli.mcp && (cli.mcp_server_label.is_empty() || cli.mcp_server_url.is_empty()) {
        tracing::warn!("--mcp needs both --mcp-server-label and --mcp-server-url; mcp disabled");
    }

    Ok(ChatSession::new(
        Arc::new(client),
        Arc::new(registry),
        tools_configuration,
        TurnConfig {
            max_rounds: cli.max_rounds.max(1),
        },
    ))
}
