use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(
    name = "chatloop",
    about = "Terminal chat client that streams turns and runs function tools locally",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "CHATLOOP_API_BASE",
        default_value = "http://localhost:8000",
        help = "Base URL of the backend serving /api/turn_response"
    )]
    pub(crate) api_base: String,

    #[arg(
        long,
        env = "CHATLOOP_API_KEY",
        hide_env_values = true,
        help = "Optional bearer token sent with every turn request"
    )]
    pub(crate) api_key: Option<String>,

    #[arg(
        long = "functions-api-base",
        env = "CHATLOOP_FUNCTIONS_API_BASE",
        help = "Base URL for /api/functions/*; defaults to --api-base"
    )]
    pub(crate) functions_api_base: Option<String>,

    #[arg(
        long,
        help = "Send a single message, print the reply and exit instead of starting the REPL"
    )]
    pub(crate) prompt: Option<String>,

    #[arg(
        long = "print-tools-config",
        default_value_t = false,
        help = "Print the tools configuration that would be sent upstream and exit"
    )]
    pub(crate) print_tools_config: bool,

    #[arg(
        long = "web-search",
        env = "CHATLOOP_WEB_SEARCH",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offer the hosted web search tool"
    )]
    pub(crate) web_search: bool,

    #[arg(long = "web-search-country", env = "CHATLOOP_WEB_SEARCH_COUNTRY", default_value = "")]
    pub(crate) web_search_country: String,

    #[arg(long = "web-search-region", env = "CHATLOOP_WEB_SEARCH_REGION", default_value = "")]
    pub(crate) web_search_region: String,

    #[arg(long = "web-search-city", env = "CHATLOOP_WEB_SEARCH_CITY", default_value = "")]
    pub(crate) web_search_city: String,

    #[arg(
        long = "file-search",
        env = "CHATLOOP_FILE_SEARCH",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offer the hosted file search tool over --vector-store-id"
    )]
    pub(crate) file_search: bool,

    #[arg(long = "vector-store-id", env = "CHATLOOP_VECTOR_STORE_ID")]
    pub(crate) vector_store_id: Option<String>,

    #[arg(
        long = "functions",
        env = "CHATLOOP_FUNCTIONS",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offer the built-in function tools (get_weather, get_joke, scrape_website)"
    )]
    pub(crate) functions: bool,

    #[arg(
        long = "code-interpreter",
        env = "CHATLOOP_CODE_INTERPRETER",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offer the hosted code interpreter"
    )]
    pub(crate) code_interpreter: bool,

    #[arg(
        long = "mcp",
        env = "CHATLOOP_MCP",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Offer a remote MCP server; requires --mcp-server-label and --mcp-server-url"
    )]
    pub(crate) mcp: bool,

    #[arg(long = "mcp-server-label", env = "CHATLOOP_MCP_SERVER_LABEL", default_value = "")]
    pub(crate) mcp_server_label: String,

    #[arg(long = "mcp-server-url", env = "CHATLOOP_MCP_SERVER_URL", default_value = "")]
    pub(crate) mcp_server_url: String,

    #[arg(
        long = "mcp-allowed-tools",
        env = "CHATLOOP_MCP_ALLOWED_TOOLS",
        default_value = "",
        help = "Comma-separated MCP tool names; empty allows all"
    )]
    pub(crate) mcp_allowed_tools: String,

    #[arg(
        long = "mcp-skip-approval",
        env = "CHATLOOP_MCP_SKIP_APPROVAL",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Ask upstream never to require approval for MCP calls"
    )]
    pub(crate) mcp_skip_approval: bool,

    #[arg(
        long = "connect-timeout-ms",
        env = "CHATLOOP_CONNECT_TIMEOUT_MS",
        default_value_t = 10_000,
        help = "Connect timeout for upstream and functions API requests"
    )]
    pub(crate) connect_timeout_ms: u64,

    #[arg(
        long = "max-retries",
        env = "CHATLOOP_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for a turn request that fails before streaming starts"
    )]
    pub(crate) max_retries: usize,

    #[arg(
        long = "retry-budget-ms",
        env = "CHATLOOP_RETRY_BUDGET_MS",
        default_value_t = 0,
        help = "Total time allowed for retries; 0 disables the budget"
    )]
    pub(crate) retry_budget_ms: u64,

    #[arg(
        long = "retry-jitter",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub(crate) retry_jitter: bool,

    #[arg(
        long = "tool-timeout-ms",
        env = "CHATLOOP_TOOL_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "Default timeout for a function tool without its own limit"
    )]
    pub(crate) tool_timeout_ms: u64,

    #[arg(
        long = "max-rounds",
        env = "CHATLOOP_MAX_ROUNDS",
        default_value_t = 8,
        help = "Upstream calls allowed per turn, counting tool-output continuations"
    )]
    pub(crate) max_rounds: usize,

    #[arg(
        long = "turn-timeout-ms",
        env = "CHATLOOP_TURN_TIMEOUT_MS",
        default_value_t = 0,
        help = "Cancel a turn after this many milliseconds; 0 disables the timeout"
    )]
    pub(crate) turn_timeout_ms: u64,
}
