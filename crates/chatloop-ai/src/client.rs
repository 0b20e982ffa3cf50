use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_status, is_retryable_transport_error, new_request_id, retry_after_ms,
        RetryPolicy,
    },
    ChatloopAiError, TurnByteStream, TurnRequest, TurnResponseClient,
};

pub const TURN_RESPONSE_PATH: &str = "/api/turn_response";
pub const REQUEST_ID_HEADER: &str = "x-chatloop-request-id";
pub const RETRY_ATTEMPT_HEADER: &str = "x-chatloop-retry-attempt";
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Debug, Clone)]
/// Connection settings for the upstream turn endpoint.
pub struct TurnClientConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub connect_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for TurnClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            api_key: None,
            connect_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
/// Streams `POST /api/turn_response` over HTTP.
pub struct HttpTurnClient {
    client: reqwest::Client,
    config: TurnClientConfig,
}

impl HttpTurnClient {
    pub fn new(config: TurnClientConfig) -> Result<Self, ChatloopAiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(api_key) = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        {
            let bearer = format!("Bearer {api_key}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|error| {
                    ChatloopAiError::InvalidStream(format!("invalid API key header: {error}"))
                })?,
            );
        }

        // No overall timeout: a turn stream stays open as long as the model keeps talking.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TurnClientConfig {
        &self.config
    }

    pub fn turn_response_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with(TURN_RESPONSE_PATH) {
            return base.to_string();
        }
        format!("{base}{TURN_RESPONSE_PATH}")
    }
}

#[async_trait]
impl TurnResponseClient for HttpTurnClient {
    async fn open_stream(&self, request: &TurnRequest) -> Result<TurnByteStream, ChatloopAiError> {
        let url = self.turn_response_url();
        let policy = self.config.retry;
        let started = Instant::now();
        let mut attempt = 0_usize;

        loop {
            let request_id = new_request_id();
            tracing::debug!(
                url = url.as_str(),
                request_id = request_id.as_str(),
                attempt,
                items = request.conversation_items.len(),
                "opening turn stream"
            );
            let response = self
                .client
                .post(&url)
                .header(REQUEST_ID_HEADER, request_id.as_str())
                .header(RETRY_ATTEMPT_HEADER, attempt.to_string())
                .json(request)
                .send()
                .await;

            let (error, retry_after) = match response {
                Ok(response) if response.status().is_success() => {
                    let stream: TurnByteStream = Box::pin(response.bytes_stream().map(|chunk| {
                        chunk
                            .map(|bytes| bytes.to_vec())
                            .map_err(ChatloopAiError::from)
                    }));
                    return Ok(stream);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after_ms(response.headers());
                    let body = truncate_body(response.text().await.unwrap_or_default());
                    let error = ChatloopAiError::HttpStatus { status, body };
                    if !is_retryable_status(status) {
                        return Err(error);
                    }
                    (error, retry_after)
                }
                Err(error) if is_retryable_transport_error(&error) => {
                    (ChatloopAiError::Http(error), None)
                }
                Err(error) => return Err(ChatloopAiError::Http(error)),
            };

            let delay_ms = policy.delay_ms(attempt, retry_after);
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            if !policy.allows(attempt, elapsed_ms, delay_ms) {
                return Err(error);
            }
            tracing::warn!(
                request_id = request_id.as_str(),
                attempt,
                delay_ms,
                error = %error,
                "retrying turn stream"
            );
            sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => body[..cut].to_string(),
        None => body,
    }
}
