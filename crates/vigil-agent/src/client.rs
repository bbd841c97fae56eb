//! Anthropic Messages API client
//!
//! Every request is independent; no conversation history is kept. Rate
//! limits and server errors are retried with exponential backoff, and a
//! process-wide circuit breaker stops hammering a failing endpoint.

use crate::auth::{self, Credentials};
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{Completion, Message, MessagesRequest, MessagesResponse, Model};
use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use vigil_core::{Result, VigilError};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 20;

// Shared by every client in the process
static CIRCUIT_BREAKER: OnceLock<CircuitBreaker> = OnceLock::new();

pub fn circuit_breaker() -> &'static CircuitBreaker {
    CIRCUIT_BREAKER.get_or_init(CircuitBreaker::default)
}

/// Stateless client for single-turn completions
#[derive(Debug, Clone)]
pub struct AgentClient {
    model: Model,
    max_tokens: usize,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(model: Model) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            http,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Send one prompt and return the text reply
    pub async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<Completion> {
        let breaker = circuit_breaker();
        if !breaker.can_execute() {
            return Err(VigilError::ApiLimit(format!(
                "Circuit breaker is open after repeated API failures. Retry in {}s",
                breaker.time_until_retry().as_secs()
            )));
        }

        let credentials = auth::credentials_from_env()?;
        let request = MessagesRequest {
            model: self.model.api_name().to_string(),
            max_tokens: self.max_tokens,
            system: system.map(str::to_string),
            messages: vec![Message::user(prompt)],
        };

        match self.send_with_retries(&credentials, &request).await {
            Ok(response) => {
                breaker.record_success();
                let text = response.text();
                if let Some(usage) = &response.usage {
                    tracing::debug!(
                        "Completion received ({} chars, {} input tokens, {} output tokens)",
                        text.len(),
                        usage.input_tokens,
                        usage.output_tokens
                    );
                }
                Ok(Completion {
                    text,
                    model: self.model,
                    received_at: Utc::now(),
                    usage: response.usage,
                })
            }
            Err(e) => {
                breaker.record_failure();
                tracing::warn!(
                    "Circuit breaker: recorded failure (count: {})",
                    breaker.failure_count()
                );
                Err(e)
            }
        }
    }

    async fn send_with_retries(
        &self,
        credentials: &Credentials,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse> {
        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            tracing::debug!("Sending request to Anthropic API (attempt {})", retries + 1);

            let response = self
                .http
                .post(credentials.messages_url())
                .header("x-api-key", &credentials.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(request)
                .send()
                .await
                .map_err(|e| VigilError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<MessagesResponse>()
                    .await
                    .map_err(|e| VigilError::Api(format!("Failed to parse response: {}", e)));
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && retries < MAX_RETRIES {
                retries += 1;
                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs)
                    .min(MAX_BACKOFF_SECS);

                tracing::warn!(
                    "Anthropic API returned {}. Waiting {}s before retry {}/{}",
                    status,
                    wait_secs,
                    retries,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());

            return Err(if status.as_u16() == 429 {
                VigilError::ApiLimit(format!(
                    "Rate limit exceeded after {} retries: {}",
                    MAX_RETRIES, error_text
                ))
            } else {
                VigilError::Api(format!("Anthropic API error {}: {}", status, error_text))
            });
        }
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new(Model::default())
    }
}
