//! Completion module for Healthmate: the LLM behind the doctor persona
//!
//! Provides a `CompletionBackend` trait with:
//! - **Groq**: OpenAI-compatible `/chat/completions` over HTTPS
//! - **Retrying**: wraps any backend with exponential backoff
//!
//! The pipeline treats a backend as `complete(messages) -> text`: one blocking
//! call, no retry of its own. Retries and timeouts live in these layers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::CompletionConfig;
use crate::models::ChatTurn;

// ============================================================================
// CompletionBackend trait
// ============================================================================

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send the ordered messages and return the model's reply text.
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, CompletionError>;

    /// Model identifier for logging.
    fn model(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no choices")]
    EmptyResponse,

    #[error("Missing API key (set {env_var})")]
    MissingApiKey { env_var: String },

    #[error("All {attempts} completion attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// GroqCompletionClient
// ============================================================================

/// Client for Groq's OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct GroqCompletionClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqCompletionClient {
    /// Build from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Err(CompletionError::MissingApiKey {
                env_var: config.api_key_env.clone(),
            });
        }
        Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        if api_key.is_empty() {
            return Err(CompletionError::MissingApiKey {
                env_var: "GROQ_API_KEY".to_string(),
            });
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for GroqCompletionClient {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Completion API error");

            return Err(CompletionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: ChatCompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(CompletionError::EmptyResponse)?;

        tracing::debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// RetryingCompletion
// ============================================================================

/// Retries the inner backend with jittered exponential backoff.
pub struct RetryingCompletion {
    inner: Arc<dyn CompletionBackend>,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl RetryingCompletion {
    pub fn new(inner: Arc<dyn CompletionBackend>, max_retries: usize, retry_delay_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            retry_delay_ms,
        }
    }
}

#[async_trait]
impl CompletionBackend for RetryingCompletion {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, CompletionError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let attempts = self.max_retries + 1;
        Retry::spawn(retry_strategy, || self.inner.complete(messages))
            .await
            .map_err(|e| {
                tracing::error!(attempts, error = %e, "All completion attempts failed");
                CompletionError::RetryExhausted { attempts }
            })
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Build the configured backend: the Groq client, wrapped in retries when
/// `max_retries > 0`.
pub fn create_backend(config: &CompletionConfig) -> Result<Arc<dyn CompletionBackend>, CompletionError> {
    let client: Arc<dyn CompletionBackend> = Arc::new(GroqCompletionClient::from_config(config)?);
    if config.max_retries == 0 {
        return Ok(client);
    }
    Ok(Arc::new(RetryingCompletion::new(
        client,
        config.max_retries,
        config.retry_delay_ms,
    )))
}

// ============================================================================
// TESTS
// ============================================================================
