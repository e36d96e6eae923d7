//! LLM providers.
//!
//! The provider is chosen once, at construction, from [`Config`]. Every variant
//! answers the same call, [`LlmClient::generate`], and never returns an error:
//! failures (missing key, HTTP error, timeout) come back as an unsuccessful
//! [`LlmResponse`] so agents can switch to their deterministic fallback.

mod anthropic;
mod openai;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use crate::config::{Config, LlmProvider};

/// Categories of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    /// Invalid or missing API key.
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// 5xx response.
    Server,
    /// Connection failure or timeout.
    Network,
    /// No provider configured.
    Disabled,
    /// Anything else.
    Other,
}

impl LlmErrorKind {
    /// Classifies an HTTP status.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Network => "network",
            Self::Disabled => "disabled",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Whether `content` holds model output.
    pub success: bool,
    /// Generated text; empty on failure.
    pub content: String,
    /// Failure description.
    pub error: Option<String>,
    /// Failure category.
    pub error_kind: Option<LlmErrorKind>,
}

impl LlmResponse {
    /// A successful response.
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            error_kind: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(kind: LlmErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    /// Parses the first JSON value embedded in the content.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        if self.success {
            extract_json(&self.content)
        } else {
            None
        }
    }
}

/// The configured LLM provider.
#[derive(Debug, Clone)]
pub enum LlmClient {
    /// Anthropic Messages API.
    Anthropic(AnthropicClient),
    /// `OpenAI` Chat Completions API.
    OpenAi(OpenAiClient),
    /// Canned responses, for offline runs and tests.
    Scripted(Arc<ScriptedLlm>),
    /// No provider; every call fails fast.
    Disabled,
}

impl LlmClient {
    /// Builds the client selected by `config`.
    ///
    /// A provider without an API key degrades to [`LlmClient::Disabled`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_millis(config.llm_timeout_ms);
        let model = config.llm_model.clone();
        match config.llm_provider {
            LlmProvider::Anthropic => match &config.secrets.anthropic_api_key {
                Some(key) => Self::Anthropic(AnthropicClient::new(key, model, timeout)),
                None => {
                    warn!("ANTHROPIC_API_KEY is not set; agents will use fallback content");
                    Self::Disabled
                }
            },
            LlmProvider::OpenAi => match &config.secrets.openai_api_key {
                Some(key) => Self::OpenAi(OpenAiClient::new(key, model, timeout)),
                None => {
                    warn!("OPENAI_API_KEY is not set; agents will use fallback content");
                    Self::Disabled
                }
            },
            LlmProvider::Offline => Self::Disabled,
        }
    }

    /// Short provider name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Anthropic(_) => "anthropic",
            Self::OpenAi(_) => "openai",
            Self::Scripted(_) => "scripted",
            Self::Disabled => "disabled",
        }
    }

    /// Returns `false` when every call would fail fast.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Generates a completion for `prompt` under `system`.
    pub async fn generate(&self, prompt: &str, system: &str) -> LlmResponse {
        let response = match self {
            Self::Anthropic(client) => client.generate(prompt, system).await,
            Self::OpenAi(client) => client.generate(prompt, system).await,
            Self::Scripted(script) => script.generate(prompt, system).await,
            Self::Disabled => {
                LlmResponse::failure(LlmErrorKind::Disabled, "no LLM provider is configured")
            }
        };
        match &response.error {
            None => debug!(provider = self.name(), chars = response.content.len(), "LLM call succeeded"),
            Some(error) => debug!(provider = self.name(), error = %error, "LLM call failed"),
        }
        response
    }
}

/// Runs `call` under `timeout`, mapping expiry to a network failure.
pub(crate) async fn with_timeout<F>(timeout: Duration, call: F) -> LlmResponse
where
    F: std::future::Future<Output = LlmResponse>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(response) => response,
        Err(_) => LlmResponse::failure(
            LlmErrorKind::Network,
            format!("LLM call timed out after {}ms", timeout.as_millis()),
        ),
    }
}

/// Builds an HTTP client with `timeout`, falling back to reqwest's defaults.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Extracts the first JSON object or array from model output.
///
/// Handles bare JSON, fenced code blocks, and JSON surrounded by prose.
#[must_use]
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find(['{', '['])?;
    let open = trimmed[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Provider that replays queued responses.
///
/// Once the queue is empty every call returns the default response, which is
/// a failure unless set with [`ScriptedLlm::always`].
#[derive(Debug)]
pub struct ScriptedLlm {
    queue: Mutex<VecDeque<LlmResponse>>,
    default: LlmResponse,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: LlmResponse::failure(LlmErrorKind::Other, "scripted provider has no response"),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedLlm {
    /// A provider whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// A provider that answers every call with `content`.
    #[must_use]
    pub fn always(content: impl Into<String>) -> Self {
        Self {
            default: LlmResponse::ok(content),
            ..Self::default()
        }
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(LlmResponse::ok(content));
        self
    }

    /// Makes every call take `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wraps the provider in an [`LlmClient`].
    #[must_use]
    pub fn into_client(self) -> LlmClient {
        LlmClient::Scripted(Arc::new(self))
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn generate(&self, prompt: &str, _system: &str) -> LlmResponse {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}
