//! `OpenAI` Chat Completions client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{http_client, with_timeout, LlmErrorKind, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client for the `OpenAI` Chat Completions API.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Creates a client; `model` overrides the default model.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: Option<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        }
    }

    /// Points the client at another OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(super) async fn generate(&self, prompt: &str, system: &str) -> LlmResponse {
        with_timeout(self.timeout, self.send(prompt, system)).await
    }

    async fn send(&self, prompt: &str, system: &str) -> LlmResponse {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.4,
        };

        let response = match self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return LlmResponse::failure(LlmErrorKind::Network, e.to_string()),
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return LlmResponse::failure(
                LlmErrorKind::from_status(status),
                format!("openai returned HTTP {status}: {body}"),
            );
        }

        match response.json::<ChatResponse>().await {
            Ok(body) => match body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
            {
                Some(content) => LlmResponse::ok(content),
                None => LlmResponse::failure(LlmErrorKind::Other, "openai returned no content"),
            },
            Err(e) => LlmResponse::failure(LlmErrorKind::Other, format!("invalid response: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_override_is_used() {
        let client = OpenAiClient::new("sk", Some("gpt-4o".into()), Duration::from_secs(1));
        assert!(format!("{client:?}").contains("gpt-4o"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_failure() {
        let client = OpenAiClient::new("sk", None, Duration::from_secs(2))
            .with_base_url("http://127.0.0.1:9");
        let response = client.generate("hello", "system").await;
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(LlmErrorKind::Network));
    }
}
