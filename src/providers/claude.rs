// Anthropic Messages API provider

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::{
    parse_retry_after, ProviderOutcome, ProviderRequest, ProviderResponse, Usage,
};
use super::LlmProvider;
use crate::config::constants::DEFAULT_PROVIDER_TIMEOUT_SECS;

const CLAUDE_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Clone)]
pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl ClaudeProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_settings(
            api_key,
            CLAUDE_BASE_URL.to_string(),
            Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        )
    }

    pub fn with_settings(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: CLAUDE_DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn to_messages_request(&self, request: &ProviderRequest) -> MessagesRequest {
        MessagesRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            system: request.system.clone(),
            messages: vec![MessagesMessage {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn from_messages_response(response: MessagesResponse) -> ProviderOutcome {
        let text: String = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        ProviderOutcome::Success(ProviderResponse {
            text,
            model: response.model,
            usage: Usage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(&self, request: &ProviderRequest) -> ProviderOutcome {
        let body = self.to_messages_request(request);
        let url = format!("{}/v1/messages", self.base_url);

        tracing::debug!(model = %body.model, "Sending request to Claude API");

        let response = match self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ProviderOutcome::from_transport_error(&e),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Claude API request failed");
            // 529 is Anthropic's "overloaded"; treat it like throttling.
            if status.as_u16() == 529 {
                return ProviderOutcome::RateLimited { retry_after };
            }
            return ProviderOutcome::from_error_status(status, retry_after, error_body);
        }

        match response.json::<MessagesResponse>().await {
            Ok(body) => Self::from_messages_response(body),
            Err(e) if e.is_timeout() => ProviderOutcome::Timeout,
            Err(e) => ProviderOutcome::ProviderError {
                status: Some(status.as_u16()),
                message: format!("Failed to parse Claude API response: {e}"),
            },
        }
    }

    fn name(&self) -> &str {
        "claude"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<MessagesMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct MessagesMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<MessagesContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_joins_text_blocks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "key")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"model":"claude-x","content":[{"type":"text","text":"{\"ok\":"},{"type":"text","text":"true}"}],
                    "usage":{"input_tokens":4,"output_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider =
            ClaudeProvider::with_settings("key".to_string(), server.url(), Duration::from_secs(5))
                .unwrap();
        let outcome = provider.complete(&ProviderRequest::new("s", "u")).await;
        mock.assert_async().await;

        let ProviderOutcome::Success(response) = outcome else {
            panic!("expected success");
        };
        assert_eq!(response.text, r#"{"ok":true}"#);
        assert_eq!(response.usage.total(), 6);
    }

    #[tokio::test]
    async fn test_overloaded_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(529)
            .with_body("overloaded")
            .create_async()
            .await;

        let provider =
            ClaudeProvider::with_settings("key".to_string(), server.url(), Duration::from_secs(5))
                .unwrap();
        let outcome = provider.complete(&ProviderRequest::new("s", "u")).await;
        assert_eq!(outcome, ProviderOutcome::RateLimited { retry_after: None });
    }

    #[test]
    fn test_identity() {
        let provider = ClaudeProvider::new("k".to_string()).unwrap().with_model("claude-y");
        assert_eq!(provider.name(), "claude");
        assert_eq!(provider.default_model(), "claude-y");
    }
}
