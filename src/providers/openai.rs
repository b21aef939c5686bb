// OpenAI-compatible chat completions provider
//
// Works for OpenAI and any endpoint speaking the same format (Groq,
// Mistral, local gateways) by overriding the base URL.

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

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI API provider
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAIProvider {
    /// Create a provider against api.openai.com with the default deadline.
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_settings(
            api_key,
            OPENAI_BASE_URL.to_string(),
            Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        )
    }

    /// Create a provider with a custom endpoint and deadline.
    pub fn with_settings(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: OPENAI_DEFAULT_MODEL.to_string(),
        })
    }

    /// Set custom model for this provider
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn to_openai_request(&self, request: &ProviderRequest) -> OpenAIRequest {
        OpenAIRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn from_openai_response(response: OpenAIResponse) -> ProviderOutcome {
        let Some(choice) = response.choices.into_iter().next() else {
            return ProviderOutcome::ProviderError {
                status: None,
                message: "OpenAI returned no choices in response".to_string(),
            };
        };

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        ProviderOutcome::Success(ProviderResponse {
            text: choice.message.content.unwrap_or_default(),
            model: response.model,
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn complete(&self, request: &ProviderRequest) -> ProviderOutcome {
        let openai_request = self.to_openai_request(request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        tracing::debug!(model = %openai_request.model, "Sending request to OpenAI API");

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&openai_request)
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
            tracing::warn!(status = %status, "OpenAI API request failed");
            return ProviderOutcome::from_error_status(status, retry_after, error_body);
        }

        match response.json::<OpenAIResponse>().await {
            Ok(body) => Self::from_openai_response(body),
            Err(e) if e.is_timeout() => ProviderOutcome::Timeout,
            Err(e) => ProviderOutcome::ProviderError {
                status: Some(status.as_u16()),
                message: format!("Failed to parse OpenAI API response: {e}"),
            },
        }
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// OpenAI API types

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
