// Provider-agnostic request/outcome types
//
// Adapters translate these into their own wire format. Failures come back
// as tagged outcomes instead of free-form errors so callers can account for
// them without inspecting provider-specific shapes.

use serde::{Deserialize, Serialize};

/// One completion request: a system prompt plus a single user message.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    /// System prompt (sent as `system` for Claude, as a system message for
    /// OpenAI-compatible providers)
    pub system: String,

    /// User message body
    pub user: String,

    /// Model override; adapters fall back to their default when `None`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl ProviderRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            model: None,
            max_tokens: crate::config::constants::DEFAULT_MAX_TOKENS,
            temperature: crate::config::constants::DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Raw model text (not yet parsed)
    pub text: String,
    /// Model that actually served the request
    pub model: String,
    pub usage: Usage,
}

/// Result of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Success(ProviderResponse),
    /// The call exceeded the client deadline
    Timeout,
    /// The provider throttled us; `retry_after` is its hint in seconds
    RateLimited { retry_after: Option<u64> },
    /// Any other failure (HTTP error status, transport error, bad body)
    ProviderError {
        status: Option<u16>,
        message: String,
    },
}

impl ProviderOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Success(_) => "success",
            ProviderOutcome::Timeout => "timeout",
            ProviderOutcome::RateLimited { .. } => "rate_limited",
            ProviderOutcome::ProviderError { .. } => "provider_error",
        }
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_transport_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderOutcome::Timeout
        } else {
            ProviderOutcome::ProviderError {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_error_status(
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        body: String,
    ) -> Self {
        match status.as_u16() {
            429 => ProviderOutcome::RateLimited { retry_after },
            408 | 504 => ProviderOutcome::Timeout,
            code => ProviderOutcome::ProviderError {
                status: Some(code),
                message: body,
            },
        }
    }
}

/// Parse a `retry-after` header given in whole seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
