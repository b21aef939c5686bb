// Model gateway
//
// Routes every outbound call through the provider's circuit breaker and
// turns provider outcomes into categorized gateway failures. Success feeds
// the breaker's success path whatever the content of the text.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::breaker::CircuitBreaker;
use crate::errors::{ErrorKind, PipelineError};
use crate::monitoring::ServiceMetrics;
use crate::prompt::Prompt;
use crate::providers::{LlmProvider, ProviderOutcome, ProviderRequest, Usage};

/// One successful model call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub duration_ms: u64,
}

/// Parameters for one model call.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams<'a> {
    pub max_tokens: u32,
    pub temperature: f32,
    pub model: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The breaker refused the call; no request reached the provider
    #[error("circuit breaker for '{provider}' is open")]
    CircuitOpen {
        provider: String,
        retry_after: Duration,
    },

    #[error("provider call timed out")]
    Timeout,

    #[error("provider rate limited the call")]
    RateLimited { retry_after: Option<u64> },

    #[error("provider error (status {status:?}): {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },
}

impl From<GatewayError> for PipelineError {
    /// Callers only ever see the generic LLM_* messages.
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CircuitOpen { retry_after, .. } => {
                PipelineError::new(ErrorKind::LlmError).with_retry_after(ceil_secs(retry_after))
            }
            GatewayError::Timeout => PipelineError::new(ErrorKind::LlmTimeout),
            GatewayError::RateLimited { retry_after } => {
                let err = PipelineError::new(ErrorKind::LlmError);
                match retry_after {
                    Some(secs) => err.with_retry_after(secs),
                    None => err,
                }
            }
            GatewayError::Provider { .. } => PipelineError::new(ErrorKind::LlmError),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    breaker: Arc<CircuitBreaker>,
    metrics: Option<ServiceMetrics>,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            provider,
            breaker,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Send one prompt to the provider.
    pub async fn generate(
        &self,
        prompt: &Prompt,
        params: GenerationParams<'_>,
    ) -> Result<Generation, GatewayError> {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    state = %rejection.state,
                    retry_after_ms = rejection.retry_after.as_millis() as u64,
                    "Provider call rejected by circuit breaker"
                );
                self.record_outcome("breaker_open");
                return Err(GatewayError::CircuitOpen {
                    provider: self.provider.name().to_string(),
                    retry_after: rejection.retry_after,
                });
            }
        };

        let mut request = ProviderRequest::new(prompt.system.clone(), prompt.user.clone())
            .with_max_tokens(params.max_tokens)
            .with_temperature(params.temperature);
        if let Some(model) = params.model {
            request = request.with_model(model);
        }

        let started = Instant::now();
        let outcome = self.provider.complete(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.record_outcome(outcome.label());

        match outcome {
            ProviderOutcome::Success(response) => {
                permit.succeed();
                tracing::debug!(
                    provider = self.provider.name(),
                    model = %response.model,
                    duration_ms,
                    output_tokens = response.usage.output_tokens,
                    "Provider call succeeded"
                );
                Ok(Generation {
                    text: response.text,
                    model: response.model,
                    usage: response.usage,
                    duration_ms,
                })
            }
            ProviderOutcome::Timeout => {
                permit.fail();
                tracing::warn!(provider = self.provider.name(), duration_ms, "Provider call timed out");
                Err(GatewayError::Timeout)
            }
            ProviderOutcome::RateLimited { retry_after } => {
                permit.fail();
                tracing::warn!(
                    provider = self.provider.name(),
                    retry_after = ?retry_after,
                    "Provider rate limited the call"
                );
                Err(GatewayError::RateLimited { retry_after })
            }
            ProviderOutcome::ProviderError { status, message } => {
                permit.fail();
                tracing::warn!(
                    provider = self.provider.name(),
                    status = ?status,
                    error = %message,
                    "Provider call failed"
                );
                Err(GatewayError::Provider { status, message })
            }
        }
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_provider_call(outcome);
        }
    }
}
