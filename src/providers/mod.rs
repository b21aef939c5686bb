// Upstream LLM provider support
//
// This module provides an abstraction layer over different LLM providers
// (OpenAI-compatible endpoints, Claude) behind one call interface. Every
// call resolves to a tagged `ProviderOutcome`; adapters never raise.

use async_trait::async_trait;

pub mod types;

// Provider implementations
pub mod claude;
pub mod openai;
pub mod scripted;

// Provider factory
pub mod factory;

pub use factory::create_provider;
pub use scripted::ScriptedProvider;
pub use types::{ProviderOutcome, ProviderRequest, ProviderResponse, Usage};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one completion request and classify the result.
    async fn complete(&self, request: &ProviderRequest) -> ProviderOutcome;

    /// Get the provider name (e.g., "openai", "claude")
    fn name(&self) -> &str;

    /// Get the default model for this provider
    fn default_model(&self) -> &str;
}
