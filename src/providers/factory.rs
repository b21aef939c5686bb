// Provider factory
//
// Creates the upstream LLM provider from the `[provider]` config entry

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::claude::ClaudeProvider;
use super::openai::OpenAIProvider;
use super::LlmProvider;
use crate::config::ProviderEntry;

/// Create an `LlmProvider` from a config entry.
pub fn create_provider(entry: &ProviderEntry) -> Result<Arc<dyn LlmProvider>> {
    match entry {
        ProviderEntry::Openai {
            api_key,
            model,
            base_url,
            timeout_secs,
        } => {
            let mut provider = OpenAIProvider::with_settings(
                api_key.clone(),
                base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                Duration::from_secs(*timeout_secs),
            )?;
            if let Some(m) = model {
                provider = provider.with_model(m.clone());
            }
            Ok(Arc::new(provider))
        }

        ProviderEntry::Claude {
            api_key,
            model,
            base_url,
            timeout_secs,
        } => {
            let mut provider = ClaudeProvider::with_settings(
                api_key.clone(),
                base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                Duration::from_secs(*timeout_secs),
            )?;
            if let Some(m) = model {
                provider = provider.with_model(m.clone());
            }
            Ok(Arc::new(provider))
        }
    }
}
