// Upstream provider entry

use serde::{Deserialize, Serialize};

use super::constants::DEFAULT_PROVIDER_TIMEOUT_SECS;

fn default_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

/// The upstream model provider.
///
/// Serializes with a `type` tag, e.g.:
/// ```toml
/// [provider]
/// type = "openai"
/// api_key = "sk-..."
/// model = "gpt-4o-mini"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderEntry {
    Openai {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Claude {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl ProviderEntry {
    /// Provider name; also the circuit breaker's key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Openai { .. } => "openai",
            Self::Claude { .. } => "claude",
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            Self::Openai { api_key, .. } | Self::Claude { api_key, .. } => api_key,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            Self::Openai { timeout_secs, .. } | Self::Claude { timeout_secs, .. } => {
                *timeout_secs
            }
        }
    }
}
