// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use super::constants::*;
use super::provider::ProviderEntry;
use crate::versions::{Environment, SunsetPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream model provider
    pub provider: ProviderEntry,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub versions: VersionSettings,

    /// Per-(tenant, definition) quota; absent means unlimited
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,

    /// Accepted bearer tokens and the tenant scope each one grants
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,

    /// JSON file seeding the in-memory version store
    #[serde(default)]
    pub definitions_path: Option<PathBuf>,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum accepted request body
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Directory for the JSONL call log (defaults to ~/.intellid/calls)
    #[serde(default)]
    pub call_log_dir: Option<PathBuf>,
}

fn default_bind_address() -> String {
    DEFAULT_HTTP_ADDR.to_string()
}

fn default_body_limit() -> usize {
    DEFAULT_BODY_LIMIT_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            body_limit_bytes: default_body_limit(),
            call_log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_BREAKER_FAILURE_THRESHOLD
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_BREAKER_COOLDOWN_SECS
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Background sweep interval; 0 relies on lazy expiry only
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_secs() -> u64 {
    DEFAULT_CACHE_SWEEP_SECS
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSettings {
    #[serde(default = "default_window_days")]
    pub deprecation_window_days: i64,
    #[serde(default)]
    pub sunset_policy: SunsetPolicy,
}

fn default_window_days() -> i64 {
    DEFAULT_DEPRECATION_WINDOW_DAYS
}

impl Default for VersionSettings {
    fn default() -> Self {
        Self {
            deprecation_window_days: default_window_days(),
            sunset_policy: SunsetPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Sustained requests per second per (tenant, definition)
    pub requests_per_second: f64,
    /// Burst capacity
    pub burst: f64,
}

/// A bearer token and the scope it grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub token: String,
    pub tenant_id: String,
    pub environment: Environment,
    /// Restrict the key to these definitions; `None` grants all of the tenant's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Vec<String>>,
    #[serde(default)]
    pub revoked: bool,
}

impl Config {
    /// A config with defaults everywhere except the provider.
    pub fn with_provider(provider: ProviderEntry) -> Self {
        Self {
            server: ServerConfig::default(),
            provider,
            breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
            versions: VersionSettings::default(),
            rate_limit: None,
            api_keys: Vec::new(),
            definitions_path: None,
        }
    }

    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            bail!(
                "Invalid bind address: '{}'\n\
                 Bind address should be in format 'IP:PORT', e.g. 127.0.0.1:8080",
                self.server.bind_address
            );
        }

        if self.server.body_limit_bytes == 0 {
            bail!("server.body_limit_bytes must be greater than 0");
        }

        if self.provider.api_key().trim().is_empty() {
            bail!(
                "Provider API key is empty\n\
                 Set provider.api_key in the config file or {}",
                ENV_PROVIDER_API_KEY
            );
        }

        if self.provider.timeout_secs() == 0 {
            bail!("provider.timeout_secs must be greater than 0");
        }

        if self.breaker.failure_threshold == 0 {
            bail!("breaker.failure_threshold must be greater than 0");
        }

        if self.breaker.cooldown_secs == 0
            || self.breaker.cooldown_secs > MAX_BREAKER_COOLDOWN_SECS
        {
            bail!(
                "breaker.cooldown_secs must be between 1 and {}",
                MAX_BREAKER_COOLDOWN_SECS
            );
        }

        if self.versions.deprecation_window_days <= 0
            || self.versions.deprecation_window_days > MAX_DEPRECATION_WINDOW_DAYS
        {
            bail!(
                "versions.deprecation_window_days must be between 1 and {}",
                MAX_DEPRECATION_WINDOW_DAYS
            );
        }

        if let Some(limit) = &self.rate_limit {
            if limit.requests_per_second <= 0.0 || limit.burst < 1.0 {
                bail!("rate_limit requires requests_per_second > 0 and burst >= 1");
            }
        }

        let mut seen = HashSet::new();
        for (idx, key) in self.api_keys.iter().enumerate() {
            if key.token.trim().is_empty() {
                bail!("api_keys[{}] has an empty token", idx);
            }
            if key.tenant_id.trim().is_empty() {
                bail!("api_keys[{}] has an empty tenant_id", idx);
            }
            if !seen.insert(key.token.as_str()) {
                bail!("api_keys[{}] duplicates an earlier token", idx);
            }
        }

        if let Some(path) = &self.definitions_path {
            if !path.exists() {
                bail!("Definitions file not found: {}", path.display());
            }
        }

        Ok(())
    }
}
