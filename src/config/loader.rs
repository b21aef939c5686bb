// Configuration loader
// Loads ~/.intellid/config.toml (or an explicit path), falling back to
// environment variables for a minimal single-provider setup.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::{ENV_PROVIDER_API_KEY, ENV_PROVIDER_BASE_URL, ENV_PROVIDER_MODEL};
use super::provider::ProviderEntry;
use super::settings::Config;

/// Default config location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".intellid").join("config.toml"))
}

/// Load configuration from an explicit path, the default file, or the environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_from_file(path);
    }

    if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            return load_from_file(&default_path);
        }
    }

    if let Some(config) = try_load_from_env()? {
        return Ok(config);
    }

    bail!(
        "No configuration found.\n\n\
        Create ~/.intellid/config.toml with at least:\n\n\
        [provider]\n\
        type = \"openai\"\n\
        api_key = \"sk-...\"\n\n\
        Alternatively, set environment variable:\n\
        export {}=\"sk-...\"",
        ENV_PROVIDER_API_KEY
    );
}

/// Parse and validate a TOML config file.
pub fn load_from_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

fn try_load_from_env() -> Result<Option<Config>> {
    let Ok(api_key) = std::env::var(ENV_PROVIDER_API_KEY) else {
        return Ok(None);
    };
    if api_key.is_empty() {
        return Ok(None);
    }

    let provider = ProviderEntry::Openai {
        api_key,
        model: std::env::var(ENV_PROVIDER_MODEL).ok().filter(|m| !m.is_empty()),
        base_url: std::env::var(ENV_PROVIDER_BASE_URL)
            .ok()
            .filter(|u| !u.is_empty()),
        timeout_secs: super::constants::DEFAULT_PROVIDER_TIMEOUT_SECS,
    };

    let config = Config::with_provider(provider);
    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::info!("Loaded configuration from environment");
    Ok(Some(config))
}
