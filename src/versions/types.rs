// Configuration version data model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::config::constants::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

/// Isolates test traffic from live traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Active,
    Deprecated,
}

impl VersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Active => "active",
            VersionStatus::Deprecated => "deprecated",
        }
    }
}

/// What to do with a pinned call whose version is past its sunset date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunsetPolicy {
    /// Serve the call and annotate it as deprecated
    #[default]
    Annotate,
    /// Refuse the call with INVALID_VERSION
    Reject,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_true() -> bool {
    true
}

fn empty_schema() -> Value {
    Value::Object(Default::default())
}

/// Executable settings frozen into a configuration version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// What the model should accomplish
    pub goal: String,

    /// Schema the caller's input must satisfy
    #[serde(default = "empty_schema")]
    pub input_schema: Value,

    /// Schema the model's output must satisfy
    #[serde(default = "empty_schema")]
    pub output_schema: Value,

    /// Free-text description of the output; the schema JSON is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_description: Option<String>,

    /// Extra prompt hints appended after the JSON-only instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Seconds a successful output stays cached; 0 disables caching
    #[serde(default)]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_true")]
    pub caching_enabled: bool,
}

impl ExecutionSettings {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            input_schema: empty_schema(),
            output_schema: empty_schema(),
            output_description: None,
            additional_instructions: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            cache_ttl_secs: 0,
            caching_enabled: true,
        }
    }

    /// Whether the cache path runs at all for this version.
    pub fn cache_active(&self) -> bool {
        self.caching_enabled && self.cache_ttl_secs > 0
    }
}

/// Immutable snapshot of a definition's executable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationVersion {
    pub tenant_id: String,
    pub definition_id: String,
    /// Version label as stored, e.g. "3" or "3.0.0"
    pub version: String,
    pub environment: Environment,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    pub settings: ExecutionSettings,
}

impl ConfigurationVersion {
    /// Integer version number (leading component of the label).
    pub fn number(&self) -> u32 {
        parse_version_number(&self.version)
    }

    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Active
    }
}

/// Extract the leading integer of a version label.
///
/// "2.0.0" and "2.0.0-draft" give 2; anything malformed gives 0.
pub fn parse_version_number(label: &str) -> u32 {
    label
        .trim()
        .split(['.', '-', '+'])
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .unwrap_or(0)
}

/// Deprecation metadata for a resolved version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Deprecation {
    pub deprecated_at: DateTime<Utc>,
    pub sunset_date: DateTime<Utc>,
    pub is_beyond_sunset: bool,
}

impl Deprecation {
    /// `None` unless the version is deprecated. A deprecated version without
    /// a recorded timestamp is treated as deprecated at creation.
    pub fn for_version(
        version: &ConfigurationVersion,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if version.status != VersionStatus::Deprecated {
            return None;
        }
        let deprecated_at = version.deprecated_at.unwrap_or(version.created_at);
        let sunset_date = deprecated_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Some(Self {
            deprecated_at,
            sunset_date,
            is_beyond_sunset: now > sunset_date,
        })
    }

    /// Human-readable notice for the `X-Deprecated-Message` header.
    pub fn message(&self, version: u32, latest: u32) -> String {
        format!(
            "Version {} is deprecated and will be sunset on {}. Latest version is {}.",
            version,
            self.sunset_date.format("%Y-%m-%d"),
            latest
        )
    }
}

/// Outcome of version resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub version: ConfigurationVersion,
    /// Highest version number in the request's environment
    pub latest_version: u32,
    /// Whether the caller pinned a version
    pub pinned: bool,
    pub deprecation: Option<Deprecation>,
}

impl ResolvedVersion {
    pub fn number(&self) -> u32 {
        self.version.number()
    }

    pub fn versions_behind(&self) -> u32 {
        self.latest_version.saturating_sub(self.number())
    }
}
