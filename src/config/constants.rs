// Project-wide constants
//
// Centralised here so defaults and magic values have one source of truth.
// Import via `use crate::config::constants::*;`.

/// Default bind address for the HTTP server (localhost only).
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";

/// Default request body limit for generation calls.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Default deadline for a single provider call.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Default maximum tokens when a configuration version does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default sampling temperature when a configuration version does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Consecutive provider failures before the breaker opens.
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Open-state cooldown before the breaker allows a probe.
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;

/// Upper bound accepted for `breaker.cooldown_secs`.
pub const MAX_BREAKER_COOLDOWN_SECS: u64 = 24 * 60 * 60;

/// Interval of the background cache sweep (0 disables it).
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 60;

/// Days between deprecation and sunset of a configuration version.
pub const DEFAULT_DEPRECATION_WINDOW_DAYS: i64 = 90;

/// Upper bound accepted for `versions.deprecation_window_days`.
pub const MAX_DEPRECATION_WINDOW_DAYS: i64 = 10 * 365;

/// Largest version number accepted in `X-Version`.
pub const MAX_PINNED_VERSION: u32 = 999_999;

/// Latency budget for one output validation pass; exceeding it is only logged.
pub const VALIDATION_BUDGET_MS: u128 = 5;

/// Environment variables used when no config file exists.
pub const ENV_PROVIDER_API_KEY: &str = "INTELLID_PROVIDER_API_KEY";
pub const ENV_PROVIDER_BASE_URL: &str = "INTELLID_PROVIDER_BASE_URL";
pub const ENV_PROVIDER_MODEL: &str = "INTELLID_PROVIDER_MODEL";
