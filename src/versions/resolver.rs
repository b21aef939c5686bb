// Version resolver
//
// Chooses which stored configuration version answers a call and derives
// the deprecation metadata reported back to the caller.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use super::store::VersionStore;
use super::types::{ConfigurationVersion, Deprecation, Environment, ResolvedVersion, SunsetPolicy};
use crate::config::constants::MAX_PINNED_VERSION;
use crate::errors::{ErrorKind, PipelineError};

/// Parse an `X-Version` header value.
pub fn parse_pinned_version(raw: &str) -> Result<u32, PipelineError> {
    let invalid = || {
        PipelineError::new(ErrorKind::InvalidVersion).with_details(json!({
            "received": raw,
            "allowed": format!("1..={}", MAX_PINNED_VERSION),
        }))
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match trimmed.parse::<u32>() {
        Ok(n) if (1..=MAX_PINNED_VERSION).contains(&n) => Ok(n),
        _ => Err(invalid()),
    }
}

pub struct VersionResolver {
    store: Arc<dyn VersionStore>,
    deprecation_window: Duration,
    sunset_policy: SunsetPolicy,
}

impl VersionResolver {
    pub fn new(
        store: Arc<dyn VersionStore>,
        deprecation_window: Duration,
        sunset_policy: SunsetPolicy,
    ) -> Self {
        Self {
            store,
            deprecation_window,
            sunset_policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    /// Resolve the version to execute for a call.
    ///
    /// Without a pin the active version for `environment` is used. With a pin
    /// the exact number is looked up across every status; it must belong to
    /// `environment`.
    pub async fn resolve(
        &self,
        definition_id: &str,
        tenant_id: &str,
        environment: Environment,
        pinned: Option<u32>,
    ) -> Result<ResolvedVersion, PipelineError> {
        let all = self
            .store
            .list_versions(tenant_id, definition_id)
            .await
            .map_err(PipelineError::internal)?;
        let latest_version = latest_in(&all, environment);

        let version = match pinned {
            None => self
                .store
                .active_version(tenant_id, definition_id, environment)
                .await
                .map_err(PipelineError::internal)?
                .ok_or_else(|| PipelineError::new(ErrorKind::NotFound))?,
            Some(number) => {
                let found = self
                    .store
                    .version_by_number(tenant_id, definition_id, number)
                    .await
                    .map_err(PipelineError::internal)?;

                match found {
                    None => {
                        return Err(PipelineError::new(ErrorKind::VersionNotFound)
                            .with_message(format!("Version {} does not exist", number))
                            .with_details(json!({
                                "requested_version": number,
                                "available_versions": numbers(all.iter()),
                            })));
                    }
                    Some(v) if v.environment != environment => {
                        return Err(PipelineError::new(ErrorKind::VersionEnvironmentMismatch)
                            .with_message(format!(
                                "Version {} is not available in {}",
                                number, environment
                            ))
                            .with_details(json!({
                                "requested_version": number,
                                "environment": environment,
                                "available_versions": numbers(
                                    all.iter().filter(|v| v.environment == environment)
                                ),
                            })));
                    }
                    Some(v) => v,
                }
            }
        };

        let deprecation = Deprecation::for_version(&version, self.deprecation_window, Utc::now());

        if let Some(dep) = &deprecation {
            if dep.is_beyond_sunset && pinned.is_some() {
                match self.sunset_policy {
                    SunsetPolicy::Reject => {
                        return Err(PipelineError::new(ErrorKind::InvalidVersion)
                            .with_message(format!(
                                "Version {} was sunset on {}",
                                version.number(),
                                dep.sunset_date.format("%Y-%m-%d")
                            ))
                            .with_details(json!({
                                "requested_version": version.number(),
                                "sunset_date": dep.sunset_date.to_rfc3339(),
                                "latest_version": latest_version,
                            })));
                    }
                    SunsetPolicy::Annotate => {
                        tracing::warn!(
                            tenant_id,
                            definition_id,
                            version = version.number(),
                            sunset_date = %dep.sunset_date,
                            "Serving version past its sunset date"
                        );
                    }
                }
            }
        }

        Ok(ResolvedVersion {
            latest_version: latest_version.max(version.number()),
            version,
            pinned: pinned.is_some(),
            deprecation,
        })
    }
}

fn latest_in(versions: &[ConfigurationVersion], environment: Environment) -> u32 {
    versions
        .iter()
        .filter(|v| v.environment == environment)
        .map(|v| v.number())
        .max()
        .unwrap_or(0)
}

fn numbers<'a>(versions: impl Iterator<Item = &'a ConfigurationVersion>) -> Vec<u32> {
    let mut out: Vec<u32> = versions.map(|v| v.number()).collect();
    out.sort_unstable();
    out.dedup();
    out
}
