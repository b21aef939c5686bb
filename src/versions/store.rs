// Version store
//
// The relational store of definitions lives outside this service; the
// pipeline reads it through `VersionStore`. `InMemoryVersionStore` backs
// tests and single-node deployments seeded from a JSON file.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::Path;

use super::types::{ConfigurationVersion, Environment, ExecutionSettings, VersionStatus};

/// Read access to configuration versions, scoped by tenant.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// The single active version for (definition, environment).
    async fn active_version(
        &self,
        tenant_id: &str,
        definition_id: &str,
        environment: Environment,
    ) -> Result<Option<ConfigurationVersion>>;

    /// A version by number, across all statuses and environments.
    async fn version_by_number(
        &self,
        tenant_id: &str,
        definition_id: &str,
        number: u32,
    ) -> Result<Option<ConfigurationVersion>>;

    /// Every version of a definition, across all statuses and environments.
    async fn list_versions(
        &self,
        tenant_id: &str,
        definition_id: &str,
    ) -> Result<Vec<ConfigurationVersion>>;
}

type DefinitionKey = (String, String);

/// Process-local version store.
#[derive(Default)]
pub struct InMemoryVersionStore {
    definitions: DashMap<DefinitionKey, Vec<ConfigurationVersion>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of configuration versions.
    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions file: {}", path.display()))?;
        let versions: Vec<ConfigurationVersion> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse definitions file: {}", path.display()))?;

        let store = Self::new();
        for version in versions {
            store.insert(version)?;
        }
        tracing::info!(
            definitions = store.definitions.len(),
            path = %path.display(),
            "Seeded version store"
        );
        Ok(store)
    }

    /// Insert a stored version as-is, enforcing one active version per
    /// (definition, environment) and unique version numbers.
    pub fn insert(&self, version: ConfigurationVersion) -> Result<()> {
        let key = (version.tenant_id.clone(), version.definition_id.clone());
        let mut versions = self.definitions.entry(key).or_default();

        if versions.iter().any(|v| v.number() == version.number()) {
            bail!(
                "Definition '{}' already has version {}",
                version.definition_id,
                version.number()
            );
        }
        if version.is_active()
            && versions
                .iter()
                .any(|v| v.is_active() && v.environment == version.environment)
        {
            bail!(
                "Definition '{}' already has an active {} version",
                version.definition_id,
                version.environment
            );
        }
        versions.push(version);
        Ok(())
    }

    /// Publish new settings as the next version in `environment`.
    ///
    /// The previously active version in that environment becomes deprecated
    /// with `deprecated_at = now`. Version numbers are monotonic across both
    /// environments of a definition.
    pub fn promote(
        &self,
        tenant_id: &str,
        definition_id: &str,
        environment: Environment,
        settings: ExecutionSettings,
    ) -> ConfigurationVersion {
        let now = Utc::now();
        let key = (tenant_id.to_string(), definition_id.to_string());
        let mut versions = self.definitions.entry(key).or_default();

        for existing in versions
            .iter_mut()
            .filter(|v| v.is_active() && v.environment == environment)
        {
            existing.status = VersionStatus::Deprecated;
            existing.deprecated_at = Some(now);
        }

        let next = versions.iter().map(|v| v.number()).max().unwrap_or(0) + 1;
        let version = ConfigurationVersion {
            tenant_id: tenant_id.to_string(),
            definition_id: definition_id.to_string(),
            version: next.to_string(),
            environment,
            status: VersionStatus::Active,
            created_at: now,
            deprecated_at: None,
            settings,
        };
        versions.push(version.clone());

        tracing::info!(
            tenant_id,
            definition_id,
            environment = %environment,
            version = next,
            "Promoted configuration version"
        );
        version
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn active_version(
        &self,
        tenant_id: &str,
        definition_id: &str,
        environment: Environment,
    ) -> Result<Option<ConfigurationVersion>> {
        let key = (tenant_id.to_string(), definition_id.to_string());
        Ok(self.definitions.get(&key).and_then(|versions| {
            versions
                .iter()
                .find(|v| v.is_active() && v.environment == environment)
                .cloned()
        }))
    }

    async fn version_by_number(
        &self,
        tenant_id: &str,
        definition_id: &str,
        number: u32,
    ) -> Result<Option<ConfigurationVersion>> {
        let key = (tenant_id.to_string(), definition_id.to_string());
        Ok(self.definitions.get(&key).and_then(|versions| {
            versions.iter().find(|v| v.number() == number).cloned()
        }))
    }

    async fn list_versions(
        &self,
        tenant_id: &str,
        definition_id: &str,
    ) -> Result<Vec<ConfigurationVersion>> {
        let key = (tenant_id.to_string(), definition_id.to_string());
        Ok(self
            .definitions
            .get(&key)
            .map(|versions| versions.clone())
            .unwrap_or_default())
    }
}
