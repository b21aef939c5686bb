// Pipeline request/response types

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::providers::Usage;
use crate::versions::{Environment, ResolvedVersion};

/// States a generation call passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Authenticated,
    VersionResolved,
    CacheChecked,
    CacheHit,
    CacheMiss,
    Generating,
    Validating,
    Retrying,
    CacheStore,
    Respond,
    Fail,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Authenticated => "authenticated",
            PipelineStage::VersionResolved => "version_resolved",
            PipelineStage::CacheChecked => "cache_checked",
            PipelineStage::CacheHit => "cache_hit",
            PipelineStage::CacheMiss => "cache_miss",
            PipelineStage::Generating => "generating",
            PipelineStage::Validating => "validating",
            PipelineStage::Retrying => "retrying",
            PipelineStage::CacheStore => "cache_store",
            PipelineStage::Respond => "respond",
            PipelineStage::Fail => "fail",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub request_id: String,
    pub tenant_id: String,
    pub environment: Environment,
    pub definition_id: String,
    pub pinned_version: Option<u32>,
    pub input: Value,
}

impl GenerateRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        environment: Environment,
        definition_id: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            environment,
            definition_id: definition_id.into(),
            pinned_version: None,
            input,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn pinned(mut self, version: u32) -> Self {
        self.pinned_version = Some(version);
        self
    }
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub request_id: String,
    pub data: Value,
    pub resolved: ResolvedVersion,
    pub cached: bool,
    pub latency_ms: u64,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub provider_calls: u32,
    /// Stages visited, in order
    pub trace: Vec<PipelineStage>,
}

/// `{ success: true, data, meta: { version, request_id, latency_ms, cached } }`
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: Value,
    pub meta: SuccessMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessMeta {
    pub version: u32,
    pub request_id: String,
    pub latency_ms: u64,
    pub cached: bool,
}

impl GenerateResponse {
    pub fn to_envelope(&self) -> SuccessEnvelope {
        SuccessEnvelope {
            success: true,
            data: self.data.clone(),
            meta: SuccessMeta {
                version: self.resolved.number(),
                request_id: self.request_id.clone(),
                latency_ms: self.latency_ms,
                cached: self.cached,
            },
        }
    }
}
