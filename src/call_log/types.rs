// Call record data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::Usage;
use crate::versions::Environment;

/// Outcome of one generation call, as handed to the call-log sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    /// Absent when the call was rejected before authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub definition_id: String,
    /// Absent when the path named an unknown environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Absent when the call failed before a version was resolved
    pub version: Option<u32>,
    pub status: u16,
    /// Error code, absent on success
    pub error_code: Option<String>,
    pub latency_ms: u64,
    pub cached: bool,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    /// Cache fingerprint of the input; the raw input is never logged
    pub input_fingerprint: Option<String>,
    /// Number of provider calls made (0 on cache hit, 2 after a retry)
    pub provider_calls: u32,
}

impl CallRecord {
    pub fn new(
        request_id: impl Into<String>,
        tenant_id: impl Into<String>,
        definition_id: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            tenant_id: Some(tenant_id.into()),
            definition_id: definition_id.into(),
            environment: Some(environment),
            version: None,
            status: 200,
            error_code: None,
            latency_ms: 0,
            cached: false,
            model: None,
            usage: None,
            input_fingerprint: None,
            provider_calls: 0,
        }
    }

    /// A call refused before it reached the pipeline. Fill in what the
    /// request got far enough to establish.
    pub fn rejected(request_id: impl Into<String>, definition_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            tenant_id: None,
            definition_id: definition_id.into(),
            environment: None,
            version: None,
            status: 0,
            error_code: None,
            latency_ms: 0,
            cached: false,
            model: None,
            usage: None,
            input_fingerprint: None,
            provider_calls: 0,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_environment(mut self, environment: Option<Environment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}
