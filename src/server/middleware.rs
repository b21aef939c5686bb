// Middleware for authentication, rate limiting, etc.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::AppState;
use crate::call_log::CallRecord;
use crate::config::ApiKeyEntry;
use crate::errors::{ErrorKind, PipelineError, REQUEST_ID_HEADER};
use crate::versions::Environment;

// ---------------------------------------------------------------------------
// Authentication: bearer token -> tenant scope
// ---------------------------------------------------------------------------

/// Correlation id of the current request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Scope granted by an API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub tenant_id: String,
    pub environment: Environment,
    /// `None` grants every definition of the tenant
    pub definitions: Option<Vec<String>>,
}

impl AuthContext {
    /// Check that this key may call `definition_id` in `environment`.
    pub fn authorize(
        &self,
        environment: Environment,
        definition_id: &str,
    ) -> Result<(), PipelineError> {
        if self.environment != environment {
            return Err(PipelineError::new(ErrorKind::Forbidden).with_message(format!(
                "API key is scoped to {} and cannot call {} endpoints",
                self.environment, environment
            )));
        }
        if let Some(allowed) = &self.definitions {
            if !allowed.iter().any(|d| d == definition_id) {
                return Err(PipelineError::new(ErrorKind::Forbidden));
            }
        }
        Ok(())
    }
}

/// Accepted API keys, indexed by token.
#[derive(Debug, Default)]
pub struct ApiKeyRegistry {
    keys: HashMap<String, ApiKeyEntry>,
}

impl ApiKeyRegistry {
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        Self {
            keys: entries
                .iter()
                .map(|entry| (entry.token.clone(), entry.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve the `Authorization: Bearer <token>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, PipelineError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| PipelineError::new(ErrorKind::Unauthorized))?;

        match self.keys.get(token) {
            Some(entry) if !entry.revoked => Ok(AuthContext {
                tenant_id: entry.tenant_id.clone(),
                environment: entry.environment,
                definitions: entry.definitions.clone(),
            }),
            Some(_) => Err(PipelineError::new(ErrorKind::Unauthorized)
                .with_message("API key has been revoked")),
            None => Err(PipelineError::new(ErrorKind::Unauthorized)),
        }
    }
}

/// Read the caller's `X-Request-Id` or mint one.
pub fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Authentication middleware.
///
/// Attaches `RequestId` and `AuthContext` extensions; rejects with
/// UNAUTHORIZED before any handler runs.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let started = std::time::Instant::now();
    let request_id = request_id_from(request.headers());

    match state.api_keys.authenticate(request.headers()) {
        Ok(context) => {
            request.extensions_mut().insert(RequestId(request_id));
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(request_id = %request_id, uri = %request.uri(), "Rejected unauthenticated request");
            if let Some((environment, definition_id)) = generate_target(request.uri().path()) {
                let record = CallRecord::rejected(request_id.clone(), definition_id)
                    .with_environment(environment.parse().ok());
                state.pipeline.record_rejection(record, &err, started.elapsed());
            }
            err.with_request_id(request_id).into_response()
        }
    }
}

/// `(environment, definition_id)` when `path` is a generation call.
fn generate_target(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.trim_start_matches('/').split('/');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(environment), Some("intelligence"), Some(definition_id), Some("generate"), None)
            if !environment.is_empty() && !definition_id.is_empty() =>
        {
            Some((environment, definition_id))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Rate limiter: token bucket per (tenant, definition), shared across requests
// ---------------------------------------------------------------------------

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared rate limiter state. Clone freely (it's an Arc inside).
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    /// Buckets keyed by "tenant:definition"
    buckets: DashMap<String, Bucket>,
    /// Maximum tokens per key (burst capacity)
    capacity: f64,
    /// Tokens added per second (sustained rate)
    refill_rate: f64,
}

impl RateLimiter {
    /// Create a rate limiter.
    ///
    /// - `requests_per_second`: sustained rate per key
    /// - `burst`: maximum burst (capacity above sustained rate)
    pub fn new(requests_per_second: f64, burst: f64) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                buckets: DashMap::new(),
                capacity: burst,
                refill_rate: requests_per_second,
            }),
        }
    }

    pub fn key(tenant_id: &str, definition_id: &str) -> String {
        format!("{}:{}", tenant_id, definition_id)
    }

    /// Consume one token for `key`, or return how long until one is available.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self
            .inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.inner.capacity,
                last_refill: now,
            });

        // Refill tokens based on elapsed time
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.inner.refill_rate).min(self.inner.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.inner.refill_rate))
        }
    }

    /// Purge buckets that have been idle for more than `idle`.
    /// Call periodically from a background task to prevent unbounded growth.
    pub fn purge_idle(&self, idle: Duration) {
        let now = Instant::now();
        self.inner
            .buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < idle);
    }

    /// Number of currently tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.inner.buckets.len()
    }
}
