// HTTP handlers

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::SecondsFormat;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use super::middleware::{auth_middleware, AuthContext, RateLimiter, RequestId};
use super::AppState;
use crate::call_log::CallRecord;
use crate::errors::{ErrorKind, PipelineError, REQUEST_ID_HEADER};
use crate::pipeline::{GenerateRequest, GenerateResponse};
use crate::versions::{parse_pinned_version, Environment};

pub const VERSION_HEADER: &str = "x-version";

/// Build the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route(
            "/:environment/intelligence/:definition_id/generate",
            post(handle_generate),
        )
        .route("/internal/cache/:definition_id", delete(handle_invalidate))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .merge(authenticated)
        .layer(axum::extract::DefaultBodyLimit::max(state.body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /{environment}/intelligence/{definition_id}/generate
pub async fn handle_generate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((environment, definition_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let prepared = prepare_generate(&state, &auth, &environment, &definition_id, &headers, body);
    let request = match prepared {
        Ok(input) => input.with_request_id(request_id.clone()),
        Err(err) => {
            let record = CallRecord::rejected(request_id.clone(), definition_id)
                .with_tenant(auth.tenant_id.clone())
                .with_environment(environment.parse().ok());
            state.pipeline.record_rejection(record, &err, started.elapsed());
            return err.with_request_id(request_id).into_response();
        }
    };

    match state.pipeline.generate(request).await {
        Ok(response) => success_response(&response),
        Err(err) => err.into_response(),
    }
}

/// Checks that run before the pipeline: environment, scope, version pin,
/// quota, and body shape.
fn prepare_generate(
    state: &AppState,
    auth: &AuthContext,
    environment: &str,
    definition_id: &str,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<GenerateRequest, PipelineError> {
    let environment: Environment = environment
        .parse()
        .map_err(|_| PipelineError::new(ErrorKind::NotFound).with_message("Unknown environment"))?;
    auth.authorize(environment, definition_id)?;

    let pinned = match headers.get(VERSION_HEADER) {
        None => None,
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| PipelineError::new(ErrorKind::InvalidVersion))?;
            Some(parse_pinned_version(raw)?)
        }
    };

    if let Some(limiter) = &state.rate_limiter {
        let key = RateLimiter::key(&auth.tenant_id, definition_id);
        if let Err(wait) = limiter.check(&key) {
            tracing::warn!(tenant_id = %auth.tenant_id, definition_id, "Rate limit exceeded");
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            return Err(PipelineError::new(ErrorKind::RateLimited).with_retry_after(secs));
        }
    }

    let body = body.map_err(|rejection| {
        PipelineError::new(ErrorKind::ValidationError)
            .with_message("Request body could not be read")
            .with_details(json!({ "reason": rejection.body_text() }))
    })?;
    let mut payload: Value = serde_json::from_slice(&body).map_err(|e| {
        PipelineError::new(ErrorKind::ValidationError)
            .with_message("Request body must be valid JSON")
            .with_details(json!({ "reason": e.to_string() }))
    })?;
    let input = payload
        .get_mut("input")
        .map(Value::take)
        .ok_or_else(|| {
            PipelineError::new(ErrorKind::ValidationError)
                .with_message("Request body must be an object with an `input` field")
        })?;

    let mut request = GenerateRequest::new(auth.tenant_id.clone(), environment, definition_id, input);
    request.pinned_version = pinned;
    Ok(request)
}

fn success_response(response: &GenerateResponse) -> Response {
    let resolved = &response.resolved;
    let mut headers = HeaderMap::new();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };

    set(REQUEST_ID_HEADER, response.request_id.clone());
    set(VERSION_HEADER, resolved.number().to_string());
    set("x-version-status", resolved.version.status.as_str().to_string());
    set("x-environment", resolved.version.environment.as_str().to_string());
    set("x-latest-version", resolved.latest_version.to_string());
    if resolved.pinned && resolved.versions_behind() > 0 {
        set("x-versions-behind", resolved.versions_behind().to_string());
    }
    if let Some(deprecation) = &resolved.deprecation {
        set("x-deprecated", "true".to_string());
        set(
            "x-deprecated-message",
            deprecation.message(resolved.number(), resolved.latest_version),
        );
        set(
            "x-sunset-date",
            deprecation.sunset_date.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    (StatusCode::OK, headers, Json(response.to_envelope())).into_response()
}

/// DELETE /internal/cache/{definition_id}
pub async fn handle_invalidate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(definition_id): Path<String>,
) -> Response {
    if let Some(allowed) = &auth.definitions {
        if !allowed.iter().any(|d| d == &definition_id) {
            return PipelineError::new(ErrorKind::Forbidden)
                .with_request_id(request_id)
                .into_response();
        }
    }

    match state
        .pipeline
        .invalidate_definition(&auth.tenant_id, &definition_id)
        .await
    {
        Ok(removed) => {
            let mut response = Json(json!({
                "success": true,
                "data": { "definition_id": definition_id, "removed": removed },
            }))
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        }
        Err(err) => err.with_request_id(request_id).into_response(),
    }
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": state.pipeline.provider_name(),
        "breaker": state.pipeline.breaker_state(),
    }))
}

/// GET /metrics (Prometheus text format)
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => PipelineError::internal(e).into_response(),
    }
}
