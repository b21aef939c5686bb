// Integration tests for the HTTP surface.
//
// Strategy
// --------
// Each test builds a full `AppState` around a `ScriptedProvider` and an
// in-memory version store, then drives the real router with
// tower::ServiceExt::oneshot(). No sockets, no network.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // provides .oneshot()

use intellid::call_log::MemoryCallLog;
use intellid::config::{ApiKeyEntry, Config, ProviderEntry, RateLimitSettings};
use intellid::providers::{ProviderOutcome, ScriptedProvider};
use intellid::server::{create_router, AppState};
use intellid::versions::{
    ConfigurationVersion, Environment, ExecutionSettings, InMemoryVersionStore, VersionStatus,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PROD_KEY: &str = "key-prod";
const SANDBOX_KEY: &str = "key-sandbox";
const NARROW_KEY: &str = "key-classify-only";
const SUMMARY: &str = r#"{"summary": "short"}"#;

struct TestApp {
    router: Router,
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryVersionStore>,
    call_log: Arc<MemoryCallLog>,
}

fn api_key(token: &str, environment: Environment, definitions: Option<Vec<&str>>) -> ApiKeyEntry {
    ApiKeyEntry {
        token: token.to_string(),
        tenant_id: "acme".to_string(),
        environment,
        definitions: definitions.map(|d| d.into_iter().map(String::from).collect()),
        revoked: false,
    }
}

fn base_config() -> Config {
    let mut config = Config::with_provider(ProviderEntry::Openai {
        api_key: "sk-test".to_string(),
        model: None,
        base_url: None,
        timeout_secs: 30,
    });
    config.api_keys = vec![
        api_key(PROD_KEY, Environment::Production, None),
        api_key(SANDBOX_KEY, Environment::Sandbox, None),
        api_key(NARROW_KEY, Environment::Production, Some(vec!["classify"])),
    ];
    config
}

fn summary_settings() -> ExecutionSettings {
    let mut settings = ExecutionSettings::new("Summarize the text in one sentence");
    settings.input_schema = json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "minLength": 1 },
            "lang": { "type": "string" }
        },
        "required": ["text"]
    });
    settings.output_schema = json!({
        "type": "object",
        "properties": { "summary": { "type": "string" } },
        "required": ["summary"]
    });
    settings
}

fn build_app(config: Config, outcomes: Vec<ProviderOutcome>) -> TestApp {
    let provider = Arc::new(ScriptedProvider::new(outcomes));
    let store = Arc::new(InMemoryVersionStore::new());
    let call_log = Arc::new(MemoryCallLog::new());
    let state = AppState::build(&config, provider.clone(), store.clone(), call_log.clone())
        .expect("failed to build app state");

    TestApp {
        router: create_router(Arc::new(state)),
        provider,
        store,
        call_log,
    }
}

/// One active production version of `summarize`, answering with SUMMARY.
fn summarize_app() -> TestApp {
    let app = build_app(base_config(), vec![ScriptedProvider::success(SUMMARY)]);
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());
    app
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router
        .clone()
        .oneshot(request)
        .await
        .expect("oneshot failed")
}

fn generate_request(
    environment: &str,
    definition: &str,
    token: Option<&str>,
    version: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/{}/intelligence/{}/generate", environment, definition))
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    if let Some(version) = version {
        builder = builder.header("x-version", version);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

async fn generate(app: &TestApp, version: Option<&str>, input: Value) -> Response {
    send(
        app,
        generate_request("production", "summarize", Some(PROD_KEY), version, json!({ "input": input })),
    )
    .await
}

/// Read an Axum response body as a parsed serde_json::Value.
async fn body_json(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("response body is not valid JSON")
}

fn header<'a>(resp: &'a Response, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

fn retry_after(resp: &Response) -> u64 {
    header(resp, "retry-after")
        .expect("missing Retry-After")
        .parse()
        .expect("Retry-After is not an integer")
}

// ---------------------------------------------------------------------------
// Authentication and scope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_or_unknown_key_is_unauthorized() {
    let app = summarize_app();

    for token in [None, Some("not-a-key")] {
        let resp = send(
            &app,
            generate_request("production", "summarize", token, None, json!({"input": {"text": "a"}})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(header(&resp, "x-request-id").is_some());

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn test_key_scope_is_enforced() {
    let app = summarize_app();

    // Sandbox key against a production endpoint
    let resp = send(
        &app,
        generate_request("production", "summarize", Some(SANDBOX_KEY), None, json!({"input": {"text": "a"}})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["error"]["code"], "FORBIDDEN");

    // Key restricted to another definition
    let resp = send(
        &app,
        generate_request("production", "summarize", Some(NARROW_KEY), None, json!({"input": {"text": "a"}})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn test_unknown_environment_is_not_found() {
    let app = summarize_app();
    let resp = send(
        &app,
        generate_request("staging", "summarize", Some(PROD_KEY), None, json!({"input": {"text": "a"}})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = summarize_app();
    let request = Request::builder()
        .method("POST")
        .uri("/production/intelligence/summarize/generate")
        .header("authorization", format!("Bearer {}", PROD_KEY))
        .header("x-request-id", "req-123")
        .body(Body::from(json!({"input": {"text": "a"}}).to_string()))
        .unwrap();

    let resp = send(&app, request).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-request-id"), Some("req-123"));
    assert_eq!(body_json(resp).await["meta"]["request_id"], "req-123");
}

// ---------------------------------------------------------------------------
// Generation and version resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_generate_success_envelope_and_headers() {
    let app = summarize_app();
    let resp = generate(&app, None, json!({"text": "a long article"})).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-version"), Some("1"));
    assert_eq!(header(&resp, "x-version-status"), Some("active"));
    assert_eq!(header(&resp, "x-environment"), Some("production"));
    assert_eq!(header(&resp, "x-latest-version"), Some("1"));
    assert!(header(&resp, "x-deprecated").is_none());
    assert!(header(&resp, "x-versions-behind").is_none());

    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!({"summary": "short"}));
    assert_eq!(body["meta"]["version"], 1);
    assert_eq!(body["meta"]["cached"], false);
    assert_eq!(app.provider.calls(), 1);

    let records = app.call_log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].version, Some(1));
}

#[tokio::test]
async fn test_missing_definition_is_not_found() {
    let app = summarize_app();
    let resp = send(
        &app,
        generate_request("production", "translate", Some(PROD_KEY), None, json!({"input": {}})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_version_header() {
    let app = summarize_app();
    for raw in ["abc", "0", "-1", "1.5", "1000000"] {
        let resp = generate(&app, Some(raw), json!({"text": "a"})).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "X-Version: {raw}");
        assert_eq!(body_json(resp).await["error"]["code"], "INVALID_VERSION");
    }
    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn test_pinned_deprecated_version_is_annotated() {
    let app = build_app(base_config(), vec![ScriptedProvider::success(SUMMARY)]);
    let deprecated_at = Utc::now() - chrono::Duration::days(10);
    app.store
        .insert(ConfigurationVersion {
            tenant_id: "acme".to_string(),
            definition_id: "summarize".to_string(),
            version: "1".to_string(),
            environment: Environment::Production,
            status: VersionStatus::Deprecated,
            created_at: deprecated_at - chrono::Duration::days(30),
            deprecated_at: Some(deprecated_at),
            settings: summary_settings(),
        })
        .unwrap();
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());

    let resp = generate(&app, Some("1"), json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-version"), Some("1"));
    assert_eq!(header(&resp, "x-version-status"), Some("deprecated"));
    assert_eq!(header(&resp, "x-latest-version"), Some("2"));
    assert_eq!(header(&resp, "x-versions-behind"), Some("1"));
    assert_eq!(header(&resp, "x-deprecated"), Some("true"));
    assert!(header(&resp, "x-deprecated-message").is_some());

    let expected_sunset =
        (deprecated_at + chrono::Duration::days(90)).to_rfc3339_opts(SecondsFormat::Secs, true);
    assert_eq!(header(&resp, "x-sunset-date"), Some(expected_sunset.as_str()));

    // Unpinned calls get the active version without deprecation headers
    let resp = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(header(&resp, "x-version"), Some("2"));
    assert!(header(&resp, "x-deprecated").is_none());
}

#[tokio::test]
async fn test_pinned_version_errors() {
    let app = summarize_app();
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());
    app.store
        .promote("acme", "summarize", Environment::Sandbox, summary_settings());

    // Version that does not exist anywhere
    let resp = generate(&app, Some("42"), json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "VERSION_NOT_FOUND");
    assert_eq!(body["error"]["details"]["available_versions"], json!([1, 2, 3]));

    // Version 3 lives in sandbox only
    let resp = generate(&app, Some("3"), json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "VERSION_ENVIRONMENT_MISMATCH");
    assert_eq!(body["error"]["details"]["available_versions"], json!([1, 2]));

    assert_eq!(app.provider.calls(), 0);
}

// ---------------------------------------------------------------------------
// Request body and input validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bad_bodies_are_validation_errors() {
    let app = summarize_app();

    let not_json = Request::builder()
        .method("POST")
        .uri("/production/intelligence/summarize/generate")
        .header("authorization", format!("Bearer {}", PROD_KEY))
        .body(Body::from("{not json"))
        .unwrap();
    let resp = send(&app, not_json).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "VALIDATION_ERROR");

    let no_input = generate_request(
        "production",
        "summarize",
        Some(PROD_KEY),
        None,
        json!({"text": "forgot the wrapper"}),
    );
    let resp = send(&app, no_input).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn test_schema_violations_are_reported() {
    let app = summarize_app();
    let resp = generate(&app, None, json!({"lang": "en"})).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let violations = body["error"]["details"]["violations"]
        .as_array()
        .expect("violations array");
    assert!(!violations.is_empty());
    assert_eq!(app.provider.calls(), 0);
}

// ---------------------------------------------------------------------------
// Failure paths with Retry-After
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let mut config = base_config();
    config.rate_limit = Some(RateLimitSettings {
        requests_per_second: 0.5,
        burst: 1.0,
    });
    let app = build_app(config, vec![ScriptedProvider::success(SUMMARY)]);
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());

    let resp = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let wait = retry_after(&resp);
    assert!((1..=2).contains(&wait), "unexpected Retry-After {wait}");
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert_eq!(body["error"]["retry_after"], wait);

    assert_eq!(app.provider.calls(), 1);
}

#[tokio::test]
async fn test_rejections_before_the_pipeline_are_call_logged() {
    let mut config = base_config();
    config.rate_limit = Some(RateLimitSettings {
        requests_per_second: 0.5,
        burst: 1.0,
    });
    let app = build_app(config, vec![ScriptedProvider::success(SUMMARY)]);
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());

    assert_eq!(generate(&app, None, json!({"text": "a"})).await.status(), StatusCode::OK);
    assert_eq!(
        generate(&app, None, json!({"text": "a"})).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        generate(&app, Some("abc"), json!({"text": "a"})).await.status(),
        StatusCode::BAD_REQUEST
    );
    let anonymous = send(
        &app,
        generate_request("production", "summarize", None, None, json!({"input": {"text": "a"}})),
    )
    .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let records = app.call_log.records();
    let outcomes: Vec<(u16, Option<&str>)> = records
        .iter()
        .map(|r| (r.status, r.error_code.as_deref()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (200, None),
            (429, Some("RATE_LIMITED")),
            (400, Some("INVALID_VERSION")),
            (401, Some("UNAUTHORIZED")),
        ]
    );
    assert!(records.iter().all(|r| r.definition_id == "summarize"));
    assert_eq!(records[1].tenant_id.as_deref(), Some("acme"));
    assert_eq!(records[1].environment, Some(Environment::Production));
    assert!(records[3].tenant_id.is_none());
}

#[tokio::test]
async fn test_unbounded_cache_ttl_is_served() {
    let app = build_app(base_config(), vec![ScriptedProvider::success(SUMMARY)]);
    let mut settings = summary_settings();
    settings.cache_ttl_secs = u64::MAX;
    app.store
        .promote("acme", "summarize", Environment::Production, settings);

    let first = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = body_json(generate(&app, None, json!({"text": "a"})).await).await;
    assert_eq!(second["meta"]["cached"], true);
    assert_eq!(app.call_log.records().len(), 2);
}

#[tokio::test]
async fn test_provider_timeout_is_llm_timeout() {
    let app = build_app(base_config(), vec![ProviderOutcome::Timeout]);
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());

    let resp = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(retry_after(&resp) >= 1);
    assert_eq!(body_json(resp).await["error"]["code"], "LLM_TIMEOUT");
}

#[tokio::test]
async fn test_open_breaker_short_circuits() {
    let mut config = base_config();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_secs = 30;
    let app = build_app(
        config,
        vec![ProviderOutcome::ProviderError {
            status: Some(500),
            message: "upstream exploded".to_string(),
        }],
    );
    app.store
        .promote("acme", "summarize", Environment::Production, summary_settings());

    for _ in 0..2 {
        let resp = generate(&app, None, json!({"text": "a"})).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(retry_after(&resp) >= 1);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "LLM_ERROR");
        // Provider detail never leaks
        assert!(!body.to_string().contains("upstream exploded"));
    }
    assert_eq!(app.provider.calls(), 2);

    // Breaker is open: rejected without reaching the provider
    let resp = generate(&app, None, json!({"text": "a"})).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let wait = retry_after(&resp);
    assert!((1..=30).contains(&wait), "unexpected Retry-After {wait}");
    assert_eq!(body_json(resp).await["error"]["code"], "LLM_ERROR");
    assert_eq!(app.provider.calls(), 2);

    let health = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(body_json(health).await["breaker"], "open");
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

fn cached_summarize_app() -> TestApp {
    let app = build_app(base_config(), vec![ScriptedProvider::success(SUMMARY)]);
    let mut settings = summary_settings();
    settings.cache_ttl_secs = 900;
    app.store
        .promote("acme", "summarize", Environment::Production, settings);
    app
}

#[tokio::test]
async fn test_identical_input_is_served_from_cache() {
    let app = cached_summarize_app();

    let first = body_json(generate(&app, None, json!({"text": "a", "lang": "en"})).await).await;
    assert_eq!(first["meta"]["cached"], false);

    // Same input, different key order
    let second = body_json(generate(&app, None, json!({"lang": "en", "text": "a"})).await).await;
    assert_eq!(second["meta"]["cached"], true);
    assert_eq!(second["data"], first["data"]);
    assert_eq!(app.provider.calls(), 1);

    // Different input misses
    let third = body_json(generate(&app, None, json!({"text": "b"})).await).await;
    assert_eq!(third["meta"]["cached"], false);
    assert_eq!(app.provider.calls(), 2);

    let records = app.call_log.records();
    assert_eq!(records.iter().filter(|r| r.cached).count(), 1);
}

#[tokio::test]
async fn test_cache_invalidation_endpoint() {
    let app = cached_summarize_app();
    generate(&app, None, json!({"text": "a"})).await;

    let delete = Request::builder()
        .method("DELETE")
        .uri("/internal/cache/summarize")
        .header("authorization", format!("Bearer {}", PROD_KEY))
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, delete).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["removed"], 1);

    let again = body_json(generate(&app, None, json!({"text": "a"})).await).await;
    assert_eq!(again["meta"]["cached"], false);
    assert_eq!(app.provider.calls(), 2);

    // Unauthenticated invalidation is rejected
    let anonymous = Request::builder()
        .method("DELETE")
        .uri("/internal/cache/summarize")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, anonymous).await.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Public endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint() {
    let app = summarize_app();
    let resp = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "scripted");
    assert_eq!(body["breaker"], "closed");
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let app = summarize_app();
    generate(&app, None, json!({"text": "a"})).await;
    generate(&app, None, json!({})).await;

    let resp = send(
        &app,
        Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "content-type")
        .unwrap_or_default()
        .starts_with("text/plain"));

    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("intellid_generation_requests_total{code=\"OK\"} 1"));
    assert!(text.contains("intellid_generation_requests_total{code=\"VALIDATION_ERROR\"} 1"));
    assert!(text.contains("intellid_provider_calls_total{outcome=\"success\"} 1"));
}
