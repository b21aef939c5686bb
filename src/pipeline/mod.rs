// Request pipeline
//
// Resolve version -> validate input -> cache check -> assemble prompt ->
// model call -> validate output (one retry on unparseable text) -> cache
// store -> respond. Every failure leaves as exactly one `PipelineError`.

mod types;

pub use types::{GenerateRequest, GenerateResponse, PipelineStage, SuccessEnvelope, SuccessMeta};

use anyhow::anyhow;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::breaker::BreakerState;
use crate::cache::{fingerprint, CacheStore};
use crate::call_log::{CallLogSink, CallRecord, NullCallLog};
use crate::errors::{ErrorKind, PipelineError};
use crate::gateway::{Generation, GenerationParams, ModelGateway};
use crate::monitoring::ServiceMetrics;
use crate::prompt::{validate_output, OutputError, Prompt, PromptAssembler};
use crate::providers::Usage;
use crate::schema::{SchemaTree, Violation};
use crate::versions::{ConfigurationVersion, ResolvedVersion, VersionResolver};

/// Compiled input/output schemas of one configuration version.
struct CompiledSchemas {
    input: SchemaTree,
    output: SchemaTree,
}

type SchemaKey = (String, String, u32);

pub struct Pipeline {
    resolver: VersionResolver,
    cache: Arc<dyn CacheStore>,
    gateway: ModelGateway,
    assembler: PromptAssembler,
    call_log: Arc<dyn CallLogSink>,
    metrics: Option<ServiceMetrics>,
    // Versions are immutable, so compiled schemas never go stale
    schemas: DashMap<SchemaKey, Arc<CompiledSchemas>>,
}

/// Mutable bookkeeping for one run.
struct Run {
    trace: Vec<PipelineStage>,
    record: CallRecord,
    resolved: Option<ResolvedVersion>,
}

impl Run {
    fn enter(&mut self, stage: PipelineStage) {
        self.trace.push(stage);
    }
}

struct Produced {
    data: Value,
    cached: bool,
    model: Option<String>,
    usage: Option<Usage>,
}

impl Pipeline {
    pub fn new(
        resolver: VersionResolver,
        cache: Arc<dyn CacheStore>,
        gateway: ModelGateway,
    ) -> Self {
        Self {
            resolver,
            cache,
            gateway,
            assembler: PromptAssembler::new(),
            call_log: Arc::new(NullCallLog),
            metrics: None,
            schemas: DashMap::new(),
        }
    }

    pub fn with_call_log(mut self, call_log: Arc<dyn CallLogSink>) -> Self {
        self.call_log = call_log;
        self
    }

    pub fn with_metrics(mut self, metrics: ServiceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.gateway.breaker().state()
    }

    pub fn provider_name(&self) -> &str {
        self.gateway.provider_name()
    }

    /// Serve one generation call.
    pub async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, PipelineError> {
        let started = Instant::now();
        let mut run = Run {
            trace: vec![PipelineStage::Authenticated],
            record: CallRecord::new(
                request.request_id.clone(),
                request.tenant_id.clone(),
                request.definition_id.clone(),
                request.environment,
            ),
            resolved: None,
        };

        let result = self.execute(&request, &mut run).await;
        let latency = started.elapsed();
        let latency_ms = latency.as_millis() as u64;
        run.record.latency_ms = latency_ms;

        let outcome = match result {
            Ok(produced) => {
                run.enter(PipelineStage::Respond);
                match run.resolved.take() {
                    Some(resolved) => Ok(GenerateResponse {
                        request_id: request.request_id.clone(),
                        data: produced.data,
                        resolved,
                        cached: produced.cached,
                        latency_ms,
                        model: produced.model,
                        usage: produced.usage,
                        provider_calls: run.record.provider_calls,
                        trace: run.trace,
                    }),
                    None => Err(PipelineError::internal(anyhow!(
                        "pipeline produced output without a resolved version"
                    ))),
                }
            }
            Err(err) => {
                run.enter(PipelineStage::Fail);
                tracing::info!(
                    request_id = %request.request_id,
                    tenant_id = %request.tenant_id,
                    definition_id = %request.definition_id,
                    code = err.kind.code(),
                    trace = ?run.trace,
                    "Generation failed"
                );
                Err(err)
            }
        };

        let code = match &outcome {
            Ok(response) => {
                run.record.cached = response.cached;
                run.record.model = response.model.clone();
                run.record.usage = response.usage;
                "OK"
            }
            Err(err) => {
                run.record.status = err.status().as_u16();
                run.record.error_code = Some(err.kind.code().to_string());
                err.kind.code()
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_request(code, latency.as_secs_f64());
        }
        self.call_log.record(run.record);

        outcome.map_err(|err| err.with_request_id(request.request_id))
    }

    /// Account for a call refused before `generate` ran (auth, scope,
    /// version header, quota, body shape) so metrics and the call log see
    /// every outcome.
    pub fn record_rejection(&self, mut record: CallRecord, err: &PipelineError, latency: Duration) {
        record.status = err.status().as_u16();
        record.error_code = Some(err.kind.code().to_string());
        record.latency_ms = latency.as_millis() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_request(err.kind.code(), latency.as_secs_f64());
        }
        self.call_log.record(record);
    }

    async fn execute(
        &self,
        request: &GenerateRequest,
        run: &mut Run,
    ) -> Result<Produced, PipelineError> {
        let resolved = self
            .resolver
            .resolve(
                &request.definition_id,
                &request.tenant_id,
                request.environment,
                request.pinned_version,
            )
            .await?;
        run.enter(PipelineStage::VersionResolved);
        run.record.version = Some(resolved.number());
        let version = resolved.version.clone();
        run.resolved = Some(resolved);

        let schemas = self.schemas_for(&version)?;
        let input = schemas.input.validate(&request.input).map_err(|violations| {
            PipelineError::new(ErrorKind::ValidationError)
                .with_details(violation_details(&violations))
        })?;

        let settings = &version.settings;
        let cache_key = if settings.cache_active() {
            let fp = fingerprint(&request.tenant_id, &request.definition_id, &input);
            run.record.input_fingerprint = Some(fp.clone());
            let hit = self.cache_lookup(request, &version, &fp).await;
            run.enter(PipelineStage::CacheChecked);
            if let Some(data) = hit {
                run.enter(PipelineStage::CacheHit);
                return Ok(Produced {
                    data,
                    cached: true,
                    model: None,
                    usage: None,
                });
            }
            Some(fp)
        } else {
            run.enter(PipelineStage::CacheChecked);
            None
        };
        run.enter(PipelineStage::CacheMiss);

        let prompt = self.assembler.assemble(settings, &input);
        let params = GenerationParams {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            model: settings.model.as_deref(),
        };

        run.enter(PipelineStage::Generating);
        let first = self.call_model(&prompt, params.clone(), run).await?;
        run.enter(PipelineStage::Validating);
        let (data, generation) = match validate_output(&first.text, &schemas.output) {
            Ok(data) => (data, first),
            Err(OutputError::SchemaViolations(violations)) => {
                return Err(output_validation_failed(&violations));
            }
            Err(OutputError::Unparseable) => {
                tracing::info!(
                    request_id = %request.request_id,
                    definition_id = %request.definition_id,
                    "Model output unparseable, retrying with strict prompt"
                );
                run.enter(PipelineStage::Retrying);
                let second = self.call_model(&prompt.strengthen(), params, run).await?;
                run.enter(PipelineStage::Validating);
                match validate_output(&second.text, &schemas.output) {
                    Ok(data) => (data, second),
                    Err(OutputError::Unparseable) => {
                        return Err(PipelineError::new(ErrorKind::OutputParseFailed));
                    }
                    Err(OutputError::SchemaViolations(violations)) => {
                        return Err(output_validation_failed(&violations));
                    }
                }
            }
        };

        if let Some(fp) = cache_key {
            run.enter(PipelineStage::CacheStore);
            let ttl = Duration::from_secs(settings.cache_ttl_secs);
            if let Err(e) = self
                .cache
                .set(
                    &request.tenant_id,
                    &request.definition_id,
                    &fp,
                    data.clone(),
                    &version.version,
                    ttl,
                )
                .await
            {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Failed to store generation in cache"
                );
            }
        }

        Ok(Produced {
            data,
            cached: false,
            model: Some(generation.model),
            usage: run.record.usage,
        })
    }

    async fn call_model(
        &self,
        prompt: &Prompt,
        params: GenerationParams<'_>,
        run: &mut Run,
    ) -> Result<Generation, PipelineError> {
        run.record.provider_calls += 1;
        let generation = self.gateway.generate(prompt, params).await?;
        let usage = run.record.usage.get_or_insert_with(Usage::default);
        usage.input_tokens += generation.usage.input_tokens;
        usage.output_tokens += generation.usage.output_tokens;
        Ok(generation)
    }

    /// A cache read scoped to the resolved version. Store failures and
    /// entries labelled with another version count as misses.
    async fn cache_lookup(
        &self,
        request: &GenerateRequest,
        version: &ConfigurationVersion,
        fp: &str,
    ) -> Option<Value> {
        let entry = match self
            .cache
            .get(&request.tenant_id, &request.definition_id, &version.version, fp)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                None
            }
        };
        let hit = entry.filter(|e| e.version == version.version);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(hit.is_some());
        }
        hit.map(|e| e.data)
    }

    fn schemas_for(
        &self,
        version: &ConfigurationVersion,
    ) -> Result<Arc<CompiledSchemas>, PipelineError> {
        let key = (
            version.tenant_id.clone(),
            version.definition_id.clone(),
            version.number(),
        );
        if let Some(compiled) = self.schemas.get(&key) {
            return Ok(Arc::clone(compiled.value()));
        }

        let compile = |schema: &Value, which: &str| {
            SchemaTree::compile(schema).map_err(|e| {
                PipelineError::internal(anyhow!(
                    "{} schema of {} v{} does not compile: {}",
                    which,
                    version.definition_id,
                    version.version,
                    e
                ))
            })
        };
        let compiled = Arc::new(CompiledSchemas {
            input: compile(&version.settings.input_schema, "input")?,
            output: compile(&version.settings.output_schema, "output")?,
        });
        self.schemas.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Drop every cached response for a definition. Called by the
    /// definition update/delete flow.
    pub async fn invalidate_definition(
        &self,
        tenant_id: &str,
        definition_id: &str,
    ) -> Result<usize, PipelineError> {
        let removed = self
            .cache
            .invalidate(tenant_id, definition_id)
            .await
            .map_err(PipelineError::internal)?;
        self.schemas
            .retain(|(tenant, definition, _), _| !(tenant == tenant_id && definition == definition_id));
        tracing::info!(tenant_id, definition_id, removed, "Invalidated cached responses");
        Ok(removed)
    }

    /// Remove expired cache entries.
    pub async fn sweep_cache(&self) -> usize {
        match self.cache.purge_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache sweep failed");
                0
            }
        }
    }
}

fn violation_details(violations: &[Violation]) -> Value {
    json!({ "violations": violations })
}

fn output_validation_failed(violations: &[Violation]) -> PipelineError {
    PipelineError::new(ErrorKind::OutputValidationFailed).with_details(violation_details(violations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, CircuitBreaker};
    use crate::cache::MemoryCacheStore;
    use crate::call_log::MemoryCallLog;
    use crate::providers::{ProviderOutcome, ScriptedProvider};
    use crate::versions::{Environment, ExecutionSettings, InMemoryVersionStore, SunsetPolicy};

    struct Fixture {
        pipeline: Pipeline,
        provider: Arc<ScriptedProvider>,
        store: Arc<InMemoryVersionStore>,
        call_log: Arc<MemoryCallLog>,
    }

    fn fixture(settings: ExecutionSettings, outcomes: Vec<ProviderOutcome>) -> Fixture {
        let store = Arc::new(InMemoryVersionStore::new());
        store.promote("acme", "summarize", Environment::Production, settings);

        let provider = Arc::new(ScriptedProvider::new(outcomes));
        let breaker = Arc::new(CircuitBreaker::new("scripted", BreakerConfig::default()));
        let gateway = ModelGateway::new(provider.clone(), breaker);
        let resolver = VersionResolver::new(
            store.clone(),
            chrono::Duration::days(90),
            SunsetPolicy::Annotate,
        );
        let call_log = Arc::new(MemoryCallLog::new());
        let pipeline = Pipeline::new(resolver, Arc::new(MemoryCacheStore::new()), gateway)
            .with_call_log(call_log.clone());

        Fixture {
            pipeline,
            provider,
            store,
            call_log,
        }
    }

    fn summary_settings() -> ExecutionSettings {
        let mut settings = ExecutionSettings::new("Summarize");
        settings.input_schema = json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        });
        settings.output_schema = json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        });
        settings
    }

    fn request(input: Value) -> GenerateRequest {
        GenerateRequest::new("acme", Environment::Production, "summarize", input)
    }

    #[tokio::test]
    async fn test_happy_path_trace() {
        let fx = fixture(
            summary_settings(),
            vec![ScriptedProvider::success(r#"{"summary": "short"}"#)],
        );
        let response = fx.pipeline.generate(request(json!({"text": "long"}))).await.unwrap();

        assert_eq!(response.data, json!({"summary": "short"}));
        assert!(!response.cached);
        assert_eq!(
            response.trace,
            vec![
                PipelineStage::Authenticated,
                PipelineStage::VersionResolved,
                PipelineStage::CacheChecked,
                PipelineStage::CacheMiss,
                PipelineStage::Generating,
                PipelineStage::Validating,
                PipelineStage::Respond,
            ]
        );
        assert_eq!(fx.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_provider() {
        let fx = fixture(summary_settings(), vec![ScriptedProvider::success("{}")]);
        let err = fx.pipeline.generate(request(json!({"txt": 1}))).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.details.unwrap()["violations"][0]["path"], "$.text");
        assert_eq!(fx.provider.calls(), 0);
        assert!(err.request_id.is_some());
    }

    #[tokio::test]
    async fn test_schema_violation_is_terminal_without_retry() {
        let fx = fixture(
            summary_settings(),
            vec![ScriptedProvider::success(r#"{"title": "no summary"}"#)],
        );
        let err = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutputValidationFailed);
        assert_eq!(fx.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_then_schema_failure() {
        let fx = fixture(
            summary_settings(),
            vec![
                ScriptedProvider::success("garbage"),
                ScriptedProvider::success(r#"{"nope": 1}"#),
            ],
        );
        let err = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutputValidationFailed);
        assert_eq!(fx.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_uses_strengthened_prompt() {
        let fx = fixture(
            summary_settings(),
            vec![
                ScriptedProvider::success("Here you go!"),
                ScriptedProvider::success(r#"{"summary": "ok"}"#),
            ],
        );
        let response = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        assert_eq!(response.provider_calls, 2);
        assert!(response.trace.contains(&PipelineStage::Retrying));
        assert_eq!(response.usage.unwrap().input_tokens, 20);

        let requests = fx.provider.requests();
        assert!(requests[1].system.contains(crate::prompt::STRICT_JSON_INSTRUCTION));
        assert!(!requests[0].system.contains(crate::prompt::STRICT_JSON_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_provider_failure_maps_to_llm_error() {
        let fx = fixture(
            summary_settings(),
            vec![ProviderOutcome::ProviderError {
                status: Some(500),
                message: "boom".into(),
            }],
        );
        let err = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LlmError);
        assert_eq!(err.effective_retry_after(), Some(5));
    }

    #[tokio::test]
    async fn test_cache_entry_from_other_version_is_a_miss() {
        let mut settings = summary_settings();
        settings.cache_ttl_secs = 900;
        let fx = fixture(
            settings.clone(),
            vec![ScriptedProvider::success(r#"{"summary": "v"}"#)],
        );

        fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        fx.store
            .promote("acme", "summarize", Environment::Production, settings);

        let pinned = fx
            .pipeline
            .generate(request(json!({"text": "x"})).pinned(1))
            .await
            .unwrap();
        assert!(pinned.cached);

        let latest = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        assert!(!latest.cached);
        assert_eq!(fx.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_environments_keep_separate_cache_entries() {
        let mut settings = summary_settings();
        settings.cache_ttl_secs = 900;
        let fx = fixture(
            settings.clone(),
            vec![ScriptedProvider::success(r#"{"summary": "s"}"#)],
        );
        fx.store
            .promote("acme", "summarize", Environment::Sandbox, settings);
        let sandbox_request = || {
            GenerateRequest::new("acme", Environment::Sandbox, "summarize", json!({"text": "x"}))
        };

        fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        fx.pipeline.generate(sandbox_request()).await.unwrap();

        let production = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        let sandbox = fx.pipeline.generate(sandbox_request()).await.unwrap();
        assert!(production.cached);
        assert!(sandbox.cached);
        assert_eq!(fx.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_cache_ttl_still_responds() {
        let mut settings = summary_settings();
        settings.cache_ttl_secs = u64::MAX;
        let fx = fixture(settings, vec![ScriptedProvider::success(r#"{"summary": "s"}"#)]);

        let first = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        let second = fx.pipeline.generate(request(json!({"text": "x"}))).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(fx.call_log.records().len(), 2);
    }

    #[tokio::test]
    async fn test_call_log_receives_every_outcome() {
        let mut settings = summary_settings();
        settings.cache_ttl_secs = 60;
        let fx = fixture(settings, vec![ScriptedProvider::success(r#"{"summary": "s"}"#)]);

        fx.pipeline.generate(request(json!({"text": "a"}))).await.unwrap();
        fx.pipeline.generate(request(json!({"text": "a"}))).await.unwrap();
        let _ = fx.pipeline.generate(request(json!({}))).await;

        let records = fx.call_log.records();
        assert_eq!(records.len(), 3);
        assert!(!records[0].cached);
        assert_eq!(records[0].provider_calls, 1);
        assert!(records[1].cached);
        assert_eq!(records[1].provider_calls, 0);
        assert_eq!(records[2].error_code.as_deref(), Some("VALIDATION_ERROR"));
        assert_eq!(records[2].status, 400);
        assert!(records[0].input_fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_definition() {
        let mut settings = summary_settings();
        settings.cache_ttl_secs = 900;
        let fx = fixture(settings, vec![ScriptedProvider::success(r#"{"summary": "s"}"#)]);

        fx.pipeline.generate(request(json!({"text": "a"}))).await.unwrap();
        assert_eq!(fx.pipeline.invalidate_definition("acme", "summarize").await.unwrap(), 1);

        let again = fx.pipeline.generate(request(json!({"text": "a"}))).await.unwrap();
        assert!(!again.cached);
    }
}
