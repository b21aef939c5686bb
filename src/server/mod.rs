// intellid - HTTP server module
// Serves generation calls for every tenant from one process

mod handlers;
mod middleware;

pub use handlers::{
    create_router, handle_generate, handle_invalidate, health_check, metrics_endpoint,
    VERSION_HEADER,
};
pub use middleware::{
    auth_middleware, request_id_from, ApiKeyRegistry, AuthContext, RateLimiter, RequestId,
};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{BreakerConfig, CircuitBreaker, TransitionObserver};
use crate::cache::MemoryCacheStore;
use crate::call_log::{CallLogSink, JsonlCallLog};
use crate::config::Config;
use crate::gateway::ModelGateway;
use crate::monitoring::ServiceMetrics;
use crate::pipeline::Pipeline;
use crate::providers::{create_provider, LlmProvider};
use crate::versions::{InMemoryVersionStore, VersionResolver, VersionStore};

/// Idle time after which a rate-limit bucket is dropped.
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

/// Shared state handed to every handler.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub api_keys: ApiKeyRegistry,
    pub rate_limiter: Option<RateLimiter>,
    pub metrics: ServiceMetrics,
    pub body_limit: usize,
}

impl AppState {
    /// Wire the pipeline from config plus the collaborators that live
    /// outside this process.
    pub fn build(
        config: &Config,
        provider: Arc<dyn LlmProvider>,
        versions: Arc<dyn VersionStore>,
        call_log: Arc<dyn CallLogSink>,
    ) -> Result<Self> {
        let metrics = ServiceMetrics::new().context("Failed to create metrics registry")?;

        let observer_metrics = metrics.clone();
        let observer: TransitionObserver =
            Arc::new(move |_provider, transition| observer_metrics.set_breaker_state(transition.to));
        let breaker = Arc::new(
            CircuitBreaker::new(
                provider.name().to_string(),
                BreakerConfig {
                    failure_threshold: config.breaker.failure_threshold,
                    cooldown: Duration::from_secs(config.breaker.cooldown_secs),
                },
            )
            .with_observer(observer),
        );

        let gateway = ModelGateway::new(provider, breaker).with_metrics(metrics.clone());
        let resolver = VersionResolver::new(
            versions,
            chrono::Duration::days(config.versions.deprecation_window_days),
            config.versions.sunset_policy,
        );
        let pipeline = Pipeline::new(resolver, Arc::new(MemoryCacheStore::new()), gateway)
            .with_call_log(call_log)
            .with_metrics(metrics.clone());

        Ok(Self {
            pipeline: Arc::new(pipeline),
            api_keys: ApiKeyRegistry::new(&config.api_keys),
            rate_limiter: config
                .rate_limit
                .as_ref()
                .map(|limit| RateLimiter::new(limit.requests_per_second, limit.burst)),
            metrics,
            body_limit: config.server.body_limit_bytes,
        })
    }
}

/// The generation API server.
pub struct ApiServer {
    state: Arc<AppState>,
    bind_address: String,
    sweep_interval: Duration,
}

impl ApiServer {
    /// Build the server and its collaborators from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.provider)?;

        let versions: Arc<dyn VersionStore> = match &config.definitions_path {
            Some(path) => Arc::new(InMemoryVersionStore::from_seed_file(path)?),
            None => {
                tracing::warn!("No definitions_path configured; version store is empty");
                Arc::new(InMemoryVersionStore::new())
            }
        };

        let log_dir = config
            .server
            .call_log_dir
            .clone()
            .or_else(JsonlCallLog::default_dir)
            .context("Could not determine call log directory")?;
        let call_log = Arc::new(JsonlCallLog::new(log_dir)?);

        let state = AppState::build(config, provider, versions, call_log)?;
        if state.api_keys.is_empty() {
            tracing::warn!("No api_keys configured; every generation call will be rejected");
        }

        Ok(Self {
            state: Arc::new(state),
            bind_address: config.server.bind_address.clone(),
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Start background maintenance and serve until the listener fails.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind_address))?;

        if !self.sweep_interval.is_zero() {
            let state = Arc::clone(&self.state);
            let interval = self.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    state.pipeline.sweep_cache().await;
                    if let Some(limiter) = &state.rate_limiter {
                        limiter.purge_idle(RATE_LIMIT_IDLE);
                    }
                }
            });
            tracing::info!(interval_secs = interval.as_secs(), "Cache sweep task spawned");
        }

        let app = create_router(Arc::clone(&self.state));

        tracing::info!(
            provider = self.state.pipeline.provider_name(),
            "Starting intellid server on {}",
            addr
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
