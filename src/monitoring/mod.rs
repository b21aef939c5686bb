// Service metrics
//
// Prometheus collectors for the generation pipeline, registered on a
// private registry and rendered in text exposition format at /metrics.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::breaker::BreakerState;

/// Latency buckets in seconds, from cache hits to slow model calls.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    generation_requests: IntCounterVec,
    cache_lookups: IntCounterVec,
    provider_calls: IntCounterVec,
    breaker_state: IntGauge,
    generation_latency: Histogram,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let generation_requests = IntCounterVec::new(
            Opts::new(
                "intellid_generation_requests_total",
                "Generation calls by response code",
            ),
            &["code"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("intellid_cache_lookups_total", "Cache lookups by result"),
            &["result"],
        )?;
        let provider_calls = IntCounterVec::new(
            Opts::new("intellid_provider_calls_total", "Provider calls by outcome"),
            &["outcome"],
        )?;
        let breaker_state = IntGauge::new(
            "intellid_breaker_state",
            "Circuit breaker state (0 closed, 1 half-open, 2 open)",
        )?;
        let generation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "intellid_generation_latency_seconds",
                "End-to-end latency of generation calls",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry
            .register(Box::new(generation_requests.clone()))
            .context("Failed to register generation counter")?;
        registry
            .register(Box::new(cache_lookups.clone()))
            .context("Failed to register cache counter")?;
        registry
            .register(Box::new(provider_calls.clone()))
            .context("Failed to register provider counter")?;
        registry
            .register(Box::new(breaker_state.clone()))
            .context("Failed to register breaker gauge")?;
        registry
            .register(Box::new(generation_latency.clone()))
            .context("Failed to register latency histogram")?;

        Ok(Self {
            registry,
            generation_requests,
            cache_lookups,
            provider_calls,
            breaker_state,
            generation_latency,
        })
    }

    /// Count one finished generation call; `code` is "OK" or an error code.
    pub fn record_request(&self, code: &str, latency_secs: f64) {
        self.generation_requests.with_label_values(&[code]).inc();
        self.generation_latency.observe(latency_secs);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_provider_call(&self, outcome: &str) {
        self.provider_calls.with_label_values(&[outcome]).inc();
    }

    pub fn set_breaker_state(&self, state: BreakerState) {
        let value = match state {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        };
        self.breaker_state.set(value);
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}
