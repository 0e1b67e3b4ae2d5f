//! HTTP server assembly.
//!
//! Builds the process singletons (registry, cache, health tracker, metrics
//! sink) from configuration, wires them into an executor and exposes it over
//! an axum router.

use crate::config::Config;
use crate::handlers;
use crate::redis_cache::RedisCache;
use axum::routing::{get, post};
use axum::Router;
use modelmux_core::adapters::anthropic::AnthropicAdapter;
use modelmux_core::adapters::compat::CompatAdapter;
use modelmux_core::adapters::openai::OpenAiAdapter;
use modelmux_core::adapters::{Adapter, AdapterRegistry};
use modelmux_core::cache::{MemoryCache, ResponseCache};
use modelmux_core::credentials::ConfigCredentialResolver;
use modelmux_core::executor::{Executor, ExecutorConfig};
use modelmux_core::health::{HealthConfig, HealthTracker};
use modelmux_core::metrics::MetricsSink;
use modelmux_core::router::{QualityMatrix, Router as CoreRouter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
}

/// Build the axum application from configuration.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    config.validate()?;
    let executor = Arc::new(build_executor(&config)?);
    let state = AppState { executor };

    Ok(Router::new()
        .route("/v1/completions", post(handlers::completion))
        .route("/v1/completions/stream", post(handlers::completion_stream))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/admin/providers", get(handlers::providers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(config.server.request_timeout))
        .with_state(state))
}

/// Assemble the orchestration core from configuration.
pub fn build_executor(config: &Config) -> anyhow::Result<Executor> {
    let encrypted: HashMap<String, String> = config
        .providers
        .iter()
        .filter_map(|entry| {
            entry
                .api_key_encrypted
                .clone()
                .map(|blob| (entry.name.clone(), blob))
        })
        .collect();
    let resolver = Arc::new(ConfigCredentialResolver::new(encrypted, config.secret_key()));

    let mut registry = AdapterRegistry::new();
    let mut registered: HashSet<String> = HashSet::new();
    for entry in config.active_providers() {
        if !registered.insert(entry.name.clone()) {
            continue;
        }
        let adapter: Arc<dyn Adapter> = match entry.name.as_str() {
            "openai" => match &entry.base_url {
                Some(url) => Arc::new(OpenAiAdapter::with_base_url(url, resolver.clone())?),
                None => Arc::new(OpenAiAdapter::new(resolver.clone())?),
            },
            "anthropic" => match &entry.base_url {
                Some(url) => Arc::new(AnthropicAdapter::with_base_url(url, resolver.clone())?),
                None => Arc::new(AnthropicAdapter::new(resolver.clone())?),
            },
            name => {
                let base_url = entry
                    .base_url
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("provider {name} requires base_url"))?;
                Arc::new(CompatAdapter::new(name, base_url, resolver.clone())?)
            }
        };
        registry.register(adapter);
        tracing::info!(provider = %entry.name, "adapter registered");
    }

    let descriptors = config
        .active_providers()
        .into_iter()
        .map(|entry| entry.descriptor())
        .collect();

    let quality = config
        .quality
        .iter()
        .fold(QualityMatrix::new(), |matrix, entry| {
            matrix.with_score(&entry.model, entry.task, entry.score)
        });

    let metrics = Arc::new(MetricsSink::new());
    let health = Arc::new(HealthTracker::new(HealthConfig {
        failure_threshold: config.health.failure_threshold,
        quarantine: config.health.quarantine,
    }));

    let cache: Arc<dyn ResponseCache> = match config.cache.backend.as_str() {
        "remote" => {
            let url = config.cache.url.as_deref().unwrap_or_default();
            match RedisCache::new(url) {
                Ok(cache) => {
                    tracing::info!("remote cache backend initialized");
                    Arc::new(cache)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote cache unavailable, falling back to memory");
                    Arc::new(MemoryCache::new().with_metrics(metrics.clone()))
                }
            }
        }
        _ => Arc::new(MemoryCache::new().with_metrics(metrics.clone())),
    };

    let router = CoreRouter::new(descriptors, quality, health.clone());
    Ok(Executor::new(
        Arc::new(registry),
        router,
        cache,
        health,
        metrics,
    )
    .with_config(ExecutorConfig {
        cache_ttl: config.cache.expiration,
    }))
}
