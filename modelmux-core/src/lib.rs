//! # Modelmux Core
//!
//! The request-orchestration core of the modelmux gateway: everything between
//! an incoming prompt and a normalized provider response.
//!
//! ## Overview
//!
//! For every request the core:
//!
//! 1. classifies the prompt into a task profile,
//! 2. consults the response cache under a stable fingerprint,
//! 3. selects a provider with ranked fallbacks via deterministic weighted
//!    scoring over cost, latency, reliability and quality,
//! 4. dispatches through the fallback chain with per-attempt timeouts and no
//!    per-candidate retries,
//! 5. normalizes the upstream payload into a provider-independent shape, and
//! 6. feeds cost, latency, token and health signals back into routing.
//!
//! ## Components
//!
//! - [`adapters`]: provider adapters behind a uniform trait, plus the
//!   process-wide registry
//! - [`cache`]: fingerprint-keyed response cache with pluggable backends
//! - [`health`]: per-`(provider, model)` circuit state
//! - [`router`]: task classification and candidate selection
//! - [`executor`]: the unary orchestration pipeline
//! - [`streaming`]: the chunked delivery variant
//! - [`metrics`]: fire-and-forget counters, histograms and gauges
//! - [`credentials`]: encrypted-at-rest credential resolution
//!
//! ## Quick start
//!
//! ```rust
//! use modelmux_core::adapters::{openai::OpenAiAdapter, AdapterRegistry};
//! use modelmux_core::cache::MemoryCache;
//! use modelmux_core::credentials::ConfigCredentialResolver;
//! use modelmux_core::executor::Executor;
//! use modelmux_core::health::HealthTracker;
//! use modelmux_core::metrics::MetricsSink;
//! use modelmux_core::models::{CompletionRequest, Pricing, ProviderDescriptor};
//! use modelmux_core::router::{QualityMatrix, Router};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Arc::new(ConfigCredentialResolver::env_only());
//! let mut registry = AdapterRegistry::new();
//! registry.register(Arc::new(OpenAiAdapter::new(credentials)?));
//!
//! let descriptors = vec![
//!     ProviderDescriptor::new("openai", "gpt-4o-mini")
//!         .with_pricing(Pricing::new(0.00015, 0.0006))
//!         .with_latency_ms(800),
//! ];
//!
//! let metrics = Arc::new(MetricsSink::new());
//! let health = Arc::new(HealthTracker::default());
//! let cache = Arc::new(MemoryCache::new().with_metrics(metrics.clone()));
//! let router = Router::new(descriptors, QualityMatrix::new(), health.clone());
//!
//! let executor = Executor::new(Arc::new(registry), router, cache, health, metrics);
//! let reply = executor.execute(CompletionRequest::new("Hello!")).await?;
//! println!("{} said: {}", reply.provider, reply.content);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cache;
pub mod common;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod models;
pub mod router;
pub mod streaming;

pub use adapters::{Adapter, AdapterRegistry, ChatCall};
pub use cache::{fingerprint, CacheEntry, MemoryCache, ResponseCache};
pub use credentials::{ConfigCredentialResolver, CredentialResolver};
pub use error::{AdapterError, GatewayError};
pub use executor::{ExecContext, Executor, ExecutorConfig};
pub use health::{CircuitState, HealthConfig, HealthTracker};
pub use metrics::MetricsSink;
pub use models::{
    CompletionReply, CompletionRequest, NormalizedResponse, Pricing, ProviderDescriptor,
    RequestOptions, ScoreWeights, StreamEvent, TaskProfile, TaskType,
};
pub use router::{classify, QualityMatrix, RouteDecision, Router};
pub use streaming::EventStream;
