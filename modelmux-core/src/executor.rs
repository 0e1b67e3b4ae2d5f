//! # Executor
//!
//! Orchestrates one completion request end to end: cache lookup, routing,
//! the circuit-broken fallback chain, health updates, metric emission and the
//! cache write-back.
//!
//! ## Attempt discipline
//!
//! Each candidate gets exactly one attempt, bounded by
//! `min(remaining_deadline, avg_latency_ms × 3, 30 s)`. There are no
//! per-candidate retries: advancing the fallback chain *is* the retry
//! mechanism, which bounds worst-case wall time at
//! `candidates × per-attempt-timeout` and keeps an upstream outage from
//! being amplified by retry storms.
//!
//! ## Failure semantics
//!
//! A failed attempt marks the pair unhealthy, emits a provider-level failure
//! metric and advances the chain. Budget failures stop the chain immediately.
//! When the caller's deadline lapses the executor returns
//! [`GatewayError::DeadlineExceeded`]; when the chain is exhausted it returns
//! [`GatewayError::AllProvidersFailed`] carrying the last inner error.
//!
//! ## Bookkeeping invariant
//!
//! Every request emits exactly one terminal metric: `requests_total` on
//! success (cache hits also bump `cache_hits_total`), or
//! `failed_requests_total` with the terminal error kind on failure.

use crate::adapters::{AdapterRegistry, ChatCall};
use crate::cache::{fingerprint, CacheEntry, ResponseCache};
use crate::error::GatewayError;
use crate::health::HealthTracker;
use crate::metrics::MetricsSink;
use crate::models::{CompletionReply, CompletionRequest, ProviderDescriptor, TaskProfile};
use crate::router::{classify, RouteDecision, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Ceiling on any single attempt, whatever the descriptor declares.
const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Attempt budget multiplier over the descriptor's declared latency.
const ATTEMPT_LATENCY_FACTOR: u32 = 3;
/// Ceiling on one cache backend operation; a slow backend degrades to a miss.
const CACHE_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Ambient deadline and cancellation for one request.
///
/// Every suspension point in the executor races against both.
#[derive(Clone)]
pub struct ExecContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(time_budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + time_budget,
            cancel,
        }
    }

    pub fn with_budget(time_budget: Duration) -> Self {
        Self::new(time_budget, CancellationToken::new())
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// TTL stamped on cache entries written after a miss
    pub cache_ttl: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: crate::cache::DEFAULT_TTL,
        }
    }
}

/// The request-orchestration pipeline.
///
/// Holds the process singletons (registry, cache, health, metrics) as shared
/// references; construction happens once at startup and tests inject
/// alternates by building a fresh executor.
pub struct Executor {
    registry: Arc<AdapterRegistry>,
    router: Router,
    cache: Arc<dyn ResponseCache>,
    health: Arc<HealthTracker>,
    metrics: Arc<MetricsSink>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        router: Router,
        cache: Arc<dyn ResponseCache>,
        health: Arc<HealthTracker>,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            registry,
            router,
            cache,
            health,
            metrics,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }

    pub(crate) fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Execute a unary completion request.
    pub async fn execute(&self, request: CompletionRequest) -> Result<CompletionReply, GatewayError> {
        self.execute_cancellable(request, CancellationToken::new())
            .await
    }

    /// Execute a unary completion request under a caller-owned cancellation
    /// token.
    pub async fn execute_cancellable(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionReply, GatewayError> {
        let started = Instant::now();
        let profile = classify(&request);

        let result = match request.validate() {
            Ok(()) => {
                let ctx = ExecContext::new(profile.time_constraint, cancel);
                self.run(&request, &profile, &ctx, started).await
            }
            Err(err) => Err(err),
        };

        // Exactly one terminal metric per request, success or failure.
        match &result {
            Ok(reply) => {
                let task = profile.task_type.as_str();
                let labels = [
                    ("task", task),
                    ("provider", reply.provider.as_str()),
                    ("model", reply.model.as_str()),
                ];
                if reply.cache_hit {
                    self.metrics.inc_counter("cache_hits_total", &labels);
                }
                self.metrics.inc_counter("requests_total", &labels);
                self.metrics.observe(
                    "request_latency_seconds",
                    &[("task", task)],
                    started.elapsed().as_secs_f64(),
                );
            }
            Err(err) => {
                let (provider, model) = err.provider_context().unwrap_or(("none", "none"));
                self.metrics.inc_counter(
                    "failed_requests_total",
                    &[
                        ("provider", provider),
                        ("model", model),
                        ("error_type", err.metric_label()),
                    ],
                );
            }
        }

        result
    }

    async fn run(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        ctx: &ExecContext,
        started: Instant,
    ) -> Result<CompletionReply, GatewayError> {
        let weights = request.options.weights()?;

        // A full pin names the cache target outright, so the lookup can skip
        // routing entirely. Without one the fingerprint needs the routed
        // primary.
        let decision = match (&request.provider, &request.model) {
            (Some(provider), Some(model)) => {
                let key = fingerprint(&request.prompt, profile.task_type, provider, model);
                if let Some(reply) = self.cache_lookup(&key, ctx, started).await {
                    return Ok(reply);
                }
                self.router.select(request, profile, &weights)?
            }
            _ => {
                let decision = self.router.select(request, profile, &weights)?;
                let key = fingerprint(
                    &request.prompt,
                    profile.task_type,
                    &decision.primary.name,
                    &decision.primary.model,
                );
                if let Some(reply) = self.cache_lookup(&key, ctx, started).await {
                    return Ok(reply);
                }
                decision
            }
        };

        tracing::debug!(reasoning = %decision.reasoning, confidence = decision.confidence, "routing complete");
        self.attempt_chain(request, profile, ctx, &decision, started)
            .await
    }

    /// Cache consultation. Backend errors and slow reads degrade to misses.
    async fn cache_lookup(
        &self,
        key: &str,
        ctx: &ExecContext,
        started: Instant,
    ) -> Option<CompletionReply> {
        let budget = ctx.remaining().min(CACHE_OP_TIMEOUT);
        match tokio::time::timeout(budget, self.cache.get(key)).await {
            Ok(Ok(Some(entry))) => {
                tracing::debug!(provider = %entry.provider, model = %entry.model, "cache hit");
                Some(CompletionReply::from_response(
                    entry.response,
                    true,
                    started.elapsed(),
                ))
            }
            Ok(Ok(None)) => None,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "cache read failed, treating as miss");
                None
            }
            Err(_) => {
                tracing::warn!("cache read timed out, treating as miss");
                None
            }
        }
    }

    async fn attempt_chain(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        ctx: &ExecContext,
        decision: &RouteDecision,
        started: Instant,
    ) -> Result<CompletionReply, GatewayError> {
        let mut last_error: Option<GatewayError> = None;

        for descriptor in decision.candidates() {
            if ctx.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let remaining = ctx.remaining();
            if remaining.is_zero() {
                return Err(GatewayError::DeadlineExceeded);
            }

            // Budget gate: surfaced immediately, the chain does not advance
            // past a request the caller cannot afford.
            let estimated_cost =
                profile.token_estimate as f64 / 1000.0 * descriptor.cost_per_1k;
            if estimated_cost > profile.max_budget {
                return Err(GatewayError::from_adapter(
                    &descriptor.name,
                    &descriptor.model,
                    crate::error::AdapterError::BudgetExceeded {
                        estimated: estimated_cost,
                        max: profile.max_budget,
                    },
                ));
            }

            let adapter = self.registry.get(&descriptor.name)?;

            let attempt_timeout = remaining
                .min(Duration::from_millis(
                    descriptor.avg_latency_ms * ATTEMPT_LATENCY_FACTOR as u64,
                ))
                .min(MAX_ATTEMPT_TIMEOUT);

            let call = ChatCall {
                model: descriptor.model.clone(),
                prompt: request.prompt.clone(),
                max_tokens: request
                    .max_tokens
                    .unwrap_or(descriptor.max_tokens)
                    .min(descriptor.max_tokens),
                timeout: attempt_timeout,
                pricing: descriptor.pricing,
            };

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                _ = ctx.cancelled() => return Err(GatewayError::Cancelled),
                outcome = tokio::time::timeout(attempt_timeout, adapter.chat_completion(call)) => {
                    outcome.unwrap_or(Err(crate::error::AdapterError::Timeout))
                }
            };

            self.metrics.observe(
                "provider_latency_seconds",
                &[
                    ("provider", descriptor.name.as_str()),
                    ("model", descriptor.model.as_str()),
                ],
                attempt_started.elapsed().as_secs_f64(),
            );

            match outcome {
                Ok(response) => {
                    self.record_health(descriptor, true, None);
                    self.metrics.add_sum(
                        "cost_usd_total",
                        &[
                            ("provider", descriptor.name.as_str()),
                            ("model", descriptor.model.as_str()),
                        ],
                        response.cost,
                    );

                    if !ctx.is_cancelled() {
                        self.write_back(request, profile, descriptor, &response).await;
                    }

                    return Ok(CompletionReply::from_response(
                        response,
                        false,
                        started.elapsed(),
                    ));
                }
                Err(err) => {
                    if !err.is_fallback_eligible() {
                        return Err(GatewayError::from_adapter(
                            &descriptor.name,
                            &descriptor.model,
                            err,
                        ));
                    }

                    self.record_health(descriptor, false, Some(&err.to_string()));
                    self.metrics.inc_counter(
                        "failed_requests_total",
                        &[
                            ("provider", descriptor.name.as_str()),
                            ("model", descriptor.model.as_str()),
                            ("error_type", err.metric_label()),
                        ],
                    );
                    tracing::warn!(
                        provider = %descriptor.name,
                        model = %descriptor.model,
                        error = %err,
                        "attempt failed, advancing fallback chain"
                    );
                    last_error = Some(GatewayError::from_adapter(
                        &descriptor.name,
                        &descriptor.model,
                        err,
                    ));
                }
            }
        }

        Err(GatewayError::AllProvidersFailed {
            last: Box::new(last_error.unwrap_or(GatewayError::NoSuitableProvider)),
        })
    }

    /// Store a fresh response under the fingerprint of the descriptor that
    /// produced it. Write failures are logged and dropped.
    async fn write_back(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        descriptor: &ProviderDescriptor,
        response: &crate::models::NormalizedResponse,
    ) {
        let key = fingerprint(
            &request.prompt,
            profile.task_type,
            &descriptor.name,
            &descriptor.model,
        );
        let entry = CacheEntry::new(response.clone(), self.config.cache_ttl);
        match tokio::time::timeout(CACHE_OP_TIMEOUT, self.cache.set(&key, entry)).await {
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "cache write failed, dropping entry");
            }
            Err(_) => {
                tracing::warn!("cache write timed out, dropping entry");
            }
            Ok(Ok(())) => {}
        }
    }

    pub(crate) fn record_health(
        &self,
        descriptor: &ProviderDescriptor,
        success: bool,
        error: Option<&str>,
    ) {
        self.health
            .update(&descriptor.name, &descriptor.model, success, error);
        self.metrics.set_gauge(
            "provider_health",
            &[
                ("provider", descriptor.name.as_str()),
                ("model", descriptor.model.as_str()),
            ],
            self.health
                .circuit_state(&descriptor.name, &descriptor.model)
                .gauge_value(),
        );
    }
}
