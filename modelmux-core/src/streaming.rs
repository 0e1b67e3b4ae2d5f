//! # Streaming Channel
//!
//! Streamed variant of the executor: identical routing and health paths, no
//! cache on either side of the call.
//!
//! Candidate advance happens only while nothing has been delivered: an
//! adapter that fails to open its stream is treated like any failed attempt
//! and the chain moves on. Once the first chunk is out, a failure terminates
//! the stream with an error item: partial output is surfaced, never silently
//! swapped for another provider's completion.
//!
//! Adapters without native streaming are wrapped as a single synthetic chunk
//! carrying the full response, followed by a terminal event.

use crate::adapters::ChatCall;
use crate::error::{AdapterError, GatewayError};
use crate::executor::{ExecContext, Executor};
use crate::models::{CompletionRequest, ProviderDescriptor, StreamEvent, TaskType};
use crate::router::classify;
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// Stream of completion events as delivered to the caller.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const ATTEMPT_LATENCY_FACTOR: u64 = 3;

impl Executor {
    /// Execute a streaming completion request.
    ///
    /// Returns the event stream once a candidate accepts the request;
    /// failures before that point walk the fallback chain exactly like the
    /// unary path.
    pub async fn execute_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<EventStream, GatewayError> {
        let profile = classify(&request);

        let result = self.open_stream(&request, &profile).await;
        if let Err(err) = &result {
            let (provider, model) = err.provider_context().unwrap_or(("none", "none"));
            self.metrics().inc_counter(
                "failed_requests_total",
                &[
                    ("provider", provider),
                    ("model", model),
                    ("error_type", err.metric_label()),
                ],
            );
        }
        result
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
        profile: &crate::models::TaskProfile,
    ) -> Result<EventStream, GatewayError> {
        let task = profile.task_type;
        request.validate()?;
        let weights = request.options.weights()?;
        let decision = self.router().select(request, profile, &weights)?;
        let ctx = ExecContext::with_budget(profile.time_constraint);

        let mut last_error: Option<GatewayError> = None;

        for descriptor in decision.candidates() {
            let remaining = ctx.remaining();
            if remaining.is_zero() {
                return Err(GatewayError::DeadlineExceeded);
            }

            let estimated_cost =
                profile.token_estimate as f64 / 1000.0 * descriptor.cost_per_1k;
            if estimated_cost > profile.max_budget {
                return Err(GatewayError::from_adapter(
                    &descriptor.name,
                    &descriptor.model,
                    AdapterError::BudgetExceeded {
                        estimated: estimated_cost,
                        max: profile.max_budget,
                    },
                ));
            }

            let adapter = self.registry().get(&descriptor.name)?;
            let attempt_timeout = remaining
                .min(Duration::from_millis(
                    descriptor.avg_latency_ms * ATTEMPT_LATENCY_FACTOR,
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

            let err: AdapterError = if adapter.supports_streaming() {
                match adapter.stream_chat_completion(call).await {
                    Ok(inner) => {
                        return Ok(self.monitor_stream(descriptor.clone(), task, inner));
                    }
                    Err(err) => err,
                }
            } else {
                // No native streaming: one unary call, reframed as a
                // synthetic chunk plus terminal event.
                match tokio::time::timeout(attempt_timeout, adapter.chat_completion(call)).await {
                    Ok(Ok(response)) => {
                        self.record_health(descriptor, true, None);
                        self.metrics().add_sum(
                            "cost_usd_total",
                            &[
                                ("provider", descriptor.name.as_str()),
                                ("model", descriptor.model.as_str()),
                            ],
                            response.cost,
                        );
                        self.metrics().inc_counter(
                            "requests_total",
                            &[
                                ("task", task.as_str()),
                                ("provider", descriptor.name.as_str()),
                                ("model", descriptor.model.as_str()),
                            ],
                        );

                        let finish_reason = response
                            .metadata
                            .get("finish_reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or("stop")
                            .to_string();
                        let events = vec![
                            Ok(StreamEvent::delta(response.content)),
                            Ok(StreamEvent::terminal(finish_reason)),
                        ];
                        return Ok(Box::pin(futures::stream::iter(events)));
                    }
                    Ok(Err(err)) => err,
                    Err(_) => AdapterError::Timeout,
                }
            };

            // The attempt failed before anything was delivered.
            if !err.is_fallback_eligible() {
                return Err(GatewayError::from_adapter(
                    &descriptor.name,
                    &descriptor.model,
                    err,
                ));
            }
            self.record_health(descriptor, false, Some(&err.to_string()));
            self.metrics().inc_counter(
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
                "stream attempt failed, advancing fallback chain"
            );
            last_error = Some(GatewayError::from_adapter(
                &descriptor.name,
                &descriptor.model,
                err,
            ));
        }

        Err(GatewayError::AllProvidersFailed {
            last: Box::new(last_error.unwrap_or(GatewayError::NoSuitableProvider)),
        })
    }

    /// Forward a native stream, folding health and metric bookkeeping into
    /// its lifecycle. Errors terminate the stream; there is no mid-stream
    /// substitution.
    fn monitor_stream(
        &self,
        descriptor: ProviderDescriptor,
        task: TaskType,
        inner: crate::adapters::ChunkStream,
    ) -> EventStream {
        let health = self.health().clone();
        let metrics = self.metrics().clone();

        Box::pin(stream! {
            let mut inner = inner;
            let mut saw_terminal = false;

            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => {
                        saw_terminal = event.finish_reason.is_some();
                        yield Ok(event);
                        if saw_terminal {
                            break;
                        }
                    }
                    Err(err) => {
                        health.update(&descriptor.name, &descriptor.model, false, Some(&err.to_string()));
                        metrics.set_gauge(
                            "provider_health",
                            &[
                                ("provider", descriptor.name.as_str()),
                                ("model", descriptor.model.as_str()),
                            ],
                            health.circuit_state(&descriptor.name, &descriptor.model).gauge_value(),
                        );
                        metrics.inc_counter(
                            "failed_requests_total",
                            &[
                                ("provider", descriptor.name.as_str()),
                                ("model", descriptor.model.as_str()),
                                ("error_type", err.metric_label()),
                            ],
                        );
                        yield Err(GatewayError::from_adapter(&descriptor.name, &descriptor.model, err));
                        return;
                    }
                }
            }

            if !saw_terminal {
                // Upstream closed without a finish reason; close the frame
                // for the caller anyway.
                yield Ok(StreamEvent::terminal("stop"));
            }

            health.update(&descriptor.name, &descriptor.model, true, None);
            metrics.set_gauge(
                "provider_health",
                &[
                    ("provider", descriptor.name.as_str()),
                    ("model", descriptor.model.as_str()),
                ],
                health.circuit_state(&descriptor.name, &descriptor.model).gauge_value(),
            );
            metrics.inc_counter(
                "requests_total",
                &[
                    ("task", task.as_str()),
                    ("provider", descriptor.name.as_str()),
                    ("model", descriptor.model.as_str()),
                ],
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Adapter, ChunkStream};
    use crate::cache::{fingerprint, CacheEntry, ResponseCache, DEFAULT_TTL};
    use crate::error::AdapterError;
    use crate::executor::tests::{descriptor, harness, Behavior, TestAdapter};
    use crate::health::{CircuitState, HealthConfig};
    use crate::models::NormalizedResponse;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Adapter with native streaming driven by a scripted item list.
    struct StreamingTestAdapter {
        name: String,
        script: Mutex<Option<Vec<Result<StreamEvent, AdapterError>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl StreamingTestAdapter {
        fn new(
            name: &str,
            script: Vec<Result<StreamEvent, AdapterError>>,
        ) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let adapter = Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(Some(script)),
                calls: calls.clone(),
            });
            (adapter, calls)
        }
    }

    #[async_trait::async_trait]
    impl Adapter for StreamingTestAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn chat_completion(
            &self,
            _call: ChatCall,
        ) -> Result<NormalizedResponse, AdapterError> {
            unreachable!("streaming-only test adapter")
        }

        async fn stream_chat_completion(
            &self,
            _call: ChatCall,
        ) -> Result<ChunkStream, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .script
                .lock()
                .unwrap()
                .take()
                .expect("script consumed once");
            Ok(Box::pin(futures::stream::iter(script)))
        }
    }

    #[tokio::test]
    async fn non_streaming_adapter_synthesizes_chunk_and_terminal() {
        let (adapter, _) = TestAdapter::new("openai", Behavior::Succeed("whole answer"));
        let h = harness(
            vec![adapter],
            vec![descriptor("openai", "gpt-4")],
            HealthConfig::default(),
        );

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta, "whole answer");
        assert!(events[0].finish_reason.is_none());
        assert_eq!(events[1].finish_reason.as_deref(), Some("stop"));
        assert_eq!(
            h.metrics.counter_value(
                "requests_total",
                &[
                    ("task", "text-generation"),
                    ("provider", "openai"),
                    ("model", "gpt-4"),
                ],
            ),
            1
        );
    }

    #[tokio::test]
    async fn streaming_bypasses_the_cache() {
        let (adapter, calls) = TestAdapter::new("openai", Behavior::Succeed("fresh"));
        let h = harness(
            vec![adapter],
            vec![descriptor("openai", "gpt-4")],
            HealthConfig::default(),
        );

        // A cached entry that the unary path would serve.
        let cached = NormalizedResponse {
            content: "stale".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            prompt_tokens: 5,
            completion_tokens: 2,
            cost: 0.002,
            metadata: HashMap::new(),
            latency: Duration::from_millis(100),
        };
        let key = fingerprint("hello", crate::models::TaskType::TextGeneration, "openai", "gpt-4");
        h.cache.set(&key, CacheEntry::new(cached, DEFAULT_TTL)).await.unwrap();

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(events[0].delta, "fresh");
        // And the stream wrote nothing back.
        assert_eq!(h.cache.len().await, 1);
    }

    #[tokio::test]
    async fn native_stream_forwards_deltas_and_updates_health() {
        let (adapter, _) = StreamingTestAdapter::new(
            "openai",
            vec![
                Ok(StreamEvent::delta("Hel")),
                Ok(StreamEvent::delta("lo")),
                Ok(StreamEvent::terminal("stop")),
            ],
        );
        let h = harness(
            vec![adapter],
            vec![descriptor("openai", "gpt-4")],
            HealthConfig::default(),
        );

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[2].finish_reason.as_deref(), Some("stop"));
        assert_eq!(h.health.circuit_state("openai", "gpt-4"), CircuitState::Healthy);
        assert_eq!(
            h.metrics.counter_value(
                "requests_total",
                &[
                    ("task", "text-generation"),
                    ("provider", "openai"),
                    ("model", "gpt-4"),
                ],
            ),
            1
        );
    }

    #[tokio::test]
    async fn stream_without_terminal_frame_is_closed_for_the_caller() {
        let (adapter, _) =
            StreamingTestAdapter::new("openai", vec![Ok(StreamEvent::delta("partial"))]);
        let h = harness(
            vec![adapter],
            vec![descriptor("openai", "gpt-4")],
            HealthConfig::default(),
        );

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn pre_stream_failure_advances_to_fallback() {
        let (failing, _) = TestAdapter::new("alpha", Behavior::FailUnavailable);
        let (fallback, _) = TestAdapter::new("beta", Behavior::Succeed("from fallback"));
        let h = harness(
            vec![failing, fallback],
            vec![
                descriptor("alpha", "model-a").with_latency_ms(100),
                descriptor("beta", "model-b").with_latency_ms(2000),
            ],
            HealthConfig::default(),
        );

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events[0].delta, "from fallback");
        assert_eq!(h.health.circuit_state("alpha", "model-a"), CircuitState::Degraded);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_without_substitution() {
        let (streaming, _) = StreamingTestAdapter::new(
            "alpha",
            vec![
                Ok(StreamEvent::delta("partial out")),
                Err(AdapterError::Unavailable {
                    message: "connection reset".to_string(),
                }),
            ],
        );
        let (fallback, fallback_calls) = TestAdapter::new("beta", Behavior::Succeed("unused"));
        let h = harness(
            vec![streaming, fallback],
            vec![
                descriptor("alpha", "model-a").with_latency_ms(100),
                descriptor("beta", "model-b").with_latency_ms(2000),
            ],
            HealthConfig::default(),
        );

        let stream = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await
            .unwrap();
        let items: Vec<Result<StreamEvent, GatewayError>> = stream.collect().await;

        // Partial output surfaced, then the error, then nothing.
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().delta, "partial out");
        assert!(items[1].is_err());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.health.circuit_state("alpha", "model-a"), CircuitState::Degraded);
    }

    #[tokio::test]
    async fn all_stream_candidates_failing_surfaces_the_chain_error() {
        let (a, _) = TestAdapter::new("alpha", Behavior::FailUnavailable);
        let (b, _) = TestAdapter::new("beta", Behavior::FailUnavailable);
        let h = harness(
            vec![a, b],
            vec![
                descriptor("alpha", "model-a"),
                descriptor("beta", "model-b").with_latency_ms(2000),
            ],
            HealthConfig::default(),
        );

        let result = h
            .executor
            .execute_stream(CompletionRequest::new("hello"))
            .await;
        let err = match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
    }
}
