//! HTTP endpoint handlers.
//!
//! Thin translation between the HTTP surface and the orchestration core:
//! JSON bodies become [`CompletionRequest`]s, core errors become status codes
//! with a structured body, and the streaming channel is framed as
//! `text/event-stream` with one JSON event per `data:` line.

use crate::server::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use modelmux_core::error::{AdapterError, GatewayError};
use modelmux_core::models::CompletionRequest;
use serde::Serialize;
use std::convert::Infallible;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
}

impl ErrorBody {
    fn from_error(err: &GatewayError) -> Self {
        let (provider, model) = err
            .provider_context()
            .map(|(p, m)| (Some(p.to_string()), Some(m.to_string())))
            .unwrap_or((None, None));
        Self {
            error: ErrorDetail {
                kind: err.metric_label().to_string(),
                message: err.to_string(),
                provider,
                model,
            },
        }
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidRequest { .. } | GatewayError::InvalidWeights { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::UnknownProvider { .. } => StatusCode::NOT_FOUND,
        GatewayError::NoSuitableProvider => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        GatewayError::AllProvidersFailed { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Adapter { source, .. } => match source {
            AdapterError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AdapterError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AdapterError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            AdapterError::Auth { .. }
            | AdapterError::Unavailable { .. }
            | AdapterError::Malformed { .. } => StatusCode::BAD_GATEWAY,
        },
    }
}

fn error_response(err: &GatewayError) -> Response {
    (status_for(err), Json(ErrorBody::from_error(err))).into_response()
}

/// `POST /v1/completions`
pub async fn completion(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    match state.executor.execute(request).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(err) => {
            tracing::debug!(error = %err, "completion request failed");
            error_response(&err)
        }
    }
}

/// `POST /v1/completions/stream`
///
/// Frames the core's event stream as `data: <json>\n\n` server-sent events;
/// the terminal event carries `finish_reason`. A failure after the stream has
/// opened is delivered as a final error event.
pub async fn completion_stream(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let stream = match state.executor.execute_stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::debug!(error = %err, "stream request failed before first event");
            return error_response(&err);
        }
    };

    let events = stream.map(|item| -> Result<Event, Infallible> {
        let payload = match item {
            Ok(event) => serde_json::to_string(&event).unwrap_or_default(),
            Err(err) => serde_json::to_string(&ErrorBody::from_error(&err)).unwrap_or_default(),
        };
        Ok(Event::default().data(payload))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// `GET /health`
pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.executor.metrics().render_prometheus(),
    )
        .into_response()
}

/// `GET /admin/providers`: descriptor table plus circuit snapshot.
pub async fn providers(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "providers": state.executor.router().descriptors(),
        "health": state.executor.health().snapshot(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::server::create_server;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_with_upstream(base_url: &str) -> Config {
        let raw = format!(
            r#"
            [[providers]]
            name = "testprov"
            model = "test-model"
            base_url = "{base_url}"
            cost_per_1k_input = 0.001
            cost_per_1k_output = 0.002
            avg_latency_ms = 200
            "#
        );
        toml::from_str(&raw).unwrap()
    }

    async fn test_server(base_url: &str) -> TestServer {
        std::env::set_var("TESTPROV_API_KEY", "test-key");
        let app = create_server(config_with_upstream(base_url)).await.unwrap();
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn unbalanced_weights_are_rejected_before_routing() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server
            .post("/v1/completions")
            .json(&json!({
                "prompt": "hello",
                "options": {
                    "cost_weight": 0.5,
                    "latency_weight": 0.5,
                    "reliability_weight": 0.5,
                    "quality_weight": 0.1
                }
            }))
            .await;

        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "InvalidWeights");
    }

    #[tokio::test]
    async fn empty_prompt_is_a_bad_request() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server
            .post("/v1/completions")
            .json(&json!({"prompt": ""}))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_pinned_provider_is_not_found() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server
            .post("/v1/completions")
            .json(&json!({
                "prompt": "hello",
                "provider": "mystery",
                "model": "model-x"
            }))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "UnknownProvider");
    }

    #[tokio::test]
    async fn unreachable_upstream_maps_to_bad_gateway() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server
            .post("/v1/completions")
            .json(&json!({"prompt": "hello"}))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
        let body: Value = response.json();
        assert_eq!(body["error"]["type"], "AllProvidersFailed");
    }

    #[tokio::test]
    async fn completion_round_trips_through_a_mock_upstream() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl-1",
                "model": "test-model",
                "choices": [{
                    "message": {"role": "assistant", "content": "pong"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            })))
            .mount(&upstream)
            .await;

        let server = test_server(&upstream.uri()).await;
        let response = server
            .post("/v1/completions")
            .json(&json!({"prompt": "ping"}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["content"], "pong");
        assert_eq!(body["provider"], "testprov");
        assert_eq!(body["cache_hit"], false);
        assert_eq!(body["tokens_used"]["input"], 3);

        // The identical prompt is now served from cache.
        let cached = server
            .post("/v1/completions")
            .json(&json!({"prompt": "ping"}))
            .await;
        cached.assert_status_ok();
        let body: Value = cached.json();
        assert_eq!(body["cache_hit"], true);
        assert_eq!(body["cost"], 0.0);
    }

    #[tokio::test]
    async fn streaming_endpoint_frames_events_as_sse() {
        let upstream = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"po\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ng\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&upstream)
            .await;

        let server = test_server(&upstream.uri()).await;
        let response = server
            .post("/v1/completions/stream")
            .json(&json!({"prompt": "ping"}))
            .await;

        response.assert_status_ok();
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = response.text();
        assert!(body.contains("data: {\"delta\":\"po\"}"));
        assert!(body.contains("\"finish_reason\":\"stop\""));
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let server = test_server("http://127.0.0.1:9").await;
        // Drive one failing request so a counter exists.
        server
            .post("/v1/completions")
            .json(&json!({"prompt": "hello"}))
            .await;

        let response = server.get("/metrics").await;
        response.assert_status_ok();
        let body = response.text();
        assert!(body.contains("failed_requests_total"));
    }

    #[tokio::test]
    async fn admin_endpoint_exposes_descriptors_and_health() {
        let server = test_server("http://127.0.0.1:9").await;
        let response = server.get("/admin/providers").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["providers"][0]["name"], "testprov");
    }
}
