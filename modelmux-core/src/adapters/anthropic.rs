use crate::adapters::http::{map_error_response, AuthHeader, ProviderHttpClient};
use crate::adapters::{Adapter, ChatCall, ChunkStream};
use crate::credentials::CredentialResolver;
use crate::error::AdapterError;
use crate::models::{NormalizedResponse, StreamEvent};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages API.
pub struct AnthropicAdapter {
    http: ProviderHttpClient,
    credentials: Arc<dyn CredentialResolver>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<MessageBody<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: Option<String>,
    content: Vec<ContentBlock>,
    model: Option<String>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Result<Self, AdapterError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, AdapterError> {
        let headers = HashMap::from([(
            "anthropic-version".to_string(),
            API_VERSION.to_string(),
        )]);
        Ok(Self {
            http: ProviderHttpClient::new(base_url, &headers)?,
            credentials,
        })
    }

    fn auth(&self) -> Result<AuthHeader, AdapterError> {
        Ok(AuthHeader::Header {
            name: "x-api-key",
            value: self.credentials.resolve(self.name())?,
        })
    }

    fn request<'a>(call: &'a ChatCall, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &call.model,
            max_tokens: call.max_tokens,
            messages: vec![MessageBody {
                role: "user",
                content: &call.prompt,
            }],
            stream,
        }
    }

    fn normalize(
        &self,
        call: &ChatCall,
        response: MessagesResponse,
        latency: std::time::Duration,
    ) -> Result<NormalizedResponse, AdapterError> {
        if response.content.is_empty() {
            return Err(AdapterError::Malformed {
                message: "response carried no content blocks".to_string(),
            });
        }
        let content: String = response
            .content
            .into_iter()
            .map(|block| block.text)
            .collect();

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        let mut metadata = HashMap::new();
        if let Some(id) = response.id {
            metadata.insert("upstream_id".to_string(), serde_json::Value::String(id));
        }
        if let Some(reason) = response.stop_reason {
            metadata.insert(
                "finish_reason".to_string(),
                serde_json::Value::String(reason),
            );
        }

        Ok(NormalizedResponse {
            content,
            provider: self.name().to_string(),
            model: response.model.unwrap_or_else(|| call.model.clone()),
            prompt_tokens,
            completion_tokens,
            cost: call.pricing.cost(prompt_tokens, completion_tokens),
            metadata,
            latency,
        })
    }
}

#[async_trait::async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("claude")
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion(&self, call: ChatCall) -> Result<NormalizedResponse, AdapterError> {
        let auth = self.auth()?;
        let request = Self::request(&call, false);

        let start = Instant::now();
        let response: MessagesResponse = self
            .http
            .post_json("/v1/messages", &request, &auth, call.timeout)
            .await?;
        self.normalize(&call, response, start.elapsed())
    }

    async fn stream_chat_completion(&self, call: ChatCall) -> Result<ChunkStream, AdapterError> {
        let auth = self.auth()?;
        let request = Self::request(&call, true);

        let response = self
            .http
            .post_raw("/v1/messages", &request, &auth, call.timeout)
            .await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        // Anthropic frames are typed events; text rides on
        // `content_block_delta` frames and the stop reason on `message_delta`.
        Ok(Box::pin(stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = futures::StreamExt::next(&mut bytes).await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AdapterError::from(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    match serde_json::from_str::<serde_json::Value>(payload) {
                        Ok(frame) => {
                            if let Some(text) = frame
                                .get("delta")
                                .and_then(|d| d.get("text"))
                                .and_then(|t| t.as_str())
                            {
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::delta(text));
                                }
                            }
                            if let Some(reason) = frame
                                .get("delta")
                                .and_then(|d| d.get("stop_reason"))
                                .and_then(|r| r.as_str())
                            {
                                yield Ok(StreamEvent::terminal(reason));
                                return;
                            }
                            if frame.get("type").and_then(|t| t.as_str())
                                == Some("message_stop")
                            {
                                yield Ok(StreamEvent::terminal("stop"));
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(AdapterError::from(e));
                            return;
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialResolver;
    use crate::models::Pricing;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call() -> ChatCall {
        ChatCall {
            model: "claude-3-5-haiku".to_string(),
            prompt: "hello".to_string(),
            max_tokens: 256,
            timeout: Duration::from_secs(5),
            pricing: Pricing::new(0.0008, 0.004),
        }
    }

    async fn adapter_for(server: &MockServer) -> AnthropicAdapter {
        AnthropicAdapter::with_base_url(
            server.uri(),
            Arc::new(StaticCredentialResolver::single("anthropic", "sk-ant-test")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn completion_joins_content_blocks_and_prices_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_01",
                "model": "claude-3-5-haiku",
                "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "text", "text": ", world"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 500, "output_tokens": 1000}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = adapter_for(&server).await.chat_completion(call()).await.unwrap();

        assert_eq!(response.content, "Hello, world");
        assert_eq!(response.provider, "anthropic");
        assert_eq!(response.prompt_tokens, 500);
        assert_eq!(response.completion_tokens, 1000);
        // 500/1000 * 0.0008 + 1000/1000 * 0.004
        assert!((response.cost - 0.0044).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_content_maps_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_02",
                "content": [],
                "model": "claude-3-5-haiku"
            })))
            .mount(&server)
            .await;

        let err = adapter_for(&server).await.chat_completion(call()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Malformed { .. }));
    }

    #[tokio::test]
    async fn streaming_emits_text_deltas_then_stop_reason() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"!\"}}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let stream = adapter_for(&server)
            .await
            .stream_chat_completion(call())
            .await
            .unwrap();
        let events: Vec<StreamEvent> = futures::StreamExt::collect::<Vec<_>>(stream)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].delta, "Hi");
        assert_eq!(events[1].delta, "!");
        assert_eq!(events[2].finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn claude_models_are_supported() {
        let adapter = AnthropicAdapter::with_base_url(
            "http://localhost",
            Arc::new(StaticCredentialResolver::single("anthropic", "k")),
        )
        .unwrap();
        assert!(adapter.supports_model("claude-3-5-sonnet"));
        assert!(!adapter.supports_model("gpt-4"));
    }
}
