use crate::adapters::http::{map_error_response, AuthHeader, ProviderHttpClient};
use crate::adapters::openai::{normalize, sse_chunk_stream, WireRequest, WireResponse};
use crate::adapters::{Adapter, ChatCall, ChunkStream};
use crate::credentials::CredentialResolver;
use crate::error::AdapterError;
use crate::models::NormalizedResponse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Adapter for OpenAI-compatible endpoints under any name and base URL.
///
/// Covers the long tail of providers that speak the chat-completions wire
/// format: Groq, Mistral, Together, local vLLM deployments and the like. The
/// descriptor set decides which models route here; this adapter accepts any
/// model identifier.
pub struct CompatAdapter {
    name: String,
    http: ProviderHttpClient,
    credentials: Arc<dyn CredentialResolver>,
}

impl CompatAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            name: name.into(),
            http: ProviderHttpClient::new(base_url, &HashMap::new())?,
            credentials,
        })
    }

    fn auth(&self) -> Result<AuthHeader, AdapterError> {
        Ok(AuthHeader::Bearer(self.credentials.resolve(&self.name)?))
    }
}

#[async_trait::async_trait]
impl Adapter for CompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_model(&self, _model: &str) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_completion(&self, call: ChatCall) -> Result<NormalizedResponse, AdapterError> {
        let auth = self.auth()?;
        let request = WireRequest::from_call(&call, false);

        let start = Instant::now();
        let response: WireResponse = self
            .http
            .post_json("/chat/completions", &request, &auth, call.timeout)
            .await?;
        normalize(&self.name, &call, response, start.elapsed())
    }

    async fn stream_chat_completion(&self, call: ChatCall) -> Result<ChunkStream, AdapterError> {
        let auth = self.auth()?;
        let request = WireRequest::from_call(&call, true);

        let response = self
            .http
            .post_raw("/chat/completions", &request, &auth, call.timeout)
            .await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }
        Ok(sse_chunk_stream(response))
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

    #[tokio::test]
    async fn serves_any_provider_name_over_the_openai_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer groq-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cmpl-1",
                "model": "llama-3-70b",
                "choices": [{
                    "message": {"role": "assistant", "content": "fast answer"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let adapter = CompatAdapter::new(
            "groq",
            server.uri(),
            Arc::new(StaticCredentialResolver::single("groq", "groq-key")),
        )
        .unwrap();

        let response = adapter
            .chat_completion(ChatCall {
                model: "llama-3-70b".to_string(),
                prompt: "hello".to_string(),
                max_tokens: 64,
                timeout: Duration::from_secs(5),
                pricing: Pricing::new(0.0001, 0.0001),
            })
            .await
            .unwrap();

        assert_eq!(response.provider, "groq");
        assert_eq!(response.content, "fast answer");
        assert!(adapter.supports_model("anything-at-all"));
    }
}
