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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4", "chatgpt-"];

/// Adapter for the OpenAI chat-completions API.
pub struct OpenAiAdapter {
    http: ProviderHttpClient,
    credentials: Arc<dyn CredentialResolver>,
}

#[derive(Debug, Serialize)]
pub(super) struct WireRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct WireMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireResponse {
    pub id: Option<String>,
    pub model: Option<String>,
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireChoice {
    pub message: WireChoiceMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl<'a> WireRequest<'a> {
    pub(super) fn from_call(call: &'a ChatCall, stream: bool) -> Self {
        Self {
            model: &call.model,
            messages: vec![WireMessage {
                role: "user",
                content: &call.prompt,
            }],
            max_tokens: call.max_tokens,
            stream,
        }
    }
}

/// Normalize an OpenAI-shaped payload into the core response type.
pub(super) fn normalize(
    provider: &str,
    call: &ChatCall,
    response: WireResponse,
    latency: std::time::Duration,
) -> Result<NormalizedResponse, AdapterError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AdapterError::Malformed {
            message: "response carried no choices".to_string(),
        })?;
    let content = choice.message.content.ok_or_else(|| AdapterError::Malformed {
        message: "first choice carried no content".to_string(),
    })?;

    let (prompt_tokens, completion_tokens) = response
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    let mut metadata = HashMap::new();
    if let Some(id) = response.id {
        metadata.insert("upstream_id".to_string(), serde_json::Value::String(id));
    }
    if let Some(reason) = choice.finish_reason {
        metadata.insert(
            "finish_reason".to_string(),
            serde_json::Value::String(reason),
        );
    }

    Ok(NormalizedResponse {
        content,
        provider: provider.to_string(),
        model: response.model.unwrap_or_else(|| call.model.clone()),
        prompt_tokens,
        completion_tokens,
        cost: call.pricing.cost(prompt_tokens, completion_tokens),
        metadata,
        latency,
    })
}

/// Turn an OpenAI-format SSE body into a chunk stream.
///
/// Lines look like `data: {json}` with a literal `data: [DONE]` sentinel; the
/// delta text sits at `choices[0].delta.content` and the terminal frame
/// carries `choices[0].finish_reason`.
pub(super) fn sse_chunk_stream(response: reqwest::Response) -> ChunkStream {
    Box::pin(stream! {
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
                if payload == "[DONE]" {
                    return;
                }

                match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(frame) => {
                        let choice = frame.get("choices").and_then(|c| c.get(0));
                        let delta = choice
                            .and_then(|c| c.get("delta"))
                            .and_then(|d| d.get("content"))
                            .and_then(|t| t.as_str())
                            .unwrap_or("");
                        let finish_reason = choice
                            .and_then(|c| c.get("finish_reason"))
                            .and_then(|r| r.as_str())
                            .map(str::to_string);

                        if finish_reason.is_some() {
                            yield Ok(StreamEvent {
                                delta: delta.to_string(),
                                finish_reason,
                            });
                        } else if !delta.is_empty() {
                            yield Ok(StreamEvent::delta(delta));
                        }
                    }
                    Err(e) => {
                        yield Err(AdapterError::from(e));
                        return;
                    }
                }
            }
        }
    })
}

impl OpenAiAdapter {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Result<Self, AdapterError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            http: ProviderHttpClient::new(base_url, &HashMap::new())?,
            credentials,
        })
    }

    fn auth(&self) -> Result<AuthHeader, AdapterError> {
        Ok(AuthHeader::Bearer(self.credentials.resolve(self.name())?))
    }
}

#[async_trait::async_trait]
impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_model(&self, model: &str) -> bool {
        MODEL_PREFIXES.iter().any(|prefix| model.starts_with(prefix))
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
        normalize(self.name(), &call, response, start.elapsed())
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
