//! Shared HTTP plumbing for provider adapters.
//!
//! One [`reqwest::Client`] per adapter, no client-level timeout: every request
//! carries the per-attempt timeout the executor budgeted for it. The auth
//! header is applied per request because credentials are resolved per call.

use crate::error::AdapterError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// How a resolved credential is attached to requests.
#[derive(Clone, Debug)]
pub enum AuthHeader {
    Bearer(String),
    Header { name: &'static str, value: String },
}

impl AuthHeader {
    fn apply(&self, headers: &mut HeaderMap) -> Result<(), AdapterError> {
        let (name, value) = match self {
            AuthHeader::Bearer(token) => ("authorization", format!("Bearer {token}")),
            AuthHeader::Header { name, value } => (*name, value.clone()),
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| AdapterError::Auth {
            message: format!("invalid auth header name: {name}"),
        })?;
        let value = HeaderValue::from_str(&value).map_err(|_| AdapterError::Auth {
            message: "credential contains characters invalid in a header".to_string(),
        })?;
        headers.insert(name, value);
        Ok(())
    }
}

/// Thin wrapper over a shared reqwest client for one provider endpoint.
#[derive(Clone)]
pub struct ProviderHttpClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl ProviderHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .build()
            .map_err(|e| AdapterError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut default_headers = HeaderMap::new();
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                k.parse::<HeaderName>(),
                v.parse::<HeaderValue>(),
            ) {
                default_headers.insert(name, value);
            }
        }

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<TReq, TResp>(
        &self,
        path: &str,
        body: &TReq,
        auth: &AuthHeader,
        timeout: Duration,
    ) -> Result<TResp, AdapterError>
    where
        TReq: Serialize + Sync,
        TResp: DeserializeOwned,
    {
        let response = self.post_raw(path, body, auth, timeout).await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }
        response
            .json::<TResp>()
            .await
            .map_err(|e| AdapterError::Malformed {
                message: format!("failed to decode response body: {e}"),
            })
    }

    /// POST a JSON body and hand back the raw response (streaming callers).
    pub async fn post_raw<TReq>(
        &self,
        path: &str,
        body: &TReq,
        auth: &AuthHeader,
        timeout: Duration,
    ) -> Result<Response, AdapterError>
    where
        TReq: Serialize + Sync,
    {
        let mut headers = self.default_headers.clone();
        auth.apply(&mut headers)?;

        let response = self
            .http
            .request(Method::POST, self.build_url(path))
            .headers(headers)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

/// Classify a non-success upstream response into the closed error set.
pub async fn map_error_response(response: Response) -> AdapterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    // Pull a message out of the common `{"error": {"message": ...}}` shape
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);

    match status.as_u16() {
        401 | 403 => AdapterError::Auth { message },
        408 => AdapterError::Timeout,
        429 => AdapterError::RateLimited,
        code if code >= 500 => AdapterError::Unavailable {
            message: format!("upstream returned {code}: {message}"),
        },
        code => AdapterError::Unavailable {
            message: format!("upstream rejected request with {code}: {message}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let client =
            ProviderHttpClient::new("https://api.example.com/v1/", &HashMap::new()).unwrap();
        assert_eq!(
            client.build_url("/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            client.build_url("chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
