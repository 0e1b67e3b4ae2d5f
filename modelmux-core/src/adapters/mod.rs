//! # Provider Adapters
//!
//! One adapter speaks one upstream provider's completion API and normalizes
//! it into the core's uniform shape. The contract every adapter honors:
//!
//! - **Stateless** beyond an injected
//!   [`CredentialResolver`](crate::credentials::CredentialResolver);
//!   credentials are resolved per call so rotation never touches adapter code.
//! - **No internal retries**: retrying is the executor's job, expressed as
//!   fallback candidates, never as repeated calls to the same upstream.
//! - **Deadline-respecting**: every call carries a per-attempt timeout that
//!   is applied to the underlying HTTP request.
//! - **Closed error set**: every failure maps into [`AdapterError`]; wire
//!   detail goes into messages, not new variants.
//! - **Declared pricing**: cost is computed from the [`Pricing`] handed in
//!   with the call, which comes from the routed descriptor.
//!
//! Token counts are taken from the upstream's usage accounting when supplied.

use crate::error::AdapterError;
use crate::models::{NormalizedResponse, Pricing, StreamEvent};
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

pub mod anthropic;
pub mod compat;
pub mod http;
pub mod openai;
pub mod registry;

pub use registry::AdapterRegistry;

/// Boxed stream of completion increments from a streaming adapter.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AdapterError>> + Send>>;

/// One completion attempt as the executor hands it to an adapter.
#[derive(Debug, Clone)]
pub struct ChatCall {
    /// Model identifier as the provider knows it
    pub model: String,
    /// The caller's prompt, unmodified
    pub prompt: String,
    /// Output token ceiling for this attempt
    pub max_tokens: u32,
    /// Per-attempt timeout; the adapter must return by then
    pub timeout: Duration,
    /// Pricing declared by the routed descriptor
    pub pricing: Pricing,
}

/// A normalized view over one upstream provider's completion API.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Provider identifier this adapter is registered under.
    fn name(&self) -> &str;

    /// Whether this adapter recognizes the given model identifier.
    fn supports_model(&self, model: &str) -> bool;

    /// Whether [`Adapter::stream_chat_completion`] yields native increments.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Perform one completion attempt.
    async fn chat_completion(&self, call: ChatCall) -> Result<NormalizedResponse, AdapterError>;

    /// Perform one streaming completion attempt.
    ///
    /// The default rejects; the streaming channel synthesizes a single chunk
    /// from [`Adapter::chat_completion`] for adapters that keep the default.
    async fn stream_chat_completion(&self, _call: ChatCall) -> Result<ChunkStream, AdapterError> {
        Err(AdapterError::Unavailable {
            message: format!("{} has no native streaming", self.name()),
        })
    }
}
