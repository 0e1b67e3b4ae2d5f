//! # Error Taxonomy
//!
//! Two levels of errors mirror the two layers of the core:
//!
//! - [`AdapterError`] is the closed set of failures an adapter call can
//!   produce. Every upstream, whatever its wire format, maps its failures into
//!   this set so the executor's fallback decisions stay provider-agnostic.
//! - [`GatewayError`] is what the executor surfaces to callers: adapter
//!   failures wrapped with the terminal `(provider, model)` context, plus the
//!   routing- and lifecycle-level failures that have no single provider.
//!
//! The executor's fallback policy keys off the adapter kind: budget failures
//! stop the chain immediately, everything else advances to the next candidate.

use thiserror::Error;

/// Failures an adapter call can produce.
///
/// This set is stable across adapters; upstream-specific detail goes into the
/// message, never into new variants.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Missing or rejected upstream credential
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Upstream throttled the request
    #[error("rate limited by upstream")]
    RateLimited,

    /// Per-attempt deadline elapsed
    #[error("attempt timed out")]
    Timeout,

    /// 5xx or transport-level failure
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    /// Upstream payload failed normalization
    #[error("malformed response: {message}")]
    Malformed { message: String },

    /// Estimated cost exceeds the caller's budget
    #[error("budget exceeded: estimated ${estimated:.4} over ${max:.4} limit")]
    BudgetExceeded { estimated: f64, max: f64 },
}

impl AdapterError {
    /// Label used for the failure counter's `error_type` dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            AdapterError::Auth { .. } => "AuthError",
            AdapterError::RateLimited => "RateLimited",
            AdapterError::Timeout => "Timeout",
            AdapterError::Unavailable { .. } => "ProviderUnavailable",
            AdapterError::Malformed { .. } => "MalformedResponse",
            AdapterError::BudgetExceeded { .. } => "BudgetExceeded",
        }
    }

    /// Whether the executor may advance the fallback chain past this failure.
    pub fn is_fallback_eligible(&self) -> bool {
        !matches!(self, AdapterError::BudgetExceeded { .. })
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else if err.is_decode() {
            AdapterError::Malformed {
                message: err.to_string(),
            }
        } else {
            AdapterError::Unavailable {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Malformed {
            message: err.to_string(),
        }
    }
}

/// Failures surfaced by the executor and router.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Terminal adapter failure with the provider that produced it
    #[error("{provider}/{model}: {source}")]
    Adapter {
        provider: String,
        model: String,
        #[source]
        source: AdapterError,
    },

    /// Routing produced an empty candidate list
    #[error("no suitable provider for this request")]
    NoSuitableProvider,

    /// Every candidate in the fallback chain failed
    #[error("all providers failed, last error: {last}")]
    AllProvidersFailed {
        #[source]
        last: Box<GatewayError>,
    },

    /// The caller's overall deadline elapsed
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the request
    #[error("request cancelled by caller")]
    Cancelled,

    /// A pinned provider has no registered adapter or descriptor
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },

    /// Supplied scoring weights do not sum to 1.0 ± 0.01
    #[error("scoring weights must sum to 1.0, got {sum:.3}")]
    InvalidWeights { sum: f64 },

    /// Structurally invalid request
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl GatewayError {
    /// Wrap an adapter failure with the descriptor that produced it.
    pub fn from_adapter(provider: &str, model: &str, source: AdapterError) -> Self {
        GatewayError::Adapter {
            provider: provider.to_string(),
            model: model.to_string(),
            source,
        }
    }

    /// Label used for the failure counter's `error_type` dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            GatewayError::Adapter { source, .. } => source.metric_label(),
            GatewayError::NoSuitableProvider => "NoSuitableProvider",
            GatewayError::AllProvidersFailed { .. } => "AllProvidersFailed",
            GatewayError::DeadlineExceeded => "DeadlineExceeded",
            GatewayError::Cancelled => "Cancelled",
            GatewayError::UnknownProvider { .. } => "UnknownProvider",
            GatewayError::InvalidWeights { .. } => "InvalidWeights",
            GatewayError::InvalidRequest { .. } => "InvalidRequest",
        }
    }

    /// The terminal `(provider, model)` pair, when one exists.
    pub fn provider_context(&self) -> Option<(&str, &str)> {
        match self {
            GatewayError::Adapter {
                provider, model, ..
            } => Some((provider.as_str(), model.as_str())),
            GatewayError::AllProvidersFailed { last } => last.provider_context(),
            _ => None,
        }
    }
}
