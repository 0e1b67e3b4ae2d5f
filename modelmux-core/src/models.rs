//! Shared data model for the orchestration core.
//!
//! Everything that crosses a component boundary lives here: the provider
//! descriptor the router scores, the task profile the classifier builds, the
//! inbound/outbound request shapes, and the provider-independent
//! [`NormalizedResponse`] that adapters emit and the cache stores.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Closed set of task categories the classifier can assign.
///
/// Descriptors declare which of these they can serve via
/// [`ProviderDescriptor::capabilities`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    #[default]
    TextGeneration,
    Classification,
    Translation,
    Summarization,
    CodeGeneration,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::TextGeneration => "text-generation",
            TaskType::Classification => "classification",
            TaskType::Translation => "translation",
            TaskType::Summarization => "summarization",
            TaskType::CodeGeneration => "code-generation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-model token pricing in USD per 1 000 tokens.
///
/// Declared on the descriptor and handed to adapters at call time so that
/// cost accounting never lives inside adapter code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pricing {
    /// USD per 1 000 prompt tokens
    pub input_per_1k: f64,
    /// USD per 1 000 completion tokens
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of a completed call in USD.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        prompt_tokens as f64 / 1000.0 * self.input_per_1k
            + completion_tokens as f64 / 1000.0 * self.output_per_1k
    }

    /// Blended per-1k rate used by the scorer's cost sub-score.
    pub fn blended_per_1k(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// Immutable description of one routable `(provider, model)` pair.
///
/// Descriptors are configuration: they are built at startup (or by admin
/// reconfiguration) and never mutated by the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Provider identifier, matching the adapter registered under this name
    pub name: String,
    /// Model identifier as the provider knows it
    pub model: String,
    /// Blended USD per 1 000 tokens, used for scoring
    pub cost_per_1k: f64,
    /// Split input/output pricing, used for cost accounting
    pub pricing: Pricing,
    /// Declared average completion latency in milliseconds
    pub avg_latency_ms: u64,
    /// Declared reliability in `[0, 1]`
    pub reliability: f64,
    /// Hard output token ceiling for this model
    pub max_tokens: u32,
    /// Task categories this descriptor can serve
    pub capabilities: BTreeSet<TaskType>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            cost_per_1k: 0.002,
            pricing: Pricing::new(0.001, 0.003),
            avg_latency_ms: 1000,
            reliability: 0.99,
            max_tokens: 4096,
            capabilities: BTreeSet::from([TaskType::TextGeneration]),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.cost_per_1k = pricing.blended_per_1k();
        self.pricing = pricing;
        self
    }

    pub fn with_latency_ms(mut self, avg_latency_ms: u64) -> Self {
        self.avg_latency_ms = avg_latency_ms;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = TaskType>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// `provider/model` key used by the health tracker and metric labels.
    pub fn key(&self) -> String {
        format!("{}/{}", self.name, self.model)
    }
}

/// Scoring weights for provider selection.
///
/// Must sum to 1.0 within a ±0.01 tolerance when supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub cost: f64,
    pub latency: f64,
    pub reliability: f64,
    pub quality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cost: 0.3,
            latency: 0.3,
            reliability: 0.3,
            quality: 0.1,
        }
    }
}

impl ScoreWeights {
    const SUM_TOLERANCE: f64 = 0.01;

    /// Validate the 1.0 ± 0.01 sum contract.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let sum = self.cost + self.latency + self.reliability + self.quality;
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(GatewayError::InvalidWeights { sum });
        }
        Ok(())
    }
}

/// Caller-supplied routing knobs, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub cost_weight: Option<f64>,
    pub latency_weight: Option<f64>,
    pub reliability_weight: Option<f64>,
    pub quality_weight: Option<f64>,
    /// Hard budget for this request in USD
    pub max_budget: Option<f64>,
    /// Providers to rank ahead of the rest when eligible
    pub preferred_providers: Vec<String>,
    /// Overall request deadline in milliseconds
    pub time_constraint_ms: Option<u64>,
    /// Priority 1 (lowest) to 5 (highest)
    pub priority: Option<u8>,
    /// Capabilities every candidate must declare
    pub required_capabilities: Vec<TaskType>,
}

impl RequestOptions {
    /// Resolve the effective scoring weights.
    ///
    /// When none of the four weights is supplied the defaults apply; when any
    /// is supplied the missing ones count as zero and the sum contract is
    /// enforced.
    pub fn weights(&self) -> Result<ScoreWeights, GatewayError> {
        let supplied = self.cost_weight.is_some()
            || self.latency_weight.is_some()
            || self.reliability_weight.is_some()
            || self.quality_weight.is_some();
        if !supplied {
            return Ok(ScoreWeights::default());
        }

        let weights = ScoreWeights {
            cost: self.cost_weight.unwrap_or(0.0),
            latency: self.latency_weight.unwrap_or(0.0),
            reliability: self.reliability_weight.unwrap_or(0.0),
            quality: self.quality_weight.unwrap_or(0.0),
        };
        weights.validate()?;
        Ok(weights)
    }
}

/// Classified characterization of one request, built fresh per request and
/// discarded after routing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProfile {
    pub task_type: TaskType,
    /// `min(word_count / 1000, 1.0)`
    pub complexity: f64,
    /// `ceil(word_count * 1.3)`
    pub token_estimate: u32,
    /// 1 (lowest) to 5 (highest)
    pub priority: u8,
    /// USD ceiling for this request
    pub max_budget: f64,
    pub required_capabilities: BTreeSet<TaskType>,
    pub time_constraint: Duration,
}

/// Inbound completion request as callers submit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    /// Pins the provider when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Pins the model when set; requires `provider`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub options: RequestOptions,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            task_type: None,
            provider: None,
            model: None,
            max_tokens: None,
            options: RequestOptions::default(),
        }
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Pin a concrete `(provider, model)` pair.
    pub fn pinned(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    /// Structural validation, run before any routing or upstream call.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.prompt.is_empty() {
            return Err(GatewayError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }
        if self.model.is_some() && self.provider.is_none() {
            return Err(GatewayError::InvalidRequest {
                message: "model pin requires a provider pin".to_string(),
            });
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err(GatewayError::InvalidRequest {
                    message: "max_tokens must be positive".to_string(),
                });
            }
        }
        if let Some(budget) = self.options.max_budget {
            if budget <= 0.0 {
                return Err(GatewayError::InvalidRequest {
                    message: "max_budget must be positive".to_string(),
                });
            }
        }
        if let Some(ms) = self.options.time_constraint_ms {
            if ms == 0 {
                return Err(GatewayError::InvalidRequest {
                    message: "time_constraint_ms must be positive".to_string(),
                });
            }
        }
        if let Some(priority) = self.options.priority {
            if !(1..=5).contains(&priority) {
                return Err(GatewayError::InvalidRequest {
                    message: "priority must be between 1 and 5".to_string(),
                });
            }
        }
        // Weight validation happens before any routing so a bad weight set
        // never reaches an upstream.
        self.options.weights()?;
        Ok(())
    }
}

/// Provider-independent completion result.
///
/// Adapters normalize every upstream payload into this shape; anything
/// provider-specific goes into `metadata` and is never promoted to a typed
/// field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Cost of the upstream call in USD
    pub cost: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Upstream call latency
    #[serde(with = "crate::common::duration_serde")]
    pub latency: Duration,
}

/// Token accounting reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensUsed {
    pub input: u32,
    pub output: u32,
}

/// Outbound reply shape returned to callers of the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReply {
    pub id: String,
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: TokensUsed,
    pub cost: f64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl CompletionReply {
    /// Build a reply from a normalized response.
    ///
    /// Cache hits report zero cost and the time it took to serve the entry,
    /// not the original upstream latency.
    pub fn from_response(response: NormalizedResponse, cache_hit: bool, latency: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: response.content,
            provider: response.provider,
            model: response.model,
            tokens_used: TokensUsed {
                input: response.prompt_tokens,
                output: response.completion_tokens,
            },
            cost: if cache_hit { 0.0 } else { response.cost },
            latency_ms: latency.as_millis() as u64,
            cache_hit,
            timestamp: chrono::Utc::now(),
            metadata: if response.metadata.is_empty() {
                None
            } else {
                Some(response.metadata)
            },
        }
    }
}

/// One increment of a streamed completion.
///
/// The terminal event carries `finish_reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub delta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl StreamEvent {
    pub fn delta(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            finish_reason: None,
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            finish_reason: Some(reason.into()),
        }
    }
}
