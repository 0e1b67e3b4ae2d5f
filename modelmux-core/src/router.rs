//! # Router
//!
//! Turns a raw prompt into a task profile, then into a ranked list of
//! provider candidates.
//!
//! ## Classification
//!
//! Task type comes from the caller when supplied, otherwise from a keyword
//! heuristic over the prompt. Complexity is `min(word_count / 1000, 1.0)` and
//! the token estimate is `ceil(word_count × 1.3)`. Priority, budget, deadline
//! and required capabilities come from the request options with fixed
//! defaults.
//!
//! ## Selection
//!
//! A descriptor is eligible when it declares the required capabilities, the
//! health tracker does not report its circuit open, and the token estimate
//! fits its `max_tokens`. Eligible descriptors are scored as
//!
//! ```text
//! score = w_c·cost + w_l·latency + w_r·reliability + w_q·quality
//! ```
//!
//! and ranked by `(preferred, score desc, name, model)`; the lexicographic
//! tail makes routing deterministic for identical inputs and health state.
//! The best candidate becomes the primary; the next up-to-three form the
//! fallback chain. A pinned `(provider, model)` that is eligible and healthy
//! short-circuits scoring for the primary slot but the fallback chain is
//! still computed; an ineligible pin falls back to scoring with the
//! substitution recorded in the reasoning string.
//!
//! The router only reads health. Writing outcomes back is the executor's job.

use crate::error::GatewayError;
use crate::health::HealthTracker;
use crate::models::{
    CompletionRequest, ProviderDescriptor, ScoreWeights, TaskProfile, TaskType,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Cost normalization ceiling: $0.05 per 1k tokens scores zero.
const MAX_COST_PER_1K: f64 = 0.05;
/// Latency normalization ceiling: 5000 ms scores zero.
const MAX_LATENCY_MS: f64 = 5000.0;
/// Quality score for `(model, task)` pairs absent from the matrix.
const DEFAULT_QUALITY: f64 = 0.7;
/// Budget applied when the caller does not set one.
const DEFAULT_MAX_BUDGET: f64 = 0.05;
/// Deadline applied when the caller does not set one.
const DEFAULT_TIME_CONSTRAINT: Duration = Duration::from_secs(30);
/// Fallback chain length cap.
const MAX_FALLBACKS: usize = 3;

/// Derive the task type from prompt keywords.
///
/// First match wins; prompts that fit nothing default to text generation.
fn infer_task_type(prompt: &str) -> TaskType {
    let lower = prompt.to_lowercase();
    const RULES: &[(&[&str], TaskType)] = &[
        (&["translate", "translation"], TaskType::Translation),
        (&["summarize", "summarise", "summary", "tl;dr"], TaskType::Summarization),
        (&["classify", "categorize", "categorise", "sentiment"], TaskType::Classification),
        (
            &["code", "function", "implement", "refactor", "debug"],
            TaskType::CodeGeneration,
        ),
    ];
    for (keywords, task) in RULES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *task;
        }
    }
    TaskType::TextGeneration
}

/// Build the task profile for a request.
pub fn classify(request: &CompletionRequest) -> TaskProfile {
    let word_count = request.prompt.split_whitespace().count();
    let task_type = request
        .task_type
        .unwrap_or_else(|| infer_task_type(&request.prompt));

    TaskProfile {
        task_type,
        complexity: (word_count as f64 / 1000.0).min(1.0),
        token_estimate: (word_count as f64 * 1.3).ceil() as u32,
        priority: request.options.priority.unwrap_or(3),
        max_budget: request.options.max_budget.unwrap_or(DEFAULT_MAX_BUDGET),
        required_capabilities: request.options.required_capabilities.iter().copied().collect(),
        time_constraint: request
            .options
            .time_constraint_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIME_CONSTRAINT),
    }
}

/// Static `(model, task)` quality lookup with a 0.7 default.
#[derive(Debug, Clone, Default)]
pub struct QualityMatrix {
    scores: HashMap<(String, TaskType), f64>,
}

impl QualityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, model: impl Into<String>, task: TaskType, score: f64) -> Self {
        self.scores.insert((model.into(), task), score.clamp(0.0, 1.0));
        self
    }

    pub fn score(&self, model: &str, task: TaskType) -> f64 {
        self.scores
            .get(&(model.to_string(), task))
            .copied()
            .unwrap_or(DEFAULT_QUALITY)
    }
}

/// The routing outcome: a primary, its confidence, the reasoning behind it,
/// and an ordered fallback chain that never contains the primary.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub primary: ProviderDescriptor,
    pub confidence: f64,
    pub reasoning: String,
    pub fallbacks: Vec<ProviderDescriptor>,
}

impl RouteDecision {
    /// Primary followed by the fallback chain, in attempt order.
    pub fn candidates(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }
}

#[derive(Debug, Clone)]
struct ScoredCandidate {
    descriptor: ProviderDescriptor,
    score: f64,
    cost_score: f64,
    latency_score: f64,
    quality_score: f64,
    preferred: bool,
}

/// Provider selection over a fixed descriptor set.
pub struct Router {
    descriptors: Vec<ProviderDescriptor>,
    quality: QualityMatrix,
    health: Arc<HealthTracker>,
}

impl Router {
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        quality: QualityMatrix,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            descriptors,
            quality,
            health,
        }
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    /// Descriptor for an exact `(provider, model)` pair.
    pub fn descriptor(&self, provider: &str, model: &str) -> Option<&ProviderDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == provider && d.model == model)
    }

    fn score(&self, descriptor: &ProviderDescriptor, profile: &TaskProfile, weights: &ScoreWeights) -> ScoredCandidate {
        let cost_score = 1.0 - (descriptor.cost_per_1k / MAX_COST_PER_1K).min(1.0);
        let latency_score = 1.0 - (descriptor.avg_latency_ms as f64 / MAX_LATENCY_MS).min(1.0);
        let quality_score = self.quality.score(&descriptor.model, profile.task_type);

        let score = if profile.token_estimate > descriptor.max_tokens {
            0.0
        } else {
            weights.cost * cost_score
                + weights.latency * latency_score
                + weights.reliability * descriptor.reliability
                + weights.quality * quality_score
        };

        ScoredCandidate {
            descriptor: descriptor.clone(),
            score,
            cost_score,
            latency_score,
            quality_score,
            preferred: false,
        }
    }

    fn is_eligible(&self, descriptor: &ProviderDescriptor, profile: &TaskProfile) -> bool {
        profile
            .required_capabilities
            .iter()
            .all(|cap| descriptor.capabilities.contains(cap))
            && profile.token_estimate <= descriptor.max_tokens
            && self.health.is_healthy(&descriptor.name, &descriptor.model)
    }

    /// Rank every eligible descriptor for this profile.
    fn ranked_candidates(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        weights: &ScoreWeights,
    ) -> Vec<ScoredCandidate> {
        let pool: Vec<&ProviderDescriptor> = {
            let capable: Vec<&ProviderDescriptor> = self
                .descriptors
                .iter()
                .filter(|d| d.capabilities.contains(&profile.task_type))
                .collect();
            if capable.is_empty() {
                // No descriptor declares this task: fall back to the
                // general-purpose text-generation pool.
                self.descriptors
                    .iter()
                    .filter(|d| d.capabilities.contains(&TaskType::TextGeneration))
                    .collect()
            } else {
                capable
            }
        };

        let mut candidates: Vec<ScoredCandidate> = pool
            .into_iter()
            .filter(|d| self.is_eligible(d, profile))
            .map(|d| {
                let mut scored = self.score(d, profile, weights);
                scored.preferred = request.options.preferred_providers.contains(&d.name);
                scored
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.preferred
                .cmp(&a.preferred)
                .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| {
                    (&a.descriptor.name, &a.descriptor.model)
                        .cmp(&(&b.descriptor.name, &b.descriptor.model))
                })
        });
        candidates
    }

    fn describe(candidate: &ScoredCandidate) -> String {
        format!(
            "{}/{} scored {:.3} (cost {:.2}, latency {:.2}, reliability {:.2}, quality {:.2})",
            candidate.descriptor.name,
            candidate.descriptor.model,
            candidate.score,
            candidate.cost_score,
            candidate.latency_score,
            candidate.descriptor.reliability,
            candidate.quality_score,
        )
    }

    /// Select the primary and fallback chain for a classified request.
    pub fn select(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        weights: &ScoreWeights,
    ) -> Result<RouteDecision, GatewayError> {
        if let Some(pinned_provider) = &request.provider {
            return self.select_pinned(request, profile, weights, pinned_provider);
        }

        let ranked = self.ranked_candidates(request, profile, weights);
        self.decision_from_ranking(ranked, None)
    }

    fn select_pinned(
        &self,
        request: &CompletionRequest,
        profile: &TaskProfile,
        weights: &ScoreWeights,
        pinned_provider: &str,
    ) -> Result<RouteDecision, GatewayError> {
        let pinned: Vec<&ProviderDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| {
                d.name == pinned_provider
                    && request.model.as_ref().map(|m| &d.model == m).unwrap_or(true)
            })
            .collect();
        if pinned.is_empty() {
            return Err(GatewayError::UnknownProvider {
                name: match &request.model {
                    Some(model) => format!("{pinned_provider}/{model}"),
                    None => pinned_provider.to_string(),
                },
            });
        }

        let ranked = self.ranked_candidates(request, profile, weights);

        // Best eligible descriptor matching the pin, if any survived the
        // eligibility filter.
        if let Some(position) = ranked.iter().position(|c| {
            c.descriptor.name == pinned_provider
                && request
                    .model
                    .as_ref()
                    .map(|m| &c.descriptor.model == m)
                    .unwrap_or(true)
        }) {
            let mut ranked = ranked;
            let pinned_candidate = ranked.remove(position);
            let reasoning = format!(
                "pinned by caller; {}",
                Self::describe(&pinned_candidate)
            );
            let fallbacks: Vec<ProviderDescriptor> = ranked
                .into_iter()
                .take(MAX_FALLBACKS)
                .map(|c| c.descriptor)
                .collect();
            return Ok(RouteDecision {
                primary: pinned_candidate.descriptor,
                confidence: 1.0,
                reasoning,
                fallbacks,
            });
        }

        // The pin exists but is unhealthy or ineligible: substitute and say so.
        let substitution_note = format!(
            "pinned {}/{} unavailable (circuit open or ineligible), substituted",
            pinned_provider,
            request.model.as_deref().unwrap_or("*"),
        );
        self.decision_from_ranking(ranked, Some(substitution_note))
    }

    fn decision_from_ranking(
        &self,
        mut ranked: Vec<ScoredCandidate>,
        substitution_note: Option<String>,
    ) -> Result<RouteDecision, GatewayError> {
        if ranked.is_empty() {
            return Err(GatewayError::NoSuitableProvider);
        }

        let primary = ranked.remove(0);
        let confidence = match ranked.first() {
            None => 1.0,
            Some(second) => (0.5 + (primary.score - second.score)).min(1.0),
        };

        let reasoning = match substitution_note {
            Some(note) => format!("{note} {}", Self::describe(&primary)),
            None => Self::describe(&primary),
        };

        let fallbacks: Vec<ProviderDescriptor> = ranked
            .into_iter()
            .take(MAX_FALLBACKS)
            .map(|c| c.descriptor)
            .collect();

        tracing::debug!(
            primary = %primary.descriptor.key(),
            confidence,
            fallbacks = fallbacks.len(),
            "route selected"
        );

        Ok(RouteDecision {
            primary: primary.descriptor,
            confidence,
            reasoning,
            fallbacks,
        })
    }
}
