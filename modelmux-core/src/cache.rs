//! # Response Cache
//!
//! Fingerprint-keyed storage of normalized responses with per-entry TTL.
//!
//! ## Key derivation
//!
//! The cache key is the lowercase-hex SHA-256 digest of
//! `prompt \0 task_type \0 provider \0 model`. Keys are case- and
//! whitespace-sensitive; the core performs no prompt normalization, so two
//! prompts that differ by a single space are distinct entries.
//!
//! ## Semantics
//!
//! - Entries are immutable once written; a `set` never replaces an existing
//!   entry whose `created_at` is newer, which keeps concurrent misses from
//!   clobbering each other.
//! - Expired entries are evicted lazily on read; the remote backend instead
//!   delegates expiry to its own TTL handling.
//! - Cache failures are non-fatal by contract: callers treat `get` errors as
//!   misses and drop `set` errors after logging.
//!
//! The in-memory backend lives here; the remote key-value backend lives with
//! the serving layer, next to its connection management.

use crate::metrics::MetricsSink;
use crate::models::{NormalizedResponse, TaskType};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default entry lifetime when the deployment does not override it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Cache backend failure. Never fatal to the request path.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {message}")]
    Backend { message: String },
}

/// Compute the cache key for a routed prompt.
pub fn fingerprint(prompt: &str, task_type: TaskType, provider: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(task_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

/// One cached normalized response.
///
/// `provider` and `model` always equal the descriptor that produced the
/// response; they are denormalized here so backends can audit entries without
/// decoding the response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: NormalizedResponse,
    pub provider: String,
    pub model: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Entry lifetime from `created_at`
    #[serde(with = "crate::common::duration_serde")]
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(response: NormalizedResponse, ttl: Duration) -> Self {
        Self {
            provider: response.provider.clone(),
            model: response.model.clone(),
            response,
            created_at: chrono::Utc::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        let age = chrono::Utc::now().signed_duration_since(self.created_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }
}

/// Pluggable cache backend contract.
#[async_trait::async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up an entry. `Ok(None)` is a miss; errors degrade to misses.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry under its TTL. Must not overwrite a newer entry.
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove an entry.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Current number of stored entries, for the cache-size gauge.
    async fn len(&self) -> usize;
}

/// In-memory cache backend with lazy TTL eviction.
///
/// No eviction bound is imposed here; deployments that need one put a bounded
/// backend behind the same trait.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    metrics: Option<Arc<MetricsSink>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            metrics: None,
        }
    }

    /// Wire eviction and size reporting into a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_size(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_gauge("cache_size", &[], self.entries.len() as f64);
        }
    }

    fn record_eviction(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_counter("cache_evictions_total", &[]);
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: evict lazily
        self.entries.remove(key);
        self.record_eviction();
        self.record_size();
        Ok(None)
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                if existing.get().created_at <= entry.created_at {
                    existing.insert(entry);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        self.record_size();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        self.record_size();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(content: &str) -> NormalizedResponse {
        NormalizedResponse {
            content: content.to_string(),
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            prompt_tokens: 5,
            completion_tokens: 2,
            cost: 0.002,
            metadata: HashMap::new(),
            latency: Duration::from_millis(120),
        }
    }

    #[test]
    fn fingerprint_is_stable_and_field_sensitive() {
        let base = fingerprint("hello", TaskType::TextGeneration, "openai", "gpt-3.5-turbo");
        assert_eq!(
            base,
            fingerprint("hello", TaskType::TextGeneration, "openai", "gpt-3.5-turbo")
        );
        assert_eq!(base.len(), 64);

        assert_ne!(
            base,
            fingerprint("hello", TaskType::TextGeneration, "openai", "gpt-4")
        );
        assert_ne!(
            base,
            fingerprint("hello", TaskType::Summarization, "openai", "gpt-3.5-turbo")
        );
        // Case and whitespace are significant
        assert_ne!(
            base,
            fingerprint("Hello", TaskType::TextGeneration, "openai", "gpt-3.5-turbo")
        );
        assert_ne!(
            base,
            fingerprint("hello ", TaskType::TextGeneration, "openai", "gpt-3.5-turbo")
        );
    }

    #[test]
    fn field_separator_prevents_boundary_collisions() {
        let a = fingerprint("ab", TaskType::TextGeneration, "openai", "gpt-4");
        let b = fingerprint("a", TaskType::TextGeneration, "bopenai", "gpt-4");
        assert_ne!(a, b);
    }

    #[test]
    fn entry_copies_provider_and_model_from_response() {
        let entry = CacheEntry::new(response("hi"), DEFAULT_TTL);
        assert_eq!(entry.provider, entry.response.provider);
        assert_eq!(entry.model, entry.response.model);
    }

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let cache = MemoryCache::new();
        let entry = CacheEntry::new(response("hi"), DEFAULT_TTL);
        cache.set("key", entry).await.unwrap();

        let found = cache.get("key").await.unwrap().expect("entry present");
        assert_eq!(found.response.content, "hi");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = MemoryCache::new();
        let mut entry = CacheEntry::new(response("stale"), Duration::from_secs(60));
        entry.created_at = chrono::Utc::now() - chrono::Duration::seconds(120);
        cache.set("key", entry).await.unwrap();

        assert!(cache.get("key").await.unwrap().is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn set_does_not_overwrite_newer_entry() {
        let cache = MemoryCache::new();
        let newer = CacheEntry::new(response("newer"), DEFAULT_TTL);
        let mut older = CacheEntry::new(response("older"), DEFAULT_TTL);
        older.created_at = newer.created_at - chrono::Duration::seconds(30);

        cache.set("key", newer).await.unwrap();
        cache.set("key", older).await.unwrap();

        let found = cache.get("key").await.unwrap().unwrap();
        assert_eq!(found.response.content, "newer");
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MemoryCache::new();
        cache
            .set("key", CacheEntry::new(response("hi"), DEFAULT_TTL))
            .await
            .unwrap();
        cache.delete("key").await.unwrap();
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eviction_increments_the_eviction_counter() {
        let metrics = Arc::new(MetricsSink::new());
        let cache = MemoryCache::new().with_metrics(metrics.clone());

        let mut entry = CacheEntry::new(response("stale"), Duration::from_secs(1));
        entry.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        cache.set("key", entry).await.unwrap();
        cache.get("key").await.unwrap();

        assert_eq!(metrics.counter_value("cache_evictions_total", &[]), 1);
    }
}
