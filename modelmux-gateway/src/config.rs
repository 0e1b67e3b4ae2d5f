//! # Gateway Configuration
//!
//! TOML configuration with environment overrides. The file carries the
//! serving surface (host/port), the cache selection, health-tracker tuning,
//! the quality matrix and the provider table. Secrets never appear in
//! plaintext: provider rows hold AES-256-GCM blobs decrypted at call time
//! with the key from `PROVIDER_SECRET_KEY`.
//!
//! ## Environment variables
//!
//! - `GATEWAY_HOST` / `GATEWAY_PORT`: serving address overrides
//! - `CACHE_TYPE`: `memory` or `remote`
//! - `CACHE_EXPIRATION`: entry TTL, e.g. `30m` or `3600s`
//! - `PROVIDER_SECRET_KEY`: 64 hex chars; absent disables encrypted
//!   credential reads (environment fallbacks still apply)
//! - `{NAME}_API_KEY`: per-provider credential fallback
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [cache]
//! backend = "memory"
//! expiration = "1h"
//!
//! [[providers]]
//! name = "openai"
//! model = "gpt-4o-mini"
//! cost_per_1k_input = 0.00015
//! cost_per_1k_output = 0.0006
//! max_tokens = 16384
//! avg_latency_ms = 900
//! capabilities = ["text-generation", "summarization", "code-generation"]
//! ```

use modelmux_core::common::duration_serde;
use modelmux_core::credentials::parse_secret_key;
use modelmux_core::models::{Pricing, ProviderDescriptor, TaskType};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub health: HealthSection,
    pub providers: Vec<ProviderEntry>,
    pub quality: Vec<QualityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whole-request timeout applied at the HTTP layer
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `memory` or `remote`
    pub backend: String,
    /// Connection URL for the remote backend
    pub url: Option<String>,
    /// Entry TTL
    #[serde(with = "duration_serde")]
    pub expiration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            url: None,
            expiration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub failure_threshold: u32,
    #[serde(with = "duration_serde")]
    pub quarantine: Duration,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            quarantine: Duration::from_secs(300),
        }
    }
}

/// One row of the provider table: a routable `(provider, model)` pair with
/// its economics, declared performance and encrypted credential.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Hex-encoded AES-256-GCM `nonce || ciphertext`
    #[serde(default)]
    pub api_key_encrypted: Option<String>,
    #[serde(default = "default_cost")]
    pub cost_per_1k_input: f64,
    #[serde(default = "default_cost")]
    pub cost_per_1k_output: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_latency")]
    pub avg_latency_ms: u64,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<TaskType>,
}

fn default_cost() -> f64 {
    0.002
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}
fn default_priority() -> u8 {
    3
}
fn default_latency() -> u64 {
    1000
}
fn default_reliability() -> f64 {
    0.99
}
fn default_capabilities() -> Vec<TaskType> {
    vec![TaskType::TextGeneration]
}

impl ProviderEntry {
    pub fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new(&self.name, &self.model)
            .with_pricing(Pricing::new(self.cost_per_1k_input, self.cost_per_1k_output))
            .with_latency_ms(self.avg_latency_ms)
            .with_reliability(self.reliability)
            .with_max_tokens(self.max_tokens)
            .with_capabilities(self.capabilities.iter().copied())
    }
}

/// One `(model, task)` entry of the quality matrix.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityEntry {
    pub model: String,
    pub task: TaskType,
    pub score: f64,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides. A missing file yields the defaults, which still serve the
    /// health and metrics endpoints.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str::<Config>(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse {path}: {e}"))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "configuration file not found, using defaults");
                Config::default()
            }
            Err(err) => return Err(anyhow::anyhow!("failed to read {path}: {err}")),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("GATEWAY_PORT is not a valid port: {port}"))?;
        }
        if let Ok(backend) = env::var("CACHE_TYPE") {
            self.cache.backend = backend;
        }
        if let Ok(expiration) = env::var("CACHE_EXPIRATION") {
            self.cache.expiration = duration_serde::parse_duration_str(&expiration)
                .map_err(|e| anyhow::anyhow!("CACHE_EXPIRATION invalid: {e}"))?;
        }
        Ok(())
    }

    /// The process-wide credential decryption key, when configured.
    pub fn secret_key(&self) -> Option<[u8; 32]> {
        match env::var("PROVIDER_SECRET_KEY") {
            Ok(raw) => match parse_secret_key(&raw) {
                Ok(key) => Some(key),
                Err(err) => {
                    tracing::warn!(error = %err, "PROVIDER_SECRET_KEY invalid, encrypted credentials disabled");
                    None
                }
            },
            Err(_) => None,
        }
    }

    /// Active provider rows, highest priority first.
    pub fn active_providers(&self) -> Vec<&ProviderEntry> {
        let mut entries: Vec<&ProviderEntry> =
            self.providers.iter().filter(|p| p.is_active).collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        entries
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.cache.backend.as_str() {
            "memory" => {}
            "remote" => {
                if self.cache.url.is_none() {
                    anyhow::bail!("cache.backend = \"remote\" requires cache.url");
                }
            }
            other => anyhow::bail!("unknown cache backend: {other}"),
        }

        for entry in &self.providers {
            if entry.name.is_empty() || entry.model.is_empty() {
                anyhow::bail!("provider entries need both name and model");
            }
            if !(0.0..=1.0).contains(&entry.reliability) {
                anyhow::bail!(
                    "provider {}/{} reliability must be in [0, 1]",
                    entry.name,
                    entry.model
                );
            }
            if entry.cost_per_1k_input < 0.0 || entry.cost_per_1k_output < 0.0 {
                anyhow::bail!(
                    "provider {}/{} pricing must be non-negative",
                    entry.name,
                    entry.model
                );
            }
            let needs_base_url = !matches!(entry.name.as_str(), "openai" | "anthropic");
            if needs_base_url && entry.base_url.is_none() {
                anyhow::bail!(
                    "provider {} has no built-in endpoint, set base_url",
                    entry.name
                );
            }
        }

        for entry in &self.quality {
            if !(0.0..=1.0).contains(&entry.score) {
                anyhow::bail!("quality score for {} must be in [0, 1]", entry.model);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache.backend, "memory");
    }

    #[test]
    fn parses_a_full_provider_table() {
        let raw = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout = "90s"

            [cache]
            backend = "memory"
            expiration = "30m"

            [health]
            failure_threshold = 3
            quarantine = "2m"

            [[providers]]
            name = "openai"
            model = "gpt-4o-mini"
            cost_per_1k_input = 0.00015
            cost_per_1k_output = 0.0006
            max_tokens = 16384
            avg_latency_ms = 900
            capabilities = ["text-generation", "code-generation"]

            [[providers]]
            name = "groq"
            model = "llama-3-70b"
            base_url = "https://api.groq.com/openai/v1"
            is_active = false

            [[quality]]
            model = "gpt-4o-mini"
            task = "code-generation"
            score = 0.85
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.request_timeout, Duration::from_secs(90));
        assert_eq!(config.cache.expiration, Duration::from_secs(1800));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.active_providers().len(), 1);

        let descriptor = config.providers[0].descriptor();
        assert_eq!(descriptor.max_tokens, 16384);
        assert!(descriptor.capabilities.contains(&TaskType::CodeGeneration));
    }

    #[test]
    fn remote_cache_requires_a_url() {
        let raw = r#"
            [cache]
            backend = "remote"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_compat_provider_requires_base_url() {
        let raw = r#"
            [[providers]]
            name = "groq"
            model = "llama-3-70b"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("CACHE_EXPIRATION", "45m");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.cache.expiration, Duration::from_secs(2700));
        std::env::remove_var("CACHE_EXPIRATION");
    }

    #[test]
    fn active_providers_sort_by_priority() {
        let raw = r#"
            [[providers]]
            name = "openai"
            model = "low"
            priority = 1

            [[providers]]
            name = "openai"
            model = "high"
            priority = 5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        let active = config.active_providers();
        assert_eq!(active[0].model, "high");
    }
}
