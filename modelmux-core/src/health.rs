//! # Health Tracker
//!
//! Per-`(provider, model)` circuit state shared between the executor (writer)
//! and the router (reader). The dependency is one-way: the executor records
//! outcomes, the router only reads eligibility.
//!
//! ## Circuit states
//!
//! - **Healthy**: no recent failures; requests flow normally.
//! - **Degraded**: consecutive failures below the threshold; still routable
//!   but one step closer to opening.
//! - **Open**: the failure threshold was reached; the pair is excluded from
//!   routing until the quarantine window passes, after which it is treated as
//!   healthy again so a probe request can test recovery.
//!
//! Records are never removed once created; absence of a record means healthy.

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

/// Circuit state of one `(provider, model)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Healthy,
    Degraded,
    Open,
}

impl CircuitState {
    /// Value exported on the `provider_health` gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Healthy => 1.0,
            CircuitState::Degraded => 0.5,
            CircuitState::Open => 0.0,
        }
    }
}

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time after which an open circuit is probed again
    pub quarantine: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            quarantine: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    consecutive_failures: u32,
    last_checked: chrono::DateTime<chrono::Utc>,
    last_error: Option<String>,
}

/// Point-in-time view of one record, for admin introspection.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub model: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_checked: chrono::DateTime<chrono::Utc>,
    pub last_error: Option<String>,
}

/// Shared health state for every `(provider, model)` pair seen so far.
pub struct HealthTracker {
    records: DashMap<String, HealthRecord>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    fn key(provider: &str, model: &str) -> String {
        format!("{provider}/{model}")
    }

    /// Record the outcome of one adapter attempt.
    pub fn update(&self, provider: &str, model: &str, success: bool, error: Option<&str>) {
        let key = Self::key(provider, model);
        let now = chrono::Utc::now();

        let mut record = self.records.entry(key).or_insert_with(|| HealthRecord {
            consecutive_failures: 0,
            last_checked: now,
            last_error: None,
        });

        record.last_checked = now;
        if success {
            record.consecutive_failures = 0;
            record.last_error = None;
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_error = error.map(str::to_string);
            if record.consecutive_failures == self.config.failure_threshold {
                tracing::warn!(
                    provider,
                    model,
                    failures = record.consecutive_failures,
                    "circuit opened"
                );
            }
        }
    }

    fn state_of(&self, record: &HealthRecord) -> CircuitState {
        if record.consecutive_failures == 0 {
            return CircuitState::Healthy;
        }
        if record.consecutive_failures < self.config.failure_threshold {
            return CircuitState::Degraded;
        }

        // Open, unless the quarantine window has lapsed: a stale record is
        // treated as healthy so the next request probes recovery.
        let age = chrono::Utc::now().signed_duration_since(record.last_checked);
        match age.to_std() {
            Ok(age) if age > self.config.quarantine => CircuitState::Healthy,
            _ => CircuitState::Open,
        }
    }

    /// Routing eligibility. Absence of a record means healthy; degraded pairs
    /// remain routable.
    pub fn is_healthy(&self, provider: &str, model: &str) -> bool {
        self.circuit_state(provider, model) != CircuitState::Open
    }

    /// Current circuit state, for gauges and introspection.
    pub fn circuit_state(&self, provider: &str, model: &str) -> CircuitState {
        match self.records.get(&Self::key(provider, model)) {
            Some(record) => self.state_of(&record),
            None => CircuitState::Healthy,
        }
    }

    /// Snapshot of every record ever created, ordered by key.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<HealthSnapshot> = self
            .records
            .iter()
            .map(|entry| {
                let (provider, model) = entry
                    .key()
                    .split_once('/')
                    .unwrap_or((entry.key().as_str(), ""));
                HealthSnapshot {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    state: self.state_of(entry.value()),
                    consecutive_failures: entry.value().consecutive_failures,
                    last_checked: entry.value().last_checked,
                    last_error: entry.value().last_error.clone(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| (&a.provider, &a.model).cmp(&(&b.provider, &b.model)));
        snapshots
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(threshold: u32, quarantine: Duration) -> HealthTracker {
        HealthTracker::new(HealthConfig {
            failure_threshold: threshold,
            quarantine,
        })
    }

    #[test]
    fn unknown_pair_is_healthy() {
        let tracker = HealthTracker::default();
        assert!(tracker.is_healthy("openai", "gpt-4"));
        assert_eq!(
            tracker.circuit_state("openai", "gpt-4"),
            CircuitState::Healthy
        );
    }

    #[test]
    fn first_failure_degrades() {
        let tracker = HealthTracker::default();
        tracker.update("openai", "gpt-4", false, Some("boom"));
        assert_eq!(
            tracker.circuit_state("openai", "gpt-4"),
            CircuitState::Degraded
        );
        assert!(tracker.is_healthy("openai", "gpt-4"));
    }

    #[test]
    fn success_resets_a_degraded_circuit() {
        let tracker = HealthTracker::default();
        tracker.update("openai", "gpt-4", false, Some("boom"));
        tracker.update("openai", "gpt-4", false, Some("boom"));
        tracker.update("openai", "gpt-4", true, None);
        assert_eq!(
            tracker.circuit_state("openai", "gpt-4"),
            CircuitState::Healthy
        );
    }

    #[test]
    fn circuit_opens_at_the_failure_threshold() {
        let tracker = HealthTracker::default();
        for _ in 0..4 {
            tracker.update("openai", "gpt-4", false, Some("boom"));
            assert!(tracker.is_healthy("openai", "gpt-4"));
        }
        tracker.update("openai", "gpt-4", false, Some("boom"));
        assert_eq!(tracker.circuit_state("openai", "gpt-4"), CircuitState::Open);
        assert!(!tracker.is_healthy("openai", "gpt-4"));
    }

    #[test]
    fn failures_on_other_models_are_independent() {
        let tracker = tracker(2, Duration::from_secs(300));
        tracker.update("openai", "gpt-4", false, Some("boom"));
        tracker.update("openai", "gpt-4", false, Some("boom"));
        assert!(!tracker.is_healthy("openai", "gpt-4"));
        assert!(tracker.is_healthy("openai", "gpt-3.5-turbo"));
    }

    #[tokio::test]
    async fn open_circuit_recovers_after_quarantine() {
        let tracker = tracker(1, Duration::from_millis(40));
        tracker.update("openai", "gpt-4", false, Some("boom"));
        assert!(!tracker.is_healthy("openai", "gpt-4"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(tracker.is_healthy("openai", "gpt-4"));
        assert_eq!(
            tracker.circuit_state("openai", "gpt-4"),
            CircuitState::Healthy
        );
    }

    #[tokio::test]
    async fn probe_failure_reopens_the_circuit() {
        let tracker = tracker(1, Duration::from_millis(40));
        tracker.update("openai", "gpt-4", false, Some("boom"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(tracker.is_healthy("openai", "gpt-4"));

        tracker.update("openai", "gpt-4", false, Some("still down"));
        assert!(!tracker.is_healthy("openai", "gpt-4"));
    }

    #[test]
    fn snapshot_reports_last_error_and_is_ordered() {
        let tracker = HealthTracker::default();
        tracker.update("openai", "gpt-4", false, Some("rate limited"));
        tracker.update("anthropic", "claude-3-haiku", true, None);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].provider, "anthropic");
        assert_eq!(snapshot[1].last_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn gauge_values_follow_state() {
        assert_eq!(CircuitState::Healthy.gauge_value(), 1.0);
        assert_eq!(CircuitState::Degraded.gauge_value(), 0.5);
        assert_eq!(CircuitState::Open.gauge_value(), 0.0);
    }
}
