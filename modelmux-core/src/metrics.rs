//! # Metrics Sink
//!
//! Counters, histograms and gauges for the request pipeline. Emission is
//! fire-and-forget: every operation is an atomic register update, never
//! returns an error, and never blocks the request path.
//!
//! Series tracked by the core:
//!
//! - counters: `requests_total{task,provider,model}`,
//!   `cache_hits_total{task,provider,model}`,
//!   `failed_requests_total{provider,model,error_type}`,
//!   `cache_evictions_total`, `cost_usd_total{provider,model}`
//! - histograms (exponential buckets from 0.1 s):
//!   `request_latency_seconds`, `provider_latency_seconds`
//! - gauges: `provider_health{provider,model}` (1 healthy, 0.5 degraded,
//!   0 open), `cache_size`
//!
//! The sink is built once at startup and shared as an `Arc`; tests construct
//! a fresh sink per case instead of resetting a global.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Exponential histogram bucket upper bounds, in seconds.
const LATENCY_BUCKETS: [f64; 10] = [0.1, 0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2];

/// Atomic registers for one histogram series.
struct Histogram {
    name: String,
    labels: String,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
}

impl Histogram {
    fn new(name: &str, labels: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.to_string(),
            buckets: (0..LATENCY_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if value <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        add_f64(&self.sum_bits, value);
    }
}

/// Add to an f64 accumulator stored as atomic bits.
fn add_f64(bits: &AtomicU64, delta: f64) {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let next = f64::from_bits(current) + delta;
        match bits.compare_exchange_weak(
            current,
            next.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// Process-wide metrics registers.
pub struct MetricsSink {
    counters: DashMap<String, AtomicU64>,
    sums: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Histogram>,
}

/// Render `{k="v",...}` for a label set; empty labels render as nothing.
fn label_string(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    format!("{name}{}", label_string(labels))
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            sums: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    /// Increment a counter series by one.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.counters
            .entry(series_key(name, labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a monotonically increasing f64 series (cost accounting).
    pub fn add_sum(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let entry = self
            .sums
            .entry(series_key(name, labels))
            .or_insert_with(|| AtomicU64::new(0));
        add_f64(&entry, delta);
    }

    /// Set a gauge series to an absolute value.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges
            .entry(series_key(name, labels))
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Record one observation, in seconds, into a latency histogram.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], seconds: f64) {
        self.histograms
            .entry(series_key(name, labels))
            .or_insert_with(|| Histogram::new(name, &label_string(labels)))
            .observe(seconds);
    }

    /// Current value of a counter series. Zero if never incremented.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current value of an f64 sum series.
    pub fn sum_value(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.sums
            .get(&series_key(name, labels))
            .map(|c| f64::from_bits(c.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Current value of a gauge series.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .get(&series_key(name, labels))
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    /// Number of observations recorded for a histogram series.
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.histograms
            .get(&series_key(name, labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render every series in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let mut counter_lines: Vec<String> = self
            .counters
            .iter()
            .map(|entry| format!("{} {}", entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        counter_lines.sort();
        for line in counter_lines {
            out.push_str(&line);
            out.push('\n');
        }

        let mut sum_lines: Vec<String> = self
            .sums
            .iter()
            .map(|entry| {
                let value = f64::from_bits(entry.value().load(Ordering::Relaxed));
                format!("{} {value}", entry.key())
            })
            .collect();
        sum_lines.sort();
        for line in sum_lines {
            out.push_str(&line);
            out.push('\n');
        }

        let mut gauge_lines: Vec<String> = self
            .gauges
            .iter()
            .map(|entry| {
                let value = f64::from_bits(entry.value().load(Ordering::Relaxed));
                format!("{} {value}", entry.key())
            })
            .collect();
        gauge_lines.sort();
        for line in gauge_lines {
            out.push_str(&line);
            out.push('\n');
        }

        let mut histogram_keys: Vec<String> =
            self.histograms.iter().map(|e| e.key().clone()).collect();
        histogram_keys.sort();
        for key in histogram_keys {
            if let Some(hist) = self.histograms.get(&key) {
                let base_labels = hist
                    .labels
                    .trim_start_matches('{')
                    .trim_end_matches('}')
                    .to_string();
                for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
                    let le = if base_labels.is_empty() {
                        format!("le=\"{bound}\"")
                    } else {
                        format!("{base_labels},le=\"{bound}\"")
                    };
                    out.push_str(&format!(
                        "{}_bucket{{{le}}} {}\n",
                        hist.name,
                        hist.buckets[i].load(Ordering::Relaxed)
                    ));
                }
                let count = hist.count.load(Ordering::Relaxed);
                let le = if base_labels.is_empty() {
                    "le=\"+Inf\"".to_string()
                } else {
                    format!("{base_labels},le=\"+Inf\"")
                };
                out.push_str(&format!("{}_bucket{{{le}}} {count}\n", hist.name));
                out.push_str(&format!(
                    "{}_sum{} {}\n",
                    hist.name,
                    hist.labels,
                    f64::from_bits(hist.sum_bits.load(Ordering::Relaxed))
                ));
                out.push_str(&format!("{}_count{} {count}\n", hist.name, hist.labels));
            }
        }

        out
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}
