//! Resolver counters and latency, exported as Prometheus text

use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::decision::{Decision, DenyReason};

/// Latency samples kept for percentiles
const LATENCY_WINDOW: usize = 4_096;

/// Outcome labels in export order; index matches `outcome_slot`
const OUTCOMES: [&str; 5] = [
    "allow",
    "no_rule",
    "no_matching_group",
    "invalid_ip",
    "store_unavailable",
];

fn outcome_slot(decision: &Decision) -> usize {
    match decision {
        Decision::Allow => 0,
        Decision::Deny(DenyReason::NoMatchingGroup { no_rule: true }) => 1,
        Decision::Deny(DenyReason::NoMatchingGroup { no_rule: false }) => 2,
        Decision::Deny(DenyReason::InvalidIp { .. }) => 3,
        Decision::Deny(DenyReason::StoreUnavailable { .. }) => 4,
    }
}

/// Point-in-time view of the resolver's counters
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub total_requests: u64,
    pub allowed_decisions: u64,
    pub denied_no_rule: u64,
    pub denied_no_matching_group: u64,
    pub denied_invalid_ip: u64,
    pub denied_store_unavailable: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Over the most recent decisions only
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    pub fn denied_decisions(&self) -> u64 {
        self.total_requests - self.allowed_decisions
    }

    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_hits + self.cache_misses)
    }

    pub fn allow_rate(&self) -> f64 {
        ratio(self.allowed_decisions, self.total_requests)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Lock-free decision and cache counters plus a bounded latency window
#[derive(Debug, Default)]
pub struct MetricsCollector {
    outcomes: [AtomicU64; 5],
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latencies_ms: Mutex<VecDeque<f64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, decision: &Decision) {
        self.outcomes[outcome_slot(decision)].fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_latency(&self, latency: Duration) {
        let mut window = self.latencies_ms.lock().await;
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_secs_f64() * 1000.0);
    }

    /// Current counters with percentiles over the latency window
    pub async fn get_metrics(&self) -> EngineMetrics {
        let counts: Vec<u64> = self
            .outcomes
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect();

        let mut sorted: Vec<f64> = self.latencies_ms.lock().await.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let avg_latency_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        EngineMetrics {
            total_requests: counts.iter().sum(),
            allowed_decisions: counts[0],
            denied_no_rule: counts[1],
            denied_no_matching_group: counts[2],
            denied_invalid_ip: counts[3],
            denied_store_unavailable: counts[4],
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            latency_p50_ms: percentile(&sorted, 0.50),
            latency_p90_ms: percentile(&sorted, 0.90),
            latency_p99_ms: percentile(&sorted, 0.99),
            avg_latency_ms,
        }
    }

    pub async fn reset(&self) {
        for count in &self.outcomes {
            count.store(0, Ordering::Relaxed);
        }
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.latencies_ms.lock().await.clear();
    }

    /// Prometheus text exposition of the counters
    pub async fn export_prometheus(&self) -> String {
        let snapshot = self.get_metrics().await;
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(out, "# HELP authz_decisions_total Authorization decisions by outcome");
        let _ = writeln!(out, "# TYPE authz_decisions_total counter");
        for (label, count) in OUTCOMES.iter().zip(&self.outcomes) {
            let _ = writeln!(
                out,
                "authz_decisions_total{{outcome=\"{}\"}} {}",
                label,
                count.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# HELP authz_profile_cache_total Profile cache lookups by result");
        let _ = writeln!(out, "# TYPE authz_profile_cache_total counter");
        let _ = writeln!(out, "authz_profile_cache_total{{result=\"hit\"}} {}", snapshot.cache_hits);
        let _ = writeln!(out, "authz_profile_cache_total{{result=\"miss\"}} {}", snapshot.cache_misses);

        let _ = writeln!(out, "# HELP authz_decision_latency_seconds Decision latency over recent requests");
        let _ = writeln!(out, "# TYPE authz_decision_latency_seconds summary");
        for (quantile, ms) in [
            ("0.5", snapshot.latency_p50_ms),
            ("0.9", snapshot.latency_p90_ms),
            ("0.99", snapshot.latency_p99_ms),
        ] {
            let _ = writeln!(
                out,
                "authz_decision_latency_seconds{{quantile=\"{}\"}} {}",
                quantile,
                ms / 1000.0
            );
        }

        out
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        len => sorted[((len as f64 * p) as usize).min(len - 1)],
    }
}
