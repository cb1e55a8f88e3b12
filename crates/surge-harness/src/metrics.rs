//! Streaming metrics aggregation
//!
//! Every request outcome passes through [`MetricsAggregator::record`] exactly
//! once. Counters, latency extremes, the latency sum and the quantile
//! histogram all live behind one lock, so a [`MetricsAggregator::snapshot`]
//! never observes a half-applied record.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::executor::RequestOutcome;
use crate::phase::PhaseKind;

/// Highest latency tracked by the histogram: 60s in microseconds
const HISTOGRAM_MAX_US: u64 = 60_000_000;

/// Receives dispatch notifications and outcomes from the dispatcher
pub trait OutcomeSink: Send + Sync {
    /// A request is about to be sent
    fn dispatched(&self, phase: PhaseKind);

    /// A request reached its terminal event
    fn record(&self, phase: PhaseKind, outcome: RequestOutcome);
}

/// Counters scoped to a single phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub dispatched: u64,
    pub completed: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Consistent copy of the aggregate at one instant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Requests handed to an executor
    pub dispatched: u64,

    /// Requests that reached a terminal event
    pub completed: u64,

    /// Completed with a 2xx status
    pub successful: u64,

    /// Completed any other way
    pub failed: u64,

    /// Fastest completed request (microseconds)
    pub latency_min_us: Option<u64>,

    /// Slowest completed request (microseconds)
    pub latency_max_us: Option<u64>,

    /// Sum of all completed latencies (microseconds)
    pub latency_sum_us: u64,

    pub latency_p50_us: u64,
    pub latency_p90_us: u64,
    pub latency_p99_us: u64,

    /// Response body bytes drained
    pub bytes_received: u64,

    /// Failures by kind
    pub errors: BTreeMap<String, u64>,

    /// Responses by HTTP status
    pub status_codes: BTreeMap<u16, u64>,

    /// Per-phase sub-counts
    pub phases: BTreeMap<PhaseKind, PhaseStats>,

    /// Time since the aggregator was created
    pub elapsed: Duration,
}

impl AggregateStats {
    /// Requests dispatched but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed)
    }

    /// Mean latency in microseconds, `None` before the first record
    pub fn latency_mean_us(&self) -> Option<f64> {
        if self.completed == 0 {
            None
        } else {
            Some(self.latency_sum_us as f64 / self.completed as f64)
        }
    }

    /// Running success percentage, 0 when nothing has completed
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.successful as f64 / self.completed as f64 * 100.0
        }
    }

    pub fn phase(&self, phase: PhaseKind) -> PhaseStats {
        self.phases.get(&phase).cloned().unwrap_or_default()
    }
}

struct AggregateState {
    stats: AggregateStats,
    histogram: Histogram<u64>,
}

/// Sole owner and mutator of the run's aggregate statistics
pub struct MetricsAggregator {
    state: Mutex<AggregateState>,
    started: Instant,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        // 1µs to 60s
        let histogram = Histogram::new_with_bounds(1, HISTOGRAM_MAX_US, 3)
            .expect("constant histogram bounds are valid");
        Self {
            state: Mutex::new(AggregateState {
                stats: AggregateStats::default(),
                histogram,
            }),
            started: Instant::now(),
        }
    }

    /// Count one request as dispatched
    pub fn begin(&self, phase: PhaseKind) {
        let mut state = self.state.lock();
        state.stats.dispatched += 1;
        state.stats.phases.entry(phase).or_default().dispatched += 1;
    }

    /// Fold one outcome into the aggregate
    pub fn record(&self, phase: PhaseKind, outcome: &RequestOutcome) {
        let latency_us = outcome.latency_us();
        let mut state = self.state.lock();
        let AggregateState { stats, histogram } = &mut *state;

        stats.completed += 1;
        let phase_stats = stats.phases.entry(phase).or_default();
        phase_stats.completed += 1;
        if outcome.is_success() {
            stats.successful += 1;
            phase_stats.successful += 1;
        } else {
            stats.failed += 1;
            phase_stats.failed += 1;
        }

        if let Some(label) = outcome.kind.failure_label() {
            *stats.errors.entry(label.to_string()).or_insert(0) += 1;
        }
        if let Some(status) = outcome.kind.status() {
            *stats.status_codes.entry(status).or_insert(0) += 1;
        }

        stats.latency_min_us = Some(stats.latency_min_us.map_or(latency_us, |m| m.min(latency_us)));
        stats.latency_max_us = Some(stats.latency_max_us.map_or(latency_us, |m| m.max(latency_us)));
        stats.latency_sum_us = stats.latency_sum_us.saturating_add(latency_us);
        stats.bytes_received += outcome.bytes_received;

        let clamped = latency_us.clamp(1, HISTOGRAM_MAX_US);
        if let Err(e) = histogram.record(clamped) {
            warn!("Failed to record latency: {}", e);
        }
    }

    /// Read-only copy of the aggregate at this instant
    pub fn snapshot(&self) -> AggregateStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        if !state.histogram.is_empty() {
            stats.latency_p50_us = state.histogram.value_at_quantile(0.50);
            stats.latency_p90_us = state.histogram.value_at_quantile(0.90);
            stats.latency_p99_us = state.histogram.value_at_quantile(0.99);
        }
        stats.elapsed = self.started.elapsed();
        stats
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSink for MetricsAggregator {
    fn dispatched(&self, phase: PhaseKind) {
        self.begin(phase);
    }

    fn record(&self, phase: PhaseKind, outcome: RequestOutcome) {
        MetricsAggregator::record(self, phase, &outcome);
    }
}
