//! Pass/fail verdict over a final snapshot

use serde::{Deserialize, Serialize};

use crate::metrics::AggregateStats;

/// Default pass threshold, in percent
pub const DEFAULT_THRESHOLD: f64 = 95.0;

/// What a run must achieve to pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictPolicy {
    /// Minimum success rate in percent
    pub success_threshold: f64,

    /// Optional ceiling on p99 latency in milliseconds
    pub max_p99_latency_ms: Option<u64>,
}

impl VerdictPolicy {
    pub fn new(success_threshold: f64) -> Self {
        Self {
            success_threshold,
            max_p99_latency_ms: None,
        }
    }

    pub fn with_latency_ceiling(mut self, max_p99_latency_ms: Option<u64>) -> Self {
        self.max_p99_latency_ms = max_p99_latency_ms;
        self
    }
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Individual check within a verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictCheck {
    pub name: String,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
}

/// Final judgment of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Successful / completed, in percent
    pub success_rate: f64,

    /// Completed requests per elapsed second
    pub requests_per_second: f64,

    pub threshold: f64,
    pub passed: bool,
    pub checks: Vec<VerdictCheck>,
}

impl Verdict {
    /// Process exit code mirroring the verdict
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// Judge a final snapshot. Pure: printing is left to the reporter.
pub fn evaluate(stats: &AggregateStats, policy: &VerdictPolicy) -> Verdict {
    let success_rate = stats.success_rate();
    let elapsed = stats.elapsed.as_secs_f64();
    let requests_per_second = if elapsed > 0.0 {
        stats.completed as f64 / elapsed
    } else {
        0.0
    };

    let mut checks = vec![VerdictCheck {
        name: format!("Success rate >= {}%", policy.success_threshold),
        passed: success_rate >= policy.success_threshold,
        actual: format!("{:.2}%", success_rate),
        expected: format!(">={}%", policy.success_threshold),
    }];

    if let Some(ceiling_ms) = policy.max_p99_latency_ms {
        let ceiling_us = ceiling_ms.saturating_mul(1_000);
        checks.push(VerdictCheck {
            name: format!("Latency p99 <= {}ms", ceiling_ms),
            passed: stats.completed > 0 && stats.latency_p99_us <= ceiling_us,
            actual: format!("{}µs", stats.latency_p99_us),
            expected: format!("<={}µs", ceiling_us),
        });
    }

    Verdict {
        success_rate,
        requests_per_second,
        threshold: policy.success_threshold,
        passed: checks.iter().all(|c| c.passed),
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats(completed: u64, successful: u64, elapsed_secs: u64) -> AggregateStats {
        AggregateStats {
            dispatched: completed,
            completed,
            successful,
            failed: completed - successful,
            elapsed: Duration::from_secs(elapsed_secs),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_snapshot_does_not_divide_by_zero() {
        let verdict = evaluate(&stats(0, 0, 0), &VerdictPolicy::default());
        assert_eq!(verdict.success_rate, 0.0);
        assert_eq!(verdict.requests_per_second, 0.0);
        assert!(!verdict.passed);
        assert_eq!(verdict.exit_code(), 1);
    }

    #[test]
    fn test_pass_at_threshold() {
        let verdict = evaluate(&stats(100, 95, 10), &VerdictPolicy::default());
        assert_eq!(verdict.success_rate, 95.0);
        assert_eq!(verdict.requests_per_second, 10.0);
        assert!(verdict.passed);
        assert_eq!(verdict.exit_code(), 0);
    }

    #[test]
    fn test_fail_below_threshold() {
        let verdict = evaluate(&stats(200, 100, 4), &VerdictPolicy::new(95.0));
        assert_eq!(verdict.success_rate, 50.0);
        assert_eq!(verdict.requests_per_second, 50.0);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_latency_ceiling_check() {
        let mut s = stats(100, 100, 1);
        s.latency_p99_us = 250_000;

        let policy = VerdictPolicy::new(95.0).with_latency_ceiling(Some(200));
        let verdict = evaluate(&s, &policy);
        assert_eq!(verdict.checks.len(), 2);
        assert!(verdict.checks[0].passed);
        assert!(!verdict.checks[1].passed);
        assert!(!verdict.passed);

        let policy = VerdictPolicy::new(95.0).with_latency_ceiling(Some(300));
        assert!(evaluate(&s, &policy).passed);
    }
}
