//! Progress lines, final summary and report exports

use std::path::Path;

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::AggregateStats;
use crate::phase::{BatchProgress, PhaseKind, PhaseState, RunOutcome};
use crate::selector::Target;
use crate::verdict::Verdict;

/// Observer called by the phase controller between batches
pub trait ProgressReporter: Send + Sync {
    /// Controller entered a new state
    fn on_state(&self, _state: PhaseState) {}

    /// A batch settled
    fn on_batch(&self, progress: &BatchProgress);
}

/// Prints one progress line per batch
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_state(&self, state: PhaseState) {
        match state {
            PhaseState::Idle => {}
            PhaseState::Complete => println!("── all phases complete"),
            other => println!("── entering {:?}", other),
        }
    }

    fn on_batch(&self, progress: &BatchProgress) {
        println!("{}", progress_line(progress));
    }
}

/// Single-line progress summary
pub fn progress_line(progress: &BatchProgress) -> String {
    let stats = &progress.stats;
    let position = format!(
        "[{:<9} {:>3}/{:<3}]",
        progress.phase.as_str(),
        progress.batch,
        progress.batches
    );
    format!(
        "{} {:>6.2}% | {}/{} requests | success {:>6.2}% | avg {:>8.2}ms | in-flight {}",
        position,
        progress.percent_complete(),
        stats.completed,
        progress.planned_total,
        stats.success_rate(),
        stats.latency_mean_us().unwrap_or(0.0) / 1_000.0,
        stats.in_flight()
    )
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub target: Target,
    pub finished_at: DateTime<Utc>,
    pub planned_requests: u64,
    pub interrupted: bool,
    pub budget_exhausted: bool,
    pub stats: AggregateStats,
    pub verdict: Verdict,
}

impl RunReport {
    pub fn new(target: Target, outcome: RunOutcome, verdict: Verdict) -> Self {
        Self {
            target,
            finished_at: Utc::now(),
            planned_requests: outcome.planned_total,
            interrupted: outcome.interrupted,
            budget_exhausted: outcome.budget_exhausted,
            stats: outcome.stats,
            verdict,
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write the final counters in Prometheus text format
    pub fn write_prometheus(&self, path: &Path) -> Result<()> {
        std::fs::write(path, render_prometheus(&self.stats, &self.verdict)?)?;
        Ok(())
    }

    /// Print formatted report
    pub fn print_summary(&self) {
        let s = &self.stats;
        let ms = |us: Option<u64>| us.unwrap_or(0) as f64 / 1_000.0;

        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                 SURGE LOAD TEST RESULTS                      ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Target:            {:<42}║", self.target.base_url());
        println!(
            "║ Duration:          {:>10.2} seconds                        ║",
            s.elapsed.as_secs_f64()
        );
        println!("║ Total Requests:    {:>10}                                 ║", s.completed);
        println!("║ Successful:        {:>10}                                 ║", s.successful);
        println!("║ Failed:            {:>10}                                 ║", s.failed);
        println!(
            "║ Success Rate:      {:>10.2}%                                ║",
            self.verdict.success_rate
        );
        println!(
            "║ Requests/sec:      {:>10.2}                                 ║",
            self.verdict.requests_per_second
        );
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ LATENCY (milliseconds)                                       ║");
        println!(
            "║   min:             {:>10.2}                                 ║",
            ms(s.latency_min_us)
        );
        println!(
            "║   avg:             {:>10.2}                                 ║",
            s.latency_mean_us().unwrap_or(0.0) / 1_000.0
        );
        println!(
            "║   max:             {:>10.2}                                 ║",
            ms(s.latency_max_us)
        );
        println!(
            "║   p50:             {:>10.2}                                 ║",
            ms(Some(s.latency_p50_us))
        );
        println!(
            "║   p99:             {:>10.2}                                 ║",
            ms(Some(s.latency_p99_us))
        );

        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ PHASES                                                       ║");
        for kind in PhaseKind::ALL {
            let p = s.phase(kind);
            println!(
                "║   {:<10} {:>8} ok {:>8} failed {:>8} dispatched     ║",
                kind.as_str(),
                p.successful,
                p.failed,
                p.dispatched
            );
        }

        if !s.errors.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ ERRORS                                                       ║");
            for (kind, count) in &s.errors {
                println!("║   {:20}: {:>10}                         ║", kind, count);
            }
        }

        println!("╠══════════════════════════════════════════════════════════════╣");
        for check in &self.verdict.checks {
            let status = if check.passed { "✅ PASS" } else { "❌ FAIL" };
            println!("║ {:<30} {:<8} actual {:<14}  ║", check.name, status, check.actual);
        }
        if self.interrupted {
            println!("║ Run was interrupted before all phases completed              ║");
        }
        let overall = if self.verdict.passed {
            "✅ LOAD TEST PASSED"
        } else {
            "❌ LOAD TEST FAILED"
        };
        println!("║ VERDICT: {:<52}║", overall);
        println!("╚══════════════════════════════════════════════════════════════╝\n");
    }
}

/// Render final counters as Prometheus exposition text
pub fn render_prometheus(stats: &AggregateStats, verdict: &Verdict) -> Result<String> {
    let registry = Registry::new();

    let requests = IntCounterVec::new(
        Opts::new("surge_requests_total", "Completed requests by result"),
        &["result"],
    )?;
    let errors = IntCounterVec::new(
        Opts::new("surge_request_errors_total", "Failed requests by failure kind"),
        &["kind"],
    )?;
    let dispatched = IntCounter::new("surge_requests_dispatched_total", "Dispatched requests")?;
    let success_rate = Gauge::new("surge_success_rate_percent", "Final success rate")?;
    let rps = Gauge::new("surge_requests_per_second", "Completed requests per second")?;
    let latency = prometheus::GaugeVec::new(
        Opts::new("surge_latency_microseconds", "Request latency summary"),
        &["stat"],
    )?;
    let passed = Gauge::new("surge_verdict_passed", "1 when the run passed")?;

    registry.register(Box::new(requests.clone()))?;
    registry.register(Box::new(errors.clone()))?;
    registry.register(Box::new(dispatched.clone()))?;
    registry.register(Box::new(success_rate.clone()))?;
    registry.register(Box::new(rps.clone()))?;
    registry.register(Box::new(latency.clone()))?;
    registry.register(Box::new(passed.clone()))?;

    requests.with_label_values(&["success"]).inc_by(stats.successful);
    requests.with_label_values(&["failure"]).inc_by(stats.failed);
    for (kind, count) in &stats.errors {
        errors.with_label_values(&[kind.as_str()]).inc_by(*count);
    }
    dispatched.inc_by(stats.dispatched);
    success_rate.set(verdict.success_rate);
    rps.set(verdict.requests_per_second);
    latency
        .with_label_values(&["min"])
        .set(stats.latency_min_us.unwrap_or(0) as f64);
    latency
        .with_label_values(&["mean"])
        .set(stats.latency_mean_us().unwrap_or(0.0));
    latency
        .with_label_values(&["max"])
        .set(stats.latency_max_us.unwrap_or(0) as f64);
    latency.with_label_values(&["p99"]).set(stats.latency_p99_us as f64);
    passed.set(if verdict.passed { 1.0 } else { 0.0 });

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::BatchResult;
    use crate::verdict::{evaluate, VerdictPolicy};
    use std::time::Duration;

    fn sample_stats() -> AggregateStats {
        let mut stats = AggregateStats {
            dispatched: 12,
            completed: 10,
            successful: 8,
            failed: 2,
            latency_min_us: Some(1_000),
            latency_max_us: Some(9_000),
            latency_sum_us: 40_000,
            latency_p99_us: 9_000,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        stats.errors.insert("timeout".into(), 2);
        stats
    }

    #[test]
    fn test_progress_line_contents() {
        let progress = BatchProgress {
            phase: PhaseKind::Peak,
            batch: 3,
            batches: 30,
            planned_total: 40,
            result: BatchResult::default(),
            stats: sample_stats(),
        };
        let line = progress_line(&progress);

        assert!(line.contains("peak"));
        assert!(line.contains("3/30"));
        assert!(line.contains("25.00%"));
        assert!(line.contains("10/40 requests"));
        assert!(line.contains("success  80.00%"));
        assert!(line.contains("avg     4.00ms"));
        assert!(line.contains("in-flight 2"));
    }

    #[test]
    fn test_prometheus_rendering() {
        let stats = sample_stats();
        let verdict = evaluate(&stats, &VerdictPolicy::default());
        let text = render_prometheus(&stats, &verdict).unwrap();

        assert!(text.contains("surge_requests_total{result=\"success\"} 8"));
        assert!(text.contains("surge_requests_total{result=\"failure\"} 2"));
        assert!(text.contains("surge_request_errors_total{kind=\"timeout\"} 2"));
        assert!(text.contains("surge_requests_dispatched_total 12"));
        assert!(text.contains("surge_verdict_passed 0"));
    }

    #[test]
    fn test_json_report_written() {
        let stats = sample_stats();
        let verdict = evaluate(&stats, &VerdictPolicy::default());
        let outcome = RunOutcome {
            stats,
            interrupted: false,
            budget_exhausted: false,
            planned_total: 12,
        };
        let report = RunReport::new(Target::new("localhost", 8080), outcome, verdict);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["stats"]["completed"], 10);
        assert_eq!(value["verdict"]["passed"], false);
        assert_eq!(value["target"]["port"], 8080);
    }
}
