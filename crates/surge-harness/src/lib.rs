//! # Surge Load Harness
//!
//! Phased load generation and health validation for clusters of HTTP services.
//!
//! ## Features
//!
//! - **Phased Load**: ramp-up, peak and sustained phases of concurrent batches
//! - **Bounded Concurrency**: every batch is joined before the next one starts
//! - **Streaming Statistics**: counters, min/mean/max and HDR quantiles in O(1) memory
//! - **Verdict**: success-rate threshold gate with an optional p99 latency ceiling
//! - **Reports**: console summary, JSON report and Prometheus text export
//!
//! ## Usage
//!
//! ```bash
//! # Default three-phase run against a local service
//! cargo run --package surge-harness -- --host 127.0.0.1 --port 8093
//!
//! # Weighted endpoints, capped at 5000 requests, stricter gate
//! cargo run --package surge-harness -- --endpoint /health@3 --endpoint /status@1 \
//!     --max-requests 5000 --threshold 99
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod phase;
pub mod report;
pub mod selector;
pub mod shutdown;
pub mod verdict;

use std::sync::Arc;

use tracing::info;

pub use config::HarnessConfig;
pub use dispatcher::{BatchResult, BatchSpec, WorkloadDispatcher};
pub use error::{ConfigError, HarnessError, Result};
pub use executor::{HttpExecutor, OutcomeKind, RequestExecutor, RequestOutcome};
pub use metrics::{AggregateStats, MetricsAggregator, OutcomeSink, PhaseStats};
pub use phase::{LoadPlan, Phase, PhaseController, PhaseKind, PhaseState, RunOutcome};
pub use report::{ConsoleReporter, ProgressReporter, RunReport};
pub use selector::{EndpointSelector, Target};
pub use shutdown::Shutdown;
pub use verdict::{evaluate, Verdict, VerdictPolicy};

// ============================================================================
// LOAD RUNNER
// ============================================================================

/// Wires configuration, executor and aggregator into one run
pub struct LoadRunner {
    config: HarnessConfig,
    executor: Arc<dyn RequestExecutor>,
    shutdown: Shutdown,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl LoadRunner {
    /// Validate `config` and prepare a runner issuing real HTTP requests
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let executor = Arc::new(HttpExecutor::new()?);
        Self::with_executor(config, executor)
    }

    /// Validate `config` and prepare a runner over a custom executor
    pub fn with_executor(
        config: HarnessConfig,
        executor: Arc<dyn RequestExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            shutdown: Shutdown::new(),
            reporter: None,
        })
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every phase, then judge the final snapshot
    pub async fn run(self) -> Result<RunReport> {
        let metrics = Arc::new(MetricsAggregator::new());
        let target = self.config.target();

        let dispatcher = WorkloadDispatcher::new(
            self.executor.clone(),
            metrics.clone(),
            target.clone(),
            self.config.selector()?,
        )
        .with_seed(self.config.seed);

        let mut controller = PhaseController::new(dispatcher, metrics, self.config.phases.clone())
            .with_budget(self.config.max_requests)
            .with_shutdown(self.shutdown.clone());
        if let Some(reporter) = &self.reporter {
            controller = controller.with_reporter(reporter.clone());
        }

        let outcome = controller.run().await;
        let verdict = evaluate(&outcome.stats, &self.config.policy());

        info!(
            "Load run finished: {} requests, {:.2}% success, {:.2} req/s, verdict {}",
            outcome.stats.completed,
            verdict.success_rate,
            verdict.requests_per_second,
            if verdict.passed { "PASS" } else { "FAIL" }
        );

        Ok(RunReport::new(target, outcome, verdict))
    }
}
