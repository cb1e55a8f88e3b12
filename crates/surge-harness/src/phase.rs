//! Phase definitions and the phase controller
//!
//! A run walks `Idle → RampUp → Peak → Sustained → Complete`. Every batch of a
//! phase is awaited before the next phase starts; batches inside a phase are
//! separated by the phase's inter-batch delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatcher::{BatchResult, BatchSpec, WorkloadDispatcher};
use crate::error::ConfigError;
use crate::metrics::{AggregateStats, MetricsAggregator};
use crate::report::ProgressReporter;
use crate::shutdown::Shutdown;

// ============================================================================
// PHASES
// ============================================================================

/// Named stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    RampUp,
    Peak,
    Sustained,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 3] = [PhaseKind::RampUp, PhaseKind::Peak, PhaseKind::Sustained];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RampUp => "ramp-up",
            Self::Peak => "peak",
            Self::Sustained => "sustained",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load parameters for one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Number of batches
    pub batches: u32,

    /// Concurrent users per batch
    pub users_per_batch: usize,

    /// Sequential requests per user
    pub iterations_per_user: u32,

    /// Pause between batches in milliseconds
    #[serde(default)]
    pub inter_batch_delay_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Phase {
    pub fn new(batches: u32, users_per_batch: usize, iterations_per_user: u32) -> Self {
        Self {
            batches,
            users_per_batch,
            iterations_per_user,
            inter_batch_delay_ms: 0,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.inter_batch_delay_ms = delay_ms;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Requests issued by one full batch, saturating at `u64::MAX`
    pub fn requests_per_batch(&self) -> u64 {
        (self.users_per_batch as u64).saturating_mul(u64::from(self.iterations_per_user))
    }

    /// Requests issued by the whole phase, saturating at `u64::MAX`
    pub fn total_requests(&self) -> u64 {
        self.checked_total_requests().unwrap_or(u64::MAX)
    }

    /// Requests issued by the whole phase, `None` if the count overflows
    pub fn checked_total_requests(&self) -> Option<u64> {
        u64::try_from(self.users_per_batch)
            .ok()?
            .checked_mul(u64::from(self.iterations_per_user))?
            .checked_mul(u64::from(self.batches))
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self, kind: PhaseKind) -> Result<(), ConfigError> {
        if self.batches == 0 {
            return Ok(());
        }
        let phase = kind.to_string();
        if self.users_per_batch == 0 {
            return Err(ConfigError::ZeroUsers { phase });
        }
        if self.iterations_per_user == 0 {
            return Err(ConfigError::ZeroIterations { phase });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout { phase });
        }
        if self.checked_total_requests().is_none() {
            return Err(ConfigError::PhaseTooLarge { phase });
        }
        Ok(())
    }
}

/// The three phases of a run, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPlan {
    pub ramp_up: Phase,
    pub peak: Phase,
    pub sustained: Phase,
}

impl LoadPlan {
    pub fn phase(&self, kind: PhaseKind) -> &Phase {
        match kind {
            PhaseKind::RampUp => &self.ramp_up,
            PhaseKind::Peak => &self.peak,
            PhaseKind::Sustained => &self.sustained,
        }
    }

    /// Requests the plan would issue ignoring any budget, saturating at `u64::MAX`
    pub fn total_requests(&self) -> u64 {
        self.checked_total_requests().unwrap_or(u64::MAX)
    }

    fn checked_total_requests(&self) -> Option<u64> {
        PhaseKind::ALL.iter().try_fold(0u64, |sum, kind| {
            sum.checked_add(self.phase(*kind).checked_total_requests()?)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in PhaseKind::ALL {
            self.phase(kind).validate(kind)?;
        }
        if self.checked_total_requests().is_none() {
            return Err(ConfigError::PlanTooLarge);
        }
        Ok(())
    }
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self {
            ramp_up: Phase::new(10, 20, 1).with_delay(200),
            peak: Phase::new(30, 50, 2).with_delay(100),
            sustained: Phase::new(20, 50, 5).with_delay(50),
        }
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Idle,
    RampUp,
    Peak,
    Sustained,
    Complete,
}

impl From<PhaseKind> for PhaseState {
    fn from(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::RampUp => Self::RampUp,
            PhaseKind::Peak => Self::Peak,
            PhaseKind::Sustained => Self::Sustained,
        }
    }
}

/// Progress after one settled batch
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub phase: PhaseKind,

    /// 1-based batch number within the phase
    pub batch: u32,
    pub batches: u32,

    /// Requests the whole run is expected to issue
    pub planned_total: u64,
    pub result: BatchResult,
    pub stats: AggregateStats,
}

impl BatchProgress {
    pub fn percent_complete(&self) -> f64 {
        if self.planned_total == 0 {
            100.0
        } else {
            (self.stats.completed as f64 / self.planned_total as f64 * 100.0).min(100.0)
        }
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final aggregate snapshot
    pub stats: AggregateStats,

    /// Stopped early by a shutdown request
    pub interrupted: bool,

    /// Stopped early because the request budget ran out
    pub budget_exhausted: bool,

    /// Requests the plan expected to issue
    pub planned_total: u64,
}

/// Drives the dispatcher through the phases of a plan
pub struct PhaseController {
    dispatcher: WorkloadDispatcher,
    metrics: Arc<MetricsAggregator>,
    plan: LoadPlan,
    max_requests: Option<u64>,
    shutdown: Shutdown,
    reporter: Option<Arc<dyn ProgressReporter>>,
    state: PhaseState,
}

impl PhaseController {
    pub fn new(
        dispatcher: WorkloadDispatcher,
        metrics: Arc<MetricsAggregator>,
        plan: LoadPlan,
    ) -> Self {
        Self {
            dispatcher,
            metrics,
            plan,
            max_requests: None,
            shutdown: Shutdown::new(),
            reporter: None,
            state: PhaseState::Idle,
        }
    }

    /// Cap the run at `max_requests` dispatched requests
    pub fn with_budget(mut self, max_requests: Option<u64>) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    /// Requests the run is expected to issue
    pub fn planned_total(&self) -> u64 {
        let total = self.plan.total_requests();
        self.max_requests.map_or(total, |max| max.min(total))
    }

    fn transition(&mut self, next: PhaseState) {
        debug!("Phase controller: {:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(reporter) = &self.reporter {
            reporter.on_state(next);
        }
    }

    fn remaining_budget(&self) -> Option<u64> {
        self.max_requests
            .map(|max| max.saturating_sub(self.metrics.snapshot().dispatched))
    }

    /// Run every phase in order and return the final snapshot
    pub async fn run(&mut self) -> RunOutcome {
        let planned_total = self.planned_total();
        let mut interrupted = false;
        let mut budget_exhausted = false;

        info!(
            "Starting load run against {}: {} requests planned",
            self.dispatcher.target().base_url(),
            planned_total
        );

        'phases: for kind in PhaseKind::ALL {
            self.transition(kind.into());
            let phase = self.plan.phase(kind).clone();

            if phase.batches == 0 {
                info!("Phase {} has no batches, skipping", kind);
                continue;
            }

            info!(
                "Phase {}: {} batches x {} users x {} iterations, {}ms between batches",
                kind,
                phase.batches,
                phase.users_per_batch,
                phase.iterations_per_user,
                phase.inter_batch_delay_ms
            );

            for batch in 1..=phase.batches {
                if self.shutdown.is_triggered() {
                    interrupted = true;
                    break 'phases;
                }

                let budget = self.remaining_budget();
                if budget == Some(0) {
                    warn!("Request budget exhausted during phase {}, stopping dispatch", kind);
                    budget_exhausted = true;
                    break 'phases;
                }

                let spec = BatchSpec {
                    phase: kind,
                    width: phase.users_per_batch,
                    iterations: phase.iterations_per_user,
                    timeout: phase.timeout(),
                    budget,
                };
                let result = self.dispatcher.run_batch(&spec).await;

                if let Some(reporter) = &self.reporter {
                    reporter.on_batch(&BatchProgress {
                        phase: kind,
                        batch,
                        batches: phase.batches,
                        planned_total,
                        result,
                        stats: self.metrics.snapshot(),
                    });
                }

                if batch < phase.batches && !phase.inter_batch_delay().is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(phase.inter_batch_delay()) => {}
                        _ = self.shutdown.wait() => {}
                    }
                }
            }

            info!("Phase {} complete", kind);
        }

        if interrupted {
            warn!("Run interrupted, no further batches dispatched");
        }
        self.transition(PhaseState::Complete);

        RunOutcome {
            stats: self.metrics.snapshot(),
            interrupted,
            budget_exhausted,
            planned_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{OutcomeKind, RequestExecutor, RequestOutcome};
    use crate::metrics::OutcomeSink;
    use crate::selector::{EndpointSelector, Target};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct OkExecutor;

    #[async_trait]
    impl RequestExecutor for OkExecutor {
        async fn execute(&self, _: &Target, path: &str, _: Duration) -> RequestOutcome {
            tokio::time::sleep(Duration::from_millis(1)).await;
            RequestOutcome::new(path, OutcomeKind::Success(200), Duration::from_millis(1))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl RequestExecutor for SlowExecutor {
        async fn execute(&self, _: &Target, path: &str, _: Duration) -> RequestOutcome {
            tokio::time::sleep(Duration::from_millis(200)).await;
            RequestOutcome::new(path, OutcomeKind::Success(200), Duration::from_millis(200))
        }
    }

    /// Forwards to the aggregator and keeps arrival order by phase
    struct RecordingSink {
        metrics: Arc<MetricsAggregator>,
        arrivals: Mutex<Vec<PhaseKind>>,
    }

    impl OutcomeSink for RecordingSink {
        fn dispatched(&self, phase: PhaseKind) {
            self.metrics.begin(phase);
        }

        fn record(&self, phase: PhaseKind, outcome: RequestOutcome) {
            self.arrivals.lock().push(phase);
            self.metrics.record(phase, &outcome);
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        states: Mutex<Vec<PhaseState>>,
        batches: Mutex<Vec<(PhaseKind, u32, u64)>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn on_state(&self, state: PhaseState) {
            self.states.lock().push(state);
        }

        fn on_batch(&self, progress: &BatchProgress) {
            self.batches
                .lock()
                .push((progress.phase, progress.batch, progress.stats.in_flight()));
        }
    }

    fn controller(
        plan: LoadPlan,
        sink: Arc<dyn OutcomeSink>,
        metrics: Arc<MetricsAggregator>,
    ) -> PhaseController {
        controller_with(Arc::new(OkExecutor), plan, sink, metrics)
    }

    fn controller_with(
        executor: Arc<dyn RequestExecutor>,
        plan: LoadPlan,
        sink: Arc<dyn OutcomeSink>,
        metrics: Arc<MetricsAggregator>,
    ) -> PhaseController {
        let dispatcher = WorkloadDispatcher::new(
            executor,
            sink,
            Target::new("127.0.0.1", 8080),
            EndpointSelector::uniform(vec!["/health".into()]).unwrap(),
        );
        PhaseController::new(dispatcher, metrics, plan)
    }

    fn small_plan() -> LoadPlan {
        LoadPlan {
            ramp_up: Phase::new(2, 3, 1).with_delay(5),
            peak: Phase::new(2, 4, 2).with_delay(2),
            sustained: Phase::new(1, 5, 3),
        }
    }

    #[test]
    fn test_plan_totals() {
        let plan = small_plan();
        assert_eq!(plan.ramp_up.total_requests(), 6);
        assert_eq!(plan.peak.total_requests(), 16);
        assert_eq!(plan.sustained.total_requests(), 15);
        assert_eq!(plan.total_requests(), 37);
    }

    #[test]
    fn test_phase_validation() {
        assert!(Phase::new(0, 0, 0).validate(PhaseKind::Peak).is_ok());
        assert_eq!(
            Phase::new(1, 0, 1).validate(PhaseKind::Peak),
            Err(ConfigError::ZeroUsers {
                phase: "peak".into()
            })
        );
        assert_eq!(
            Phase::new(1, 2, 0).validate(PhaseKind::RampUp),
            Err(ConfigError::ZeroIterations {
                phase: "ramp-up".into()
            })
        );
        assert_eq!(
            Phase::new(1, 2, 1).with_timeout(0).validate(PhaseKind::Sustained),
            Err(ConfigError::ZeroTimeout {
                phase: "sustained".into()
            })
        );
    }

    #[test]
    fn test_oversized_plans_are_rejected() {
        let huge = Phase::new(u32::MAX, 1_000_000_000, 10);
        assert_eq!(huge.checked_total_requests(), None);
        assert_eq!(huge.total_requests(), u64::MAX);
        assert_eq!(
            huge.validate(PhaseKind::Sustained),
            Err(ConfigError::PhaseTooLarge {
                phase: "sustained".into()
            })
        );

        // Each phase fits on its own, the sum does not
        let half = Phase::new(u32::MAX, 1 << 31, 2);
        assert!(half.validate(PhaseKind::Peak).is_ok());
        let plan = LoadPlan {
            ramp_up: half.clone(),
            peak: half.clone(),
            sustained: half,
        };
        assert_eq!(plan.validate(), Err(ConfigError::PlanTooLarge));
        assert_eq!(plan.total_requests(), u64::MAX);
    }

    #[tokio::test]
    async fn test_runs_phases_in_order() {
        let metrics = Arc::new(MetricsAggregator::new());
        let sink = Arc::new(RecordingSink {
            metrics: metrics.clone(),
            arrivals: Mutex::new(Vec::new()),
        });
        let reporter = Arc::new(RecordingReporter::default());
        let mut controller =
            controller(small_plan(), sink.clone(), metrics.clone()).with_reporter(reporter.clone());

        assert_eq!(controller.state(), PhaseState::Idle);
        let outcome = controller.run().await;
        assert_eq!(controller.state(), PhaseState::Complete);

        assert_eq!(
            *reporter.states.lock(),
            vec![
                PhaseState::RampUp,
                PhaseState::Peak,
                PhaseState::Sustained,
                PhaseState::Complete
            ]
        );

        let arrivals = sink.arrivals.lock().clone();
        assert_eq!(arrivals.len(), 37);
        let mut sorted = arrivals.clone();
        sorted.sort();
        assert_eq!(arrivals, sorted, "an outcome crossed a phase boundary");

        assert!(!outcome.interrupted);
        assert_eq!(outcome.stats.completed, 37);
        assert_eq!(outcome.stats.phase(PhaseKind::Peak).completed, 16);

        let batches = reporter.batches.lock().clone();
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|(_, _, in_flight)| *in_flight == 0));
    }

    #[tokio::test]
    async fn test_zero_batch_phase_is_skipped() {
        let metrics = Arc::new(MetricsAggregator::new());
        let plan = LoadPlan {
            ramp_up: Phase::new(0, 0, 0),
            peak: Phase::new(1, 2, 2),
            sustained: Phase::new(0, 10, 10),
        };
        let reporter = Arc::new(RecordingReporter::default());
        let mut controller =
            controller(plan, metrics.clone(), metrics.clone()).with_reporter(reporter.clone());

        let outcome = controller.run().await;
        assert_eq!(outcome.stats.completed, 4);
        assert_eq!(reporter.states.lock().len(), 4);
        assert_eq!(reporter.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_budget_stops_dispatch() {
        let metrics = Arc::new(MetricsAggregator::new());
        let mut controller =
            controller(small_plan(), metrics.clone(), metrics.clone()).with_budget(Some(10));

        assert_eq!(controller.planned_total(), 10);
        let outcome = controller.run().await;

        assert!(outcome.budget_exhausted);
        assert_eq!(outcome.stats.dispatched, 10);
        assert_eq!(outcome.stats.completed, 10);
        assert_eq!(outcome.stats.phase(PhaseKind::RampUp).completed, 6);
        assert_eq!(outcome.stats.phase(PhaseKind::Peak).completed, 4);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_dispatches_nothing() {
        let metrics = Arc::new(MetricsAggregator::new());
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut controller =
            controller(small_plan(), metrics.clone(), metrics.clone()).with_shutdown(shutdown);

        let outcome = controller.run().await;
        assert!(outcome.interrupted);
        assert_eq!(outcome.stats.dispatched, 0);
        assert_eq!(controller.state(), PhaseState::Complete);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_inter_batch_delay() {
        let metrics = Arc::new(MetricsAggregator::new());
        let shutdown = Shutdown::new();
        let plan = LoadPlan {
            ramp_up: Phase::new(3, 2, 1).with_delay(60_000),
            peak: Phase::new(1, 2, 1),
            sustained: Phase::new(1, 2, 1),
        };
        let mut controller = controller(plan, metrics.clone(), metrics.clone())
            .with_shutdown(shutdown.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), controller.run())
            .await
            .expect("shutdown should cut the delay short");
        trigger.await.unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.stats.completed, 2);
        assert_eq!(outcome.stats.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_mid_batch_drains_in_flight_requests() {
        let metrics = Arc::new(MetricsAggregator::new());
        let shutdown = Shutdown::new();
        let reporter = Arc::new(RecordingReporter::default());
        let plan = LoadPlan {
            ramp_up: Phase::new(3, 4, 2),
            peak: Phase::new(1, 2, 1),
            sustained: Phase::new(1, 2, 1),
        };
        let mut controller =
            controller_with(Arc::new(SlowExecutor), plan, metrics.clone(), metrics.clone())
                .with_shutdown(shutdown.clone())
                .with_reporter(reporter.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.trigger();
        });

        let outcome = controller.run().await;
        trigger.await.unwrap();

        // The batch running at the trigger settles in full, nothing after it starts
        assert!(outcome.interrupted);
        assert_eq!(outcome.stats.dispatched, 8);
        assert_eq!(outcome.stats.completed, 8);
        assert_eq!(outcome.stats.successful, 8);
        assert_eq!(outcome.stats.in_flight(), 0);
        assert_eq!(outcome.stats.phase(PhaseKind::RampUp).completed, 8);
        assert_eq!(outcome.stats.phase(PhaseKind::Peak).dispatched, 0);
        assert_eq!(outcome.stats.phase(PhaseKind::Sustained).dispatched, 0);
        assert_eq!(reporter.batches.lock().len(), 1);
        assert_eq!(controller.state(), PhaseState::Complete);
    }
}
