//! Batch dispatch
//!
//! A batch spawns one task per simulated user, each issuing its requests
//! sequentially, and returns only after every task has finished. Concurrency
//! is therefore capped at the batch width no matter how long the run is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::executor::{OutcomeKind, RequestExecutor, RequestOutcome};
use crate::metrics::OutcomeSink;
use crate::phase::PhaseKind;
use crate::selector::{EndpointSelector, Target};

/// Parameters for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSpec {
    /// Phase the batch belongs to
    pub phase: PhaseKind,

    /// Concurrent users
    pub width: usize,

    /// Sequential requests per user
    pub iterations: u32,

    /// Per-request timeout
    pub timeout: Duration,

    /// Requests still allowed by a global budget, if any
    pub budget: Option<u64>,
}

/// Settled batch totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Streams actually launched after budget clamping
    pub streams: usize,
    pub dispatched: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Running totals shared by every stream of a batch
#[derive(Debug, Default)]
struct BatchTally {
    dispatched: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl BatchTally {
    fn result(&self, streams: usize) -> BatchResult {
        BatchResult {
            streams,
            dispatched: self.dispatched.load(Ordering::Acquire),
            successful: self.successful.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

/// A request that has been counted as dispatched but not yet recorded.
///
/// Dropping it unsettled (its stream panicked or was cancelled) records the
/// request as aborted, so `dispatched` and `completed` always reconcile.
struct InFlight<'a> {
    sink: &'a dyn OutcomeSink,
    tally: &'a BatchTally,
    phase: PhaseKind,
    path: &'a str,
    started: Instant,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn begin(
        sink: &'a dyn OutcomeSink,
        tally: &'a BatchTally,
        phase: PhaseKind,
        path: &'a str,
    ) -> Self {
        sink.dispatched(phase);
        tally.dispatched.fetch_add(1, Ordering::AcqRel);
        Self {
            sink,
            tally,
            phase,
            path,
            started: Instant::now(),
            settled: false,
        }
    }

    fn settle(mut self, outcome: RequestOutcome) {
        self.settled = true;
        self.finish(outcome);
    }

    fn finish(&self, outcome: RequestOutcome) {
        let counter = if outcome.is_success() {
            &self.tally.successful
        } else {
            &self.tally.failed
        };
        counter.fetch_add(1, Ordering::AcqRel);
        self.sink.record(self.phase, outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let outcome =
                RequestOutcome::new(self.path, OutcomeKind::Aborted, self.started.elapsed());
            self.finish(outcome);
        }
    }
}

/// Split a batch into per-stream iteration counts without exceeding `budget`.
///
/// Streams keep the full iteration count; only the last one may be shortened.
pub fn plan_streams(width: usize, iterations: u32, budget: Option<u64>) -> Vec<u32> {
    let per_stream = u64::from(iterations);
    let full = (width as u64).saturating_mul(per_stream);
    let mut left = budget.map_or(full, |b| b.min(full));
    if left == 0 {
        return Vec::new();
    }

    let mut plan = Vec::with_capacity(usize::try_from(left.div_ceil(per_stream)).unwrap_or(0));
    while left > 0 {
        let n = left.min(per_stream);
        plan.push(n as u32);
        left -= n;
    }
    plan
}

/// Fires batches of concurrent request streams
pub struct WorkloadDispatcher {
    executor: Arc<dyn RequestExecutor>,
    sink: Arc<dyn OutcomeSink>,
    target: Arc<Target>,
    selector: Arc<EndpointSelector>,
    seed: Option<u64>,
    batches_run: AtomicU64,
}

impl WorkloadDispatcher {
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        sink: Arc<dyn OutcomeSink>,
        target: Target,
        selector: EndpointSelector,
    ) -> Self {
        Self {
            executor,
            sink,
            target: Arc::new(target),
            selector: Arc::new(selector),
            seed: None,
            batches_run: AtomicU64::new(0),
        }
    }

    /// Derive every stream's random source from `seed`
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn stream_rng(&self, batch: u64, stream: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(
                seed.wrapping_add(batch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                    .wrapping_add(stream as u64),
            ),
            None => StdRng::from_entropy(),
        }
    }

    /// Run one batch to completion
    pub async fn run_batch(&self, spec: &BatchSpec) -> BatchResult {
        let plan = plan_streams(spec.width, spec.iterations, spec.budget);
        let batch = self.batches_run.fetch_add(1, Ordering::Relaxed);
        let streams_planned = plan.len();
        let tally = Arc::new(BatchTally::default());

        if streams_planned < spec.width {
            debug!(
                "Batch {} clamped to {} streams by request budget",
                batch, streams_planned
            );
        }

        let mut streams = FuturesUnordered::new();
        for (stream, iterations) in plan.into_iter().enumerate() {
            let executor = self.executor.clone();
            let sink = self.sink.clone();
            let target = self.target.clone();
            let selector = self.selector.clone();
            let tally = tally.clone();
            let mut rng = self.stream_rng(batch, stream);
            let phase = spec.phase;
            let timeout = spec.timeout;

            streams.push(tokio::spawn(async move {
                for _ in 0..iterations {
                    let path = selector.select(&mut rng);
                    let request = InFlight::begin(sink.as_ref(), &tally, phase, path);
                    let outcome = executor.execute(&target, path, timeout).await;
                    request.settle(outcome);
                }
            }));
        }

        while let Some(joined) = streams.next().await {
            if let Err(e) = joined {
                warn!("Dispatch stream in batch {} aborted: {}", batch, e);
            }
        }

        let result = tally.result(streams_planned);

        debug!(
            "Batch {} settled: {} dispatched, {} ok, {} failed",
            batch, result.dispatched, result.successful, result.failed
        );
        result
    }
}
