//! Single-request execution and outcome classification

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HarnessError, Result};
use crate::selector::Target;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Classified result of one request attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum OutcomeKind {
    /// Response status in 200..300
    Success(u16),
    /// Response received with any other status
    NonSuccess(u16),
    /// No response within the request timeout
    Timeout,
    /// Connection could not be established or was reset
    ConnectionError,
    /// The dispatching stream died before the attempt settled
    Aborted,
}

impl OutcomeKind {
    /// Classify a received HTTP status
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Self::Success(status)
        } else {
            Self::NonSuccess(status)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Status code, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success(s) | Self::NonSuccess(s) => Some(*s),
            Self::Timeout | Self::ConnectionError | Self::Aborted => None,
        }
    }

    /// Failure label used in breakdowns, `None` on success
    pub fn failure_label(&self) -> Option<&'static str> {
        match self {
            Self::Success(_) => None,
            Self::NonSuccess(_) => Some("non-2xx"),
            Self::Timeout => Some("timeout"),
            Self::ConnectionError => Some("connection-error"),
            Self::Aborted => Some("aborted"),
        }
    }
}

/// Outcome of one request attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Path that was requested
    pub path: String,

    /// Classification
    pub kind: OutcomeKind,

    /// Time from send to terminal event, recorded on every exit path
    pub latency: Duration,

    /// Wall-clock time the attempt finished
    pub timestamp: DateTime<Utc>,

    /// Response body bytes drained
    pub bytes_received: u64,
}

impl RequestOutcome {
    pub fn new(path: impl Into<String>, kind: OutcomeKind, latency: Duration) -> Self {
        Self {
            path: path.into(),
            kind,
            latency,
            timestamp: Utc::now(),
            bytes_received: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }

    /// Latency in whole microseconds
    pub fn latency_us(&self) -> u64 {
        u64::try_from(self.latency.as_micros()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// EXECUTORS
// ============================================================================

/// Performs exactly one request attempt per call. No retries.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Issue a GET for `path` against `target`, bounded by `timeout`
    async fn execute(&self, target: &Target, path: &str, timeout: Duration) -> RequestOutcome;
}

/// reqwest-backed executor.
///
/// Idle connections are never pooled, so every call opens its own connection
/// and tears it down when the call returns, times out or fails.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .user_agent(concat!("surge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarnessError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> std::result::Result<(u16, u64), reqwest::Error> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status().as_u16();

        // Drained chunk by chunk, only the size is kept
        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
        }
        Ok((status, received))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, target: &Target, path: &str, timeout: Duration) -> RequestOutcome {
        let url = target.url_for(path);
        let start = Instant::now();

        // Dropping the fetch future on expiry cancels the request and closes its socket.
        let result = tokio::time::timeout(timeout, self.fetch(&url)).await;
        let latency = start.elapsed();

        let (kind, bytes) = match result {
            Ok(Ok((status, bytes))) => (OutcomeKind::from_status(status), bytes),
            Ok(Err(e)) if e.is_timeout() => (OutcomeKind::Timeout, 0),
            Ok(Err(e)) => {
                trace!("request to {} failed: {}", url, e);
                (OutcomeKind::ConnectionError, 0)
            }
            Err(_) => (OutcomeKind::Timeout, 0),
        };

        let mut outcome = RequestOutcome::new(path, kind, latency);
        outcome.bytes_received = bytes;
        outcome
    }
}
