//! Error types for the surge harness
//!
//! Request-level failures (timeouts, refused connections, non-2xx answers) are
//! not errors here: they are recorded as outcomes. Only problems that stop the
//! harness from running at all surface as `HarnessError`.

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Configuration problems detected before any dispatch begins
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No candidate endpoint paths configured
    #[error("endpoint set is empty")]
    NoEndpoints,

    /// Endpoint path is not absolute
    #[error("endpoint path must start with '/': {0}")]
    InvalidPath(String),

    /// Weight list does not line up with the endpoint list
    #[error("expected {expected} endpoint weights, got {actual}")]
    WeightCountMismatch { expected: usize, actual: usize },

    /// Every endpoint weight is zero
    #[error("at least one endpoint weight must be non-zero")]
    AllWeightsZero,

    /// Endpoint weights sum past `u32::MAX`
    #[error("endpoint weights must sum to at most {}", u32::MAX)]
    WeightOverflow,

    /// A phase would issue more requests than can be counted
    #[error("phase {phase}: batches x users x iterations overflows the request counter")]
    PhaseTooLarge { phase: String },

    /// The phases together would issue more requests than can be counted
    #[error("load plan total request count overflows the request counter")]
    PlanTooLarge,

    /// Target host missing
    #[error("target host is empty")]
    EmptyHost,

    /// Target port is zero
    #[error("target port must be non-zero")]
    InvalidPort,

    /// Pass threshold outside 0..=100
    #[error("pass threshold {0} is outside 0..=100")]
    InvalidThreshold(f64),

    /// A phase with batches has no users
    #[error("phase {phase}: users per batch must be at least 1")]
    ZeroUsers { phase: String },

    /// A phase with batches has no iterations
    #[error("phase {phase}: iterations per user must be at least 1")]
    ZeroIterations { phase: String },

    /// A phase request timeout of zero
    #[error("phase {phase}: request timeout must be non-zero")]
    ZeroTimeout { phase: String },

    /// Request budget of zero
    #[error("request budget must be at least 1 when set")]
    ZeroBudget,

    /// Malformed `--endpoint` value
    #[error("invalid endpoint spec '{0}', expected /path or /path@weight")]
    InvalidEndpointSpec(String),
}

/// Errors that abort a harness run
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Config file or report file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Report serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Prometheus registry or encoder failure
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl HarnessError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::ConfigParse(_) => 2,
            _ => 3,
        }
    }
}
