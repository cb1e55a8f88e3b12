//! Harness configuration
//!
//! Loaded from an optional TOML file; every field has a default so a partial
//! file (or none at all) is valid. Command-line flags are applied on top by the
//! binary, then [`HarnessConfig::validate`] runs before any network activity.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::phase::LoadPlan;
use crate::selector::{EndpointSelector, Target};
use crate::verdict::{VerdictPolicy, DEFAULT_THRESHOLD};

/// Complete harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Target host
    #[serde(default = "default_host")]
    pub host: String,

    /// Target port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Candidate endpoint paths
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Optional selection weights, one per endpoint
    #[serde(default)]
    pub weights: Option<Vec<u32>>,

    /// Global request budget
    #[serde(default)]
    pub max_requests: Option<u64>,

    /// Pass threshold in percent
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Optional p99 latency ceiling in milliseconds
    #[serde(default)]
    pub max_p99_latency_ms: Option<u64>,

    /// Seed for endpoint selection
    #[serde(default)]
    pub seed: Option<u64>,

    /// Phase parameters
    #[serde(default)]
    pub phases: LoadPlan,

    /// Report outputs
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_endpoints() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/status".to_string(),
    ]
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoints: default_endpoints(),
            weights: None,
            max_requests: None,
            threshold: default_threshold(),
            max_p99_latency_ms: None,
            seed: None,
            phases: LoadPlan::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Report output locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON run report
    #[serde(default)]
    pub json: Option<PathBuf>,

    /// Prometheus text exposition of the final counters
    #[serde(default)]
    pub prometheus: Option<PathBuf>,

    /// Suppress per-batch progress lines
    #[serde(default)]
    pub quiet: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl HarnessConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.max_requests == Some(0) {
            return Err(ConfigError::ZeroBudget);
        }
        self.selector()?;
        self.phases.validate()
    }

    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port)
    }

    pub fn selector(&self) -> std::result::Result<EndpointSelector, ConfigError> {
        match &self.weights {
            Some(weights) => EndpointSelector::weighted(self.endpoints.clone(), weights),
            None => EndpointSelector::uniform(self.endpoints.clone()),
        }
    }

    pub fn policy(&self) -> VerdictPolicy {
        VerdictPolicy::new(self.threshold).with_latency_ceiling(self.max_p99_latency_ms)
    }
}
