//! Target description and endpoint selection

use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Host under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target host name or address
    pub host: String,

    /// Target port
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full URL for a path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

/// Chooses one of the configured paths for each dispatched request.
///
/// Holds no mutable state: the random source is supplied by the caller, so
/// each dispatch stream can own its own generator and sequences can be pinned
/// by seeding it.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    paths: Vec<String>,
    weights: Option<WeightedIndex<u32>>,
}

impl EndpointSelector {
    /// Uniform selection over `paths`
    pub fn uniform(paths: Vec<String>) -> Result<Self, ConfigError> {
        validate_paths(&paths)?;
        Ok(Self {
            paths,
            weights: None,
        })
    }

    /// Weighted selection; `weights[i]` applies to `paths[i]`
    pub fn weighted(paths: Vec<String>, weights: &[u32]) -> Result<Self, ConfigError> {
        validate_paths(&paths)?;
        if weights.len() != paths.len() {
            return Err(ConfigError::WeightCountMismatch {
                expected: paths.len(),
                actual: weights.len(),
            });
        }
        // rand sums the weights in the weight type itself
        weights
            .iter()
            .try_fold(0u32, |sum, w| sum.checked_add(*w))
            .ok_or(ConfigError::WeightOverflow)?;
        let index = WeightedIndex::new(weights).map_err(|e| match e {
            WeightedError::AllWeightsZero => ConfigError::AllWeightsZero,
            WeightedError::NoItem => ConfigError::NoEndpoints,
            WeightedError::InvalidWeight | WeightedError::TooMany => ConfigError::WeightOverflow,
        })?;
        Ok(Self {
            paths,
            weights: Some(index),
        })
    }

    /// Draw one path
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let idx = match &self.weights {
            Some(index) => index.sample(rng),
            None => rng.gen_range(0..self.paths.len()),
        };
        &self.paths[idx]
    }

    /// Configured paths, in declaration order
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }
}

fn validate_paths(paths: &[String]) -> Result<(), ConfigError> {
    if paths.is_empty() {
        return Err(ConfigError::NoEndpoints);
    }
    if let Some(bad) = paths.iter().find(|p| !p.starts_with('/')) {
        return Err(ConfigError::InvalidPath(bad.clone()));
    }
    Ok(())
}

/// Parse an endpoint given as `/path` or `/path@weight`
pub fn parse_endpoint_spec(spec: &str) -> Result<(String, Option<u32>), ConfigError> {
    let spec = spec.trim();
    match spec.rsplit_once('@') {
        Some((path, weight)) => {
            let weight = weight
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidEndpointSpec(spec.to_string()))?;
            if path.is_empty() {
                return Err(ConfigError::InvalidEndpointSpec(spec.to_string()));
            }
            Ok((path.to_string(), Some(weight)))
        }
        None if spec.is_empty() => Err(ConfigError::InvalidEndpointSpec(spec.to_string())),
        None => Ok((spec.to_string(), None)),
    }
}
