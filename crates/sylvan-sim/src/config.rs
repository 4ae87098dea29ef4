//! Simulation configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sylvan_dfs::{DfsConfig, HeuristicKind};
use sylvan_lca::{Placement, SamplingConfig};

use crate::error::{Error, Result};

/// Configuration for a simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for message scheduling and random problems.
    pub seed: u64,
    /// Deliveries after which a run that has not gone quiet is aborted.
    pub max_steps: usize,
    /// Let every local maximum start a run instead of electing one root per
    /// component.
    pub parallel: bool,
    pub dfs: DfsConfig,
    /// Run the sampling phase on top of the pseudo-tree.
    pub sampling: Option<SamplingConfig>,
    /// File the DOT rendering is written to once every variable reported.
    pub dot_file: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_steps: 1_000_000,
            parallel: false,
            dfs: DfsConfig::default(),
            sampling: None,
            dot_file: None,
        }
    }
}

impl SimulationConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Create config from environment variables with sensible defaults.
    ///
    /// Reads `SYLVAN_SEED`, `SYLVAN_MAX_STEPS`, `SYLVAN_PARALLEL`,
    /// `SYLVAN_HEURISTIC`, `SYLVAN_SAMPLING`, `SYLVAN_NBR_SAMPLES` and
    /// `SYLVAN_DOT_FILE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(seed) = env_parse::<u64>("SYLVAN_SEED")? {
            config.seed = seed;
            config.dfs.seed = seed;
        }
        if let Some(max_steps) = env_parse("SYLVAN_MAX_STEPS")? {
            config.max_steps = max_steps;
        }
        if let Some(parallel) = env_parse("SYLVAN_PARALLEL")? {
            config.parallel = parallel;
        }
        if let Ok(name) = std::env::var("SYLVAN_HEURISTIC") {
            config.dfs.heuristic = HeuristicKind::parse_or_default(&name);
        }
        if let Some(placement) = env_parse::<Placement>("SYLVAN_SAMPLING")? {
            let mut sampling = SamplingConfig::default()
                .with_placement(placement)
                .with_seed(config.seed);
            if let Some(n) = env_parse("SYLVAN_NBR_SAMPLES")? {
                sampling = sampling.with_nbr_samples(n);
            }
            config.sampling = Some(sampling);
        }
        if let Ok(path) = std::env::var("SYLVAN_DOT_FILE") {
            config.dot_file = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_dfs(mut self, dfs: DfsConfig) -> Self {
        self.dfs = dfs;
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = Some(sampling);
        self
    }

    #[must_use]
    pub fn with_dot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.dot_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// DFS configuration actually given to the agents. Sampling needs the
    /// constraints over random variables in each node's spaces.
    pub fn effective_dfs(&self) -> DfsConfig {
        if self.sampling.is_some() && !self.dfs.with_random_vars {
            self.dfs.clone().with_random_vars()
        } else {
            self.dfs.clone()
        }
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_forces_random_vars_into_spaces() {
        let plain = SimulationConfig::default();
        assert!(!plain.effective_dfs().with_random_vars);
        let sampling = plain.with_sampling(SamplingConfig::default());
        assert!(sampling.effective_dfs().with_random_vars);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{ "parallel": true, "sampling": { "placement": "at_roots" } }"#).unwrap();
        assert!(config.parallel);
        assert_eq!(config.seed, 42);
        let sampling = config.sampling.unwrap();
        assert_eq!(sampling.placement, Placement::AtRoots);
        assert_eq!(sampling.nbr_samples, 10);
    }
}
