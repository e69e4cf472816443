// Configuration for topic inference, coherence scoring and the topic-count sweep.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopicError};

/// Document-topic Dirichlet prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocTopicPrior {
    /// Fixed symmetric concentration shared by every topic.
    Symmetric(f64),
    /// Asymmetric prior learned from the data, starting at 1/K.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdaConfig {
    pub passes: usize,              // Full-corpus variational EM passes
    pub iterations: usize,          // Max per-document E-step iterations
    pub alpha: DocTopicPrior,       // Document-topic prior
    pub eta: Option<f64>,           // Topic-word prior, 1/K when unset
    pub gamma_threshold: f64,       // Per-document convergence on mean |Δγ|
    pub convergence_threshold: f64, // Early stop on |Δ per-word log-likelihood|
    pub seed: u64,
}

impl Default for LdaConfig {
    fn default() -> Self {
        LdaConfig {
            passes: 10,
            iterations: 50,
            alpha: DocTopicPrior::Auto,
            eta: None,
            gamma_threshold: 0.001,
            convergence_threshold: 1e-6,
            seed: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    pub top_n: usize,       // Top words per topic
    pub window_size: usize, // Boolean sliding window width
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        CoherenceConfig {
            top_n: 20,
            window_size: 110,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub start: usize,
    pub limit: usize,
    pub step: usize,
    pub parallel: bool, // Fit candidates on the rayon pool
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            start: 2,
            limit: 20,
            step: 3,
            parallel: false,
        }
    }
}

/// Aggregate configuration, loadable from JSON and overridable from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub lda: LdaConfig,
    pub coherence: CoherenceConfig,
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `TOPIC_SWEEP_*` environment overrides on top of the current values.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(seed) = env_parse::<u64>("TOPIC_SWEEP_SEED")? {
            self.lda.seed = seed;
        }
        if let Some(passes) = env_parse::<usize>("TOPIC_SWEEP_PASSES")? {
            self.lda.passes = passes;
        }
        if let Some(start) = env_parse::<usize>("TOPIC_SWEEP_START")? {
            self.sweep.start = start;
        }
        if let Some(limit) = env_parse::<usize>("TOPIC_SWEEP_LIMIT")? {
            self.sweep.limit = limit;
        }
        if let Some(step) = env_parse::<usize>("TOPIC_SWEEP_STEP")? {
            self.sweep.step = step;
        }
        if let Some(top_n) = env_parse::<usize>("TOPIC_SWEEP_TOP_N")? {
            self.coherence.top_n = top_n;
        }
        if let Some(parallel) = env_parse::<bool>("TOPIC_SWEEP_PARALLEL")? {
            self.sweep.parallel = parallel;
        }
        Ok(self)
    }

    /// Reject values that would make inference or scoring meaningless.
    ///
    /// The sweep range itself is checked by the selector, which reports
    /// `InvalidRange` with the offending bounds.
    pub fn validate(&self) -> Result<()> {
        if self.lda.passes == 0 {
            return Err(TopicError::Config("passes must be at least 1".into()));
        }
        if self.lda.iterations == 0 {
            return Err(TopicError::Config("iterations must be at least 1".into()));
        }
        if let DocTopicPrior::Symmetric(alpha) = self.lda.alpha {
            if !(alpha > 0.0 && alpha.is_finite()) {
                return Err(TopicError::Config(format!("alpha must be positive, got {alpha}")));
            }
        }
        if let Some(eta) = self.lda.eta {
            if !(eta > 0.0 && eta.is_finite()) {
                return Err(TopicError::Config(format!("eta must be positive, got {eta}")));
            }
        }
        if self.coherence.top_n == 0 {
            return Err(TopicError::Config("top_n must be at least 1".into()));
        }
        if self.coherence.window_size == 0 {
            return Err(TopicError::Config("window_size must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TopicError::Config(format!("{key} has an unparseable value: {raw:?}"))),
        Err(_) => Ok(None),
    }
}
