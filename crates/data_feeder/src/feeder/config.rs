//! src/feeder/config.rs
//!
//! Configuration for MinibatchFeeder behaviour
//!
//! The `FeederConfig` struct stores everything needed to open a dataset and
//! start feeding minibatches from it.
//!
//! Example:
//! ```ignore
//! let config = FeederConfig::builder()
//!     .samples_path("train-images.bin8")
//!     .labels_path("train-labels.bin")
//!     .batch_size(32)
//!     .threaded(true)
//!     .policy(SamplingPolicy::Random)
//!     .rank(3)
//!     .build();
//! ```
//!
//! The same configuration as JSON (every field is optional):
//! ```json
//! { "samples_path": "train-images.bin8", "labels_path": "train-labels.bin",
//!   "batch_size": 32, "threaded": true, "policy": "random", "rank": 3,
//!   "timeout_ms": 30000 }
//! ```

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a feeder chooses the records of each minibatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingPolicy {
    /// Uniform random with replacement, sorted within each batch.
    #[default]
    Random,
    /// Consecutive records from `start_cursor`, wrapping at the end of the dataset.
    Sequential,
}

/// Configuration for MinibatchFeeder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    /// Samples file (`.bin`, `.bin8` or `.bin32`)
    pub samples_path: PathBuf,
    /// Labels file, with at least as many rows as the samples file
    pub labels_path: PathBuf,
    /// Number of records per minibatch. Fixed for the feeder's lifetime.
    pub batch_size: usize,
    /// Prefetch the next minibatch on a background thread
    pub threaded: bool,
    pub policy: SamplingPolicy,
    /// Process rank, mixed into the random seed and the producer thread name
    pub rank: usize,
    /// Thread id within the rank, mixed into the random seed
    pub thread_id: usize,
    /// Base seed for the random policy. `None` seeds from the host clock.
    pub seed: Option<u64>,
    /// First record of the sequential policy (reduced modulo the dataset size)
    pub start_cursor: usize,
    /// Maximum time to wait for a prefetched minibatch. `None` waits forever.
    #[serde(rename = "timeout_ms", with = "timeout_ms")]
    pub timeout: Option<Duration>,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            samples_path: PathBuf::new(),
            labels_path: PathBuf::new(),
            batch_size: 1,
            threaded: false,
            policy: SamplingPolicy::Random,
            rank: 0,
            thread_id: 0,
            seed: None,
            start_cursor: 0,
            timeout: None,
        }
    }
}

impl FeederConfig {
    pub fn builder() -> FeederConfigBuilder {
        FeederConfigBuilder::default()
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse feeder config")?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feeder config {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Invalid feeder config {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize feeder config")
    }

    /// Checks the settings that do not depend on the dataset files.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be > 0");
        if let Some(timeout) = self.timeout {
            ensure!(!timeout.is_zero(), "timeout must be > 0 when set");
        }
        Ok(())
    }
}

/// Builder for FeederConfig with method chaining
#[derive(Debug, Clone, Default)]
pub struct FeederConfigBuilder {
    config: FeederConfig,
}

impl FeederConfigBuilder {
    pub fn samples_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.samples_path = path.into();
        self
    }

    pub fn labels_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.labels_path = path.into();
        self
    }

    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set whether a background thread prefetches minibatches
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.config.threaded = threaded;
        self
    }

    pub fn policy(mut self, policy: SamplingPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn rank(mut self, rank: usize) -> Self {
        self.config.rank = rank;
        self
    }

    pub fn thread_id(mut self, thread_id: usize) -> Self {
        self.config.thread_id = thread_id;
        self
    }

    /// Set the random seed for reproducible sampling.
    ///
    /// The seed actually used is mixed with `rank` and `thread_id`, so
    /// different ranks still draw different batches.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn start_cursor(mut self, cursor: usize) -> Self {
        self.config.start_cursor = cursor;
        self
    }

    /// Set the timeout for waiting on the producer.
    ///
    /// - Too low: May fail during legitimately slow reads (cold page cache, network storage).
    /// - Too high: Delays detection of a stuck producer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> FeederConfig {
        self.config
    }
}

mod timeout_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        timeout: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        timeout
            .map(|t| t.as_millis().min(u64::MAX as u128) as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
