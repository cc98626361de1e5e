//! src/feeder/loader.rs
//!
//! The `MinibatchFeeder` is what a training loop holds on to. It hides whether
//! minibatches are read on the calling thread or prefetched in the background.

use anyhow::{ensure, Context, Result};
use log::{debug, info, warn};
use std::time::Duration;

use crate::dataset::{DatasetReader, LabelledDataset};
use crate::error::FeederError;
use crate::feeder::config::{FeederConfig, SamplingPolicy};
use crate::feeder::producer::Prefetcher;
use crate::minibatch::{ensure_capacity, Minibatch};

/// Lifecycle of a feeder.
///
/// `Idle -> Running` on construction, `Running -> Draining -> Stopped` in
/// `shutdown`. A read error moves a running feeder to `Failed`, from which
/// only `shutdown` leads on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not started. A constructed feeder has already left this state.
    Idle,
    /// Ready to deliver minibatches; in threaded mode the producer is live.
    Running,
    /// Shutdown flag set, waiting for the producer to finish its read and exit.
    Draining,
    /// `shutdown` has run.
    Stopped,
    /// A read failed. Later calls for data return [`FeederError::ProducerStopped`].
    Failed,
}

enum Mode {
    Inline(DatasetReader),
    Prefetch(Prefetcher),
}

/// Feeds fixed-size labelled minibatches to a training loop.
///
/// In inline mode every call reads from disk on the calling thread. In
/// threaded mode a producer thread keeps exactly one minibatch ready, so a
/// call usually only copies it out while the producer reads the next one.
///
/// # Example
/// ```ignore
/// let mut feeder = MinibatchFeeder::open(&config)?;
/// let mut x = vec![0.0; config.batch_size * feeder.size_per_sample()];
/// let mut y = vec![0.0; config.batch_size * feeder.size_per_label()];
/// for _ in 0..steps {
///     feeder.get_labelled_samples(&mut x, &mut y)?;
///     model.train_step(&x, &y);
/// }
/// ```
pub struct MinibatchFeeder {
    mode: Mode,
    batch_size: usize,
    size_per_sample: usize,
    size_per_label: usize,
    state: PipelineState,
}

impl MinibatchFeeder {
    /// Wraps `reader`, starting a producer thread when `threaded` is set.
    pub fn new(reader: DatasetReader, batch_size: usize, threaded: bool) -> Result<Self> {
        Self::start(reader, batch_size, threaded, 0, None)
    }

    /// Wraps `reader` using the batch size, threading, rank and timeout from `config`.
    pub fn from_reader(reader: DatasetReader, config: &FeederConfig) -> Result<Self> {
        config.validate()?;
        Self::start(
            reader,
            config.batch_size,
            config.threaded,
            config.rank,
            config.timeout,
        )
    }

    /// Opens the dataset named by `config` and builds a feeder over it.
    pub fn open(config: &FeederConfig) -> Result<Self> {
        config.validate()?;
        let dataset = LabelledDataset::open(&config.samples_path, &config.labels_path)
            .context("Failed to open dataset")?;

        let reader = match config.policy {
            SamplingPolicy::Random => {
                DatasetReader::random(dataset, config.seed, config.rank, config.thread_id)?
            }
            SamplingPolicy::Sequential => DatasetReader::sequential(dataset, config.start_cursor)?,
        };

        info!(
            "Feeding {:?} minibatches of {} (threaded={}, rank={}, thread_id={})",
            config.policy, config.batch_size, config.threaded, config.rank, config.thread_id
        );
        Self::from_reader(reader, config)
    }

    fn start(
        reader: DatasetReader,
        batch_size: usize,
        threaded: bool,
        rank: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be > 0");

        let size_per_sample = reader.size_per_sample();
        let size_per_label = reader.size_per_label();
        let mode = if threaded {
            Mode::Prefetch(Prefetcher::spawn(reader, batch_size, rank, timeout)?)
        } else {
            Mode::Inline(reader)
        };

        Ok(Self {
            mode,
            batch_size,
            size_per_sample,
            size_per_label,
            state: PipelineState::Running,
        })
    }

    /// Fills `samples` and `labels` with the next minibatch.
    ///
    /// `samples` must hold at least `batch_size * size_per_sample` elements and
    /// `labels` at least `batch_size * size_per_label`; exactly those prefixes
    /// are overwritten. Blocks in threaded mode until the producer has a batch.
    pub fn get_labelled_samples(&mut self, samples: &mut [f32], labels: &mut [f32]) -> Result<()> {
        ensure_capacity(
            self.batch_size,
            self.size_per_sample,
            self.size_per_label,
            samples,
            labels,
        )?;

        if self.state != PipelineState::Running {
            return Err(FeederError::ProducerStopped.into());
        }

        let batch_size = self.batch_size;
        let result = match &mut self.mode {
            Mode::Inline(reader) => reader.read_labelled_samples(batch_size, samples, labels),
            Mode::Prefetch(prefetcher) => {
                prefetcher.with_next(|batch| batch.copy_into(samples, labels))
            }
        };
        self.after_delivery(&result);
        result
    }

    /// Returns the next minibatch as an owned value.
    pub fn next_minibatch(&mut self) -> Result<Minibatch> {
        if self.state != PipelineState::Running {
            return Err(FeederError::ProducerStopped.into());
        }

        let batch_size = self.batch_size;
        let result = match &mut self.mode {
            Mode::Inline(reader) => reader.read_minibatch(batch_size),
            Mode::Prefetch(prefetcher) => prefetcher.with_next(|batch| Ok(batch.clone())),
        };
        self.after_delivery(&result);
        result
    }

    /// Latches `Failed` after a read error. A timeout is not a read error.
    fn after_delivery<T>(&mut self, result: &Result<T>) {
        let failed = match &self.mode {
            Mode::Inline(_) => result.is_err(),
            Mode::Prefetch(prefetcher) => prefetcher.is_stopped(),
        };
        if failed {
            self.state = PipelineState::Failed;
        }
    }

    /// Stops and joins the producer. Later calls for data fail with
    /// [`FeederError::ProducerStopped`]. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Ok(());
        }
        self.state = PipelineState::Draining;
        let result = match &mut self.mode {
            Mode::Inline(_) => Ok(()),
            Mode::Prefetch(prefetcher) => {
                debug!("Shutting down minibatch feeder");
                prefetcher.shutdown()
            }
        };
        self.state = PipelineState::Stopped;
        result
    }

    pub fn size_per_sample(&self) -> usize {
        self.size_per_sample
    }

    pub fn size_per_label(&self) -> usize {
        self.size_per_label
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Prefetch(_))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }
}

impl Drop for MinibatchFeeder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to shut down minibatch feeder: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{write_matrix, MatrixHeader};
    use tempfile::TempDir;

    /// 5 records of 3 floats, record i = [i, i, i], label i = [10 i]
    fn write_dataset(dir: &TempDir) -> Result<FeederConfig> {
        let x = dir.path().join("x.bin");
        let y = dir.path().join("y.bin");
        let xs: Vec<f32> = (0..5).flat_map(|i| [i as f32; 3]).collect();
        let ys: Vec<f32> = (0..5).map(|i| 10.0 * i as f32).collect();
        write_matrix(&x, MatrixHeader::new(5, 3), &xs)?;
        write_matrix(&y, MatrixHeader::new(5, 1), &ys)?;
        Ok(FeederConfig::builder()
            .samples_path(x)
            .labels_path(y)
            .batch_size(2)
            .policy(SamplingPolicy::Sequential)
            .build())
    }

    #[test]
    fn test_inline_state_transitions() -> Result<()> {
        let dir = TempDir::new()?;
        let mut feeder = MinibatchFeeder::open(&write_dataset(&dir)?)?;
        assert!(!feeder.is_threaded());
        assert_eq!(feeder.state(), PipelineState::Running);

        let batch = feeder.next_minibatch()?;
        assert_eq!(batch.labels(), &[0.0, 10.0]);
        assert_eq!(feeder.state(), PipelineState::Running);

        feeder.shutdown()?;
        feeder.shutdown()?;
        assert_eq!(feeder.state(), PipelineState::Stopped);

        let err = feeder.next_minibatch().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FeederError>(),
            Some(FeederError::ProducerStopped)
        ));
        Ok(())
    }

    #[test]
    fn test_threaded_sequence() -> Result<()> {
        let dir = TempDir::new()?;
        let config = FeederConfig {
            threaded: true,
            ..write_dataset(&dir)?
        };
        let mut feeder = MinibatchFeeder::open(&config)?;
        assert!(feeder.is_threaded());
        assert_eq!(feeder.state(), PipelineState::Running);

        let mut x = vec![0.0; 6];
        let mut y = vec![0.0; 2];
        let mut seen = Vec::new();
        for _ in 0..5 {
            feeder.get_labelled_samples(&mut x, &mut y)?;
            seen.extend_from_slice(&y);
        }
        assert_eq!(
            seen,
            vec![0.0, 10.0, 20.0, 30.0, 40.0, 0.0, 10.0, 20.0, 30.0, 40.0]
        );
        assert_eq!(feeder.state(), PipelineState::Running);

        feeder.shutdown()?;
        assert_eq!(feeder.state(), PipelineState::Stopped);
        assert!(feeder.get_labelled_samples(&mut x, &mut y).is_err());
        Ok(())
    }

    #[test]
    fn test_buffer_check_happens_before_consuming() -> Result<()> {
        let dir = TempDir::new()?;
        let config = FeederConfig {
            threaded: true,
            ..write_dataset(&dir)?
        };
        let mut feeder = MinibatchFeeder::open(&config)?;

        let mut x = vec![0.0; 5];
        let mut y = vec![0.0; 2];
        let err = feeder.get_labelled_samples(&mut x, &mut y).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FeederError>(),
            Some(FeederError::BufferTooSmall {
                buffer: "samples",
                required: 6,
                actual: 5
            })
        ));

        // The first batch is still the first one.
        let mut x = vec![0.0; 6];
        feeder.get_labelled_samples(&mut x, &mut y)?;
        assert_eq!(y, vec![0.0, 10.0]);
        Ok(())
    }

    #[test]
    fn test_open_rejects_invalid_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config = FeederConfig {
            batch_size: 0,
            ..write_dataset(&dir)?
        };
        assert!(MinibatchFeeder::open(&config).is_err());
        Ok(())
    }
}
