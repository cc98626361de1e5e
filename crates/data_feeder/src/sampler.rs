//! src/sampler.rs
//!
//! Index policies: which records make up the next minibatch.
//!
//! A `Sampler` hands out one index set per call, exactly `batch_size` long,
//! with every index in `0..dataset_size`. Two policies exist:
//!
//! - [`RandomSampler`]: uniform draws *with replacement*, sorted ascending so
//!   the subsequent disk seeks move forward through the file.
//! - [`SequentialSampler`]: consecutive indices wrapping around the end of the
//!   dataset, with a cursor that can be persisted and resumed.
//!
//! The reader holds an [`IndexPolicy`], the closed union of the two.

use anyhow::{ensure, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// A `Sampler` chooses the record indices for each minibatch.
///
/// Implementations must be `Send` so a reader can move onto the producer thread.
/// Neither policy can fail once constructed: all indices are produced modulo
/// `dataset_size`, which is checked to be non-zero at construction.
pub trait Sampler: Send {
    /// Returns the indices for the next minibatch, exactly `batch_size` long.
    fn next_indices(&mut self, batch_size: usize) -> Vec<usize>;

    /// Number of records the indices are drawn from.
    fn dataset_size(&self) -> usize;
}

/// Derives a per-reader seed from a base value and the caller's identity.
///
/// Seed formula: `base + (rank << 32) + thread_id`, so readers on different
/// ranks or threads draw different streams from the same base.
pub fn derive_seed(base: u64, rank: usize, thread_id: usize) -> u64 {
    base.wrapping_add((rank as u64) << 32)
        .wrapping_add(thread_id as u64)
}

/// Base seed taken from the sub-second microseconds of the host clock.
/// Not reproducible across runs.
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_micros()))
        .unwrap_or_default()
}

/// ============================================================================
/// Yields `cursor, cursor+1, ..., cursor+batch_size-1` modulo `dataset_size`,
/// then advances the cursor by `batch_size`.
///
/// The cursor is kept reduced modulo `dataset_size`, so after
/// `dataset_size / batch_size` calls with no remainder it is back where it
/// started.
///
/// # Example
/// ```ignore
/// let mut sampler = SequentialSampler::new(4)?;
/// assert_eq!(sampler.next_indices(3), vec![0, 1, 2]);
/// assert_eq!(sampler.next_indices(3), vec![3, 0, 1]);
/// assert_eq!(sampler.cursor(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
    cursor: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Result<Self> {
        Self::with_cursor(dataset_size, 0)
    }

    /// Resumes from a stored offset. Offsets past the end wrap around.
    pub fn with_cursor(dataset_size: usize, cursor: usize) -> Result<Self> {
        ensure!(dataset_size > 0, "Dataset size must be > 0");
        Ok(Self {
            dataset_size,
            cursor: cursor % dataset_size,
        })
    }

    /// Index the next minibatch will start at.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Sampler for SequentialSampler {
    fn next_indices(&mut self, batch_size: usize) -> Vec<usize> {
        let n = self.dataset_size;
        let start = self.cursor;
        let indices = (0..batch_size).map(|k| (start + k % n) % n).collect();
        self.cursor = (start + batch_size % n) % n;
        indices
    }

    fn dataset_size(&self) -> usize {
        self.dataset_size
    }
}

/// ============================================================================
/// Uniform random sampling with replacement over `0..dataset_size`.
///
/// Each call draws `batch_size` independent indices and sorts them ascending.
/// Duplicates are possible both within and across minibatches. Sorting changes
/// the order records are read and presented in, not which records are chosen.
///
/// # Seed handling
/// - `RandomSampler::new(size, seed)` is fully reproducible.
/// - `RandomSampler::from_identity(size, None, rank, thread_id)` seeds from the
///   host clock combined with the caller's rank/thread, so readers in a
///   distributed run draw different streams. Not cryptographically secure.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    seed: u64,
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(dataset_size: usize, seed: u64) -> Result<Self> {
        ensure!(dataset_size > 0, "Dataset size must be > 0");
        Ok(Self {
            dataset_size,
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Seeds from `base` (or the host clock if `None`) mixed with `rank` and `thread_id`.
    pub fn from_identity(
        dataset_size: usize,
        base: Option<u64>,
        rank: usize,
        thread_id: usize,
    ) -> Result<Self> {
        let base = base.unwrap_or_else(clock_seed);
        Self::new(dataset_size, derive_seed(base, rank, thread_id))
    }

    /// Seed the generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Sampler for RandomSampler {
    fn next_indices(&mut self, batch_size: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..batch_size)
            .map(|_| self.rng.random_range(0..self.dataset_size))
            .collect();
        indices.sort_unstable();
        indices
    }

    fn dataset_size(&self) -> usize {
        self.dataset_size
    }
}

/// ============================================================================
/// The index policy a reader is built with. Fixed for the reader's lifetime.
#[derive(Debug, Clone)]
pub enum IndexPolicy {
    Random(RandomSampler),
    Sequential(SequentialSampler),
}

impl IndexPolicy {
    /// Current cursor for sequential policies, `None` for random ones.
    pub fn cursor(&self) -> Option<usize> {
        match self {
            IndexPolicy::Random(_) => None,
            IndexPolicy::Sequential(s) => Some(s.cursor()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexPolicy::Random(_) => "random",
            IndexPolicy::Sequential(_) => "sequential",
        }
    }
}

impl Sampler for IndexPolicy {
    fn next_indices(&mut self, batch_size: usize) -> Vec<usize> {
        match self {
            IndexPolicy::Random(s) => s.next_indices(batch_size),
            IndexPolicy::Sequential(s) => s.next_indices(batch_size),
        }
    }

    fn dataset_size(&self) -> usize {
        match self {
            IndexPolicy::Random(s) => s.dataset_size(),
            IndexPolicy::Sequential(s) => s.dataset_size(),
        }
    }
}

impl From<RandomSampler> for IndexPolicy {
    fn from(sampler: RandomSampler) -> Self {
        IndexPolicy::Random(sampler)
    }
}

impl From<SequentialSampler> for IndexPolicy {
    fn from(sampler: SequentialSampler) -> Self {
        IndexPolicy::Sequential(sampler)
    }
}
