use anyhow::{ensure, Context, Result};
use log::{info, trace, warn};
use std::path::{Path, PathBuf};

use crate::codec::{self, ElementWidth, MatrixHeader};
use crate::error::FeederError;
use crate::minibatch::{ensure_capacity, Minibatch};
use crate::sampler::{IndexPolicy, RandomSampler, Sampler, SequentialSampler};

/// Element type of a dataset file, selected by its extension.
///
/// | extension | type | status |
/// |-----------|------|--------|
/// | `.bin`    | 4-byte float | supported |
/// | `.bin8`   | 1-byte unsigned integer, widened to `f32` | supported |
/// | `.bin32`  | 4-byte integer | reserved, reading fails |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float,
    Byte,
    Int,
}

impl ElementType {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "bin" => Some(ElementType::Float),
            "bin8" => Some(ElementType::Byte),
            "bin32" => Some(ElementType::Int),
            _ => None,
        }
    }

    /// Classifies a dataset file by the text after its last `.`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_extension(extension).ok_or_else(|| {
            FeederError::UnrecognizedExtension {
                path: path.to_path_buf(),
                extension: extension.to_string(),
            }
            .into()
        })
    }

    pub fn width(self) -> ElementWidth {
        match self {
            ElementType::Float | ElementType::Int => ElementWidth::Width4,
            ElementType::Byte => ElementWidth::Width1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Float => "float32",
            ElementType::Byte => "uint8",
            ElementType::Int => "int32",
        }
    }
}

/// One validated dataset file: its path, header, and element type.
#[derive(Debug, Clone)]
pub struct DatasetFile {
    path: PathBuf,
    header: MatrixHeader,
    element_type: ElementType,
}

impl DatasetFile {
    /// Opens `path`, reads its header, and classifies its element type.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let header = codec::read_header(&path)?;
        let element_type = ElementType::from_path(&path)?;
        if element_type == ElementType::Int {
            warn!(
                "{} uses element type {}, which cannot be read yet",
                path.display(),
                element_type.name()
            );
        }
        Ok(Self {
            path,
            header,
            element_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> MatrixHeader {
        self.header
    }

    pub fn rows(&self) -> usize {
        self.header.rows
    }

    pub fn elements_per_row(&self) -> usize {
        self.header.cols
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Reads the records at `indices` into `out` as `f32`, widening narrow types.
    ///
    /// `out` must hold exactly `indices.len() * elements_per_row` elements.
    fn read_rows_into(&self, indices: &[usize], out: &mut [f32]) -> Result<()> {
        let cols = self.header.cols;
        match self.element_type {
            ElementType::Float => codec::read_records::<f32>(&self.path, indices, cols, out),
            ElementType::Byte => {
                let mut narrow = vec![0u8; indices.len() * cols];
                codec::read_records::<u8>(&self.path, indices, cols, &mut narrow)?;
                codec::widen_into(&narrow, out);
                Ok(())
            }
            ElementType::Int => Err(FeederError::UnsupportedElementType {
                path: self.path.clone(),
                element_type: self.element_type.name(),
            }
            .into()),
        }
    }
}

/// A samples file and a labels file describing the same records.
///
/// `num_samples` is the samples file's row count. The labels file must have at
/// least that many rows; record `i` of one is paired with record `i` of the other.
#[derive(Debug, Clone)]
pub struct LabelledDataset {
    samples: DatasetFile,
    labels: DatasetFile,
}

impl LabelledDataset {
    pub fn open(samples: impl Into<PathBuf>, labels: impl Into<PathBuf>) -> Result<Self> {
        let samples = samples.into();
        let labels = labels.into();

        // Both files must be openable before either header is trusted.
        codec::open_dataset_file(&samples)?;
        codec::open_dataset_file(&labels)?;

        let samples = DatasetFile::open(samples).context("Failed to open samples file")?;
        let labels = DatasetFile::open(labels).context("Failed to open labels file")?;

        if labels.rows() < samples.rows() {
            return Err(FeederError::LabelRowMismatch {
                samples: samples.path.clone(),
                labels: labels.path.clone(),
                sample_rows: samples.rows(),
                label_rows: labels.rows(),
            }
            .into());
        }

        info!(
            "Opened dataset: {} samples, {} x {} ({}) from {}, labels {} x {} ({}) from {}",
            samples.rows(),
            samples.rows(),
            samples.elements_per_row(),
            samples.element_type().name(),
            samples.path().display(),
            labels.rows(),
            labels.elements_per_row(),
            labels.element_type().name(),
            labels.path().display(),
        );

        Ok(Self { samples, labels })
    }

    pub fn num_samples(&self) -> usize {
        self.samples.rows()
    }

    pub fn size_per_sample(&self) -> usize {
        self.samples.elements_per_row()
    }

    pub fn size_per_label(&self) -> usize {
        self.labels.elements_per_row()
    }

    pub fn samples(&self) -> &DatasetFile {
        &self.samples
    }

    pub fn labels(&self) -> &DatasetFile {
        &self.labels
    }
}

/// Produces one minibatch per call from a [`LabelledDataset`], independent of threading.
///
/// # Example
/// ```ignore
/// let dataset = LabelledDataset::open("train.bin8", "labels.bin")?;
/// let mut reader = DatasetReader::sequential(dataset, 0)?;
/// let mut x = vec![0.0; 32 * reader.size_per_sample()];
/// let mut y = vec![0.0; 32 * reader.size_per_label()];
/// reader.read_labelled_samples(32, &mut x, &mut y)?;
/// ```
#[derive(Debug, Clone)]
pub struct DatasetReader {
    dataset: LabelledDataset,
    policy: IndexPolicy,
    batches_read: u64,
}

impl DatasetReader {
    pub fn new(dataset: LabelledDataset, policy: IndexPolicy) -> Result<Self> {
        ensure!(
            policy.dataset_size() == dataset.num_samples(),
            "{} index policy covers {} records but the dataset has {}",
            policy.name(),
            policy.dataset_size(),
            dataset.num_samples()
        );
        Ok(Self {
            dataset,
            policy,
            batches_read: 0,
        })
    }

    /// Random-with-replacement reader. `seed = None` seeds from the host clock.
    pub fn random(
        dataset: LabelledDataset,
        seed: Option<u64>,
        rank: usize,
        thread_id: usize,
    ) -> Result<Self> {
        let sampler = RandomSampler::from_identity(dataset.num_samples(), seed, rank, thread_id)?;
        Self::new(dataset, sampler.into())
    }

    /// Sequential reader starting at `cursor`.
    pub fn sequential(dataset: LabelledDataset, cursor: usize) -> Result<Self> {
        let sampler = SequentialSampler::with_cursor(dataset.num_samples(), cursor)?;
        Self::new(dataset, sampler.into())
    }

    /// Reads `batch_size` records into `x` (samples) and `y` (labels).
    ///
    /// Only the first `batch_size * size_per_sample` elements of `x` and
    /// `batch_size * size_per_label` elements of `y` are written.
    pub fn read_labelled_samples(
        &mut self,
        batch_size: usize,
        x: &mut [f32],
        y: &mut [f32],
    ) -> Result<()> {
        let size_per_sample = self.dataset.size_per_sample();
        let size_per_label = self.dataset.size_per_label();
        ensure_capacity(batch_size, size_per_sample, size_per_label, x, y)?;

        let indices = self.policy.next_indices(batch_size);
        trace!(
            "Reading {} batch {} ({} records)",
            self.policy.name(),
            self.batches_read,
            indices.len()
        );

        self.dataset
            .samples
            .read_rows_into(&indices, &mut x[..batch_size * size_per_sample])?;
        self.dataset
            .labels
            .read_rows_into(&indices, &mut y[..batch_size * size_per_label])?;

        self.batches_read += 1;
        Ok(())
    }

    /// Fills `batch` in place, using its own batch size.
    pub fn fill(&mut self, batch: &mut Minibatch) -> Result<()> {
        let batch_size = batch.batch_size();
        let (x, y) = batch.buffers_mut();
        self.read_labelled_samples(batch_size, x, y)
    }

    /// Reads a freshly allocated minibatch.
    pub fn read_minibatch(&mut self, batch_size: usize) -> Result<Minibatch> {
        let mut batch = Minibatch::zeros(batch_size, self.size_per_sample(), self.size_per_label());
        self.fill(&mut batch)?;
        Ok(batch)
    }

    pub fn dataset(&self) -> &LabelledDataset {
        &self.dataset
    }

    pub fn policy(&self) -> &IndexPolicy {
        &self.policy
    }

    /// Sequential cursor to persist for resuming; `None` for random readers.
    pub fn cursor(&self) -> Option<usize> {
        self.policy.cursor()
    }

    pub fn num_samples(&self) -> usize {
        self.dataset.num_samples()
    }

    pub fn size_per_sample(&self) -> usize {
        self.dataset.size_per_sample()
    }

    pub fn size_per_label(&self) -> usize {
        self.dataset.size_per_label()
    }

    /// Number of minibatches read so far.
    pub fn batches_read(&self) -> u64 {
        self.batches_read
    }
}
