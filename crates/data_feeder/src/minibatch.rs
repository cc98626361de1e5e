use anyhow::Result;

use crate::error::FeederError;

/// The `Minibatch` struct holds one training step's worth of paired samples and labels.
///
/// Both buffers are dense, row-major `f32` arrays regardless of the element
/// width on disk:
/// - `samples`: `batch_size x size_per_sample`
/// - `labels`: `batch_size x size_per_label`
///
/// Row `i` of `samples` and row `i` of `labels` come from the same record index.
///
/// # Examples
/// With `batch_size = 3`, 784-pixel images and one-hot labels over 10 classes:
/// - `samples()` has length `3 * 784`, `sample(1)` is the second image
/// - `labels()` has length `3 * 10`, `label(1)` is its label row
#[derive(Debug, Clone, PartialEq)]
pub struct Minibatch {
    samples: Vec<f32>,
    labels: Vec<f32>,
    batch_size: usize,
    size_per_sample: usize,
    size_per_label: usize,
}

impl Minibatch {
    /// Allocates a zero-filled minibatch of the given shape.
    pub fn zeros(batch_size: usize, size_per_sample: usize, size_per_label: usize) -> Self {
        Self {
            samples: vec![0.0; batch_size * size_per_sample],
            labels: vec![0.0; batch_size * size_per_label],
            batch_size,
            size_per_sample,
            size_per_label,
        }
    }

    /// Returns the number of records in the batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn size_per_sample(&self) -> usize {
        self.size_per_sample
    }

    pub fn size_per_label(&self) -> usize {
        self.size_per_label
    }

    /// The whole sample buffer, `batch_size x size_per_sample`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// The whole label buffer, `batch_size x size_per_label`.
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Mutable access to both buffers at once, for readers that fill them.
    pub fn buffers_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.samples, &mut self.labels)
    }

    /// Returns sample row `index`, or `None` if out of range.
    pub fn sample(&self, index: usize) -> Option<&[f32]> {
        row(&self.samples, index, self.size_per_sample, self.batch_size)
    }

    /// Returns label row `index`, or `None` if out of range.
    pub fn label(&self, index: usize) -> Option<&[f32]> {
        row(&self.labels, index, self.size_per_label, self.batch_size)
    }

    /// Iterates over `(sample, label)` row pairs.
    pub fn rows(&self) -> impl Iterator<Item = (&[f32], &[f32])> {
        self.samples
            .chunks_exact(self.size_per_sample.max(1))
            .zip(self.labels.chunks_exact(self.size_per_label.max(1)))
            .take(self.batch_size)
    }

    /// Copies this batch into caller-provided buffers.
    ///
    /// Only the first `batch_size x size_per_*` elements of each buffer are written.
    pub fn copy_into(&self, samples: &mut [f32], labels: &mut [f32]) -> Result<()> {
        ensure_capacity(
            self.batch_size,
            self.size_per_sample,
            self.size_per_label,
            samples,
            labels,
        )?;
        samples[..self.samples.len()].copy_from_slice(&self.samples);
        labels[..self.labels.len()].copy_from_slice(&self.labels);
        Ok(())
    }

    /// Consumes the batch, returning `(samples, labels)`.
    pub fn into_parts(self) -> (Vec<f32>, Vec<f32>) {
        (self.samples, self.labels)
    }
}

fn row(buffer: &[f32], index: usize, width: usize, batch_size: usize) -> Option<&[f32]> {
    if index >= batch_size {
        return None;
    }
    buffer.get(index * width..(index + 1) * width)
}

/// Fails with [`FeederError::BufferTooSmall`] unless both buffers can hold a
/// `batch_size` minibatch.
pub(crate) fn ensure_capacity(
    batch_size: usize,
    size_per_sample: usize,
    size_per_label: usize,
    samples: &[f32],
    labels: &[f32],
) -> Result<()> {
    let required = batch_size * size_per_sample;
    if samples.len() < required {
        return Err(FeederError::BufferTooSmall {
            buffer: "samples",
            required,
            actual: samples.len(),
        }
        .into());
    }
    let required = batch_size * size_per_label;
    if labels.len() < required {
        return Err(FeederError::BufferTooSmall {
            buffer: "labels",
            required,
            actual: labels.len(),
        }
        .into());
    }
    Ok(())
}
