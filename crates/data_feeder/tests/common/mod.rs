use anyhow::Result;
use data_feeder::codec::{write_matrix, MatrixHeader};
use data_feeder::{FeederConfig, FeederConfigBuilder};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tempfile::TempDir;

/// Installs a test logger once per binary. Run with `RUST_LOG=debug` to see producer activity.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A samples/labels pair on disk, removed when dropped.
///
/// Record `i` has samples `[i * cols, i * cols + 1, ..]` (modulo 256 for byte
/// files) and the single label `i`.
pub struct Fixture {
    pub dir: TempDir,
    pub samples: PathBuf,
    pub labels: PathBuf,
}

impl Fixture {
    pub fn config(&self, batch_size: usize) -> FeederConfigBuilder {
        FeederConfig::builder()
            .samples_path(&self.samples)
            .labels_path(&self.labels)
            .batch_size(batch_size)
    }
}

fn write_labels(dir: &TempDir, rows: usize) -> Result<PathBuf> {
    let labels = dir.path().join("labels.bin");
    let values: Vec<f32> = (0..rows).map(|i| i as f32).collect();
    write_matrix(&labels, MatrixHeader::new(rows, 1), &values)?;
    Ok(labels)
}

pub fn float_dataset(rows: usize, cols: usize) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let samples = dir.path().join("samples.bin");
    let values: Vec<f32> = (0..rows * cols).map(|v| v as f32).collect();
    write_matrix(&samples, MatrixHeader::new(rows, cols), &values)?;
    let labels = write_labels(&dir, rows)?;
    Ok(Fixture {
        dir,
        samples,
        labels,
    })
}

pub fn byte_dataset(rows: usize, cols: usize) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let samples = dir.path().join("samples.bin8");
    let values: Vec<u8> = (0..rows * cols).map(|v| (v % 256) as u8).collect();
    write_matrix(&samples, MatrixHeader::new(rows, cols), &values)?;
    let labels = write_labels(&dir, rows)?;
    Ok(Fixture {
        dir,
        samples,
        labels,
    })
}

/// A float dataset whose samples header declares `rows` records but whose
/// body only holds the first `present` of them.
pub fn truncated_dataset(rows: usize, present: usize, cols: usize) -> Result<Fixture> {
    let fixture = float_dataset(rows, cols)?;
    let body = (present * cols * std::mem::size_of::<f32>()) as u64;
    OpenOptions::new()
        .write(true)
        .open(&fixture.samples)?
        .set_len(8 + body)?;
    Ok(fixture)
}
