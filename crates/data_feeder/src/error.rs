//! src/error.rs
//!
//! Classified failures raised by the feeder.
//!
//! Every public operation returns `anyhow::Result`. Failures that a caller may
//! want to tell apart are raised as a [`FeederError`] inside the `anyhow::Error`,
//! so they can be recovered with `err.downcast_ref::<FeederError>()`:
//!
//! ```ignore
//! match MinibatchFeeder::open(&config) {
//!     Err(e) if matches!(e.downcast_ref(), Some(FeederError::InvalidHeader { .. })) => { ... }
//!     other => { ... }
//! }
//! ```
//!
//! # Taxonomy
//! - Configuration: the dataset cannot be used at all. There is no degraded mode.
//! - Contract: the caller broke the per-call contract (e.g. buffers too small).
//! - Pipeline: the background producer stopped, panicked, or did not deliver in time.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeederError {
    // --- Configuration ---
    #[error("failed to open dataset file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset file {path} is shorter than its 8-byte header")]
    TruncatedHeader { path: PathBuf },

    #[error("invalid matrix dimensions {rows} x {cols} in {path}")]
    InvalidHeader {
        path: PathBuf,
        rows: u32,
        cols: u32,
    },

    #[error("unrecognized dataset file extension {extension:?} for {path} (expected bin, bin8 or bin32)")]
    UnrecognizedExtension { path: PathBuf, extension: String },

    #[error("element type {element_type} of {path} is not supported yet")]
    UnsupportedElementType {
        path: PathBuf,
        element_type: &'static str,
    },

    #[error("labels file {labels} has {label_rows} rows but samples file {samples} has {sample_rows}")]
    LabelRowMismatch {
        samples: PathBuf,
        labels: PathBuf,
        sample_rows: usize,
        label_rows: usize,
    },

    #[error("matrix data has {actual} elements but header declares {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    // --- Contract ---
    #[error("{buffer} buffer holds {actual} elements but the minibatch needs {required}")]
    BufferTooSmall {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },

    // --- Pipeline ---
    #[error("minibatch producer has stopped")]
    ProducerStopped,

    #[error("minibatch producer thread panicked")]
    ProducerPanicked,

    #[error("no minibatch produced within {0:?}")]
    Timeout(Duration),
}
