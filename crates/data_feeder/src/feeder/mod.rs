//! src/feeder/mod.rs
//!
//! This module implements the `MinibatchFeeder`.
//!
//! The `MinibatchFeeder` sits between a training loop and a `DatasetReader`. It
//! either reads each minibatch on the calling thread or keeps one minibatch
//! prefetched on a background producer thread.
//!
//! # Architecture Overview
//!
//! ```text
//!          ┌──────────────────┐
//!          │ samples / labels │ (.bin, .bin8 files)
//!          └────────┬─────────┘
//!                   │ per-record seek + read
//!                   ↓
//!             ┌───────────┐
//!             │   codec   │ (header, big-endian rows, widening)
//!             └─────┬─────┘
//!                   ↓
//!          ┌─────────────────┐
//!          │  DatasetReader  │ ←───── IndexPolicy (random / sequential)
//!          └────────┬────────┘
//!                   │ fills one Minibatch
//!                   ↓
//!          [Producer thread] (threaded mode only, one slot)
//!                   │
//!                   ↓
//!          ┌─────────────────┐
//!          │ MinibatchFeeder │ ←───── FeederConfig
//!          └────────┬────────┘
//!                   │ copies into caller buffers
//!                   ↓
//!             training loop
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/feeder/
//! ├── mod.rs         # Public API exports + module-level architecture docs
//! ├── config.rs      # FeederConfig, builder, JSON loading and validation
//! ├── loader.rs      # MinibatchFeeder and PipelineState
//! └── producer.rs    # Background producer and its slot channels
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let config = FeederConfig::builder()
//!     .samples_path("train-images.bin8")
//!     .labels_path("train-labels.bin")
//!     .batch_size(32)
//!     .threaded(true)
//!     .seed(42)
//!     .build();
//!
//! let mut feeder = MinibatchFeeder::open(&config)?;
//! let mut x = vec![0.0; 32 * feeder.size_per_sample()];
//! let mut y = vec![0.0; 32 * feeder.size_per_label()];
//! feeder.get_labelled_samples(&mut x, &mut y)?;
//! ```
//!
//! # Memory Usage
//! - Inline: the caller's buffers plus one narrow scratch buffer per call
//! - Threaded: one extra `batch_size` minibatch, at most one batch stale

mod config;
mod loader;
mod producer;

pub use config::{FeederConfig, FeederConfigBuilder, SamplingPolicy};
pub use loader::{MinibatchFeeder, PipelineState};
