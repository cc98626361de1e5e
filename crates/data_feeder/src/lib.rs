pub mod codec;
pub mod dataset;
pub mod error;
pub mod feeder;
pub mod minibatch;
pub mod sampler;

pub use codec::{ElementWidth, MatrixHeader};
pub use dataset::{DatasetReader, ElementType, LabelledDataset};
pub use error::FeederError;
pub use feeder::{FeederConfig, FeederConfigBuilder, MinibatchFeeder, PipelineState, SamplingPolicy};
pub use minibatch::Minibatch;
pub use sampler::{IndexPolicy, RandomSampler, Sampler, SequentialSampler};
