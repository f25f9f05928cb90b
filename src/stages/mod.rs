//! Pipeline stages. Each `run` is a self-contained invocation: it reads the
//! artifact version it was handed, does its work and writes one artifact.

pub mod preprocess;
pub mod train;

pub use preprocess::Preprocessor;
pub use train::{SkipReason, TrainOutcome, Trainer};
