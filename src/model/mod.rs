//! The classifier and the artifact it is shipped in.

pub mod artifact;
pub mod forest;

pub use artifact::{FeatureSchema, ModelArtifact, SchemaCheck};
pub use forest::{ForestParams, RandomForest};
