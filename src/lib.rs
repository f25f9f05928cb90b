//! Descriptor table in, toxicity classifier out.
//!
//! ```text
//!   raw/<key>  ──RawUploaded──▶  Preprocessor  ──▶ processed/<key>
//!                                                      │
//!                                                 DatasetReady
//!                                                      ▼
//!   POST /predict ◀── PredictionService ◀── model/<model_key> ◀── Trainer
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod serve;
pub mod stages;
pub mod store;
