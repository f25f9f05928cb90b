//! Explicit messages between pipeline stages.
//!
//! A stage publishes an event naming the exact artifact version it wrote;
//! the dispatcher routes it to the next stage. Terminal events
//! (`ModelPublished`, `TrainingSkipped`, `StageFailed`) let callers observe
//! how a dataset ended up.

use std::fmt;

use tokio::sync::broadcast;

use crate::model::FeatureSchema;
use crate::stages::train::SkipReason;
use crate::store::ArtifactRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Train,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preprocess => f.write_str("preprocess"),
            Stage::Train => f.write_str("train"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A raw dataset was written.
    RawUploaded(ArtifactRef),
    /// A cleaned dataset was written and is ready for training.
    DatasetReady(ArtifactRef),
    /// A model fit on `dataset` is now current.
    ModelPublished {
        model: ArtifactRef,
        dataset: ArtifactRef,
        schema: FeatureSchema,
    },
    /// Training declined to run; no model was written.
    TrainingSkipped {
        dataset: ArtifactRef,
        reason: SkipReason,
    },
    /// A stage kept failing until its retry budget ran out.
    StageFailed {
        stage: Stage,
        artifact: ArtifactRef,
        attempts: u32,
        error: String,
    },
}

impl PipelineEvent {
    /// Key of the dataset this event is about, for correlating a file with
    /// its outcome.
    pub fn dataset_key(&self) -> &str {
        match self {
            PipelineEvent::RawUploaded(r) | PipelineEvent::DatasetReady(r) => &r.key,
            PipelineEvent::ModelPublished { dataset, .. } => &dataset.key,
            PipelineEvent::TrainingSkipped { dataset, .. } => &dataset.key,
            PipelineEvent::StageFailed { artifact, .. } => &artifact.key,
        }
    }

    /// Whether no further events follow for this dataset.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            PipelineEvent::RawUploaded(_) | PipelineEvent::DatasetReady(_)
        )
    }
}

/// Broadcast bus; every subscriber sees every event published after it
/// subscribed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PipelineEvent) {
        log::debug!("event: {event:?}");
        // No subscribers is fine: nobody is waiting on this dataset.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}
