use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::ServeError;
use crate::model::{ModelArtifact, SchemaCheck};
use crate::store::{ArtifactRef, ArtifactStore, Namespace};

/// Body of a successful `/predict` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub status: String,
    pub message: String,
}

/// A class label and the model version that produced it.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: String,
    pub model: ArtifactRef,
}

impl From<Prediction> for PredictionResponse {
    fn from(p: Prediction) -> Self {
        Self {
            prediction: p.label,
            status: "success".to_string(),
            message: format!("prediction from model {}", p.model.version),
        }
    }
}

/// Scores one feature object against whatever model is current.
///
/// The artifact is read on every call, so a newly published model is picked
/// up by the next request without a restart.
#[derive(Clone)]
pub struct PredictionService {
    store: Arc<dyn ArtifactStore>,
    model_key: String,
    schema_check: SchemaCheck,
}

impl PredictionService {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        model_key: impl Into<String>,
        schema_check: SchemaCheck,
    ) -> Self {
        Self {
            store,
            model_key: model_key.into(),
            schema_check,
        }
    }

    pub fn schema_check(&self) -> SchemaCheck {
        self.schema_check
    }

    pub fn score(&self, request: &Map<String, JsonValue>) -> Result<Prediction, ServeError> {
        let artifact = self
            .store
            .get(Namespace::Model, &self.model_key)
            .map_err(|e| {
                if e.is_not_found() {
                    ServeError::ModelUnavailable(self.model_key.clone())
                } else {
                    ServeError::Storage(e)
                }
            })?;
        let model = ModelArtifact::decode(&artifact.bytes)
            .map_err(|e| ServeError::ModelCorrupt(e.to_string()))?;

        let row = model
            .schema
            .arrange(request, self.schema_check)
            .map_err(ServeError::Inference)?;
        let idx = model.forest.predict(&row)?;
        let label = model.classes.get(idx).cloned().ok_or_else(|| {
            ServeError::ModelCorrupt(format!(
                "class index {idx} out of range for {} classes",
                model.classes.len()
            ))
        })?;

        Ok(Prediction {
            label,
            model: artifact.reference,
        })
    }
}
