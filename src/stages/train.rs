use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::data::loader::{parse_bytes, Format};
use crate::data::model::Table;
use crate::error::StageError;
use crate::model::artifact::FORMAT_VERSION;
use crate::model::{FeatureSchema, ForestParams, ModelArtifact, RandomForest};
use crate::store::{ArtifactRef, ArtifactStore, Namespace};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a training run declined to produce a model. Retrying will not help
/// until the dataset itself changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingLabel { label: String, columns: Vec<String> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingLabel { label, columns } => write!(
                f,
                "label column '{label}' not found (columns: {})",
                columns.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Published {
        model: ArtifactRef,
        dataset: ArtifactRef,
        schema: FeatureSchema,
    },
    Skipped {
        dataset: ArtifactRef,
        reason: SkipReason,
    },
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Cleaned dataset → model artifact under one fixed key.
///
/// Two runs finishing close together both write; whichever renames its
/// pointer last is the current model, even if it was fit on older data.
pub struct Trainer {
    store: Arc<dyn ArtifactStore>,
    label_column: String,
    model_key: String,
    params: ForestParams,
}

impl Trainer {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        label_column: impl Into<String>,
        model_key: impl Into<String>,
        params: ForestParams,
    ) -> Self {
        Self {
            store,
            label_column: label_column.into(),
            model_key: model_key.into(),
            params,
        }
    }

    pub fn run(&self, dataset: &ArtifactRef) -> Result<TrainOutcome, StageError> {
        let start = Instant::now();
        let bytes = self
            .store
            .get_version(Namespace::Processed, &dataset.key, &dataset.version)?;
        let failed = |reason: String| StageError::Training {
            key: dataset.key.clone(),
            reason,
        };

        let table = parse_bytes(&bytes, Format::Csv).map_err(|e| failed(format!("{e:#}")))?;

        let Some(label_idx) = table.column_index(&self.label_column) else {
            let reason = SkipReason::MissingLabel {
                label: self.label_column.clone(),
                columns: table.columns.clone(),
            };
            log::warn!("skipping training on {dataset}: {reason}");
            return Ok(TrainOutcome::Skipped {
                dataset: dataset.clone(),
                reason,
            });
        };

        let (x, labels, features) = split_features(&table, label_idx).map_err(failed)?;
        let classes: Vec<String> = labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.iter().position(|c| c == l).unwrap_or_default())
            .collect();

        log::info!(
            "training on {dataset}: {} rows, {} features, classes {:?}",
            x.len(),
            features.len(),
            classes
        );
        let forest = RandomForest::fit(&x, &y, classes.len(), &self.params)
            .map_err(|e| failed(e.to_string()))?;

        let schema = FeatureSchema {
            features,
            label: self.label_column.clone(),
        };
        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            schema: schema.clone(),
            classes,
            forest,
            trained_at: Utc::now(),
            dataset: dataset.clone(),
        };
        let encoded = artifact.encode().map_err(|e| failed(e.to_string()))?;
        let model = self.store.put(Namespace::Model, &self.model_key, &encoded)?;

        log::info!(
            "published {model} ({} bytes) in {:.2?}",
            encoded.len(),
            start.elapsed()
        );
        Ok(TrainOutcome::Published {
            model,
            dataset: dataset.clone(),
            schema,
        })
    }
}

/// Feature matrix, label texts and feature names. Every feature cell must be
/// numeric and every label present.
fn split_features(
    table: &Table,
    label_idx: usize,
) -> Result<(Vec<Vec<f64>>, Vec<String>, Vec<String>), String> {
    let features: Vec<String> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != label_idx)
        .map(|(_, name)| name.clone())
        .collect();

    let mut x = Vec::with_capacity(table.len());
    let mut labels = Vec::with_capacity(table.len());
    for (row_no, row) in table.rows.iter().enumerate() {
        let label = &row[label_idx];
        if label.is_null() {
            return Err(format!("row {row_no} has no label"));
        }
        labels.push(label.label_text());

        let values = row
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != label_idx)
            .map(|(idx, cell)| {
                cell.as_f64().ok_or_else(|| {
                    format!(
                        "row {row_no}, column '{}': '{cell}' is not numeric",
                        table.columns[idx]
                    )
                })
            })
            .collect::<Result<Vec<f64>, String>>()?;
        x.push(values);
    }

    Ok((x, labels, features))
}
