//! Batch evaluation: replay a labeled dataset against the prediction
//! endpoint and report accuracy.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

use crate::config::Settings;
use crate::data::clean::{clean, CleanOptions};
use crate::data::loader::load_file;
use crate::data::model::{CellValue, Table};
use crate::serve::PredictionResponse;

// ---------------------------------------------------------------------------
// Client seam
// ---------------------------------------------------------------------------

/// What the endpoint said about one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Prediction(String),
    /// Non-200 status, or a 200 whose body could not be read.
    Rejected { status: u16, body: String },
}

#[derive(Error, Debug)]
#[error("connection failed: {0}")]
pub struct ConnectionError(pub String);

#[async_trait]
pub trait PredictionClient: Send + Sync {
    async fn predict(&self, features: &Map<String, JsonValue>) -> Result<Reply, ConnectionError>;
}

pub struct HttpPredictionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpPredictionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PredictionClient for HttpPredictionClient {
    async fn predict(&self, features: &Map<String, JsonValue>) -> Result<Reply, ConnectionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(features)
            .send()
            .await
            .map_err(|e| ConnectionError(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Ok(Reply::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        match serde_json::from_str::<PredictionResponse>(&body) {
            Ok(parsed) => Ok(Reply::Prediction(parsed.prediction)),
            Err(e) => Ok(Reply::Rejected {
                status: status.as_u16(),
                body: format!("unreadable response ({e}): {body}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Correct { expected: String, predicted: String },
    Incorrect { expected: String, predicted: String },
    ApiError { status: u16, body: String },
    ConnectionError(String),
    /// Ground truth was empty; the row was not sent.
    MissingLabel,
    /// Another cell was empty; preprocessing would drop the row, so it was
    /// not sent.
    MissingFeatures,
}

impl RowOutcome {
    pub fn is_scored(&self) -> bool {
        matches!(self, RowOutcome::Correct { .. } | RowOutcome::Incorrect { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RowOutcome::ApiError { .. } | RowOutcome::ConnectionError(_))
    }
}

impl fmt::Display for RowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowOutcome::Correct { expected, predicted } => {
                write!(f, "expected {expected}, predicted {predicted} (correct)")
            }
            RowOutcome::Incorrect { expected, predicted } => {
                write!(f, "expected {expected}, predicted {predicted} (incorrect)")
            }
            RowOutcome::ApiError { status, body } => write!(f, "api error {status}: {body}"),
            RowOutcome::ConnectionError(e) => write!(f, "connection error: {e}"),
            RowOutcome::MissingLabel => f.write_str("no ground truth label"),
            RowOutcome::MissingFeatures => f.write_str("incomplete row, not sent"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub outcomes: Vec<RowOutcome>,
}

impl EvaluationReport {
    pub fn rows(&self) -> usize {
        self.outcomes.len()
    }

    pub fn scored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_scored()).count()
    }

    pub fn correct(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RowOutcome::Correct { .. }))
            .count()
    }

    pub fn errored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }

    /// Correct over scored rows; `None` when nothing could be scored.
    pub fn accuracy(&self) -> Option<f64> {
        match self.scored() {
            0 => None,
            n => Some(self.correct() as f64 / n as f64),
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows, {} scored, {} correct, {} errored, accuracy ",
            self.rows(),
            self.scored(),
            self.correct(),
            self.errored()
        )?;
        match self.accuracy() {
            Some(acc) => write!(f, "{:.2}%", acc * 100.0),
            None => f.write_str("n/a"),
        }
    }
}

/// Canonical form used to compare predicted and true labels.
pub fn normalize_label(raw: &str) -> String {
    let s = raw.trim();
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => format!("{}", v as i64),
        Ok(v) if v.is_finite() => format!("{v}"),
        _ => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct BatchEvaluator {
    client: Arc<dyn PredictionClient>,
    options: CleanOptions,
    sample: Option<usize>,
    seed: u64,
    delay: Duration,
}

impl BatchEvaluator {
    pub fn new(client: Arc<dyn PredictionClient>, settings: &Settings) -> Self {
        Self {
            client,
            options: settings.dataset.clean_options(),
            sample: settings.evaluate.sample,
            seed: settings.evaluate.seed,
            delay: Duration::from_millis(settings.evaluate.delay_ms),
        }
    }

    pub async fn evaluate_file(&self, path: &Path) -> Result<EvaluationReport> {
        let table = load_file(path)?;
        log::info!("evaluating {}: shape {:?}", path.display(), table.shape());
        self.evaluate(&table).await
    }

    /// Send every selected row in turn. Errors on one row never stop the run.
    ///
    /// Complete rows are encoded with the preprocessing transform first, so
    /// requests carry the indicator columns the model was trained on.
    pub async fn evaluate(&self, table: &Table) -> Result<EvaluationReport> {
        let label = &self.options.label_column;
        let Some(label_idx) = table.column_index(label) else {
            bail!(
                "label column '{label}' not found (columns: {})",
                table.columns.join(", ")
            );
        };

        let selected = self.select_rows(table.len());
        let mut selection = Table::new(table.columns.clone());
        let mut unsent: Vec<Option<RowOutcome>> = Vec::with_capacity(selected.len());
        for &row_idx in &selected {
            let row = &table.rows[row_idx];
            unsent.push(if row[label_idx].is_null() {
                Some(RowOutcome::MissingLabel)
            } else if row.iter().any(CellValue::is_null) {
                Some(RowOutcome::MissingFeatures)
            } else {
                None
            });
            selection.rows.push(row.clone());
        }

        // `clean` drops exactly the incomplete rows and keeps the rest in order.
        let encoded = clean(&selection, &self.options).context("encoding evaluation rows")?;
        let label_idx = encoded
            .column_index(label)
            .with_context(|| format!("label column '{label}' lost while encoding"))?;
        log::info!(
            "{} of {} selected rows complete, encoded shape {:?}",
            encoded.len(),
            selected.len(),
            encoded.shape()
        );

        let mut encoded_rows = encoded.rows.iter();
        let mut report = EvaluationReport::default();
        let mut sent = 0usize;
        for (slot, &row_idx) in unsent.into_iter().zip(&selected) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    let row = encoded_rows
                        .next()
                        .context("encoding dropped a complete row")?;
                    if sent > 0 && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    sent += 1;
                    self.score_row(row, label_idx, &encoded.columns).await
                }
            };
            if outcome.is_error() {
                log::warn!("row {row_idx}: {outcome}");
            } else {
                log::info!("row {row_idx}: {outcome}");
            }
            report.outcomes.push(outcome);
        }

        log::info!("evaluation finished: {report}");
        Ok(report)
    }

    fn select_rows(&self, len: usize) -> Vec<usize> {
        match self.sample {
            Some(amount) if amount < len => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                rand::seq::index::sample(&mut rng, len, amount).into_vec()
            }
            _ => (0..len).collect(),
        }
    }

    async fn score_row(
        &self,
        row: &[CellValue],
        label_idx: usize,
        columns: &[String],
    ) -> RowOutcome {
        let expected = normalize_label(&row[label_idx].label_text());
        let body: Map<String, JsonValue> = columns
            .iter()
            .zip(row)
            .enumerate()
            .filter(|(idx, _)| *idx != label_idx)
            .map(|(_, (name, cell))| (name.clone(), cell_to_json(cell)))
            .collect();

        match self.client.predict(&body).await {
            Ok(Reply::Prediction(raw)) => {
                let predicted = normalize_label(&raw);
                if predicted == expected {
                    RowOutcome::Correct { expected, predicted }
                } else {
                    RowOutcome::Incorrect { expected, predicted }
                }
            }
            Ok(Reply::Rejected { status, body }) => RowOutcome::ApiError { status, body },
            Err(e) => RowOutcome::ConnectionError(e.0),
        }
    }
}

fn cell_to_json(cell: &CellValue) -> JsonValue {
    match cell {
        CellValue::Integer(i) => JsonValue::from(*i),
        CellValue::Float(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
        CellValue::Bool(b) => JsonValue::from(u8::from(*b)),
        CellValue::Text(s) => JsonValue::String(s.clone()),
        CellValue::Null => JsonValue::Null,
    }
}
