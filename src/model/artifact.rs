use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::store::ArtifactRef;

use super::forest::RandomForest;

const MAGIC: &[u8; 4] = b"TXFM";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("not a model artifact (bad magic)")]
    BadMagic,
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u32),
    #[error("encoding model: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decoding model: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

// ---------------------------------------------------------------------------
// Feature schema
// ---------------------------------------------------------------------------

/// How strictly request features are matched against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCheck {
    /// Names must match the schema exactly; values are reordered to fit.
    #[default]
    Strict,
    /// Values are taken in request order and only their count is checked.
    Positional,
}

/// Ordered feature columns a model was fit on, plus the label it predicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub features: Vec<String>,
    pub label: String,
}

impl FeatureSchema {
    /// Turn a JSON request object into one feature row.
    pub fn arrange(
        &self,
        request: &Map<String, JsonValue>,
        check: SchemaCheck,
    ) -> Result<Vec<f64>, String> {
        match check {
            SchemaCheck::Positional => request
                .iter()
                .map(|(name, value)| numeric(name, value))
                .collect(),
            SchemaCheck::Strict => {
                let missing: Vec<&str> = self
                    .features
                    .iter()
                    .filter(|f| !request.contains_key(f.as_str()))
                    .map(String::as_str)
                    .collect();
                let unexpected: Vec<&str> = request
                    .keys()
                    .filter(|k| !self.features.contains(k))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() || !unexpected.is_empty() {
                    return Err(format!(
                        "request does not match the model's {} features \
                         (missing: [{}], unexpected: [{}])",
                        self.features.len(),
                        missing.join(", "),
                        unexpected.join(", ")
                    ));
                }
                self.features
                    .iter()
                    .map(|name| numeric(name, &request[name.as_str()]))
                    .collect()
            }
        }
    }
}

fn numeric(name: &str, value: &JsonValue) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("feature '{name}' is not a number: {value}"))
}

// ---------------------------------------------------------------------------
// Model artifact
// ---------------------------------------------------------------------------

/// Everything the prediction service needs, persisted as one blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub schema: FeatureSchema,
    /// Class label texts; the forest predicts indices into this list.
    pub classes: Vec<String>,
    pub forest: RandomForest,
    pub trained_at: DateTime<Utc>,
    /// The processed dataset version the model was fit on.
    pub dataset: ArtifactRef,
}

impl ModelArtifact {
    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut out = MAGIC.to_vec();
        out.extend(bincode::serde::encode_to_vec(self, bincode::config::standard())?);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let body = bytes.strip_prefix(MAGIC.as_slice()).ok_or(ArtifactError::BadMagic)?;
        let (artifact, _): (ModelArtifact, usize) =
            bincode::serde::decode_from_slice(body, bincode::config::standard())?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(artifact.format_version));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> FeatureSchema {
        FeatureSchema {
            features: vec!["f1".into(), "f2".into()],
            label: "Label".into(),
        }
    }

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn strict_reorders_by_name() {
        let row = schema()
            .arrange(&object(json!({"f2": 9.0, "f1": 5.0})), SchemaCheck::Strict)
            .unwrap();
        assert_eq!(row, vec![5.0, 9.0]);
    }

    #[test]
    fn strict_reports_missing_and_unexpected() {
        let err = schema()
            .arrange(&object(json!({"f1": 1.0, "g": 2.0})), SchemaCheck::Strict)
            .unwrap_err();
        assert!(err.contains("missing: [f2]"), "{err}");
        assert!(err.contains("unexpected: [g]"), "{err}");
    }

    #[test]
    fn positional_takes_request_order_and_ignores_names() {
        let row = schema()
            .arrange(&object(json!({"b": 9.0, "a": 5.0})), SchemaCheck::Positional)
            .unwrap();
        assert_eq!(row, vec![9.0, 5.0]);
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let err = schema()
            .arrange(&object(json!({"f1": "x", "f2": 1})), SchemaCheck::Strict)
            .unwrap_err();
        assert!(err.contains("'f1'"));
    }

    #[test]
    fn decode_rejects_foreign_bytes() {
        assert!(matches!(ModelArtifact::decode(b"nope"), Err(ArtifactError::BadMagic)));
        assert!(matches!(
            ModelArtifact::decode(b"TXFM\xff\xff"),
            Err(ArtifactError::Decode(_))
        ));
    }
}
