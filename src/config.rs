//! Runtime configuration: built-in defaults, an optional TOML file, then
//! `TOXFLOW__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::clean::CleanOptions;
use crate::model::{ForestParams, SchemaCheck};

/// File picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "toxflow.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub dataset: DatasetSettings,
    pub training: TrainingSettings,
    pub serve: ServeSettings,
    pub pipeline: PipelineSettings,
    pub evaluate: EvaluateSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub root: PathBuf,
    /// Versions kept per key; older ones are pruned on write. `0` keeps all.
    pub keep_versions: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./artifacts"),
            keep_versions: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    pub label_column: String,
    pub identifier_columns: Vec<String>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            label_column: "Label".to_string(),
            identifier_columns: vec!["SMILES".to_string()],
        }
    }
}

impl DatasetSettings {
    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            label_column: self.label_column.clone(),
            identifier_columns: self.identifier_columns.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Fixed key the current model is written under.
    pub model_key: String,
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            model_key: "model.bin".to_string(),
            n_trees: forest.n_trees,
            max_depth: forest.max_depth,
            min_samples_split: forest.min_samples_split,
            min_samples_leaf: forest.min_samples_leaf,
            seed: forest.seed,
        }
    }
}

impl TrainingSettings {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeSettings {
    pub bind: String,
    pub schema_check: SchemaCheck,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7071".to_string(),
            schema_check: SchemaCheck::Strict,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub event_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluateSettings {
    pub endpoint: String,
    /// Score a random sample of this many rows instead of the whole file.
    pub sample: Option<usize>,
    pub seed: u64,
    pub delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EvaluateSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7071/predict".to_string(),
            sample: None,
            seed: 42,
            delay_ms: 0,
            timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Layer defaults, the config file and the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Settings::default())
            .context("serialising default configuration")?;

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(config::Environment::with_prefix("TOXFLOW").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.dataset.label_column, "Label");
        assert_eq!(settings.store.keep_versions, 20);
        assert_eq!(settings.training.model_key, "model.bin");
        assert_eq!(settings.training.n_trees, 100);
        assert_eq!(settings.training.seed, 42);
        assert_eq!(settings.serve.schema_check, SchemaCheck::Strict);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[store]\nkeep_versions = 3\n").unwrap();
        writeln!(file, "[dataset]\nlabel_column = \"Toxic\"\n").unwrap();
        writeln!(file, "[training]\nn_trees = 7\n").unwrap();
        writeln!(file, "[serve]\nschema_check = \"positional\"").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.store.keep_versions, 3);
        assert_eq!(settings.dataset.label_column, "Toxic");
        assert_eq!(settings.dataset.identifier_columns, vec!["SMILES"]);
        assert_eq!(settings.training.n_trees, 7);
        assert_eq!(settings.training.model_key, "model.bin");
        assert_eq!(settings.serve.schema_check, SchemaCheck::Positional);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/toxflow.toml"))).is_err());
    }
}
