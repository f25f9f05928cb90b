use std::sync::Arc;
use std::time::Instant;

use crate::data::clean::{clean, CleanOptions};
use crate::data::loader::{parse_bytes, Format};
use crate::data::writer::to_csv_bytes;
use crate::error::StageError;
use crate::store::{ArtifactRef, ArtifactStore, Namespace};

/// Raw dataset → cleaned numeric dataset, written under the same key in the
/// processed namespace.
pub struct Preprocessor {
    store: Arc<dyn ArtifactStore>,
    options: CleanOptions,
}

impl Preprocessor {
    pub fn new(store: Arc<dyn ArtifactStore>, options: CleanOptions) -> Self {
        Self { store, options }
    }

    /// Clean one raw version. Nothing is written unless every step succeeds.
    pub fn run(&self, raw: &ArtifactRef) -> Result<ArtifactRef, StageError> {
        let start = Instant::now();
        let bytes = self.store.get_version(Namespace::Raw, &raw.key, &raw.version)?;
        log::info!("preprocessing {raw}: {} bytes", bytes.len());

        let transform = |e: anyhow::Error| StageError::Transform {
            key: raw.key.clone(),
            reason: format!("{e:#}"),
        };

        let table = parse_bytes(&bytes, Format::from_key(&raw.key)).map_err(transform)?;
        log::info!("loaded {}: original shape {:?}", raw.key, table.shape());

        let cleaned = clean(&table, &self.options).map_err(transform)?;
        let out = to_csv_bytes(&cleaned).map_err(transform)?;

        let processed = self.store.put(Namespace::Processed, &raw.key, &out)?;
        log::info!(
            "wrote {processed}: cleaned shape {:?} in {:.2?}",
            cleaned.shape(),
            start.elapsed()
        );
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryArtifactStore;

    fn preprocessor(store: Arc<dyn ArtifactStore>) -> Preprocessor {
        Preprocessor::new(
            store,
            CleanOptions {
                label_column: "Label".into(),
                identifier_columns: vec!["SMILES".into()],
            },
        )
    }

    #[test]
    fn writes_cleaned_csv_under_the_same_key() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let raw = store
            .put(
                Namespace::Raw,
                "DIA_trainingset.csv",
                b"SMILES,MolWt,Label\nCCO,46.07,0\nC,,1\nN,17.03,1\n",
            )
            .unwrap();

        let processed = preprocessor(store.clone()).run(&raw).unwrap();
        assert_eq!(processed.namespace, Namespace::Processed);
        assert_eq!(processed.key, "DIA_trainingset.csv");

        let bytes = store.get(Namespace::Processed, "DIA_trainingset.csv").unwrap().bytes;
        assert_eq!(String::from_utf8(bytes).unwrap(), "MolWt,Label\n46.07,0\n17.03,1\n");
    }

    #[test]
    fn unparseable_input_writes_nothing() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let raw = store.put(Namespace::Raw, "broken.json", b"{not json").unwrap();

        let err = preprocessor(store.clone()).run(&raw).unwrap_err();
        assert!(matches!(err, StageError::Transform { .. }));
        assert!(!store.exists(Namespace::Processed, "broken.json").unwrap());
    }

    #[test]
    fn reads_the_referenced_version_not_the_latest() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
        let first = store.put(Namespace::Raw, "a.csv", b"x,Label\n1,0\n").unwrap();
        store.put(Namespace::Raw, "a.csv", b"y,Label\n2,1\n").unwrap();

        preprocessor(store.clone()).run(&first).unwrap();
        let bytes = store.get(Namespace::Processed, "a.csv").unwrap().bytes;
        assert_eq!(bytes, b"x,Label\n1,0\n");
    }
}
