use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StoreError;

use super::{validate_key, Artifact, ArtifactRef, ArtifactStore, ArtifactVersion, Namespace};

#[derive(Default)]
struct Entry {
    versions: Vec<(ArtifactVersion, Vec<u8>)>,
    current: Option<usize>,
}

/// Process-local store, used by tests and single-process runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<(Namespace, String), Entry>>,
    keep_versions: usize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `keep` versions per key; `0` keeps every version.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep_versions = keep;
        self
    }

    fn not_found(namespace: Namespace, key: &str) -> StoreError {
        StoreError::NotFound {
            namespace,
            key: key.to_string(),
        }
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(
        &self,
        namespace: Namespace,
        key: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        validate_key(key)?;
        let version = ArtifactVersion::for_content(bytes);
        let mut entries = self.entries.write();
        let entry = entries.entry((namespace, key.to_string())).or_default();
        entry.versions.push((version.clone(), bytes.to_vec()));
        if self.keep_versions > 0 && entry.versions.len() > self.keep_versions {
            let excess = entry.versions.len() - self.keep_versions;
            entry.versions.drain(..excess);
        }
        entry.current = Some(entry.versions.len() - 1);
        Ok(ArtifactRef {
            namespace,
            key: key.to_string(),
            version,
        })
    }

    fn get(&self, namespace: Namespace, key: &str) -> Result<Artifact, StoreError> {
        let entries = self.entries.read();
        let entry = entries
            .get(&(namespace, key.to_string()))
            .ok_or_else(|| Self::not_found(namespace, key))?;
        let idx = entry.current.ok_or_else(|| Self::not_found(namespace, key))?;
        let (version, bytes) = &entry.versions[idx];
        Ok(Artifact {
            reference: ArtifactRef {
                namespace,
                key: key.to_string(),
                version: version.clone(),
            },
            bytes: bytes.clone(),
        })
    }

    fn get_version(
        &self,
        namespace: Namespace,
        key: &str,
        version: &ArtifactVersion,
    ) -> Result<Vec<u8>, StoreError> {
        let entries = self.entries.read();
        entries
            .get(&(namespace, key.to_string()))
            .and_then(|entry| entry.versions.iter().rev().find(|(v, _)| v == version))
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| Self::not_found(namespace, &format!("{key}@{version}")))
    }

    fn exists(&self, namespace: Namespace, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .read()
            .get(&(namespace, key.to_string()))
            .is_some_and(|entry| entry.current.is_some()))
    }

    fn versions(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Vec<ArtifactVersion>, StoreError> {
        Ok(self
            .entries
            .read()
            .get(&(namespace, key.to_string()))
            .map(|entry| entry.versions.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default())
    }
}
