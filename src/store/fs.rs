use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::StoreError;

use super::{validate_key, Artifact, ArtifactRef, ArtifactStore, ArtifactVersion, Namespace};

const CURRENT: &str = "CURRENT";
const VERSIONS: &str = "versions";

/// Filesystem store rooted at `root`:
///
/// ```text
/// <root>/<namespace>/<key>/versions/<version>
/// <root>/<namespace>/<key>/CURRENT
/// ```
///
/// Both files are written to a temp file in the target directory and renamed
/// into place.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    keep_versions: usize,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_versions: 0,
        }
    }

    /// Keep at most `keep` versions per key, oldest pruned first. `0` keeps
    /// every version.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep_versions = keep;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, namespace: Namespace, key: &str) -> PathBuf {
        self.root.join(namespace.as_str()).join(key)
    }

    fn read_current(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<ArtifactVersion, StoreError> {
        let path = self.key_dir(namespace, key).join(CURRENT);
        match fs::read_to_string(&path) {
            Ok(raw) => ArtifactVersion::parse(&raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                namespace,
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Remove the oldest versions beyond the retention limit. The version
    /// `CURRENT` names is never removed. Failures are logged, not returned:
    /// the write they follow has already succeeded.
    fn prune(&self, namespace: Namespace, key: &str) {
        if self.keep_versions == 0 {
            return;
        }
        let (versions, current) = match (
            self.versions(namespace, key),
            self.read_current(namespace, key),
        ) {
            (Ok(versions), Ok(current)) => (versions, current),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("skipping retention for {namespace}/{key}: {e}");
                return;
            }
        };
        let excess = versions.len().saturating_sub(self.keep_versions);
        let dir = self.key_dir(namespace, key).join(VERSIONS);
        for version in versions.iter().take(excess).filter(|v| **v != current) {
            let path = dir.join(version.as_str());
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("pruned {namespace}/{key}@{version}"),
                Err(e) => log::warn!("could not prune {}: {e}", path.display()),
            }
        }
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| StoreError::io(format!("creating temp file in {}", dir.display()), e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(format!("writing {}", target.display()), e))?;
    tmp.persist(target)
        .map_err(|e| StoreError::io(format!("renaming into {}", target.display()), e.error))?;
    Ok(())
}

impl ArtifactStore for FsArtifactStore {
    fn put(
        &self,
        namespace: Namespace,
        key: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        validate_key(key)?;
        let dir = self.key_dir(namespace, key);
        let versions_dir = dir.join(VERSIONS);
        fs::create_dir_all(&versions_dir)
            .map_err(|e| StoreError::io(format!("creating {}", versions_dir.display()), e))?;

        let version = ArtifactVersion::for_content(bytes);
        write_atomically(&versions_dir, &versions_dir.join(version.as_str()), bytes)?;
        write_atomically(&dir, &dir.join(CURRENT), version.as_str().as_bytes())?;
        self.prune(namespace, key);

        Ok(ArtifactRef {
            namespace,
            key: key.to_string(),
            version,
        })
    }

    fn get(&self, namespace: Namespace, key: &str) -> Result<Artifact, StoreError> {
        validate_key(key)?;
        let version = self.read_current(namespace, key)?;
        let bytes = self.get_version(namespace, key, &version)?;
        Ok(Artifact {
            reference: ArtifactRef {
                namespace,
                key: key.to_string(),
                version,
            },
            bytes,
        })
    }

    fn get_version(
        &self,
        namespace: Namespace,
        key: &str,
        version: &ArtifactVersion,
    ) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let path = self
            .key_dir(namespace, key)
            .join(VERSIONS)
            .join(version.as_str());
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    namespace,
                    key: format!("{key}@{version}"),
                }
            } else {
                StoreError::io(format!("reading {}", path.display()), e)
            }
        })
    }

    fn exists(&self, namespace: Namespace, key: &str) -> Result<bool, StoreError> {
        match self.read_current(namespace, key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn versions(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Vec<ArtifactVersion>, StoreError> {
        validate_key(key)?;
        let dir = self.key_dir(namespace, key).join(VERSIONS);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("listing {}", dir.display()), e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| StoreError::io(format!("listing {}", dir.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Leftover temp files from an interrupted write start with '.'.
            if name.starts_with('.') {
                continue;
            }
            versions.push(ArtifactVersion::parse(name)?);
        }
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_and_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());

        assert!(!store.exists(Namespace::Raw, "a.csv").unwrap());
        let first = store.put(Namespace::Raw, "a.csv", b"v1").unwrap();
        let second = store.put(Namespace::Raw, "a.csv", b"v2").unwrap();

        let current = store.get(Namespace::Raw, "a.csv").unwrap();
        assert_eq!(current.bytes, b"v2");
        assert_eq!(current.reference, second);
        assert_eq!(
            store.get_version(Namespace::Raw, "a.csv", &first.version).unwrap(),
            b"v1"
        );
        assert_eq!(store.versions(Namespace::Raw, "a.csv").unwrap().len(), 2);
        assert!(store.exists(Namespace::Raw, "a.csv").unwrap());
    }

    #[test]
    fn retention_prunes_the_oldest_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).with_retention(2);

        let first = store.put(Namespace::Model, "model.bin", b"v1").unwrap();
        let second = store.put(Namespace::Model, "model.bin", b"v2").unwrap();
        let third = store.put(Namespace::Model, "model.bin", b"v3").unwrap();

        let versions = store.versions(Namespace::Model, "model.bin").unwrap();
        assert_eq!(versions, vec![second.version, third.version.clone()]);
        assert!(store
            .get_version(Namespace::Model, "model.bin", &first.version)
            .unwrap_err()
            .is_not_found());
        let current = store.get(Namespace::Model, "model.bin").unwrap();
        assert_eq!(current.reference.version, third.version);
        assert_eq!(current.bytes, b"v3");
    }

    #[test]
    fn namespaces_are_separate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        store.put(Namespace::Raw, "a.csv", b"raw").unwrap();
        let err = store.get(Namespace::Processed, "a.csv").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rejects_traversal_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path());
        assert!(matches!(
            store.put(Namespace::Model, "../escape", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
