//! Key-addressed artifact storage with versioned writes.
//!
//! Every `put` lands as an immutable version and then swings the key's
//! "current" pointer, so a reader never sees half of a write and earlier
//! versions stay inspectable. Concurrent writers to one key still resolve
//! last-write-wins on the pointer.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

pub mod fs;
pub mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

// ---------------------------------------------------------------------------
// Namespaces, versions and references
// ---------------------------------------------------------------------------

/// The three logical areas of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Raw,
    Processed,
    Model,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Raw => "raw",
            Namespace::Processed => "processed",
            Namespace::Model => "model",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version id: `<utc micros>-<sha256 prefix>`, sortable by write time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactVersion(String);

impl ArtifactVersion {
    /// Derive the version id for a payload written now.
    pub fn for_content(bytes: &[u8]) -> Self {
        let digest = format!("{:x}", Sha256::digest(bytes));
        Self(format!("{:016}-{}", Utc::now().timestamp_micros(), &digest[..16]))
    }

    /// Wrap an id read back from storage.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(StoreError::Corrupt(format!("bad version id '{raw}'")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Points at one immutable version of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub namespace: Namespace,
    pub key: String,
    pub version: ArtifactVersion,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.key, self.version)
    }
}

/// Bytes of one artifact version together with its reference.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Blob storage shared by every stage. Implementations must be safe to call
/// from many threads at once.
pub trait ArtifactStore: Send + Sync {
    /// Write a new version and make it current, replacing the previous pointer.
    fn put(&self, namespace: Namespace, key: &str, bytes: &[u8]) -> Result<ArtifactRef, StoreError>;

    /// Read the current version.
    fn get(&self, namespace: Namespace, key: &str) -> Result<Artifact, StoreError>;

    /// Read a specific version, current or not.
    fn get_version(
        &self,
        namespace: Namespace,
        key: &str,
        version: &ArtifactVersion,
    ) -> Result<Vec<u8>, StoreError>;

    /// Whether the key has a current version.
    fn exists(&self, namespace: Namespace, key: &str) -> Result<bool, StoreError>;

    /// All versions of a key, oldest first.
    fn versions(&self, namespace: Namespace, key: &str) -> Result<Vec<ArtifactVersion>, StoreError>;
}

/// Keys are single path segments.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}
