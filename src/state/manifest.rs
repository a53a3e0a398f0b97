//! Backup manifest.
//!
//! `manifest.json` sits next to the artifacts in the backup directory and
//! records which pod they came from along with a SHA-256 per file, so a
//! later backup can tell when it is about to replace another pod's identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use super::local::write_atomic;
use crate::error::{KeeperError, Result, StateError};

/// Manifest file name inside the backup directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Digest of one backed up artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactDigest {
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
    /// Pod this copy was pulled from. Older manifests leave it to the
    /// manifest-level `pod_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pod: Option<String>,
}

/// Manifest describing the content of a backup directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupManifest {
    /// Pod the artifacts were pulled from.
    #[serde(default)]
    pub pod_id: Option<String>,
    /// GPU type of that pod.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// When the backup ran.
    pub created_at: DateTime<Utc>,
    /// Digests keyed by artifact name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactDigest>,
}

impl ArtifactDigest {
    /// Hashes an in-memory buffer.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            sha256: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
            source_pod: None,
        }
    }

    /// Attributes the digest to `pod_id`.
    #[must_use]
    pub fn with_source(mut self, pod_id: &str) -> Self {
        self.source_pod = Some(pod_id.to_string());
        self
    }

    /// True if both digests describe the same bytes, whatever their source.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.sha256 == other.sha256 && self.size == other.size
    }

    /// Hashes a file. Identity artifacts are small, so it is read whole.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read.
    pub async fn of_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).await?;
        Ok(Self::of_bytes(&bytes))
    }
}

impl BackupManifest {
    /// Creates an empty manifest for a backup from `pod_id`.
    #[must_use]
    pub fn new(pod_id: Option<String>, gpu_type: Option<String>) -> Self {
        Self {
            pod_id,
            gpu_type,
            created_at: Utc::now(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Loads the manifest of `dir`, if any.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the file exists but does not parse.
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            KeeperError::State(StateError::corrupted(format!(
                "Failed to parse {}: {e}",
                path.display()
            )))
        })
    }

    /// Writes the manifest into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the atomic write fails.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(|e| {
            KeeperError::State(StateError::serialization(format!(
                "Failed to serialize manifest: {e}"
            )))
        })?;
        write_atomic(&dir.join(MANIFEST_FILE), &content).await
    }

    /// Returns true if the manifest was written for a different pod.
    #[must_use]
    pub fn is_from_other_pod(&self, pod_id: &str) -> bool {
        self.pod_id.as_deref().is_some_and(|id| id != pod_id)
    }

    /// Looks up the digest of an artifact.
    #[must_use]
    pub fn digest(&self, name: &str) -> Option<&ArtifactDigest> {
        self.artifacts.get(name)
    }

    /// Pod the local copy of `name` came from.
    #[must_use]
    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.artifacts
            .get(name)
            .and_then(|d| d.source_pod.as_deref().or(self.pod_id.as_deref()))
    }

    /// Artifacts whose local copy came from a pod other than `pod_id`, with
    /// that pod.
    #[must_use]
    pub fn foreign_artifacts(&self, pod_id: &str) -> Vec<(&str, &str)> {
        self.artifacts
            .keys()
            .filter_map(|name| {
                self.source_of(name)
                    .filter(|source| *source != pod_id)
                    .map(|source| (name.as_str(), source))
            })
            .collect()
    }

    /// Consumes the manifest into its entries, each naming its source pod.
    #[must_use]
    pub fn into_attributed_artifacts(self) -> BTreeMap<String, ArtifactDigest> {
        let pod_id = self.pod_id;
        self.artifacts
            .into_iter()
            .map(|(name, mut digest)| {
                if digest.source_pod.is_none() {
                    digest.source_pod.clone_from(&pod_id);
                }
                (name, digest)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_of_bytes() {
        let digest = ArtifactDigest::of_bytes(b"abc");
        assert_eq!(
            digest.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.size, 3);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        assert!(BackupManifest::load(dir.path()).await.unwrap().is_none());

        let mut manifest = BackupManifest::new(Some(String::from("pod-1")), None);
        manifest
            .artifacts
            .insert(String::from("swarm.pem"), ArtifactDigest::of_bytes(b"key"));
        manifest.save(dir.path()).await.unwrap();

        let loaded = BackupManifest::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert!(loaded.is_from_other_pod("pod-2"));
        assert!(!loaded.is_from_other_pod("pod-1"));
    }

    #[test]
    fn test_sources_fall_back_to_manifest_pod() {
        let mut manifest = BackupManifest::new(Some(String::from("pod-b")), None);
        manifest
            .artifacts
            .insert(String::from("swarm.pem"), ArtifactDigest::of_bytes(b"a").with_source("pod-a"));
        manifest
            .artifacts
            .insert(String::from("userData.json"), ArtifactDigest::of_bytes(b"b"));

        assert_eq!(manifest.source_of("swarm.pem"), Some("pod-a"));
        assert_eq!(manifest.source_of("userData.json"), Some("pod-b"));
        assert_eq!(manifest.foreign_artifacts("pod-b"), vec![("swarm.pem", "pod-a")]);

        let attributed = manifest.into_attributed_artifacts();
        assert_eq!(attributed["userData.json"].source_pod.as_deref(), Some("pod-b"));
        assert!(attributed["swarm.pem"].same_content(&ArtifactDigest::of_bytes(b"a")));
    }

    #[tokio::test]
    async fn test_digest_of_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("userData.json");
        std::fs::write(&path, b"{}").unwrap();
        let digest = ArtifactDigest::of_file(&path).await.unwrap();
        assert_eq!(digest, ArtifactDigest::of_bytes(b"{}"));
    }
}
