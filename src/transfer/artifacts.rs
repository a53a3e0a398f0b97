//! Identity artifacts.
//!
//! The files a training node needs to come back with the same identity on a
//! new pod. They are pulled into the backup directory under their `name`
//! and pushed back to `remote_path`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file that must survive pod replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityArtifact {
    /// File name inside the backup directory.
    pub name: String,
    /// Absolute path on the pod.
    pub remote_path: String,
}

impl IdentityArtifact {
    /// Creates an artifact.
    #[must_use]
    pub fn new(name: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_path: remote_path.into(),
        }
    }

    /// Node key, API credential and user data of the swarm node.
    #[must_use]
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::new("swarm.pem", "/root/rl-swarm/swarm.pem"),
            Self::new(
                "userApiKey.json",
                "/root/rl-swarm/modal-login/temp-data/userApiKey.json",
            ),
            Self::new(
                "userData.json",
                "/root/rl-swarm/modal-login/temp-data/userData.json",
            ),
        ]
    }

    /// Directory holding the artifact on the pod.
    #[must_use]
    pub fn remote_dir(&self) -> &str {
        match self.remote_path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.remote_path[..idx],
            None => ".",
        }
    }

    /// Location of the backed up copy.
    #[must_use]
    pub fn local_path(&self, backup_dir: &Path) -> PathBuf {
        backup_dir.join(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let set = IdentityArtifact::default_set();
        let names: Vec<_> = set.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["swarm.pem", "userApiKey.json", "userData.json"]);
        assert!(set.iter().all(|a| a.remote_path.ends_with(&a.name)));
    }

    #[test]
    fn test_remote_dir() {
        let artifact = IdentityArtifact::new("swarm.pem", "/root/rl-swarm/swarm.pem");
        assert_eq!(artifact.remote_dir(), "/root/rl-swarm");
        assert_eq!(IdentityArtifact::new("x", "/x").remote_dir(), "/");
    }

    #[test]
    fn test_local_path() {
        let artifact = IdentityArtifact::new("userData.json", "/root/userData.json");
        assert_eq!(
            artifact.local_path(Path::new("/backup")),
            PathBuf::from("/backup/userData.json")
        );
    }
}
