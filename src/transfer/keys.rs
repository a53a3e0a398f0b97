//! Local SSH key provisioning.
//!
//! A pod only accepts the public key it was created with, so `create`
//! makes sure a key pair exists before asking the provider for a pod.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{KeeperError, Result, TransferError};

/// Key algorithm chosen for a new key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Ed25519.
    Ed25519,
    /// RSA, 4096 bits.
    Rsa4096,
}

impl KeyType {
    /// Picks the algorithm from the key file name.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("ed25519") {
            Self::Ed25519
        } else {
            Self::Rsa4096
        }
    }

    /// Arguments of `ssh-keygen` generating a passphrase-less key at `path`.
    #[must_use]
    pub fn keygen_args(self, path: &Path) -> Vec<String> {
        let mut args = match self {
            Self::Ed25519 => vec![String::from("-t"), String::from("ed25519")],
            Self::Rsa4096 => vec![
                String::from("-t"),
                String::from("rsa"),
                String::from("-b"),
                String::from("4096"),
            ],
        };
        args.extend([
            String::from("-f"),
            path.display().to_string(),
            String::from("-N"),
            String::new(),
            String::from("-q"),
        ]);
        args
    }
}

/// Ensures a key pair exists at `key_path` and returns the public key.
///
/// A missing private key is generated; a missing `.pub` next to an existing
/// private key is derived from it.
///
/// # Errors
///
/// Returns `TransferFailure` if `ssh-keygen` cannot run or fails.
pub async fn ensure_key_pair(key_path: &Path) -> Result<String> {
    let public_path = public_key_path(key_path);

    if !tokio::fs::try_exists(key_path).await? {
        let key_type = KeyType::for_path(key_path);
        info!("Generating {key_type:?} SSH key at {}", key_path.display());

        if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        run_keygen(&key_type.keygen_args(key_path)).await?;
    } else if !tokio::fs::try_exists(&public_path).await? {
        info!("Deriving public key {}", public_path.display());
        let public = run_keygen(&[
            String::from("-y"),
            String::from("-f"),
            key_path.display().to_string(),
        ])
        .await?;
        tokio::fs::write(&public_path, &public).await?;
    } else {
        debug!("Using existing SSH key {}", key_path.display());
    }

    let public = tokio::fs::read_to_string(&public_path).await?;
    let public = public.trim().to_string();
    info!("Public key: {public}");
    Ok(public)
}

/// Path of the public half of `key_path`.
#[must_use]
pub fn public_key_path(key_path: &Path) -> PathBuf {
    let mut os = key_path.as_os_str().to_os_string();
    os.push(".pub");
    PathBuf::from(os)
}

async fn run_keygen(args: &[String]) -> Result<String> {
    let output = Command::new("ssh-keygen")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| TransferError::SpawnFailed {
            program: String::from("ssh-keygen"),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(KeeperError::Transfer(TransferError::RemoteCommandFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }))
    }
}
