//! File transfer seam.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::state::SshEndpoint;

/// Moves files between the pod and the local machine over SSH.
///
/// Callers supply an endpoint that just passed a reachability probe; the
/// gateway never probes on its own. Every call stands alone, so a failed
/// transfer does not affect the next one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copies `remote_path` on the pod to `local_path`, creating the local
    /// parent directory first.
    async fn pull(&self, endpoint: &SshEndpoint, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Copies `local_path` to `remote_path` on the pod, creating the remote
    /// parent directory first.
    async fn push(&self, endpoint: &SshEndpoint, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Runs a shell command on the pod and returns its stdout.
    async fn run_remote(&self, endpoint: &SshEndpoint, command: &str) -> Result<String>;
}
