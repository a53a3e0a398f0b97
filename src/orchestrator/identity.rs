//! Identity backup and restore.
//!
//! Backups land in `<name>.partial` first and only replace the previous copy
//! once the transfer finished and produced a non-empty file. A copy whose
//! content changed is kept as `<name>.prev`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::report::{ArtifactStatus, OperationReport};
use super::Orchestrator;
use crate::error::{Result, TransferError};
use crate::runpod::PodApi;
use crate::state::{ArtifactDigest, BackupManifest, PodRecord, RecordStore, SshEndpoint};
use crate::transfer::{FileTransfer, IdentityArtifact, sh_quote};

/// Where a configured restart script is uploaded.
const REMOTE_RESTART_SCRIPT: &str = "/tmp/podkeeper-restart.sh";

/// A pulled artifact that replaced the local copy.
struct Pulled {
    digest: ArtifactDigest,
    note: Option<String>,
}

impl<A, T, S> Orchestrator<A, T, S>
where
    A: PodApi,
    T: FileTransfer,
    S: RecordStore,
{
    pub(super) async fn backup_pod(&self, record: &mut PodRecord, report: &mut OperationReport) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();

        let budget = self.settings.timing.reachability_timeout();
        let endpoint = self
            .verify_endpoint(record, report, &pod_id, budget)
            .await?
            .require(&pod_id)?;

        self.backup_identity(&pod_id, record.gpu_type.clone(), &endpoint, report)
            .await?;
        report.success = !report.has_failed_artifacts();
        Ok(())
    }

    pub(super) async fn restore_pod(&self, record: &mut PodRecord, report: &mut OperationReport) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();

        let budget = self.settings.timing.reachability_timeout();
        let endpoint = self
            .verify_endpoint(record, report, &pod_id, budget)
            .await?
            .require(&pod_id)?;

        self.restore_identity(&endpoint, report).await;
        report.success = !report.has_failed_artifacts();
        Ok(())
    }

    /// Pulls every artifact into the backup directory and updates the manifest.
    ///
    /// Per-artifact failures go into the report. Only a backup directory
    /// that cannot be created is an error.
    pub(super) async fn backup_identity(
        &self,
        pod_id: &str,
        gpu_type: Option<String>,
        endpoint: &SshEndpoint,
        report: &mut OperationReport,
    ) -> Result<()> {
        let dir = &self.settings.backup.dir;
        fs::create_dir_all(dir).await?;

        let previous = match BackupManifest::load(dir).await {
            Ok(previous) => previous,
            Err(e) => {
                report.warn(format!("Ignoring unreadable backup manifest: {e}"));
                None
            }
        };
        if let Some(previous) = &previous {
            for (name, source) in previous.foreign_artifacts(pod_id) {
                report.warn(format!(
                    "Backup copy of {name} belongs to pod {source}; a changed copy is kept as .prev"
                ));
            }
        }

        let mut manifest = BackupManifest::new(Some(pod_id.to_string()), gpu_type);
        if let Some(previous) = previous {
            manifest.artifacts = previous.into_attributed_artifacts();
        }

        for artifact in &self.settings.backup.artifacts {
            match self.pull_artifact(artifact, endpoint, dir).await {
                Ok(pulled) => {
                    manifest
                        .artifacts
                        .insert(artifact.name.clone(), pulled.digest.with_source(pod_id));
                    report.artifact(&artifact.name, ArtifactStatus::Transferred, pulled.note);
                }
                Err(e) => {
                    report.artifact(&artifact.name, ArtifactStatus::Failed, Some(e.to_string()));
                    if let Some(source) = manifest.source_of(&artifact.name)
                        && source != pod_id
                    {
                        report.warn(format!(
                            "{} was not refreshed; the backup copy still belongs to pod {source}",
                            artifact.name
                        ));
                    }
                }
            }
        }

        if let Err(e) = manifest.save(dir).await {
            report.warn(format!("Could not write backup manifest: {e}"));
        }

        let summary = report.artifact_summary();
        report.step_done("backup", format!("{summary} into {}", dir.display()));
        Ok(())
    }

    async fn pull_artifact(
        &self,
        artifact: &IdentityArtifact,
        endpoint: &SshEndpoint,
        dir: &Path,
    ) -> Result<Pulled> {
        let target = artifact.local_path(dir);
        let partial = with_suffix(&target, "partial");

        let pulled = self.transfer.pull(endpoint, &artifact.remote_path, &partial).await;
        let digest = match pulled {
            Ok(()) => ArtifactDigest::of_file(&partial).await,
            Err(e) => Err(e),
        };
        let digest = match digest {
            Ok(digest) if digest.size > 0 => digest,
            Ok(_) => {
                remove_quietly(&partial).await;
                return Err(TransferError::ArtifactFailed {
                    artifact: artifact.name.clone(),
                    direction: String::from("pull"),
                    message: format!("{} is empty on the pod", artifact.remote_path),
                }
                .into());
            }
            Err(e) => {
                remove_quietly(&partial).await;
                return Err(e);
            }
        };

        match replace_with_partial(&target, &partial, &digest).await {
            Ok(note) => Ok(Pulled { digest, note }),
            Err(e) => {
                remove_quietly(&partial).await;
                Err(e)
            }
        }
    }

    /// Pushes every locally present artifact, then restarts the node.
    pub(super) async fn restore_identity(&self, endpoint: &SshEndpoint, report: &mut OperationReport) {
        let dir = &self.settings.backup.dir;
        let manifest = BackupManifest::load(dir).await.unwrap_or_else(|e| {
            debug!("Ignoring backup manifest: {e}");
            None
        });

        let mut pushed = 0usize;
        for artifact in &self.settings.backup.artifacts {
            let local = artifact.local_path(dir);
            match fs::try_exists(&local).await {
                Ok(true) => {}
                Ok(false) => {
                    report.warn(format!("{} missing from backup, not restored", artifact.name));
                    report.artifact(
                        &artifact.name,
                        ArtifactStatus::Skipped,
                        Some(String::from("not in backup directory")),
                    );
                    continue;
                }
                Err(e) => {
                    report.artifact(&artifact.name, ArtifactStatus::Failed, Some(e.to_string()));
                    continue;
                }
            }

            if let Some(expected) = manifest.as_ref().and_then(|m| m.digest(&artifact.name))
                && let Ok(actual) = ArtifactDigest::of_file(&local).await
                && !actual.same_content(expected)
            {
                debug!("{} differs from the manifest checksum", artifact.name);
            }

            match self.transfer.push(endpoint, &local, &artifact.remote_path).await {
                Ok(()) => {
                    pushed += 1;
                    report.artifact(&artifact.name, ArtifactStatus::Transferred, None);
                }
                Err(e) => report.artifact(&artifact.name, ArtifactStatus::Failed, Some(e.to_string())),
            }
        }

        let summary = report.artifact_summary();
        report.step_done("restore", summary);

        if pushed == 0 {
            report.step_done("restart", "skipped, nothing was restored");
        } else {
            self.restart_node(endpoint, report).await;
        }
    }

    /// Runs the restart script or command; failure is a warning.
    async fn restart_node(&self, endpoint: &SshEndpoint, report: &mut OperationReport) {
        let backup = &self.settings.backup;

        let result = if let Some(script) = &backup.restart_script {
            let remote = sh_quote(REMOTE_RESTART_SCRIPT);
            match self.transfer.push(endpoint, script, REMOTE_RESTART_SCRIPT).await {
                Ok(()) => {
                    self.transfer
                        .run_remote(endpoint, &format!("chmod +x {remote} && {remote}"))
                        .await
                }
                Err(e) => Err(e),
            }
        } else if let Some(command) = &backup.restart_command {
            self.transfer.run_remote(endpoint, command).await
        } else {
            report.step_done("restart", "no restart configured");
            return;
        };

        match result {
            Ok(output) => {
                debug!("Restart output: {}", output.trim());
                report.step_done("restart", "node restarted");
            }
            Err(e) => report.step_warned("restart", format!("Node restart failed: {e}")),
        }
    }
}

/// Moves a finished pull over `target`, keeping a changed copy as `.prev`.
///
/// If the final rename fails, the previous copy is moved back.
async fn replace_with_partial(
    target: &Path,
    partial: &Path,
    digest: &ArtifactDigest,
) -> Result<Option<String>> {
    if !fs::try_exists(target).await? {
        fs::rename(partial, target).await?;
        return Ok(None);
    }

    if ArtifactDigest::of_file(target).await?.same_content(digest) {
        fs::rename(partial, target).await?;
        return Ok(Some(String::from("unchanged")));
    }

    let prev = with_suffix(target, "prev");
    fs::rename(target, &prev).await?;
    if let Err(e) = fs::rename(partial, target).await {
        if let Err(undo) = fs::rename(&prev, target).await {
            warn!("Could not move {} back: {undo}", prev.display());
        }
        return Err(e.into());
    }
    Ok(Some(String::from("changed, previous copy kept as .prev")))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("Could not remove {}: {e}", path.display());
    }
}
