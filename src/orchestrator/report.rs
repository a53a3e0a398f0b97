//! Operation reports.
//!
//! Every user operation returns a report listing its steps, per-artifact
//! results and warnings. Recoverable problems end up here instead of
//! aborting the operation.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StepOutcome;
use crate::runpod::Pod;
use crate::state::{LockInfo, OperationKind, PodRecord, SshEndpoint};

/// Result of one step.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Completed.
    Ok,
    /// Completed with a warning or skipped.
    Warned,
}

/// One step of an operation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepRecord {
    /// Step name.
    pub step: String,
    /// Step result.
    pub status: StepStatus,
    /// What happened.
    pub detail: String,
}

/// Result of moving one artifact.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Copied.
    Transferred,
    /// Not attempted, for example because the local copy is missing.
    Skipped,
    /// Attempted and failed.
    Failed,
}

/// Per-artifact line of a backup or restore.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactReport {
    /// Artifact name.
    pub name: String,
    /// Outcome.
    pub status: ArtifactStatus,
    /// Extra information (error, checksum note).
    pub detail: Option<String>,
}

/// Ready-to-use connection details printed by `connect`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Verified endpoint.
    pub endpoint: SshEndpoint,
    /// `ssh` command line.
    pub ssh_command: String,
    /// `scp` command line template.
    pub scp_command: String,
    /// HTTP proxy URL of the web port.
    pub web_url: String,
}

/// Report of one user operation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OperationReport {
    /// Operation performed.
    pub operation: OperationKind,
    /// Pod acted on.
    pub pod_id: Option<String>,
    /// GPU type, when known.
    pub gpu_type: Option<String>,
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// Artifact results of backup and restore.
    pub artifacts: Vec<ArtifactReport>,
    /// Warnings raised along the way.
    pub warnings: Vec<String>,
    /// Endpoint verified during the operation.
    pub endpoint: Option<SshEndpoint>,
    /// Connection details (connect only).
    pub connection: Option<ConnectionInfo>,
    /// Overall result.
    pub success: bool,
}

impl OperationReport {
    /// Creates an empty, successful report.
    #[must_use]
    pub const fn new(operation: OperationKind, pod_id: Option<String>) -> Self {
        Self {
            operation,
            pod_id,
            gpu_type: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            endpoint: None,
            connection: None,
            success: true,
        }
    }

    /// Records a completed step.
    pub fn step_done(&mut self, step: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!("{step}: {detail}");
        self.steps.push(StepRecord {
            step: step.to_string(),
            status: StepStatus::Ok,
            detail,
        });
    }

    /// Records a step that only produced a warning.
    pub fn step_warned(&mut self, step: &str, warning: impl Into<String>) {
        let warning = warning.into();
        warn!("{step}: {warning}");
        self.warnings.push(warning.clone());
        self.steps.push(StepRecord {
            step: step.to_string(),
            status: StepStatus::Warned,
            detail: warning,
        });
    }

    /// Records a step from its outcome.
    pub fn step_outcome(&mut self, step: &str, outcome: StepOutcome, done_detail: impl Into<String>) {
        match outcome {
            StepOutcome::Done => self.step_done(step, done_detail),
            StepOutcome::Warned(message) => self.step_warned(step, message),
        }
    }

    /// Adds a warning that is not tied to a step.
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Adds an artifact result.
    pub fn artifact(&mut self, name: &str, status: ArtifactStatus, detail: Option<String>) {
        match status {
            ArtifactStatus::Transferred => info!("{name}: transferred"),
            ArtifactStatus::Skipped => warn!("{name}: skipped ({})", detail.as_deref().unwrap_or("")),
            ArtifactStatus::Failed => warn!("{name}: failed ({})", detail.as_deref().unwrap_or("")),
        }
        self.artifacts.push(ArtifactReport {
            name: name.to_string(),
            status,
            detail,
        });
    }

    /// Number of artifacts with `status`.
    #[must_use]
    pub fn count(&self, status: ArtifactStatus) -> usize {
        self.artifacts.iter().filter(|a| a.status == status).count()
    }

    /// True if any artifact failed.
    #[must_use]
    pub fn has_failed_artifacts(&self) -> bool {
        self.count(ArtifactStatus::Failed) > 0
    }

    /// One-line summary of the artifact table.
    #[must_use]
    pub fn artifact_summary(&self) -> String {
        format!(
            "{} transferred, {} skipped, {} failed",
            self.count(ArtifactStatus::Transferred),
            self.count(ArtifactStatus::Skipped),
            self.count(ArtifactStatus::Failed)
        )
    }
}

/// One row of `list`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PodListing {
    /// The provider's view of the pod.
    pub pod: Pod,
    /// True if this is the pod the record manages.
    pub managed: bool,
}

/// Output of `status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    /// Where the record lives.
    pub record_location: String,
    /// The record.
    pub record: PodRecord,
    /// Current lock, if any.
    pub lock: Option<LockInfo>,
    /// Provider view of the managed pod.
    pub provider: Option<Pod>,
    /// Why the provider view is missing.
    pub provider_error: Option<String>,
}

/// Output of `unlock`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnlockOutcome {
    /// The lock that was found, if it could be read.
    pub lock: Option<LockInfo>,
    /// True if a lock file was removed.
    pub removed: bool,
}
