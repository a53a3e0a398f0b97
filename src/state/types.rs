//! Pod record types.
//!
//! The record is the only durable answer to "which pod do commands act on".
//! It is loaded at the start of an operation and saved at the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// Current version of the record format.
pub const RECORD_VERSION: &str = "1.0";

/// Number of history entries kept in the record.
pub const MAX_HISTORY: usize = 50;

/// The persisted pod record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodRecord {
    /// Record format version.
    pub version: String,
    /// Provider pod identifier; absent until a pod is created.
    #[serde(default)]
    pub pod_id: Option<String>,
    /// Name the pod was created with.
    #[serde(default)]
    pub pod_name: Option<String>,
    /// GPU type the provider accepted.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Lifecycle phase as last observed by the keeper.
    #[serde(default)]
    pub phase: PodPhase,
    /// Last verified SSH coordinates.
    #[serde(default)]
    pub ssh: Option<SshEndpoint>,
    /// When `ssh` last passed a reachability probe.
    #[serde(default)]
    pub ssh_verified_at: Option<DateTime<Utc>>,
    /// When the managed pod was created.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the record was last written.
    pub last_updated: DateTime<Utc>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Lifecycle phase of the managed pod.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    /// No pod is managed.
    #[default]
    Absent,
    /// Create was requested and the provider accepted it.
    Creating,
    /// The pod is running.
    Running,
    /// Stop is in progress.
    Stopping,
    /// The pod is stopped; its disk may still exist.
    Stopped,
    /// The pod was terminated; equivalent to `Absent` for `create`.
    Terminated,
}

/// Resolved SSH coordinates of the pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshEndpoint {
    /// Public IP or hostname.
    pub host: String,
    /// Public port mapped to the pod's port 22.
    pub port: u16,
    /// Login user.
    pub user: String,
}

/// A single entry in the record history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Operation performed.
    pub operation: OperationKind,
    /// Pod the operation acted on.
    #[serde(default)]
    pub pod_id: Option<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Number of warnings raised.
    #[serde(default)]
    pub warnings: usize,
    /// Error message when the operation failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// User-facing operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Provision a new pod.
    Create,
    /// Resume a stopped pod and restore its identity.
    Start,
    /// Back up then stop the pod.
    Stop,
    /// Terminate the pod.
    Terminate,
    /// Pull identity artifacts.
    Backup,
    /// Push identity artifacts.
    Restore,
    /// Probe and print connection coordinates.
    Connect,
    /// Forget the managed pod.
    Clean,
    /// List account pods.
    List,
    /// Show record and provider status.
    Status,
}

impl PodRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            pod_id: None,
            pod_name: None,
            gpu_type: None,
            phase: PodPhase::Absent,
            ssh: None,
            ssh_verified_at: None,
            created_at: None,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Returns true if the record identifies a pod.
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        self.pod_id.is_some()
    }

    /// Returns the managed pod id.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod` if the record is empty.
    pub fn managed_pod_id(&self) -> Result<&str> {
        self.pod_id
            .as_deref()
            .ok_or_else(|| LifecycleError::NoManagedPod.into())
    }

    /// Checks that `create` may replace whatever the record holds.
    ///
    /// # Errors
    ///
    /// Returns `PodAlreadyManaged` if a live pod is recorded and `force` is off.
    pub fn ensure_can_create(&self, force: bool) -> Result<()> {
        match &self.pod_id {
            Some(pod_id) if !force && self.phase != PodPhase::Terminated => {
                Err(LifecycleError::PodAlreadyManaged {
                    pod_id: pod_id.clone(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Records a freshly created pod, dropping every trace of the previous one.
    pub fn adopt_pod(&mut self, pod_id: &str, pod_name: &str, gpu_type: &str) {
        self.pod_id = Some(pod_id.to_string());
        self.pod_name = Some(pod_name.to_string());
        self.gpu_type = Some(gpu_type.to_string());
        self.phase = PodPhase::Creating;
        self.created_at = Some(Utc::now());
        self.invalidate_ssh();
        self.touch();
    }

    /// Updates the phase.
    pub fn set_phase(&mut self, phase: PodPhase) {
        self.phase = phase;
        self.touch();
    }

    /// Stores coordinates that just passed a reachability probe.
    pub fn set_verified_ssh(&mut self, endpoint: SshEndpoint) {
        self.ssh = Some(endpoint);
        self.ssh_verified_at = Some(Utc::now());
        self.touch();
    }

    /// Marks the stored coordinates as stale.
    pub fn invalidate_ssh(&mut self) {
        self.ssh_verified_at = None;
    }

    /// Forgets the managed pod. History is kept.
    pub fn clear(&mut self) {
        self.pod_id = None;
        self.pod_name = None;
        self.gpu_type = None;
        self.phase = PodPhase::Absent;
        self.ssh = None;
        self.ssh_verified_at = None;
        self.created_at = None;
        self.touch();
    }

    /// Adds a history entry, dropping the oldest beyond `MAX_HISTORY`.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

impl Default for PodRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl SshEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    /// `host:port` form used in logs and errors.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(operation: OperationKind, pod_id: Option<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            pod_id,
            success,
            warnings: 0,
            error: None,
        }
    }

    /// Sets the warning count.
    #[must_use]
    pub const fn with_warnings(mut self, warnings: usize) -> Self {
        self.warnings = warnings;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        };
        write!(f, "{phase}")
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Terminate => "terminate",
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Connect => "connect",
            Self::Clean => "clean",
            Self::List => "list",
            Self::Status => "status",
        };
        write!(f, "{op}")
    }
}

impl std::fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
