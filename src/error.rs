//! Error types for the pod keeper.
//!
//! This module provides the error hierarchy for every step of a pod's
//! lifecycle: configuration, record persistence, the `RunPod` API, file
//! transfers, and orchestration preconditions.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the pod keeper.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pod record and lock errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// `RunPod` API errors.
    #[error("RunPod API error: {0}")]
    RunPod(#[from] RunPodError),

    /// File transfer errors.
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Lifecycle precondition errors.
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required setting is absent.
    #[error("Missing required setting: {name}")]
    MissingSetting {
        /// Name of the missing setting (environment variable or key).
        name: String,
    },
}

/// Pod record and lock errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Record or manifest is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Record could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire record lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Lock is held by another process.
    #[error("Pod record is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// `RunPod` API errors.
#[derive(Debug, Error)]
pub enum RunPodError {
    /// Authentication failed.
    #[error("RunPod authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("RunPod API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("RunPod API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Pod not found (unknown or already terminated).
    #[error("Pod not found: {pod_id}")]
    PodNotFound {
        /// ID of the missing pod.
        pod_id: String,
    },

    /// A single GPU type was rejected for lack of capacity.
    #[error("GPU type not available: {gpu_type} ({message})")]
    GpuNotAvailable {
        /// Requested GPU type.
        gpu_type: String,
        /// Provider message.
        message: String,
    },

    /// Every GPU type of the preference list was rejected.
    #[error("No GPU capacity for any preferred type (tried: {})", .attempted.join(", "))]
    ProvisioningUnavailable {
        /// GPU types attempted, in order.
        attempted: Vec<String>,
    },

    /// Network error.
    #[error("Network error communicating with RunPod: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from RunPod API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// File transfer errors.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A named artifact could not be moved.
    #[error("Failed to {direction} '{artifact}': {message}")]
    ArtifactFailed {
        /// Artifact name.
        artifact: String,
        /// `pull` or `push`.
        direction: String,
        /// Description of the failure.
        message: String,
    },

    /// An `ssh`/`scp`/`ssh-keygen` process could not be started.
    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed {
        /// Program name.
        program: String,
        /// Description of the spawn failure.
        message: String,
    },

    /// A remote command exited unsuccessfully.
    #[error("Remote command failed ({status}): {stderr}")]
    RemoteCommandFailed {
        /// Exit status description.
        status: String,
        /// Captured stderr tail.
        stderr: String,
    },

    /// A transfer or remote command exceeded its timeout.
    #[error("{program} timed out after {timeout_secs}s")]
    Timeout {
        /// Program name.
        program: String,
        /// Timeout that was exceeded.
        timeout_secs: u64,
    },
}

/// Lifecycle precondition errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The record identifies no pod.
    #[error("No pod is managed yet; run `podkeeper create` first")]
    NoManagedPod,

    /// A pod is already managed and `create` was not forced.
    #[error("Pod {pod_id} is already managed; terminate it, run `podkeeper clean`, or pass --force")]
    PodAlreadyManaged {
        /// The currently managed pod.
        pod_id: String,
    },

    /// The pod's SSH endpoint never became reachable.
    #[error("Pod {pod_id} unreachable over SSH after {waited_secs}s{}", .endpoint.as_ref().map(|e| format!(" (last endpoint {e})")).unwrap_or_default())]
    UnreachablePod {
        /// The pod that was probed.
        pod_id: String,
        /// Last resolved endpoint, if the provider published one.
        endpoint: Option<String>,
        /// Time spent waiting.
        waited_secs: u64,
    },
}

/// Result type alias for pod keeper operations.
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Outcome of a step that did not fail.
///
/// Provider no-ops ("already stopped") and best-effort steps that went wrong
/// are `Warned`; the caller records the warning and carries on. Fatal
/// conditions are `Err(KeeperError)` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step did what was asked.
    Done,
    /// The step was skipped or degraded; the message says why.
    Warned(String),
}

impl StepOutcome {
    /// Creates a warned outcome.
    #[must_use]
    pub fn warned(message: impl Into<String>) -> Self {
        Self::Warned(message.into())
    }

    /// Returns the warning, if any.
    #[must_use]
    pub fn warning(&self) -> Option<&str> {
        match self {
            Self::Done => None,
            Self::Warned(message) => Some(message),
        }
    }
}

impl KeeperError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the stable kind name printed on the failure line.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(ConfigError::MissingSetting { .. }) => "ConfigurationMissing",
            Self::Config(_) => "ConfigurationInvalid",
            Self::State(_) => "StateFailure",
            Self::RunPod(RunPodError::ProvisioningUnavailable { .. }) => "ProvisioningUnavailable",
            Self::RunPod(RunPodError::PodNotFound { .. }) => "PodNotFound",
            Self::RunPod(_) => "ApiFailure",
            Self::Transfer(_) => "TransferFailure",
            Self::Lifecycle(LifecycleError::UnreachablePod { .. }) => "UnreachablePod",
            Self::Lifecycle(LifecycleError::NoManagedPod) => "NoManagedPod",
            Self::Lifecycle(LifecycleError::PodAlreadyManaged { .. }) => "PodAlreadyManaged",
            Self::Io(_) => "IoFailure",
            Self::Internal(_) => "Internal",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RunPod(RunPodError::RateLimited { .. } | RunPodError::NetworkError { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RunPod(RunPodError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::RunPod(RunPodError::NetworkError { .. }) => Some(1),
            _ => None,
        }
    }

    /// Returns true if the provider no longer knows the pod.
    #[must_use]
    pub const fn is_pod_not_found(&self) -> bool {
        matches!(self, Self::RunPod(RunPodError::PodNotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a missing-setting error.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingSetting { name: name.into() }
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RunPodError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}
