//! Provisioning API seam.
//!
//! The orchestrator only talks to the provider through this trait, which
//! keeps it testable without network access.

use async_trait::async_trait;

use super::types::{CreatePodRequest, Pod};
use crate::error::Result;

/// Request/response operations of the provisioning API.
///
/// Implementations hold no local state and do not retry beyond their own
/// transport-level policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodApi: Send + Sync {
    /// Creates a pod; fails with `GpuNotAvailable` on a capacity rejection.
    async fn create_pod(&self, request: &CreatePodRequest) -> Result<Pod>;

    /// Gets a pod; fails with `PodNotFound` if the provider does not know it.
    async fn get_pod(&self, pod_id: &str) -> Result<Pod>;

    /// Resumes a stopped pod.
    async fn resume_pod(&self, pod_id: &str) -> Result<Pod>;

    /// Stops a running pod.
    async fn stop_pod(&self, pod_id: &str) -> Result<()>;

    /// Terminates a pod.
    async fn terminate_pod(&self, pod_id: &str) -> Result<()>;

    /// Lists the account's pods.
    async fn list_pods(&self) -> Result<Vec<Pod>>;
}
