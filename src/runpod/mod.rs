//! `RunPod` API integration module.
//!
//! This module provides the GraphQL client, the [`PodApi`] seam the
//! orchestrator depends on, and the provisioner that layers GPU fallback and
//! idempotent lifecycle calls on top of it.

mod api;
mod client;
mod provisioner;
mod types;

pub use api::PodApi;
#[cfg(test)]
pub use api::MockPodApi;
pub use client::{RUNPOD_API_URL, RunPodClient};
pub use provisioner::{PodProvisioner, ProvisionedPod};
pub use types::{CreatePodRequest, Pod, PodEnvVar, PodMachine, PodPort, PodRuntime, PodStatus};
