//! Pod provisioner.
//!
//! Wraps a [`PodApi`] with the lifecycle rules the orchestrator relies on:
//! ordered GPU fallback on create, and provider no-ops downgraded to
//! warnings on start, stop and terminate.

use tracing::{debug, info, warn};

use crate::config::PodSettings;
use crate::error::{KeeperError, Result, RunPodError, StepOutcome};

use super::api::PodApi;
use super::types::{CreatePodRequest, Pod};

/// A pod the provider accepted.
#[derive(Debug, Clone)]
pub struct ProvisionedPod {
    /// The pod as returned by the create call.
    pub pod: Pod,
    /// GPU type that was accepted.
    pub gpu_type: String,
    /// GPU types rejected before this one, in order.
    pub rejected: Vec<String>,
}

/// Pod provisioner over a provisioning API.
#[derive(Debug)]
pub struct PodProvisioner<A> {
    api: A,
}

impl<A: PodApi> PodProvisioner<A> {
    /// Creates a new pod provisioner.
    #[must_use]
    pub const fn new(api: A) -> Self {
        Self { api }
    }

    /// The underlying API.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Builds the create request for one GPU type from settings.
    #[must_use]
    pub fn build_create_request(
        settings: &PodSettings,
        name: &str,
        gpu_type: &str,
        public_key: Option<&str>,
    ) -> CreatePodRequest {
        let mut request = CreatePodRequest::new(name, gpu_type, &settings.image)
            .with_cloud_type(settings.cloud_type.as_api_str())
            .with_template(settings.template_id.as_deref())
            .with_disk_gb(settings.disk_size_gb, settings.volume_size_gb)
            .with_mount_path(&settings.volume_mount_path)
            .with_ports(&settings.ports)
            .with_env_map(&settings.env);

        if let Some(key) = public_key {
            request = request.with_env("PUBLIC_KEY", key.trim());
        }

        request
    }

    /// Creates a pod, trying `preference` in order.
    ///
    /// A capacity rejection moves on to the next type; any other error
    /// aborts immediately.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningUnavailable` naming every attempted type when all
    /// of them are rejected.
    pub async fn create_with_preference(
        &self,
        base: &CreatePodRequest,
        preference: &[String],
    ) -> Result<ProvisionedPod> {
        let mut rejected = Vec::new();

        for gpu_type in preference {
            info!("Requesting pod '{}' with GPU {gpu_type}", base.name);
            let request = base.for_gpu(gpu_type);

            match self.api.create_pod(&request).await {
                Ok(pod) => {
                    info!("Pod {} accepted on {gpu_type}", pod.id);
                    return Ok(ProvisionedPod {
                        pod,
                        gpu_type: gpu_type.clone(),
                        rejected,
                    });
                }
                Err(KeeperError::RunPod(RunPodError::GpuNotAvailable { message, .. })) => {
                    warn!("GPU {gpu_type} rejected: {message}");
                    rejected.push(gpu_type.clone());
                }
                Err(e) => return Err(e),
            }
        }

        Err(RunPodError::ProvisioningUnavailable {
            attempted: rejected,
        }
        .into())
    }

    /// Resumes a pod unless it already runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod is unknown or the resume call fails.
    pub async fn start(&self, pod_id: &str) -> Result<StepOutcome> {
        let pod = self.api.get_pod(pod_id).await?;
        if pod.is_running() {
            let message = format!("Pod {pod_id} is already running");
            warn!("{message}");
            return Ok(StepOutcome::Warned(message));
        }

        debug!("Resuming pod {pod_id} (status {})", pod.desired_status);
        self.api.resume_pod(pod_id).await?;
        info!("Resume requested for pod {pod_id}");
        Ok(StepOutcome::Done)
    }

    /// Stops a pod; an already stopped pod is a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod is unknown or the stop call fails.
    pub async fn stop(&self, pod_id: &str) -> Result<StepOutcome> {
        let pod = self.api.get_pod(pod_id).await?;
        if pod.desired_status.is_stopped() {
            let message = format!("Pod {pod_id} is already stopped ({})", pod.desired_status);
            warn!("{message}");
            return Ok(StepOutcome::Warned(message));
        }

        match self.api.stop_pod(pod_id).await {
            Ok(()) => {
                info!("Stop requested for pod {pod_id}");
                Ok(StepOutcome::Done)
            }
            Err(KeeperError::RunPod(RunPodError::ApiRequestFailed { message, .. }))
                if is_already_message(&message) =>
            {
                let message = format!("Pod {pod_id} already stopped: {message}");
                warn!("{message}");
                Ok(StepOutcome::Warned(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Terminates a pod; an unknown pod is a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminate call fails for another reason.
    pub async fn terminate(&self, pod_id: &str) -> Result<StepOutcome> {
        match self.api.terminate_pod(pod_id).await {
            Ok(()) => {
                info!("Terminated pod {pod_id}");
                Ok(StepOutcome::Done)
            }
            Err(e) if e.is_pod_not_found() => {
                let message = format!("Pod {pod_id} was already terminated");
                warn!("{message}");
                Ok(StepOutcome::Warned(message))
            }
            Err(KeeperError::RunPod(RunPodError::ApiRequestFailed { message, .. }))
                if is_already_message(&message) =>
            {
                let message = format!("Pod {pod_id} already terminated: {message}");
                warn!("{message}");
                Ok(StepOutcome::Warned(message))
            }
            Err(e) => Err(e),
        }
    }
}

fn is_already_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already") || lower.contains("not running")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runpod::api::MockPodApi;
    use crate::runpod::types::PodStatus;

    fn pod(id: &str, status: PodStatus) -> Pod {
        serde_json::from_value(serde_json::json!({ "id": id, "desiredStatus": status })).unwrap()
    }

    fn rejected(gpu: &str) -> KeeperError {
        RunPodError::GpuNotAvailable {
            gpu_type: gpu.to_string(),
            message: String::from("no instances"),
        }
        .into()
    }

    fn prefs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_falls_back_in_order() {
        let mut api = MockPodApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_create_pod()
            .withf(|r| r.gpu_type_id == "A")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(rejected("A")));
        api.expect_create_pod()
            .withf(|r| r.gpu_type_id == "B")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(pod("pod-b", PodStatus::Created)));

        let provisioner = PodProvisioner::new(api);
        let base = CreatePodRequest::new("gensyn-node", "", "img");
        let created = provisioner
            .create_with_preference(&base, &prefs(&["A", "B", "C"]))
            .await
            .unwrap();
        assert_eq!(created.pod.id, "pod-b");
        assert_eq!(created.gpu_type, "B");
        assert_eq!(created.rejected, vec!["A"]);
    }

    #[tokio::test]
    async fn test_create_exhausted_names_all_types() {
        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(2)
            .returning(|r| Err(rejected(&r.gpu_type_id)));

        let provisioner = PodProvisioner::new(api);
        let base = CreatePodRequest::new("gensyn-node", "", "img");
        let err = provisioner
            .create_with_preference(&base, &prefs(&["A", "B"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ProvisioningUnavailable");
        assert!(matches!(
            err,
            KeeperError::RunPod(RunPodError::ProvisioningUnavailable { ref attempted }) if attempted == &prefs(&["A", "B"])
        ));
    }

    #[tokio::test]
    async fn test_create_other_error_aborts() {
        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(1)
            .returning(|_| Err(RunPodError::api_error(400, "bad template").into()));

        let provisioner = PodProvisioner::new(api);
        let base = CreatePodRequest::new("gensyn-node", "", "img");
        let err = provisioner
            .create_with_preference(&base, &prefs(&["A", "B"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ApiFailure");
    }

    #[tokio::test]
    async fn test_stop_already_stopped_is_warning() {
        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(|id| Ok(pod(id, PodStatus::Exited)));
        api.expect_stop_pod().never();

        let outcome = PodProvisioner::new(api).stop("p1").await.unwrap();
        assert!(outcome.warning().is_some_and(|w| w.contains("already stopped")));
    }

    #[tokio::test]
    async fn test_stop_provider_already_message_is_warning() {
        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(|id| Ok(pod(id, PodStatus::Running)));
        api.expect_stop_pod()
            .returning(|_| Err(RunPodError::api_error(400, "Pod is already stopped").into()));

        let outcome = PodProvisioner::new(api).stop("p1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Warned(_)));
    }

    #[tokio::test]
    async fn test_terminate_unknown_is_warning() {
        let mut api = MockPodApi::new();
        api.expect_terminate_pod().returning(|id| {
            Err(RunPodError::PodNotFound {
                pod_id: id.to_string(),
            }
            .into())
        });

        let outcome = PodProvisioner::new(api).terminate("gone").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Warned(_)));
    }

    #[tokio::test]
    async fn test_start_running_pod_is_warning() {
        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(|id| Ok(pod(id, PodStatus::Running)));
        api.expect_resume_pod().never();

        let outcome = PodProvisioner::new(api).start("p1").await.unwrap();
        assert!(matches!(outcome, StepOutcome::Warned(_)));
    }

    #[test]
    fn test_build_create_request() {
        let settings = PodSettings::default();
        let request = PodProvisioner::<MockPodApi>::build_create_request(
            &settings,
            "gensyn-node",
            "NVIDIA GeForce RTX 4090",
            Some("ssh-rsa AAA user@host\n"),
        );
        assert_eq!(request.cloud_type, "COMMUNITY");
        assert_eq!(request.template_id.as_deref(), Some("jvczrc7se1"));
        assert_eq!(request.container_disk_in_gb, 30);
        assert!(request.env.iter().any(|e| e.key == "PUBLIC_KEY" && e.value == "ssh-rsa AAA user@host"));
    }
}
