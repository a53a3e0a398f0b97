//! Create, start, stop, terminate, connect and clean.

use tracing::debug;

use super::report::{ConnectionInfo, OperationReport};
use super::{Orchestrator, Resolution};
use crate::config::{CloudType, PodSettings};
use crate::error::Result;
use crate::runpod::{Pod, PodApi, PodProvisioner};
use crate::state::{PodPhase, PodRecord, RecordStore, SshEndpoint};
use crate::transfer::{FileTransfer, ensure_key_pair};

/// Per-invocation overrides for `create`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Pod name instead of the configured one.
    pub name: Option<String>,
    /// GPU type tried before the configured preference.
    pub gpu: Option<String>,
    /// Container disk and volume size in GB.
    pub disk_gb: Option<u32>,
    /// Place the pod in the secure cloud.
    pub secure: bool,
    /// Replace a recorded pod that was not terminated.
    pub force: bool,
}

impl<A, T, S> Orchestrator<A, T, S>
where
    A: PodApi,
    T: FileTransfer,
    S: RecordStore,
{
    /// Pod settings with the invocation's overrides applied.
    fn pod_settings_for(&self, options: &CreateOptions) -> PodSettings {
        let mut pod = self.settings.pod.clone();
        if let Some(name) = &options.name {
            pod.name.clone_from(name);
        }
        if let Some(gpu) = &options.gpu {
            pod.prefer_gpu(gpu);
        }
        if let Some(disk) = options.disk_gb {
            pod.disk_size_gb = disk;
            pod.volume_size_gb = disk;
        }
        if options.secure {
            pod.cloud_type = CloudType::Secure;
        }
        pod
    }

    pub(super) async fn create_pod(
        &self,
        record: &mut PodRecord,
        report: &mut OperationReport,
        options: &CreateOptions,
    ) -> Result<()> {
        record.ensure_can_create(options.force)?;
        if let Some(previous) = record.pod_id.as_deref()
            && record.phase != PodPhase::Terminated
        {
            report.warn(format!(
                "Forgetting pod {previous} without terminating it; it keeps running at the provider"
            ));
        }

        let pod_settings = self.pod_settings_for(options);
        let public_key = ensure_key_pair(&self.settings.ssh.key_path).await?;
        report.step_done(
            "ssh key",
            format!("using {}", self.settings.public_key_path().display()),
        );

        let first_gpu = pod_settings
            .gpu_preference
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        let base = PodProvisioner::<A>::build_create_request(
            &pod_settings,
            &pod_settings.name,
            first_gpu,
            Some(&public_key),
        );

        let provisioned = self
            .provisioner
            .create_with_preference(&base, &pod_settings.gpu_preference)
            .await?;
        let pod_id = provisioned.pod.id.clone();

        if !provisioned.rejected.is_empty() {
            report.step_done(
                "gpu fallback",
                format!("no capacity for {}", provisioned.rejected.join(", ")),
            );
        }
        report.step_done(
            "create",
            format!("pod {pod_id} accepted on {}", provisioned.gpu_type),
        );

        record.adopt_pod(&pod_id, &pod_settings.name, &provisioned.gpu_type);
        self.store.save(record).await?;
        report.pod_id = Some(pod_id.clone());
        report.gpu_type = Some(provisioned.gpu_type.clone());

        let budget = self.settings.timing.reachability_timeout();
        match self.verify_endpoint(record, report, &pod_id, budget).await {
            Ok(Resolution::Reachable(_)) => record.set_phase(PodPhase::Running),
            Ok(Resolution::Unreachable { waited, .. }) => report.step_warned(
                "ssh",
                format!(
                    "Pod {pod_id} not reachable over SSH after {}s; run `podkeeper connect` once it has booted",
                    waited.as_secs()
                ),
            ),
            Err(e) => report.step_warned("ssh", format!("Could not resolve SSH for pod {pod_id}: {e}")),
        }
        Ok(())
    }

    pub(super) async fn start_pod(&self, record: &mut PodRecord, report: &mut OperationReport) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();

        let outcome = self.provisioner.start(&pod_id).await?;
        let already_running = outcome.warning().is_some();
        report.step_outcome("resume", outcome, format!("resume requested for {pod_id}"));

        let budget = if already_running {
            self.settings.timing.reachability_timeout()
        } else {
            self.settings.timing.boot_timeout()
        };
        let endpoint = self
            .verify_endpoint(record, report, &pod_id, budget)
            .await?
            .require(&pod_id)?;
        record.set_phase(PodPhase::Running);

        if already_running {
            report.step_done("restore", "skipped, the pod kept its identity");
            return Ok(());
        }

        self.restore_identity(&endpoint, report).await;
        if report.has_failed_artifacts() {
            report.warn(format!(
                "Identity only partly restored ({}); run `podkeeper restore` to retry",
                report.artifact_summary()
            ));
        }
        Ok(())
    }

    pub(super) async fn stop_pod(&self, record: &mut PodRecord, report: &mut OperationReport) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();
        record.set_phase(PodPhase::Stopping);

        let budget = self.settings.timing.reachability_timeout();
        match self.verify_endpoint(record, report, &pod_id, budget).await {
            Ok(Resolution::Reachable(endpoint)) => {
                let gpu_type = record.gpu_type.clone();
                match self.backup_identity(&pod_id, gpu_type, &endpoint, report).await {
                    Ok(()) if report.has_failed_artifacts() => report.warn(format!(
                        "Backup incomplete ({}); stopping anyway",
                        report.artifact_summary()
                    )),
                    Ok(()) => {}
                    Err(e) => report.step_warned("backup", format!("Backup failed: {e}")),
                }
            }
            Ok(Resolution::Unreachable { .. }) => report.step_warned(
                "backup",
                format!("Skipped, pod {pod_id} is not reachable over SSH"),
            ),
            Err(e) => report.step_warned("backup", format!("Skipped: {e}")),
        }

        let outcome = self.provisioner.stop(&pod_id).await?;
        report.step_outcome("stop", outcome, format!("pod {pod_id} stopped"));
        record.set_phase(PodPhase::Stopped);
        record.invalidate_ssh();
        Ok(())
    }

    pub(super) async fn terminate_pod(
        &self,
        record: &mut PodRecord,
        report: &mut OperationReport,
    ) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();

        let outcome = self.provisioner.terminate(&pod_id).await?;
        report.step_outcome("terminate", outcome, format!("pod {pod_id} terminated"));
        record.set_phase(PodPhase::Terminated);
        record.invalidate_ssh();
        Ok(())
    }

    pub(super) async fn connect_pod(&self, record: &mut PodRecord, report: &mut OperationReport) -> Result<()> {
        let pod_id = record.managed_pod_id()?.to_string();

        let budget = self.settings.timing.reachability_timeout();
        let endpoint = self
            .verify_endpoint(record, report, &pod_id, budget)
            .await?
            .require(&pod_id)?;
        record.set_phase(PodPhase::Running);

        report.connection = Some(self.connection_info(&pod_id, &endpoint));
        Ok(())
    }

    fn connection_info(&self, pod_id: &str, endpoint: &SshEndpoint) -> ConnectionInfo {
        let key = self.settings.ssh.key_path.display();
        ConnectionInfo {
            ssh_command: format!(
                "ssh -i {key} -p {} {}@{}",
                endpoint.port, endpoint.user, endpoint.host
            ),
            scp_command: format!(
                "scp -i {key} -P {} <local-file> {}@{}:<remote-path>",
                endpoint.port, endpoint.user, endpoint.host
            ),
            web_url: Pod::proxy_url(pod_id, self.settings.pod.web_port),
            endpoint: endpoint.clone(),
        }
    }

    pub(super) fn clean_record(record: &mut PodRecord, report: &mut OperationReport) {
        match record.pod_id.as_deref() {
            Some(pod_id) if record.phase != PodPhase::Terminated => report.step_warned(
                "clean",
                format!("Forgot pod {pod_id}; it still exists at the provider unless terminated elsewhere"),
            ),
            Some(pod_id) => report.step_done("clean", format!("forgot pod {pod_id}")),
            None => report.step_done("clean", "record was already empty"),
        }
        debug!("Clearing pod record");
        record.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::{KeeperError, RunPodError, StateError};
    use crate::orchestrator::testing::{
        FakeTransfer, SWARM_PEM, TestOrchestrator, orchestrator, pod, reachable_pod, seed_backup,
        seed_record, settings, ssh_listener,
    };
    use crate::runpod::{MockPodApi, PodStatus};
    use crate::state::{LocalRecordStore, OperationKind};
    use crate::transfer::MockFileTransfer;
    use tempfile::TempDir;

    fn rejected(gpu: &str) -> KeeperError {
        RunPodError::GpuNotAvailable {
            gpu_type: gpu.to_string(),
            message: String::from("There are no longer any instances available"),
        }
        .into()
    }

    async fn saved_record<F: FileTransfer>(orch: &TestOrchestrator<F>) -> PodRecord {
        orch.store().load().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_records_pod_and_verifies_ssh() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;

        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(1)
            .withf(|r| r.env.iter().any(|e| e.key == "PUBLIC_KEY" && e.value.starts_with("ssh-ed25519")))
            .returning(|_| Ok(pod("p1", PodStatus::Created)));
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));

        let orch = orchestrator(api, FakeTransfer::default(), settings(dir.path()));
        let report = orch.create(CreateOptions::default()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.pod_id.as_deref(), Some("p1"));
        assert!(report.warnings.is_empty());

        let record = saved_record(&orch).await;
        assert_eq!(record.pod_id.as_deref(), Some("p1"));
        assert_eq!(record.gpu_type.as_deref(), Some("NVIDIA GeForce RTX 4090"));
        assert_eq!(record.phase, PodPhase::Running);
        assert_eq!(record.ssh, Some(SshEndpoint::new("127.0.0.1", port, "root")));
        assert!(record.ssh_verified_at.is_some());

        let last = record.history.last().unwrap();
        assert_eq!(last.operation, OperationKind::Create);
        assert!(last.success);
    }

    #[tokio::test]
    async fn test_create_falls_back_to_next_gpu() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let mut settings = settings(dir.path());
        settings.pod.gpu_preference = vec![String::from("A"), String::from("B")];

        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(2)
            .returning(|r| match r.gpu_type_id.as_str() {
                "A" => Err(rejected("A")),
                _ => Ok(pod("p2", PodStatus::Created)),
            });
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let report = orch.create(CreateOptions::default()).await.unwrap();

        assert_eq!(report.gpu_type.as_deref(), Some("B"));
        assert!(report.steps.iter().any(|s| s.step == "gpu fallback" && s.detail.contains('A')));
        assert_eq!(saved_record(&orch).await.gpu_type.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_create_exhausted_leaves_record_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        settings.pod.gpu_preference = vec![String::from("A"), String::from("B")];

        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(2)
            .returning(|r| Err(rejected(&r.gpu_type_id)));
        api.expect_get_pod().never();

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let err = orch.create(CreateOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "ProvisioningUnavailable");

        let record = saved_record(&orch).await;
        assert!(record.pod_id.is_none());
        assert_eq!(record.phase, PodPhase::Absent);
        let last = record.history.last().unwrap();
        assert!(!last.success);
        assert!(last.error.as_deref().is_some_and(|e| e.contains("A, B")));
    }

    #[tokio::test]
    async fn test_create_refuses_managed_pod() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Stopped).await;

        let mut api = MockPodApi::new();
        api.expect_create_pod().never();

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let err = orch.create(CreateOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), "PodAlreadyManaged");
        assert_eq!(saved_record(&orch).await.pod_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_create_unreachable_is_warning() {
        let dir = TempDir::new().unwrap();

        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .returning(|_| Ok(pod("p1", PodStatus::Created)));
        api.expect_get_pod()
            .returning(|id| Ok(pod(id, PodStatus::Created)));

        let orch = orchestrator(api, FakeTransfer::default(), settings(dir.path()));
        let report = orch.create(CreateOptions::default()).await.unwrap();

        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("podkeeper connect"));

        let record = saved_record(&orch).await;
        assert_eq!(record.pod_id.as_deref(), Some("p1"));
        assert_eq!(record.phase, PodPhase::Creating);
        assert!(record.ssh_verified_at.is_none());
    }

    #[tokio::test]
    async fn test_clean_then_create_matches_fresh_create() {
        let (_listener, port) = ssh_listener().await;

        let api_for = || {
            let mut api = MockPodApi::new();
            api.expect_create_pod()
                .returning(|_| Ok(pod("p9", PodStatus::Created)));
            api.expect_get_pod()
                .returning(move |id| Ok(reachable_pod(id, port)));
            api
        };

        let fresh_dir = TempDir::new().unwrap();
        let fresh = orchestrator(api_for(), FakeTransfer::default(), settings(fresh_dir.path()));
        fresh.create(CreateOptions::default()).await.unwrap();

        let used_dir = TempDir::new().unwrap();
        let used_settings = settings(used_dir.path());
        seed_record(&used_settings, "p1", PodPhase::Running).await;
        let used = orchestrator(api_for(), FakeTransfer::default(), used_settings);
        used.clean().await.unwrap();
        used.create(CreateOptions::default()).await.unwrap();

        let a = saved_record(&fresh).await;
        let b = saved_record(&used).await;
        assert_eq!(a.pod_id, b.pod_id);
        assert_eq!(a.pod_name, b.pod_name);
        assert_eq!(a.gpu_type, b.gpu_type);
        assert_eq!(a.phase, b.phase);
        assert_eq!(a.ssh, b.ssh);
    }

    #[tokio::test]
    async fn test_create_overrides() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;

        let mut api = MockPodApi::new();
        api.expect_create_pod()
            .times(1)
            .withf(|r| {
                r.gpu_type_id == "NVIDIA L4"
                    && r.name == "node-2"
                    && r.cloud_type == "SECURE"
                    && r.container_disk_in_gb == 50
            })
            .returning(|_| Ok(pod("p3", PodStatus::Created)));
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));

        let orch = orchestrator(api, FakeTransfer::default(), settings(dir.path()));
        let options = CreateOptions {
            name: Some(String::from("node-2")),
            gpu: Some(String::from("NVIDIA L4")),
            disk_gb: Some(50),
            secure: true,
            force: false,
        };
        orch.create(options).await.unwrap();
        assert_eq!(saved_record(&orch).await.pod_name.as_deref(), Some("node-2"));
    }

    #[tokio::test]
    async fn test_start_restores_identity() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Stopped).await;
        seed_backup(&settings);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(move |id| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(pod(id, PodStatus::Exited))
            } else {
                Ok(reachable_pod(id, port))
            }
        });
        api.expect_resume_pod()
            .times(1)
            .returning(|id| Ok(pod(id, PodStatus::Running)));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let report = orch.start().await.unwrap();

        assert!(report.success);
        assert_eq!(report.artifact_summary(), "3 transferred, 0 skipped, 0 failed");

        let record = saved_record(&orch).await;
        assert_eq!(record.phase, PodPhase::Running);
        assert!(record.ssh_verified_at.is_some());
    }

    #[tokio::test]
    async fn test_start_unreachable_fails_and_keeps_record() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Stopped).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(move |id| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(pod(id, PodStatus::Exited))
            } else {
                Ok(pod(id, PodStatus::Running))
            }
        });
        api.expect_resume_pod()
            .returning(|id| Ok(pod(id, PodStatus::Running)));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let err = orch.start().await.unwrap_err();
        assert_eq!(err.kind(), "UnreachablePod");

        let record = saved_record(&orch).await;
        assert_eq!(record.phase, PodPhase::Stopped);
        assert!(!record.history.last().unwrap().success);
    }

    #[tokio::test]
    async fn test_start_running_pod_warns_and_skips_restore() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));
        api.expect_resume_pod().never();

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let report = orch.start().await.unwrap();
        assert!(report.success);
        assert!(report.warnings.iter().any(|w| w.contains("already running")));
        assert!(report.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_stop_backs_up_before_stopping() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let events = Arc::new(Mutex::new(Vec::new()));

        let mut transfer = MockFileTransfer::new();
        let pulls = Arc::clone(&events);
        transfer.expect_pull().times(3).returning(move |_, remote, local| {
            pulls.lock().unwrap().push(format!("pull {remote}"));
            std::fs::write(local, b"identity")?;
            Ok(())
        });
        transfer.expect_push().never();

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));
        let stops = Arc::clone(&events);
        api.expect_stop_pod().times(1).returning(move |_| {
            stops.lock().unwrap().push(String::from("stop"));
            Ok(())
        });

        let orch = orchestrator(api, transfer, settings);
        let report = orch.stop().await.unwrap();
        assert!(report.success);

        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert_eq!(events.last().map(String::as_str), Some("stop"));
        assert!(events[..3].iter().all(|e| e.starts_with("pull ")));

        let record = saved_record(&orch).await;
        assert_eq!(record.phase, PodPhase::Stopped);
        assert!(record.ssh_verified_at.is_none());
    }

    #[tokio::test]
    async fn test_stop_already_stopped_is_warning_after_backup() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;
        let backup_dir = settings.backup.dir.clone();

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));
        api.expect_stop_pod()
            .returning(|_| Err(RunPodError::api_error(400, "Pod is already stopped").into()));

        let orch = orchestrator(api, FakeTransfer::with_identity(), settings);
        let report = orch.stop().await.unwrap();

        assert!(report.success);
        assert_eq!(report.artifact_summary(), "3 transferred, 0 skipped, 0 failed");
        assert!(report.warnings.iter().any(|w| w.contains("already stopped")));
        assert!(backup_dir.join("swarm.pem").exists());
        assert_eq!(saved_record(&orch).await.phase, PodPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_unreachable_pod_still_stops() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(|id| Ok(pod(id, PodStatus::Created)));
        api.expect_stop_pod().times(1).returning(|_| Ok(()));

        let orch = orchestrator(api, FakeTransfer::with_identity(), settings);
        let report = orch.stop().await.unwrap();

        assert!(report.success);
        assert!(report.warnings.iter().any(|w| w.contains("not reachable")));
        assert_eq!(saved_record(&orch).await.phase, PodPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_with_failed_artifact_still_stops() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));
        api.expect_stop_pod().times(1).returning(|_| Ok(()));

        let orch = orchestrator(api, FakeTransfer::with_identity().broken(SWARM_PEM), settings);
        let report = orch.stop().await.unwrap();

        assert!(report.success);
        assert!(report.has_failed_artifacts());
        assert!(report.warnings.iter().any(|w| w.contains("stopping anyway")));
    }

    #[tokio::test]
    async fn test_terminate_keeps_pod_id() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Stopped).await;

        let mut api = MockPodApi::new();
        api.expect_terminate_pod().times(1).returning(|_| Ok(()));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        orch.terminate().await.unwrap();

        let record = saved_record(&orch).await;
        assert_eq!(record.pod_id.as_deref(), Some("p1"));
        assert_eq!(record.phase, PodPhase::Terminated);
    }

    #[tokio::test]
    async fn test_operations_need_managed_pod() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(MockPodApi::new(), FakeTransfer::default(), settings(dir.path()));

        for result in [
            orch.start().await,
            orch.stop().await,
            orch.terminate().await,
            orch.backup().await,
            orch.restore().await,
            orch.connect().await,
        ] {
            assert_eq!(result.unwrap_err().kind(), "NoManagedPod");
        }

        assert!(orch.store().lock_info().await.unwrap().is_none());
        assert_eq!(saved_record(&orch).await.history.len(), 6);
    }

    #[tokio::test]
    async fn test_locked_record_is_refused() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let other = LocalRecordStore::with_base_dir(&settings.state.dir);
        let held = other.acquire_lock("other-host-1-abcd").await.unwrap();

        let mut api = MockPodApi::new();
        api.expect_stop_pod().never();
        let orch = orchestrator(api, FakeTransfer::default(), settings);

        let err = orch.stop().await.unwrap_err();
        assert!(matches!(err, KeeperError::State(StateError::LockedByOther { .. })));

        other.release_lock(&held.lock_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_reports_commands() {
        let dir = TempDir::new().unwrap();
        let (_listener, port) = ssh_listener().await;
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Creating).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .returning(move |id| Ok(reachable_pod(id, port)));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let report = orch.connect().await.unwrap();

        let connection = report.connection.unwrap();
        assert!(connection.ssh_command.ends_with(&format!("-p {port} root@127.0.0.1")));
        assert_eq!(connection.web_url, "https://p1-3000.proxy.runpod.net");
        assert_eq!(saved_record(&orch).await.phase, PodPhase::Running);
    }

    #[tokio::test]
    async fn test_connect_exited_pod_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Stopped).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod()
            .times(1)
            .returning(|id| Ok(pod(id, PodStatus::Exited)));

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let err = orch.connect().await.unwrap_err();
        assert_eq!(err.kind(), "UnreachablePod");
    }

    #[tokio::test]
    async fn test_clean_warns_about_live_pod() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let orch = orchestrator(MockPodApi::new(), FakeTransfer::default(), settings);
        let report = orch.clean().await.unwrap();
        assert_eq!(report.warnings.len(), 1);

        let record = saved_record(&orch).await;
        assert!(record.pod_id.is_none());
        assert_eq!(record.phase, PodPhase::Absent);
        assert_eq!(record.history.last().unwrap().operation, OperationKind::Clean);
    }

    #[tokio::test]
    async fn test_clean_recovers_corrupted_record() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        std::fs::create_dir_all(&settings.state.dir).unwrap();
        std::fs::write(settings.state.dir.join("pod.json"), "{ not json").unwrap();

        let orch = orchestrator(MockPodApi::new(), FakeTransfer::default(), settings);
        orch.clean().await.unwrap();
        assert!(saved_record(&orch).await.pod_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_lock_file_does_not_block_clean() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Terminated).await;
        let lock_path = settings.state.dir.join("pod.lock");
        std::fs::write(&lock_path, "").unwrap();

        let orch = orchestrator(MockPodApi::new(), FakeTransfer::default(), settings);
        orch.clean().await.unwrap();
        assert!(saved_record(&orch).await.pod_id.is_none());
        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_unlock_removes_empty_lock_file() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        std::fs::create_dir_all(&settings.state.dir).unwrap();
        let lock_path = settings.state.dir.join("pod.lock");
        std::fs::write(&lock_path, "").unwrap();

        let orch = orchestrator(MockPodApi::new(), FakeTransfer::default(), settings);
        let status = orch.status().await.unwrap();
        assert!(status.lock.is_none());

        let outcome = orch.unlock().await.unwrap();
        assert!(outcome.removed);
        assert!(outcome.lock.is_none());
        assert!(!lock_path.exists());

        let again = orch.unlock().await.unwrap();
        assert!(!again.removed);
    }

    #[tokio::test]
    async fn test_status_reports_vanished_pod() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let mut api = MockPodApi::new();
        api.expect_get_pod().returning(|id| {
            Err(RunPodError::PodNotFound {
                pod_id: id.to_string(),
            }
            .into())
        });

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let status = orch.status().await.unwrap();
        assert!(status.provider.is_none());
        assert!(status.provider_error.unwrap().contains("p1"));
        assert!(status.lock.is_none());
    }

    #[tokio::test]
    async fn test_list_marks_managed_pod() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        seed_record(&settings, "p1", PodPhase::Running).await;

        let mut api = MockPodApi::new();
        api.expect_list_pods().returning(|| {
            Ok(vec![pod("p0", PodStatus::Exited), pod("p1", PodStatus::Running)])
        });

        let orch = orchestrator(api, FakeTransfer::default(), settings);
        let listing = orch.list().await.unwrap();
        let managed: Vec<_> = listing.iter().filter(|l| l.managed).map(|l| l.pod.id.as_str()).collect();
        assert_eq!(managed, vec!["p1"]);
    }
}
