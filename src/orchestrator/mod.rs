//! Pod lifecycle orchestration.
//!
//! The [`Orchestrator`] ties the provisioning API, the file transfer gateway
//! and the record store together. Every state-changing operation runs under
//! the record lock: load the record, act, append a history entry, save.
//! A failed operation leaves the record as it was last saved and only
//! appends the failure to the history.

mod identity;
mod lifecycle;
mod report;
#[cfg(test)]
mod testing;

pub use lifecycle::CreateOptions;
pub use report::{
    ArtifactReport, ArtifactStatus, ConnectionInfo, OperationReport, PodListing, StatusReport,
    StepRecord, StepStatus, UnlockOutcome,
};

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::KeeperSettings;
use crate::error::{KeeperError, LifecycleError, Result};
use crate::probe::ReachabilityProber;
use crate::runpod::{PodApi, PodProvisioner};
use crate::state::{
    HistoryEntry, OperationKind, PodRecord, RecordStore, SshEndpoint, generate_holder_id,
};
use crate::transfer::FileTransfer;

/// Probe intervals spent on one published endpoint before asking the
/// provider again whether the mapping changed.
const PROBE_WINDOW_INTERVALS: u32 = 6;

/// Drives the managed pod through its lifecycle.
pub struct Orchestrator<A, T, S> {
    /// Provisioning API with fallback and no-op handling.
    provisioner: PodProvisioner<A>,
    /// Artifact transfer and remote commands.
    transfer: T,
    /// Pod record storage.
    store: S,
    /// SSH reachability prober.
    prober: ReachabilityProber,
    /// Effective settings.
    settings: KeeperSettings,
    /// Lock holder identity of this process.
    holder: String,
}

/// A lock-guarded operation.
#[derive(Debug, Clone)]
enum Request {
    Create(CreateOptions),
    Start,
    Stop,
    Terminate,
    Backup,
    Restore,
    Connect,
    Clean,
}

impl Request {
    const fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Start => OperationKind::Start,
            Self::Stop => OperationKind::Stop,
            Self::Terminate => OperationKind::Terminate,
            Self::Backup => OperationKind::Backup,
            Self::Restore => OperationKind::Restore,
            Self::Connect => OperationKind::Connect,
            Self::Clean => OperationKind::Clean,
        }
    }
}

/// Outcome of endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    /// The endpoint accepted a TCP connection.
    Reachable(SshEndpoint),
    /// The budget ran out.
    Unreachable {
        /// Last endpoint the provider published.
        last: Option<SshEndpoint>,
        /// Time spent.
        waited: Duration,
    },
}

impl Resolution {
    /// Turns an unreachable outcome into `UnreachablePod`.
    fn require(self, pod_id: &str) -> Result<SshEndpoint> {
        match self {
            Self::Reachable(endpoint) => Ok(endpoint),
            Self::Unreachable { last, waited } => Err(LifecycleError::UnreachablePod {
                pod_id: pod_id.to_string(),
                endpoint: last.map(|e| e.address()),
                waited_secs: waited.as_secs(),
            }
            .into()),
        }
    }
}

impl<A, T, S> Orchestrator<A, T, S>
where
    A: PodApi,
    T: FileTransfer,
    S: RecordStore,
{
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(api: A, transfer: T, store: S, settings: KeeperSettings) -> Self {
        Self {
            provisioner: PodProvisioner::new(api),
            transfer,
            store,
            prober: ReachabilityProber::from_timing(&settings.timing),
            settings,
            holder: generate_holder_id(),
        }
    }

    /// Replaces the reachability prober.
    #[must_use]
    pub const fn with_prober(mut self, prober: ReachabilityProber) -> Self {
        self.prober = prober;
        self
    }

    /// The record store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The effective settings.
    #[must_use]
    pub const fn settings(&self) -> &KeeperSettings {
        &self.settings
    }

    /// Provisions a new pod and records it.
    ///
    /// # Errors
    ///
    /// Returns `PodAlreadyManaged`, `ProvisioningUnavailable`, or an API,
    /// key or state error.
    pub async fn create(&self, options: CreateOptions) -> Result<OperationReport> {
        self.execute(Request::Create(options)).await
    }

    /// Resumes the managed pod and restores its identity.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, `UnreachablePod`, or an API or state error.
    pub async fn start(&self) -> Result<OperationReport> {
        self.execute(Request::Start).await
    }

    /// Backs up the identity, then stops the managed pod.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, or an API or state error from the stop call.
    /// Backup problems are warnings.
    pub async fn stop(&self) -> Result<OperationReport> {
        self.execute(Request::Stop).await
    }

    /// Terminates the managed pod.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, or an API or state error.
    pub async fn terminate(&self) -> Result<OperationReport> {
        self.execute(Request::Terminate).await
    }

    /// Pulls the identity artifacts into the backup directory.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, `UnreachablePod`, or an API or state error.
    /// Per-artifact failures are reported, not returned.
    pub async fn backup(&self) -> Result<OperationReport> {
        self.execute(Request::Backup).await
    }

    /// Pushes the identity artifacts to the pod and restarts the node.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, `UnreachablePod`, or an API or state error.
    pub async fn restore(&self) -> Result<OperationReport> {
        self.execute(Request::Restore).await
    }

    /// Verifies SSH reachability and reports connection details.
    ///
    /// # Errors
    ///
    /// Returns `NoManagedPod`, `UnreachablePod`, or an API or state error.
    pub async fn connect(&self) -> Result<OperationReport> {
        self.execute(Request::Connect).await
    }

    /// Forgets the managed pod without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns a state error if the lock cannot be taken or the record
    /// cannot be written.
    pub async fn clean(&self) -> Result<OperationReport> {
        self.execute(Request::Clean).await
    }

    /// Lists the account's pods, marking the managed one.
    ///
    /// # Errors
    ///
    /// Returns an API error.
    pub async fn list(&self) -> Result<Vec<PodListing>> {
        let managed = match self.store.load().await {
            Ok(record) => record.pod_id,
            Err(e) => {
                warn!("Cannot read pod record: {e}");
                None
            }
        };

        let pods = self.provisioner.api().list_pods().await?;
        debug!("Provider returned {} pod(s)", pods.len());

        Ok(pods
            .into_iter()
            .map(|pod| PodListing {
                managed: managed.as_deref() == Some(pod.id.as_str()),
                pod,
            })
            .collect())
    }

    /// Shows the record next to the provider's view of the managed pod.
    ///
    /// # Errors
    ///
    /// Returns a state error, or an API error other than `PodNotFound`.
    pub async fn status(&self) -> Result<StatusReport> {
        let record = self.store.load().await?;
        let lock = self.store.lock_info().await.unwrap_or_else(|e| {
            warn!("Cannot read lock file: {e}");
            None
        });

        let (provider, provider_error) = match record.pod_id.as_deref() {
            None => (None, None),
            Some(pod_id) => match self.provisioner.api().get_pod(pod_id).await {
                Ok(pod) => (Some(pod), None),
                Err(e) if e.is_pod_not_found() => (
                    None,
                    Some(format!("Pod {pod_id} no longer exists at the provider")),
                ),
                Err(e) => return Err(e),
            },
        };

        Ok(StatusReport {
            record_location: self.store.location(),
            record,
            lock,
            provider,
            provider_error,
        })
    }

    /// Removes the record lock regardless of its holder.
    ///
    /// A lock file that cannot be read is removed too.
    ///
    /// # Errors
    ///
    /// Returns a state error if the lock file cannot be deleted.
    pub async fn unlock(&self) -> Result<UnlockOutcome> {
        let lock = match self.store.lock_info().await {
            Ok(None) => {
                return Ok(UnlockOutcome {
                    lock: None,
                    removed: false,
                });
            }
            Ok(Some(lock)) => {
                warn!("Removing lock {} held by {}", lock.lock_id, lock.holder);
                Some(lock)
            }
            Err(e) => {
                warn!("Removing unreadable lock file: {e}");
                None
            }
        };

        self.store.force_unlock().await?;
        Ok(UnlockOutcome {
            lock,
            removed: true,
        })
    }

    async fn execute(&self, request: Request) -> Result<OperationReport> {
        let kind = request.kind();
        let lock = self.store.acquire_lock(&self.holder).await?;
        debug!("Acquired lock {} for {kind}", lock.lock_id);

        let result = self.execute_locked(request).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn execute_locked(&self, request: Request) -> Result<OperationReport> {
        let kind = request.kind();
        let mut record = match self.store.load().await {
            Ok(record) => record,
            Err(e) if matches!(request, Request::Clean) => {
                warn!("Discarding unreadable pod record: {e}");
                PodRecord::new()
            }
            Err(e) => return Err(e),
        };

        let mut report = OperationReport::new(kind, record.pod_id.clone());
        report.gpu_type.clone_from(&record.gpu_type);
        info!("Running {kind}");

        let outcome = match request {
            Request::Create(options) => self.create_pod(&mut record, &mut report, &options).await,
            Request::Start => self.start_pod(&mut record, &mut report).await,
            Request::Stop => self.stop_pod(&mut record, &mut report).await,
            Request::Terminate => self.terminate_pod(&mut record, &mut report).await,
            Request::Backup => self.backup_pod(&mut record, &mut report).await,
            Request::Restore => self.restore_pod(&mut record, &mut report).await,
            Request::Connect => self.connect_pod(&mut record, &mut report).await,
            Request::Clean => {
                Self::clean_record(&mut record, &mut report);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                record.add_history(
                    HistoryEntry::new(kind, report.pod_id.clone(), report.success)
                        .with_warnings(report.warnings.len()),
                );
                self.store.save(&record).await?;
                Ok(report)
            }
            Err(e) => {
                error!("{kind} failed: {e}");
                self.record_failure(kind, report.pod_id.clone(), &e).await;
                Err(e)
            }
        }
    }

    /// Appends a failure to the last saved record.
    async fn record_failure(&self, kind: OperationKind, pod_id: Option<String>, err: &KeeperError) {
        let mut committed = match self.store.load().await {
            Ok(record) => record,
            Err(e) => {
                warn!("Cannot record failed {kind} in history: {e}");
                return;
            }
        };

        committed.add_history(HistoryEntry::new(kind, pod_id, false).with_error(err.to_string()));
        if let Err(e) = self.store.save(&committed).await {
            warn!("Cannot record failed {kind} in history: {e}");
        }
    }

    /// Resolves the pod's SSH endpoint and waits until it accepts connections.
    ///
    /// The provider is asked for the port mapping, the published endpoint is
    /// probed for a few intervals, and the mapping is fetched again if the
    /// probe fails, until `budget` is spent. A pod that reports a terminal
    /// status ends the wait early.
    async fn resolve_endpoint(&self, pod_id: &str, budget: Duration) -> Result<Resolution> {
        let started = Instant::now();
        let deadline = started + budget;
        let interval = self.prober.interval();
        let window = interval.saturating_mul(PROBE_WINDOW_INTERVALS);
        let mut last = None;

        loop {
            let pod = self.provisioner.api().get_pod(pod_id).await?;
            if pod.desired_status.is_terminal() {
                debug!("Pod {pod_id} is {}, not waiting for SSH", pod.desired_status);
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(endpoint) = pod.ssh_endpoint(&self.settings.ssh.user) {
                if self
                    .prober
                    .wait_until_reachable(&endpoint.host, endpoint.port, remaining.min(window))
                    .await
                {
                    info!("Pod {pod_id} reachable at {endpoint}");
                    return Ok(Resolution::Reachable(endpoint));
                }
                last = Some(endpoint);
            } else {
                debug!("Pod {pod_id} has no public SSH mapping yet ({})", pod.desired_status);
                tokio::time::sleep(interval.min(remaining)).await;
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        Ok(Resolution::Unreachable {
            last,
            waited: started.elapsed(),
        })
    }

    /// Resolves the endpoint and stores the outcome in the record and report.
    async fn verify_endpoint(
        &self,
        record: &mut PodRecord,
        report: &mut OperationReport,
        pod_id: &str,
        budget: Duration,
    ) -> Result<Resolution> {
        record.invalidate_ssh();
        let resolution = self.resolve_endpoint(pod_id, budget).await?;

        if let Resolution::Reachable(endpoint) = &resolution {
            record.set_verified_ssh(endpoint.clone());
            report.endpoint = Some(endpoint.clone());
            report.step_done("ssh", format!("{endpoint} reachable"));
        }
        Ok(resolution)
    }
}
