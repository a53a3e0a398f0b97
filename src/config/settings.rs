//! Keeper settings structures.
//!
//! Every field carries a default so the tool runs with nothing but
//! `RUNPOD_API_KEY` in the environment. A `podkeeper.yaml` file overrides
//! the defaults and environment variables override the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::IdentityArtifact;

/// Root settings for the pod keeper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct KeeperSettings {
    /// Pod creation parameters.
    pub pod: PodSettings,
    /// SSH identity and login user.
    pub ssh: SshSettings,
    /// Backup directory, artifact set, and restart collaborator.
    pub backup: BackupSettings,
    /// Probe, boot, transfer, and API timings.
    pub timing: TimingSettings,
    /// Where the pod record and its lock live.
    pub state: StateSettings,
}

/// Parameters used when creating a pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PodSettings {
    /// Pod name shown in the provider console.
    pub name: String,
    /// Ordered GPU types; the first accepted one wins.
    pub gpu_preference: Vec<String>,
    /// Container disk size in GB.
    pub disk_size_gb: u32,
    /// Persistent volume size in GB.
    pub volume_size_gb: u32,
    /// Mount path for the volume.
    pub volume_mount_path: String,
    /// Provider template identifier.
    pub template_id: Option<String>,
    /// Container image.
    pub image: String,
    /// Secure or community cloud.
    pub cloud_type: CloudType,
    /// Exposed ports in provider notation.
    pub ports: String,
    /// Port of the in-pod web login page.
    pub web_port: u16,
    /// Extra environment variables passed to the container.
    pub env: HashMap<String, String>,
}

/// Cloud type for pod placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudType {
    /// Secure cloud (dedicated datacenters).
    Secure,
    /// Community cloud (shared hosts).
    #[default]
    Community,
}

impl CloudType {
    /// Returns the provider's enum literal.
    #[must_use]
    pub const fn as_api_str(self) -> &'static str {
        match self {
            Self::Secure => "SECURE",
            Self::Community => "COMMUNITY",
        }
    }
}

/// SSH identity settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshSettings {
    /// Private key path; the public key is `<path>.pub`.
    pub key_path: PathBuf,
    /// Login user on the pod.
    pub user: String,
}

/// Backup settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupSettings {
    /// Local directory holding the identity artifacts.
    pub dir: PathBuf,
    /// Artifacts that travel between pod and backup directory.
    pub artifacts: Vec<IdentityArtifact>,
    /// Local script pushed and executed after a restore.
    pub restart_script: Option<PathBuf>,
    /// Remote command executed after a restore when no script is configured.
    pub restart_command: Option<String>,
}

/// Timing settings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingSettings {
    /// Delay between two reachability attempts.
    pub probe_interval_secs: u64,
    /// Per-attempt TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Reachability budget after `create` and before SSH operations.
    pub reachability_timeout_secs: u64,
    /// Reachability budget after `start` (includes boot).
    pub boot_timeout_secs: u64,
    /// Timeout of a single `scp`/`ssh` invocation.
    pub transfer_timeout_secs: u64,
    /// Timeout of a single API request.
    pub api_timeout_secs: u64,
    /// Retries for rate-limited or network-failed API calls.
    pub api_retries: u32,
}

/// Record storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateSettings {
    /// Directory holding `pod.json` and `pod.lock`.
    pub dir: PathBuf,
}

/// Default GPU preference, most wanted first.
pub const DEFAULT_GPU_PREFERENCE: &[&str] = &[
    "NVIDIA GeForce RTX 4090",
    "NVIDIA GeForce RTX 3090",
    "NVIDIA GeForce RTX 4080 SUPER",
];

/// Default remote command that restarts the training node.
pub const DEFAULT_RESTART_COMMAND: &str = "bash /root/rl-swarm/restart_gensyn.sh";

impl Default for PodSettings {
    fn default() -> Self {
        Self {
            name: String::from("gensyn-node"),
            gpu_preference: DEFAULT_GPU_PREFERENCE.iter().map(|s| (*s).to_string()).collect(),
            disk_size_gb: 30,
            volume_size_gb: 30,
            volume_mount_path: String::from("/workspace"),
            template_id: Some(String::from("jvczrc7se1")),
            image: String::from("nodesforall/gensyn-node:latest"),
            cloud_type: CloudType::Community,
            ports: String::from("22/tcp,3000/http"),
            web_port: 3000,
            env: HashMap::new(),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            key_path: home_relative(".ssh/id_rsa"),
            user: String::from("root"),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: home_relative(".gensyn/backup"),
            artifacts: IdentityArtifact::default_set(),
            restart_script: None,
            restart_command: Some(String::from(DEFAULT_RESTART_COMMAND)),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: 5,
            connect_timeout_secs: 5,
            reachability_timeout_secs: 300,
            boot_timeout_secs: 600,
            transfer_timeout_secs: 120,
            api_timeout_secs: 30,
            api_retries: 3,
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".podkeeper"),
        }
    }
}

impl TimingSettings {
    /// Interval between reachability attempts.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Per-attempt connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reachability budget for an already booted pod.
    #[must_use]
    pub const fn reachability_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability_timeout_secs)
    }

    /// Reachability budget for a booting pod.
    #[must_use]
    pub const fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    /// Timeout of one transfer command.
    #[must_use]
    pub const fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Timeout of one API request.
    #[must_use]
    pub const fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

impl PodSettings {
    /// Moves `gpu` to the front of the preference list, adding it if absent.
    pub fn prefer_gpu(&mut self, gpu: &str) {
        self.gpu_preference.retain(|g| g != gpu);
        self.gpu_preference.insert(0, gpu.to_string());
    }
}

impl KeeperSettings {
    /// Path of the public key matching the configured private key.
    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        crate::transfer::public_key_path(&self.ssh.key_path)
    }

    /// Expands a leading `~/` in every path setting.
    pub fn expand_paths(&mut self) {
        self.ssh.key_path = expand_tilde(&self.ssh.key_path);
        self.backup.dir = expand_tilde(&self.backup.dir);
        self.state.dir = expand_tilde(&self.state.dir);
        if let Some(script) = &self.backup.restart_script {
            self.backup.restart_script = Some(expand_tilde(script));
        }
    }
}

fn home_relative(rel: &str) -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from("~").join(rel), |home| home.join(rel))
}

/// Replaces a leading `~` with the user's home directory.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}
