//! `RunPod` API types and data structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::SshEndpoint;

/// A `RunPod` pod instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Unique pod identifier.
    pub id: String,
    /// Pod name.
    #[serde(default)]
    pub name: String,
    /// Status the provider is driving the pod towards.
    #[serde(default)]
    pub desired_status: PodStatus,
    /// Image name.
    #[serde(default)]
    pub image_name: String,
    /// Hourly price in USD.
    #[serde(default)]
    pub cost_per_hr: Option<f64>,
    /// GPU count.
    #[serde(default)]
    pub gpu_count: u32,
    /// Volume in GB.
    #[serde(default)]
    pub volume_in_gb: u32,
    /// Container disk in GB.
    #[serde(default)]
    pub container_disk_in_gb: u32,
    /// Machine information.
    #[serde(default)]
    pub machine: Option<PodMachine>,
    /// Runtime information; absent until the container is up.
    #[serde(default)]
    pub runtime: Option<PodRuntime>,
}

/// Pod machine information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodMachine {
    /// GPU type identifier.
    #[serde(default)]
    pub gpu_type_id: Option<String>,
    /// Host identifier.
    #[serde(default)]
    pub pod_host_id: Option<String>,
}

/// Pod runtime information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodRuntime {
    /// Port mappings.
    #[serde(default)]
    pub ports: Vec<PodPort>,
    /// Uptime in seconds.
    #[serde(default)]
    pub uptime_in_seconds: u64,
}

/// One published port mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodPort {
    /// Address the port is published on.
    #[serde(default)]
    pub ip: Option<String>,
    /// Whether `ip` is reachable from the internet.
    #[serde(default)]
    pub is_ip_public: bool,
    /// Port inside the container.
    pub private_port: u16,
    /// Port on `ip`.
    #[serde(default)]
    pub public_port: Option<u16>,
    /// `tcp` or `http`.
    #[serde(rename = "type", default)]
    pub port_type: Option<String>,
}

/// Pod environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodEnvVar {
    /// Variable key.
    pub key: String,
    /// Variable value.
    pub value: String,
}

/// Pod status as reported in `desiredStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodStatus {
    /// Accepted, container not started yet.
    Created,
    /// Pod is running.
    Running,
    /// Pod is restarting.
    Restarting,
    /// Pod is stopped; its volume is kept.
    Exited,
    /// Pod is paused.
    Paused,
    /// Host failure.
    Dead,
    /// Pod is gone.
    Terminated,
    /// Any status this client does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Request to create a new pod.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodRequest {
    /// Cloud type (SECURE or COMMUNITY).
    pub cloud_type: String,
    /// GPU type ID.
    pub gpu_type_id: String,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// Pod name.
    pub name: String,
    /// Container image.
    pub image_name: String,
    /// Template identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Volume in GB.
    pub volume_in_gb: u32,
    /// Container disk in GB.
    pub container_disk_in_gb: u32,
    /// Volume mount path.
    pub volume_mount_path: String,
    /// Ports to expose (e.g., "22/tcp,3000/http").
    pub ports: String,
    /// Request a public IP so SSH can be reached directly.
    pub support_public_ip: bool,
    /// Start the in-container SSH daemon.
    pub start_ssh: bool,
    /// Environment variables.
    pub env: Vec<PodEnvVar>,
}

impl Pod {
    /// Returns the GPU type name if available.
    #[must_use]
    pub fn gpu_type_name(&self) -> Option<&str> {
        self.machine.as_ref().and_then(|m| m.gpu_type_id.as_deref())
    }

    /// Resolves SSH coordinates from the runtime port table.
    ///
    /// Only a public TCP mapping of port 22 counts.
    #[must_use]
    pub fn ssh_endpoint(&self, user: &str) -> Option<SshEndpoint> {
        self.runtime
            .as_ref()?
            .ports
            .iter()
            .filter(|p| p.private_port == 22 && p.is_ip_public)
            .filter(|p| p.port_type.as_deref().is_none_or(|t| t.eq_ignore_ascii_case("tcp")))
            .find_map(|p| match (&p.ip, p.public_port) {
                (Some(ip), Some(port)) if !ip.is_empty() => Some(SshEndpoint::new(ip, port, user)),
                _ => None,
            })
    }

    /// HTTP proxy URL of an in-pod web port.
    #[must_use]
    pub fn proxy_url(pod_id: &str, port: u16) -> String {
        format!("https://{pod_id}-{port}.proxy.runpod.net")
    }

    /// Checks if the pod is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.desired_status, PodStatus::Running)
    }
}

impl PodStatus {
    /// True for statuses a pod never leaves without an explicit request.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Dead | Self::Terminated)
    }

    /// True if the pod is not running and not booting.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Exited | Self::Paused)
    }
}

impl CreatePodRequest {
    /// Creates a request with one GPU of `gpu_type_id`.
    #[must_use]
    pub fn new(name: &str, gpu_type_id: &str, image: &str) -> Self {
        Self {
            cloud_type: String::from("COMMUNITY"),
            gpu_type_id: gpu_type_id.to_string(),
            gpu_count: 1,
            name: name.to_string(),
            image_name: image.to_string(),
            template_id: None,
            volume_in_gb: 30,
            container_disk_in_gb: 30,
            volume_mount_path: String::from("/workspace"),
            ports: String::from("22/tcp"),
            support_public_ip: true,
            start_ssh: true,
            env: Vec::new(),
        }
    }

    /// Sets the cloud type.
    #[must_use]
    pub fn with_cloud_type(mut self, cloud_type: &str) -> Self {
        self.cloud_type = cloud_type.to_string();
        self
    }

    /// Sets the template.
    #[must_use]
    pub fn with_template(mut self, template_id: Option<&str>) -> Self {
        self.template_id = template_id.map(String::from);
        self
    }

    /// Sets volume and container disk sizes.
    #[must_use]
    pub const fn with_disk_gb(mut self, container_gb: u32, volume_gb: u32) -> Self {
        self.container_disk_in_gb = container_gb;
        self.volume_in_gb = volume_gb;
        self
    }

    /// Sets the volume mount path.
    #[must_use]
    pub fn with_mount_path(mut self, path: &str) -> Self {
        self.volume_mount_path = path.to_string();
        self
    }

    /// Sets the ports to expose.
    #[must_use]
    pub fn with_ports(mut self, ports: &str) -> Self {
        self.ports = ports.to_string();
        self
    }

    /// Adds an environment variable, replacing an existing one with the same key.
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.retain(|e| e.key != key);
        self.env.push(PodEnvVar {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Adds every variable of `env`, sorted by key.
    #[must_use]
    pub fn with_env_map(mut self, env: &HashMap<String, String>) -> Self {
        let mut pairs: Vec<_> = env.iter().collect();
        pairs.sort();
        for (key, value) in pairs {
            self = self.with_env(key, value);
        }
        self
    }

    /// Copy of the request targeting another GPU type.
    #[must_use]
    pub fn for_gpu(&self, gpu_type_id: &str) -> Self {
        Self {
            gpu_type_id: gpu_type_id.to_string(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Paused => "paused",
            Self::Dead => "dead",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_ports(ports: serde_json::Value) -> Pod {
        serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "name": "gensyn-node",
            "desiredStatus": "RUNNING",
            "runtime": { "ports": ports, "uptimeInSeconds": 12 }
        }))
        .unwrap()
    }

    #[test]
    fn test_ssh_endpoint_from_public_tcp_port() {
        let pod = pod_with_ports(serde_json::json!([
            { "ip": "100.65.0.2", "isIpPublic": false, "privatePort": 22, "publicPort": 22, "type": "tcp" },
            { "ip": "194.26.196.173", "isIpPublic": true, "privatePort": 22, "publicPort": 31432, "type": "tcp" },
            { "ip": "194.26.196.173", "isIpPublic": true, "privatePort": 3000, "publicPort": 31433, "type": "http" }
        ]));
        let endpoint = pod.ssh_endpoint("root").unwrap();
        assert_eq!(endpoint, SshEndpoint::new("194.26.196.173", 31432, "root"));
    }

    #[test]
    fn test_ssh_endpoint_missing() {
        let pod = pod_with_ports(serde_json::json!([
            { "ip": "100.65.0.2", "isIpPublic": false, "privatePort": 22, "publicPort": 22, "type": "tcp" }
        ]));
        assert!(pod.ssh_endpoint("root").is_none());

        let pod: Pod = serde_json::from_value(serde_json::json!({ "id": "x", "runtime": null })).unwrap();
        assert!(pod.ssh_endpoint("root").is_none());
    }

    #[test]
    fn test_unknown_status_parses() {
        let pod: Pod =
            serde_json::from_value(serde_json::json!({ "id": "x", "desiredStatus": "MIGRATING" })).unwrap();
        assert_eq!(pod.desired_status, PodStatus::Unknown);
    }

    #[test]
    fn test_create_request_env() {
        let mut extra = HashMap::new();
        extra.insert(String::from("B"), String::from("2"));
        extra.insert(String::from("A"), String::from("1"));
        let request = CreatePodRequest::new("n", "NVIDIA L4", "img")
            .with_env("PUBLIC_KEY", "ssh-ed25519 AAA")
            .with_env_map(&extra)
            .with_env("A", "override");
        let keys: Vec<_> = request.env.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["PUBLIC_KEY", "B", "A"]);
        assert_eq!(request.for_gpu("NVIDIA A40").gpu_type_id, "NVIDIA A40");
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(Pod::proxy_url("abc", 3000), "https://abc-3000.proxy.runpod.net");
    }
}
