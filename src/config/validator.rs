//! Settings validation.
//!
//! Runs before any network call so that a bad GPU list, pod name or
//! artifact path fails fast instead of after a pod has been billed.

use crate::error::{ConfigError, KeeperError, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::settings::{BackupSettings, KeeperSettings, PodSettings, TimingSettings};

/// Validator for keeper settings.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Known valid GPU types.
    known_gpu_types: HashSet<String>,
}

/// GPU types offered by `RunPod` that the keeper has been used with.
const KNOWN_GPU_TYPES: &[&str] = &[
    "NVIDIA A40",
    "NVIDIA A100 80GB PCIe",
    "NVIDIA A100-SXM4-80GB",
    "NVIDIA GeForce RTX 3080",
    "NVIDIA GeForce RTX 3080 Ti",
    "NVIDIA GeForce RTX 3090",
    "NVIDIA GeForce RTX 3090 Ti",
    "NVIDIA GeForce RTX 4080",
    "NVIDIA GeForce RTX 4080 SUPER",
    "NVIDIA GeForce RTX 4090",
    "NVIDIA GeForce RTX 5090",
    "NVIDIA H100 80GB HBM3",
    "NVIDIA H100 PCIe",
    "NVIDIA L4",
    "NVIDIA L40",
    "NVIDIA L40S",
    "NVIDIA RTX 4000 Ada Generation",
    "NVIDIA RTX 6000 Ada Generation",
    "NVIDIA RTX A4000",
    "NVIDIA RTX A5000",
    "NVIDIA RTX A6000",
];

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator with default known GPU types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_gpu_types: KNOWN_GPU_TYPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Validates keeper settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, settings: &KeeperSettings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        self.validate_pod(&settings.pod, &mut result);
        Self::validate_backup(&settings.backup, &mut result);
        Self::validate_timing(&settings.timing, &mut result);

        if settings.ssh.user.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("ssh.user"),
                message: String::from("SSH user cannot be empty"),
            });
        }

        for warning in &result.warnings {
            warn!("{warning}");
        }

        if result.errors.is_empty() {
            debug!("Settings validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(KeeperError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_pod(&self, pod: &PodSettings, result: &mut ValidationResult) {
        if !is_valid_name(&pod.name) {
            result.errors.push(ValidationError {
                field: String::from("pod.name"),
                message: format!(
                    "Pod name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    pod.name
                ),
            });
        }

        if pod.gpu_preference.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("pod.gpu_preference"),
                message: String::from("GPU preference list cannot be empty"),
            });
        }

        let mut seen = HashSet::new();
        for (i, gpu) in pod.gpu_preference.iter().enumerate() {
            if !seen.insert(gpu) {
                result.warnings.push(format!(
                    "pod.gpu_preference[{i}]: '{gpu}' is listed more than once"
                ));
            }
            if !self.known_gpu_types.contains(gpu) {
                result.warnings.push(format!(
                    "pod.gpu_preference[{i}]: Unknown GPU type '{gpu}'. This may fail if not available."
                ));
            }
        }

        if pod.disk_size_gb == 0 {
            result.errors.push(ValidationError {
                field: String::from("pod.disk_size_gb"),
                message: String::from("Disk size must be at least 1 GB"),
            });
        }

        if pod.template_id.is_none() && pod.image.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("pod.image"),
                message: String::from("Either a template id or a container image is required"),
            });
        }
    }

    fn validate_backup(backup: &BackupSettings, result: &mut ValidationResult) {
        if backup.artifacts.is_empty() {
            result.warnings.push(String::from(
                "backup.artifacts: No identity artifacts configured; backup and restore do nothing",
            ));
        }

        let mut seen_names = HashSet::new();
        for (i, artifact) in backup.artifacts.iter().enumerate() {
            if !seen_names.insert(&artifact.name) {
                result.errors.push(ValidationError {
                    field: format!("backup.artifacts[{i}].name"),
                    message: format!("Duplicate artifact name: {}", artifact.name),
                });
            }

            if artifact.name.is_empty() || artifact.name.contains('/') {
                result.errors.push(ValidationError {
                    field: format!("backup.artifacts[{i}].name"),
                    message: format!("Artifact name must be a plain file name: '{}'", artifact.name),
                });
            }

            if !artifact.remote_path.starts_with('/') {
                result.errors.push(ValidationError {
                    field: format!("backup.artifacts[{i}].remote_path"),
                    message: format!("Remote path must be absolute: {}", artifact.remote_path),
                });
            }
        }
    }

    fn validate_timing(timing: &TimingSettings, result: &mut ValidationResult) {
        let checks = [
            ("timing.probe_interval_secs", timing.probe_interval_secs),
            ("timing.connect_timeout_secs", timing.connect_timeout_secs),
            ("timing.reachability_timeout_secs", timing.reachability_timeout_secs),
            ("timing.boot_timeout_secs", timing.boot_timeout_secs),
            ("timing.transfer_timeout_secs", timing.transfer_timeout_secs),
            ("timing.api_timeout_secs", timing.api_timeout_secs),
        ];

        for (field, value) in checks {
            if value == 0 {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: String::from("Timeout must be at least 1 second"),
                });
            }
        }

        if timing.boot_timeout_secs < timing.reachability_timeout_secs {
            result.warnings.push(String::from(
                "timing.boot_timeout_secs is shorter than the reachability timeout",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
