//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write as _;
use std::io::Write as _;
use tabled::{Table, Tabled};

use crate::error::KeeperError;
use crate::orchestrator::{
    ArtifactStatus, OperationReport, PodListing, StatusReport, StepStatus,
};
use crate::runpod::PodStatus;
use crate::state::{LockInfo, PodPhase};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Artifact row for table display.
#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "Artifact")]
    name: String,
    #[tabled(rename = "Result")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Pod row for table display.
#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "")]
    managed: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "GPU")]
    gpu: String,
    #[tabled(rename = "$/hr")]
    cost: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an operation report, ending with the success or failure line.
    #[must_use]
    pub fn format_report(&self, report: &OperationReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &OperationReport) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "\n{} {}",
            report.operation.to_string().bold(),
            report.pod_id.as_deref().unwrap_or("(no pod)")
        );

        if !report.steps.is_empty() {
            let rows: Vec<StepRow> = report
                .steps
                .iter()
                .map(|s| StepRow {
                    step: s.step.clone(),
                    status: match s.status {
                        StepStatus::Ok => "ok".green().to_string(),
                        StepStatus::Warned => "warning".yellow().to_string(),
                    },
                    detail: Self::truncate(&s.detail, 70),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !report.artifacts.is_empty() {
            let rows: Vec<ArtifactRow> = report
                .artifacts
                .iter()
                .map(|a| ArtifactRow {
                    name: a.name.clone(),
                    status: Self::format_artifact_status(a.status),
                    detail: Self::truncate(a.detail.as_deref().unwrap_or(""), 60),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if let Some(connection) = &report.connection {
            output.push_str("\nConnect:\n");
            let _ = writeln!(output, "   {}", connection.ssh_command);
            let _ = writeln!(output, "   {}", connection.scp_command);
            let _ = writeln!(output, "   Web: {}", connection.web_url);
        }

        if !report.warnings.is_empty() {
            let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
            for warning in &report.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        let line = if report.success {
            format!("{} {} succeeded", "✓".green(), report.operation)
        } else {
            format!(
                "{} {} failed ({})",
                "✗".red(),
                report.operation,
                report.artifact_summary()
            )
        };
        let _ = writeln!(output, "\n{line}");
        output
    }

    /// Formats the account's pods.
    #[must_use]
    pub fn format_pods(&self, pods: &[PodListing]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(pods).unwrap_or_default(),
            OutputFormat::Text => {
                if pods.is_empty() {
                    return String::from("No pods in this account.\n");
                }

                let rows: Vec<PodRow> = pods
                    .iter()
                    .map(|l| PodRow {
                        managed: if l.managed { "*".to_string() } else { String::new() },
                        name: Self::truncate(&l.pod.name, 24),
                        status: Self::format_pod_status(l.pod.desired_status),
                        gpu: l.pod.gpu_type_name().unwrap_or("unknown").to_string(),
                        cost: l.pod.cost_per_hr.map_or_else(String::new, |c| format!("{c:.3}")),
                        id: l.pod.id.clone(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push_str("\n* managed pod\n");
                output
            }
        }
    }

    /// Formats the record and provider status.
    #[must_use]
    pub fn format_status(&self, status: &StatusReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(status).unwrap_or_default(),
            OutputFormat::Text => Self::format_status_text(status),
        }
    }

    fn format_status_text(status: &StatusReport) -> String {
        let record = &status.record;
        let mut output = String::new();

        let _ = write!(output, "\nRecord: {}\n\n", status.record_location);

        let Some(pod_id) = record.pod_id.as_deref() else {
            output.push_str("   No pod managed.\n");
            Self::push_history(&mut output, status);
            return output;
        };

        let _ = writeln!(output, "   Pod:     {pod_id}");
        let _ = writeln!(output, "   Name:    {}", record.pod_name.as_deref().unwrap_or("-"));
        let _ = writeln!(output, "   GPU:     {}", record.gpu_type.as_deref().unwrap_or("-"));
        let _ = writeln!(output, "   Phase:   {}", Self::format_phase(record.phase));
        match (&record.ssh, record.ssh_verified_at) {
            (Some(ssh), Some(at)) => {
                let _ = writeln!(output, "   SSH:     {ssh} (verified {})", at.format("%Y-%m-%d %H:%M"));
            }
            (Some(ssh), None) => {
                let _ = writeln!(output, "   SSH:     {ssh} {}", "(stale)".dimmed());
            }
            _ => {
                let _ = writeln!(output, "   SSH:     -");
            }
        }

        if let Some(pod) = &status.provider {
            let _ = writeln!(
                output,
                "\n   Provider: {} on {}{}",
                Self::format_pod_status(pod.desired_status),
                pod.gpu_type_name().unwrap_or("unknown GPU"),
                pod.cost_per_hr.map_or_else(String::new, |c| format!(", ${c:.3}/hr"))
            );
        }
        if let Some(error) = &status.provider_error {
            let _ = writeln!(output, "\n   {} {error}", "⚠".yellow());
        }
        if let Some(lock) = &status.lock {
            let _ = writeln!(
                output,
                "\n   Locked by {} until {}",
                lock.holder,
                lock.expires_at.format("%Y-%m-%d %H:%M")
            );
        }

        Self::push_history(&mut output, status);
        output
    }

    fn push_history(output: &mut String, status: &StatusReport) {
        let history = &status.record.history;
        if history.is_empty() {
            return;
        }
        let _ = writeln!(output, "\n   Recent history ({}):", history.len());
        for entry in history.iter().rev().take(5) {
            let mark = if entry.success { "✓".green() } else { "✗".red() };
            let _ = writeln!(
                output,
                "     {mark} {} - {}{}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.operation,
                entry.error.as_deref().map_or_else(String::new, |e| format!(": {e}"))
            );
        }
    }

    /// Formats the outcome of `unlock`.
    #[must_use]
    pub fn format_unlock(&self, lock: Option<&LockInfo>, removed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "lock": lock,
                "removed": removed,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => match (lock, removed) {
                (None, false) => String::from("Record is not locked.\n"),
                (None, true) => format!("{} Removed unreadable lock file\n", "✓".green()),
                (Some(lock), true) => format!("{} Removed lock held by {}\n", "✓".green(), lock.holder),
                (Some(lock), false) => format!(
                    "Locked by {} since {} ({}). Use --force to remove it.\n",
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M"),
                    if lock.is_expired() { "expired" } else { "active" }
                ),
            },
        }
    }

    /// Formats a fatal error as `Error [<Kind>]: <message>`.
    #[must_use]
    pub fn format_error(&self, error: &KeeperError) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "success": false,
                "kind": error.kind(),
                "message": error.to_string(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => format!("{} Error [{}]: {error}", "✗".red(), error.kind()),
        }
    }

    /// Writes formatted output to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout is closed.
    pub fn emit(text: &str) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            stdout.write_all(b"\n")?;
        }
        stdout.flush()
    }

    fn format_artifact_status(status: ArtifactStatus) -> String {
        match status {
            ArtifactStatus::Transferred => "transferred".green().to_string(),
            ArtifactStatus::Skipped => "skipped".yellow().to_string(),
            ArtifactStatus::Failed => "failed".red().to_string(),
        }
    }

    fn format_phase(phase: PodPhase) -> String {
        match phase {
            PodPhase::Running => phase.to_string().green().to_string(),
            PodPhase::Creating | PodPhase::Stopping => phase.to_string().yellow().to_string(),
            PodPhase::Stopped | PodPhase::Terminated => phase.to_string().red().to_string(),
            PodPhase::Absent => phase.to_string().dimmed().to_string(),
        }
    }

    /// Formats a pod status with color.
    fn format_pod_status(status: PodStatus) -> String {
        match status {
            PodStatus::Running => "running".green().to_string(),
            PodStatus::Created | PodStatus::Restarting => status.to_string().yellow().to_string(),
            PodStatus::Exited | PodStatus::Paused => "stopped".red().to_string(),
            PodStatus::Dead | PodStatus::Terminated => status.to_string().red().to_string(),
            PodStatus::Unknown => "unknown".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::state::OperationKind;

    fn plain() -> OutputFormatter {
        colored::control::set_override(false);
        OutputFormatter::new(OutputFormat::Text)
    }

    #[test]
    fn test_report_ends_with_result_line() {
        let mut report = OperationReport::new(OperationKind::Backup, Some(String::from("p1")));
        report.artifact("swarm.pem", ArtifactStatus::Transferred, None);
        report.artifact("userData.json", ArtifactStatus::Failed, Some(String::from("refused")));
        report.success = false;

        let text = plain().format_report(&report);
        assert!(text.contains("swarm.pem"));
        assert!(text.trim_end().ends_with("backup failed (1 transferred, 0 skipped, 1 failed)"));
    }

    #[test]
    fn test_report_json() {
        let report = OperationReport::new(OperationKind::Clean, None);
        let json = OutputFormatter::new(OutputFormat::Json).format_report(&report);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["operation"], "clean");
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_error_line_names_kind() {
        let err = KeeperError::from(LifecycleError::NoManagedPod);
        let text = plain().format_error(&err);
        assert!(text.contains("Error [NoManagedPod]: No pod is managed yet"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-very-long-pod-name", 10), "a-very-...");
    }
}
