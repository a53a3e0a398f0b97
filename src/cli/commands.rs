//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::CreateOptions;

/// Podkeeper - keeps one `RunPod` GPU node alive across pod replacements.
#[derive(Parser, Debug)]
#[command(name = "podkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(short, long, global = true, env = "PODKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create a pod, trying GPU types in preference order.
    Create {
        /// Pod name.
        #[arg(long)]
        name: Option<String>,

        /// GPU type to try first.
        #[arg(long)]
        gpu: Option<String>,

        /// Container disk and volume size in GB.
        #[arg(long)]
        disk: Option<u32>,

        /// Use the secure cloud instead of the community cloud.
        #[arg(long)]
        secure: bool,

        /// Replace a recorded pod that was not terminated.
        #[arg(short, long)]
        force: bool,
    },

    /// List all pods of the account.
    List,

    /// Show the pod record and the provider's view of the managed pod.
    Status,

    /// Resume the managed pod and restore its identity.
    Start,

    /// Back up the identity, then stop the managed pod.
    Stop,

    /// Terminate the managed pod.
    Terminate {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Wait for SSH and print connection details.
    #[command(alias = "ssh")]
    Connect,

    /// Pull the identity artifacts into the backup directory.
    Backup,

    /// Push the identity artifacts to the pod and restart the node.
    Restore,

    /// Forget the managed pod without touching the provider.
    Clean,

    /// Show or remove the record lock.
    Unlock {
        /// Remove the lock even if another invocation holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl Commands {
    /// True if the command talks to the provider API.
    #[must_use]
    pub const fn needs_api(&self) -> bool {
        !matches!(self, Self::Clean | Self::Unlock { .. })
    }

    /// `create` overrides, if this is `create`.
    #[must_use]
    pub fn create_options(&self) -> Option<CreateOptions> {
        match self {
            Self::Create {
                name,
                gpu,
                disk,
                secure,
                force,
            } => Some(CreateOptions {
                name: name.clone(),
                gpu: gpu.clone(),
                disk_gb: *disk,
                secure: *secure,
                force: *force,
            }),
            _ => None,
        }
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
