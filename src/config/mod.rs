//! Settings for the pod keeper.
//!
//! This module handles everything loaded once per invocation:
//! - Built-in defaults and the optional `podkeeper.yaml`
//! - `.env` and environment variable overrides
//! - Validation before any network call

mod parser;
mod settings;
mod validator;

pub use parser::{API_KEY_VAR, ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use settings::{
    BackupSettings, CloudType, DEFAULT_GPU_PREFERENCE, DEFAULT_RESTART_COMMAND, KeeperSettings,
    PodSettings, SshSettings, StateSettings, TimingSettings, expand_tilde,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
