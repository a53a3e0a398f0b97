//! Settings loader.
//!
//! Resolves settings in three layers: built-in defaults, an optional
//! `podkeeper.yaml`, then environment variables (after `.env` is loaded).

use crate::error::{ConfigError, KeeperError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::KeeperSettings;

/// Environment variable holding the provider API key.
pub const API_KEY_VAR: &str = "RUNPOD_API_KEY";

/// Loader for keeper settings.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory searched for `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new settings loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<KeeperSettings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(KeeperError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            KeeperError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string. An empty document yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<KeeperSettings> {
        debug!("Parsing YAML settings");

        if content.trim().is_empty() {
            return Ok(KeeperSettings::default());
        }

        let settings: KeeperSettings = serde_yaml::from_str(content).map_err(|e| {
            KeeperError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed settings for pod: {}", settings.pod.name);
        Ok(settings)
    }

    /// Resolves settings for one invocation.
    ///
    /// An explicit path must exist. Without one, `podkeeper.yaml` is searched
    /// upward from the working directory and defaults are used when absent.
    /// Environment overrides are applied last through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or an override is malformed.
    pub fn resolve<F>(&self, explicit: Option<&Path>, lookup: F) -> Result<KeeperSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match explicit {
            Some(path) => self.load_file(path)?,
            None => {
                let cwd = self.base_path.clone().unwrap_or_else(|| PathBuf::from("."));
                match find_config_file(&cwd) {
                    Ok(path) => self.load_file(path)?,
                    Err(_) => {
                        debug!("No settings file found, using defaults");
                        KeeperSettings::default()
                    }
                }
            }
        };

        Self::apply_env_overrides(&mut settings, lookup)?;
        settings.expand_paths();
        Ok(settings)
    }

    /// Applies environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override does not parse.
    pub fn apply_env_overrides<F>(settings: &mut KeeperSettings, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(list) = get("RUNPOD_GPU_PREFERENCE") {
            debug!("Overriding pod.gpu_preference from environment");
            settings.pod.gpu_preference = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(gpu) = get("RUNPOD_GPU_TYPE") {
            debug!("Preferring GPU type {gpu} from environment");
            settings.pod.prefer_gpu(gpu.trim());
        }

        if let Some(disk) = get("RUNPOD_DISK_SIZE") {
            let size = disk.trim().parse::<u32>().map_err(|_| {
                KeeperError::Config(ConfigError::validation(
                    format!("RUNPOD_DISK_SIZE must be a whole number of GB, got '{disk}'"),
                    "pod.disk_size_gb",
                ))
            })?;
            settings.pod.disk_size_gb = size;
            settings.pod.volume_size_gb = size;
        }

        if let Some(template) = get("RUNPOD_TEMPLATE_ID") {
            settings.pod.template_id = Some(template);
        }

        if let Some(image) = get("RUNPOD_IMAGE") {
            settings.pod.image = image;
        }

        if let Some(name) = get("RUNPOD_POD_NAME") {
            settings.pod.name = name;
        }

        if let Some(key) = get("SSH_KEY_PATH") {
            settings.ssh.key_path = PathBuf::from(key);
        }

        if let Some(dir) = get("POD_BACKUP_DIR") {
            settings.backup.dir = PathBuf::from(dir);
        }

        if let Some(dir) = get("PODKEEPER_STATE_DIR") {
            settings.state.dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                KeeperError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the `RunPod` API key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if the key is unset or blank.
    pub fn get_runpod_api_key<F>(lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(API_KEY_VAR)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| KeeperError::Config(ConfigError::missing(API_KEY_VAR)))
    }
}

/// Settings file names searched for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["podkeeper.yaml", "podkeeper.yml"];

/// Finds the settings file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no settings file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found settings file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(KeeperError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
