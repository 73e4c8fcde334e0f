//! Configuration file support for hubload.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HUBLOAD_*)
//! 3. Local config file (./hubload.toml)
//! 4. Global config file (~/.config/hubload/config.toml)
//!
//! Files are only read; hubload never writes configuration back.

use directories::ProjectDirs;
use hubload::{SessionConfig, UploadConfig, WriteMode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "hubload.toml";

/// Hub selection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    /// Default hub name (prefix match).
    pub name: Option<String>,
    /// Discovery window in seconds.
    pub scan_timeout_secs: Option<u64>,
}

/// Upload tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    /// Delay between RAM chunks in milliseconds.
    pub pacing_ms: Option<u64>,
    /// Send commands without waiting for a write response.
    #[serde(default)]
    pub write_without_response: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hub configuration.
    #[serde(default)]
    pub hub: HubConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {}", path.display(), e))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hubload").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.hub.name.is_some() {
            self.hub.name = other.hub.name;
        }
        if other.hub.scan_timeout_secs.is_some() {
            self.hub.scan_timeout_secs = other.hub.scan_timeout_secs;
        }

        if other.upload.pacing_ms.is_some() {
            self.upload.pacing_ms = other.upload.pacing_ms;
        }
        if other.upload.write_without_response {
            self.upload.write_without_response = true;
        }
    }

    /// Build the session configuration, letting `scan_timeout` override the file.
    pub fn session_config(&self, scan_timeout: Option<u64>) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(secs) = scan_timeout.or(self.hub.scan_timeout_secs) {
            session = session.with_scan_timeout(Duration::from_secs(secs));
        }

        let mut upload = UploadConfig::default();
        if let Some(ms) = self.upload.pacing_ms {
            upload = upload.with_pacing(Duration::from_millis(ms));
        }
        if self.upload.write_without_response {
            upload = upload.with_write_mode(WriteMode::WithoutResponse);
        }

        session.with_upload(upload)
    }
}
