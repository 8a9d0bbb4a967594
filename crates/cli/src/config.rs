//! usbdrive configuration management

use anyhow::{Context, Result, anyhow};
use engine::{BackendKind, DeviceFilter, EngineOptions, MountOptions, PlatformPaths};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub mount: MountSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
    /// Interval between polls in `watch` mode
    #[serde(default = "GeneralSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_poll_interval() -> u64 {
        1500
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "PlatformSettings::default_sys_root")]
    pub sys_root: PathBuf,
    #[serde(default = "PlatformSettings::default_mounts_path")]
    pub mounts_path: PathBuf,
    #[serde(default = "PlatformSettings::default_filesystems_path")]
    pub filesystems_path: PathBuf,
    /// VID:PID patterns, e.g. "0x0781:*" (empty = all devices)
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sys_root: Self::default_sys_root(),
            mounts_path: Self::default_mounts_path(),
            filesystems_path: Self::default_filesystems_path(),
            filters: Vec::new(),
        }
    }
}

impl PlatformSettings {
    fn default_sys_root() -> PathBuf {
        PlatformPaths::default().sys_root
    }

    fn default_mounts_path() -> PathBuf {
        PlatformPaths::default().mounts_path
    }

    fn default_filesystems_path() -> PathBuf {
        PlatformPaths::default().filesystems_path
    }

    /// Paths for the sysfs backend, with `~` expanded
    pub fn paths(&self) -> PlatformPaths {
        PlatformPaths {
            sys_root: expand(&self.sys_root),
            mounts_path: expand(&self.mounts_path),
            filesystems_path: expand(&self.filesystems_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSettings {
    /// Parent directory of default mount points
    #[serde(default = "MountSettings::default_mount_root")]
    pub mount_root: PathBuf,
    #[serde(default = "MountSettings::default_create_dirs")]
    pub create_dirs: bool,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            mount_root: Self::default_mount_root(),
            create_dirs: Self::default_create_dirs(),
        }
    }
}

impl MountSettings {
    fn default_mount_root() -> PathBuf {
        MountOptions::default().mount_root
    }

    fn default_create_dirs() -> bool {
        true
    }
}

impl DriveConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbdrive/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriveConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbdrive").join("config.toml")
        } else {
            PathBuf::from(".config/usbdrive/config.toml")
        }
    }

    /// Engine settings derived from this configuration
    pub fn engine_options(&self) -> Result<EngineOptions> {
        let filter = DeviceFilter::parse(&self.platform.filters)?;
        Ok(EngineOptions {
            filter,
            mount: MountOptions {
                mount_root: expand(&self.mount.mount_root),
                create_dirs: self.mount.create_dirs,
            },
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.general.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        for filter in &self.platform.filters {
            engine::filter::validate_pattern(filter)?;
        }

        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
