//! Configuration loading and config file resolution
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/sfx/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing or unreadable config file never prevents startup: a warning is
//! logged and compiled defaults are used.

use crate::{Error, Result, SoundDescription};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SFX_CONFIG";

/// Sound system settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Hardware voices the device may hand out (0 = all playback virtual)
    pub max_voices: usize,

    /// Packet reader threads (0 = read inline on the submitting thread)
    pub reader_threads: usize,

    /// Period of the dedicated update thread in milliseconds
    pub update_interval_ms: u64,

    /// Soft time budget for one update pass in milliseconds
    pub update_budget_ms: u64,

    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_voices: 16,
            reader_threads: 2,
            update_interval_ms: 10,
            update_budget_ms: 4,
            log_level: "info".to_string(),
        }
    }
}

/// Complete configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SfxConfig {
    /// `[system]` table
    pub system: SystemConfig,

    /// `[defaults]` table: description applied to sounds without their own
    pub defaults: SoundDescription,
}

impl SfxConfig {
    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SfxConfig = toml::from_str(text)?;
        Ok(config.validated())
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load a config file, falling back to defaults on any failure
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to load config ({}), using defaults", e);
                    Self::default()
                }
            },
            None => {
                info!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Return a copy with every value clamped into range
    pub fn validated(&self) -> Self {
        let mut system = self.system.clone();
        if system.max_voices > 256 {
            warn!("max_voices {} clamped to 256", system.max_voices);
            system.max_voices = 256;
        }
        if system.reader_threads > 16 {
            warn!("reader_threads {} clamped to 16", system.reader_threads);
            system.reader_threads = 16;
        }
        system.update_interval_ms = system.update_interval_ms.clamp(1, 1000);
        system.update_budget_ms = system.update_budget_ms.min(system.update_interval_ms);

        Self {
            system,
            defaults: self.defaults.validated(),
        }
    }
}

/// Resolve which config file to load
///
/// Returns `None` when no candidate exists; callers then use defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform config file location, whether or not it exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sfx").join("config.toml"))
}
