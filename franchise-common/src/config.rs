//! Configuration loading and setting resolution
//!
//! Every setting resolves in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or broken TOML file never stops the program: the remaining
//! tiers apply and the problem is logged once logging is up.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "franchise-locator";

/// Config file name inside [`CONFIG_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Compiled default for the search server
pub const DEFAULT_STREAM_URL: &str = "http://localhost:8000";

/// Environment variable names
pub const ENV_STREAM_URL: &str = "FRANCHISE_STREAM_URL";
pub const ENV_GEMINI_API_KEY: &str = "FRANCHISE_GEMINI_API_KEY";
pub const ENV_PLACES_API_KEY: &str = "FRANCHISE_PLACES_API_KEY";
pub const ENV_LOG_LEVEL: &str = "FRANCHISE_LOG_LEVEL";

/// Contents of `config.toml`
///
/// Every field is optional; an empty file is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Base URL of the search server
    pub stream_url: Option<String>,
    pub logging: LoggingConfig,
    pub gemini: GeminiConfig,
    pub places: PlacesConfig,
    pub merge: MergeConfig,
    pub sources: SourcesConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[gemini]` section: semantic merge collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            timeout_secs: 30,
        }
    }
}

/// `[places]` section: seed results collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacesConfig {
    pub api_key: Option<String>,
    pub max_results: u32,
    pub min_rating: f64,
    pub included_type: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            max_results: 10,
            min_rating: 3.0,
            included_type: None,
            timeout_secs: 30,
        }
    }
}

/// `[merge]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// `containment` (default) or `normalized`
    pub address_matcher: Option<String>,
}

/// `[sources]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Sources shown as `initializing` before their first event
    pub expected: Vec<String>,
}

/// Tier a resolved setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    TomlFile,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::CommandLine => "command line",
            ConfigSource::Environment => "environment",
            ConfigSource::TomlFile => "TOML",
            ConfigSource::Default => "default",
        };
        f.write_str(name)
    }
}

/// Platform config file path (`~/.config/franchise-locator/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Result of looking for the config file
///
/// Loading happens before logging is set up, so the outcome is returned
/// to the caller and reported through [`ConfigLoad::log`] afterwards.
#[derive(Debug)]
pub enum ConfigLoad {
    Loaded(PathBuf),
    /// No explicit path and nothing at the platform location
    Absent(Option<PathBuf>),
    /// File given or present but unusable; defaults apply
    Failed(Error),
}

impl ConfigLoad {
    pub fn log(&self) {
        match self {
            ConfigLoad::Loaded(path) => info!("Loaded config from {}", path.display()),
            ConfigLoad::Absent(Some(path)) => debug!("No config file at {}, using defaults", path.display()),
            ConfigLoad::Absent(None) => debug!("No platform config directory, using defaults"),
            ConfigLoad::Failed(e) => warn!("{} - using defaults", e),
        }
    }
}

/// Load the config file, degrading to defaults on any problem
///
/// An explicit path is always read, so a missing explicit file is a
/// failure. A missing file at the platform default location is normal.
pub fn load_or_default(explicit: Option<&Path>) -> (TomlConfig, ConfigLoad) {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            other => return (TomlConfig::default(), ConfigLoad::Absent(other)),
        },
    };

    match load_toml_config(&path) {
        Ok(config) => (config, ConfigLoad::Loaded(path)),
        Err(e) => (TomlConfig::default(), ConfigLoad::Failed(e)),
    }
}

/// Non-empty, non-whitespace value
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Resolve one string setting across command line, environment and TOML
///
/// Blank values at any tier are skipped. Returns `None` when no tier has a
/// usable value; the caller applies its compiled default.
pub fn resolve_setting(
    name: &str,
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
) -> Option<(String, ConfigSource)> {
    if let Some(value) = cli_arg.filter(|v| is_valid_value(v)) {
        debug!(setting = name, "Resolved from command line");
        return Some((value.trim().to_string(), ConfigSource::CommandLine));
    }

    if let Ok(value) = std::env::var(env_var_name) {
        if is_valid_value(&value) {
            debug!(setting = name, env = env_var_name, "Resolved from environment");
            return Some((value.trim().to_string(), ConfigSource::Environment));
        }
    }

    if let Some(value) = toml_value.filter(|v| is_valid_value(v)) {
        debug!(setting = name, "Resolved from TOML config");
        return Some((value.trim().to_string(), ConfigSource::TomlFile));
    }

    None
}

/// Resolve a setting, falling back to a compiled default
pub fn resolve_setting_or(
    name: &str,
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
    default: &str,
) -> (String, ConfigSource) {
    resolve_setting(name, cli_arg, env_var_name, toml_value)
        .unwrap_or_else(|| (default.to_string(), ConfigSource::Default))
}
