//! Runtime configuration loading
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (CORUN_*)
//! 3. Project-level (./corun.toml)
//! 4. User-level (~/.config/corun/config.toml)
//! 5. Default values
//! ```
//!
//! Files hold a `[runtime]` table whose keys mirror
//! [`RuntimeConfig`](crate::runtime::scheduler::RuntimeConfig):
//!
//! ```toml
//! [runtime]
//! num_workers = 4
//! queue_kind = "locked"
//! tracing = false
//! ```
//!
//! CLI overrides are applied by the binary on top of [`load_config`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::runtime::scheduler::{QueueKind, RuntimeConfig, ShutdownPolicy, MAX_QUEUE_CAPACITY};

/// Project-level config file name.
pub const PROJECT_CONFIG_FILE: &str = "corun.toml";

/// Worker count override.
pub const ENV_WORKERS: &str = "CORUN_WORKERS";
/// Tracing override (`1`/`true`/`on` or `0`/`false`/`off`).
pub const ENV_TRACE: &str = "CORUN_TRACE";
/// Queue strategy override (`locked` or `lock-free`).
pub const ENV_QUEUE: &str = "CORUN_QUEUE";
/// Queue capacity override.
pub const ENV_QUEUE_CAPACITY: &str = "CORUN_QUEUE_CAPACITY";
/// Shutdown policy override (`drain` or `abandon`).
pub const ENV_SHUTDOWN: &str = "CORUN_SHUTDOWN";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeConfig,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    // Try XDG config directory on Unix
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("corun"));
    }

    // Fallback to ~/.config/corun
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("corun"));
    }

    // On Windows, try %APPDATA%
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("corun"));
    }

    None
}

/// Get the user config file path (~/.config/corun/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Parse the contents of a config file.
pub fn parse_config(content: &str) -> Result<RuntimeConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(content)?;
    validate(&file.runtime)?;
    Ok(file.runtime)
}

/// Reject values the runtime cannot honor.
pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
    if !(1..=MAX_QUEUE_CAPACITY).contains(&config.queue_capacity) {
        return Err(invalid("queue_capacity", &config.queue_capacity.to_string()));
    }
    Ok(())
}

/// Read and parse one config file.
pub fn load_config_file(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Resolve the configuration: an explicit file if given, otherwise the
/// project file, otherwise the user file, otherwise defaults; then
/// environment overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => {
            let project = PathBuf::from(PROJECT_CONFIG_FILE);
            match get_config_path() {
                _ if project.exists() => load_config_file(&project)?,
                Some(user) if user.exists() => load_config_file(&user)?,
                _ => RuntimeConfig::default(),
            }
        }
    };
    apply_env(&mut config, std::env::vars())?;
    debug!(?config, "configuration resolved");
    Ok(config)
}

/// Apply `CORUN_*` overrides from `vars`. Unrelated variables are ignored.
pub fn apply_env<I>(
    config: &mut RuntimeConfig,
    vars: I,
) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        match key.as_str() {
            ENV_WORKERS => config.num_workers = parse_usize(&key, &value)?,
            ENV_QUEUE_CAPACITY => config.queue_capacity = parse_capacity(&key, &value)?,
            ENV_TRACE => config.tracing = parse_bool(&key, &value)?,
            ENV_QUEUE => {
                config.queue_kind = value
                    .parse::<QueueKind>()
                    .map_err(|_| invalid(&key, &value))?;
            }
            ENV_SHUTDOWN => {
                config.shutdown_policy = match value.trim().to_ascii_lowercase().as_str() {
                    "drain" => ShutdownPolicy::Drain,
                    "abandon" => ShutdownPolicy::Abandon,
                    _ => return Err(invalid(&key, &value)),
                };
            }
            _ => {}
        }
    }
    Ok(())
}

fn invalid(
    key: &str,
    value: &str,
) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_usize(
    key: &str,
    value: &str,
) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_capacity(
    key: &str,
    value: &str,
) -> Result<usize, ConfigError> {
    match parse_usize(key, value)? {
        capacity @ 1..=MAX_QUEUE_CAPACITY => Ok(capacity),
        _ => Err(invalid(key, value)),
    }
}

fn parse_bool(
    key: &str,
    value: &str,
) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
