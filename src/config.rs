//! Configuration loading.
//!
//! Precedence: env vars > `config.toml` > defaults. A missing file yields the
//! defaults; a malformed one is an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::Uid;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Table capacities.
    #[serde(default)]
    pub maps: MapsConfig,

    /// Socket monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Log level and destination.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policy applied at startup.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Maximum entries per table.
#[derive(Debug, Deserialize)]
pub struct MapsConfig {
    /// UID owner table.
    #[serde(default = "default_uid_capacity")]
    pub uid_owner_capacity: usize,

    /// UID permission table.
    #[serde(default = "default_uid_capacity")]
    pub uid_permission_capacity: usize,

    /// Cookie tag table.
    #[serde(default = "default_cookie_capacity")]
    pub cookie_tag_capacity: usize,

    /// UID counter set table.
    #[serde(default = "default_uid_capacity")]
    pub uid_counter_set_capacity: usize,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            uid_owner_capacity: default_uid_capacity(),
            uid_permission_capacity: default_uid_capacity(),
            cookie_tag_capacity: default_cookie_capacity(),
            uid_counter_set_capacity: default_uid_capacity(),
        }
    }
}

/// Socket monitor settings.
#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Destroy-event channel capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated JSON logs. Defaults to `<config dir>/logs`.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            logs_dir: None,
        }
    }
}

/// Policy applied to fresh tables at startup.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    /// Chain memberships, applied with replace semantics.
    #[serde(default)]
    pub chains: Vec<ChainMembership>,

    /// Interface restrictions.
    #[serde(default)]
    pub interfaces: Vec<InterfaceRule>,

    /// UIDs under VPN lockdown.
    #[serde(default)]
    pub lockdown_uids: Vec<Uid>,

    /// Permission grants, applied in order.
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
}

/// Full membership of one chain.
#[derive(Debug, Deserialize)]
pub struct ChainMembership {
    /// Chain name, e.g. `fw_dozable`.
    pub name: String,

    /// Whether the caller frames the list as an allowlist.
    #[serde(default)]
    pub allowlist: bool,

    /// Member UIDs.
    #[serde(default)]
    pub uids: Vec<Uid>,
}

/// Interface restriction for a set of UIDs.
#[derive(Debug, Deserialize)]
pub struct InterfaceRule {
    /// Interface index; `0` matches any interface.
    pub iif: u32,

    /// Restricted UIDs.
    pub uids: Vec<Uid>,
}

/// Permission grant for a set of UIDs.
#[derive(Debug, Deserialize)]
pub struct PermissionEntry {
    /// Wire value: `-1` for uninstalled, otherwise a permission mask.
    pub permissions: i32,

    /// Affected UIDs.
    pub uids: Vec<Uid>,
}

// Default value functions for serde

fn default_uid_capacity() -> usize {
    8000
}
fn default_cookie_capacity() -> usize {
    10000
}
fn default_event_capacity() -> usize {
    4096
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests need not touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TRAFFICD_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("TRAFFICD_EVENT_CAPACITY") {
            match v.parse() {
                Ok(n) => self.monitor.event_capacity = n,
                Err(_) => tracing::warn!(
                    var = "TRAFFICD_EVENT_CAPACITY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("invalid config: {e}"))
    }
}

/// Load the config from a TOML file, falling back to defaults if the file
/// does not exist, then apply env overrides from the process environment.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?
    } else {
        Config::default()
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.trafficd/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".trafficd"))
}
