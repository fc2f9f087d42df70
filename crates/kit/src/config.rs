//! Tool configuration from `config.toml`

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::debug;

use crate::class::DEFAULT_CLASS;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "DVM_CONFIG";

/// Configuration file read when nothing else is specified, if it exists.
pub const SYSTEM_CONFIG: &str = "/etc/dvm/config.toml";

/// Default location of the platform state.
pub const DEFAULT_STATE_DIR: &str = "/var/lib/dvm";

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlatformConfig {
    /// Directory holding `dvm.json` and the default pool
    #[serde(default = "default_state_dir")]
    pub state_dir: Utf8PathBuf,

    /// Class used when `--class` is not given
    #[serde(default = "default_class")]
    pub default_class: String,
}

fn default_state_dir() -> Utf8PathBuf {
    DEFAULT_STATE_DIR.into()
}

fn default_class() -> String {
    DEFAULT_CLASS.to_owned()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            default_class: default_class(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration, looking at `explicit`, then `$DVM_CONFIG`, then
    /// the system file.
    pub fn load(explicit: Option<&Utf8Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok().filter(|v| !v.is_empty());
        match locate(explicit, from_env.as_deref()) {
            (path, true) => Self::load_file(&path),
            (path, false) if path.exists() => Self::load_file(&path),
            _ => {
                debug!("No configuration file; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a configuration file.
    pub fn load_file(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        if config.default_class.is_empty() {
            color_eyre::eyre::bail!("default-class must not be empty in config file: {path}");
        }
        debug!("Loaded configuration from {path}");
        Ok(config)
    }
}

/// Pick the configuration file to read and whether it must exist.
fn locate(explicit: Option<&Utf8Path>, from_env: Option<&str>) -> (Utf8PathBuf, bool) {
    match (explicit, from_env) {
        (Some(p), _) => (p.to_owned(), true),
        (None, Some(p)) => (p.into(), true),
        (None, None) => (SYSTEM_CONFIG.into(), false),
    }
}
