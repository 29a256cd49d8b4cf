use anyhow::{Context, Result};
use natmap_igd::{Protocol, DEFAULT_TTL_SECS};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings read from `config.toml`; command-line flags take precedence
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SSDP discovery timeout
    pub timeout_ms: u64,
    /// Timeout for description fetches and SOAP calls
    pub http_timeout_secs: u64,
    pub protocol: Protocol,
    pub description: Option<String>,
    pub ttl: u32,
    /// How often the external address is checked while a mapping is held
    pub recheck_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            http_timeout_secs: 10,
            protocol: Protocol::Tcp,
            description: None,
            ttl: DEFAULT_TTL_SECS,
            recheck_secs: 60,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In config file {}", path.display()))
    }

    /// Load `explicit` (which must exist), else the default file if present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// `<config dir>/natmap/config.toml` (platform-specific)
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("natmap").join("config.toml"))
}
