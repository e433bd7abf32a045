//! Server configuration management

use crate::engine::SessionOptions;
use anyhow::{Context, Result, anyhow};
use common::DeviceIdentity;
use common::logging::MAX_VERBOSITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub wait: WaitSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// TCP port to listen on (all IPv6 addresses)
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    /// 0 (silent) to 5 (packet dumps)
    #[serde(default = "ServerSettings::default_verbose")]
    pub verbose: u8,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            verbose: Self::default_verbose(),
        }
    }
}

impl ServerSettings {
    fn default_port() -> u16 {
        4000
    }

    fn default_verbose() -> u8 {
        3
    }
}

/// Wait mode: keep the client connected while the device is unplugged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Poll interval while the device is absent
    #[serde(default = "WaitSettings::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl WaitSettings {
    fn default_timeout_secs() -> u64 {
        3
    }
}

impl ServerConfig {
    /// Load configuration from file
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbredir-server/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load from the standard locations, falling back to built-in defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}, using defaults", e);
                Self::default()
            }
        }
    }

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

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbredir-server").join("server.toml")
        } else {
            PathBuf::from(".config/usbredir-server/server.toml")
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.verbose > MAX_VERBOSITY {
            return Err(anyhow!(
                "Invalid verbose level {}: must be 0-{}",
                self.server.verbose,
                MAX_VERBOSITY
            ));
        }
        if self.server.port == 0 {
            return Err(anyhow!("Invalid port 0"));
        }
        if self.wait.timeout_secs == 0 {
            return Err(anyhow!("Wait timeout must be at least 1 second"));
        }
        Ok(())
    }
}

/// Load a configuration file named on the command line, expanding `~`
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ServerConfig::load(Some(path_buf))
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub verbose: Option<u8>,
    pub wait: bool,
    pub wait_timeout_secs: Option<u64>,
}

/// Fully resolved settings the server runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub identity: DeviceIdentity,
    pub port: u16,
    pub verbose: u8,
    pub wait_mode: bool,
    pub wait_timeout: Duration,
}

impl RuntimeOptions {
    pub fn resolve(
        identity: DeviceIdentity,
        config: &ServerConfig,
        overrides: &Overrides,
    ) -> Result<Self> {
        let mut merged = config.clone();
        if let Some(port) = overrides.port {
            merged.server.port = port;
        }
        if let Some(verbose) = overrides.verbose {
            merged.server.verbose = verbose;
        }
        if overrides.wait {
            merged.wait.enabled = true;
        }
        if let Some(secs) = overrides.wait_timeout_secs {
            merged.wait.timeout_secs = secs;
        }
        merged.validate()?;

        Ok(Self {
            identity,
            port: merged.server.port,
            verbose: merged.server.verbose,
            wait_mode: merged.wait.enabled,
            wait_timeout: Duration::from_secs(merged.wait.timeout_secs),
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            identity: self.identity,
            wait_mode: self.wait_mode,
            wait_timeout: self.wait_timeout,
        }
    }
}
