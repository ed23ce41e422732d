//! Agent configuration management.
//!
//! Configuration is stored as TOML at `$SYSTEK_CONFIG`, or else:
//! - Linux: `~/.config/systek/agent.toml`
//! - Windows: `%APPDATA%/systek/agent.toml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use systek_agent::SupervisorConfig;
use systek_net::ConnectionConfig;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `host:port` of the Systek server.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Name reported to the server (OS hostname by default).
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Key presented in UPDATE_BASIC.
    #[serde(default)]
    pub auth_key: String,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Repeated connection errors are logged at most once per window.
    #[serde(default = "default_error_throttle_ms")]
    pub error_throttle_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub sync_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub frame_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Log every frame and raise the default filter to debug.
    #[serde(default)]
    pub verbose: bool,

    /// Initial service states reported on UPDATE_SERVICES (name -> code).
    #[serde(default)]
    pub services: BTreeMap<String, i32>,
}

fn default_server_addr() -> String {
    "127.0.0.1:65000".into()
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "systek-agent".into())
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_error_throttle_ms() -> u64 {
    60_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            hostname: default_hostname(),
            auth_key: String::new(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            error_throttle_ms: default_error_throttle_ms(),
            sync_timeout_ms: default_timeout_ms(),
            frame_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            verbose: false,
            services: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration, restricting permissions on Unix since it
    /// holds the auth key.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            frame_timeout: Duration::from_millis(self.frame_timeout_ms),
            verbose: self.verbose,
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            server_addr: self.server_addr.clone(),
            connection: self.connection(),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            error_throttle: Duration::from_millis(self.error_throttle_ms),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os("SYSTEK_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("systek").join("agent.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("systek")
            .join("agent.toml"))
    }
}
